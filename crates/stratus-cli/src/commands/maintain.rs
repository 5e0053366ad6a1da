//! Operations on VMs that already exist.

use std::process::ExitCode;

use stratus_stages::{Stage, StageKind};

use super::{Context, report_results};

pub async fn reregister(ctx: &Context, ids: &[String]) -> anyhow::Result<ExitCode> {
    let vms = ctx.vms(ids).await?;
    Ok(report_results(&ctx.controller().reregister(vms).await))
}

pub async fn reprovision(ctx: &Context, ids: &[String]) -> anyhow::Result<ExitCode> {
    let vms = ctx.vms(ids).await?;
    Ok(report_results(&ctx.controller().reprovision(vms).await?))
}

pub async fn check(ctx: &Context, ids: &[String]) -> anyhow::Result<ExitCode> {
    let vms = ctx.vms(ids).await?;
    Ok(report_results(&ctx.controller().check(vms).await?))
}

/// Quick runner: one ad hoc stage, no backend interaction.
pub async fn run(ctx: &Context, ids: &[String], kind: StageKind) -> anyhow::Result<ExitCode> {
    let vms = ctx.vms(ids).await?;
    let stages = [Stage::new(0, kind)];
    Ok(report_results(&ctx.controller().run_stages(vms, &stages).await?))
}
