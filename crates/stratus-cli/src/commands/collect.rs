use std::process::ExitCode;

use stratus_reconcile::CampaignReport;

use super::Context;

pub async fn garbage_collect(ctx: &Context, json: bool) -> anyhow::Result<ExitCode> {
    let report = ctx.engine().run().await?;
    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print_report(&report);
    }
    Ok(ExitCode::SUCCESS)
}

pub async fn reap(ctx: &Context) -> anyhow::Result<ExitCode> {
    let report = ctx.engine().reap().await?;
    print_report(&report);
    Ok(ExitCode::SUCCESS)
}

pub async fn hunt(ctx: &Context, age_days: u64, size: usize) -> anyhow::Result<ExitCode> {
    let drained = ctx.engine().hunt(age_days, size).await?;
    print_drained(&drained);
    Ok(ExitCode::SUCCESS)
}

/// Drain the agents bound to the selected VMs. Refuses to run without `--ids`.
pub async fn drain(ctx: &Context, ids: &[String]) -> anyhow::Result<ExitCode> {
    if ids.is_empty() {
        anyhow::bail!("drain needs --ids to select the VMs to drain");
    }
    let engine = ctx.engine();
    let mut drained = Vec::new();
    for vm in ctx.vms(ids).await? {
        drained.extend(engine.drain_vm(&vm).await?);
    }
    print_drained(&drained);
    Ok(ExitCode::SUCCESS)
}

fn print_drained(drained: &[String]) {
    for agent in drained {
        println!("DRAINED {agent}");
    }
    println!("{} agents drained", drained.len());
}

fn print_report(report: &CampaignReport) {
    for vm in &report.deleted {
        println!("DELETED {vm}");
    }
    for (vm, reason) in &report.skipped {
        println!("KEPT {vm}: {reason}");
    }
    for agent in &report.agents_removed {
        println!("REMOVED agent {agent}");
    }
    for diagnostic in &report.diagnostics {
        println!("WARNING {diagnostic}");
    }
    println!(
        "{} deleted, {} kept, {} candidates",
        report.deleted.len(),
        report.skipped.len(),
        report.candidates.len()
    );
}
