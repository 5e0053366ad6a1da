//! Bulk deletion. Both commands ask before deleting unless forced.

use std::io::{self, BufRead, Write};
use std::process::ExitCode;

use tracing::warn;

use stratus_core::{VmRecord, VmState};

use super::Context;

pub async fn kill_all(ctx: &Context, ids: &[String], force: bool) -> anyhow::Result<ExitCode> {
    let vms = ctx.vms(ids).await?;
    if !force && !confirm(&vms, io::stdin().lock(), io::stdout())? {
        println!("Aborting!");
        return Ok(ExitCode::FAILURE);
    }
    let code = delete_all(ctx, &vms).await;
    let engine = ctx.engine();
    for vm in &vms {
        match engine.forget_vm(vm).await {
            Ok(removed) => {
                for agent in removed {
                    println!("REMOVED agent {agent}");
                }
            }
            Err(e) => warn!(vm = %vm.label(), error = %e, "could not remove agent definitions"),
        }
    }
    Ok(code)
}

pub async fn kill_not_running(ctx: &Context, ids: &[String], force: bool) -> anyhow::Result<ExitCode> {
    let vms: Vec<VmRecord> = ctx
        .vms(ids)
        .await?
        .into_iter()
        .filter(|vm| vm.state != VmState::Running)
        .collect();
    if !force && !confirm(&vms, io::stdin().lock(), io::stdout())? {
        println!("Aborting!");
        return Ok(ExitCode::FAILURE);
    }
    Ok(delete_all(ctx, &vms).await)
}

async fn delete_all(ctx: &Context, vms: &[VmRecord]) -> ExitCode {
    let mut code = ExitCode::SUCCESS;
    for vm in vms {
        println!("Killing VM: {}.", vm.id);
        if let Err(e) = ctx.inventory.delete_vm(&vm.id).await {
            println!("FAILED {} ({}): {e}", vm.label(), vm.id);
            code = ExitCode::FAILURE;
        }
    }
    code
}

/// List what is about to be deleted and read a y/n answer.
fn confirm(vms: &[VmRecord], mut input: impl BufRead, mut output: impl Write) -> io::Result<bool> {
    let ids: Vec<&str> = vms.iter().map(|vm| vm.id.as_str()).collect();
    writeln!(output, "You are about to kill {} VMs:", ids.len())?;
    writeln!(output, "{}", ids.join(", "))?;
    write!(output, "Are you sure you want to proceed? (y/n): ")?;
    output.flush()?;
    let mut answer = String::new();
    input.read_line(&mut answer)?;
    let answer = answer.trim().to_ascii_lowercase();
    Ok(answer == "y" || answer == "yes")
}
