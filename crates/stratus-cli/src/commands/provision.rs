use std::process::ExitCode;

use tracing::info;

use super::{Context, print_results};

/// `provision` and `replenish`: close the pool delta with partitioned workers.
pub async fn fill(ctx: &Context, partition: Option<u32>, register: bool) -> anyhow::Result<ExitCode> {
    let controller = ctx.controller();
    let outcome = controller.fill(partition, register).await?;

    if outcome.batches.is_empty() && register {
        let drained = controller.retire_surplus(&ctx.engine()).await?;
        if !drained.is_empty() {
            info!(drained = drained.len(), "surplus agents drained");
        }
    }

    for results in outcome.results() {
        print_results(results);
    }
    for worker in &outcome.crashed {
        println!("FAILED worker {worker} crashed");
    }
    println!(
        "{} succeeded, {} failed of {} requested",
        outcome.succeeded(),
        outcome.failed(),
        outcome.requested()
    );
    Ok(if outcome.is_success() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}
