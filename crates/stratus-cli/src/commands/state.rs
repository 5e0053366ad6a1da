use std::process::ExitCode;

use stratus_core::VmRecord;

use super::Context;

pub async fn dump(ctx: &Context, ids: &[String]) -> anyhow::Result<ExitCode> {
    for vm in ctx.vms(ids).await? {
        println!("{}", state_line(&vm));
    }
    Ok(ExitCode::SUCCESS)
}

fn state_line(vm: &VmRecord) -> String {
    format!(
        "{} - {} - {} - {} - {}",
        vm.id,
        vm.ip.as_deref().unwrap_or(""),
        vm.name,
        vm.hostname.as_deref().unwrap_or(""),
        vm.pool_tag.as_deref().unwrap_or("")
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use stratus_core::VmState;

    #[test]
    fn state_line_layout() {
        let vm = VmRecord {
            id: "812".into(),
            name: "linux-3fa2".into(),
            ip: Some("10.1.4.17".into()),
            start_time: 0,
            pool_tag: Some("linux".into()),
            state: VmState::Running,
            hostname: Some("build-17".into()),
        };
        assert_eq!(state_line(&vm), "812 - 10.1.4.17 - linux-3fa2 - build-17 - linux");
    }
}
