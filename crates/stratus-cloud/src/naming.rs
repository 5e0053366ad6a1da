//! VM naming and pool membership.

use sha2::{Digest, Sha256};

use stratus_core::VmRecord;

/// Host names must stay well below 63 characters once the cloud's domain
/// suffix is appended.
pub const MAX_VM_NAME_LEN: usize = 38;

/// `[{prefix}-]{pool}-{hash}`, truncated to [`MAX_VM_NAME_LEN`].
pub fn vm_name(prefix: Option<&str>, pool: &str, seed: &str) -> String {
    let stem = match prefix {
        Some(p) if !p.is_empty() => format!("{p}-{pool}"),
        _ => pool.to_string(),
    };
    let digest = hex::encode(Sha256::digest(seed.as_bytes()));
    let mut name = format!("{stem}-{digest}");
    name.truncate(MAX_VM_NAME_LEN);
    name
}

/// A VM belongs to `pool` when its name contains the pool name and its
/// `POOL` tag, if any, is exactly the pool name.
pub fn belongs_to_pool(vm: &VmRecord, pool: &str) -> bool {
    vm.name.contains(pool) && vm.pool_tag.as_deref().is_none_or(|tag| tag == pool)
}
