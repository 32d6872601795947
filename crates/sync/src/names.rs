//! Name translation across the virtual/physical boundary.

use vsync_core::{NameCache, NameResolutionError, NameResolver};

/// Longest name the physical side accepts.
pub const MAX_NAME_LEN: usize = 63;
const HASHED_PREFIX_LEN: usize = 52;

/// Physical name of a namespaced virtual object: `<name>-x-<namespace>-x-<suffix>`.
pub fn physical_name(name: &str, namespace: &str, suffix: &str) -> String {
    safe_concat_name(&[name, "x", namespace, "x", suffix])
}

/// Join `parts` with `-`. Results longer than [`MAX_NAME_LEN`] bytes keep at
/// most 52 bytes of prefix, cut on a char boundary, followed by 10 hex digits
/// of a hash over the full name.
pub fn safe_concat_name(parts: &[&str]) -> String {
    let full = parts.join("-");
    if full.len() <= MAX_NAME_LEN {
        return full;
    }
    let cut = (0..=HASHED_PREFIX_LEN).rev().find(|&i| full.is_char_boundary(i)).unwrap_or(0);
    let digest = format!("{:016x}", fnv1a64(full.as_bytes()));
    format!("{}-{}", &full[..cut], &digest[..10]).replace(".-", "-")
}

fn fnv1a64(bytes: &[u8]) -> u64 {
    let mut h: u64 = 0xcbf29ce484222325; // 64-bit FNV-1a offset
    for b in bytes {
        h ^= *b as u64;
        h = h.wrapping_mul(0x100000001b3);
    }
    h
}

/// virtual→physical: pure function of the name and the owning namespace.
#[derive(Debug, Clone)]
pub struct VirtualToPhysical {
    namespace: String,
    suffix: String,
}

impl VirtualToPhysical {
    pub fn new(namespace: impl Into<String>, suffix: impl Into<String>) -> Self {
        Self { namespace: namespace.into(), suffix: suffix.into() }
    }
}

impl NameResolver for VirtualToPhysical {
    fn translate_name(&self, name: &str, _path: &str) -> Result<String, NameResolutionError> {
        Ok(physical_name(name, &self.namespace, &self.suffix))
    }
}

/// physical→virtual: looks the name up in the shared cache.
pub struct PhysicalToVirtual<'a> {
    cache: &'a dyn NameCache,
}

impl<'a> PhysicalToVirtual<'a> {
    pub fn new(cache: &'a dyn NameCache) -> Self { Self { cache } }
}

impl NameResolver for PhysicalToVirtual<'_> {
    fn translate_name(&self, name: &str, path: &str) -> Result<String, NameResolutionError> {
        self.cache
            .resolve(name, path)
            .ok_or_else(|| NameResolutionError { name: name.to_string(), path: path.to_string() })
    }
}
