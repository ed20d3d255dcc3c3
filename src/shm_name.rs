// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Names for the named resources a table creates: POSIX shm objects and
// FIFO paths. Every table gets a fresh name so that concurrent tables
// (tests, several kitchens in one process) never collide.

use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};

/// FNV-1a 64-bit hash.
pub fn fnv1a_64(data: &[u8]) -> u64 {
    let mut hash: u64 = 0xcbf29ce484222325;
    for &b in data {
        hash ^= b as u64;
        hash = hash.wrapping_mul(0x100000001b3);
    }
    hash
}

/// Convert a 64-bit value to a fixed-width 16-char lowercase hex string.
fn to_hex(val: u64) -> [u8; 16] {
    const DIGITS: &[u8; 16] = b"0123456789abcdef";
    let mut buf = [0u8; 16];
    let mut v = val;
    for i in (0..16).rev() {
        buf[i] = DIGITS[(v & 0xf) as usize];
        v >>= 4;
    }
    buf
}

/// Maximum length for POSIX shm names. Set to 0 to disable truncation.
///
/// On macOS `PSHMNAMLEN` is 31. On Linux the limit is typically 255.
#[cfg(target_os = "macos")]
pub const SHM_NAME_MAX: usize = 31;

#[cfg(not(target_os = "macos"))]
pub const SHM_NAME_MAX: usize = 0; // 0 = no truncation

/// Produce a POSIX shm-safe name (with leading '/').
///
/// When `SHM_NAME_MAX > 0`, names whose POSIX form would exceed that limit
/// are shortened to `/<prefix>_<16-hex-FNV-1a-hash>`.
pub fn make_shm_name(name: &str) -> String {
    let result = if name.starts_with('/') {
        name.to_string()
    } else {
        format!("/{name}")
    };

    if SHM_NAME_MAX == 0 || result.len() <= SHM_NAME_MAX {
        return result;
    }

    // 1 (underscore) + 16 (hex hash)
    const HASH_SUFFIX_LEN: usize = 1 + 16;
    let prefix_len = SHM_NAME_MAX.saturating_sub(HASH_SUFFIX_LEN + 1);

    let hex = to_hex(fnv1a_64(result.as_bytes()));

    let mut shortened = String::with_capacity(SHM_NAME_MAX);
    shortened.push('/');
    let body = &result[1..];
    shortened.push_str(&body[..prefix_len.min(body.len())]);
    shortened.push('_');
    shortened.extend(hex.iter().map(|&b| b as char));
    shortened
}

/// A process-unique resource name: `<prefix>_<pid>_<n>`.
pub fn unique_name(prefix: &str) -> String {
    static COUNTER: AtomicUsize = AtomicUsize::new(0);
    let n = COUNTER.fetch_add(1, Ordering::Relaxed);
    format!("{prefix}_{}_{n}", std::process::id())
}

/// Fresh FIFO path under the system temp directory.
pub fn fifo_path(prefix: &str) -> PathBuf {
    std::env::temp_dir().join(format!("{}.fifo", unique_name(prefix)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fnv1a_known_value() {
        assert_eq!(fnv1a_64(b""), 0xcbf29ce484222325);
    }

    #[test]
    fn make_shm_name_prepends_slash() {
        let name = make_shm_name("foo");
        assert!(name.starts_with('/'));
        assert!(name.contains("foo"));
    }

    #[test]
    fn make_shm_name_keeps_existing_slash() {
        let name = make_shm_name("/bar");
        assert_eq!(&name[..4], "/bar");
    }

    #[test]
    fn to_hex_roundtrip() {
        let hex = to_hex(0x0123456789abcdef);
        assert_eq!(&hex, b"0123456789abcdef");
    }

    #[test]
    fn unique_names_differ() {
        let a = unique_name("table");
        let b = unique_name("table");
        assert_ne!(a, b);
        assert!(a.starts_with("table_"));
    }

    #[test]
    fn fifo_paths_live_in_temp_dir() {
        let p = fifo_path("dish_washing");
        assert!(p.starts_with(std::env::temp_dir()));
        assert_eq!(p.extension().and_then(|e| e.to_str()), Some("fifo"));
    }
}
