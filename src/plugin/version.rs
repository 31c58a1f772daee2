//! Plugin version comparison
//!
//! Plugin versions are dot-separated numbers of arbitrary length ("1.2",
//! "1.10.0", "2.0.0.3"), so they are compared component-wise rather than as
//! semver.

use std::cmp::Ordering;
use std::collections::HashMap;

use super::types::{PluginId, PluginManifestEntry};

/// Compare two dot-separated numeric versions.
///
/// Missing trailing components and non-numeric components count as zero.
pub fn compare_versions(a: &str, b: &str) -> Ordering {
    let left: Vec<u64> = components(a);
    let right: Vec<u64> = components(b);
    let len = left.len().max(right.len());

    for i in 0..len {
        let x = left.get(i).copied().unwrap_or(0);
        let y = right.get(i).copied().unwrap_or(0);
        match x.cmp(&y) {
            Ordering::Equal => continue,
            other => return other,
        }
    }
    Ordering::Equal
}

/// True when `candidate` is strictly newer than `installed`
pub fn is_newer(candidate: &str, installed: &str) -> bool {
    compare_versions(candidate, installed) == Ordering::Greater
}

fn components(version: &str) -> Vec<u64> {
    version
        .trim()
        .split('.')
        .map(|part| part.trim().parse::<u64>().unwrap_or(0))
        .collect()
}

/// Manifest entries that are newer than the installed version of the same id
pub fn find_updates(
    installed: &HashMap<PluginId, String>,
    available: &[PluginManifestEntry],
) -> Vec<PluginManifestEntry> {
    available
        .iter()
        .filter(|entry| {
            installed
                .get(&entry.id)
                .map(|version| is_newer(&entry.version, version))
                .unwrap_or(false)
        })
        .cloned()
        .collect()
}
