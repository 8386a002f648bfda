use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tracing::warn;

use kext_version::Version;

/// One raw record of the kernel's module enumeration, as the syscall
/// reports it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawLoadedRecord {
    pub name: String,
    pub version: String,
    pub address: u64,
    /// Whether another record follows. The kernel may under-report its
    /// module count; a cleared `next` is the authoritative terminator.
    pub next: bool,
}

/// A loaded kernel module with its version parsed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadedKext {
    pub name: String,
    pub version: Version,
    pub address: u64,
}

/// Collect raw enumeration records into parsed [`LoadedKext`]s.
///
/// Iteration stops after the first record with a cleared `next` flag,
/// even when further records were handed over. Records whose version
/// string does not parse are skipped with a warning; the kernel reports
/// versions for non-kext modules too.
pub fn collect_loaded(records: impl IntoIterator<Item = RawLoadedRecord>) -> Vec<LoadedKext> {
    let mut loaded = Vec::new();
    for record in records {
        let last = !record.next;
        match Version::from_str(&record.version) {
            Ok(version) => loaded.push(LoadedKext {
                name: record.name,
                version,
                address: record.address,
            }),
            Err(err) => {
                warn!(name = %record.name, version = %record.version, %err,
                    "skipping loaded module with unparseable version");
            }
        }
        if last {
            break;
        }
    }
    loaded
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(name: &str, version: &str, next: bool) -> RawLoadedRecord {
        RawLoadedRecord {
            name: name.to_string(),
            version: version.to_string(),
            address: 0xffff_ff80_1000_0000,
            next,
        }
    }

    #[test]
    fn stops_at_the_next_sentinel() {
        let records = vec![
            record("com.example.a", "1.0", true),
            record("com.example.b", "2.0", false),
            // Junk past the terminator must not be read.
            record("com.example.c", "3.0", true),
        ];
        let loaded = collect_loaded(records);
        assert_eq!(loaded.len(), 2);
        assert_eq!(loaded[1].name, "com.example.b");
    }

    #[test]
    fn skips_unparseable_versions() {
        let records = vec![
            record("com.example.weird", "not-a-version", true),
            record("com.example.a", "1.0", false),
        ];
        let loaded = collect_loaded(records);
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].name, "com.example.a");
    }
}
