use std::fmt;
use std::str::FromStr;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use url::Url;

use kext_version::Version;

use crate::kext::{Kext, KextArena, KextId, LibraryRequirement};
use crate::personality::Personality;
use crate::BundleIdentifier;

/// A handle to a repository held by the manager, in insertion order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RepositoryId(u32);

impl RepositoryId {
    pub fn new(index: u32) -> Self {
        Self(index)
    }

    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for RepositoryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "repository#{}", self.0)
    }
}

/// What a repository scan (or a repository cache) describes: the directory
/// URL plus one entry per kext found at its top level.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RepositoryManifest {
    pub url: Url,
    #[serde(default)]
    pub kexts: Vec<KextManifest>,
}

/// One kext bundle as described by a scan or cache.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KextManifest {
    pub identifier: BundleIdentifier,
    pub version: Version,
    #[serde(default)]
    pub compatible_version: Option<Version>,
    /// The bundle directory, relative to the repository URL.
    pub path: String,
    #[serde(default = "default_true")]
    pub valid: bool,
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub safe_boot_eligible: bool,
    #[serde(default = "default_true")]
    pub has_executable: bool,
    #[serde(default)]
    pub personalities: IndexMap<String, Personality>,
    #[serde(default)]
    pub libraries: Vec<LibraryManifest>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LibraryManifest {
    pub identifier: BundleIdentifier,
    pub version: Version,
}

fn default_true() -> bool {
    true
}

/// A directory that contains kext bundles at its top level.
///
/// The repository owns its kexts' handles exclusively: the manager's index
/// only ever borrows them. `candidates` are kexts eligible for indexing;
/// `bad` holds disqualified ones, kept around for diagnostics.
#[derive(Debug)]
pub struct Repository {
    url: Url,
    candidates: Vec<KextId>,
    bad: Vec<KextId>,
}

impl Repository {
    pub fn new(url: Url) -> Self {
        Self {
            url,
            candidates: Vec::new(),
            bad: Vec::new(),
        }
    }

    /// Materialize a manifest: allocate every described kext into the
    /// arena and record its handle as a candidate, in manifest order.
    ///
    /// Entries whose path cannot be anchored under the repository URL are
    /// unusable and excluded, not fatal.
    pub fn from_manifest(
        manifest: &RepositoryManifest,
        id: RepositoryId,
        arena: &mut KextArena,
    ) -> Self {
        let mut repository = Self::new(manifest.url.clone());
        for entry in &manifest.kexts {
            let Ok(url) = manifest.url.join(&entry.path) else {
                warn!(
                    kext = %entry.identifier,
                    path = %entry.path,
                    "excluding kext with unusable bundle path"
                );
                continue;
            };
            if !url.as_str().starts_with(manifest.url.as_str()) {
                warn!(
                    kext = %entry.identifier,
                    %url,
                    repository = %manifest.url,
                    "excluding kext outside its repository"
                );
                continue;
            }
            let mut kext = Kext::new(entry.identifier.clone(), entry.version, url, id);
            kext.compatible_version = entry.compatible_version;
            kext.valid = entry.valid;
            kext.enabled = entry.enabled;
            kext.safe_boot_eligible = entry.safe_boot_eligible;
            kext.has_executable = entry.has_executable;
            kext.personalities = entry.personalities.clone();
            kext.libraries = entry
                .libraries
                .iter()
                .map(|library| LibraryRequirement {
                    identifier: library.identifier.clone(),
                    version: library.version,
                })
                .collect();
            let handle = arena.alloc(kext);
            repository.candidates.push(handle);
        }
        debug!(
            url = %repository.url,
            kexts = repository.candidates.len(),
            "materialized repository"
        );
        repository
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    /// Candidate kexts in discovery order.
    pub fn candidates(&self) -> &[KextId] {
        &self.candidates
    }

    /// Disqualified kexts in disqualification order.
    pub fn bad_kexts(&self) -> &[KextId] {
        &self.bad
    }

    pub fn contains(&self, id: KextId) -> bool {
        self.candidates.contains(&id) || self.bad.contains(&id)
    }

    /// Add a kext's handle as a candidate. Re-adding a handle already
    /// present is a no-op.
    pub fn add_kext(&mut self, id: KextId) {
        if !self.contains(id) {
            self.candidates.push(id);
        }
    }

    /// Drop a kext from this repository entirely.
    pub fn remove_kext(&mut self, id: KextId) {
        self.candidates.retain(|kext| *kext != id);
        self.bad.retain(|kext| *kext != id);
    }

    /// Move a kext out of candidacy into the bad list.
    pub fn disqualify(&mut self, id: KextId) {
        if let Some(position) = self.candidates.iter().position(|kext| *kext == id) {
            self.candidates.remove(position);
            self.bad.push(id);
        }
    }

    /// Clear per-kext dependency state for every kext this repository
    /// owns, candidates and bad alike.
    pub fn clear_dependency_state(&self, arena: &mut KextArena) {
        for id in self.candidates.iter().chain(&self.bad) {
            arena[*id].clear_dependencies();
        }
    }
}

/// Parse a manifest from its JSON dictionary form.
impl FromStr for RepositoryManifest {
    type Err = serde_json::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        serde_json::from_str(s)
    }
}

#[cfg(test)]
mod tests {
    use std::str::FromStr;

    use super::*;

    fn manifest(json: &str) -> RepositoryManifest {
        RepositoryManifest::from_str(json).unwrap()
    }

    #[test]
    fn materializes_kexts_in_manifest_order() {
        let manifest = manifest(
            r#"{
                "url": "file:///Library/Extensions/",
                "kexts": [
                    {"identifier": "com.example.a", "version": "2.0", "path": "A.kext/"},
                    {"identifier": "com.example.b", "version": "1.0", "path": "B.kext/"}
                ]
            }"#,
        );
        let mut arena = KextArena::new();
        let repository = Repository::from_manifest(&manifest, RepositoryId::new(0), &mut arena);
        assert_eq!(repository.candidates().len(), 2);
        let first = &arena[repository.candidates()[0]];
        assert_eq!(first.identifier.as_str(), "com.example.a");
        assert_eq!(
            first.url.as_str(),
            "file:///Library/Extensions/A.kext/"
        );
        assert!(first.valid && first.enabled && first.has_executable);
        assert!(!first.safe_boot_eligible);
    }

    #[test]
    fn excludes_kexts_escaping_the_repository() {
        let manifest = manifest(
            r#"{
                "url": "file:///Library/Extensions/",
                "kexts": [
                    {"identifier": "com.example.gone", "version": "1.0", "path": "../Elsewhere/A.kext/"},
                    {"identifier": "com.example.kept", "version": "1.0", "path": "B.kext/"}
                ]
            }"#,
        );
        let mut arena = KextArena::new();
        let repository = Repository::from_manifest(&manifest, RepositoryId::new(0), &mut arena);
        assert_eq!(repository.candidates().len(), 1);
        assert_eq!(
            arena[repository.candidates()[0]].identifier.as_str(),
            "com.example.kept"
        );
    }

    #[test]
    fn disqualify_moves_a_candidate_to_the_bad_list() {
        let mut repository = Repository::new(Url::parse("file:///tmp/repo/").unwrap());
        let mut arena = KextArena::new();
        let id = arena.alloc(Kext::new(
            BundleIdentifier::from_str("com.example.a").unwrap(),
            Version::from_str("1.0").unwrap(),
            Url::parse("file:///tmp/repo/A.kext/").unwrap(),
            RepositoryId::new(0),
        ));
        repository.add_kext(id);
        repository.disqualify(id);
        assert!(repository.candidates().is_empty());
        assert_eq!(repository.bad_kexts(), [id]);
        // Already-bad kexts stay put.
        repository.disqualify(id);
        assert_eq!(repository.bad_kexts(), [id]);
    }
}
