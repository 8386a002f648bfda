use std::fmt;
use std::ops::{Index, IndexMut};

use indexmap::IndexMap;
use url::Url;

use kext_version::Version;

use crate::personality::Personality;
use crate::repository::RepositoryId;
use crate::BundleIdentifier;

/// A handle to a [`Kext`] in a [`KextArena`].
///
/// Handles are plain indices; they are never reused, and stay valid for
/// the lifetime of the arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct KextId(u32);

impl fmt::Display for KextId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "kext#{}", self.0)
    }
}

/// One declared library requirement: the identifier of a bundle this kext
/// links against, and the oldest version it can use (matched against the
/// candidates' compatible-version range).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LibraryRequirement {
    pub identifier: BundleIdentifier,
    pub version: Version,
}

/// A kernel extension bundle.
///
/// The immutable attributes come from the bundle's metadata (parsed by an
/// external scanner); the mutable state is what the manager tracks while
/// deciding whether and how to load the bundle. The `prior` and
/// `duplicate` links are maintained exclusively by the manager's candidate
/// index: `prior` points down a strictly-decreasing version spine,
/// `duplicate` along a list of same-version bundles from other
/// repositories.
#[derive(Debug, Clone)]
pub struct Kext {
    pub identifier: BundleIdentifier,
    pub version: Version,
    /// The oldest version this bundle remains link-compatible with. A kext
    /// without one cannot satisfy any library requirement.
    pub compatible_version: Option<Version>,
    /// The bundle directory's absolute URL.
    pub url: Url,
    pub repository: RepositoryId,
    pub has_executable: bool,
    pub personalities: IndexMap<String, Personality>,
    pub libraries: Vec<LibraryRequirement>,

    /// Whether the bundle passed its validity checks at intake.
    pub valid: bool,
    pub enabled: bool,
    pub safe_boot_eligible: bool,
    /// Sticky quarantine: set when a load attempt fails, cleared only by
    /// an explicit caller request.
    pub load_failed: bool,
    /// `None` until an authentication check ran.
    pub authentic: Option<bool>,

    /// This exact version is in the running kernel.
    pub loaded: bool,
    /// Some other version of this identifier is in the running kernel.
    pub other_version_loaded: bool,
    pub load_address: Option<u64>,

    /// Resolved library dependencies; `None` until resolution ran.
    pub dependencies: Option<Vec<KextId>>,

    pub prior: Option<KextId>,
    pub duplicate: Option<KextId>,
}

impl Kext {
    pub fn new(
        identifier: BundleIdentifier,
        version: Version,
        url: Url,
        repository: RepositoryId,
    ) -> Self {
        Self {
            identifier,
            version,
            compatible_version: None,
            url,
            repository,
            has_executable: true,
            personalities: IndexMap::new(),
            libraries: Vec::new(),
            valid: true,
            enabled: true,
            safe_boot_eligible: false,
            load_failed: false,
            authentic: None,
            loaded: false,
            other_version_loaded: false,
            load_address: None,
            dependencies: None,
            prior: None,
            duplicate: None,
        }
    }

    /// Whether every declared library resolved to a candidate.
    pub fn has_all_dependencies(&self) -> bool {
        self.dependencies
            .as_ref()
            .is_some_and(|deps| deps.len() == self.libraries.len())
    }

    /// Whether this kext can satisfy a library requirement for `version`:
    /// it must declare a compatible range, and the requested version must
    /// fall inside it.
    pub fn is_compatible_with(&self, version: &Version) -> bool {
        self.compatible_version
            .as_ref()
            .is_some_and(|compatible| compatible <= version && *version <= self.version)
    }

    /// Drop any resolved dependencies, forcing the next resolution to run
    /// from scratch.
    pub fn clear_dependencies(&mut self) {
        self.dependencies = None;
    }

    /// Drop loaded-state markers gathered from the kernel.
    pub fn clear_loaded_state(&mut self) {
        self.loaded = false;
        self.other_version_loaded = false;
        self.load_address = None;
    }
}

/// The arena all kexts live in.
///
/// Repositories and the candidate index hold [`KextId`] handles into this
/// arena; the arena itself is owned by the manager and torn down with it.
#[derive(Debug, Default)]
pub struct KextArena {
    entries: Vec<Kext>,
}

impl KextArena {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn alloc(&mut self, kext: Kext) -> KextId {
        let id = KextId(u32::try_from(self.entries.len()).expect("arena overflow"));
        self.entries.push(kext);
        id
    }

    pub fn get(&self, id: KextId) -> &Kext {
        &self.entries[id.0 as usize]
    }

    pub fn get_mut(&mut self, id: KextId) -> &mut Kext {
        &mut self.entries[id.0 as usize]
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// All handles in allocation order.
    pub fn ids(&self) -> impl Iterator<Item = KextId> + use<> {
        (0..self.entries.len()).map(|index| KextId(index as u32))
    }

    pub fn iter(&self) -> impl Iterator<Item = (KextId, &Kext)> {
        self.entries
            .iter()
            .enumerate()
            .map(|(index, kext)| (KextId(index as u32), kext))
    }
}

impl Index<KextId> for KextArena {
    type Output = Kext;

    fn index(&self, id: KextId) -> &Kext {
        self.get(id)
    }
}

impl IndexMut<KextId> for KextArena {
    fn index_mut(&mut self, id: KextId) -> &mut Kext {
        self.get_mut(id)
    }
}
