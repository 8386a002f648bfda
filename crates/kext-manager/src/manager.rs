use std::path::Path;

use tracing::{debug, warn};
use url::Url;

use kext_kernel::{collect_loaded, CatalogRequest, KernelProxy, MemoryKernel};
use kext_types::{
    cache, Kext, KextArena, KextId, Personality, Repository, RepositoryId, RepositoryManifest,
};
use kext_version::Version;

use crate::admission::admission_check;
use crate::authenticate::{AlwaysAuthentic, Authenticator};
use crate::error::KextManagerError;
use crate::index::CandidateIndex;
use crate::interaction::{SilentInteraction, UserInteraction};
use crate::resolver;

/// Builds a [`KextManager`] with its policy flags and capabilities.
pub struct KextManagerBuilder {
    safe_boot: bool,
    full_tests: bool,
    strict_authentication: bool,
    load_in_process: bool,
    authenticator: Box<dyn Authenticator>,
    kernel: Box<dyn KernelProxy>,
    interaction: Box<dyn UserInteraction>,
}

impl Default for KextManagerBuilder {
    fn default() -> Self {
        Self {
            safe_boot: false,
            full_tests: false,
            strict_authentication: false,
            load_in_process: false,
            authenticator: Box::new(AlwaysAuthentic),
            kernel: Box::new(MemoryKernel::new()),
            interaction: Box::new(SilentInteraction),
        }
    }
}

impl KextManagerBuilder {
    #[must_use]
    pub fn safe_boot(mut self, safe_boot: bool) -> Self {
        self.safe_boot = safe_boot;
        self
    }

    #[must_use]
    pub fn full_tests(mut self, full_tests: bool) -> Self {
        self.full_tests = full_tests;
        self
    }

    #[must_use]
    pub fn strict_authentication(mut self, strict: bool) -> Self {
        self.strict_authentication = strict;
        self
    }

    /// Run the link/load driver on the manager's own thread instead of a
    /// forked child.
    #[must_use]
    pub fn load_in_process(mut self, in_process: bool) -> Self {
        self.load_in_process = in_process;
        self
    }

    #[must_use]
    pub fn authenticator(mut self, authenticator: impl Authenticator + 'static) -> Self {
        self.authenticator = Box::new(authenticator);
        self
    }

    #[must_use]
    pub fn kernel(mut self, kernel: impl KernelProxy + 'static) -> Self {
        self.kernel = Box::new(kernel);
        self
    }

    #[must_use]
    pub fn interaction(mut self, interaction: impl UserInteraction + 'static) -> Self {
        self.interaction = Box::new(interaction);
        self
    }

    pub fn build(self) -> KextManager {
        KextManager {
            arena: KextArena::new(),
            repositories: Vec::new(),
            index: CandidateIndex::new(),
            missing_deps: Vec::new(),
            disable_count: 0,
            needs_clear: false,
            needs_recalc: false,
            safe_boot: self.safe_boot,
            full_tests: self.full_tests,
            strict_authentication: self.strict_authentication,
            load_in_process: self.load_in_process,
            authenticator: self.authenticator,
            kernel: self.kernel,
            interaction: self.interaction,
        }
    }
}

/// The kext manager: repositories, the candidate index over them, and the
/// policies deciding what may load.
///
/// All state is process-local and owned here; kexts live in the arena and
/// are shared by handle with the repositories that own them. The manager
/// is single-threaded: callers wanting to drive it from several threads
/// must serialize outside.
pub struct KextManager {
    pub(crate) arena: KextArena,
    /// Slots keep [`RepositoryId`]s stable across removals.
    pub(crate) repositories: Vec<Option<Repository>>,
    pub(crate) index: CandidateIndex,
    pub(crate) missing_deps: Vec<KextId>,
    disable_count: u32,
    needs_clear: bool,
    needs_recalc: bool,
    pub(crate) safe_boot: bool,
    pub(crate) full_tests: bool,
    pub(crate) strict_authentication: bool,
    pub(crate) load_in_process: bool,
    pub(crate) authenticator: Box<dyn Authenticator>,
    pub(crate) kernel: Box<dyn KernelProxy>,
    pub(crate) interaction: Box<dyn UserInteraction>,
}

impl Default for KextManager {
    fn default() -> Self {
        Self::new()
    }
}

fn canonical(url: &Url) -> &str {
    url.as_str().trim_end_matches('/')
}

impl KextManager {
    pub fn new() -> Self {
        Self::builder().build()
    }

    pub fn builder() -> KextManagerBuilder {
        KextManagerBuilder::default()
    }

    pub fn safe_boot(&self) -> bool {
        self.safe_boot
    }

    /// Switching safe boot changes the admission policy, so the index is
    /// invalidated.
    pub fn set_safe_boot(&mut self, safe_boot: bool) {
        if self.safe_boot != safe_boot {
            self.safe_boot = safe_boot;
            self.clear_relationships();
        }
    }

    pub fn set_full_tests(&mut self, full_tests: bool) {
        self.full_tests = full_tests;
    }

    pub fn set_strict_authentication(&mut self, strict: bool) {
        self.strict_authentication = strict;
    }

    pub fn set_load_in_process(&mut self, in_process: bool) {
        self.load_in_process = in_process;
    }

    pub fn kext(&self, id: KextId) -> &Kext {
        &self.arena[id]
    }

    /// Kexts the resolver pruned for unresolved dependencies, in prune
    /// order. Diagnostic.
    pub fn missing_dependencies(&self) -> &[KextId] {
        &self.missing_deps
    }

    // ---------------------------------------------------------------
    // Repositories
    // ---------------------------------------------------------------

    /// Add a repository from its manifest. Adding a URL that is already
    /// present is a no-op returning the existing repository.
    pub fn add_repository(&mut self, manifest: &RepositoryManifest) -> RepositoryId {
        if let Some(existing) = self.find_repository(&manifest.url) {
            debug!(url = %manifest.url, "repository already present");
            return existing;
        }
        let id = RepositoryId::new(self.repositories.len() as u32);
        let repository = Repository::from_manifest(manifest, id, &mut self.arena);
        self.repositories.push(Some(repository));
        self.clear_relationships();
        id
    }

    /// Add a repository from its on-disk cache, which must be current.
    pub fn add_repository_from_cache(
        &mut self,
        directory: &Path,
    ) -> Result<RepositoryId, KextManagerError> {
        let manifest = cache::load(directory)?;
        Ok(self.add_repository(&manifest))
    }

    /// Remove the repository at `url`, if present.
    pub fn remove_repository(&mut self, url: &Url) -> bool {
        let Some(id) = self.find_repository(url) else {
            return false;
        };
        self.repositories[id.index()] = None;
        self.clear_relationships();
        true
    }

    pub fn find_repository(&self, url: &Url) -> Option<RepositoryId> {
        self.repositories
            .iter()
            .enumerate()
            .find_map(|(index, slot)| {
                slot.as_ref()
                    .filter(|repository| canonical(repository.url()) == canonical(url))
                    .map(|_| RepositoryId::new(index as u32))
            })
    }

    pub fn repository(&self, id: RepositoryId) -> Option<&Repository> {
        self.repositories.get(id.index()).and_then(Option::as_ref)
    }

    /// Repositories in insertion order.
    pub fn repositories(&self) -> impl Iterator<Item = &Repository> {
        self.repositories.iter().flatten()
    }

    /// Move a kext out of its repository's candidacy and invalidate.
    pub fn disqualify_kext(&mut self, id: KextId) {
        warn!(kext = %self.arena[id].identifier, "disqualifying kext");
        let repository = self.arena[id].repository;
        if let Some(repository) = self
            .repositories
            .get_mut(repository.index())
            .and_then(Option::as_mut)
        {
            repository.disqualify(id);
        }
        self.clear_relationships();
    }

    /// Drop a kext from its owning repository entirely and invalidate.
    pub fn remove_kext(&mut self, id: KextId) {
        let repository = self.arena[id].repository;
        if let Some(repository) = self
            .repositories
            .get_mut(repository.index())
            .and_then(Option::as_mut)
        {
            repository.remove_kext(id);
        }
        self.clear_relationships();
    }

    /// Lift a kext's load-failed quarantine and invalidate.
    pub fn clear_load_failure(&mut self, id: KextId) {
        self.arena[id].load_failed = false;
        self.clear_relationships();
    }

    pub(crate) fn record_load_failure(&mut self, id: KextId) {
        warn!(kext = %self.arena[id].identifier, "marking kext load-failed");
        self.arena[id].load_failed = true;
        self.clear_relationships();
    }

    // ---------------------------------------------------------------
    // Invalidation
    // ---------------------------------------------------------------

    /// Defer clears until the matching [`Self::enable_clears`]. Nests.
    pub fn disable_clears(&mut self) {
        self.disable_count += 1;
    }

    /// Undo one [`Self::disable_clears`]; a clear requested in between
    /// runs now.
    pub fn enable_clears(&mut self) {
        self.disable_count = self.disable_count.saturating_sub(1);
        if self.disable_count == 0 && self.needs_clear {
            self.clear_relationships();
        }
    }

    /// Throw away the candidate index and all per-kext resolution state.
    ///
    /// While clears are disabled this only records the request; the next
    /// enable or consistent read honors it.
    pub fn clear_relationships(&mut self) {
        if self.disable_count > 0 {
            self.needs_clear = true;
            self.needs_recalc = true;
            return;
        }
        debug!("clearing version relationships");
        self.index.clear();
        self.missing_deps.clear();
        for repository in self.repositories.iter().flatten() {
            repository.clear_dependency_state(&mut self.arena);
        }
        for id in self.arena.ids() {
            let kext = &mut self.arena[id];
            kext.prior = None;
            kext.duplicate = None;
        }
        self.needs_clear = false;
        self.needs_recalc = true;
    }

    /// Read-repair: honor a pending clear, then a pending rebuild. Every
    /// consistent read goes through here.
    pub(crate) fn ensure_relationships(&mut self) {
        if self.needs_clear {
            self.clear_relationships();
        }
        if self.needs_recalc {
            self.calculate_relationships();
        }
    }

    /// Rebuild the candidate index from every repository's candidates in
    /// insertion order, admitting as we go.
    fn calculate_relationships(&mut self) {
        debug!("calculating version relationships");
        self.index.clear();
        self.missing_deps.clear();
        for id in self.arena.ids() {
            let kext = &mut self.arena[id];
            kext.prior = None;
            kext.duplicate = None;
            kext.dependencies = None;
        }
        let candidates: Vec<KextId> = self
            .repositories
            .iter()
            .flatten()
            .flat_map(|repository| repository.candidates().iter().copied())
            .collect();
        for id in candidates {
            match admission_check(&self.arena[id], self.safe_boot) {
                Ok(()) => self.index.insert(&mut self.arena, id),
                Err(denial) => {
                    debug!(
                        kext = %self.arena[id].identifier,
                        version = %self.arena[id].version,
                        reason = denial.as_str(),
                        "kext not admitted"
                    );
                }
            }
        }
        self.needs_recalc = false;
    }

    // ---------------------------------------------------------------
    // Dependency resolution
    // ---------------------------------------------------------------

    /// Resolve every candidate's dependencies and prune the chains of the
    /// ones that came up short.
    pub fn resolve_all_dependencies(&mut self) {
        self.ensure_relationships();
        resolver::resolve_and_prune(&mut self.arena, &mut self.index, &mut self.missing_deps);
        if self.full_tests {
            // Diagnostic only: bad kexts never enter the index.
            let bad: Vec<KextId> = self
                .repositories
                .iter()
                .flatten()
                .flat_map(|repository| repository.bad_kexts().iter().copied())
                .collect();
            for id in bad {
                resolver::resolve_kext(&mut self.arena, &self.index, id);
            }
        }
    }

    // ---------------------------------------------------------------
    // Loaded state
    // ---------------------------------------------------------------

    /// Ask the kernel which modules are loaded and mark the chains
    /// accordingly: exact version matches become `loaded`, every other
    /// node of the same identifier `other_version_loaded`.
    pub fn update_loaded_state(&mut self) -> Result<(), KextManagerError> {
        self.ensure_relationships();
        let records = self.kernel.loaded_kexts()?;
        let loaded = collect_loaded(records);
        for id in self.arena.ids() {
            self.arena[id].clear_loaded_state();
        }
        for module in &loaded {
            let Some(head) = self.index.head(module.name.as_str()) else {
                continue;
            };
            for node in CandidateIndex::flatten(&self.arena, head) {
                let kext = &mut self.arena[node];
                if kext.version == module.version {
                    kext.loaded = true;
                    kext.load_address = Some(module.address);
                } else {
                    kext.other_version_loaded = true;
                }
            }
        }
        Ok(())
    }

    // ---------------------------------------------------------------
    // Queries
    // ---------------------------------------------------------------

    /// The head of an identifier's chain: its greatest known version.
    pub fn get_kext_with_identifier(&mut self, identifier: &str) -> Option<KextId> {
        self.ensure_relationships();
        self.index.head(identifier)
    }

    /// The chain node at exactly `version`.
    pub fn get_kext_with_version(
        &mut self,
        identifier: &str,
        version: &Version,
    ) -> Option<KextId> {
        self.ensure_relationships();
        let head = self.index.head(identifier)?;
        CandidateIndex::spine(&self.arena, head).find(|id| self.arena[*id].version == *version)
    }

    /// The best candidate to satisfy a link against `identifier` at
    /// `version`: a loaded compatible version if one exists, else the
    /// latest compatible one.
    pub fn get_compatible_kext(
        &mut self,
        identifier: &str,
        version: &Version,
    ) -> Option<KextId> {
        self.ensure_relationships();
        resolver::find_compatible(&self.arena, &self.index, identifier, version)
    }

    /// The loaded version of an identifier if the kernel has one, else
    /// the head.
    pub fn get_loaded_or_latest_kext(
        &mut self,
        identifier: &str,
    ) -> Result<Option<KextId>, KextManagerError> {
        self.update_loaded_state()?;
        let Some(head) = self.index.head(identifier) else {
            return Ok(None);
        };
        Ok(CandidateIndex::spine(&self.arena, head)
            .find(|id| self.arena[*id].loaded)
            .or(Some(head)))
    }

    /// Every chain node for an identifier: spine order, duplicates before
    /// the spine advances.
    pub fn copy_all_kexts_with_identifier(&mut self, identifier: &str) -> Vec<KextId> {
        self.ensure_relationships();
        match self.index.head(identifier) {
            Some(head) => CandidateIndex::flatten(&self.arena, head),
            None => Vec::new(),
        }
    }

    /// Every kext the manager knows: the flattened index plus every
    /// repository's bad kexts.
    pub fn copy_all_kexts(&mut self) -> Vec<KextId> {
        self.ensure_relationships();
        let identifiers: Vec<_> = self.index.identifiers().cloned().collect();
        let mut all = Vec::new();
        for identifier in &identifiers {
            if let Some(head) = self.index.head(identifier.as_str()) {
                all.extend(CandidateIndex::flatten(&self.arena, head));
            }
        }
        for repository in self.repositories.iter().flatten() {
            all.extend(repository.bad_kexts().iter().copied());
        }
        all
    }

    // ---------------------------------------------------------------
    // Catalog exchange
    // ---------------------------------------------------------------

    /// Publish the personalities of the given kexts to the kernel
    /// catalog. Under safe boot, personalities with a nonzero
    /// `IOKitDebug` stay home.
    pub fn send_personalities_to_catalog(
        &mut self,
        kexts: &[KextId],
    ) -> Result<(), KextManagerError> {
        let mut personalities = Vec::new();
        for &id in kexts {
            let kext = &self.arena[id];
            for (name, personality) in &kext.personalities {
                if self.safe_boot && personality.io_kit_debug().is_some_and(|debug| debug != 0) {
                    warn!(
                        kext = %kext.identifier,
                        personality = %name,
                        "withholding debug personality under safe boot"
                    );
                    continue;
                }
                personalities.push(personality.clone());
            }
        }
        if personalities.is_empty() {
            return Ok(());
        }
        debug!(count = personalities.len(), "sending personalities to catalog");
        let request = CatalogRequest::AddDrivers { personalities };
        let bytes = request.to_bytes()?;
        self.kernel.send_catalog_request(&bytes)?;
        Ok(())
    }

    /// Withdraw every catalog personality matching the template.
    pub fn remove_personalities_from_catalog(
        &mut self,
        template: Personality,
    ) -> Result<(), KextManagerError> {
        let request = CatalogRequest::RemoveDrivers { template };
        let bytes = request.to_bytes()?;
        self.kernel.send_catalog_request(&bytes)?;
        Ok(())
    }
}
