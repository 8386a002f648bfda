use std::path::{Path, PathBuf};
use std::str::FromStr;

use tracing::{debug, warn};
use url::Url;

use kext_kernel::CatalogRequest;
use kext_types::{BundleIdentifier, KextId, Personality};
use kext_version::Version;

use crate::error::KextManagerError;
use crate::interaction::{InteractiveLevel, Response, UserInteraction};
use crate::manager::KextManager;
use crate::resolver::{self, ClosureFailure};

/// Caller options for one load.
#[derive(Debug, Clone)]
pub struct LoadOptions {
    /// Consult the kernel's loaded-module list before preparing.
    pub check_loaded: bool,
    /// Actually load into the kernel (as opposed to a dry or symbol-only
    /// run).
    pub do_load: bool,
    /// Start the module and its matching after loading.
    pub do_start: bool,
    /// Produce prelink output instead of a live load.
    pub do_prelink: bool,
    pub interactive_level: InteractiveLevel,
    /// An alternate kernel image for symbol resolution.
    pub kernel_file: Option<PathBuf>,
    /// Where the driver writes symbol files.
    pub symbol_dir: Option<PathBuf>,
    /// Where the driver picks up patch files.
    pub patch_dir: Option<PathBuf>,
    pub ask_overwrite_symbols: bool,
    pub overwrite_symbols: bool,
    /// Explicit load addresses per bundle identifier.
    pub load_addresses: Vec<(BundleIdentifier, u64)>,
    /// Set by the managing daemon itself; suppresses the demand-load
    /// personality shortcut meant for one-shot clients.
    pub client_is_daemon: bool,
}

impl Default for LoadOptions {
    fn default() -> Self {
        Self {
            check_loaded: true,
            do_load: true,
            do_start: true,
            do_prelink: false,
            interactive_level: InteractiveLevel::None,
            kernel_file: None,
            symbol_dir: None,
            patch_dir: None,
            ask_overwrite_symbols: false,
            overwrite_symbols: false,
            load_addresses: Vec::new(),
            client_is_daemon: false,
        }
    }
}

/// One node of the dependency graph handed to the link/load driver,
/// dependencies before dependents and the target last.
#[derive(Debug, Clone)]
pub struct LoadGraphEntry {
    pub kext: KextId,
    pub identifier: BundleIdentifier,
    pub version: Version,
    pub url: Url,
    pub requested_address: Option<u64>,
}

/// What the link/load driver consumes.
#[derive(Debug)]
pub struct LoadRequest<'a> {
    pub graph: &'a [LoadGraphEntry],
    pub kernel_file: Option<&'a Path>,
    pub symbol_dir: Option<&'a Path>,
    pub patch_dir: Option<&'a Path>,
    pub do_load: bool,
    pub do_start: bool,
    pub do_prelink: bool,
    pub interactive_level: InteractiveLevel,
    pub ask_overwrite_symbols: bool,
    pub overwrite_symbols: bool,
}

/// The external link/load driver: builds the module images, relocates
/// them, and injects them into the kernel.
///
/// Implementations report failures with the error kinds of
/// [`KextManagerError`]; in forked mode only the numeric code survives
/// the exit-status channel.
pub trait LinkLoader {
    fn link_and_load(
        &self,
        request: &LoadRequest<'_>,
        interaction: &dyn UserInteraction,
    ) -> Result<(), KextManagerError>;
}

impl KextManager {
    /// Prepare and load the latest candidate for `identifier`.
    ///
    /// Authentication failures along the dependency closure disqualify
    /// the offending kext. Use
    /// [`Self::load_kext_deferring_authentication`] to collect them
    /// instead.
    pub fn load_kext(
        &mut self,
        identifier: &str,
        loader: &dyn LinkLoader,
        options: &LoadOptions,
    ) -> Result<(), KextManagerError> {
        let target = self.lookup_target(identifier)?;
        self.load_inner(target, loader, options, None)
    }

    /// Like [`Self::load_kext`], but inauthentic kexts are appended to
    /// `inauthentic` and left qualified.
    pub fn load_kext_deferring_authentication(
        &mut self,
        identifier: &str,
        loader: &dyn LinkLoader,
        options: &LoadOptions,
        inauthentic: &mut Vec<KextId>,
    ) -> Result<(), KextManagerError> {
        let target = self.lookup_target(identifier)?;
        self.load_inner(target, loader, options, Some(inauthentic))
    }

    fn lookup_target(&mut self, identifier: &str) -> Result<KextId, KextManagerError> {
        let parsed = BundleIdentifier::from_str(identifier)
            .map_err(|_| KextManagerError::InvalidArgument("identifier"))?;
        self.get_kext_with_identifier(identifier)
            .ok_or(KextManagerError::KextNotFound(parsed))
    }

    fn load_inner(
        &mut self,
        target: KextId,
        loader: &dyn LinkLoader,
        options: &LoadOptions,
        inauthentic: Option<&mut Vec<KextId>>,
    ) -> Result<(), KextManagerError> {
        let closure = self.prepare_load(target, options, inauthentic)?;
        let result = self.dispatch(target, &closure, loader, options);
        if let Err(err) = &result {
            // A failed load quarantines the kext and poisons the index;
            // an already-loaded kext failed nothing.
            if !matches!(err, KextManagerError::AlreadyLoaded(_)) {
                self.record_load_failure(target);
            }
        }
        result
    }

    /// The pre-flight pipeline: admission, relationship repair, loaded
    /// set, dependency re-resolution, closure authentication. Returns the
    /// dependency closure, target last.
    fn prepare_load(
        &mut self,
        target: KextId,
        options: &LoadOptions,
        mut inauthentic: Option<&mut Vec<KextId>>,
    ) -> Result<Vec<KextId>, KextManagerError> {
        // Admission.
        {
            let kext = &self.arena[target];
            if !kext.valid {
                return Err(KextManagerError::Validation(kext.identifier.clone()));
            }
            if self.safe_boot && !kext.safe_boot_eligible {
                return Err(KextManagerError::BootLevel(kext.identifier.clone()));
            }
            if !kext.enabled {
                return Err(KextManagerError::Disabled(kext.identifier.clone()));
            }
        }

        // Relationships.
        self.ensure_relationships();

        // Loaded set.
        if options.check_loaded {
            self.update_loaded_state()?;
            let kext = &self.arena[target];
            if options.do_load && kext.loaded {
                return Err(KextManagerError::AlreadyLoaded(kext.identifier.clone()));
            }
            if kext.other_version_loaded {
                return Err(KextManagerError::LoadedVersionDiffers(
                    kext.identifier.clone(),
                ));
            }
        }

        // Dependencies, from scratch.
        for id in self.arena.ids() {
            self.arena[id].clear_dependencies();
        }
        let closure = match resolver::dependency_closure(&mut self.arena, &self.index, target) {
            Ok(closure) => closure,
            Err(ClosureFailure::Cycle(through)) => {
                return Err(KextManagerError::DependencyLoop(
                    self.arena[through].identifier.clone(),
                ));
            }
            Err(ClosureFailure::Missing(_)) => {
                self.missing_deps.push(target);
                return Err(KextManagerError::Dependency(
                    self.arena[target].identifier.clone(),
                ));
            }
        };

        // Authentication over the whole closure, with clears held off so
        // a disqualification mid-loop cannot rip the chains out from
        // under us.
        self.disable_clears();
        let authenticated = self.authenticate_closure(&closure, &mut inauthentic);
        self.enable_clears();
        authenticated?;

        // Interactive confirmation.
        if options.interactive_level >= InteractiveLevel::Load {
            let prompt = format!(
                "Load {} and its {} dependencies?",
                self.arena[target].identifier,
                closure.len().saturating_sub(1)
            );
            if self.interaction.approve(&prompt) != Response::Yes {
                return Err(KextManagerError::UserAbort);
            }
        }

        Ok(closure)
    }

    fn authenticate_closure(
        &mut self,
        closure: &[KextId],
        inauthentic: &mut Option<&mut Vec<KextId>>,
    ) -> Result<(), KextManagerError> {
        let mut problems: Vec<KextManagerError> = Vec::new();
        'members: for &member in closure {
            if self.arena[member].other_version_loaded {
                problems.push(KextManagerError::DependencyLoadedVersionDiffers(
                    self.arena[member].identifier.clone(),
                ));
                if !self.full_tests {
                    break 'members;
                }
            }
            if self.arena[member].authentic != Some(true) {
                let authentic = self
                    .authenticator
                    .authenticate(&self.arena[member], self.strict_authentication);
                self.arena[member].authentic = Some(authentic);
                if !authentic {
                    warn!(kext = %self.arena[member].identifier, "kext failed authentication");
                    match inauthentic.as_mut() {
                        Some(collector) => collector.push(member),
                        None => self.disqualify_kext(member),
                    }
                    problems.push(KextManagerError::Authentication(
                        self.arena[member].identifier.clone(),
                    ));
                    if !self.full_tests {
                        break 'members;
                    }
                }
            }
        }

        let Some(first) = problems.first() else {
            return Ok(());
        };
        if problems.iter().all(|problem| problem.same_kind(first)) {
            Err(problems.swap_remove(0))
        } else {
            // Mixed failure kinds collapse; the log has the detail.
            Err(KextManagerError::Unspecified)
        }
    }

    fn dispatch(
        &mut self,
        target: KextId,
        closure: &[KextId],
        loader: &dyn LinkLoader,
        options: &LoadOptions,
    ) -> Result<(), KextManagerError> {
        // A one-shot client loading a kext with no personalities: give
        // the kernel a chance to satisfy the load from its own prelinked
        // set before the user-space linker runs.
        if options.do_load
            && !options.client_is_daemon
            && self.arena[target].personalities.is_empty()
        {
            debug!(kext = %self.arena[target].identifier, "publishing demand-load personality");
            let personality = Personality::module_demand(&self.arena[target].identifier);
            let request = CatalogRequest::AddDrivers {
                personalities: vec![personality],
            };
            self.kernel.send_catalog_request(&request.to_bytes()?)?;
        }

        let graph: Vec<LoadGraphEntry> = closure
            .iter()
            .map(|&id| {
                let kext = &self.arena[id];
                LoadGraphEntry {
                    kext: id,
                    identifier: kext.identifier.clone(),
                    version: kext.version,
                    url: kext.url.clone(),
                    requested_address: options
                        .load_addresses
                        .iter()
                        .find(|(identifier, _)| *identifier == kext.identifier)
                        .map(|(_, address)| *address),
                }
            })
            .collect();
        let request = LoadRequest {
            graph: &graph,
            kernel_file: options.kernel_file.as_deref(),
            symbol_dir: options.symbol_dir.as_deref(),
            patch_dir: options.patch_dir.as_deref(),
            do_load: options.do_load,
            do_start: options.do_start,
            do_prelink: options.do_prelink,
            interactive_level: options.interactive_level,
            ask_overwrite_symbols: options.ask_overwrite_symbols,
            overwrite_symbols: options.overwrite_symbols,
        };

        if self.load_in_process {
            loader.link_and_load(&request, &*self.interaction)
        } else {
            self.dispatch_forked(target, loader, &request)
        }
    }

    /// Run the driver in a forked child; its exit status is the error
    /// code, zero for success.
    #[cfg(unix)]
    #[allow(unsafe_code)]
    fn dispatch_forked(
        &self,
        target: KextId,
        loader: &dyn LinkLoader,
        request: &LoadRequest<'_>,
    ) -> Result<(), KextManagerError> {
        use nix::sys::wait::{waitpid, WaitStatus};
        use nix::unistd::ForkResult;

        // SAFETY: the manager is single-threaded by contract, so the
        // child inherits no lock state; it only runs the driver and
        // exits.
        match unsafe { nix::unistd::fork() } {
            Ok(ForkResult::Child) => {
                let code = match loader.link_and_load(request, &*self.interaction) {
                    Ok(()) => 0,
                    Err(err) => err.code(),
                };
                // Exit with the code directly: the child performs no
                // manager teardown.
                std::process::exit(code);
            }
            Ok(ForkResult::Parent { child }) => {
                let identifier = &self.arena[target].identifier;
                match waitpid(child, None) {
                    Ok(WaitStatus::Exited(_, 0)) => Ok(()),
                    Ok(WaitStatus::Exited(_, code)) => {
                        Err(KextManagerError::from_code(code, identifier))
                    }
                    Ok(status) => {
                        warn!(?status, "loader child did not exit normally");
                        Err(KextManagerError::ChildTask)
                    }
                    Err(err) => {
                        warn!(%err, "waiting for loader child failed");
                        Err(KextManagerError::ChildTask)
                    }
                }
            }
            Err(_) => Err(KextManagerError::NoMemory),
        }
    }

    #[cfg(not(unix))]
    fn dispatch_forked(
        &self,
        _target: KextId,
        loader: &dyn LinkLoader,
        request: &LoadRequest<'_>,
    ) -> Result<(), KextManagerError> {
        // No fork on this platform; degrade to an in-process call.
        loader.link_and_load(request, &*self.interaction)
    }
}
