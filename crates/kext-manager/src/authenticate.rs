use kext_types::Kext;

/// The per-bundle authenticity check: ownership and permission
/// verification of the on-disk bundle.
///
/// The check itself is platform plumbing supplied by the embedding
/// program; the manager only consumes the verdict and caches it on the
/// kext. `strict` carries the manager's strict-authentication policy:
/// when set, implementations are expected to verify every file of the
/// bundle rather than just the executable and its metadata.
pub trait Authenticator {
    fn authenticate(&self, kext: &Kext, strict: bool) -> bool;
}

/// Treats every bundle as authentic. The default capability for embedders
/// that do their own vetting upstream, and for tests.
#[derive(Debug, Default, Clone, Copy)]
pub struct AlwaysAuthentic;

impl Authenticator for AlwaysAuthentic {
    fn authenticate(&self, _kext: &Kext, _strict: bool) -> bool {
        true
    }
}
