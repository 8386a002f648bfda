//! Decides which kext bundle of which version gets loaded.
//!
//! The [`KextManager`] holds every repository's kexts in an arena and
//! builds, per bundle identifier, a two-dimensional chain: a spine of
//! strictly decreasing versions, where each spine node heads a list of
//! same-version duplicates from other repositories. Admission policies
//! filter what enters the chains; the dependency resolver prunes nodes
//! whose library requirements cannot be satisfied; the invalidation
//! protocol coalesces rebuilds so bulk mutations stay cheap.
//!
//! Loading runs a pre-flight pipeline (admission, relationship repair,
//! loaded-set check against the running kernel, dependency re-resolution,
//! closure authentication) and then hands the dependency graph to a
//! [`LinkLoader`], either in-process or in a forked child whose exit
//! status carries the error code back.

pub use crate::admission::{admission_check, AdmissionDenial};
pub use crate::authenticate::{AlwaysAuthentic, Authenticator};
pub use crate::error::KextManagerError;
pub use crate::interaction::{InteractiveLevel, Response, SilentInteraction, UserInteraction};
pub use crate::load::{LinkLoader, LoadGraphEntry, LoadOptions, LoadRequest};
pub use crate::manager::{KextManager, KextManagerBuilder};

mod admission;
mod authenticate;
mod error;
mod index;
mod interaction;
mod load;
mod manager;
mod resolver;
