//! ## Type hierarchy
//!
//! A [`Kext`] is one kernel extension bundle discovered under a repository
//! directory: identifier, version, driver personalities, declared library
//! requirements, and the mutable state the manager tracks for it
//! (admission flags, authentication, loaded state, resolved dependencies).
//!
//! Kexts live in a [`KextArena`] and are addressed by [`KextId`] handles;
//! the inter-version links (`prior`, `duplicate`) are handles too, so the
//! version chains the manager builds never form ownership cycles.
//!
//! A [`Repository`] owns the handles of the kexts found under one
//! directory, split into candidates and bad kexts. Repositories are
//! described by a [`RepositoryManifest`] (what a scanner or an on-disk
//! [`cache`] produces) and materialized into the arena by the manager.

pub use crate::identifier::{BundleIdentifier, InvalidIdentifierError};
pub use crate::kext::{Kext, KextArena, KextId, LibraryRequirement};
pub use crate::personality::Personality;
pub use crate::repository::{
    KextManifest, LibraryManifest, Repository, RepositoryId, RepositoryManifest,
};

pub mod cache;
mod identifier;
mod kext;
mod personality;
mod repository;
