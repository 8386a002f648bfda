//! Version numbers for kernel extension bundles.
//!
//! A kext version is a dotted numeric triple with an optional pre-release
//! stage, e.g. `1.2.3`, `10.0d12`, `2.1b4` or `3.0fc1`. Versions form a
//! total order with pre-release stages sorting below the release they lead
//! up to: `1.0d1 < 1.0a1 < 1.0b1 < 1.0fc1 < 1.0`.
//!
//! Parse with [`Version::from_str`]:
//!
//! ```rust
//! use std::str::FromStr;
//! use kext_version::Version;
//!
//! let version = Version::from_str("1.2.3b7").unwrap();
//! assert!(version < Version::from_str("1.2.3").unwrap());
//! ```

pub use crate::version::{ReleaseStage, Version, VersionParseError};

mod version;
