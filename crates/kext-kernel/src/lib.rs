//! The manager's view of the running kernel.
//!
//! Two channels exist: enumeration of the currently loaded kernel modules
//! ([`KernelProxy::loaded_kexts`]) and the driver catalog, which accepts
//! serialized [`CatalogRequest`] bytes. The transport behind both is
//! platform plumbing and lives outside this workspace; [`MemoryKernel`]
//! stands in for it in tests.

pub use crate::catalog::{CatalogRequest, KernelError, KernelProxy, MemoryKernel};
pub use crate::loaded::{collect_loaded, LoadedKext, RawLoadedRecord};

mod catalog;
mod loaded;
