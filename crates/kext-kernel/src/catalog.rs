use std::cell::RefCell;

use serde::{Deserialize, Serialize};

use kext_types::Personality;

use crate::loaded::RawLoadedRecord;

/// A request to the kernel's driver catalog.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "verb", rename_all = "kebab-case")]
pub enum CatalogRequest {
    /// Publish driver personalities for matching.
    AddDrivers { personalities: Vec<Personality> },
    /// Withdraw every personality matching the template dictionary.
    RemoveDrivers { template: Personality },
}

impl CatalogRequest {
    /// The serialized form the catalog transport accepts.
    pub fn to_bytes(&self) -> Result<Vec<u8>, KernelError> {
        Ok(serde_json::to_vec(self)?)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, KernelError> {
        Ok(serde_json::from_slice(bytes)?)
    }
}

/// An error talking to the kernel.
#[derive(Debug, thiserror::Error)]
pub enum KernelError {
    #[error("failed to serialize catalog request")]
    Serialization(#[from] serde_json::Error),
    #[error("kernel communication failed: {0}")]
    Ipc(String),
    #[error("kernel is out of resources")]
    Resource,
    #[error("operation not permitted by the kernel")]
    Permission,
    #[error("kernel returned error {0}")]
    Kernel(i32),
}

/// The kernel transport the manager talks through.
///
/// All calls block until the kernel answers; none of them re-enter the
/// manager.
pub trait KernelProxy {
    /// Enumerate the currently loaded kernel modules, raw.
    fn loaded_kexts(&self) -> Result<Vec<RawLoadedRecord>, KernelError>;

    /// Hand serialized catalog-request bytes to the kernel.
    fn send_catalog_request(&self, bytes: &[u8]) -> Result<(), KernelError>;
}

impl<K: KernelProxy + ?Sized> KernelProxy for std::rc::Rc<K> {
    fn loaded_kexts(&self) -> Result<Vec<RawLoadedRecord>, KernelError> {
        (**self).loaded_kexts()
    }

    fn send_catalog_request(&self, bytes: &[u8]) -> Result<(), KernelError> {
        (**self).send_catalog_request(bytes)
    }
}

/// An in-memory kernel for tests: a fixed loaded-module list and a log of
/// every catalog request received.
#[derive(Debug, Default)]
pub struct MemoryKernel {
    loaded: Vec<RawLoadedRecord>,
    requests: RefCell<Vec<Vec<u8>>>,
}

impl MemoryKernel {
    pub fn new() -> Self {
        Self::default()
    }

    /// Report `name` at `version` as loaded.
    pub fn with_loaded(mut self, name: &str, version: &str, address: u64) -> Self {
        // Keep every earlier record chained to this one.
        for record in &mut self.loaded {
            record.next = true;
        }
        self.loaded.push(RawLoadedRecord {
            name: name.to_string(),
            version: version.to_string(),
            address,
            next: false,
        });
        self
    }

    /// Every catalog request received so far, decoded.
    pub fn catalog_requests(&self) -> Vec<CatalogRequest> {
        self.requests
            .borrow()
            .iter()
            .filter_map(|bytes| CatalogRequest::from_bytes(bytes).ok())
            .collect()
    }
}

impl KernelProxy for MemoryKernel {
    fn loaded_kexts(&self) -> Result<Vec<RawLoadedRecord>, KernelError> {
        Ok(self.loaded.clone())
    }

    fn send_catalog_request(&self, bytes: &[u8]) -> Result<(), KernelError> {
        self.requests.borrow_mut().push(bytes.to_vec());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn catalog_requests_round_trip() {
        let personality: Personality =
            serde_json::from_value(json!({"IOProviderClass": "IOPCIDevice"})).unwrap();
        let request = CatalogRequest::AddDrivers {
            personalities: vec![personality],
        };
        let bytes = request.to_bytes().unwrap();
        assert!(matches!(
            CatalogRequest::from_bytes(&bytes).unwrap(),
            CatalogRequest::AddDrivers { personalities } if personalities.len() == 1
        ));
    }

    #[test]
    fn memory_kernel_records_requests() {
        let kernel = MemoryKernel::new().with_loaded("com.example.a", "1.0", 0x1000);
        let request = CatalogRequest::RemoveDrivers {
            template: Personality::default(),
        };
        kernel.send_catalog_request(&request.to_bytes().unwrap()).unwrap();
        assert_eq!(kernel.catalog_requests().len(), 1);
        assert_eq!(kernel.loaded_kexts().unwrap().len(), 1);
    }
}
