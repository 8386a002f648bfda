use kext_types::cache::CacheError;
use kext_types::BundleIdentifier;

use kext_kernel::KernelError;

/// Everything that can go wrong managing and loading kexts.
///
/// Each variant carries a stable numeric code ([`Self::code`]); the codes
/// are the wire format of the forked-loader exit channel and must not be
/// renumbered.
#[derive(Debug, thiserror::Error)]
pub enum KextManagerError {
    #[error("unspecified failure")]
    Unspecified,
    #[error("invalid argument: {0}")]
    InvalidArgument(&'static str),
    #[error("allocation failed")]
    NoMemory,
    #[error("file access failed: {0}")]
    FileAccess(String),
    #[error("{0} is not a directory")]
    NotADirectory(String),
    #[error("{0} is not a bundle")]
    NotABundle(String),
    #[error("{0} is not a kext")]
    NotAKext(String),
    #[error("bundle {url} does not live under repository {repository}")]
    UrlNotInRepository { repository: String, url: String },
    #[error("no kext with identifier {0}")]
    KextNotFound(BundleIdentifier),
    #[error("kext {0} failed validation")]
    Validation(BundleIdentifier),
    #[error("kext {0} is not eligible for safe boot")]
    BootLevel(BundleIdentifier),
    #[error("kext {0} is disabled")]
    Disabled(BundleIdentifier),
    #[error("kext {0} failed authentication")]
    Authentication(BundleIdentifier),
    #[error("repository cache problem: {0}")]
    Cache(String),
    #[error("kext {0} is missing dependencies")]
    Dependency(BundleIdentifier),
    #[error("dependency cycle through {0}")]
    DependencyLoop(BundleIdentifier),
    #[error("kext {0} is already loaded")]
    AlreadyLoaded(BundleIdentifier),
    #[error("another version of {0} is loaded")]
    LoadedVersionDiffers(BundleIdentifier),
    #[error("a dependency of {0} is loaded at a different version")]
    DependencyLoadedVersionDiffers(BundleIdentifier),
    #[error("kext {0} has an unusable executable")]
    LoadExecutableBad(BundleIdentifier),
    #[error("kext {0} has no executable for this architecture")]
    LoadExecutableNoArch(BundleIdentifier),
    #[error("link/load failed: {0}")]
    LinkLoad(String),
    #[error("serialization failed: {0}")]
    Serialization(String),
    #[error("compression failed: {0}")]
    Compression(String),
    #[error("kernel communication failed: {0}")]
    Ipc(String),
    #[error("kernel is out of resources")]
    KernelResource,
    #[error("operation not permitted by the kernel")]
    KernelPermission,
    #[error("kernel returned error {0}")]
    Kernel(i32),
    #[error("loader child died abnormally")]
    ChildTask,
    #[error("user aborted")]
    UserAbort,
    #[error("out of disk space")]
    DiskFull,
}

impl KextManagerError {
    /// The stable numeric code. Zero is reserved for success and never
    /// returned here.
    pub fn code(&self) -> i32 {
        match self {
            Self::Unspecified => 1,
            Self::InvalidArgument(_) => 2,
            Self::NoMemory => 3,
            Self::FileAccess(_) => 4,
            Self::NotADirectory(_) => 5,
            Self::NotABundle(_) => 6,
            Self::NotAKext(_) => 7,
            Self::UrlNotInRepository { .. } => 8,
            Self::KextNotFound(_) => 9,
            Self::Validation(_) => 10,
            Self::BootLevel(_) => 11,
            Self::Disabled(_) => 12,
            Self::Authentication(_) => 13,
            Self::Cache(_) => 14,
            Self::Dependency(_) => 15,
            Self::DependencyLoop(_) => 16,
            Self::AlreadyLoaded(_) => 17,
            Self::LoadedVersionDiffers(_) => 18,
            Self::DependencyLoadedVersionDiffers(_) => 19,
            Self::LoadExecutableBad(_) => 20,
            Self::LoadExecutableNoArch(_) => 21,
            Self::LinkLoad(_) => 22,
            Self::Serialization(_) => 23,
            Self::Compression(_) => 24,
            Self::Ipc(_) => 25,
            Self::KernelResource => 26,
            Self::KernelPermission => 27,
            Self::Kernel(_) => 28,
            Self::ChildTask => 29,
            Self::UserAbort => 30,
            Self::DiskFull => 31,
        }
    }

    /// Rebuild an error from a forked loader's exit code. The child loses
    /// payload detail across the exit-status channel; the parent restores
    /// what it knows, which is the load target.
    pub fn from_code(code: i32, target: &BundleIdentifier) -> Self {
        match code {
            2 => Self::InvalidArgument("reported by loader"),
            3 => Self::NoMemory,
            4 => Self::FileAccess("reported by loader".to_string()),
            5 => Self::NotADirectory(target.to_string()),
            6 => Self::NotABundle(target.to_string()),
            7 => Self::NotAKext(target.to_string()),
            8 => Self::UrlNotInRepository {
                repository: String::new(),
                url: target.to_string(),
            },
            9 => Self::KextNotFound(target.clone()),
            10 => Self::Validation(target.clone()),
            11 => Self::BootLevel(target.clone()),
            12 => Self::Disabled(target.clone()),
            13 => Self::Authentication(target.clone()),
            14 => Self::Cache("reported by loader".to_string()),
            15 => Self::Dependency(target.clone()),
            16 => Self::DependencyLoop(target.clone()),
            17 => Self::AlreadyLoaded(target.clone()),
            18 => Self::LoadedVersionDiffers(target.clone()),
            19 => Self::DependencyLoadedVersionDiffers(target.clone()),
            20 => Self::LoadExecutableBad(target.clone()),
            21 => Self::LoadExecutableNoArch(target.clone()),
            22 => Self::LinkLoad("reported by loader".to_string()),
            23 => Self::Serialization("reported by loader".to_string()),
            24 => Self::Compression("reported by loader".to_string()),
            25 => Self::Ipc("reported by loader".to_string()),
            26 => Self::KernelResource,
            27 => Self::KernelPermission,
            28 => Self::Kernel(code),
            29 => Self::ChildTask,
            30 => Self::UserAbort,
            31 => Self::DiskFull,
            _ => Self::Unspecified,
        }
    }

    /// Whether two errors are the same kind, payloads aside.
    pub fn same_kind(&self, other: &Self) -> bool {
        self.code() == other.code()
    }
}

impl From<serde_json::Error> for KextManagerError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

impl From<KernelError> for KextManagerError {
    fn from(err: KernelError) -> Self {
        match err {
            KernelError::Serialization(err) => Self::Serialization(err.to_string()),
            KernelError::Ipc(detail) => Self::Ipc(detail),
            KernelError::Resource => Self::KernelResource,
            KernelError::Permission => Self::KernelPermission,
            KernelError::Kernel(code) => Self::Kernel(code),
        }
    }
}

impl From<CacheError> for KextManagerError {
    fn from(err: CacheError) -> Self {
        if err.is_disk_full() {
            return Self::DiskFull;
        }
        match err {
            CacheError::Io(err) => Self::FileAccess(err.to_string()),
            CacheError::Stale { directory } => {
                Self::Cache(format!("{} is out of date", directory.display()))
            }
            CacheError::Serialization(err) => Self::Serialization(err.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::str::FromStr;

    use super::*;

    #[test]
    fn codes_survive_the_exit_status_channel() {
        let target = BundleIdentifier::from_str("com.example.a").unwrap();
        for code in 1..=31 {
            let rebuilt = KextManagerError::from_code(code, &target);
            assert_eq!(rebuilt.code(), code, "code {code} must round-trip");
        }
    }

    #[test]
    fn unknown_codes_collapse_to_unspecified() {
        let target = BundleIdentifier::from_str("com.example.a").unwrap();
        assert_eq!(KextManagerError::from_code(99, &target).code(), 1);
        assert_eq!(KextManagerError::from_code(0, &target).code(), 1);
    }
}
