//! The on-disk repository cache.
//!
//! A repository directory can carry a sibling cache file holding the
//! serialized [`RepositoryManifest`] of its last scan, gzip-compressed.
//! The cache is current exactly when its modification time equals the
//! directory's modification time plus one second; the writer stamps the
//! file accordingly. Note the exact equality: a cache older *or newer*
//! than that instant is stale, because either way the directory changed
//! after the stamp was computed.

use std::path::{Path, PathBuf};

use filetime::FileTime;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use tracing::debug;

use crate::repository::RepositoryManifest;

/// The extension appended to a repository directory's path to name its
/// cache file.
pub const CACHE_EXTENSION: &str = "kextcache";

/// An error reading or writing a repository cache.
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    #[error("cache access failed")]
    Io(#[from] std::io::Error),
    #[error("cache for {directory} is out of date")]
    Stale { directory: PathBuf },
    #[error("cache payload is malformed")]
    Serialization(#[from] serde_json::Error),
}

impl CacheError {
    /// Whether the underlying failure was running out of disk space.
    pub fn is_disk_full(&self) -> bool {
        matches!(self, Self::Io(err) if err.kind() == std::io::ErrorKind::StorageFull)
    }
}

/// The canonical cache path for a repository directory: the directory path
/// with [`CACHE_EXTENSION`] appended.
pub fn cache_path(directory: &Path) -> PathBuf {
    let mut path = directory.as_os_str().to_owned();
    path.push(".");
    path.push(CACHE_EXTENSION);
    PathBuf::from(path)
}

/// The instant a current cache must carry: directory mtime plus one
/// second, nanoseconds preserved.
fn expected_mtime(directory: &Path) -> Result<FileTime, CacheError> {
    let metadata = fs_err::metadata(directory)?;
    let mtime = FileTime::from_last_modification_time(&metadata);
    Ok(FileTime::from_unix_time(
        mtime.unix_seconds() + 1,
        mtime.nanoseconds(),
    ))
}

/// Whether the repository directory has a current cache.
///
/// A missing cache file is simply not current; other IO failures are
/// reported.
pub fn is_current(directory: &Path) -> Result<bool, CacheError> {
    let path = cache_path(directory);
    let cache_metadata = match fs_err::metadata(&path) {
        Ok(metadata) => metadata,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(false),
        Err(err) => return Err(err.into()),
    };
    let cache_mtime = FileTime::from_last_modification_time(&cache_metadata);
    Ok(cache_mtime == expected_mtime(directory)?)
}

/// Read the manifest out of a repository's cache file without checking
/// currency.
pub fn read(directory: &Path) -> Result<RepositoryManifest, CacheError> {
    let file = fs_err::File::open(cache_path(directory))?;
    let manifest = serde_json::from_reader(GzDecoder::new(file))?;
    Ok(manifest)
}

/// Read the manifest out of a current cache, or fail with
/// [`CacheError::Stale`].
pub fn load(directory: &Path) -> Result<RepositoryManifest, CacheError> {
    if !is_current(directory)? {
        return Err(CacheError::Stale {
            directory: directory.to_path_buf(),
        });
    }
    read(directory)
}

/// Write the manifest as the repository's cache and stamp it current.
pub fn write(directory: &Path, manifest: &RepositoryManifest) -> Result<PathBuf, CacheError> {
    let path = cache_path(directory);
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    serde_json::to_writer(&mut encoder, manifest)?;
    let compressed = encoder.finish()?;
    fs_err::write(&path, compressed)?;
    filetime::set_file_mtime(&path, expected_mtime(directory)?)?;
    debug!(path = %path.display(), "wrote repository cache");
    Ok(path)
}

#[cfg(test)]
mod tests {
    use std::str::FromStr;

    use super::*;

    fn manifest() -> RepositoryManifest {
        RepositoryManifest::from_str(
            r#"{
                "url": "file:///Library/Extensions/",
                "kexts": [
                    {"identifier": "com.example.a", "version": "1.0", "path": "A.kext/"}
                ]
            }"#,
        )
        .unwrap()
    }

    #[test]
    fn cache_path_appends_the_extension() {
        assert_eq!(
            cache_path(Path::new("/Library/Extensions")),
            Path::new("/Library/Extensions.kextcache")
        );
    }

    #[test]
    fn written_cache_is_current_and_round_trips() {
        let root = tempfile::tempdir().unwrap();
        let directory = root.path().join("Extensions");
        fs_err::create_dir(&directory).unwrap();

        assert!(!is_current(&directory).unwrap());
        write(&directory, &manifest()).unwrap();
        assert!(is_current(&directory).unwrap());

        let loaded = load(&directory).unwrap();
        assert_eq!(loaded.url.as_str(), "file:///Library/Extensions/");
        assert_eq!(loaded.kexts.len(), 1);
    }

    #[test]
    fn touching_the_directory_stales_the_cache() {
        let root = tempfile::tempdir().unwrap();
        let directory = root.path().join("Extensions");
        fs_err::create_dir(&directory).unwrap();
        write(&directory, &manifest()).unwrap();

        // Move the directory mtime forward; the stamp no longer matches.
        let metadata = fs_err::metadata(&directory).unwrap();
        let mtime = FileTime::from_last_modification_time(&metadata);
        filetime::set_file_mtime(
            &directory,
            FileTime::from_unix_time(mtime.unix_seconds() + 10, 0),
        )
        .unwrap();

        assert!(!is_current(&directory).unwrap());
        assert!(matches!(
            load(&directory),
            Err(CacheError::Stale { .. })
        ));
    }

    #[test]
    fn a_cache_newer_than_the_stamp_is_stale_too() {
        let root = tempfile::tempdir().unwrap();
        let directory = root.path().join("Extensions");
        fs_err::create_dir(&directory).unwrap();
        let path = write(&directory, &manifest()).unwrap();

        let metadata = fs_err::metadata(&directory).unwrap();
        let mtime = FileTime::from_last_modification_time(&metadata);
        // Two seconds past the directory mtime: "newer than expected" is
        // not "current".
        filetime::set_file_mtime(
            &path,
            FileTime::from_unix_time(mtime.unix_seconds() + 2, mtime.nanoseconds()),
        )
        .unwrap();

        assert!(!is_current(&directory).unwrap());
    }
}
