use std::{
    io::{self, Read, Seek, SeekFrom},
    path::Path,
    time::{SystemTime, UNIX_EPOCH},
};

/// A readable input file offered to a transfer.
///
/// Owned by the caller of [`SendRequest`](crate); the transfer core only
/// ever borrows it read-only and closes it on completion or failure.
pub trait File: Send {
    /// Slash-separated path used as the archive entry name. May contain
    /// nested components (e.g. `"a/b.bin"`).
    fn relative_path(&self) -> &str;

    /// Size in bytes.
    fn size(&self) -> u64;

    /// UNIX seconds, or `0` if unknown.
    fn created_time(&self) -> u64;

    /// UNIX seconds, or `0` if unknown.
    fn modified_time(&self) -> u64;

    /// POSIX-style mode bits.
    fn permissions(&self) -> u32;

    fn seek(&mut self, pos: u64) -> io::Result<()>;

    fn read(&mut self, buffer: &mut [u8]) -> io::Result<usize>;
}

/// Platform file-metadata probing, factored out as a collaborator so the
/// core never has to special-case an operating system directly.
pub trait FileMetadata {
    fn created_time(&self, path: &Path) -> io::Result<u64>;
    fn modified_time(&self, path: &Path) -> io::Result<u64>;
    fn permissions(&self, path: &Path) -> io::Result<u32>;
}

fn system_time_to_unix_secs(time: io::Result<SystemTime>) -> u64 {
    time.ok()
        .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// Default, portable [`FileMetadata`] implementation backed by `std::fs`.
///
/// `created_time`/`modified_time` come from `std::fs::Metadata`, best-effort
/// (some platforms don't track creation time at all, in which case `0` is
/// returned and the caller fills it with "now" per spec). Permissions are
/// the real POSIX mode bits on unix and a conservative `0o644`/`0o755`
/// default elsewhere.
#[derive(Debug, Default, Clone, Copy)]
pub struct StdFileMetadata;

impl FileMetadata for StdFileMetadata {
    fn created_time(&self, path: &Path) -> io::Result<u64> {
        let meta = std::fs::metadata(path)?;
        Ok(system_time_to_unix_secs(meta.created()))
    }

    fn modified_time(&self, path: &Path) -> io::Result<u64> {
        let meta = std::fs::metadata(path)?;
        Ok(system_time_to_unix_secs(meta.modified()))
    }

    #[cfg(unix)]
    fn permissions(&self, path: &Path) -> io::Result<u32> {
        use std::os::unix::fs::PermissionsExt;

        let meta = std::fs::metadata(path)?;
        Ok(meta.permissions().mode() & 0o7777)
    }

    #[cfg(not(unix))]
    fn permissions(&self, path: &Path) -> io::Result<u32> {
        let meta = std::fs::metadata(path)?;
        Ok(if meta.is_dir() { 0o755 } else { 0o644 })
    }
}

fn now_unix_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// A [`File`] backed by a real path on the local filesystem.
pub struct NativeFile {
    handle: std::fs::File,
    relative_path: String,
    size: u64,
    created_time: u64,
    modified_time: u64,
    permissions: u32,
}

impl NativeFile {
    /// Opens `path` for reading, using [`StdFileMetadata`] to probe
    /// created/modified time and permissions.
    pub fn open(path: impl AsRef<Path>, relative_path: impl Into<String>) -> io::Result<Self> {
        Self::open_with_metadata(path, relative_path, &StdFileMetadata)
    }

    /// Opens `path` for reading, probing metadata through a caller-supplied
    /// [`FileMetadata`] provider.
    pub fn open_with_metadata(
        path: impl AsRef<Path>,
        relative_path: impl Into<String>,
        metadata: &dyn FileMetadata,
    ) -> io::Result<Self> {
        let path = path.as_ref();
        let handle = std::fs::File::open(path)?;
        let size = handle.metadata()?.len();

        let created_time = metadata.created_time(path).unwrap_or(0);
        let modified_time = metadata.modified_time(path).unwrap_or(0);
        let permissions = metadata.permissions(path).unwrap_or(0o644);

        Ok(Self {
            handle,
            relative_path: relative_path.into(),
            size,
            created_time: if created_time == 0 {
                now_unix_secs()
            } else {
                created_time
            },
            modified_time: if modified_time == 0 {
                now_unix_secs()
            } else {
                modified_time
            },
            permissions,
        })
    }
}

impl File for NativeFile {
    fn relative_path(&self) -> &str {
        &self.relative_path
    }

    fn size(&self) -> u64 {
        self.size
    }

    fn created_time(&self) -> u64 {
        self.created_time
    }

    fn modified_time(&self) -> u64 {
        self.modified_time
    }

    fn permissions(&self) -> u32 {
        self.permissions
    }

    fn seek(&mut self, pos: u64) -> io::Result<()> {
        self.handle.seek(SeekFrom::Start(pos))?;
        Ok(())
    }

    fn read(&mut self, buffer: &mut [u8]) -> io::Result<usize> {
        self.handle.read(buffer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn native_file_reads_bytes_and_reports_size() {
        let mut tmp = tempfile::NamedTempFile::new().unwrap();
        tmp.write_all(b"hello").unwrap();
        tmp.flush().unwrap();

        let mut file = NativeFile::open(tmp.path(), "hello.txt").unwrap();
        assert_eq!(file.size(), 5);
        assert_eq!(file.relative_path(), "hello.txt");

        let mut buf = [0u8; 5];
        let n = file.read(&mut buf).unwrap();
        assert_eq!(n, 5);
        assert_eq!(&buf, b"hello");
    }

    #[test]
    fn native_file_seeks() {
        let mut tmp = tempfile::NamedTempFile::new().unwrap();
        tmp.write_all(b"0123456789").unwrap();
        tmp.flush().unwrap();

        let mut file = NativeFile::open(tmp.path(), "n.bin").unwrap();
        file.seek(5).unwrap();

        let mut buf = [0u8; 5];
        file.read(&mut buf).unwrap();
        assert_eq!(&buf, b"56789");
    }
}
