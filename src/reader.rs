//! File reader with size ceiling and binary detection
//!
//! Reads run on the monitor's worker thread (or the prepopulation thread),
//! never on the caller's; the stat happens first so oversize files are
//! rejected without reading them. The `(device, inode)` pair is captured
//! from the stat and stored alongside the content; rename inference depends
//! on it. Symbolic links are read through: the content and stat of the
//! target are what get recorded.

use crate::error::ReadError;
use std::fs;
use std::io;
use std::path::Path;
use tracing::trace;

/// Leading window scanned for null bytes to detect binary content
const BINARY_SNIFF_WINDOW: usize = 8 * 1024;

/// Result of a successful read
#[derive(Debug, Clone)]
pub(crate) struct FileSnapshot {
    /// Full file content
    pub content: Vec<u8>,
    /// Device id from the stat
    pub device: u64,
    /// Inode from the stat
    pub inode: u64,
}

#[cfg(unix)]
fn device_inode(meta: &fs::Metadata) -> (u64, u64) {
    use std::os::unix::fs::MetadataExt;
    (meta.dev(), meta.ino())
}

#[cfg(not(unix))]
fn device_inode(_meta: &fs::Metadata) -> (u64, u64) {
    (0, 0)
}

fn map_io(err: io::Error) -> ReadError {
    if err.kind() == io::ErrorKind::NotFound {
        ReadError::NotFound
    } else {
        ReadError::Io(err)
    }
}

/// Read a file at an absolute path, enforcing the size ceiling and
/// rejecting binary content.
///
/// `NotFound` is returned distinctly from other I/O failures; the change
/// processor infers deletion from it. Non-regular files (directories,
/// sockets) are reported as `Io` so the processor leaves its state alone.
pub(crate) fn read_file(path: &Path, max_file_size: u64) -> Result<FileSnapshot, ReadError> {
    let meta = fs::metadata(path).map_err(map_io)?;

    if !meta.is_file() {
        return Err(ReadError::Io(io::Error::new(
            io::ErrorKind::InvalidInput,
            "not a regular file",
        )));
    }
    if meta.len() > max_file_size {
        trace!(
            "Skipping oversize file {:?} ({} > {} bytes)",
            path,
            meta.len(),
            max_file_size
        );
        return Err(ReadError::TooLarge {
            size: meta.len(),
            limit: max_file_size,
        });
    }

    let (device, inode) = device_inode(&meta);
    let content = fs::read(path).map_err(map_io)?;

    // The file may have grown between the stat and the read.
    if content.len() as u64 > max_file_size {
        return Err(ReadError::TooLarge {
            size: content.len() as u64,
            limit: max_file_size,
        });
    }

    let window = &content[..content.len().min(BINARY_SNIFF_WINDOW)];
    if window.contains(&0) {
        trace!("Skipping binary file {:?}", path);
        return Err(ReadError::Binary);
    }

    Ok(FileSnapshot {
        content,
        device,
        inode,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_read_regular_file() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("a.txt");
        fs::write(&path, b"hello").unwrap();

        let snap = read_file(&path, 1024).unwrap();
        assert_eq!(snap.content, b"hello");
        #[cfg(unix)]
        {
            assert_ne!(snap.inode, 0);
        }
    }

    #[test]
    fn test_not_found_is_distinct() {
        let temp_dir = TempDir::new().unwrap();
        let err = read_file(&temp_dir.path().join("missing.txt"), 1024).unwrap_err();
        assert!(matches!(err, ReadError::NotFound));
    }

    #[test]
    fn test_too_large_rejected_by_stat() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("big.txt");
        fs::write(&path, vec![b'x'; 100]).unwrap();

        let err = read_file(&path, 10).unwrap_err();
        assert!(matches!(err, ReadError::TooLarge { size: 100, limit: 10 }));
    }

    #[test]
    fn test_binary_detected_by_null_byte() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("bin.dat");
        fs::write(&path, b"abc\0def").unwrap();

        let err = read_file(&path, 1024).unwrap_err();
        assert!(matches!(err, ReadError::Binary));
    }

    #[test]
    fn test_directory_is_io_error() {
        let temp_dir = TempDir::new().unwrap();
        let err = read_file(temp_dir.path(), 1024).unwrap_err();
        assert!(matches!(err, ReadError::Io(_)));
    }

    #[cfg(unix)]
    #[test]
    fn test_symlink_reads_through_to_target() {
        let temp_dir = TempDir::new().unwrap();
        let target = temp_dir.path().join("target.txt");
        let link = temp_dir.path().join("link.txt");
        fs::write(&target, b"via link").unwrap();
        std::os::unix::fs::symlink(&target, &link).unwrap();

        let via_link = read_file(&link, 1024).unwrap();
        let direct = read_file(&target, 1024).unwrap();
        assert_eq!(via_link.content, b"via link");
        assert_eq!(via_link.inode, direct.inode);
    }
}
