//! Tar record encoding and decoding.

use std::fs::{self, File};
use std::io::{self, Read, Write};
use std::path::{Component, Path, PathBuf};
use stash_core::{Error, Result};
use tar::{Builder, EntryType, Header};
use tracing::{debug, warn};

/// Write one tar record per entry of every source tree into `sink`.
pub(crate) fn pack<W: Write>(sources: &[PathBuf], sink: W) -> Result<()> {
    let mut builder = Builder::new(sink);
    for source in sources {
        // Fail before emitting anything for a source that is not there.
        fs::symlink_metadata(source).map_err(|e| Error::archive(source, e))?;
        append_tree(&mut builder, source)?;
    }
    builder.finish().map_err(Error::Io)
}

/// Pre-order walk of `path`; children are visited in file name order.
fn append_tree<W: Write>(builder: &mut Builder<W>, path: &Path) -> Result<()> {
    let meta = fs::symlink_metadata(path).map_err(|e| Error::archive(path, e))?;
    let file_type = meta.file_type();
    let name = archive_name(path);

    let mut header = Header::new_gnu();
    header.set_metadata(&meta);

    if file_type.is_symlink() {
        let target = fs::read_link(path).map_err(|e| Error::archive(path, e))?;
        debug!(path = %path.display(), target = %target.display(), "Packing symlink");
        header.set_entry_type(EntryType::Symlink);
        header.set_size(0);
        builder
            .append_link(&mut header, &name, &target)
            .map_err(|e| Error::archive(path, e))?;
    } else if file_type.is_dir() {
        debug!(path = %path.display(), "Packing directory");
        header.set_entry_type(EntryType::Directory);
        header.set_size(0);
        builder
            .append_data(&mut header, &name, io::empty())
            .map_err(|e| Error::archive(path, e))?;

        let mut children = fs::read_dir(path)
            .and_then(|entries| {
                entries
                    .map(|entry| entry.map(|e| e.path()))
                    .collect::<io::Result<Vec<_>>>()
            })
            .map_err(|e| Error::archive(path, e))?;
        children.sort();

        for child in children {
            append_tree(builder, &child)?;
        }
    } else if file_type.is_file() {
        debug!(path = %path.display(), size = meta.len(), "Packing file");
        let file = File::open(path).map_err(|e| Error::archive(path, e))?;
        header.set_entry_type(EntryType::Regular);
        header.set_size(meta.len());
        builder
            .append_data(&mut header, &name, SizedReader::new(file, meta.len()))
            .map_err(|e| Error::archive(path, e))?;
    } else {
        debug!(path = %path.display(), "Skipping special file");
    }

    Ok(())
}

/// Yields exactly `size` bytes of `inner`, failing if it holds fewer or more.
///
/// The header size is fixed before the payload is copied, so a file that
/// changes while it is packed would otherwise corrupt the archive.
struct SizedReader<R> {
    inner: R,
    remaining: u64,
}

impl<R: Read> SizedReader<R> {
    fn new(inner: R, size: u64) -> Self {
        Self {
            inner,
            remaining: size,
        }
    }
}

impl<R: Read> Read for SizedReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }

        if self.remaining == 0 {
            let mut extra = [0u8; 1];
            return match self.inner.read(&mut extra)? {
                0 => Ok(0),
                _ => Err(io::Error::new(
                    io::ErrorKind::InvalidData,
                    "file grew while it was being archived",
                )),
            };
        }

        let limit = usize::try_from(self.remaining).unwrap_or(usize::MAX).min(buf.len());
        let read = self.inner.read(&mut buf[..limit])?;
        if read == 0 {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                format!("file shrank by {} bytes while it was being archived", self.remaining),
            ));
        }
        self.remaining -= read as u64;
        Ok(read)
    }
}

/// Record name for a walked path: forward slashes, no leading separator.
fn archive_name(path: &Path) -> String {
    let name = path.to_string_lossy().replace('\\', "/");
    name.trim_start_matches('/').to_string()
}

/// Recreate every record read from `source` below `destination`.
///
/// An empty `destination` unpacks relative to the current directory.
pub(crate) fn unpack<R: Read>(destination: &Path, source: R) -> Result<()> {
    let root = if destination.as_os_str().is_empty() {
        Path::new(".")
    } else {
        destination
    };

    let mut archive = tar::Archive::new(source);
    let entries = archive.entries().map_err(|e| Error::archive(root, e))?;

    for entry in entries {
        let mut entry = entry.map_err(|e| Error::archive(root, e))?;
        let name = entry.path().map_err(|e| Error::archive(root, e))?.into_owned();

        let relative = match relative_name(&name) {
            Some(relative) if relative.as_os_str().is_empty() => continue,
            Some(relative) => relative,
            None => {
                warn!(name = %name.display(), "Skipping entry outside of the destination");
                continue;
            }
        };
        let target = root.join(&relative);
        let entry_type = entry.header().entry_type();

        // Only a regular file is written through its own final component.
        let guarded = match entry_type {
            EntryType::Regular => Some(relative.as_path()),
            EntryType::Symlink | EntryType::Directory => relative.parent(),
            _ => None,
        };
        if let Some(link) = guarded.and_then(|path| first_symlink(root, path)) {
            warn!(
                name = %name.display(),
                symlink = %link.display(),
                "Skipping entry below a symlink"
            );
            continue;
        }

        match entry_type {
            EntryType::Symlink => {
                let link = entry
                    .link_name()
                    .map_err(|e| Error::archive(&target, e))?
                    .ok_or_else(|| {
                        Error::archive(
                            &target,
                            io::Error::new(io::ErrorKind::InvalidData, "symlink without target"),
                        )
                    })?
                    .into_owned();

                if fs::symlink_metadata(&target).is_ok() {
                    return Err(Error::Conflict(target));
                }

                debug!(path = %target.display(), target = %link.display(), "Creating symlink");
                symlink(&link, &target).map_err(|e| Error::archive(&target, e))?;
            }
            EntryType::Directory => {
                debug!(path = %target.display(), "Creating directory");
                fs::create_dir_all(&target).map_err(|e| Error::archive(&target, e))?;
            }
            EntryType::Regular => {
                debug!(path = %target.display(), size = entry.size(), "Writing file");
                if let Some(parent) = target.parent() {
                    fs::create_dir_all(parent).map_err(|e| Error::archive(parent, e))?;
                }

                // Scoped so the handle is closed before the next record.
                let mut file = File::create(&target).map_err(|e| Error::archive(&target, e))?;
                io::copy(&mut entry, &mut file).map_err(|e| Error::archive(&target, e))?;

                // Also covers files that existed before the restore.
                #[cfg(unix)]
                if let Ok(mode) = entry.header().mode() {
                    use std::os::unix::fs::PermissionsExt;
                    fs::set_permissions(&target, fs::Permissions::from_mode(mode & 0o7777))
                        .map_err(|e| Error::archive(&target, e))?;
                }
            }
            other => {
                debug!(path = %target.display(), entry_type = ?other, "Skipping unsupported entry");
            }
        }
    }

    Ok(())
}

/// Strip `.` components; `None` if the name escapes the destination.
fn relative_name(name: &Path) -> Option<PathBuf> {
    let mut relative = PathBuf::new();
    for component in name.components() {
        match component {
            Component::Normal(part) => relative.push(part),
            Component::CurDir => {}
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => return None,
        }
    }
    Some(relative)
}

/// First existing symlink among `relative`'s components below `root`.
fn first_symlink(root: &Path, relative: &Path) -> Option<PathBuf> {
    let mut current = root.to_path_buf();
    for component in relative.components() {
        current.push(component);
        match fs::symlink_metadata(&current) {
            Ok(meta) if meta.file_type().is_symlink() => return Some(current),
            Ok(_) => {}
            Err(_) => return None,
        }
    }
    None
}

#[cfg(unix)]
fn symlink(link: &Path, target: &Path) -> io::Result<()> {
    std::os::unix::fs::symlink(link, target)
}

#[cfg(windows)]
fn symlink(link: &Path, target: &Path) -> io::Result<()> {
    std::os::windows::fs::symlink_file(link, target)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write(path: &Path, contents: &str) {
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, contents).unwrap();
    }

    fn pack_to_vec(sources: &[PathBuf]) -> Vec<u8> {
        let mut buf = Vec::new();
        pack(sources, &mut buf).unwrap();
        buf
    }

    fn entry_names(archive: &[u8]) -> Vec<String> {
        let mut archive = tar::Archive::new(archive);
        archive
            .entries()
            .unwrap()
            .map(|e| e.unwrap().path().unwrap().to_string_lossy().into_owned())
            .collect()
    }

    #[test]
    fn test_archive_name_strips_leading_separator() {
        assert_eq!(archive_name(Path::new("/var/cache/deps")), "var/cache/deps");
        assert_eq!(archive_name(Path::new("node_modules/a")), "node_modules/a");
    }

    #[test]
    fn test_pack_walks_in_sorted_pre_order() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("src");
        write(&src.join("b.txt"), "b");
        write(&src.join("a/inner.txt"), "inner");
        write(&src.join("c.txt"), "c");

        let archive = pack_to_vec(&[src.clone()]);
        let base = archive_name(&src);
        assert_eq!(
            entry_names(&archive),
            vec![
                base.clone(),
                format!("{base}/a"),
                format!("{base}/a/inner.txt"),
                format!("{base}/b.txt"),
                format!("{base}/c.txt"),
            ]
        );
    }

    #[test]
    fn test_pack_fails_fast_on_missing_source() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("missing");
        let mut buf = Vec::new();
        let err = pack(&[missing.clone()], &mut buf).unwrap_err();
        match err {
            Error::Archive { path, source } => {
                assert_eq!(path, missing);
                assert_eq!(source.kind(), io::ErrorKind::NotFound);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_unpack_restores_relative_to_destination() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("deps");
        write(&src.join("lib/a.rs"), "pub fn a() {}");
        let archive = pack_to_vec(&[src.clone()]);

        let dest = dir.path().join("restore");
        fs::create_dir_all(&dest).unwrap();
        unpack(&dest, archive.as_slice()).unwrap();

        let restored = dest.join(archive_name(&src)).join("lib/a.rs");
        assert_eq!(fs::read_to_string(restored).unwrap(), "pub fn a() {}");
    }

    #[test]
    fn test_unpack_truncates_existing_files() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("data");
        write(&src.join("file.txt"), "new");
        let archive = pack_to_vec(&[src.clone()]);

        let dest = dir.path().join("out");
        let existing = dest.join(archive_name(&src)).join("file.txt");
        write(&existing, "old contents that are longer");

        unpack(&dest, archive.as_slice()).unwrap();
        assert_eq!(fs::read_to_string(existing).unwrap(), "new");
    }

    #[cfg(unix)]
    #[test]
    fn test_unpack_symlink_conflict() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("linked");
        write(&src.join("target.txt"), "t");
        std::os::unix::fs::symlink("target.txt", src.join("link")).unwrap();
        let archive = pack_to_vec(&[src.clone()]);

        let dest = dir.path().join("out");
        unpack(&dest, archive.as_slice()).unwrap();

        let err = unpack(&dest, archive.as_slice()).unwrap_err();
        assert!(matches!(err, Error::Conflict(_)), "unexpected error: {err}");
    }

    #[test]
    fn test_unpack_skips_parent_dir_entries() {
        let mut builder = Builder::new(Vec::new());
        let mut header = Header::new_gnu();
        header.set_entry_type(EntryType::Regular);
        header.set_size(4);
        header.set_mode(0o644);
        // Write the name bytes directly since the builder refuses `..`.
        header.as_gnu_mut().unwrap().name[..9].copy_from_slice(b"../escape");
        header.set_cksum();
        builder.append(&header, &b"evil"[..]).unwrap();
        let archive = builder.into_inner().unwrap();

        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("out");
        fs::create_dir_all(&dest).unwrap();
        unpack(&dest, archive.as_slice()).unwrap();

        assert!(!dir.path().join("escape").exists());
    }

    #[test]
    fn test_unpack_empty_stream_is_success() {
        let dir = tempfile::tempdir().unwrap();
        unpack(dir.path(), io::empty()).unwrap();
    }

    fn header(entry_type: EntryType, size: u64) -> Header {
        let mut header = Header::new_gnu();
        header.set_entry_type(entry_type);
        header.set_size(size);
        header.set_mode(0o644);
        header
    }

    fn append_file(builder: &mut Builder<Vec<u8>>, name: &str, contents: &[u8]) {
        let mut file = header(EntryType::Regular, contents.len() as u64);
        builder.append_data(&mut file, name, contents).unwrap();
    }

    #[test]
    fn test_sized_reader_rejects_size_changes() {
        let mut exact = SizedReader::new(&b"abcd"[..], 4);
        let mut out = Vec::new();
        exact.read_to_end(&mut out).unwrap();
        assert_eq!(out, b"abcd");

        let mut shrunk = SizedReader::new(&b"ab"[..], 4);
        let err = shrunk.read_to_end(&mut Vec::new()).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::UnexpectedEof);

        let mut grown = SizedReader::new(&b"abcdef"[..], 4);
        let err = grown.read_to_end(&mut Vec::new()).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_pack_fails_when_file_size_disagrees_with_metadata() {
        // procfs reports a zero length but yields content when read.
        let stat = PathBuf::from("/proc/self/stat");
        let err = pack(&[stat.clone()], Vec::new()).unwrap_err();
        match err {
            Error::Archive { path, .. } => assert_eq!(path, stat),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[cfg(unix)]
    #[test]
    fn test_unpack_skips_entries_below_symlinks() {
        let dir = tempfile::tempdir().unwrap();
        let outside = dir.path().join("outside");
        fs::create_dir_all(&outside).unwrap();
        fs::write(outside.join("victim.txt"), "untouched").unwrap();

        let mut builder = Builder::new(Vec::new());
        let mut link = header(EntryType::Symlink, 0);
        builder.append_link(&mut link, "link", &outside).unwrap();
        append_file(&mut builder, "link/pwned", b"evil");
        let mut nested = header(EntryType::Directory, 0);
        builder.append_data(&mut nested, "link/nested", io::empty()).unwrap();
        let mut alias = header(EntryType::Symlink, 0);
        builder.append_link(&mut alias, "alias", outside.join("victim.txt")).unwrap();
        append_file(&mut builder, "alias", b"overwritten");
        append_file(&mut builder, "kept.txt", b"kept");
        let archive = builder.into_inner().unwrap();

        let dest = dir.path().join("out");
        fs::create_dir_all(&dest).unwrap();
        unpack(&dest, archive.as_slice()).unwrap();

        assert!(fs::symlink_metadata(dest.join("link")).unwrap().file_type().is_symlink());
        assert!(!outside.join("pwned").exists());
        assert!(!outside.join("nested").exists());
        assert_eq!(fs::read_to_string(outside.join("victim.txt")).unwrap(), "untouched");
        assert_eq!(fs::read_to_string(dest.join("kept.txt")).unwrap(), "kept");
    }

    #[test]
    fn test_unpack_skips_unsupported_entry_types() {
        let mut builder = Builder::new(Vec::new());
        append_file(&mut builder, "first.txt", b"first");

        let mut fifo = header(EntryType::Fifo, 0);
        builder.append_data(&mut fifo, "queue", io::empty()).unwrap();
        let mut device = header(EntryType::Char, 0);
        builder.append_data(&mut device, "tty", io::empty()).unwrap();
        let mut hard = header(EntryType::Link, 0);
        builder.append_link(&mut hard, "hardlink", "first.txt").unwrap();

        append_file(&mut builder, "second.txt", b"second");
        let archive = builder.into_inner().unwrap();

        let dir = tempfile::tempdir().unwrap();
        unpack(dir.path(), archive.as_slice()).unwrap();

        assert_eq!(fs::read_to_string(dir.path().join("first.txt")).unwrap(), "first");
        assert_eq!(fs::read_to_string(dir.path().join("second.txt")).unwrap(), "second");
        for skipped in ["queue", "tty", "hardlink"] {
            let created = fs::symlink_metadata(dir.path().join(skipped)).is_ok();
            assert!(!created, "{skipped} was created");
        }
    }

    /// Restores the working directory when dropped.
    struct CurrentDir(PathBuf);

    impl Drop for CurrentDir {
        fn drop(&mut self) {
            let _ = std::env::set_current_dir(&self.0);
        }
    }

    #[test]
    fn test_unpack_empty_destination_uses_current_directory() {
        let mut builder = Builder::new(Vec::new());
        append_file(&mut builder, "restored/file.txt", b"here");
        let archive = builder.into_inner().unwrap();

        let dir = tempfile::tempdir().unwrap();
        let _guard = CurrentDir(std::env::current_dir().unwrap());
        std::env::set_current_dir(dir.path()).unwrap();

        unpack(Path::new(""), archive.as_slice()).unwrap();
        assert_eq!(
            fs::read_to_string(dir.path().join("restored/file.txt")).unwrap(),
            "here"
        );
    }

    #[cfg(unix)]
    #[test]
    fn test_unpack_restores_mode_of_existing_files() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("bin");
        write(&src.join("tool.sh"), "#!/bin/sh\n");
        fs::set_permissions(src.join("tool.sh"), fs::Permissions::from_mode(0o755)).unwrap();
        let archive = pack_to_vec(&[src.clone()]);

        let dest = dir.path().join("out");
        let existing = dest.join(archive_name(&src)).join("tool.sh");
        write(&existing, "stale");
        fs::set_permissions(&existing, fs::Permissions::from_mode(0o600)).unwrap();

        unpack(&dest, archive.as_slice()).unwrap();
        let mode = fs::metadata(&existing).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o755);
        assert_eq!(fs::read_to_string(existing).unwrap(), "#!/bin/sh\n");
    }
}
