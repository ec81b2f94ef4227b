//! Tar streams used to move filesystem trees into and out of containers.
//!
//! Packing and unpacking are blocking; async callers go through `spawn_blocking`.

use std::{
    fs::{self, File},
    io::{self, Read},
    path::{Component, Path, PathBuf},
    time::{SystemTime, UNIX_EPOCH},
};

use tar::{Archive, Builder, EntryType, Header};
use thiserror::Error;

/// Largest single file accepted when unpacking on the host.
pub const MAX_FILE_SIZE_BYTES: u64 = 50 * 1024 * 1024;

#[derive(Debug, Error)]
pub enum ArchiveError {
    #[error("could not read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("illegal path in archive: {0}")]
    IllegalPath(String),
    #[error("archive entry {path} is {size} bytes, limit is {MAX_FILE_SIZE_BYTES}")]
    TooLarge { path: String, size: u64 },
    #[error("archive io: {0}")]
    Io(#[from] io::Error),
}

/// Build a tar archive of `src`.
///
/// Entry names keep `src` as given, normalised to a relative path (root stripped,
/// `..` folded), so unpacking into a directory `D` recreates the tree at `D/src`.
/// A `src` of `.` puts the contents directly under `D`.
pub fn pack(src: &Path) -> Result<Vec<u8>, ArchiveError> {
    let meta = fs::metadata(src).map_err(|source| ArchiveError::Read {
        path: src.to_path_buf(),
        source,
    })?;
    let name = entry_name(src);

    let mut builder = Builder::new(Vec::new());
    builder.follow_symlinks(false);
    if meta.is_dir() {
        builder.append_dir_all(&name, src)?;
    } else {
        builder.append_path_with_name(src, &name)?;
    }
    Ok(builder.into_inner()?)
}

/// Extract a tar stream under `base`.
///
/// Every entry is resolved lexically against `base` first; an entry that would land
/// outside of it aborts the extraction. Only directories and regular files are written.
pub fn unpack<R: Read>(reader: R, base: &Path) -> Result<(), ArchiveError> {
    fs::create_dir_all(base)?;
    let mut archive = Archive::new(reader);

    for entry in archive.entries()? {
        let mut entry = entry?;
        let name = entry.path()?.into_owned();
        let target = sanitize_path(base, &name)?;

        match entry.header().entry_type() {
            EntryType::Directory => fs::create_dir_all(&target)?,
            EntryType::Regular | EntryType::Continuous => {
                let size = entry.header().size()?;
                if size > MAX_FILE_SIZE_BYTES {
                    return Err(ArchiveError::TooLarge {
                        path: name.display().to_string(),
                        size,
                    });
                }
                if let Some(parent) = target.parent() {
                    fs::create_dir_all(parent)?;
                }
                let mut file = File::create(&target)?;
                io::copy(&mut entry, &mut file)?;
            }
            _ => {}
        }
    }
    Ok(())
}

/// Rewrite `archive` so every entry sits under the in-container directory `dir`.
///
/// The result carries a directory entry for each component of `dir` and is meant to be
/// extracted at `/`, so the target directory does not need to exist beforehand.
/// Entries escaping `dir` are rejected.
pub fn reroot(archive: &[u8], dir: &str) -> Result<Vec<u8>, ArchiveError> {
    let prefix = sanitize_path(Path::new(""), Path::new(dir))?;
    let mut builder = Builder::new(Vec::new());

    let mut parent = PathBuf::new();
    for component in prefix.components() {
        parent.push(component);
        let mut header = Header::new_gnu();
        header.set_entry_type(EntryType::Directory);
        header.set_mode(0o755);
        header.set_size(0);
        header.set_mtime(now());
        builder.append_data(&mut header, &parent, io::empty())?;
    }

    let mut source = Archive::new(archive);
    for entry in source.entries()? {
        let mut entry = entry?;
        let name = sanitize_path(&prefix, &entry.path()?)?;
        let mut header = entry.header().clone();
        match header.entry_type() {
            EntryType::Directory => builder.append_data(&mut header, &name, io::empty())?,
            EntryType::Regular | EntryType::Continuous => {
                builder.append_data(&mut header, &name, &mut entry)?
            }
            EntryType::Symlink => match entry.link_name()? {
                Some(target) => {
                    let target = target.into_owned();
                    builder.append_link(&mut header, &name, target)?
                }
                None => return Err(ArchiveError::IllegalPath(name.display().to_string())),
            },
            _ => {}
        }
    }
    Ok(builder.into_inner()?)
}

fn now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |d| d.as_secs())
}

/// Resolve `name` under `base` without touching the filesystem.
///
/// Root and prefix components are dropped, `.` is ignored and `..` pops a component.
/// Popping past `base` is an [`ArchiveError::IllegalPath`].
pub fn sanitize_path(base: &Path, name: &Path) -> Result<PathBuf, ArchiveError> {
    let mut rel = PathBuf::new();
    for component in name.components() {
        match component {
            Component::Normal(part) => rel.push(part),
            Component::CurDir | Component::RootDir | Component::Prefix(_) => {}
            Component::ParentDir => {
                if !rel.pop() {
                    return Err(ArchiveError::IllegalPath(name.display().to_string()));
                }
            }
        }
    }
    Ok(base.join(rel))
}

fn entry_name(src: &Path) -> PathBuf {
    let mut name = PathBuf::new();
    for component in src.components() {
        match component {
            Component::Normal(part) => name.push(part),
            Component::ParentDir => {
                name.pop();
            }
            Component::CurDir | Component::RootDir | Component::Prefix(_) => {}
        }
    }
    if name.as_os_str().is_empty() {
        PathBuf::from(".")
    } else {
        name
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn archive_with(name: &str, body: &[u8]) -> Vec<u8> {
        let mut header = Header::new_gnu();
        header.set_size(body.len() as u64);
        header.set_mode(0o644);
        header.set_entry_type(EntryType::Regular);
        // `set_path` refuses `..`; write the raw name to build hostile archives.
        let raw = &mut header.as_old_mut().name;
        raw[..name.len()].copy_from_slice(name.as_bytes());
        header.set_cksum();

        let mut builder = Builder::new(Vec::new());
        builder.append(&header, body).unwrap();
        builder.into_inner().unwrap()
    }

    #[test]
    fn sanitize_keeps_paths_inside_base() {
        let base = Path::new("/tmp/base");
        assert_eq!(
            sanitize_path(base, Path::new("a/b.txt")).unwrap(),
            base.join("a/b.txt")
        );
        assert_eq!(
            sanitize_path(base, Path::new("./a/../c.txt")).unwrap(),
            base.join("c.txt")
        );
        assert_eq!(
            sanitize_path(base, Path::new("/etc/passwd")).unwrap(),
            base.join("etc/passwd")
        );
    }

    #[test]
    fn sanitize_rejects_traversal() {
        let base = Path::new("/tmp/base");
        assert!(matches!(
            sanitize_path(base, Path::new("../escape.txt")),
            Err(ArchiveError::IllegalPath(_))
        ));
        assert!(matches!(
            sanitize_path(base, Path::new("a/../../escape.txt")),
            Err(ArchiveError::IllegalPath(_))
        ));
    }

    #[test]
    fn unpack_rejects_hostile_entry() {
        let dir = tempfile::tempdir().unwrap();
        let base = dir.path().join("out");
        let bytes = archive_with("../evil.txt", b"pwned");

        let err = unpack(bytes.as_slice(), &base).unwrap_err();
        assert!(matches!(err, ArchiveError::IllegalPath(_)));
        assert!(!dir.path().join("evil.txt").exists());
    }

    #[test]
    fn pack_then_unpack_directory() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("project");
        fs::create_dir_all(src.join("nested")).unwrap();
        fs::write(src.join("a.txt"), b"alpha").unwrap();
        fs::write(src.join("nested/b.txt"), b"beta").unwrap();

        let bytes = pack(&src).unwrap();
        let out = dir.path().join("out");
        unpack(bytes.as_slice(), &out).unwrap();

        let root = out.join(entry_name(&src));
        assert_eq!(fs::read(root.join("a.txt")).unwrap(), b"alpha");
        assert_eq!(fs::read(root.join("nested/b.txt")).unwrap(), b"beta");
    }

    #[test]
    fn pack_single_file() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("single.txt");
        fs::write(&file, b"one").unwrap();

        let bytes = pack(&file).unwrap();
        let out = dir.path().join("out");
        unpack(bytes.as_slice(), &out).unwrap();
        assert_eq!(fs::read(out.join(entry_name(&file))).unwrap(), b"one");
    }

    #[test]
    fn pack_missing_source_fails() {
        let dir = tempfile::tempdir().unwrap();
        let err = pack(&dir.path().join("testnonexisting")).unwrap_err();
        assert!(matches!(err, ArchiveError::Read { .. }));
    }

    fn entries(bytes: &[u8]) -> Vec<(String, EntryType)> {
        Archive::new(bytes)
            .entries()
            .unwrap()
            .map(|e| {
                let e = e.unwrap();
                let name = e.path().unwrap().to_string_lossy().trim_end_matches('/').to_string();
                (name, e.header().entry_type())
            })
            .collect()
    }

    #[test]
    fn reroot_prefixes_entries_and_adds_parents() {
        let bytes = reroot(&archive_with("report.txt", b"hello"), "/app/out/deep").unwrap();
        assert_eq!(
            entries(&bytes),
            vec![
                ("app".to_string(), EntryType::Directory),
                ("app/out".to_string(), EntryType::Directory),
                ("app/out/deep".to_string(), EntryType::Directory),
                ("app/out/deep/report.txt".to_string(), EntryType::Regular),
            ]
        );

        let dir = tempfile::tempdir().unwrap();
        unpack(bytes.as_slice(), dir.path()).unwrap();
        assert_eq!(fs::read(dir.path().join("app/out/deep/report.txt")).unwrap(), b"hello");
    }

    #[test]
    fn reroot_at_root_keeps_names() {
        let bytes = reroot(&archive_with("a.txt", b"a"), "/").unwrap();
        assert_eq!(entries(&bytes), vec![("a.txt".to_string(), EntryType::Regular)]);
    }

    #[test]
    fn reroot_rejects_escaping_entry() {
        let err = reroot(&archive_with("../../etc/passwd", b"x"), "/app").unwrap_err();
        assert!(matches!(err, ArchiveError::IllegalPath(_)));
    }

    #[test]
    fn entry_names() {
        assert_eq!(entry_name(Path::new(".")), PathBuf::from("."));
        assert_eq!(entry_name(Path::new("./src")), PathBuf::from("src"));
        assert_eq!(entry_name(Path::new("/abs/dir")), PathBuf::from("abs/dir"));
        assert_eq!(entry_name(Path::new("../shared")), PathBuf::from("shared"));
    }
}
