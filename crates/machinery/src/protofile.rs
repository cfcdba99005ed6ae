//! XFS prototype files.
//!
//! `mkfs.xfs -p <protofile>` populates a new file system from a text
//! description of a tree. [`generate`] walks a directory and writes that
//! description: a header for the root, one line per node with files listed
//! before directories at every level, and `$` closing each directory.

use std::fmt::Write as _;
use std::fs::{self, Metadata};
use std::os::unix::fs::{FileTypeExt, MetadataExt};
use std::path::{Path, PathBuf};

use nix::sys::stat::{utimensat, UtimensatFlags};
use nix::sys::time::TimeSpec;

/// Errors generating a protofile.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("{path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    /// The format separates tokens with whitespace.
    #[error("{0}: file names with spaces are not supported")]
    SpaceInName(PathBuf),
    #[error("{0}: unsupported file type")]
    UnsupportedType(PathBuf),
    #[error("{path}: failed to set mtime: {source}")]
    Mtime {
        path: PathBuf,
        #[source]
        source: nix::Error,
    },
}

/// Knobs for [`generate`].
#[derive(Clone, Debug, Default)]
pub struct Options {
    /// Owner recorded for every node instead of the on-disk one.
    pub uid: Option<u32>,
    /// Group recorded for every node instead of the on-disk one.
    pub gid: Option<u32>,
    /// Seconds since the epoch stamped on every node before it is listed.
    pub mtime: Option<i64>,
}

impl Options {
    /// Default options with `mtime` taken from `SOURCE_DATE_EPOCH`.
    pub fn from_env() -> Self {
        Options {
            mtime: std::env::var("SOURCE_DATE_EPOCH")
                .ok()
                .and_then(|v| v.trim().parse().ok()),
            ..Options::default()
        }
    }
}

fn io_error(path: &Path) -> impl FnOnce(std::io::Error) -> Error + '_ {
    move |source| Error::Io {
        path: path.to_path_buf(),
        source,
    }
}

fn mode(kind: char, metadata: &Metadata) -> String {
    let mode = metadata.mode();
    format!(
        "{}{}{}{:03o}",
        kind,
        if mode & 0o4000 != 0 { 'u' } else { '-' },
        if mode & 0o2000 != 0 { 'g' } else { '-' },
        mode & 0o777
    )
}

fn owner(metadata: &Metadata, options: &Options) -> String {
    format!(
        "{} {}",
        options.uid.unwrap_or_else(|| metadata.uid()),
        options.gid.unwrap_or_else(|| metadata.gid())
    )
}

fn stamp(path: &Path, options: &Options) -> Result<(), Error> {
    if let Some(secs) = options.mtime {
        let time = TimeSpec::new(secs, 0);
        utimensat(None, path, &time, &time, UtimensatFlags::NoFollowSymlink).map_err(|source| Error::Mtime {
            path: path.to_path_buf(),
            source,
        })?;
    }
    Ok(())
}

/// Describes the tree under `root`.
pub fn generate(root: &Path, options: &Options) -> Result<String, Error> {
    let metadata = fs::metadata(root).map_err(io_error(root))?;
    if !metadata.is_dir() {
        return Err(Error::UnsupportedType(root.to_path_buf()));
    }
    stamp(root, options)?;

    let mut out = String::new();
    out.push_str("/dev/null\n0 0\n");
    let _ = writeln!(out, "{} {}", mode('d', &metadata), owner(&metadata, options));
    walk(root, 1, options, &mut out)?;
    out.push_str("$\n");
    Ok(out)
}

fn walk(dir: &Path, depth: usize, options: &Options, out: &mut String) -> Result<(), Error> {
    let mut files = Vec::new();
    let mut dirs = Vec::new();
    for entry in fs::read_dir(dir).map_err(io_error(dir))? {
        let entry = entry.map_err(io_error(dir))?;
        let path = entry.path();
        let name = entry.file_name().to_string_lossy().into_owned();
        if name.contains(char::is_whitespace) {
            return Err(Error::SpaceInName(path));
        }
        let metadata = fs::symlink_metadata(&path).map_err(io_error(&path))?;
        if metadata.is_dir() {
            dirs.push((name, path, metadata));
        } else {
            files.push((name, path, metadata));
        }
    }
    files.sort_by(|a, b| a.0.cmp(&b.0));
    dirs.sort_by(|a, b| a.0.cmp(&b.0));

    let indent = " ".repeat(depth * 4);
    for (name, path, metadata) in files {
        stamp(&path, options)?;
        let file_type = metadata.file_type();
        let line = if file_type.is_file() {
            format!("{} {} {}", mode('-', &metadata), owner(&metadata, options), path.display())
        } else if file_type.is_symlink() {
            let target = fs::read_link(&path).map_err(io_error(&path))?;
            format!("{} {} {}", mode('l', &metadata), owner(&metadata, options), target.display())
        } else if file_type.is_block_device() || file_type.is_char_device() {
            let kind = if file_type.is_block_device() { 'b' } else { 'c' };
            let rdev = metadata.rdev();
            format!(
                "{} {} {} {}",
                mode(kind, &metadata),
                owner(&metadata, options),
                nix::sys::stat::major(rdev),
                nix::sys::stat::minor(rdev)
            )
        } else if file_type.is_fifo() {
            format!("{} {}", mode('p', &metadata), owner(&metadata, options))
        } else {
            return Err(Error::UnsupportedType(path));
        };
        let _ = writeln!(out, "{}{} {}", indent, name, line);
    }

    for (name, path, metadata) in dirs {
        stamp(&path, options)?;
        let _ = writeln!(out, "{}{} {} {}", indent, name, mode('d', &metadata), owner(&metadata, options));
        walk(&path, depth + 1, options, out)?;
        let _ = writeln!(out, "{}$", indent);
    }
    Ok(())
}
