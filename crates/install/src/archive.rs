//! Tar packing/unpacking and zstd compression for cached binaries.
//!
//! Everything here is a pure data transform over in-memory buffers; callers
//! decide where the bytes come from and go. Both directions are strict:
//! malformed archives are errors, never partial results.

use crate::{Error, Result};
use std::io::{Read, Write};
use std::path::{Component, Path, PathBuf};
use tar::{Archive, Builder, HeaderMode};
use tracing::{debug, trace};
use walkdir::WalkDir;

/// Largest file `pack` will read, and largest archive `decompress` will produce.
pub const MAX_READ_SIZE: u64 = 30 * 1024 * 1024;

/// Default zstd level for cache writes.
pub const DEFAULT_COMPRESSION_LEVEL: i32 = 3;

/// Options for [`pack`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PackOptions {
    /// Add directories as bare entries without descending into them.
    pub no_dir_recurse: bool,
    /// Reject any file larger than this many bytes.
    pub max_read_size: u64,
}

impl Default for PackOptions {
    fn default() -> Self {
        Self {
            no_dir_recurse: false,
            max_read_size: MAX_READ_SIZE,
        }
    }
}

/// An archive captured in memory.
#[derive(Debug, Clone)]
pub struct PackedArchive {
    /// The tar bytes.
    pub bytes: Vec<u8>,
    /// Total length of `bytes`.
    pub len: u64,
}

/// Result of [`unpack`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UnpackSummary {
    /// Files written, in archive order.
    pub files: Vec<PathBuf>,
    /// Entries ignored (non-files and filtered-out files).
    pub skipped: usize,
}

fn check_size(path: &Path, size: u64, limit: u64) -> Result<()> {
    if size > limit {
        return Err(Error::FileTooLarge {
            path: path.to_path_buf(),
            size,
            limit,
        });
    }
    Ok(())
}

/// Pack `entries` (relative to `cwd`) into an in-memory tar archive.
pub fn pack<P: AsRef<Path>>(cwd: &Path, entries: &[P], options: &PackOptions) -> Result<PackedArchive> {
    let mut builder = Builder::new(Vec::new());
    builder.mode(HeaderMode::Deterministic);

    for entry in entries {
        let name = entry.as_ref();
        let source = cwd.join(name);
        let meta = std::fs::metadata(&source).map_err(|e| Error::io(e, &source, "stat"))?;

        if meta.is_file() {
            check_size(&source, meta.len(), options.max_read_size)?;
            trace!(path = %source.display(), size = meta.len(), "Packing file");
            builder
                .append_path_with_name(&source, name)
                .map_err(|e| Error::io(e, &source, "tar_append"))?;
        } else if meta.is_dir() && options.no_dir_recurse {
            builder
                .append_dir(name, &source)
                .map_err(|e| Error::io(e, &source, "tar_append_dir"))?;
        } else if meta.is_dir() {
            for walked in WalkDir::new(&source).sort_by_file_name() {
                let walked = walked.map_err(|e| Error::archive(format!("walk failed: {e}")))?;
                let rel = walked
                    .path()
                    .strip_prefix(cwd)
                    .map_err(|e| Error::archive(e.to_string()))?;
                if walked.file_type().is_dir() {
                    builder
                        .append_dir(rel, walked.path())
                        .map_err(|e| Error::io(e, walked.path(), "tar_append_dir"))?;
                } else {
                    let size = walked
                        .metadata()
                        .map_err(|e| Error::archive(format!("stat failed: {e}")))?
                        .len();
                    check_size(walked.path(), size, options.max_read_size)?;
                    builder
                        .append_path_with_name(walked.path(), rel)
                        .map_err(|e| Error::io(e, walked.path(), "tar_append"))?;
                }
            }
        }
    }

    let bytes = builder
        .into_inner()
        .map_err(|e| Error::archive(format!("tar finalize failed: {e}")))?;
    let len = bytes.len() as u64;
    debug!(entries = entries.len(), len, "Packed archive");
    Ok(PackedArchive { bytes, len })
}

/// Compress with zstd, pledging the exact source size to the encoder.
pub fn compress(data: &[u8], level: i32) -> Result<Vec<u8>> {
    let map = |e: std::io::Error| Error::archive(format!("zstd encode failed: {e}"));
    let mut encoder = zstd::Encoder::new(Vec::with_capacity(data.len() / 2), level).map_err(map)?;
    encoder
        .set_pledged_src_size(Some(data.len() as u64))
        .map_err(map)?;
    encoder.include_contentsize(true).map_err(map)?;
    encoder.write_all(data).map_err(map)?;
    encoder.finish().map_err(map)
}

/// Decompress zstd data, refusing to produce more than `max_size` bytes.
pub fn decompress(data: &[u8], max_size: u64) -> Result<Vec<u8>> {
    let decoder = zstd::Decoder::new(data)
        .map_err(|e| Error::archive(format!("zstd decode failed: {e}")))?;
    let mut out = Vec::new();
    decoder
        .take(max_size.saturating_add(1))
        .read_to_end(&mut out)
        .map_err(|e| Error::archive(format!("zstd decode failed: {e}")))?;
    if out.len() as u64 > max_size {
        return Err(Error::archive(format!(
            "decompressed archive exceeds {max_size} bytes"
        )));
    }
    Ok(out)
}

fn open_strict(data: &[u8]) -> Archive<&[u8]> {
    let mut archive = Archive::new(data);
    archive.set_ignore_zeros(false);
    archive.set_overwrite(true);
    archive
}

/// Count regular-file entries in a tar archive.
pub fn count_files(data: &[u8]) -> Result<usize> {
    let mut archive = open_strict(data);
    let mut count = 0;
    for entry in archive
        .entries()
        .map_err(|e| Error::archive(format!("failed to read tar: {e}")))?
    {
        let entry = entry.map_err(|e| Error::archive(format!("failed to read tar entry: {e}")))?;
        if entry.header().entry_type().is_file() {
            count += 1;
        }
    }
    Ok(count)
}

/// Unpack file entries from a tar archive into `dest`.
///
/// `filter` receives each file entry's archive path and returns its
/// destination relative to `dest`, or `None` to skip it. Directories and
/// links are never written.
pub fn unpack<F>(data: &[u8], dest: &Path, mut filter: F) -> Result<UnpackSummary>
where
    F: FnMut(&Path) -> Option<PathBuf>,
{
    let mut archive = open_strict(data);
    let mut summary = UnpackSummary::default();

    for entry in archive
        .entries()
        .map_err(|e| Error::archive(format!("failed to read tar: {e}")))?
    {
        let mut entry =
            entry.map_err(|e| Error::archive(format!("failed to read tar entry: {e}")))?;
        let kind = entry.header().entry_type();
        let path = entry
            .path()
            .map_err(|e| Error::archive(format!("invalid path in tar: {e}")))?
            .into_owned();

        if !kind.is_file() {
            trace!(path = %path.display(), ?kind, "Skipping non-file entry");
            summary.skipped += 1;
            continue;
        }
        let Some(target) = filter(&path) else {
            summary.skipped += 1;
            continue;
        };
        if target
            .components()
            .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir))
        {
            return Err(Error::archive(format!(
                "refusing to unpack outside destination: {}",
                target.display()
            )));
        }

        let out = dest.join(&target);
        if let Some(parent) = out.parent() {
            std::fs::create_dir_all(parent).map_err(|e| Error::io(e, parent, "create_dir_all"))?;
        }
        entry
            .unpack(&out)
            .map_err(|e| Error::io(e, &out, "tar_unpack"))?;
        trace!(from = %path.display(), to = %out.display(), "Unpacked file");
        summary.files.push(out);
    }

    Ok(summary)
}

/// Unpack an archive that must hold exactly one file, writing it to `install_path`.
///
/// The entry is renamed to `install_path`'s file name regardless of its
/// name in the archive.
pub fn unpack_single_file(data: &[u8], install_path: &Path) -> Result<()> {
    let count = count_files(data)?;
    if count != 1 {
        return Err(Error::invalid_cache(format!(
            "expected exactly one file in cached archive, found {count}"
        )));
    }

    let (Some(dir), Some(name)) = (install_path.parent(), install_path.file_name()) else {
        return Err(Error::invalid_argument(format!(
            "install path '{}' has no file name",
            install_path.display()
        )));
    };
    let name = PathBuf::from(name);
    let summary = unpack(data, dir, |_| Some(name.clone()))?;
    debug!(path = %install_path.display(), skipped = summary.skipped, "Restored binary");
    Ok(())
}
