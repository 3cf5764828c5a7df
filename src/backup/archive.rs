// pgbackuptool/src/backup/archive.rs
use anyhow::{Context, Result};
use flate2::Compression;
use flate2::write::GzEncoder;
use std::fs::File;
use std::io;
use std::path::{Path, PathBuf};

use crate::errors::Result as CoreResult;

/// Streams a dump body through a gzip encoder into `dest`.
///
/// The caller provides `write_body`, which receives the compressing sink and
/// produces the raw dump bytes. On success the file is flushed to disk and
/// its final compressed size is returned. On failure the partially written
/// file is left in place for the caller to handle.
pub fn compress_stream_to_file<F>(dest: &Path, write_body: F) -> CoreResult<u64>
where
    F: FnOnce(&mut dyn io::Write) -> CoreResult<()>,
{
    if let Some(parent) = dest.parent() {
        if !parent.exists() {
            std::fs::create_dir_all(parent).with_context(|| {
                format!(
                    "Failed to create parent directory for archive: {}",
                    parent.display()
                )
            })?;
        }
    }

    let dest_file = File::create(dest)
        .with_context(|| format!("Failed to create archive file: {}", dest.display()))?;
    let mut encoder = GzEncoder::new(dest_file, Compression::default());

    write_body(&mut encoder)?;

    let dest_file = encoder.finish().with_context(|| {
        format!("Failed to finish Gzip encoding for archive: {}", dest.display())
    })?;
    dest_file
        .sync_all()
        .with_context(|| format!("Failed to sync archive file: {}", dest.display()))?;

    let size = dest_file
        .metadata()
        .with_context(|| format!("Failed to stat archive file: {}", dest.display()))?
        .len();
    Ok(size)
}

/// Decompresses a GZipped artifact to `dest_path`.
///
/// # Arguments
/// * `archive_path` - Path to the `.gz` artifact file.
/// * `dest_path` - Where the decompressed body will be written.
///
/// # Returns
/// Path to the decompressed file.
pub fn decompress_gz_file(archive_path: &Path, dest_path: &Path) -> Result<PathBuf> {
    if !archive_path.is_file() {
        return Err(anyhow::anyhow!(
            "Archive for extraction is not a file: {}",
            archive_path.display()
        ));
    }

    let archive_file = File::open(archive_path)
        .with_context(|| format!("Failed to open archive file: {}", archive_path.display()))?;
    let mut decoder = flate2::read::GzDecoder::new(archive_file);

    let mut dest_file = File::create(dest_path)
        .with_context(|| format!("Failed to create destination file: {}", dest_path.display()))?;
    io::copy(&mut decoder, &mut dest_file).with_context(|| {
        format!(
            "Failed to decompress archive {} to {}",
            archive_path.display(),
            dest_path.display()
        )
    })?;

    Ok(dest_path.to_path_buf())
}
