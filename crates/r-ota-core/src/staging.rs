//! ---
//! ota_section: "01-core-functionality"
//! ota_subsection: "module"
//! ota_type: "source"
//! ota_scope: "code"
//! ota_description: "Staging of compressed update images for the OTA master."
//! ota_version: "v0.0.0-prealpha"
//! ota_owner: "tbd"
//! ---
use std::fs::{self, File};
use std::io::{self, BufReader, BufWriter, Write};
use std::path::Path;

use flate2::read::GzDecoder;
use tracing::debug;

/// Copies an update image to where the OTA master expects it.
pub trait ImageStager {
    /// Stage `image` at `target`, returning the number of bytes written.
    fn stage(&self, image: &Path, target: &Path) -> io::Result<u64>;
}

/// Decompresses a gzip image into the target file.
#[derive(Debug, Clone, Copy, Default)]
pub struct GzipImageStager;

impl ImageStager for GzipImageStager {
    fn stage(&self, image: &Path, target: &Path) -> io::Result<u64> {
        if let Some(parent) = target.parent() {
            if !parent.as_os_str().is_empty() {
                create_private_dir(parent)?;
            }
        }
        let mut decoder = GzDecoder::new(BufReader::new(File::open(image)?));
        let mut writer = BufWriter::new(File::create(target)?);
        let written = io::copy(&mut decoder, &mut writer)?;
        writer.flush()?;
        writer.into_inner()?.sync_all()?;
        debug!(
            image = %image.display(),
            target = %target.display(),
            bytes = written,
            "update image staged"
        );
        Ok(written)
    }
}

#[cfg(unix)]
fn create_private_dir(path: &Path) -> io::Result<()> {
    use std::os::unix::fs::DirBuilderExt;

    fs::DirBuilder::new()
        .recursive(true)
        .mode(0o700)
        .create(path)
}

#[cfg(not(unix))]
fn create_private_dir(path: &Path) -> io::Result<()> {
    fs::create_dir_all(path)
}
