//! The boundary to the logo asset encoder.
//!
//! The converter that turns a bitmap into the controller's packed pixel
//! format lives outside this crate; the installation workflow only needs
//! something that can vet an input file up front and later hand back the
//! encoded bytes. [`RawLogoCodec`] covers assets that were encoded ahead of
//! time.

use std::fs;
use std::path::Path;

use anyhow::{ensure, Context};
use bytes::Bytes;

/// Produces the device-native packed representation of a logo asset.
pub trait LogoCodec {
    /// Check that `path` names a usable asset, before anything is read from
    /// the device.
    fn validate(&self, path: &Path) -> anyhow::Result<()>;

    /// Load the asset and encode it into the packed in-firmware format.
    fn encode(&self, path: &Path) -> anyhow::Result<Bytes>;
}

/// Passthrough codec for assets already in the packed in-firmware format.
pub struct RawLogoCodec;

impl LogoCodec for RawLogoCodec {
    fn validate(&self, path: &Path) -> anyhow::Result<()> {
        let meta = fs::metadata(path)
            .with_context(|| format!("cannot open logo file {}", path.display()))?;
        ensure!(meta.is_file(), "{} is not a file", path.display());
        ensure!(meta.len() > 0, "logo file {} is empty", path.display());
        Ok(())
    }

    fn encode(&self, path: &Path) -> anyhow::Result<Bytes> {
        Ok(fs::read(path)?.into())
    }
}

#[test]
fn test_raw_codec_rejects_missing_file() {
    let codec = RawLogoCodec;
    assert!(codec.validate(Path::new("/nonexistent/logo.bin")).is_err());
    assert!(codec.encode(Path::new("/nonexistent/logo.bin")).is_err());
}
