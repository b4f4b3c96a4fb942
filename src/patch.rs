//! Minimal-footprint patch planning.
//!
//! The flash erases in whole sectors, and the logo sits inside a region that
//! is only so large before adjacent firmware logic begins. The planner
//! splices a validated asset into the in-memory image and produces the
//! single erase-aligned sector that has to be rewritten; every other byte of
//! the device is left alone, both to avoid corrupting unrelated firmware
//! state and to avoid needless flash wear. It never touches the device
//! itself; writing the block is the transport's job.

use thiserror::Error;

use crate::catalog::FirmwareProfile;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum PatchError {
    /// The encoded asset would overrun the space reserved for the logo and
    /// silently corrupt whatever firmware logic follows it.
    #[error("encoded logo is {len} bytes, exceeding the {max} byte logo area")]
    TooLarge { len: usize, max: usize },

    /// The patched window would cross out of its erase sector. Multi-sector
    /// writes are unsupported; fail rather than truncate or wrap.
    #[error("patched window {start:#x}..{end:#x} crosses a {sector_size} byte sector boundary")]
    SpansSectorBoundary {
        start: usize,
        end: usize,
        sector_size: usize,
    },

    /// The profile's logo sector does not fit the image. Unreachable with a
    /// correctly curated catalog.
    #[error("logo offset {offset:#x} does not fit the {image_len:#x} byte image")]
    OutOfRange { offset: usize, image_len: usize },
}

/// One erase/write unit of the patched image, ready to hand to the
/// transport.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct PatchBlock {
    /// Sector-aligned device address of the block.
    pub address: usize,

    /// Exactly one sector of image content, containing the patched window.
    pub data: Vec<u8>,
}

/// Splice `asset` into `image` at the profile's logo offset and return the
/// single sector-aligned block that must be rewritten to apply it.
///
/// On any rejection, `image` is left byte-for-byte unchanged.
pub fn plan(
    image: &mut [u8],
    profile: &FirmwareProfile,
    asset: &[u8],
    sector_size: usize,
) -> Result<PatchBlock, PatchError> {
    if asset.len() > profile.max_logo_len {
        return Err(PatchError::TooLarge {
            len: asset.len(),
            max: profile.max_logo_len,
        });
    }

    let start = profile.logo_offset;
    let end = start + asset.len();
    let address = (start / sector_size) * sector_size;

    if end > address + sector_size {
        return Err(PatchError::SpansSectorBoundary {
            start,
            end,
            sector_size,
        });
    }
    if address + sector_size > image.len() {
        return Err(PatchError::OutOfRange {
            offset: start,
            image_len: image.len(),
        });
    }

    image[start..end].copy_from_slice(asset);

    Ok(PatchBlock {
        address,
        data: image[address..address + sector_size].to_vec(),
    })
}

#[cfg(test)]
fn test_profile(logo_offset: usize, max_logo_len: usize) -> FirmwareProfile {
    FirmwareProfile {
        name: "test".to_string(),
        logo_offset,
        hdmi_string_offset: 0,
        max_logo_len,
        fingerprints: vec![],
    }
}

#[cfg(test)]
fn patterned_image(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i * 31) as u8).collect()
}

#[test]
fn test_block_is_sector_aligned() {
    let mut image = patterned_image(512 * 1024);
    let profile = test_profile(0x260D8, 1507);
    let asset = vec![0xAB; 903];

    let block = plan(&mut image, &profile, &asset, 4096).unwrap();
    assert_eq!(block.address, 0x26000);
    assert_eq!(block.data.len(), 4096);

    // 0x260D8 + 903 = 0x2645F, comfortably inside [0x26000, 0x27000).
    assert!(profile.logo_offset + asset.len() <= block.address + 4096);
}

#[test]
fn test_no_collateral_damage() {
    let original = patterned_image(512 * 1024);
    let mut image = original.clone();
    let profile = test_profile(0x260D8, 1507);
    let asset: Vec<u8> = (0..903).map(|i| (i ^ 0x5A) as u8).collect();

    let block = plan(&mut image, &profile, &asset, 4096).unwrap();

    // The patched window holds exactly the asset...
    let window = profile.logo_offset - block.address;
    assert_eq!(&block.data[window..window + asset.len()], &asset[..]);

    // ...the rest of the block matches the original image...
    assert_eq!(&block.data[..window], &original[block.address..profile.logo_offset]);
    assert_eq!(
        &block.data[window + asset.len()..],
        &original[profile.logo_offset + asset.len()..block.address + 4096]
    );

    // ...and the image is untouched outside the window.
    assert_eq!(&image[..profile.logo_offset], &original[..profile.logo_offset]);
    assert_eq!(
        &image[profile.logo_offset + asset.len()..],
        &original[profile.logo_offset + asset.len()..]
    );
}

#[test]
fn test_oversized_asset_is_rejected_without_mutation() {
    let original = patterned_image(512 * 1024);
    let mut image = original.clone();
    let profile = test_profile(0x260D8, 1507);
    let asset = vec![0u8; 1508];

    let err = plan(&mut image, &profile, &asset, 4096).unwrap_err();
    assert_eq!(err, PatchError::TooLarge { len: 1508, max: 1507 });
    assert_eq!(image, original);
}

#[test]
fn test_sector_spanning_asset_is_rejected_without_mutation() {
    let original = patterned_image(512 * 1024);
    let mut image = original.clone();

    // A budget large enough that only the sector-boundary check can trip.
    let profile = test_profile(0x260D8, 8192);
    let asset = vec![0u8; 6000];

    let err = plan(&mut image, &profile, &asset, 4096).unwrap_err();
    assert_eq!(
        err,
        PatchError::SpansSectorBoundary {
            start: 0x260D8,
            end: 0x260D8 + 6000,
            sector_size: 4096,
        }
    );
    assert_eq!(image, original);
}

#[test]
fn test_logo_sector_must_fit_image() {
    let mut image = patterned_image(4096);
    let profile = test_profile(0x1000, 16);

    let err = plan(&mut image, &profile, &[1, 2, 3], 4096).unwrap_err();
    assert!(matches!(err, PatchError::OutOfRange { .. }));
}

#[test]
fn test_exact_budget_and_sector_fit_are_accepted() {
    let mut image = patterned_image(64 * 1024);

    // Window ends exactly on the sector boundary.
    let profile = test_profile(0x1F00, 256);
    let block = plan(&mut image, &profile, &vec![0xEE; 256], 4096).unwrap();
    assert_eq!(block.address, 0x1000);
    assert_eq!(&image[0x1F00..0x2000], &[0xEE; 256][..]);
}
