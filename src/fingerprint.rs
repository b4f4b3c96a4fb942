//! Skip-aware firmware fingerprinting.
//!
//! A build is recognized by SHA-256 digests over regions of the raw image.
//! The catch is that two flashes running the *same* build are not
//! byte-identical: panel calibration constants, the source-label string, the
//! palette, and the boot logo itself all vary per device. Each region
//! therefore carries a table of skip spans whose bytes are elided from the
//! hash input entirely. An elided byte never reaches the hasher, so images
//! differing only inside skip spans digest identically; and because skip
//! spans have fixed lengths, the surviving bytes always line up the same way
//! from image to image. This is deliberately not a mask-with-zeros scheme.

use anyhow::ensure;
use sha2::{Digest, Sha256};
use thiserror::Error;

/// A contiguous byte span excluded from hashing because its content is known
/// to vary across otherwise-identical builds.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct HashSkip {
    pub offset: usize,
    pub length: usize,
}

impl HashSkip {
    pub const fn new(offset: usize, length: usize) -> Self {
        Self { offset, length }
    }

    fn end(&self) -> usize {
        self.offset + self.length
    }
}

/// The region overruns the image it is being evaluated against.
#[derive(Error, Debug)]
#[error("hash region {start:#x}..{end:#x} overruns the {image_len:#x} byte image")]
pub struct MalformedRegion {
    pub start: usize,
    pub end: usize,
    pub image_len: usize,
}

/// A hashed byte region `[start, end)` of the firmware image, computed with
/// the skip spans subtracted and compared against one expected digest.
#[derive(Debug, Clone)]
pub struct HashRegion {
    pub start: usize,
    pub end: usize,

    /// Expected digest, in hex. Compared case-insensitively.
    pub expected: String,

    /// Skip spans, ascending by offset, non-overlapping, within the region.
    /// Checked by [`HashRegion::validate`] when the catalog is built, not on
    /// every digest computation.
    pub skips: Vec<HashSkip>,
}

impl HashRegion {
    pub fn new(
        start: usize,
        end: usize,
        expected: impl Into<String>,
        skips: Vec<HashSkip>,
    ) -> Self {
        Self {
            start,
            end,
            expected: expected.into(),
            skips,
        }
    }

    /// Compute the skip-aware digest of this region over `image`, rendered
    /// as lowercase hex.
    pub fn compute(&self, image: &[u8]) -> Result<String, MalformedRegion> {
        if self.start >= self.end || self.end > image.len() {
            return Err(MalformedRegion {
                start: self.start,
                end: self.end,
                image_len: image.len(),
            });
        }

        let mut hasher = Sha256::new();
        let mut pos = self.start;
        for skip in &self.skips {
            // Skip tables are validated at catalog construction; the clamps
            // only keep a malformed table from panicking the slice math.
            let skip_start = skip.offset.clamp(pos, self.end);
            hasher.update(&image[pos..skip_start]);
            pos = skip.end().clamp(skip_start, self.end);
        }
        hasher.update(&image[pos..self.end]);

        Ok(hex::encode(hasher.finalize()))
    }

    /// Does the digest of this region over `image` equal the expected one?
    ///
    /// A region that does not fit the image is a mismatch, not an error;
    /// catalogs may describe builds larger than the image being checked.
    pub fn matches(&self, image: &[u8]) -> bool {
        self.compute(image)
            .is_ok_and(|digest| digest.eq_ignore_ascii_case(&self.expected))
    }

    /// Check the invariants assumed by [`HashRegion::compute`]: a non-empty
    /// region and a skip table that is sorted, non-overlapping, and fully
    /// contained in `[start, end)`.
    pub fn validate(&self) -> anyhow::Result<()> {
        ensure!(
            self.start < self.end,
            "empty hash region {:#x}..{:#x}",
            self.start,
            self.end
        );

        let mut pos = self.start;
        for skip in &self.skips {
            ensure!(
                skip.offset >= pos,
                "skip at {:#x} is out of order or overlaps the previous skip",
                skip.offset
            );
            ensure!(
                skip.end() <= self.end,
                "skip {:#x}+{} overruns region end {:#x}",
                skip.offset,
                skip.length,
                self.end
            );
            pos = skip.end();
        }

        Ok(())
    }
}

#[cfg(test)]
fn test_region() -> HashRegion {
    // Digest of 60 zero bytes: the region is 64 bytes with 4 elided.
    let expected = hex::encode(Sha256::digest([0u8; 60]));
    HashRegion::new(0, 64, expected, vec![HashSkip::new(10, 4)])
}

#[test]
fn test_skipped_bytes_do_not_affect_digest() {
    let region = test_region();

    let mut image = vec![0u8; 512 * 1024];
    assert!(region.matches(&image));

    // Anything may live inside the skip span.
    image[10..14].copy_from_slice(&[0xDE, 0xAD, 0xBE, 0xEF]);
    assert!(region.matches(&image));
}

#[test]
fn test_non_skipped_bytes_affect_digest() {
    let region = test_region();
    let baseline = region.compute(&vec![0u8; 64]).unwrap();

    // Every byte of the region outside the skip span must be significant.
    for offset in 0..64 {
        if (10..14).contains(&offset) {
            continue;
        }

        let mut image = vec![0u8; 64];
        image[offset] = 1;
        assert_ne!(region.compute(&image).unwrap(), baseline, "offset {offset}");
    }

    // And bytes past the region end must not be.
    let mut image = vec![0u8; 65];
    image[64] = 1;
    assert_eq!(region.compute(&image).unwrap(), baseline);
}

#[test]
fn test_digest_comparison_ignores_case() {
    let mut region = test_region();
    region.expected = region.expected.to_uppercase();
    assert!(region.matches(&vec![0u8; 64]));
}

#[test]
fn test_region_overrunning_image_is_an_error_not_a_read() {
    let region = test_region();
    assert!(region.compute(&[0u8; 63]).is_err());
    assert!(!region.matches(&[0u8; 63]));
}

#[test]
fn test_validate_rejects_bad_skip_tables() {
    let overrun = HashRegion::new(0, 64, "", vec![HashSkip::new(60, 8)]);
    assert!(overrun.validate().is_err());

    let overlapping = HashRegion::new(
        0,
        64,
        "",
        vec![HashSkip::new(10, 4), HashSkip::new(12, 4)],
    );
    assert!(overlapping.validate().is_err());

    let unsorted = HashRegion::new(
        0,
        64,
        "",
        vec![HashSkip::new(20, 4), HashSkip::new(10, 4)],
    );
    assert!(unsorted.validate().is_err());

    assert!(test_region().validate().is_ok());
}
