//! The table of known firmware builds and the identification engine.
//!
//! Identification is data-driven: every profile is evaluated by the same
//! uniform algorithm, so supporting a new build means appending one entry
//! here, never touching code (`fw_inspect digest` computes the skip-aware
//! hash of a dump for exactly that purpose). Profiles are tried in table
//! order and the *first* full match wins. Two entries with overly permissive
//! skip tables could in principle both match one image, in which case the
//! earlier entry silently shadows the later one; keep skip tables tight
//! when adding entries.

use std::sync::LazyLock;

use crate::fingerprint::{HashRegion, HashSkip};

/// A catalog entry for one known firmware build: the fingerprints that
/// identify it plus the offsets needed to patch it.
#[derive(Debug, Clone)]
pub struct FirmwareProfile {
    /// Human-readable build name.
    pub name: String,

    /// Where the packed boot logo asset lives.
    pub logo_offset: usize,

    /// Where the "HDMI" source-label string lives. Informational; useful
    /// when eyeballing a dump of an unrecognized build.
    pub hdmi_string_offset: usize,

    /// Upper bound on an encoded logo. Past this point the bytes belong to
    /// unrelated firmware logic.
    pub max_logo_len: usize,

    /// All of these must match for the profile to be identified.
    pub fingerprints: Vec<HashRegion>,
}

impl FirmwareProfile {
    /// True if every fingerprint of this profile matches `image`.
    pub fn matches(&self, image: &[u8]) -> bool {
        self.fingerprints.iter().all(|region| region.matches(image))
    }
}

/// Find the first profile in `profiles` whose every fingerprint matches
/// `image`, or `None` if the firmware is not recognized.
pub fn identify<'a>(image: &[u8], profiles: &'a [FirmwareProfile]) -> Option<&'a FirmwareProfile> {
    profiles.iter().find(|profile| profile.matches(image))
}

/// All known KeDei builds share the same layout; only the digest and the
/// locations of the two background-color calibration bytes differ.
fn kedei(name: &str, expected: &str, bg_color: [usize; 2]) -> FirmwareProfile {
    FirmwareProfile {
        name: name.to_string(),
        logo_offset: 0x260D8,
        hdmi_string_offset: 0x12346,
        max_logo_len: 1507,
        fingerprints: vec![HashRegion::new(
            0,
            0x80000,
            expected,
            vec![
                HashSkip::new(bg_color[0], 1), // CAdjustBackgroundColor, first copy
                HashSkip::new(bg_color[1], 1), // CAdjustBackgroundColor, second copy
                HashSkip::new(0x12346, 16),    // "HDMI" source label
                HashSkip::new(0x13A31, 48),    // palette
                HashSkip::new(0x14733, 1),     // CShowNote
                HashSkip::new(0x260D8, 903),   // boot logo
            ],
        )],
    }
}

static BUILTIN: LazyLock<Vec<FirmwareProfile>> = LazyLock::new(|| {
    vec![
        kedei(
            "KeDei v1.0",
            "2319EE74B6A09F62484C62B9500FFD356C2A7142BB6D00A5DDFD9E562562F8F4",
            [0xD263, 0xD273],
        ),
        kedei(
            "KeDei v1.1, panel type 1 (SKY035S13B00-14439)",
            "B980A13D3472C422FB8E101F6A2BA95DCA0CC2C3D133B8B8B68DF7D5F8FD4AEA",
            [0xD45E, 0xD46E],
        ),
        kedei(
            "KeDei v1.1, panel type 2 (SKY035S13D-199)",
            "F206FB3C359FE9BB57BEADA1D79E054DCD7727A898E800C0EDED27F3183BF79B",
            [0xD2D1, 0xD2E1],
        ),
    ]
});

/// The firmware builds this tool knows how to patch.
pub fn builtin() -> &'static [FirmwareProfile] {
    &BUILTIN
}

#[cfg(test)]
fn contrived_profile(name: &str, image: &[u8], region: HashRegion) -> FirmwareProfile {
    let expected = region.compute(image).unwrap();
    FirmwareProfile {
        name: name.to_string(),
        logo_offset: 0,
        hdmi_string_offset: 0,
        max_logo_len: 16,
        fingerprints: vec![HashRegion::new(region.start, region.end, expected, region.skips)],
    }
}

#[test]
fn test_builtin_catalog_is_well_formed() {
    let profiles = builtin();
    assert!(!profiles.is_empty());

    for profile in profiles {
        assert!(!profile.name.is_empty());
        assert!(profile.max_logo_len > 0);
        for region in &profile.fingerprints {
            region.validate().unwrap();
            assert!(profile.logo_offset + profile.max_logo_len <= region.end);
        }
    }
}

#[test]
fn test_builtin_catalog_rejects_unknown_image() {
    // A blank image is not any of the known builds, and the 512 KiB regions
    // must tolerate an image shorter than they expect.
    assert!(identify(&vec![0u8; 512 * 1024], builtin()).is_none());
    assert!(identify(&[0u8; 64], builtin()).is_none());
}

#[test]
fn test_identify_tolerates_skipped_variance() {
    use sha2::{Digest, Sha256};

    // 512 KiB of zeros, fingerprinted over [0, 64) with bytes 10..14 elided:
    // the expected digest is that of 60 zero bytes, and scribbling inside
    // the skip span must not defeat identification.
    let mut image = vec![0u8; 512 * 1024];
    let expected = hex::encode(Sha256::digest([0u8; 60]));
    let profile = FirmwareProfile {
        name: "all zero".to_string(),
        logo_offset: 10,
        hdmi_string_offset: 0,
        max_logo_len: 4,
        fingerprints: vec![HashRegion::new(0, 64, expected, vec![HashSkip::new(10, 4)])],
    };
    let profiles = [profile];

    assert!(identify(&image, &profiles).is_some());

    image[10] = 0xA5;
    image[13] = 0x5A;
    assert!(identify(&image, &profiles).is_some());

    image[14] = 0x01;
    assert!(identify(&image, &profiles).is_none());
}

#[test]
fn test_first_full_match_wins() {
    let image: Vec<u8> = (0..4096u32).map(|i| i as u8).collect();

    // Both profiles fully match the image; the earlier one must shadow the
    // later one. This pins the first-match tie-break so a careless future
    // catalog entry shows up as a test failure, not a silent behavior change.
    let a = contrived_profile("a", &image, HashRegion::new(0, 256, "", vec![]));
    let b = contrived_profile("b", &image, HashRegion::new(0, 512, "", vec![]));
    assert!(a.matches(&image));
    assert!(b.matches(&image));

    let profiles = vec![a, b];
    assert_eq!(identify(&image, &profiles).unwrap().name, "a");

    let reversed: Vec<_> = profiles.into_iter().rev().collect();
    assert_eq!(identify(&image, &reversed).unwrap().name, "b");
}

#[test]
fn test_identification_is_deterministic() {
    let image: Vec<u8> = (0..1024u32).map(|i| (i * 7) as u8).collect();
    let profiles = vec![
        contrived_profile("one", &image, HashRegion::new(0, 128, "", vec![])),
        contrived_profile("two", &image, HashRegion::new(128, 256, "", vec![])),
    ];

    let first = identify(&image, &profiles).map(|p| p.name.clone());
    let second = identify(&image, &profiles).map(|p| p.name.clone());
    assert_eq!(first, second);
    assert_eq!(first.as_deref(), Some("one"));
}

#[test]
fn test_profile_fails_on_any_fingerprint_mismatch() {
    let image = vec![0x55u8; 1024];
    let good = HashRegion::new(0, 128, "", vec![]);
    let good = HashRegion::new(0, 128, good.compute(&image).unwrap(), vec![]);
    let bad = HashRegion::new(128, 256, "0".repeat(64), vec![]);

    let profile = FirmwareProfile {
        name: "half wrong".to_string(),
        logo_offset: 0,
        hdmi_string_offset: 0,
        max_logo_len: 1,
        fingerprints: vec![good, bad],
    };
    assert!(!profile.matches(&image));
}
