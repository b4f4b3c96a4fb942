//! The logo installation workflow.
//!
//! One strictly ordered sequence: check the input file, identify the chip,
//! read the whole image once, write a backup file, identify the firmware
//! build, encode the replacement logo, plan the patch, write the single
//! patched sector. The first failure halts the run; nothing in this layer
//! retries. The full image is never written back to the device; the only
//! physical write is the one planned sector.
//!
//! The sequence runs on a dedicated worker thread so a slow read or write
//! does not block the caller; progress strings flow through a one-way
//! channel, and exactly one final outcome is delivered when the worker
//! ends. There is no way to cancel a started run.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::mpsc;
use std::thread;

use chrono::Local;
use thiserror::Error;

use crate::catalog::{identify, FirmwareProfile};
use crate::flash::{Flash, FlashIdentity};
use crate::logo::LogoCodec;
use crate::patch::{self, PatchError};

/// The one chip identity this tool supports: the GigaDevice SPI NOR fitted
/// to the supported panels. Anything else halts the run before a single
/// byte is read or written.
pub const SUPPORTED_IDENTITY: FlashIdentity = FlashIdentity {
    manufacturer_id: 0xC8,
    device_id: 0x12,
};

#[derive(Error, Debug)]
pub enum InstallError {
    #[error("logo input rejected")]
    InputValidation(#[source] anyhow::Error),

    #[error("cannot identify chip (found {manufacturer_id:02X} {device_id:02X}, expected C8 12)")]
    DeviceMismatch { manufacturer_id: u8, device_id: u8 },

    #[error("flash transport failed")]
    Transport(#[source] anyhow::Error),

    #[error("could not save backup file \"{name}\"")]
    Backup {
        name: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("firmware was not recognized; refusing to patch an unknown image")]
    UnidentifiedFirmware,

    #[error(transparent)]
    Patch(#[from] PatchError),
}

/// Where the pre-patch firmware backup goes.
///
/// A failure here halts the run before any flash modification.
pub trait BackupSink {
    fn save(&self, name: &str, image: &[u8]) -> anyhow::Result<()>;
}

/// Saves backups as plain files in a directory.
pub struct DirBackupSink(pub PathBuf);

impl BackupSink for DirBackupSink {
    fn save(&self, name: &str, image: &[u8]) -> anyhow::Result<()> {
        fs::write(self.0.join(name), image)?;
        Ok(())
    }
}

/// Run the workflow to completion on the calling thread.
///
/// Progress strings are sent at each phase boundary; a dropped receiver
/// silences them but does not stop the run.
pub fn change_logo<F: Flash, C: LogoCodec, B: BackupSink>(
    flash: &mut F,
    codec: &C,
    logo_path: &Path,
    backup: &B,
    profiles: &[FirmwareProfile],
    status: &mpsc::Sender<String>,
) -> Result<(), InstallError> {
    let report = |msg: String| {
        let _ = status.send(msg);
    };

    report("Checking logo file".to_string());
    codec
        .validate(logo_path)
        .map_err(InstallError::InputValidation)?;

    report("Identifying device".to_string());
    let identity = flash.identity().map_err(InstallError::Transport)?;
    if identity != SUPPORTED_IDENTITY {
        return Err(InstallError::DeviceMismatch {
            manufacturer_id: identity.manufacturer_id,
            device_id: identity.device_id,
        });
    }

    report("Reading firmware".to_string());
    let geometry = flash.geometry();
    let mut image = vec![0u8; geometry.capacity];
    flash.read(0, &mut image).map_err(InstallError::Transport)?;

    // Persist the raw image before anything else happens, so a
    // misidentification or an interrupted write never loses the original.
    let backup_name = format!("firmware-{}.bin", Local::now().format("%Y-%m-%d-%H-%M-%S"));
    report(format!("Creating firmware backup file \"{backup_name}\""));
    backup
        .save(&backup_name, &image)
        .map_err(|source| InstallError::Backup {
            name: backup_name,
            source,
        })?;

    report("Checking firmware".to_string());
    let profile = identify(&image, profiles).ok_or(InstallError::UnidentifiedFirmware)?;
    report(format!("Detected firmware is {}", profile.name));

    report("Converting logo".to_string());
    let asset = codec
        .encode(logo_path)
        .map_err(InstallError::InputValidation)?;

    report("Embedding the new logo".to_string());
    let block = patch::plan(&mut image, profile, &asset, geometry.sector_size)?;

    report(format!("Writing patched sector at {:#x}", block.address));
    flash
        .write(block.address, &block.data)
        .map_err(InstallError::Transport)?;

    report("Finished! Reboot the display to see the new boot logo".to_string());
    Ok(())
}

/// Handle to a running installation.
pub struct InstallRun<F> {
    /// Phase-boundary progress messages, in order.
    pub status: mpsc::Receiver<String>,
    worker: thread::JoinHandle<(F, Result<(), InstallError>)>,
}

impl<F> InstallRun<F> {
    /// Block until the worker ends, returning the device and the single
    /// final outcome.
    pub fn wait(self) -> (F, Result<(), InstallError>) {
        self.worker.join().expect("install worker should not panic")
    }
}

/// Run the workflow on a dedicated worker thread.
///
/// The caller observes progress through [`InstallRun::status`] while the
/// image read, identification, and sector write proceed in the background,
/// then collects the one final outcome with [`InstallRun::wait`].
pub fn spawn_change_logo<F, C, B>(
    mut flash: F,
    codec: C,
    logo_path: PathBuf,
    backup: B,
    profiles: Vec<FirmwareProfile>,
) -> InstallRun<F>
where
    F: Flash + Send + 'static,
    C: LogoCodec + Send + 'static,
    B: BackupSink + Send + 'static,
{
    let (tx, rx) = mpsc::channel();
    let worker = thread::spawn(move || {
        let result = change_logo(&mut flash, &codec, &logo_path, &backup, &profiles, &tx);
        (flash, result)
    });

    InstallRun { status: rx, worker }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use super::*;
    use crate::fingerprint::{HashRegion, HashSkip};
    use crate::flash::{FlashGeometry, SimFlash};

    const GEOMETRY: FlashGeometry = FlashGeometry {
        capacity: 64 * 1024,
        sector_size: 4096,
    };

    const LOGO_OFFSET: usize = 0x1100;
    const MAX_LOGO_LEN: usize = 256;

    /// A flash preloaded with a patterned image, plus a one-entry catalog
    /// whose fingerprint matches that image (the logo window is skipped,
    /// as in the real catalog).
    fn sim_setup() -> (SimFlash, Vec<FirmwareProfile>, Vec<u8>) {
        let image: Vec<u8> = (0..GEOMETRY.capacity).map(|i| (i * 7) as u8).collect();
        let mut flash = SimFlash::new(SUPPORTED_IDENTITY, GEOMETRY);
        flash.load(&mut &image[..]).unwrap();

        let skips = vec![HashSkip::new(LOGO_OFFSET, MAX_LOGO_LEN)];
        let expected = HashRegion::new(0, 0x3000, "", skips.clone())
            .compute(&image)
            .unwrap();
        let profile = FirmwareProfile {
            name: "test build".to_string(),
            logo_offset: LOGO_OFFSET,
            hdmi_string_offset: 0x800,
            max_logo_len: MAX_LOGO_LEN,
            fingerprints: vec![HashRegion::new(0, 0x3000, expected, skips)],
        };

        (flash, vec![profile], image)
    }

    struct CannedLogo(bytes::Bytes);

    impl LogoCodec for CannedLogo {
        fn validate(&self, _path: &Path) -> anyhow::Result<()> {
            Ok(())
        }
        fn encode(&self, _path: &Path) -> anyhow::Result<bytes::Bytes> {
            Ok(self.0.clone())
        }
    }

    struct RejectingLogo;

    impl LogoCodec for RejectingLogo {
        fn validate(&self, _path: &Path) -> anyhow::Result<()> {
            anyhow::bail!("wrong dimensions")
        }
        fn encode(&self, _path: &Path) -> anyhow::Result<bytes::Bytes> {
            anyhow::bail!("wrong dimensions")
        }
    }

    #[derive(Clone, Default)]
    struct MemBackup(Arc<Mutex<Option<(String, Vec<u8>)>>>);

    impl BackupSink for MemBackup {
        fn save(&self, name: &str, image: &[u8]) -> anyhow::Result<()> {
            *self.0.lock().unwrap() = Some((name.to_string(), image.to_vec()));
            Ok(())
        }
    }

    struct FailingBackup;

    impl BackupSink for FailingBackup {
        fn save(&self, _name: &str, _image: &[u8]) -> anyhow::Result<()> {
            anyhow::bail!("disk full")
        }
    }

    #[test]
    fn test_end_to_end_rewrites_exactly_one_sector() {
        let (flash, profiles, original) = sim_setup();
        let asset: Vec<u8> = (0..200).map(|i| (i ^ 0xC3) as u8).collect();
        let backup = MemBackup::default();

        let run = spawn_change_logo(
            flash,
            CannedLogo(asset.clone().into()),
            PathBuf::from("logo.bin"),
            backup.clone(),
            profiles,
        );

        let trail: Vec<String> = run.status.iter().collect();
        let (flash, result) = run.wait();
        result.unwrap();

        // The asset landed at the logo offset...
        assert_eq!(&flash.contents()[LOGO_OFFSET..LOGO_OFFSET + 200], &asset[..]);

        // ...every other byte of the device is untouched...
        assert_eq!(&flash.contents()[..LOGO_OFFSET], &original[..LOGO_OFFSET]);
        assert_eq!(
            &flash.contents()[LOGO_OFFSET + 200..],
            &original[LOGO_OFFSET + 200..]
        );

        // ...and only the sector containing the logo was erased, once.
        assert_eq!(flash.total_erases(), 1);
        assert_eq!(flash.erase_count(LOGO_OFFSET / GEOMETRY.sector_size), 1);

        // The backup holds the pre-patch image.
        let saved = backup.0.lock().unwrap().take().unwrap();
        assert!(saved.0.starts_with("firmware-") && saved.0.ends_with(".bin"));
        assert_eq!(saved.1, original);

        // The status trail runs from first phase to completion.
        assert_eq!(trail.first().unwrap(), "Checking logo file");
        assert!(trail.iter().any(|m| m == "Detected firmware is test build"));
        assert!(trail.last().unwrap().starts_with("Finished"));
    }

    #[test]
    fn test_rejected_input_halts_before_touching_the_device() {
        let (flash, profiles, _) = sim_setup();

        let run = spawn_change_logo(
            flash,
            RejectingLogo,
            PathBuf::from("logo.bin"),
            MemBackup::default(),
            profiles,
        );
        let trail: Vec<String> = run.status.iter().collect();
        let (flash, result) = run.wait();

        assert!(matches!(result, Err(InstallError::InputValidation(_))));
        assert_eq!(flash.total_erases(), 0);
        assert!(!trail.iter().any(|m| m == "Identifying device"));
    }

    #[test]
    fn test_wrong_chip_identity_halts_before_reading() {
        let (_, profiles, original) = sim_setup();
        let mut flash = SimFlash::new(
            FlashIdentity {
                manufacturer_id: 0xEF,
                device_id: 0x13,
            },
            GEOMETRY,
        );
        flash.load(&mut &original[..]).unwrap();
        let backup = MemBackup::default();

        let run = spawn_change_logo(
            flash,
            CannedLogo(vec![1, 2, 3].into()),
            PathBuf::from("logo.bin"),
            backup.clone(),
            profiles,
        );
        let trail: Vec<String> = run.status.iter().collect();
        let (flash, result) = run.wait();

        assert!(matches!(result, Err(InstallError::DeviceMismatch { .. })));
        assert_eq!(flash.total_erases(), 0);
        assert!(backup.0.lock().unwrap().is_none());
        assert!(!trail.iter().any(|m| m == "Reading firmware"));
    }

    #[test]
    fn test_backup_failure_halts_without_flash_writes() {
        let (flash, profiles, _) = sim_setup();

        let run = spawn_change_logo(
            flash,
            CannedLogo(vec![1, 2, 3].into()),
            PathBuf::from("logo.bin"),
            FailingBackup,
            profiles,
        );
        let (flash, result) = run.wait();

        assert!(matches!(result, Err(InstallError::Backup { .. })));
        assert_eq!(flash.total_erases(), 0);
    }

    #[test]
    fn test_unrecognized_firmware_is_backed_up_but_never_patched() {
        let (flash, _, _) = sim_setup();
        let backup = MemBackup::default();

        // Empty catalog: nothing can match.
        let run = spawn_change_logo(
            flash,
            CannedLogo(vec![1, 2, 3].into()),
            PathBuf::from("logo.bin"),
            backup.clone(),
            vec![],
        );
        let (flash, result) = run.wait();

        assert!(matches!(result, Err(InstallError::UnidentifiedFirmware)));
        assert_eq!(flash.total_erases(), 0);

        // The backup was still taken; it precedes identification.
        assert!(backup.0.lock().unwrap().is_some());
    }

    #[test]
    fn test_oversized_asset_surfaces_as_patch_error() {
        let (flash, profiles, original) = sim_setup();

        let run = spawn_change_logo(
            flash,
            CannedLogo(vec![0xAA; MAX_LOGO_LEN + 1].into()),
            PathBuf::from("logo.bin"),
            MemBackup::default(),
            profiles,
        );
        let (flash, result) = run.wait();

        assert!(matches!(
            result,
            Err(InstallError::Patch(PatchError::TooLarge { .. }))
        ));
        assert_eq!(flash.total_erases(), 0);
        assert_eq!(flash.contents(), &original[..]);
    }
}
