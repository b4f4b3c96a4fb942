//! Install a new boot logo into an RTD266x firmware image.
//!
//! This operates on a firmware dump file through the simulated flash, so the
//! whole workflow (identify, back up, patch, verify footprint) can run
//! without programmer hardware; a physical programmer plugs in behind the
//! `Flash` trait. The logo asset must already be in the packed in-firmware
//! format.

use std::fs::File;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::Duration;

use anyhow::{ensure, Context, Result};
use clap::Parser;

use rtd266x_installer::catalog;
use rtd266x_installer::flash::{FlashGeometry, SimFlash};
use rtd266x_installer::install::{self, DirBackupSink, SUPPORTED_IDENTITY};
use rtd266x_installer::logo::RawLogoCodec;

const SECTOR_SIZE: usize = 4096;

#[derive(Parser, Debug)]
#[clap(author, version, about)]
struct Cli {
    /// Path to the firmware dump to operate on
    #[clap(long)]
    dump: PathBuf,

    /// Write the patched dump back to the same file when done
    #[clap(long)]
    write_back: bool,

    /// Directory for the firmware backup file
    #[clap(long, default_value = ".")]
    backup_dir: PathBuf,

    /// The pre-encoded logo asset to embed
    logo: PathBuf,
}

fn open_dump(path: &Path) -> Result<SimFlash> {
    let len = std::fs::metadata(path)
        .with_context(|| format!("cannot open dump {}", path.display()))?
        .len() as usize;
    ensure!(
        len > 0 && len % SECTOR_SIZE == 0,
        "dump size {len} is not a multiple of the {SECTOR_SIZE} byte sector size"
    );

    let mut flash = SimFlash::new(
        SUPPORTED_IDENTITY,
        FlashGeometry {
            capacity: len,
            sector_size: SECTOR_SIZE,
        },
    );
    flash.load(&mut File::open(path)?)?;
    Ok(flash)
}

fn main() -> Result<()> {
    let args = Cli::parse();

    let flash = open_dump(&args.dump)?;

    howudoin::init(howudoin::consumers::TermLine::default());
    let rpt = howudoin::new().label("Installing boot logo");

    let run = install::spawn_change_logo(
        flash,
        RawLogoCodec,
        args.logo.clone(),
        DirBackupSink(args.backup_dir.clone()),
        catalog::builtin().to_vec(),
    );

    for message in run.status.iter() {
        rpt.desc(message);
        rpt.inc();
    }

    let (flash, result) = run.wait();
    if let Err(error) = result {
        howudoin::disable();
        thread::sleep(Duration::from_millis(10)); // Give howudoin time to shut down
        return Err(error.into());
    }

    rpt.finish();
    howudoin::disable();
    thread::sleep(Duration::from_millis(10)); // Give howudoin time to shut down

    if args.write_back {
        flash.save(&mut File::create(&args.dump)?)?;
        eprintln!("[+] Patched dump written back to {}", args.dump.display());
    } else {
        eprintln!("[+] Dry run complete; use --write-back to keep the patched dump");
    }

    Ok(())
}
