//! Inspect firmware dumps against the builtin catalog.
//!
//! This is the curation companion to `change_logo`: `identify` tells you
//! whether a dump is a known build, and `digest` prints the skip-aware hash
//! of a dump under each builtin skip table, which is the value to paste into
//! a new catalog entry when supporting a build that shares the KeDei layout.

use std::fs;
use std::path::PathBuf;

use anyhow::{bail, Result};
use clap::{Parser, Subcommand};

use rtd266x_installer::catalog;

#[derive(Subcommand, Debug)]
enum Command {
    /// Identify which known firmware build a dump contains
    Identify,

    /// Print the skip-aware digest of the dump under each builtin profile's
    /// skip table; this is a read-only operation
    Digest,
}

#[derive(Parser, Debug)]
#[clap(author, version, about)]
struct Cli {
    /// Path to the firmware dump
    dump: PathBuf,

    #[clap(subcommand)]
    cmd: Command,
}

fn main() -> Result<()> {
    let args = Cli::parse();
    let image = fs::read(&args.dump)?;

    match args.cmd {
        Command::Identify => match catalog::identify(&image, catalog::builtin()) {
            Some(profile) => println!("{}", profile.name),
            None => bail!("firmware not identified"),
        },

        Command::Digest => {
            for profile in catalog::builtin() {
                for region in &profile.fingerprints {
                    match region.compute(&image) {
                        Ok(digest) => println!("{:50} {digest}", profile.name),
                        Err(error) => println!("{:50} {error}", profile.name),
                    }
                }
            }
        }
    };

    Ok(())
}
