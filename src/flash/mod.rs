//! The transport boundary to the SPI NOR flash holding the firmware.
//!
//! Physical programmers live behind the [`Flash`] trait; this crate ships an
//! in-memory simulation that backs the test suite and the offline CLI mode,
//! which operates on firmware dump files instead of a wired-up chip.

use std::io::{Read, Write};

use anyhow::ensure;

/// Manufacturer/device pair reported by the chip's identification command.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct FlashIdentity {
    pub manufacturer_id: u8,
    pub device_id: u8,
}

/// Geometry of the flash: total capacity and the smallest erasable unit.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct FlashGeometry {
    pub capacity: usize,
    pub sector_size: usize,
}

/// Represents the flash device holding the firmware image.
///
/// `write` performs whatever erase-before-write handling the medium requires
/// for the given range. Retry policy also belongs to implementations of this
/// trait, not to callers.
pub trait Flash {
    /// Query the chip's identification registers.
    fn identity(&mut self) -> anyhow::Result<FlashIdentity>;

    /// Read `buf.len()` bytes starting at `offset`.
    fn read(&mut self, offset: usize, buf: &mut [u8]) -> anyhow::Result<()>;

    /// Erase and program `data` at `offset`.
    fn write(&mut self, offset: usize, data: &[u8]) -> anyhow::Result<()>;

    /// Get the geometry of the flash.
    fn geometry(&self) -> FlashGeometry;
}

/// A simulated in-memory NOR flash, for testing and offline use.
///
/// Writes model real NOR behavior: every sector touched by the range is
/// erased to `0xFF` before the new bytes are programmed, so a write that
/// covers only part of a sector loses the rest of that sector. Per-sector
/// erase counters let callers check how much of the device a workflow
/// actually rewrote.
#[derive(Debug, Clone)]
pub struct SimFlash {
    identity: FlashIdentity,
    geometry: FlashGeometry,
    data: Vec<u8>,
    erase_counts: Vec<u32>,
}

impl SimFlash {
    /// Create a blank (all `0xFF`) flash with the given identity and
    /// geometry.
    pub fn new(identity: FlashIdentity, geometry: FlashGeometry) -> Self {
        Self {
            identity,
            geometry,
            data: vec![0xFF; geometry.capacity],
            erase_counts: vec![0; geometry.capacity.div_ceil(geometry.sector_size)],
        }
    }

    /// Initialize the flash contents from a reader, e.g. a dump file. The
    /// source must supply exactly one full capacity worth of bytes.
    pub fn load<R: Read>(&mut self, read: &mut R) -> anyhow::Result<()> {
        read.read_exact(&mut self.data)?;
        Ok(())
    }

    /// Write the current flash contents out to a writable stream.
    pub fn save<W: Write>(&self, write: &mut W) -> anyhow::Result<()> {
        write.write_all(&self.data)?;
        Ok(())
    }

    /// Direct view of the flash contents.
    pub fn contents(&self) -> &[u8] {
        &self.data
    }

    /// How many times the sector at `index` has been erased.
    pub fn erase_count(&self, index: usize) -> u32 {
        self.erase_counts[index]
    }

    /// Total erases across all sectors.
    pub fn total_erases(&self) -> u32 {
        self.erase_counts.iter().sum()
    }
}

impl Flash for SimFlash {
    fn identity(&mut self) -> anyhow::Result<FlashIdentity> {
        Ok(self.identity)
    }

    fn read(&mut self, offset: usize, buf: &mut [u8]) -> anyhow::Result<()> {
        let end = offset + buf.len();
        ensure!(
            end <= self.geometry.capacity,
            "read {offset:#x}..{end:#x} out of range"
        );

        buf.copy_from_slice(&self.data[offset..end]);
        Ok(())
    }

    fn write(&mut self, offset: usize, data: &[u8]) -> anyhow::Result<()> {
        ensure!(!data.is_empty(), "empty write");

        let end = offset + data.len();
        ensure!(
            end <= self.geometry.capacity,
            "write {offset:#x}..{end:#x} out of range"
        );

        // Erase every sector the range touches, then program.
        let sector_size = self.geometry.sector_size;
        let first = offset / sector_size;
        let last = (end - 1) / sector_size;
        for sector in first..=last {
            self.data[sector * sector_size..(sector + 1) * sector_size].fill(0xFF);
            self.erase_counts[sector] += 1;
        }
        self.data[offset..end].copy_from_slice(data);

        Ok(())
    }

    fn geometry(&self) -> FlashGeometry {
        self.geometry
    }
}

#[cfg(test)]
const TEST_IDENTITY: FlashIdentity = FlashIdentity {
    manufacturer_id: 0xC8,
    device_id: 0x12,
};

#[cfg(test)]
const TEST_GEOMETRY: FlashGeometry = FlashGeometry {
    capacity: 64 * 1024,
    sector_size: 4096,
};

#[test]
fn test_sim_identity_and_geometry() {
    let mut flash = SimFlash::new(TEST_IDENTITY, TEST_GEOMETRY);
    assert_eq!(flash.identity().unwrap(), TEST_IDENTITY);
    assert_eq!(flash.geometry(), TEST_GEOMETRY);
}

#[test]
fn test_sim_read_write() {
    let mut flash = SimFlash::new(TEST_IDENTITY, TEST_GEOMETRY);

    flash.write(0x1000, &[1, 2, 3, 4]).unwrap();

    let mut buf = [0u8; 4];
    flash.read(0x1000, &mut buf).unwrap();
    assert_eq!(buf, [1, 2, 3, 4]);

    assert!(flash.read(TEST_GEOMETRY.capacity - 1, &mut buf).is_err());
    assert!(flash.write(TEST_GEOMETRY.capacity - 1, &[0, 0]).is_err());
}

#[test]
fn test_sim_write_erases_whole_sectors() {
    let mut flash = SimFlash::new(TEST_IDENTITY, TEST_GEOMETRY);

    flash.write(0, &vec![0xAA; TEST_GEOMETRY.capacity]).unwrap();
    assert_eq!(flash.total_erases() as usize, 16);

    // A partial-sector write wipes the rest of that sector back to 0xFF.
    flash.write(0x1000, &[0x11; 16]).unwrap();
    assert_eq!(flash.erase_count(1), 2);
    assert_eq!(&flash.contents()[0x1000..0x1010], &[0x11; 16][..]);
    assert_eq!(&flash.contents()[0x1010..0x2000], &vec![0xFF; 0xFF0][..]);

    // Neighboring sectors are untouched.
    assert_eq!(&flash.contents()[0x0000..0x1000], &vec![0xAA; 0x1000][..]);
    assert_eq!(&flash.contents()[0x2000..0x3000], &vec![0xAA; 0x1000][..]);
}

#[test]
fn test_sim_write_spanning_sectors_erases_both() {
    let mut flash = SimFlash::new(TEST_IDENTITY, TEST_GEOMETRY);

    flash.write(0x0FFE, &[1, 2, 3, 4]).unwrap();
    assert_eq!(flash.erase_count(0), 1);
    assert_eq!(flash.erase_count(1), 1);
    assert_eq!(flash.erase_count(2), 0);
}

#[test]
fn test_sim_load_save_roundtrip() {
    let mut flash = SimFlash::new(TEST_IDENTITY, TEST_GEOMETRY);

    let dump: Vec<u8> = (0..TEST_GEOMETRY.capacity).map(|i| (i * 13) as u8).collect();
    flash.load(&mut &dump[..]).unwrap();
    assert_eq!(flash.contents(), &dump[..]);

    let mut out = Vec::new();
    flash.save(&mut out).unwrap();
    assert_eq!(out, dump);

    // A short source is an error, not a partial load.
    assert!(flash.load(&mut &dump[..16]).is_err());
}
