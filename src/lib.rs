//! Boot logo installer for RTD266x-based display controllers.
//!
//! The RTD266x stores its firmware, including the boot logo shown while the
//! panel powers up, on an external SPI NOR flash. This crate identifies which
//! known firmware build the flash currently holds and swaps the embedded logo
//! asset by rewriting only the single erase sector that contains it.

pub mod catalog;
pub mod fingerprint;
pub mod flash;
pub mod install;
pub mod logo;
pub mod patch;
