//! Update engine of the CDDA game launcher: downloads a build, swaps it in
//! for the installed one and carries the player's content across, with a
//! rollback to the previous version on any failure.

pub mod archive;
pub mod builds;
pub mod config;
pub mod content;
pub mod debug;
pub mod disk;
pub mod download;
pub mod error;
pub mod fileops;
pub mod locks;
pub mod probe;
pub mod prompt;
pub mod registry;
pub mod settings;
pub mod update;

#[cfg(test)]
mod test_support;
