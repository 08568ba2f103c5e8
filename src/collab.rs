//! Narrow traits for external collaborators: storage, logging, and
//! operator-facing services this kernel expects its host environment to
//! provide, but never implements itself.
//!
//! No implementations live here — these are the seams a platform
//! integrator fills in. They exist so the rest of the crate can depend on
//! a capability (e.g. "persist this ballot outcome") without committing
//! to a storage technology.

use crate::types::{ModuleId, Result, TimeUs};

/// Raw block storage, addressed by a fixed block size.
pub trait BlockDevice {
    /// Size of one block, in bytes.
    fn block_size(&self) -> usize;

    /// Total number of blocks.
    fn block_count(&self) -> usize;

    /// Read one block into `buffer`. `buffer` must be at least
    /// `block_size()` bytes.
    fn read_block(&self, block: usize, buffer: &mut [u8]) -> Result<()>;

    /// Write one block from `data`. `data` must be at least
    /// `block_size()` bytes.
    fn write_block(&mut self, block: usize, data: &[u8]) -> Result<()>;
}

/// A minimal filesystem, for configuration and log persistence.
pub trait FileSystem {
    type File;

    fn open(&mut self, path: &str, create: bool) -> Result<Self::File>;
    fn read(&mut self, file: &mut Self::File, buffer: &mut [u8]) -> Result<usize>;
    fn write(&mut self, file: &mut Self::File, data: &[u8]) -> Result<usize>;
    fn remove(&mut self, path: &str) -> Result<()>;
}

/// A small key/value store, for persisting ballot outcomes, neighbor
/// tables, or configuration across reboots.
pub trait KeyValueStore {
    fn get(&self, key: &[u8], buffer: &mut [u8]) -> Result<usize>;
    fn put(&mut self, key: &[u8], value: &[u8]) -> Result<()>;
    fn delete(&mut self, key: &[u8]) -> Result<()>;
}

/// Append-only time-series storage, for field/gradient history.
pub trait TimeSeriesStore {
    fn append(&mut self, timestamp: TimeUs, series: &str, value: f32) -> Result<()>;
    fn query(&self, series: &str, from: TimeUs, to: TimeUs, out: &mut [(TimeUs, f32)]) -> Result<usize>;
}

/// An append-only event log for auditing consensus and topology changes.
pub trait EventLog {
    fn record(&mut self, timestamp: TimeUs, source: ModuleId, message: &str) -> Result<()>;
}

/// An operator-facing interactive shell, for field diagnostics and manual
/// intervention (forcing a reelection, inhibiting a ballot, inspecting a
/// module's field).
pub trait Shell {
    /// Execute one command line, writing any output to `out`. Returns the
    /// number of bytes written.
    fn execute(&mut self, command: &str, out: &mut [u8]) -> Result<usize>;
}
