//! Error taxonomy for the orchestrator.
//!
//! Every fallible operation in `motherboard-core` returns a [`MotherboardError`]
//! variant rather than a string. The binary crate wraps these in `anyhow`
//! at the call sites that just need to print-and-exit.

use std::path::PathBuf;

use thiserror::Error;

/// Errors raised by the decoder, wire fabric, scheduler, snapshot manager,
/// and config loader.
#[derive(Debug, Error)]
pub enum MotherboardError {
    /// `lo` is greater than `hi` in a `map_device` call.
    #[error("invalid address range [{lo:#x}, {hi:#x}]: lo > hi")]
    BadRange { lo: u32, hi: u32 },

    /// A new mapping's range overlaps an existing mapping owned by a
    /// different device. Overlap with a mapping of the *same* device
    /// (address mirroring) is accepted, not an error.
    #[error(
        "range [{lo:#x}, {hi:#x}] overlaps existing mapping [{existing_lo:#x}, {existing_hi:#x}] \
         owned by a different device"
    )]
    RangeOverlap {
        lo: u32,
        hi: u32,
        existing_lo: u32,
        existing_hi: u32,
    },

    /// A role-specific operation (`map_device`, `connect_address_space`, ...)
    /// was called on a device whose role does not support it.
    #[error("device '{device}' does not support operation '{op}'")]
    UnsupportedOperation { device: String, op: &'static str },

    /// A config file, wire topology, or device entry named a device that
    /// was never registered.
    #[error("unknown device '{0}'")]
    UnknownDevice(String),

    /// A wire topology entry named a pin the target device does not expose.
    #[error("device '{device}' has no pin named '{pin}'")]
    UnknownPin { device: String, pin: String },

    /// A device reported it could not apply a restored blob.
    #[error("device '{device}' rejected restore: {reason}")]
    RestoreRejected { device: String, reason: String },

    /// Snapshot bundle I/O or archive-format failure.
    #[error("snapshot I/O error at {path}: {source}")]
    SnapshotIoError {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A snapshot archive entry did not match the envelope the restoring
    /// device expected (wrong device name, truncated payload, bad magic).
    #[error("snapshot envelope error for device '{device}': {reason}")]
    SnapshotEnvelope { device: String, reason: String },

    /// Failure while reading or parsing a zip archive.
    #[error("zip archive error: {0}")]
    Zip(#[from] zip::result::ZipError),

    /// Config file could not be read from disk.
    #[error("failed to read config file {path}: {source}")]
    ConfigIoError {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Config file parsed but did not match the expected TOML schema.
    #[error("failed to parse config file {path}: {source}")]
    ConfigParseError {
        path: PathBuf,
        #[source]
        source: Box<toml::de::Error>,
    },

    /// The config's wire topology referenced a device or pin inconsistently
    /// (duplicate wire name, dangling endpoint, etc).
    #[error("invalid wire topology: {0}")]
    ConfigTopologyError(String),

    /// Dynamic device backend failure (only constructible when the
    /// `dynamic` feature is enabled).
    #[cfg(feature = "dynamic")]
    #[error("failed to load dynamic device library {path}: {source}")]
    DynamicLoadError {
        path: PathBuf,
        #[source]
        source: libloading::Error,
    },

    /// A dynamic library was missing one of the required exported symbols.
    #[cfg(feature = "dynamic")]
    #[error("dynamic device library {path} is missing symbol '{symbol}'")]
    DynamicSymbolMissing { path: PathBuf, symbol: &'static str },
}
