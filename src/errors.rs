//! Error Types
//!
//! This module defines the error types used throughout the host.
//!
//! All public APIs return [`Result<T>`] which is an alias for
//! `std::result::Result<T, BeamerError>`.

use thiserror::Error;

/// The main error type for the beamer host.
#[derive(Error, Debug)]
pub enum BeamerError {
    /// Filesystem I/O error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Filesystem-watch backend error.
    #[error("watch error: {0}")]
    Notify(#[from] notify::Error),

    /// Script runtime, memory, or error-handler failure. Callers of
    /// [`crate::sandbox::Sandbox::enter`] never see this variant directly —
    /// it is caught and logged at the dispatch boundary (see §4.B) — but it
    /// is the type `mlua` errors are converted to on the way there.
    #[error("script error: {0}")]
    Script(#[from] mlua::Error),

    /// A node directory name or script-visible leaf name contained a `/`.
    #[error("name must not contain '/': {0}")]
    InvalidLeafName(String),

    /// `setup(w, h)` was called with dimensions outside `32..=2048`.
    #[error("invalid setup dimensions: {width}x{height}")]
    InvalidDimensions { width: i64, height: i64 },

    /// `setup` was called while already inside a render dispatch.
    #[error("setup() is not allowed during render")]
    SetupDuringRender,

    /// `set_alias` was called for an alias already held by another node.
    #[error("alias already in use: {0}")]
    AliasTaken(String),

    /// `render_child` referenced a name with no such child.
    #[error("no such child: {0}")]
    NoSuchChild(String),

    /// A per-frame quota (child renders, snapshots) was exhausted.
    #[error("quota exceeded: {0}")]
    QuotaExceeded(&'static str),

    /// A resource decoder (image/video/font/shader/vnc) failed.
    #[error("resource load error: {0}")]
    ResourceLoad(String),

    /// A datagram had no address/payload terminator.
    #[error("malformed datagram")]
    MalformedDatagram,

    /// A datagram's computed payload length underflowed.
    #[error("negative payload length")]
    NegativePayloadLength,

    /// No node matched the requested address.
    #[error("no node at address: {0}")]
    AddressNotFound(String),
}

/// Alias for `Result<T, BeamerError>`.
pub type Result<T> = std::result::Result<T, BeamerError>;
