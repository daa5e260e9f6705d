//! Custom error types for the channel layer.
//!
//! This module defines the primary error type, `EpicsError`, for the entire
//! crate. Using the `thiserror` crate, it provides a centralized and
//! consistent way to classify failures, from connectivity problems caught
//! during command verification to errors reported by the remote control
//! system during an apply/trigger cycle.
//!
//! ## Error Taxonomy
//!
//! - **`Connectivity`**: one or more channels required by a command were
//!   disconnected at verification time. Carries every offending channel name.
//!   Raised before any network write is issued, so a command that fails this
//!   way has touched no hardware.
//! - **`Conversion`**: a wire value could not be decoded into the requested
//!   typed value (or vice versa). Local and recoverable.
//! - **`WriteRejected`**: the remote end refused a put at the protocol level;
//!   carries the remote status message verbatim.
//! - **`ReadTimeout`** / **`Disconnected`**: a channel get produced no
//!   response in time, or the channel was down when touched directly.
//! - **`CommandTimeout`**: the apply/trigger completion poll exceeded the
//!   caller's deadline. Hardware state is indeterminate; callers must
//!   re-query rather than assume the command was cancelled.
//! - **`Command`**: the remote completion record reported an explicit error
//!   message while a command was in flight; the message is carried verbatim.
//! - **`Config`**: wraps errors from the `config` crate when loading the
//!   channel-layer settings from a file.
//!
//! None of these are retried internally; retry policy belongs to the
//! application layer.

use thiserror::Error;

/// Convenience alias for results using the crate error type.
pub type EpicsResult<T> = std::result::Result<T, EpicsError>;

/// Errors raised by the verified channel layer.
#[derive(Error, Debug)]
pub enum EpicsError {
    /// One or more required channels were disconnected at verification time.
    #[error("channel(s) not connected: {}", channels.join(", "))]
    Connectivity {
        /// Names of every channel that failed its connectivity check.
        channels: Vec<String>,
    },

    /// A typed value could not be converted to or from wire representation.
    #[error("conversion error: {0}")]
    Conversion(String),

    /// The remote end rejected a channel write.
    #[error("write rejected by remote: {0}")]
    WriteRejected(String),

    /// A channel read produced no response within the timeout.
    #[error("read timeout on channel {0}")]
    ReadTimeout(String),

    /// A channel was disconnected when a direct read or write was attempted.
    #[error("channel {0} is disconnected")]
    Disconnected(String),

    /// The apply/trigger completion poll exceeded the caller's timeout.
    #[error("command timed out waiting for completion")]
    CommandTimeout,

    /// The remote completion record reported an error message.
    #[error("command failed: {0}")]
    Command(String),

    /// Configuration file could not be loaded or parsed.
    #[error("configuration error: {0}")]
    Config(#[from] config::ConfigError),
}
