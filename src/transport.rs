//! Consumed transport capability: the process-variable network client.
//!
//! The channel layer does not implement the control-network wire protocol.
//! It consumes a [`ChannelProvider`] — connect, get, put, subscribe against a
//! single named process variable — supplied by the embedding application
//! (a real network client in production, [`crate::sim::SimChannelProvider`]
//! in tests). Everything above this trait is transport-agnostic.

use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::error::EpicsResult;

/// Untyped value as carried on the control network.
///
/// The typed layer converts between these and domain values through
/// [`crate::codec::EpicsCodec`].
#[derive(Debug, Clone, PartialEq)]
pub enum WireValue {
    /// String record value.
    Str(String),
    /// Double-precision analog value.
    Double(f64),
    /// Long integer value.
    Int(i32),
    /// Enumerated record value (index into the record's state list).
    Enum(u16),
}

impl std::fmt::Display for WireValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WireValue::Str(s) => write!(f, "{s}"),
            WireValue::Double(v) => write!(f, "{v}"),
            WireValue::Int(v) => write!(f, "{v}"),
            WireValue::Enum(v) => write!(f, "{v}"),
        }
    }
}

/// Connection state of a single remote channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// No connection to the hosting controller.
    Disconnected,
    /// Connection attempt in progress.
    Connecting,
    /// Channel is live.
    Connected,
    /// The transport shut the channel down after an unrecoverable error.
    ClosedOnError,
}

impl ConnectionState {
    /// Whether the channel is usable for reads and writes.
    pub fn is_connected(self) -> bool {
        matches!(self, ConnectionState::Connected)
    }
}

/// Opaque handle to a registered channel.
///
/// Handles stay valid across disconnects; the provider keys its internal
/// state on them. Equality follows the provider-assigned id.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ChannelHandle {
    id: u64,
    name: String,
}

impl ChannelHandle {
    /// Create a handle. Called by providers only.
    pub fn new(id: u64, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
        }
    }

    /// Provider-assigned channel id.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Full channel name as resolved on the network.
    pub fn name(&self) -> &str {
        &self.name
    }
}

/// Minimal contract required of the process-variable network client.
///
/// `connect` is idempotent per name: it registers the channel on first use
/// and waits up to `timeout` for the connection to establish, returning the
/// handle either way. The connection outcome is observable through
/// [`ChannelProvider::connection_state`]; calling `connect` again on an
/// already-registered name is the reconnect attempt. An `Err` from `connect`
/// means a transport-level failure, not merely "still disconnected".
#[async_trait]
pub trait ChannelProvider: Send + Sync + 'static {
    /// Register `name` and wait up to `timeout` for it to connect.
    async fn connect(&self, name: &str, timeout: Duration) -> EpicsResult<ChannelHandle>;

    /// Read the channel's current value, waiting at most `timeout`.
    async fn get(&self, handle: &ChannelHandle, timeout: Duration) -> EpicsResult<WireValue>;

    /// Write a value to the channel.
    async fn put(&self, handle: &ChannelHandle, value: WireValue) -> EpicsResult<()>;

    /// Subscribe to value updates. The subscription lives until the receiver
    /// is dropped.
    async fn subscribe_value(
        &self,
        handle: &ChannelHandle,
    ) -> EpicsResult<mpsc::Receiver<WireValue>>;

    /// Subscribe to connection transitions (`true` = connected).
    async fn subscribe_connection(
        &self,
        handle: &ChannelHandle,
    ) -> EpicsResult<mpsc::Receiver<bool>>;

    /// Current connection state. Local bookkeeping, no network round trip.
    fn connection_state(&self, handle: &ChannelHandle) -> ConnectionState;
}
