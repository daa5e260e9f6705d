//! Per-controller channel grouping and the telltale health check.
//!
//! Every remote controller exposes many channels, but probing all of them to
//! answer "is this controller alive" is wasteful. Each [`EpicsSystem`] keeps
//! one representative [`TelltaleChannel`]: if the telltale is down the whole
//! controller is treated as down and no other channel is touched.

use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use tracing::debug;

use crate::channel::{Channel, RemoteChannel};
use crate::transport::ConnectionState;

/// The one channel whose connection state stands in for a whole controller.
#[derive(Debug, Clone)]
pub struct TelltaleChannel {
    system_name: String,
    channel: Channel<String>,
}

impl TelltaleChannel {
    /// Pair a controller name with its representative channel.
    pub fn new(system_name: impl Into<String>, channel: Channel<String>) -> Self {
        Self {
            system_name: system_name.into(),
            channel,
        }
    }

    /// Controller this telltale represents.
    pub fn system_name(&self) -> &str {
        &self.system_name
    }

    /// Name of the underlying channel.
    pub fn channel_name(&self) -> &str {
        self.channel.name()
    }

    /// Whether the telltale (and by proxy the controller) is connected.
    pub fn is_connected(&self) -> bool {
        self.channel.is_connected()
    }

    /// No-op success if already connected, else one bounded reconnect.
    ///
    /// Connectivity is reported as a boolean fact, not raised as an error.
    pub async fn connection_check(&self, timeout: Duration) -> bool {
        if self.is_connected() {
            return true;
        }
        debug!(
            system = %self.system_name,
            channel = %self.channel.name(),
            "telltale disconnected, attempting reconnect"
        );
        self.channel.reconnect(timeout).await
    }
}

/// A controller's telltale plus the rest of its channels.
pub struct EpicsSystem {
    telltale: TelltaleChannel,
    channels: Vec<Arc<dyn RemoteChannel>>,
}

impl EpicsSystem {
    /// Create an empty group around its telltale.
    pub fn new(telltale: TelltaleChannel) -> Self {
        Self {
            telltale,
            channels: Vec::new(),
        }
    }

    /// Add a channel to the group.
    pub fn register(&mut self, channel: Arc<dyn RemoteChannel>) {
        self.channels.push(channel);
    }

    /// The group's telltale.
    pub fn telltale(&self) -> &TelltaleChannel {
        &self.telltale
    }

    /// Number of channels in the group, telltale excluded.
    pub fn len(&self) -> usize {
        self.channels.len()
    }

    /// Whether the group holds no channels besides the telltale.
    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }

    /// Cheap health probe: telltale connection state only.
    pub fn is_connected(&self) -> bool {
        self.telltale.is_connected()
    }

    /// Full health probe with telltale short-circuit.
    ///
    /// If the telltale is down the controller is down: returns `false`
    /// without querying any other channel.
    pub fn is_all_connected(&self) -> bool {
        if !self.telltale.is_connected() {
            return false;
        }
        self.channels
            .iter()
            .all(|ch| ch.connection_state() == ConnectionState::Connected)
    }

    /// Bounded reconnect attempt on the telltale only.
    pub async fn telltale_connection_check(&self, timeout: Duration) -> bool {
        self.telltale.connection_check(timeout).await
    }

    /// Telltale check first, then parallel reconnects for the rest.
    ///
    /// Individual failures are not raised; the result is the AND over the
    /// whole group.
    pub async fn connection_check(&self, timeout: Duration) -> bool {
        if !self.telltale.connection_check(timeout).await {
            return false;
        }
        let attempts = self
            .channels
            .iter()
            .filter(|ch| ch.connection_state() != ConnectionState::Connected)
            .map(|ch| ch.reconnect(timeout));
        let all_reconnected = join_all(attempts).await.into_iter().all(|ok| ok);
        if !all_reconnected {
            debug!(
                system = %self.telltale.system_name(),
                "connection check failed for one or more channels"
            );
        }
        all_reconnected
    }
}
