//! Typed wrapper over one remote process variable.
//!
//! A [`Channel`] pairs a transport handle with a codec type and exposes the
//! operations the rest of the crate builds on: blocking-with-timeout get/put,
//! lazily-started value/connection/event streams, and a bounded reconnect
//! attempt. Channels are owned by the subsystem that opened them and are
//! cheap to clone (the clone shares the provider and handle).

use std::marker::PhantomData;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::Stream;
use tokio_stream::wrappers::ReceiverStream;
use tokio_stream::StreamExt;

use crate::codec::EpicsCodec;
use crate::error::EpicsResult;
use crate::transport::{ChannelHandle, ChannelProvider, ConnectionState};

/// One update observed on a channel's merged event stream.
#[derive(Debug, Clone, PartialEq)]
pub enum ChannelEvent<T> {
    /// The channel's value changed.
    Value(T),
    /// The channel (re)connected.
    Connected,
    /// The channel dropped its connection.
    Disconnected,
}

/// Typed handle to one named remote variable.
pub struct Channel<T: EpicsCodec> {
    provider: Arc<dyn ChannelProvider>,
    handle: ChannelHandle,
    _value: PhantomData<fn() -> T>,
}

impl<T: EpicsCodec> Clone for Channel<T> {
    fn clone(&self) -> Self {
        Self {
            provider: Arc::clone(&self.provider),
            handle: self.handle.clone(),
            _value: PhantomData,
        }
    }
}

impl<T: EpicsCodec> std::fmt::Debug for Channel<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Channel")
            .field("name", &self.handle.name())
            .field("state", &self.connection_state())
            .finish()
    }
}

impl<T: EpicsCodec> Channel<T> {
    /// Wrap a handle obtained from [`ChannelProvider::connect`].
    pub fn new(provider: Arc<dyn ChannelProvider>, handle: ChannelHandle) -> Self {
        Self {
            provider,
            handle,
            _value: PhantomData,
        }
    }

    /// Full channel name as resolved on the network.
    pub fn name(&self) -> &str {
        self.handle.name()
    }

    /// Current connection state (local bookkeeping, no network round trip).
    pub fn connection_state(&self) -> ConnectionState {
        self.provider.connection_state(&self.handle)
    }

    /// Whether the channel is currently usable.
    pub fn is_connected(&self) -> bool {
        self.connection_state().is_connected()
    }

    /// Read and decode the current value, waiting at most `timeout`.
    pub async fn get(&self, timeout: Duration) -> EpicsResult<T> {
        let wire = self.provider.get(&self.handle, timeout).await?;
        T::decode(&wire)
    }

    /// Encode and write a value.
    pub async fn put(&self, value: &T) -> EpicsResult<()> {
        self.provider.put(&self.handle, value.encode()).await
    }

    /// Attempt one reconnect bounded by `timeout`.
    ///
    /// Connectivity is a boolean fact at this layer, not an error: the
    /// result reports whether the channel ended up connected.
    pub async fn reconnect(&self, timeout: Duration) -> bool {
        match self.provider.connect(self.handle.name(), timeout).await {
            Ok(_) => self.is_connected(),
            Err(_) => false,
        }
    }

    /// Lazily-started stream of decoded value updates.
    ///
    /// Each call opens an independent subscription; dropping the stream
    /// releases it.
    pub async fn value_stream(&self) -> EpicsResult<impl Stream<Item = EpicsResult<T>>> {
        let rx = self.provider.subscribe_value(&self.handle).await?;
        Ok(ReceiverStream::new(rx).map(|wire| T::decode(&wire)))
    }

    /// Lazily-started stream of connection transitions (`true` = connected).
    pub async fn connection_stream(&self) -> EpicsResult<impl Stream<Item = bool>> {
        let rx = self.provider.subscribe_connection(&self.handle).await?;
        Ok(ReceiverStream::new(rx))
    }

    /// Merged stream of value updates and connection transitions.
    pub async fn event_stream(
        &self,
    ) -> EpicsResult<impl Stream<Item = EpicsResult<ChannelEvent<T>>>> {
        let values = self
            .provider
            .subscribe_value(&self.handle)
            .await
            .map(ReceiverStream::new)?
            .map(|wire| T::decode(&wire).map(ChannelEvent::Value));
        let connections = self
            .provider
            .subscribe_connection(&self.handle)
            .await
            .map(ReceiverStream::new)?
            .map(|up| {
                Ok(if up {
                    ChannelEvent::Connected
                } else {
                    ChannelEvent::Disconnected
                })
            });
        Ok(values.merge(connections))
    }
}

/// Type-erased channel handle, enough for group-level health bookkeeping.
///
/// Implemented by every [`Channel`]; lets an
/// [`crate::system::EpicsSystem`] hold heterogeneous channels.
#[async_trait]
pub trait RemoteChannel: Send + Sync {
    /// Full channel name.
    fn name(&self) -> &str;

    /// Current connection state.
    fn connection_state(&self) -> ConnectionState;

    /// Attempt one reconnect bounded by `timeout`; reports the outcome.
    async fn reconnect(&self, timeout: Duration) -> bool;
}

#[async_trait]
impl<T: EpicsCodec> RemoteChannel for Channel<T> {
    fn name(&self) -> &str {
        Channel::name(self)
    }

    fn connection_state(&self) -> ConnectionState {
        Channel::connection_state(self)
    }

    async fn reconnect(&self, timeout: Duration) -> bool {
        Channel::reconnect(self, timeout).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::SimChannelProvider;
    use crate::transport::WireValue;

    fn provider() -> Arc<dyn ChannelProvider> {
        Arc::new(SimChannelProvider::new())
    }

    #[tokio::test]
    async fn get_decodes_typed_value() {
        let sim = SimChannelProvider::new();
        sim.create_channel("tc1:rotMove.A", WireValue::Double(12.5));
        let provider: Arc<dyn ChannelProvider> = Arc::new(sim);

        let handle = provider
            .connect("tc1:rotMove.A", Duration::from_secs(1))
            .await
            .unwrap();
        let channel: Channel<f64> = Channel::new(Arc::clone(&provider), handle);
        assert_eq!(channel.get(Duration::from_secs(1)).await.unwrap(), 12.5);
    }

    #[tokio::test]
    async fn put_encodes_typed_value() {
        let provider = provider();
        let handle = provider
            .connect("tc1:rotMove.A", Duration::from_secs(1))
            .await
            .unwrap();
        let channel: Channel<f64> = Channel::new(Arc::clone(&provider), handle);
        channel.put(&123.456).await.unwrap();
        assert_eq!(
            channel.get(Duration::from_secs(1)).await.unwrap(),
            123.456
        );
    }

    #[tokio::test]
    async fn value_stream_yields_updates() {
        let sim = Arc::new(SimChannelProvider::new());
        sim.create_channel("tc1:sad:nodState", WireValue::Str("A".into()));
        let provider: Arc<dyn ChannelProvider> = sim.clone();

        let handle = provider
            .connect("tc1:sad:nodState", Duration::from_secs(1))
            .await
            .unwrap();
        let channel: Channel<String> = Channel::new(Arc::clone(&provider), handle);
        let stream = channel.value_stream().await.unwrap();
        tokio::pin!(stream);

        sim.set_value("tc1:sad:nodState", WireValue::Str("B".into()));
        let update = stream.next().await.unwrap().unwrap();
        assert_eq!(update, "B");
    }

    #[tokio::test]
    async fn event_stream_reports_disconnects() {
        let sim = Arc::new(SimChannelProvider::new());
        sim.create_channel("tc1:sad:health", WireValue::Str("GOOD".into()));
        let provider: Arc<dyn ChannelProvider> = sim.clone();

        let handle = provider
            .connect("tc1:sad:health", Duration::from_secs(1))
            .await
            .unwrap();
        let channel: Channel<String> = Channel::new(Arc::clone(&provider), handle);
        let events = channel.event_stream().await.unwrap();
        tokio::pin!(events);

        sim.set_online("tc1:sad:health", false);
        let event = events.next().await.unwrap().unwrap();
        assert_eq!(event, ChannelEvent::Disconnected);
    }
}
