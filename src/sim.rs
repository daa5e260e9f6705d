//! In-memory channel provider for tests.
//!
//! Simulates the process-variable network without hardware: every channel is
//! a named slot with a value and an online flag. The provider records every
//! call for verification, supports failure injection (offline channels,
//! rejected puts), and can emulate the apply/CAR record behavior so command
//! posts run their full trigger-and-poll cycle against it.
//!
//! This mirrors how the production transport behaves from the layer's point
//! of view; it is not a simulation of any real controller.

#![allow(clippy::unwrap_used, clippy::panic)]
// Lock poisoning or a missing channel in here is a broken test, not a
// runtime condition worth propagating.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::error::{EpicsError, EpicsResult};
use crate::transport::{ChannelHandle, ChannelProvider, ConnectionState, WireValue};

/// How the simulated apply/CAR record reacts to a Start trigger.
#[derive(Debug, Clone)]
pub enum SimApplyMode {
    /// Bump the completion id and report idle (the command completed).
    Complete,
    /// Bump the completion id and report paused.
    Pause,
    /// Report the error state with this message.
    Error(String),
    /// Do nothing; the poller runs into its deadline.
    Silent,
}

/// Channel names of one simulated apply/CAR pairing.
#[derive(Debug, Clone)]
pub struct SimApplyLink {
    /// Apply direction channel.
    pub dir: String,
    /// CAR completion-id channel.
    pub clid: String,
    /// CAR state channel.
    pub val: String,
    /// CAR error-message channel.
    pub omss: String,
}

struct SimChannel {
    id: u64,
    value: WireValue,
    online: bool,
    hold_offline: bool,
    reject_puts: Option<String>,
    value_subs: Vec<mpsc::Sender<WireValue>>,
    connection_subs: Vec<mpsc::Sender<bool>>,
}

impl SimChannel {
    fn new(id: u64, value: WireValue) -> Self {
        Self {
            id,
            value,
            online: true,
            hold_offline: false,
            reject_puts: None,
            value_subs: Vec::new(),
            connection_subs: Vec::new(),
        }
    }
}

#[derive(Default)]
struct SimState {
    channels: HashMap<String, SimChannel>,
    next_id: u64,
    call_log: Vec<String>,
    apply_links: Vec<SimApplyLink>,
    apply_mode: Option<SimApplyMode>,
}

impl SimState {
    fn channel_mut(&mut self, name: &str) -> &mut SimChannel {
        self.channels
            .get_mut(name)
            .unwrap_or_else(|| panic!("sim channel not registered: {name}"))
    }

    fn ensure_channel(&mut self, name: &str, initial: WireValue) -> &mut SimChannel {
        if !self.channels.contains_key(name) {
            self.next_id += 1;
            let channel = SimChannel::new(self.next_id, initial);
            self.channels.insert(name.to_string(), channel);
        }
        self.channel_mut(name)
    }

    fn notify_value(&mut self, name: &str) {
        let channel = self.channel_mut(name);
        let value = channel.value.clone();
        channel
            .value_subs
            .retain(|tx| tx.try_send(value.clone()).is_ok());
    }

    fn notify_connection(&mut self, name: &str, up: bool) {
        let channel = self.channel_mut(name);
        channel.connection_subs.retain(|tx| tx.try_send(up).is_ok());
    }

    fn store(&mut self, name: &str, value: WireValue) {
        self.channel_mut(name).value = value;
        self.notify_value(name);
    }

    /// Emulate the CAR reaction when a Start directive lands on a linked
    /// apply channel.
    fn run_apply_links(&mut self, name: &str, value: &WireValue) {
        if *value != WireValue::Enum(3) {
            // Only a Start directive moves the CAR.
            return;
        }
        let links: Vec<SimApplyLink> = self
            .apply_links
            .iter()
            .filter(|link| link.dir == name)
            .cloned()
            .collect();
        for link in links {
            let mode = self.apply_mode.clone().unwrap_or(SimApplyMode::Complete);
            match mode {
                SimApplyMode::Complete | SimApplyMode::Pause => {
                    let next_id = match self.channel_mut(&link.clid).value {
                        WireValue::Int(v) => v + 1,
                        _ => 1,
                    };
                    self.store(&link.clid, WireValue::Int(next_id));
                    let state = if matches!(mode, SimApplyMode::Pause) {
                        WireValue::Enum(1)
                    } else {
                        WireValue::Enum(0)
                    };
                    self.store(&link.val, state);
                }
                SimApplyMode::Error(message) => {
                    self.store(&link.val, WireValue::Enum(3));
                    self.store(&link.omss, WireValue::Str(message));
                }
                SimApplyMode::Silent => {}
            }
        }
    }
}

/// Simulated process-variable network.
#[derive(Clone, Default)]
pub struct SimChannelProvider {
    state: Arc<Mutex<SimState>>,
}

impl SimChannelProvider {
    /// Empty network; channels appear on first `connect` or via
    /// [`SimChannelProvider::create_channel`].
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a channel with an initial value, online.
    pub fn create_channel(&self, name: &str, initial: WireValue) {
        let mut state = self.state.lock().unwrap();
        state.ensure_channel(name, initial);
    }

    /// Overwrite a channel's value from the "hardware" side and notify
    /// subscribers. Does not count as a put.
    pub fn set_value(&self, name: &str, value: WireValue) {
        let mut state = self.state.lock().unwrap();
        state.channel_mut(name).value = value;
        state.notify_value(name);
    }

    /// Current value of a channel.
    pub fn value(&self, name: &str) -> WireValue {
        let mut state = self.state.lock().unwrap();
        state.channel_mut(name).value.clone()
    }

    /// Flip a channel's online state and notify connection subscribers.
    /// Bringing a channel online clears a previous [`Self::hold_offline`].
    pub fn set_online(&self, name: &str, online: bool) {
        let mut state = self.state.lock().unwrap();
        {
            let channel = state.channel_mut(name);
            channel.online = online;
            if online {
                channel.hold_offline = false;
            }
        }
        state.notify_connection(name, online);
    }

    /// Keep a channel down across reconnect attempts.
    pub fn hold_offline(&self, name: &str) {
        let mut state = self.state.lock().unwrap();
        let channel = state.channel_mut(name);
        channel.online = false;
        channel.hold_offline = true;
    }

    /// Make every put to a channel fail with the given remote message.
    pub fn reject_puts(&self, name: &str, message: &str) {
        let mut state = self.state.lock().unwrap();
        state.channel_mut(name).reject_puts = Some(message.to_string());
    }

    /// Wire an apply direction channel to its CAR fields.
    pub fn link_apply(&self, link: SimApplyLink) {
        let mut state = self.state.lock().unwrap();
        state.ensure_channel(&link.dir, WireValue::Enum(1));
        state.ensure_channel(&link.clid, WireValue::Int(0));
        state.ensure_channel(&link.val, WireValue::Enum(0));
        state.ensure_channel(&link.omss, WireValue::Str(String::new()));
        state.apply_links.push(link);
    }

    /// Select how linked apply records react to the next triggers.
    pub fn set_apply_mode(&self, mode: SimApplyMode) {
        let mut state = self.state.lock().unwrap();
        state.apply_mode = Some(mode);
    }

    /// Every provider call made so far, in order (`op:channel`).
    pub fn call_log(&self) -> Vec<String> {
        self.state.lock().unwrap().call_log.clone()
    }

    /// Forget the call log.
    pub fn clear_log(&self) {
        self.state.lock().unwrap().call_log.clear();
    }

    /// Number of puts issued to one channel.
    pub fn put_count(&self, name: &str) -> usize {
        let needle = format!("put:{name}");
        self.state
            .lock()
            .unwrap()
            .call_log
            .iter()
            .filter(|call| **call == needle)
            .count()
    }

    fn log(&self, op: &str, name: &str) {
        self.state
            .lock()
            .unwrap()
            .call_log
            .push(format!("{op}:{name}"));
    }
}

#[async_trait]
impl ChannelProvider for SimChannelProvider {
    async fn connect(&self, name: &str, _timeout: Duration) -> EpicsResult<ChannelHandle> {
        self.log("connect", name);
        let mut state = self.state.lock().unwrap();
        let (id, came_online) = {
            let channel = state.ensure_channel(name, WireValue::Str(String::new()));
            let came_online = !channel.hold_offline && !channel.online;
            if came_online {
                channel.online = true;
            }
            (channel.id, came_online)
        };
        if came_online {
            state.notify_connection(name, true);
        }
        Ok(ChannelHandle::new(id, name))
    }

    async fn get(&self, handle: &ChannelHandle, _timeout: Duration) -> EpicsResult<WireValue> {
        self.log("get", handle.name());
        let mut state = self.state.lock().unwrap();
        let channel = state.channel_mut(handle.name());
        if !channel.online {
            return Err(EpicsError::Disconnected(handle.name().to_string()));
        }
        Ok(channel.value.clone())
    }

    async fn put(&self, handle: &ChannelHandle, value: WireValue) -> EpicsResult<()> {
        self.log("put", handle.name());
        let mut state = self.state.lock().unwrap();
        {
            let channel = state.channel_mut(handle.name());
            if !channel.online {
                return Err(EpicsError::Disconnected(handle.name().to_string()));
            }
            if let Some(message) = &channel.reject_puts {
                return Err(EpicsError::WriteRejected(message.clone()));
            }
        }
        state.store(handle.name(), value.clone());
        state.run_apply_links(handle.name(), &value);
        Ok(())
    }

    async fn subscribe_value(
        &self,
        handle: &ChannelHandle,
    ) -> EpicsResult<mpsc::Receiver<WireValue>> {
        let (tx, rx) = mpsc::channel(64);
        let mut state = self.state.lock().unwrap();
        state.channel_mut(handle.name()).value_subs.push(tx);
        Ok(rx)
    }

    async fn subscribe_connection(
        &self,
        handle: &ChannelHandle,
    ) -> EpicsResult<mpsc::Receiver<bool>> {
        let (tx, rx) = mpsc::channel(64);
        let mut state = self.state.lock().unwrap();
        state.channel_mut(handle.name()).connection_subs.push(tx);
        Ok(rx)
    }

    fn connection_state(&self, handle: &ChannelHandle) -> ConnectionState {
        self.log("state", handle.name());
        let state = self.state.lock().unwrap();
        match state.channels.get(handle.name()) {
            Some(channel) if channel.online => ConnectionState::Connected,
            Some(_) => ConnectionState::Disconnected,
            None => ConnectionState::Disconnected,
        }
    }
}
