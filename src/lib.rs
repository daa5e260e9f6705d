//! Verified command and status channel layer for telescope control.
//!
//! This library wraps an EPICS-style process-variable transport with typed
//! channels, connectivity verification, N-ary command builders, the
//! apply/CAR completion protocol, and the M2 tip-tilt guide reconciliation
//! used by the telescope sequencer. A deterministic in-process simulator is
//! included for tests.

pub mod apply;
pub mod channel;
pub mod codec;
pub mod command;
pub mod config;
pub mod error;
pub mod guide;
pub mod sim;
pub mod system;
pub mod tcs;
pub mod transport;
pub mod verified;

pub use apply::{ApplyCommandResult, ApplyRecord, CarState};
pub use channel::{Channel, ChannelEvent};
pub use codec::{BinaryOnOff, EpicsCodec};
pub use command::{CadDirective, ParameterList};
pub use config::EpicsConfig;
pub use error::{EpicsError, EpicsResult};
pub use system::{EpicsSystem, TelltaleChannel};
pub use tcs::{TcsCommands, TcsEpics, TcsStatus};
pub use transport::{ChannelHandle, ChannelProvider, ConnectionState, WireValue};
pub use verified::VerifiedAction;
