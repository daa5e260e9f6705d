//! Apply/trigger protocol against a completion/activity record.
//!
//! The control-network convention pairs an "apply" record that starts every
//! marked action with a CAR (completion/activity record) that reports
//! progress: a state field, a monotonically changing completion id, and an
//! error-message field. [`ApplyRecord::post_with`] submits a command and
//! polls the CAR until completion, remote error, or the caller's deadline.
//!
//! The completion id is snapshotted *before* the trigger is written, so a
//! command that completes faster than the first poll is still observed — the
//! protocol never requires seeing a transient busy state.

use std::time::Duration;

use tokio::time::{sleep, Instant};
use tracing::{debug, info, trace};

use crate::channel::Channel;
use crate::codec::EpicsCodec;
use crate::command::{CadDirective, ParameterList};
use crate::error::{EpicsError, EpicsResult};
use crate::system::TelltaleChannel;
use crate::transport::WireValue;
use crate::verified::{channel_check, VerifiedAction};

/// State field of a completion/activity record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CarState {
    /// No action in progress.
    Idle,
    /// Action paused by the remote system.
    Paused,
    /// Action processing.
    Busy,
    /// Action failed; the record's message field carries the reason.
    Error,
}

impl EpicsCodec for CarState {
    fn encode(&self) -> WireValue {
        let index = match self {
            CarState::Idle => 0,
            CarState::Paused => 1,
            CarState::Busy => 2,
            CarState::Error => 3,
        };
        WireValue::Enum(index)
    }

    fn decode(value: &WireValue) -> EpicsResult<Self> {
        let index = match value {
            WireValue::Enum(v) => i64::from(*v),
            WireValue::Int(v) => i64::from(*v),
            other => {
                return Err(EpicsError::Conversion(format!("not a CAR state: {other}")))
            }
        };
        match index {
            0 => Ok(CarState::Idle),
            1 => Ok(CarState::Paused),
            2 => Ok(CarState::Busy),
            3 => Ok(CarState::Error),
            other => Err(EpicsError::Conversion(format!(
                "CAR state index out of range: {other}"
            ))),
        }
    }
}

/// Outcome of a completed apply cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyCommandResult {
    /// The remote system parked the command in the paused state.
    Paused,
    /// The command ran to completion.
    Completed,
}

/// Apply trigger channel paired with its completion record.
pub struct ApplyRecord {
    telltale: TelltaleChannel,
    apply_dir: Channel<CadDirective>,
    car_val: Channel<CarState>,
    car_clid: Channel<i32>,
    car_omss: Channel<String>,
    poll_interval: Duration,
}

impl ApplyRecord {
    /// Bundle the apply direction channel with the CAR's three fields.
    pub fn new(
        telltale: TelltaleChannel,
        apply_dir: Channel<CadDirective>,
        car_val: Channel<CarState>,
        car_clid: Channel<i32>,
        car_omss: Channel<String>,
        poll_interval: Duration,
    ) -> Self {
        Self {
            telltale,
            apply_dir,
            car_val,
            car_clid,
            car_omss,
            poll_interval,
        }
    }

    /// Submit `params` followed by the trigger, then poll to completion.
    ///
    /// The parameter batch and the apply/CAR channels are verified together:
    /// if any required channel is disconnected, nothing is written anywhere.
    /// `timeout` bounds the whole cycle; on expiry the trigger may already
    /// be in flight remotely and the hardware settles on its own.
    pub async fn post_with(
        &self,
        params: ParameterList,
        timeout: Duration,
    ) -> EpicsResult<ApplyCommandResult> {
        params
            .compile()
            .then(self.trigger_and_poll())
            .verified_run(timeout)
            .await
    }

    /// Trigger with no parameters (the marked records carry the command).
    pub async fn post(&self, timeout: Duration) -> EpicsResult<ApplyCommandResult> {
        self.post_with(ParameterList::new(), timeout).await
    }

    fn trigger_and_poll(&self) -> VerifiedAction<ApplyCommandResult> {
        let dir = self.apply_dir.clone();
        let val = self.car_val.clone();
        let clid = self.car_clid.clone();
        let omss = self.car_omss.clone();
        let poll_interval = self.poll_interval;
        VerifiedAction::from_action(move |timeout| async move {
            run_apply_cycle(&dir, &val, &clid, &omss, poll_interval, timeout).await
        })
        .with_check(channel_check(&self.telltale, &self.apply_dir))
        .with_check(channel_check(&self.telltale, &self.car_val))
        .with_check(channel_check(&self.telltale, &self.car_clid))
        .with_check(channel_check(&self.telltale, &self.car_omss))
    }
}

async fn run_apply_cycle(
    dir: &Channel<CadDirective>,
    val: &Channel<CarState>,
    clid: &Channel<i32>,
    omss: &Channel<String>,
    poll_interval: Duration,
    timeout: Duration,
) -> EpicsResult<ApplyCommandResult> {
    let deadline = Instant::now() + timeout;

    // Snapshot completion id and message before triggering, so a completion
    // that lands before the first poll is still detected and a stale message
    // from an earlier command is not mistaken for a new failure.
    let previous_id = clid.get(timeout).await?;
    let previous_message = omss.get(timeout).await?;

    debug!(channel = %dir.name(), previous_id, "triggering apply record");
    dir.put(&CadDirective::Start).await?;

    loop {
        let state = val.get(timeout).await?;
        let id = clid.get(timeout).await?;
        let message = omss.get(timeout).await?;
        trace!(?state, id, %message, "apply poll");

        if state == CarState::Error {
            let reason = if message.is_empty() {
                "command error with no message".to_string()
            } else {
                message
            };
            return Err(EpicsError::Command(reason));
        }
        if !message.is_empty() && message != previous_message {
            return Err(EpicsError::Command(message));
        }
        if id != previous_id && state != CarState::Busy {
            let result = if state == CarState::Paused {
                ApplyCommandResult::Paused
            } else {
                ApplyCommandResult::Completed
            };
            info!(channel = %dir.name(), id, ?result, "apply command finished");
            return Ok(result);
        }
        if Instant::now() >= deadline {
            debug!(channel = %dir.name(), "apply command timed out");
            return Err(EpicsError::CommandTimeout);
        }
        sleep(poll_interval).await;
    }
}
