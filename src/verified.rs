//! Two-phase verify-then-execute computations.
//!
//! A [`VerifiedAction`] records a list of channel-connectivity checks and one
//! deferred action. Nothing runs at construction time. `verified_run` fans
//! the checks out in parallel under the caller's timeout and only executes
//! the action when every check passed; otherwise it raises a structured
//! [`EpicsError::Connectivity`] naming every disconnected channel — without
//! ever touching the action. This gate is what makes multi-parameter
//! commands all-or-nothing: no channel is written if any required channel
//! across the whole batch is down.
//!
//! The algebra is small on purpose: `pure`, `map`, and `then` are all the
//! command layer needs. `then` unions the checks of both sides and sequences
//! the actions, so a fluent builder can keep appending verified writes and
//! defer the entire verification to one terminal `post`.

use std::future::Future;
use std::time::Duration;

use futures::future::{join_all, BoxFuture};

use crate::channel::Channel;
use crate::codec::EpicsCodec;
use crate::error::{EpicsError, EpicsResult};
use crate::system::TelltaleChannel;

/// Outcome of one connectivity probe.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelCheck {
    /// Channel the probe was about.
    pub name: String,
    /// Whether the channel ended up connected.
    pub connected: bool,
}

type CheckFn = Box<dyn FnOnce(Duration) -> BoxFuture<'static, ChannelCheck> + Send>;
type ActionFn<R> = Box<dyn FnOnce(Duration) -> BoxFuture<'static, EpicsResult<R>> + Send>;

/// A deferred computation gated behind channel-connectivity checks.
pub struct VerifiedAction<R> {
    checks: Vec<CheckFn>,
    action: ActionFn<R>,
}

impl<R: Send + 'static> VerifiedAction<R> {
    /// An action with no checks that always succeeds with `value`.
    pub fn pure(value: R) -> Self {
        Self::from_action(move |_| async move { Ok(value) })
    }

    /// Build from a deferred action with an empty check list.
    ///
    /// The closure receives the timeout `verified_run` was called with, for
    /// actions that perform their own bounded reads.
    pub fn from_action<F, Fut>(action: F) -> Self
    where
        F: FnOnce(Duration) -> Fut + Send + 'static,
        Fut: Future<Output = EpicsResult<R>> + Send + 'static,
    {
        Self {
            checks: Vec::new(),
            action: Box::new(move |t| Box::pin(action(t))),
        }
    }

    /// Append a connectivity check that must pass before the action runs.
    pub fn with_check<F, Fut>(mut self, check: F) -> Self
    where
        F: FnOnce(Duration) -> Fut + Send + 'static,
        Fut: Future<Output = ChannelCheck> + Send + 'static,
    {
        self.checks.push(Box::new(move |t| Box::pin(check(t))));
        self
    }

    /// Map over the eventual result; checks are preserved.
    pub fn map<S, F>(self, f: F) -> VerifiedAction<S>
    where
        S: Send + 'static,
        F: FnOnce(R) -> S + Send + 'static,
    {
        let action = self.action;
        VerifiedAction {
            checks: self.checks,
            action: Box::new(move |t| {
                Box::pin(async move { action(t).await.map(f) })
            }),
        }
    }

    /// Sequence with `next`: checks are unioned, actions run in order.
    ///
    /// This is the `a *> b` law — `b`'s action never starts before `a`'s
    /// finished, and a single verification phase covers both.
    pub fn then<S: Send + 'static>(self, next: VerifiedAction<S>) -> VerifiedAction<S> {
        let mut checks = self.checks;
        checks.extend(next.checks);
        let first = self.action;
        let second = next.action;
        VerifiedAction {
            checks,
            action: Box::new(move |t| {
                Box::pin(async move {
                    first(t).await?;
                    second(t).await
                })
            }),
        }
    }

    /// Number of pending checks. Mostly useful in tests.
    pub fn check_count(&self) -> usize {
        self.checks.len()
    }

    /// Run all checks in parallel, then the action if every check passed.
    ///
    /// On failure, the error names every channel that failed its check and
    /// the action is never invoked.
    pub async fn verified_run(self, timeout: Duration) -> EpicsResult<R> {
        let probes = self.checks.into_iter().map(|check| check(timeout));
        let missing: Vec<String> = join_all(probes)
            .await
            .into_iter()
            .filter(|check| !check.connected)
            .map(|check| check.name)
            .collect();
        if !missing.is_empty() {
            return Err(EpicsError::Connectivity { channels: missing });
        }
        (self.action)(timeout).await
    }
}

/// Verified single-channel write: one connectivity check, one deferred put.
///
/// The check goes through the group's telltale first; if the telltale is
/// down the whole controller is reported down under the telltale's name.
pub fn write_channel<T: EpicsCodec>(
    telltale: &TelltaleChannel,
    channel: &Channel<T>,
    value: T,
) -> VerifiedAction<()> {
    let target = channel.clone();
    VerifiedAction::from_action(move |_| async move { target.put(&value).await })
        .with_check(channel_check(telltale, channel))
}

/// Verified single-channel read: one connectivity check, one deferred get.
pub fn read_channel<T: EpicsCodec>(
    telltale: &TelltaleChannel,
    channel: &Channel<T>,
) -> VerifiedAction<T> {
    let source = channel.clone();
    VerifiedAction::from_action(move |timeout| async move { source.get(timeout).await })
        .with_check(channel_check(telltale, channel))
}

/// Connectivity check closure for one channel, telltale first.
///
/// If the telltale is down the whole controller is reported down under the
/// telltale's name; otherwise the channel itself is probed, with one bounded
/// reconnect attempt if it is disconnected.
pub fn channel_check<T: EpicsCodec>(
    telltale: &TelltaleChannel,
    channel: &Channel<T>,
) -> impl FnOnce(Duration) -> BoxFuture<'static, ChannelCheck> {
    let telltale = telltale.clone();
    let channel = channel.clone();
    move |timeout| {
        Box::pin(async move {
            if !telltale.connection_check(timeout).await {
                return ChannelCheck {
                    name: telltale.channel_name().to_string(),
                    connected: false,
                };
            }
            let connected = channel.is_connected() || channel.reconnect(timeout).await;
            ChannelCheck {
                name: channel.name().to_string(),
                connected,
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn counting_action(counter: &Arc<AtomicUsize>) -> VerifiedAction<()> {
        let counter = counter.clone();
        VerifiedAction::from_action(move |_| async move {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })
    }

    fn passing_check(name: &str) -> ChannelCheck {
        ChannelCheck {
            name: name.to_string(),
            connected: true,
        }
    }

    fn failing_check(name: &str) -> ChannelCheck {
        ChannelCheck {
            name: name.to_string(),
            connected: false,
        }
    }

    #[tokio::test]
    async fn pure_runs_without_checks() {
        let result = VerifiedAction::pure(7).verified_run(Duration::from_millis(10)).await;
        assert_eq!(result.unwrap(), 7);
    }

    #[tokio::test]
    async fn action_never_runs_when_a_check_fails() {
        let ran = Arc::new(AtomicUsize::new(0));
        let action = counting_action(&ran)
            .with_check(|_| async { passing_check("tc1:a") })
            .with_check(|_| async { failing_check("tc1:b") });

        let err = action
            .verified_run(Duration::from_millis(10))
            .await
            .unwrap_err();
        match err {
            EpicsError::Connectivity { channels } => {
                assert_eq!(channels, vec!["tc1:b".to_string()]);
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(ran.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn all_failed_channels_are_reported() {
        let action = VerifiedAction::pure(())
            .with_check(|_| async { failing_check("tc1:a") })
            .with_check(|_| async { passing_check("tc1:b") })
            .with_check(|_| async { failing_check("tc1:c") });

        let err = action
            .verified_run(Duration::from_millis(10))
            .await
            .unwrap_err();
        match err {
            EpicsError::Connectivity { mut channels } => {
                channels.sort();
                assert_eq!(channels, vec!["tc1:a".to_string(), "tc1:c".to_string()]);
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn then_unions_checks_and_sequences_actions() {
        let order = Arc::new(std::sync::Mutex::new(Vec::new()));
        let first_order = order.clone();
        let second_order = order.clone();

        let first = VerifiedAction::from_action(move |_| async move {
            first_order.lock().unwrap().push("first");
            Ok(())
        })
        .with_check(|_| async { passing_check("tc1:a") });
        let second = VerifiedAction::from_action(move |_| async move {
            second_order.lock().unwrap().push("second");
            Ok(())
        })
        .with_check(|_| async { passing_check("tc1:b") });

        let combined = first.then(second);
        assert_eq!(combined.check_count(), 2);
        combined.verified_run(Duration::from_millis(10)).await.unwrap();
        assert_eq!(*order.lock().unwrap(), vec!["first", "second"]);
    }

    #[tokio::test]
    async fn failed_check_in_either_half_blocks_both_actions() {
        let ran = Arc::new(AtomicUsize::new(0));
        let first = counting_action(&ran).with_check(|_| async { passing_check("tc1:a") });
        let second = counting_action(&ran).with_check(|_| async { failing_check("tc1:b") });

        assert!(first
            .then(second)
            .verified_run(Duration::from_millis(10))
            .await
            .is_err());
        assert_eq!(ran.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn map_preserves_checks() {
        let mapped = VerifiedAction::pure(21)
            .with_check(|_| async { passing_check("tc1:a") })
            .map(|v| v * 2);
        assert_eq!(mapped.check_count(), 1);
        assert_eq!(
            mapped.verified_run(Duration::from_millis(10)).await.unwrap(),
            42
        );
    }
}
