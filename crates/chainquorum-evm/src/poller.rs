//! The block-range poller — one tick per interval, cursor advanced only on success.
//!
//! # Tick
//! 1. Quorum-resolve the head block (`eth_blockNumber`).
//! 2. Head equal to (or below) the cursor → nothing to do.
//! 3. Range = `cursor + 1..=head`, or `head..=head` on the first run.
//! 4. Fetch logs for every target through the log source (quorum-resolved).
//! 5. Decode everything, then dispatch in chain order, then advance the cursor.
//!
//! Any failure in 1–5 leaves the cursor untouched, so the next tick retries
//! exactly the same range.
//!
//! # State machine
//! ```text
//! Idle ──▶ Polling ──▶ Advancing ──▶ Idle
//!                 └──▶ Retrying ───▶ (next tick) Polling
//! any ──▶ Stopped
//! ```

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::{broadcast, watch};

use chainquorum_core::error::QuorumError;
use chainquorum_core::quorum::QuorumClient;
use chainquorum_core::request::RpcCall;
use chainquorum_core::retry::{RetryConfig, RetryPolicy};

use crate::config::ConfigError;
use crate::contract::{ContractDescriptor, LogTarget};
use crate::cursor::{BlockCursor, NextRange};
use crate::decoder::{DecodeError, EventDecoder};
use crate::dispatcher::Dispatcher;
use crate::receipt::{ReceiptAccessor, ReceiptResolver};
use crate::source::{LogSource, RangeLogSource};
use crate::types::{parse_quantity, BlockRange, RawLog};

/// Capacity of the diagnostics broadcast channel.
const DIAGNOSTICS_CAPACITY: usize = 256;

/// Poller timing and failure policy.
#[derive(Debug, Clone)]
pub struct PollerConfig {
    /// Delay between ticks.
    pub interval: Duration,
    /// Extra delay after consecutive failures: `interval + backoff(n)`.
    pub backoff: RetryPolicy,
    /// Alert every this many consecutive failures.
    pub alert_after: u32,
    /// Stop on the first decode error instead of retrying.
    pub fail_fast_on_decode_error: bool,
}

impl Default for PollerConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(5),
            backoff: RetryPolicy::new(RetryConfig {
                max_retries: u32::MAX,
                initial_backoff_ms: 1_000,
                max_backoff_ms: 60_000,
                multiplier: 2.0,
            }),
            alert_after: 5,
            fail_fast_on_decode_error: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollerState {
    Idle,
    Polling,
    Advancing,
    Retrying,
    Stopped,
}

/// Operator-visible diagnostics, published on a broadcast channel.
#[derive(Debug, Clone, PartialEq)]
pub enum PollerEvent {
    Advanced {
        range: BlockRange,
        events: usize,
        dispatched: usize,
    },
    Unchanged {
        head: u64,
        cursor: Option<u64>,
    },
    TickFailed {
        error: String,
        retryable: bool,
        consecutive_failures: u32,
    },
    Alert {
        consecutive_failures: u32,
        last_error: String,
    },
    Stopped {
        cursor: Option<u64>,
    },
}

/// Why a tick failed. The cursor is untouched in every case.
#[derive(Debug, Error)]
pub enum PollError {
    #[error(transparent)]
    Quorum(#[from] QuorumError),

    #[error("malformed provider response: {0}")]
    MalformedResponse(String),

    #[error(transparent)]
    Decode(#[from] DecodeError),
}

impl PollError {
    /// Quorum failures and odd responses may clear up on their own; decode
    /// errors need an operator.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Quorum(e) => e.is_retryable(),
            Self::MalformedResponse(_) => true,
            Self::Decode(_) => false,
        }
    }
}

/// Result of one successful tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    Advanced {
        range: BlockRange,
        events: usize,
        dispatched: usize,
    },
    Unchanged {
        head: u64,
    },
}

/// Owns the cursor and the log source; drives decode and dispatch.
pub struct Poller {
    client: Arc<QuorumClient>,
    source: Box<dyn LogSource>,
    targets: Vec<LogTarget>,
    decoder: EventDecoder,
    dispatcher: Dispatcher,
    receipts: Arc<ReceiptResolver>,
    cursor: BlockCursor,
    state: PollerState,
    failures: u32,
    config: PollerConfig,
    diagnostics: broadcast::Sender<PollerEvent>,
}

impl Poller {
    pub fn new(
        client: Arc<QuorumClient>,
        contracts: &[ContractDescriptor],
        dispatcher: Dispatcher,
        receipts: Arc<ReceiptResolver>,
        config: PollerConfig,
    ) -> Result<Self, ConfigError> {
        let decoder = EventDecoder::new(contracts)?;
        let targets = contracts
            .iter()
            .flat_map(|c| c.targets().iter().cloned())
            .collect();
        let (diagnostics, _) = broadcast::channel(DIAGNOSTICS_CAPACITY);
        Ok(Self {
            client,
            source: Box::new(RangeLogSource),
            targets,
            decoder,
            dispatcher,
            receipts,
            cursor: BlockCursor::new(),
            state: PollerState::Idle,
            failures: 0,
            config,
            diagnostics,
        })
    }

    pub fn with_source(mut self, source: Box<dyn LogSource>) -> Self {
        self.source = source;
        self
    }

    /// Resume from a known position instead of bootstrapping at head.
    pub fn with_cursor(mut self, cursor: BlockCursor) -> Self {
        self.cursor = cursor;
        self
    }

    pub fn cursor(&self) -> BlockCursor {
        self.cursor
    }

    pub fn state(&self) -> PollerState {
        self.state
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.failures
    }

    pub fn targets(&self) -> &[LogTarget] {
        &self.targets
    }

    /// Subscribe to diagnostics.
    pub fn subscribe(&self) -> broadcast::Receiver<PollerEvent> {
        self.diagnostics.subscribe()
    }

    /// Sender half, for owners that need to hand out receivers after the
    /// poller has been moved into its task.
    pub fn diagnostics(&self) -> broadcast::Sender<PollerEvent> {
        self.diagnostics.clone()
    }

    /// Delay before the next tick: the interval plus failure backoff.
    pub fn next_delay(&self) -> Duration {
        self.config.interval + self.config.backoff.backoff(self.failures)
    }

    /// Run one tick and update failure bookkeeping and diagnostics.
    pub async fn tick(&mut self) -> Result<TickOutcome, PollError> {
        self.state = PollerState::Polling;
        let result = self.poll_once().await;
        match &result {
            Ok(TickOutcome::Advanced {
                range,
                events,
                dispatched,
            }) => {
                tracing::info!(from = range.from, to = range.to, events, dispatched, "range processed");
                self.emit(PollerEvent::Advanced {
                    range: *range,
                    events: *events,
                    dispatched: *dispatched,
                });
            }
            Ok(TickOutcome::Unchanged { head }) => {
                tracing::debug!(head, cursor = ?self.cursor.last(), "no new blocks");
                self.emit(PollerEvent::Unchanged {
                    head: *head,
                    cursor: self.cursor.last(),
                });
            }
            Err(e) => self.record_failure(e),
        }
        if result.is_ok() {
            self.failures = 0;
            self.state = PollerState::Idle;
        }
        result
    }

    async fn poll_once(&mut self) -> Result<TickOutcome, PollError> {
        let head = resolve_head(&self.client).await?;
        let range = match self.cursor.next_range(head) {
            NextRange::Bootstrap(range) | NextRange::Advance(range) => range,
            NextRange::Unchanged => return Ok(TickOutcome::Unchanged { head }),
            NextRange::Behind { cursor, head } => {
                tracing::debug!(cursor, head, "quorum head behind cursor; waiting");
                return Ok(TickOutcome::Unchanged { head });
            }
        };

        let per_target = self.source.fetch(&self.client, &self.targets, range).await?;
        let mut logs: Vec<RawLog> = per_target
            .into_iter()
            .flatten()
            .filter(|l| !l.is_removed())
            .collect();
        logs.sort_by_key(RawLog::position);
        logs.dedup_by_key(|l| l.position());

        let events = logs
            .iter()
            .map(|l| self.decoder.decode(l))
            .collect::<Result<Vec<_>, _>>()?;

        self.state = PollerState::Advancing;
        let count = events.len();
        let mut dispatched = 0;
        for event in events {
            let receipt = ReceiptAccessor::new(self.receipts.clone(), event.transaction_hash.clone());
            dispatched += self.dispatcher.dispatch(event, receipt);
        }
        self.cursor.advance(range.to);
        Ok(TickOutcome::Advanced {
            range,
            events: count,
            dispatched,
        })
    }

    fn record_failure(&mut self, error: &PollError) {
        self.failures = self.failures.saturating_add(1);
        self.state = PollerState::Retrying;
        match error {
            PollError::Decode(e) => tracing::error!(
                critical = true,
                error = %e,
                cursor = ?self.cursor.last(),
                "log decode failed; cursor not advanced"
            ),
            e => tracing::warn!(
                error = %e,
                consecutive_failures = self.failures,
                cursor = ?self.cursor.last(),
                "tick failed; range will be retried"
            ),
        }
        self.emit(PollerEvent::TickFailed {
            error: error.to_string(),
            retryable: error.is_retryable(),
            consecutive_failures: self.failures,
        });
        if self.failures % self.config.alert_after.max(1) == 0 {
            tracing::error!(
                consecutive_failures = self.failures,
                last_error = %error,
                "poller has been failing repeatedly"
            );
            self.emit(PollerEvent::Alert {
                consecutive_failures: self.failures,
                last_error: error.to_string(),
            });
        }
    }

    fn emit(&self, event: PollerEvent) {
        // No subscribers is fine.
        let _ = self.diagnostics.send(event);
    }

    /// Tick until `shutdown` flips to `true` (or its sender is dropped).
    ///
    /// The first tick runs immediately. Shutdown interrupts an in-flight tick;
    /// its results are discarded.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        tracing::info!(
            targets = self.targets.len(),
            source = ?self.source.kind(),
            interval_ms = self.config.interval.as_millis() as u64,
            "poller started"
        );
        loop {
            if *shutdown.borrow() {
                break;
            }
            let result = tokio::select! {
                r = self.tick() => r,
                _ = shutdown.changed() => break,
            };
            if matches!(result, Err(PollError::Decode(_))) && self.config.fail_fast_on_decode_error {
                tracing::error!(critical = true, "stopping on decode error (fail_fast_on_decode_error)");
                break;
            }
            let delay = self.next_delay();
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = shutdown.changed() => break,
            }
        }
        self.finish().await;
    }

    async fn finish(&mut self) {
        self.dispatcher.close();
        self.source.release(&self.client).await;
        self.state = PollerState::Stopped;
        tracing::info!(cursor = ?self.cursor.last(), "poller stopped");
        self.emit(PollerEvent::Stopped {
            cursor: self.cursor.last(),
        });
    }
}

async fn resolve_head(client: &QuorumClient) -> Result<u64, PollError> {
    let decision = client.call(&[RpcCall::block_number()]).await?;
    let head = decision
        .results()
        .first()
        .and_then(|v| v.as_str())
        .and_then(parse_quantity)
        .ok_or_else(|| PollError::MalformedResponse("eth_blockNumber result is not a quantity".into()))?;
    tracing::trace!(head, provider = %decision.provider, agreeing = decision.agreeing, "head resolved");
    Ok(head)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spawnable(poller: Poller, shutdown: watch::Receiver<bool>) -> impl std::future::Future<Output = ()> + Send + 'static {
        poller.run(shutdown)
    }

    #[test]
    fn poller_can_run_on_a_spawned_task() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<Poller>();
        assert_send_sync::<Box<dyn LogSource>>();
        let _ = spawnable;
    }

    #[test]
    fn poll_error_retryability() {
        let q = PollError::Quorum(QuorumError::NotReached {
            required: 2,
            agreeing: 1,
            usable: 3,
            total: 3,
        });
        assert!(q.is_retryable());
        let d = PollError::Decode(DecodeError::UnknownContract {
            address: "0x01".into(),
        });
        assert!(!d.is_retryable());
    }

    #[test]
    fn default_backoff_grows_and_caps() {
        let cfg = PollerConfig::default();
        assert_eq!(cfg.backoff.backoff(0), Duration::ZERO);
        assert_eq!(cfg.backoff.backoff(1), Duration::from_secs(1));
        assert_eq!(cfg.backoff.backoff(3), Duration::from_secs(4));
        assert_eq!(cfg.backoff.backoff(20), Duration::from_secs(60));
    }
}
