//! Event dispatcher — routes decoded events to registered handlers.
//!
//! Every subscription owns a worker task fed by an unbounded channel:
//!
//! ```text
//! dispatch(ev) ──▶ [sub 1 queue] ──▶ worker 1 ──▶ handler 1 (started in order)
//!              └─▶ [sub 2 queue] ──▶ worker 2 ──▶ handler 2 (started in order)
//! ```
//!
//! `dispatch` only enqueues, so the poller never waits for a handler. A worker
//! starts its handler invocations in dispatch order and runs them
//! concurrently; a slow invocation does not hold back the next one. A handler
//! error or panic is logged and confined to its own invocation.
//!
//! `close` cancels everything: queued events are dropped and in-flight
//! invocations are abandoned at their next suspension point.

use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use futures::stream::FuturesUnordered;
use futures::{FutureExt, StreamExt};
use thiserror::Error;
use tokio::sync::{mpsc, watch};

use crate::decoder::DecodedEvent;
use crate::receipt::ReceiptAccessor;

/// A decoded event plus its receipt accessor, as handlers receive it.
#[derive(Debug, Clone)]
pub struct DispatchedEvent {
    pub event: Arc<DecodedEvent>,
    pub receipt: ReceiptAccessor,
}

impl std::ops::Deref for DispatchedEvent {
    type Target = DecodedEvent;

    fn deref(&self) -> &DecodedEvent {
        &self.event
    }
}

/// User-provided event handler.
///
/// Implemented for any `Fn(DispatchedEvent) -> impl Future<Output =
/// anyhow::Result<()>>`, so plain async closures work.
#[async_trait]
pub trait EventHandler: Send + Sync + 'static {
    async fn handle(&self, event: DispatchedEvent) -> anyhow::Result<()>;
}

#[async_trait]
impl<F, Fut> EventHandler for F
where
    F: Fn(DispatchedEvent) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    async fn handle(&self, event: DispatchedEvent) -> anyhow::Result<()> {
        (self)(event).await
    }
}

/// Identifies one `on` registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(u64);

impl std::fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "sub-{}", self.0)
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DispatchError {
    #[error("event '{0}' is not configured on any contract")]
    UnknownEvent(String),

    #[error("dispatcher is closed")]
    Closed,
}

struct Subscription {
    id: SubscriptionId,
    tx: mpsc::UnboundedSender<DispatchedEvent>,
}

#[derive(Default)]
struct Inner {
    subscriptions: HashMap<String, Vec<Subscription>>,
    next_id: u64,
    closed: bool,
}

/// Explicit handler registry. Cheap to clone; clones share state.
#[derive(Clone)]
pub struct Dispatcher {
    known: Arc<HashSet<String>>,
    inner: Arc<Mutex<Inner>>,
    shutdown: Arc<watch::Sender<bool>>,
}

impl Dispatcher {
    /// A dispatcher accepting subscriptions for `event_names`.
    pub fn new<I, S>(event_names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            known: Arc::new(event_names.into_iter().map(Into::into).collect()),
            inner: Arc::new(Mutex::new(Inner::default())),
            shutdown: Arc::new(watch::channel(false).0),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register `handler` for `event_name`. Spawns the subscription's worker,
    /// so this must run inside a Tokio runtime.
    pub fn on<H: EventHandler>(
        &self,
        event_name: &str,
        handler: H,
    ) -> Result<SubscriptionId, DispatchError> {
        if !self.known.contains(event_name) {
            return Err(DispatchError::UnknownEvent(event_name.to_string()));
        }
        let mut inner = self.lock();
        if inner.closed {
            return Err(DispatchError::Closed);
        }
        inner.next_id += 1;
        let id = SubscriptionId(inner.next_id);
        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(worker(
            id,
            Arc::from(event_name),
            Arc::new(handler),
            rx,
            self.shutdown.subscribe(),
        ));
        inner
            .subscriptions
            .entry(event_name.to_string())
            .or_default()
            .push(Subscription { id, tx });
        tracing::debug!(subscription = %id, event = event_name, "handler registered");
        Ok(id)
    }

    /// Remove one subscription. Events already queued for it are still
    /// delivered. Returns `false` if the id is unknown.
    pub fn off(&self, id: SubscriptionId) -> bool {
        let mut inner = self.lock();
        for subs in inner.subscriptions.values_mut() {
            if let Some(pos) = subs.iter().position(|s| s.id == id) {
                subs.remove(pos);
                return true;
            }
        }
        false
    }

    /// Enqueue `event` for every handler registered under its name.
    /// Returns the number of handlers it was queued for; 0 after `close`.
    pub fn dispatch(&self, event: DecodedEvent, receipt: ReceiptAccessor) -> usize {
        let inner = self.lock();
        if inner.closed {
            return 0;
        }
        let Some(subs) = inner.subscriptions.get(&event.name) else {
            return 0;
        };
        let dispatched = DispatchedEvent {
            event: Arc::new(event),
            receipt,
        };
        subs.iter()
            .filter(|s| s.tx.send(dispatched.clone()).is_ok())
            .count()
    }

    /// Drop every subscription and cancel queued and running handler
    /// invocations. Later `on` and `dispatch` calls are rejected or ignored.
    pub fn close(&self) {
        let mut inner = self.lock();
        inner.closed = true;
        inner.subscriptions.clear();
        self.shutdown.send_replace(true);
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    pub fn handler_count(&self, event_name: &str) -> usize {
        self.lock().subscriptions.get(event_name).map_or(0, Vec::len)
    }
}

async fn worker(
    id: SubscriptionId,
    event_name: Arc<str>,
    handler: Arc<dyn EventHandler>,
    mut rx: mpsc::UnboundedReceiver<DispatchedEvent>,
    shutdown: watch::Receiver<bool>,
) {
    let closed = wait_closed(shutdown);
    tokio::pin!(closed);
    let mut running = FuturesUnordered::new();
    let mut open = true;

    loop {
        if !open && running.is_empty() {
            break;
        }
        tokio::select! {
            biased;
            _ = &mut closed => {
                if !running.is_empty() {
                    tracing::debug!(
                        subscription = %id,
                        running = running.len(),
                        "dispatcher closed; cancelling handler invocations"
                    );
                }
                break;
            }
            msg = rx.recv(), if open => match msg {
                Some(event) => running.push(invoke(id, event_name.clone(), handler.clone(), event)),
                None => open = false,
            },
            Some(()) = running.next(), if !running.is_empty() => {}
        }
    }
    tracing::trace!(subscription = %id, "handler worker finished");
}

async fn wait_closed(mut shutdown: watch::Receiver<bool>) {
    // A dropped sender means no dispatcher is left to close this worker.
    if shutdown.wait_for(|closed| *closed).await.is_err() {
        std::future::pending::<()>().await;
    }
}

async fn invoke(id: SubscriptionId, event_name: Arc<str>, handler: Arc<dyn EventHandler>, event: DispatchedEvent) {
    let tx = event.transaction_hash.clone();
    let log_index = event.log_index;
    match AssertUnwindSafe(handler.handle(event)).catch_unwind().await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => tracing::warn!(
            subscription = %id,
            event = %event_name,
            tx = %tx,
            log_index,
            error = %e,
            "handler failed"
        ),
        Err(_) => tracing::error!(
            subscription = %id,
            event = %event_name,
            tx = %tx,
            log_index,
            "handler panicked"
        ),
    }
}
