//! Event bus
//!
//! Events recorded during a unit of work are dispatched after the commit
//! succeeded. There is no durable outbox: events of a transaction that
//! committed right before a crash are lost.

use std::any::Any;
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use async_trait::async_trait;
use futures::stream::{self, Stream};
use futures::FutureExt;
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, error, info, warn};

use crate::domain::events::{DomainEvent, EventKind};
use crate::errors::AppError;
use crate::storage::uow::UnitOfWork;

/// Reacts to committed domain events
#[async_trait]
pub trait EventHandler: Send + Sync {
    /// Name used in logs
    fn name(&self) -> &str;

    async fn handle(&self, event: &DomainEvent) -> Result<(), AppError>;
}

/// Outcome of a dispatch run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchReport {
    pub delivered: usize,
    pub failed: usize,
}

/// Handler registry, read-only once built
#[derive(Default)]
pub struct EventBus {
    handlers: HashMap<EventKind, Vec<Arc<dyn EventHandler>>>,
}

impl EventBus {
    pub fn builder() -> EventBusBuilder {
        EventBusBuilder::default()
    }

    pub fn handler_count(&self, kind: EventKind) -> usize {
        self.handlers.get(&kind).map(Vec::len).unwrap_or(0)
    }

    /// Dispatch each event, in order, to every handler registered for its kind.
    ///
    /// A handler that fails or panics is logged and counted as failed; the
    /// remaining handlers and events still run.
    pub async fn dispatch(&self, events: Vec<DomainEvent>) -> DispatchReport {
        let mut report = DispatchReport::default();

        for event in &events {
            let Some(handlers) = self.handlers.get(&event.kind()) else {
                continue;
            };
            for handler in handlers {
                match AssertUnwindSafe(handler.handle(event)).catch_unwind().await {
                    Ok(Ok(())) => report.delivered += 1,
                    Ok(Err(e)) => {
                        report.failed += 1;
                        error!(
                            "Event handler {} failed for {:?}: {}",
                            handler.name(),
                            event.kind(),
                            e
                        );
                    }
                    Err(panic) => {
                        report.failed += 1;
                        error!(
                            "Event handler {} panicked for {:?}: {}",
                            handler.name(),
                            event.kind(),
                            panic_message(panic.as_ref())
                        );
                    }
                }
            }
        }

        debug!(
            "Dispatched {} event(s): {} delivered, {} failed",
            events.len(),
            report.delivered,
            report.failed
        );
        report
    }

    /// Commit `uow`, then dispatch the events it recorded
    pub async fn commit(&self, uow: UnitOfWork) -> Result<DispatchReport, AppError> {
        let events = uow.commit().await?;
        Ok(self.dispatch(events).await)
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> &str {
    if let Some(message) = panic.downcast_ref::<&str>() {
        message
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message
    } else {
        "unknown panic"
    }
}

/// Builds an [`EventBus`]
#[derive(Default)]
pub struct EventBusBuilder {
    handlers: HashMap<EventKind, Vec<Arc<dyn EventHandler>>>,
}

impl EventBusBuilder {
    pub fn on(mut self, kind: EventKind, handler: Arc<dyn EventHandler>) -> Self {
        self.handlers.entry(kind).or_default().push(handler);
        self
    }

    pub fn on_all(mut self, handler: Arc<dyn EventHandler>) -> Self {
        for kind in EventKind::ALL {
            self = self.on(kind, handler.clone());
        }
        self
    }

    pub fn build(self) -> EventBus {
        EventBus {
            handlers: self.handlers,
        }
    }
}

/// Logs every event it receives
pub struct LogHandler;

#[async_trait]
impl EventHandler for LogHandler {
    fn name(&self) -> &str {
        "log"
    }

    async fn handle(&self, event: &DomainEvent) -> Result<(), AppError> {
        match event {
            DomainEvent::ServiceCreated { service } | DomainEvent::ServiceUpdated { service } => {
                info!(kind = ?event.kind(), service = %service.name, "service changed");
            }
            DomainEvent::ServiceDeleted { id, name } => {
                info!(service_id = id, service = %name, "service deleted");
            }
            DomainEvent::DeploymentStarted { deployment }
            | DomainEvent::DeploymentFinished { deployment } => {
                info!(kind = ?event.kind(), deployment_id = ?deployment.id, "deployment changed");
            }
            DomainEvent::StepChanged { step } => {
                debug!(step = %step.name, state = %step.state, deployment_id = ?step.deployment_id, "step changed");
            }
        }
        Ok(())
    }
}

/// Republishes events on a broadcast channel for live subscribers
pub struct BroadcastHandler {
    tx: broadcast::Sender<DomainEvent>,
}

impl BroadcastHandler {
    pub fn new(capacity: usize) -> Self {
        let (tx, _rx) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<DomainEvent> {
        self.tx.subscribe()
    }

    /// Events committed from now on, as a stream.
    ///
    /// A subscriber that falls behind by more than the channel capacity
    /// skips ahead to the oldest event still buffered.
    pub fn stream(&self) -> impl Stream<Item = DomainEvent> + Send + 'static {
        stream::unfold(self.tx.subscribe(), |mut rx| async move {
            loop {
                match rx.recv().await {
                    Ok(event) => return Some((event, rx)),
                    Err(RecvError::Lagged(skipped)) => {
                        warn!("Event subscriber lagged, skipped {} event(s)", skipped);
                    }
                    Err(RecvError::Closed) => return None,
                }
            }
        })
    }
}

#[async_trait]
impl EventHandler for BroadcastHandler {
    fn name(&self) -> &str {
        "broadcast"
    }

    async fn handle(&self, event: &DomainEvent) -> Result<(), AppError> {
        // no subscribers is not an error
        let _ = self.tx.send(event.clone());
        Ok(())
    }
}
