//! Unit of work
//!
//! A [`UnitOfWork`] wraps one transaction against the [`Store`]. It writes to
//! the shared tables directly and each table journals the rows it changes;
//! [`UnitOfWork::commit`] keeps the changes, and dropping the unit of work
//! without committing undoes them.
//!
//! Transactions are serialized by the store: `begin` waits until any other
//! open unit of work has been committed or dropped. Code that already holds a
//! unit of work must pass it down as `&mut UnitOfWork` instead of opening a
//! second one, which would wait on itself.

use std::sync::Arc;

use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{debug, info};

use crate::domain::events::DomainEvent;
use crate::errors::AppError;
use crate::filesys::file::File;
use crate::storage::repositories::{
    DeploymentRepository, ServiceRepository, StepRepository, UserRepository,
};
use crate::storage::table::Tables;

/// The backing store shared by all requests
#[derive(Clone)]
pub struct Store {
    tables: Arc<Mutex<Tables>>,
    snapshot: Option<Arc<File>>,
}

impl Store {
    /// A store that lives only in memory
    pub fn in_memory() -> Self {
        Self {
            tables: Arc::new(Mutex::new(Tables::default())),
            snapshot: None,
        }
    }

    /// A store persisted as a JSON snapshot, written after every commit
    pub async fn open(file: File) -> Result<Self, AppError> {
        let tables = if file.exists().await {
            info!("Loading database from {}", file.path().display());
            file.read_json::<Tables>().await?
        } else {
            info!("Creating new database at {}", file.path().display());
            file.write_json(&Tables::default()).await?;
            Tables::default()
        };

        Ok(Self {
            tables: Arc::new(Mutex::new(tables)),
            snapshot: Some(Arc::new(file)),
        })
    }

    /// Begin a transaction
    pub async fn begin(&self) -> UnitOfWork {
        let guard = self.tables.clone().lock_owned().await;
        UnitOfWork {
            guard,
            snapshot: self.snapshot.clone(),
            events: Vec::new(),
            committed: false,
        }
    }
}

/// One open transaction and the repositories bound to it
pub struct UnitOfWork {
    guard: OwnedMutexGuard<Tables>,
    snapshot: Option<Arc<File>>,
    events: Vec<DomainEvent>,
    committed: bool,
}

impl UnitOfWork {
    pub fn users(&mut self) -> UserRepository<'_> {
        UserRepository::new(&mut self.guard)
    }

    pub fn services(&mut self) -> ServiceRepository<'_> {
        ServiceRepository::new(&mut self.guard)
    }

    pub fn deployments(&mut self) -> DeploymentRepository<'_> {
        DeploymentRepository::new(&mut self.guard)
    }

    pub fn steps(&mut self) -> StepRepository<'_> {
        StepRepository::new(&mut self.guard)
    }

    /// Record domain events to hand out on commit
    pub fn record(&mut self, events: impl IntoIterator<Item = DomainEvent>) {
        self.events.extend(events);
    }

    /// Events recorded so far
    pub fn pending_events(&self) -> &[DomainEvent] {
        &self.events
    }

    /// Persist all changes and return the recorded events, in recording order.
    ///
    /// The snapshot is only rewritten when something changed. If writing it
    /// fails, the changes are rolled back.
    pub async fn commit(mut self) -> Result<Vec<DomainEvent>, AppError> {
        if self.guard.has_changes() {
            if let Some(file) = &self.snapshot {
                let contents = serde_json::to_vec_pretty(&*self.guard)?;
                file.write_atomic(&contents).await?;
            }
        }

        self.guard.forget_changes();
        self.committed = true;
        Ok(std::mem::take(&mut self.events))
    }

    /// Discard all changes
    pub fn rollback(self) {}
}

impl Drop for UnitOfWork {
    fn drop(&mut self) {
        if self.committed {
            return;
        }
        if self.guard.has_changes() || !self.events.is_empty() {
            debug!(
                "Rolling back unit of work, discarding {} event(s)",
                self.events.len()
            );
        }
        self.guard.rollback_changes();
    }
}
