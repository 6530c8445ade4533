//! Key-by-id tables backing the repositories

use std::collections::{BTreeMap, BTreeSet};

use serde::{de::DeserializeOwned, Deserialize, Serialize};

use crate::domain::model::{Deployment, Service, Step, User};
use crate::errors::AppError;

/// A row type stored in a [`Table`]
pub trait Entity: Clone + Serialize + DeserializeOwned {
    /// Human readable name used in `NotFound` errors
    const KIND: &'static str;

    fn id(&self) -> Option<i64>;

    fn set_id(&mut self, id: i64);

    /// Id of the parent row, if rows of this kind are indexed by one
    fn group(&self) -> Option<i64> {
        None
    }
}

/// Changes made since the last commit, newest last
#[derive(Debug)]
struct Journal<T> {
    undo: Vec<(i64, Option<T>)>,
    next_id: Option<i64>,
}

impl<T> Default for Journal<T> {
    fn default() -> Self {
        Self {
            undo: Vec::new(),
            next_id: None,
        }
    }
}

/// Rows keyed by id, plus the id sequence.
///
/// Ids are assigned in insertion order, so iterating a table yields rows in
/// creation order. Every write is journaled until [`Table::forget_changes`]
/// so an open transaction can be undone without copying the table. Rows are
/// also indexed by [`Entity::group`]; the index is rebuilt on load.
#[derive(Debug, Serialize, Deserialize)]
#[serde(bound = "T: Entity", from = "StoredTable<T>")]
pub struct Table<T: Entity> {
    rows: BTreeMap<i64, T>,
    next_id: i64,
    #[serde(skip)]
    groups: BTreeMap<i64, BTreeSet<i64>>,
    #[serde(skip)]
    journal: Journal<T>,
}

/// On-disk form of a [`Table`]
#[derive(Deserialize)]
#[serde(bound = "T: Entity")]
struct StoredTable<T> {
    rows: BTreeMap<i64, T>,
    next_id: i64,
}

impl<T: Entity> From<StoredTable<T>> for Table<T> {
    fn from(stored: StoredTable<T>) -> Self {
        let mut table = Table::default();
        let last_id = stored.rows.keys().next_back().copied().unwrap_or(0);
        for (id, row) in stored.rows {
            table.put(id, row);
        }
        table.next_id = stored.next_id.max(last_id + 1);
        table
    }
}

impl<T: Entity> Default for Table<T> {
    fn default() -> Self {
        Self {
            rows: BTreeMap::new(),
            next_id: 1,
            groups: BTreeMap::new(),
            journal: Journal::default(),
        }
    }
}

impl<T: Entity> Table<T> {
    pub fn get(&self, id: i64) -> Result<T, AppError> {
        self.rows
            .get(&id)
            .cloned()
            .ok_or_else(|| AppError::NotFound(T::KIND.to_string()))
    }

    pub fn find(&self, predicate: impl Fn(&T) -> bool) -> Option<T> {
        self.rows.values().find(|row| predicate(row)).cloned()
    }

    pub fn filter(&self, predicate: impl Fn(&T) -> bool) -> Vec<T> {
        self.rows.values().filter(|row| predicate(row)).cloned().collect()
    }

    pub fn list(&self) -> Vec<T> {
        self.rows.values().cloned().collect()
    }

    pub fn values(&self) -> impl Iterator<Item = &T> {
        self.rows.values()
    }

    /// Ids of the rows in a group, in creation order
    pub fn group_ids(&self, group: i64) -> Vec<i64> {
        self.groups
            .get(&group)
            .map(|ids| ids.iter().copied().collect())
            .unwrap_or_default()
    }

    /// Rows of a group, in creation order
    pub fn in_group(&self, group: i64) -> Vec<T> {
        self.group_values(group).cloned().collect()
    }

    pub fn group_values(&self, group: i64) -> impl Iterator<Item = &T> {
        self.groups
            .get(&group)
            .into_iter()
            .flatten()
            .filter_map(|id| self.rows.get(id))
    }

    /// Insert a new row, assigning the next id
    pub fn insert(&mut self, mut row: T) -> T {
        let id = self.next_id;
        self.journal.next_id.get_or_insert(id);
        self.next_id += 1;
        row.set_id(id);
        let prior = self.put(id, row.clone());
        self.journal.undo.push((id, prior));
        row
    }

    /// Replace an existing row
    pub fn replace(&mut self, row: T) -> Result<T, AppError> {
        let id = row
            .id()
            .ok_or_else(|| AppError::StorageError(format!("{} without id", T::KIND)))?;
        if !self.rows.contains_key(&id) {
            return Err(AppError::NotFound(T::KIND.to_string()));
        }
        let prior = self.put(id, row.clone());
        self.journal.undo.push((id, prior));
        Ok(row)
    }

    pub fn remove(&mut self, id: i64) -> Result<T, AppError> {
        let row = self
            .take(id)
            .ok_or_else(|| AppError::NotFound(T::KIND.to_string()))?;
        self.journal.undo.push((id, Some(row.clone())));
        Ok(row)
    }

    /// Remove every row of a group and return them
    pub fn remove_group(&mut self, group: i64) -> Vec<T> {
        self.group_ids(group)
            .into_iter()
            .filter_map(|id| self.remove(id).ok())
            .collect()
    }

    pub fn retain(&mut self, predicate: impl Fn(&T) -> bool) {
        let doomed: Vec<i64> = self
            .rows
            .iter()
            .filter(|(_, row)| !predicate(row))
            .map(|(id, _)| *id)
            .collect();
        for id in doomed {
            // present: collected above
            let _ = self.remove(id);
        }
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn has_changes(&self) -> bool {
        !self.journal.undo.is_empty()
    }

    /// Undo every journaled write, newest first
    pub fn rollback_changes(&mut self) {
        while let Some((id, prior)) = self.journal.undo.pop() {
            match prior {
                Some(row) => {
                    self.put(id, row);
                }
                None => {
                    self.take(id);
                }
            }
        }
        if let Some(next_id) = self.journal.next_id.take() {
            self.next_id = next_id;
        }
    }

    /// Keep every journaled write
    pub fn forget_changes(&mut self) {
        self.journal.undo.clear();
        self.journal.next_id = None;
    }

    fn put(&mut self, id: i64, row: T) -> Option<T> {
        let group = row.group();
        let prior = self.rows.insert(id, row);
        if let Some(old) = prior.as_ref().and_then(|row| row.group()) {
            if Some(old) != group {
                self.unindex(old, id);
            }
        }
        if let Some(group) = group {
            self.groups.entry(group).or_default().insert(id);
        }
        prior
    }

    fn take(&mut self, id: i64) -> Option<T> {
        let row = self.rows.remove(&id)?;
        if let Some(group) = row.group() {
            self.unindex(group, id);
        }
        Some(row)
    }

    fn unindex(&mut self, group: i64, id: i64) {
        if let Some(ids) = self.groups.get_mut(&group) {
            ids.remove(&id);
            if ids.is_empty() {
                self.groups.remove(&group);
            }
        }
    }
}

/// All persisted tables
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct Tables {
    #[serde(default)]
    pub users: Table<User>,
    #[serde(default)]
    pub services: Table<Service>,
    #[serde(default)]
    pub deployments: Table<Deployment>,
    #[serde(default)]
    pub steps: Table<Step>,
}

impl Tables {
    pub fn has_changes(&self) -> bool {
        self.users.has_changes()
            || self.services.has_changes()
            || self.deployments.has_changes()
            || self.steps.has_changes()
    }

    pub fn rollback_changes(&mut self) {
        self.users.rollback_changes();
        self.services.rollback_changes();
        self.deployments.rollback_changes();
        self.steps.rollback_changes();
    }

    pub fn forget_changes(&mut self) {
        self.users.forget_changes();
        self.services.forget_changes();
        self.deployments.forget_changes();
        self.steps.forget_changes();
    }
}

macro_rules! impl_entity {
    ($ty:ty, $kind:literal $(, |$row:ident| $group:expr)?) => {
        impl Entity for $ty {
            const KIND: &'static str = $kind;

            fn id(&self) -> Option<i64> {
                self.id
            }

            fn set_id(&mut self, id: i64) {
                self.id = Some(id);
            }

            $(
                fn group(&self) -> Option<i64> {
                    let $row = self;
                    $group
                }
            )?
        }
    };
}

impl_entity!(User, "User");
impl_entity!(Service, "Service");
impl_entity!(Deployment, "Deployment", |deployment| Some(deployment.service_id));
impl_entity!(Step, "Step", |step| step.deployment_id);
