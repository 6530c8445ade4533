//! Reconcile configured services with persisted ones

use std::collections::HashMap;

use crate::domain::model::Service;

/// Outcome of [`sync_services`]
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ServiceSync {
    /// New services (no id) and changed services (target id, source data)
    pub updated: Vec<Service>,
    /// Persisted services missing from the source
    pub deleted: Vec<Service>,
}

/// Compare `source` (ground truth) with `target` (persisted) by name.
///
/// Services only in the source are additions, services in both with different
/// `data` are updates keeping the target's id, services only in the target are
/// deletions.
pub fn sync_services(source: &[Service], target: &[Service]) -> ServiceSync {
    let target_by_name: HashMap<&str, &Service> =
        target.iter().map(|s| (s.name.as_str(), s)).collect();

    let mut updated = Vec::new();
    for service in source {
        match target_by_name.get(service.name.as_str()) {
            Some(existing) => {
                if existing.data != service.data {
                    let mut changed = (*existing).clone();
                    changed.data = service.data.clone();
                    updated.push(changed);
                }
            }
            None => updated.push(service.clone()),
        }
    }

    let source_names: std::collections::HashSet<&str> =
        source.iter().map(|s| s.name.as_str()).collect();
    let deleted = target
        .iter()
        .filter(|s| !source_names.contains(s.name.as_str()))
        .cloned()
        .collect();

    ServiceSync { updated, deleted }
}
