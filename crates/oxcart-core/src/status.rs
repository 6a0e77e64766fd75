//! In-memory catalog backing the polling status surface.
//!
//! The catalog is a read model: the checkpoint log stays authoritative, and
//! the engine mirrors every durable transition into the catalog so status
//! queries never touch the disk.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::model::{AggregateResult, InstanceFilter, InstanceStatus, OrchestrationInstance};

/// Concurrent map of every instance known to this process.
#[derive(Debug, Default)]
pub struct InstanceCatalog {
    instances: RwLock<HashMap<Uuid, OrchestrationInstance>>,
}

impl InstanceCatalog {
    /// Create an empty catalog.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace an instance record.
    pub async fn upsert(&self, instance: OrchestrationInstance) {
        self.instances
            .write()
            .await
            .insert(instance.instance_id, instance);
    }

    /// Look up one instance by id.
    pub async fn get(&self, instance_id: Uuid) -> Option<OrchestrationInstance> {
        self.instances.read().await.get(&instance_id).cloned()
    }

    /// List instances passing the filter, newest first.
    pub async fn list(&self, filter: &InstanceFilter) -> Vec<OrchestrationInstance> {
        let mut matched: Vec<OrchestrationInstance> = self
            .instances
            .read()
            .await
            .values()
            .filter(|instance| filter.matches(instance))
            .cloned()
            .collect();
        matched.sort_by(|a, b| {
            b.started_at
                .cmp(&a.started_at)
                .then_with(|| a.instance_id.cmp(&b.instance_id))
        });
        matched
    }

    /// Move an instance to a terminal state, attaching its summary.
    ///
    /// Returns `false` when the instance is unknown, and leaves an already
    /// terminal record untouched.
    pub async fn finish(
        &self,
        instance_id: Uuid,
        status: InstanceStatus,
        completed_at: DateTime<Utc>,
        summary: AggregateResult,
    ) -> bool {
        let mut instances = self.instances.write().await;
        let Some(instance) = instances.get_mut(&instance_id) else {
            return false;
        };
        if instance.status.is_terminal() {
            return true;
        }
        instance.status = status;
        instance.completed_at = Some(completed_at);
        instance.summary = Some(summary);
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ArchiveRequest;
    use std::path::PathBuf;

    fn instance_at(status: InstanceStatus, started_at: DateTime<Utc>) -> OrchestrationInstance {
        OrchestrationInstance {
            instance_id: Uuid::new_v4(),
            request: ArchiveRequest {
                root_path: PathBuf::from("/data"),
            },
            status,
            started_at,
            completed_at: None,
            summary: None,
        }
    }

    #[tokio::test]
    async fn list_is_newest_first_and_honours_the_filter() {
        let catalog = InstanceCatalog::new();
        let base = Utc::now();
        let older = instance_at(InstanceStatus::Running, base - chrono::Duration::minutes(5));
        let newer = instance_at(InstanceStatus::Completed, base);
        catalog.upsert(older.clone()).await;
        catalog.upsert(newer.clone()).await;

        let all = catalog.list(&InstanceFilter::default()).await;
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].instance_id, newer.instance_id);

        let running = catalog
            .list(&InstanceFilter {
                status: Some(InstanceStatus::Running),
                ..InstanceFilter::default()
            })
            .await;
        assert_eq!(running.len(), 1);
        assert_eq!(running[0].instance_id, older.instance_id);
    }

    #[tokio::test]
    async fn finish_attaches_summary_exactly_once() {
        let catalog = InstanceCatalog::new();
        let instance = instance_at(InstanceStatus::Running, Utc::now());
        let id = instance.instance_id;
        catalog.upsert(instance).await;

        let summary = AggregateResult {
            file_count: 1,
            total_bytes: 10,
            total_duration_millis: 3,
            per_file: Vec::new(),
        };
        assert!(
            catalog
                .finish(id, InstanceStatus::Completed, Utc::now(), summary)
                .await
        );
        // a later finish must not overwrite the terminal record
        assert!(
            catalog
                .finish(
                    id,
                    InstanceStatus::Failed,
                    Utc::now(),
                    AggregateResult::default()
                )
                .await
        );

        let fetched = catalog.get(id).await.expect("catalogued instance");
        assert_eq!(fetched.status, InstanceStatus::Completed);
        assert_eq!(
            fetched.summary.as_ref().map(|s| s.file_count),
            Some(1)
        );
        assert!(catalog.get(Uuid::new_v4()).await.is_none());
    }
}
