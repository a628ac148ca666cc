use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;

use taskplane_core::{ScheduleEntry, ScheduleStore, TaskplaneResult};

/// 进程内的周期任务存储
#[derive(Debug, Clone, Default)]
pub struct InMemoryScheduleStore {
    entries: Arc<RwLock<BTreeMap<String, ScheduleEntry>>>,
}

impl InMemoryScheduleStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ScheduleStore for InMemoryScheduleStore {
    async fn load_entries(&self) -> TaskplaneResult<Vec<ScheduleEntry>> {
        Ok(self.entries.read().await.values().cloned().collect())
    }

    async fn save_entry(&self, entry: &ScheduleEntry) -> TaskplaneResult<()> {
        self.entries
            .write()
            .await
            .insert(entry.name.clone(), entry.clone());
        Ok(())
    }

    async fn register_entry(&self, entry: &ScheduleEntry) -> TaskplaneResult<bool> {
        let mut entries = self.entries.write().await;
        if entries.contains_key(&entry.name) {
            return Ok(false);
        }
        entries.insert(entry.name.clone(), entry.clone());
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use taskplane_core::Cadence;

    #[tokio::test]
    async fn test_register_is_insert_if_absent() {
        let store = InMemoryScheduleStore::new();
        let now = Utc::now();
        let mut entry = ScheduleEntry::new("stats", "stats", Cadence::every_seconds(60), now).unwrap();
        assert!(store.register_entry(&entry).await.unwrap());

        entry.mark_fired(entry.next_run).unwrap();
        store.save_entry(&entry).await.unwrap();

        let fresh = ScheduleEntry::new("stats", "stats", Cadence::every_seconds(60), now).unwrap();
        assert!(!store.register_entry(&fresh).await.unwrap());
        let loaded = store.load_entries().await.unwrap();
        assert_eq!(loaded, vec![entry]);
    }
}
