use std::sync::Arc;

use tracing::{debug, info};

use taskplane_core::config::{BeatConfig, BrokerConfig};
use taskplane_core::{LeaderLock, ScheduleStore, SharedClock, TaskplaneError, TaskplaneResult};

use crate::memory::{InMemoryBroker, InMemoryBrokerConfig, InMemoryLeaderLock, InMemoryScheduleStore};
use crate::sqlite::{self, SqliteLeaderLock, SqliteScheduleStore};

/// Beat调度器需要的持久化组件
#[derive(Clone)]
pub struct BeatStores {
    pub schedules: Arc<dyn ScheduleStore>,
    pub lock: Arc<dyn LeaderLock>,
}

pub struct BrokerFactory;

impl BrokerFactory {
    pub fn create(config: &BrokerConfig, clock: SharedClock) -> TaskplaneResult<InMemoryBroker> {
        debug!("Creating broker for url: {}", config.url);
        if !config.url.starts_with("memory://") {
            return Err(TaskplaneError::Configuration(format!(
                "不支持的队列地址: {}，当前仅支持 memory://",
                config.url
            )));
        }
        info!("Initializing in-memory broker");
        Ok(InMemoryBroker::with_config(
            InMemoryBrokerConfig {
                reap_interval: config.reap_interval(),
                ..InMemoryBrokerConfig::default()
            },
            clock,
        ))
    }
}

pub struct StoreFactory;

impl StoreFactory {
    /// 按 `beat.store_url` 创建周期任务存储与领导锁，二者共用同一个后端
    pub async fn create(config: &BeatConfig, clock: SharedClock) -> TaskplaneResult<BeatStores> {
        let url = config.store_url.as_str();
        if url.starts_with("memory://") {
            info!("Initializing in-memory schedule store and leader lock");
            return Ok(BeatStores {
                schedules: Arc::new(InMemoryScheduleStore::default()),
                lock: Arc::new(InMemoryLeaderLock::new(clock)),
            });
        }
        if url.starts_with("sqlite:") {
            info!("Initializing SQLite schedule store and leader lock");
            let pool = sqlite::connect(url).await?;
            return Ok(BeatStores {
                schedules: Arc::new(SqliteScheduleStore::new(pool.clone())),
                lock: Arc::new(SqliteLeaderLock::new(pool, clock)),
            });
        }
        Err(TaskplaneError::Configuration(format!(
            "不支持的存储地址: {url}，支持 memory:// 或 sqlite:"
        )))
    }
}
