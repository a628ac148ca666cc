use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use chrono::{DateTime, Utc};
use metrics::{counter, gauge};
use serde::Serialize;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, info_span, warn, Instrument};

use taskplane_core::config::BeatConfig;
use taskplane_core::{
    LeaderLock, ScheduleEntry, ScheduleStore, SharedClock, TaskBroker, TaskplaneResult,
};

use crate::leader::{LeaderElector, Role};

/// Beat调度器参数
#[derive(Debug, Clone)]
pub struct BeatSettings {
    pub scheduler_name: String,
    pub instance_id: String,
    pub tick_interval: Duration,
    pub lock_ttl: Duration,
    pub retry_period: Duration,
}

impl BeatSettings {
    pub fn from_config(config: &BeatConfig, instance_id: impl Into<String>) -> Self {
        Self {
            scheduler_name: config.scheduler_name.clone(),
            instance_id: instance_id.into(),
            tick_interval: config.tick_interval(),
            lock_ttl: config.lock_ttl(),
            retry_period: config.retry_period(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EntryStatus {
    pub name: String,
    pub task_name: String,
    pub enabled: bool,
    pub last_run: Option<DateTime<Utc>>,
    pub next_run: DateTime<Utc>,
}

/// 调度器当前状态，供 `/api/scheduler` 查询
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BeatStatus {
    pub scheduler_name: String,
    pub instance_id: String,
    pub role: Role,
    pub fencing_token: Option<u64>,
    pub last_tick: Option<DateTime<Utc>>,
    pub entries: Vec<EntryStatus>,
}

/// 可跨线程读取的状态快照
#[derive(Debug, Clone)]
pub struct BeatStatusHandle(Arc<RwLock<BeatStatus>>);

impl BeatStatusHandle {
    pub fn snapshot(&self) -> BeatStatus {
        self.0.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    fn update(&self, f: impl FnOnce(&mut BeatStatus)) {
        f(&mut self.0.write().unwrap_or_else(|e| e.into_inner()));
    }
}

/// 周期任务调度器
///
/// 同一 `scheduler_name` 下同时只有一个Active实例。Active实例每个tick先续约，
/// 续约成功后把到期的条目投递到队列，再持久化 `last_run`/`next_run`。
pub struct BeatScheduler {
    settings: BeatSettings,
    broker: Arc<dyn TaskBroker>,
    store: Arc<dyn ScheduleStore>,
    elector: LeaderElector,
    clock: SharedClock,
    status: BeatStatusHandle,
}

impl BeatScheduler {
    pub fn new(
        settings: BeatSettings,
        broker: Arc<dyn TaskBroker>,
        store: Arc<dyn ScheduleStore>,
        lock: Arc<dyn LeaderLock>,
        clock: SharedClock,
    ) -> Self {
        let elector = LeaderElector::new(
            lock,
            settings.scheduler_name.clone(),
            settings.instance_id.clone(),
            settings.lock_ttl,
        );
        let status = BeatStatusHandle(Arc::new(RwLock::new(BeatStatus {
            scheduler_name: settings.scheduler_name.clone(),
            instance_id: settings.instance_id.clone(),
            role: Role::Standby,
            fencing_token: None,
            last_tick: None,
            entries: Vec::new(),
        })));
        Self {
            settings,
            broker,
            store,
            elector,
            clock,
            status,
        }
    }

    pub fn status_handle(&self) -> BeatStatusHandle {
        self.status.clone()
    }

    pub fn role(&self) -> Role {
        self.elector.role()
    }

    /// 写入配置中的条目
    ///
    /// 新条目直接插入；已存在的条目保留运行进度，只更新定义。周期变化时
    /// 从当前时间重新计算 `next_run`。
    pub async fn seed(&self, entries: Vec<ScheduleEntry>) -> TaskplaneResult<()> {
        let existing: HashMap<String, ScheduleEntry> = self
            .store
            .load_entries()
            .await?
            .into_iter()
            .map(|entry| (entry.name.clone(), entry))
            .collect();

        for entry in entries {
            match existing.get(&entry.name) {
                None => {
                    if self.store.register_entry(&entry).await? {
                        info!(entry = %entry.name, next_run = %entry.next_run, "注册周期任务");
                    }
                }
                Some(stored) => {
                    let mut merged = stored.clone();
                    merged.task_name = entry.task_name.clone();
                    merged.args = entry.args.clone();
                    merged.enabled = entry.enabled;
                    merged.max_retries = entry.max_retries;
                    if stored.cadence != entry.cadence {
                        merged.cadence = entry.cadence.clone();
                        merged.next_run = entry.cadence.next_after(self.clock.now())?;
                    }
                    if &merged != stored {
                        self.store.save_entry(&merged).await?;
                        info!(entry = %merged.name, "周期任务定义已更新，保留运行进度");
                    }
                }
            }
        }
        self.refresh_entries().await;
        Ok(())
    }

    /// 执行一次调度循环，返回本次投递的任务数
    ///
    /// Standby实例只尝试获取锁；Active实例续约失败时立即停止投递。
    pub async fn tick(&mut self) -> TaskplaneResult<usize> {
        if self.elector.role() == Role::Standby {
            if !self.elector.try_acquire().await? {
                self.publish_role();
                return Ok(0);
            }
        } else if !self.elector.renew().await {
            self.publish_role();
            return Ok(0);
        }
        self.publish_role();

        let now = self.clock.now();
        let entries = self.store.load_entries().await?;
        let mut enqueued = 0;

        for mut entry in entries.into_iter().filter(|entry| entry.is_due(now)) {
            let task = entry.to_task();
            let task_id = match self.broker.enqueue(task).await {
                Ok(id) => id,
                Err(e) => {
                    // 不推进进度，下一个tick重试
                    error!(entry = %entry.name, error = %e, "周期任务投递失败");
                    counter!("taskplane_beat_enqueue_failures_total", "entry" => entry.name.clone())
                        .increment(1);
                    continue;
                }
            };
            enqueued += 1;
            counter!("taskplane_beat_enqueued_total", "entry" => entry.name.clone()).increment(1);

            entry.mark_fired(now)?;
            info!(
                entry = %entry.name,
                task_id = %task_id,
                next_run = %entry.next_run,
                token = ?self.elector.token(),
                "投递周期任务"
            );
            if let Err(e) = self.store.save_entry(&entry).await {
                warn!(entry = %entry.name, error = %e, "保存调度进度失败，下一个tick可能重复投递");
            }
        }

        self.status.update(|status| status.last_tick = Some(now));
        self.refresh_entries().await;
        Ok(enqueued)
    }

    fn publish_role(&self) {
        let role = self.elector.role();
        let token = self.elector.token();
        gauge!("taskplane_beat_active", "scheduler" => self.settings.scheduler_name.clone())
            .set(if role == Role::Active { 1.0 } else { 0.0 });
        self.status.update(|status| {
            status.role = role;
            status.fencing_token = token;
        });
    }

    async fn refresh_entries(&self) {
        match self.store.load_entries().await {
            Ok(entries) => {
                let entries = entries
                    .into_iter()
                    .map(|entry| EntryStatus {
                        name: entry.name,
                        task_name: entry.task_name,
                        enabled: entry.enabled,
                        last_run: entry.last_run,
                        next_run: entry.next_run,
                    })
                    .collect();
                self.status.update(|status| status.entries = entries);
            }
            Err(e) => debug!(error = %e, "读取周期任务失败"),
        }
    }

    /// 释放领导锁（如果持有）
    pub async fn stop(&mut self) {
        self.elector.release().await;
        self.publish_role();
    }

    /// 调度主循环
    ///
    /// Active时每个 `tick_interval` 执行一次；Standby时每个 `retry_period`
    /// 尝试一次获取锁。收到关闭信号后释放锁退出。
    pub fn run(mut self, mut shutdown_rx: broadcast::Receiver<()>) -> JoinHandle<()> {
        tokio::spawn(async move {
            info!(
                scheduler = %self.settings.scheduler_name,
                instance = %self.settings.instance_id,
                "Beat调度器启动"
            );
            loop {
                let span = info_span!("beat_tick", scheduler = %self.settings.scheduler_name);
                if let Err(e) = self.tick().instrument(span).await {
                    error!(error = %e, "调度循环出错");
                }

                let wait = match self.elector.role() {
                    Role::Active => self.settings.tick_interval,
                    Role::Standby => self.settings.retry_period,
                };
                tokio::select! {
                    _ = tokio::time::sleep(wait) => {}
                    _ = shutdown_rx.recv() => break,
                }
            }
            self.stop().await;
            info!("Beat调度器已停止");
        })
    }
}
