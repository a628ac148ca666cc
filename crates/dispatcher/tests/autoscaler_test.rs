use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use mockall::mock;
use tokio::sync::broadcast;

use taskplane_core::models::{ScalingBehavior, ScalingRule, SelectPolicy};
use taskplane_core::{
    ManualClock, MetricsSource, PoolStats, PoolStatsProvider, ScaleTarget, ScalingPolicy,
    SharedClock, TaskplaneError, TaskplaneResult, UtilizationSample,
};
use taskplane_dispatcher::{Autoscaler, DecisionReason};
use taskplane_infrastructure::{InMemoryBroker, MetricsExporter, UtilizationSource};

mock! {
    Source {}

    #[async_trait]
    impl MetricsSource for Source {
        async fn fetch_sample(&self) -> TaskplaneResult<UtilizationSample>;
    }
}

struct FixedTarget {
    replicas: AtomicU32,
    updates: AtomicU32,
}

impl FixedTarget {
    fn new(replicas: u32) -> Arc<Self> {
        Arc::new(Self {
            replicas: AtomicU32::new(replicas),
            updates: AtomicU32::new(0),
        })
    }
}

impl ScaleTarget for FixedTarget {
    fn current_replicas(&self) -> u32 {
        self.replicas.load(Ordering::SeqCst)
    }

    fn set_desired_replicas(&self, replicas: u32) {
        self.updates.fetch_add(1, Ordering::SeqCst);
        self.replicas.store(replicas, Ordering::SeqCst);
    }
}

struct SlowSource;

#[async_trait]
impl MetricsSource for SlowSource {
    async fn fetch_sample(&self) -> TaskplaneResult<UtilizationSample> {
        tokio::time::sleep(Duration::from_secs(5)).await;
        Err(TaskplaneError::MetricsUnavailable("too late".to_string()))
    }
}

struct BusyPool;

impl PoolStatsProvider for BusyPool {
    fn pool_stats(&self) -> PoolStats {
        PoolStats {
            worker_count: 2,
            active_tasks: 9,
            total_slots: 10,
        }
    }
}

fn policy() -> ScalingPolicy {
    ScalingPolicy {
        min_replicas: 2,
        max_replicas: 10,
        target_utilization_percent: 70.0,
        tolerance: 0.1,
        scale_up: ScalingBehavior {
            stabilization_window_seconds: 0,
            select_policy: SelectPolicy::Max,
            policies: vec![ScalingRule::percent(100, 15)],
        },
        scale_down: ScalingBehavior {
            stabilization_window_seconds: 60,
            select_policy: SelectPolicy::Min,
            policies: vec![ScalingRule::percent(10, 60)],
        },
    }
}

fn clock() -> (Arc<ManualClock>, SharedClock) {
    let clock = Arc::new(ManualClock::new(
        Utc.with_ymd_and_hms(2025, 3, 1, 0, 0, 0).unwrap(),
    ));
    let shared: SharedClock = clock.clone();
    (clock, shared)
}

fn sample(cpu: f64) -> UtilizationSample {
    UtilizationSample {
        timestamp: Utc::now(),
        namespace: "default".to_string(),
        pool: "default".to_string(),
        worker_count: 2,
        active_tasks: 0,
        total_slots: 0,
        avg_cpu_percent: cpu,
        avg_memory_percent: 0.0,
        queue_depth: 0,
    }
}

#[tokio::test]
async fn test_scale_up_published_to_target() {
    let mut source = MockSource::new();
    source.expect_fetch_sample().times(1).returning(|| Ok(sample(90.0)));
    let target = FixedTarget::new(2);
    let (_, clock) = clock();

    let autoscaler = Autoscaler::new(
        policy(),
        Arc::new(source),
        target.clone(),
        Duration::from_secs(15),
        Duration::from_secs(1),
        clock,
    );

    let decision = autoscaler.run_once().await.expect("decision");
    assert_eq!(decision.desired, 3);
    assert_eq!(decision.reason, DecisionReason::ScaleUp);
    assert_eq!(target.current_replicas(), 3);
    assert_eq!(autoscaler.last_decision(), Some(decision));
}

#[tokio::test]
async fn test_unavailable_metrics_skip_cycle() {
    let mut source = MockSource::new();
    source
        .expect_fetch_sample()
        .times(1)
        .returning(|| Err(TaskplaneError::MetricsUnavailable("connection refused".to_string())));
    let target = FixedTarget::new(4);
    let (_, clock) = clock();

    let autoscaler = Autoscaler::new(
        policy(),
        Arc::new(source),
        target.clone(),
        Duration::from_secs(15),
        Duration::from_secs(1),
        clock,
    );

    assert!(autoscaler.run_once().await.is_none());
    assert_eq!(target.current_replicas(), 4);
    assert_eq!(target.updates.load(Ordering::SeqCst), 0);
    assert!(autoscaler.last_decision().is_none());
}

#[tokio::test]
async fn test_slow_metrics_source_times_out() {
    let target = FixedTarget::new(5);
    let (_, clock) = clock();
    let autoscaler = Autoscaler::new(
        policy(),
        Arc::new(SlowSource),
        target.clone(),
        Duration::from_secs(15),
        Duration::from_millis(50),
        clock,
    );

    let started = std::time::Instant::now();
    assert!(autoscaler.run_once().await.is_none());
    assert!(started.elapsed() < Duration::from_secs(2));
    assert_eq!(target.current_replicas(), 5);
}

#[tokio::test]
async fn test_scale_down_after_window_with_manual_clock() {
    let mut source = MockSource::new();
    let mut seq = mockall::Sequence::new();
    source
        .expect_fetch_sample()
        .times(1)
        .in_sequence(&mut seq)
        .returning(|| Ok(sample(70.0)));
    source
        .expect_fetch_sample()
        .times(2)
        .in_sequence(&mut seq)
        .returning(|| Ok(sample(7.0)));
    let target = FixedTarget::new(10);
    let (manual, clock) = clock();

    let autoscaler = Autoscaler::new(
        policy(),
        Arc::new(source),
        target.clone(),
        Duration::from_secs(15),
        Duration::from_secs(1),
        clock,
    );

    assert_eq!(autoscaler.run_once().await.map(|d| d.desired), Some(10));

    manual.advance_secs(30);
    let held = autoscaler.run_once().await.expect("decision");
    assert_eq!(held.desired, 10);
    assert_eq!(held.reason, DecisionReason::Stabilized);

    manual.advance_secs(31);
    let lowered = autoscaler.run_once().await.expect("decision");
    assert_eq!(lowered.desired, 9);
    assert_eq!(target.current_replicas(), 9);
}

#[tokio::test]
async fn test_run_loop_reads_exporter_samples() {
    let (_, clock) = clock();
    let broker = Arc::new(InMemoryBroker::new());
    let exporter = Arc::new(MetricsExporter::new(
        "default",
        "default",
        broker,
        Arc::new(BusyPool),
        UtilizationSource::Slots,
        clock.clone(),
        8,
    ));
    let target = FixedTarget::new(2);
    let autoscaler = Arc::new(Autoscaler::new(
        policy(),
        exporter.clone(),
        target.clone(),
        Duration::from_millis(20),
        Duration::from_secs(1),
        clock,
    ));

    let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
    let handle = autoscaler.run(shutdown_rx);

    tokio::time::timeout(Duration::from_secs(2), async {
        while target.updates.load(Ordering::SeqCst) == 0 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("autoscaler never published");

    let _ = shutdown_tx.send(());
    handle.await.unwrap();

    // 90% 的槽占用，目标70%；时钟不动，15秒周期内最多从2翻倍到4
    assert!((3..=4).contains(&target.current_replicas()));
    assert!(!exporter.history().await.is_empty());
}
