use std::sync::{Arc, Mutex};
use std::time::Duration;

use metrics::{counter, gauge};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use taskplane_core::{MetricsSource, ScaleTarget, ScalingPolicy, SharedClock};

use super::recommender::{ScalingDecision, ScalingRecommender};

/// 自动扩缩容控制器
///
/// 每个周期拉取一次利用率样本，样本不可用或超时则跳过本周期，
/// 保持当前副本数不变。
pub struct Autoscaler {
    recommender: Mutex<ScalingRecommender>,
    source: Arc<dyn MetricsSource>,
    target: Arc<dyn ScaleTarget>,
    poll_interval: Duration,
    metrics_timeout: Duration,
    clock: SharedClock,
    last_decision: Mutex<Option<ScalingDecision>>,
}

impl Autoscaler {
    pub fn new(
        policy: ScalingPolicy,
        source: Arc<dyn MetricsSource>,
        target: Arc<dyn ScaleTarget>,
        poll_interval: Duration,
        metrics_timeout: Duration,
        clock: SharedClock,
    ) -> Self {
        Self {
            recommender: Mutex::new(ScalingRecommender::new(policy)),
            source,
            target,
            poll_interval,
            metrics_timeout,
            clock,
            last_decision: Mutex::new(None),
        }
    }

    pub fn last_decision(&self) -> Option<ScalingDecision> {
        self.last_decision
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// 执行一次评估，返回 `None` 表示本周期被跳过
    pub async fn run_once(&self) -> Option<ScalingDecision> {
        let sample = match tokio::time::timeout(self.metrics_timeout, self.source.fetch_sample()).await
        {
            Ok(Ok(sample)) => sample,
            Ok(Err(e)) => {
                warn!(error = %e, "获取利用率样本失败，跳过本轮扩缩容");
                counter!("taskplane_autoscaler_skipped_total", "cause" => "unavailable").increment(1);
                return None;
            }
            Err(_) => {
                warn!(timeout_ms = self.metrics_timeout.as_millis() as u64, "获取利用率样本超时，跳过本轮扩缩容");
                counter!("taskplane_autoscaler_skipped_total", "cause" => "timeout").increment(1);
                return None;
            }
        };

        let current = self.target.current_replicas();
        let decision = {
            let mut recommender = self.recommender.lock().unwrap_or_else(|e| e.into_inner());
            recommender.recommend(self.clock.now(), current, &sample)
        };

        counter!("taskplane_autoscaler_decisions_total", "reason" => decision.reason.as_str())
            .increment(1);
        gauge!("taskplane_autoscaler_desired_replicas").set(f64::from(decision.desired));

        if decision.changed() {
            info!(
                current = decision.current,
                desired = decision.desired,
                recommended = decision.recommended,
                ratio = decision.utilization_ratio,
                reason = decision.reason.as_str(),
                "调整期望副本数"
            );
            self.target.set_desired_replicas(decision.desired);
        } else {
            debug!(
                current = decision.current,
                ratio = decision.utilization_ratio,
                reason = decision.reason.as_str(),
                "副本数保持不变"
            );
        }

        *self.last_decision.lock().unwrap_or_else(|e| e.into_inner()) = Some(decision.clone());
        Some(decision)
    }

    pub fn run(self: &Arc<Self>, mut shutdown_rx: broadcast::Receiver<()>) -> JoinHandle<()> {
        let this = Arc::clone(self);
        tokio::spawn(async move {
            info!(interval_secs = this.poll_interval.as_secs(), "自动扩缩容控制器启动");
            let mut interval = tokio::time::interval(this.poll_interval);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        this.run_once().await;
                    }
                    _ = shutdown_rx.recv() => break,
                }
            }
            info!("自动扩缩容控制器已停止");
        })
    }
}
