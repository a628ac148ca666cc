//! 内置任务处理器，对应默认的三个周期任务

use serde_json::json;
use tracing::info;

use taskplane_core::Task;
use taskplane_worker::{handler_fn, HandlerRegistry};

pub const UPDATE_DASHBOARD_STATS: &str = "dashboard.update_stats";
pub const CLEANUP_EXPIRED_SESSIONS: &str = "sessions.cleanup_expired";
pub const SEND_WEEKLY_DIGEST: &str = "digest.send_weekly";

/// 注册内置处理器
///
/// 这些处理器只记录执行情况，实际业务由嵌入方通过 [`HandlerRegistry::register`] 覆盖。
pub fn builtin_registry() -> HandlerRegistry {
    let mut registry = HandlerRegistry::new();
    for name in [UPDATE_DASHBOARD_STATS, CLEANUP_EXPIRED_SESSIONS, SEND_WEEKLY_DIGEST] {
        registry.register(name, move || {
            handler_fn(move |task: Task| async move {
                info!(task_id = %task.id, task = %task.name, args = %task.args, "执行内置任务");
                Ok(json!({ "task": task.name, "handled_at": chrono::Utc::now() }))
            })
        });
    }
    registry
}
