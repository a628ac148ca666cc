use async_trait::async_trait;

use crate::models::ScheduleEntry;
use crate::TaskplaneResult;

/// 周期任务条目的持久化存储，以条目名称为键
#[async_trait]
pub trait ScheduleStore: Send + Sync {
    async fn load_entries(&self) -> TaskplaneResult<Vec<ScheduleEntry>>;

    /// 保存条目的运行进度（覆盖写）
    async fn save_entry(&self, entry: &ScheduleEntry) -> TaskplaneResult<()>;

    /// 仅当同名条目不存在时写入，返回是否写入
    async fn register_entry(&self, entry: &ScheduleEntry) -> TaskplaneResult<bool>;
}
