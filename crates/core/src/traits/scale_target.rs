/// 被扩缩容的对象
///
/// 设置期望副本数是一次原子发布，实际的实例增减由对象自身异步完成。
pub trait ScaleTarget: Send + Sync {
    fn current_replicas(&self) -> u32;

    fn set_desired_replicas(&self, replicas: u32);
}
