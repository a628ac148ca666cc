use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use taskplane_core::{Task, TaskplaneResult};

/// 任务处理器
///
/// 执行可能因为重复投递而发生多次，处理器需要自行保证幂等，
/// 或用 [`crate::DedupHandler`] 包装。
#[async_trait]
pub trait TaskHandler: Send + Sync {
    async fn handle(&self, task: &Task) -> TaskplaneResult<Value>;
}

type HandlerFactory = Arc<dyn Fn() -> Arc<dyn TaskHandler> + Send + Sync>;

/// 按任务名注册处理器工厂
///
/// 每个执行槽（以及回收后的新执行槽）都通过工厂创建自己的处理器实例。
#[derive(Clone, Default)]
pub struct HandlerRegistry {
    factories: HashMap<String, HandlerFactory>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<F, H>(&mut self, task_name: impl Into<String>, factory: F) -> &mut Self
    where
        F: Fn() -> H + Send + Sync + 'static,
        H: TaskHandler + 'static,
    {
        self.factories.insert(
            task_name.into(),
            Arc::new(move || Arc::new(factory()) as Arc<dyn TaskHandler>),
        );
        self
    }

    pub fn with<F, H>(mut self, task_name: impl Into<String>, factory: F) -> Self
    where
        F: Fn() -> H + Send + Sync + 'static,
        H: TaskHandler + 'static,
    {
        self.register(task_name, factory);
        self
    }

    pub fn contains(&self, task_name: &str) -> bool {
        self.factories.contains_key(task_name)
    }

    pub fn task_names(&self) -> Vec<String> {
        let mut names: Vec<_> = self.factories.keys().cloned().collect();
        names.sort();
        names
    }

    /// 为一个执行槽创建全新的处理器实例
    pub fn instantiate(&self) -> HandlerSet {
        HandlerSet {
            handlers: self
                .factories
                .iter()
                .map(|(name, factory)| (name.clone(), factory()))
                .collect(),
        }
    }
}

impl fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandlerRegistry")
            .field("task_names", &self.task_names())
            .finish()
    }
}

/// 一个执行槽持有的处理器实例
pub struct HandlerSet {
    handlers: HashMap<String, Arc<dyn TaskHandler>>,
}

impl HandlerSet {
    pub fn get(&self, task_name: &str) -> Option<&Arc<dyn TaskHandler>> {
        self.handlers.get(task_name)
    }
}

/// 由异步闭包实现的处理器
pub struct FnHandler<F> {
    func: F,
}

#[async_trait]
impl<F, Fut> TaskHandler for FnHandler<F>
where
    F: Fn(Task) -> Fut + Send + Sync,
    Fut: Future<Output = TaskplaneResult<Value>> + Send,
{
    async fn handle(&self, task: &Task) -> TaskplaneResult<Value> {
        (self.func)(task.clone()).await
    }
}

pub fn handler_fn<F, Fut>(func: F) -> FnHandler<F>
where
    F: Fn(Task) -> Fut + Send + Sync,
    Fut: Future<Output = TaskplaneResult<Value>> + Send,
{
    FnHandler { func }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn test_each_instantiation_creates_fresh_handlers() {
        let created = Arc::new(AtomicUsize::new(0));
        let counter = created.clone();
        let registry = HandlerRegistry::new().with("echo", move || {
            counter.fetch_add(1, Ordering::SeqCst);
            handler_fn(|task: Task| async move { Ok(task.args) })
        });

        let first = registry.instantiate();
        let _second = registry.instantiate();
        assert_eq!(created.load(Ordering::SeqCst), 2);

        let task = Task::new("echo", json!({"n": 1}));
        let output = first.get("echo").unwrap().handle(&task).await.unwrap();
        assert_eq!(output, json!({"n": 1}));
        assert!(first.get("missing").is_none());
        assert_eq!(registry.task_names(), vec!["echo".to_string()]);
    }
}
