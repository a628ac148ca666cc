//! Taskplane 进程组装
//!
//! 供二进制入口和集成测试共用。

pub mod app;
pub mod handlers;
pub mod shutdown;

pub use app::Application;
pub use shutdown::ShutdownManager;
