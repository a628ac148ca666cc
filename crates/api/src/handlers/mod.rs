pub mod health;
pub mod metrics;
pub mod system;
pub mod tasks;
