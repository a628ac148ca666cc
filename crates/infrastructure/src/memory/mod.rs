mod broker;
mod leader_lock;
mod schedule_store;

pub use broker::{InMemoryBroker, InMemoryBrokerConfig};
pub use leader_lock::InMemoryLeaderLock;
pub(crate) use leader_lock::ttl_to_chrono;
pub use schedule_store::InMemoryScheduleStore;
