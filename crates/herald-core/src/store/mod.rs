pub mod keys;
mod memory;
#[cfg(feature = "redis")]
mod redis;
mod rocksdb;
mod traits;

pub use self::memory::InMemoryStore;
#[cfg(feature = "redis")]
pub use self::redis::RedisStore;
pub use self::rocksdb::RocksDbStore;
pub use traits::{DistributedLock, RecordFields, ScheduleStore};
