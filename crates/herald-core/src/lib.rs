pub mod config;
pub mod dispatcher;
pub mod error;
pub mod message;
pub mod metrics;
pub mod repository;
pub mod service;
pub mod store;
pub mod telemetry;
pub mod time;

pub use config::{DispatcherConfig, HeraldConfig, StoreBackend};
pub use dispatcher::{
    CycleReport, Dispatcher, DispatcherBuilder, DispatcherState, Emitter, PollOutcome,
    TracingEmitter,
};
pub use error::{ConfigError, DispatchError, ScheduleError, StoreError, StoreResult};
pub use message::ScheduledMessage;
pub use repository::MessageRepository;
pub use service::DispatchService;
pub use store::{DistributedLock, InMemoryStore, RocksDbStore, ScheduleStore};
pub use time::DeliveryTime;
