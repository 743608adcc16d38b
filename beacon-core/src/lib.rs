pub mod config;
pub mod context;
pub mod db;
pub mod error;
pub mod redis;
pub mod redpanda;
pub mod schema;
pub mod store;
pub mod types;

pub use config::Config;
pub use context::BeaconContext;
pub use db::DbPool;
pub use error::{EngineError, StoreError};
pub use redis::RedisPool;
pub use redpanda::{KafkaConsumer, KafkaProducer};
