pub mod db;
pub mod registry;

pub use db::{Database, Pool, PoolError};
pub use registry::{PoolRegistry, GLOBAL_POOL_KEY};
