pub mod fixtures;
pub mod postgres;
pub mod redis_cache;
pub mod redis_queue;

pub use postgres::PostgresPersistence;
pub use redis_cache::RedisCache;
pub use redis_queue::RedisQueue;
