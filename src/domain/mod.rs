pub mod bot;
pub mod cache_config;
pub mod job;
pub mod policy;
pub mod result;

pub use bot::BotConfig;
pub use cache_config::CacheConfig;
pub use job::{CrawlJob, JobState};
pub use policy::CrawlPolicy;
pub use result::{AutoRecordConfig, CrawlResult, HistoryRecordStatus};
