pub mod config;
pub mod job;

pub use config::AppConfig;
pub use job::{Job, JobParams, JobStatus};
