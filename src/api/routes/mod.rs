//! Route handler implementations, grouped by concern

pub mod system;
pub mod tasks;

pub use system::{event_stream, health_check, index, openapi_spec};
pub use tasks::{get_file, media_info, progress_stream, submit_download, task_stats};
