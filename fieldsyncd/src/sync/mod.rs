pub mod backoff;
mod download;
pub mod engine;
pub mod locator;
pub mod outbox;
pub mod routes;
pub mod store;
pub mod transform;
mod upload;

pub use download::DownloadReport;
pub use upload::{MAX_REPORTED_ERRORS, UploadReport};
