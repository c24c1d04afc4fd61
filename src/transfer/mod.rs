//! Atomic transfer engine: uploads, downloads, and remote URL fetches.

pub mod engine;
pub mod fetch;
pub mod progress;

pub use engine::{download, upload, DownloadReport, UploadReport};
pub use fetch::{fetch_url, FetchReport, FetchRequest};
pub use progress::{ProgressCounter, ProgressObserver};

use rand::distributions::Alphanumeric;
use rand::Rng;

/// Fresh random token for temp-path suffixes; never reused across jobs.
pub(crate) fn temp_token() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(8)
        .map(char::from)
        .collect()
}
