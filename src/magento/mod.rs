pub mod config;
pub mod media;
pub mod retry;

pub use config::MagentoEndpoint;
pub use media::{MagentoUploader, MediaUpload, MediaUploader, UploadOutcome};
pub use retry::RetryingUploader;
