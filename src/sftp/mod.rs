pub mod client;
pub mod error;
pub mod relay;

pub use client::SftpConnector;
pub use error::ConnectError;
pub use relay::{UploadOutcome, collect_local_files, relay_batch};
