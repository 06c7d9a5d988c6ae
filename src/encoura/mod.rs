pub mod client;
pub mod error;
pub mod types;

pub use client::EncouraClient;
pub use error::EncouraError;
pub use types::SkipReason;
