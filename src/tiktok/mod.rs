pub mod client;
pub mod error;
pub mod oauth;
pub mod publisher;

pub use client::TikTokClient;
pub use error::TikTokApiError;
pub use publisher::PublishOutcome;
