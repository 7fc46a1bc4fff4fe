pub mod backoff;
pub mod client;
mod dedup;
pub mod errors;
pub mod source;
mod state;
pub mod superchat;
pub mod types;

pub use backoff::ExponentialBackoff;
pub use client::YouTubeClient;
pub use errors::YouTubeError;
pub use source::{ChatEvent, ChatSource, ChatSourceError, YouTubeChatSource};
