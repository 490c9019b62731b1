pub mod aspect;
pub mod cache;
pub mod chat;
pub mod config;
pub mod context;
pub mod error;
pub mod pipeline;
pub mod sentiment_tool;
pub mod tool;

pub use aspect::*;
pub use cache::*;
pub use chat::*;
pub use config::*;
pub use context::*;
pub use error::*;
pub use pipeline::*;
pub use sentiment_tool::*;
pub use tool::*;
