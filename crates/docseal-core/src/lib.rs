pub mod config;
pub mod error;

pub use config::DocsealConfig;
pub use error::{DocsealError, DocsealResult};
