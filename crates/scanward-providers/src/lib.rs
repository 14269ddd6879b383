//! Scanward Providers
//!
//! Concrete collaborators for the pipeline seams: an HTTP generative and
//! embedding client, and scan tools backed by external commands.

pub mod command;
pub mod gemini;

pub use command::{tools_from_config, CommandScanTool};
pub use gemini::GeminiClient;
