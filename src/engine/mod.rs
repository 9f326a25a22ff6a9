//! Job engines
//!
//! [`trim::ContainerTrimEngine`] rewrites sample tables on the task
//! scheduler; [`orchestrator::EncodingOrchestrator`] drives the external
//! encoder. Both report through [`crate::ports::JobListener`].

pub mod command;
pub mod orchestrator;
pub mod parse;
pub mod progress;
pub mod trim;

pub use command::CommandBuilder;
pub use orchestrator::EncodingOrchestrator;
pub use parse::{FrameProgress, ProgressParser, TimestampProgress};
pub use progress::{ConsoleListener, DispatchedListener, JsonListener, NoOpListener, StatusRecorder};
pub use trim::{ContainerTrimEngine, TrimRequest};
