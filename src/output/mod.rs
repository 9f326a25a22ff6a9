//! Output naming and atomic file persistence

pub mod writer;

pub use writer::{output_file_name, OutputWriter};
