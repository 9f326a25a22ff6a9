//! ISO-BMFF (MP4/MOV) container support
//!
//! Reads the sample tables of a non-fragmented file into a [`Movie`] and
//! writes a sliced movie back out by stream copy.

pub mod boxes;
pub mod movie;
pub mod writer;

pub use movie::{FileType, Movie, Sample, Track, TrackHeader};
pub use writer::{write_movie, WriteSummary};
