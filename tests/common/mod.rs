//! Shared fixtures for integration tests

#![allow(dead_code)]

use std::io::Cursor;
use std::path::Path;
use std::sync::Mutex;

use vtrim::container::boxes::BoxWriter;
use vtrim::container::{write_movie, FileType, Movie, Sample, Track, TrackHeader};
use vtrim::ports::JobListener;

/// Empty `stsd` box
const STSD: [u8; 16] = [0, 0, 0, 16, b's', b't', b's', b'd', 0, 0, 0, 0, 0, 0, 0, 0];

/// Shape of one track in a generated file
pub struct TrackSpec {
    pub handler: [u8; 4],
    pub timescale: u32,
    pub durations: Vec<u32>,
    pub sync: Option<Vec<u32>>,
    pub sample_size: u32,
}

impl TrackSpec {
    /// Video track of `count` samples lasting `duration_ms` each (timescale 1000)
    pub fn video(count: usize, duration_ms: u32, sync: Option<Vec<u32>>) -> Self {
        Self {
            handler: *b"vide",
            timescale: 1000,
            durations: vec![duration_ms; count],
            sync,
            sample_size: 32,
        }
    }

    /// AAC-like audio track: 1024-tick frames at 48 kHz
    pub fn audio(count: usize) -> Self {
        Self {
            handler: *b"soun",
            timescale: 48_000,
            durations: vec![1024; count],
            sync: None,
            sample_size: 8,
        }
    }
}

/// Serialize a non-fragmented MP4 with the given tracks
pub fn build_mp4(specs: &[TrackSpec]) -> Vec<u8> {
    let mut source = Vec::new();
    let mut tracks = Vec::new();

    for (index, spec) in specs.iter().enumerate() {
        let mut samples = Vec::new();
        for (number, &duration) in spec.durations.iter().enumerate() {
            let offset = source.len() as u64;
            let fill = (index * 64 + number % 64) as u8;
            source.extend(std::iter::repeat(fill).take(spec.sample_size as usize));
            samples.push(Sample {
                offset,
                size: spec.sample_size,
                duration,
                composition_offset: 0,
                description_index: 1,
            });
        }

        tracks.push(Track {
            header: TrackHeader {
                track_id: index as u32 + 1,
                ..TrackHeader::default()
            },
            handler: spec.handler,
            handler_box: Vec::new(),
            media_header_box: None,
            sample_description_box: STSD.to_vec(),
            timescale: spec.timescale,
            language: 0,
            samples,
            sync_samples: spec.sync.clone(),
            has_composition_offsets: false,
        });
    }

    let movie = Movie {
        file_type: FileType::default(),
        timescale: 1000,
        tracks,
    };
    let mut out = Vec::new();
    write_movie(&mut Cursor::new(source), &movie, &mut out, &mut |_, _| Ok(())).unwrap();
    out
}

/// Write a generated MP4 to `path`
pub fn write_mp4(path: &Path, specs: &[TrackSpec]) {
    std::fs::write(path, build_mp4(specs)).unwrap();
}

/// A file with only an `ftyp` box
pub fn ftyp_only() -> Vec<u8> {
    let mut w = BoxWriter::new();
    let ftyp = w.begin(*b"ftyp");
    w.bytes(b"isom");
    w.u32(0x200);
    w.bytes(b"isom");
    w.end(ftyp).unwrap();
    w.into_inner()
}

/// Replace the first occurrence of `from` with `to`
pub fn patch_fourcc(bytes: &mut [u8], from: &[u8; 4], to: &[u8; 4]) {
    let position = bytes
        .windows(4)
        .position(|w| w == from)
        .expect("box type present");
    bytes[position..position + 4].copy_from_slice(to);
}

/// Listener recording every callback as a string
#[derive(Default)]
pub struct RecordingListener {
    events: Mutex<Vec<String>>,
}

impl RecordingListener {
    pub fn events(&self) -> Vec<String> {
        self.events.lock().unwrap().clone()
    }

    /// Events other than progress
    pub fn milestones(&self) -> Vec<String> {
        self.events()
            .into_iter()
            .filter(|e| !e.starts_with("progress"))
            .collect()
    }

    fn push(&self, event: String) {
        self.events.lock().unwrap().push(event);
    }
}

impl JobListener for RecordingListener {
    fn on_started(&self) {
        self.push("started".to_string());
    }

    fn on_progress(&self, percent: f32) {
        self.push(format!("progress {:.0}", percent));
    }

    fn on_result(&self, output: &Path) {
        self.push(format!("result {}", output.display()));
    }

    fn on_error(&self, message: &str) {
        self.push(format!("error {}", message));
    }

    fn on_cancelled(&self) {
        self.push("cancelled".to_string());
    }
}
