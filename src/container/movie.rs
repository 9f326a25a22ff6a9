//! In-memory movie model parsed from a non-fragmented MP4/MOV file
//!
//! Only the sample tables are decoded; codec configuration (`stsd`), the
//! handler and the media header are kept as raw boxes and re-emitted verbatim.

use std::fs::File;
use std::io::{BufReader, Read, Seek};
use std::ops::Range;
use std::path::Path;

use tracing::debug;

use super::boxes::{self, ByteReader, ChildBox, FourCC};
use crate::error::{VtrimError, VtrimResult};

/// Upper bound on samples per track accepted from a constant-size `stsz`
const MAX_SAMPLES: usize = 1 << 26;

/// `ftyp` contents
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileType {
    pub major_brand: FourCC,
    pub minor_version: u32,
    pub compatible_brands: Vec<FourCC>,
}

impl Default for FileType {
    fn default() -> Self {
        Self {
            major_brand: *b"isom",
            minor_version: 0x200,
            compatible_brands: vec![*b"isom", *b"iso2", *b"mp41"],
        }
    }
}

/// One sample as located in the source file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Sample {
    pub offset: u64,
    pub size: u32,
    pub duration: u32,
    pub composition_offset: i32,
    pub description_index: u32,
}

/// Fields of `tkhd` that survive a rewrite
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackHeader {
    pub flags: u32,
    pub track_id: u32,
    pub layer: u16,
    pub alternate_group: u16,
    pub volume: u16,
    pub matrix: [u8; 36],
    /// 16.16 fixed point
    pub width: u32,
    /// 16.16 fixed point
    pub height: u32,
}

impl Default for TrackHeader {
    fn default() -> Self {
        Self {
            flags: 0x3,
            track_id: 1,
            layer: 0,
            alternate_group: 0,
            volume: 0,
            matrix: IDENTITY_MATRIX,
            width: 0,
            height: 0,
        }
    }
}

/// Unity transform used by `mvhd` and `tkhd`
pub const IDENTITY_MATRIX: [u8; 36] = [
    0x00, 0x01, 0x00, 0x00, 0, 0, 0, 0, 0, 0, 0, 0, //
    0, 0, 0, 0, 0x00, 0x01, 0x00, 0x00, 0, 0, 0, 0, //
    0, 0, 0, 0, 0, 0, 0, 0, 0x40, 0x00, 0x00, 0x00,
];

/// One elementary stream with its sample table
#[derive(Debug, Clone)]
pub struct Track {
    pub header: TrackHeader,
    pub handler: FourCC,
    /// Raw `hdlr` box
    pub handler_box: Vec<u8>,
    /// Raw `vmhd`/`smhd`/`nmhd`/... box, if the source had one
    pub media_header_box: Option<Vec<u8>>,
    /// Raw `stsd` box
    pub sample_description_box: Vec<u8>,
    pub timescale: u32,
    pub language: u16,
    pub samples: Vec<Sample>,
    /// Sorted 1-based sync sample numbers; `None` when every sample is a sync sample
    pub sync_samples: Option<Vec<u32>>,
    pub has_composition_offsets: bool,
}

impl Track {
    /// Total duration in media timescale units
    pub fn duration(&self) -> u64 {
        self.samples.iter().map(|s| s.duration as u64).sum()
    }

    /// Sample durations in decode order
    pub fn durations(&self) -> impl Iterator<Item = u64> + '_ {
        self.samples.iter().map(|s| s.duration as u64)
    }

    /// Start time of every sync sample, in media timescale units
    pub fn sync_sample_times(&self) -> Vec<u64> {
        let Some(sync) = &self.sync_samples else {
            return Vec::new();
        };

        let mut times = Vec::with_capacity(sync.len());
        let mut elapsed = 0u64;
        let mut next = sync.iter().peekable();
        for (index, sample) in self.samples.iter().enumerate() {
            while let Some(&&number) = next.peek() {
                if number as usize == index + 1 {
                    times.push(elapsed);
                    next.next();
                } else {
                    break;
                }
            }
            elapsed += sample.duration as u64;
        }
        times
    }

    pub fn is_video(&self) -> bool {
        &self.handler == b"vide"
    }

    /// Copy of this track restricted to `range`, with sync samples re-based
    pub fn slice(&self, range: Range<usize>) -> Track {
        let start = range.start.min(self.samples.len());
        let end = range.end.clamp(start, self.samples.len());

        let sync_samples = self.sync_samples.as_ref().map(|sync| {
            sync.iter()
                .filter(|&&n| (n as usize) > start && (n as usize) <= end)
                .map(|&n| n - start as u32)
                .collect()
        });

        Track {
            samples: self.samples[start..end].to_vec(),
            sync_samples,
            ..self.clone()
        }
    }
}

/// A parsed movie
#[derive(Debug, Clone)]
pub struct Movie {
    pub file_type: FileType,
    pub timescale: u32,
    pub tracks: Vec<Track>,
}

impl Movie {
    /// Parse the file at `path`
    pub fn open(path: &Path) -> VtrimResult<Self> {
        let mut reader = BufReader::new(File::open(path)?);
        Self::read_from(&mut reader)
    }

    /// Parse a movie from any seekable source
    pub fn read_from<R: Read + Seek>(reader: &mut R) -> VtrimResult<Self> {
        let top = boxes::scan_top_level(reader)?;

        if top.iter().any(|b| b.kind == boxes::MOOF) {
            return Err(VtrimError::parse("fragmented files are not supported"));
        }

        let file_type = match top.iter().find(|b| b.kind == boxes::FTYP) {
            Some(ftyp) => parse_ftyp(&boxes::read_payload(reader, ftyp)?)?,
            None => FileType::default(),
        };

        let moov = top
            .iter()
            .find(|b| b.kind == boxes::MOOV)
            .ok_or_else(|| VtrimError::parse("no 'moov' box found"))?;
        let moov = boxes::read_payload(reader, moov)?;

        let movie = parse_moov(&moov, file_type)?;
        debug!(
            "Parsed movie: timescale {}, {} tracks",
            movie.timescale,
            movie.tracks.len()
        );
        Ok(movie)
    }

    /// Indices of tracks listing at least one sync sample
    pub fn sync_tracks(&self) -> Vec<usize> {
        self.tracks
            .iter()
            .enumerate()
            .filter(|(_, t)| t.sync_samples.as_ref().map_or(false, |s| !s.is_empty()))
            .map(|(i, _)| i)
            .collect()
    }

    /// Longest track duration expressed in the movie timescale
    pub fn duration(&self) -> u64 {
        self.tracks
            .iter()
            .map(|t| rescale(t.duration(), t.timescale, self.timescale))
            .max()
            .unwrap_or(0)
    }

    /// Copy of the movie where track `i` keeps only `ranges[i]`
    pub fn slice(&self, ranges: &[Range<usize>]) -> VtrimResult<Movie> {
        if ranges.len() != self.tracks.len() {
            return Err(VtrimError::invalid(format!(
                "{} sample ranges for {} tracks",
                ranges.len(),
                self.tracks.len()
            )));
        }

        Ok(Movie {
            file_type: self.file_type.clone(),
            timescale: self.timescale,
            tracks: self
                .tracks
                .iter()
                .zip(ranges)
                .map(|(track, range)| track.slice(range.clone()))
                .collect(),
        })
    }
}

/// Convert `value` between timescales, rounding down
pub fn rescale(value: u64, from: u32, to: u32) -> u64 {
    if from == 0 {
        return 0;
    }
    (value as u128 * to as u128 / from as u128) as u64
}

fn parse_ftyp(payload: &[u8]) -> VtrimResult<FileType> {
    let mut r = ByteReader::new(payload);
    let major_brand = r.fourcc()?;
    let minor_version = r.u32()?;
    let mut compatible_brands = Vec::new();
    while r.remaining() >= 4 {
        compatible_brands.push(r.fourcc()?);
    }
    Ok(FileType {
        major_brand,
        minor_version,
        compatible_brands,
    })
}

fn parse_moov(payload: &[u8], file_type: FileType) -> VtrimResult<Movie> {
    let children = boxes::children(payload)?;

    if boxes::find(&children, boxes::MVEX).is_some() {
        return Err(VtrimError::parse("fragmented files are not supported"));
    }

    let mvhd = boxes::require(&children, boxes::MVHD, "moov")?;
    let timescale = parse_mvhd(mvhd.payload)?;

    let tracks = children
        .iter()
        .filter(|b| b.kind == boxes::TRAK)
        .map(|trak| parse_trak(trak.payload))
        .collect::<VtrimResult<Vec<_>>>()?;

    Ok(Movie {
        file_type,
        timescale,
        tracks,
    })
}

fn parse_mvhd(payload: &[u8]) -> VtrimResult<u32> {
    let mut r = ByteReader::new(payload);
    let (version, _) = r.full_header()?;
    r.skip(if version == 1 { 16 } else { 8 })?;
    let timescale = r.u32()?;
    if timescale == 0 {
        return Err(VtrimError::parse("movie timescale is zero"));
    }
    Ok(timescale)
}

fn parse_trak(payload: &[u8]) -> VtrimResult<Track> {
    let children = boxes::children(payload)?;
    let header = parse_tkhd(boxes::require(&children, boxes::TKHD, "trak")?.payload)?;

    let mdia = boxes::children(boxes::require(&children, boxes::MDIA, "trak")?.payload)?;
    let (timescale, language) = parse_mdhd(boxes::require(&mdia, boxes::MDHD, "mdia")?.payload)?;

    let hdlr = boxes::require(&mdia, boxes::HDLR, "mdia")?;
    let handler = {
        let mut r = ByteReader::new(hdlr.payload);
        r.full_header()?;
        r.skip(4)?;
        r.fourcc()?
    };

    let minf = boxes::children(boxes::require(&mdia, boxes::MINF, "mdia")?.payload)?;
    let media_header_box = minf
        .iter()
        .find(|b| &b.kind[1..] == b"mhd")
        .map(|b| b.raw.to_vec());

    let stbl = boxes::children(boxes::require(&minf, boxes::STBL, "minf")?.payload)?;
    let table = parse_stbl(&stbl, header.track_id)?;

    Ok(Track {
        header,
        handler,
        handler_box: hdlr.raw.to_vec(),
        media_header_box,
        sample_description_box: table.stsd,
        timescale,
        language,
        samples: table.samples,
        sync_samples: table.sync_samples,
        has_composition_offsets: table.has_composition_offsets,
    })
}

fn parse_tkhd(payload: &[u8]) -> VtrimResult<TrackHeader> {
    let mut r = ByteReader::new(payload);
    let (version, flags) = r.full_header()?;
    let track_id = if version == 1 {
        r.skip(16)?;
        let id = r.u32()?;
        r.skip(4 + 8)?;
        id
    } else {
        r.skip(8)?;
        let id = r.u32()?;
        r.skip(4 + 4)?;
        id
    };
    r.skip(8)?;
    let layer = r.u16()?;
    let alternate_group = r.u16()?;
    let volume = r.u16()?;
    r.skip(2)?;
    let mut matrix = [0u8; 36];
    matrix.copy_from_slice(r.bytes(36)?);
    let width = r.u32()?;
    let height = r.u32()?;

    Ok(TrackHeader {
        flags,
        track_id,
        layer,
        alternate_group,
        volume,
        matrix,
        width,
        height,
    })
}

fn parse_mdhd(payload: &[u8]) -> VtrimResult<(u32, u16)> {
    let mut r = ByteReader::new(payload);
    let (version, _) = r.full_header()?;
    let timescale = if version == 1 {
        r.skip(16)?;
        let ts = r.u32()?;
        r.skip(8)?;
        ts
    } else {
        r.skip(8)?;
        let ts = r.u32()?;
        r.skip(4)?;
        ts
    };
    if timescale == 0 {
        return Err(VtrimError::parse("media timescale is zero"));
    }
    let language = r.u16()?;
    Ok((timescale, language))
}

struct SampleTable {
    stsd: Vec<u8>,
    samples: Vec<Sample>,
    sync_samples: Option<Vec<u32>>,
    has_composition_offsets: bool,
}

struct ChunkRun {
    first_chunk: u32,
    samples_per_chunk: u32,
    description_index: u32,
}

fn parse_stbl(stbl: &[ChildBox<'_>], track_id: u32) -> VtrimResult<SampleTable> {
    if boxes::find(stbl, boxes::STZ2).is_some() {
        return Err(VtrimError::parse(format!(
            "track {} uses compact sample sizes ('stz2'), which are not supported",
            track_id
        )));
    }

    let stsd = boxes::require(stbl, boxes::STSD, "stbl")?.raw.to_vec();
    let sizes = parse_stsz(boxes::require(stbl, boxes::STSZ, "stbl")?.payload)?;
    let count = sizes.len();

    let durations = parse_stts(boxes::require(stbl, boxes::STTS, "stbl")?.payload, count)?;
    if durations.len() < count {
        return Err(VtrimError::parse(format!(
            "track {}: time-to-sample covers {} of {} samples",
            track_id,
            durations.len(),
            count
        )));
    }

    let composition = boxes::find(stbl, boxes::CTTS)
        .map(|ctts| parse_ctts(ctts.payload, count))
        .transpose()?;

    let chunk_offsets = match boxes::find(stbl, boxes::STCO) {
        Some(stco) => parse_chunk_offsets(stco.payload, false)?,
        None => parse_chunk_offsets(boxes::require(stbl, boxes::CO64, "stbl")?.payload, true)?,
    };
    let runs = parse_stsc(boxes::require(stbl, boxes::STSC, "stbl")?.payload)?;

    let mut samples = Vec::with_capacity(count);
    for (i, run) in runs.iter().enumerate() {
        let last_chunk = runs
            .get(i + 1)
            .map(|next| next.first_chunk - 1)
            .unwrap_or(chunk_offsets.len() as u32);

        for chunk in run.first_chunk..=last_chunk {
            let Some(&chunk_offset) = chunk_offsets.get(chunk as usize - 1) else {
                return Err(VtrimError::parse(format!(
                    "track {}: sample-to-chunk references missing chunk {}",
                    track_id, chunk
                )));
            };
            let mut offset = chunk_offset;
            for _ in 0..run.samples_per_chunk {
                let index = samples.len();
                if index == count {
                    break;
                }
                samples.push(Sample {
                    offset,
                    size: sizes[index],
                    duration: durations[index],
                    composition_offset: composition.as_ref().map_or(0, |c| c[index]),
                    description_index: run.description_index,
                });
                offset += sizes[index] as u64;
            }
        }
    }

    if samples.len() != count {
        return Err(VtrimError::parse(format!(
            "track {}: chunks hold {} of {} samples",
            track_id,
            samples.len(),
            count
        )));
    }

    let sync_samples = boxes::find(stbl, boxes::STSS)
        .map(|stss| parse_stss(stss.payload, count))
        .transpose()?;

    Ok(SampleTable {
        stsd,
        samples,
        sync_samples,
        has_composition_offsets: composition.is_some(),
    })
}

fn parse_stsz(payload: &[u8]) -> VtrimResult<Vec<u32>> {
    let mut r = ByteReader::new(payload);
    r.full_header()?;
    let uniform = r.u32()?;
    if uniform != 0 {
        let count = r.u32()? as usize;
        if count > MAX_SAMPLES {
            return Err(VtrimError::parse(format!("{} samples in one track", count)));
        }
        return Ok(vec![uniform; count]);
    }
    let count = r.count(4)?;
    (0..count).map(|_| r.u32()).collect()
}

fn parse_stts(payload: &[u8], limit: usize) -> VtrimResult<Vec<u32>> {
    let mut r = ByteReader::new(payload);
    r.full_header()?;
    let entries = r.count(8)?;
    let mut durations = Vec::with_capacity(limit);
    for _ in 0..entries {
        let run = r.u32()? as usize;
        let delta = r.u32()?;
        let take = run.min(limit - durations.len());
        durations.extend(std::iter::repeat(delta).take(take));
    }
    Ok(durations)
}

fn parse_ctts(payload: &[u8], count: usize) -> VtrimResult<Vec<i32>> {
    let mut r = ByteReader::new(payload);
    r.full_header()?;
    let entries = r.count(8)?;
    let mut offsets = Vec::with_capacity(count);
    for _ in 0..entries {
        let run = r.u32()? as usize;
        // Version 0 stores unsigned offsets; the bit pattern is kept as-is
        let offset = r.i32()?;
        let take = run.min(count - offsets.len());
        offsets.extend(std::iter::repeat(offset).take(take));
    }
    offsets.resize(count, 0);
    Ok(offsets)
}

fn parse_chunk_offsets(payload: &[u8], wide: bool) -> VtrimResult<Vec<u64>> {
    let mut r = ByteReader::new(payload);
    r.full_header()?;
    let count = r.count(if wide { 8 } else { 4 })?;
    (0..count)
        .map(|_| if wide { r.u64() } else { r.u32().map(u64::from) })
        .collect()
}

fn parse_stsc(payload: &[u8]) -> VtrimResult<Vec<ChunkRun>> {
    let mut r = ByteReader::new(payload);
    r.full_header()?;
    let count = r.count(12)?;
    let mut runs: Vec<ChunkRun> = Vec::with_capacity(count);
    for _ in 0..count {
        let run = ChunkRun {
            first_chunk: r.u32()?,
            samples_per_chunk: r.u32()?,
            description_index: r.u32()?,
        };
        let ordered = runs.last().map_or(true, |prev| run.first_chunk > prev.first_chunk);
        if run.first_chunk == 0 || !ordered {
            return Err(VtrimError::parse("sample-to-chunk entries are out of order"));
        }
        runs.push(run);
    }
    Ok(runs)
}

fn parse_stss(payload: &[u8], count: usize) -> VtrimResult<Vec<u32>> {
    let mut r = ByteReader::new(payload);
    r.full_header()?;
    let entries = r.count(4)?;
    let mut sync = (0..entries)
        .map(|_| r.u32())
        .collect::<VtrimResult<Vec<_>>>()?;
    sync.sort_unstable();
    sync.dedup();
    if sync.first() == Some(&0) || sync.last().map_or(false, |&n| n as usize > count) {
        return Err(VtrimError::parse("sync sample table references missing samples"));
    }
    Ok(sync)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn track(durations: &[u32], sync: Option<Vec<u32>>) -> Track {
        Track {
            header: TrackHeader::default(),
            handler: *b"vide",
            handler_box: Vec::new(),
            media_header_box: None,
            sample_description_box: Vec::new(),
            timescale: 1000,
            language: 0,
            samples: durations
                .iter()
                .map(|&duration| Sample {
                    offset: 0,
                    size: 1,
                    duration,
                    composition_offset: 0,
                    description_index: 1,
                })
                .collect(),
            sync_samples: sync,
            has_composition_offsets: false,
        }
    }

    #[test]
    fn test_sync_sample_times() {
        let t = track(&[500; 8], Some(vec![1, 5, 7]));
        assert_eq!(t.sync_sample_times(), vec![0, 2000, 3000]);
        assert_eq!(t.duration(), 4000);
    }

    #[test]
    fn test_slice_rebases_sync_samples() {
        let t = track(&[100; 10], Some(vec![1, 4, 7, 10]));
        let sliced = t.slice(3..8);
        assert_eq!(sliced.samples.len(), 5);
        assert_eq!(sliced.sync_samples, Some(vec![1, 4]));
    }

    #[test]
    fn test_slice_clamps_range() {
        let t = track(&[100; 4], None);
        assert_eq!(t.slice(2..99).samples.len(), 2);
        assert!(t.slice(5..3).samples.is_empty());
    }

    #[test]
    fn test_empty_sync_table_is_not_a_sync_track() {
        let movie = Movie {
            tracks: vec![
                track(&[100; 4], Some(vec![1, 3])),
                track(&[100; 4], Some(Vec::new())),
                track(&[100; 4], None),
            ],
            file_type: FileType::default(),
            timescale: 1000,
        };
        assert_eq!(movie.sync_tracks(), vec![0]);
    }

    #[test]
    fn test_rescale() {
        assert_eq!(rescale(90_000, 90_000, 1000), 1000);
        assert_eq!(rescale(1, 3, 1000), 333);
        assert_eq!(rescale(5, 0, 1000), 0);
    }
}
