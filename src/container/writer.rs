//! Stream-copy writer
//!
//! Emits `ftyp`, a single `mdat` holding the samples of every track in
//! half-second chunks interleaved by decode time, then `moov` with rebuilt
//! sample tables. Payload bytes are copied from the source untouched.

use std::cmp::Ordering;
use std::io::{self, Read, Seek, SeekFrom, Write};

use tracing::debug;

use super::boxes::{self, BoxWriter};
use super::movie::{FileType, Movie, Track, IDENTITY_MATRIX};
use crate::error::{VtrimError, VtrimResult};

/// Result of a successful write
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WriteSummary {
    pub bytes_written: u64,
    /// Longest track, in movie timescale units
    pub duration: u64,
}

#[derive(Debug, Clone, Copy)]
struct ChunkPlan {
    first_sample: usize,
    sample_count: usize,
    start_time: u64,
    description_index: u32,
    bytes: u64,
}

/// Write `movie` to `out`, reading sample payloads from `source`
///
/// `on_chunk(written, total)` runs after every copied chunk; an error from it
/// aborts the write.
pub fn write_movie<R, W>(
    source: &mut R,
    movie: &Movie,
    out: &mut W,
    on_chunk: &mut dyn FnMut(u64, u64) -> VtrimResult<()>,
) -> VtrimResult<WriteSummary>
where
    R: Read + Seek,
    W: Write,
{
    let plans: Vec<Vec<ChunkPlan>> = movie.tracks.iter().map(plan_chunks).collect();
    let order = interleave(movie, &plans);

    let ftyp = build_ftyp(&movie.file_type)?;
    let payload: u64 = plans.iter().flatten().map(|c| c.bytes).sum();
    let mdat_header = mdat_header(payload);
    let base = (ftyp.len() + mdat_header.len()) as u64;

    // Chunk offsets follow from the interleave order alone
    let mut offsets: Vec<Vec<u64>> = plans.iter().map(|p| vec![0; p.len()]).collect();
    let mut position = base;
    for &(track, chunk) in &order {
        offsets[track][chunk] = position;
        position += plans[track][chunk].bytes;
    }

    out.write_all(&ftyp)?;
    out.write_all(&mdat_header)?;

    let mut written = 0u64;
    for &(track, chunk) in &order {
        let plan = plans[track][chunk];
        let samples = &movie.tracks[track].samples
            [plan.first_sample..plan.first_sample + plan.sample_count];
        for sample in samples {
            copy_sample(source, out, sample.offset, sample.size)?;
        }
        written += plan.bytes;
        on_chunk(written, payload)?;
    }

    let moov = build_moov(movie, &plans, &offsets)?;
    out.write_all(&moov)?;
    out.flush()?;

    let summary = WriteSummary {
        bytes_written: base + payload + moov.len() as u64,
        duration: movie.duration(),
    };
    debug!(
        "Wrote {} tracks, {} bytes, {} chunks",
        movie.tracks.len(),
        summary.bytes_written,
        order.len()
    );
    Ok(summary)
}

fn copy_sample<R: Read + Seek, W: Write>(
    source: &mut R,
    out: &mut W,
    offset: u64,
    size: u32,
) -> VtrimResult<()> {
    source.seek(SeekFrom::Start(offset))?;
    let copied = io::copy(&mut source.by_ref().take(size as u64), out)?;
    if copied != size as u64 {
        return Err(VtrimError::parse(format!(
            "sample at offset {} is truncated ({} of {} bytes)",
            offset, copied, size
        )));
    }
    Ok(())
}

/// Split a track into chunks of at most half a second with one description each
fn plan_chunks(track: &Track) -> Vec<ChunkPlan> {
    let mut chunks: Vec<ChunkPlan> = Vec::new();
    let mut elapsed = 0u64;
    let mut chunk_elapsed = 0u64;

    for (index, sample) in track.samples.iter().enumerate() {
        let split = match chunks.last() {
            None => true,
            Some(current) => {
                current.description_index != sample.description_index
                    || chunk_elapsed * 2 >= track.timescale as u64
            }
        };

        if split {
            chunks.push(ChunkPlan {
                first_sample: index,
                sample_count: 0,
                start_time: elapsed,
                description_index: sample.description_index,
                bytes: 0,
            });
            chunk_elapsed = 0;
        }

        if let Some(current) = chunks.last_mut() {
            current.sample_count += 1;
            current.bytes += sample.size as u64;
        }
        chunk_elapsed += sample.duration as u64;
        elapsed += sample.duration as u64;
    }

    chunks
}

/// Order all chunks by start time across tracks, ties broken by track order
fn interleave(movie: &Movie, plans: &[Vec<ChunkPlan>]) -> Vec<(usize, usize)> {
    let mut order: Vec<(usize, usize)> = plans
        .iter()
        .enumerate()
        .flat_map(|(t, chunks)| (0..chunks.len()).map(move |c| (t, c)))
        .collect();

    order.sort_by(|&(ta, ca), &(tb, cb)| {
        let a = plans[ta][ca].start_time as u128 * movie.tracks[tb].timescale as u128;
        let b = plans[tb][cb].start_time as u128 * movie.tracks[ta].timescale as u128;
        match a.cmp(&b) {
            Ordering::Equal => (ta, ca).cmp(&(tb, cb)),
            other => other,
        }
    });
    order
}

fn build_ftyp(file_type: &FileType) -> VtrimResult<Vec<u8>> {
    let mut w = BoxWriter::new();
    let start = w.begin(boxes::FTYP);
    w.bytes(&file_type.major_brand);
    w.u32(file_type.minor_version);
    for brand in &file_type.compatible_brands {
        w.bytes(brand);
    }
    w.end(start)?;
    Ok(w.into_inner())
}

fn mdat_header(payload: u64) -> Vec<u8> {
    let mut w = BoxWriter::new();
    if payload + 8 <= u32::MAX as u64 {
        w.u32((payload + 8) as u32);
        w.bytes(&boxes::MDAT);
    } else {
        w.u32(1);
        w.bytes(&boxes::MDAT);
        w.u64(payload + 16);
    }
    w.into_inner()
}

fn build_moov(movie: &Movie, plans: &[Vec<ChunkPlan>], offsets: &[Vec<u64>]) -> VtrimResult<Vec<u8>> {
    let mut w = BoxWriter::new();
    let moov = w.begin(boxes::MOOV);

    let duration = movie.duration();
    let next_track_id = movie
        .tracks
        .iter()
        .map(|t| t.header.track_id)
        .max()
        .unwrap_or(0)
        + 1;

    let wide = duration > u32::MAX as u64;
    let mvhd = w.begin_full(boxes::MVHD, wide as u8, 0);
    write_times(&mut w, wide);
    w.u32(movie.timescale);
    write_duration(&mut w, wide, duration);
    w.u32(0x0001_0000); // rate 1.0
    w.u16(0x0100); // volume 1.0
    w.zeros(10);
    w.bytes(&IDENTITY_MATRIX);
    w.zeros(24);
    w.u32(next_track_id);
    w.end(mvhd)?;

    for ((track, chunks), chunk_offsets) in movie.tracks.iter().zip(plans).zip(offsets) {
        write_trak(&mut w, movie.timescale, track, chunks, chunk_offsets)?;
    }

    w.end(moov)?;
    Ok(w.into_inner())
}

fn write_times(w: &mut BoxWriter, wide: bool) {
    // Creation and modification times are left unset
    w.zeros(if wide { 16 } else { 8 });
}

fn write_duration(w: &mut BoxWriter, wide: bool, duration: u64) {
    if wide {
        w.u64(duration);
    } else {
        w.u32(duration as u32);
    }
}

fn write_trak(
    w: &mut BoxWriter,
    movie_timescale: u32,
    track: &Track,
    chunks: &[ChunkPlan],
    chunk_offsets: &[u64],
) -> VtrimResult<()> {
    let trak = w.begin(boxes::TRAK);

    let media_duration = track.duration();
    let movie_duration = super::movie::rescale(media_duration, track.timescale, movie_timescale);

    let wide = movie_duration > u32::MAX as u64;
    let tkhd = w.begin_full(boxes::TKHD, wide as u8, track.header.flags);
    write_times(w, wide);
    w.u32(track.header.track_id);
    w.u32(0);
    write_duration(w, wide, movie_duration);
    w.zeros(8);
    w.u16(track.header.layer);
    w.u16(track.header.alternate_group);
    w.u16(track.header.volume);
    w.u16(0);
    w.bytes(&track.header.matrix);
    w.u32(track.header.width);
    w.u32(track.header.height);
    w.end(tkhd)?;

    let mdia = w.begin(boxes::MDIA);
    let wide = media_duration > u32::MAX as u64;
    let mdhd = w.begin_full(boxes::MDHD, wide as u8, 0);
    write_times(w, wide);
    w.u32(track.timescale);
    write_duration(w, wide, media_duration);
    w.u16(track.language);
    w.u16(0);
    w.end(mdhd)?;

    if track.handler_box.is_empty() {
        let hdlr = w.begin_full(boxes::HDLR, 0, 0);
        w.u32(0);
        w.bytes(&track.handler);
        w.zeros(12);
        w.u8(0);
        w.end(hdlr)?;
    } else {
        w.bytes(&track.handler_box);
    }

    let minf = w.begin(boxes::MINF);
    match &track.media_header_box {
        Some(raw) => w.bytes(raw),
        None => {
            let nmhd = w.begin_full(boxes::NMHD, 0, 0);
            w.end(nmhd)?;
        }
    }

    let dinf = w.begin(boxes::DINF);
    let dref = w.begin_full(boxes::DREF, 0, 0);
    w.u32(1);
    // Flag 1: media data lives in this file
    let url = w.begin_full(boxes::URL, 0, 1);
    w.end(url)?;
    w.end(dref)?;
    w.end(dinf)?;

    write_stbl(w, track, chunks, chunk_offsets)?;

    w.end(minf)?;
    w.end(mdia)?;
    w.end(trak)?;
    Ok(())
}

fn write_stbl(
    w: &mut BoxWriter,
    track: &Track,
    chunks: &[ChunkPlan],
    chunk_offsets: &[u64],
) -> VtrimResult<()> {
    if track.sample_description_box.is_empty() {
        return Err(VtrimError::write(format!(
            "track {} has no sample description",
            track.header.track_id
        )));
    }

    let stbl = w.begin(boxes::STBL);
    w.bytes(&track.sample_description_box);

    let stts = run_length(track.samples.iter().map(|s| s.duration));
    let start = w.begin_full(boxes::STTS, 0, 0);
    w.u32(stts.len() as u32);
    for (count, delta) in stts {
        w.u32(count);
        w.u32(delta);
    }
    w.end(start)?;

    if track.has_composition_offsets {
        let negative = track.samples.iter().any(|s| s.composition_offset < 0);
        let ctts = run_length(track.samples.iter().map(|s| s.composition_offset));
        let start = w.begin_full(boxes::CTTS, negative as u8, 0);
        w.u32(ctts.len() as u32);
        for (count, offset) in ctts {
            w.u32(count);
            w.i32(offset);
        }
        w.end(start)?;
    }

    if let Some(sync) = &track.sync_samples {
        let start = w.begin_full(boxes::STSS, 0, 0);
        w.u32(sync.len() as u32);
        for &number in sync {
            w.u32(number);
        }
        w.end(start)?;
    }

    let stsc = run_length(
        chunks
            .iter()
            .map(|c| (c.sample_count as u32, c.description_index)),
    );
    let start = w.begin_full(boxes::STSC, 0, 0);
    w.u32(stsc.len() as u32);
    let mut first_chunk = 1u32;
    for (count, (samples_per_chunk, description_index)) in stsc {
        w.u32(first_chunk);
        w.u32(samples_per_chunk);
        w.u32(description_index);
        first_chunk += count;
    }
    w.end(start)?;

    let start = w.begin_full(boxes::STSZ, 0, 0);
    let uniform = track.samples.first().map(|s| s.size).filter(|&size| {
        size > 0 && track.samples.iter().all(|s| s.size == size)
    });
    match uniform {
        Some(size) => {
            w.u32(size);
            w.u32(track.samples.len() as u32);
        }
        None => {
            w.u32(0);
            w.u32(track.samples.len() as u32);
            for sample in &track.samples {
                w.u32(sample.size);
            }
        }
    }
    w.end(start)?;

    let wide = chunk_offsets.iter().any(|&o| o > u32::MAX as u64);
    let start = w.begin_full(if wide { boxes::CO64 } else { boxes::STCO }, 0, 0);
    w.u32(chunk_offsets.len() as u32);
    for &offset in chunk_offsets {
        if wide {
            w.u64(offset);
        } else {
            w.u32(offset as u32);
        }
    }
    w.end(start)?;

    w.end(stbl)?;
    Ok(())
}

/// Collapse equal neighbours into `(count, value)` runs
fn run_length<T: PartialEq + Copy>(values: impl Iterator<Item = T>) -> Vec<(u32, T)> {
    let mut runs: Vec<(u32, T)> = Vec::new();
    for value in values {
        match runs.last_mut() {
            Some((count, last)) if *last == value => *count += 1,
            _ => runs.push((1, value)),
        }
    }
    runs
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::container::movie::{Sample, TrackHeader};

    fn track(timescale: u32, durations: &[u32]) -> Track {
        Track {
            header: TrackHeader::default(),
            handler: *b"soun",
            handler_box: Vec::new(),
            media_header_box: None,
            sample_description_box: vec![0, 0, 0, 8, b's', b't', b's', b'd'],
            timescale,
            language: 0,
            samples: durations
                .iter()
                .map(|&duration| Sample {
                    offset: 0,
                    size: 4,
                    duration,
                    composition_offset: 0,
                    description_index: 1,
                })
                .collect(),
            sync_samples: None,
            has_composition_offsets: false,
        }
    }

    #[test]
    fn test_run_length() {
        let runs = run_length([5, 5, 7, 5].into_iter());
        assert_eq!(runs, vec![(2, 5), (1, 7), (1, 5)]);
        assert!(run_length(std::iter::empty::<u32>()).is_empty());
    }

    #[test]
    fn test_chunks_split_every_half_second() {
        let chunks = plan_chunks(&track(1000, &[100; 12]));
        let counts: Vec<usize> = chunks.iter().map(|c| c.sample_count).collect();
        assert_eq!(counts, vec![5, 5, 2]);
        assert_eq!(chunks[1].start_time, 500);
    }

    #[test]
    fn test_chunks_split_on_description_change() {
        let mut t = track(1000, &[10; 4]);
        t.samples[2].description_index = 2;
        let chunks = plan_chunks(&t);
        let counts: Vec<usize> = chunks.iter().map(|c| c.sample_count).collect();
        assert_eq!(counts, vec![2, 1, 1]);
        assert_eq!(chunks[1].description_index, 2);
        assert_eq!(chunks[2].description_index, 1);
    }

    #[test]
    fn test_large_mdat_header() {
        assert_eq!(mdat_header(100).len(), 8);
        assert_eq!(mdat_header(u32::MAX as u64).len(), 16);
    }
}
