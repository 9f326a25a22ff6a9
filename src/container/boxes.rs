//! ISO-BMFF box primitives: big-endian readers, header scanning and a box builder

use std::io::{Read, Seek, SeekFrom};

use crate::error::{VtrimError, VtrimResult};

pub type FourCC = [u8; 4];

pub const FTYP: FourCC = *b"ftyp";
pub const MOOV: FourCC = *b"moov";
pub const MOOF: FourCC = *b"moof";
pub const MVEX: FourCC = *b"mvex";
pub const MDAT: FourCC = *b"mdat";
pub const MVHD: FourCC = *b"mvhd";
pub const TRAK: FourCC = *b"trak";
pub const TKHD: FourCC = *b"tkhd";
pub const MDIA: FourCC = *b"mdia";
pub const MDHD: FourCC = *b"mdhd";
pub const HDLR: FourCC = *b"hdlr";
pub const MINF: FourCC = *b"minf";
pub const VMHD: FourCC = *b"vmhd";
pub const SMHD: FourCC = *b"smhd";
pub const NMHD: FourCC = *b"nmhd";
pub const STHD: FourCC = *b"sthd";
pub const DINF: FourCC = *b"dinf";
pub const DREF: FourCC = *b"dref";
pub const URL: FourCC = *b"url ";
pub const STBL: FourCC = *b"stbl";
pub const STSD: FourCC = *b"stsd";
pub const STTS: FourCC = *b"stts";
pub const CTTS: FourCC = *b"ctts";
pub const STSS: FourCC = *b"stss";
pub const STSZ: FourCC = *b"stsz";
pub const STZ2: FourCC = *b"stz2";
pub const STSC: FourCC = *b"stsc";
pub const STCO: FourCC = *b"stco";
pub const CO64: FourCC = *b"co64";

/// Printable box type for error messages
pub fn fourcc_str(kind: &FourCC) -> String {
    String::from_utf8_lossy(kind).into_owned()
}

/// Cursor over an in-memory box payload
pub struct ByteReader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> ByteReader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    pub fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    pub fn bytes(&mut self, n: usize) -> VtrimResult<&'a [u8]> {
        if self.remaining() < n {
            return Err(VtrimError::parse(format!(
                "truncated box: wanted {} bytes, {} left",
                n,
                self.remaining()
            )));
        }
        let slice = &self.data[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    pub fn skip(&mut self, n: usize) -> VtrimResult<()> {
        self.bytes(n).map(|_| ())
    }

    pub fn u8(&mut self) -> VtrimResult<u8> {
        Ok(self.bytes(1)?[0])
    }

    pub fn u16(&mut self) -> VtrimResult<u16> {
        let b = self.bytes(2)?;
        Ok(u16::from_be_bytes([b[0], b[1]]))
    }

    pub fn u32(&mut self) -> VtrimResult<u32> {
        let b = self.bytes(4)?;
        Ok(u32::from_be_bytes([b[0], b[1], b[2], b[3]]))
    }

    pub fn i32(&mut self) -> VtrimResult<i32> {
        Ok(self.u32()? as i32)
    }

    pub fn u64(&mut self) -> VtrimResult<u64> {
        let b = self.bytes(8)?;
        let mut buf = [0u8; 8];
        buf.copy_from_slice(b);
        Ok(u64::from_be_bytes(buf))
    }

    pub fn fourcc(&mut self) -> VtrimResult<FourCC> {
        let b = self.bytes(4)?;
        Ok([b[0], b[1], b[2], b[3]])
    }

    /// Version byte and 24-bit flags of a full box
    pub fn full_header(&mut self) -> VtrimResult<(u8, u32)> {
        let word = self.u32()?;
        Ok(((word >> 24) as u8, word & 0x00FF_FFFF))
    }

    /// Entry count of a table, bounded by the bytes actually present
    pub fn count(&mut self, entry_size: usize) -> VtrimResult<usize> {
        let count = self.u32()? as usize;
        if count.saturating_mul(entry_size) > self.remaining() {
            return Err(VtrimError::parse(format!(
                "table declares {} entries but only {} bytes follow",
                count,
                self.remaining()
            )));
        }
        Ok(count)
    }
}

/// A child box located inside a parent payload
#[derive(Debug, Clone, Copy)]
pub struct ChildBox<'a> {
    pub kind: FourCC,
    /// Payload without the header
    pub payload: &'a [u8],
    /// Entire box including the header
    pub raw: &'a [u8],
}

/// Split a payload into its child boxes
pub fn children(data: &[u8]) -> VtrimResult<Vec<ChildBox<'_>>> {
    let mut boxes = Vec::new();
    let mut pos = 0usize;

    while pos < data.len() {
        let mut reader = ByteReader::new(&data[pos..]);
        if reader.remaining() < 8 {
            // Trailing padding some muxers leave inside containers
            break;
        }
        let size32 = reader.u32()?;
        let kind = reader.fourcc()?;
        let (size, header) = match size32 {
            0 => ((data.len() - pos) as u64, 8usize),
            1 => (reader.u64()?, 16usize),
            n => (n as u64, 8usize),
        };

        if size < header as u64 || size > (data.len() - pos) as u64 {
            return Err(VtrimError::parse(format!(
                "box '{}' has invalid size {}",
                fourcc_str(&kind),
                size
            )));
        }

        let end = pos + size as usize;
        boxes.push(ChildBox {
            kind,
            payload: &data[pos + header..end],
            raw: &data[pos..end],
        });
        pos = end;
    }

    Ok(boxes)
}

/// First child of the given type
pub fn find<'a>(boxes: &[ChildBox<'a>], kind: FourCC) -> Option<ChildBox<'a>> {
    boxes.iter().find(|b| b.kind == kind).copied()
}

/// First child of the given type, or a parse error naming the parent
pub fn require<'a>(boxes: &[ChildBox<'a>], kind: FourCC, parent: &str) -> VtrimResult<ChildBox<'a>> {
    find(boxes, kind).ok_or_else(|| {
        VtrimError::parse(format!("'{}' is missing a '{}' box", parent, fourcc_str(&kind)))
    })
}

/// Location of a top-level box in a file
#[derive(Debug, Clone, Copy)]
pub struct TopLevelBox {
    pub kind: FourCC,
    pub offset: u64,
    pub header_len: u64,
    pub size: u64,
}

impl TopLevelBox {
    pub fn payload_offset(&self) -> u64 {
        self.offset + self.header_len
    }

    pub fn payload_len(&self) -> u64 {
        self.size - self.header_len
    }
}

/// Walk the top-level boxes of a file without reading their payloads
pub fn scan_top_level<R: Read + Seek>(reader: &mut R) -> VtrimResult<Vec<TopLevelBox>> {
    let file_size = reader.seek(SeekFrom::End(0))?;
    reader.seek(SeekFrom::Start(0))?;

    let mut boxes = Vec::new();
    let mut pos = 0u64;
    while pos + 8 <= file_size {
        reader.seek(SeekFrom::Start(pos))?;
        let mut header = [0u8; 8];
        reader.read_exact(&mut header)?;
        let size32 = u32::from_be_bytes([header[0], header[1], header[2], header[3]]);
        let kind = [header[4], header[5], header[6], header[7]];

        let (size, header_len) = match size32 {
            0 => (file_size - pos, 8),
            1 => {
                let mut large = [0u8; 8];
                reader.read_exact(&mut large)?;
                (u64::from_be_bytes(large), 16)
            }
            n => (n as u64, 8),
        };

        if size < header_len || size > file_size - pos {
            return Err(VtrimError::parse(format!(
                "top-level box '{}' at offset {} has invalid size {}",
                fourcc_str(&kind),
                pos,
                size
            )));
        }

        boxes.push(TopLevelBox {
            kind,
            offset: pos,
            header_len,
            size,
        });
        pos += size;
    }

    Ok(boxes)
}

/// Read a top-level box payload into memory
pub fn read_payload<R: Read + Seek>(reader: &mut R, top: &TopLevelBox) -> VtrimResult<Vec<u8>> {
    let len = usize::try_from(top.payload_len())
        .map_err(|_| VtrimError::parse(format!("'{}' box too large", fourcc_str(&top.kind))))?;
    let mut payload = vec![0u8; len];
    reader.seek(SeekFrom::Start(top.payload_offset()))?;
    reader.read_exact(&mut payload)?;
    Ok(payload)
}

/// Big-endian box serializer with size back-patching
#[derive(Default)]
pub struct BoxWriter {
    buf: Vec<u8>,
}

impl BoxWriter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a box; returns the position to pass to [`BoxWriter::end`]
    pub fn begin(&mut self, kind: FourCC) -> usize {
        let start = self.buf.len();
        self.u32(0);
        self.bytes(&kind);
        start
    }

    /// Open a full box with version and flags
    pub fn begin_full(&mut self, kind: FourCC, version: u8, flags: u32) -> usize {
        let start = self.begin(kind);
        self.u32(((version as u32) << 24) | (flags & 0x00FF_FFFF));
        start
    }

    pub fn end(&mut self, start: usize) -> VtrimResult<()> {
        let size = u32::try_from(self.buf.len() - start)
            .map_err(|_| VtrimError::write("box exceeds 4 GiB"))?;
        self.buf[start..start + 4].copy_from_slice(&size.to_be_bytes());
        Ok(())
    }

    pub fn u8(&mut self, v: u8) {
        self.buf.push(v);
    }

    pub fn u16(&mut self, v: u16) {
        self.buf.extend_from_slice(&v.to_be_bytes());
    }

    pub fn u32(&mut self, v: u32) {
        self.buf.extend_from_slice(&v.to_be_bytes());
    }

    pub fn i32(&mut self, v: i32) {
        self.buf.extend_from_slice(&v.to_be_bytes());
    }

    pub fn u64(&mut self, v: u64) {
        self.buf.extend_from_slice(&v.to_be_bytes());
    }

    pub fn bytes(&mut self, v: &[u8]) {
        self.buf.extend_from_slice(v);
    }

    pub fn zeros(&mut self, n: usize) {
        self.buf.resize(self.buf.len() + n, 0);
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn into_inner(self) -> Vec<u8> {
        self.buf
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn test_children_handles_size_variants() {
        let mut w = BoxWriter::new();
        let a = w.begin(*b"abcd");
        w.u32(7);
        w.end(a).unwrap();
        // 64-bit size form
        w.u32(1);
        w.bytes(b"wide");
        w.u64(20);
        w.u32(9);
        // Extends to the end
        w.u32(0);
        w.bytes(b"last");
        w.bytes(&[1, 2, 3]);
        let data = w.into_inner();

        let boxes = children(&data).unwrap();
        assert_eq!(boxes.len(), 3);
        assert_eq!(&boxes[0].kind, b"abcd");
        assert_eq!(boxes[0].payload, &7u32.to_be_bytes());
        assert_eq!(&boxes[1].kind, b"wide");
        assert_eq!(boxes[1].payload, &9u32.to_be_bytes());
        assert_eq!(boxes[2].payload, &[1, 2, 3]);
    }

    #[test]
    fn test_children_rejects_oversized_box() {
        let mut data = Vec::new();
        data.extend_from_slice(&64u32.to_be_bytes());
        data.extend_from_slice(b"free");
        assert!(matches!(
            children(&data),
            Err(VtrimError::ContainerParse { .. })
        ));
    }

    #[test]
    fn test_reader_rejects_impossible_count() {
        let data = 1000u32.to_be_bytes();
        let mut reader = ByteReader::new(&data);
        assert!(reader.count(8).is_err());
    }

    #[test]
    fn test_scan_top_level() {
        let mut w = BoxWriter::new();
        let f = w.begin(FTYP);
        w.bytes(b"isom");
        w.end(f).unwrap();
        let m = w.begin(MDAT);
        w.zeros(10);
        w.end(m).unwrap();
        let mut cursor = Cursor::new(w.into_inner());

        let boxes = scan_top_level(&mut cursor).unwrap();
        assert_eq!(boxes.len(), 2);
        assert_eq!(boxes[1].kind, MDAT);
        assert_eq!(boxes[1].offset, 12);
        assert_eq!(boxes[1].payload_len(), 10);
        assert_eq!(read_payload(&mut cursor, &boxes[0]).unwrap(), b"isom");
    }

    #[test]
    fn test_scan_top_level_rejects_huge_large_size() {
        let mut w = BoxWriter::new();
        let f = w.begin(FTYP);
        w.bytes(b"isom");
        w.end(f).unwrap();
        w.u32(1);
        w.bytes(b"free");
        w.u64(u64::MAX - 4);
        let mut cursor = Cursor::new(w.into_inner());

        let err = scan_top_level(&mut cursor).unwrap_err();
        assert!(matches!(err, VtrimError::ContainerParse { .. }));
    }
}
