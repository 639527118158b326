//! Minimal ISOBMFF reader: just enough of `moov` to find where a video
//! sample and its preceding sync sample live in the file.
//!
//! Times are decode times (`stts`); composition offsets are ignored.

use thiserror::Error;

#[derive(Debug, Error, PartialEq)]
pub enum Mp4Error {
    #[error("no {0} box")]
    Missing(&'static str),
    #[error("malformed {0} box")]
    Malformed(&'static str),
    #[error("no sample at {0:.3}s")]
    NoSample(f64),
    #[error("sample {0} lies outside the addressable file range")]
    SampleRange(u32),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
struct FourCC([u8; 4]);

impl FourCC {
    const MOOV: Self = Self(*b"moov");
    const TRAK: Self = Self(*b"trak");
    const MDIA: Self = Self(*b"mdia");
    const MDHD: Self = Self(*b"mdhd");
    const HDLR: Self = Self(*b"hdlr");
    const MINF: Self = Self(*b"minf");
    const STBL: Self = Self(*b"stbl");
    const STTS: Self = Self(*b"stts");
    const STSS: Self = Self(*b"stss");
    const STSZ: Self = Self(*b"stsz");
    const STSC: Self = Self(*b"stsc");
    const STCO: Self = Self(*b"stco");
    const CO64: Self = Self(*b"co64");
}

struct Mp4Box<'a> {
    kind: FourCC,
    content: &'a [u8],
}

/// Sequential box walker. Stops at the first box that runs past the data,
/// which for a streamed prefix is usually a partially-read `mdat`.
struct BoxIter<'a> {
    data: &'a [u8],
    offset: usize,
}

impl<'a> BoxIter<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self { data, offset: 0 }
    }
}

impl<'a> Iterator for BoxIter<'a> {
    type Item = Mp4Box<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        let data = self.data.get(self.offset..)?;
        let size32 = read_u32(data, 0)?;
        let kind = FourCC(data.get(4..8)?.try_into().ok()?);
        let (size, header) = match size32 {
            1 => (usize::try_from(read_u64(data, 8)?).ok()?, 16),
            0 => (data.len(), 8),
            n => (n as usize, 8),
        };
        if size < header || size > data.len() {
            return None;
        }
        self.offset += size;
        Some(Mp4Box {
            kind,
            content: &data[header..size],
        })
    }
}

fn child(data: &[u8], kind: FourCC) -> Option<Mp4Box<'_>> {
    BoxIter::new(data).find(|b| b.kind == kind)
}

fn read_u32(data: &[u8], at: usize) -> Option<u32> {
    Some(u32::from_be_bytes(data.get(at..at + 4)?.try_into().ok()?))
}

fn read_u64(data: &[u8], at: usize) -> Option<u64> {
    Some(u64::from_be_bytes(data.get(at..at + 8)?.try_into().ok()?))
}

/// Entries of a full box table: version/flags, u32 count, then `count`
/// fixed-size records starting at `header` bytes into the content.
fn table<'a>(content: &'a [u8], header: usize, entry: usize, name: &'static str) -> Result<(u32, &'a [u8]), Mp4Error> {
    let count = read_u32(content, header - 4).ok_or(Mp4Error::Malformed(name))?;
    let len = (count as usize)
        .checked_mul(entry)
        .ok_or(Mp4Error::Malformed(name))?;
    let body = content
        .get(header..header + len)
        .ok_or(Mp4Error::Malformed(name))?;
    Ok((count, body))
}

fn u32s(body: &[u8]) -> impl Iterator<Item = u32> + '_ {
    body.chunks_exact(4)
        .map(|c| u32::from_be_bytes([c[0], c[1], c[2], c[3]]))
}

#[derive(Clone, Debug, PartialEq, Eq)]
enum SampleSizes {
    Fixed { size: u32, count: u32 },
    Table(Vec<u32>),
}

impl SampleSizes {
    fn len(&self) -> u32 {
        match self {
            Self::Fixed { count, .. } => *count,
            Self::Table(sizes) => sizes.len() as u32,
        }
    }

    fn get(&self, index: u32) -> Option<u32> {
        match self {
            Self::Fixed { size, count } => (index < *count).then_some(*size),
            Self::Table(sizes) => sizes.get(index as usize).copied(),
        }
    }
}

/// Where one sample sits and what must be decoded to reach it.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SampleLocation {
    /// Zero-based sample index.
    pub index: u32,
    /// Zero-based index of the sync sample decoding starts from.
    pub sync_index: u32,
    /// Decode time of the sample in seconds.
    pub decode_time: f64,
    /// File offset of the first byte of the sync sample.
    pub start: u64,
    /// File offset one past the last byte needed (sync sample through target).
    pub end: u64,
}

/// Sample table of the first video track.
#[derive(Clone, Debug, PartialEq)]
pub struct SampleTable {
    timescale: u32,
    time_to_sample: Vec<(u32, u32)>,
    sync: Option<Vec<u32>>,
    sizes: SampleSizes,
    chunk_offsets: Vec<u64>,
    sample_to_chunk: Vec<(u32, u32)>,
}

impl SampleTable {
    /// Parse the first `vide` track of the `moov` box found in `data`.
    pub fn parse(data: &[u8]) -> Result<Self, Mp4Error> {
        let moov = BoxIter::new(data)
            .find(|b| b.kind == FourCC::MOOV)
            .ok_or(Mp4Error::Missing("moov"))?;
        for trak in BoxIter::new(moov.content).filter(|b| b.kind == FourCC::TRAK) {
            let Some(mdia) = child(trak.content, FourCC::MDIA) else {
                continue;
            };
            let is_video = child(mdia.content, FourCC::HDLR)
                .is_some_and(|h| h.content.get(8..12) == Some(b"vide".as_slice()));
            if !is_video {
                continue;
            }
            let mdhd = child(mdia.content, FourCC::MDHD).ok_or(Mp4Error::Missing("mdhd"))?;
            let timescale = parse_timescale(mdhd.content).ok_or(Mp4Error::Malformed("mdhd"))?;
            let stbl = child(mdia.content, FourCC::MINF)
                .and_then(|minf| child(minf.content, FourCC::STBL))
                .ok_or(Mp4Error::Missing("stbl"))?;
            return Self::from_stbl(timescale, stbl.content);
        }
        Err(Mp4Error::Missing("video trak"))
    }

    fn from_stbl(timescale: u32, stbl: &[u8]) -> Result<Self, Mp4Error> {
        let stts = child(stbl, FourCC::STTS).ok_or(Mp4Error::Missing("stts"))?;
        let (_, body) = table(stts.content, 8, 8, "stts")?;
        let time_to_sample = body
            .chunks_exact(8)
            .filter_map(|c| Some((read_u32(c, 0)?, read_u32(c, 4)?)))
            .collect();

        let sync = match child(stbl, FourCC::STSS) {
            Some(stss) => Some(u32s(table(stss.content, 8, 4, "stss")?.1).collect()),
            None => None,
        };

        let stsz = child(stbl, FourCC::STSZ).ok_or(Mp4Error::Missing("stsz"))?;
        let fixed = read_u32(stsz.content, 4).ok_or(Mp4Error::Malformed("stsz"))?;
        let sizes = if fixed != 0 {
            let count = read_u32(stsz.content, 8).ok_or(Mp4Error::Malformed("stsz"))?;
            SampleSizes::Fixed { size: fixed, count }
        } else {
            SampleSizes::Table(u32s(table(stsz.content, 12, 4, "stsz")?.1).collect())
        };

        let chunk_offsets = if let Some(stco) = child(stbl, FourCC::STCO) {
            u32s(table(stco.content, 8, 4, "stco")?.1).map(u64::from).collect()
        } else if let Some(co64) = child(stbl, FourCC::CO64) {
            table(co64.content, 8, 8, "co64")?
                .1
                .chunks_exact(8)
                .filter_map(|c| read_u64(c, 0))
                .collect()
        } else {
            return Err(Mp4Error::Missing("stco"));
        };

        let stsc = child(stbl, FourCC::STSC).ok_or(Mp4Error::Missing("stsc"))?;
        let sample_to_chunk = table(stsc.content, 8, 12, "stsc")?
            .1
            .chunks_exact(12)
            .filter_map(|c| Some((read_u32(c, 0)?, read_u32(c, 4)?)))
            .collect();

        Ok(Self {
            timescale,
            time_to_sample,
            sync,
            sizes,
            chunk_offsets,
            sample_to_chunk,
        })
    }

    pub fn sample_count(&self) -> u32 {
        self.sizes.len()
    }

    /// Sample displayed at `time` and its decode time. Past the end this is
    /// the last sample.
    fn sample_at(&self, time: f64) -> Option<(u32, f64)> {
        let last = self.sample_count().checked_sub(1)?;
        if self.timescale == 0 {
            return None;
        }
        let scale = self.timescale as f64;
        let target = (time.max(0.0) * scale).floor() as u64;
        let (mut start, mut index) = (0u64, 0u32);
        for &(count, delta) in &self.time_to_sample {
            let span = count as u64 * delta as u64;
            if delta > 0 && target < start + span {
                let step = (target - start) / delta as u64;
                let found = index.saturating_add(step as u32).min(last);
                return Some((found, (start + step * delta as u64) as f64 / scale));
            }
            start += span;
            index = index.saturating_add(count);
        }
        Some((last, start as f64 / scale))
    }

    fn sync_before(&self, index: u32) -> u32 {
        match &self.sync {
            None => index,
            Some(sync) => sync
                .iter()
                .map(|n| n.saturating_sub(1))
                .filter(|&i| i <= index)
                .max()
                .unwrap_or(0),
        }
    }

    /// File offset and size of a sample.
    fn sample_range(&self, index: u32) -> Result<(u64, u32), Mp4Error> {
        let total_chunks = self.chunk_offsets.len() as u32;
        let mut first_sample = 0u64;
        for (i, &(first_chunk, per_chunk)) in self.sample_to_chunk.iter().enumerate() {
            let next_chunk = self
                .sample_to_chunk
                .get(i + 1)
                .map_or(total_chunks.saturating_add(1), |e| e.0);
            let span = next_chunk.saturating_sub(first_chunk) as u64 * per_chunk as u64;
            if per_chunk > 0 && (index as u64) < first_sample + span {
                let rel = (index as u64 - first_sample) as u32;
                let chunk = first_chunk.saturating_sub(1) + rel / per_chunk;
                let first_in_chunk = index - rel % per_chunk;
                let out_of_range = || Mp4Error::SampleRange(index);
                let mut offset = *self.chunk_offsets.get(chunk as usize).ok_or_else(out_of_range)?;
                for s in first_in_chunk..index {
                    let size = self.sizes.get(s).ok_or_else(out_of_range)?;
                    offset = offset.checked_add(size as u64).ok_or_else(out_of_range)?;
                }
                let size = self.sizes.get(index).ok_or_else(out_of_range)?;
                return Ok((offset, size));
            }
            first_sample += span;
        }
        Err(Mp4Error::SampleRange(index))
    }

    /// Locate the sample shown at `time` and the byte span needed to decode it.
    pub fn locate(&self, time: f64) -> Result<SampleLocation, Mp4Error> {
        let (index, decode_time) = self.sample_at(time).ok_or(Mp4Error::NoSample(time))?;
        let sync_index = self.sync_before(index);
        let (start, _) = self.sample_range(sync_index)?;
        let mut end = start;
        for i in sync_index..=index {
            let (offset, size) = self.sample_range(i)?;
            let sample_end = offset
                .checked_add(size as u64)
                .ok_or(Mp4Error::SampleRange(i))?;
            end = end.max(sample_end);
        }
        Ok(SampleLocation {
            index,
            sync_index,
            decode_time,
            start,
            end,
        })
    }
}

fn parse_timescale(mdhd: &[u8]) -> Option<u32> {
    // version 1 widens creation/modification times to 64 bits
    match mdhd.first()? {
        1 => read_u32(mdhd, 20),
        _ => read_u32(mdhd, 12),
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) fn bx(kind: &[u8; 4], body: &[u8]) -> Vec<u8> {
        let mut out = ((body.len() + 8) as u32).to_be_bytes().to_vec();
        out.extend_from_slice(kind);
        out.extend_from_slice(body);
        out
    }

    fn full(kind: &[u8; 4], fields: &[u32]) -> Vec<u8> {
        let mut body = vec![0u8; 4];
        for f in fields {
            body.extend_from_slice(&f.to_be_bytes());
        }
        bx(kind, &body)
    }

    fn hdlr(handler: &[u8; 4]) -> Vec<u8> {
        let mut body = vec![0u8; 8];
        body.extend_from_slice(handler);
        body.extend_from_slice(&[0u8; 13]);
        bx(b"hdlr", &body)
    }

    fn trak(handler: &[u8; 4], stbl: &[Vec<u8>]) -> Vec<u8> {
        let mdhd = full(b"mdhd", &[0, 0, 1000, 1000, 0]);
        let stbl = bx(b"stbl", &stbl.concat());
        let minf = bx(b"minf", &stbl);
        let mdia = bx(b"mdia", &[mdhd, hdlr(handler), minf].concat());
        bx(b"trak", &mdia)
    }

    /// Ten 50-byte samples of 100 ticks at timescale 1000, sync at 1 and 6,
    /// five samples per chunk, chunks at 1000 and 2000.
    pub(crate) fn sample_movie() -> Vec<u8> {
        let mut stsz = vec![0, 10];
        stsz.extend([50; 10]);
        let video = trak(
            b"vide",
            &[
                full(b"stts", &[1, 10, 100]),
                full(b"stss", &[2, 1, 6]),
                full(b"stsz", &stsz),
                full(b"stsc", &[1, 1, 5, 1]),
                full(b"stco", &[2, 1000, 2000]),
            ],
        );
        let audio = trak(b"soun", &[]);
        let moov = bx(b"moov", &[audio, video].concat());
        [bx(b"ftyp", b"isom\0\0\0\0"), moov].concat()
    }

    #[test]
    fn locates_sample_and_sync_sample() {
        let table = SampleTable::parse(&sample_movie()).unwrap();
        assert_eq!(table.sample_count(), 10);
        let loc = table.locate(0.75).unwrap();
        assert_eq!(loc.index, 7);
        assert_eq!(loc.sync_index, 5);
        assert!((loc.decode_time - 0.7).abs() < 1e-9);
        assert_eq!(loc.start, 2000);
        assert_eq!(loc.end, 2150);
    }

    #[test]
    fn first_chunk_offsets() {
        let table = SampleTable::parse(&sample_movie()).unwrap();
        assert_eq!(table.sample_range(0), Ok((1000, 50)));
        assert_eq!(table.sample_range(4), Ok((1200, 50)));
        assert_eq!(table.sample_range(5), Ok((2000, 50)));
        assert_eq!(table.sample_range(10), Err(Mp4Error::SampleRange(10)));
    }

    #[test]
    fn time_past_end_is_last_sample() {
        let table = SampleTable::parse(&sample_movie()).unwrap();
        let loc = table.locate(99.0).unwrap();
        assert_eq!(loc.index, 9);
        assert_eq!(loc.sync_index, 5);
    }

    #[test]
    fn without_stss_every_sample_is_sync() {
        let mut stsz = vec![0, 4];
        stsz.extend([10; 4]);
        let video = trak(
            b"vide",
            &[
                full(b"stts", &[1, 4, 1]),
                full(b"stsz", &stsz),
                full(b"stsc", &[1, 1, 4, 1]),
                full(b"stco", &[1, 0]),
            ],
        );
        let table = SampleTable::parse(&bx(b"moov", &video)).unwrap();
        let loc = table.locate(0.0025).unwrap();
        assert_eq!((loc.index, loc.sync_index), (2, 2));
        assert_eq!((loc.start, loc.end), (20, 30));
    }

    #[test]
    fn wrapping_co64_offset_is_a_sample_range_error() {
        let mut stsz = vec![0, 2];
        stsz.extend([16; 2]);
        let mut co64 = vec![0u8; 4];
        co64.extend_from_slice(&1u32.to_be_bytes());
        co64.extend_from_slice(&(u64::MAX - 8).to_be_bytes());
        let video = trak(
            b"vide",
            &[
                full(b"stts", &[1, 2, 100]),
                full(b"stsz", &stsz),
                full(b"stsc", &[1, 1, 2, 1]),
                bx(b"co64", &co64),
            ],
        );
        let table = SampleTable::parse(&bx(b"moov", &video)).unwrap();
        assert_eq!(table.sample_range(0), Ok((u64::MAX - 8, 16)));
        assert_eq!(table.sample_range(1), Err(Mp4Error::SampleRange(1)));
        assert_eq!(table.locate(0.0), Err(Mp4Error::SampleRange(0)));
    }

    #[test]
    fn missing_moov() {
        let data = bx(b"ftyp", b"isom");
        assert_eq!(SampleTable::parse(&data), Err(Mp4Error::Missing("moov")));
    }

    #[test]
    fn truncated_moov_is_missing() {
        let movie = sample_movie();
        let cut = &movie[..movie.len() - 10];
        assert_eq!(SampleTable::parse(cut), Err(Mp4Error::Missing("moov")));
    }

    #[test]
    fn audio_only_has_no_video_track() {
        let moov = bx(b"moov", &trak(b"soun", &[]));
        assert_eq!(SampleTable::parse(&moov), Err(Mp4Error::Missing("video trak")));
    }

    #[test]
    fn overlong_table_is_malformed() {
        let video = trak(b"vide", &[full(b"stts", &[1_000_000, 1, 1])]);
        let err = SampleTable::parse(&bx(b"moov", &video)).unwrap_err();
        assert_eq!(err, Mp4Error::Malformed("stts"));
    }
}
