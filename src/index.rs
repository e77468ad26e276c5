use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom};
use std::path::Path;

use log::warn;
use quick_protobuf::{BytesReader, MessageRead};

use crate::decode;
use crate::element::{ElementBlock, ItemType};
use crate::error::{Error, Result};
use crate::BlobHeader;

/// BlobHeaders without indexdata are usually only 13-14 bytes.
pub(crate) const MAX_BLOB_HEADER_SIZE: u32 = 64;

/// Blocks are usually around 60 KiB - 500 KiB, so anything near 20 MiB is
/// suspicious.
pub(crate) const MAX_BLOCK_SIZE: u32 = 20 * 1024 * 1024;

/// Features this reader knows how to handle when a file declares them as
/// required.
const SUPPORTED_FEATURES: &[&str] = &["OsmSchema-V0.6", "DenseNodes", "Sort.Type_then_ID"];

/// The feature promising type-then-id sort order, which random access
/// depends on.
const SORTED_FEATURE: &str = "Sort.Type_then_ID";

/// In-memory summary of one data block: where its blob body lives, how big
/// it is, and (once the block has been decoded at least once) the identity
/// of its first object.
#[derive(Debug, Clone, Copy)]
pub struct BlockStart {
    pub file_offset: u64,
    pub datasize: u32,
    pub first_item: Option<(ItemType, i64)>,
}

impl BlockStart {
    pub fn is_populated(&self) -> bool {
        self.first_item.is_some()
    }

    /// True when the needle provably sorts before every object in this
    /// block. Unpopulated descriptors can prove nothing.
    pub fn needle_before(&self, item_type: ItemType, id: i64) -> bool {
        match self.first_item {
            Some(first) => (item_type, id) < first,
            None => false,
        }
    }
}

/// Index over the data blocks of one PBF file, built by walking every blob
/// header (never the bodies) once at open time. Roughly 40 bytes per block;
/// planet has on the order of 50k blocks.
#[derive(Debug)]
pub struct BlockIndex {
    file: File,
    block_starts: Vec<BlockStart>,
}

impl BlockIndex {
    /// Open and index a PBF file for random access. Reads and checks the
    /// OSMHeader block, then skips from blob header to blob header.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut file = File::open(path)?;
        let file_size = file.metadata()?.len();

        // As we expect a reasonably large amount of entries, avoid
        // unnecessary reallocations in the beginning.
        let mut block_starts = Vec::with_capacity(1000);

        let mut offset = digest_header_blob(&mut file)?;
        while offset < file_size {
            offset = digest_data_blob(&mut file, offset, &mut block_starts)?;
        }
        // A 32-bit truncated size can make a huge file look tiny; a final
        // blob claiming bytes past EOF is the one chance to notice.
        if offset > file_size {
            return Err(Error::BadFraming(
                "file does not have the expected size (32-bit truncation?)",
            ));
        }

        Ok(BlockIndex { file, block_starts })
    }

    pub fn block_starts(&self) -> &[BlockStart] {
        &self.block_starts
    }

    pub fn block_count(&self) -> usize {
        self.block_starts.len()
    }

    /// Read, decompress and decode block `block_index`. Populates the
    /// descriptor's first-item field on the first decode. Seeks the shared
    /// file cursor, so callers must serialize access.
    pub fn get_parsed_block(&mut self, block_index: usize) -> Result<Vec<ElementBlock>> {
        let start = self.block_starts[block_index];
        self.file.seek(SeekFrom::Start(start.file_offset))?;

        let mut body = vec![0u8; start.datasize as usize];
        read_exactly(&mut self.file, &mut body, "unexpected EOF in block body")?;

        let blocks = decode::decode_blob(&body)?;
        if !self.block_starts[block_index].is_populated() {
            self.block_starts[block_index].first_item =
                blocks.first().and_then(ElementBlock::first_item);
        }
        Ok(blocks)
    }

    /// Narrow `[lo, hi)` towards the needle using only populated
    /// descriptors (no I/O), and return a candidate block worth decoding.
    ///
    /// Three stages: an optimistic binary search while midpoints happen to
    /// be populated, a linear refinement pass over whatever interval
    /// remains, and if the interval is still two or more fully unpopulated
    /// blocks, a blind guess at its middle.
    ///
    /// Returns `None` iff the search proved the needle absent: the interval
    /// is empty, or the needle sorts before even the first block.
    pub fn binary_search_guess(
        &self,
        item_type: ItemType,
        id: i64,
        lo: &mut usize,
        hi: &mut usize,
    ) -> Option<usize> {
        guess_block(&self.block_starts, item_type, id, lo, hi)
    }
}

/// Midpoint of `[lo, hi)`. For any interval of length two or more, the
/// result is strictly inside, so both halves shrink.
pub(crate) fn binsearch_middle(lo: usize, hi: usize) -> usize {
    debug_assert!(hi - lo >= 2);
    lo + (hi - lo) / 2
}

fn guess_block(
    starts: &[BlockStart],
    item_type: ItemType,
    id: i64,
    lo: &mut usize,
    hi: &mut usize,
) -> Option<usize> {
    debug_assert!(*hi <= starts.len());
    if *lo >= *hi {
        return None;
    }

    // Stage 1: optimistic binary search over populated midpoints. The same
    // few midpoints are hit first on every lookup, so they populate quickly
    // and later searches shrink the interval almost for free.
    loop {
        if *hi - *lo == 1 {
            // lo itself may never have been compared yet.
            if starts[*lo].needle_before(item_type, id) {
                *hi = *lo;
                return None;
            }
            return Some(*lo);
        }
        let mid = binsearch_middle(*lo, *hi);
        if !starts[mid].is_populated() {
            break;
        }
        if starts[mid].needle_before(item_type, id) {
            *hi = mid; // exclude mid
        } else {
            *lo = mid; // include mid: the needle may be its first element
        }
    }

    // Stage 2: linear refinement. Every populated descriptor in the
    // interval tightens one of the bounds.
    let mut mid = *lo;
    while mid < *hi {
        if starts[mid].is_populated() {
            if starts[mid].needle_before(item_type, id) {
                *hi = mid; // also ends the walk
            } else {
                *lo = mid;
            }
        }
        mid += 1;
    }

    if *lo == *hi {
        return None;
    }
    if *hi - *lo == 1 {
        return Some(*lo);
    }

    // Stage 3: only unpopulated blocks remain; guess the middle.
    Some(binsearch_middle(*lo, *hi))
}

pub(crate) fn read_exactly<R: Read>(
    reader: &mut R,
    buf: &mut [u8],
    eof_context: &'static str,
) -> Result<()> {
    reader.read_exact(buf).map_err(|err| match err.kind() {
        io::ErrorKind::UnexpectedEof => Error::BadFraming(eof_context),
        _ => Error::Io(err),
    })
}

/// Read the 4-byte network-order length and the BlobHeader behind it.
/// Returns the offset of the blob body, the blob type and the body size.
fn read_blob_header(file: &mut File, offset: u64) -> Result<(u64, String, u32)> {
    let mut prefix = [0u8; 4];
    read_exactly(file, &mut prefix, "unexpected EOF in blob header size")?;
    let header_size = u32::from_be_bytes(prefix);
    if header_size > MAX_BLOB_HEADER_SIZE {
        return Err(Error::BadFraming("oversized BlobHeader"));
    }

    let mut header_bytes = vec![0u8; header_size as usize];
    read_exactly(file, &mut header_bytes, "unexpected EOF in blob header")?;

    let mut reader = BytesReader::from_bytes(&header_bytes);
    let header = BlobHeader::from_reader(&mut reader, &header_bytes)?;
    if header.datasize <= 0 {
        return Err(Error::BadFraming("BlobHeader.datasize missing or zero"));
    }
    let datasize = header.datasize as u32;
    if datasize > MAX_BLOCK_SIZE {
        return Err(Error::BadFraming("oversized block"));
    }

    let body_offset = offset + 4 + u64::from(header_size);
    Ok((body_offset, header.type_pb.into_owned(), datasize))
}

/// Read and check the leading OSMHeader blob. Returns the offset just past
/// its body.
fn digest_header_blob(file: &mut File) -> Result<u64> {
    let (body_offset, blob_type, datasize) = read_blob_header(file, 0)?;
    if blob_type != "OSMHeader" {
        return Err(Error::BadFraming("first blob is not an OSMHeader"));
    }

    let mut body = vec![0u8; datasize as usize];
    read_exactly(file, &mut body, "unexpected EOF in OSMHeader body")?;
    let header = decode::decode_header(&body)?;

    for feature in &header.required_features {
        if !SUPPORTED_FEATURES.contains(&feature.as_str()) {
            return Err(Error::UnsupportedFeature(feature.clone()));
        }
    }
    let sorted = header
        .required_features
        .iter()
        .chain(header.optional_features.iter())
        .any(|feature| feature == SORTED_FEATURE);
    if !sorted {
        // Planet and most extracts declare it; test data often does not.
        warn!("file does not declare {SORTED_FEATURE}; lookups assume that order anyway");
    }

    Ok(body_offset + u64::from(datasize))
}

/// Record one OSMData blob's descriptor and skip over its body.
fn digest_data_blob(
    file: &mut File,
    offset: u64,
    block_starts: &mut Vec<BlockStart>,
) -> Result<u64> {
    let (body_offset, blob_type, datasize) = read_blob_header(file, offset)?;
    if blob_type != "OSMData" {
        return Err(Error::BadFraming("blob after the first is not OSMData"));
    }

    block_starts.push(BlockStart {
        file_offset: body_offset,
        datasize,
        first_item: None,
    });

    let next_offset = body_offset + u64::from(datasize);
    file.seek(SeekFrom::Start(next_offset))?;
    Ok(next_offset)
}
