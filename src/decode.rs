use std::borrow::Cow;
use std::io::Read;
use std::sync::Arc;

use quick_protobuf::{BytesReader, MessageRead};

use crate::element::{DenseNodeBlock, ElementBlock, NodeBlock, RelationBlock, WayBlock};
use crate::error::{Error, Result};
use crate::{Blob, HeaderBlock, PrimitiveBlock};

/// Feature lists of the OSMHeader block, with the string table resolved
/// into owned strings.
#[derive(Debug)]
pub struct PbfHeader {
    pub required_features: Vec<String>,
    pub optional_features: Vec<String>,
}

/// Decode one OSMData blob body into element blocks. Concatenating the
/// returned blocks in order reproduces the in-file object order; the first
/// element of the first block is the smallest object of the blob.
pub fn decode_blob(data: &[u8]) -> Result<Vec<ElementBlock>> {
    let decompressed = decompress_blob(data)?;
    parse_block(&decompressed)
}

/// Decode the OSMHeader blob body.
pub fn decode_header(data: &[u8]) -> Result<PbfHeader> {
    let decompressed = decompress_blob(data)?;
    let mut reader = BytesReader::from_bytes(&decompressed);
    let header = HeaderBlock::from_reader(&mut reader, &decompressed)?;
    Ok(PbfHeader {
        required_features: header
            .required_features
            .into_iter()
            .map(Cow::into_owned)
            .collect(),
        optional_features: header
            .optional_features
            .into_iter()
            .map(Cow::into_owned)
            .collect(),
    })
}

fn decompress_blob(data: &[u8]) -> Result<Vec<u8>> {
    let mut reader = BytesReader::from_bytes(data);
    let blob = Blob::from_reader(&mut reader, data)?;

    // Either take the declared raw size, or guess twice the compressed size.
    let size_hint = match blob.raw_size {
        Some(raw_size) => raw_size as usize,
        None => data.len() * 2,
    };
    let mut decompressed: Vec<u8> = Vec::with_capacity(size_hint);
    if let Some(raw) = &blob.raw {
        decompressed.extend_from_slice(raw);
    } else if let Some(zlib) = &blob.zlib_data {
        let mut decoder = flate2::read::ZlibDecoder::new(&zlib[..]);
        decoder.read_to_end(&mut decompressed)?;
    } else if let Some(lzma) = &blob.lzma_data {
        let mut decoder = xz2::read::XzDecoder::new(&lzma[..]);
        decoder.read_to_end(&mut decompressed)?;
    } else {
        return Err(Error::BadFraming("blob carries no data"));
    }
    Ok(decompressed)
}

fn parse_block(data: &[u8]) -> Result<Vec<ElementBlock>> {
    let mut reader = BytesReader::from_bytes(data);
    let block = PrimitiveBlock::from_reader(&mut reader, data)?;

    let table: Vec<Cow<'static, [u8]>> = block
        .stringtable
        .s
        .into_iter()
        .map(|s| Cow::Owned(s.into_owned()))
        .collect();
    let table = Arc::new(table);

    let mut blocks: Vec<ElementBlock> = Vec::new();
    for group in block.primitivegroup {
        if let Some(dense) = group.dense {
            if !dense.id.is_empty() {
                blocks.push(ElementBlock::Dense(DenseNodeBlock {
                    kv_offsets: compute_offsets(&dense.keys_vals, dense.id.len()),
                    table: Arc::clone(&table),
                    granularity: block.granularity,
                    lat_offset: block.lat_offset,
                    lon_offset: block.lon_offset,
                    nodes: dense,
                }));
            }
        }
        if !group.nodes.is_empty() {
            blocks.push(ElementBlock::Nodes(NodeBlock {
                nodes: group.nodes,
                table: Arc::clone(&table),
                granularity: block.granularity,
                lat_offset: block.lat_offset,
                lon_offset: block.lon_offset,
            }));
        }
        if !group.ways.is_empty() {
            blocks.push(ElementBlock::Ways(WayBlock {
                ways: group.ways,
                table: Arc::clone(&table),
            }));
        }
        if !group.relations.is_empty() {
            blocks.push(ElementBlock::Relations(RelationBlock {
                relations: group.relations,
                table: Arc::clone(&table),
            }));
        }
    }

    Ok(blocks)
}

// Computes per-node offsets into the interleaved keys_vals column, which
// looks like [k, v, k, v, ..., 0, k, v, ..., 0, ...].
fn compute_offsets(keys_vals: &[i32], node_count: usize) -> Vec<usize> {
    let mut offsets = Vec::with_capacity(node_count + 1);
    offsets.push(0);

    let mut idx = 0;
    for _ in 0..node_count {
        while idx < keys_vals.len() && keys_vals[idx] != 0 {
            idx += 2; // skip k, v pair
        }
        if idx >= keys_vals.len() {
            // malformed, but avoid reading past the end
            offsets.push(keys_vals.len());
            continue;
        }
        idx += 1; // skip terminating zero
        offsets.push(idx);
    }

    offsets
}
