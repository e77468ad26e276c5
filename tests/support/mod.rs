//! Synthesizes small PBF files through the same generated message types
//! the crate reads with.

// Not every test binary uses every helper.
#![allow(dead_code)]

use std::borrow::Cow;
use std::io::Write;

use quick_protobuf::{MessageWrite, Writer};
use tempfile::NamedTempFile;

use osm_url_extract::{
    Blob, BlobHeader, DenseNodes, HeaderBlock, ItemType, MemberType, Node, PrimitiveBlock,
    PrimitiveGroup, Relation, StringTable, Way,
};

const GRANULARITY: i64 = 100;

pub struct TestNode {
    pub id: i64,
    pub lon: f64,
    pub lat: f64,
    pub tags: Vec<(&'static str, &'static str)>,
}

pub struct TestWay {
    pub id: i64,
    pub refs: Vec<i64>,
    pub tags: Vec<(&'static str, &'static str)>,
}

pub struct TestRelation {
    pub id: i64,
    pub members: Vec<(ItemType, i64)>,
    pub tags: Vec<(&'static str, &'static str)>,
}

/// One data blob holding a single run of same-kind objects.
pub enum TestBlock {
    Dense(Vec<TestNode>),
    Plain(Vec<TestNode>),
    Ways(Vec<TestWay>),
    Relations(Vec<TestRelation>),
}

pub fn node(id: i64, lon: f64, lat: f64) -> TestNode {
    TestNode {
        id,
        lon,
        lat,
        tags: Vec::new(),
    }
}

pub fn tagged_node(
    id: i64,
    lon: f64,
    lat: f64,
    tags: &[(&'static str, &'static str)],
) -> TestNode {
    TestNode {
        id,
        lon,
        lat,
        tags: tags.to_vec(),
    }
}

pub fn way(id: i64, refs: &[i64], tags: &[(&'static str, &'static str)]) -> TestWay {
    TestWay {
        id,
        refs: refs.to_vec(),
        tags: tags.to_vec(),
    }
}

pub fn relation(
    id: i64,
    members: &[(ItemType, i64)],
    tags: &[(&'static str, &'static str)],
) -> TestRelation {
    TestRelation {
        id,
        members: members.to_vec(),
        tags: tags.to_vec(),
    }
}

/// Write a PBF file with uncompressed blob bodies.
pub fn pbf_file(blocks: Vec<TestBlock>) -> NamedTempFile {
    build_pbf_file(blocks, false)
}

/// Write a PBF file with zlib-compressed blob bodies.
pub fn pbf_file_zlib(blocks: Vec<TestBlock>) -> NamedTempFile {
    build_pbf_file(blocks, true)
}

/// Write a PBF file that jumps straight into OSMData blobs, skipping the
/// mandatory OSMHeader. For framing tests.
pub fn pbf_file_without_header(blocks: Vec<TestBlock>) -> NamedTempFile {
    let mut bytes = Vec::new();
    for block in blocks {
        append_blob(&mut bytes, "OSMData", primitive_block_bytes(block), false);
    }
    raw_file(&bytes)
}

/// Write arbitrary bytes to a temp file, for malformed-framing tests.
pub fn raw_file(bytes: &[u8]) -> NamedTempFile {
    let mut file = NamedTempFile::new().unwrap();
    file.write_all(bytes).unwrap();
    file.flush().unwrap();
    file
}

fn build_pbf_file(blocks: Vec<TestBlock>, compress: bool) -> NamedTempFile {
    let mut bytes = Vec::new();
    append_blob(&mut bytes, "OSMHeader", header_block_bytes(), compress);
    for block in blocks {
        append_blob(&mut bytes, "OSMData", primitive_block_bytes(block), compress);
    }
    raw_file(&bytes)
}

fn header_block_bytes() -> Vec<u8> {
    message_bytes(&HeaderBlock {
        required_features: vec![Cow::Borrowed("OsmSchema-V0.6"), Cow::Borrowed("DenseNodes")],
        optional_features: vec![Cow::Borrowed("Sort.Type_then_ID")],
        writingprogram: Some(Cow::Borrowed("osm-url-extract test support")),
        source: None,
    })
}

fn primitive_block_bytes(block: TestBlock) -> Vec<u8> {
    let mut pool = StringPool::new();
    let group = match block {
        TestBlock::Dense(nodes) => dense_group(&nodes, &mut pool),
        TestBlock::Plain(nodes) => plain_group(&nodes, &mut pool),
        TestBlock::Ways(ways) => ways_group(&ways, &mut pool),
        TestBlock::Relations(relations) => relations_group(&relations, &mut pool),
    };
    message_bytes(&PrimitiveBlock {
        stringtable: StringTable {
            s: pool.strings.into_iter().map(Cow::Owned).collect(),
        },
        primitivegroup: vec![group],
        granularity: GRANULARITY,
        lat_offset: 0,
        lon_offset: 0,
    })
}

fn dense_group(nodes: &[TestNode], pool: &mut StringPool) -> PrimitiveGroup {
    let mut dense = DenseNodes::default();
    let (mut prev_id, mut prev_lat, mut prev_lon) = (0i64, 0i64, 0i64);
    for node in nodes {
        let (raw_lat, raw_lon) = (to_raw(node.lat), to_raw(node.lon));
        dense.id.push(node.id - prev_id);
        dense.lat.push(raw_lat - prev_lat);
        dense.lon.push(raw_lon - prev_lon);
        (prev_id, prev_lat, prev_lon) = (node.id, raw_lat, raw_lon);
        for (key, value) in &node.tags {
            dense.keys_vals.push(pool.intern(key) as i32);
            dense.keys_vals.push(pool.intern(value) as i32);
        }
        dense.keys_vals.push(0);
    }
    PrimitiveGroup {
        nodes: Vec::new(),
        dense: Some(dense),
        ways: Vec::new(),
        relations: Vec::new(),
    }
}

fn plain_group(nodes: &[TestNode], pool: &mut StringPool) -> PrimitiveGroup {
    PrimitiveGroup {
        nodes: nodes
            .iter()
            .map(|node| {
                let (keys, vals) = pool.intern_tags(&node.tags);
                Node {
                    id: node.id,
                    keys,
                    vals,
                    lat: to_raw(node.lat),
                    lon: to_raw(node.lon),
                }
            })
            .collect(),
        dense: None,
        ways: Vec::new(),
        relations: Vec::new(),
    }
}

fn ways_group(ways: &[TestWay], pool: &mut StringPool) -> PrimitiveGroup {
    PrimitiveGroup {
        nodes: Vec::new(),
        dense: None,
        ways: ways
            .iter()
            .map(|way| {
                let (keys, vals) = pool.intern_tags(&way.tags);
                Way {
                    id: way.id,
                    keys,
                    vals,
                    refs: delta_encode(&way.refs),
                }
            })
            .collect(),
        relations: Vec::new(),
    }
}

fn relations_group(relations: &[TestRelation], pool: &mut StringPool) -> PrimitiveGroup {
    PrimitiveGroup {
        nodes: Vec::new(),
        dense: None,
        ways: Vec::new(),
        relations: relations
            .iter()
            .map(|relation| {
                let (keys, vals) = pool.intern_tags(&relation.tags);
                let member_ids: Vec<i64> =
                    relation.members.iter().map(|&(_, id)| id).collect();
                Relation {
                    id: relation.id,
                    keys,
                    vals,
                    roles_sid: vec![0; relation.members.len()],
                    memids: delta_encode(&member_ids),
                    types: relation
                        .members
                        .iter()
                        .map(|&(item_type, _)| member_type(item_type))
                        .collect(),
                }
            })
            .collect(),
    }
}

fn member_type(item_type: ItemType) -> MemberType {
    match item_type {
        ItemType::Node => MemberType::NODE,
        ItemType::Way => MemberType::WAY,
        ItemType::Relation => MemberType::RELATION,
    }
}

fn to_raw(degrees: f64) -> i64 {
    // granularity 100 nanodegrees
    (degrees * 1e7).round() as i64
}

fn delta_encode(values: &[i64]) -> Vec<i64> {
    let mut prev = 0i64;
    values
        .iter()
        .map(|&value| {
            let delta = value - prev;
            prev = value;
            delta
        })
        .collect()
}

fn append_blob(out: &mut Vec<u8>, blob_type: &str, body: Vec<u8>, compress: bool) {
    let blob = if compress {
        let mut encoder =
            flate2::write::ZlibEncoder::new(Vec::new(), flate2::Compression::default());
        encoder.write_all(&body).unwrap();
        Blob {
            raw: None,
            raw_size: Some(body.len() as i32),
            zlib_data: Some(Cow::Owned(encoder.finish().unwrap())),
            lzma_data: None,
        }
    } else {
        Blob {
            raw_size: Some(body.len() as i32),
            raw: Some(Cow::Owned(body)),
            zlib_data: None,
            lzma_data: None,
        }
    };
    let blob_bytes = message_bytes(&blob);

    let header_bytes = message_bytes(&BlobHeader {
        type_pb: Cow::Borrowed(blob_type),
        indexdata: None,
        datasize: blob_bytes.len() as i32,
    });
    out.extend_from_slice(&(header_bytes.len() as u32).to_be_bytes());
    out.extend_from_slice(&header_bytes);
    out.extend_from_slice(&blob_bytes);
}

fn message_bytes<M: MessageWrite>(message: &M) -> Vec<u8> {
    let mut bytes = Vec::new();
    let mut writer = Writer::new(&mut bytes);
    message.write_message(&mut writer).unwrap();
    bytes
}

struct StringPool {
    strings: Vec<Vec<u8>>,
}

impl StringPool {
    fn new() -> Self {
        // index 0 is reserved for the empty string
        StringPool {
            strings: vec![Vec::new()],
        }
    }

    fn intern(&mut self, s: &str) -> u32 {
        if let Some(index) = self.strings.iter().position(|existing| existing == s.as_bytes()) {
            return index as u32;
        }
        self.strings.push(s.as_bytes().to_vec());
        (self.strings.len() - 1) as u32
    }

    fn intern_tags(&mut self, tags: &[(&str, &str)]) -> (Vec<u32>, Vec<u32>) {
        tags.iter()
            .map(|&(key, value)| (self.intern(key), self.intern(value)))
            .unzip()
    }
}
