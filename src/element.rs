use std::borrow::Cow;
use std::cmp::Ordering;
use std::sync::Arc;

use crate::{DenseNodes, MemberType, Node, Relation, Way};

/// The three OSM object kinds, in file sort order: all nodes come before
/// all ways, which come before all relations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ItemType {
    Node,
    Way,
    Relation,
}

impl ItemType {
    /// One-letter code used in warnings and in the output document.
    pub fn as_char(self) -> char {
        match self {
            ItemType::Node => 'n',
            ItemType::Way => 'w',
            ItemType::Relation => 'r',
        }
    }
}

impl From<MemberType> for ItemType {
    fn from(member_type: MemberType) -> Self {
        match member_type {
            MemberType::NODE => ItemType::Node,
            MemberType::WAY => ItemType::Way,
            MemberType::RELATION => ItemType::Relation,
        }
    }
}

/// A point in WGS84 degrees.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Location {
    pub lon: f64,
    pub lat: f64,
}

impl Location {
    fn from_raw(granularity: i64, lon_offset: i64, lat_offset: i64, lon: i64, lat: i64) -> Self {
        Location {
            lon: (lon * granularity + lon_offset) as f64 * 1e-9,
            lat: (lat * granularity + lat_offset) as f64 * 1e-9,
        }
    }
}

/// A run of same-kind objects decoded from one primitive group. Runs from
/// the same block share a string table. Never empty.
#[derive(Debug)]
pub enum ElementBlock {
    Dense(DenseNodeBlock),
    Nodes(NodeBlock),
    Ways(WayBlock),
    Relations(RelationBlock),
}

impl ElementBlock {
    pub fn len(&self) -> usize {
        match self {
            ElementBlock::Dense(block) => block.len(),
            ElementBlock::Nodes(block) => block.nodes.len(),
            ElementBlock::Ways(block) => block.ways.len(),
            ElementBlock::Relations(block) => block.relations.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Identity of the first object, which by the sort invariant is the
    /// smallest object in the run.
    pub fn first_item(&self) -> Option<(ItemType, i64)> {
        match self {
            ElementBlock::Dense(block) => {
                block.nodes.id.first().map(|&id| (ItemType::Node, id))
            }
            ElementBlock::Nodes(block) => {
                block.nodes.first().map(|node| (ItemType::Node, node.id))
            }
            ElementBlock::Ways(block) => block.ways.first().map(|way| (ItemType::Way, way.id)),
            ElementBlock::Relations(block) => {
                block.relations.first().map(|rel| (ItemType::Relation, rel.id))
            }
        }
    }

    /// Iterate over the objects in file order.
    pub fn elements(&self) -> ElementIter<'_> {
        match self {
            ElementBlock::Dense(block) => ElementIter::Dense(block.iter()),
            ElementBlock::Nodes(block) => ElementIter::Nodes(block.iter()),
            ElementBlock::Ways(block) => ElementIter::Ways(block.iter()),
            ElementBlock::Relations(block) => ElementIter::Relations(block.iter()),
        }
    }
}

/// A borrowed view of a single OSM object inside a decoded block.
#[derive(Debug)]
pub enum Element<'a> {
    DenseNode(DenseNodeRef<'a>),
    Node(NodeRef<'a>),
    Way(WayRef<'a>),
    Relation(RelationRef<'a>),
}

impl<'a> Element<'a> {
    pub fn item_type(&self) -> ItemType {
        match self {
            Element::DenseNode(_) | Element::Node(_) => ItemType::Node,
            Element::Way(_) => ItemType::Way,
            Element::Relation(_) => ItemType::Relation,
        }
    }

    pub fn id(&self) -> i64 {
        match self {
            Element::DenseNode(node) => node.id(),
            Element::Node(node) => node.id(),
            Element::Way(way) => way.id(),
            Element::Relation(relation) => relation.id(),
        }
    }

    /// The object's own coordinate; `None` for ways and relations.
    pub fn location(&self) -> Option<Location> {
        match self {
            Element::DenseNode(node) => Some(node.location()),
            Element::Node(node) => Some(node.location()),
            Element::Way(_) | Element::Relation(_) => None,
        }
    }

    pub fn tags(&self) -> Tags<'a> {
        match self {
            Element::DenseNode(node) => Tags::Dense(node.tags()),
            Element::Node(node) => Tags::Plain(node.tags()),
            Element::Way(way) => Tags::Plain(way.tags()),
            Element::Relation(relation) => Tags::Plain(relation.tags()),
        }
    }
}

pub enum ElementIter<'a> {
    Dense(DenseNodeIter<'a>),
    Nodes(NodeIter<'a>),
    Ways(WayIter<'a>),
    Relations(RelationIter<'a>),
}

impl<'a> Iterator for ElementIter<'a> {
    type Item = Element<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        match self {
            ElementIter::Dense(iter) => iter.next().map(Element::DenseNode),
            ElementIter::Nodes(iter) => iter.next().map(Element::Node),
            ElementIter::Ways(iter) => iter.next().map(Element::Way),
            ElementIter::Relations(iter) => iter.next().map(Element::Relation),
        }
    }
}

// --------------------------- DENSE NODES ---------------------------

/// A run of delta-encoded nodes. Ids and coordinates decode incrementally
/// while iterating.
#[derive(Debug)]
pub struct DenseNodeBlock {
    pub(crate) nodes: DenseNodes,
    pub(crate) table: Arc<Vec<Cow<'static, [u8]>>>,
    pub(crate) granularity: i64,
    pub(crate) lat_offset: i64,
    pub(crate) lon_offset: i64,
    /// Start of each node's zero-terminated key/value run in `keys_vals`.
    pub(crate) kv_offsets: Vec<usize>,
}

impl DenseNodeBlock {
    pub fn iter(&self) -> DenseNodeIter<'_> {
        DenseNodeIter {
            block: self,
            index: 0,
            prev_id: 0,
            prev_lat: 0,
            prev_lon: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.nodes.id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.id.is_empty()
    }
}

/// A reference to a single dense node, with its deltas already applied.
#[derive(Debug)]
pub struct DenseNodeRef<'a> {
    block: &'a DenseNodeBlock,
    index: usize,
    id: i64,
    lat: i64,
    lon: i64,
}

impl<'a> DenseNodeRef<'a> {
    #[inline]
    pub fn id(&self) -> i64 {
        self.id
    }

    #[inline]
    pub fn location(&self) -> Location {
        Location::from_raw(
            self.block.granularity,
            self.block.lon_offset,
            self.block.lat_offset,
            self.lon,
            self.lat,
        )
    }

    /// Iterator over (key, value) pairs.
    #[inline]
    pub fn tags(&self) -> DenseNodeTagIter<'a> {
        let start = self.block.kv_offsets[self.index];
        let end = self.block.kv_offsets[self.index + 1];
        DenseNodeTagIter {
            slice: &self.block.nodes.keys_vals[start..end],
            table: &self.block.table,
            pos: 0,
        }
    }
}

pub struct DenseNodeIter<'a> {
    block: &'a DenseNodeBlock,
    index: usize,
    prev_id: i64,
    prev_lat: i64,
    prev_lon: i64,
}

impl<'a> Iterator for DenseNodeIter<'a> {
    type Item = DenseNodeRef<'a>;

    #[inline]
    fn next(&mut self) -> Option<Self::Item> {
        let nodes = &self.block.nodes;
        if self.index == nodes.id.len() {
            return None;
        }

        self.prev_id += nodes.id[self.index];
        self.prev_lat += nodes.lat[self.index];
        self.prev_lon += nodes.lon[self.index];

        let out = DenseNodeRef {
            block: self.block,
            index: self.index,
            id: self.prev_id,
            lat: self.prev_lat,
            lon: self.prev_lon,
        };
        self.index += 1;
        Some(out)
    }
}

// --------------------------- NODES ---------------------------

/// A run of plain (non-dense) nodes. Rare in practice; coordinates use the
/// same granularity scaling as dense nodes.
#[derive(Debug)]
pub struct NodeBlock {
    pub(crate) nodes: Vec<Node>,
    pub(crate) table: Arc<Vec<Cow<'static, [u8]>>>,
    pub(crate) granularity: i64,
    pub(crate) lat_offset: i64,
    pub(crate) lon_offset: i64,
}

impl NodeBlock {
    pub fn iter(&self) -> NodeIter<'_> {
        NodeIter {
            block: self,
            index: 0,
        }
    }
}

#[derive(Debug)]
pub struct NodeRef<'a> {
    block: &'a NodeBlock,
    node: &'a Node,
}

impl<'a> NodeRef<'a> {
    #[inline]
    pub fn id(&self) -> i64 {
        self.node.id
    }

    #[inline]
    pub fn location(&self) -> Location {
        Location::from_raw(
            self.block.granularity,
            self.block.lon_offset,
            self.block.lat_offset,
            self.node.lon,
            self.node.lat,
        )
    }

    /// Iterator over (key, value) pairs.
    #[inline]
    pub fn tags(&self) -> TagIter<'a> {
        TagIter {
            keys: &self.node.keys,
            vals: &self.node.vals,
            table: &self.block.table,
            pos: 0,
        }
    }
}

pub struct NodeIter<'a> {
    block: &'a NodeBlock,
    index: usize,
}

impl<'a> Iterator for NodeIter<'a> {
    type Item = NodeRef<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        let node = self.block.nodes.get(self.index)?;
        self.index += 1;
        Some(NodeRef {
            block: self.block,
            node,
        })
    }
}

// --------------------------- WAYS ---------------------------

#[derive(Debug)]
pub struct WayBlock {
    pub(crate) ways: Vec<Way>,
    pub(crate) table: Arc<Vec<Cow<'static, [u8]>>>,
}

impl WayBlock {
    pub fn iter(&self) -> WayIter<'_> {
        WayIter {
            block: self,
            index: 0,
        }
    }
}

#[derive(Debug)]
pub struct WayRef<'a> {
    way: &'a Way,
    table: &'a [Cow<'static, [u8]>],
}

impl<'a> WayRef<'a> {
    #[inline]
    pub fn id(&self) -> i64 {
        self.way.id
    }

    /// Iterator over referenced node ids, in way order.
    #[inline]
    pub fn node_ids(&self) -> impl Iterator<Item = i64> + 'a {
        let mut last_id = 0i64;
        self.way.refs.iter().map(move |delta| {
            last_id += *delta;
            last_id
        })
    }

    /// Iterator over (key, value) pairs.
    #[inline]
    pub fn tags(&self) -> TagIter<'a> {
        TagIter {
            keys: &self.way.keys,
            vals: &self.way.vals,
            table: self.table,
            pos: 0,
        }
    }
}

pub struct WayIter<'a> {
    block: &'a WayBlock,
    index: usize,
}

impl<'a> Iterator for WayIter<'a> {
    type Item = WayRef<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        let way = self.block.ways.get(self.index)?;
        self.index += 1;
        Some(WayRef {
            way,
            table: &self.block.table,
        })
    }
}

// --------------------------- RELATIONS ---------------------------

#[derive(Debug)]
pub struct RelationBlock {
    pub(crate) relations: Vec<Relation>,
    pub(crate) table: Arc<Vec<Cow<'static, [u8]>>>,
}

impl RelationBlock {
    pub fn iter(&self) -> RelationIter<'_> {
        RelationIter {
            block: self,
            index: 0,
        }
    }
}

#[derive(Debug)]
pub struct RelationRef<'a> {
    relation: &'a Relation,
    table: &'a [Cow<'static, [u8]>],
}

impl<'a> RelationRef<'a> {
    #[inline]
    pub fn id(&self) -> i64 {
        self.relation.id
    }

    /// Iterator over the members, in relation order.
    #[inline]
    pub fn members(&self) -> RelationMemberIter<'a> {
        RelationMemberIter {
            memids: &self.relation.memids,
            roles: &self.relation.roles_sid,
            types: &self.relation.types,
            table: self.table,
            index: 0,
            prev_memid: 0,
        }
    }

    /// Iterator over (key, value) pairs.
    #[inline]
    pub fn tags(&self) -> TagIter<'a> {
        TagIter {
            keys: &self.relation.keys,
            vals: &self.relation.vals,
            table: self.table,
            pos: 0,
        }
    }
}

pub struct RelationIter<'a> {
    block: &'a RelationBlock,
    index: usize,
}

impl<'a> Iterator for RelationIter<'a> {
    type Item = RelationRef<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        let relation = self.block.relations.get(self.index)?;
        self.index += 1;
        Some(RelationRef {
            relation,
            table: &self.block.table,
        })
    }
}

/// A member of a relation.
#[derive(Debug)]
pub struct RelationMember<'a> {
    id: i64,
    role: &'a str,
    item_type: ItemType,
}

impl<'a> RelationMember<'a> {
    #[inline]
    pub fn id(&self) -> i64 {
        self.id
    }

    #[inline]
    pub fn item_type(&self) -> ItemType {
        self.item_type
    }

    #[inline]
    pub fn role(&self) -> &'a str {
        self.role
    }
}

pub struct RelationMemberIter<'a> {
    memids: &'a [i64],
    roles: &'a [i32],
    types: &'a [MemberType],
    table: &'a [Cow<'static, [u8]>],
    index: usize,
    prev_memid: i64,
}

impl<'a> Iterator for RelationMemberIter<'a> {
    type Item = RelationMember<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        let delta = *self.memids.get(self.index)?;
        let role_sid = *self.roles.get(self.index)?;
        let member_type = *self.types.get(self.index)?;

        self.index += 1;
        self.prev_memid += delta;

        // roles_sid is declared int32 in the wire format but holds string
        // table indices, which are never negative in well-formed data.
        let role = unsafe { std::str::from_utf8_unchecked(&self.table[role_sid as usize]) };

        Some(RelationMember {
            id: self.prev_memid,
            role,
            item_type: member_type.into(),
        })
    }
}

// --------------------------- TAGS ---------------------------

/// An iterator that yields (key, value) tag pairs.
pub enum Tags<'a> {
    Dense(DenseNodeTagIter<'a>),
    Plain(TagIter<'a>),
}

impl<'a> Iterator for Tags<'a> {
    type Item = (&'a str, &'a str);

    fn next(&mut self) -> Option<Self::Item> {
        match self {
            Tags::Dense(iter) => iter.next(),
            Tags::Plain(iter) => iter.next(),
        }
    }
}

/// Tag iterator over a dense node's zero-terminated key/value run.
pub struct DenseNodeTagIter<'a> {
    slice: &'a [i32],
    table: &'a [Cow<'static, [u8]>],
    pos: usize,
}

impl<'a> Iterator for DenseNodeTagIter<'a> {
    type Item = (&'a str, &'a str);

    fn next(&mut self) -> Option<Self::Item> {
        if self.pos + 1 >= self.slice.len() || self.slice[self.pos] == 0 {
            return None;
        }
        let k = self.slice[self.pos] as usize;
        let v = self.slice[self.pos + 1] as usize;
        self.pos += 2;
        Some((
            unsafe { std::str::from_utf8_unchecked(&self.table[k]) },
            unsafe { std::str::from_utf8_unchecked(&self.table[v]) },
        ))
    }
}

/// Tag iterator over parallel key/value string-id columns.
pub struct TagIter<'a> {
    keys: &'a [u32],
    vals: &'a [u32],
    table: &'a [Cow<'static, [u8]>],
    pos: usize,
}

impl<'a> Iterator for TagIter<'a> {
    type Item = (&'a str, &'a str);

    fn next(&mut self) -> Option<Self::Item> {
        if self.pos >= self.keys.len() {
            return None;
        }
        let k = self.keys[self.pos] as usize;
        let v = self.vals[self.pos] as usize;
        self.pos += 1;
        Some((
            unsafe { std::str::from_utf8_unchecked(&self.table[k]) },
            unsafe { std::str::from_utf8_unchecked(&self.table[v]) },
        ))
    }
}

// --------------------------- ORDERED SEARCH ---------------------------

/// Outcome of scanning one decoded block for a needle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ScanOutcome {
    /// The needle sits at `blocks[buffer]`, element number `item`.
    Found { buffer: usize, item: usize },
    /// An object greater than the needle was seen, so by the sort
    /// invariant the needle exists nowhere in the file.
    DefinitelyMissing,
    /// Every object here is smaller; the needle may live in a later block.
    PossiblyLater,
}

/// Scan the buffers of one decoded block, in order, for (item_type, id).
pub(crate) fn scan_blocks(blocks: &[ElementBlock], item_type: ItemType, id: i64) -> ScanOutcome {
    let needle = (item_type, id);
    for (buffer, block) in blocks.iter().enumerate() {
        for (item, element) in block.elements().enumerate() {
            match needle.cmp(&(element.item_type(), element.id())) {
                Ordering::Equal => return ScanOutcome::Found { buffer, item },
                Ordering::Less => return ScanOutcome::DefinitelyMissing,
                Ordering::Greater => {}
            }
        }
    }
    ScanOutcome::PossiblyLater
}

/// Re-materialize the element at a position previously produced by
/// [`scan_blocks`].
pub(crate) fn element_at(blocks: &[ElementBlock], buffer: usize, item: usize) -> Option<Element<'_>> {
    blocks.get(buffer)?.elements().nth(item)
}
