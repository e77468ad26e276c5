use std::cell::Cell;
use std::collections::HashMap;

use log::warn;

use crate::cache::BlockCache;
use crate::element::{Element, ItemType, Location, RelationRef, WayRef};
use crate::error::Result;

/// Some relations are deeply nested, or mostly lie outside the extracted
/// territory, which makes resolving them terribly expensive. These are
/// pinned to pre-computed coordinates instead of being chased through the
/// file. Candidates surface as "very expensive resolution" warnings.
pub const DEFAULT_RELATION_OVERRIDES: &[(i64, Location)] = &[
    (20828, Location { lon: 9.424950, lat: 54.832655 }),
    (61491, Location { lon: 9.359337, lat: 54.819907 }),
    (181093, Location { lon: 14.222385, lat: 50.859423 }),
    (299546, Location { lon: 9.361681, lat: 54.816516 }),
    (912994, Location { lon: 13.786577, lat: 48.558202 }),
    (2521076, Location { lon: 6.224311, lat: 51.359232 }),
    (2689634, Location { lon: 9.424950, lat: 54.832655 }),
    (3088664, Location { lon: 14.214609, lat: 53.877682 }),
    (7190393, Location { lon: 7.955247, lat: 47.540841 }),
    (7190394, Location { lon: 7.922629, lat: 47.544431 }),
    (9244345, Location { lon: 7.922629, lat: 47.544431 }),
    (9351570, Location { lon: 12.952523, lat: 47.768681 }),
    (9351571, Location { lon: 12.179740, lat: 47.599290 }),
    (9351572, Location { lon: 12.952523, lat: 47.768681 }),
    (11305708, Location { lon: 6.224311, lat: 51.359232 }),
    (13971563, Location { lon: 7.651894, lat: 49.044413 }),
];

/// Relation members may form cycles; there is no visited set, so cap the
/// descent instead.
const MAX_RESOLVE_DEPTH: usize = 32;

/// Reduces an arbitrary OSM object to a single coordinate by following
/// member references through a [`BlockCache`].
pub struct LocationResolver<'a> {
    reader: &'a BlockCache,
    overrides: HashMap<i64, Location>,
    backrefs: Cell<u64>,
}

impl<'a> LocationResolver<'a> {
    pub fn new(reader: &'a BlockCache, overrides: &[(i64, Location)]) -> Self {
        LocationResolver {
            reader,
            overrides: overrides.iter().copied().collect(),
            backrefs: Cell::new(0),
        }
    }

    /// Total object lookups performed so far, across all resolutions.
    pub fn backrefs(&self) -> u64 {
        self.backrefs.get()
    }

    /// Produce a coordinate for `element`, or `None` when every path
    /// through its references dead-ends.
    pub fn resolve(&self, element: &Element<'_>) -> Result<Option<Location>> {
        self.resolve_at(element, 0)
    }

    fn resolve_at(&self, element: &Element<'_>, depth: usize) -> Result<Option<Location>> {
        if depth >= MAX_RESOLVE_DEPTH {
            warn!(
                "giving up on {}{} at relation nesting depth {}",
                element.item_type().as_char(),
                element.id(),
                depth
            );
            return Ok(None);
        }
        match element {
            Element::DenseNode(_) | Element::Node(_) => Ok(element.location()),
            Element::Way(way) => self.resolve_way(way),
            Element::Relation(relation) => self.resolve_relation(relation, depth),
        }
    }

    /// First node reference that still exists wins. Node locations are not
    /// denormalized into ways, so every probe is a lookup.
    fn resolve_way(&self, way: &WayRef<'_>) -> Result<Option<Location>> {
        for node_id in way.node_ids() {
            self.backrefs.set(self.backrefs.get() + 1);
            let mut found = None;
            self.reader
                .visit(ItemType::Node, node_id, |node| found = node.location())?;
            if found.is_some() {
                return Ok(found);
            }
        }
        Ok(None)
    }

    fn resolve_relation(
        &self,
        relation: &RelationRef<'_>,
        depth: usize,
    ) -> Result<Option<Location>> {
        if let Some(location) = self.overrides.get(&relation.id()) {
            return Ok(Some(*location));
        }

        // Node members yield a location in one lookup, way members after a
        // small detour, relation members only through more recursion. Try
        // the members in that order, cheapest kind first.
        for wanted in [ItemType::Node, ItemType::Way, ItemType::Relation] {
            for member in relation.members() {
                if member.item_type() != wanted {
                    continue;
                }
                self.backrefs.set(self.backrefs.get() + 1);
                let mut nested: Result<Option<Location>> = Ok(None);
                self.reader.visit(wanted, member.id(), |element| {
                    nested = self.resolve_at(&element, depth + 1);
                })?;
                if let Some(location) = nested? {
                    return Ok(Some(location));
                }
            }
        }
        Ok(None)
    }
}
