use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use rand::rngs::SmallRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;

use crate::element::{self, Element, ElementBlock, ItemType, ScanOutcome};
use crate::error::Result;
use crate::index::{binsearch_middle, BlockIndex};

/// Each block is between 120 KiB and 8 MiB of decompressed data, so the
/// default budgets a few GiB of resident memory.
pub const DEFAULT_CACHE_SIZE: usize = 2048;

/// Random-access object lookup over a [`BlockIndex`], with a bounded cache
/// of decompressed blocks.
///
/// Cache entries are handed out as `Rc` clones; an outstanding clone is a
/// borrow that pins the entry's data. Pruning drops only the map's own
/// handle, so a pinned entry survives eviction for as long as its borrow
/// lives, and lookups may re-enter [`visit`](Self::visit) recursively from
/// inside a callback.
pub struct BlockCache {
    state: RefCell<CacheState>,
}

struct CacheState {
    index: BlockIndex,
    entries: HashMap<usize, Rc<Vec<ElementBlock>>>,
    rng: SmallRng,
    ideal_size: usize,
}

impl BlockCache {
    pub fn new(index: BlockIndex, ideal_size: usize) -> Self {
        BlockCache {
            state: RefCell::new(CacheState {
                index,
                entries: HashMap::new(),
                rng: SmallRng::from_entropy(),
                ideal_size,
            }),
        }
    }

    /// Number of data blocks in the underlying file.
    pub fn block_count(&self) -> usize {
        self.state.borrow().index.block_count()
    }

    /// Number of decompressed blocks currently held.
    pub fn cached_blocks(&self) -> usize {
        self.state.borrow().entries.len()
    }

    /// Look up the object `(item_type, id)` and hand it to `callback`.
    /// Returns whether the object was found; the callback runs at most
    /// once. The callback may issue further lookups through this cache.
    pub fn visit<F>(&self, item_type: ItemType, id: i64, callback: F) -> Result<bool>
    where
        F: FnOnce(Element<'_>),
    {
        let Some((blocks, buffer, item)) = self.find(item_type, id)? else {
            return Ok(false);
        };
        // `blocks` keeps the entry alive (pinned) while the callback runs,
        // however deep it recurses.
        match element::element_at(&blocks, buffer, item) {
            Some(found) => {
                callback(found);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Binary search for the needle's block, scanning each decoded probe in
    /// full: the scan can find the needle outright, or prove it absent from
    /// the whole file when it runs past where the needle would sort.
    fn find(
        &self,
        item_type: ItemType,
        id: i64,
    ) -> Result<Option<(Rc<Vec<ElementBlock>>, usize, usize)>> {
        let mut state = self.state.borrow_mut();

        let mut lo = 0;
        let mut hi = state.index.block_count();
        if hi == 0 {
            return Ok(None);
        }
        // Shrink the interval on the cheap; the candidate itself is not
        // interesting, only the tightened bounds are.
        if state
            .index
            .binary_search_guess(item_type, id, &mut lo, &mut hi)
            .is_none()
        {
            return Ok(None);
        }

        while hi - lo >= 2 {
            let mid = binsearch_middle(lo, hi);
            debug_assert!(!state.index.block_starts()[mid].is_populated());
            let entry = state.read(mid)?;
            // The descriptor is populated now.
            if state.index.block_starts()[mid].needle_before(item_type, id) {
                hi = mid;
                continue;
            }
            match element::scan_blocks(&entry, item_type, id) {
                ScanOutcome::Found { buffer, item } => return Ok(Some((entry, buffer, item))),
                ScanOutcome::DefinitelyMissing => return Ok(None),
                ScanOutcome::PossiblyLater => lo = mid + 1,
            }
        }

        if lo == hi {
            return Ok(None);
        }
        let entry = state.read(lo)?;
        match element::scan_blocks(&entry, item_type, id) {
            ScanOutcome::Found { buffer, item } => Ok(Some((entry, buffer, item))),
            ScanOutcome::DefinitelyMissing | ScanOutcome::PossiblyLater => Ok(None),
        }
    }
}

impl CacheState {
    /// Fetch block `block_id`, decoding it on a miss. Runs the pruning pass
    /// first, so the returned handle is safe to hold on to.
    fn read(&mut self, block_id: usize) -> Result<Rc<Vec<ElementBlock>>> {
        self.prune(block_id);
        if let Some(entry) = self.entries.get(&block_id) {
            return Ok(Rc::clone(entry));
        }
        let entry = Rc::new(self.index.get_parsed_block(block_id)?);
        self.entries.insert(block_id, Rc::clone(&entry));
        Ok(entry)
    }

    /// Evict unpinned entries, in random order, until the cache is back at
    /// its ideal size. Does nothing below 1.5x the ideal size, where the
    /// effort does not justify the memory savings.
    fn prune(&mut self, avoid_block_id: usize) {
        if self.entries.len() < self.ideal_size * 3 / 2 {
            return;
        }
        let mut evictable: Vec<usize> = self
            .entries
            .iter()
            .filter(|&(&id, entry)| id != avoid_block_id && Rc::strong_count(entry) == 1)
            .map(|(&id, _)| id)
            .collect();
        evictable.shuffle(&mut self.rng);
        for block_id in evictable {
            if self.entries.len() <= self.ideal_size {
                return;
            }
            self.entries.remove(&block_id);
        }
    }
}
