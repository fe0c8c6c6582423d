use std::collections::BTreeMap;

use log::trace;

/// Leftover below this many bytes is granted whole rather than split off
/// into its own free interval (§4.D).
pub const MIN_SPLIT_THRESHOLD: u64 = 512;

/// Tracks freed `(offset, capacity)` intervals and serves best-fit
/// allocation requests, falling back to end-of-file growth (§4.D).
///
/// Not persisted: reconstructed at open by [`FreeSpaceManager::rebuild`]
/// from the occupied regions recorded in the index plus the header and
/// index array.
#[derive(Debug, Default)]
pub struct FreeSpaceManager {
    /// offset -> capacity, kept sorted by offset so coalescing with
    /// neighbors is a pair of BTreeMap range lookups.
    free: BTreeMap<u64, u64>,
    eof: u64,
}

impl FreeSpaceManager {
    pub fn new(eof: u64) -> Self {
        Self {
            free: BTreeMap::new(),
            eof,
        }
    }

    /// Rebuilds the free list from a sorted, non-overlapping set of
    /// occupied `(offset, capacity)` intervals (header, slots, index
    /// array) plus the current end-of-file.
    pub fn rebuild<I>(occupied: I, eof: u64) -> Self
    where
        I: IntoIterator<Item = (u64, u64)>,
    {
        let mut occupied: Vec<(u64, u64)> = occupied.into_iter().collect();
        occupied.sort_by_key(|&(offset, _)| offset);

        let mut mgr = Self::new(eof);
        let mut cursor = 0u64;
        for (offset, capacity) in occupied {
            if offset > cursor {
                mgr.free_raw(cursor, offset - cursor);
            }
            cursor = cursor.max(offset + capacity);
        }
        if cursor < eof {
            mgr.free_raw(cursor, eof - cursor);
        }
        mgr
    }

    pub fn eof(&self) -> u64 {
        self.eof
    }

    /// Selects the smallest free interval with `capacity >= size`, ties
    /// broken by lowest offset; splits off the remainder if it's large
    /// enough to be useful, otherwise grants the whole interval. Appends
    /// to end-of-file when nothing fits.
    pub fn allocate(&mut self, size: u64) -> u64 {
        let best = self
            .free
            .iter()
            .filter(|&(_, &capacity)| capacity >= size)
            .min_by_key(|&(&offset, &capacity)| (capacity, offset))
            .map(|(&offset, &capacity)| (offset, capacity));

        match best {
            Some((offset, capacity)) => {
                self.free.remove(&offset);
                let leftover = capacity - size;
                if leftover >= MIN_SPLIT_THRESHOLD {
                    self.free.insert(offset + size, leftover);
                    trace!("allocate({size}) -> offset {offset}, split {leftover} bytes at {}", offset + size);
                } else {
                    trace!("allocate({size}) -> offset {offset}, granting full {capacity}-byte interval");
                }
                offset
            }
            None => self.append(size),
        }
    }

    /// Extends end-of-file by `size` bytes and returns the offset of the
    /// new region.
    pub fn append(&mut self, size: u64) -> u64 {
        let offset = self.eof;
        self.eof += size;
        trace!("append({size}) -> offset {offset}, eof now {}", self.eof);
        offset
    }

    /// Returns `(offset, capacity)` to the free list, coalescing with
    /// adjacent free intervals.
    pub fn free(&mut self, offset: u64, capacity: u64) {
        self.free_raw(offset, capacity);
    }

    fn free_raw(&mut self, mut offset: u64, mut capacity: u64) {
        if capacity == 0 {
            return;
        }

        // Merge with the interval immediately preceding `offset`, if any.
        if let Some((&prev_offset, &prev_capacity)) = self.free.range(..offset).next_back() {
            if prev_offset + prev_capacity == offset {
                self.free.remove(&prev_offset);
                offset = prev_offset;
                capacity += prev_capacity;
            }
        }

        // Merge with the interval immediately following the (possibly
        // extended) interval, if any.
        if let Some((&next_offset, &next_capacity)) = self.free.range(offset..).next() {
            if offset + capacity == next_offset {
                self.free.remove(&next_offset);
                capacity += next_capacity;
            }
        }

        self.free.insert(offset, capacity);
    }

    #[cfg(test)]
    pub fn free_intervals(&self) -> Vec<(u64, u64)> {
        self.free.iter().map(|(&o, &c)| (o, c)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allocates_from_eof_when_empty() {
        let mut mgr = FreeSpaceManager::new(128);
        assert_eq!(mgr.allocate(100), 128);
        assert_eq!(mgr.eof(), 228);
    }

    #[test]
    fn best_fit_prefers_smallest_sufficient_interval() {
        let mut mgr = FreeSpaceManager::new(1000);
        mgr.free(100, 50);
        mgr.free(500, 200);
        mgr.free(800, 60);
        assert_eq!(mgr.allocate(55), 800);
    }

    #[test]
    fn ties_broken_by_lowest_offset() {
        let mut mgr = FreeSpaceManager::new(1000);
        mgr.free(500, 100);
        mgr.free(100, 100);
        assert_eq!(mgr.allocate(100), 100);
    }

    #[test]
    fn splits_leftover_above_threshold() {
        let mut mgr = FreeSpaceManager::new(1000);
        mgr.free(100, 4096);
        let got = mgr.allocate(50);
        assert_eq!(got, 100);
        assert_eq!(mgr.free_intervals(), vec![(150, 4046)]);
    }

    #[test]
    fn grants_whole_interval_when_leftover_too_small() {
        let mut mgr = FreeSpaceManager::new(1000);
        mgr.free(100, 520);
        let got = mgr.allocate(500);
        assert_eq!(got, 100);
        assert!(mgr.free_intervals().is_empty());
    }

    #[test]
    fn coalesces_adjacent_intervals_on_free() {
        let mut mgr = FreeSpaceManager::new(1000);
        mgr.free(100, 50);
        mgr.free(150, 50);
        assert_eq!(mgr.free_intervals(), vec![(100, 100)]);
        mgr.free(50, 50);
        assert_eq!(mgr.free_intervals(), vec![(50, 150)]);
    }

    #[test]
    fn rebuild_emits_gaps_between_occupied_regions() {
        let occupied = vec![(0u64, 128u64), (128, 100), (400, 50)];
        let mgr = FreeSpaceManager::rebuild(occupied, 600);
        assert_eq!(mgr.free_intervals(), vec![(228, 172), (450, 150)]);
    }
}
