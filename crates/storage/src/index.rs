use crc32fast::Hasher;

use crate::error::{StorageError, StorageResult};

/// Fixed on-disk size of one index entry (§3).
pub const INDEX_ENTRY_SIZE: usize = 32;

const PAGE_MAGIC: &[u8; 4] = b"PCCV";

bitflags::bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct SlotFlags: u16 {
        const COMPRESSED = 0b01;
        const ENCRYPTED  = 0b10;
    }
}

/// One 32-byte directory entry locating and describing a page's on-disk
/// slot (§3).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndexEntry {
    pub logical_page_no: u32,
    pub physical_offset: u64,
    pub slot_capacity: u32,
    pub stored_size: u32,
    pub flags: SlotFlags,
    pub checksum: u32,
}

impl IndexEntry {
    /// A placeholder entry for a logical page that does not exist yet: a
    /// gap in the index, read back as a zero-page (§3).
    pub fn empty(logical_page_no: u32) -> Self {
        Self {
            logical_page_no,
            physical_offset: 0,
            slot_capacity: 0,
            stored_size: 0,
            flags: SlotFlags::empty(),
            checksum: 0,
        }
    }

    /// A `stored_size` of 0 means "allocated but logically zero" (§3): no
    /// bytes have ever been written after creation, so reads skip disk
    /// entirely.
    pub fn is_zero_page(&self) -> bool {
        self.stored_size == 0
    }

    pub fn slot_end(&self) -> u64 {
        self.physical_offset + self.slot_capacity as u64
    }

    pub fn to_bytes(&self) -> [u8; INDEX_ENTRY_SIZE] {
        let mut buf = [0u8; INDEX_ENTRY_SIZE];
        let mut offset = 0usize;
        buf[offset..offset + 4].copy_from_slice(PAGE_MAGIC);
        offset += 4;
        buf[offset..offset + 4].copy_from_slice(&self.logical_page_no.to_le_bytes());
        offset += 4;
        buf[offset..offset + 8].copy_from_slice(&self.physical_offset.to_le_bytes());
        offset += 8;
        buf[offset..offset + 4].copy_from_slice(&self.slot_capacity.to_le_bytes());
        offset += 4;
        buf[offset..offset + 4].copy_from_slice(&self.stored_size.to_le_bytes());
        offset += 4;
        buf[offset..offset + 2].copy_from_slice(&self.flags.bits().to_le_bytes());
        offset += 2;
        // reserved u16
        offset += 2;
        buf[offset..offset + 4].copy_from_slice(&self.checksum.to_le_bytes());
        buf
    }

    pub fn from_bytes(buf: &[u8; INDEX_ENTRY_SIZE]) -> StorageResult<Self> {
        if &buf[0..4] != PAGE_MAGIC {
            return Err(StorageError::HeaderCorrupt(
                "index entry has invalid page magic".into(),
            ));
        }
        let mut offset = 4usize;
        let logical_page_no = u32::from_le_bytes(buf[offset..offset + 4].try_into().unwrap());
        offset += 4;
        let physical_offset = u64::from_le_bytes(buf[offset..offset + 8].try_into().unwrap());
        offset += 8;
        let slot_capacity = u32::from_le_bytes(buf[offset..offset + 4].try_into().unwrap());
        offset += 4;
        let stored_size = u32::from_le_bytes(buf[offset..offset + 4].try_into().unwrap());
        offset += 4;
        let flags = SlotFlags::from_bits_truncate(u16::from_le_bytes(
            buf[offset..offset + 2].try_into().unwrap(),
        ));
        offset += 2 + 2; // flags + reserved
        let checksum = u32::from_le_bytes(buf[offset..offset + 4].try_into().unwrap());
        Ok(Self {
            logical_page_no,
            physical_offset,
            slot_capacity,
            stored_size,
            flags,
            checksum,
        })
    }
}

/// Computes the CRC32 checksum of the final, on-disk slot content (after
/// both compression and encryption — the only form available without the
/// key on a later read, per §9's open question).
pub fn slot_checksum(bytes: &[u8]) -> u32 {
    let mut hasher = Hasher::new();
    hasher.update(bytes);
    hasher.finalize()
}

/// In-memory page directory, indexed directly by logical page number
/// (§4.C). Gaps are zero-entry placeholders.
#[derive(Debug, Default, Clone)]
pub struct PageIndex {
    entries: Vec<IndexEntry>,
}

impl PageIndex {
    pub fn new() -> Self {
        Self { entries: Vec::new() }
    }

    pub fn from_entries(entries: Vec<IndexEntry>) -> Self {
        Self { entries }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> &[IndexEntry] {
        &self.entries
    }

    /// O(1) lookup; `None` if `p` is past the end of the directory.
    pub fn lookup(&self, p: u64) -> Option<IndexEntry> {
        self.entries.get(p as usize).copied()
    }

    /// Extends the directory with zero-entries as needed, then stores
    /// `entry` at `p` (§4.C).
    pub fn put(&mut self, p: u64, entry: IndexEntry) {
        let p = p as usize;
        if p >= self.entries.len() {
            self.entries
                .resize_with(p + 1, || IndexEntry::empty(0));
            for (i, e) in self.entries.iter_mut().enumerate() {
                if e.logical_page_no == 0 && e.stored_size == 0 && e.physical_offset == 0 {
                    e.logical_page_no = i as u32;
                }
            }
        }
        self.entries[p] = entry;
    }

    /// Shrinks the directory to `len` entries, dropping the tail. Used by
    /// `PageStore::truncate` to keep `total_pages == index_entries` (§3).
    pub fn truncate(&mut self, len: usize) {
        self.entries.truncate(len);
    }

    /// Marks the entry at `p` as logically removed: `stored_size = 0`. The
    /// slot interval itself is released to the free-space manager by the
    /// caller, which still needs the old entry's offset/capacity (§4.C).
    pub fn remove(&mut self, p: u64) -> Option<IndexEntry> {
        let p = p as usize;
        let old = self.entries.get(p).copied()?;
        self.entries[p] = IndexEntry::empty(p as u32);
        Some(old)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entry_round_trips_through_bytes() {
        let entry = IndexEntry {
            logical_page_no: 7,
            physical_offset: 4096,
            slot_capacity: 512,
            stored_size: 480,
            flags: SlotFlags::COMPRESSED | SlotFlags::ENCRYPTED,
            checksum: 0xDEADBEEF,
        };
        let bytes = entry.to_bytes();
        let reread = IndexEntry::from_bytes(&bytes).unwrap();
        assert_eq!(entry, reread);
    }

    #[test]
    fn put_extends_with_zero_entries() {
        let mut index = PageIndex::new();
        index.put(3, IndexEntry {
            logical_page_no: 3,
            physical_offset: 10,
            slot_capacity: 20,
            stored_size: 20,
            flags: SlotFlags::empty(),
            checksum: 1,
        });
        assert_eq!(index.len(), 4);
        assert!(index.lookup(0).unwrap().is_zero_page());
        assert!(index.lookup(1).unwrap().is_zero_page());
        assert!(index.lookup(2).unwrap().is_zero_page());
        assert!(!index.lookup(3).unwrap().is_zero_page());
    }

    #[test]
    fn remove_zeroes_stored_size_but_keeps_slot_pointer() {
        let mut index = PageIndex::new();
        let original = IndexEntry {
            logical_page_no: 0,
            physical_offset: 128,
            slot_capacity: 64,
            stored_size: 64,
            flags: SlotFlags::empty(),
            checksum: 5,
        };
        index.put(0, original);
        let removed = index.remove(0).unwrap();
        assert_eq!(removed, original);
        assert!(index.lookup(0).unwrap().is_zero_page());
    }
}
