use std::fs::{File, OpenOptions as FsOpenOptions};
use std::os::unix::fs::FileExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use ccvfs_algorithms::registry;
use log::{debug, warn};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::error::{StorageError, StorageResult};
use crate::freelist::FreeSpaceManager;
use crate::header::{self, is_allowed_page_size, CreationFlags, Header, HEADER_SIZE};
use crate::index::{IndexEntry, PageIndex, INDEX_ENTRY_SIZE};
use crate::page::Page;
use crate::transform::TransformPipeline;

/// A container is addressed by logical page number, 0-indexed (§3).
pub type PageId = u64;

/// Index region capacity, in entries, reserved the first time the index is
/// relocated out of its placeholder (zero-capacity) state, so small
/// containers don't relocate the index on every few writes.
const INITIAL_INDEX_CAPACITY_ENTRIES: u64 = 16;
/// Growth factor applied each time the index must relocate to a bigger
/// region (§4.C).
const INDEX_GROWTH_FACTOR: u64 = 2;

/// Options accepted by [`PageStore::open`] (§6's configuration table).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpenOptions {
    /// Create a new container; fails with `AlreadyExists` if the path is
    /// already present. If false, the container must already exist.
    pub create: bool,
    /// Logical page size; only consulted when creating (§3).
    pub page_size: u32,
    /// Compression algorithm name, or `"none"`; only consulted when
    /// creating.
    pub compress: String,
    /// Encryption algorithm name, or `"none"`; only consulted when
    /// creating.
    pub encrypt: String,
    /// Encryption key, required iff `encrypt != "none"`.
    #[serde(skip)]
    pub key: Vec<u8>,
    /// Creation-time informational hints (§9).
    pub flags: CreationFlags,
}

impl Default for OpenOptions {
    fn default() -> Self {
        Self {
            create: false,
            page_size: 4096,
            compress: "none".to_string(),
            encrypt: "none".to_string(),
            key: Vec::new(),
            flags: CreationFlags::empty(),
        }
    }
}

/// Runtime statistics exposed by [`PageStore::stats`] (§4.F).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Stats {
    pub original_size: u64,
    pub stored_size: u64,
    pub compression_ratio: f64,
    pub total_pages: u32,
    pub compress_name: String,
    pub encrypt_name: String,
}

struct StoreMeta {
    header: Header,
    index: PageIndex,
    free: FreeSpaceManager,
    index_capacity_entries: u64,
    header_dirty: bool,
}

impl StoreMeta {
    fn index_region(&self) -> (u64, u64) {
        (
            self.header.index_offset,
            self.index_capacity_entries * INDEX_ENTRY_SIZE as u64,
        )
    }
}

/// Owns the container's file handle, header, page index, free list, and
/// transform pipeline (§4.F). Single-writer, multi-reader: writes hold an
/// exclusive lock on the metadata for their full duration; reads snapshot
/// the metadata under a shared lock and do disk I/O and transforms outside
/// it (§5).
pub struct PageStore {
    file: Arc<File>,
    meta: RwLock<StoreMeta>,
    pipeline: TransformPipeline,
    path: PathBuf,
}

impl PageStore {
    pub fn open<P: AsRef<Path>>(path: P, options: OpenOptions) -> StorageResult<Self> {
        let path = path.as_ref().to_path_buf();
        let exists = path.exists();

        if options.create {
            if exists {
                return Err(StorageError::AlreadyExists);
            }
            Self::create(&path, options)
        } else {
            if !exists {
                return Err(StorageError::NotFound);
            }
            Self::open_existing(&path, options)
        }
    }

    fn create(path: &Path, options: OpenOptions) -> StorageResult<Self> {
        if !is_allowed_page_size(options.page_size) {
            return Err(StorageError::InvalidPageSize(options.page_size));
        }
        let compress = registry().compression(&options.compress)?;
        let encrypt = registry().encryption(&options.encrypt)?;
        if encrypt.required_key_len() > 0 && options.key.is_empty() {
            return Err(StorageError::KeyRequired);
        }

        let file = FsOpenOptions::new()
            .read(true)
            .write(true)
            .create_new(true)
            .open(path)?;

        let header = Header::new(options.page_size, &options.compress, &options.encrypt, options.flags);
        header::write_header(&file, &header)?;

        // Page-data slots start immediately after the header and run
        // contiguously (§6); the index has no reserved region yet and is
        // placed at end-of-file the first time it needs to be persisted.
        let free = FreeSpaceManager::rebuild([(0u64, HEADER_SIZE as u64)], HEADER_SIZE as u64);

        let meta = StoreMeta {
            header,
            index: PageIndex::new(),
            free,
            index_capacity_entries: 0,
            header_dirty: false,
        };

        let pipeline = TransformPipeline::new(compress, encrypt, &options.key);

        debug!("created container {:?} page_size={}", path, options.page_size);
        Ok(Self {
            file: Arc::new(file),
            meta: RwLock::new(meta),
            pipeline,
            path: path.to_path_buf(),
        })
    }

    fn open_existing(path: &Path, options: OpenOptions) -> StorageResult<Self> {
        let file = FsOpenOptions::new().read(true).write(true).open(path)?;
        let header = match header::read_header(&file) {
            Ok(header) => header,
            Err(err) if header::is_header_corrupt(&err) => {
                header::log_header_corrupt(&err);
                return Err(err);
            }
            Err(err) => return Err(err),
        };

        let compress = registry().compression(&header.compress_name)?;
        let encrypt = registry().encryption(&header.encrypt_name)?;
        if encrypt.required_key_len() > 0 && options.key.is_empty() {
            return Err(StorageError::KeyRequired);
        }

        let entries = Self::read_index(&file, &header)?;
        // The container doesn't persist the index's reserved capacity
        // separately from its entry count, so a reopened store starts with
        // no headroom; the next relocation grows it again (§4.C).
        let index_capacity_entries = header.index_entries as u64;

        let file_len = file.metadata()?.len();
        let mut occupied: Vec<(u64, u64)> = vec![(0, HEADER_SIZE as u64)];
        if index_capacity_entries > 0 {
            occupied.push((
                header.index_offset,
                index_capacity_entries * INDEX_ENTRY_SIZE as u64,
            ));
        }
        for entry in &entries {
            if !entry.is_zero_page() {
                occupied.push((entry.physical_offset, entry.slot_capacity as u64));
            }
        }
        let index_region_end = if index_capacity_entries > 0 {
            header.index_offset + index_capacity_entries * INDEX_ENTRY_SIZE as u64
        } else {
            HEADER_SIZE as u64
        };
        let eof = file_len.max(index_region_end);
        let free = FreeSpaceManager::rebuild(occupied, eof);

        let meta = StoreMeta {
            header,
            index: PageIndex::from_entries(entries),
            free,
            index_capacity_entries,
            header_dirty: false,
        };

        let pipeline = TransformPipeline::new(compress, encrypt, &options.key);

        debug!("opened container {:?}", path);
        Ok(Self {
            file: Arc::new(file),
            meta: RwLock::new(meta),
            pipeline,
            path: path.to_path_buf(),
        })
    }

    fn read_index(file: &File, header: &Header) -> StorageResult<Vec<IndexEntry>> {
        let mut entries = Vec::with_capacity(header.index_entries as usize);
        for i in 0..header.index_entries as u64 {
            let mut buf = [0u8; INDEX_ENTRY_SIZE];
            file.read_at(&mut buf, header.index_offset + i * INDEX_ENTRY_SIZE as u64)?;
            entries.push(IndexEntry::from_bytes(&buf)?);
        }
        Ok(entries)
    }

    pub fn page_size(&self) -> u32 {
        self.meta.read().header.page_size
    }

    /// Returns the zero-page if `p >= total_pages` or the entry has
    /// `stored_size == 0`; otherwise loads and decodes the page (§4.F,
    /// §4.G).
    pub fn read_page(&self, p: PageId) -> StorageResult<Page> {
        let (entry, page_size) = {
            let meta = self.meta.read();
            let entry = meta.index.lookup(p);
            (entry, meta.header.page_size)
        };

        let entry = match entry {
            Some(entry) if !entry.is_zero_page() => entry,
            _ => return Ok(Page::zeroed(page_size)),
        };

        let mut bytes = vec![0u8; entry.stored_size as usize];
        self.file.read_at(&mut bytes, entry.physical_offset)?;

        let actual_checksum = crate::index::slot_checksum(&bytes);
        if actual_checksum != entry.checksum {
            warn!("page {p} failed checksum: expected {:#x}, found {:#x}", entry.checksum, actual_checksum);
            return Err(StorageError::PageCorrupt(
                p,
                format!("checksum mismatch: expected {:#x}, found {:#x}", entry.checksum, actual_checksum),
            ));
        }

        self.pipeline
            .decode(&bytes, entry.flags, page_size)
            .map_err(|err| match err {
                StorageError::PageCorrupt(_, msg) => StorageError::PageCorrupt(p, msg),
                other => other,
            })
    }

    /// Runs the transform pipeline, allocates a slot sized to the output,
    /// writes it, and updates the index (§4.E, §4.F).
    pub fn write_page(&self, p: PageId, page: &Page) -> StorageResult<()> {
        let encoded = self.pipeline.encode(page)?;
        let new_size = encoded.bytes.len() as u64;

        let mut meta = self.meta.write();
        let old_entry = meta.index.lookup(p).filter(|e| !e.is_zero_page());

        let offset = meta.free.allocate(new_size);
        self.file.write_at(&encoded.bytes, offset)?;

        let new_entry = IndexEntry {
            logical_page_no: p as u32,
            physical_offset: offset,
            slot_capacity: new_size as u32,
            stored_size: new_size as u32,
            flags: encoded.flags,
            checksum: encoded.checksum,
        };
        meta.index.put(p, new_entry);

        if let Some(old) = old_entry {
            meta.free.free(old.physical_offset, old.slot_capacity as u64);
        }

        if p as u32 + 1 > meta.header.total_pages {
            meta.header.total_pages = p as u32 + 1;
            meta.header.original_size = meta.header.total_pages as u64 * meta.header.page_size as u64;
        }
        meta.header.index_entries = meta.index.len() as u32;
        meta.header_dirty = true;
        Ok(())
    }

    /// Frees slots for pages `>= new_total_pages` and shrinks the logical
    /// page count. The physical file is never shrunk (§3 Lifecycle).
    pub fn truncate(&self, new_total_pages: u32) -> StorageResult<()> {
        let mut meta = self.meta.write();
        if new_total_pages >= meta.header.total_pages {
            return Ok(());
        }

        let mut freed = Vec::new();
        for p in new_total_pages..meta.index.len() as u32 {
            if let Some(entry) = meta.index.remove(p as u64) {
                if !entry.is_zero_page() {
                    freed.push((entry.physical_offset, entry.slot_capacity as u64));
                }
            }
        }
        for (offset, capacity) in freed {
            meta.free.free(offset, capacity);
        }

        meta.index.truncate(new_total_pages as usize);
        meta.header.total_pages = new_total_pages;
        meta.header.original_size = new_total_pages as u64 * meta.header.page_size as u64;
        meta.header.index_entries = meta.index.len() as u32;
        meta.header_dirty = true;
        Ok(())
    }

    /// Persists the index (relocating it if it has outgrown its reserved
    /// region) and rewrites the header, fsyncing both (§4.B, §4.C).
    pub fn flush(&self) -> StorageResult<()> {
        let mut meta = self.meta.write();
        self.persist_index(&mut meta)?;
        meta.header.stored_size = meta.free.eof();
        header::write_header(&self.file, &meta.header)?;
        meta.header_dirty = false;
        debug!("flushed container {:?}: total_pages={} stored_size={}", self.path, meta.header.total_pages, meta.header.stored_size);
        Ok(())
    }

    fn persist_index(&self, meta: &mut StoreMeta) -> StorageResult<()> {
        let needed_entries = meta.index.len() as u64;
        if needed_entries > meta.index_capacity_entries {
            self.relocate_index(meta, needed_entries)?;
        }

        let mut buf = Vec::with_capacity(meta.index.len() * INDEX_ENTRY_SIZE);
        for entry in meta.index.entries() {
            buf.extend_from_slice(&entry.to_bytes());
        }
        self.file.write_at(&buf, meta.header.index_offset)?;
        self.file.sync_data()?;
        Ok(())
    }

    fn relocate_index(&self, meta: &mut StoreMeta, needed_entries: u64) -> StorageResult<()> {
        let old_region = meta.index_region();
        let mut new_capacity = if meta.index_capacity_entries == 0 {
            INITIAL_INDEX_CAPACITY_ENTRIES
        } else {
            meta.index_capacity_entries * INDEX_GROWTH_FACTOR
        };
        while new_capacity < needed_entries {
            new_capacity *= INDEX_GROWTH_FACTOR;
        }
        let new_region_size = new_capacity * INDEX_ENTRY_SIZE as u64;
        let new_offset = meta.free.allocate(new_region_size);

        let mut buf = Vec::with_capacity(meta.index.len() * INDEX_ENTRY_SIZE);
        for entry in meta.index.entries() {
            buf.extend_from_slice(&entry.to_bytes());
        }
        self.file.write_at(&buf, new_offset)?;
        self.file.sync_data()?;

        meta.header.index_offset = new_offset;
        header::write_header(&self.file, &meta.header)?;

        meta.free.free(old_region.0, old_region.1);
        meta.index_capacity_entries = new_capacity;
        debug!("relocated index to offset {new_offset}, capacity {new_capacity} entries");
        Ok(())
    }

    /// Flushes, then releases the store. Consumes `self`: there is no way
    /// to call a method on a closed store, so write-after-close is a
    /// compile error rather than the source's undefined behavior (§4.F).
    pub fn close(self) -> StorageResult<()> {
        self.flush()
    }

    pub fn stats(&self) -> Stats {
        let meta = self.meta.read();
        let compression_ratio = if meta.free.eof() == 0 {
            1.0
        } else {
            meta.header.original_size as f64 / meta.free.eof() as f64
        };
        Stats {
            original_size: meta.header.original_size,
            stored_size: meta.free.eof(),
            compression_ratio,
            total_pages: meta.header.total_pages,
            compress_name: self.pipeline.compress_name().to_string(),
            encrypt_name: self.pipeline.encrypt_name().to_string(),
        }
    }

    pub fn total_pages(&self) -> u32 {
        self.meta.read().header.total_pages
    }

    pub fn page_size_u64(&self) -> u64 {
        self.page_size() as u64
    }
}
