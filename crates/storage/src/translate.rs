use std::sync::Arc;

use crate::buffer::WriteBuffer;
use crate::error::StorageResult;
use crate::page::Page;
use crate::store::{PageId, PageStore};

/// Converts byte-range reads and writes into page-aligned operations against
/// a [`WriteBuffer`], doing read-modify-write for any partial page at the
/// head or tail of a range (§4.G).
pub struct PageTranslator {
    store: Arc<PageStore>,
    buffer: Arc<WriteBuffer>,
}

/// One page's worth of a byte range: which logical page, and the window
/// within that page's bytes the range touches.
struct PageSpan {
    page: PageId,
    lo: usize,
    hi: usize,
}

impl PageTranslator {
    pub fn new(store: Arc<PageStore>, buffer: Arc<WriteBuffer>) -> Self {
        Self { store, buffer }
    }

    fn page_size(&self) -> u64 {
        self.store.page_size_u64()
    }

    /// Splits `[offset, offset + len)` into per-page spans (§4.G).
    fn spans(&self, offset: u64, len: usize) -> Vec<PageSpan> {
        if len == 0 {
            return Vec::new();
        }
        let page_size = self.page_size();
        let mut spans = Vec::new();
        let mut pos = offset;
        let end = offset + len as u64;
        while pos < end {
            let page = pos / page_size;
            let page_start = page * page_size;
            let lo = (pos - page_start) as usize;
            let page_end = page_start + page_size;
            let hi = (end.min(page_end) - page_start) as usize;
            spans.push(PageSpan { page, lo, hi });
            pos = page_start + hi as u64;
        }
        spans
    }

    /// Reads `len` bytes starting at byte `offset`, fetching whole pages
    /// through the write buffer and slicing out the requested window
    /// (§4.G).
    pub fn read(&self, offset: u64, len: usize) -> StorageResult<Vec<u8>> {
        let mut out = Vec::with_capacity(len);
        for span in self.spans(offset, len) {
            let page = self.fetch(span.page)?;
            out.extend_from_slice(&page.as_bytes()[span.lo..span.hi]);
        }
        Ok(out)
    }

    /// Writes `data` starting at byte `offset`. Any page only partially
    /// covered by `data` is read-modify-written: the existing page is
    /// fetched, the covered window overlaid, and the whole page handed to
    /// the write buffer (§4.G).
    pub fn write(&self, offset: u64, data: &[u8]) -> StorageResult<()> {
        let mut consumed = 0usize;
        for span in self.spans(offset, data.len()) {
            let window = span.hi - span.lo;
            let whole_page = span.lo == 0 && window == self.page_size() as usize;
            let mut page = if whole_page {
                Page::zeroed(self.store.page_size())
            } else {
                self.fetch(span.page)?
            };
            page.overlay(span.lo, &data[consumed..consumed + window]);
            consumed += window;
            self.buffer.write(span.page, page)?;
        }
        Ok(())
    }

    fn fetch(&self, page: PageId) -> StorageResult<Page> {
        if let Some(page) = self.buffer.read(page) {
            return Ok(page);
        }
        self.store.read_page(page)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::WriteBufferConfig;
    use crate::header::CreationFlags;
    use crate::store::OpenOptions;
    use tempfile::{tempdir, TempDir};

    fn open_translator(page_size: u32) -> (TempDir, PageTranslator) {
        let dir = tempdir().unwrap();
        let path = dir.path().join("container.ccvfs");
        let options = OpenOptions {
            create: true,
            page_size,
            compress: "none".into(),
            encrypt: "none".into(),
            key: Vec::new(),
            flags: CreationFlags::empty(),
        };
        let store = Arc::new(PageStore::open(&path, options).unwrap());
        let buffer = Arc::new(WriteBuffer::new(store.clone(), WriteBufferConfig::default()).unwrap());
        let translator = PageTranslator::new(store, buffer);
        (dir, translator)
    }

    #[test]
    fn write_within_a_single_page_round_trips() {
        let (_dir, translator) = open_translator(4096);
        translator.write(10, b"hello").unwrap();
        let back = translator.read(10, 5).unwrap();
        assert_eq!(back, b"hello");
    }

    #[test]
    fn partial_write_preserves_surrounding_bytes() {
        let (_dir, translator) = open_translator(16);
        translator.write(0, &[0xAA; 16]).unwrap();
        translator.write(4, &[0xBB; 3]).unwrap();
        let back = translator.read(0, 16).unwrap();
        let mut expected = vec![0xAA; 16];
        expected[4..7].copy_from_slice(&[0xBB; 3]);
        assert_eq!(back, expected);
    }

    #[test]
    fn write_spanning_multiple_pages_round_trips() {
        let (_dir, translator) = open_translator(16);
        let data: Vec<u8> = (0..40u8).collect();
        translator.write(5, &data).unwrap();
        let back = translator.read(5, data.len()).unwrap();
        assert_eq!(back, data);
    }

    #[test]
    fn read_past_end_returns_zero_bytes() {
        let (_dir, translator) = open_translator(16);
        let back = translator.read(100, 4).unwrap();
        assert_eq!(back, vec![0u8; 4]);
    }
}
