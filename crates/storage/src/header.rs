use std::os::unix::fs::FileExt;

use crc32fast::Hasher;
use log::{debug, warn};
use serde::{Deserialize, Serialize};

use crate::error::{StorageError, StorageResult};

/// Fixed container header size in bytes (§3).
pub const HEADER_SIZE: usize = 128;

const MAGIC: &[u8; 8] = b"CCVFSDB\0";
const NAME_FIELD_LEN: usize = 12;
const CHECKSUM_OFFSET: usize = 124;

const VERSION_MAJOR: u16 = 1;
const VERSION_MINOR: u16 = 0;

/// Logical page sizes the container format allows (§3).
pub const ALLOWED_PAGE_SIZES: [u32; 10] = [
    1024,
    4096,
    8192,
    16384,
    32768,
    65536,
    131072,
    262144,
    524288,
    1_048_576,
];

pub fn is_allowed_page_size(page_size: u32) -> bool {
    ALLOWED_PAGE_SIZES.contains(&page_size)
}

bitflags::bitflags! {
    /// Creation-time hints, informational only per §9's open question on
    /// realtime/offline/hybrid flags.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
    pub struct CreationFlags: u32 {
        const REALTIME = 0b001;
        const OFFLINE  = 0b010;
        const HYBRID   = 0b100;
    }
}

/// The 128-byte container header (§3).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Header {
    pub version_major: u16,
    pub version_minor: u16,
    pub page_size: u32,
    pub flags: CreationFlags,
    pub compress_name: String,
    pub encrypt_name: String,
    pub total_pages: u32,
    pub original_size: u64,
    pub stored_size: u64,
    pub index_offset: u64,
    pub index_entries: u32,
}

impl Header {
    pub fn new(page_size: u32, compress_name: &str, encrypt_name: &str, flags: CreationFlags) -> Self {
        Self {
            version_major: VERSION_MAJOR,
            version_minor: VERSION_MINOR,
            page_size,
            flags,
            compress_name: compress_name.to_string(),
            encrypt_name: encrypt_name.to_string(),
            total_pages: 0,
            original_size: 0,
            stored_size: 0,
            // Placeholder until the index first needs a region of its own;
            // page-data slots start here instead (§6).
            index_offset: HEADER_SIZE as u64,
            index_entries: 0,
        }
    }

    fn to_bytes(&self) -> StorageResult<[u8; HEADER_SIZE]> {
        let mut buf = [0u8; HEADER_SIZE];
        let mut offset = 0usize;

        buf[offset..offset + 8].copy_from_slice(MAGIC);
        offset += 8;
        buf[offset..offset + 2].copy_from_slice(&self.version_major.to_le_bytes());
        offset += 2;
        buf[offset..offset + 2].copy_from_slice(&self.version_minor.to_le_bytes());
        offset += 2;
        buf[offset..offset + 4].copy_from_slice(&self.page_size.to_le_bytes());
        offset += 4;
        buf[offset..offset + 4].copy_from_slice(&self.flags.bits().to_le_bytes());
        offset += 4;
        write_name_field(&mut buf[offset..offset + NAME_FIELD_LEN], &self.compress_name)?;
        offset += NAME_FIELD_LEN;
        write_name_field(&mut buf[offset..offset + NAME_FIELD_LEN], &self.encrypt_name)?;
        offset += NAME_FIELD_LEN;
        buf[offset..offset + 4].copy_from_slice(&self.total_pages.to_le_bytes());
        offset += 4;
        buf[offset..offset + 8].copy_from_slice(&self.original_size.to_le_bytes());
        offset += 8;
        buf[offset..offset + 8].copy_from_slice(&self.stored_size.to_le_bytes());
        offset += 8;
        buf[offset..offset + 8].copy_from_slice(&self.index_offset.to_le_bytes());
        offset += 8;
        buf[offset..offset + 4].copy_from_slice(&self.index_entries.to_le_bytes());
        offset += 4;
        debug_assert_eq!(offset, CHECKSUM_OFFSET - 48);

        let mut hasher = Hasher::new();
        hasher.update(&buf[..CHECKSUM_OFFSET]);
        let checksum = hasher.finalize();
        buf[CHECKSUM_OFFSET..CHECKSUM_OFFSET + 4].copy_from_slice(&checksum.to_le_bytes());
        Ok(buf)
    }

    fn from_bytes(buf: &[u8; HEADER_SIZE]) -> StorageResult<Self> {
        if &buf[0..8] != MAGIC {
            return Err(StorageError::NotAContainer);
        }

        let mut hasher = Hasher::new();
        hasher.update(&buf[..CHECKSUM_OFFSET]);
        let expected = hasher.finalize();
        let stored = u32::from_le_bytes(buf[CHECKSUM_OFFSET..CHECKSUM_OFFSET + 4].try_into().unwrap());
        if expected != stored {
            return Err(StorageError::HeaderCorrupt(format!(
                "checksum mismatch: expected {expected:#x}, found {stored:#x}"
            )));
        }

        let mut offset = 8usize;
        let version_major = u16::from_le_bytes(buf[offset..offset + 2].try_into().unwrap());
        offset += 2;
        let version_minor = u16::from_le_bytes(buf[offset..offset + 2].try_into().unwrap());
        offset += 2;
        if version_major != VERSION_MAJOR {
            return Err(StorageError::VersionUnsupported {
                major: version_major,
                minor: version_minor,
            });
        }

        let page_size = u32::from_le_bytes(buf[offset..offset + 4].try_into().unwrap());
        offset += 4;
        if !is_allowed_page_size(page_size) {
            return Err(StorageError::HeaderCorrupt(format!(
                "page_size {page_size} is not one of the allowed sizes"
            )));
        }

        let flags_bits = u32::from_le_bytes(buf[offset..offset + 4].try_into().unwrap());
        let flags = CreationFlags::from_bits_truncate(flags_bits);
        offset += 4;

        let compress_name = read_name_field(&buf[offset..offset + NAME_FIELD_LEN]);
        offset += NAME_FIELD_LEN;
        let encrypt_name = read_name_field(&buf[offset..offset + NAME_FIELD_LEN]);
        offset += NAME_FIELD_LEN;

        let total_pages = u32::from_le_bytes(buf[offset..offset + 4].try_into().unwrap());
        offset += 4;
        let original_size = u64::from_le_bytes(buf[offset..offset + 8].try_into().unwrap());
        offset += 8;
        let stored_size = u64::from_le_bytes(buf[offset..offset + 8].try_into().unwrap());
        offset += 8;
        let index_offset = u64::from_le_bytes(buf[offset..offset + 8].try_into().unwrap());
        offset += 8;
        let index_entries = u32::from_le_bytes(buf[offset..offset + 4].try_into().unwrap());

        Ok(Self {
            version_major,
            version_minor,
            page_size,
            flags,
            compress_name,
            encrypt_name,
            total_pages,
            original_size,
            stored_size,
            index_offset,
            index_entries,
        })
    }
}

fn write_name_field(dst: &mut [u8], name: &str) -> StorageResult<()> {
    if name.len() >= NAME_FIELD_LEN {
        return Err(StorageError::InvalidArgument(format!(
            "algorithm name '{name}' exceeds {} bytes",
            NAME_FIELD_LEN - 1
        )));
    }
    dst.fill(0);
    dst[..name.len()].copy_from_slice(name.as_bytes());
    Ok(())
}

fn read_name_field(src: &[u8]) -> String {
    let end = src.iter().position(|&b| b == 0).unwrap_or(src.len());
    String::from_utf8_lossy(&src[..end]).into_owned()
}

/// Reads and validates the header at offset 0 of `file` (§4.B).
pub fn read_header(file: &std::fs::File) -> StorageResult<Header> {
    let mut buf = [0u8; HEADER_SIZE];
    file.read_at(&mut buf, 0)?;
    let header = Header::from_bytes(&buf)?;
    debug!(
        "loaded header: page_size={} total_pages={} compress={} encrypt={}",
        header.page_size, header.total_pages, header.compress_name, header.encrypt_name
    );
    Ok(header)
}

/// Serializes and fsyncs `header` at offset 0 of `file` (§4.B).
///
/// This is the only place a 128-byte header is ever written, and it is the
/// last write of a flush cycle: data writes are fsynced first so a crash
/// mid-header-write leaves either the previous valid header or the new one,
/// never a torn mix (§7).
pub fn write_header(file: &std::fs::File, header: &Header) -> StorageResult<()> {
    let buf = header.to_bytes()?;
    file.write_at(&buf, 0)?;
    file.sync_all()?;
    Ok(())
}

/// Marks `err` as fatal if it indicates the header cannot be trusted,
/// distinguishing the "survivable, reopen read-only" path from a hard I/O
/// failure (§4.B).
pub fn is_header_corrupt(err: &StorageError) -> bool {
    matches!(
        err,
        StorageError::HeaderCorrupt(_) | StorageError::NotAContainer
    )
}

pub fn log_header_corrupt(err: &StorageError) {
    warn!("header is corrupt, opening read-only: {err}");
}
