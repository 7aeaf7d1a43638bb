#![forbid(unsafe_code)]

//! Core identifier and error types shared across every storage layer.
//!
//! These types used to live in a separate `sombra-types` crate; they are
//! folded into the main crate so the generic KV/query stack and the engine
//! façade share one vocabulary without a workspace boundary.

use std::fmt;
use std::io;
use std::ops::Range;

pub mod checksum;

pub use checksum::{page_crc32, Checksum, Crc32Fast};

/// Opaque page identifier. Page 0 is reserved as a null/invalid marker.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct PageId(pub u64);

impl fmt::Display for PageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "page:{}", self.0)
    }
}

/// Monotonically increasing log sequence number.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct Lsn(pub u64);

impl fmt::Display for Lsn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "lsn:{}", self.0)
    }
}

/// Interned string id used by the catalog/dictionary.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct StrId(pub u32);

/// Interned table/label identifier.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct LabelId(pub u32);

/// Interned edge-type identifier.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct TypeId(pub u32);

/// Interned property/column-name identifier.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct PropId(pub u32);

/// Opaque entity identifier, unique within a table.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct NodeId(pub u64);

/// Opaque edge identifier, unique within a graph id.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct EdgeId(pub u64);

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "node:{}", self.0)
    }
}

impl fmt::Display for EdgeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "edge:{}", self.0)
    }
}

impl From<u32> for LabelId {
    fn from(v: u32) -> Self {
        LabelId(v)
    }
}
impl From<LabelId> for u32 {
    fn from(v: LabelId) -> Self {
        v.0
    }
}
impl From<u32> for TypeId {
    fn from(v: u32) -> Self {
        TypeId(v)
    }
}
impl From<TypeId> for u32 {
    fn from(v: TypeId) -> Self {
        v.0
    }
}
impl From<u32> for PropId {
    fn from(v: u32) -> Self {
        PropId(v)
    }
}
impl From<PropId> for u32 {
    fn from(v: PropId) -> Self {
        v.0
    }
}

/// Pointer to an overflow/external value payload stored out-of-line.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub struct VRef {
    /// First page of the value's extent.
    pub start_page: PageId,
    /// Number of pages in the extent.
    pub n_pages: u32,
    /// Logical byte length of the value.
    pub len: u32,
    /// Checksum over the value's bytes.
    pub checksum: u32,
}

/// Canonical error type for every layer of the engine.
///
/// Variants map directly onto the engine's external error taxonomy
/// (`not_found`, `conflict`, `timeout`, `invalid_argument`,
/// `precondition_failed`, `corrupt`, `internal`); [`SombraError::kind`]
/// exposes that mapping and [`SombraError::is_retryable`] tells callers
/// whether retrying the operation could succeed.
#[derive(thiserror::Error, Debug)]
pub enum SombraError {
    /// Underlying OS/filesystem error.
    #[error("io error: {0}")]
    Io(#[from] io::Error),
    /// On-disk structure failed a consistency check.
    #[error("corruption: {0}")]
    Corruption(&'static str),
    /// On-disk structure failed a consistency check, with a dynamic message.
    #[error("corruption: {0}")]
    CorruptionOwned(String),
    /// Caller supplied an invalid argument.
    #[error("invalid argument: {0}")]
    Invalid(&'static str),
    /// Caller supplied an invalid argument, with a dynamic message.
    #[error("invalid argument: {0}")]
    InvalidOwned(String),
    /// Requested entity/key/index entry does not exist.
    #[error("not found")]
    NotFound,
    /// Transaction could not be serialized against a concurrent writer.
    #[error("write conflict: {0}")]
    Conflict(String),
    /// A blocking wait (lock acquisition, long-poll) exceeded its deadline.
    #[error("timeout: {0}")]
    Timeout(String),
    /// A precondition required by the operation (e.g. expected version) was not met.
    #[error("precondition failed: {0}")]
    PreconditionFailed(String),
    /// Feature not implemented on this build.
    #[error("unsupported: {0}")]
    UnsupportedFeature(&'static str),
    /// Catch-all for invariant violations that should never happen.
    #[error("internal error: {0}")]
    Internal(String),
}

/// Coarse error classification surfaced across the external interface.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ErrorKind {
    NotFound,
    Conflict,
    Timeout,
    InvalidArgument,
    PreconditionFailed,
    Corrupt,
    Internal,
}

impl SombraError {
    /// Classifies this error per the external taxonomy.
    pub fn kind(&self) -> ErrorKind {
        match self {
            SombraError::NotFound => ErrorKind::NotFound,
            SombraError::Conflict(_) => ErrorKind::Conflict,
            SombraError::Timeout(_) => ErrorKind::Timeout,
            SombraError::Invalid(_) | SombraError::InvalidOwned(_) => ErrorKind::InvalidArgument,
            SombraError::PreconditionFailed(_) => ErrorKind::PreconditionFailed,
            SombraError::Corruption(_) | SombraError::CorruptionOwned(_) => ErrorKind::Corrupt,
            SombraError::Io(_) | SombraError::UnsupportedFeature(_) | SombraError::Internal(_) => {
                ErrorKind::Internal
            }
        }
    }

    /// Whether retrying the same operation has a chance of succeeding.
    ///
    /// Conflicts and timeouts are retryable (the caller can re-snapshot and
    /// retry); everything else reflects a durable condition.
    pub fn is_retryable(&self) -> bool {
        matches!(self.kind(), ErrorKind::Conflict | ErrorKind::Timeout)
    }
}

/// Result alias used throughout the engine.
pub type Result<T> = std::result::Result<T, SombraError>;

/// On-disk page header layout shared by the pager and every page kind.
pub mod page {
    use super::{PageId, Result, SombraError};
    use std::ops::Range;

    /// 4-byte magic stamped at the start of every page.
    pub const PAGE_MAGIC: [u8; 4] = *b"SOMB";
    /// Current on-disk page format version.
    pub const PAGE_FORMAT_VERSION: u16 = 1;
    /// Default page size in bytes when none is configured.
    pub const DEFAULT_PAGE_SIZE: u32 = 8192;
    /// Length in bytes of the fixed page header.
    pub const PAGE_HDR_LEN: usize = 32;

    /// Byte-offset ranges within the fixed page header.
    pub mod header {
        use super::Range;
        pub const MAGIC: Range<usize> = 0..4;
        pub const FORMAT_VERSION: Range<usize> = 4..6;
        pub const PAGE_KIND: usize = 6;
        pub const RESERVED: usize = 7;
        pub const PAGE_SIZE: Range<usize> = 8..12;
        pub const PAGE_NO: Range<usize> = 12..20;
        pub const SALT: Range<usize> = 20..28;
        pub const CRC32: Range<usize> = 28..32;
    }

    /// Tag identifying the structural role of a page.
    #[derive(Clone, Copy, Debug, Eq, PartialEq)]
    #[repr(u8)]
    pub enum PageKind {
        Meta = 1,
        FreeList = 2,
        BTreeLeaf = 3,
        BTreeInternal = 4,
        Overflow = 5,
    }

    impl TryFrom<u8> for PageKind {
        type Error = SombraError;

        fn try_from(value: u8) -> Result<Self> {
            match value {
                1 => Ok(PageKind::Meta),
                2 => Ok(PageKind::FreeList),
                3 => Ok(PageKind::BTreeLeaf),
                4 => Ok(PageKind::BTreeInternal),
                5 => Ok(PageKind::Overflow),
                _ => Err(SombraError::Corruption("unknown page kind")),
            }
        }
    }

    /// Fixed 32-byte header prepended to every page.
    #[derive(Clone, Copy, Debug, Eq, PartialEq)]
    pub struct PageHeader {
        pub format_version: u16,
        pub kind: PageKind,
        pub page_size: u32,
        pub page_no: PageId,
        pub salt: u64,
        pub crc32: u32,
    }

    impl PageHeader {
        pub fn new(kind: PageKind, page_size: u32, page_no: PageId, salt: u64) -> Self {
            Self {
                format_version: PAGE_FORMAT_VERSION,
                kind,
                page_size,
                page_no,
                salt,
                crc32: 0,
            }
        }

        pub fn with_crc32(mut self, crc32: u32) -> Self {
            self.crc32 = crc32;
            self
        }

        pub fn encode(&self, dst: &mut [u8]) -> Result<()> {
            if dst.len() < PAGE_HDR_LEN {
                return Err(SombraError::Invalid("page header buffer too small"));
            }
            dst[header::MAGIC].copy_from_slice(&PAGE_MAGIC);
            dst[header::FORMAT_VERSION].copy_from_slice(&self.format_version.to_be_bytes());
            dst[header::PAGE_KIND] = self.kind as u8;
            dst[header::RESERVED] = 0;
            dst[header::PAGE_SIZE].copy_from_slice(&self.page_size.to_be_bytes());
            dst[header::PAGE_NO].copy_from_slice(&self.page_no.0.to_be_bytes());
            dst[header::SALT].copy_from_slice(&self.salt.to_be_bytes());
            dst[header::CRC32].copy_from_slice(&self.crc32.to_be_bytes());
            Ok(())
        }

        pub fn decode(src: &[u8]) -> Result<Self> {
            if src.len() < PAGE_HDR_LEN {
                return Err(SombraError::Corruption("page header truncated"));
            }
            if src[header::MAGIC] != PAGE_MAGIC {
                return Err(SombraError::Corruption("bad page magic"));
            }
            let format_version = u16::from_be_bytes(src[header::FORMAT_VERSION].try_into().unwrap());
            let kind = PageKind::try_from(src[header::PAGE_KIND])?;
            let page_size = u32::from_be_bytes(src[header::PAGE_SIZE].try_into().unwrap());
            let page_no = PageId(u64::from_be_bytes(src[header::PAGE_NO].try_into().unwrap()));
            let salt = u64::from_be_bytes(src[header::SALT].try_into().unwrap());
            let crc32 = u32::from_be_bytes(src[header::CRC32].try_into().unwrap());
            Ok(Self {
                format_version,
                kind,
                page_size,
                page_no,
                salt,
                crc32,
            })
        }

        pub fn clear_crc32(buf: &mut [u8]) -> Result<()> {
            if buf.len() < PAGE_HDR_LEN {
                return Err(SombraError::Invalid("page header buffer too small"));
            }
            buf[header::CRC32].copy_from_slice(&0u32.to_be_bytes());
            Ok(())
        }
    }

    #[cfg(test)]
    mod tests {
        use super::*;

        #[test]
        fn page_header_roundtrip() {
            let hdr = PageHeader::new(PageKind::BTreeLeaf, 8192, PageId(7), 99).with_crc32(123);
            let mut buf = [0u8; PAGE_HDR_LEN];
            hdr.encode(&mut buf).unwrap();
            let decoded = PageHeader::decode(&buf).unwrap();
            assert_eq!(decoded, hdr);
        }

        #[test]
        fn clear_crc32_zeroes_field() {
            let hdr = PageHeader::new(PageKind::Meta, 8192, PageId(1), 0).with_crc32(0xdead_beef);
            let mut buf = [0u8; PAGE_HDR_LEN];
            hdr.encode(&mut buf).unwrap();
            PageHeader::clear_crc32(&mut buf).unwrap();
            let decoded = PageHeader::decode(&buf).unwrap();
            assert_eq!(decoded.crc32, 0);
        }

        #[test]
        fn page_kind_from_u8_rejects_unknown() {
            assert!(PageKind::try_from(0).is_err());
            assert!(PageKind::try_from(6).is_err());
        }
    }
}
