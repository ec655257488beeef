//! Record Codec Implementations
//!
//! This module provides the byte layouts of persisted cache records as
//! implementations of the [`RecordCodec`](crate::traits::RecordCodec) trait.
//! Both layouts are fixed-width little-endian and must stay stable across
//! releases: files and memcached values outlive the process that wrote them.

mod disk_record;
mod memcached_value;

pub use disk_record::{
    DOC_END_SIGNATURE, DOC_START_SIGNATURE, DiskRecord, DiskRecordCodec, RecordHeader,
    SIGNATURE_PREFETCH_MARKED, SIGNATURE_UNMARKED,
};
pub use memcached_value::{MEMCACHED_HEADER_LEN, MemcachedValue, MemcachedValueCodec};

use crate::document::DocumentError;
use bytes::Buf;
use thiserror::Error;

/// Reasons stored bytes fail to decode
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RecordError {
    #[error("unrecognized record signature {0:#010x}")]
    BadSignature(u32),
    #[error("record truncated while reading {0}")]
    Truncated(&'static str),
    #[error("document boundary signature mismatch")]
    BadDocumentSignature,
    #[error("stored key is not valid UTF-8")]
    InvalidKey,
    #[error("stored document is invalid: {0}")]
    InvalidDocument(#[from] DocumentError),
}

fn take_u32(buf: &mut &[u8], field: &'static str) -> Result<u32, RecordError> {
    if buf.remaining() < 4 {
        return Err(RecordError::Truncated(field));
    }
    Ok(buf.get_u32_le())
}

fn take_i64(buf: &mut &[u8], field: &'static str) -> Result<i64, RecordError> {
    if buf.remaining() < 8 {
        return Err(RecordError::Truncated(field));
    }
    Ok(buf.get_i64_le())
}

fn take_bytes<'a>(buf: &mut &'a [u8], len: usize, field: &'static str) -> Result<&'a [u8], RecordError> {
    if buf.len() < len {
        return Err(RecordError::Truncated(field));
    }
    let slice: &'a [u8] = *buf;
    let (head, tail) = slice.split_at(len);
    *buf = tail;
    Ok(head)
}
