//! Memcached value layout
//!
//! ```text
//! [i64 last_modified][i64 expire_time][document bytes]
//! ```
//!
//! Expiry is enforced by memcached itself, so the value carries no stored
//! time and no prefetch flag.

use bytes::{BufMut, BytesMut};

use super::{RecordError, take_i64};
use crate::document::Document;
use crate::tag::Tag;
use crate::traits::RecordCodec;

/// Size of the fixed header preceding the document
pub const MEMCACHED_HEADER_LEN: usize = 16;

/// Decoded memcached value
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemcachedValue {
    pub tag: Tag,
    pub document: Document,
}

/// Codec for [`MemcachedValue`]
#[derive(Debug, Default, Clone, Copy)]
pub struct MemcachedValueCodec;

impl RecordCodec for MemcachedValueCodec {
    type Record = MemcachedValue;
    type Error = RecordError;

    fn encode(&self, value: &MemcachedValue) -> Vec<u8> {
        let doc = value.document.as_bytes();
        let mut buf = BytesMut::with_capacity(MEMCACHED_HEADER_LEN + doc.len());
        buf.put_i64_le(value.tag.last_modified);
        buf.put_i64_le(value.tag.expire_time);
        buf.put_slice(doc);
        buf.to_vec()
    }

    fn decode(&self, bytes: &[u8]) -> Result<MemcachedValue, RecordError> {
        let mut buf = bytes;
        let last_modified = take_i64(&mut buf, "last modified")?;
        let expire_time = take_i64(&mut buf, "expire time")?;
        let document = Document::parse(buf.to_vec())?;
        Ok(MemcachedValue {
            tag: Tag::new(last_modified, expire_time),
            document,
        })
    }

    fn name(&self) -> &'static str {
        "memcached-value"
    }
}
