//! Disk record layout
//!
//! ```text
//! [u32 version_signature]
//! [i64 expire_time][i64 last_modified][i64 stored_time]
//! [u32 key_len][key bytes]
//! [u32 DOC_START_SIGNATURE][document bytes][u32 DOC_END_SIGNATURE]
//! ```
//!
//! The version signature doubles as the persisted prefetch flag: it is the
//! only field ever rewritten in place.

use bytes::{BufMut, BytesMut};

use super::{RecordError, take_bytes, take_i64, take_u32};
use crate::document::Document;
use crate::tag::{Tag, Timestamp};
use crate::traits::RecordCodec;

/// Signature of a record nobody has claimed for refresh yet
pub const SIGNATURE_UNMARKED: u32 = 0x5447_4401;

/// Signature of a record already reported for early refresh
pub const SIGNATURE_PREFETCH_MARKED: u32 = 0x5447_4402;

/// Marker preceding the document bytes
pub const DOC_START_SIGNATURE: u32 = 0x3c44_4f43;

/// Marker following the document bytes
pub const DOC_END_SIGNATURE: u32 = 0x434f_443e;

/// Fixed-width part of a record, up to and including the key
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordHeader {
    pub prefetch_marked: bool,
    pub tag: Tag,
    pub stored_time: Timestamp,
    pub key: String,
    /// Offset of the document start signature
    pub body_offset: usize,
}

/// Complete disk record
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiskRecord {
    pub prefetch_marked: bool,
    pub tag: Tag,
    pub stored_time: Timestamp,
    pub key: String,
    pub document: Document,
}

/// Codec for [`DiskRecord`]
#[derive(Debug, Default, Clone, Copy)]
pub struct DiskRecordCodec;

impl DiskRecordCodec {
    /// Decode the signature, times and key without touching the document
    ///
    /// # Errors
    ///
    /// Returns [`RecordError`] on an unknown signature, truncation or a
    /// non-UTF-8 key.
    pub fn decode_header(&self, bytes: &[u8]) -> Result<RecordHeader, RecordError> {
        let mut buf = bytes;

        let prefetch_marked = match take_u32(&mut buf, "signature")? {
            SIGNATURE_UNMARKED => false,
            SIGNATURE_PREFETCH_MARKED => true,
            other => return Err(RecordError::BadSignature(other)),
        };
        let expire_time = take_i64(&mut buf, "expire time")?;
        let last_modified = take_i64(&mut buf, "last modified")?;
        let stored_time = take_i64(&mut buf, "stored time")?;

        let key_len = take_u32(&mut buf, "key length")? as usize;
        let key = take_bytes(&mut buf, key_len, "key")?;
        let key = String::from_utf8(key.to_vec()).map_err(|_| RecordError::InvalidKey)?;

        Ok(RecordHeader {
            prefetch_marked,
            tag: Tag::new(last_modified, expire_time),
            stored_time,
            key,
            body_offset: bytes.len() - buf.len(),
        })
    }

    /// Decode the document that follows a previously decoded header
    ///
    /// # Errors
    ///
    /// Returns [`RecordError`] when the boundary signatures are missing or
    /// the document bytes are not a document.
    pub fn decode_document(
        &self,
        bytes: &[u8],
        header: &RecordHeader,
    ) -> Result<Document, RecordError> {
        let mut buf = bytes
            .get(header.body_offset..)
            .ok_or(RecordError::Truncated("document"))?;

        if take_u32(&mut buf, "document start")? != DOC_START_SIGNATURE {
            return Err(RecordError::BadDocumentSignature);
        }
        let Some(doc_len) = buf.len().checked_sub(4) else {
            return Err(RecordError::Truncated("document end"));
        };
        let doc = take_bytes(&mut buf, doc_len, "document")?;
        if take_u32(&mut buf, "document end")? != DOC_END_SIGNATURE {
            return Err(RecordError::BadDocumentSignature);
        }

        Ok(Document::parse(doc.to_vec())?)
    }
}

impl RecordCodec for DiskRecordCodec {
    type Record = DiskRecord;
    type Error = RecordError;

    fn encode(&self, record: &DiskRecord) -> Vec<u8> {
        let key = record.key.as_bytes();
        let doc = record.document.as_bytes();
        let mut buf = BytesMut::with_capacity(4 + 3 * 8 + 4 + key.len() + 4 + doc.len() + 4);

        buf.put_u32_le(if record.prefetch_marked {
            SIGNATURE_PREFETCH_MARKED
        } else {
            SIGNATURE_UNMARKED
        });
        buf.put_i64_le(record.tag.expire_time);
        buf.put_i64_le(record.tag.last_modified);
        buf.put_i64_le(record.stored_time);
        #[allow(clippy::cast_possible_truncation)]
        buf.put_u32_le(key.len() as u32);
        buf.put_slice(key);
        buf.put_u32_le(DOC_START_SIGNATURE);
        buf.put_slice(doc);
        buf.put_u32_le(DOC_END_SIGNATURE);

        buf.to_vec()
    }

    fn decode(&self, bytes: &[u8]) -> Result<DiskRecord, RecordError> {
        let header = self.decode_header(bytes)?;
        let document = self.decode_document(bytes, &header)?;
        Ok(DiskRecord {
            prefetch_marked: header.prefetch_marked,
            tag: header.tag,
            stored_time: header.stored_time,
            key: header.key,
            document,
        })
    }

    fn name(&self) -> &'static str {
        "disk-record"
    }
}
