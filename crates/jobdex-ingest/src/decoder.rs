//! Record decoding
//!
//! A `.bson.gz` source is a gzip stream of back-to-back BSON documents, each
//! starting with its own little-endian `i32` byte length. [`BsonRecords`]
//! reads one document at a time straight from the decompressor, so memory
//! use is bounded by the largest single record rather than the file.
//!
//! After the first bad record the iterator yields one [`DecodeError`] and
//! then ends; the caller moves on to the next file.

use crate::discovery::SourceFile;
use bson::Bson;
use flate2::read::MultiGzDecoder;
use jobdex_common::{Document, Map};
use std::fs::File;
use std::io::{self, BufReader, Read};
use thiserror::Error;

/// Largest accepted record, matching the BSON wire limit (16 MiB).
pub const MAX_RECORD_BYTES: usize = 16 * 1024 * 1024;

/// Smallest valid BSON document: length prefix plus terminating NUL.
const MIN_RECORD_BYTES: usize = 5;

/// Why a file stopped decoding early.
///
/// `record` is the zero-based index of the record that failed and `offset`
/// the byte position in the decompressed stream where it starts.
#[derive(Error, Debug)]
pub enum DecodeError {
    #[error("cannot open file: {0}")]
    Open(#[source] io::Error),

    #[error("read failed at record {record} (offset {offset}): {source}")]
    Read {
        record: u64,
        offset: u64,
        #[source]
        source: io::Error,
    },

    #[error("stream truncated inside record {record} (offset {offset})")]
    Truncated { record: u64, offset: u64 },

    #[error("malformed record {record} (offset {offset}): {reason}")]
    Malformed {
        record: u64,
        offset: u64,
        reason: String,
    },

    #[error("invalid JSON document: {0}")]
    Json(#[from] serde_json::Error),
}

impl DecodeError {
    /// Record index the error refers to, when known
    pub fn record(&self) -> Option<u64> {
        match self {
            DecodeError::Read { record, .. }
            | DecodeError::Truncated { record, .. }
            | DecodeError::Malformed { record, .. } => Some(*record),
            _ => None,
        }
    }

    /// Decompressed byte offset the error refers to, when known
    pub fn offset(&self) -> Option<u64> {
        match self {
            DecodeError::Read { offset, .. }
            | DecodeError::Truncated { offset, .. }
            | DecodeError::Malformed { offset, .. } => Some(*offset),
            _ => None,
        }
    }
}

/// Lazily decoded records of one source file
pub type RecordIter = Box<dyn Iterator<Item = Result<Document, DecodeError>> + Send>;

/// Open `source` and return its records.
///
/// Names ending in `.json` hold a single JSON document. Anything else is a
/// BSON stream, gunzipped when the name ends in `.gz`.
pub fn open_records(source: &SourceFile) -> Result<RecordIter, DecodeError> {
    let file = File::open(source.path()).map_err(DecodeError::Open)?;

    if source.has_extension(".json") {
        let value: serde_json::Value = serde_json::from_reader(BufReader::new(file))?;
        return Ok(Box::new(std::iter::once(Ok(Document::from(value)))));
    }

    if source.has_extension(".gz") {
        Ok(Box::new(BsonRecords::new(BufReader::new(MultiGzDecoder::new(
            BufReader::new(file),
        )))))
    } else {
        Ok(Box::new(BsonRecords::new(BufReader::new(file))))
    }
}

/// Iterator over length-prefixed BSON documents read from `R`
pub struct BsonRecords<R> {
    reader: R,
    record: u64,
    offset: u64,
    done: bool,
}

impl<R: Read> BsonRecords<R> {
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            record: 0,
            offset: 0,
            done: false,
        }
    }

    fn read_record(&mut self) -> Result<Option<Document>, DecodeError> {
        let (record, offset) = (self.record, self.offset);

        let mut prefix = [0u8; 4];
        match read_full(&mut self.reader, &mut prefix) {
            Ok(0) => return Ok(None),
            Ok(4) => {},
            Ok(_) => return Err(DecodeError::Truncated { record, offset }),
            Err(source) => return Err(DecodeError::Read { record, offset, source }),
        }

        let declared = i32::from_le_bytes(prefix);
        let len = usize::try_from(declared).unwrap_or(0);
        if !(MIN_RECORD_BYTES..=MAX_RECORD_BYTES).contains(&len) {
            return Err(DecodeError::Malformed {
                record,
                offset,
                reason: format!("invalid document length {declared}"),
            });
        }

        let mut buf = vec![0u8; len];
        buf[..4].copy_from_slice(&prefix);
        match read_full(&mut self.reader, &mut buf[4..]) {
            Ok(n) if n == len - 4 => {},
            Ok(_) => return Err(DecodeError::Truncated { record, offset }),
            Err(source) => return Err(DecodeError::Read { record, offset, source }),
        }

        let raw = bson::Document::from_reader(buf.as_slice()).map_err(|e| DecodeError::Malformed {
            record,
            offset,
            reason: e.to_string(),
        })?;

        self.record += 1;
        self.offset += len as u64;

        Ok(Some(bson_document(raw)))
    }
}

impl<R: Read> Iterator for BsonRecords<R> {
    type Item = Result<Document, DecodeError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        match self.read_record() {
            Ok(Some(doc)) => Some(Ok(doc)),
            Ok(None) => {
                self.done = true;
                None
            },
            Err(err) => {
                self.done = true;
                Some(Err(err))
            },
        }
    }
}

/// Fill `buf` as far as the stream allows; returns the bytes read.
fn read_full<R: Read>(reader: &mut R, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}

fn bson_document(raw: bson::Document) -> Document {
    Document::Map(
        raw.into_iter()
            .map(|(k, v)| (k, bson_value(v)))
            .collect::<Map>(),
    )
}

/// Convert one BSON value into a [`Document`].
///
/// Types without a JSON counterpart become strings: object ids as hex,
/// datetimes as RFC 3339.
pub fn bson_value(value: Bson) -> Document {
    match value {
        Bson::Null | Bson::Undefined => Document::Null,
        Bson::Boolean(b) => Document::Bool(b),
        Bson::Int32(n) => Document::Int(i64::from(n)),
        Bson::Int64(n) => Document::Int(n),
        Bson::Double(f) => Document::Float(f),
        Bson::String(s) => Document::String(s),
        Bson::Array(items) => Document::Array(items.into_iter().map(bson_value).collect()),
        Bson::Document(doc) => bson_document(doc),
        Bson::ObjectId(oid) => Document::String(oid.to_hex()),
        Bson::DateTime(dt) => Document::String(
            dt.try_to_rfc3339_string()
                .unwrap_or_else(|_| dt.timestamp_millis().to_string()),
        ),
        Bson::Timestamp(ts) => Document::Int(i64::from(ts.time)),
        other => Document::String(other.to_string()),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use bson::doc;
    use flate2::write::GzEncoder;
    use flate2::Compression;
    use std::io::Write;

    fn encode(docs: &[bson::Document]) -> Vec<u8> {
        let mut out = Vec::new();
        for d in docs {
            d.to_writer(&mut out).unwrap();
        }
        out
    }

    #[test]
    fn test_reads_records_in_order() {
        let bytes = encode(&[
            doc! {"acct": {"id": "1", "ncpus": 4_i32}},
            doc! {"acct": {"id": "2", "ncpus": 8_i64}, "load": 0.5},
        ]);

        let docs: Vec<_> = BsonRecords::new(bytes.as_slice())
            .collect::<Result<_, _>>()
            .unwrap();

        assert_eq!(docs.len(), 2);
        assert_eq!(
            docs[1].to_json_value(),
            serde_json::json!({"acct": {"id": "2", "ncpus": 8}, "load": 0.5})
        );
    }

    #[test]
    fn test_truncated_stream_reports_record_and_offset() {
        let mut bytes = encode(&[doc! {"a": 1_i32}, doc! {"b": "two"}]);
        let first_len = encode(&[doc! {"a": 1_i32}]).len() as u64;
        bytes.truncate(bytes.len() - 3);

        let mut records = BsonRecords::new(bytes.as_slice());
        assert!(records.next().unwrap().is_ok());
        match records.next().unwrap() {
            Err(DecodeError::Truncated { record, offset }) => {
                assert_eq!(record, 1);
                assert_eq!(offset, first_len);
            },
            other => panic!("expected truncation, got {other:?}"),
        }
        assert!(records.next().is_none());
    }

    #[test]
    fn test_bad_length_is_malformed() {
        let bytes = [0xff_u8, 0xff, 0xff, 0xff, 0, 0, 0];
        let err = BsonRecords::new(&bytes[..]).next().unwrap().unwrap_err();
        assert!(matches!(err, DecodeError::Malformed { record: 0, offset: 0, .. }));
        assert_eq!(err.record(), Some(0));
    }

    #[test]
    fn test_gzip_file_is_streamed() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("resource_8.bson.gz");
        let mut encoder = GzEncoder::new(File::create(&path).unwrap(), Compression::default());
        encoder
            .write_all(&encode(&[doc! {"x": 1_i32}, doc! {"x": 2_i32}, doc! {"x": 3_i32}]))
            .unwrap();
        encoder.finish().unwrap();

        let count = open_records(&SourceFile::new(&path))
            .unwrap()
            .filter(Result::is_ok)
            .count();
        assert_eq!(count, 3);
    }

    #[test]
    fn test_json_file_is_one_document() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("resource_9.json");
        std::fs::write(&path, r#"{"acct": {"id": "5", "end_time": 10}}"#).unwrap();

        let docs: Vec<_> = open_records(&SourceFile::new(&path)).unwrap().collect();
        assert_eq!(docs.len(), 1);
        assert!(docs[0].as_ref().unwrap().is_map());
    }

    #[test]
    fn test_bson_special_types_become_strings() {
        let oid = bson::oid::ObjectId::new();
        let converted = bson_value(Bson::ObjectId(oid));
        assert_eq!(converted.as_str(), Some(oid.to_hex().as_str()));

        let when = bson::DateTime::from_millis(0);
        assert_eq!(
            bson_value(Bson::DateTime(when)).as_str(),
            Some("1970-01-01T00:00:00Z")
        );
    }
}
