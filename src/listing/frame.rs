//! Length-delimited framing for the listing artifact (§4.E).
//!
//! Every record is a `u32` big-endian length prefix followed by that many
//! bytes: a one-byte tag plus the variant's payload. `encode_uint32`/
//! `decode_uint32` are exercised directly by the round-trip law L2.

use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum FrameError {
    #[error("buffer too short to hold a length prefix")]
    TruncatedLength,
    #[error("buffer too short for the declared record length")]
    TruncatedRecord,
    #[error("unknown record tag {0}")]
    UnknownTag(u8),
    #[error("record payload is malformed")]
    MalformedPayload,
}

/// One entry in the framed listing artifact.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ListingRecord {
    FileInfo { path: String, mtime_unix: i64, size: u64 },
    DirectoryInfo { path: String },
    DirectoryHeader { path: String, num_entries: u64 },
}

const TAG_FILE_INFO: u8 = 1;
const TAG_DIRECTORY_INFO: u8 = 2;
const TAG_DIRECTORY_HEADER: u8 = 3;

/// Encodes `n` as 4 big-endian bytes (L2).
#[must_use]
pub fn encode_uint32(n: u32) -> [u8; 4] {
    n.to_be_bytes()
}

/// Decodes 4 big-endian bytes back into `u32` (L2): `decode_uint32(encode_uint32(n)) == n`.
#[must_use]
pub fn decode_uint32(bytes: [u8; 4]) -> u32 {
    u32::from_be_bytes(bytes)
}

fn write_string(buf: &mut Vec<u8>, s: &str) {
    buf.extend_from_slice(&encode_uint32(s.len() as u32));
    buf.extend_from_slice(s.as_bytes());
}

fn read_string(buf: &[u8], cursor: &mut usize) -> Result<String, FrameError> {
    let len_bytes: [u8; 4] = buf.get(*cursor..*cursor + 4).ok_or(FrameError::MalformedPayload)?.try_into().map_err(|_| FrameError::MalformedPayload)?;
    let len = decode_uint32(len_bytes) as usize;
    *cursor += 4;
    let bytes = buf.get(*cursor..*cursor + len).ok_or(FrameError::MalformedPayload)?;
    *cursor += len;
    String::from_utf8(bytes.to_vec()).map_err(|_| FrameError::MalformedPayload)
}

impl ListingRecord {
    fn encode_payload(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        match self {
            Self::FileInfo { path, mtime_unix, size } => {
                buf.push(TAG_FILE_INFO);
                write_string(&mut buf, path);
                buf.extend_from_slice(&mtime_unix.to_be_bytes());
                buf.extend_from_slice(&size.to_be_bytes());
            }
            Self::DirectoryInfo { path } => {
                buf.push(TAG_DIRECTORY_INFO);
                write_string(&mut buf, path);
            }
            Self::DirectoryHeader { path, num_entries } => {
                buf.push(TAG_DIRECTORY_HEADER);
                write_string(&mut buf, path);
                buf.extend_from_slice(&num_entries.to_be_bytes());
            }
        }
        buf
    }

    fn decode_payload(bytes: &[u8]) -> Result<Self, FrameError> {
        let tag = *bytes.first().ok_or(FrameError::MalformedPayload)?;
        let mut cursor = 1usize;
        match tag {
            TAG_FILE_INFO => {
                let path = read_string(bytes, &mut cursor)?;
                let mtime_bytes: [u8; 8] = bytes.get(cursor..cursor + 8).ok_or(FrameError::MalformedPayload)?.try_into().map_err(|_| FrameError::MalformedPayload)?;
                cursor += 8;
                let size_bytes: [u8; 8] = bytes.get(cursor..cursor + 8).ok_or(FrameError::MalformedPayload)?.try_into().map_err(|_| FrameError::MalformedPayload)?;
                Ok(Self::FileInfo {
                    path,
                    mtime_unix: i64::from_be_bytes(mtime_bytes),
                    size: u64::from_be_bytes(size_bytes),
                })
            }
            TAG_DIRECTORY_INFO => {
                let path = read_string(bytes, &mut cursor)?;
                Ok(Self::DirectoryInfo { path })
            }
            TAG_DIRECTORY_HEADER => {
                let path = read_string(bytes, &mut cursor)?;
                let num_bytes: [u8; 8] = bytes.get(cursor..cursor + 8).ok_or(FrameError::MalformedPayload)?.try_into().map_err(|_| FrameError::MalformedPayload)?;
                Ok(Self::DirectoryHeader {
                    path,
                    num_entries: u64::from_be_bytes(num_bytes),
                })
            }
            other => Err(FrameError::UnknownTag(other)),
        }
    }

    /// Appends this record's length-prefixed frame to `out`.
    pub fn write_framed(&self, out: &mut Vec<u8>) {
        let payload = self.encode_payload();
        out.extend_from_slice(&encode_uint32(payload.len() as u32));
        out.extend_from_slice(&payload);
    }
}

/// Reads one framed record starting at `buf[*cursor..]`, advancing
/// `cursor` past it.
pub fn read_framed(buf: &[u8], cursor: &mut usize) -> Result<ListingRecord, FrameError> {
    let len_bytes: [u8; 4] = buf.get(*cursor..*cursor + 4).ok_or(FrameError::TruncatedLength)?.try_into().map_err(|_| FrameError::TruncatedLength)?;
    let len = decode_uint32(len_bytes) as usize;
    *cursor += 4;
    let payload = buf.get(*cursor..*cursor + len).ok_or(FrameError::TruncatedRecord)?;
    *cursor += len;
    ListingRecord::decode_payload(payload)
}

/// Decodes every record in `buf` in order; returns an error on the first
/// malformed record.
pub fn read_all(buf: &[u8]) -> Result<Vec<ListingRecord>, FrameError> {
    let mut cursor = 0;
    let mut records = Vec::new();
    while cursor < buf.len() {
        records.push(read_framed(buf, &mut cursor)?);
    }
    Ok(records)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn uint32_round_trips() {
        for n in [0u32, 1, 255, 65536, u32::MAX] {
            assert_eq!(decode_uint32(encode_uint32(n)), n);
        }
    }

    #[test]
    fn records_round_trip_through_framing() {
        let records = vec![
            ListingRecord::FileInfo {
                path: "a/b.txt".into(),
                mtime_unix: 1_700_000_000,
                size: 47,
            },
            ListingRecord::DirectoryInfo { path: "a/x".into() },
            ListingRecord::DirectoryHeader {
                path: "a".into(),
                num_entries: 4,
            },
        ];

        let mut buf = Vec::new();
        for record in &records {
            record.write_framed(&mut buf);
        }

        let decoded = read_all(&buf).unwrap();
        assert_eq!(decoded, records);
    }

    #[test]
    fn truncated_buffer_errors_instead_of_panicking() {
        let mut cursor = 0;
        assert_eq!(read_framed(&[0, 0, 0], &mut cursor), Err(FrameError::TruncatedLength));
    }
}
