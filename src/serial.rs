//! Binary serialization of context snapshots.
//!
//! A [`Snapshot`](crate::Snapshot) is persisted as a 32-byte header followed
//! by a bincode payload, so a navigational position can be stored between
//! requests and rehydrated later.
//!
//! Header layout, all integers little-endian:
//!
//! | bytes    | contents                                   |
//! |----------|--------------------------------------------|
//! | `0..4`   | `b"MRSN"`                                  |
//! | `4..6`   | snapshot format version                    |
//! | `6..8`   | crate format revision that wrote the blob  |
//! | `8..12`  | captured frame depth                       |
//! | `12..16` | payload length                             |
//! | `16..32` | first 16 bytes of the payload's BLAKE3 hash |
//!
//! Only the snapshot format version is checked on read.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::context::{Snapshot, SnapshotAssignment};
use crate::types::Value;

const MAGIC: &[u8; 4] = b"MRSN";
const FORMAT_VERSION: u16 = 1;
const WRITER_REVISION: u16 = 1;
const HEADER_SIZE: usize = 32;

/// Errors that can occur when serializing a [`Snapshot`](crate::Snapshot).
#[derive(Debug, Error)]
pub enum SerializeError {
    #[error("failed to encode snapshot: {0}")]
    Encode(#[from] bincode::error::EncodeError),

    #[error("value of '{key}' cannot be serialized: {kind} values are process-local")]
    Unsupported { key: String, kind: &'static str },
}

/// Errors that can occur when deserializing a [`Snapshot`](crate::Snapshot).
#[derive(Debug, Error)]
pub enum DeserializeError {
    #[error("not a metarule snapshot: invalid magic bytes")]
    BadMagic,

    #[error("incompatible format version: blob is v{blob}, engine supports v{supported}")]
    IncompatibleVersion { blob: u16, supported: u16 },

    #[error("integrity check failed: BLAKE3 checksum mismatch")]
    ChecksumMismatch,

    #[error("payload length mismatch: expected {expected} bytes, got {actual}")]
    LengthMismatch { expected: u32, actual: usize },

    #[error("failed to decode payload: {0}")]
    Decode(#[from] bincode::error::DecodeError),

    #[error("validation failed: {0}")]
    Validation(String),
}

#[derive(Debug, Serialize, Deserialize)]
struct SerializedSnapshot {
    depth: usize,
    assignments: Vec<SerializedAssignment>,
}

#[derive(Debug, Serialize, Deserialize)]
struct SerializedAssignment {
    key: String,
    value: SerializedValue,
    frame: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
enum SerializedValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    List(Vec<SerializedValue>),
    Map(Vec<(String, SerializedValue)>),
    Override(Box<SerializedValue>),
}

fn serialize_value(key: &str, value: &Value) -> Result<SerializedValue, SerializeError> {
    let unsupported = |kind| SerializeError::Unsupported {
        key: key.to_owned(),
        kind,
    };
    Ok(match value {
        Value::Null => SerializedValue::Null,
        Value::Bool(v) => SerializedValue::Bool(*v),
        Value::Int(v) => SerializedValue::Int(*v),
        Value::Float(v) => SerializedValue::Float(*v),
        Value::String(v) => SerializedValue::Str(v.clone()),
        Value::List(items) => SerializedValue::List(
            items
                .iter()
                .map(|item| serialize_value(key, item))
                .collect::<Result<_, _>>()?,
        ),
        Value::Map(map) => SerializedValue::Map(
            map.iter()
                .map(|(k, v)| Ok((k.clone(), serialize_value(key, v)?)))
                .collect::<Result<_, SerializeError>>()?,
        ),
        Value::Override(inner) => SerializedValue::Override(Box::new(serialize_value(key, inner)?)),
        Value::Object(_) => return Err(unsupported("object")),
        Value::Dynamic(_) => return Err(unsupported("dynamic")),
    })
}

fn deserialize_value(value: SerializedValue) -> Value {
    match value {
        SerializedValue::Null => Value::Null,
        SerializedValue::Bool(v) => Value::Bool(v),
        SerializedValue::Int(v) => Value::Int(v),
        SerializedValue::Float(v) => Value::Float(v),
        SerializedValue::Str(v) => Value::String(v),
        SerializedValue::List(items) => {
            Value::List(items.into_iter().map(deserialize_value).collect())
        }
        SerializedValue::Map(entries) => Value::Map(
            entries
                .into_iter()
                .map(|(k, v)| (k, deserialize_value(v)))
                .collect(),
        ),
        SerializedValue::Override(inner) => Value::Override(Box::new(deserialize_value(*inner))),
    }
}

fn snapshot_to_serialized(snapshot: &Snapshot) -> Result<SerializedSnapshot, SerializeError> {
    let assignments = snapshot
        .assignments()
        .iter()
        .map(|a| {
            Ok(SerializedAssignment {
                key: a.key.clone(),
                value: serialize_value(&a.key, &a.value)?,
                frame: a.frame,
            })
        })
        .collect::<Result<_, SerializeError>>()?;
    Ok(SerializedSnapshot {
        depth: snapshot.depth(),
        assignments,
    })
}

fn serialized_to_snapshot(ser: SerializedSnapshot) -> Result<Snapshot, DeserializeError> {
    validate(&ser)?;
    let assignments = ser
        .assignments
        .into_iter()
        .map(|a| SnapshotAssignment {
            key: a.key,
            value: deserialize_value(a.value),
            frame: a.frame,
        })
        .collect();
    Ok(Snapshot::new(assignments, ser.depth))
}

/// Frames must be non-decreasing and within the captured depth; keys non-empty.
fn validate(ser: &SerializedSnapshot) -> Result<(), DeserializeError> {
    let mut last_frame = 0;
    for (i, assignment) in ser.assignments.iter().enumerate() {
        if assignment.key.is_empty() {
            return Err(DeserializeError::Validation(format!(
                "assignment {i} has an empty key"
            )));
        }
        if assignment.frame < last_frame {
            return Err(DeserializeError::Validation(format!(
                "assignment {i} is in frame {} after frame {last_frame}",
                assignment.frame
            )));
        }
        if assignment.frame > ser.depth {
            return Err(DeserializeError::Validation(format!(
                "assignment {i} is in frame {} but the depth is {}",
                assignment.frame, ser.depth
            )));
        }
        last_frame = assignment.frame;
    }
    Ok(())
}

/// Fixed-size prefix of an encoded snapshot.
#[derive(Debug, PartialEq, Eq)]
struct Header {
    version: u16,
    depth: u32,
    payload_len: u32,
    checksum: [u8; 16],
}

impl Header {
    #[allow(clippy::cast_possible_truncation)]
    fn describe(payload: &[u8], depth: usize) -> Self {
        let mut checksum = [0; 16];
        checksum.copy_from_slice(&blake3::hash(payload).as_bytes()[..16]);
        Self {
            version: FORMAT_VERSION,
            depth: depth as u32,
            payload_len: payload.len() as u32,
            checksum,
        }
    }

    fn write_to(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(MAGIC);
        out.extend_from_slice(&self.version.to_le_bytes());
        out.extend_from_slice(&WRITER_REVISION.to_le_bytes());
        out.extend_from_slice(&self.depth.to_le_bytes());
        out.extend_from_slice(&self.payload_len.to_le_bytes());
        out.extend_from_slice(&self.checksum);
    }

    #[allow(clippy::cast_possible_truncation)]
    fn parse(bytes: &[u8]) -> Result<Self, DeserializeError> {
        let Some(head) = bytes.get(..HEADER_SIZE) else {
            return Err(DeserializeError::LengthMismatch {
                expected: HEADER_SIZE as u32,
                actual: bytes.len(),
            });
        };
        if !head.starts_with(MAGIC) {
            return Err(DeserializeError::BadMagic);
        }
        let word = |at: usize| u32::from_le_bytes([head[at], head[at + 1], head[at + 2], head[at + 3]]);
        let mut checksum = [0; 16];
        checksum.copy_from_slice(&head[16..]);
        Ok(Self {
            version: u16::from_le_bytes([head[4], head[5]]),
            depth: word(8),
            payload_len: word(12),
            checksum,
        })
    }

    fn verify(&self, payload: &[u8]) -> bool {
        blake3::hash(payload).as_bytes()[..16] == self.checksum
    }
}

fn bincode_config() -> bincode::config::Configuration {
    bincode::config::standard()
}

pub(crate) fn encode(snapshot: &Snapshot) -> Result<Vec<u8>, SerializeError> {
    let payload = bincode::serde::encode_to_vec(snapshot_to_serialized(snapshot)?, bincode_config())?;
    let mut out = Vec::with_capacity(HEADER_SIZE + payload.len());
    Header::describe(&payload, snapshot.depth()).write_to(&mut out);
    out.extend_from_slice(&payload);
    Ok(out)
}

pub(crate) fn decode(bytes: &[u8]) -> Result<Snapshot, DeserializeError> {
    let header = Header::parse(bytes)?;
    if header.version != FORMAT_VERSION {
        return Err(DeserializeError::IncompatibleVersion {
            blob: header.version,
            supported: FORMAT_VERSION,
        });
    }

    let body = &bytes[HEADER_SIZE..];
    let Some(payload) = body.get(..header.payload_len as usize) else {
        return Err(DeserializeError::LengthMismatch {
            expected: header.payload_len,
            actual: body.len(),
        });
    };
    if !header.verify(payload) {
        return Err(DeserializeError::ChecksumMismatch);
    }

    let (serialized, _): (SerializedSnapshot, usize) =
        bincode::serde::decode_from_slice(payload, bincode_config())?;
    if serialized.depth != header.depth as usize {
        return Err(DeserializeError::Validation(format!(
            "header records depth {} but the payload has {}",
            header.depth, serialized.depth
        )));
    }
    serialized_to_snapshot(serialized)
}
