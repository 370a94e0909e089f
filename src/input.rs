//! Input normalization (spec §4.3 Phase 1, §9 "Dynamic input union"): any
//! accepted input shape becomes a uniform `FileDescriptor`. This module is
//! the only place permitted to branch on which input variant was given.

use crate::adapter::{ByteStream, RandomAccessSource};
use std::time::{SystemTime, UNIX_EPOCH};

pub const DEFAULT_NAME: &str = "file.bin";
pub const DEFAULT_TYPE: &str = "application/octet-stream";
pub const STRING_NAME: &str = "file.txt";
pub const STRING_TYPE: &str = "text/plain";

/// Caller-overridable metadata, mirroring `params.filename`/`params.type`
/// in the handshake call.
#[derive(Debug, Clone, Default)]
pub struct InputOverrides {
    pub filename: Option<String>,
    pub content_type: Option<String>,
}

/// The per-input-shape metadata a "native" host file object carries
/// along with it, used only when the caller hasn't overridden a field.
#[derive(Debug, Clone, Default)]
pub struct NativeMetadata {
    pub name: Option<String>,
    pub size: Option<u64>,
    pub content_type: Option<String>,
    pub last_modified_seconds: Option<f64>,
}

/// Tagged union of accepted input shapes (spec §9).
pub enum FileInput {
    Bytes(bytes::Bytes),
    RandomAccess(Box<dyn RandomAccessSource>, NativeMetadata),
    Stream(Box<dyn ByteStream>, NativeMetadata),
    String(String),
    Native(Box<dyn RandomAccessSource>, NativeMetadata),
}

/// The body of a `FileDescriptor`, exactly one present (spec §3).
pub enum FileBody {
    Bytes(bytes::Bytes),
    RandomAccess(Box<dyn RandomAccessSource>),
    Stream(Box<dyn ByteStream>),
}

pub struct FileDescriptor {
    pub name: String,
    pub content_type: String,
    pub last_modified_seconds: f64,
    pub size: Option<u64>,
    pub body: FileBody,
}

fn now_seconds() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0)
}

/// Normalizes any `FileInput` plus caller overrides into a `FileDescriptor`.
/// Resolution order per spec §4.3 Phase 1: explicit overrides win; native
/// metadata fills any field left unset; strings get `.txt`/`text/plain`;
/// everything else defaults to `.bin`/`application/octet-stream`; a
/// missing `lastModified` defaults to now.
pub fn normalize(input: FileInput, overrides: InputOverrides) -> FileDescriptor {
    match input {
        FileInput::Bytes(bytes) => FileDescriptor {
            name: overrides.filename.unwrap_or_else(|| DEFAULT_NAME.to_string()),
            content_type: overrides
                .content_type
                .unwrap_or_else(|| DEFAULT_TYPE.to_string()),
            last_modified_seconds: now_seconds(),
            size: Some(bytes.len() as u64),
            body: FileBody::Bytes(bytes),
        },
        FileInput::String(s) => {
            let size = s.len() as u64;
            FileDescriptor {
                name: overrides.filename.unwrap_or_else(|| STRING_NAME.to_string()),
                content_type: overrides
                    .content_type
                    .unwrap_or_else(|| STRING_TYPE.to_string()),
                last_modified_seconds: now_seconds(),
                size: Some(size),
                body: FileBody::Bytes(bytes::Bytes::from(s.into_bytes())),
            }
        }
        FileInput::RandomAccess(source, meta) | FileInput::Native(source, meta) => {
            let size = source.size();
            FileDescriptor {
                name: overrides
                    .filename
                    .or(meta.name)
                    .unwrap_or_else(|| DEFAULT_NAME.to_string()),
                content_type: overrides
                    .content_type
                    .or(meta.content_type)
                    .unwrap_or_else(|| DEFAULT_TYPE.to_string()),
                last_modified_seconds: meta.last_modified_seconds.unwrap_or_else(now_seconds),
                size: Some(meta.size.unwrap_or(size)),
                body: FileBody::RandomAccess(source),
            }
        }
        FileInput::Stream(stream, meta) => FileDescriptor {
            name: overrides
                .filename
                .or(meta.name)
                .unwrap_or_else(|| DEFAULT_NAME.to_string()),
            content_type: overrides
                .content_type
                .or(meta.content_type)
                .unwrap_or_else(|| DEFAULT_TYPE.to_string()),
            last_modified_seconds: meta.last_modified_seconds.unwrap_or_else(now_seconds),
            size: meta.size.or(None),
            body: FileBody::Stream(stream),
        },
    }
}
