//! Handshake response parsing and upload planning (spec §3 `UploadInfo`/
//! `UploadPlan`, §4.3 Phase 3).

use crate::signer::AwsBucket;
use serde_json::Value;
use std::collections::BTreeMap;

pub const AWS_MIN_BLOCK_SIZE: u64 = 5 * 1024 * 1024;
pub const STREAMING_BLOCK_SIZE: u64 = 526 * 1024 * 1024;

/// Parsed handshake `data` (spec §3, §6). The AWS discriminator wins if
/// both shapes are somehow present.
#[derive(Debug, Clone)]
pub enum UploadInfo {
    Put {
        put_url: String,
        complete_endpoint: String,
        block_size: Option<u64>,
    },
    Aws {
        handle_id: String,
        bucket: AwsBucket,
        key: String,
    },
}

impl UploadInfo {
    pub fn from_handshake_data(data: &Value) -> Option<Self> {
        if let Some(handle) = data.get("Cloud_Aws_Bucket_Upload__").and_then(|v| v.as_str()) {
            let endpoint = data.get("Bucket_Endpoint")?;
            let bucket = AwsBucket {
                host: endpoint.get("Host")?.as_str()?.to_string(),
                name: endpoint.get("Name")?.as_str()?.to_string(),
                region: endpoint.get("Region")?.as_str()?.to_string(),
            };
            let key = data.get("Key")?.as_str()?.to_string();
            return Some(UploadInfo::Aws {
                handle_id: handle.to_string(),
                bucket,
                key,
            });
        }

        if let Some(put_url) = data.get("PUT").and_then(|v| v.as_str()) {
            let complete_endpoint = data.get("Complete")?.as_str()?.to_string();
            let block_size = data.get("Blocksize").and_then(|v| v.as_u64());
            return Some(UploadInfo::Put {
                put_url: put_url.to_string(),
                complete_endpoint,
                block_size,
            });
        }

        None
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockState {
    NotStarted,
    InFlight,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Mode {
    Put,
    Aws,
}

/// `UploadPlan` (spec §3). `block_count` is `None` while streaming with
/// unknown size; it is frozen once the stream is exhausted (Phase 4).
pub struct UploadPlan {
    pub mode: Mode,
    pub block_size: u64,
    pub block_count: Option<u64>,
    pub upload_id: Option<String>,
    pub states: BTreeMap<u64, BlockState>,
    pub etags: BTreeMap<u64, String>,
}

impl UploadPlan {
    pub fn new_put(block_size: u64, block_count: Option<u64>) -> Self {
        Self {
            mode: Mode::Put,
            block_size,
            block_count,
            upload_id: None,
            states: BTreeMap::new(),
            etags: BTreeMap::new(),
        }
    }

    pub fn new_aws(block_size: u64, block_count: Option<u64>, upload_id: String) -> Self {
        Self {
            mode: Mode::Aws,
            block_size,
            block_count,
            upload_id: Some(upload_id),
            states: BTreeMap::new(),
            etags: BTreeMap::new(),
        }
    }

    pub fn mark_in_flight(&mut self, index: u64) {
        self.states.insert(index, BlockState::InFlight);
    }

    pub fn mark_done(&mut self, index: u64, etag: Option<String>) {
        self.states.remove(&index);
        if let Some(etag) = etag {
            self.etags.insert(index, etag);
        }
    }

    pub fn freeze_block_count(&mut self, count: u64) {
        self.block_count = Some(count);
    }

    pub fn progress(&self, blocks_completed: u64) -> Option<f64> {
        let total = self.block_count?;
        if total == 0 {
            return Some(1.0);
        }
        Some(blocks_completed as f64 / total as f64)
    }

    /// Sorted `(partNumber, etag)` pairs, part numbers ascending from 1,
    /// for the AWS completion XML (spec §4.3 Phase 5).
    pub fn ordered_parts(&self) -> Vec<(u32, String)> {
        self.etags
            .iter()
            .map(|(index, etag)| (*index as u32 + 1, etag.clone()))
            .collect()
    }
}

/// AWS block size/count for a known total size (spec §4.3 Phase 3):
/// `blockSize = max(ceil(size / 10000), 5 MiB)`, `blockCount = ceil(size / blockSize)`.
pub fn aws_plan_known_size(size: u64) -> (u64, u64) {
    let raw = (size + 9999) / 10000;
    let block_size = raw.max(AWS_MIN_BLOCK_SIZE);
    let block_count = if size == 0 {
        1
    } else {
        (size + block_size - 1) / block_size
    };
    (block_size, block_count)
}

/// PUT block size/count for a known total size and optional server
/// `Blocksize` (spec §4.3 Phase 3): no 5 MiB floor; single block if the
/// server didn't supply one.
pub fn put_plan_known_size(size: u64, server_block_size: Option<u64>) -> (u64, u64) {
    match server_block_size {
        Some(block_size) if block_size > 0 => {
            let block_count = if size == 0 {
                1
            } else {
                (size + block_size - 1) / block_size
            };
            (block_size, block_count)
        }
        _ => (size.max(1), 1),
    }
}

/// Byte range `[start, end)` (exclusive) for a zero-based block index.
pub fn block_range(index: u64, block_size: u64, size: u64) -> (u64, u64) {
    let start = index * block_size;
    let end = (start + block_size).min(size);
    (start, end)
}
