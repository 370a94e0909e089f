//! Batch uploader (spec §4.4): runs N per-file uploaders with bounded
//! concurrency, aggregates progress, surfaces partial failure.

use crate::adapter::HttpAdapter;
use crate::config::clamp_batch_concurrency;
use crate::context::Context;
use crate::error::Error;
use crate::file_uploader::{upload_file, UploadOptions};
use crate::input::{FileInput, InputOverrides};
use crate::rest::{Envelope, RestTransport};
use crate::xml::XmlParser;
use futures::stream::{self, StreamExt};
use serde_json::Value;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

/// `{fileIndex, fileCount, result}`.
pub struct FileCompletion {
    pub file_index: usize,
    pub file_count: usize,
    pub result: Result<Envelope, Error>,
}

/// `{fileIndex, fileCount, fileProgress, totalProgress}`.
pub struct BatchProgress {
    pub file_index: usize,
    pub file_count: usize,
    pub file_progress: f64,
    pub total_progress: f64,
}

pub type FileCompleteCallback = Box<dyn Fn(FileCompletion) + Send + Sync>;
pub type BatchProgressCallback = Box<dyn Fn(BatchProgress) + Send + Sync>;
/// `onError(err, {phase: "file", fileIndex, attempt})`. Resolving
/// retries the whole file from scratch.
pub type BatchErrorCallback = Box<dyn Fn(String, usize, u32) -> futures::future::BoxFuture<'static, bool> + Send + Sync>;

#[derive(Default)]
pub struct BatchOptions {
    pub concurrency: Option<usize>,
    pub on_file_complete: Option<FileCompleteCallback>,
    pub on_progress: Option<BatchProgressCallback>,
    pub on_error: Option<BatchErrorCallback>,
}

/// One result slot: either the completion envelope or the terminal
/// error, per spec §4.4's `results[i]` shape (`{error}` on failure).
pub enum FileResult {
    Ok(Envelope),
    Err(Error),
}

/// Carries `{errors[], results[]}` when any file in the batch failed.
pub struct BatchError {
    pub errors: Vec<Error>,
    pub results: Vec<FileResult>,
}

impl std::fmt::Debug for BatchError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "BatchError({} of {} files failed)", self.errors.len(), self.results.len())
    }
}

impl std::fmt::Display for BatchError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} of {} files failed to upload", self.errors.len(), self.results.len())
    }
}

impl std::error::Error for BatchError {}

/// One batch input: a factory (since most `FileInput` shapes are
/// read-once and must be rebuilt for a whole-file retry attempt) plus
/// its per-file overrides.
pub struct BatchInput {
    pub make_input: Box<dyn FnMut() -> FileInput + Send>,
    pub overrides: InputOverrides,
}

/// One file's whole-file retry loop: uploads once; on failure, asks
/// `on_error` (phase `"file"`) whether to retry the entire file from
/// scratch.
async fn upload_file_with_whole_file_retry<T, H>(
    transport: &T,
    http: &H,
    xml_parser: &dyn XmlParser,
    endpoint: &str,
    file_index: usize,
    batch_input: &mut BatchInput,
    method: &str,
    params: &Value,
    context: &Context,
    on_error: &Option<BatchErrorCallback>,
) -> Result<Envelope, Error>
where
    T: RestTransport,
    H: HttpAdapter,
{
    let mut attempt: u32 = 1;
    loop {
        let result = upload_file(
            transport,
            http,
            xml_parser,
            endpoint,
            (batch_input.make_input)(),
            batch_input.overrides.clone(),
            method,
            params.clone(),
            context.clone(),
            UploadOptions::default(),
        )
        .await;

        match result {
            Ok(envelope) => return Ok(envelope),
            Err(err) => {
                let should_retry = match on_error {
                    Some(cb) => cb(err.to_string(), file_index, attempt).await,
                    None => false,
                };
                if !should_retry {
                    log::warn!("batch: file {} failed on attempt {}, giving up: {}", file_index, attempt, err);
                    return Err(err);
                }
                log::debug!("batch: file {} failed on attempt {}, retrying whole file: {}", file_index, attempt, err);
                attempt += 1;
            }
        }
    }
}

/// Uploads an ordered set of files to the same endpoint (spec §4.4).
/// `results` preserves input order regardless of completion order;
/// partial failure does not stop the remaining files.
pub async fn upload_many_files<T, H>(
    transport: &T,
    http: &H,
    xml_parser: &dyn XmlParser,
    endpoint: &str,
    inputs: Vec<BatchInput>,
    method: &str,
    params: Value,
    context: Context,
    options: BatchOptions,
) -> Result<Vec<FileResult>, BatchError>
where
    T: RestTransport,
    H: HttpAdapter,
{
    let concurrency = clamp_batch_concurrency(options.concurrency);
    let file_count = inputs.len();
    let on_file_complete = &options.on_file_complete;
    let on_progress = &options.on_progress;
    let on_error = &options.on_error;

    let files_done = AtomicU64::new(0);
    let results_slot: Mutex<Vec<Option<FileResult>>> = Mutex::new((0..file_count).map(|_| None).collect());

    log::debug!("upload_many_files: {} files, concurrency {}", file_count, concurrency);

    let tasks = inputs.into_iter().enumerate().map(|(file_index, mut batch_input)| {
        let params = &params;
        let context = &context;
        let files_done = &files_done;
        let results_slot = &results_slot;
        async move {
            let result = upload_file_with_whole_file_retry(
                transport,
                http,
                xml_parser,
                endpoint,
                file_index,
                &mut batch_input,
                method,
                params,
                context,
                on_error,
            )
            .await;

            let done = files_done.fetch_add(1, Ordering::SeqCst) + 1;
            if let Some(cb) = on_progress {
                cb(BatchProgress {
                    file_index,
                    file_count,
                    file_progress: 1.0,
                    total_progress: done as f64 / file_count.max(1) as f64,
                });
            }

            if let Some(cb) = on_file_complete {
                cb(FileCompletion {
                    file_index,
                    file_count,
                    result: result.clone(),
                });
            }

            let slot = match result {
                Ok(envelope) => FileResult::Ok(envelope),
                Err(err) => FileResult::Err(err),
            };
            results_slot.lock().unwrap()[file_index] = Some(slot);
        }
    });

    stream::iter(tasks).buffer_unordered(concurrency).collect::<Vec<()>>().await;

    let results: Vec<FileResult> = results_slot
        .into_inner()
        .unwrap()
        .into_iter()
        .map(|slot| slot.expect("every file index is written exactly once"))
        .collect();

    let errors: Vec<Error> = results
        .iter()
        .filter_map(|r| match r {
            FileResult::Err(e) => Some(e.clone()),
            FileResult::Ok(_) => None,
        })
        .collect();

    if errors.is_empty() {
        Ok(results)
    } else {
        log::warn!("upload_many_files: {} of {} files failed", errors.len(), file_count);
        Err(BatchError { errors, results })
    }
}
