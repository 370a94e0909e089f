//! Per-file uploader (spec §4.3): handshake, plan, block dispatch,
//! completion. The state machine `Init -> Handshaking -> Planning ->
//! (AwsInitiating ->)? Uploading -> Finalizing -> (Handling ->)? Done`
//! is expressed as straight-line code; each arrow is a suspension point.

use crate::adapter::{ByteStream, ChunkedReader, HttpAdapter, RandomAccessSource};
use crate::callbacks::{with_retry, ErrorCallback, ProgressCallback};
use crate::config::BLOCK_CONCURRENCY;
use crate::context::Context;
use crate::error::{Error, Phase, Result};
use crate::input::{normalize, FileBody, FileDescriptor, FileInput, InputOverrides};
use crate::plan::{aws_plan_known_size, block_range, put_plan_known_size, UploadInfo, UploadPlan};
use crate::rest::{Envelope, RestTransport};
use crate::signer::AwsSignerRelay;
use crate::xml::{build_complete_multipart_xml, XmlParser};
use futures::stream::{FuturesUnordered, StreamExt};
use serde_json::{Map, Value};
use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Default)]
pub struct UploadOptions {
    pub on_progress: Option<ProgressCallback>,
    pub on_error: Option<ErrorCallback>,
}

/// Reads from whichever known-size source the descriptor carries,
/// without the dispatch loop caring which one it is. Holds only
/// references, so it's cheaply `Copy`able into each concurrent block's
/// future.
#[derive(Clone, Copy)]
enum KnownSource<'a> {
    Bytes(&'a bytes::Bytes),
    RandomAccess(&'a dyn RandomAccessSource),
}

impl KnownSource<'_> {
    async fn read(&self, start: u64, end: u64) -> std::io::Result<bytes::Bytes> {
        match self {
            KnownSource::Bytes(b) => {
                if start > end || end > b.len() as u64 {
                    return Err(std::io::Error::new(std::io::ErrorKind::InvalidInput, "slice out of range"));
                }
                Ok(b.slice(start as usize..end as usize))
            }
            KnownSource::RandomAccess(source) => source.slice(start, end).await,
        }
    }
}

fn merged_handshake_params(params: &Value, descriptor: &FileDescriptor) -> Value {
    let mut map = match params {
        Value::Object(m) => m.clone(),
        _ => Map::new(),
    };
    map.insert("filename".to_string(), Value::String(descriptor.name.clone()));
    map.insert(
        "size".to_string(),
        descriptor.size.map(Value::from).unwrap_or(Value::Null),
    );
    map.insert("type".to_string(), Value::String(descriptor.content_type.clone()));
    map.insert(
        "lastModifiedSeconds".to_string(),
        Value::from(descriptor.last_modified_seconds),
    );
    Value::Object(map)
}

async fn call_rest<T: RestTransport>(
    transport: &T,
    endpoint: &str,
    method: &str,
    params: Value,
    ctx: &Context,
) -> std::result::Result<Envelope, String> {
    transport.call(endpoint, method, params, ctx).await.map_err(|e| e.to_string())
}

async fn upload_put_block<H: HttpAdapter>(
    http: &H,
    put_url: &str,
    content_type: &str,
    body: bytes::Bytes,
    range: Option<(u64, u64)>,
) -> Result<()> {
    let mut headers = vec![("Content-Type".to_string(), content_type.to_string())];
    if let Some((start, end)) = range {
        headers.push(("Content-Range".to_string(), format!("bytes {}-{}/*", start, end)));
    }
    let resp = http
        .http_request(put_url, "PUT", headers, body.to_vec())
        .await
        .map_err(Error::from)?;
    if !resp.is_success() {
        return Err(Error::BlockUploadHttpError {
            status: resp.status,
            status_text: resp.text(),
        });
    }
    Ok(())
}

async fn upload_aws_block<T: RestTransport, H: HttpAdapter>(
    signer: &AwsSignerRelay<'_, T, H>,
    index: u64,
    upload_id: &str,
    body: bytes::Bytes,
) -> Result<String> {
    let query = format!("partNumber={}&uploadId={}", index + 1, upload_id);
    let resp = signer.request("PUT", &query, body.to_vec(), vec![]).await?;
    if !resp.is_success() {
        return Err(Error::BlockUploadHttpError {
            status: resp.status,
            status_text: resp.text(),
        });
    }
    resp.header("ETag")
        .map(|s| s.to_string())
        .ok_or_else(|| Error::BlockUploadHttpError {
            status: resp.status,
            status_text: "S3 part response carried no ETag".to_string(),
        })
}

/// What a block upload is dispatched against; built once per file from
/// the resolved `UploadInfo`.
enum DispatchTarget<'a, T: RestTransport, H: HttpAdapter> {
    Put {
        http: &'a H,
        put_url: &'a str,
        content_type: &'a str,
    },
    Aws {
        signer: &'a AwsSignerRelay<'a, T, H>,
        upload_id: &'a str,
    },
}

async fn upload_one_block<T: RestTransport, H: HttpAdapter>(
    index: u64,
    body: bytes::Bytes,
    multi_block: bool,
    start: u64,
    end_exclusive: u64,
    target: &DispatchTarget<'_, T, H>,
) -> Result<Option<String>> {
    match target {
        DispatchTarget::Put {
            http,
            put_url,
            content_type,
        } => {
            let range = if multi_block {
                Some((start, end_exclusive.saturating_sub(1)))
            } else {
                None
            };
            upload_put_block(*http, put_url, content_type, body, range).await?;
            Ok(None)
        }
        DispatchTarget::Aws { signer, upload_id } => {
            let etag = upload_aws_block(signer, index, upload_id, body).await?;
            Ok(Some(etag))
        }
    }
}

fn record_block_result(
    plan: &mut UploadPlan,
    index: u64,
    result: Result<Option<String>>,
    completed: &AtomicU64,
    block_count: u64,
    on_progress: &Option<ProgressCallback>,
) -> Result<()> {
    let etag = result?;
    plan.mark_done(index, etag);
    let done = completed.fetch_add(1, Ordering::SeqCst) + 1;
    if let Some(cb) = on_progress {
        cb(done as f64 / block_count.max(1) as f64);
    }
    Ok(())
}

/// Known-size dispatch (bytes / random-access): produces indices
/// `0..blockCount` up front, bounded to `BLOCK_CONCURRENCY` in flight.
async fn dispatch_known_size<T: RestTransport, H: HttpAdapter>(
    source: KnownSource<'_>,
    size: u64,
    plan: &mut UploadPlan,
    on_error: &Option<ErrorCallback>,
    on_progress: &Option<ProgressCallback>,
    target: &DispatchTarget<'_, T, H>,
) -> Result<()> {
    let block_count = plan.block_count.expect("known-size plans always have a block count");
    let multi_block = block_count > 1;
    let completed = AtomicU64::new(0);
    let mut in_flight = FuturesUnordered::new();

    for index in 0..block_count {
        let (start, end) = block_range(index, plan.block_size, size);
        plan.mark_in_flight(index);

        in_flight.push(async move {
            let result = with_retry(Phase::Upload, Some(index), on_error, move |_attempt| async move {
                let body = source
                    .read(start, end)
                    .await
                    .map_err(|e| Error::StreamReadError(e.to_string()))?;
                upload_one_block(index, body, multi_block, start, end, target).await
            })
            .await;
            (index, result)
        });

        if in_flight.len() >= BLOCK_CONCURRENCY {
            if let Some((idx, result)) = in_flight.next().await {
                record_block_result(plan, idx, result, &completed, block_count, on_progress)?;
            }
        }
    }

    while let Some((idx, result)) = in_flight.next().await {
        record_block_result(plan, idx, result, &completed, block_count, on_progress)?;
    }

    Ok(())
}

/// Streaming dispatch (spec §4.3 Phase 4): reads are serial, uploads run
/// up to `BLOCK_CONCURRENCY` in parallel, `blockCount` freezes at
/// end-of-stream. Progress is suppressed entirely until then, per the
/// spec's explicit permission to do so, then a single final `1.0` fires.
async fn dispatch_streaming<T: RestTransport, H: HttpAdapter>(
    stream: Box<dyn ByteStream>,
    block_size: u64,
    plan: &mut UploadPlan,
    on_error: &Option<ErrorCallback>,
    on_progress: &Option<ProgressCallback>,
    target: &DispatchTarget<'_, T, H>,
) -> Result<()> {
    let mut reader = ChunkedReader::new(stream);
    let mut index: u64 = 0;
    let mut in_flight = FuturesUnordered::new();

    loop {
        while in_flight.len() >= BLOCK_CONCURRENCY {
            if let Some((idx, result)) = in_flight.next().await {
                let etag = result?;
                plan.mark_done(idx, etag);
            }
        }

        match reader.read_chunk(block_size as usize).await {
            Ok(Some(chunk)) => {
                let start = index * block_size;
                let end = start + chunk.len() as u64;
                let idx = index;
                index += 1;
                plan.mark_in_flight(idx);

                in_flight.push(async move {
                    let result = with_retry(Phase::Upload, Some(idx), on_error, |_attempt| {
                        let chunk = chunk.clone();
                        async move { upload_one_block(idx, chunk, true, start, end, target).await }
                    })
                    .await;
                    (idx, result)
                });
            }
            Ok(None) => break,
            Err(e) => return Err(Error::StreamReadError(e.to_string())),
        }
    }

    while let Some((idx, result)) = in_flight.next().await {
        let etag = result?;
        plan.mark_done(idx, etag);
    }

    plan.freeze_block_count(index);
    if let Some(cb) = on_progress {
        cb(1.0);
    }
    Ok(())
}

async fn dispatch_blocks<T: RestTransport, H: HttpAdapter>(
    body: FileBody,
    size: Option<u64>,
    plan: &mut UploadPlan,
    on_error: &Option<ErrorCallback>,
    on_progress: &Option<ProgressCallback>,
    target: &DispatchTarget<'_, T, H>,
) -> Result<()> {
    match body {
        FileBody::Bytes(bytes) => {
            let size = size.expect("bytes body always has known size");
            dispatch_known_size(KnownSource::Bytes(&bytes), size, plan, on_error, on_progress, target).await
        }
        FileBody::RandomAccess(source) => {
            let size = size.expect("random-access body always has known size");
            dispatch_known_size(KnownSource::RandomAccess(source.as_ref()), size, plan, on_error, on_progress, target).await
        }
        FileBody::Stream(stream) => dispatch_streaming(stream, plan.block_size, plan, on_error, on_progress, target).await,
    }
}

/// Uploads one file. `endpoint` is the handshake endpoint; `method` is
/// the handshake HTTP verb (spec default `"POST"`).
pub async fn upload_file<T: RestTransport, H: HttpAdapter>(
    transport: &T,
    http: &H,
    xml_parser: &dyn XmlParser,
    endpoint: &str,
    input: FileInput,
    overrides: InputOverrides,
    method: &str,
    params: Value,
    context: Context,
    options: UploadOptions,
) -> Result<Envelope> {
    let descriptor = normalize(input, overrides);
    let merged_params = merged_handshake_params(&params, &descriptor);
    let on_error = options.on_error;
    let on_progress = options.on_progress;

    log::debug!("upload_file: handshaking {} ({} bytes)", descriptor.name, descriptor.size.map_or("?".to_string(), |s| s.to_string()));

    // Phase 2 - Handshake
    let handshake_envelope = with_retry(Phase::Init, None, &on_error, |_attempt| async {
        call_rest(transport, endpoint, method, merged_params.clone(), &context)
            .await
            .map_err(Error::HandshakeFailed)
    })
    .await?;

    let info = UploadInfo::from_handshake_data(&handshake_envelope.data).ok_or(Error::ProtocolUnrecognized)?;

    let FileDescriptor {
        content_type,
        size,
        body,
        ..
    } = descriptor;

    match info {
        UploadInfo::Put {
            put_url,
            complete_endpoint,
            block_size: server_block_size,
        } => {
            let (block_size, block_count) = match size {
                Some(size) => {
                    let (bs, bc) = put_plan_known_size(size, server_block_size);
                    (bs, Some(bc))
                }
                None => (crate::plan::STREAMING_BLOCK_SIZE, None),
            };
            log::debug!("upload_file: PUT protocol, {:?} blocks of {} bytes", block_count, block_size);
            let mut plan = UploadPlan::new_put(block_size, block_count);
            let target = DispatchTarget::Put {
                http,
                put_url: &put_url,
                content_type: &content_type,
            };

            dispatch_blocks(body, size, &mut plan, &on_error, &on_progress, &target).await?;

            // Phase 5 - Completion (PUT)
            let envelope = with_retry(Phase::Complete, None, &on_error, |_attempt| async {
                call_rest(transport, &complete_endpoint, "POST", Value::Object(Map::new()), &context)
                    .await
                    .map_err(Error::CompleteFailed)
            })
            .await?;

            log::info!("upload_file: PUT upload complete");
            Ok(envelope)
        }
        UploadInfo::Aws { handle_id, bucket, key } => {
            let (block_size, block_count) = match size {
                Some(size) => {
                    let (bs, bc) = aws_plan_known_size(size);
                    (bs, Some(bc))
                }
                None => (crate::plan::STREAMING_BLOCK_SIZE, None),
            };

            log::debug!("upload_file: AWS protocol, handle {}, {:?} blocks of {} bytes", handle_id, block_count, block_size);
            let signer = AwsSignerRelay::new(transport, http, handle_id.clone(), bucket, key, context.clone());

            let upload_id = with_retry(Phase::Init, None, &on_error, |_attempt| async {
                let resp = signer
                    .request(
                        "POST",
                        "uploads=",
                        Vec::new(),
                        vec![
                            ("Content-Type".to_string(), content_type.clone()),
                            ("X-Amz-Acl".to_string(), "private".to_string()),
                        ],
                    )
                    .await
                    .map_err(|e| Error::AwsInitiateFailed(e.to_string()))?;
                if !resp.is_success() {
                    return Err(Error::AwsInitiateFailed(format!("status {}", resp.status)));
                }
                xml_parser
                    .first_text(&resp.text(), "UploadId")
                    .ok_or_else(|| Error::AwsInitiateFailed("response XML carried no UploadId".to_string()))
            })
            .await?;
            log::debug!("upload_file: AWS multipart initiated, uploadId={}", upload_id);

            let mut plan = UploadPlan::new_aws(block_size, block_count, upload_id.clone());
            let target = DispatchTarget::Aws {
                signer: &signer,
                upload_id: &upload_id,
            };

            dispatch_blocks(body, size, &mut plan, &on_error, &on_progress, &target).await?;

            // Phase 5 - Completion (AWS)
            let xml = build_complete_multipart_xml(&plan.ordered_parts());
            let query = format!("uploadId={}", upload_id);

            with_retry(Phase::Complete, None, &on_error, |_attempt| async {
                let resp = signer
                    .request("POST", &query, xml.clone().into_bytes(), vec![])
                    .await
                    .map_err(|e| Error::CompleteFailed(e.to_string()))?;
                if !resp.is_success() {
                    return Err(Error::CompleteFailed(format!("status {}: {}", resp.status, resp.text())));
                }
                Ok(())
            })
            .await?;
            log::debug!("upload_file: AWS multipart completed, uploadId={}", upload_id);

            let handle_complete_endpoint = format!("Cloud/Aws/Bucket/Upload/{}:handleComplete", handle_id);
            let envelope = with_retry(Phase::HandleComplete, None, &on_error, |_attempt| async {
                call_rest(transport, &handle_complete_endpoint, "POST", Value::Object(Map::new()), &context)
                    .await
                    .map_err(Error::HandleCompleteFailed)
            })
            .await?;
            log::info!("upload_file: AWS upload complete");

            Ok(envelope)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::{HttpResponse, InMemorySource};
    use crate::xml::QuickXmlParser;
    use async_trait::async_trait;
    use bytes::Bytes;
    use std::collections::HashMap;
    use std::sync::Mutex;

    /// In-memory `RestTransport` fake driven by a queue of canned
    /// envelopes keyed by endpoint, recording every call it receives.
    struct FakeTransport {
        responses: Mutex<HashMap<String, std::collections::VecDeque<std::result::Result<Envelope, String>>>>,
        calls: Mutex<Vec<(String, String, Value)>>,
    }

    impl FakeTransport {
        fn new() -> Self {
            Self {
                responses: Mutex::new(HashMap::new()),
                calls: Mutex::new(Vec::new()),
            }
        }

        fn push(&self, endpoint: &str, response: std::result::Result<Envelope, String>) {
            self.responses
                .lock()
                .unwrap()
                .entry(endpoint.to_string())
                .or_default()
                .push_back(response);
        }
    }

    #[async_trait]
    impl RestTransport for FakeTransport {
        async fn call(&self, endpoint: &str, method: &str, params: Value, _ctx: &Context) -> Result<Envelope> {
            self.calls.lock().unwrap().push((endpoint.to_string(), method.to_string(), params));
            let mut responses = self.responses.lock().unwrap();
            let queue = responses.entry(endpoint.to_string()).or_default();
            match queue.pop_front() {
                Some(Ok(envelope)) => Ok(envelope),
                Some(Err(msg)) => Err(Error::Envelope(msg)),
                None => panic!("no canned response for endpoint {endpoint}"),
            }
        }
    }

    /// In-memory `HttpAdapter` fake returning canned statuses/headers per
    /// URL, recording every request it receives.
    struct FakeHttp {
        responses: Mutex<HashMap<String, std::collections::VecDeque<(u16, HashMap<String, String>, Vec<u8>)>>>,
        calls: Mutex<Vec<(String, String, Vec<u8>)>>,
    }

    impl FakeHttp {
        fn new() -> Self {
            Self {
                responses: Mutex::new(HashMap::new()),
                calls: Mutex::new(Vec::new()),
            }
        }

        fn push(&self, url_suffix: &str, status: u16, headers: HashMap<String, String>, body: Vec<u8>) {
            self.responses
                .lock()
                .unwrap()
                .entry(url_suffix.to_string())
                .or_default()
                .push_back((status, headers, body));
        }
    }

    #[async_trait]
    impl HttpAdapter for FakeHttp {
        async fn http_request(
            &self,
            url: &str,
            method: &str,
            _headers: Vec<(String, String)>,
            body: Vec<u8>,
        ) -> std::result::Result<HttpResponse, reqwest::Error> {
            self.calls.lock().unwrap().push((url.to_string(), method.to_string(), body));
            let mut responses = self.responses.lock().unwrap();
            for (suffix, queue) in responses.iter_mut() {
                if url.contains(suffix.as_str()) {
                    let (status, headers, body) = queue.pop_front().expect("no canned response left");
                    return Ok(HttpResponse {
                        status,
                        headers,
                        body: Bytes::from(body),
                    });
                }
            }
            panic!("no canned response matching url {url}");
        }
    }

    fn success_envelope(data: Value) -> std::result::Result<Envelope, String> {
        Ok(Envelope {
            result: "success".to_string(),
            data,
        })
    }

    #[tokio::test]
    async fn put_single_block_happy_path() {
        let transport = FakeTransport::new();
        transport.push(
            "upload",
            success_envelope(serde_json::json!({
                "PUT": "https://srv/u/1",
                "Complete": "Blob/Upload/X:handleComplete",
            })),
        );
        transport.push("Blob/Upload/X:handleComplete", success_envelope(serde_json::json!({"ok": true})));

        let http = FakeHttp::new();
        http.push("/u/1", 200, HashMap::new(), Vec::new());

        let xml_parser = QuickXmlParser;
        let input = FileInput::Bytes(Bytes::from_static(b"Hello, World!"));
        let overrides = InputOverrides {
            filename: Some("hello.txt".to_string()),
            content_type: Some("text/plain".to_string()),
        };

        let result = upload_file(
            &transport,
            &http,
            &xml_parser,
            "upload",
            input,
            overrides,
            "POST",
            Value::Object(Map::new()),
            Context::new(),
            UploadOptions::default(),
        )
        .await
        .unwrap();

        assert_eq!(result.data["ok"], true);

        let http_calls = http.calls.lock().unwrap();
        assert_eq!(http_calls.len(), 1);
        assert_eq!(http_calls[0].2, b"Hello, World!".to_vec());

        let rest_calls = transport.calls.lock().unwrap();
        assert_eq!(rest_calls[0].0, "upload");
        assert_eq!(rest_calls[0].2["filename"], "hello.txt");
        assert_eq!(rest_calls[0].2["size"], 13);
        assert_eq!(rest_calls[1].0, "Blob/Upload/X:handleComplete");
    }

    #[tokio::test]
    async fn put_multi_block_splits_on_server_blocksize() {
        let transport = FakeTransport::new();
        transport.push(
            "upload",
            success_envelope(serde_json::json!({
                "PUT": "https://srv/u/1",
                "Complete": "complete-ep",
                "Blocksize": 32768,
            })),
        );
        transport.push("complete-ep", success_envelope(Value::Null));

        let http = FakeHttp::new();
        http.push("/u/1", 200, HashMap::new(), Vec::new());
        http.push("/u/1", 200, HashMap::new(), Vec::new());

        let xml_parser = QuickXmlParser;
        let data = vec![7u8; 65536];
        let input = FileInput::Bytes(Bytes::from(data));

        upload_file(
            &transport,
            &http,
            &xml_parser,
            "upload",
            input,
            InputOverrides::default(),
            "POST",
            Value::Object(Map::new()),
            Context::new(),
            UploadOptions::default(),
        )
        .await
        .unwrap();

        let http_calls = http.calls.lock().unwrap();
        assert_eq!(http_calls.len(), 2);
        for (_, _, body) in http_calls.iter() {
            assert_eq!(body.len(), 32768);
        }
    }

    #[tokio::test]
    async fn retries_block_once_on_onerror_resolution() {
        let transport = FakeTransport::new();
        transport.push(
            "upload",
            success_envelope(serde_json::json!({ "PUT": "https://srv/u/1", "Complete": "complete-ep" })),
        );
        transport.push("complete-ep", success_envelope(Value::Null));

        let http = FakeHttp::new();
        http.push("/u/1", 500, HashMap::new(), b"boom".to_vec());
        http.push("/u/1", 200, HashMap::new(), Vec::new());

        let xml_parser = QuickXmlParser;
        let input = FileInput::Bytes(Bytes::from_static(b"abcd"));

        let on_error: ErrorCallback = Box::new(|_msg, _ctx| Box::pin(async { true }));

        upload_file(
            &transport,
            &http,
            &xml_parser,
            "upload",
            input,
            InputOverrides::default(),
            "POST",
            Value::Object(Map::new()),
            Context::new(),
            UploadOptions {
                on_progress: None,
                on_error: Some(on_error),
            },
        )
        .await
        .unwrap();

        let http_calls = http.calls.lock().unwrap();
        assert_eq!(http_calls.len(), 2);
        assert_eq!(http_calls[0].2, http_calls[1].2);
    }

    #[tokio::test]
    async fn fatal_block_failure_without_onerror_skips_complete() {
        let transport = FakeTransport::new();
        transport.push(
            "upload",
            success_envelope(serde_json::json!({ "PUT": "https://srv/u/1", "Complete": "complete-ep" })),
        );

        let http = FakeHttp::new();
        http.push("/u/1", 500, HashMap::new(), b"boom".to_vec());

        let xml_parser = QuickXmlParser;
        let input = FileInput::Bytes(Bytes::from_static(b"abcd"));

        let result = upload_file(
            &transport,
            &http,
            &xml_parser,
            "upload",
            input,
            InputOverrides::default(),
            "POST",
            Value::Object(Map::new()),
            Context::new(),
            UploadOptions::default(),
        )
        .await;

        assert!(matches!(result, Err(Error::BlockUploadHttpError { status: 500, .. })));
        assert_eq!(http.calls.lock().unwrap().len(), 1);
        assert!(transport.calls.lock().unwrap().iter().all(|(ep, ..)| ep != "complete-ep"));
    }

    #[tokio::test]
    async fn aws_small_file_runs_full_multipart_lifecycle() {
        let transport = FakeTransport::new();
        transport.push(
            "upload",
            success_envelope(serde_json::json!({
                "Cloud_Aws_Bucket_Upload__": "handle-1",
                "Bucket_Endpoint": { "Host": "bucket.s3.amazonaws.com", "Name": "bucket", "Region": "us-east-1" },
                "Key": "uploads/file.bin",
            })),
        );
        transport.push(
            "Cloud/Aws/Bucket/Upload/handle-1:signV4",
            success_envelope(serde_json::json!({ "authorization": "AWS4-HMAC-SHA256 Credential=x" })),
        );
        transport.push(
            "Cloud/Aws/Bucket/Upload/handle-1:signV4",
            success_envelope(serde_json::json!({ "authorization": "AWS4-HMAC-SHA256 Credential=x" })),
        );
        transport.push(
            "Cloud/Aws/Bucket/Upload/handle-1:signV4",
            success_envelope(serde_json::json!({ "authorization": "AWS4-HMAC-SHA256 Credential=x" })),
        );
        transport.push(
            "Cloud/Aws/Bucket/Upload/handle-1:handleComplete",
            success_envelope(serde_json::json!({ "ok": true })),
        );

        let http = FakeHttp::new();
        http.push(
            "bucket.s3.amazonaws.com",
            200,
            HashMap::new(),
            b"<InitiateMultipartUploadResult><UploadId>upload-xyz</UploadId></InitiateMultipartUploadResult>".to_vec(),
        );
        let mut etag_headers = HashMap::new();
        etag_headers.insert("ETag".to_string(), "\"e1\"".to_string());
        http.push("bucket.s3.amazonaws.com", 200, etag_headers, Vec::new());
        http.push("bucket.s3.amazonaws.com", 200, HashMap::new(), Vec::new());

        let xml_parser = QuickXmlParser;
        let input = FileInput::Bytes(Bytes::from(vec![1u8; 1024]));

        let result = upload_file(
            &transport,
            &http,
            &xml_parser,
            "upload",
            input,
            InputOverrides::default(),
            "POST",
            Value::Object(Map::new()),
            Context::new(),
            UploadOptions::default(),
        )
        .await
        .unwrap();

        assert_eq!(result.data["ok"], true);
        assert_eq!(http.calls.lock().unwrap().len(), 3);
    }

    #[tokio::test]
    async fn random_access_source_uploads_known_size_blocks() {
        let transport = FakeTransport::new();
        transport.push(
            "upload",
            success_envelope(serde_json::json!({ "PUT": "https://srv/u/1", "Complete": "complete-ep" })),
        );
        transport.push("complete-ep", success_envelope(Value::Null));

        let http = FakeHttp::new();
        http.push("/u/1", 200, HashMap::new(), Vec::new());

        let xml_parser = QuickXmlParser;
        let source = Box::new(InMemorySource::new(Bytes::from_static(b"random-access-bytes")));
        let meta = crate::input::NativeMetadata::default();
        let input = FileInput::RandomAccess(source, meta);

        upload_file(
            &transport,
            &http,
            &xml_parser,
            "upload",
            input,
            InputOverrides::default(),
            "POST",
            Value::Object(Map::new()),
            Context::new(),
            UploadOptions::default(),
        )
        .await
        .unwrap();

        let http_calls = http.calls.lock().unwrap();
        assert_eq!(http_calls[0].2, b"random-access-bytes".to_vec());
    }

    #[tokio::test]
    async fn unrecognized_protocol_is_fatal_and_skips_callbacks() {
        let transport = FakeTransport::new();
        transport.push("upload", success_envelope(serde_json::json!({ "unexpected": true })));
        let http = FakeHttp::new();
        let xml_parser = QuickXmlParser;
        let input = FileInput::Bytes(Bytes::from_static(b"x"));

        let result = upload_file(
            &transport,
            &http,
            &xml_parser,
            "upload",
            input,
            InputOverrides::default(),
            "POST",
            Value::Object(Map::new()),
            Context::new(),
            UploadOptions::default(),
        )
        .await;

        assert!(matches!(result, Err(Error::ProtocolUnrecognized)));
    }
}
