//! AWS signer relay (spec §4.2): builds the canonical string locally,
//! has the backend sign it, then issues the signed S3 request.
//!
//! Grounded on the pack's manual-SigV4 implementations
//! (`KaguraMei-uploader-wasm`, `other_examples/...klbfw-rs__src-upload`)
//! for the canonical-string shape. Unlike those, which hold a secret
//! key and compute the HMAC chain locally, this crate never sees AWS
//! credentials: the backend signs on the client's behalf, so no local
//! HMAC is performed (see DESIGN.md).

use crate::adapter::HttpAdapter;
use crate::context::Context;
use crate::error::{Error, Result};
use crate::rest::RestTransport;
use chrono::Utc;
use serde_json::json;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;

pub const EMPTY_BODY_SHA256: &str =
    "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AwsBucket {
    pub host: String,
    pub name: String,
    pub region: String,
}

pub struct S3Response {
    pub status: u16,
    pub headers: std::collections::HashMap<String, String>,
    pub body: bytes::Bytes,
}

impl S3Response {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

pub fn body_sha256(body: &[u8]) -> String {
    if body.is_empty() {
        EMPTY_BODY_SHA256.to_string()
    } else {
        hex::encode(Sha256::digest(body))
    }
}

/// `(timestamp, date)` as `("YYYYMMDDThhmmssZ", "YYYYMMDD")`.
pub fn amz_timestamp() -> (String, String) {
    let now = Utc::now();
    let timestamp = now.format("%Y%m%dT%H%M%SZ").to_string();
    let date = timestamp[..8].to_string();
    (timestamp, date)
}

/// Builds the canonical string described in spec §4.2, lines 1-11.
/// `extra_headers` must already be lowercase `x-...` header names other
/// than `x-amz-content-sha256`/`x-amz-date` (those two are always added
/// here since every request needs them).
pub fn canonical_string(
    method: &str,
    bucket: &AwsBucket,
    key: &str,
    query: &str,
    timestamp: &str,
    date: &str,
    content_sha256: &str,
    extra_headers: &BTreeMap<String, String>,
) -> String {
    let clean_key = key.trim_start_matches('/');

    let mut all_headers = extra_headers.clone();
    all_headers.insert("x-amz-content-sha256".to_string(), content_sha256.to_string());
    all_headers.insert("x-amz-date".to_string(), timestamp.to_string());

    let mut lines = vec![
        "AWS4-HMAC-SHA256".to_string(),
        timestamp.to_string(),
        format!("{}/{}/s3/aws4_request", date, bucket.region),
        method.to_string(),
        format!("/{}/{}", bucket.name, clean_key),
        query.to_string(),
        format!("host:{}", bucket.host),
    ];
    for (name, value) in &all_headers {
        lines.push(format!("{}:{}", name, value));
    }
    lines.push(String::new());
    let mut signed_names = vec!["host".to_string()];
    signed_names.extend(all_headers.keys().cloned());
    lines.push(signed_names.join(";"));
    lines.push(content_sha256.to_string());
    lines.join("\n")
}

pub struct AwsSignerRelay<'a, T: RestTransport, H: HttpAdapter> {
    transport: &'a T,
    http: &'a H,
    handle_id: String,
    bucket: AwsBucket,
    key: String,
    ctx: Context,
}

impl<'a, T: RestTransport, H: HttpAdapter> AwsSignerRelay<'a, T, H> {
    pub fn new(
        transport: &'a T,
        http: &'a H,
        handle_id: impl Into<String>,
        bucket: AwsBucket,
        key: impl Into<String>,
        ctx: Context,
    ) -> Self {
        Self {
            transport,
            http,
            handle_id: handle_id.into(),
            bucket,
            key: key.into(),
            ctx,
        }
    }

    pub fn object_url(&self, query: &str) -> String {
        let clean_key = self.key.trim_start_matches('/');
        if query.is_empty() {
            format!("https://{}/{}/{}", self.bucket.host, self.bucket.name, clean_key)
        } else {
            format!(
                "https://{}/{}/{}?{}",
                self.bucket.host, self.bucket.name, clean_key, query
            )
        }
    }

    /// Computes the canonical string, has the backend sign it, and
    /// returns the `x-amz-*`/`Authorization` headers to send with the
    /// actual S3 request. `extra_signed_headers` are additional
    /// lowercase `x-...` header names/values folded into the canonical
    /// string (e.g. `x-amz-acl` on initiate).
    async fn sign(
        &self,
        method: &str,
        query: &str,
        body: &[u8],
        extra_signed_headers: &BTreeMap<String, String>,
    ) -> Result<Vec<(String, String)>> {
        let (timestamp, date) = amz_timestamp();
        let content_sha256 = body_sha256(body);

        let canonical = canonical_string(
            method,
            &self.bucket,
            &self.key,
            query,
            &timestamp,
            &date,
            &content_sha256,
            extra_signed_headers,
        );

        let params = json!({ "headers": canonical });
        let endpoint = format!("Cloud/Aws/Bucket/Upload/{}:signV4", self.handle_id);
        let envelope = self
            .transport
            .call(&endpoint, "POST", params, &self.ctx)
            .await
            .map_err(|e| Error::SignerRelayFailed(e.to_string()))?;

        if !envelope.is_success() {
            return Err(Error::SignerRelayFailed(format!("{:?}", envelope.data)));
        }

        let authorization = envelope
            .data
            .get("authorization")
            .and_then(|v| v.as_str())
            .ok_or_else(|| Error::SignerRelayFailed("missing authorization in response".to_string()))?
            .to_string();

        let mut headers = vec![
            ("x-amz-content-sha256".to_string(), content_sha256),
            ("x-amz-date".to_string(), timestamp),
        ];
        headers.extend(extra_signed_headers.iter().map(|(k, v)| (k.clone(), v.clone())));
        headers.push(("Authorization".to_string(), authorization));
        Ok(headers)
    }

    /// Signs and issues a request against the S3 object this relay was
    /// constructed for. `headers` may mix unsigned headers (e.g.
    /// `Content-Type`, sent as-is) with `x-...` headers (folded into the
    /// canonical string and sent).
    pub async fn request(
        &self,
        method: &str,
        query: &str,
        body: Vec<u8>,
        headers: Vec<(String, String)>,
    ) -> Result<S3Response> {
        let mut extra_signed = BTreeMap::new();
        let mut unsigned = Vec::new();
        for (name, value) in headers {
            if name.to_lowercase().starts_with("x-") {
                extra_signed.insert(name.to_lowercase(), value);
            } else {
                unsigned.push((name, value));
            }
        }

        let mut all_headers = self.sign(method, query, &body, &extra_signed).await?;
        all_headers.extend(unsigned);

        let url = self.object_url(query);
        let response = self
            .http
            .http_request(&url, method, all_headers, body)
            .await
            .map_err(Error::from)?;

        Ok(S3Response {
            status: response.status,
            headers: response.headers,
            body: response.body,
        })
    }
}
