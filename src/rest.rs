use crate::context::Context;
use crate::error::{Error, Result};
use async_trait::async_trait;
use serde_json::{json, Value};

/// Backend response envelope: `{ result: "success"|"redirect"|..., data: any }`.
#[derive(Debug, Clone, serde::Deserialize)]
pub struct Envelope {
    pub result: String,
    #[serde(default)]
    pub data: Value,
}

impl Envelope {
    pub fn is_success(&self) -> bool {
        self.result == "success" || self.result == "redirect"
    }
}

/// The external REST collaborator spec.md assumes: `rest(endpoint, verb,
/// params, ctx) -> envelope`. Generalized into a trait so the engine can
/// be driven in tests without a network.
#[async_trait]
pub trait RestTransport: Send + Sync {
    async fn call(&self, endpoint: &str, method: &str, params: Value, ctx: &Context) -> Result<Envelope>;
}

/// Context key whose presence triggers `Authorization: Session <token>`.
pub const TOKEN_CONTEXT_KEY: &str = "token";

/// `reqwest`-backed implementation hitting `<base_url>/<endpoint>`.
pub struct ReqwestRestTransport {
    client: reqwest::Client,
    base_url: String,
}

impl ReqwestRestTransport {
    pub fn new(client: reqwest::Client, base_url: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into(),
        }
    }

    /// Merges `params` with `_ctx[<k>]=<urlencoded v>` entries per spec §6,
    /// as a single JSON body object.
    fn build_body(params: Value, ctx: &Context) -> Value {
        let mut map = match params {
            Value::Object(m) => m,
            Value::Null => serde_json::Map::new(),
            other => {
                let mut m = serde_json::Map::new();
                m.insert("value".to_string(), other);
                m
            }
        };
        for (k, v) in ctx {
            if k == TOKEN_CONTEXT_KEY {
                continue;
            }
            let encoded: String = url::form_urlencoded::byte_serialize(v.as_bytes()).collect();
            map.insert(format!("_ctx[{}]", k), Value::String(encoded));
        }
        Value::Object(map)
    }
}

#[async_trait]
impl RestTransport for ReqwestRestTransport {
    async fn call(&self, endpoint: &str, method: &str, params: Value, ctx: &Context) -> Result<Envelope> {
        let url = format!("{}/{}", self.base_url.trim_end_matches('/'), endpoint.trim_start_matches('/'));
        let body = Self::build_body(params, ctx);

        let mut request = self
            .client
            .request(method.parse().unwrap_or(reqwest::Method::POST), &url)
            .json(&body);

        if let Some(token) = ctx.get(TOKEN_CONTEXT_KEY) {
            request = request.header("Authorization", format!("Session {}", token));
        }

        let response = request.send().await.map_err(Error::from)?;
        let envelope: Envelope = response.json().await.map_err(Error::from)?;

        if !envelope.is_success() {
            return Err(Error::Envelope(format!("{:?}", envelope.data)));
        }

        Ok(envelope)
    }
}

/// Convenience constructor for the JSON params most handshake calls send.
pub fn params_object(pairs: impl IntoIterator<Item = (&'static str, Value)>) -> Value {
    let mut map = serde_json::Map::new();
    for (k, v) in pairs {
        map.insert(k.to_string(), v);
    }
    Value::Object(map)
}

pub fn empty_params() -> Value {
    json!({})
}
