//! HTTP catalog client (JSON over reqwest, basic credentials on every call).

use std::fmt;
use std::time::{Duration, Instant};

use epgsync_core::{Properties, RecordId, RecordKind};
use metrics::{counter, histogram};
use reqwest::{RequestBuilder, Response, StatusCode};
use serde_json::Value as Json;
use tracing::debug;

use crate::{first_of_list, Catalog, CatalogError, CatalogResult, RemoteRecord, Stream, UpdateOptions};

const USER_AGENT: &str = concat!("epgsync/", env!("CARGO_PKG_VERSION"));
const REQUEST_TIMEOUT_SECS: u64 = 30;

#[derive(Clone)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials").field("username", &self.username).field("password", &"***").finish()
    }
}

pub struct HttpCatalog {
    http: reqwest::Client,
    base: String,
    credentials: Credentials,
}

impl HttpCatalog {
    pub fn new(base_url: &str, credentials: Credentials) -> CatalogResult<Self> {
        let base = base_url.trim_end_matches('/').to_string();
        if !(base.starts_with("http://") || base.starts_with("https://")) {
            return Err(CatalogError::Config(format!("catalog url must be http(s): {}", base_url)));
        }
        let http = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()
            .map_err(|e| CatalogError::Config(e.to_string()))?;
        Ok(Self { http, base, credentials })
    }

    fn url(&self, path: &str) -> String { format!("{}/{}", self.base, path) }

    fn authed(&self, rb: RequestBuilder) -> RequestBuilder {
        rb.basic_auth(&self.credentials.username, Some(&self.credentials.password))
    }

    async fn send(&self, op: &'static str, kind: &str, rb: RequestBuilder) -> CatalogResult<Response> {
        let t0 = Instant::now();
        let res = self.authed(rb).send().await;
        histogram!("catalog_request_ms", t0.elapsed().as_secs_f64() * 1000.0, "op" => op);
        match res {
            Ok(r) => Ok(r),
            Err(e) => {
                counter!("catalog_request_errors_total", 1, "op" => op);
                Err(CatalogError::Transport(format!("{} {}: {}", op, kind, e)))
            }
        }
    }

    async fn check(op: &'static str, kind: &str, resp: Response) -> CatalogResult<Json> {
        let status = resp.status();
        if !status.is_success() {
            counter!("catalog_request_errors_total", 1, "op" => op);
            let body = resp.text().await.unwrap_or_default();
            let kind = kind.to_string();
            let status = status.as_u16();
            return Err(if status == 400 || status == 422 {
                CatalogError::Validation { op, kind, status, body }
            } else {
                CatalogError::Status { op, kind, status, body }
            });
        }
        resp.json::<Json>().await.map_err(|e| CatalogError::Decode(format!("{} {}: {}", op, kind, e)))
    }
}

#[async_trait::async_trait]
impl Catalog for HttpCatalog {
    async fn fetch_by_external_id(&self, kind: RecordKind, external_id: &str) -> CatalogResult<Option<RemoteRecord>> {
        let url = self.url(kind.plural());
        debug!(kind = %kind, external_id = %external_id, url = %url, "catalog: fetch");
        let rb = self.http.get(&url).query(&[("externalId", external_id)]);
        let resp = self.send("fetch", kind.as_str(), rb).await?;
        if resp.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let body = Self::check("fetch", kind.as_str(), resp).await?;
        first_of_list(body)?.map(RemoteRecord::from_json).transpose()
    }

    async fn create(&self, kind: RecordKind, properties: &Properties) -> CatalogResult<RemoteRecord> {
        let url = self.url(kind.plural());
        debug!(kind = %kind, url = %url, "catalog: create");
        let rb = self.http.post(&url).json(properties);
        let resp = self.send("create", kind.as_str(), rb).await?;
        RemoteRecord::from_json(Self::check("create", kind.as_str(), resp).await?)
    }

    async fn update(
        &self,
        kind: RecordKind,
        id: &RecordId,
        properties: &Properties,
        opts: UpdateOptions,
    ) -> CatalogResult<RemoteRecord> {
        let url = self.url(&format!("{}/{}", kind.plural(), id));
        debug!(kind = %kind, id = %id, vodify = opts.vodify, url = %url, "catalog: update");
        let mut rb = self.http.patch(&url).json(properties);
        if opts.vodify {
            rb = rb.query(&[("vodify", "true")]);
        }
        let resp = self.send("update", kind.as_str(), rb).await?;
        RemoteRecord::from_json(Self::check("update", kind.as_str(), resp).await?)
    }

    async fn fetch_primary_stream(&self, channel_id: &str) -> CatalogResult<Option<Stream>> {
        let url = self.url(&format!("channels/{}/streams", channel_id));
        debug!(channel = %channel_id, url = %url, "catalog: primary stream");
        let rb = self.http.get(&url).query(&[("primary", "true")]);
        let resp = self.send("stream", "stream", rb).await?;
        if resp.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let body = Self::check("stream", "stream", resp).await?;
        first_of_list(body)?.map(Stream::from_json).transpose()
    }
}
