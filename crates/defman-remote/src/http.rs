//! HTTP transport: a JSON bundle of definitions behind an `ETag`

use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use reqwest::header::{ETAG, IF_NONE_MATCH};
use serde::{Deserialize, Serialize};

use crate::{Error, FetchRequest, FetchResponse, Fetcher, RemoteArtifact, Result, SourceKind};

/// Wire format served by HTTP sources.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteBundle {
    pub definitions: Vec<BundleEntry>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BundleEntry {
    /// File stem of the definition.
    pub name: String,
    /// Full Markdown content, front matter included.
    pub content: String,
}

/// Fetches [`RemoteBundle`]s with `If-None-Match`.
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    http: reqwest::Client,
}

impl HttpFetcher {
    /// Build a fetcher with a per-request timeout.
    pub fn new(timeout: Duration) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("defman/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self { http })
    }

    /// Wrap an existing client.
    pub fn with_client(http: reqwest::Client) -> Self {
        Self { http }
    }
}

#[async_trait]
impl Fetcher for HttpFetcher {
    fn kind(&self) -> SourceKind {
        SourceKind::Http
    }

    async fn fetch(&self, request: &FetchRequest) -> Result<FetchResponse> {
        let mut builder = self.http.get(&request.url);
        if let Some(etag) = &request.etag {
            builder = builder.header(IF_NONE_MATCH, etag);
        }

        tracing::debug!(url = %request.url, etag = ?request.etag, "Fetching bundle");
        let response = builder.send().await?;
        interpret_response(&request.url, response).await
    }
}

/// Map an HTTP response onto a [`FetchResponse`].
pub async fn interpret_response(url: &str, response: reqwest::Response) -> Result<FetchResponse> {
    let status = response.status();
    if status == StatusCode::NOT_MODIFIED {
        return Ok(FetchResponse::NotModified);
    }
    if !status.is_success() {
        return Err(Error::Status {
            url: url.to_string(),
            status: status.as_u16(),
        });
    }

    let etag = response
        .headers()
        .get(ETAG)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    let body = response.bytes().await?;
    let bundle: RemoteBundle =
        serde_json::from_slice(&body).map_err(|e| Error::InvalidBundle {
            url: url.to_string(),
            message: e.to_string(),
        })?;

    let artifacts = bundle
        .definitions
        .into_iter()
        .map(|entry| RemoteArtifact {
            name: entry.name,
            content: entry.content.into_bytes(),
        })
        .collect();

    Ok(FetchResponse::Modified { etag, artifacts })
}
