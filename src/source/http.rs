// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! HTTP sources: the data API backends and the static snapshot host.
//!
//! Backend routes:
//! - `GET  {base}/api/data/{category}` → JSON array of records
//! - `PUT  {base}/api/data/{category}` with a JSON array body
//! - `GET  {base}/api/health` → `{"status": "ok", "database": {...}}`
//! - `GET  {base}/api/status` (cheaper probe, used when `/api/health` is 404)
//!
//! Snapshot routes: `GET {base}/{category}.json` for each candidate base.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::Deserialize;
use serde_json::Value;
use tracing::debug;

use super::traits::{DataSource, ProbeOutcome, SourceError, SourceKind};
use crate::record::{Category, Payload};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

fn build_client() -> Result<reqwest::Client, SourceError> {
    reqwest::Client::builder()
        .connect_timeout(CONNECT_TIMEOUT)
        .build()
        .map_err(|e| SourceError::Network(format!("failed to build HTTP client: {}", e)))
}

fn network(err: reqwest::Error) -> SourceError {
    SourceError::Network(err.to_string())
}

async fn read_payload(res: reqwest::Response) -> Result<Payload, SourceError> {
    let status = res.status();
    if !status.is_success() {
        return Err(SourceError::Status(status.as_u16()));
    }
    let bytes = res.bytes().await.map_err(network)?;
    Ok(Payload::from_slice(&bytes)?)
}

#[derive(Debug, Deserialize)]
struct HealthBody {
    status: String,
    #[serde(default)]
    database: Option<DatabaseHealth>,
}

#[derive(Debug, Deserialize)]
struct DatabaseHealth {
    status: String,
    #[serde(default, rename = "responseTime")]
    response_time: Option<Value>,
}

fn is_ok_word(status: &str) -> bool {
    matches!(
        status.to_ascii_lowercase().as_str(),
        "ok" | "healthy" | "connected" | "up"
    )
}

/// Database-backed data API (primary or secondary).
pub struct HttpBackend {
    kind: SourceKind,
    base_url: String,
    http: reqwest::Client,
}

impl HttpBackend {
    pub fn new(kind: SourceKind, base_url: impl Into<String>) -> Result<Self, SourceError> {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Ok(Self {
            kind,
            base_url,
            http: build_client()?,
        })
    }

    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn data_url(&self, category: &Category) -> String {
        format!("{}/api/data/{}", self.base_url, category)
    }

    async fn probe_status_route(&self) -> Result<ProbeOutcome, SourceError> {
        let url = format!("{}/api/status", self.base_url);
        let res = self.http.get(url).send().await.map_err(network)?;
        if res.status().is_success() {
            Ok(ProbeOutcome::Healthy)
        } else {
            Err(SourceError::Status(res.status().as_u16()))
        }
    }
}

#[async_trait]
impl DataSource for HttpBackend {
    fn kind(&self) -> SourceKind {
        self.kind
    }

    fn describe(&self) -> String {
        self.base_url.clone()
    }

    async fn fetch(&self, category: &Category) -> Result<Payload, SourceError> {
        let res = self
            .http
            .get(self.data_url(category))
            .send()
            .await
            .map_err(network)?;
        read_payload(res).await
    }

    async fn push(&self, category: &Category, payload: &Payload) -> Result<(), SourceError> {
        let res = self
            .http
            .put(self.data_url(category))
            .json(payload)
            .send()
            .await
            .map_err(network)?;
        let status = res.status();
        if status.is_success() {
            Ok(())
        } else {
            Err(SourceError::Status(status.as_u16()))
        }
    }

    async fn probe(&self) -> Result<ProbeOutcome, SourceError> {
        let start = Instant::now();
        let url = format!("{}/api/health", self.base_url);
        let res = self.http.get(url).send().await.map_err(network)?;

        let status = res.status();
        if status == StatusCode::NOT_FOUND {
            return self.probe_status_route().await;
        }
        if !status.is_success() {
            return Err(SourceError::Status(status.as_u16()));
        }

        let bytes = res.bytes().await.map_err(network)?;
        let body: HealthBody = match serde_json::from_slice(&bytes) {
            Ok(body) => body,
            // Answered 2xx but not with a health document
            Err(_) => return Ok(ProbeOutcome::Degraded),
        };

        let db_ok = body.database.as_ref().map_or(true, |db| is_ok_word(&db.status));
        debug!(
            source = %self.kind,
            status = %body.status,
            db_response_time = ?body.database.as_ref().and_then(|db| db.response_time.as_ref()),
            latency_ms = start.elapsed().as_millis() as u64,
            "Health probe answered"
        );

        if is_ok_word(&body.status) && db_ok {
            Ok(ProbeOutcome::Healthy)
        } else {
            Ok(ProbeOutcome::Degraded)
        }
    }
}

/// Read-only static snapshot files, tried across candidate base paths.
pub struct StaticSnapshotSource {
    bases: Vec<String>,
    http: reqwest::Client,
}

impl StaticSnapshotSource {
    pub fn new<I, S>(bases: I) -> Result<Self, SourceError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let bases = bases
            .into_iter()
            .map(|b| b.into().trim_end_matches('/').to_string())
            .collect();
        Ok(Self {
            bases,
            http: build_client()?,
        })
    }

    #[must_use]
    pub fn bases(&self) -> &[String] {
        &self.bases
    }
}

#[async_trait]
impl DataSource for StaticSnapshotSource {
    fn kind(&self) -> SourceKind {
        SourceKind::Static
    }

    fn describe(&self) -> String {
        self.bases.join(", ")
    }

    async fn fetch(&self, category: &Category) -> Result<Payload, SourceError> {
        let mut last_err = SourceError::Network("no static snapshot bases configured".into());

        for base in &self.bases {
            let url = format!("{}/{}.json", base, category);
            let result = match self.http.get(&url).send().await {
                Ok(res) => read_payload(res).await,
                Err(e) => Err(network(e)),
            };
            match result {
                Ok(payload) => return Ok(payload),
                Err(e) => {
                    debug!(url = %url, error = %e, "Static snapshot candidate failed");
                    last_err = e;
                }
            }
        }
        Err(last_err)
    }

    async fn probe(&self) -> Result<ProbeOutcome, SourceError> {
        let Some(base) = self.bases.first() else {
            return Err(SourceError::Network("no static snapshot bases configured".into()));
        };
        let res = self
            .http
            .get(format!("{}/", base))
            .send()
            .await
            .map_err(network)?;
        // Any answer short of a server error means the file host is up
        if res.status().is_server_error() {
            Err(SourceError::Status(res.status().as_u16()))
        } else {
            Ok(ProbeOutcome::Healthy)
        }
    }
}
