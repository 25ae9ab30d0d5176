//! # HTTP Backend
//!
//! `reqwest` implementation of the remote ports against the store backend.
//!
//! ## Endpoints
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  Port                         Request                                   │
//! │  ────                         ───────                                   │
//! │  get_availability(ids) ─────► GET  {base}/stock?ids=a,b,c               │
//! │  create_sale(payload) ──────► POST {base}/sales                         │
//! │                                 Idempotency-Key: client_sale_id         │
//! │  apply_operation(op) ───────► POST {base}/sync/operations               │
//! │                                 Idempotency-Key: op.id                  │
//! │  probe() ───────────────────► GET  {base}/health                        │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Status Mapping
//! | Outcome                          | RemoteError |
//! |----------------------------------|-------------|
//! | connect error, timeout           | `Network`   |
//! | 5xx, 408, 429                    | `Network`   |
//! | any other 4xx                    | `Rejected`  |
//! | 2xx with an unreadable body      | `Network`   |

use std::collections::HashMap;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use tracing::{debug, warn};
use url::Url;

use till_core::{SalePayload, SaleReceipt, SyncOperation};

use crate::config::PipelineConfig;
use crate::error::{RemoteError, SyncError, SyncResult};
use crate::ports::{ConnectivityProbe, SaleService, StockService};

/// Header carrying the dedup key of a mutating request.
pub const IDEMPOTENCY_HEADER: &str = "Idempotency-Key";

/// One entry of the stock endpoint's response.
#[derive(Debug, Deserialize)]
struct StockLevel {
    product_id: String,
    available: i64,
}

/// Client for the store backend.
#[derive(Debug, Clone)]
pub struct HttpBackend {
    client: Client,
    base_url: Url,
}

impl HttpBackend {
    /// Creates a backend client for `base_url` with a per-request timeout.
    pub fn new(base_url: Url, timeout: Duration) -> SyncResult<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .connect_timeout(timeout)
            .build()
            .map_err(|e| SyncError::InvalidConfig(format!("HTTP client: {e}")))?;

        Ok(HttpBackend { client, base_url })
    }

    /// Creates a backend client from the pipeline configuration.
    pub fn from_config(config: &PipelineConfig) -> SyncResult<Self> {
        Self::new(config.backend_url()?, config.request_timeout())
    }

    fn endpoint(&self, path: &str) -> Result<Url, RemoteError> {
        self.base_url
            .join(path)
            .map_err(|e| RemoteError::rejected(format!("bad endpoint {path}: {e}")))
    }

    async fn send(&self, request: RequestBuilder) -> Result<Response, RemoteError> {
        let response = request
            .send()
            .await
            .map_err(|e| RemoteError::Network(e.to_string()))?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        Err(classify_status(status, body))
    }

    async fn read_json<T: DeserializeOwned>(response: Response) -> Result<T, RemoteError> {
        response
            .json::<T>()
            .await
            .map_err(|e| RemoteError::Network(format!("unreadable response: {e}")))
    }
}

/// Builds the stock lookup URL for `product_ids`.
pub fn stock_url(base_url: &Url, product_ids: &[String]) -> Result<Url, url::ParseError> {
    let mut url = base_url.join("stock")?;
    url.query_pairs_mut()
        .append_pair("ids", &product_ids.join(","));
    Ok(url)
}

/// Maps a non-success HTTP status to a [`RemoteError`].
pub fn classify_status(status: StatusCode, body: String) -> RemoteError {
    let reason = if body.trim().is_empty() {
        status
            .canonical_reason()
            .unwrap_or("request failed")
            .to_string()
    } else {
        body
    };

    if status.is_server_error()
        || status == StatusCode::TOO_MANY_REQUESTS
        || status == StatusCode::REQUEST_TIMEOUT
    {
        RemoteError::Network(format!("{}: {}", status.as_u16(), reason))
    } else {
        RemoteError::Rejected {
            status: Some(status.as_u16()),
            reason,
        }
    }
}

#[async_trait]
impl StockService for HttpBackend {
    async fn get_availability(
        &self,
        product_ids: &[String],
    ) -> Result<HashMap<String, i64>, RemoteError> {
        if product_ids.is_empty() {
            return Ok(HashMap::new());
        }

        let url = stock_url(&self.base_url, product_ids)
            .map_err(|e| RemoteError::rejected(e.to_string()))?;
        let response = self.send(self.client.get(url)).await?;
        let levels: Vec<StockLevel> = Self::read_json(response).await?;

        debug!(requested = product_ids.len(), returned = levels.len(), "Fetched stock levels");
        Ok(levels
            .into_iter()
            .map(|l| (l.product_id, l.available))
            .collect())
    }
}

#[async_trait]
impl SaleService for HttpBackend {
    async fn create_sale(&self, payload: &SalePayload) -> Result<SaleReceipt, RemoteError> {
        let request = self
            .client
            .post(self.endpoint("sales")?)
            .header(IDEMPOTENCY_HEADER, &payload.client_sale_id)
            .json(payload);

        let response = self.send(request).await.map_err(|e| {
            warn!(client_sale_id = %payload.client_sale_id, error = %e, "Sale submission failed");
            e
        })?;
        Self::read_json(response).await
    }

    async fn apply_operation(&self, op: &SyncOperation) -> Result<(), RemoteError> {
        let request = self
            .client
            .post(self.endpoint("sync/operations")?)
            .header(IDEMPOTENCY_HEADER, &op.id)
            .json(op);

        self.send(request).await?;
        Ok(())
    }
}

#[async_trait]
impl ConnectivityProbe for HttpBackend {
    async fn probe(&self) -> Result<Duration, RemoteError> {
        let started = Instant::now();
        self.send(self.client.get(self.endpoint("health")?)).await?;
        Ok(started.elapsed())
    }
}
