//! HTTP access to the remote prediction service.
//!
//! [`PredictionApi`] is the seam the dashboard talks through;
//! [`HttpPredictionClient`] is the real implementation. Responses for the
//! same panel can resolve out of order, so every request is stamped with a
//! [`Ticket`] from a [`RequestSequencer`] and only the latest ticket per
//! panel is allowed to update state.

use crate::config::{ApiConfig, PropertyConfig};
use crate::data::{decode_prediction_envelope, DataError, Surface};
use crate::layers::PanelId;
use crate::report::ReportRequest;
use crate::types::{PredictRequest, SurfaceQuery};
use geojson::GeoJson;
use reqwest::Url;
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::str::FromStr;
use thiserror::Error;
use tracing::debug;

/// Boxed future so the trait stays object safe.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("invalid service URL '{0}'")]
    BaseUrl(String),
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("{endpoint} returned HTTP {status}: {body}")]
    Status {
        endpoint: String,
        status: u16,
        body: String,
    },
    #[error("bad response data: {0}")]
    Data(#[from] DataError),
}

pub trait PredictionApi: Send + Sync {
    /// `/feature-vector`: one covariate over the grid.
    fn feature_vector<'a>(&'a self, query: &'a SurfaceQuery) -> BoxFuture<'a, Result<Surface, ApiError>>;

    /// `/air-pollution-concentrations`: baseline prediction and AQI.
    fn air_pollution<'a>(&'a self, query: &'a SurfaceQuery) -> BoxFuture<'a, Result<Surface, ApiError>>;

    /// `/predict`: prediction with scenario adjustments applied.
    fn predict<'a>(&'a self, request: &'a PredictRequest) -> BoxFuture<'a, Result<Surface, ApiError>>;

    /// `/status` liveness probe.
    fn status(&self) -> BoxFuture<'_, Result<(), ApiError>>;

    /// `/generate-report`: PDF bytes for the given selections.
    fn generate_report<'a>(&'a self, request: &'a ReportRequest) -> BoxFuture<'a, Result<Vec<u8>, ApiError>>;
}

pub struct HttpPredictionClient {
    http: reqwest::Client,
    base: Url,
    id_property: Option<String>,
}

impl HttpPredictionClient {
    pub fn new(api: &ApiConfig, properties: &PropertyConfig) -> Result<Self, ApiError> {
        // Url::join drops the last path segment unless the base ends with '/'.
        let mut base_url = api.base_url.trim().to_string();
        if !base_url.ends_with('/') {
            base_url.push('/');
        }
        let base = Url::parse(&base_url).map_err(|_| ApiError::BaseUrl(api.base_url.clone()))?;

        let mut builder = reqwest::Client::builder();
        if let Some(timeout) = api.timeout() {
            builder = builder.timeout(timeout);
        }

        Ok(HttpPredictionClient {
            http: builder.build()?,
            base,
            id_property: Some(properties.grid_id.clone()).filter(|s| !s.is_empty()),
        })
    }

    fn endpoint(&self, path: &str, query: &[(&str, String)]) -> Result<Url, ApiError> {
        let mut url = self
            .base
            .join(path)
            .map_err(|_| ApiError::BaseUrl(format!("{}{}", self.base, path)))?;
        if !query.is_empty() {
            url.query_pairs_mut().extend_pairs(query.iter().map(|(k, v)| (*k, v.as_str())));
        }
        Ok(url)
    }

    async fn get_text(&self, path: &str, query: &[(&str, String)]) -> Result<String, ApiError> {
        let url = self.endpoint(path, query)?;
        debug!("GET {}", url);
        let resp = self.http.get(url).send().await?;
        let status = resp.status();
        let body = resp.text().await?;
        if !status.is_success() {
            return Err(ApiError::Status {
                endpoint: path.to_string(),
                status: status.as_u16(),
                body,
            });
        }
        Ok(body)
    }

    fn decode_surface(&self, body: &str) -> Result<Surface, ApiError> {
        let geojson = GeoJson::from_str(body).map_err(DataError::from)?;
        Ok(Surface::from_geojson_with_id(geojson, self.id_property.as_deref())?)
    }
}

impl PredictionApi for HttpPredictionClient {
    fn feature_vector<'a>(&'a self, query: &'a SurfaceQuery) -> BoxFuture<'a, Result<Surface, ApiError>> {
        Box::pin(async move {
            let body = self.get_text("feature-vector", &query.query_pairs()).await?;
            self.decode_surface(&body)
        })
    }

    fn air_pollution<'a>(&'a self, query: &'a SurfaceQuery) -> BoxFuture<'a, Result<Surface, ApiError>> {
        Box::pin(async move {
            let body = self
                .get_text("air-pollution-concentrations", &query.query_pairs())
                .await?;
            self.decode_surface(&body)
        })
    }

    fn predict<'a>(&'a self, request: &'a PredictRequest) -> BoxFuture<'a, Result<Surface, ApiError>> {
        Box::pin(async move {
            let body = self.get_text("predict", &request.query_pairs()).await?;
            Ok(decode_prediction_envelope(&body)?)
        })
    }

    fn status(&self) -> BoxFuture<'_, Result<(), ApiError>> {
        Box::pin(async move {
            self.get_text("status", &[]).await?;
            Ok(())
        })
    }

    fn generate_report<'a>(&'a self, request: &'a ReportRequest) -> BoxFuture<'a, Result<Vec<u8>, ApiError>> {
        Box::pin(async move {
            let url = self.endpoint("generate-report", &[])?;
            debug!("POST {}", url);
            let resp = self.http.post(url).json(request).send().await?;
            let status = resp.status();
            if !status.is_success() {
                return Err(ApiError::Status {
                    endpoint: "generate-report".to_string(),
                    status: status.as_u16(),
                    body: resp.text().await.unwrap_or_default(),
                });
            }
            Ok(resp.bytes().await?.to_vec())
        })
    }
}

/// Stamp for one in-flight request against a panel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ticket {
    panel: PanelId,
    token: u64,
}

impl Ticket {
    pub fn token(&self) -> u64 {
        self.token
    }
}

/// Issues monotonically increasing tokens and remembers the newest per panel.
#[derive(Debug, Default)]
pub struct RequestSequencer {
    next: u64,
    latest: HashMap<PanelId, u64>,
}

impl RequestSequencer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn issue(&mut self, panel: PanelId) -> Ticket {
        self.next += 1;
        self.latest.insert(panel, self.next);
        Ticket {
            panel,
            token: self.next,
        }
    }

    /// False once a newer ticket has been issued for the same panel.
    pub fn is_current(&self, ticket: &Ticket) -> bool {
        self.latest.get(&ticket.panel) == Some(&ticket.token)
    }
}
