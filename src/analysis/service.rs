//! Client for the external analysis service.
//!
//! The coordinator only sees the [`AnalysisService`] trait, which keeps the
//! HTTP details here and lets tests substitute a scripted service.

use crate::catalog::{AnalystOption, ModelOption};
use crate::models::{RunRequest, Signal};
use async_trait::async_trait;
use chrono::NaiveDate;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

/// Failure talking to the analysis service.
#[derive(Debug, Clone, Error)]
pub enum ServiceError {
    #[error("Cannot connect to analysis service at {0}")]
    Connect(String),

    #[error("Analysis request timed out after {0:?}")]
    Timeout(Duration),

    #[error("Analysis service returned HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Failed to decode analysis response: {0}")]
    Decode(String),

    #[error("Failed to send analysis request: {0}")]
    Transport(String),
}

/// Body of `POST /api/analysis`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalysisRequestBody<'a> {
    pub tickers: &'a [String],
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start_date: Option<NaiveDate>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end_date: Option<NaiveDate>,
    pub model_name: &'a str,
    pub selected_analysts: &'a [String],
    pub initial_cash: f64,
    pub is_crypto: bool,
    pub show_reasoning: bool,
    pub run_round_table: bool,
}

impl<'a> From<&'a RunRequest> for AnalysisRequestBody<'a> {
    fn from(request: &'a RunRequest) -> Self {
        let range = request.date_range();
        let flags = request.flags();
        Self {
            tickers: request.subjects(),
            start_date: range.start,
            end_date: range.end,
            model_name: request.model_id(),
            selected_analysts: request.agent_ids(),
            initial_cash: request.initial_cash(),
            is_crypto: flags.is_crypto,
            show_reasoning: flags.show_reasoning,
            run_round_table: flags.run_round_table,
        }
    }
}

/// Successful response: a ticker-keyed analysis map.
///
/// Decoding is lenient per entry. A ticker or analyst entry that does not
/// decode is dropped and logged, so one bad entry costs only its own subject.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AnalysisResponse {
    #[serde(default, alias = "as_of_date", alias = "asOfDate", deserialize_with = "lenient")]
    pub date: Option<NaiveDate>,
    #[serde(default, alias = "results", alias = "signals", deserialize_with = "lenient_map")]
    pub analysis: BTreeMap<String, TickerAnalysis>,
}

/// Service output for one ticker.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TickerAnalysis {
    #[serde(default, alias = "analyst_signals", alias = "analysts", deserialize_with = "lenient_map")]
    pub signals: BTreeMap<String, AgentVerdict>,
    #[serde(default, alias = "overallSignal", deserialize_with = "lenient")]
    pub overall_signal: Option<Signal>,
    #[serde(default, deserialize_with = "lenient")]
    pub confidence: Option<f64>,
}

/// One analyst's output as the service reports it.
#[derive(Debug, Clone, Deserialize)]
pub struct AgentVerdict {
    pub signal: Signal,
    #[serde(default, deserialize_with = "lenient")]
    pub confidence: Option<f64>,
    #[serde(default)]
    pub reasoning: Option<Value>,
}

/// Optional field that reads as `None` when present but unusable.
fn lenient<'de, D, T>(deserializer: D) -> Result<Option<T>, D::Error>
where
    D: Deserializer<'de>,
    T: DeserializeOwned,
{
    let raw = Value::deserialize(deserializer)?;
    Ok(serde_json::from_value(raw).ok())
}

/// Keyed map that keeps only the entries that decode.
fn lenient_map<'de, D, T>(deserializer: D) -> Result<BTreeMap<String, T>, D::Error>
where
    D: Deserializer<'de>,
    T: DeserializeOwned,
{
    let Value::Object(raw) = Value::deserialize(deserializer)? else {
        return Ok(BTreeMap::new());
    };

    Ok(raw
        .into_iter()
        .filter_map(|(key, value)| match serde_json::from_value(value) {
            Ok(entry) => Some((key, entry)),
            Err(e) => {
                warn!("Ignoring unusable entry '{}' in analysis response: {}", key, e);
                None
            }
        })
        .collect())
}

impl AgentVerdict {
    /// Reasoning as display text; structured reasoning is kept as compact JSON.
    pub fn reasoning_text(&self) -> String {
        match &self.reasoning {
            None | Some(Value::Null) => String::new(),
            Some(Value::String(text)) => text.clone(),
            Some(other) => other.to_string(),
        }
    }
}

/// The single outbound seam used by the submission coordinator.
#[async_trait]
pub trait AnalysisService: Send + Sync {
    async fn run_analysis(&self, request: &RunRequest) -> Result<AnalysisResponse, ServiceError>;
}

/// Settings for the HTTP client.
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    pub base_url: String,
    pub timeout_seconds: u64,
}

/// `reqwest`-backed analysis service.
pub struct HttpAnalysisService {
    config: ServiceConfig,
    http_client: reqwest::Client,
}

impl HttpAnalysisService {
    pub fn new(config: ServiceConfig) -> Result<Self, ServiceError> {
        let http_client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .build()
            .map_err(|e| ServiceError::Transport(e.to_string()))?;

        info!("Analysis service at {}", config.base_url);

        Ok(Self {
            config,
            http_client,
        })
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}{}", self.config.base_url.trim_end_matches('/'), path)
    }

    fn map_send_error(&self, e: reqwest::Error) -> ServiceError {
        if e.is_timeout() {
            ServiceError::Timeout(Duration::from_secs(self.config.timeout_seconds))
        } else if e.is_connect() {
            ServiceError::Connect(self.config.base_url.clone())
        } else {
            ServiceError::Transport(e.to_string())
        }
    }

    async fn get_json<T: serde::de::DeserializeOwned>(&self, path: &str) -> Result<T, ServiceError> {
        let response = self
            .http_client
            .get(self.endpoint(path))
            .send()
            .await
            .map_err(|e| self.map_send_error(e))?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(ServiceError::Status { status, body });
        }

        response
            .json()
            .await
            .map_err(|e| ServiceError::Decode(e.to_string()))
    }

    /// `GET /api/models`.
    pub async fn fetch_models(&self) -> Result<Vec<ModelOption>, ServiceError> {
        self.get_json("/api/models").await
    }

    /// `GET /api/analysts`.
    pub async fn fetch_analysts(&self) -> Result<Vec<AnalystOption>, ServiceError> {
        self.get_json("/api/analysts").await
    }
}

#[async_trait]
impl AnalysisService for HttpAnalysisService {
    async fn run_analysis(&self, request: &RunRequest) -> Result<AnalysisResponse, ServiceError> {
        let url = self.endpoint("/api/analysis");
        let body = AnalysisRequestBody::from(request);

        debug!(
            "POST {} ({} tickers, {} analysts)",
            url,
            body.tickers.len(),
            body.selected_analysts.len()
        );

        let response = self
            .http_client
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| self.map_send_error(e))?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(ServiceError::Status { status, body });
        }

        response
            .json::<AnalysisResponse>()
            .await
            .map_err(|e| ServiceError::Decode(e.to_string()))
    }
}
