use crate::config::PredictionServiceConfig;
use iris_contract::{ErrorDetail, HealthStatus, PredictionRequest, PredictionResponse, RootInfo};
use serde::{de::DeserializeOwned, Serialize};
use std::future::Future;
use thiserror::Error;
use tokio::time::{sleep, Duration, Instant};
use tracing::instrument;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum PredictionClientError {
    #[error("Failed to build HTTP client: {0}")]
    Client(String),
    #[error("Unable to reach the prediction service: {0}")]
    Connectivity(String),
    #[error("Prediction service returned {status}: {detail}")]
    Service { status: u16, detail: String },
    #[error("Invalid response from the prediction service: {0}")]
    InvalidResponse(String),
    #[error("Prediction service not ready after {0} attempts")]
    MaxRetriesExceeded(u32),
}

/// A successful prediction with its measured round-trip time.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TimedPrediction {
    pub result: PredictionResponse,
    pub response_time_ms: f64,
}

/// Anything able to answer one prediction request.
pub trait Predictor: Send + Sync {
    fn predict(
        &self,
        request: PredictionRequest,
    ) -> impl Future<Output = Result<TimedPrediction, PredictionClientError>> + Send;
}

#[derive(Debug, Clone, Serialize)]
pub struct ProbeReport {
    pub service_url: String,
    pub reachable: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response_time_ms: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

pub struct PredictionClient {
    client: reqwest::Client,
    base_url: String,
}

impl PredictionClient {
    pub fn new(config: &PredictionServiceConfig) -> Result<Self, PredictionClientError> {
        Self::with_base_url(config.get_address(), config)
    }

    pub fn with_base_url(
        base_url: impl Into<String>,
        config: &PredictionServiceConfig,
    ) -> Result<Self, PredictionClientError> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout())
            .connect_timeout(config.connect_timeout())
            .build()
            .map_err(|e| PredictionClientError::Client(e.to_string()))?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    #[instrument(skip(self))]
    pub async fn predict(
        &self,
        request: PredictionRequest,
    ) -> Result<TimedPrediction, PredictionClientError> {
        let start = Instant::now();
        let response = self
            .client
            .post(format!("{}/predict/", self.base_url))
            .json(&request)
            .send()
            .await
            .map_err(|e| PredictionClientError::Connectivity(e.to_string()))?;

        let status = response.status();
        let body = response
            .bytes()
            .await
            .map_err(|e| PredictionClientError::Connectivity(e.to_string()))?;
        let response_time_ms = start.elapsed().as_secs_f64() * 1000.0;

        if !status.is_success() {
            let detail = serde_json::from_slice::<ErrorDetail>(&body)
                .map(|e| e.detail)
                .unwrap_or_else(|_| String::from_utf8_lossy(&body).into_owned());
            tracing::warn!(status = status.as_u16(), %detail, "Prediction rejected");
            return Err(PredictionClientError::Service {
                status: status.as_u16(),
                detail,
            });
        }

        let result: PredictionResponse = serde_json::from_slice(&body)
            .map_err(|e| PredictionClientError::InvalidResponse(e.to_string()))?;
        if result.flower_name.trim().is_empty() {
            return Err(PredictionClientError::InvalidResponse(format!(
                "empty label for class {}",
                result.prediction
            )));
        }

        tracing::debug!(
            prediction = result.prediction,
            flower_name = %result.flower_name,
            response_time_ms,
            "Prediction received"
        );

        Ok(TimedPrediction {
            result,
            response_time_ms,
        })
    }

    pub async fn health(&self) -> Result<HealthStatus, PredictionClientError> {
        self.get_json("/health").await
    }

    pub async fn root_info(&self) -> Result<RootInfo, PredictionClientError> {
        self.get_json("/").await
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T, PredictionClientError> {
        let response = self
            .client
            .get(format!("{}{}", self.base_url, path))
            .send()
            .await
            .map_err(|e| PredictionClientError::Connectivity(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(PredictionClientError::Service {
                status: status.as_u16(),
                detail: format!("GET {} failed", path),
            });
        }

        response
            .json::<T>()
            .await
            .map_err(|e| PredictionClientError::InvalidResponse(e.to_string()))
    }

    /// Checks `/health` and `/` on the prediction service. Never fails.
    #[instrument(skip(self))]
    pub async fn probe(&self) -> ProbeReport {
        let mut report = ProbeReport {
            service_url: self.base_url.clone(),
            reachable: false,
            status: None,
            message: None,
            version: None,
            response_time_ms: None,
            error: None,
        };

        let start = Instant::now();
        match self.health().await {
            Ok(health) => {
                report.response_time_ms = Some(start.elapsed().as_secs_f64() * 1000.0);
                report.reachable = true;
                report.status = Some(health.status);
            }
            Err(e) => {
                report.error = Some(e.to_string());
                return report;
            }
        }

        match self.root_info().await {
            Ok(info) => {
                report.message = Some(info.message);
                report.version = Some(info.version);
            }
            Err(e) => report.error = Some(e.to_string()),
        }

        report
    }

    /// Polls `/health` with exponential backoff until the service answers.
    pub async fn wait_until_ready(&self, max_retries: u32) -> Result<(), PredictionClientError> {
        let mut retry_delay = Duration::from_millis(50);
        let max_retry_delay = Duration::from_secs(1);

        for attempt in 1..=max_retries {
            match self.health().await {
                Ok(_) => {
                    tracing::info!("Prediction service ready at {}", self.base_url);
                    return Ok(());
                }
                Err(e) => {
                    tracing::warn!(
                        "Prediction service not ready (attempt {}/{}): {}",
                        attempt,
                        max_retries,
                        e
                    );
                }
            }

            if attempt < max_retries {
                let jitter = rand::random::<f32>() * 0.2 + 0.9;
                sleep(retry_delay.mul_f32(jitter)).await;
                retry_delay = (retry_delay * 2).min(max_retry_delay);
            }
        }

        Err(PredictionClientError::MaxRetriesExceeded(max_retries))
    }
}

impl Predictor for PredictionClient {
    async fn predict(
        &self,
        request: PredictionRequest,
    ) -> Result<TimedPrediction, PredictionClientError> {
        PredictionClient::predict(self, request).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{http::StatusCode, routing::post, Json, Router};
    use tokio::net::TcpListener;

    fn config() -> PredictionServiceConfig {
        PredictionServiceConfig {
            host: "127.0.0.1".into(),
            port: 0,
            timeout_ms: 2_000,
            connect_timeout_ms: 500,
            startup_probe_retries: 2,
        }
    }

    async fn serve(router: Router) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        format!("http://{}", addr)
    }

    async fn closed_port() -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);
        format!("http://{}", addr)
    }

    #[tokio::test]
    async fn test_predict_measures_latency() {
        let router = Router::new().route(
            "/predict/",
            post(|| async {
                Json(PredictionResponse {
                    prediction: 0,
                    flower_name: "Setosa".into(),
                })
            }),
        );
        let client = PredictionClient::with_base_url(serve(router).await, &config())
            .unwrap();

        let timed = client
            .predict(PredictionRequest::new(5.1, 3.5, 1.4, 0.2))
            .await
            .unwrap();

        assert_eq!(timed.result.flower_name, "Setosa");
        assert!(timed.response_time_ms >= 0.0);
    }

    #[tokio::test]
    async fn test_service_error_carries_detail() {
        let router = Router::new().route(
            "/predict/",
            post(|| async {
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    Json(ErrorDetail::new("classifier returned unmapped class id 9")),
                )
            }),
        );
        let client = PredictionClient::with_base_url(serve(router).await, &config())
            .unwrap();

        let err = client
            .predict(PredictionRequest::new(5.1, 3.5, 1.4, 0.2))
            .await
            .unwrap_err();

        assert_eq!(
            err,
            PredictionClientError::Service {
                status: 500,
                detail: "classifier returned unmapped class id 9".into()
            }
        );
    }

    #[tokio::test]
    async fn test_empty_label_is_invalid() {
        let router = Router::new().route(
            "/predict/",
            post(|| async {
                Json(PredictionResponse {
                    prediction: 4,
                    flower_name: "".into(),
                })
            }),
        );
        let client = PredictionClient::with_base_url(serve(router).await, &config())
            .unwrap();

        let err = client
            .predict(PredictionRequest::new(5.1, 3.5, 1.4, 0.2))
            .await
            .unwrap_err();

        assert!(matches!(err, PredictionClientError::InvalidResponse(_)));
    }

    #[tokio::test]
    async fn test_connection_refused_is_connectivity() {
        let client = PredictionClient::with_base_url(closed_port().await, &config())
            .unwrap();

        let err = client
            .predict(PredictionRequest::new(5.1, 3.5, 1.4, 0.2))
            .await
            .unwrap_err();

        assert!(matches!(err, PredictionClientError::Connectivity(_)));
    }

    #[tokio::test]
    async fn test_wait_until_ready_gives_up() {
        let client = PredictionClient::with_base_url(closed_port().await, &config())
            .unwrap();

        let result = client.wait_until_ready(2).await;

        assert_eq!(result, Err(PredictionClientError::MaxRetriesExceeded(2)));
    }

    #[tokio::test]
    async fn test_probe_unreachable_service() {
        let client = PredictionClient::with_base_url(closed_port().await, &config())
            .unwrap();

        let report = client.probe().await;

        assert!(!report.reachable);
        assert!(report.error.is_some());
        assert!(report.version.is_none());
    }
}
