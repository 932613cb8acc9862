use reqwest::{Client, Response, StatusCode};
use serde::de::DeserializeOwned;
use std::env;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum HttpClientError {
    #[error("Request failed: {0}")]
    RequestFailed(String),

    #[error("Service unavailable: {0}")]
    ServiceUnavailable(String),

    #[error("Resource not found: {0}")]
    NotFound(String),

    #[error("Response parsing error: {0}")]
    ParseError(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),
}

impl HttpClientError {
    /// Network-level failures worth retrying later
    pub fn is_transient(&self) -> bool {
        matches!(self, HttpClientError::ServiceUnavailable(_))
    }
}

/// Client for calling sibling marketplace services
#[derive(Clone)]
pub struct ServiceClient {
    client: Client,
    base_url: String,
}

impl ServiceClient {
    // Build a client for a known service, base URL comes from the environment
    pub fn new(service_name: &str, timeout: Duration) -> Result<Self, HttpClientError> {
        let base_url = match service_name {
            "auth" => env::var("AUTH_SERVICE_URL")
                .unwrap_or_else(|_| "http://localhost:3001".to_string()),
            "catalog" => env::var("CATALOG_SERVICE_URL")
                .unwrap_or_else(|_| "http://localhost:3002".to_string()),
            "commerce" => env::var("COMMERCE_SERVICE_URL")
                .unwrap_or_else(|_| "http://localhost:3005".to_string()),
            "notification" => env::var("NOTIFICATION_SERVICE_URL")
                .unwrap_or_else(|_| "http://localhost:3007".to_string()),
            _ => return Err(HttpClientError::ServiceUnavailable(
                format!("Unknown service: {}", service_name)
            )),
        };

        Self::with_base_url(base_url, timeout)
    }

    pub fn with_base_url(base_url: impl Into<String>, timeout: Duration) -> Result<Self, HttpClientError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| HttpClientError::RequestFailed(e.to_string()))?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    // GET request with optional bearer token
    pub async fn get<T: DeserializeOwned>(
        &self,
        endpoint: &str,
        token: Option<&str>,
    ) -> Result<T, HttpClientError> {
        let url = format!("{}{}", self.base_url, endpoint);
        let mut request = self.client.get(&url);

        if let Some(t) = token {
            request = request.header("Authorization", format!("Bearer {}", t));
        }

        let response = request.send().await.map_err(map_send_error)?;

        self.handle_response(response).await
    }

    // POST request with optional bearer token
    pub async fn post<T: DeserializeOwned, B: serde::Serialize>(
        &self,
        endpoint: &str,
        body: &B,
        token: Option<&str>,
    ) -> Result<T, HttpClientError> {
        let url = format!("{}{}", self.base_url, endpoint);
        let mut request = self.client.post(&url).json(body);

        if let Some(t) = token {
            request = request.header("Authorization", format!("Bearer {}", t));
        }

        let response = request.send().await.map_err(map_send_error)?;

        self.handle_response(response).await
    }

    // Handle response and parse JSON
    async fn handle_response<T: DeserializeOwned>(
        &self,
        response: Response,
    ) -> Result<T, HttpClientError> {
        let status = response.status();

        match status {
            StatusCode::OK | StatusCode::CREATED | StatusCode::ACCEPTED => {
                response
                    .json::<T>()
                    .await
                    .map_err(|e| HttpClientError::ParseError(e.to_string()))
            }
            StatusCode::NOT_FOUND => {
                Err(HttpClientError::NotFound(response.url().path().to_string()))
            }
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                Err(HttpClientError::Unauthorized("Token invalid".to_string()))
            }
            s if s.is_server_error() => {
                Err(HttpClientError::ServiceUnavailable(format!("Status: {}", s)))
            }
            _ => {
                let error_text = response
                    .text()
                    .await
                    .unwrap_or_else(|_| "Unknown error".to_string());
                Err(HttpClientError::RequestFailed(error_text))
            }
        }
    }
}

fn map_send_error(err: reqwest::Error) -> HttpClientError {
    if err.is_timeout() || err.is_connect() {
        HttpClientError::ServiceUnavailable(err.to_string())
    } else {
        HttpClientError::RequestFailed(err.to_string())
    }
}
