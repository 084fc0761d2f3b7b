//! Remote-schema execution
//!
//! Remote-schema plan steps forward a sub-request to another GraphQL server
//! over HTTP and splice the requested field back out of the response. The
//! forwarded header set is the one resolved at `connection_init` (handshake
//! headers merged with the init payload); response headers from the remote
//! are dropped, since the WebSocket transport cannot convey them.

use crate::core::error::ExecutionError;
use crate::plan::{RemoteJoins, RemoteStep};
use async_trait::async_trait;
use axum::http::HeaderMap;
use axum::http::header::{CONTENT_LENGTH, HOST};
use serde_json::Value;

/// HTTP client for remote-schema steps
#[derive(Clone)]
pub struct RemoteSchemaClient {
    http: reqwest::Client,
}

impl RemoteSchemaClient {
    pub fn new() -> Self {
        Self {
            http: reqwest::Client::new(),
        }
    }

    /// Execute one remote step and extract the requested field
    pub async fn execute(
        &self,
        step: &RemoteStep,
        forwarded_headers: &HeaderMap,
    ) -> Result<Value, ExecutionError> {
        let mut headers = forwarded_headers.clone();
        headers.remove(HOST);
        headers.remove(CONTENT_LENGTH);

        let response = self
            .http
            .post(&step.endpoint)
            .headers(headers)
            .json(&step.request)
            .send()
            .await
            .map_err(|e| ExecutionError::Remote {
                endpoint: step.endpoint.clone(),
                message: e.to_string(),
            })?;

        let body: Value = response.json().await.map_err(|e| ExecutionError::Remote {
            endpoint: step.endpoint.clone(),
            message: format!("invalid response body: {}", e),
        })?;

        if let Some(errors) = body.get("errors")
            && !errors.is_null()
        {
            return Err(ExecutionError::RemoteErrors {
                endpoint: step.endpoint.clone(),
                errors: errors.clone(),
            });
        }

        let data = body.get("data").cloned().unwrap_or(Value::Null);
        extract_path(data, &step.result_path).map_err(|missing| ExecutionError::Remote {
            endpoint: step.endpoint.clone(),
            message: format!("response is missing field '{}'", missing),
        })
    }
}

impl Default for RemoteSchemaClient {
    fn default() -> Self {
        Self::new()
    }
}

/// Walk a key path into a response, returning the missing key on failure
fn extract_path(mut value: Value, path: &[String]) -> Result<Value, String> {
    for key in path {
        match value {
            Value::Object(mut map) => match map.remove(key) {
                Some(inner) => value = inner,
                None => return Err(key.clone()),
            },
            _ => return Err(key.clone()),
        }
    }
    Ok(value)
}

/// Stitches remote data into a primary step response
#[async_trait]
pub trait RemoteJoinProcessor: Send + Sync {
    async fn process(
        &self,
        response: Value,
        joins: &RemoteJoins,
        forwarded_headers: &HeaderMap,
    ) -> Result<Value, ExecutionError>;
}

/// Processor used when no remote joins are configured; passes data through
pub struct NoopRemoteJoins;

#[async_trait]
impl RemoteJoinProcessor for NoopRemoteJoins {
    async fn process(
        &self,
        response: Value,
        _joins: &RemoteJoins,
        _forwarded_headers: &HeaderMap,
    ) -> Result<Value, ExecutionError> {
        Ok(response)
    }
}
