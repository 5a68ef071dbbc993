//! HTTP adapter for making HTTP requests
//!
//! Backs the generic `http.fetch` tool and any registry tool that resolves
//! to an HTTP endpoint. Inputs: `url` (required), `method`, `headers`,
//! `body`. A JSON object response is returned unwrapped; anything else comes
//! back under `body`, with `status` always present.

use super::*;
use crate::error::NetworkError;
use reqwest::{Client, Method};
use std::str::FromStr;
use std::time::Duration;

/// HTTP adapter for generic HTTP requests
pub struct HttpAdapter {
    adapter_id: String,
    client: Client,
}

impl HttpAdapter {
    /// Create a new HTTP adapter
    pub fn new(adapter_id: String) -> Self {
        Self {
            adapter_id,
            client: Client::builder()
                .timeout(Duration::from_secs(30))
                .build()
                .unwrap_or_default(),
        }
    }

    fn build_request(
        &self,
        inputs: &HashMap<String, Value>,
    ) -> Result<(Method, String, Vec<(String, String)>, Option<Value>)> {
        let url = inputs
            .get("url")
            .and_then(|v| v.as_str())
            .ok_or_else(|| crate::BeemFlowError::adapter("http tool requires 'url'"))?
            .to_string();

        if !url.starts_with("http://") && !url.starts_with("https://") {
            return Err(NetworkError::InvalidUrl(url).into());
        }

        let method_str = inputs
            .get("method")
            .and_then(|v| v.as_str())
            .unwrap_or("GET")
            .to_uppercase();
        let method = Method::from_str(&method_str)
            .map_err(|e| crate::BeemFlowError::adapter(format!("invalid HTTP method: {}", e)))?;

        let headers = inputs
            .get("headers")
            .and_then(|v| v.as_object())
            .map(|obj| {
                obj.iter()
                    .filter_map(|(k, v)| v.as_str().map(|s| (k.clone(), s.to_string())))
                    .collect()
            })
            .unwrap_or_default();

        let body = inputs.get("body").cloned();

        Ok((method, url, headers, body))
    }
}

#[async_trait]
impl Adapter for HttpAdapter {
    fn id(&self) -> &str {
        &self.adapter_id
    }

    async fn execute(
        &self,
        inputs: HashMap<String, Value>,
        ctx: &ExecutionContext,
    ) -> Result<HashMap<String, Value>> {
        let (method, url, headers, body) = self.build_request(&inputs)?;
        let method_str = method.to_string();

        let mut request = self.client.request(method, &url);
        for (k, v) in &headers {
            request = request.header(k, v);
        }
        if let Some(body_val) = body {
            if body_val.is_object() || body_val.is_array() {
                request = request.json(&body_val);
            } else if let Some(s) = body_val.as_str() {
                request = request.body(s.to_string());
            }
        }

        tracing::debug!(%url, method = %method_str, "http adapter request");

        // Bound the request by the caller's cancellation signal
        let response = tokio::select! {
            biased;
            _ = ctx.cancel.cancelled() => return Err(crate::BeemFlowError::Cancelled),
            result = request.send() => result.map_err(|e| {
                crate::BeemFlowError::Network(NetworkError::Http(format!(
                    "{} {}: {}",
                    method_str, url, e
                )))
            })?,
        };

        let status = response.status();
        let body_text = response
            .text()
            .await
            .map_err(|e| crate::BeemFlowError::Network(NetworkError::Http(e.to_string())))?;

        if !status.is_success() {
            return Err(crate::BeemFlowError::Network(NetworkError::Http(format!(
                "HTTP {} {}: status {}: {}",
                method_str,
                url,
                status.as_u16(),
                body_text
            ))));
        }

        let mut result: HashMap<String, Value> =
            match serde_json::from_str::<Value>(&body_text) {
                // JSON object responses are returned unwrapped
                Ok(Value::Object(obj)) => obj.into_iter().collect(),
                // Arrays and primitives come back under "body"
                Ok(other) => [("body".to_string(), other)].into_iter().collect(),
                Err(_) => [("body".to_string(), Value::String(body_text))]
                    .into_iter()
                    .collect(),
            };

        result.insert(
            "status".to_string(),
            Value::Number(status.as_u16().into()),
        );

        Ok(result)
    }
}
