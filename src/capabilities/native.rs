use std::time::Duration;

use super::http::{HttpError, HttpHeaders, HttpMethod, HttpRequest, HttpResponse, HttpTransport};

/// `HttpTransport` backed by reqwest, for desktop shells and harnesses.
#[derive(Debug, Clone, Default)]
pub struct ReqwestTransport {
    client: reqwest::Client,
}

impl ReqwestTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

fn method(method: HttpMethod) -> reqwest::Method {
    match method {
        HttpMethod::Get => reqwest::Method::GET,
        HttpMethod::Post => reqwest::Method::POST,
        HttpMethod::Put => reqwest::Method::PUT,
        HttpMethod::Patch => reqwest::Method::PATCH,
        HttpMethod::Delete => reqwest::Method::DELETE,
    }
}

fn connection_error(host: &str, e: &reqwest::Error) -> HttpError {
    HttpError::ConnectionError {
        host: host.to_string(),
        message: e.to_string(),
    }
}

#[async_trait::async_trait]
impl HttpTransport for ReqwestTransport {
    async fn execute(&self, request: &HttpRequest) -> Result<HttpResponse, HttpError> {
        let url = request.url().ok_or_else(|| HttpError::InvalidRequest {
            reason: "request URL was never resolved".to_string(),
        })?;

        let mut builder = self.client.request(method(request.method()), url.as_str());
        for (name, value) in request.headers().iter() {
            builder = builder.header(name, value);
        }
        if let Some(ms) = request.timeout_ms() {
            builder = builder.timeout(Duration::from_millis(ms));
        }
        if !request.body().is_empty() {
            builder = builder.body(request.body().to_bytes());
        }

        let response = builder.send().await.map_err(|e| {
            if e.is_timeout() {
                HttpError::Timeout {
                    timeout_ms: request.timeout_ms().unwrap_or_default(),
                    request_id: request.request_id().to_string(),
                }
            } else {
                connection_error(url.host(), &e)
            }
        })?;

        let status = response.status().as_u16();
        let mut headers = HttpHeaders::new();
        for (name, value) in response.headers() {
            if let Ok(value) = value.to_str() {
                // Hop-by-hop headers are rejected by HttpHeaders; skip them.
                let _ = headers.insert(name.as_str(), value);
            }
        }
        let body = response
            .bytes()
            .await
            .map_err(|e| connection_error(url.host(), &e))?;

        Ok(HttpResponse::new(
            status,
            headers,
            body.to_vec(),
            request.request_id().to_string(),
        ))
    }
}
