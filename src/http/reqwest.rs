use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::StreamExt;
use reqwest::Client;

use crate::error::ChatError;

use super::{
    DynHttpTransport, HttpBodyStream, HttpRequest, HttpResponse, HttpStreamResponse,
    HttpTransport,
};

fn transport_error(err: reqwest::Error) -> ChatError {
    if err.is_timeout() {
        ChatError::transport(format!("request timed out: {err}"))
    } else if err.is_connect() {
        ChatError::transport(format!("connection failed: {err}"))
    } else {
        ChatError::transport(err.to_string())
    }
}

/// Default [`HttpTransport`] backed by reqwest.
pub struct ReqwestTransport {
    client: Client,
}

impl ReqwestTransport {
    /// Wraps a preconfigured reqwest client.
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    /// Builds a transport with reqwest's default settings.
    pub fn default_client() -> Result<Self, ChatError> {
        Client::builder()
            .build()
            .map(Self::new)
            .map_err(|err| ChatError::transport(format!("failed to create reqwest client: {err}")))
    }

    /// Builds the POST and hands back its timeout for the caller to apply.
    fn build_request(
        &self,
        request: HttpRequest,
    ) -> Result<(reqwest::RequestBuilder, Option<Duration>), ChatError> {
        let HttpRequest {
            url,
            headers,
            body,
            timeout,
        } = request;
        let mut builder = self.client.post(&url);

        for (name, value) in headers {
            let header_name = reqwest::header::HeaderName::from_bytes(name.as_bytes())
                .map_err(|err| ChatError::transport(format!("invalid header name: {err}")))?;
            let header_value = reqwest::header::HeaderValue::from_str(&value).map_err(|err| {
                ChatError::transport(format!("invalid header value for {header_name}: {err}"))
            })?;
            builder = builder.header(header_name, header_value);
        }

        Ok((builder.body(body), timeout))
    }

    fn headers_to_map(headers: &reqwest::header::HeaderMap) -> HashMap<String, String> {
        headers
            .iter()
            .map(|(name, value)| {
                (
                    name.as_str().to_string(),
                    value.to_str().unwrap_or_default().to_string(),
                )
            })
            .collect()
    }
}

#[async_trait]
impl HttpTransport for ReqwestTransport {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, ChatError> {
        let (mut builder, timeout) = self.build_request(request)?;
        if let Some(timeout) = timeout {
            builder = builder.timeout(timeout);
        }
        let response = builder.send().await.map_err(transport_error)?;

        let status = response.status().as_u16();
        let headers = Self::headers_to_map(response.headers());
        let body = response
            .bytes()
            .await
            .map_err(transport_error)?
            .to_vec();

        Ok(HttpResponse {
            status,
            headers,
            body,
        })
    }

    async fn send_stream(&self, request: HttpRequest) -> Result<HttpStreamResponse, ChatError> {
        let (builder, timeout) = self.build_request(request)?;
        let pending = builder.send();
        // the limit ends once headers arrive; the body may stream for as long as it needs
        let response = match timeout {
            Some(limit) => tokio::time::timeout(limit, pending).await.map_err(|_| {
                ChatError::transport(format!(
                    "request timed out after {limit:?} waiting for response headers"
                ))
            })?,
            None => pending.await,
        }
        .map_err(transport_error)?;

        let status = response.status().as_u16();
        let headers = Self::headers_to_map(response.headers());
        let stream = response.bytes_stream().map(|chunk| {
            chunk
                .map(|bytes| bytes.to_vec())
                .map_err(transport_error)
        });
        let body: HttpBodyStream = Box::pin(stream);

        Ok(HttpStreamResponse {
            status,
            headers,
            body,
        })
    }
}

/// Convenience constructor for a shared reqwest transport.
pub fn default_dyn_transport() -> Result<DynHttpTransport, ChatError> {
    Ok(Arc::new(ReqwestTransport::default_client()?))
}
