//! The transport seam.
//!
//! The core only needs "send this request, give me the buffered response".
//! `ReqwestTransport` is the production implementation; tests plug in
//! scripted transports.

use async_trait::async_trait;

use crate::error::TransportError;
use crate::http::{HttpRequest, HttpResponse};

/// Performs one HTTP round-trip.
///
/// Non-2xx statuses are responses, not errors. `Err` is reserved for
/// failures where no response was received at all.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, TransportError>;
}

#[cfg(feature = "client")]
pub use self::reqwest_transport::ReqwestTransport;

#[cfg(feature = "client")]
mod reqwest_transport {
    use async_trait::async_trait;
    use reqwest::{Client, Method};
    use tracing::trace;

    use super::Transport;
    use crate::error::TransportError;
    use crate::http::{HttpMethod, HttpRequest, HttpResponse};

    /// reqwest-backed transport with a cookie store, so session cookies set
    /// by the server are sent with every later request.
    #[derive(Debug, Clone)]
    pub struct ReqwestTransport {
        client: Client,
    }

    impl ReqwestTransport {
        pub fn new() -> Result<Self, TransportError> {
            let client = Client::builder().cookie_store(true).build()?;
            Ok(Self { client })
        }

        /// Use a preconfigured client. Cookies are only included if the
        /// client was built with a cookie store.
        pub fn with_client(client: Client) -> Self {
            Self { client }
        }
    }

    fn method(method: HttpMethod) -> Method {
        match method {
            HttpMethod::Get => Method::GET,
            HttpMethod::Post => Method::POST,
            HttpMethod::Put => Method::PUT,
            HttpMethod::Patch => Method::PATCH,
            HttpMethod::Delete => Method::DELETE,
        }
    }

    #[async_trait]
    impl Transport for ReqwestTransport {
        async fn send(&self, request: HttpRequest) -> Result<HttpResponse, TransportError> {
            trace!(method = request.method.as_str(), url = %request.url, "sending request");
            let mut builder = self.client.request(method(request.method), &request.url);
            for (name, value) in &request.headers {
                builder = builder.header(name.as_str(), value.as_str());
            }
            if let Some(body) = request.body {
                builder = builder.body(body);
            }

            let response = builder.send().await.map_err(|e| {
                if e.is_timeout() {
                    TransportError::Timeout
                } else if e.is_connect() {
                    TransportError::Connect(e.to_string())
                } else {
                    TransportError::Http(e)
                }
            })?;

            let status = response.status().as_u16();
            let headers = response
                .headers()
                .iter()
                .filter_map(|(name, value)| Some((name.as_str().to_string(), value.to_str().ok()?.to_string())))
                .collect();
            let body = response.text().await?;

            Ok(HttpResponse { status, headers, body })
        }
    }
}
