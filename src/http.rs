//! The HTTP client the REST layer sends its requests through.

use async_trait::async_trait;
use hyper::client::HttpConnector;
use hyper::header::CONTENT_TYPE;
use hyper::{Body, Client, Request, Uri};
use hyper_rustls::{HttpsConnector, HttpsConnectorBuilder};
use std::fmt;
use crate::{Error, Result};

pub use hyper::Method;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HttpRequest {
    pub method: Method,
    pub url: String,
    /// Lowercase header names with their values.
    pub headers: Vec<(&'static str, String)>,
    /// A JSON body.
    pub body: Option<Vec<u8>>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HttpResponse {
    pub status: u16,
    pub body: Vec<u8>,
}

impl HttpResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Executes a single request without retrying.
#[async_trait]
pub trait HttpClient: Send + Sync + 'static {
    async fn execute(&self, request: HttpRequest) -> Result<HttpResponse>;
}

/// [`HttpClient`] backed by a pooled hyper client; speaks `http` and `https`.
#[derive(Clone)]
pub struct HyperClient {
    client: Client<HttpsConnector<HttpConnector>>,
}

impl HyperClient {
    pub fn new() -> Self {
        let connector = HttpsConnectorBuilder::new()
            .with_native_roots()
            .https_or_http()
            .enable_http1()
            .build();

        Self {
            client: Client::builder().build(connector),
        }
    }
}

impl Default for HyperClient {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for HyperClient {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str("HyperClient")
    }
}

#[async_trait]
impl HttpClient for HyperClient {
    async fn execute(&self, request: HttpRequest) -> Result<HttpResponse> {
        let uri = request.url.parse::<Uri>()?;
        let mut builder = Request::builder().method(request.method).uri(uri);

        for (name, value) in request.headers {
            builder = builder.header(name, value);
        }

        let body = match request.body {
            Some(bytes) => {
                builder = builder.header(CONTENT_TYPE, "application/json");

                Body::from(bytes)
            },
            None => Body::empty(),
        };

        let request = builder
            .body(body)
            .map_err(|_| Error::Config("request headers must be visible ASCII"))?;
        let response = self.client.request(request).await?;
        let status = response.status().as_u16();
        let body = hyper::body::to_bytes(response.into_body()).await?;

        Ok(HttpResponse {
            status,
            body: body.to_vec(),
        })
    }
}
