use std::collections::BTreeMap;
use std::future::Future;

use bytes::Bytes;
use reqwest::header::{CONTENT_LENGTH, CONTENT_TYPE, ETAG};
use reqwest::{Body, Client, RequestBuilder, Response, StatusCode};
use tokio::time::{Instant, timeout_at};
use tracing::debug;
use url::Url;

use crate::error::{Result, SaveError};

#[derive(Clone, Debug, Default)]
pub struct ObjectStoreClient {
    http: Client,
}

impl ObjectStoreClient {
    pub fn new(http: Client) -> Self {
        Self { http }
    }

    pub async fn put(
        &self,
        url: &str,
        headers: &BTreeMap<String, String>,
        body: Body,
        content_length: Option<u64>,
        deadline: Instant,
    ) -> Result<String> {
        let mut request = self.http.put(url);
        for (name, value) in headers {
            request = request.header(name.as_str(), value.as_str());
        }
        if let Some(length) = content_length {
            request = request.header(CONTENT_LENGTH, length);
        }

        let response = self.send("PUT", url, request.body(body), deadline).await?;
        let etag = response
            .headers()
            .get(ETAG)
            .and_then(|value| value.to_str().ok())
            .map(normalize_etag)
            .unwrap_or_default();
        debug!(url = %scrub_url(url), %etag, "object store accepted PUT");
        Ok(etag)
    }

    pub async fn post_xml(
        &self,
        operation: &'static str,
        url: &str,
        body: String,
        deadline: Instant,
    ) -> Result<Bytes> {
        let request = self
            .http
            .post(url)
            .header(CONTENT_TYPE, "application/xml")
            .header(CONTENT_LENGTH, body.len())
            .body(body);
        let response = self.send(operation, url, request, deadline).await?;
        bounded(operation, deadline, response.bytes())
            .await?
            .map_err(|err| SaveError::transport(operation, err))
    }

    pub async fn delete(&self, operation: &'static str, url: &str, deadline: Instant) -> Result<()> {
        let request = self.http.delete(url);
        let response = bounded(operation, deadline, request.send())
            .await?
            .map_err(|err| SaveError::transport(operation, err))?;
        if response.status() == StatusCode::NOT_FOUND {
            debug!(url = %scrub_url(url), "object already gone");
            return Ok(());
        }
        ensure_success(operation, url, response).map(|_| ())
    }

    async fn send(
        &self,
        operation: &'static str,
        url: &str,
        request: RequestBuilder,
        deadline: Instant,
    ) -> Result<Response> {
        let response = bounded(operation, deadline, request.send())
            .await?
            .map_err(|err| SaveError::transport(operation, err))?;
        ensure_success(operation, url, response)
    }
}

async fn bounded<F: Future>(
    operation: &'static str,
    deadline: Instant,
    future: F,
) -> Result<F::Output> {
    timeout_at(deadline, future)
        .await
        .map_err(|_| SaveError::Timeout { operation })
}

fn ensure_success(operation: &'static str, url: &str, response: Response) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    Err(SaveError::RemoteTransport {
        operation,
        reason: format!("{} returned {status}", scrub_url(url)),
    })
}

/// ETags carrying a content MD5 are compared without regard to hex case.
pub fn etag_matches_md5(etag: &str, md5: &str) -> bool {
    etag.eq_ignore_ascii_case(md5)
}

pub fn normalize_etag(raw: &str) -> String {
    raw.trim().trim_matches('"').to_string()
}

/// Drops the query string, which carries the signature of a pre-signed URL.
pub fn scrub_url(raw: &str) -> String {
    match Url::parse(raw) {
        Ok(mut url) => {
            url.set_query(None);
            url.set_fragment(None);
            url.to_string()
        }
        Err(_) => "<invalid url>".to_string(),
    }
}
