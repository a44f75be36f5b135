//! Conditional HTTP retrieval.
//!
//! Requests carry the stored caching tokens (`If-None-Match`,
//! `If-Modified-Since`), an `Accept` header enumerating the feed media
//! types we can parse, and `A-IM: feed` to signal RFC 3229 delta support.
//! A 304 answer short-circuits the whole update for that feed.

use futures::StreamExt;
use reqwest::header::{ACCEPT, ETAG, IF_MODIFIED_SINCE, IF_NONE_MATCH, LAST_MODIFIED};
use reqwest::StatusCode;

use super::{FetchConfig, FetchError, Retrieved};

/// Feed media types we ask for, most specific first.
const ACCEPT_HEADER: &str = "application/atom+xml, application/rss+xml, \
     application/rdf+xml;q=0.9, application/feed+json;q=0.9, \
     application/xml;q=0.8, text/xml;q=0.7, */*;q=0.1";

pub(super) async fn retrieve(
    client: &reqwest::Client,
    config: &FetchConfig,
    url: &str,
    etag: Option<&str>,
    last_modified: Option<&str>,
) -> Result<Retrieved, FetchError> {
    let mut request = client
        .get(url)
        .header(ACCEPT, ACCEPT_HEADER)
        .header("A-IM", "feed");
    if let Some(etag) = etag {
        request = request.header(IF_NONE_MATCH, etag);
    }
    if let Some(last_modified) = last_modified {
        request = request.header(IF_MODIFIED_SINCE, last_modified);
    }

    let response = tokio::time::timeout(config.timeout, request.send())
        .await
        .map_err(|_| FetchError::Timeout)?
        .map_err(FetchError::Network)?;

    if response.status() == StatusCode::NOT_MODIFIED {
        tracing::debug!(url = %url, "remote reports not modified");
        return Ok(Retrieved::NotModified);
    }
    if !response.status().is_success() {
        return Err(FetchError::HttpStatus(response.status().as_u16()));
    }

    let new_etag = header_string(&response, ETAG);
    let new_last_modified = header_string(&response, LAST_MODIFIED);

    let bytes = read_limited_bytes(response, config.max_size).await?;

    Ok(Retrieved::Document {
        bytes,
        etag: new_etag,
        last_modified: new_last_modified,
    })
}

fn header_string(response: &reqwest::Response, name: reqwest::header::HeaderName) -> Option<String> {
    response
        .headers()
        .get(name)
        .and_then(|value| value.to_str().ok())
        .map(str::to_owned)
}

/// Reads the response body, bailing out as soon as the size limit is
/// exceeded (checked against Content-Length first, then while streaming,
/// so a lying server cannot exhaust memory).
async fn read_limited_bytes(
    response: reqwest::Response,
    limit: usize,
) -> Result<Vec<u8>, FetchError> {
    if let Some(len) = response.content_length() {
        if len as usize > limit {
            return Err(FetchError::ResponseTooLarge);
        }
    }

    let mut bytes = Vec::new();
    let mut stream = response.bytes_stream();

    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(FetchError::Network)?;
        if bytes.len().saturating_add(chunk.len()) > limit {
            return Err(FetchError::ResponseTooLarge);
        }
        bytes.extend_from_slice(&chunk);
    }

    Ok(bytes)
}
