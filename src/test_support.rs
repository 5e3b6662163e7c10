//! In-process object store speaking just enough of the S3 pre-signed URL
//! protocol for integration tests.

use std::collections::{BTreeMap, HashMap};
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, MutexGuard};

use axum::Router;
use axum::body::Bytes;
use axum::extract::{DefaultBodyLimit, State};
use axum::http::{Method, StatusCode, Uri, header};
use axum::response::{IntoResponse, Response};
use md5::{Digest, Md5};
use serde::Deserialize;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

#[derive(Default)]
struct StubState {
    objects: HashMap<String, Bytes>,
    etags: HashMap<String, String>,
    custom_etags: HashMap<String, String>,
    multipart: HashMap<String, BTreeMap<usize, (String, Bytes)>>,
    puts: usize,
    deletes: usize,
    aborts: usize,
    completes: usize,
}

#[derive(Clone, Default)]
pub struct ObjectStoreStub {
    state: Arc<Mutex<StubState>>,
}

impl ObjectStoreStub {
    fn lock(&self) -> MutexGuard<'_, StubState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn puts_count(&self) -> usize {
        self.lock().puts
    }

    pub fn deletes_count(&self) -> usize {
        self.lock().deletes
    }

    pub fn aborts_count(&self) -> usize {
        self.lock().aborts
    }

    pub fn completes_count(&self) -> usize {
        self.lock().completes
    }

    pub fn object(&self, path: &str) -> Option<Bytes> {
        self.lock().objects.get(path).cloned()
    }

    pub fn etag(&self, path: &str) -> Option<String> {
        self.lock().etags.get(path).cloned()
    }

    /// Makes every PUT to `path`, including part uploads, answer with `etag`
    /// instead of the content MD5.
    pub fn set_etag(&self, path: &str, etag: &str) {
        self.lock()
            .custom_etags
            .insert(path.to_string(), etag.to_string());
    }

    pub fn initiate_multipart_upload(&self, path: &str) {
        self.lock()
            .multipart
            .insert(path.to_string(), BTreeMap::new());
    }

    pub fn is_multipart_upload(&self, path: &str) -> bool {
        self.lock().multipart.contains_key(path)
    }

    fn put(&self, path: &str, part_number: Option<usize>, body: Bytes) -> Response {
        let mut state = self.lock();
        let etag = state
            .custom_etags
            .get(path)
            .cloned()
            .unwrap_or_else(|| hex::encode(Md5::digest(&body)));
        state.puts += 1;

        match part_number {
            Some(number) => match state.multipart.get_mut(path) {
                Some(parts) => {
                    parts.insert(number, (etag.clone(), body));
                }
                None => return s3_error(StatusCode::NOT_FOUND, "NoSuchUpload"),
            },
            None => {
                state.objects.insert(path.to_string(), body);
                state.etags.insert(path.to_string(), etag.clone());
            }
        }

        (StatusCode::OK, [(header::ETAG, format!("\"{etag}\""))]).into_response()
    }

    fn delete(&self, path: &str) -> Response {
        let mut state = self.lock();
        if state.multipart.remove(path).is_some() {
            state.aborts += 1;
            return StatusCode::NO_CONTENT.into_response();
        }
        state.deletes += 1;
        state.objects.remove(path);
        state.etags.remove(path);
        StatusCode::NO_CONTENT.into_response()
    }

    fn complete(&self, path: &str, body: &[u8]) -> Response {
        if !has_object_key(path) {
            // Real stores report some complete failures with a 200 status.
            return (
                StatusCode::OK,
                "<Error><Code>InternalError</Code><Message>malformed object path</Message></Error>",
            )
                .into_response();
        }

        let request: CompleteRequest = match std::str::from_utf8(body)
            .ok()
            .and_then(|text| quick_xml::de::from_str(text).ok())
        {
            Some(request) => request,
            None => return s3_error(StatusCode::BAD_REQUEST, "MalformedXML"),
        };

        let mut state = self.lock();
        let Some(uploaded) = state.multipart.get(path) else {
            return s3_error(StatusCode::NOT_FOUND, "NoSuchUpload");
        };

        let mut previous = 0;
        let mut content = Vec::new();
        let mut part_md5s = Vec::new();
        for part in &request.parts {
            if part.number <= previous {
                return s3_error(StatusCode::BAD_REQUEST, "InvalidPartOrder");
            }
            previous = part.number;
            match uploaded.get(&part.number) {
                Some((etag, data)) if *etag == part.etag => {
                    content.extend_from_slice(data);
                    part_md5s.extend_from_slice(&Md5::digest(data));
                }
                _ => return s3_error(StatusCode::BAD_REQUEST, "InvalidPart"),
            }
        }

        let etag = format!(
            "{}-{}",
            hex::encode(Md5::digest(&part_md5s)),
            request.parts.len()
        );
        state.multipart.remove(path);
        state.completes += 1;
        state
            .objects
            .insert(path.to_string(), Bytes::from(content));
        state.etags.insert(path.to_string(), etag.clone());

        (
            StatusCode::OK,
            format!(
                "<CompleteMultipartUploadResult><Key>{path}</Key><ETag>\"{etag}\"</ETag></CompleteMultipartUploadResult>"
            ),
        )
            .into_response()
    }
}

#[derive(Deserialize)]
struct CompleteRequest {
    #[serde(rename = "Part", default)]
    parts: Vec<RequestedPart>,
}

#[derive(Deserialize)]
struct RequestedPart {
    #[serde(rename = "PartNumber")]
    number: usize,
    #[serde(rename = "ETag")]
    etag: String,
}

fn has_object_key(path: &str) -> bool {
    path.trim_start_matches('/')
        .split_once('/')
        .is_some_and(|(_, key)| !key.is_empty())
}

fn s3_error(status: StatusCode, code: &str) -> Response {
    (
        status,
        format!("<Error><Code>{code}</Code><Message>{code}</Message></Error>"),
    )
        .into_response()
}

fn part_number(uri: &Uri) -> Option<usize> {
    uri.query()?
        .split('&')
        .find_map(|pair| pair.strip_prefix("partNumber="))
        .and_then(|value| value.parse().ok())
}

async fn handle(
    State(stub): State<ObjectStoreStub>,
    method: Method,
    uri: Uri,
    body: Bytes,
) -> Response {
    let path = uri.path().to_string();
    match method {
        Method::PUT => stub.put(&path, part_number(&uri), body),
        Method::DELETE => stub.delete(&path),
        Method::POST => stub.complete(&path, &body),
        _ => StatusCode::METHOD_NOT_ALLOWED.into_response(),
    }
}

pub struct StubServer {
    stub: ObjectStoreStub,
    addr: SocketAddr,
    task: JoinHandle<()>,
}

impl StubServer {
    pub async fn start() -> std::io::Result<Self> {
        let stub = ObjectStoreStub::default();
        let app = Router::new()
            .fallback(handle)
            .layer(DefaultBodyLimit::disable())
            .with_state(stub.clone());
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        let task = tokio::spawn(async move {
            if let Err(err) = axum::serve(listener, app).await {
                tracing::error!(?err, "object store stub stopped");
            }
        });
        Ok(Self { stub, addr, task })
    }

    pub fn stub(&self) -> &ObjectStoreStub {
        &self.stub
    }

    pub fn url(&self, path: &str) -> String {
        format!("http://{}{path}", self.addr)
    }
}

impl std::ops::Deref for StubServer {
    type Target = ObjectStoreStub;

    fn deref(&self) -> &Self::Target {
        &self.stub
    }
}

impl Drop for StubServer {
    fn drop(&mut self) {
        self.task.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn object_key_requires_bucket_and_key() {
        assert!(has_object_key("/bucket/key"));
        assert!(has_object_key("/bucket/nested/key"));
        assert!(!has_object_key("/bucket"));
        assert!(!has_object_key("/bucket/"));
    }

    #[test]
    fn part_number_is_read_from_query() {
        let uri: Uri = "/bucket/key?partNumber=3&X-Amz-Signature=x".parse().unwrap();
        assert_eq!(part_number(&uri), Some(3));
        let uri: Uri = "/bucket/key".parse().unwrap();
        assert_eq!(part_number(&uri), None);
    }
}
