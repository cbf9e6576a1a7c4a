#![allow(dead_code)]

use async_trait::async_trait;
use bytes::Bytes;
use gqlmux::{
    CauseRecord, Dispatcher, EndpointDescriptor, EndpointRegistry, ErrorReporter, MemoryCache,
    SchemaStore, SourceReader,
};
use http::{Method, Request, Response, StatusCode};
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::HashMap;
use std::io;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Reporter that keeps everything it is told.
#[derive(Default)]
pub struct RecordingReporter {
    causes: Mutex<Vec<CauseRecord>>,
    notices: Mutex<Vec<String>>,
}

impl RecordingReporter {
    pub fn causes(&self) -> Vec<CauseRecord> {
        self.causes.lock().clone()
    }

    pub fn notices(&self) -> Vec<String> {
        self.notices.lock().clone()
    }
}

impl ErrorReporter for RecordingReporter {
    fn internal_cause(&self, record: &CauseRecord) {
        self.causes.lock().push(record.clone());
    }

    fn notice(&self, _origin: &'static str, message: &str) {
        self.notices.lock().push(message.to_string());
    }
}

/// Next handler that answers 418 with a fixed body and counts calls.
#[derive(Default)]
pub struct Fallthrough {
    calls: AtomicUsize,
}

pub const FALLTHROUGH_BODY: &[u8] = b"next handler";

impl Fallthrough {
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl gqlmux::NextHandler for Fallthrough {
    async fn handle(&self, _request: Request<Bytes>) -> Response<Bytes> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let mut response = Response::new(Bytes::from_static(FALLTHROUGH_BODY));
        *response.status_mut() = StatusCode::IM_A_TEAPOT;
        response
    }
}

/// In-memory schema sources keyed by URI, counting reads.
#[derive(Default)]
pub struct MemorySources {
    sources: Mutex<HashMap<String, String>>,
    reads: AtomicUsize,
}

impl MemorySources {
    pub fn with(self, uri: &str, source: &str) -> Self {
        self.put(uri, source);
        self
    }

    pub fn put(&self, uri: &str, source: &str) {
        self.sources
            .lock()
            .insert(uri.to_string(), source.to_string());
    }

    pub fn reads(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }
}

impl SourceReader for MemorySources {
    fn read(&self, uri: &str) -> io::Result<String> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        self.sources
            .lock()
            .get(uri)
            .cloned()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, uri.to_string()))
    }
}

pub struct Harness {
    pub dispatcher: Dispatcher,
    pub sources: Arc<MemorySources>,
    pub reporter: Arc<RecordingReporter>,
    pub next: Fallthrough,
}

impl Harness {
    pub fn new(endpoints: Vec<EndpointDescriptor>, sources: MemorySources) -> Self {
        Self::with_cache(endpoints, sources, true)
    }

    pub fn with_cache(
        endpoints: Vec<EndpointDescriptor>,
        sources: MemorySources,
        cache_enabled: bool,
    ) -> Self {
        let sources = Arc::new(sources);
        let reporter = Arc::new(RecordingReporter::default());
        let store = SchemaStore::new(
            Arc::clone(&sources) as Arc<dyn SourceReader>,
            Arc::new(MemoryCache::new()),
            cache_enabled,
        );
        let dispatcher = Dispatcher::new(
            Arc::new(EndpointRegistry::new(endpoints)),
            Arc::new(store),
        )
        .with_reporter(Arc::clone(&reporter) as Arc<dyn ErrorReporter>);
        Self {
            dispatcher,
            sources,
            reporter,
            next: Fallthrough::default(),
        }
    }

    pub async fn send(&self, request: Request<Bytes>) -> Response<Bytes> {
        self.dispatcher.process(request, &self.next).await
    }

    pub async fn post_query(&self, path: &str, body: Value) -> (StatusCode, Value) {
        let response = self.send(post(path, body.to_string())).await;
        let status = response.status();
        (status, body_json(&response))
    }
}

pub fn request(method: Method, path: &str, body: impl Into<Bytes>) -> Request<Bytes> {
    let mut request = Request::new(body.into());
    *request.method_mut() = method;
    *request.uri_mut() = path.parse().expect("valid request uri");
    request
}

pub fn post(path: &str, body: impl Into<Bytes>) -> Request<Bytes> {
    request(Method::POST, path, body)
}

pub fn body_json(response: &Response<Bytes>) -> Value {
    serde_json::from_slice(response.body()).expect("response body is JSON")
}
