//! HTTP-layer dispatcher for registered endpoints.
//!
//! The dispatcher sits in a handler chain. Requests that do not target a
//! registered endpoint with `POST` or `OPTIONS` are handed to the next
//! handler untouched. `OPTIONS` gets a CORS preflight answer. `POST` runs the
//! full pipeline:
//!
//! 1. prime the security context and build the request-scoped context,
//! 2. obtain the endpoint's schema from the [`SchemaStore`] (500 on failure),
//! 3. decode the body (400 on failure),
//! 4. execute the query with the endpoint's root value,
//! 5. report internal causes, serialize, and audit the serialized errors.
//!
//! Execution errors never change the status: a request that reached
//! execution always gets a 200 result envelope.

pub mod response;

use crate::endpoint::{EndpointDescriptor, EndpointRegistry, RequestContext};
use crate::report::{ErrorReporter, TracingReporter};
use crate::schema::build::RootValue;
use crate::schema::{CacheError, DocumentCache, FileCache, MemoryCache, SchemaStore};
use crate::security::{Anonymous, SecurityContext};
use crate::settings::{DebugFlag, Settings};
use crate::source::FileSourceReader;
use async_trait::async_trait;
use bytes::Bytes;
use http::{Method, Request, Response, StatusCode};
use serde::Deserialize;
use serde_json::{Map, Value};
use std::sync::Arc;

pub use response::{ALLOWED_METHODS, DispatchError};

/// The handler after the dispatcher in the chain.
#[async_trait]
pub trait NextHandler: Send + Sync {
    async fn handle(&self, request: Request<Bytes>) -> Response<Bytes>;
}

/// Decoded request body.
///
/// The query text comes from `query`, or from `document` when `query` is
/// absent.
#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(try_from = "RawQuery")]
pub struct InboundQuery {
    pub query: String,
    pub variables: Option<Map<String, Value>>,
    pub operation_name: Option<String>,
}

#[derive(Deserialize)]
struct RawQuery {
    #[serde(default)]
    query: Option<String>,
    #[serde(default)]
    document: Option<String>,
    #[serde(default)]
    variables: Option<Map<String, Value>>,
    #[serde(default, rename = "operationName")]
    operation_name: Option<String>,
}

impl TryFrom<RawQuery> for InboundQuery {
    type Error = &'static str;

    fn try_from(raw: RawQuery) -> Result<Self, Self::Error> {
        let query = raw.query.or(raw.document).ok_or("missing field `query`")?;
        Ok(Self {
            query,
            variables: raw.variables,
            operation_name: raw.operation_name,
        })
    }
}

impl InboundQuery {
    pub fn decode(body: &[u8]) -> Result<Self, DispatchError> {
        serde_json::from_slice(body).map_err(DispatchError::RequestDecode)
    }

    fn into_request(self) -> async_graphql::Request {
        let mut request = async_graphql::Request::new(self.query);
        if let Some(variables) = self.variables {
            request =
                request.variables(async_graphql::Variables::from_json(Value::Object(variables)));
        }
        if let Some(operation_name) = self.operation_name {
            request = request.operation_name(operation_name);
        }
        request
    }
}

pub struct Dispatcher {
    registry: Arc<EndpointRegistry>,
    store: Arc<SchemaStore>,
    security: Arc<dyn SecurityContext>,
    reporter: Arc<dyn ErrorReporter>,
    debug_flag: DebugFlag,
}

impl Dispatcher {
    pub fn new(registry: Arc<EndpointRegistry>, store: Arc<SchemaStore>) -> Self {
        Self {
            registry,
            store,
            security: Arc::new(Anonymous),
            reporter: Arc::new(TracingReporter),
            debug_flag: DebugFlag::NONE,
        }
    }

    /// Wire a dispatcher from loaded settings.
    ///
    /// Uses a [`FileCache`] when `cacheDirectory` is set and an in-memory
    /// cache otherwise.
    pub fn from_settings(settings: &Settings, registry: EndpointRegistry) -> Result<Self, CacheError> {
        let reader = Arc::new(FileSourceReader::new(settings.resource_roots.clone()));
        let cache: Arc<dyn DocumentCache> = match &settings.cache_directory {
            Some(dir) => Arc::new(FileCache::open(dir)?),
            None => Arc::new(MemoryCache::new()),
        };
        let store = SchemaStore::new(reader, cache, settings.enable_schema_cache);
        Ok(Self::new(Arc::new(registry), Arc::new(store)).with_debug_flag(settings.debug_flag()))
    }

    pub fn with_security(mut self, security: Arc<dyn SecurityContext>) -> Self {
        self.security = security;
        self
    }

    pub fn with_reporter(mut self, reporter: Arc<dyn ErrorReporter>) -> Self {
        self.reporter = reporter;
        self
    }

    pub fn with_debug_flag(mut self, flag: DebugFlag) -> Self {
        self.debug_flag = flag;
        self
    }

    pub fn store(&self) -> &Arc<SchemaStore> {
        &self.store
    }

    pub fn registry(&self) -> &Arc<EndpointRegistry> {
        &self.registry
    }

    /// Handle `request`, or pass it to `next` when it is not ours.
    ///
    /// Dropping the returned future cancels query execution at its next
    /// suspension point.
    pub async fn process(&self, request: Request<Bytes>, next: &dyn NextHandler) -> Response<Bytes> {
        let Some(endpoint) = self.route(&request) else {
            return next.handle(request).await;
        };

        if request.method() == Method::OPTIONS {
            return response::preflight();
        }

        match self.execute(&endpoint, request).await {
            Ok(response) => response,
            Err(err) => {
                tracing::warn!(
                    path = endpoint.path(),
                    status = err.status().as_u16(),
                    error = %err,
                    "request failed before a result could be returned"
                );
                err.into_response()
            }
        }
    }

    fn route(&self, request: &Request<Bytes>) -> Option<Arc<EndpointDescriptor>> {
        if request.method() != Method::POST && request.method() != Method::OPTIONS {
            return None;
        }
        self.registry.resolve(request.uri().path()).cloned()
    }

    async fn execute(
        &self,
        endpoint: &EndpointDescriptor,
        request: Request<Bytes>,
    ) -> Result<Response<Bytes>, DispatchError> {
        let context = RequestContext {
            path: request.uri().path().to_string(),
            headers: request.headers().clone(),
            principal: self.security.prime(&request),
        };

        let schema = self
            .store
            .schema_for(endpoint)
            .map_err(|source| DispatchError::Schema {
                uri: endpoint.schema_uri().to_string(),
                source,
            })?;

        let query = InboundQuery::decode(request.body())?;
        let root = endpoint.root_value(&context);
        let outcome = schema
            .execute(query.into_request().data(context).data(RootValue(root)))
            .await;

        self.assemble(&outcome)
    }

    fn assemble(&self, outcome: &async_graphql::Response) -> Result<Response<Bytes>, DispatchError> {
        response::report_internal_causes(&outcome.errors, self.reporter.as_ref());
        let envelope = response::result_envelope(outcome, self.debug_flag)
            .map_err(DispatchError::ResponseEncode)?;
        let body = serde_json::to_vec(&envelope).map_err(DispatchError::ResponseEncode)?;
        response::audit_errors(&body, self.reporter.as_ref());
        Ok(response::json_response(StatusCode::OK, Bytes::from(body)))
    }
}
