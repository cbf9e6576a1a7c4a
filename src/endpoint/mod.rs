//! Endpoint descriptors and the resolver contract.
//!
//! An endpoint pairs a request path with a schema source and the hooks the
//! dispatcher needs to execute queries against it: a root value, per-field
//! resolvers, and an optional type-config decorator. Descriptors are built
//! once at startup and shared read-only across requests.

pub mod registry;

use crate::schema::document::TypeKindTag;
use crate::security::Principal;
use http::HeaderMap;
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

pub use registry::{EndpointRegistration, EndpointRegistry};

/// Message clients see in place of an internal resolver failure.
pub const INTERNAL_ERROR_MESSAGE: &str = "Internal server error";

/// Request-scoped data handed to the root value provider and every resolver.
#[derive(Clone, Debug, Default)]
pub struct RequestContext {
    pub path: String,
    pub headers: HeaderMap,
    pub principal: Option<Principal>,
}

/// Arguments to a single field resolution.
pub struct FieldCall<'a> {
    /// Value of the enclosing object; the root value for top-level fields.
    pub parent: &'a Value,
    pub arguments: Map<String, Value>,
    pub context: &'a RequestContext,
}

/// Failure raised by a resolver.
#[derive(Debug, thiserror::Error)]
pub enum ResolverError {
    /// Client-safe failure; the message is returned verbatim.
    #[error("{0}")]
    User(String),
    /// Internal failure; clients only see a generic message.
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl ResolverError {
    pub fn user(message: impl Into<String>) -> Self {
        ResolverError::User(message.into())
    }
}

pub type FieldResolver =
    Arc<dyn for<'a> Fn(FieldCall<'a>) -> Result<Value, ResolverError> + Send + Sync>;

/// Picks the concrete object type for a value of an interface or union.
pub type TypeResolver = Arc<dyn Fn(&Value, &RequestContext) -> Option<String> + Send + Sync>;

pub type TypeConfigDecorator = Arc<dyn Fn(TypeConfig) -> TypeConfig + Send + Sync>;

pub type RootValueProvider = Arc<dyn Fn(&RequestContext) -> Value + Send + Sync>;

/// Per-type build configuration, passed through the endpoint's decorator
/// before the executable schema is assembled.
#[derive(Clone)]
pub struct TypeConfig {
    pub name: String,
    pub kind: TypeKindTag,
    pub description: Option<String>,
    pub resolve_type: Option<TypeResolver>,
    pub field_resolvers: BTreeMap<String, FieldResolver>,
}

impl TypeConfig {
    pub fn new(name: impl Into<String>, kind: TypeKindTag) -> Self {
        Self {
            name: name.into(),
            kind,
            description: None,
            resolve_type: None,
            field_resolvers: BTreeMap::new(),
        }
    }

    pub fn with_resolve_type<F>(mut self, resolver: F) -> Self
    where
        F: Fn(&Value, &RequestContext) -> Option<String> + Send + Sync + 'static,
    {
        self.resolve_type = Some(Arc::new(resolver));
        self
    }
}

impl fmt::Debug for TypeConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TypeConfig")
            .field("name", &self.name)
            .field("kind", &self.kind)
            .field("description", &self.description)
            .field("resolve_type", &self.resolve_type.is_some())
            .field("field_resolvers", &self.field_resolvers.keys())
            .finish()
    }
}

/// A registered query endpoint.
#[derive(Clone)]
pub struct EndpointDescriptor {
    path: String,
    schema_uri: String,
    type_config_decorator: Option<TypeConfigDecorator>,
    resolvers: BTreeMap<String, BTreeMap<String, FieldResolver>>,
    root_value: Option<RootValueProvider>,
}

impl EndpointDescriptor {
    /// Describe an endpoint served at `path` with the schema behind `schema_uri`.
    pub fn new(path: impl Into<String>, schema_uri: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            schema_uri: schema_uri.into(),
            type_config_decorator: None,
            resolvers: BTreeMap::new(),
            root_value: None,
        }
    }

    /// Install a resolver for `type_name.field_name`.
    pub fn with_resolver<F>(mut self, type_name: &str, field_name: &str, resolver: F) -> Self
    where
        F: for<'a> Fn(FieldCall<'a>) -> Result<Value, ResolverError> + Send + Sync + 'static,
    {
        self.resolvers
            .entry(type_name.to_string())
            .or_default()
            .insert(field_name.to_string(), Arc::new(resolver));
        self
    }

    pub fn with_root_value<F>(mut self, provider: F) -> Self
    where
        F: Fn(&RequestContext) -> Value + Send + Sync + 'static,
    {
        self.root_value = Some(Arc::new(provider));
        self
    }

    pub fn with_type_config_decorator<F>(mut self, decorator: F) -> Self
    where
        F: Fn(TypeConfig) -> TypeConfig + Send + Sync + 'static,
    {
        self.type_config_decorator = Some(Arc::new(decorator));
        self
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn schema_uri(&self) -> &str {
        &self.schema_uri
    }

    /// Root value for one request; an empty object when none was configured.
    pub fn root_value(&self, context: &RequestContext) -> Value {
        match &self.root_value {
            Some(provider) => provider(context),
            None => Value::Object(Map::new()),
        }
    }

    /// Build configuration for one type: registered resolvers, then the
    /// decorator.
    pub fn type_config(&self, name: &str, kind: TypeKindTag, description: Option<String>) -> TypeConfig {
        let mut config = TypeConfig::new(name, kind);
        config.description = description;
        if let Some(resolvers) = self.resolvers.get(name) {
            config.field_resolvers = resolvers.clone();
        }
        match &self.type_config_decorator {
            Some(decorator) => decorator(config),
            None => config,
        }
    }
}

impl fmt::Debug for EndpointDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EndpointDescriptor")
            .field("path", &self.path)
            .field("schema_uri", &self.schema_uri)
            .field("type_config_decorator", &self.type_config_decorator.is_some())
            .field("resolvers", &self.resolvers.keys())
            .finish()
    }
}
