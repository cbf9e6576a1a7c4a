//! Ordered table of endpoint descriptors.
//!
//! Resolution is a linear scan in registration order and the first
//! descriptor whose path equals the request path wins. Later descriptors with
//! the same path are shadowed, not rejected; construction logs a warning for
//! each so the collision is visible to operators.

use crate::endpoint::EndpointDescriptor;
use std::collections::BTreeSet;
use std::sync::Arc;

/// Compile-time endpoint registration, collected with `inventory`.
///
/// ```ignore
/// inventory::submit! {
///     EndpointRegistration::new("shop", shop_endpoint)
/// }
/// ```
pub struct EndpointRegistration {
    pub name: &'static str,
    pub build: fn() -> EndpointDescriptor,
}

impl EndpointRegistration {
    pub const fn new(name: &'static str, build: fn() -> EndpointDescriptor) -> Self {
        Self { name, build }
    }
}

inventory::collect!(EndpointRegistration);

#[derive(Debug, Default, Clone)]
/// Immutable endpoint table shared by all dispatches.
pub struct EndpointRegistry {
    endpoints: Vec<Arc<EndpointDescriptor>>,
}

impl EndpointRegistry {
    /// Build a registry from descriptors in priority order.
    pub fn new(endpoints: impl IntoIterator<Item = EndpointDescriptor>) -> Self {
        let registry = Self {
            endpoints: endpoints.into_iter().map(Arc::new).collect(),
        };
        for path in registry.duplicate_paths() {
            tracing::warn!(
                path = %path,
                "multiple endpoints registered for the same path; the first registration wins"
            );
        }
        registry
    }

    /// Build the registry from every `inventory` registration in the binary.
    ///
    /// Registrations are ordered by name, since link order is not stable.
    pub fn discover() -> Self {
        let mut registrations: Vec<&EndpointRegistration> =
            inventory::iter::<EndpointRegistration>().collect();
        registrations.sort_by_key(|registration| registration.name);
        Self::new(registrations.into_iter().map(|registration| (registration.build)()))
    }

    /// Find the endpoint serving `path`.
    pub fn resolve(&self, path: &str) -> Option<&Arc<EndpointDescriptor>> {
        self.endpoints.iter().find(|endpoint| endpoint.path() == path)
    }

    /// Paths registered more than once, in first-seen order.
    pub fn duplicate_paths(&self) -> Vec<&str> {
        let mut seen = BTreeSet::new();
        let mut duplicates = Vec::new();
        for endpoint in &self.endpoints {
            let path = endpoint.path();
            if !seen.insert(path) && !duplicates.contains(&path) {
                duplicates.push(path);
            }
        }
        duplicates
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<EndpointDescriptor>> {
        self.endpoints.iter()
    }

    /// Schema URIs of every endpoint, in registration order.
    pub fn schema_uris(&self) -> Vec<&str> {
        self.endpoints.iter().map(|endpoint| endpoint.schema_uri()).collect()
    }

    pub fn len(&self) -> usize {
        self.endpoints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.endpoints.is_empty()
    }
}
