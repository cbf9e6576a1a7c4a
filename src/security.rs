//! Hook into the host's authentication layer.
//!
//! The dispatcher hands every accepted request to a [`SecurityContext`]
//! before any resolver runs. Whatever principal comes back is stored in that
//! request's [`crate::RequestContext`] only; nothing is kept between
//! requests.

use bytes::Bytes;
use http::Request;

/// Authenticated party attached to a request.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Principal {
    pub identifier: String,
    pub roles: Vec<String>,
}

impl Principal {
    pub fn new(identifier: impl Into<String>) -> Self {
        Self {
            identifier: identifier.into(),
            roles: Vec::new(),
        }
    }

    pub fn with_role(mut self, role: impl Into<String>) -> Self {
        self.roles.push(role.into());
        self
    }

    pub fn has_role(&self, role: &str) -> bool {
        self.roles.iter().any(|candidate| candidate == role)
    }
}

pub trait SecurityContext: Send + Sync {
    /// Inspect the inbound request and return the principal it carries.
    fn prime(&self, request: &Request<Bytes>) -> Option<Principal>;
}

/// Treats every request as unauthenticated.
#[derive(Clone, Copy, Debug, Default)]
pub struct Anonymous;

impl SecurityContext for Anonymous {
    fn prime(&self, _request: &Request<Bytes>) -> Option<Principal> {
        None
    }
}
