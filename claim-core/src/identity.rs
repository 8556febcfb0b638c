//! Identity resolution
//!
//! The identity provider owns actors; the core only asks who is behind
//! the current request, once, before any engine logic runs.

use crate::types::ActorId;
use async_trait::async_trait;

/// Maps the current authenticated session to an actor
#[async_trait]
pub trait IdentityResolver: Send + Sync {
    /// Actor behind the current request, `None` when unauthenticated
    async fn current_actor(&self) -> Option<ActorId>;
}

/// Resolver over a session subject handed in by the web layer
#[derive(Debug, Clone, Default)]
pub struct SessionResolver {
    subject: Option<String>,
}

impl SessionResolver {
    /// Session authenticated as `subject`
    pub fn authenticated(subject: impl Into<String>) -> Self {
        Self {
            subject: Some(subject.into()),
        }
    }

    /// Session with no identity
    pub fn anonymous() -> Self {
        Self::default()
    }
}

#[async_trait]
impl IdentityResolver for SessionResolver {
    async fn current_actor(&self) -> Option<ActorId> {
        self.subject
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(ActorId::new)
    }
}
