//! Scope-based rewriting of identity listings

use crate::error::{Error, Result};
use crate::protocol::{AgentMessage, Identity, MessageType};
use crate::ssh::AuthorizationContext;
use tracing::{debug, warn};

use super::ScopePath;

/// Result of filtering an identities answer
#[derive(Debug, Clone)]
pub struct ScopedListing {
    /// Rewritten IdentitiesAnswer with recomputed count and length
    pub message: AgentMessage,
    /// Identities that remain visible, in original order
    pub allowed: Vec<Identity>,
    /// Identities removed for this context
    pub dropped: Vec<Identity>,
}

/// Restricts identity listings to the keys a context may use
#[derive(Debug, Clone, Copy, Default)]
pub struct IdentityScopeFilter;

impl IdentityScopeFilter {
    /// Whether `identity` may be offered under `context`
    ///
    /// Identities without a scope are always visible. Scoped identities are
    /// visible only when the requested repository falls within the scope.
    pub fn is_authorized(identity: &Identity, context: &AuthorizationContext) -> bool {
        match ScopePath::from_comment(&identity.comment) {
            Ok(None) => true,
            Ok(Some(scope)) => context
                .repository
                .as_deref()
                .is_some_and(|repo| scope.authorizes(repo)),
            Err(e) => {
                warn!(comment = %identity.comment, error = %e, "Ignoring identity with invalid scope");
                false
            }
        }
    }

    /// Split identities into allowed and dropped, keeping order
    pub fn partition(
        identities: Vec<Identity>,
        context: &AuthorizationContext,
    ) -> (Vec<Identity>, Vec<Identity>) {
        identities
            .into_iter()
            .partition(|id| Self::is_authorized(id, context))
    }

    /// Rewrite an IdentitiesAnswer so it only lists authorized identities
    pub fn filter(response: &AgentMessage, context: &AuthorizationContext) -> Result<ScopedListing> {
        if response.msg_type != MessageType::IdentitiesAnswer {
            return Err(Error::InvalidMessage(format!(
                "Cannot scope {}",
                response.msg_type.as_str()
            )));
        }

        let identities = response.parse_identities()?;
        let original = identities.len();
        let (allowed, dropped) = Self::partition(identities, context);

        for identity in &dropped {
            debug!(
                fingerprint = %identity.fingerprint_string(),
                comment = %identity.comment,
                repository = ?context.repository,
                "Identity hidden by scope"
            );
        }
        debug!(
            original = original,
            allowed = allowed.len(),
            "Scoped identities"
        );

        Ok(ScopedListing {
            message: AgentMessage::build_identities_answer(&allowed),
            allowed,
            dropped,
        })
    }
}
