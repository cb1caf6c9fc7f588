//! Recovery of actor identities from ambiguous storage keys.
//!
//! Storage keys join actor id and state name with an underscore, so an
//! actor id that itself contains underscores makes a naive split ambiguous.
//! The presence-marker set narrows the candidates; when more than one known
//! actor id still fits, host-registered resolvers are consulted in
//! registration order.

use std::collections::BTreeSet;

use crate::error::{MigrationError, Result};
use crate::keys::actor_id_from_presence_key;

/// A storage key resolved back to its actor identity
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedKey {
    /// Actor id the key belongs to
    pub actor_id: String,
    /// State name within the actor
    pub state_name: String,
}

/// Host-supplied tie breaker for ambiguous keys.
///
/// `candidates` are the actor ids whose presence markers prefix the key.
/// Return the definite match, or `None` to let the next resolver try.
pub trait ActorIdResolver: Send + Sync {
    /// Attempt to pick the owning actor id for a key
    fn resolve(&self, key: &str, candidates: &[String]) -> Option<String>;
}

/// Resolver over the presence-marker set and a registered resolver chain
pub struct KeyResolver {
    presence: BTreeSet<String>,
    resolvers: Vec<Box<dyn ActorIdResolver>>,
}

impl KeyResolver {
    /// Create a resolver from the known presence marker keys
    pub fn new<I>(presence_keys: I) -> Self
    where
        I: IntoIterator,
        I::Item: Into<String>,
    {
        KeyResolver {
            presence: presence_keys.into_iter().map(Into::into).collect(),
            resolvers: Vec::new(),
        }
    }

    /// Append a resolver to the chain, consulted in registration order
    pub fn register(&mut self, resolver: Box<dyn ActorIdResolver>) {
        self.resolvers.push(resolver);
    }

    /// Record a newly observed presence marker
    pub fn add_presence_key(&mut self, presence_key: impl Into<String>) {
        self.presence.insert(presence_key.into());
    }

    /// Resolve a storage key back to its actor identity.
    ///
    /// Fails with an ambiguous-identity error when zero or several known
    /// actor ids fit and no registered resolver decides. Only the affected
    /// key is blocked, migration of other keys continues.
    pub fn resolve(&self, key: &str) -> Result<ResolvedKey> {
        let matches: Vec<(&str, &str)> = self
            .presence
            .iter()
            .filter(|presence| key.len() > presence.len() && key.starts_with(presence.as_str()))
            .filter_map(|presence| {
                actor_id_from_presence_key(presence).map(|actor_id| (presence.as_str(), actor_id))
            })
            .collect();

        match matches.as_slice() {
            [] => Err(MigrationError::AmbiguousIdentity(format!(
                "no registered actor id matches key '{}'",
                key
            ))),
            [(presence, actor_id)] => Ok(ResolvedKey {
                actor_id: (*actor_id).to_string(),
                state_name: key[presence.len()..].to_string(),
            }),
            _ => {
                let candidates: Vec<String> =
                    matches.iter().map(|(_, id)| (*id).to_string()).collect();
                for resolver in &self.resolvers {
                    if let Some(actor_id) = resolver.resolve(key, &candidates) {
                        if let Some((presence, _)) =
                            matches.iter().find(|(_, id)| *id == actor_id)
                        {
                            return Ok(ResolvedKey {
                                state_name: key[presence.len()..].to_string(),
                                actor_id,
                            });
                        }
                    }
                }
                Err(MigrationError::AmbiguousIdentity(format!(
                    "key '{}' matches {} registered actor ids and no resolver decided",
                    key,
                    candidates.len()
                )))
            }
        }
    }
}
