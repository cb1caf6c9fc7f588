//! Storage-key encoding and internal marker keys.
//!
//! Source storage keys join the actor identity and the state name with an
//! underscore, `<Kind>_<ActorId>_<StateName>`. Presence markers are the same
//! encoding with an empty state name and are written once per registered
//! actor, which is what makes ambiguous identities recoverable.

use std::collections::HashSet;

use once_cell::sync::Lazy;

/// Delimiter between actor identity and state name
pub const KEY_DELIMITER: char = '_';

/// Prefix shared by every engine-internal marker key
pub const INTERNAL_KEY_PREFIX: &str = "@@";

/// Marker key set while source writes are fenced during downtime
pub const WRITE_REJECTION_MARKER_KEY: &str = "@@reject_writes";

/// Marker key carrying the source's logical timestamp
pub const LOGICAL_TIMESTAMP_MARKER_KEY: &str = "@@logical_timestamp";

static INTERNAL_KEYS: Lazy<HashSet<&'static str>> = Lazy::new(|| {
    [WRITE_REJECTION_MARKER_KEY, LOGICAL_TIMESTAMP_MARKER_KEY]
        .into_iter()
        .collect()
});

/// Whether a storage key is engine-internal and must never migrate as user data
pub fn is_internal_key(key: &str) -> bool {
    INTERNAL_KEYS.contains(key) || key.starts_with(INTERNAL_KEY_PREFIX)
}

/// Encode a state storage key for an already-qualified actor identity
pub fn state_key(qualified_actor_id: &str, state_name: &str) -> String {
    format!("{}{}{}", qualified_actor_id, KEY_DELIMITER, state_name)
}

/// Encode the presence marker key for an already-qualified actor identity
pub fn presence_key(qualified_actor_id: &str) -> String {
    format!("{}{}", qualified_actor_id, KEY_DELIMITER)
}

/// Extract the actor id from a presence marker key.
///
/// Presence keys have the shape `<Kind>_<ActorId>_`. Returns `None` when the
/// key does not carry both the kind prefix and the trailing delimiter.
pub fn actor_id_from_presence_key(presence: &str) -> Option<&str> {
    let trimmed = presence.strip_suffix(KEY_DELIMITER)?;
    let (_kind, actor_id) = trimmed.split_once(KEY_DELIMITER)?;
    if actor_id.is_empty() {
        return None;
    }
    Some(actor_id)
}
