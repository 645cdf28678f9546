//! Host-key trust decisions.

use crate::core::error::CoreResult;
use crate::App;

/// Resolves a pending host-key update: accept rewrites `known_hosts`
/// with the new key, reject drops the record. Either way the user
/// retries the connection manually.
pub fn approve_host_key_update(app: &App, session_id: &str, approved: bool) -> CoreResult<()> {
    app.host_keys.approve_update(session_id, approved)
}
