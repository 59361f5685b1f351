//! Privilege checks for control operations
// (c) 2025 Consign contributors

use crate::config::ServerContext;
use crate::error::ProtocolError;
use crate::session::{Role, Session};

/// Checks that `session` may perform an operation requiring `role`.
///
/// The local administration channel authenticates as the server's own host
/// id and bypasses role checks. Everything else must be authenticated and
/// hold the role (or `System`, which implies all roles).
pub fn authorize(
    ctx: &ServerContext,
    session: &Session,
    role: Role,
) -> Result<(), ProtocolError> {
    let Some(identity) = session.identity().filter(|_| session.is_authenticated()) else {
        return Err(ProtocolError::NotAuthenticated);
    };
    if let Some(local) = ctx.local_host_id(session.is_tls()) {
        if identity == local {
            return Ok(());
        }
    }
    if session.roles().contains(role) {
        Ok(())
    } else {
        Err(ProtocolError::Unauthorized(role))
    }
}
