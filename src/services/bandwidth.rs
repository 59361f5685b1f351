//! Bandwidth ceiling queries and updates
// (c) 2025 Consign contributors

use std::sync::Arc;

use crate::config::ServerContext;
use crate::protocol::BandwidthNode;
use crate::store::NotificationSink;

/// Applies and reports the server-wide bandwidth ceilings.
pub struct BandwidthController {
    ctx: Arc<ServerContext>,
    notify: Arc<dyn NotificationSink>,
}

impl std::fmt::Debug for BandwidthController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BandwidthController").finish_non_exhaustive()
    }
}

impl BandwidthController {
    /// Constructor
    #[must_use]
    pub fn new(ctx: Arc<ServerContext>, notify: Arc<dyn NotificationSink>) -> Self {
        Self { ctx, notify }
    }

    /// Handles a get or set request from `who`. The reply always carries
    /// the ceilings in force after the call.
    pub fn handle(&self, node: &BandwidthNode, who: &str) -> BandwidthNode {
        let limits = if node.setter {
            let limits = self.ctx.apply_limits(
                node.write_global,
                node.read_global,
                node.write_session,
                node.read_session,
            );
            self.notify.warn(
                &format!(
                    "bandwidth limits changed to global {}/{} session {}/{}",
                    limits.write_global,
                    limits.read_global,
                    limits.write_session,
                    limits.read_session
                ),
                who,
            );
            tracing::info!("bandwidth limits updated by {who}");
            limits
        } else {
            self.ctx.limits()
        };
        BandwidthNode {
            setter: false,
            write_global: limits.write_global,
            read_global: limits.read_global,
            write_session: limits.write_session,
            read_session: limits.read_session,
        }
    }
}
