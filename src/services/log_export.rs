//! Transfer log export, clean and purge
// (c) 2025 Consign contributors

use std::path::PathBuf;
use std::sync::Arc;

use chrono::{NaiveDateTime, Utc};

use crate::error::ProtocolError;
use crate::protocol::{LogNode, LogResponseNode};
use crate::store::{LogFilter, TransferStore};

const TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Exports matching transfer records to an XML file, optionally flipping
/// finished records to Done first and purging the exported range after.
pub struct LogExportPurge {
    store: Arc<dyn TransferStore>,
    archive_dir: PathBuf,
    host_id: String,
}

impl std::fmt::Debug for LogExportPurge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LogExportPurge")
            .field("archive_dir", &self.archive_dir)
            .finish_non_exhaustive()
    }
}

fn parse_bound(text: Option<&str>) -> Result<Option<NaiveDateTime>, ProtocolError> {
    text.map(|t| {
        NaiveDateTime::parse_from_str(t, TIME_FORMAT)
            .map_err(|e| ProtocolError::PacketFormat(format!("bad time bound {t:?}: {e}")))
    })
    .transpose()
}

impl LogExportPurge {
    /// Constructor
    #[must_use]
    pub fn new(store: Arc<dyn TransferStore>, archive_dir: PathBuf, host_id: &str) -> Self {
        Self {
            store,
            archive_dir,
            host_id: host_id.to_owned(),
        }
    }

    fn filter_for(node: &LogNode) -> Result<LogFilter, ProtocolError> {
        Ok(LogFilter {
            start: parse_bound(node.start.as_deref())?,
            stop: parse_bound(node.stop.as_deref())?,
            start_id: node.start_id,
            stop_id: node.stop_id,
            rule: node.rule.clone(),
            requester: node.request.clone(),
            pending: node.status_pending,
            in_transfer: node.status_transfer,
            done: node.status_done,
            error: node.status_error,
        })
    }

    /// Runs the export pass described by `node`.
    ///
    /// The purge, when requested, never outruns the export: its upper id
    /// bound is clamped to the highest id actually written out, so records
    /// created between the two passes survive.
    pub async fn handle(&self, node: &LogNode) -> Result<LogResponseNode, ProtocolError> {
        let filter = Self::filter_for(node)?;

        if node.clean {
            let updated = self.store.finished_to_done(&filter).await?;
            tracing::debug!("log clean pass updated {updated} records");
        }

        let records = self.store.query(&filter).await?;
        let exported = records.len() as u64;
        let highest_id = records.iter().map(|r| r.special_id).max();

        let filename = self.archive_dir.join(format!(
            "{}_{}_runners.xml",
            self.host_id,
            Utc::now().format("%Y%m%d%H%M%S%3f")
        ));
        let mut doc = String::from("<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n<taskrunners>\n");
        for record in &records {
            doc.push_str(&record.to_xml());
            doc.push('\n');
        }
        doc.push_str("</taskrunners>\n");
        tokio::fs::write(&filename, doc)
            .await
            .map_err(crate::store::StoreError::from)?;

        let purged = if node.purge {
            match highest_id {
                Some(highest) => {
                    let mut purge_filter = filter;
                    purge_filter.stop_id =
                        Some(purge_filter.stop_id.map_or(highest, |s| s.min(highest)));
                    self.store.delete_matching(&purge_filter).await?
                }
                // nothing exported, nothing to purge
                None => 0,
            }
        } else {
            0
        };

        tracing::info!(
            "log export wrote {exported} records to {}, purged {purged}",
            filename.display()
        );
        Ok(LogResponseNode {
            filename: filename.display().to_string(),
            exported,
            purged,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MockTransferStore;
    use crate::transfer::tests::sample_record;
    use pretty_assertions::assert_eq;

    fn record_with_id(id: i64) -> crate::transfer::TransferRecord {
        let mut r = sample_record();
        r.special_id = id;
        r
    }

    #[tokio::test]
    async fn purge_clamps_to_highest_exported_id() {
        let mut store = MockTransferStore::new();
        let _ = store
            .expect_query()
            .returning(|_| Ok(vec![record_with_id(100), record_with_id(480)]));
        let _ = store
            .expect_delete_matching()
            .withf(|f| f.stop_id == Some(480))
            .returning(|_| Ok(2));
        let dir = tempfile::tempdir().unwrap();
        let svc = LogExportPurge::new(Arc::new(store), dir.path().to_owned(), "hosta");

        let reply = svc
            .handle(&LogNode {
                purge: true,
                stop_id: Some(1000),
                ..LogNode::default()
            })
            .await
            .unwrap();
        assert_eq!(reply.exported, 2);
        assert_eq!(reply.purged, 2);
        let body = std::fs::read_to_string(&reply.filename).unwrap();
        assert!(body.contains("<specialid>480</specialid>"));
    }

    #[tokio::test]
    async fn empty_export_purges_nothing() {
        let mut store = MockTransferStore::new();
        let _ = store.expect_query().returning(|_| Ok(vec![]));
        // delete_matching must not be called
        let dir = tempfile::tempdir().unwrap();
        let svc = LogExportPurge::new(Arc::new(store), dir.path().to_owned(), "hosta");
        let reply = svc
            .handle(&LogNode {
                purge: true,
                ..LogNode::default()
            })
            .await
            .unwrap();
        assert_eq!(reply.exported, 0);
        assert_eq!(reply.purged, 0);
    }

    #[tokio::test]
    async fn clean_pass_runs_before_export() {
        let mut store = MockTransferStore::new();
        let _ = store.expect_finished_to_done().times(1).returning(|_| Ok(3));
        let _ = store.expect_query().returning(|_| Ok(vec![]));
        let dir = tempfile::tempdir().unwrap();
        let svc = LogExportPurge::new(Arc::new(store), dir.path().to_owned(), "hosta");
        let _ = svc
            .handle(&LogNode {
                clean: true,
                ..LogNode::default()
            })
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn malformed_time_bound_is_refused() {
        let store = MockTransferStore::new();
        let dir = tempfile::tempdir().unwrap();
        let svc = LogExportPurge::new(Arc::new(store), dir.path().to_owned(), "hosta");
        let err = svc
            .handle(&LogNode {
                start: Some("yesterday".into()),
                ..LogNode::default()
            })
            .await
            .unwrap_err();
        assert!(matches!(err, ProtocolError::PacketFormat(_)));
    }
}
