//! Configuration export and import
// (c) 2025 Consign contributors

use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::Utc;

use crate::protocol::{ConfigExportNode, ConfigExportResponseNode, ConfigImportNode, ConfigImportResponseNode};
use crate::store::{ConfigArtifact, DocumentEntry, DocumentStore, StoreError, TransferStore};

/// Exports and imports configuration document families.
///
/// Artifacts are handled independently: a failure on one is logged and
/// reported as absent in the reply, without aborting the others.
pub struct ConfigImportExport {
    documents: Arc<dyn DocumentStore>,
    transfers: Arc<dyn TransferStore>,
    archive_dir: PathBuf,
    host_id: String,
}

impl std::fmt::Debug for ConfigImportExport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConfigImportExport")
            .field("archive_dir", &self.archive_dir)
            .finish_non_exhaustive()
    }
}

impl ConfigImportExport {
    /// Constructor
    #[must_use]
    pub fn new(
        documents: Arc<dyn DocumentStore>,
        transfers: Arc<dyn TransferStore>,
        archive_dir: PathBuf,
        host_id: &str,
    ) -> Self {
        Self {
            documents,
            transfers,
            archive_dir,
            host_id: host_id.to_owned(),
        }
    }

    /// Root directory of a rule's receive area, for listing queries.
    pub fn rule_directory(&self, rule: &str) -> Result<PathBuf, StoreError> {
        self.documents.rule_directory(rule)
    }

    async fn export_one(&self, artifact: ConfigArtifact) -> Result<String, StoreError> {
        let entries = self.documents.entries(artifact).await?;
        let path = self.archive_dir.join(format!(
            "{}_{}_{}.json",
            self.host_id,
            Utc::now().format("%Y%m%d%H%M%S%3f"),
            artifact.to_string().to_lowercase()
        ));
        let body = serde_json::to_vec_pretty(&entries)
            .map_err(|e| StoreError::Backend(e.to_string()))?;
        tokio::fs::write(&path, body).await?;
        Ok(path.display().to_string())
    }

    /// Writes out each requested artifact family to its own file.
    pub async fn export(&self, node: &ConfigExportNode) -> ConfigExportResponseNode {
        let mut reply = ConfigExportResponseNode::default();
        for (wanted, artifact, slot) in [
            (node.host, ConfigArtifact::Hosts, &mut reply.file_host),
            (node.rule, ConfigArtifact::Rules, &mut reply.file_rule),
            (node.business, ConfigArtifact::Business, &mut reply.file_business),
            (node.alias, ConfigArtifact::Aliases, &mut reply.file_alias),
            (node.roles, ConfigArtifact::Roles, &mut reply.file_roles),
        ] {
            if !wanted {
                continue;
            }
            match self.export_one(artifact).await {
                Ok(path) => *slot = Some(path),
                Err(e) => tracing::warn!("export of {artifact} failed: {e}"),
            }
        }
        reply
    }

    async fn source_path(
        &self,
        path: Option<&str>,
        transfer_id: Option<i64>,
    ) -> Result<Option<PathBuf>, StoreError> {
        if let Some(p) = path {
            return Ok(Some(PathBuf::from(p)));
        }
        match transfer_id {
            Some(id) => Ok(Some(self.transfers.local_file_of(id).await?)),
            None => Ok(None),
        }
    }

    async fn read_entries(path: &Path) -> Result<Vec<DocumentEntry>, StoreError> {
        let body = tokio::fs::read(path).await?;
        serde_json::from_slice(&body).map_err(|e| StoreError::Backend(e.to_string()))
    }

    /// Imports one artifact family. When `purge` is set the existing
    /// documents are snapshotted and deleted first; if the subsequent
    /// import fails the snapshot is restored.
    async fn import_one(
        &self,
        artifact: ConfigArtifact,
        purge: bool,
        source: &Path,
    ) -> Result<(bool, bool), StoreError> {
        let entries = Self::read_entries(source).await?;
        let mut purged = false;
        let snapshot = if purge {
            let snapshot = self.documents.entries(artifact).await?;
            let _ = self.documents.delete_all(artifact).await?;
            purged = true;
            Some(snapshot)
        } else {
            None
        };
        match self.documents.import_entries(artifact, entries).await {
            Ok(()) => Ok((purged, true)),
            Err(e) => {
                if let Some(snapshot) = snapshot {
                    if let Err(restore) =
                        self.documents.import_entries(artifact, snapshot).await
                    {
                        tracing::error!("restore of {artifact} after failed import: {restore}");
                    }
                }
                Err(e)
            }
        }
    }

    /// Imports each artifact family named by `node`, from an explicit path
    /// or from the received file of a completed transfer.
    pub async fn import(&self, node: &ConfigImportNode) -> ConfigImportResponseNode {
        let mut reply = ConfigImportResponseNode::default();
        let requests = [
            (
                ConfigArtifact::Hosts,
                node.purge_host,
                node.host.as_deref(),
                node.host_id,
            ),
            (
                ConfigArtifact::Rules,
                node.purge_rule,
                node.rule.as_deref(),
                node.rule_id,
            ),
            (
                ConfigArtifact::Business,
                node.purge_business,
                node.business.as_deref(),
                node.business_id,
            ),
            (
                ConfigArtifact::Aliases,
                node.purge_alias,
                node.alias.as_deref(),
                node.alias_id,
            ),
            (
                ConfigArtifact::Roles,
                node.purge_roles,
                node.roles.as_deref(),
                node.roles_id,
            ),
        ];
        for (artifact, purge, path, transfer_id) in requests {
            let source = match self.source_path(path, transfer_id).await {
                Ok(Some(p)) => p,
                Ok(None) => continue,
                Err(e) => {
                    tracing::warn!("no import source for {artifact}: {e}");
                    continue;
                }
            };
            match self.import_one(artifact, purge, &source).await {
                Ok((purged, imported)) => {
                    Self::set_flags(&mut reply, artifact, purged, imported);
                }
                Err(e) => tracing::warn!("import of {artifact} failed: {e}"),
            }
        }
        reply
    }

    fn set_flags(
        reply: &mut ConfigImportResponseNode,
        artifact: ConfigArtifact,
        purged: bool,
        imported: bool,
    ) {
        let (p, i) = match artifact {
            ConfigArtifact::Hosts => (&mut reply.purged_host, &mut reply.imported_host),
            ConfigArtifact::Rules => (&mut reply.purged_rule, &mut reply.imported_rule),
            ConfigArtifact::Business => {
                (&mut reply.purged_business, &mut reply.imported_business)
            }
            ConfigArtifact::Aliases => (&mut reply.purged_alias, &mut reply.imported_alias),
            ConfigArtifact::Roles => (&mut reply.purged_roles, &mut reply.imported_roles),
        };
        *p = purged;
        *i = imported;
    }
}
