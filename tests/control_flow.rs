//! End-to-end control exchanges over in-memory fakes
// (c) 2025 Consign contributors

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use bytes::Bytes;
use chrono::NaiveDate;
use pretty_assertions::assert_eq;

use consign::config::{ContextSettings, ServerContext};
use consign::dispatch::{ActionDispatcher, DispatcherParts, Verdict};
use consign::error::ProtocolError;
use consign::local::LocalRegistry;
use consign::protocol::{
    ErrorCode, InfoQuery, InformationPacket, JsonBody, JsonCommandPacket, LogNode, Packet,
    PacketCodec, PacketType, ValidPacket,
};
use consign::session::{Role, Session};
use consign::store::{
    BusinessTask, ConfigArtifact, ConstraintMonitor, DocumentEntry, DocumentStore, LogFilter,
    NotificationSink, StoreError, TaskExecutor, TransferEngine, TransferStore,
};
use consign::transfer::{TransferKey, TransferRecord, TransferStep};

#[derive(Default)]
struct MemoryTransferStore {
    records: Mutex<HashMap<TransferKey, TransferRecord>>,
}

impl MemoryTransferStore {
    fn insert(&self, record: TransferRecord) {
        let _ = self
            .records
            .lock()
            .unwrap()
            .insert(record.key(), record);
    }

    fn get(&self, key: &TransferKey) -> Option<TransferRecord> {
        self.records.lock().unwrap().get(key).cloned()
    }

    fn matches(filter: &LogFilter, record: &TransferRecord) -> bool {
        filter.start_id.map_or(true, |id| record.special_id >= id)
            && filter.stop_id.map_or(true, |id| record.special_id <= id)
            && filter.rule.as_ref().map_or(true, |r| *r == record.rule)
    }
}

#[async_trait]
impl TransferStore for MemoryTransferStore {
    async fn load(&self, key: &TransferKey) -> Result<TransferRecord, StoreError> {
        self.get(key).ok_or_else(|| StoreError::NotFound(key.clone()))
    }

    async fn save(&self, record: &TransferRecord) -> Result<(), StoreError> {
        self.insert(record.clone());
        Ok(())
    }

    async fn query(&self, filter: &LogFilter) -> Result<Vec<TransferRecord>, StoreError> {
        let mut out: Vec<_> = self
            .records
            .lock()
            .unwrap()
            .values()
            .filter(|r| Self::matches(filter, r))
            .cloned()
            .collect();
        out.sort_by_key(|r| r.special_id);
        Ok(out)
    }

    async fn delete_matching(&self, filter: &LogFilter) -> Result<u64, StoreError> {
        let mut records = self.records.lock().unwrap();
        let before = records.len();
        records.retain(|_, r| !Self::matches(filter, r));
        Ok((before - records.len()) as u64)
    }

    async fn finished_to_done(&self, filter: &LogFilter) -> Result<u64, StoreError> {
        let mut n = 0;
        for record in self.records.lock().unwrap().values_mut() {
            if Self::matches(filter, record)
                && record.step == TransferStep::AllDone
                && record.last_error.is_success()
            {
                record.last_error = ErrorCode::CompleteOk;
                n += 1;
            }
        }
        Ok(n)
    }

    async fn local_file_of(&self, special_id: i64) -> Result<PathBuf, StoreError> {
        Err(StoreError::Backend(format!("no file for {special_id}")))
    }
}

struct MemoryDocumentStore {
    documents: Mutex<HashMap<ConfigArtifact, Vec<DocumentEntry>>>,
    rules_root: PathBuf,
}

#[async_trait]
impl DocumentStore for MemoryDocumentStore {
    async fn entries(&self, artifact: ConfigArtifact) -> Result<Vec<DocumentEntry>, StoreError> {
        Ok(self
            .documents
            .lock()
            .unwrap()
            .get(&artifact)
            .cloned()
            .unwrap_or_default())
    }

    async fn delete_all(&self, artifact: ConfigArtifact) -> Result<u64, StoreError> {
        Ok(self
            .documents
            .lock()
            .unwrap()
            .remove(&artifact)
            .map_or(0, |v| v.len() as u64))
    }

    async fn import_entries(
        &self,
        artifact: ConfigArtifact,
        entries: Vec<DocumentEntry>,
    ) -> Result<(), StoreError> {
        self.documents
            .lock()
            .unwrap()
            .entry(artifact)
            .or_default()
            .extend(entries);
        Ok(())
    }

    fn rule_directory(&self, rule: &str) -> Result<PathBuf, StoreError> {
        Ok(self.rules_root.join(rule))
    }
}

#[derive(Default)]
struct RecordingEngine {
    relaunched: Mutex<Vec<i64>>,
}

#[async_trait]
impl TransferEngine for RecordingEngine {
    async fn relaunch(&self, record: &TransferRecord) -> Result<(), StoreError> {
        self.relaunched.lock().unwrap().push(record.special_id);
        Ok(())
    }
}

#[derive(Default)]
struct FlagMonitor(AtomicBool);

impl ConstraintMonitor for FlagMonitor {
    fn overloaded(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

#[derive(Default)]
struct RecordingSink {
    warnings: Mutex<Vec<String>>,
}

impl NotificationSink for RecordingSink {
    fn warn(&self, message: &str, who: &str) {
        self.warnings
            .lock()
            .unwrap()
            .push(format!("{who}: {message}"));
    }
}

struct NoopExecutor;

#[async_trait]
impl TaskExecutor for NoopExecutor {
    async fn run(&self, _task: BusinessTask) -> Result<(), ProtocolError> {
        Ok(())
    }
}

struct Harness {
    ctx: Arc<ServerContext>,
    transfers: Arc<MemoryTransferStore>,
    engine: Arc<RecordingEngine>,
    dispatcher: ActionDispatcher,
    _archive: tempfile::TempDir,
}

fn harness() -> Harness {
    let archive = tempfile::tempdir().unwrap();
    let ctx = Arc::new(ServerContext::new(ContextSettings {
        host_id: "hosta".into(),
        shutdown_key: b"sesame".to_vec(),
        archive_dir: archive.path().to_owned(),
        ..ContextSettings::default()
    }));
    let transfers = Arc::new(MemoryTransferStore::default());
    let engine = Arc::new(RecordingEngine::default());
    let transfers_dyn: Arc<dyn TransferStore> = transfers.clone();
    let engine_dyn: Arc<dyn TransferEngine> = engine.clone();
    let dispatcher = ActionDispatcher::new(DispatcherParts {
        ctx: Arc::clone(&ctx),
        transfers: transfers_dyn,
        documents: Arc::new(MemoryDocumentStore {
            documents: Mutex::new(HashMap::new()),
            rules_root: archive.path().to_owned(),
        }),
        engine: engine_dyn,
        monitor: Arc::new(FlagMonitor::default()),
        registry: Arc::new(LocalRegistry::new()),
        notify: Arc::new(RecordingSink::default()),
        executor: Arc::new(NoopExecutor),
    });
    Harness {
        ctx,
        transfers,
        engine,
        dispatcher,
        _archive: archive,
    }
}

fn record(id: i64) -> TransferRecord {
    TransferRecord {
        rule: "default".into(),
        requester: "hostb".into(),
        requested: "hosta".into(),
        special_id: id,
        rank: 4,
        start: NaiveDate::from_ymd_opt(2026, 8, 1)
            .unwrap()
            .and_hms_opt(9, 0, 0)
            .unwrap(),
        last_error: ErrorCode::ConnectionImpossible,
        step: TransferStep::Error,
        rescheduled: false,
        self_requested: false,
        in_transfer: false,
        is_sender: false,
    }
}

fn admin_session() -> Session {
    let mut session = Session::new(false);
    session.authenticate("hostb", [Role::System].into_iter().collect());
    session
}

/// A stop ordered over the wire lands in the persisted record.
#[tokio::test]
async fn wire_stop_round_trip() {
    let h = harness();
    h.transfers.insert(record(42));

    let wire = Packet::Valid(ValidPacket::new(
        PacketType::Stop,
        String::new(),
        "hosta hostb 42".into(),
    ))
    .to_wire();
    let codec = PacketCodec::new(Arc::clone(&h.ctx));
    let packet = codec
        .decode(wire[0], Bytes::copy_from_slice(&wire[1..]))
        .unwrap();

    let verdict = h.dispatcher.handle(&mut admin_session(), packet).await;
    match verdict {
        Verdict::Close(Some(Packet::Valid(reply))) => {
            assert_eq!(reply.middle, ErrorCode::CompleteOk.code().to_string());
        }
        other => panic!("unexpected verdict {other:?}"),
    }

    let stored = h
        .transfers
        .get(&TransferKey::new("hosta".into(), "hostb".into(), 42))
        .unwrap();
    assert_eq!(stored.last_error, ErrorCode::StoppedTransfer);
    assert_eq!(stored.step, TransferStep::Error);
}

/// Restart relaunches via the engine and persists the new start time.
#[tokio::test]
async fn json_restart_relaunches() {
    let h = harness();
    h.transfers.insert(record(7));

    let packet = Packet::Json(JsonCommandPacket::new(
        PacketType::Valid,
        None,
        JsonBody::Restart(consign::protocol::RestartNode {
            requested: Some("hosta".into()),
            requester: Some("hostb".into()),
            special_id: Some(7),
            restart_time: Some("20260901060000".into()),
        }),
    ));
    let verdict = h.dispatcher.handle(&mut admin_session(), packet).await;
    match verdict {
        Verdict::Close(Some(Packet::Json(reply))) => {
            assert_eq!(reply.code, Some(ErrorCode::PreProcessingOk));
        }
        other => panic!("unexpected verdict {other:?}"),
    }
    assert_eq!(*h.engine.relaunched.lock().unwrap(), vec![7]);
    let stored = h
        .transfers
        .get(&TransferKey::new("hosta".into(), "hostb".into(), 7))
        .unwrap();
    assert_eq!(
        stored.start,
        NaiveDate::from_ymd_opt(2026, 9, 1)
            .unwrap()
            .and_hms_opt(6, 0, 0)
            .unwrap()
    );
}

/// Log export with purge removes exactly the exported range.
#[tokio::test]
async fn log_export_then_purge() {
    let h = harness();
    for id in [1, 2, 3] {
        h.transfers.insert(record(id));
    }

    let packet = Packet::Json(JsonCommandPacket::new(
        PacketType::LogPurge,
        None,
        JsonBody::Log(LogNode {
            purge: true,
            stop_id: Some(2),
            ..LogNode::default()
        }),
    ));
    let verdict = h.dispatcher.handle(&mut admin_session(), packet).await;
    let reply = match verdict {
        Verdict::Close(Some(Packet::Json(reply))) => reply,
        other => panic!("unexpected verdict {other:?}"),
    };
    let JsonBody::LogResponse(response) = reply.body else {
        panic!("unexpected body {:?}", reply.body);
    };
    assert_eq!(response.exported, 2);
    assert_eq!(response.purged, 2);
    assert!(std::fs::read_to_string(&response.filename)
        .unwrap()
        .contains("<specialid>2</specialid>"));

    // record 3 was outside the exported range and survives
    assert!(h
        .transfers
        .get(&TransferKey::new("hosta".into(), "hostb".into(), 3))
        .is_some());
    assert!(h
        .transfers
        .get(&TransferKey::new("hosta".into(), "hostb".into(), 1))
        .is_none());
}

/// Information existence and listing queries inspect the rule directory.
#[tokio::test]
async fn information_queries_list_rule_directory() {
    let h = harness();
    let rule_dir = h._archive.path().join("default");
    std::fs::create_dir_all(&rule_dir).unwrap();
    std::fs::write(rule_dir.join("a.dat"), b"x").unwrap();
    std::fs::write(rule_dir.join("b.txt"), b"y").unwrap();

    let verdict = h
        .dispatcher
        .handle(
            &mut admin_session(),
            Packet::Information(InformationPacket::new(InfoQuery::List {
                rule: "default".into(),
                pattern: "*.dat".into(),
            })),
        )
        .await;
    match verdict {
        Verdict::Close(Some(Packet::Valid(reply))) => {
            assert_eq!(reply.header, "a.dat");
        }
        other => panic!("unexpected verdict {other:?}"),
    }

    let verdict = h
        .dispatcher
        .handle(
            &mut admin_session(),
            Packet::Information(InformationPacket::new(InfoQuery::Exists {
                rule: "default".into(),
                filename: "missing.dat".into(),
            })),
        )
        .await;
    match verdict {
        Verdict::Close(Some(Packet::Valid(reply))) => {
            assert_eq!(reply.header, "missing.dat not-found");
        }
        other => panic!("unexpected verdict {other:?}"),
    }
}

/// The admission block toggle is visible through the shared context.
#[tokio::test]
async fn block_toggle_is_process_wide() {
    let h = harness();
    assert!(!h.ctx.is_blocked());
    let verdict = h
        .dispatcher
        .handle(
            &mut admin_session(),
            Packet::BlockRequest(consign::protocol::BlockRequestPacket::new(
                b"sesame".to_vec(),
                true,
            )),
        )
        .await;
    assert!(matches!(verdict, Verdict::Close(Some(_))));
    assert!(h.ctx.is_blocked());
}
