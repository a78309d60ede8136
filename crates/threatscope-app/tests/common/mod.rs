//! Shared fixtures for app integration tests.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use threatscope_core::{
    AnalysisCreated, AnalysisDetail, AnalysisLogs, AnalysisStatus, AnalysisSummary,
    Notification, NotificationsUnread, StagedFile,
};
use threatscope_gateway::{AnalysisGateway, GatewayError};
use tokio::sync::Notify;

type Script<T> = Mutex<VecDeque<Result<T, GatewayError>>>;

/// Gateway answering from per-operation scripts and counting calls.
#[derive(Default)]
pub struct ScriptedGateway {
    creates: Script<AnalysisCreated>,
    details: Script<AnalysisDetail>,
    lists: Script<Vec<AnalysisSummary>>,
    unread: Script<NotificationsUnread>,
    mark_reads: Script<()>,
    fail_logs: AtomicBool,
    detail_gate: Mutex<Option<Arc<Notify>>>,
    list_gate: Mutex<Option<Arc<Notify>>>,
    delete_gate: Mutex<Option<Arc<Notify>>>,
    create_calls: AtomicUsize,
    detail_calls: AtomicUsize,
    log_calls: AtomicUsize,
    list_calls: AtomicUsize,
    delete_calls: AtomicUsize,
    mark_calls: AtomicUsize,
}

#[allow(dead_code)]
impl ScriptedGateway {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn push_create(&self, outcome: Result<AnalysisCreated, GatewayError>) {
        self.creates.lock().expect("script lock").push_back(outcome);
    }

    pub fn push_detail(&self, outcome: Result<AnalysisDetail, GatewayError>) {
        self.details.lock().expect("script lock").push_back(outcome);
    }

    pub fn push_list(&self, outcome: Result<Vec<AnalysisSummary>, GatewayError>) {
        self.lists.lock().expect("script lock").push_back(outcome);
    }

    pub fn push_unread(&self, outcome: Result<NotificationsUnread, GatewayError>) {
        self.unread.lock().expect("script lock").push_back(outcome);
    }

    pub fn push_mark_read(&self, outcome: Result<(), GatewayError>) {
        self.mark_reads.lock().expect("script lock").push_back(outcome);
    }

    pub fn fail_logs(&self) {
        self.fail_logs.store(true, Ordering::SeqCst);
    }

    /// Makes every detail fetch wait for a permit on the returned gate.
    pub fn gate_details(&self) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        *self.detail_gate.lock().expect("gate lock") = Some(Arc::clone(&gate));
        gate
    }

    /// Makes every list fetch wait for a permit on the returned gate.
    pub fn gate_lists(&self) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        *self.list_gate.lock().expect("gate lock") = Some(Arc::clone(&gate));
        gate
    }

    /// Makes every delete call wait for a permit on the returned gate.
    pub fn gate_deletes(&self) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        *self.delete_gate.lock().expect("gate lock") = Some(Arc::clone(&gate));
        gate
    }

    pub fn create_calls(&self) -> usize {
        self.create_calls.load(Ordering::SeqCst)
    }

    pub fn detail_calls(&self) -> usize {
        self.detail_calls.load(Ordering::SeqCst)
    }

    pub fn log_calls(&self) -> usize {
        self.log_calls.load(Ordering::SeqCst)
    }

    pub fn list_calls(&self) -> usize {
        self.list_calls.load(Ordering::SeqCst)
    }

    pub fn delete_calls(&self) -> usize {
        self.delete_calls.load(Ordering::SeqCst)
    }

    pub fn mark_calls(&self) -> usize {
        self.mark_calls.load(Ordering::SeqCst)
    }
}

fn next<T>(script: &Script<T>) -> Result<T, GatewayError> {
    script
        .lock()
        .expect("script lock")
        .pop_front()
        .unwrap_or_else(|| Err(transport_error("script exhausted")))
}

async fn pass(gate: &Mutex<Option<Arc<Notify>>>) {
    let gate = gate.lock().expect("gate lock").clone();
    if let Some(gate) = gate {
        gate.notified().await;
    }
}

#[async_trait]
impl AnalysisGateway for ScriptedGateway {
    async fn create_analysis(&self, _file: &StagedFile) -> Result<AnalysisCreated, GatewayError> {
        self.create_calls.fetch_add(1, Ordering::SeqCst);
        next(&self.creates)
    }

    async fn list_analyses(
        &self,
        _status: Option<AnalysisStatus>,
    ) -> Result<Vec<AnalysisSummary>, GatewayError> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        pass(&self.list_gate).await;
        next(&self.lists)
    }

    async fn get_analysis(&self, _id: &str) -> Result<AnalysisDetail, GatewayError> {
        self.detail_calls.fetch_add(1, Ordering::SeqCst);
        pass(&self.detail_gate).await;
        next(&self.details)
    }

    async fn get_logs(&self, _id: &str) -> Result<AnalysisLogs, GatewayError> {
        let call = self.log_calls.fetch_add(1, Ordering::SeqCst) + 1;
        if self.fail_logs.load(Ordering::SeqCst) {
            return Err(transport_error("logs unavailable"));
        }
        Ok(AnalysisLogs {
            logs: format!("log line {call}"),
        })
    }

    async fn delete_analysis(&self, _id: &str) -> Result<(), GatewayError> {
        self.delete_calls.fetch_add(1, Ordering::SeqCst);
        pass(&self.delete_gate).await;
        Ok(())
    }

    async fn unread_notifications(&self) -> Result<NotificationsUnread, GatewayError> {
        next(&self.unread)
    }

    async fn mark_notification_read(&self, _id: &str) -> Result<(), GatewayError> {
        self.mark_calls.fetch_add(1, Ordering::SeqCst);
        next(&self.mark_reads)
    }

    async fn check_health(&self) -> bool {
        true
    }

    fn image_url(&self, id: &str) -> String {
        format!("http://api.test/api/v1/analyses/{id}/image")
    }
}

#[allow(dead_code)]
pub fn transport_error(message: &str) -> GatewayError {
    GatewayError::Transport {
        status: None,
        message: message.to_string(),
    }
}

#[allow(dead_code)]
pub fn png_file() -> StagedFile {
    StagedFile::new("diagram.png", b"\x89PNG\r\n\x1a\narchitecture".to_vec())
        .expect("png fixture should stage")
}

#[allow(dead_code)]
pub fn created(id: &str, status: &str) -> AnalysisCreated {
    serde_json::from_value(serde_json::json!({
        "id": id,
        "code": "AN-0001",
        "status": status,
        "created_at": "2025-01-01T12:00:00Z",
        "image_url": format!("/api/v1/analyses/{id}/image"),
    }))
    .expect("created fixture should decode")
}

/// Detail record in a non-terminal status.
#[allow(dead_code)]
pub fn running(id: &str, status: &str) -> AnalysisDetail {
    serde_json::from_value(serde_json::json!({
        "id": id,
        "code": "AN-0001",
        "status": status,
        "created_at": "2025-01-01T12:00:00Z",
    }))
    .expect("running fixture should decode")
}

/// Analyzed record carrying the three-threat result.
#[allow(dead_code)]
pub fn analyzed(id: &str) -> AnalysisDetail {
    serde_json::from_value(serde_json::json!({
        "id": id,
        "code": "AN-0001",
        "status": "ANALYZED",
        "created_at": "2025-01-01T12:00:00Z",
        "finished_at": "2025-01-01T12:03:00Z",
        "result": {
            "risk_score": 7.8,
            "threats": [{"dread_score": 6}, {"dread_score": 9}, {}]
        }
    }))
    .expect("analyzed fixture should decode")
}

#[allow(dead_code)]
pub fn failed(id: &str, message: &str) -> AnalysisDetail {
    serde_json::from_value(serde_json::json!({
        "id": id,
        "code": "AN-0001",
        "status": "FAILED",
        "created_at": "2025-01-01T12:00:00Z",
        "finished_at": "2025-01-01T12:01:00Z",
        "error_message": message,
    }))
    .expect("failed fixture should decode")
}

#[allow(dead_code)]
pub fn summary(id: &str) -> AnalysisSummary {
    serde_json::from_value(serde_json::json!({
        "id": id,
        "code": format!("AN-{id}"),
        "status": "OPEN",
        "created_at": "2025-01-01T12:00:00Z",
    }))
    .expect("summary fixture should decode")
}

#[allow(dead_code)]
pub fn notification(id: &str, link: &str) -> Notification {
    serde_json::from_value(serde_json::json!({
        "id": id,
        "title": "Analysis finished",
        "message": format!("Notification {id}"),
        "link": link,
        "created_at": "2025-01-01T12:05:00Z",
    }))
    .expect("notification fixture should decode")
}

#[allow(dead_code)]
pub fn unread(count: u64, ids: &[&str]) -> NotificationsUnread {
    NotificationsUnread {
        unread_count: count,
        notifications: ids
            .iter()
            .map(|id| notification(id, &format!("analyses/{id}")))
            .collect(),
    }
}
