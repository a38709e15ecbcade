use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use harbor_domain::{ExecKind, ExecutionRecord, ExecutionRecordId, Ship, ShipStatus, SessionId};
use harbor_scheduler::Scheduler;
use harbor_store::StateStore;
use tracing::warn;

use crate::error::ProxyError;
use crate::url::ship_url;

const EXEC_TIMEOUT: Duration = Duration::from_secs(30);
const TRANSFER_TIMEOUT: Duration = Duration::from_secs(120);

/// A successful forward's payload plus, for exec operations, the
/// ExecutionRecord identifier clients can later annotate.
pub struct ExecuteOutcome {
    pub data: serde_json::Value,
    pub execution_id: Option<ExecutionRecordId>,
}

/// Forwards exec/upload/download requests to a Ship, per spec §4.6:
/// load-then-check-then-forward-then-refresh. Owns its own `reqwest::Client`
/// (distinct timeouts are set per-request, not on the client) and its own
/// copy of the address-colon URL convention — see DESIGN.md.
pub struct Proxy {
    store: Arc<dyn StateStore>,
    scheduler: Arc<Scheduler>,
    client: reqwest::Client,
    container_port: u16,
}

impl Proxy {
    pub fn new(store: Arc<dyn StateStore>, scheduler: Arc<Scheduler>, container_port: u16) -> Self {
        Proxy {
            store,
            scheduler,
            client: reqwest::Client::new(),
            container_port,
        }
    }

    /// `(type, payload)` forward. `exec_type` is the literal downstream path
    /// (`shell/exec`, `ipython/exec`, `fs/read_file`, ...). An ExecutionRecord
    /// is persisted only for `shell/exec`/`ipython/exec`.
    pub async fn execute(
        &self,
        ship_id: &str,
        session_id: &SessionId,
        exec_type: &str,
        payload: serde_json::Value,
    ) -> Result<ExecuteOutcome, ProxyError> {
        let started = tokio::time::Instant::now();
        let (ship, binding) = self.load_ship_and_binding(ship_id, session_id).await?;
        let address = ship.address.as_ref().ok_or_else(|| ProxyError::NoAddress(ship.id.to_string()))?;

        let url = ship_url(address, self.container_port, exec_type);
        let data = self.post(&url, &payload, session_id, EXEC_TIMEOUT).await?;

        self.refresh_after_success(&ship, &binding).await?;

        let execution_id = match exec_kind_for(exec_type) {
            Some(kind) => {
                let elapsed_ms = started.elapsed().as_millis() as i64;
                Some(self.record_execution(session_id, kind, &payload, &data, elapsed_ms).await)
            }
            None => None,
        };

        Ok(ExecuteOutcome { data, execution_id })
    }

    /// Uploads `content` to `file_path` on the Ship, 120s timeout, matching
    /// `upload_file_to_ship`'s multipart shape.
    pub async fn upload(
        &self,
        ship_id: &str,
        session_id: &SessionId,
        file_path: &str,
        content: Vec<u8>,
    ) -> Result<serde_json::Value, ProxyError> {
        let (ship, binding) = self.load_ship_and_binding(ship_id, session_id).await?;
        let address = ship.address.as_ref().ok_or_else(|| ProxyError::NoAddress(ship.id.to_string()))?;
        let url = ship_url(address, self.container_port, "upload");

        let part = reqwest::multipart::Part::bytes(content)
            .file_name("upload")
            .mime_str("application/octet-stream")
            .expect("static mime type always parses");
        let form = reqwest::multipart::Form::new()
            .part("file", part)
            .text("file_path", file_path.to_string());

        let resp = self
            .client
            .post(&url)
            .header("X-SESSION-ID", session_id.as_str())
            .multipart(form)
            .timeout(TRANSFER_TIMEOUT)
            .send()
            .await?;

        let data = Self::read_json_or_forward_error(resp).await?;
        self.refresh_after_success(&ship, &binding).await?;
        Ok(data)
    }

    /// Downloads `file_path` from the Ship, 120s timeout, returning the raw
    /// bytes, matching `download_file_from_ship`.
    pub async fn download(
        &self,
        ship_id: &str,
        session_id: &SessionId,
        file_path: &str,
    ) -> Result<Vec<u8>, ProxyError> {
        let (ship, binding) = self.load_ship_and_binding(ship_id, session_id).await?;
        let address = ship.address.as_ref().ok_or_else(|| ProxyError::NoAddress(ship.id.to_string()))?;
        let url = ship_url(address, self.container_port, "download");

        let resp = self
            .client
            .get(&url)
            .query(&[("file_path", file_path)])
            .header("X-SESSION-ID", session_id.as_str())
            .timeout(TRANSFER_TIMEOUT)
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(ProxyError::Forward { status: status.as_u16(), body });
        }
        let bytes = resp.bytes().await?.to_vec();

        self.refresh_after_success(&ship, &binding).await?;
        Ok(bytes)
    }

    async fn load_ship_and_binding(
        &self,
        ship_id: &str,
        session_id: &SessionId,
    ) -> Result<(Ship, harbor_domain::Binding), ProxyError> {
        let sid = harbor_domain::ShipId::new(ship_id);
        let ship = self.store.get_ship(&sid).await?.ok_or_else(|| ProxyError::ShipNotFound(ship_id.to_string()))?;
        if ship.status != ShipStatus::Running {
            return Err(ProxyError::ShipNotRunning(ship_id.to_string()));
        }

        let binding = self
            .store
            .binding_for_session_and_ship(session_id, &ship.id)
            .await?
            .ok_or_else(|| ProxyError::AccessDenied {
                session_id: session_id.as_str().to_string(),
                ship_id: ship_id.to_string(),
            })?;

        Ok((ship, binding))
    }

    async fn post(
        &self,
        url: &str,
        payload: &serde_json::Value,
        session_id: &SessionId,
        timeout: Duration,
    ) -> Result<serde_json::Value, ProxyError> {
        let resp = self
            .client
            .post(url)
            .header("X-SESSION-ID", session_id.as_str())
            .json(payload)
            .timeout(timeout)
            .send()
            .await?;
        Self::read_json_or_forward_error(resp).await
    }

    async fn read_json_or_forward_error(resp: reqwest::Response) -> Result<serde_json::Value, ProxyError> {
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(ProxyError::Forward { status: status.as_u16(), body });
        }
        Ok(resp.json().await?)
    }

    /// Refresh-on-operation: reset the binding's expiry to `now +
    /// initial_ttl` and recompute the Ship's scheduled cleanup, per §4.4.
    async fn refresh_after_success(&self, ship: &Ship, binding: &harbor_domain::Binding) -> Result<(), ProxyError> {
        let now = Utc::now();
        let mut refreshed = binding.clone();
        refreshed.refresh(now);
        self.store.upsert_binding(&refreshed).await?;
        self.scheduler.recalculate_and_schedule(&ship.id).await?;
        Ok(())
    }

    /// Fire-and-forget append per §4.6 step 7: a failed write is logged and
    /// swallowed, never fails the client's request.
    async fn record_execution(
        &self,
        session_id: &SessionId,
        kind: ExecKind,
        payload: &serde_json::Value,
        data: &serde_json::Value,
        elapsed_ms: i64,
    ) -> ExecutionRecordId {
        let code_or_command = code_or_command_from_payload(kind, payload);
        let success = data.get("success").and_then(|v| v.as_bool()).unwrap_or(true);

        let record = ExecutionRecord {
            id: ExecutionRecordId::generate(),
            session_id: session_id.clone(),
            kind,
            code_or_command,
            success,
            execution_time_ms: Some(elapsed_ms),
            created_at: Utc::now(),
            description: None,
            tags: None,
            notes: None,
        };

        let id = record.id.clone();
        if let Err(e) = self.store.append_execution_record(&record).await {
            warn!(execution_id = %id, error = %e, "failed to persist execution record, continuing");
        }
        id
    }
}

fn exec_kind_for(exec_type: &str) -> Option<ExecKind> {
    match exec_type {
        "ipython/exec" => Some(ExecKind::Python),
        "shell/exec" => Some(ExecKind::Shell),
        _ => None,
    }
}

fn code_or_command_from_payload(kind: ExecKind, payload: &serde_json::Value) -> String {
    let key = match kind {
        ExecKind::Python => "code",
        ExecKind::Shell => "command",
    };
    payload
        .get(key)
        .and_then(|v| v.as_str())
        .map(str::to_string)
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use harbor_domain::{Binding, ShipId};
    use harbor_driver::{Driver, LocalDriver};
    use harbor_store::InMemoryStore;
    use serde_json::json;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    async fn running_ship_with_binding(
        store: &Arc<dyn StateStore>,
        server: &MockServer,
    ) -> (ShipId, SessionId) {
        let now = Utc::now();
        let ship_id = ShipId::generate();
        let mut ship = Ship::new_creating(ship_id.clone(), 60, now);
        ship.mark_running("c1".into(), server.address().to_string(), now);
        store.upsert_ship(&ship).await.unwrap();

        let session_id = SessionId::new("s1").unwrap();
        let binding = Binding::new(session_id.clone(), ship_id.clone(), 60, now);
        store.upsert_binding(&binding).await.unwrap();

        (ship_id, session_id)
    }

    fn proxy(store: Arc<dyn StateStore>) -> Proxy {
        let driver: Arc<dyn Driver> = Arc::new(LocalDriver::new());
        let scheduler = Scheduler::new(store.clone(), driver);
        Proxy::new(store, scheduler, 8123)
    }

    #[tokio::test]
    async fn exec_forward_persists_an_execution_record_for_shell_exec() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/shell/exec"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"success": true, "stdout": "hi"})))
            .mount(&server)
            .await;

        let store: Arc<dyn StateStore> = Arc::new(InMemoryStore::new());
        let (ship_id, session_id) = running_ship_with_binding(&store, &server).await;
        let p = proxy(store.clone());

        let outcome = p
            .execute(ship_id.as_str(), &session_id, "shell/exec", json!({"command": "echo hi"}))
            .await
            .unwrap();

        assert_eq!(outcome.data["stdout"], "hi");
        let execution_id = outcome.execution_id.expect("shell/exec records an execution");
        let record = store.get_execution_record(&execution_id).await.unwrap().unwrap();
        assert_eq!(record.code_or_command, "echo hi");
        assert!(record.success);
    }

    #[tokio::test]
    async fn exec_forward_does_not_record_non_exec_operations() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/fs/read_file"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"content": "abc"})))
            .mount(&server)
            .await;

        let store: Arc<dyn StateStore> = Arc::new(InMemoryStore::new());
        let (ship_id, session_id) = running_ship_with_binding(&store, &server).await;
        let p = proxy(store);

        let outcome = p
            .execute(ship_id.as_str(), &session_id, "fs/read_file", json!({"path": "/tmp/a"}))
            .await
            .unwrap();

        assert!(outcome.execution_id.is_none());
    }

    #[tokio::test]
    async fn exec_forward_refreshes_the_binding_expiry() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/shell/exec"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"success": true})))
            .mount(&server)
            .await;

        let store: Arc<dyn StateStore> = Arc::new(InMemoryStore::new());
        let (ship_id, session_id) = running_ship_with_binding(&store, &server).await;
        let p = proxy(store.clone());

        let before = store
            .binding_for_session_and_ship(&session_id, &ship_id)
            .await
            .unwrap()
            .unwrap();

        tokio::time::sleep(Duration::from_millis(5)).await;
        p.execute(ship_id.as_str(), &session_id, "shell/exec", json!({"command": "x"})).await.unwrap();

        let after = store
            .binding_for_session_and_ship(&session_id, &ship_id)
            .await
            .unwrap()
            .unwrap();
        assert!(after.expires_at > before.expires_at);
    }

    #[tokio::test]
    async fn non_2xx_downstream_surfaces_as_forward_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/shell/exec"))
            .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
            .mount(&server)
            .await;

        let store: Arc<dyn StateStore> = Arc::new(InMemoryStore::new());
        let (ship_id, session_id) = running_ship_with_binding(&store, &server).await;
        let p = proxy(store);

        let err = p
            .execute(ship_id.as_str(), &session_id, "shell/exec", json!({"command": "x"}))
            .await
            .unwrap_err();
        match err {
            ProxyError::Forward { status, body } => {
                assert_eq!(status, 500);
                assert_eq!(body, "boom");
            }
            other => panic!("expected Forward error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn unbound_session_is_denied() {
        let server = MockServer::start().await;
        let store: Arc<dyn StateStore> = Arc::new(InMemoryStore::new());

        let now = Utc::now();
        let ship_id = ShipId::generate();
        let mut ship = Ship::new_creating(ship_id.clone(), 60, now);
        ship.mark_running("c1".into(), server.address().to_string(), now);
        store.upsert_ship(&ship).await.unwrap();

        let p = proxy(store);
        let stranger = SessionId::new("stranger").unwrap();
        let err = p.execute(ship_id.as_str(), &stranger, "shell/exec", json!({})).await.unwrap_err();
        assert!(matches!(err, ProxyError::AccessDenied { .. }));
    }

    #[tokio::test]
    async fn stopped_ship_is_rejected() {
        let store: Arc<dyn StateStore> = Arc::new(InMemoryStore::new());
        let now = Utc::now();
        let ship_id = ShipId::generate();
        let ship = Ship::new_creating(ship_id.clone(), 60, now);
        store.upsert_ship(&ship).await.unwrap();

        let session_id = SessionId::new("s1").unwrap();
        let p = proxy(store);
        let err = p.execute(ship_id.as_str(), &session_id, "shell/exec", json!({})).await.unwrap_err();
        assert!(matches!(err, ProxyError::ShipNotRunning(_)));
    }

    #[tokio::test]
    async fn upload_and_download_round_trip_through_the_mock_ship() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/upload"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"success": true})))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/download"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"payload".to_vec()))
            .mount(&server)
            .await;

        let store: Arc<dyn StateStore> = Arc::new(InMemoryStore::new());
        let (ship_id, session_id) = running_ship_with_binding(&store, &server).await;
        let p = proxy(store);

        p.upload(ship_id.as_str(), &session_id, "/tmp/a.txt", b"hello".to_vec()).await.unwrap();
        let bytes = p.download(ship_id.as_str(), &session_id, "/tmp/a.txt").await.unwrap();
        assert_eq!(bytes, b"payload");
    }
}
