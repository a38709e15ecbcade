use std::sync::Arc;

use axum::extract::ws::{Message as AxumMessage, WebSocket};
use chrono::Utc;
use futures_util::{SinkExt, StreamExt};
use harbor_domain::{ShipId, ShipStatus};
use harbor_store::StateStore;
use tokio_tungstenite::tungstenite::Message as TungsteniteMessage;
use tracing::{debug, error, info, warn};

/// Close codes mirroring `websocket_terminal_proxy`'s bespoke WS close
/// reasons — outside the standard 1000-1015 range, as the original's own
/// 4001/4003/4004 are.
pub const CLOSE_UNAUTHORIZED: u16 = 4001;
pub const CLOSE_ACCESS_DENIED: u16 = 4003;
pub const CLOSE_SHIP_NOT_FOUND: u16 = 4004;
pub const CLOSE_UPSTREAM_FAILURE: u16 = 1011;

pub struct TerminalRequest {
    pub ship_id: String,
    pub session_id: String,
    pub token: String,
    pub cols: u16,
    pub rows: u16,
}

/// Validates a terminal connection request before the inbound socket is
/// accepted, per §4.6's "Terminal proxy" establishment order: token, then
/// Ship existence/status/address, then session binding.
pub enum Admission {
    Admitted { address: String },
    Reject { code: u16, reason: &'static str },
}

pub async fn admit(
    store: &Arc<dyn StateStore>,
    access_token: &str,
    req: &TerminalRequest,
) -> Result<Admission, harbor_store::StoreError> {
    if req.token != access_token {
        return Ok(Admission::Reject { code: CLOSE_UNAUTHORIZED, reason: "unauthorized" });
    }

    let ship_id = ShipId::new(req.ship_id.clone());
    let ship = store.get_ship(&ship_id).await?;
    let Some(ship) = ship else {
        return Ok(Admission::Reject { code: CLOSE_SHIP_NOT_FOUND, reason: "ship not found or not running" });
    };
    if ship.status != ShipStatus::Running {
        return Ok(Admission::Reject { code: CLOSE_SHIP_NOT_FOUND, reason: "ship not found or not running" });
    }
    let Some(address) = ship.address.clone() else {
        return Ok(Admission::Reject { code: CLOSE_SHIP_NOT_FOUND, reason: "ship ip address not available" });
    };

    let session_id = match harbor_domain::SessionId::new(req.session_id.clone()) {
        Ok(id) => id,
        Err(_) => return Ok(Admission::Reject { code: CLOSE_ACCESS_DENIED, reason: "session does not have access to this ship" }),
    };
    let binding = store.binding_for_session_and_ship(&session_id, &ship_id).await?;
    if binding.is_none() {
        return Ok(Admission::Reject { code: CLOSE_ACCESS_DENIED, reason: "session does not have access to this ship" });
    }

    Ok(Admission::Admitted { address })
}

/// Builds the outbound terminal WebSocket URL, the same address-colon
/// convention as the HTTP forward paths (own small copy, see DESIGN.md).
pub fn ship_terminal_url(address: &str, container_port: u16, session_id: &str, cols: u16, rows: u16) -> String {
    let base = if address.contains(':') {
        format!("ws://{address}")
    } else {
        format!("ws://{address}:{container_port}")
    };
    format!("{base}/term/ws?session_id={session_id}&cols={cols}&rows={rows}")
}

/// Runs the bidirectional relay between an already-accepted inbound socket
/// and a freshly dialed outbound one, then unconditionally best-effort
/// touches the binding's `last_activity`, mirroring the original's `finally:
/// update_session_activity`. Text frames pass as text, binary as binary;
/// either side closing or erroring tears down both directions.
pub async fn relay(
    mut inbound: WebSocket,
    ship_ws_url: &str,
    store: &Arc<dyn StateStore>,
    ship_id: &str,
    session_id: &str,
) {
    let outcome = tokio_tungstenite::connect_async(ship_ws_url).await;
    let (outbound, _resp) = match outcome {
        Ok(pair) => pair,
        Err(e) => {
            error!(ship_id, %e, "failed to connect to ship terminal websocket");
            let _ = inbound
                .send(AxumMessage::Close(Some(axum::extract::ws::CloseFrame {
                    code: CLOSE_UPSTREAM_FAILURE,
                    reason: format!("failed to connect to ship: {e}").into(),
                })))
                .await;
            touch_last_activity(store, session_id, ship_id).await;
            return;
        }
    };

    let (mut out_sink, mut out_stream) = outbound.split();
    let (mut in_sink, mut in_stream) = inbound.split();

    let to_ship = async {
        while let Some(msg) = in_stream.next().await {
            let msg = match msg {
                Ok(m) => m,
                Err(e) => {
                    debug!(%e, "forward to ship ended");
                    break;
                }
            };
            let forwarded = match msg {
                AxumMessage::Text(t) => Some(TungsteniteMessage::Text(t)),
                AxumMessage::Binary(b) => Some(TungsteniteMessage::Binary(b)),
                AxumMessage::Close(_) => None,
                _ => continue,
            };
            let Some(forwarded) = forwarded else { break };
            if out_sink.send(forwarded).await.is_err() {
                break;
            }
        }
    };

    let to_frontend = async {
        while let Some(msg) = out_stream.next().await {
            let msg = match msg {
                Ok(m) => m,
                Err(e) => {
                    warn!(%e, "ship websocket error");
                    break;
                }
            };
            let forwarded = match msg {
                TungsteniteMessage::Text(t) => Some(AxumMessage::Text(t)),
                TungsteniteMessage::Binary(b) => Some(AxumMessage::Binary(b)),
                TungsteniteMessage::Close(_) => None,
                _ => continue,
            };
            let Some(forwarded) = forwarded else { break };
            if in_sink.send(forwarded).await.is_err() {
                break;
            }
        }
    };

    tokio::select! {
        _ = to_ship => {}
        _ = to_frontend => {}
    }

    info!(ship_id, "terminal proxy session ended");
    touch_last_activity(store, session_id, ship_id).await;
}

async fn touch_last_activity(store: &Arc<dyn StateStore>, session_id: &str, ship_id: &str) {
    let Ok(session_id) = harbor_domain::SessionId::new(session_id.to_string()) else { return };
    let ship_id = ShipId::new(ship_id.to_string());
    match store.binding_for_session_and_ship(&session_id, &ship_id).await {
        Ok(Some(mut binding)) => {
            binding.last_activity = Utc::now();
            if let Err(e) = store.upsert_binding(&binding).await {
                warn!(%e, "failed to record terminal session last activity");
            }
        }
        Ok(None) => {}
        Err(e) => warn!(%e, "failed to look up binding while recording terminal session last activity"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use harbor_domain::{Binding, Ship};
    use harbor_store::InMemoryStore;

    #[tokio::test]
    async fn wrong_token_is_rejected_before_touching_the_store() {
        let store: Arc<dyn StateStore> = Arc::new(InMemoryStore::new());
        let req = TerminalRequest {
            ship_id: "missing".into(),
            session_id: "s1".into(),
            token: "wrong".into(),
            cols: 80,
            rows: 24,
        };
        let result = admit(&store, "correct-token", &req).await.unwrap();
        assert!(matches!(result, Admission::Reject { code: CLOSE_UNAUTHORIZED, .. }));
    }

    #[tokio::test]
    async fn missing_ship_is_rejected() {
        let store: Arc<dyn StateStore> = Arc::new(InMemoryStore::new());
        let req = TerminalRequest {
            ship_id: "nope".into(),
            session_id: "s1".into(),
            token: "tok".into(),
            cols: 80,
            rows: 24,
        };
        let result = admit(&store, "tok", &req).await.unwrap();
        assert!(matches!(result, Admission::Reject { code: CLOSE_SHIP_NOT_FOUND, .. }));
    }

    #[tokio::test]
    async fn session_without_a_binding_is_denied_access() {
        let store: Arc<dyn StateStore> = Arc::new(InMemoryStore::new());
        let now = Utc::now();
        let ship_id = ShipId::generate();
        let mut ship = Ship::new_creating(ship_id.clone(), 60, now);
        ship.mark_running("c1".into(), "10.0.0.5:8080".into(), now);
        store.upsert_ship(&ship).await.unwrap();

        let req = TerminalRequest {
            ship_id: ship_id.as_str().to_string(),
            session_id: "stranger".into(),
            token: "tok".into(),
            cols: 80,
            rows: 24,
        };
        let result = admit(&store, "tok", &req).await.unwrap();
        assert!(matches!(result, Admission::Reject { code: CLOSE_ACCESS_DENIED, .. }));
    }

    #[tokio::test]
    async fn bound_session_on_a_running_ship_is_admitted_with_its_address() {
        let store: Arc<dyn StateStore> = Arc::new(InMemoryStore::new());
        let now = Utc::now();
        let ship_id = ShipId::generate();
        let mut ship = Ship::new_creating(ship_id.clone(), 60, now);
        ship.mark_running("c1".into(), "10.0.0.5:8080".into(), now);
        store.upsert_ship(&ship).await.unwrap();

        let session_id = harbor_domain::SessionId::new("s1").unwrap();
        let binding = Binding::new(session_id, ship_id.clone(), 60, now);
        store.upsert_binding(&binding).await.unwrap();

        let req = TerminalRequest {
            ship_id: ship_id.as_str().to_string(),
            session_id: "s1".into(),
            token: "tok".into(),
            cols: 80,
            rows: 24,
        };
        let result = admit(&store, "tok", &req).await.unwrap();
        match result {
            Admission::Admitted { address } => assert_eq!(address, "10.0.0.5:8080"),
            Admission::Reject { reason, .. } => panic!("expected admission, got rejection: {reason}"),
        }
    }

    #[test]
    fn terminal_url_appends_the_configured_port_when_the_address_has_none() {
        let url = ship_terminal_url("172.18.0.2", 8123, "s1", 80, 24);
        assert_eq!(url, "ws://172.18.0.2:8123/term/ws?session_id=s1&cols=80&rows=24");
    }

    #[test]
    fn terminal_url_is_left_alone_when_the_address_already_has_a_port() {
        let url = ship_terminal_url("127.0.0.1:39314", 8123, "s1", 80, 24);
        assert_eq!(url, "ws://127.0.0.1:39314/term/ws?session_id=s1&cols=80&rows=24");
    }
}
