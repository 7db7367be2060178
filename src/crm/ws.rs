use axum::{
    body::Bytes,
    extract::{
        Query, State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    http::HeaderMap,
    response::IntoResponse,
};
use futures_util::{SinkExt, StreamExt, stream::SplitSink, stream::SplitStream};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time::Instant;

use super::api::{ApiError, SharedState};
use super::auth;
use super::models::*;

/// How often to send WebSocket Ping frames.
const PING_INTERVAL: Duration = Duration::from_secs(30);

/// How long to wait for a Pong response before considering the connection dead.
const PONG_TIMEOUT: Duration = Duration::from_secs(60);

// ── WebSocket message types ──────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum WsMessage {
    ProfileUpdated {
        profile: Profile,
    },
    CompanyCreated {
        company: Company,
    },
    CompanyUpdated {
        company: Company,
    },
    CompanyDeleted {
        company_id: i64,
    },
    ContactCreated {
        contact: Contact,
    },
    ContactUpdated {
        contact: Contact,
    },
    ContactDeleted {
        contact_id: i64,
    },
    StageCreated {
        stage: DealStage,
    },
    StageUpdated {
        stage: DealStage,
    },
    StagesReordered {
        stages: Vec<DealStage>,
    },
    StageDeleted {
        stage_id: i64,
    },
    DealCreated {
        deal: Deal,
    },
    DealUpdated {
        deal: Deal,
    },
    DealMoved {
        deal_id: i64,
        from_stage_id: i64,
        to_stage_id: i64,
    },
    DealClosed {
        deal: Deal,
        outcome: CloseOutcome,
    },
    DealDeleted {
        deal_id: i64,
    },
    ActivityCreated {
        activity: Activity,
    },
    ActivityUpdated {
        activity: Activity,
    },
    ActivityDeleted {
        activity_id: i64,
    },
    NoteCreated {
        note: Note,
    },
    NoteUpdated {
        note: Note,
    },
    NoteDeleted {
        note_id: i64,
    },
}

/// A serialized message addressed to one user's sockets.
#[derive(Debug, Clone)]
pub struct UserEvent {
    pub user_id: i64,
    pub payload: String,
}

/// The payload to forward to a socket owned by `user_id`, if any.
fn payload_for(user_id: i64, event: &UserEvent) -> Option<&str> {
    (event.user_id == user_id).then_some(event.payload.as_str())
}

#[derive(Debug, Deserialize)]
pub struct WsAuth {
    token: Option<String>,
}

/// Upgrade after authenticating with `?token=` or a bearer header.
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<SharedState>,
    Query(query): Query<WsAuth>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, ApiError> {
    let token = query
        .token
        .or_else(|| auth::bearer_token(&headers))
        .ok_or(ApiError::Unauthorized)?;
    let user_id = auth::authenticate(&state.db, &token).await?;
    let rx = state.ws_tx.subscribe();
    tracing::debug!(user_id, "websocket connected");
    Ok(ws.on_upgrade(move |socket| handle_socket(socket, user_id, rx)))
}

async fn handle_socket(socket: WebSocket, user_id: i64, rx: broadcast::Receiver<UserEvent>) {
    let (sender, receiver) = socket.split();
    run_socket_loop(sender, receiver, rx, user_id).await;
    tracing::debug!(user_id, "websocket closed");
}

async fn run_socket_loop(
    mut sender: SplitSink<WebSocket, Message>,
    mut receiver: SplitStream<WebSocket>,
    mut rx: broadcast::Receiver<UserEvent>,
    user_id: i64,
) {
    let mut ping_interval = tokio::time::interval(PING_INTERVAL);
    // The first tick completes immediately.
    ping_interval.tick().await;

    let mut last_pong = Instant::now();
    let mut awaiting_pong = false;

    loop {
        tokio::select! {
            _ = ping_interval.tick() => {
                if awaiting_pong && last_pong.elapsed() > PONG_TIMEOUT {
                    tracing::debug!(user_id, "websocket pong timeout");
                    break;
                }
                if sender.send(Message::Ping(Bytes::new())).await.is_err() {
                    break;
                }
                awaiting_pong = true;
            }

            result = rx.recv() => {
                match result {
                    Ok(event) => {
                        let Some(payload) = payload_for(user_id, &event) else {
                            continue;
                        };
                        if sender.send(Message::Text(payload.to_owned().into())).await.is_err() {
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::warn!(user_id, skipped, "websocket receiver lagged");
                        continue;
                    }
                }
            }

            msg = receiver.next() => {
                match msg {
                    Some(Ok(Message::Pong(_))) => {
                        last_pong = Instant::now();
                        awaiting_pong = false;
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {}
                    Some(Err(_)) => break,
                }
            }
        }
    }

    let _ = sender.send(Message::Close(None)).await;
}

/// Serialize `msg` and publish it to `user_id`'s sockets. No receivers is fine.
pub fn broadcast_message(tx: &broadcast::Sender<UserEvent>, user_id: i64, msg: &WsMessage) {
    match serde_json::to_string(msg) {
        Ok(payload) => {
            let _ = tx.send(UserEvent { user_id, payload });
        }
        Err(e) => {
            tracing::error!(error = %e, "failed to serialize WsMessage");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deal_moved_serialization() {
        let msg = WsMessage::DealMoved {
            deal_id: 4,
            from_stage_id: 1,
            to_stage_id: 2,
        };
        let json: serde_json::Value = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["type"], "DealMoved");
        assert_eq!(json["data"]["deal_id"], 4);
        assert_eq!(json["data"]["to_stage_id"], 2);
    }

    #[test]
    fn test_stage_deleted_roundtrip() {
        let raw = r#"{"type":"StageDeleted","data":{"stage_id":9}}"#;
        let msg: WsMessage = serde_json::from_str(raw).unwrap();
        assert!(matches!(msg, WsMessage::StageDeleted { stage_id: 9 }));
    }

    #[test]
    fn test_events_only_reach_their_owner() {
        let event = UserEvent {
            user_id: 1,
            payload: "{}".into(),
        };
        assert_eq!(payload_for(1, &event), Some("{}"));
        assert_eq!(payload_for(2, &event), None);
    }

    #[tokio::test]
    async fn test_broadcast_channel_delivers_to_subscribers() {
        let (tx, mut rx) = broadcast::channel(16);
        broadcast_message(&tx, 7, &WsMessage::NoteDeleted { note_id: 3 });

        let event = rx.recv().await.unwrap();
        assert_eq!(event.user_id, 7);
        let parsed: serde_json::Value = serde_json::from_str(&event.payload).unwrap();
        assert_eq!(parsed["type"], "NoteDeleted");
        assert_eq!(parsed["data"]["note_id"], 3);
    }

    #[test]
    fn test_broadcast_no_receivers_does_not_panic() {
        let (tx, _) = broadcast::channel::<UserEvent>(16);
        broadcast_message(&tx, 1, &WsMessage::DealDeleted { deal_id: 1 });
    }

    #[test]
    fn test_keepalive_constants() {
        assert!(PONG_TIMEOUT > PING_INTERVAL);
    }
}
