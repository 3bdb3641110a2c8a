//! Websocket upgrade handlers. Each connection becomes a reader task (this
//! function) plus an implicit writer loop draining the channel's outbound
//! `mpsc` queue — the same split the teacher achieves with a blocking
//! socket and a dedicated sender thread, done here with two async tasks
//! sharing one `WebSocket` split in half.

use std::collections::HashMap;
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::response::IntoResponse;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::error::DomainError;
use crate::http::state::AppState;
use crate::protocol::{ClientAuthRequest, Envelope, ErrorPayload, PcRegistrationRequest};
use crate::router::{self, ClientIdentity, OperatorIdentity};

pub async fn admin_ws(
    State(state): State<AppState>,
    Query(params): Query<HashMap<String, String>>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_admin_socket(socket, state, params))
}

pub async fn client_ws(State(state): State<AppState>, ws: WebSocketUpgrade) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_client_socket(socket, state))
}

async fn handle_admin_socket(socket: WebSocket, state: AppState, params: HashMap<String, String>) {
    let (mut sink, mut stream) = socket.split();

    let token = match params.get("token") {
        Some(t) => t.clone(),
        None => {
            let _ = send_error(&mut sink, "AUTH_FAILED", "missing token").await;
            return;
        }
    };

    let claims = match state.auth.validate_token(&token) {
        Ok(c) => c,
        Err(e) => {
            let _ = send_error(&mut sink, "AUTH_FAILED", &e.to_string()).await;
            return;
        }
    };

    let identity = OperatorIdentity { user_id: claims.sub };
    let (outbound_tx, mut outbound_rx) = mpsc::channel::<Envelope>(state.config.outbound_queue_capacity);
    state
        .hubs
        .operators
        .register(identity.user_id, crate::hub::ChannelHandle::new(outbound_tx))
        .await;
    let _ = state
        .hubs
        .operators
        .send_to(identity.user_id, "ADMIN_CONNECTED", serde_json::json!({ "user_id": identity.user_id }))
        .await;

    let writer = tokio::spawn(async move {
        while let Some(envelope) = outbound_rx.recv().await {
            if let Ok(text) = serde_json::to_string(&envelope) {
                if sink.send(Message::Text(text)).await.is_err() {
                    break;
                }
            }
        }
    });

    let cancel = CancellationToken::new();
    let read_timeout = Duration::from_secs(state.config.channel_read_timeout_secs);

    loop {
        let next = tokio::time::timeout(read_timeout, stream.next()).await;
        let message = match next {
            Ok(Some(Ok(msg))) => msg,
            Ok(Some(Err(_))) | Ok(None) => break,
            Err(_) => {
                info!(user_id = %identity.user_id, "operator channel read timed out");
                break;
            }
        };

        let text = match message {
            Message::Text(t) => t,
            Message::Close(_) => break,
            _ => continue,
        };

        let envelope: Envelope = match serde_json::from_str(&text) {
            Ok(e) => e,
            Err(e) => {
                warn!(error = %e, "malformed envelope from operator");
                continue;
            }
        };

        match router::handle_operator_envelope(&state.sessions, &state.hubs, identity, envelope, &cancel).await {
            Ok(Some(reply)) => {
                let _ = state.hubs.operators.send_to(identity.user_id, &reply.kind, reply.data.clone()).await;
            }
            Ok(None) => {}
            Err(e) => {
                let _ = state.hubs.operators.send_to(identity.user_id, "ERROR", error_payload(&e)).await;
            }
        }
    }

    state.hubs.operators.unregister(identity.user_id).await;
    writer.abort();
}

async fn handle_client_socket(socket: WebSocket, state: AppState) {
    let (mut sink, mut stream) = socket.split();
    let read_timeout = Duration::from_secs(state.config.channel_read_timeout_secs);
    let cancel = CancellationToken::new();

    let identity = match authenticate_and_register_client(&state, &mut stream, &mut sink, read_timeout, &cancel).await {
        Some(identity) => identity,
        None => return,
    };

    let (outbound_tx, mut outbound_rx) = mpsc::channel::<Envelope>(state.config.outbound_queue_capacity);
    state
        .hubs
        .clients
        .register(identity.pc_id, crate::hub::ChannelHandle::new(outbound_tx))
        .await;

    let writer = tokio::spawn(async move {
        while let Some(envelope) = outbound_rx.recv().await {
            if let Ok(text) = serde_json::to_string(&envelope) {
                if sink.send(Message::Text(text)).await.is_err() {
                    break;
                }
            }
        }
    });

    loop {
        let next = tokio::time::timeout(read_timeout, stream.next()).await;
        let message = match next {
            Ok(Some(Ok(msg))) => msg,
            Ok(Some(Err(_))) | Ok(None) => break,
            Err(_) => {
                info!(pc_id = %identity.pc_id, "client channel read timed out");
                break;
            }
        };

        let text = match message {
            Message::Text(t) => t,
            Message::Close(_) => break,
            _ => continue,
        };

        let envelope: Envelope = match serde_json::from_str(&text) {
            Ok(e) => e,
            Err(e) => {
                warn!(error = %e, "malformed envelope from client");
                continue;
            }
        };

        let result = router::handle_client_envelope(
            &state.sessions,
            &state.transfers,
            &state.recorder,
            &state.client_pcs,
            &state.hubs,
            identity,
            envelope,
            &cancel,
        )
        .await;

        match result {
            Ok(Some(reply)) => {
                let _ = state.hubs.clients.send_to(identity.pc_id, &reply.kind, reply.data.clone()).await;
            }
            Ok(None) => {}
            Err(e) => {
                let _ = state.hubs.clients.send_to(identity.pc_id, "ERROR", error_payload(&e)).await;
            }
        }
    }

    // Evict the channel before running disconnect logic: any session-ended
    // notification the disconnect handler triggers should see a hub that
    // already treats this PC as gone, not one that might race a reconnect
    // into thinking the old channel is still live.
    state.hubs.clients.unregister(identity.pc_id).await;
    let _ = state.sessions.handle_client_pc_disconnect(identity.pc_id, &cancel).await;
    writer.abort();

    if let Ok(Some(pc)) = state.client_pcs.find_by_id(identity.pc_id, &cancel).await {
        state.hubs.operators.broadcast("PC_DISCONNECTED", &pc).await;
        state.hubs.operators.broadcast("PC_STATUS_CHANGED", &pc).await;
    }
}

/// Reads the two bootstrap messages every client channel must send before
/// anything else is accepted: `CLIENT_AUTH_REQUEST`, then
/// `PC_REGISTRATION_REQUEST`.
async fn authenticate_and_register_client(
    state: &AppState,
    stream: &mut (impl StreamExt<Item = Result<Message, axum::Error>> + Unpin),
    sink: &mut (impl SinkExt<Message, Error = axum::Error> + Unpin),
    read_timeout: Duration,
    cancel: &CancellationToken,
) -> Option<ClientIdentity> {
    let auth_envelope = read_one(stream, read_timeout).await?;
    if auth_envelope.kind != "CLIENT_AUTH_REQUEST" {
        let _ = send_error(sink, "AUTH_FAILED", "expected CLIENT_AUTH_REQUEST").await;
        return None;
    }
    let auth_request: ClientAuthRequest = match auth_envelope.decode() {
        Ok(r) => r,
        Err(e) => {
            let _ = send_error(sink, "DECODE", &e.to_string()).await;
            return None;
        }
    };

    let (token, snapshot) = match state.auth.authenticate_client(&auth_request.username, &auth_request.password).await {
        Ok(pair) => pair,
        Err(e) => {
            let _ = send_error(sink, "AUTH_FAILED", &e.to_string()).await;
            return None;
        }
    };
    let _ = send_json(
        sink,
        Envelope::new("CLIENT_AUTH_RESPONSE", crate::protocol::ClientAuthResponse {
            success: true,
            token: Some(token),
            error: None,
        }),
    )
    .await;

    let registration_envelope = read_one(stream, read_timeout).await?;
    if registration_envelope.kind != "PC_REGISTRATION_REQUEST" {
        let _ = send_error(sink, "INVALID_STATE", "expected PC_REGISTRATION_REQUEST").await;
        return None;
    }
    let registration_request: PcRegistrationRequest = match registration_envelope.decode() {
        Ok(r) => r,
        Err(e) => {
            let _ = send_error(sink, "DECODE", &e.to_string()).await;
            return None;
        }
    };

    let response = match router::register_client_pc(&state.client_pcs, snapshot.user_id, registration_request, &state.hubs, cancel).await {
        Ok(r) => r,
        Err(e) => {
            let _ = send_error(sink, "STORAGE", &e.to_string()).await;
            return None;
        }
    };
    let pc_id = response.pc_id;
    let _ = send_json(sink, Envelope::new("PC_REGISTRATION_RESPONSE", response)).await;

    Some(ClientIdentity { pc_id, owner_user_id: snapshot.user_id })
}

async fn read_one(
    stream: &mut (impl StreamExt<Item = Result<Message, axum::Error>> + Unpin),
    read_timeout: Duration,
) -> Option<Envelope> {
    loop {
        let next = tokio::time::timeout(read_timeout, stream.next()).await.ok()??;
        let message = next.ok()?;
        match message {
            Message::Text(text) => return serde_json::from_str(&text).ok(),
            Message::Close(_) => return None,
            _ => continue,
        }
    }
}

async fn send_json(sink: &mut (impl SinkExt<Message, Error = axum::Error> + Unpin), envelope: Envelope) -> Result<(), ()> {
    let text = serde_json::to_string(&envelope).map_err(|_| ())?;
    sink.send(Message::Text(text)).await.map_err(|_| ())
}

async fn send_error(sink: &mut (impl SinkExt<Message, Error = axum::Error> + Unpin), code: &str, message: &str) -> Result<(), ()> {
    send_json(
        sink,
        Envelope::new(
            "ERROR",
            ErrorPayload {
                error: code.to_string(),
                message: message.to_string(),
                details: None,
            },
        ),
    )
    .await
}

fn error_payload(err: &DomainError) -> ErrorPayload {
    ErrorPayload {
        error: err.code().to_string(),
        message: err.to_string(),
        details: None,
    }
}
