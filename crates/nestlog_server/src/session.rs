//! Per-connection session: auth gate, upgrade, read/write tasks.

use crate::handlers;
use crate::AppState;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum_extra::extract::CookieJar;
use futures_util::{SinkExt, StreamExt};
use nestlog_protocol::{ClientFrame, ServerFrame};
use nestlog_store::{AccessLink, StoreError};
use std::sync::Arc;

/// Cookie carrying the access-link token.
pub const CLIENT_SESSION_COOKIE: &str = "client_session";

/// Lifecycle phase of one session. Transitions are one-way.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum SessionState {
    /// Token not yet resolved; the connection is still plain HTTP.
    AuthPending,
    /// Steady state: registered in the hub, frames flowing.
    Subscribed,
    /// Read task exited; outbound queue draining toward close.
    Draining,
    /// Terminal.
    Closed,
}

impl SessionState {
    /// Moves to `next` when that is a forward transition; later states
    /// never move back.
    pub fn advance(self, next: SessionState) -> SessionState {
        if next >= self {
            next
        } else {
            self
        }
    }
}

/// The WebSocket endpoint: resolves the access-link cookie, then upgrades.
/// Unauthenticated upgrades yield 401 without upgrading.
pub(crate) async fn ws_handler(
    State(state): State<AppState>,
    jar: CookieJar,
    ws: WebSocketUpgrade,
) -> Response {
    let Some(cookie) = jar.get(CLIENT_SESSION_COOKIE) else {
        tracing::debug!("ws auth failed: no cookie");
        return StatusCode::UNAUTHORIZED.into_response();
    };

    let token = cookie.value().to_string();
    let store = Arc::clone(&state.store);
    let link = match tokio::task::spawn_blocking(move || store.validate_access_link(&token)).await {
        Ok(Ok(link)) => link,
        Ok(Err(StoreError::NotFound)) => {
            tracing::debug!("ws auth failed: invalid or expired token");
            return StatusCode::UNAUTHORIZED.into_response();
        }
        Ok(Err(err)) => {
            tracing::error!(error = %err, "ws auth failed: store error");
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
        Err(err) => {
            tracing::error!(error = %err, "ws auth failed: store task failed");
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
    };

    tracing::debug!(family = %link.family_id, label = %link.label, "ws auth success");
    ws.on_upgrade(move |socket| run(state, socket, link))
}

/// Drives one subscribed session to completion.
async fn run(state: AppState, socket: WebSocket, link: AccessLink) {
    let (session, mut outbound) = state.hub.create_session(&link.family_id, &link.label);
    state.hub.register(session.clone());
    let mut phase = SessionState::AuthPending.advance(SessionState::Subscribed);

    send_init(&state, &session).await;

    let (mut sink, mut stream) = socket.split();

    // Write task: outbound queue → wire. Ends when the queue closes (both
    // sender halves dropped) or the transport fails.
    let write_task = tokio::spawn(async move {
        while let Some(frame) = outbound.recv().await {
            let text = match frame.encode() {
                Ok(text) => text,
                Err(err) => {
                    tracing::warn!(error = %err, "failed to encode outbound frame");
                    continue;
                }
            };
            if sink.send(Message::Text(text)).await.is_err() {
                break;
            }
        }
    });

    // Read task: wire → protocol handlers. Malformed frames are ignored;
    // transport errors end the session.
    while let Some(message) = stream.next().await {
        let message = match message {
            Ok(message) => message,
            Err(_) => break,
        };
        match message {
            Message::Text(text) => match ClientFrame::decode(&text) {
                Ok(frame) => handlers::dispatch(&state, &session, frame).await,
                Err(err) => {
                    tracing::debug!(error = %err, family = %session.family_id, "ignoring malformed frame");
                }
            },
            Message::Close(_) => break,
            // Binary, ping and pong frames at the transport layer are not
            // part of the protocol.
            _ => {}
        }
    }

    phase = phase.advance(SessionState::Draining);
    tracing::debug!(session = session.id, family = %session.family_id, "session draining");

    state.hub.unregister(&session);
    drop(session); // last sender: lets the write task drain out and exit
    let _ = write_task.await;

    phase = phase.advance(SessionState::Closed);
    tracing::debug!(state = ?phase, "session closed");
}

/// Sends the init frame: the family's full snapshot plus the config blob,
/// for clients that retain no cursor.
async fn send_init(state: &AppState, session: &crate::hub::SessionHandle) {
    let store = Arc::clone(&state.store);
    let family_id = session.family_id.clone();
    let init = tokio::task::spawn_blocking(move || {
        let entries = store.all_entries(&family_id)?;
        let config = store.get_config(&family_id)?;
        Ok::<_, StoreError>(ServerFrame::Init { entries, config })
    })
    .await;

    match init {
        Ok(Ok(frame)) => {
            session.send(frame).await;
        }
        Ok(Err(err)) => {
            tracing::error!(error = %err, family = %session.family_id, "failed to build init frame");
        }
        Err(err) => {
            tracing::error!(error = %err, "store task failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_state_is_one_way() {
        let state = SessionState::AuthPending;
        let state = state.advance(SessionState::Subscribed);
        assert_eq!(state, SessionState::Subscribed);

        // A stale transition back never regresses the state.
        let state = state.advance(SessionState::AuthPending);
        assert_eq!(state, SessionState::Subscribed);

        let state = state.advance(SessionState::Draining);
        let state = state.advance(SessionState::Closed);
        assert_eq!(state, SessionState::Closed);
    }
}
