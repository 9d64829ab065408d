//! Protocol semantics for client frames.
//!
//! Every mutation follows the same shape: persist, ack the submitter,
//! then broadcast to the rest of the family. The ack goes first so the
//! submitter can drop the frame from its pending queue before it could
//! ever see related fan-out traffic.

use crate::hub::SessionHandle;
use crate::AppState;
use nestlog_protocol::{
    ClientFrame, Entry, EntryAction, ServerFrame, DEFAULT_SYNC_LIMIT, MAX_SYNC_LIMIT,
};
use std::sync::Arc;

/// Routes one decoded client frame to its handler.
pub(crate) async fn dispatch(state: &AppState, session: &SessionHandle, frame: ClientFrame) {
    match frame {
        ClientFrame::Entry { action, entry, id } => match action {
            EntryAction::Add | EntryAction::Update => {
                handle_entry_upsert(state, session, action, entry).await;
            }
            EntryAction::Delete => handle_entry_delete(state, session, id).await,
        },
        ClientFrame::SyncRequest {
            cursor,
            limit,
            entries,
        } => handle_sync(state, session, cursor, limit, entries).await,
        ClientFrame::Config { data } => handle_config(state, session, data).await,
        ClientFrame::Ping => {
            session.send(ServerFrame::Pong).await;
        }
    }
}

/// `entry` with `add`/`update`: persist with a fresh seq, ack, broadcast.
///
/// On store failure nothing is sent; the client's pending queue re-sends on
/// the next connect.
async fn handle_entry_upsert(
    state: &AppState,
    session: &SessionHandle,
    action: EntryAction,
    entry: Option<Entry>,
) {
    let Some(mut entry) = entry else {
        tracing::debug!(family = %session.family_id, "entry frame without body");
        return;
    };
    // Never trust the client's family id; the session's binding wins.
    entry.family_id = session.family_id.clone();

    let Some(saved) = upsert(state, entry).await else {
        return;
    };
    session
        .send(ServerFrame::ack(saved.id.clone(), saved.seq))
        .await;
    state.hub.broadcast(
        &session.family_id,
        &ServerFrame::entry_broadcast(action, saved),
        session.id,
    );
}

/// `entry` with `delete`: tombstone, ack, broadcast id+seq.
/// Unknown ids are dropped silently.
async fn handle_entry_delete(state: &AppState, session: &SessionHandle, id: Option<String>) {
    let Some(id) = id else {
        tracing::debug!(family = %session.family_id, "delete frame without id");
        return;
    };

    let store = Arc::clone(&state.store);
    let family_id = session.family_id.clone();
    let delete_id = id.clone();
    let result = tokio::task::spawn_blocking(move || store.delete_entry(&family_id, &delete_id)).await;

    match result {
        Ok(Ok(seq)) => {
            session.send(ServerFrame::ack(id.clone(), seq)).await;
            state.hub.broadcast(
                &session.family_id,
                &ServerFrame::delete_broadcast(id, seq),
                session.id,
            );
        }
        Ok(Err(err)) if matches!(err, nestlog_store::StoreError::NotFound) => {
            tracing::debug!(family = %session.family_id, entry = %id, "delete for unknown entry");
        }
        Ok(Err(err)) => {
            tracing::error!(error = %err, family = %session.family_id, entry = %id, "failed to delete entry");
        }
        Err(err) => {
            tracing::error!(error = %err, "store task failed");
        }
    }
}

/// `sync_request`: push any piggy-backed entries first (acking each,
/// tombstones included), then answer one page of the cursor scan.
async fn handle_sync(
    state: &AppState,
    session: &SessionHandle,
    cursor: i64,
    limit: Option<u32>,
    entries: Vec<Entry>,
) {
    for mut entry in entries {
        entry.family_id = session.family_id.clone();
        let deleted = entry.deleted;

        let Some(saved) = upsert(state, entry).await else {
            continue;
        };
        session
            .send(ServerFrame::ack(saved.id.clone(), saved.seq))
            .await;
        let broadcast = if deleted {
            ServerFrame::delete_broadcast(saved.id.clone(), saved.seq)
        } else {
            ServerFrame::entry_broadcast(EntryAction::Add, saved)
        };
        state
            .hub
            .broadcast(&session.family_id, &broadcast, session.id);
    }

    let limit = limit.unwrap_or(DEFAULT_SYNC_LIMIT).clamp(1, MAX_SYNC_LIMIT);
    let store = Arc::clone(&state.store);
    let family_id = session.family_id.clone();
    let result =
        tokio::task::spawn_blocking(move || store.entries_since_cursor(&family_id, cursor, limit))
            .await;

    match result {
        Ok(Ok((entries, has_more))) => {
            let new_cursor = entries.last().map_or(cursor, |e| e.seq);
            session
                .send(ServerFrame::SyncResponse {
                    entries,
                    cursor: new_cursor,
                    has_more,
                })
                .await;
        }
        Ok(Err(err)) => {
            tracing::error!(error = %err, family = %session.family_id, "failed to scan entries");
        }
        Err(err) => {
            tracing::error!(error = %err, "store task failed");
        }
    }
}

/// `config`: overwrite (last writer wins) and fan out to peers.
async fn handle_config(state: &AppState, session: &SessionHandle, data: String) {
    let store = Arc::clone(&state.store);
    let family_id = session.family_id.clone();
    let payload = data.clone();
    let result = tokio::task::spawn_blocking(move || store.save_config(&family_id, &payload)).await;

    match result {
        Ok(Ok(())) => {
            state.hub.broadcast(
                &session.family_id,
                &ServerFrame::Config { data },
                session.id,
            );
        }
        Ok(Err(err)) => {
            tracing::error!(error = %err, family = %session.family_id, "failed to save config");
        }
        Err(err) => {
            tracing::error!(error = %err, "store task failed");
        }
    }
}

/// Runs the upsert on the blocking pool. Failures are logged and yield
/// `None`; nothing is sent, and the submitter's pending queue re-sends the
/// frame on its next connect.
async fn upsert(state: &AppState, entry: Entry) -> Option<Entry> {
    let family_id = entry.family_id.clone();
    let store = Arc::clone(&state.store);
    match tokio::task::spawn_blocking(move || store.upsert_entry(entry)).await {
        Ok(Ok(saved)) => Some(saved),
        Ok(Err(err)) => {
            tracing::error!(error = %err, family = %family_id, "failed to upsert entry");
            None
        }
        Err(err) => {
            tracing::error!(error = %err, "store task failed");
            None
        }
    }
}
