//! WebSocket pump for `GET /v1/events/stream` (spec.md §7): replays recent
//! history matching the requested glob, then forwards live events as they
//! arrive on the bus.

use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket};
use glob::Pattern;

use crate::state::AppState;

pub async fn pump(mut socket: WebSocket, state: Arc<AppState>, pattern: String) {
    if Pattern::new(&pattern).is_err() {
        let _ = socket
            .send(Message::Text(format!("{{\"error\":\"bad glob pattern: {pattern}\"}}")))
            .await;
        return;
    }

    let history = match state.bus.history(state.config.event_history_cap, Some(&pattern)).await {
        Ok(events) => events,
        Err(e) => {
            let _ = socket.send(Message::Text(format!("{{\"error\":\"{e}\"}}"))).await;
            return;
        }
    };
    // `history` comes back newest-first; replay oldest-first so the
    // transition into the live stream below reads chronologically.
    for event in history.into_iter().rev() {
        let Ok(body) = serde_json::to_string(&event) else { continue };
        if socket.send(Message::Text(body)).await.is_err() {
            return;
        }
    }

    let Ok((sub_id, mut rx)) = state.bus.subscribe(&pattern).await else {
        return;
    };

    loop {
        tokio::select! {
            event = rx.recv() => {
                let Some(event) = event else { break };
                let Ok(body) = serde_json::to_string(&event) else { continue };
                if socket.send(Message::Text(body)).await.is_err() {
                    break;
                }
            }
            incoming = socket.recv() => {
                match incoming {
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Err(_)) => break,
                    _ => {}
                }
            }
        }
    }

    state.bus.unsubscribe(sub_id).await;
}
