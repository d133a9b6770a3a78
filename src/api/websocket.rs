//! WebSocket feed of studio events

use std::sync::Arc;

use axum::{
    Router,
    extract::{State, WebSocketUpgrade, ws::Message},
    response::IntoResponse,
    routing::get,
};
use futures::{SinkExt, StreamExt};
use tokio::sync::broadcast::{self, error::RecvError};

use crate::studio::{StudioEvent, StudioStore};

/// Build studio feed router
pub fn router(store: Arc<StudioStore>) -> Router {
    Router::new().route("/", get(ws_upgrade)).with_state(store)
}

async fn ws_upgrade(
    State(store): State<Arc<StudioStore>>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, store))
}

async fn snapshot_message(store: &StudioStore) -> Option<Message> {
    let event = StudioEvent::Snapshot {
        studio: store.snapshot().await,
    };
    serde_json::to_string(&event)
        .ok()
        .map(|text| Message::Text(text.into()))
}

/// Next frame for a feed client
///
/// A client that fell behind gets a fresh snapshot in place of the events
/// it missed. Returns `None` once the store is gone.
async fn next_message(
    rx: &mut broadcast::Receiver<StudioEvent>,
    store: &StudioStore,
) -> Option<Message> {
    loop {
        match rx.recv().await {
            Ok(event) => match serde_json::to_string(&event) {
                Ok(text) => return Some(Message::Text(text.into())),
                Err(e) => tracing::warn!(error = %e, "failed to encode studio event"),
            },
            Err(RecvError::Lagged(skipped)) => {
                tracing::debug!(skipped, "studio feed lagged, resending snapshot");
                if let Some(message) = snapshot_message(store).await {
                    return Some(message);
                }
            }
            Err(RecvError::Closed) => return None,
        }
    }
}

async fn handle_socket(socket: axum::extract::ws::WebSocket, store: Arc<StudioStore>) {
    let (mut sender, mut receiver) = socket.split();

    // Subscribe before the snapshot so no change falls in between
    let mut rx = store.subscribe();

    let Some(snapshot) = snapshot_message(&store).await else {
        return;
    };
    if sender.send(snapshot).await.is_err() {
        return;
    }

    tracing::info!("studio feed connected");

    let mut broadcast_task = tokio::spawn(async move {
        while let Some(message) = next_message(&mut rx, &store).await {
            if sender.send(message).await.is_err() {
                break;
            }
        }
    });

    let mut recv_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = receiver.next().await {
            if let Message::Close(_) = msg {
                break;
            }
        }
    });

    tokio::select! {
        _ = &mut broadcast_task => recv_task.abort(),
        _ = &mut recv_task => broadcast_task.abort(),
    }

    tracing::info!("studio feed disconnected");
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decode(message: Message) -> serde_json::Value {
        let Message::Text(text) = message else {
            panic!("expected a text frame");
        };
        serde_json::from_str(text.as_str()).unwrap()
    }

    #[tokio::test]
    async fn forwards_events_tagged() {
        let store = StudioStore::new();
        let mut rx = store.subscribe();

        store.set_transcript("hello").await;

        let json = decode(next_message(&mut rx, &store).await.unwrap());
        assert_eq!(json["type"], "transcript_changed");
        assert_eq!(json["text"], "hello");
    }

    #[tokio::test]
    async fn lagging_client_gets_snapshot() {
        let store = StudioStore::new();
        let mut rx = store.subscribe();

        for n in 0..200 {
            store.set_transcript(format!("line {n}")).await;
        }

        let json = decode(next_message(&mut rx, &store).await.unwrap());
        assert_eq!(json["type"], "snapshot");
        assert_eq!(json["studio"]["transcript"], "line 199");
    }
}
