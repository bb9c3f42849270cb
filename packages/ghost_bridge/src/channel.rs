//! Glue between one accepted WebSocket and its session engine.

use axum::extract::ws::{Message, WebSocket};
use futures::{sink::SinkExt, stream::StreamExt};
use ghost_session::{ChannelHandle, EngineContext, SessionEngine};
use tracing::{debug, error, warn};

/// Run one channel to completion.
///
/// Text frames (and UTF-8 binary frames) go to the engine in arrival order;
/// a binary frame that is not UTF-8 is malformed and closes the channel; the engine's outbound
/// messages go back as JSON text frames. Whichever side ends first closes the
/// channel handle, which stops the other.
pub async fn serve_channel(socket: WebSocket, channel: ChannelHandle, ctx: EngineContext) {
    let connection_id = uuid::Uuid::new_v4().to_string();
    debug!(conn_id = %connection_id, "channel opened");

    let engine = SessionEngine::spawn(ctx, channel.clone());
    let frames = engine.frames;
    let mut outbound = engine.outbound;

    let (mut ws_sender, mut ws_receiver) = socket.split();

    // Task to send messages to WebSocket
    let sender_channel = channel.clone();
    let sender_task = async move {
        loop {
            tokio::select! {
                _ = sender_channel.closed() => {
                    let _ = ws_sender.send(Message::Close(None)).await;
                    break;
                }
                msg = outbound.recv() => {
                    let Some(msg) = msg else { break };
                    let json = match serde_json::to_string(&msg) {
                        Ok(j) => j,
                        Err(e) => {
                            error!("Failed to serialize message: {}", e);
                            continue;
                        }
                    };
                    if ws_sender.send(Message::Text(json.into())).await.is_err() {
                        break;
                    }
                }
            }
        }
        sender_channel.close();
        debug!("Sender task ended");
    };

    // Task to handle incoming messages
    let input_channel = channel.clone();
    let input_task = async move {
        loop {
            let msg = tokio::select! {
                _ = input_channel.closed() => break,
                msg = ws_receiver.next() => msg,
            };
            match msg {
                Some(Ok(Message::Text(text))) => {
                    if !frames.deliver(text.as_str()) {
                        break;
                    }
                }
                Some(Ok(Message::Binary(data))) => match String::from_utf8(data.to_vec()) {
                    Ok(text) => {
                        if !frames.deliver(text) {
                            break;
                        }
                    }
                    Err(_) => {
                        warn!("Non-UTF-8 binary frame; closing channel");
                        break;
                    }
                },
                Some(Ok(Message::Close(_))) | None => {
                    debug!("Client closed connection");
                    break;
                }
                Some(Err(e)) => {
                    warn!("WebSocket error: {}", e);
                    break;
                }
                Some(Ok(_)) => {}
            }
        }
        input_channel.close();
        debug!("Input task ended");
    };

    // Both halves run until the channel closes so the close frame goes out.
    tokio::join!(sender_task, input_task);

    if let Err(e) = engine.task.await {
        error!(conn_id = %connection_id, "session engine panicked: {}", e);
    }
    debug!(conn_id = %connection_id, "channel closed");
}
