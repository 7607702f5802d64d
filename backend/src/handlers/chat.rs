use axum::{
    extract::{
        Path, Query, State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    response::Response,
};
use futures::{SinkExt, StreamExt, stream::SplitSink};
use serde::{Deserialize, Serialize};

use super::auth::AuthenticatedUser;
use super::swipes::{MessageView, parse_target};
use crate::constants::is_valid_payload;
use crate::error::{ServiceError, ServiceResult};
use crate::hub::{Attachment, HubEvent};
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct ChatParams {
    pub last_seq: Option<u64>,
}

/// Frames a client may send.
#[derive(Debug, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientFrame {
    Send { payload: String },
    Ack { seq: u64 },
}

/// Frames the server writes.
#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerFrame {
    Message(MessageView),
    Sent { seq: u64 },
    Closed,
    Error { error: String },
}

/// Resolves the dialog and attaches before upgrading, so `NoMatch` and
/// `DialogClosed` come back as plain HTTP errors.
pub async fn connect(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(target): Path<String>,
    Query(params): Query<ChatParams>,
) -> ServiceResult<Response> {
    let target = parse_target(&target)?;
    let attachment = state
        .service
        .open_dialog(user.id, target, params.last_seq)
        .await?;
    Ok(ws.on_upgrade(move |socket| run_session(socket, attachment)))
}

type Outbound = SplitSink<WebSocket, Message>;

async fn write_frame(sink: &mut Outbound, frame: &ServerFrame) -> bool {
    let text = match serde_json::to_string(frame) {
        Ok(text) => text,
        Err(e) => {
            tracing::error!("Failed to encode frame: {}", e);
            return false;
        }
    };
    sink.send(Message::Text(text.into())).await.is_ok()
}

async fn run_session(socket: WebSocket, mut attachment: Attachment) {
    let dialog = attachment.dialog();
    let user = attachment.user();
    tracing::info!(%dialog, %user, "Chat session started");

    let (mut outbound, mut inbound) = socket.split();

    loop {
        tokio::select! {
            event = attachment.next_event() => match event {
                Some(HubEvent::Message(message)) => {
                    if !write_frame(&mut outbound, &ServerFrame::Message(message.into())).await {
                        break;
                    }
                }
                Some(HubEvent::Closed) => {
                    let _ = write_frame(&mut outbound, &ServerFrame::Closed).await;
                    break;
                }
                // Replaced by a newer connection or dropped as unresponsive.
                None => break,
            },
            incoming = inbound.next() => {
                let text = match incoming {
                    Some(Ok(Message::Text(text))) => text,
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => continue,
                    Some(Err(e)) => {
                        tracing::debug!(%dialog, %user, "Socket read failed: {}", e);
                        break;
                    }
                };
                if !handle_frame(&attachment, &mut outbound, text.as_str()).await {
                    break;
                }
            }
        }
    }

    let _ = outbound.close().await;
    tracing::info!(%dialog, %user, "Chat session ended");
}

/// Returns false when the session should end.
async fn handle_frame(attachment: &Attachment, outbound: &mut Outbound, text: &str) -> bool {
    let frame = match serde_json::from_str::<ClientFrame>(text) {
        Ok(frame) => frame,
        Err(e) => {
            let error = format!("bad frame: {}", e);
            return write_frame(outbound, &ServerFrame::Error { error }).await;
        }
    };

    match frame {
        ClientFrame::Ack { seq } => {
            attachment.ack(seq);
            true
        }
        ClientFrame::Send { payload } => {
            if !is_valid_payload(&payload) {
                let error = "message payload is empty or too large".to_string();
                return write_frame(outbound, &ServerFrame::Error { error }).await;
            }
            match attachment.send(payload).await {
                Ok(message) => {
                    let seq = message.sequence;
                    write_frame(outbound, &ServerFrame::Sent { seq }).await
                }
                Err(ServiceError::DialogClosed) => {
                    let _ = write_frame(outbound, &ServerFrame::Closed).await;
                    false
                }
                Err(e) => {
                    tracing::warn!(
                        dialog = %attachment.dialog(),
                        user = %attachment.user(),
                        "Send failed: {}",
                        e
                    );
                    write_frame(outbound, &ServerFrame::Error { error: e.to_string() }).await
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::UserId;
    use chrono::Utc;

    #[test]
    fn test_client_frames_parse() {
        assert_eq!(
            serde_json::from_str::<ClientFrame>(r#"{"type":"send","payload":"hi"}"#).unwrap(),
            ClientFrame::Send { payload: "hi".into() }
        );
        assert_eq!(
            serde_json::from_str::<ClientFrame>(r#"{"type":"ack","seq":7}"#).unwrap(),
            ClientFrame::Ack { seq: 7 }
        );
        assert!(serde_json::from_str::<ClientFrame>(r#"{"type":"typing"}"#).is_err());
    }

    #[test]
    fn test_server_frames_are_tagged() {
        let sender = UserId::new();
        let frame = ServerFrame::Message(MessageView {
            seq: 4,
            sender,
            payload: "yo".into(),
            sent_at: Utc::now(),
        });
        let value = serde_json::to_value(&frame).unwrap();
        assert_eq!(value["type"], "message");
        assert_eq!(value["seq"], 4);
        assert_eq!(value["sender"], sender.to_string());

        let closed = serde_json::to_value(ServerFrame::Closed).unwrap();
        assert_eq!(closed, serde_json::json!({"type": "closed"}));
    }
}
