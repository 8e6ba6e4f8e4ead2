use axum::extract::ws::{Message, WebSocket};
use futures::future;
use futures_util::{SinkExt, StreamExt};
use realtime_hub::{Frame, HubHandle, Identity, TransportError};
use tracing::{info, warn};

/// Hand an upgraded socket to the hub and wait until its connection is torn down.
pub async fn handle_websocket(socket: WebSocket, hub: HubHandle, identity: Identity) {
    let (sender, receiver) = socket.split();

    let reader = receiver.map(|msg| match msg {
        Ok(msg) => Ok(message_to_frame(msg)),
        Err(e) => Err(TransportError::Read(e.to_string())),
    });
    let writer = sender
        .sink_map_err(|e| TransportError::Write(e.to_string()))
        .with(|frame: Frame| future::ready(Ok::<_, TransportError>(frame_to_message(frame))));

    let user_id = identity.user_id;
    match hub.connect(identity, reader, writer).await {
        Ok(connected) => {
            let conn_id = connected.connection_id;
            info!(%user_id, %conn_id, "WebSocket client connected");
            if let Some(reason) = connected.closed().await {
                info!(%user_id, %conn_id, ?reason, "WebSocket client disconnected");
            }
        }
        Err(e) => {
            // Dropping the transport halves closes the socket
            warn!(%user_id, "Rejecting WebSocket client: {}", e);
        }
    }
}

fn message_to_frame(msg: Message) -> Frame {
    match msg {
        Message::Text(text) => Frame::Text(text.as_str().to_owned()),
        Message::Binary(bytes) => Frame::Binary(bytes.to_vec()),
        Message::Ping(bytes) => Frame::Ping(bytes.to_vec()),
        Message::Pong(bytes) => Frame::Pong(bytes.to_vec()),
        Message::Close(_) => Frame::Close,
    }
}

fn frame_to_message(frame: Frame) -> Message {
    match frame {
        Frame::Text(text) => Message::Text(text.into()),
        Frame::Binary(bytes) => Message::Binary(bytes.into()),
        Frame::Ping(bytes) => Message::Ping(bytes.into()),
        Frame::Pong(bytes) => Message::Pong(bytes.into()),
        Frame::Close => Message::Close(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_text_and_binary_keep_payload() {
        assert_eq!(
            message_to_frame(Message::Text("hi".into())),
            Frame::Text("hi".to_string())
        );
        assert_eq!(
            message_to_frame(Message::Binary(vec![1, 2].into())),
            Frame::Binary(vec![1, 2])
        );
    }

    #[test]
    fn test_close_maps_both_ways() {
        assert_eq!(message_to_frame(Message::Close(None)), Frame::Close);
        assert!(matches!(frame_to_message(Frame::Close), Message::Close(None)));
    }

    #[test]
    fn test_outbound_text_is_text_message() {
        match frame_to_message(Frame::Text("{}".to_string())) {
            Message::Text(text) => assert_eq!(text.as_str(), "{}"),
            other => panic!("unexpected message: {other:?}"),
        }
    }
}
