//! WebSocket traffic monitor
//!
//! One connection monitors one or more interfaces of a single router. The
//! socket is upgraded before the query is validated so that bad parameters
//! are reported as an `error` event rather than a failed handshake.

use async_trait::async_trait;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::response::Response;
use futures::stream::{SplitSink, SplitStream};
use futures::{future, SinkExt, Stream, StreamExt};
use rosgw_conn::telemetry::parse_stream_list;
use rosgw_conn::{
    ClientMessage, EventWriter, MonitorEvent, StreamingRequest, StreamingSession, WriteError,
};
use rosgw_core::GatewayResult;
use tracing::debug;

use super::RouterQuery;
use crate::state::AppState;

/// GET /ws/traffic/monitor?router_id=&interface= | &interfaces=a,b
pub async fn monitor_traffic(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    Query(query): Query<RouterQuery>,
) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state, query))
}

fn streaming_request(query: &RouterQuery) -> GatewayResult<StreamingRequest> {
    // Zero is rejected by StreamingRequest itself
    let device_id = query
        .router_id
        .as_deref()
        .and_then(|raw| raw.trim().parse().ok())
        .unwrap_or(0);
    let streams = parse_stream_list(query.interfaces.as_deref(), query.interface.as_deref());
    StreamingRequest::new(device_id, streams)
}

async fn handle_socket(socket: WebSocket, state: AppState, query: RouterQuery) {
    let (sender, receiver) = socket.split();
    let mut writer = SocketWriter { sender };

    let request = match streaming_request(&query) {
        Ok(request) => request,
        Err(e) => {
            debug!(error = %e, "Rejecting monitor request");
            if let Err(e) = writer.write(&MonitorEvent::error(e.to_string())).await {
                debug!(error = %e, "Failed to report invalid request");
            }
            writer.close().await;
            return;
        }
    };

    let session = StreamingSession::with_cancel_token(request, state.shutdown_token().child_token());
    let summary = session
        .run(
            state.multiplexer().clone(),
            writer,
            client_messages(receiver),
        )
        .await;
    debug!(
        device_id = summary.device_id,
        started = summary.started.len(),
        failed = summary.failed.len(),
        "Monitor socket finished"
    );
}

/// Text frames become control messages; the stream ends on close or error
fn client_messages(
    receiver: SplitStream<WebSocket>,
) -> impl Stream<Item = ClientMessage> + Send + Unpin + 'static {
    receiver
        .take_while(|frame| future::ready(matches!(frame, Ok(m) if !matches!(m, Message::Close(_)))))
        .filter_map(|frame| {
            future::ready(match frame {
                Ok(Message::Text(text)) => Some(ClientMessage::parse(text.as_str())),
                _ => None,
            })
        })
}

/// Serializes events as JSON text frames
struct SocketWriter {
    sender: SplitSink<WebSocket, Message>,
}

#[async_trait]
impl EventWriter for SocketWriter {
    async fn write(&mut self, event: &MonitorEvent) -> Result<(), WriteError> {
        let text = serde_json::to_string(event).map_err(|e| WriteError(e.to_string()))?;
        self.sender
            .send(Message::Text(text.into()))
            .await
            .map_err(|e| WriteError(e.to_string()))
    }

    async fn close(&mut self) {
        if let Err(e) = self.sender.send(Message::Close(None)).await {
            debug!(error = %e, "Socket already closed");
        }
    }
}
