//! `GET /ws`: snapshot over WebSocket.
//!
//! After the upgrade the server runs one snapshot pass, sends each `VmState`
//! as its own JSON text message in listing order, then closes. If listing
//! fails the connection is closed without any message. The first failed send
//! ends the pass; nothing is retried.

use super::AppState;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::Response;
use futures::{Sink, SinkExt};
use std::fmt::Display;
use tracing::{debug, warn};
use virtwatch_core::observability::metrics;
use virtwatch_core::VmState;

pub async fn stream_vms(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    metrics::record_api_request("/ws", 101);
    ws.on_upgrade(move |socket| send_snapshot(socket, state))
}

async fn send_snapshot(mut socket: WebSocket, state: AppState) {
    let vms = match state.snapshot().await {
        Ok(vms) => vms,
        Err(_) => {
            let _ = socket.send(Message::Close(None)).await;
            return;
        }
    };

    match send_vms(&mut socket, &vms).await {
        Ok(sent) => {
            debug!(sent, "Snapshot streamed");
            let _ = socket.send(Message::Close(None)).await;
        }
        // Peer is gone; dropping the socket tears the connection down.
        Err(e) => warn!(error = %e, "WebSocket send failed, aborting stream"),
    }
}

/// Send one text message per VM, in order, stopping at the first failed send.
///
/// Returns how many messages were sent.
async fn send_vms<S>(sink: &mut S, vms: &[VmState]) -> Result<usize, S::Error>
where
    S: Sink<Message> + Unpin,
    S::Error: Display,
{
    let mut sent = 0;
    for vm in vms {
        let payload = match serde_json::to_string(vm) {
            Ok(payload) => payload,
            Err(e) => {
                warn!(vm = %vm.id, error = %e, "Failed to encode VM state");
                continue;
            }
        };
        sink.send(Message::Text(payload.into())).await?;
        metrics::record_ws_message();
        sent += 1;
    }
    Ok(sent)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};
    use virtwatch_core::VmStatus;

    fn fleet(size: usize) -> Vec<VmState> {
        (0..size)
            .map(|i| VmState {
                id: format!("vm-{}", i),
                cpu: 1,
                memory: 1 << 30,
                disk_count: 0,
                disk_size: 0,
                uuid: format!("uuid-{}", i),
                ip_address: String::new(),
                status: VmStatus::Running,
            })
            .collect()
    }

    /// Sink that accepts `capacity` messages and fails every send after that,
    /// recording delivered ids and the number of attempts.
    fn peer(
        capacity: usize,
    ) -> (impl Sink<Message, Error = &'static str> + Unpin, Arc<Mutex<(Vec<String>, usize)>>)
    {
        let log: Arc<Mutex<(Vec<String>, usize)>> = Arc::default();
        let sink_log = log.clone();
        let sink = Box::pin(futures::sink::unfold(0usize, move |accepted, msg: Message| {
            let log = sink_log.clone();
            async move {
                let mut log = log.lock().unwrap();
                log.1 += 1;
                if accepted == capacity {
                    return Err("connection reset by peer");
                }
                if let Message::Text(text) = msg {
                    let vm: VmState = serde_json::from_str(text.as_str()).unwrap();
                    log.0.push(vm.id);
                }
                Ok(accepted + 1)
            }
        }));
        (sink, log)
    }

    #[tokio::test]
    async fn test_sends_every_vm_in_order() {
        let (mut sink, log) = peer(usize::MAX);
        let sent = send_vms(&mut sink, &fleet(3)).await.unwrap();
        assert_eq!(sent, 3);
        assert_eq!(log.lock().unwrap().0, vec!["vm-0", "vm-1", "vm-2"]);
    }

    #[tokio::test]
    async fn test_failed_send_aborts_the_pass() {
        let (mut sink, log) = peer(2);
        let err = send_vms(&mut sink, &fleet(10)).await.unwrap_err();
        assert_eq!(err, "connection reset by peer");

        let (delivered, attempts) = log.lock().unwrap().clone();
        assert_eq!(delivered, vec!["vm-0", "vm-1"]);
        // The failing message is not retried and nothing after it is tried.
        assert_eq!(attempts, 3);
    }

    #[tokio::test]
    async fn test_empty_snapshot_sends_nothing() {
        let (mut sink, log) = peer(0);
        assert_eq!(send_vms(&mut sink, &[]).await.unwrap(), 0);
        assert_eq!(log.lock().unwrap().1, 0);
    }
}
