//! Byte-stream adapter: newline-delimited JSON-RPC over stdio.
//!
//! The process's standard streams form one implicit, unkeyed session for
//! the process lifetime. The registry is never involved; the adapter owns
//! its single dispatcher directly.

use std::sync::Arc;

use anyhow::Result;
use fbmcp_rpc::{dispatch_request, parse_request, Dispatcher, DispatcherFactory, EventSink};
use fbmcp_rpc::JsonRpcResponse;
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Event sink that forwards serialized messages to the writer task.
///
/// Responses and dispatcher-pushed notifications go through the same
/// channel so stdout writes are never interleaved.
struct ChannelSink {
    tx: mpsc::UnboundedSender<String>,
}

impl EventSink for ChannelSink {
    fn send(&self, event: &Value) -> bool {
        match serde_json::to_string(event) {
            Ok(line) => self.tx.send(line).is_ok(),
            Err(err) => {
                warn!(error = %err, "failed to serialize outbound event");
                false
            }
        }
    }
}

/// Serve stdin/stdout until EOF or cancellation.
///
/// Runs a reader loop on the calling task and a single writer task that
/// owns stdout. Reader shutdown drops the channel sender, which drains
/// and ends the writer.
pub async fn run_stdio(
    factory: Arc<dyn DispatcherFactory>,
    token: CancellationToken,
) -> Result<()> {
    let (tx, mut rx) = mpsc::unbounded_channel::<String>();
    let dispatcher = factory.create(Arc::new(ChannelSink { tx: tx.clone() }));

    let writer = tokio::spawn(async move {
        let mut stdout = tokio::io::stdout();
        while let Some(line) = rx.recv().await {
            if stdout.write_all(line.as_bytes()).await.is_err() {
                break;
            }
            if stdout.write_all(b"\n").await.is_err() {
                break;
            }
            let _ = stdout.flush().await;
        }
    });

    info!("stdio transport listening");
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            () = token.cancelled() => {
                debug!("stdio transport stopping");
                break;
            }
            line = lines.next_line() => match line {
                Ok(Some(line)) => handle_line(dispatcher.as_ref(), &line, &tx).await,
                Ok(None) => {
                    info!("stdin closed, stopping stdio transport");
                    break;
                }
                Err(err) => {
                    warn!(error = %err, "stdin read failed, stopping stdio transport");
                    break;
                }
            }
        }
    }

    drop(tx);
    drop(dispatcher);
    writer.await?;
    Ok(())
}

/// Parse one inbound line and queue the response, if any, for writing.
/// Blank lines are ignored; notifications produce no response.
async fn handle_line(dispatcher: &dyn Dispatcher, line: &str, tx: &mpsc::UnboundedSender<String>) {
    let raw = line.trim();
    if raw.is_empty() {
        return;
    }

    let response = match parse_request(raw) {
        Ok(request) => dispatch_request(dispatcher, request).await,
        Err(err) => Some(JsonRpcResponse::from_rpc_error(Value::Null, &err)),
    };

    if let Some(response) = response {
        match serde_json::to_string(&response) {
            Ok(line) => {
                let _ = tx.send(line);
            }
            Err(err) => warn!(error = %err, "failed to serialize response"),
        }
    }
}
