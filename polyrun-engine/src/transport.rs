//! Newline-delimited JSON transport
//!
//! Each input line is one [`WorkerMessage`]; each output line is one
//! [`EngineMessage`]. Used over stdin/stdout by `polyrun serve`.

use crate::engine::EngineHandle;
use crate::error::{EngineError, Result};
use polyrun_common::{EngineMessage, WorkerMessage};
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader, BufWriter};
use tokio::sync::broadcast::error::{RecvError, TryRecvError};
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

/// Serve one connection until `reader` reaches end of input.
///
/// Executions submitted on this connection are waited for before
/// returning, and their messages are flushed to `writer`.
pub async fn serve<R, W>(handle: EngineHandle, reader: R, writer: W) -> Result<()>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin + Send + 'static,
{
    let (local_tx, local_rx) = mpsc::unbounded_channel();
    let (done_tx, done_rx) = oneshot::channel();
    let writer_task = tokio::spawn(write_messages(
        handle.subscribe(),
        local_rx,
        writer,
        done_rx,
    ));

    let mut lines = BufReader::new(reader).lines();
    let mut executions = JoinSet::new();

    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        match serde_json::from_str::<WorkerMessage>(line) {
            Ok(WorkerMessage::Execute { data }) => {
                let handle = handle.clone();
                let local = local_tx.clone();
                let request = data.into_request();
                executions.spawn(async move {
                    let request_id = request.request_id.clone();
                    let submitted = handle.submit(request).await;
                    if let Err(e @ EngineError::DuplicateRequest(_)) = &submitted {
                        let _ = local.send(EngineMessage::Error {
                            data: e.to_string(),
                            request_id: Some(request_id),
                        });
                    }
                    submitted
                });
            }
            Ok(message) => {
                debug!(?message, "Forwarding control message");
                handle.post(message)?;
            }
            Err(e) => {
                warn!(error = %e, "Ignoring malformed message");
                let _ = local_tx.send(EngineMessage::failure(format!("invalid message: {}", e)));
            }
        }
    }

    info!(pending = executions.len(), "Input closed; waiting for executions");
    while let Some(joined) = executions.join_next().await {
        match joined {
            Ok(Ok(_)) => {}
            Ok(Err(e)) => warn!(error = %e, "Execution did not complete"),
            Err(e) => warn!(error = %e, "Execution task failed"),
        }
    }

    let _ = done_tx.send(());
    writer_task
        .await
        .map_err(|e| EngineError::Io(std::io::Error::other(e)))?
}

async fn write_messages<W>(
    mut events: broadcast::Receiver<EngineMessage>,
    mut local: mpsc::UnboundedReceiver<EngineMessage>,
    writer: W,
    mut done: oneshot::Receiver<()>,
) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    let mut writer = BufWriter::new(writer);

    loop {
        let message = tokio::select! {
            received = events.recv() => match received {
                Ok(message) => message,
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped, "Transport fell behind; messages dropped");
                    continue;
                }
                Err(RecvError::Closed) => break,
            },
            Some(message) = local.recv() => message,
            _ = &mut done => break,
        };
        write_line(&mut writer, &message).await?;
    }

    // Flush whatever is already queued
    while let Ok(message) = local.try_recv() {
        write_line(&mut writer, &message).await?;
    }
    loop {
        match events.try_recv() {
            Ok(message) => write_line(&mut writer, &message).await?,
            Err(TryRecvError::Lagged(_)) => continue,
            Err(_) => break,
        }
    }
    writer.flush().await?;
    Ok(())
}

async fn write_line<W>(writer: &mut BufWriter<W>, message: &EngineMessage) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    let mut line = serde_json::to_vec(message)?;
    line.push(b'\n');
    writer.write_all(&line).await?;
    writer.flush().await?;
    Ok(())
}
