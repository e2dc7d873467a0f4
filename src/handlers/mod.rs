/// TCP connection handlers
use crate::protocol::{is_disconnect, read_frame, write_frame, Event};
use crate::services::ResolutionService;
use std::io;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite, WriteHalf};
use tokio::net::TcpListener;
use tokio::sync::mpsc::{self, UnboundedReceiver};
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

/// Accept connections forever, one task per connection.
pub async fn serve(listener: TcpListener, service: Arc<ResolutionService>) -> io::Result<()> {
    loop {
        let (stream, addr) = listener.accept().await?;
        let service = service.clone();
        tokio::spawn(async move {
            info!("[NEW CONNECTION] {} connected", addr);
            handle_connection(stream, service).await;
            info!("[DISCONNECTED] {}", addr);
        });
    }
}

/// Read frames until disconnect, running each request as its own task so a
/// slow lookup never holds up the next frame.
pub async fn handle_connection<S>(stream: S, service: Arc<ResolutionService>)
where
    S: AsyncRead + AsyncWrite + Send + 'static,
{
    let (mut reader, writer) = tokio::io::split(stream);
    let (tx, rx) = mpsc::unbounded_channel();
    let writer_task = tokio::spawn(write_events(writer, rx));
    let mut in_flight = JoinSet::new();

    loop {
        match read_frame(&mut reader).await {
            Ok(Some(frame)) if is_disconnect(&frame) => {
                debug!("disconnect requested");
                break;
            }
            Ok(Some(frame)) => {
                let service = service.clone();
                let tx = tx.clone();
                in_flight.spawn(async move { service.handle_frame(frame, tx).await });
            }
            Ok(None) => break,
            Err(e) => {
                warn!("dropping connection on unreadable frame: {}", e);
                break;
            }
        }
    }

    // Requests already accepted still run to their terminal event.
    while let Some(joined) = in_flight.join_next().await {
        if let Err(e) = joined {
            error!("request task failed: {}", e);
        }
    }
    drop(tx);

    if let Err(e) = writer_task.await {
        error!("event writer task failed: {}", e);
    }
}

async fn write_events<S>(mut writer: WriteHalf<S>, mut rx: UnboundedReceiver<Event>)
where
    S: AsyncRead + AsyncWrite,
{
    while let Some(event) = rx.recv().await {
        let payload = event.encode();
        if let Err(e) = write_frame(&mut writer, &payload).await {
            warn!("failed to send {} event: {}", event.name(), e);
            // Drain so request tasks never block on a dead peer.
            while rx.recv().await.is_some() {}
            return;
        }
    }
}
