pub mod codec;
pub mod config;
pub mod dispatch;
pub mod document_store;
pub mod error;
pub mod features;
pub mod pending;
pub mod protocol;

use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::UnixListener;
use tokio::sync::mpsc;
use tokio_util::codec::{FramedRead, FramedWrite};

pub use codec::MessageCodec;
pub use config::{Args, ServerConfig};
pub use dispatch::{DispatchConfig, Dispatcher};
pub use document_store::DocumentStore;
pub use error::ServerError;
pub use features::{DefaultFeatureProvider, FeatureProvider};
pub use protocol::{Command, CommandKind, FeatureResult, Inbound, MessageId, Request, Response};

/// Serves one client over a reader/writer pair until the reader reaches EOF.
///
/// The reader feeds the inbound queue, a dedicated dispatcher owns all
/// session state, and a writer task drains the outbound queue.
pub async fn serve_connection<R, W, P>(
    reader: R,
    writer: W,
    features: Arc<P>,
    config: ServerConfig,
) -> anyhow::Result<()>
where
    R: AsyncRead + Unpin + Send + 'static,
    W: AsyncWrite + Unpin + Send + 'static,
    P: FeatureProvider,
{
    let (inbound_tx, inbound_rx) = mpsc::channel::<Bytes>(config.queue_capacity);
    let (outbound_tx, mut outbound_rx) = mpsc::channel::<Response>(config.queue_capacity);

    let dispatcher = Dispatcher::new(features, config.dispatch.clone());
    let dispatch_task = tokio::spawn(dispatcher.run(inbound_rx, outbound_tx));

    let writer_task = tokio::spawn(async move {
        let mut sink = FramedWrite::new(writer, MessageCodec::default());
        while let Some(response) = outbound_rx.recv().await {
            sink.send(response).await?;
        }
        SinkExt::<Response>::close(&mut sink).await?;
        Ok::<_, std::io::Error>(())
    });

    let mut frames = FramedRead::new(reader, MessageCodec::default());
    while let Some(frame) = frames.next().await {
        match frame {
            Ok(body) => {
                if inbound_tx.send(body).await.is_err() {
                    tracing::warn!("dispatcher stopped, closing connection");
                    break;
                }
            }
            Err(e) => {
                // Framing is lost once a header block is unreadable.
                tracing::warn!("error reading from client: {e}");
                break;
            }
        }
    }
    drop(inbound_tx);

    dispatch_task.await.context("dispatch task failed")?;
    writer_task
        .await
        .context("writer task failed")?
        .context("error writing to client")?;
    Ok(())
}

pub async fn serve_stdio<P: FeatureProvider>(
    features: Arc<P>,
    config: ServerConfig,
) -> anyhow::Result<()> {
    tracing::info!("serving on stdio");
    serve_connection(tokio::io::stdin(), tokio::io::stdout(), features, config).await
}

fn lock_path(socket_path: &Path) -> PathBuf {
    let mut name = socket_path.as_os_str().to_owned();
    name.push(".lock");
    PathBuf::from(name)
}

/// Accepts clients on a Unix socket until Ctrl-C. Each connection gets its
/// own dispatcher and document store.
pub async fn run_socket_server<P: FeatureProvider>(
    socket_path: &Path,
    features: Arc<P>,
    config: ServerConfig,
) -> anyhow::Result<()> {
    let lock_file_path = lock_path(socket_path);
    let lock_file = OpenOptions::new()
        .create(true)
        .truncate(false)
        .write(true)
        .open(&lock_file_path)
        .with_context(|| format!("opening {}", lock_file_path.display()))?;
    let mut lock = fd_lock::RwLock::new(lock_file);
    let _guard = lock
        .try_write()
        .with_context(|| format!("another server already owns {}", socket_path.display()))?;

    // Safe to remove now that we hold the lock: any socket file is stale.
    let _ = std::fs::remove_file(socket_path);

    let listener = UnixListener::bind(socket_path)
        .with_context(|| format!("binding {}", socket_path.display()))?;
    tracing::info!("listening on {}", socket_path.display());

    let mut next_client: u64 = 1;
    loop {
        tokio::select! {
            accepted = listener.accept() => {
                let (stream, _) = accepted.context("accepting connection")?;
                let client_id = next_client;
                next_client += 1;

                let features = Arc::clone(&features);
                let config = config.clone();
                tokio::spawn(async move {
                    tracing::info!(client_id, "client connected");
                    let (reader, writer) = stream.into_split();
                    match serve_connection(reader, writer, features, config).await {
                        Ok(()) => tracing::info!(client_id, "client disconnected"),
                        Err(e) => tracing::warn!(client_id, "connection failed: {e:#}"),
                    }
                });
            }
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("interrupted, shutting down");
                break;
            }
        }
    }

    let _ = std::fs::remove_file(socket_path);
    Ok(())
}
