//! TCP front end

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use bverify_primitives::{short_hex, Hash};
use bverify_wire::{Frame, FrameCodec};
use futures::{SinkExt, StreamExt};
use tokio::net::{
    tcp::{OwnedReadHalf, OwnedWriteHalf},
    TcpListener, TcpStream,
};
use tokio::sync::mpsc;
use tokio_util::codec::{FramedRead, FramedWrite};
use tracing::{debug, error, info, warn};

use crate::config::ServerConfig;
use crate::engine::Engine;
use crate::processor::LogProcessor;
use crate::publisher::ChainPublisher;
use crate::ProcessorError;

/// b_verify server
#[derive(Debug)]
pub struct Server {
    config: ServerConfig,
    engine: Arc<Engine>,
}

impl Server {
    /// Open the engine and make the first commitment, so clients always
    /// find at least one
    pub async fn new(config: ServerConfig, publisher: Arc<dyn ChainPublisher>) -> Result<Self> {
        let engine = Engine::open(&config, publisher).await.context("opening server state")?;
        match engine.commit().await {
            Some(commitment) => info!(commitment = %short_hex(&commitment), "initial commitment"),
            None => info!("restored commitment is current"),
        }
        Ok(Self { config, engine })
    }

    /// Shared state behind every connection
    pub fn engine(&self) -> &Arc<Engine> {
        &self.engine
    }

    /// Settings the server was built with
    pub const fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Commit now
    pub async fn commit(&self) -> Option<Hash> {
        self.engine.commit().await
    }

    /// Bind the configured listen address
    pub async fn bind(&self) -> Result<TcpListener> {
        let listener = TcpListener::bind(&self.config.listen_addr)
            .await
            .with_context(|| format!("binding {}", self.config.listen_addr))?;
        info!("listening on {}", listener.local_addr()?);
        Ok(listener)
    }

    /// Bind and serve until the future is dropped
    pub async fn run(&self) -> Result<()> {
        let listener = self.bind().await?;
        self.serve(listener).await
    }

    /// Accept clients on `listener` and run timed commits if enabled
    pub async fn serve(&self, listener: TcpListener) -> Result<()> {
        tokio::select! {
            result = self.accept_loop(listener) => result,
            () = self.commit_loop() => Ok(()),
        }
    }

    async fn accept_loop(&self, listener: TcpListener) -> Result<()> {
        loop {
            let (stream, peer) = match listener.accept().await {
                Ok(accepted) => accepted,
                Err(err) => {
                    warn!(error = %err, "accept failed");
                    tokio::time::sleep(Duration::from_millis(100)).await;
                    continue;
                }
            };
            let engine = Arc::clone(&self.engine);
            let buffer = self.config.subscriber_buffer.max(1);
            let write_timeout = self.config.write_timeout();
            tokio::spawn(async move {
                handle_connection(stream, peer, engine, buffer, write_timeout).await;
            });
        }
    }

    async fn commit_loop(&self) {
        if !self.config.auto_commit {
            return std::future::pending().await;
        }
        let mut ticker = tokio::time::interval(self.config.commit_interval());
        // first tick fires immediately
        ticker.tick().await;
        loop {
            ticker.tick().await;
            self.engine.commit().await;
        }
    }
}

/// Serve one client until it disconnects or breaks the protocol
async fn handle_connection(
    stream: TcpStream,
    peer: SocketAddr,
    engine: Arc<Engine>,
    buffer: usize,
    write_timeout: Duration,
) {
    if let Err(err) = stream.set_nodelay(true) {
        debug!(%peer, error = %err, "set_nodelay failed");
    }
    let (read_half, write_half) = stream.into_split();
    let (tx, rx) = mpsc::channel(buffer);
    let connection = engine.registry().register(tx.clone());
    let eviction = engine.registry().eviction(connection);
    info!(%peer, connection, "client connected");

    let mut writer = tokio::spawn(write_loop(FramedWrite::new(write_half, FrameCodec), rx, write_timeout, peer));
    let processor = LogProcessor::new(Arc::clone(&engine), connection);
    let outcome = tokio::select! {
        outcome = read_loop(FramedRead::new(read_half, FrameCodec), &processor, &tx) => outcome,
        Ok(reason) = eviction => Err(reason),
        finished = &mut writer => {
            // nothing more can reach the peer, stop reading too
            engine.registry().remove(connection);
            if let Err(err) = finished {
                error!(%peer, error = %err, "writer task failed");
            }
            info!(%peer, connection, "connection dropped after write failure");
            return;
        }
    };

    engine.registry().remove(connection);
    match &outcome {
        Ok(()) => info!(%peer, connection, "client disconnected"),
        Err(err) => {
            warn!(%peer, connection, error = %err, "closing connection");
            // a broken stream gets no explanation
            if !matches!(err, ProcessorError::Transport(_) | ProcessorError::Framing(_)) {
                let _ = tx.send(Frame::error(err.to_string())).await;
            }
        }
    }
    drop(tx);
    if let Err(err) = writer.await {
        error!(%peer, error = %err, "writer task failed");
    }
}

async fn read_loop(
    mut reader: FramedRead<OwnedReadHalf, FrameCodec>,
    processor: &LogProcessor,
    tx: &mpsc::Sender<Frame>,
) -> Result<(), ProcessorError> {
    while let Some(frame) = reader.next().await {
        let frame = frame?;
        let reply = processor.process(frame).await?;
        if tx.send(reply).await.is_err() {
            // writer gave up on the socket
            break;
        }
    }
    Ok(())
}

/// Drain the connection's queue into the socket, one frame at a time
async fn write_loop(
    mut writer: FramedWrite<OwnedWriteHalf, FrameCodec>,
    mut rx: mpsc::Receiver<Frame>,
    write_timeout: Duration,
    peer: SocketAddr,
) {
    while let Some(frame) = rx.recv().await {
        match tokio::time::timeout(write_timeout, writer.send(frame)).await {
            Ok(Ok(())) => {}
            Ok(Err(err)) => {
                warn!(%peer, error = %err, "write failed");
                return;
            }
            Err(_) => {
                warn!(%peer, timeout = ?write_timeout, "write timed out");
                return;
            }
        }
    }
    let _ = writer.close().await;
}
