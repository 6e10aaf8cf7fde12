//! Protocol client for one simulator connection
//!
//! Owns the write half of the socket and a handle to the background receive
//! loop. Reads never block on the socket: the caller either takes the latest
//! frame or waits (bounded) for the next one.

use donkey_rl_core::{DonkeyError, Result, SessionConfig, TelemetryFrame};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout};
use tracing::{debug, info, trace, warn};

use crate::frame::FrameDecoder;
use crate::protocol::{SimMessage, serialize};
use crate::session::{ClientStats, SceneSignals, SessionEvents, SessionShared, reader_task};
use crate::transport::{AsyncReader, AsyncWriter, LineReader, LineWriter};

/// Upper bound on the delay between connection attempts
pub const MAX_CONNECT_BACKOFF: Duration = Duration::from_secs(5);

/// Client for one simulator connection
pub struct ProtocolClient {
    writer: Box<dyn AsyncWriter>,
    shared: Arc<SessionShared>,
    telemetry_rx: watch::Receiver<Arc<TelemetryFrame>>,
    scene_rx: watch::Receiver<SceneSignals>,
    reader: JoinHandle<()>,
    closed: bool,
}

impl ProtocolClient {
    /// Dial the simulator once
    pub async fn connect(config: &SessionConfig) -> Result<Self> {
        let addr = format!("{}:{}", config.host, config.port);
        debug!("Connecting to simulator at {}", addr);

        let stream = timeout(config.connect_timeout, TcpStream::connect(&addr))
            .await
            .map_err(|_| {
                DonkeyError::ConnectionError(format!(
                    "connect to {} timed out after {:?}",
                    addr, config.connect_timeout
                ))
            })?
            .map_err(|e| {
                DonkeyError::ConnectionError(format!("connect to {} failed: {}", addr, e))
            })?;

        // Control messages are tiny and latency-sensitive
        stream.set_nodelay(true)?;
        let (read_half, write_half) = stream.into_split();

        info!("Connected to simulator at {}", addr);
        Ok(Self::from_transport(
            LineReader::new(read_half),
            LineWriter::new(write_half),
            FrameDecoder::for_session(config),
        ))
    }

    /// Dial with exponential backoff, up to `connect_retries` attempts
    pub async fn connect_with_retry(config: &SessionConfig) -> Result<Self> {
        let attempts = config.connect_retries.max(1);
        let mut backoff = config.connect_backoff;
        let mut last_error = None;

        for attempt in 1..=attempts {
            match Self::connect(config).await {
                Ok(client) => return Ok(client),
                Err(e) => {
                    warn!("Connection attempt {}/{} failed: {}", attempt, attempts, e);
                    last_error = Some(e);
                }
            }
            if attempt < attempts {
                sleep(backoff).await;
                backoff = (backoff * 2).min(MAX_CONNECT_BACKOFF);
            }
        }

        Err(DonkeyError::ConnectionError(format!(
            "gave up on {}:{} after {} attempts: {}",
            config.host,
            config.port,
            attempts,
            last_error.map(|e| e.to_string()).unwrap_or_default()
        )))
    }

    /// Build a client over an established transport and start the receive
    /// loop. Must be called from within a tokio runtime.
    pub fn from_transport<R, W>(reader: R, writer: W, decoder: FrameDecoder) -> Self
    where
        R: AsyncReader + 'static,
        W: AsyncWriter + 'static,
    {
        let shared = Arc::new(SessionShared::new());
        let (telemetry_tx, telemetry_rx) = watch::channel(Arc::new(decoder.blank()));
        let (scene_tx, scene_rx) = watch::channel(SceneSignals::default());
        let reader = tokio::spawn(reader_task(
            reader,
            decoder,
            shared.clone(),
            telemetry_tx,
            scene_tx,
        ));

        Self {
            writer: Box::new(writer),
            shared,
            telemetry_rx,
            scene_rx,
            reader,
            closed: false,
        }
    }

    /// Serialize and send one message
    pub async fn send(&mut self, msg: &SimMessage) -> Result<()> {
        self.check_open()?;
        let data = serialize(msg)?;

        if matches!(msg, SimMessage::Control { .. }) {
            trace!("[→sim] {}", String::from_utf8_lossy(&data));
        } else {
            let preview: String = String::from_utf8_lossy(&data).chars().take(200).collect();
            debug!("[→sim] len={} json={}", data.len(), preview);
        }

        if let Err(e) = self.writer.write_message(&data).await {
            self.shared.set_fault(e.to_string());
            return Err(e);
        }
        self.shared.record_sent(msg);
        Ok(())
    }

    /// Wait for a frame newer than the last one consumed
    pub async fn next_frame(&mut self, within: Duration) -> Result<Arc<TelemetryFrame>> {
        self.check_open()?;
        match timeout(within, self.telemetry_rx.changed()).await {
            Ok(Ok(())) => Ok(self.telemetry_rx.borrow_and_update().clone()),
            Ok(Err(_)) => Err(lost(&self.shared)),
            Err(_) => Err(DonkeyError::TelemetryStalled(within)),
        }
    }

    /// Treat everything received so far as consumed
    pub fn mark_frames_seen(&mut self) {
        self.telemetry_rx.borrow_and_update();
    }

    pub fn scene_signals(&self) -> SceneSignals {
        *self.scene_rx.borrow()
    }

    /// Wait until the scene signals satisfy `ready`
    pub async fn wait_for_scene(
        &mut self,
        within: Duration,
        ready: impl FnMut(&SceneSignals) -> bool,
    ) -> Result<SceneSignals> {
        self.check_open()?;
        let waited = timeout(within, self.scene_rx.wait_for(ready))
            .await
            .map(|r| r.map(|signals| *signals));
        match waited {
            Ok(Ok(signals)) => Ok(signals),
            Ok(Err(_)) => Err(lost(&self.shared)),
            Err(_) => Err(DonkeyError::LoadTimeout(within)),
        }
    }

    /// Snapshot of what the simulator has reported so far
    pub fn events(&self) -> SessionEvents {
        self.shared.events()
    }

    /// Return and clear a pending car-config request
    pub fn take_config_request(&self) -> bool {
        self.shared.take_config_request()
    }

    /// Forget lap and checkpoint state ahead of a new episode
    pub fn clear_episode(&self) {
        self.shared.clear_episode();
    }

    pub fn stats(&self) -> ClientStats {
        self.shared.stats()
    }

    /// Reason the connection failed, if it has
    pub fn fault(&self) -> Option<String> {
        self.shared.fault()
    }

    /// Record a session-ending failure detected above the transport.
    /// An earlier fault keeps precedence.
    pub fn fail(&self, reason: impl Into<String>) {
        self.shared.set_fault(reason);
    }

    /// Whether `disconnect` has been called
    pub fn is_closed(&self) -> bool {
        self.closed
    }

    pub fn is_connected(&self) -> bool {
        !self.closed && !self.shared.is_faulted()
    }

    /// Close the write side and stop the receive loop. Idempotent.
    pub async fn disconnect(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        if let Err(e) = self.writer.shutdown().await {
            debug!("Shutdown of simulator socket failed: {}", e);
        }
        self.reader.abort();
        info!("Disconnected from simulator");
    }

    fn check_open(&self) -> Result<()> {
        if self.closed {
            return Err(DonkeyError::SessionClosed);
        }
        match self.shared.fault() {
            Some(reason) => Err(DonkeyError::ConnectionLost(reason)),
            None => Ok(()),
        }
    }
}

impl Drop for ProtocolClient {
    fn drop(&mut self) {
        self.reader.abort();
    }
}

fn lost(shared: &SessionShared) -> DonkeyError {
    DonkeyError::ConnectionLost(
        shared
            .fault()
            .unwrap_or_else(|| "receive loop stopped".to_string()),
    )
}
