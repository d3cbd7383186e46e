use std::{
    collections::HashMap,
    fmt,
    sync::{
        atomic::{AtomicU32, Ordering},
        Arc,
    },
    time::Duration,
};

use tokio::{
    io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt},
    sync::{broadcast, oneshot, watch, Mutex},
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::{
    codec::{encode_command, FrameDecoder},
    error::{DbgpError, Result},
    packet::{InitPacket, Packet, ResponsePacket, StreamKind},
};

#[derive(Debug, Clone)]
pub struct TransportConfig {
    pub init_timeout: Duration,
    pub event_channel_size: usize,
    pub read_buffer_size: usize,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            init_timeout: Duration::from_secs(10),
            event_channel_size: 256,
            read_buffer_size: 8 * 1024,
        }
    }
}

/// Lifecycle signals published by the reader task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    Stdout(String),
    Stderr(String),
    Notify(String),
    /// The connection failed; always followed by [`SessionEvent::Closed`].
    Error(String),
    Closed,
}

type Pending = HashMap<u32, oneshot::Sender<Result<ResponsePacket>>>;

struct Inner {
    writer: Mutex<Box<dyn AsyncWrite + Send + Unpin>>,
    pending: Mutex<Pending>,
    next_id: AtomicU32,
    init: watch::Sender<Option<InitPacket>>,
    events: broadcast::Sender<SessionEvent>,
    shutdown: CancellationToken,
    config: TransportConfig,
}

/// One DBGP connection: transaction ids, pending replies and the reader task.
///
/// Cloning is cheap and every clone talks to the same connection.
#[derive(Clone)]
pub struct Transport {
    inner: Arc<Inner>,
}

impl fmt::Debug for Transport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Transport")
            .field("next_id", &self.inner.next_id.load(Ordering::Relaxed))
            .field("closed", &self.inner.shutdown.is_cancelled())
            .finish()
    }
}

impl Transport {
    /// Take ownership of a connected stream and start reading from it.
    ///
    /// Must be called from within a tokio runtime.
    pub fn new<S>(stream: S, config: TransportConfig) -> Self
    where
        S: AsyncRead + AsyncWrite + Send + Unpin + 'static,
    {
        let (reader, writer) = tokio::io::split(stream);
        let (events, _) = broadcast::channel(config.event_channel_size);
        let (init, _) = watch::channel(None);

        let inner = Arc::new(Inner {
            writer: Mutex::new(Box::new(writer)),
            pending: Mutex::new(HashMap::new()),
            next_id: AtomicU32::new(1),
            init,
            events,
            shutdown: CancellationToken::new(),
            config,
        });

        tokio::spawn(read_loop(reader, inner.clone()));

        Self { inner }
    }

    /// Wait for the engine's `init` packet.
    pub async fn init(&self) -> Result<InitPacket> {
        let mut rx = self.inner.init.subscribe();
        let wait = async move {
            let slot = rx
                .wait_for(|slot| slot.is_some())
                .await
                .map_err(|_| DbgpError::ConnectionClosed)?;
            Ok::<_, DbgpError>((*slot).clone().unwrap_or_default())
        };

        tokio::select! {
            biased;
            res = tokio::time::timeout(self.inner.config.init_timeout, wait) => {
                res.map_err(|_| DbgpError::Timeout)?
            }
            _ = self.inner.shutdown.cancelled() => Err(DbgpError::ConnectionClosed),
        }
    }

    /// Send one command and wait for the response carrying its transaction id.
    ///
    /// A response with an `<error>` element is returned as [`DbgpError::Protocol`].
    pub async fn send_command(
        &self,
        name: &str,
        args: &str,
        data: Option<&str>,
    ) -> Result<ResponsePacket> {
        if self.inner.shutdown.is_cancelled() {
            return Err(DbgpError::ConnectionClosed);
        }

        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();

        {
            let mut pending = self.inner.pending.lock().await;
            pending.insert(id, tx);
        }

        let packet = encode_command(name, id, args, data);
        let written = {
            let mut writer = self.inner.writer.lock().await;
            match writer.write_all(&packet).await {
                Ok(()) => writer.flush().await,
                Err(err) => Err(err),
            }
        };
        if let Err(err) = written {
            self.remove_pending(id).await;
            return Err(err.into());
        }

        let response = tokio::select! {
            biased;
            res = rx => match res {
                Ok(r) => r,
                Err(_closed) => return Err(DbgpError::ConnectionClosed),
            },
            _ = self.inner.shutdown.cancelled() => {
                self.remove_pending(id).await;
                return Err(DbgpError::ConnectionClosed);
            }
        }?;

        if let Some(err) = response.error() {
            return Err(err);
        }

        Ok(response)
    }

    async fn remove_pending(&self, id: u32) {
        let mut pending = self.inner.pending.lock().await;
        pending.remove(&id);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.inner.events.subscribe()
    }

    /// Stop reading; every pending and future command fails with `ConnectionClosed`.
    pub fn shutdown(&self) {
        self.inner.shutdown.cancel();
    }

    /// Cancelled once the connection is gone, whichever side closed it.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.inner.shutdown.clone()
    }

    pub fn is_closed(&self) -> bool {
        self.inner.shutdown.is_cancelled()
    }

    pub async fn pending_count(&self) -> usize {
        self.inner.pending.lock().await.len()
    }
}

async fn read_loop<R>(mut reader: R, inner: Arc<Inner>)
where
    R: AsyncRead + Unpin,
{
    let mut decoder = FrameDecoder::new();
    let mut buf = vec![0u8; inner.config.read_buffer_size.max(1)];

    let failure = loop {
        let read = tokio::select! {
            _ = inner.shutdown.cancelled() => break None,
            res = reader.read(&mut buf) => res,
        };
        let n = match read {
            Ok(0) => break None,
            Ok(n) => n,
            Err(err) => break Some(format!("read failed: {}", err)),
        };

        let elements = match decoder.push_xml(&buf[..n]) {
            Ok(elements) => elements,
            Err(err) => break Some(err.to_string()),
        };
        for element in elements {
            match Packet::from_xml(element) {
                Ok(packet) => dispatch(&inner, packet).await,
                Err(err) => warn!("dropping undecodable DBGP packet: {}", err),
            }
        }
    };

    inner.shutdown.cancel();

    let pending = {
        let mut pending = inner.pending.lock().await;
        std::mem::take(&mut *pending)
    };
    if !pending.is_empty() {
        debug!(count = pending.len(), "rejecting pending DBGP commands");
    }
    for (_id, tx) in pending {
        let _ = tx.send(Err(DbgpError::ConnectionClosed));
    }

    if let Some(reason) = failure {
        warn!("DBGP connection failed: {}", reason);
        let _ = inner.events.send(SessionEvent::Error(reason));
    }
    let _ = inner.events.send(SessionEvent::Closed);
}

async fn dispatch(inner: &Inner, packet: Packet) {
    match packet {
        Packet::Init(init) => {
            inner.init.send_if_modified(|slot| {
                if slot.is_some() {
                    debug!("ignoring repeated init packet");
                    return false;
                }
                *slot = Some(init);
                true
            });
        }
        Packet::Response(response) => {
            let tx = {
                let mut pending = inner.pending.lock().await;
                pending.remove(&response.transaction_id)
            };
            match tx {
                Some(tx) => {
                    let _ = tx.send(Ok(response));
                }
                None => debug!(
                    transaction_id = response.transaction_id,
                    command = %response.command,
                    "dropping response without a pending command"
                ),
            }
        }
        Packet::Stream { kind, text } => {
            let event = match kind {
                StreamKind::Stdout => SessionEvent::Stdout(text),
                StreamKind::Stderr => SessionEvent::Stderr(text),
            };
            let _ = inner.events.send(event);
        }
        Packet::Notify { name, .. } => {
            let _ = inner.events.send(SessionEvent::Notify(name));
        }
        Packet::Unknown(element) => debug!(name = %element.name, "ignoring unknown DBGP packet"),
    }
}
