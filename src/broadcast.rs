//! Publish/subscribe socket service for target payloads.
//!
//! Subscribers connect over WebSocket and receive every payload as one binary
//! message. The service never reads from subscribers. Publishers only queue
//! payloads; the broadcast thread owns the sockets and does every write, so a
//! stalled subscriber delays that thread and never the caller. A subscriber
//! whose socket fails on send is dropped; with no subscribers a send is a
//! no-op.

use anyhow::{anyhow, Result};
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, TrySendError};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;
use tungstenite::{Message, WebSocket};

pub const DEFAULT_BROADCAST_ADDR: &str = "0.0.0.0:5801";

const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(2);
const SEND_TIMEOUT: Duration = Duration::from_millis(250);
const POLL_INTERVAL: Duration = Duration::from_millis(50);
/// Payloads waiting for the broadcast thread. Newer payloads are dropped
/// while it is full.
const PAYLOAD_BACKLOG: usize = 4;

#[derive(Clone, Debug)]
pub struct BroadcastConfig {
    pub addr: String,
}

impl Default for BroadcastConfig {
    fn default() -> Self {
        Self {
            addr: DEFAULT_BROADCAST_ADDR.to_string(),
        }
    }
}

/// Cloneable sending side of a running broadcaster.
#[derive(Clone, Debug)]
pub struct Publisher {
    payloads: Sender<Vec<u8>>,
    subscribers: Arc<AtomicUsize>,
}

impl Publisher {
    /// Queue `bytes` for every connected subscriber without blocking.
    /// Returns how many subscribers it was queued for: zero when nobody is
    /// connected or the backlog is full.
    pub fn send_to_all(&self, bytes: &[u8]) -> usize {
        let subscribers = self.subscriber_count();
        if subscribers == 0 {
            return 0;
        }
        match self.payloads.try_send(bytes.to_vec()) {
            Ok(()) => subscribers,
            Err(TrySendError::Full(_)) => {
                log::debug!("broadcast backlog full, dropping payload");
                0
            }
            Err(TrySendError::Disconnected(_)) => 0,
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.load(Ordering::SeqCst)
    }
}

#[derive(Debug)]
pub struct BroadcastHandle {
    pub addr: SocketAddr,
    publisher: Publisher,
    shutdown: Arc<AtomicBool>,
    join: Option<JoinHandle<()>>,
}

impl BroadcastHandle {
    pub fn publisher(&self) -> Publisher {
        self.publisher.clone()
    }

    pub fn send_to_all(&self, bytes: &[u8]) -> usize {
        self.publisher.send_to_all(bytes)
    }

    pub fn subscriber_count(&self) -> usize {
        self.publisher.subscriber_count()
    }

    /// Stop accepting, close every subscriber and join the broadcast thread.
    pub fn stop(mut self) -> Result<()> {
        self.shutdown.store(true, Ordering::SeqCst);
        if let Some(join) = self.join.take() {
            join.join()
                .map_err(|_| anyhow!("broadcast server thread panicked"))?;
        }
        Ok(())
    }
}

pub struct TargetBroadcaster {
    cfg: BroadcastConfig,
}

impl TargetBroadcaster {
    pub fn new(cfg: BroadcastConfig) -> Self {
        Self { cfg }
    }

    pub fn spawn(self) -> Result<BroadcastHandle> {
        let configured_addr: SocketAddr = self
            .cfg
            .addr
            .parse()
            .map_err(|e| anyhow!("invalid broadcast address '{}': {}", self.cfg.addr, e))?;
        let listener = TcpListener::bind(configured_addr)?;
        let addr = listener.local_addr()?;
        listener.set_nonblocking(true)?;

        let (tx, rx) = crossbeam_channel::bounded(PAYLOAD_BACKLOG);
        let publisher = Publisher {
            payloads: tx,
            subscribers: Arc::new(AtomicUsize::new(0)),
        };
        let shutdown = Arc::new(AtomicBool::new(false));
        let server = BroadcastServer {
            listener,
            payloads: rx,
            count: publisher.subscribers.clone(),
            subscribers: Vec::new(),
        };
        let thread_shutdown = shutdown.clone();
        let join = std::thread::Builder::new()
            .name("broadcast".to_string())
            .spawn(move || server.run(&thread_shutdown))?;

        log::info!("target broadcaster listening on ws://{}", addr);
        Ok(BroadcastHandle {
            addr,
            publisher,
            shutdown,
            join: Some(join),
        })
    }
}

/// State owned by the broadcast thread.
struct BroadcastServer {
    listener: TcpListener,
    payloads: Receiver<Vec<u8>>,
    count: Arc<AtomicUsize>,
    subscribers: Vec<WebSocket<TcpStream>>,
}

impl BroadcastServer {
    fn run(mut self, shutdown: &AtomicBool) {
        if let Err(err) = self.serve(shutdown) {
            log::error!("target broadcaster stopped: {}", err);
        }
        for mut ws in self.subscribers.drain(..) {
            let _ = ws.close(None);
            let _ = ws.flush();
        }
        self.count.store(0, Ordering::SeqCst);
    }

    fn serve(&mut self, shutdown: &AtomicBool) -> Result<()> {
        while !shutdown.load(Ordering::SeqCst) {
            self.accept_pending()?;
            match self.payloads.recv_timeout(POLL_INTERVAL) {
                Ok(bytes) => self.deliver(bytes),
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => std::thread::sleep(POLL_INTERVAL),
            }
        }
        Ok(())
    }

    fn accept_pending(&mut self) -> Result<()> {
        loop {
            match self.listener.accept() {
                Ok((stream, peer)) => match handshake(stream) {
                    Ok(ws) => {
                        log::info!("broadcast subscriber connected: {}", peer);
                        self.subscribers.push(ws);
                        self.count.store(self.subscribers.len(), Ordering::SeqCst);
                    }
                    Err(err) => log::warn!("broadcast handshake with {} failed: {}", peer, err),
                },
                Err(err) if err.kind() == std::io::ErrorKind::WouldBlock => return Ok(()),
                Err(err) => return Err(err.into()),
            }
        }
    }

    fn deliver(&mut self, bytes: Vec<u8>) {
        let before = self.subscribers.len();
        self.subscribers
            .retain_mut(|ws| match ws.send(Message::Binary(bytes.clone())) {
                Ok(()) => true,
                Err(err) => {
                    log::info!("dropping broadcast subscriber: {}", err);
                    false
                }
            });
        let remaining = self.subscribers.len();
        if remaining < before {
            log::debug!("{} broadcast subscriber(s) remain", remaining);
            self.count.store(remaining, Ordering::SeqCst);
        }
    }
}

fn handshake(stream: TcpStream) -> Result<WebSocket<TcpStream>> {
    stream.set_nonblocking(false)?;
    stream.set_nodelay(true)?;
    stream.set_read_timeout(Some(HANDSHAKE_TIMEOUT))?;
    stream.set_write_timeout(Some(SEND_TIMEOUT))?;
    tungstenite::accept(stream).map_err(|e| anyhow!("{}", e))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn send_without_subscribers_is_a_no_op() {
        let handle = TargetBroadcaster::new(BroadcastConfig {
            addr: "127.0.0.1:0".to_string(),
        })
        .spawn()
        .expect("spawn broadcaster");
        assert_eq!(handle.subscriber_count(), 0);
        assert_eq!(handle.send_to_all(&[1, 2, 3]), 0);
        handle.stop().expect("stop");
    }

    #[test]
    fn invalid_address_is_rejected() {
        let result = TargetBroadcaster::new(BroadcastConfig {
            addr: "not-an-address".to_string(),
        })
        .spawn();
        assert!(result.is_err());
    }

    #[test]
    fn publishing_never_waits_on_a_stalled_subscriber() {
        let handle = TargetBroadcaster::new(BroadcastConfig {
            addr: "127.0.0.1:0".to_string(),
        })
        .spawn()
        .expect("spawn broadcaster");
        // Connected but never reads, so its socket buffers fill up.
        let (_stalled, _) =
            tungstenite::connect(format!("ws://{}", handle.addr)).expect("connect subscriber");
        let deadline = std::time::Instant::now() + Duration::from_secs(5);
        while handle.subscriber_count() == 0 {
            assert!(std::time::Instant::now() < deadline, "subscriber never registered");
            std::thread::sleep(Duration::from_millis(10));
        }

        let publisher = handle.publisher();
        let chunk = vec![0u8; 256 * 1024];
        let mut slowest = Duration::ZERO;
        for _ in 0..200 {
            let started = std::time::Instant::now();
            publisher.send_to_all(&chunk);
            slowest = slowest.max(started.elapsed());
        }
        assert!(slowest < Duration::from_millis(100), "slowest send {:?}", slowest);
        handle.stop().expect("stop");
    }
}
