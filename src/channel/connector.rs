//! Session connector: one real-time channel per open agreement
//!
//! Explicit `open`/`close` lifecycle, independent of any view layer. The
//! connector owns a single background task that dials the collaboration
//! server, announces `join-agreement`, and then pumps frames both ways.
//! On transport loss it retries with bounded backoff and re-announces the
//! join (at-least-once; the server deduplicates, and the online count is
//! only ever taken from server presence events, so duplicate joins cannot
//! double-count locally).
//!
//! Outbound events sent while the link is down fail fast and are not
//! queued for redelivery; anything staged before a drop is discarded on
//! reconnect. Durable mutations never depend on this channel.

use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use rand::Rng;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tokio_tungstenite::{
    connect_async_with_config,
    tungstenite::{http::Request, Message},
    MaybeTlsStream, WebSocketStream,
};
use tracing::{debug, info, warn};

use crate::channel::events::{ClientEvent, ServerEvent};
use crate::types::{ParleyError, Result};

/// Default timeout for the channel handshake
const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Capacity of the outbound command queue
const OUTBOUND_QUEUE: usize = 64;

/// Capacity of the inbound notice fan-out
const NOTICE_QUEUE: usize = 256;

type WsStream = WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;

/// Connectivity of the real-time link
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkStatus {
    Connecting,
    Online,
    Offline,
}

/// Notices fanned out to session observers
#[derive(Debug, Clone)]
pub enum ChannelNotice {
    /// Link established and join announced
    Connected,
    /// Link lost; the connector keeps retrying until its attempt bound
    Disconnected { reason: String },
    /// A validated server event
    Event(ServerEvent),
}

/// Bounded reconnect schedule: exponential backoff with jitter
#[derive(Debug, Clone)]
pub struct ReconnectPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 8,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
        }
    }
}

impl ReconnectPolicy {
    /// Delay before the given attempt (1-based), capped and jittered.
    pub fn delay(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(16);
        let backoff = self
            .base_delay
            .saturating_mul(2u32.saturating_pow(exp))
            .min(self.max_delay);
        let jitter_cap = (backoff.as_millis() as u64 / 4).max(1);
        let jitter = rand::thread_rng().gen_range(0..jitter_cap);
        backoff + Duration::from_millis(jitter)
    }
}

/// Everything needed to open a channel for one agreement
#[derive(Debug, Clone)]
pub struct ConnectorConfig {
    /// WebSocket URL of the collaboration server (ws:// or wss://)
    pub channel_url: String,
    /// Bearer credential presented on the upgrade request
    pub token: String,
    pub agreement_id: String,
    pub user_id: String,
    pub display_name: String,
    pub connect_timeout: Duration,
    pub reconnect: ReconnectPolicy,
}

impl ConnectorConfig {
    pub fn new(
        channel_url: impl Into<String>,
        token: impl Into<String>,
        agreement_id: impl Into<String>,
        user_id: impl Into<String>,
        display_name: impl Into<String>,
    ) -> Self {
        Self {
            channel_url: channel_url.into(),
            token: token.into(),
            agreement_id: agreement_id.into(),
            user_id: user_id.into(),
            display_name: display_name.into(),
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            reconnect: ReconnectPolicy::default(),
        }
    }

    fn join_event(&self) -> ClientEvent {
        ClientEvent::JoinAgreement {
            agreement_id: self.agreement_id.clone(),
            user_id: self.user_id.clone(),
            display_name: self.display_name.clone(),
        }
    }

    fn leave_event(&self) -> ClientEvent {
        ClientEvent::LeaveAgreement {
            agreement_id: self.agreement_id.clone(),
            user_id: self.user_id.clone(),
        }
    }
}

/// Handle to an open channel. Dropping the handle without `close()` aborts
/// the background task on the next shutdown check.
pub struct SessionConnector {
    outbound: mpsc::Sender<ClientEvent>,
    notices: broadcast::Sender<ChannelNotice>,
    status: watch::Receiver<LinkStatus>,
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl SessionConnector {
    /// Open a channel for one agreement and start the background task.
    pub fn open(config: ConnectorConfig) -> Self {
        let (outbound_tx, outbound_rx) = mpsc::channel(OUTBOUND_QUEUE);
        let (notice_tx, _) = broadcast::channel(NOTICE_QUEUE);
        let (status_tx, status_rx) = watch::channel(LinkStatus::Connecting);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let task = tokio::spawn(run_channel(
            config,
            outbound_rx,
            notice_tx.clone(),
            status_tx,
            shutdown_rx,
        ));

        Self {
            outbound: outbound_tx,
            notices: notice_tx,
            status: status_rx,
            shutdown: shutdown_tx,
            task,
        }
    }

    /// Subscribe to channel notices (link transitions and server events).
    pub fn notices(&self) -> broadcast::Receiver<ChannelNotice> {
        self.notices.subscribe()
    }

    /// Watch the link status.
    pub fn status(&self) -> watch::Receiver<LinkStatus> {
        self.status.clone()
    }

    /// Current connectivity.
    pub fn is_online(&self) -> bool {
        *self.status.borrow() == LinkStatus::Online
    }

    /// Emit an event over the channel.
    ///
    /// Fails fast while the link is down — events are never queued across
    /// reconnects; durable writes do not pass through here.
    pub async fn send(&self, event: ClientEvent) -> Result<()> {
        if !self.is_online() {
            return Err(ParleyError::Channel("channel is offline".into()));
        }
        self.outbound
            .send(event)
            .await
            .map_err(|_| ParleyError::Channel("channel task has stopped".into()))
    }

    /// Announce leave, tear the channel down and wait for the task to stop.
    pub async fn close(self) {
        let _ = self.shutdown.send(true);
        if let Err(e) = self.task.await {
            if !e.is_cancelled() {
                warn!(error = %e, "Channel task ended abnormally");
            }
        }
    }
}

/// Outcome of one connected stretch
enum DriveEnd {
    Shutdown,
    Lost(String),
}

async fn run_channel(
    config: ConnectorConfig,
    mut outbound: mpsc::Receiver<ClientEvent>,
    notices: broadcast::Sender<ChannelNotice>,
    status: watch::Sender<LinkStatus>,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut attempt: u32 = 0;

    loop {
        if *shutdown.borrow() {
            break;
        }

        let _ = status.send(LinkStatus::Connecting);
        match dial(&config).await {
            Ok(mut ws) => {
                // Anything staged before the link came (back) up is stale:
                // the optimistic UI entry is the only record it keeps.
                while outbound.try_recv().is_ok() {}

                if let Err(e) = announce_join(&config, &mut ws).await {
                    warn!(error = %e, "Join announce failed");
                    let _ = status.send(LinkStatus::Offline);
                    let _ = notices.send(ChannelNotice::Disconnected { reason: e.to_string() });
                } else {
                    attempt = 0;
                    let _ = status.send(LinkStatus::Online);
                    let _ = notices.send(ChannelNotice::Connected);
                    info!(
                        agreement_id = %config.agreement_id,
                        "Collaboration channel online"
                    );

                    match drive(&config, ws, &mut outbound, &notices, &mut shutdown).await {
                        DriveEnd::Shutdown => break,
                        DriveEnd::Lost(reason) => {
                            warn!(reason = %reason, "Collaboration channel lost");
                            let _ = status.send(LinkStatus::Offline);
                            let _ = notices.send(ChannelNotice::Disconnected { reason });
                        }
                    }
                }
            }
            Err(e) => {
                let _ = status.send(LinkStatus::Offline);
                let _ = notices.send(ChannelNotice::Disconnected { reason: e.to_string() });
            }
        }

        attempt += 1;
        if attempt > config.reconnect.max_attempts {
            warn!(
                attempts = attempt - 1,
                "Reconnect attempts exhausted; channel stays offline"
            );
            break;
        }

        let delay = config.reconnect.delay(attempt);
        debug!(attempt, delay_ms = delay.as_millis() as u64, "Reconnecting");
        tokio::select! {
            _ = tokio::time::sleep(delay) => {}
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    break;
                }
            }
        }
    }

    let _ = status.send(LinkStatus::Offline);
}

/// Open the WebSocket with the bearer credential on the upgrade request.
async fn dial(config: &ConnectorConfig) -> Result<WsStream> {
    let host = config
        .channel_url
        .split("//")
        .last()
        .unwrap_or("localhost")
        .split('/')
        .next()
        .unwrap_or("localhost")
        .to_string();

    let request = Request::builder()
        .uri(&config.channel_url)
        .header("Host", host)
        .header("Connection", "Upgrade")
        .header("Upgrade", "websocket")
        .header("Sec-WebSocket-Version", "13")
        .header(
            "Sec-WebSocket-Key",
            tokio_tungstenite::tungstenite::handshake::client::generate_key(),
        )
        .header("Authorization", format!("Bearer {}", config.token))
        .body(())
        .map_err(|e| ParleyError::Channel(format!("Failed to build upgrade request: {e}")))?;

    let (ws, _) = tokio::time::timeout(
        config.connect_timeout,
        connect_async_with_config(request, None, false),
    )
    .await
    .map_err(|_| ParleyError::Channel("Timeout connecting to collaboration server".into()))??;

    Ok(ws)
}

async fn announce_join(config: &ConnectorConfig, ws: &mut WsStream) -> Result<()> {
    let frame = config.join_event().encode()?;
    ws.send(Message::Text(frame)).await?;
    Ok(())
}

/// Pump frames both ways until shutdown or transport loss.
async fn drive(
    config: &ConnectorConfig,
    ws: WsStream,
    outbound: &mut mpsc::Receiver<ClientEvent>,
    notices: &broadcast::Sender<ChannelNotice>,
    shutdown: &mut watch::Receiver<bool>,
) -> DriveEnd {
    let (mut sink, mut stream) = ws.split();

    loop {
        tokio::select! {
            cmd = outbound.recv() => {
                match cmd {
                    Some(event) => {
                        let frame = match event.encode() {
                            Ok(f) => f,
                            Err(e) => {
                                warn!(error = %e, "Failed to encode outbound event");
                                continue;
                            }
                        };
                        if let Err(e) = sink.send(Message::Text(frame)).await {
                            return DriveEnd::Lost(e.to_string());
                        }
                    }
                    None => return DriveEnd::Shutdown,
                }
            }

            frame = stream.next() => {
                match frame {
                    Some(Ok(Message::Text(text))) => {
                        if let Some(event) = ServerEvent::parse(&text) {
                            // Frames for other agreements never reach the
                            // trackers.
                            if event.agreement_id() == config.agreement_id {
                                let _ = notices.send(ChannelNotice::Event(event));
                            } else {
                                debug!("Ignoring frame for another agreement");
                            }
                        }
                    }
                    Some(Ok(Message::Ping(data))) => {
                        if sink.send(Message::Pong(data)).await.is_err() {
                            return DriveEnd::Lost("pong failed".into());
                        }
                    }
                    Some(Ok(Message::Close(_))) => {
                        return DriveEnd::Lost("server closed the channel".into());
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => return DriveEnd::Lost(e.to_string()),
                    None => return DriveEnd::Lost("stream ended".into()),
                }
            }

            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    // Best-effort goodbye; delivery is not guaranteed.
                    if let Ok(frame) = config.leave_event().encode() {
                        let _ = sink.send(Message::Text(frame)).await;
                    }
                    let _ = sink.close().await;
                    return DriveEnd::Shutdown;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_grows_and_caps() {
        let policy = ReconnectPolicy {
            max_attempts: 8,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(2),
        };
        let d1 = policy.delay(1);
        let d4 = policy.delay(4);
        assert!(d1 >= Duration::from_millis(100));
        assert!(d4 >= Duration::from_millis(800));
        // Cap plus at most 25% jitter
        assert!(policy.delay(12) <= Duration::from_millis(2500));
    }

    #[test]
    fn test_join_event_shape() {
        let cfg = ConnectorConfig::new("ws://localhost:9000/ws", "tok", "agr-1", "u-a", "Alice");
        let json = cfg.join_event().encode().unwrap();
        assert!(json.contains("\"type\":\"join-agreement\""));
        assert!(json.contains("\"agreement_id\":\"agr-1\""));
    }
}
