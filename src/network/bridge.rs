use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use bytes::Bytes;
use chrono::Utc;
use futures::{FutureExt, Sink, SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, oneshot};
use tokio::time::{sleep, timeout, Instant};
use tokio_util::codec::Framed;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info_span, trace, warn, Instrument};

use super::connection::DownlinkCommand;
use super::outbound::{OutboundQueue, PendingDownlink};
use super::{Connection, GatewayServer, Resource, ScheduledDownlink, Session};
use crate::core::{BridgeConfig, Error, GatewayIdentity, Result};
use crate::protocol::{FrameCodec, Formatter, JsonFormatter, Upstream, WireFrame};
use crate::util::jitter;

/// Control frames waiting for the writer
const CONTROL_CAPACITY: usize = 8;

/// Accepts gateway transports and drives one event loop per gateway
pub struct ProtocolBridge<F = JsonFormatter> {
    server: GatewayServer,
    formatter: Arc<F>,
}

impl<F> Clone for ProtocolBridge<F> {
    fn clone(&self) -> Self {
        ProtocolBridge {
            server: self.server.clone(),
            formatter: self.formatter.clone(),
        }
    }
}

impl<F: Formatter> ProtocolBridge<F> {
    pub fn new(server: GatewayServer, formatter: F) -> Self {
        ProtocolBridge {
            server,
            formatter: Arc::new(formatter),
        }
    }

    pub fn server(&self) -> &GatewayServer {
        &self.server
    }

    /// Admits a gateway and spawns its event loop
    ///
    /// Must be called within a tokio runtime. The returned handle reports
    /// why the session ended through [`Connection::disconnect_reason`].
    pub fn accept<T>(&self, transport: T, identity: GatewayIdentity) -> Result<Connection>
    where
        T: AsyncRead + AsyncWrite + Send + Unpin + 'static,
    {
        self.server
            .rate_limiter()
            .require(&Resource::Accept(identity.gateway_id.clone()))?;
        let (connection, session) = self.server.connect(identity)?;

        let span = info_span!(
            "gateway",
            gateway_id = %connection.gateway_id(),
            session_id = %connection.session_id()
        );
        let event_loop = EventLoop {
            config: self.server.config().bridge.clone(),
            server: self.server.clone(),
            formatter: self.formatter.clone(),
            connection: connection.clone(),
            session,
            protocol_errors: 0,
        };
        let framed = Framed::new(transport, FrameCodec::new());
        let handle = connection.clone();

        tokio::spawn(
            async move {
                if let Err(panic) = AssertUnwindSafe(event_loop.run(framed)).catch_unwind().await {
                    let message = panic_message(panic.as_ref());
                    error!(error = %message, "Gateway event loop panicked");
                    handle.disconnect(Error::EventLoopPanic(message));
                }
            }
            .instrument(span),
        );
        Ok(connection)
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    panic
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| panic.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string())
}

struct EventLoop<F> {
    config: BridgeConfig,
    server: GatewayServer,
    formatter: Arc<F>,
    connection: Connection,
    session: Session,
    protocol_errors: u32,
}

impl<F: Formatter> EventLoop<F> {
    async fn run<T>(mut self, framed: Framed<T, FrameCodec>)
    where
        T: AsyncRead + AsyncWrite + Send + Unpin + 'static,
    {
        let (sink, mut stream) = framed.split::<WireFrame>();
        let outbound = Arc::new(OutboundQueue::new(self.config.outbound_capacity));
        let (control_tx, control_rx) = mpsc::channel(CONTROL_CAPACITY);
        let writer = tokio::spawn(
            write_loop(
                sink,
                outbound.clone(),
                control_rx,
                self.connection.clone(),
                self.config.close_timeout,
            )
            .in_current_span(),
        );

        let cancel = self.connection.cancellation().clone();
        let time_sync_enabled = !self.config.time_sync_interval.is_zero();
        let ping = sleep(jitter(self.config.ping_interval, self.config.jitter));
        let liveness = sleep(self.config.liveness_timeout);
        let time_sync = sleep(jitter(self.config.time_sync_interval, self.config.jitter));
        tokio::pin!(ping, liveness, time_sync);
        let mut ping_seq: u64 = 0;

        debug!("Event loop started");
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = &mut liveness => {
                    self.connection.disconnect(Error::LivenessTimeout);
                    break;
                }
                _ = &mut ping => {
                    ping.as_mut().reset(Instant::now() + jitter(self.config.ping_interval, self.config.jitter));
                    ping_seq += 1;
                    let frame = WireFrame::Ping(Bytes::copy_from_slice(&ping_seq.to_be_bytes()));
                    if let Err(e) = self.send_control(&control_tx, frame) {
                        self.connection.disconnect(e);
                        break;
                    }
                }
                _ = &mut time_sync, if time_sync_enabled => {
                    time_sync.as_mut().reset(Instant::now() + jitter(self.config.time_sync_interval, self.config.jitter));
                    match self.session.time_sync_reply(self.formatter.as_ref(), Utc::now()) {
                        Ok(Some(message)) => {
                            if let Err(e) = self.send_control(&control_tx, WireFrame::Data(message)) {
                                self.connection.disconnect(e);
                                break;
                            }
                        }
                        Ok(None) => debug!("Clock not synchronized, skipping time transfer"),
                        Err(e) => warn!(error = %e, "Failed to build time transfer"),
                    }
                }
                Some(command) = self.session.next_request() => {
                    self.handle_downlink(command, &outbound);
                }
                frame = stream.next() => match frame {
                    Some(Ok(frame)) => {
                        liveness.as_mut().reset(Instant::now() + self.config.liveness_timeout);
                        if let Err(e) = self.handle_frame(frame, &control_tx) {
                            self.connection.disconnect(e);
                            break;
                        }
                    }
                    Some(Err(e)) => {
                        self.connection.disconnect(e);
                        break;
                    }
                    None => {
                        self.connection.disconnect(Error::ClosedByPeer);
                        break;
                    }
                },
            }
        }

        let reason = self
            .connection
            .disconnect_reason()
            .unwrap_or(Error::ConnectionClosed);
        outbound.close();
        // the writer may be stuck on the transport, so the close frame is best effort
        let _ = control_tx.try_send(WireFrame::Close(reason.to_string()));
        drop(control_tx);
        self.session.release();
        if let Err(e) = writer.await {
            warn!(error = %e, "Writer task failed");
        }
        debug!(reason = %reason, "Event loop stopped");
    }

    /// Hands a control frame to the writer without waiting on the transport
    ///
    /// A frame that finds the writer backlogged is dropped: pings, pongs and
    /// time transfers are all superseded by the next one.
    fn send_control(&self, control: &mpsc::Sender<WireFrame>, frame: WireFrame) -> Result<()> {
        match control.try_send(frame) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(frame)) => {
                warn!(kind = ?frame.kind(), "Writer backlogged, dropping control frame");
                Ok(())
            }
            Err(TrySendError::Closed(_)) => Err(Error::transport("writer stopped")),
        }
    }

    fn handle_frame(&mut self, frame: WireFrame, control: &mpsc::Sender<WireFrame>) -> Result<()> {
        match frame {
            WireFrame::Ping(body) => self.send_control(control, WireFrame::Pong(body))?,
            WireFrame::Pong(_) => trace!("Pong received"),
            WireFrame::Close(reason) => {
                debug!(reason = %reason, "Gateway closed the connection");
                return Err(Error::ClosedByPeer);
            }
            WireFrame::Data(raw) => {
                self.server
                    .rate_limiter()
                    .require(&Resource::GatewayUp(self.connection.gateway_id().to_string()))?;

                let now = Utc::now();
                match self.formatter.decode_uplink(&raw, now, self.session.context()) {
                    Ok(Upstream::Uplink(message)) => {
                        trace!(
                            frequency = message.frequency,
                            data_rate = message.data_rate_index,
                            concentrator_time = message.concentrator_time,
                            "Uplink received"
                        );
                        self.session.handle_uplink(message);
                    }
                    Ok(Upstream::ClockSync(reply)) => {
                        let outcome = self.session.handle_clock_sync(reply, now);
                        trace!(?outcome, "Time sync reply received");
                    }
                    Err(e) => {
                        self.protocol_errors += 1;
                        warn!(error = %e, count = self.protocol_errors, "Failed to decode upstream message");
                        if self.protocol_errors >= self.config.max_protocol_errors {
                            return Err(Error::TooManyProtocolErrors(self.protocol_errors));
                        }
                    }
                }
            }
        }
        Ok(())
    }

    fn handle_downlink(&mut self, command: DownlinkCommand, outbound: &OutboundQueue) {
        let now = Utc::now();
        let result = self
            .session
            .schedule(&command.request, now)
            .and_then(|(slot, downlink)| {
                let frame = self
                    .formatter
                    .encode_downlink(&downlink, now, self.session.context())?;
                Ok((slot, downlink.diid, frame))
            });

        let reply = match result {
            Ok((slot, diid, frame)) => {
                debug!(
                    diid,
                    window = %slot.window,
                    frequency = slot.frequency,
                    data_rate = slot.data_rate_index,
                    "Downlink scheduled"
                );
                let (outcome, rx) = oneshot::channel();
                let pending = PendingDownlink {
                    diid,
                    frame,
                    transmit_at: slot.transmit_at,
                    outcome,
                };
                outbound.push(pending, now);
                Ok(ScheduledDownlink::new(diid, slot, rx))
            }
            Err(e) => {
                debug!(error = %e, "Downlink rejected");
                Err(e)
            }
        };
        let _ = command.reply.send(reply);
    }
}

/// Owns the transport sink: control frames first, then queued downlinks
///
/// Every write races the connection's cancellation, so a gateway that stops
/// reading cannot hold the session open. After cancellation only the close
/// frame is written, within `close_timeout`.
async fn write_loop<S>(
    mut sink: S,
    outbound: Arc<OutboundQueue>,
    mut control: mpsc::Receiver<WireFrame>,
    connection: Connection,
    close_timeout: std::time::Duration,
) where
    S: Sink<WireFrame, Error = Error> + Unpin,
{
    let cancel = connection.cancellation().clone();
    let mut outbound_open = true;
    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            frame = control.recv() => {
                let Some(frame) = frame else { break };
                match send_or_cancel(&mut sink, frame, &cancel).await {
                    Some(Ok(())) => {}
                    Some(Err(e)) => {
                        connection.disconnect(e);
                        break;
                    }
                    None => break,
                }
            }
            entry = outbound.pop(), if outbound_open => {
                let Some(entry) = entry else {
                    outbound_open = false;
                    continue;
                };
                let now = Utc::now();
                if entry.transmit_at <= now {
                    let late_by_ms = (now - entry.transmit_at).num_milliseconds().max(0) as u64;
                    warn!(diid = entry.diid, late_by_ms, "Downlink past its transmit time, not written");
                    entry.complete(Err(Error::TooLate { late_by_ms }));
                    continue;
                }
                match send_or_cancel(&mut sink, WireFrame::Data(entry.frame.clone()), &cancel).await {
                    Some(Ok(())) => {
                        trace!(diid = entry.diid, "Downlink written");
                        entry.complete(Ok(()));
                    }
                    Some(Err(e)) => {
                        entry.complete(Err(e.clone()));
                        connection.disconnect(e);
                        break;
                    }
                    None => {
                        debug!(diid = entry.diid, "Downlink write interrupted by disconnect");
                        entry.complete(Err(Error::ConnectionClosed));
                        break;
                    }
                }
            }
        }
    }
    outbound.close();

    let farewell = async {
        while let Some(frame) = control.recv().await {
            if matches!(frame, WireFrame::Close(_)) {
                sink.send(frame).await?;
                break;
            }
        }
        sink.close().await
    };
    match timeout(close_timeout, farewell).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => debug!(error = %e, "Failed to close transport"),
        Err(_) => debug!("Transport stalled, abandoning close frame"),
    }
}

async fn send_or_cancel<S>(sink: &mut S, frame: WireFrame, cancel: &CancellationToken) -> Option<Result<()>>
where
    S: Sink<WireFrame, Error = Error> + Unpin,
{
    tokio::select! {
        result = sink.send(frame) => Some(result),
        _ = cancel.cancelled() => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::band::EU_863_870;
    use crate::core::ServerConfig;
    use crate::network::{TokenBucketConfig, TokenBucketLimiter};
    use crate::protocol::SessionContext;
    use crate::time::{ConcentratorTime, GpsTime, XTime};
    use chrono::DateTime;
    use serde_json::{json, Value};
    use std::time::Duration;
    use tokio::io::DuplexStream;

    type Gateway = Framed<DuplexStream, FrameCodec>;

    fn config() -> BridgeConfig {
        BridgeConfig {
            ping_interval: Duration::from_secs(30),
            liveness_timeout: Duration::from_secs(60),
            time_sync_interval: Duration::ZERO,
            ..BridgeConfig::default()
        }
    }

    fn bridge(config: BridgeConfig) -> ProtocolBridge {
        let server = GatewayServer::new(ServerConfig {
            allow_unauthenticated: true,
            bridge: config,
            ..ServerConfig::default()
        });
        ProtocolBridge::new(server, JsonFormatter)
    }

    fn connect(bridge: &ProtocolBridge) -> (Connection, Gateway) {
        let (server_io, gateway_io) = tokio::io::duplex(64 * 1024);
        let connection = bridge
            .accept(server_io, GatewayIdentity::new("gw", EU_863_870))
            .unwrap();
        (connection, Framed::new(gateway_io, FrameCodec::new()))
    }

    fn uplink(concentrator_time: ConcentratorTime) -> WireFrame {
        let message = json!({
            "msgtype": "updf",
            "pdu": "40010203",
            "DR": 5,
            "Freq": 868100000,
            "upinfo": { "rctx": 0, "xtime": concentrator_time },
        });
        WireFrame::Data(Bytes::from(message.to_string()))
    }

    async fn wait_unregistered(bridge: &ProtocolBridge) {
        for _ in 0..100 {
            if !bridge.server().is_connected("gw") {
                return;
            }
            sleep(Duration::from_millis(10)).await;
        }
        panic!("session still registered");
    }

    #[tokio::test(start_paused = true)]
    async fn test_liveness_timeout() {
        let bridge = bridge(config());
        let (connection, mut gateway) = connect(&bridge);

        // the gateway never answers pings
        assert!(matches!(gateway.next().await, Some(Ok(WireFrame::Ping(_)))));
        connection.closed().await;
        assert!(matches!(connection.disconnect_reason(), Some(Error::LivenessTimeout)));

        let reason = loop {
            match gateway.next().await {
                Some(Ok(WireFrame::Ping(_))) => continue,
                Some(Ok(WireFrame::Close(reason))) => break reason,
                other => panic!("expected close, got {:?}", other),
            }
        };
        assert_eq!(reason, "Liveness timeout");
        wait_unregistered(&bridge).await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_pongs_keep_connection_alive() {
        let bridge = bridge(config());
        let (connection, mut gateway) = connect(&bridge);

        for _ in 0..4 {
            match gateway.next().await {
                Some(Ok(WireFrame::Ping(body))) => gateway.send(WireFrame::Pong(body)).await.unwrap(),
                other => panic!("expected ping, got {:?}", other),
            }
        }
        assert!(!connection.is_closed());

        gateway.send(WireFrame::Close("bye".into())).await.unwrap();
        connection.closed().await;
        assert!(matches!(connection.disconnect_reason(), Some(Error::ClosedByPeer)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_answers_gateway_ping() {
        let bridge = bridge(config());
        let (_connection, mut gateway) = connect(&bridge);

        gateway.send(WireFrame::Ping(Bytes::from_static(b"7"))).await.unwrap();
        let frame = gateway.next().await;
        assert!(matches!(frame, Some(Ok(WireFrame::Pong(body))) if &body[..] == b"7"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_protocol_error_threshold() {
        let bridge = bridge(BridgeConfig {
            max_protocol_errors: 3,
            ..config()
        });
        let (connection, mut gateway) = connect(&bridge);

        for _ in 0..2 {
            gateway.send(WireFrame::Data(Bytes::from_static(b"garbage"))).await.unwrap();
        }
        gateway.send(uplink(1_000_000)).await.unwrap();
        assert!(!connection.is_closed());

        gateway.send(WireFrame::Data(Bytes::from_static(b"{}"))).await.unwrap();
        connection.closed().await;
        assert!(matches!(connection.disconnect_reason(), Some(Error::TooManyProtocolErrors(3))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_rate_limited() {
        let limiter = TokenBucketLimiter::new(TokenBucketConfig {
            capacity: 2,
            refill_per_sec: 0.0,
        });
        let server = GatewayServer::with_rate_limiter(
            ServerConfig {
                allow_unauthenticated: true,
                bridge: config(),
                ..ServerConfig::default()
            },
            Arc::new(limiter),
        );
        let bridge = ProtocolBridge::new(server, JsonFormatter);
        let (connection, mut gateway) = connect(&bridge);

        let (second, _) = tokio::io::duplex(1024);
        assert!(matches!(
            bridge.accept(second, GatewayIdentity::new("gw", EU_863_870)),
            Err(Error::AlreadyConnected(_))
        ));
        let (third, _) = tokio::io::duplex(1024);
        assert!(matches!(
            bridge.accept(third, GatewayIdentity::new("gw", EU_863_870)),
            Err(Error::RateLimited(_))
        ));

        for concentrator_time in [1_000_000, 2_000_000, 3_000_000] {
            gateway.send(uplink(concentrator_time)).await.unwrap();
        }
        connection.closed().await;
        assert!(matches!(connection.disconnect_reason(), Some(Error::RateLimited(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_time_sync_after_first_uplink() {
        let bridge = bridge(BridgeConfig {
            ping_interval: Duration::from_secs(1000),
            liveness_timeout: Duration::from_secs(2000),
            time_sync_interval: Duration::from_secs(10),
            ..BridgeConfig::default()
        });
        let (connection, mut gateway) = connect(&bridge);

        // unsynced: transfers are skipped
        let idle = tokio::time::timeout(Duration::from_secs(25), gateway.next()).await;
        assert!(idle.is_err());

        gateway.send(uplink(1_000_000)).await.unwrap();
        let frame = tokio::time::timeout(Duration::from_secs(15), gateway.next())
            .await
            .unwrap();
        let Some(Ok(WireFrame::Data(raw))) = frame else {
            panic!("expected time transfer, got {:?}", frame);
        };
        let message: Value = serde_json::from_slice(&raw).unwrap();
        assert_eq!(message["msgtype"], "timesync");
        let xtime = XTime(message["xtime"].as_i64().unwrap());
        assert_eq!(xtime.session_id(), connection.session_id());
        assert!(message["MuxTime"].as_f64().is_some());

        // the reply is a round trip sample, a stale one is ignored
        let reply = json!({
            "msgtype": "timesync",
            "txtime": message["MuxTime"],
            "xtime": xtime.0,
        });
        gateway.send(WireFrame::Data(Bytes::from(reply.to_string()))).await.unwrap();
        let stale = json!({
            "msgtype": "timesync",
            "txtime": message["MuxTime"],
            "xtime": XTime::encode(connection.session_id().next(), 5).unwrap().0,
        });
        gateway.send(WireFrame::Data(Bytes::from(stale.to_string()))).await.unwrap();
        sleep(Duration::from_millis(10)).await;
        assert!(!connection.is_closed());
    }

    #[tokio::test(start_paused = true)]
    async fn test_disconnect_sends_close() {
        let bridge = bridge(config());
        let (connection, mut gateway) = connect(&bridge);

        assert!(connection.disconnect(Error::ConnectionClosed));
        assert!(!connection.disconnect(Error::LivenessTimeout));
        let frame = gateway.next().await;
        assert!(matches!(frame, Some(Ok(WireFrame::Close(reason))) if reason == "Connection closed"));
        assert!(gateway.next().await.is_none());
        wait_unregistered(&bridge).await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_disconnect_with_stalled_gateway() {
        let bridge = bridge(config());
        let (server_io, gateway_io) = tokio::io::duplex(64);
        let connection = bridge
            .accept(server_io, GatewayIdentity::new("gw", EU_863_870))
            .unwrap();
        let mut gateway = Framed::new(gateway_io, FrameCodec::new());

        // the gateway keeps sending but never reads, so the pongs back up
        for seq in 0..200u64 {
            gateway
                .send(WireFrame::Ping(Bytes::copy_from_slice(&seq.to_be_bytes())))
                .await
                .unwrap();
        }
        assert!(!connection.is_closed());

        assert!(connection.disconnect(Error::ConnectionClosed));
        wait_unregistered(&bridge).await;

        let (server_io, _gateway_io) = tokio::io::duplex(1024);
        assert!(bridge
            .accept(server_io, GatewayIdentity::new("gw", EU_863_870))
            .is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_liveness_with_stalled_gateway() {
        let bridge = bridge(config());
        let (server_io, gateway_io) = tokio::io::duplex(64);
        let connection = bridge
            .accept(server_io, GatewayIdentity::new("gw", EU_863_870))
            .unwrap();
        let mut gateway = Framed::new(gateway_io, FrameCodec::new());

        for seq in 0..50u64 {
            gateway
                .send(WireFrame::Ping(Bytes::copy_from_slice(&seq.to_be_bytes())))
                .await
                .unwrap();
        }
        // silent from here on: the liveness deadline still fires
        connection.closed().await;
        assert!(matches!(connection.disconnect_reason(), Some(Error::LivenessTimeout)));
        wait_unregistered(&bridge).await;
        drop(gateway);
    }

    struct PanickingFormatter;

    impl Formatter for PanickingFormatter {
        fn decode_uplink(&self, _raw: &[u8], _now: DateTime<Utc>, _ctx: &SessionContext) -> Result<Upstream> {
            panic!("decoder bug")
        }

        fn encode_downlink(
            &self,
            _downlink: &crate::protocol::WireDownlink,
            _now: DateTime<Utc>,
            _ctx: &SessionContext,
        ) -> Result<Bytes> {
            Ok(Bytes::new())
        }

        fn compute_time_sync_reply(
            &self,
            _now: DateTime<Utc>,
            _gps: Option<GpsTime>,
            _concentrator: Option<ConcentratorTime>,
            _ctx: &SessionContext,
        ) -> Result<Option<Bytes>> {
            Ok(None)
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_event_loop_panic() {
        let server = GatewayServer::new(ServerConfig {
            allow_unauthenticated: true,
            bridge: config(),
            ..ServerConfig::default()
        });
        let bridge = ProtocolBridge::new(server.clone(), PanickingFormatter);
        let (server_io, gateway_io) = tokio::io::duplex(1024);
        let connection = bridge
            .accept(server_io, GatewayIdentity::new("gw", EU_863_870))
            .unwrap();
        let mut gateway = Framed::new(gateway_io, FrameCodec::new());

        gateway.send(uplink(1)).await.unwrap();
        connection.closed().await;
        assert!(
            matches!(connection.disconnect_reason(), Some(Error::EventLoopPanic(message)) if message == "decoder bug")
        );
        assert!(!server.is_connected("gw"));
    }
}
