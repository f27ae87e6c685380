use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, OnceLock};
use std::task::{Context, Poll};

use bytes::Bytes;
use chrono::{DateTime, Utc};
use futures::Stream;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::Registration;
use crate::band::Band;
use crate::core::{Error, GatewayIdentity, Result, SessionId};
use crate::protocol::{ClockSyncReply, Formatter, SessionContext, UplinkEvent, UplinkMessage, WireDownlink};
use crate::scheduling::{DownlinkRequest, Scheduler, Slot};
use crate::time::{ClockModel, SyncOutcome};

/// A downlink request travelling to the session task
#[derive(Debug)]
pub(crate) struct DownlinkCommand {
    pub request: DownlinkRequest,
    pub reply: oneshot::Sender<Result<ScheduledDownlink>>,
}

/// A downlink that was committed to a slot
#[derive(Debug)]
pub struct ScheduledDownlink {
    pub diid: u64,
    pub slot: Slot,
    outcome: oneshot::Receiver<Result<()>>,
}

impl ScheduledDownlink {
    pub(crate) fn new(diid: u64, slot: Slot, outcome: oneshot::Receiver<Result<()>>) -> Self {
        ScheduledDownlink { diid, slot, outcome }
    }

    /// Waits until the downlink was handed to the transport
    pub async fn transmitted(self) -> Result<()> {
        self.outcome.await.unwrap_or(Err(Error::ConnectionClosed))
    }
}

#[derive(Debug)]
struct Shared {
    gateway_id: String,
    session_id: SessionId,
    band: &'static Band,
    requests: mpsc::Sender<DownlinkCommand>,
    uplinks: Mutex<Option<mpsc::Receiver<UplinkEvent>>>,
    cancel: CancellationToken,
    reason: OnceLock<Error>,
    dropped_uplinks: AtomicU64,
}

/// Handle to a connected gateway, held by the network server
///
/// Cloning is cheap; every clone refers to the same session.
#[derive(Debug, Clone)]
pub struct Connection {
    shared: Arc<Shared>,
}

impl Connection {
    pub fn gateway_id(&self) -> &str {
        &self.shared.gateway_id
    }

    pub fn session_id(&self) -> SessionId {
        self.shared.session_id
    }

    pub fn band(&self) -> &'static Band {
        self.shared.band
    }

    /// Takes the stream of uplinks received from the gateway
    ///
    /// The stream can be taken once; later calls return `None`.
    pub fn uplinks(&self) -> Option<UplinkStream> {
        self.shared
            .uplinks
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take()
            .map(|rx| UplinkStream { rx })
    }

    /// Schedules a downlink through this gateway
    ///
    /// Resolves with the committed slot or the scheduling rejection; the
    /// returned [`ScheduledDownlink`] then reports whether it was written.
    pub async fn submit_downlink(&self, request: DownlinkRequest) -> Result<ScheduledDownlink> {
        if self.is_closed() {
            return Err(Error::ConnectionClosed);
        }
        let (reply, rx) = oneshot::channel();
        self.shared
            .requests
            .send(DownlinkCommand { request, reply })
            .await
            .map_err(|_| Error::ConnectionClosed)?;
        rx.await.unwrap_or(Err(Error::ConnectionClosed))
    }

    /// Terminates the session
    ///
    /// Returns `true` for the call that closed the connection and `false`
    /// when it was already closed; the first reason is kept.
    pub fn disconnect(&self, reason: Error) -> bool {
        let first = self.shared.reason.set(reason).is_ok();
        if first {
            if let Some(reason) = self.shared.reason.get() {
                info!(
                    gateway_id = %self.shared.gateway_id,
                    session_id = %self.shared.session_id,
                    reason = %reason,
                    "Gateway disconnected"
                );
            }
            self.shared.cancel.cancel();
        }
        first
    }

    /// Waits until the connection is closed
    pub async fn closed(&self) {
        self.shared.cancel.cancelled().await
    }

    pub fn is_closed(&self) -> bool {
        self.shared.cancel.is_cancelled()
    }

    pub fn disconnect_reason(&self) -> Option<Error> {
        self.shared.reason.get().cloned()
    }

    /// Number of uplinks dropped because the uplink stream was full or gone
    pub fn dropped_uplinks(&self) -> u64 {
        self.shared.dropped_uplinks.load(Ordering::Relaxed)
    }

    pub(crate) fn cancellation(&self) -> &CancellationToken {
        &self.shared.cancel
    }
}

/// Uplinks of one connection
#[derive(Debug)]
pub struct UplinkStream {
    rx: mpsc::Receiver<UplinkEvent>,
}

impl Stream for UplinkStream {
    type Item = UplinkEvent;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.rx.poll_recv(cx)
    }
}

/// Per-connection state owned by the task driving the gateway
#[derive(Debug)]
pub struct Session {
    connection: Connection,
    ctx: SessionContext,
    clock: ClockModel,
    scheduler: Scheduler,
    requests: mpsc::Receiver<DownlinkCommand>,
    uplinks: mpsc::Sender<UplinkEvent>,
    next_diid: u64,
    _registration: Registration,
}

impl Session {
    pub(crate) fn open(
        identity: &GatewayIdentity,
        session_id: SessionId,
        band: &'static Band,
        config: &crate::core::ServerConfig,
        registration: Registration,
    ) -> (Connection, Session) {
        let (requests_tx, requests_rx) = mpsc::channel(config.bridge.request_capacity.max(1));
        let (uplinks_tx, uplinks_rx) = mpsc::channel(config.bridge.uplink_capacity.max(1));

        let connection = Connection {
            shared: Arc::new(Shared {
                gateway_id: identity.gateway_id.clone(),
                session_id,
                band,
                requests: requests_tx,
                uplinks: Mutex::new(Some(uplinks_rx)),
                cancel: CancellationToken::new(),
                reason: OnceLock::new(),
                dropped_uplinks: AtomicU64::new(0),
            }),
        };
        let session = Session {
            connection: connection.clone(),
            ctx: SessionContext::new(session_id, band),
            clock: ClockModel::new(session_id, config.clock.clone()),
            scheduler: Scheduler::new(config.scheduler.clone()),
            requests: requests_rx,
            uplinks: uplinks_tx,
            next_diid: 1,
            _registration: registration,
        };
        (connection, session)
    }

    pub fn connection(&self) -> &Connection {
        &self.connection
    }

    pub fn context(&self) -> &SessionContext {
        &self.ctx
    }

    pub fn clock(&self) -> &ClockModel {
        &self.clock
    }

    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    pub(crate) async fn next_request(&mut self) -> Option<DownlinkCommand> {
        self.requests.recv().await
    }

    /// Syncs the clock from an uplink and forwards it to the network server
    pub fn handle_uplink(&mut self, message: UplinkMessage) {
        let outcome = self.clock.sync_from_uplink(message.concentrator_time, message.received_at);
        self.after_sync(outcome);
        if let Some(gps) = message.gps_time {
            self.clock.sync_gps(message.concentrator_time, gps);
        }

        let event = UplinkEvent {
            gateway_id: self.connection.gateway_id().to_string(),
            session_id: self.ctx.session_id,
            message,
        };
        let dropped = &self.connection.shared.dropped_uplinks;
        match self.uplinks.try_send(event) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(event)) => {
                let total = dropped.fetch_add(1, Ordering::Relaxed) + 1;
                warn!(
                    gateway_id = %event.gateway_id,
                    concentrator_time = event.message.concentrator_time,
                    dropped = total,
                    "Uplink consumer lagging, dropping uplink"
                );
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                let total = dropped.fetch_add(1, Ordering::Relaxed) + 1;
                debug!(dropped = total, "Uplink consumer gone, dropping uplink");
            }
        }
    }

    /// Applies a time transfer reply as a round-trip sample
    ///
    /// Replies to transfers of an earlier session are ignored.
    pub fn handle_clock_sync(&mut self, reply: ClockSyncReply, received_at: DateTime<Utc>) -> Option<SyncOutcome> {
        let Some(concentrator_time) = self.clock.current_session_time(reply.xtime) else {
            warn!(
                session_id = %self.ctx.session_id,
                xtime = %reply.xtime,
                "Ignoring time sync reply of another session"
            );
            return None;
        };
        let outcome = self
            .clock
            .sync_round_trip(concentrator_time, reply.sent_at, received_at)?;
        self.after_sync(outcome);
        if let Some(gps) = reply.gps_time {
            self.clock.sync_gps(concentrator_time, gps);
        }
        Some(outcome)
    }

    fn after_sync(&mut self, outcome: SyncOutcome) {
        if outcome == SyncOutcome::Rollover {
            info!(session_id = %self.ctx.session_id, "Concentrator time rolled over, clearing schedule");
            self.scheduler.reset();
        }
    }

    /// Commits a downlink and describes it for the formatter
    pub fn schedule(&mut self, request: &DownlinkRequest, now: DateTime<Utc>) -> Result<(Slot, WireDownlink)> {
        let slot = self.scheduler.schedule(request, self.ctx.band, &self.clock, now)?;
        let xtime = self.clock.encode_xtime(slot.concentrator_time)?;
        let diid = self.next_diid;
        self.next_diid += 1;
        let downlink = WireDownlink::new(diid, request, &slot, xtime);
        Ok((slot, downlink))
    }

    /// Builds the periodic time transfer, or `None` while the clock is not synchronized
    pub fn time_sync_reply(&self, formatter: &dyn Formatter, now: DateTime<Utc>) -> Result<Option<Bytes>> {
        if !self.clock.is_synced() {
            return Ok(None);
        }
        let concentrator_time = self.clock.from_wall_clock(now)?;
        let gps = self.clock.to_gps(concentrator_time).ok();
        formatter.compute_time_sync_reply(now, gps, Some(concentrator_time), &self.ctx)
    }

    /// Ends the session, failing downlink requests still queued
    pub fn release(mut self) {
        self.requests.close();
        let mut failed = 0;
        while let Ok(command) = self.requests.try_recv() {
            let _ = command.reply.send(Err(Error::ConnectionClosed));
            failed += 1;
        }
        debug!(session_id = %self.ctx.session_id, failed, "Session released");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::band::EU_863_870;
    use crate::core::{DeviceIds, GatewayIdentity, ServerConfig};
    use crate::network::GatewayServer;
    use crate::protocol::JsonFormatter;
    use crate::scheduling::Window;
    use crate::time::XTime;
    use chrono::TimeZone;
    use futures::StreamExt;

    fn server() -> GatewayServer {
        GatewayServer::new(ServerConfig {
            allow_unauthenticated: true,
            ..ServerConfig::default()
        })
    }

    fn w0() -> DateTime<Utc> {
        Utc.timestamp_opt(1_554_300_787, 0).unwrap()
    }

    fn uplink(concentrator_time: i64, received_at: DateTime<Utc>) -> UplinkMessage {
        UplinkMessage {
            payload: Bytes::from_static(&[0x40, 1, 2, 3]),
            frequency: 868_100_000,
            data_rate_index: 5,
            channel_index: Some(0),
            antenna: 0,
            concentrator_time,
            gps_time: None,
            rssi: -50.0,
            snr: 7.0,
            received_at,
        }
    }

    #[tokio::test]
    async fn test_uplink_forwarded_and_synced() {
        let (connection, mut session) = server().connect(GatewayIdentity::new("gw", EU_863_870)).unwrap();
        let mut uplinks = connection.uplinks().unwrap();
        assert!(connection.uplinks().is_none());

        let w0 = w0();
        session.handle_uplink(uplink(5_000_000, w0));
        assert!(session.clock().is_synced());

        let event = uplinks.next().await.unwrap();
        assert_eq!(event.gateway_id, "gw");
        assert_eq!(event.session_id, connection.session_id());
        assert_eq!(event.token().concentrator_time, 5_000_000);
    }

    #[tokio::test]
    async fn test_schedule_class_a() {
        let (connection, mut session) = server().connect(GatewayIdentity::new("gw", EU_863_870)).unwrap();
        let w0 = w0();
        let up = uplink(5_000_000, w0);
        let request = DownlinkRequest::class_a(DeviceIds::new("dev"), vec![0x60; 12], up.token());
        session.handle_uplink(up);

        let (slot, downlink) = session.schedule(&request, w0).unwrap();
        assert_eq!(slot.window, Window::Rx1);
        assert_eq!(slot.transmit_at, w0 + chrono::Duration::seconds(1));
        assert_eq!(downlink.rx_delay, Some(1));
        assert_eq!(downlink.xtime.session_id(), connection.session_id());
        assert_eq!(downlink.xtime.concentrator_time(), 6_000_000);

        let (_, second) = session.schedule(&request.clone().with_antenna(1), w0).unwrap();
        assert_eq!(second.diid, downlink.diid + 1);
    }

    #[tokio::test]
    async fn test_rollover_resets_schedule() {
        let (_connection, mut session) = server().connect(GatewayIdentity::new("gw", EU_863_870)).unwrap();
        let w0 = w0();
        let up = uplink(5_000_000, w0);
        let request = DownlinkRequest::class_a(DeviceIds::new("dev"), vec![0x60; 12], up.token());
        session.handle_uplink(up);
        session.schedule(&request, w0).unwrap();

        // counter restarted: epoch and occupancy are reset
        session.handle_uplink(uplink(1_000, w0 + chrono::Duration::seconds(2)));
        assert_eq!(session.clock().stats().rollovers, 1);
        assert_eq!(
            session.clock().to_wall_clock(1_000).unwrap(),
            w0 + chrono::Duration::seconds(2)
        );
        assert_eq!(session.scheduler().duty_cycle().usage(
            session.context().band.sub_band_for(868_100_000).unwrap(),
            6_000_000,
        ), 0);
    }

    #[tokio::test]
    async fn test_clock_sync_reply() {
        let (connection, mut session) = server().connect(GatewayIdentity::new("gw", EU_863_870)).unwrap();
        let sent_at = Utc.timestamp_opt(1_700_000_000, 0).unwrap();
        let received_at = sent_at + chrono::Duration::milliseconds(100);

        let stale = ClockSyncReply {
            xtime: XTime::encode(connection.session_id().next(), 1_000_000).unwrap(),
            sent_at,
            gps_time: None,
        };
        assert_eq!(session.handle_clock_sync(stale, received_at), None);
        assert!(!session.clock().is_synced());

        let reply = ClockSyncReply {
            xtime: XTime::encode(connection.session_id(), 1_000_000).unwrap(),
            sent_at,
            gps_time: None,
        };
        assert_eq!(session.handle_clock_sync(reply, received_at), Some(SyncOutcome::Anchored));
        assert_eq!(
            session.clock().to_wall_clock(1_000_000).unwrap(),
            sent_at + chrono::Duration::milliseconds(50)
        );
    }

    #[tokio::test]
    async fn test_time_sync_suppressed_while_unsynced() {
        let (_connection, mut session) = server().connect(GatewayIdentity::new("gw", EU_863_870)).unwrap();
        let now = w0();
        assert_eq!(session.time_sync_reply(&JsonFormatter, now).unwrap(), None);

        session.handle_uplink(uplink(5_000_000, now));
        assert!(session.time_sync_reply(&JsonFormatter, now).unwrap().is_some());
    }

    #[tokio::test]
    async fn test_release_fails_queued_requests() {
        let (connection, session) = server().connect(GatewayIdentity::new("gw", EU_863_870)).unwrap();
        let token = uplink(5_000_000, w0()).token();
        let pending = {
            let connection = connection.clone();
            tokio::spawn(async move {
                connection
                    .submit_downlink(DownlinkRequest::class_a(DeviceIds::new("dev"), vec![1], token))
                    .await
            })
        };
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        session.release();

        assert!(matches!(pending.await.unwrap(), Err(Error::ConnectionClosed)));
    }

    #[tokio::test]
    async fn test_disconnect_is_idempotent() {
        let (connection, _session) = server().connect(GatewayIdentity::new("gw", EU_863_870)).unwrap();
        assert!(connection.disconnect(Error::LivenessTimeout));
        assert!(!connection.disconnect(Error::ClosedByPeer));
        assert!(connection.is_closed());
        connection.closed().await;
        assert!(matches!(connection.disconnect_reason(), Some(Error::LivenessTimeout)));

        let token = uplink(0, w0()).token();
        let result = connection
            .submit_downlink(DownlinkRequest::class_a(DeviceIds::new("dev"), vec![1], token))
            .await;
        assert!(matches!(result, Err(Error::ConnectionClosed)));
    }

    #[tokio::test]
    async fn test_lagging_consumer_counts_dropped_uplinks() {
        let mut config = ServerConfig {
            allow_unauthenticated: true,
            ..ServerConfig::default()
        };
        config.bridge.uplink_capacity = 2;
        let (connection, mut session) = GatewayServer::new(config)
            .connect(GatewayIdentity::new("gw", EU_863_870))
            .unwrap();
        let mut uplinks = connection.uplinks().unwrap();

        for concentrator_time in [1_000_000, 2_000_000, 3_000_000, 4_000_000] {
            session.handle_uplink(uplink(concentrator_time, w0()));
        }
        assert_eq!(connection.dropped_uplinks(), 2);

        // the oldest uplinks were kept
        assert_eq!(uplinks.next().await.unwrap().message.concentrator_time, 1_000_000);
        assert_eq!(uplinks.next().await.unwrap().message.concentrator_time, 2_000_000);

        drop(uplinks);
        session.handle_uplink(uplink(5_000_000, w0()));
        assert_eq!(connection.dropped_uplinks(), 3);
    }
}
