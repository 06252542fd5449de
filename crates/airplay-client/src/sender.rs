//! The RAOP sender reactor.
//!
//! One task owns every session, the packetizer, the retransmission ring
//! and both UDP services. Everything else (connection tasks, UDP receive
//! loops, [`SenderHandle`]s) talks to it through a single event channel,
//! so no state here is ever shared or locked.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::io;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;

use airplay_audio::{build_retransmit_response, Packetizer, RetransmitRequest, RetransmitRing, SyncPacket};
use airplay_core::error::{Error, Result, RtspError, StreamingError};
use airplay_core::{AudioFormat, Device, SenderConfig};
use airplay_crypto::StreamKeys;
use airplay_rtsp::{
    ConnectionEvent, ConnectionHandle, Outgoing, RaopSession, RequestKind, RtspConnection,
    RtspRequest, SessionParams, SessionState, StartMode, Transition,
};
use airplay_timing::{
    now_unix_ns, unix_to_ntp, Datagram, NtpTimestamp, PlaybackClock, ServiceKind, TimingRequest,
    TimingResponse, UdpService,
};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

use crate::events::{SessionId, StatusEvent, StatusSink};
use crate::handle::{Command, SenderHandle};
use crate::metadata::{MetadataItem, MetadataQueue};
use crate::session::{PendingStart, Session, StatusReply};
use crate::stats::StreamStats;
use crate::volume;

/// Default logical volume for probes and unspecified starts.
pub const DEFAULT_VOLUME: i32 = 50;

/// Everything the reactor reacts to.
pub(crate) enum Event {
    Command(Command),
    /// TCP connect for a pending start finished.
    Connected {
        session: SessionId,
        result: Result<RtspConnection>,
    },
    Connection {
        session: SessionId,
        event: ConnectionEvent,
    },
    /// A connection close, re-posted so it runs one turn later.
    Closed(SessionId),
    Datagram(Datagram),
    ShutdownDeadline,
}

/// The sender. Build with [`RaopSender::bind`], then drive with
/// [`RaopSender::run`].
pub struct RaopSender {
    config: SenderConfig,
    format: AudioFormat,
    keys: StreamKeys,
    client_instance: u64,
    status: Arc<dyn StatusSink>,
    stats: Arc<StreamStats>,

    events_tx: mpsc::UnboundedSender<Event>,
    events_rx: mpsc::UnboundedReceiver<Event>,
    timing: UdpService,
    control: UdpService,

    next_id: u64,
    pending: HashMap<SessionId, PendingStart>,
    sessions: BTreeMap<SessionId, Session>,

    ring: RetransmitRing,
    packetizer: Packetizer,
    metadata: MetadataQueue,
    streaming: bool,
    clock: Option<PlaybackClock>,
    next_rtptime: u32,
    since_sync: u32,

    flush_pending: HashSet<SessionId>,
    flush_waiters: Vec<oneshot::Sender<Result<()>>>,
    shutting_down: bool,
    shutdown_waiters: Vec<oneshot::Sender<Result<()>>>,
    running: bool,
}

impl RaopSender {
    /// Generate the stream key and bind the timing and control services.
    pub async fn bind(config: SenderConfig, status: Arc<dyn StatusSink>) -> Result<Self> {
        config.validate()?;
        let (events_tx, events_rx) = mpsc::unbounded_channel();

        let timing = UdpService::bind(
            ServiceKind::Timing,
            config.timing_port,
            forward_datagrams(events_tx.clone()),
        )
        .await?;
        let control = UdpService::bind(
            ServiceKind::Control,
            config.control_port,
            forward_datagrams(events_tx.clone()),
        )
        .await?;

        let keys = StreamKeys::generate();
        if let Err(e) = keys.wrapped_key_base64() {
            warn!("Stream key wrap failed, encrypted receivers will not start: {}", e);
        }
        let client_instance = config.client_instance_id().unwrap_or_else(rand::random);
        let packetizer = Packetizer::new(Box::new(keys.cipher()));

        info!(
            "RAOP sender ready (timing port {}, control port {}, DACP-ID {:016X})",
            timing.port(),
            control.port(),
            client_instance
        );

        Ok(Self {
            config,
            format: AudioFormat::default(),
            keys,
            client_instance,
            status,
            stats: StreamStats::new(),
            events_tx,
            events_rx,
            timing,
            control,
            next_id: 1,
            pending: HashMap::new(),
            sessions: BTreeMap::new(),
            ring: RetransmitRing::new(),
            packetizer,
            metadata: MetadataQueue::new(),
            streaming: false,
            clock: None,
            next_rtptime: 0,
            since_sync: 0,
            flush_pending: HashSet::new(),
            flush_waiters: Vec::new(),
            shutting_down: false,
            shutdown_waiters: Vec::new(),
            running: true,
        })
    }

    /// Bind and spawn the reactor on the current runtime.
    pub async fn spawn(
        config: SenderConfig,
        status: Arc<dyn StatusSink>,
    ) -> Result<(SenderHandle, JoinHandle<()>)> {
        let sender = Self::bind(config, status).await?;
        let handle = sender.handle();
        Ok((handle, tokio::spawn(sender.run())))
    }

    pub fn handle(&self) -> SenderHandle {
        SenderHandle::new(self.events_tx.clone(), self.stats.clone())
    }

    pub fn timing_port(&self) -> u16 {
        self.timing.port()
    }

    pub fn control_port(&self) -> u16 {
        self.control.port()
    }

    /// Process events until shutdown completes.
    pub async fn run(mut self) {
        while self.running {
            let Some(event) = self.events_rx.recv().await else {
                break;
            };
            self.handle_event(event);
        }

        self.timing.stop().await;
        self.control.stop().await;
        info!("RAOP sender stopped");
        for waiter in self.shutdown_waiters.drain(..) {
            let _ = waiter.send(Ok(()));
        }
    }

    fn handle_event(&mut self, event: Event) {
        match event {
            Event::Command(command) => self.handle_command(command),
            Event::Connected { session, result } => self.on_connected(session, result),
            Event::Connection {
                session,
                event: ConnectionEvent::Response { cseq, result },
            } => {
                let Some(s) = self.sessions.get_mut(&session) else {
                    debug!("Response cseq {} for departed session {}", cseq, session);
                    return;
                };
                let transition = s.machine.handle_response(cseq, result);
                self.apply(session, transition);
            }
            Event::Connection {
                session,
                event: ConnectionEvent::Closed,
            } => {
                // Not from inside the connection's own callback
                let _ = self.events_tx.send(Event::Closed(session));
            }
            Event::Closed(session) => {
                if let Some(s) = self.sessions.get_mut(&session) {
                    debug!("{} {}: connection closed by receiver", s.device.name, session);
                    let transition = s.machine.connection_closed();
                    self.apply(session, transition);
                }
            }
            Event::Datagram(datagram) => match datagram.kind {
                ServiceKind::Timing => self.on_timing(datagram),
                ServiceKind::Control => self.on_control(datagram),
            },
            Event::ShutdownDeadline => self.force_stop(),
        }
    }

    fn handle_command(&mut self, command: Command) {
        match command {
            Command::Probe { device, reply } => {
                self.begin(device, StartMode::Probe, DEFAULT_VOLUME, 0, reply)
            }
            Command::Start {
                device,
                volume,
                start_rtptime,
                reply,
            } => self.begin(device, StartMode::Start, volume, start_rtptime, reply),
            Command::Stop { session, reply } => self.stop(session, reply),
            Command::Flush { rtptime, reply } => self.flush(rtptime, reply),
            Command::SetVolume {
                session,
                volume,
                reply,
            } => {
                let _ = reply.send(self.set_volume(session, volume));
            }
            Command::SetVolumeAll { volume } => {
                let ids: Vec<_> = self.live_sessions().collect();
                for id in ids {
                    if let Err(e) = self.set_volume(id, volume) {
                        debug!("Volume for {} skipped: {}", id, e);
                    }
                }
            }
            Command::WriteAudio { pcm, rtptime } => self.write_audio(&pcm, rtptime),
            Command::SendMetadata {
                item,
                current,
                startup,
            } => self.send_metadata(item, current, startup),
            Command::PlaybackStart {
                next_rtptime,
                start_wall_ns,
            } => self.playback_start(next_rtptime, start_wall_ns),
            Command::PlaybackStop => self.playback_stop(),
            Command::Sessions { reply } => {
                let _ = reply.send(self.sessions.values().map(Session::status).collect());
            }
            Command::Shutdown { reply } => self.shutdown(reply),
        }
    }

    // Session lifecycle

    fn begin(&mut self, device: Device, mode: StartMode, volume: i32, start_rtptime: u32, reply: StatusReply) {
        if self.shutting_down {
            let _ = reply.send(Err(Error::SenderClosed));
            return;
        }
        let device = match self.config.device(&device.name) {
            Some(overrides) => device.with_config(overrides),
            None => device,
        };
        let Some(remote) = device.socket_addr() else {
            let _ = reply.send(Err(Error::Config(format!("device {} has no address", device.name))));
            return;
        };

        let id = SessionId(self.next_id);
        self.next_id += 1;
        info!("{} {}: connecting to {} ({:?})", device.name, id, remote, mode);

        self.pending.insert(
            id,
            PendingStart {
                device,
                remote,
                mode,
                volume,
                start_rtptime,
                reply,
            },
        );

        let tx = self.events_tx.clone();
        tokio::spawn(async move {
            let mut connection = RtspConnection::new(remote);
            let result = connection.connect().await.map(|()| connection);
            let _ = tx.send(Event::Connected { session: id, result });
        });
    }

    fn on_connected(&mut self, id: SessionId, result: Result<RtspConnection>) {
        let Some(pending) = self.pending.remove(&id) else {
            debug!("Connect for cancelled session {} finished", id);
            return;
        };

        let connection = match result {
            Ok(connection) => connection,
            Err(e) => {
                warn!("{} {}: connect to {} failed: {}", pending.device.name, id, pending.remote, e);
                self.reject_pending(id, pending, SessionState::Failed);
                return;
            }
        };
        let Some(local) = connection.local_addr() else {
            warn!("{} {}: connection has no local address", pending.device.name, id);
            self.reject_pending(id, pending, SessionState::Failed);
            return;
        };

        let params = self.session_params(&pending, local.ip());
        let max_volume = pending
            .device
            .max_volume
            .or_else(|| self.config.max_volume_for(&pending.device.name));
        let mut machine = RaopSession::new(params);
        let first = match machine.start(pending.mode) {
            Ok(outgoing) => outgoing,
            Err(e) => {
                warn!("{} {}: cannot start: {}", pending.device.name, id, e);
                self.reject_pending(id, pending, SessionState::Failed);
                return;
            }
        };

        let tx = self.events_tx.clone();
        let handle = ConnectionHandle::spawn(connection, move |event| {
            let _ = tx.send(Event::Connection { session: id, event });
        });

        self.sessions.insert(
            id,
            Session {
                id,
                device: pending.device,
                machine,
                connection: Some(handle),
                audio: None,
                volume: pending.volume.clamp(0, volume::MAX_LOGICAL_VOLUME),
                max_volume,
                waiter: Some(pending.reply),
                stop_waiters: Vec::new(),
            },
        );
        self.send(id, first);
    }

    fn session_params(&self, pending: &PendingStart, local_ip: IpAddr) -> SessionParams {
        let device = &pending.device;
        let (aes_key, aes_iv) = if device.encrypt {
            (
                self.keys.wrapped_key_base64().ok().map(str::to_string),
                Some(self.keys.iv_base64()),
            )
        } else {
            (None, None)
        };
        let max_volume = device
            .max_volume
            .or_else(|| self.config.max_volume_for(&device.name));

        SessionParams {
            name: device.name.clone(),
            local_ip,
            remote_ip: pending.remote.ip(),
            url_id: rand::random(),
            encrypt: device.encrypt,
            legacy_auth: device.legacy_auth,
            password: device
                .password
                .clone()
                .or_else(|| self.config.password_for(&device.name).map(str::to_string)),
            control_port: self.control.port(),
            timing_port: self.timing.port(),
            start_seq: self.packetizer.next_seq(),
            start_rtptime: pending.start_rtptime,
            startup_volume: volume::attenuation(pending.volume, max_volume),
            aes_key,
            aes_iv,
            apple_challenge: true,
            user_agent: self.config.user_agent.clone(),
            client_instance: self.client_instance,
            audio_format: self.format,
        }
    }

    /// A start that never got a session: report and answer the caller.
    fn reject_pending(&mut self, id: SessionId, pending: PendingStart, state: SessionState) {
        StreamStats::bump(&self.stats.session_failures);
        let event = StatusEvent {
            device: pending.device.id,
            name: pending.device.name,
            session: id,
            state,
        };
        let _ = pending.reply.send(Ok(event.clone()));
        self.status.on_status(event);
    }

    /// Put a request on the wire. A dead connection task fails the
    /// session the same way a failed exchange would.
    fn send(&mut self, id: SessionId, outgoing: Outgoing) {
        let Some(s) = self.sessions.get_mut(&id) else {
            return;
        };
        trace!("{} {}: {:?} cseq {}", s.device.name, id, outgoing.kind, outgoing.cseq);
        let cseq = outgoing.cseq;
        if let Err(e) = s.submit(outgoing) {
            let transition = s.machine.handle_response(cseq, Err(e));
            self.apply(id, transition);
        }
    }

    /// Queue a follow-up request on a live session.
    fn enqueue(&mut self, id: SessionId, kind: RequestKind, request: RtspRequest) -> Result<()> {
        let s = self.sessions.get_mut(&id).ok_or(RtspError::NoSession)?;
        if let Some(outgoing) = s.machine.submit(kind, request)? {
            self.send(id, outgoing);
        }
        Ok(())
    }

    /// Carry out what the state machine decided.
    fn apply(&mut self, id: SessionId, transition: Transition) {
        match transition {
            Transition::Send(outgoing) => self.send(id, outgoing),
            Transition::Ready => self.on_ready(id),
            Transition::Completed(RequestKind::Flush) => self.flush_acked(id),
            Transition::Completed(_) | Transition::Ignored => {}
            Transition::Probed | Transition::Stopped | Transition::Password => {
                self.report(id);
                self.remove_session(id);
            }
            Transition::Failed { teardown, reason } => {
                StreamStats::bump(&self.stats.session_failures);
                if let Some(s) = self.sessions.get(&id) {
                    warn!("{} {}: failed: {}", s.device.name, id, reason);
                }
                self.report(id);
                if let Some(mut session) = self.remove_session(id) {
                    if let (Some(teardown), Some(connection)) = (teardown, session.connection.take()) {
                        connection.finish(teardown.cseq, teardown.request);
                    }
                }
            }
        }
        self.release_queued(id);
    }

    fn release_queued(&mut self, id: SessionId) {
        let next = self
            .sessions
            .get_mut(&id)
            .and_then(|s| s.machine.next_queued());
        if let Some(outgoing) = next {
            self.send(id, outgoing);
        }
    }

    /// Handshake done: open the audio socket, catch up on metadata and
    /// tell the caller.
    fn on_ready(&mut self, id: SessionId) {
        let position = self.play_position();
        let streaming = self.streaming;
        let Some(s) = self.sessions.get_mut(&id) else {
            return;
        };

        if let Err(e) = s.open_audio() {
            let transition = s.machine.abort(e.into());
            self.apply(id, transition);
            return;
        }
        s.machine.set_streaming(streaming);

        let mut catch_up = Vec::new();
        if s.device.wants_metadata {
            let url = s.machine.url();
            for item in self.metadata.pending(position) {
                catch_up.extend(item.requests(&url, position, true));
            }
        }

        self.report(id);
        for (kind, request) in catch_up {
            if let Err(e) = self.enqueue(id, kind, request) {
                debug!("Session {}: metadata catch-up stopped: {}", id, e);
                break;
            }
        }
    }

    /// Publish the session's current state and answer a waiting caller.
    fn report(&mut self, id: SessionId) {
        let Some(s) = self.sessions.get_mut(&id) else {
            return;
        };
        let event = s.status();
        info!("{} {}: {}", event.name, id, event.state);
        if let Some(waiter) = s.waiter.take() {
            let _ = waiter.send(Ok(event.clone()));
        }
        self.status.on_status(event);
    }

    /// Drop a session and everything that waits on it.
    fn remove_session(&mut self, id: SessionId) -> Option<Session> {
        let mut session = self.sessions.remove(&id)?;
        for waiter in session.stop_waiters.drain(..) {
            let _ = waiter.send(Ok(()));
        }
        if let Some(waiter) = session.waiter.take() {
            let _ = waiter.send(Ok(session.status()));
        }

        if self.flush_pending.remove(&id) {
            self.maybe_finish_flush();
        }
        if self.sessions.is_empty() {
            debug!("No sessions left, releasing {} retained packets", self.ring.len());
            self.ring.clear();
        }
        if self.shutting_down && self.sessions.is_empty() {
            self.running = false;
        }
        Some(session)
    }

    fn stop(&mut self, id: SessionId, reply: oneshot::Sender<Result<()>>) {
        if let Some(pending) = self.pending.remove(&id) {
            info!("{} {}: stopped before connecting", pending.device.name, id);
            let event = StatusEvent {
                device: pending.device.id,
                name: pending.device.name,
                session: id,
                state: SessionState::Stopped,
            };
            let _ = pending.reply.send(Ok(event.clone()));
            self.status.on_status(event);
            let _ = reply.send(Ok(()));
            return;
        }
        let Some(s) = self.sessions.get_mut(&id) else {
            let _ = reply.send(Err(RtspError::NoSession.into()));
            return;
        };
        s.stop_waiters.push(reply);
        let transition = s.machine.stop();
        self.apply(id, transition);
    }

    fn shutdown(&mut self, reply: oneshot::Sender<Result<()>>) {
        self.shutdown_waiters.push(reply);
        if self.shutting_down {
            return;
        }
        self.shutting_down = true;
        info!("Shutting down {} session(s)", self.sessions.len());

        // Dropping the replies tells those callers the sender is gone
        self.pending.clear();

        if self.sessions.is_empty() {
            self.running = false;
            return;
        }

        let ids: Vec<_> = self.sessions.keys().copied().collect();
        for id in ids {
            if let Some(s) = self.sessions.get_mut(&id) {
                let transition = s.machine.stop();
                self.apply(id, transition);
            }
        }

        if self.running {
            let tx = self.events_tx.clone();
            let timeout = Duration::from_secs(self.config.stop_timeout_secs);
            tokio::spawn(async move {
                tokio::time::sleep(timeout).await;
                let _ = tx.send(Event::ShutdownDeadline);
            });
        }
    }

    /// Stop timeout expired: drop whatever did not answer its TEARDOWN.
    fn force_stop(&mut self) {
        if !self.running {
            return;
        }
        let ids: Vec<_> = self.sessions.keys().copied().collect();
        for id in ids {
            if let Some(s) = self.sessions.get(&id) {
                warn!("{} {}: no TEARDOWN answer, force-stopping", s.device.name, id);
                let event = StatusEvent {
                    state: SessionState::Stopped,
                    ..s.status()
                };
                self.status.on_status(event);
            }
            self.remove_session(id);
        }
        self.running = false;
    }

    fn live_sessions(&self) -> impl Iterator<Item = SessionId> + '_ {
        self.sessions
            .iter()
            .filter(|(_, s)| s.state().is_live())
            .map(|(id, _)| *id)
    }

    // Playback control

    fn playback_start(&mut self, next_rtptime: u32, start_wall_ns: u64) {
        info!("Playback starts at rtptime {}", next_rtptime);
        self.clock = Some(PlaybackClock::new(self.format.sample_rate, next_rtptime, start_wall_ns));
        self.next_rtptime = next_rtptime;
        self.streaming = true;
        self.set_streaming_all(true);
        self.send_sync(true, next_rtptime);
    }

    fn playback_stop(&mut self) {
        info!("Playback stopped");
        self.streaming = false;
        self.set_streaming_all(false);
    }

    fn set_streaming_all(&mut self, streaming: bool) {
        let ids: Vec<_> = self.live_sessions().collect();
        for id in ids {
            let changed = match self.sessions.get_mut(&id) {
                Some(s) if s.audio.is_some() => {
                    let before = s.state();
                    s.machine.set_streaming(streaming);
                    before != s.state()
                }
                _ => false,
            };
            if changed {
                self.report(id);
            }
        }
    }

    fn flush(&mut self, rtptime: u32, reply: oneshot::Sender<Result<()>>) {
        let seq = self.packetizer.next_seq();
        info!("Flushing to seq {} rtptime {}", seq, rtptime);
        self.streaming = false;
        self.clock = None;
        self.packetizer.restart_stream();
        self.set_streaming_all(false);
        self.flush_waiters.push(reply);

        let ids: Vec<_> = self.live_sessions().collect();
        for id in ids {
            let Some(s) = self.sessions.get_mut(&id) else {
                continue;
            };
            match s.machine.flush(seq, rtptime) {
                Ok(outgoing) => {
                    self.flush_pending.insert(id);
                    if let Some(outgoing) = outgoing {
                        self.send(id, outgoing);
                    }
                }
                Err(e) => debug!("Session {}: no FLUSH: {}", id, e),
            }
        }
        self.maybe_finish_flush();
    }

    fn flush_acked(&mut self, id: SessionId) {
        if self.flush_pending.remove(&id) {
            self.maybe_finish_flush();
        }
    }

    fn maybe_finish_flush(&mut self) {
        if self.flush_pending.is_empty() {
            for waiter in self.flush_waiters.drain(..) {
                let _ = waiter.send(Ok(()));
            }
        }
    }

    fn set_volume(&mut self, id: SessionId, level: i32) -> Result<()> {
        let s = self.sessions.get_mut(&id).ok_or(RtspError::NoSession)?;
        s.volume = level.clamp(0, volume::MAX_LOGICAL_VOLUME);
        let attenuation = volume::attenuation(s.volume, s.max_volume);
        debug!("{} {}: volume {} -> {:.6}", s.device.name, id, s.volume, attenuation);
        if let Some(outgoing) = s.machine.volume(attenuation)? {
            self.send(id, outgoing);
        }
        Ok(())
    }

    fn send_metadata(&mut self, item: MetadataItem, current: u32, startup: bool) {
        let pruned = self.metadata.prune(current);
        if pruned > 0 {
            trace!("Pruned {} finished metadata item(s)", pruned);
        }

        let targets: Vec<_> = self
            .sessions
            .iter()
            .filter(|(_, s)| s.state().is_live() && s.device.wants_metadata)
            .map(|(id, s)| (*id, s.machine.url()))
            .collect();
        for (id, url) in targets {
            for (kind, request) in item.requests(&url, current, startup) {
                if let Err(e) = self.enqueue(id, kind, request) {
                    debug!("Session {}: metadata skipped: {}", id, e);
                    break;
                }
            }
        }
        self.metadata.push(item);
    }

    /// RTP time playing right now, or the next packet's when no clock is
    /// anchored.
    fn play_position(&self) -> u32 {
        match &self.clock {
            Some(clock) => clock.rtptime_at(now_unix_ns()),
            None => self.next_rtptime,
        }
    }

    // Audio

    fn write_audio(&mut self, pcm: &[u8], rtptime: u32) {
        if self.sessions.is_empty() {
            trace!("No sessions, dropping audio at rtptime {}", rtptime);
            return;
        }
        if self.streaming && self.since_sync >= self.config.sync_interval_packets {
            self.send_sync(false, rtptime);
        }

        let recycled = self.ring.take_recyclable();
        let packet = match self.packetizer.packetize(pcm, rtptime, recycled) {
            Ok(packet) => packet,
            Err(e) => {
                warn!("Dropping audio at rtptime {}: {}", rtptime, e);
                return;
            }
        };

        let mut failed = Vec::new();
        for (id, s) in &self.sessions {
            if !s.is_streaming() {
                continue;
            }
            let Some(audio) = &s.audio else {
                continue;
            };
            match audio.send(packet.wire(s.encrypt())) {
                Ok(_) => {}
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                    StreamStats::bump(&self.stats.packets_dropped);
                }
                Err(e) => failed.push((*id, e)),
            }
        }

        self.ring.push(packet);
        StreamStats::bump(&self.stats.packets_sent);
        self.since_sync += 1;
        self.next_rtptime = rtptime.wrapping_add(self.format.frames_per_packet);

        for (id, e) in failed {
            if let Some(s) = self.sessions.get_mut(&id) {
                let transition = s
                    .machine
                    .abort(StreamingError::SendFailed(e.to_string()).into());
                self.apply(id, transition);
            }
        }
    }

    fn send_sync(&mut self, first: bool, next_rtptime: u32) {
        let now = now_unix_ns();
        let current_rtptime = match &self.clock {
            Some(clock) => clock.rtptime_at(now),
            None => next_rtptime,
        };
        let sync = SyncPacket {
            first,
            current_rtptime,
            ntp: unix_to_ntp(now),
            next_rtptime,
        }
        .serialize();

        for s in self.sessions.values().filter(|s| s.is_streaming()) {
            let Some(to) = s.control_addr() else {
                continue;
            };
            if let Err(e) = self.control.send_to(&sync, to) {
                debug!("{}: sync to {} failed: {}", s.device.name, to, e);
            }
        }
        self.since_sync = 0;
        StreamStats::bump(&self.stats.sync_sent);
    }

    // UDP services

    fn on_timing(&mut self, datagram: Datagram) {
        let request = match TimingRequest::parse(&datagram.data) {
            Ok(request) => request,
            Err(e) => {
                debug!("Bad timing datagram from {}: {}", datagram.from, e);
                return;
            }
        };
        if !self.sessions.values().any(|s| s.matches(datagram.from.ip())) {
            debug!("Timing request from unknown address {}", datagram.from);
            return;
        }

        let reply = TimingResponse::for_request(&request, datagram.received).serialize(NtpTimestamp::now());
        match self.timing.send_to(&reply, datagram.from) {
            Ok(_) => StreamStats::bump(&self.stats.timing_replies),
            Err(e) => debug!("Timing reply to {} failed: {}", datagram.from, e),
        }
    }

    fn on_control(&mut self, datagram: Datagram) {
        let request = match RetransmitRequest::parse(&datagram.data) {
            Ok(request) => request,
            Err(e) => {
                debug!("Bad control datagram from {}: {}", datagram.from, e);
                return;
            }
        };
        StreamStats::bump(&self.stats.rtx_requested);

        let Some(session) = self
            .sessions
            .values()
            .find(|s| s.state().is_live() && s.matches(datagram.from.ip()))
        else {
            debug!("Retransmit request from unknown address {}", datagram.from);
            return;
        };
        let Some(to) = session.control_addr() else {
            return;
        };

        let packets = match self.ring.range(request.first_sequence, request.count) {
            Ok(packets) => packets,
            Err(e) => {
                StreamStats::bump(&self.stats.rtx_rejected);
                debug!("{}: {}", session.device.name, e);
                return;
            }
        };

        let encrypt = session.encrypt();
        let mut resent = 0;
        for packet in packets {
            let response = build_retransmit_response(packet.seq(), packet.wire(encrypt));
            if let Err(e) = self.control.send_to(&response, to) {
                debug!("{}: resend to {} failed: {}", session.device.name, to, e);
                break;
            }
            resent += 1;
        }
        debug!(
            "{}: resent {}/{} packets from seq {}",
            session.device.name, resent, request.count, request.first_sequence
        );
        StreamStats::add(&self.stats.rtx_fulfilled, resent);
    }
}

fn forward_datagrams(tx: mpsc::UnboundedSender<Event>) -> impl Fn(Datagram) + Send + Sync + 'static {
    move |datagram| {
        let _ = tx.send(Event::Datagram(datagram));
    }
}

