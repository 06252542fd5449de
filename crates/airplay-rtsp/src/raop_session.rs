//! RAOP session state machine.
//!
//! Drives one receiver through `OPTIONS → ANNOUNCE → SETUP → RECORD →
//! SET_PARAMETER(volume)` and then carries the follow-up requests of a
//! live session. The machine does no I/O: every call returns the next
//! request to put on the wire, or the outcome the owner has to act on.
//! Only one request is ever outstanding; follow-ups submitted while a
//! request is in flight are queued and released by [`RaopSession::next_queued`].

use std::collections::VecDeque;
use std::fmt;
use std::net::IpAddr;

use airplay_core::error::{AuthError, CryptoError, Error, Result, RtspError};
use airplay_core::AudioFormat;
use airplay_crypto::DigestChallenge;
use base64::engine::general_purpose::STANDARD_NO_PAD;
use base64::Engine;
use rand::Rng;
use tracing::{debug, info, warn};

use crate::request::RtspRequest;
use crate::response::RtspResponse;
use crate::sdp::SdpBuilder;

/// Session states as reported to the owner.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionState {
    /// Not started, or torn down gracefully.
    Stopped,
    /// OPTIONS accepted.
    Options,
    /// ANNOUNCE accepted.
    Announce,
    /// SETUP accepted, ports negotiated.
    Setup,
    /// RECORD accepted.
    Record,
    /// Startup volume accepted; the audio socket is open.
    Connected,
    /// Receiving audio packets.
    Streaming,
    /// The receiver rejected our credentials (terminal).
    Password,
    /// Any other failure (terminal).
    Failed,
}

impl SessionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Stopped => "STOPPED",
            Self::Options => "OPTIONS",
            Self::Announce => "ANNOUNCE",
            Self::Setup => "SETUP",
            Self::Record => "RECORD",
            Self::Connected => "CONNECTED",
            Self::Streaming => "STREAMING",
            Self::Password => "PASSWORD",
            Self::Failed => "FAILED",
        }
    }

    /// Ready for follow-up requests and audio.
    pub fn is_live(&self) -> bool {
        matches!(self, Self::Connected | Self::Streaming)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Password | Self::Failed)
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What a request is for. The response handler keys on this, not on
/// the RTSP method, since SET_PARAMETER serves several purposes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestKind {
    Options,
    Announce,
    Setup,
    Record,
    StartupVolume,
    Volume,
    Flush,
    Metadata,
    Artwork,
    Progress,
    Teardown,
}

impl RequestKind {
    /// Steps of the startup exchange, OPTIONS through the startup volume.
    pub fn is_handshake(&self) -> bool {
        matches!(
            self,
            Self::Options | Self::Announce | Self::Setup | Self::Record | Self::StartupVolume
        )
    }
}

/// Whether the OPTIONS exchange is the whole job or the first step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartMode {
    Probe,
    Start,
}

/// Ports from the SETUP response Transport header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RaopPorts {
    /// Receiver's audio data port.
    pub server_port: u16,
    /// Receiver's control port, target of retransmits and sync.
    pub control_port: u16,
    /// Receiver's timing port.
    pub timing_port: u16,
}

/// Everything a session needs to know up front.
#[derive(Debug, Clone)]
pub struct SessionParams {
    /// Device name, for logs.
    pub name: String,
    pub local_ip: IpAddr,
    pub remote_ip: IpAddr,
    /// Random id used in the session URL and SDP origin.
    pub url_id: u32,
    pub encrypt: bool,
    /// Uppercase digests and the fixed `iTunes` username.
    pub legacy_auth: bool,
    pub password: Option<String>,
    /// Our control and timing listener ports.
    pub control_port: u16,
    pub timing_port: u16,
    /// RTP-Info for RECORD.
    pub start_seq: u16,
    pub start_rtptime: u32,
    /// Attenuation sent right after RECORD.
    pub startup_volume: f32,
    /// Base64 (unpadded) wrapped AES key and IV, required when encrypting.
    pub aes_key: Option<String>,
    pub aes_iv: Option<String>,
    /// Send an `Apple-Challenge` with ANNOUNCE.
    pub apple_challenge: bool,
    pub user_agent: String,
    pub client_instance: u64,
    pub audio_format: AudioFormat,
}

/// A request ready for the connection task.
#[derive(Debug, Clone)]
pub struct Outgoing {
    pub cseq: u32,
    pub kind: RequestKind,
    pub request: RtspRequest,
}

/// What the owner has to do after feeding the machine.
#[derive(Debug)]
pub enum Transition {
    /// Put this request on the wire.
    Send(Outgoing),
    /// Probe finished; close the connection and report OPTIONS.
    Probed,
    /// Startup finished; open the audio socket and report the state.
    Ready,
    /// A follow-up request was acknowledged.
    Completed(RequestKind),
    /// TEARDOWN acknowledged (or the session had nothing to tear down).
    Stopped,
    /// Credentials rejected.
    Password,
    /// Session failed. Send the TEARDOWN, if any, best-effort and drop
    /// the session regardless of its outcome.
    Failed {
        teardown: Option<Outgoing>,
        reason: Error,
    },
    /// Stale response for a request we no longer track.
    Ignored,
}

/// Per-receiver RTSP session.
pub struct RaopSession {
    params: SessionParams,
    state: SessionState,
    mode: StartMode,
    cseq: u32,
    in_flight: Option<(u32, RequestKind)>,
    queue: VecDeque<(RequestKind, RtspRequest)>,
    challenge: Option<DigestChallenge>,
    auth_attempted: bool,
    session_id: Option<String>,
    ports: Option<RaopPorts>,
    stopping: bool,
}

impl RaopSession {
    pub fn new(params: SessionParams) -> Self {
        Self {
            params,
            state: SessionState::Stopped,
            mode: StartMode::Start,
            cseq: 0,
            in_flight: None,
            queue: VecDeque::new(),
            challenge: None,
            auth_attempted: false,
            session_id: None,
            ports: None,
            stopping: false,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn params(&self) -> &SessionParams {
        &self.params
    }

    pub fn name(&self) -> &str {
        &self.params.name
    }

    /// Last CSeq used.
    pub fn cseq(&self) -> u32 {
        self.cseq
    }

    pub fn in_flight(&self) -> Option<(u32, RequestKind)> {
        self.in_flight
    }

    pub fn session_id(&self) -> Option<&str> {
        self.session_id.as_deref()
    }

    pub fn ports(&self) -> Option<RaopPorts> {
        self.ports
    }

    pub fn mode(&self) -> StartMode {
        self.mode
    }

    /// `rtsp://{local}/{id}`, IPv6 hosts bracketed.
    pub fn url(&self) -> String {
        match self.params.local_ip {
            IpAddr::V4(ip) => format!("rtsp://{}/{}", ip, self.params.url_id),
            IpAddr::V6(ip) => format!("rtsp://[{}]/{}", ip, self.params.url_id),
        }
    }

    /// Begin the exchange with OPTIONS.
    pub fn start(&mut self, mode: StartMode) -> Result<Outgoing> {
        if self.state != SessionState::Stopped || self.cseq != 0 {
            return Err(RtspError::InvalidResponse(format!(
                "cannot start session from state {}",
                self.state
            ))
            .into());
        }
        self.mode = mode;
        self.issue(RequestKind::Options, RtspRequest::options())
    }

    /// Move a live session between CONNECTED and STREAMING.
    pub fn set_streaming(&mut self, streaming: bool) {
        if self.state.is_live() {
            self.state = if streaming {
                SessionState::Streaming
            } else {
                SessionState::Connected
            };
        }
    }

    /// Queue a follow-up request on a live session. Returns the request
    /// to send now when nothing else is outstanding.
    pub fn submit(&mut self, kind: RequestKind, request: RtspRequest) -> Result<Option<Outgoing>> {
        if !self.state.is_live() || self.stopping {
            return Err(RtspError::NoSession.into());
        }
        if self.in_flight.is_some() {
            self.queue.push_back((kind, request));
            return Ok(None);
        }
        self.issue(kind, request).map(Some)
    }

    pub fn volume(&mut self, attenuation: f32) -> Result<Option<Outgoing>> {
        let request = RtspRequest::set_volume(self.url(), attenuation);
        self.submit(RequestKind::Volume, request)
    }

    pub fn flush(&mut self, seq: u16, rtptime: u32) -> Result<Option<Outgoing>> {
        let request = RtspRequest::flush(self.url(), seq, rtptime);
        self.submit(RequestKind::Flush, request)
    }

    /// Release the next queued follow-up, if nothing is outstanding.
    pub fn next_queued(&mut self) -> Option<Outgoing> {
        if self.in_flight.is_some() {
            return None;
        }
        let (kind, request) = self.queue.pop_front()?;
        match self.issue(kind, request) {
            Ok(outgoing) => Some(outgoing),
            Err(e) => {
                warn!("{}: dropping queued {:?}: {}", self.params.name, kind, e);
                None
            }
        }
    }

    /// Graceful stop. Pending follow-ups are dropped. When a request is
    /// still outstanding the TEARDOWN goes out after its response.
    pub fn stop(&mut self) -> Transition {
        self.queue.clear();
        self.stopping = true;
        if self.in_flight.is_some() {
            return Transition::Ignored;
        }
        self.teardown_or_stopped()
    }

    /// The connection went away outside of a request.
    pub fn connection_closed(&mut self) -> Transition {
        if self.stopping && self.in_flight.is_none() {
            self.state = SessionState::Stopped;
            return Transition::Stopped;
        }
        // Nothing can go out on a closed connection
        self.session_id = None;
        self.fail(RtspError::ConnectionClosed.into())
    }

    /// Fail the session for a reason found outside the control channel,
    /// such as an audio socket error.
    pub fn abort(&mut self, reason: Error) -> Transition {
        self.fail(reason)
    }

    /// Feed the outcome of request `cseq`.
    pub fn handle_response(&mut self, cseq: u32, result: Result<RtspResponse>) -> Transition {
        let kind = match self.in_flight {
            Some((expected, kind)) if expected == cseq => kind,
            _ => {
                debug!("{}: ignoring response for cseq {}", self.params.name, cseq);
                return Transition::Ignored;
            }
        };
        self.in_flight = None;

        let response = match result {
            Ok(response) => response,
            Err(e) => {
                // Connection task is gone
                self.session_id = None;
                return self.fail(e);
            }
        };

        if kind == RequestKind::Teardown {
            self.state = SessionState::Stopped;
            return Transition::Stopped;
        }

        // Stopped mid-handshake: go no further
        if self.stopping && kind.is_handshake() {
            if kind == RequestKind::Setup && response.is_success() {
                self.session_id = response.session_id().map(str::to_string);
            }
            return self.teardown_or_stopped();
        }

        if kind == RequestKind::Options && response.is_unauthorized() {
            return self.on_unauthorized(&response);
        }

        if !response.is_success() {
            warn!(
                "{}: {:?} rejected with {} {}",
                self.params.name, kind, response.status_code, response.status_text
            );
            return self.fail(RtspError::UnexpectedStatus(response.status_code).into());
        }

        let step = match self.advance(kind, &response) {
            Ok(step) => step,
            Err(e) => return self.fail(e),
        };

        if self.stopping && matches!(step, Transition::Completed(_) | Transition::Ready) {
            return self.teardown_or_stopped();
        }
        step
    }

    /// The transition table for successful responses.
    fn advance(&mut self, kind: RequestKind, response: &RtspResponse) -> Result<Transition> {
        match kind {
            RequestKind::Options => {
                self.state = SessionState::Options;
                if self.mode == StartMode::Probe {
                    return Ok(Transition::Probed);
                }
                let request = self.announce_request()?;
                self.issue(RequestKind::Announce, request).map(Transition::Send)
            }
            RequestKind::Announce => {
                self.state = SessionState::Announce;
                let request = RtspRequest::setup(self.url(), self.transport_header());
                self.issue(RequestKind::Setup, request).map(Transition::Send)
            }
            RequestKind::Setup => {
                let session_id = response
                    .session_id()
                    .ok_or_else(|| RtspError::MissingHeader("Session".to_string()))?
                    .to_string();
                // Recorded first so a bad Transport still gets a TEARDOWN
                self.session_id = Some(session_id);
                let transport = response
                    .header("Transport")
                    .ok_or_else(|| RtspError::MissingHeader("Transport".to_string()))?;
                let ports = parse_transport_header(transport)?;
                debug!(
                    "{}: session {:?} ports audio={} control={} timing={}",
                    self.params.name, self.session_id, ports.server_port, ports.control_port, ports.timing_port
                );
                self.ports = Some(ports);
                self.state = SessionState::Setup;
                let request =
                    RtspRequest::record(self.url(), self.params.start_seq, self.params.start_rtptime);
                self.issue(RequestKind::Record, request).map(Transition::Send)
            }
            RequestKind::Record => {
                self.state = SessionState::Record;
                let request = RtspRequest::set_volume(self.url(), self.params.startup_volume);
                self.issue(RequestKind::StartupVolume, request)
                    .map(Transition::Send)
            }
            RequestKind::StartupVolume => {
                self.state = SessionState::Connected;
                info!("{}: session established", self.params.name);
                Ok(Transition::Ready)
            }
            RequestKind::Volume
            | RequestKind::Flush
            | RequestKind::Metadata
            | RequestKind::Artwork
            | RequestKind::Progress => Ok(Transition::Completed(kind)),
            RequestKind::Teardown => Ok(Transition::Stopped),
        }
    }

    fn on_unauthorized(&mut self, response: &RtspResponse) -> Transition {
        if self.auth_attempted {
            info!("{}: password rejected", self.params.name);
            self.state = SessionState::Password;
            return Transition::Password;
        }
        let Some(password) = self.params.password.clone() else {
            info!("{}: receiver requires a password", self.params.name);
            self.state = SessionState::Password;
            return Transition::Password;
        };
        let challenge = match response.www_authenticate() {
            Some(header) => match DigestChallenge::parse(header) {
                Ok(challenge) => challenge,
                Err(e) => return self.fail(e.into()),
            },
            None => return self.fail(AuthError::MissingChallenge.into()),
        };
        debug!(
            "{}: digest challenge realm={} (password {} chars)",
            self.params.name,
            challenge.realm,
            password.len()
        );
        self.challenge = Some(challenge);
        self.auth_attempted = true;
        match self.issue(RequestKind::Options, RtspRequest::options()) {
            Ok(outgoing) => Transition::Send(outgoing),
            Err(e) => self.fail(e),
        }
    }

    fn announce_request(&self) -> Result<RtspRequest> {
        let mut sdp = SdpBuilder::new(
            self.params.url_id,
            self.params.local_ip,
            self.params.remote_ip,
            self.params.audio_format,
        );
        if self.params.encrypt {
            match (&self.params.aes_key, &self.params.aes_iv) {
                (Some(key), Some(iv)) => sdp = sdp.with_encryption(key.as_str(), iv.as_str()),
                _ => {
                    return Err(CryptoError::Encryption("stream key unavailable".to_string()).into())
                }
            }
        }

        let mut request = RtspRequest::announce(self.url(), sdp.build());
        if self.params.apple_challenge {
            let nonce: [u8; 16] = rand::thread_rng().gen();
            request.set_header("Apple-Challenge", STANDARD_NO_PAD.encode(nonce));
        }
        Ok(request)
    }

    fn transport_header(&self) -> String {
        format!(
            "RTP/AVP/UDP;unicast;interleaved=0-1;mode=record;control_port={};timing_port={}",
            self.params.control_port, self.params.timing_port
        )
    }

    /// Stamp and account for a request. Fails if one is outstanding.
    fn issue(&mut self, kind: RequestKind, mut request: RtspRequest) -> Result<Outgoing> {
        if let Some((cseq, _)) = self.in_flight {
            return Err(RtspError::RequestInFlight(cseq).into());
        }
        self.cseq += 1;
        let cseq = self.cseq;

        let instance = format!("{:016X}", self.params.client_instance);
        request.set_header("User-Agent", self.params.user_agent.clone());
        request.set_header("Client-Instance", instance.clone());
        request.set_header("DACP-ID", instance);
        if let Some(session_id) = &self.session_id {
            request.set_header("Session", session_id.clone());
        }
        if let (Some(challenge), Some(password)) = (&self.challenge, &self.params.password) {
            let authorization = challenge.authorization(
                password,
                request.method.as_str(),
                &request.uri,
                self.params.legacy_auth,
            );
            request.set_header("Authorization", authorization);
        }

        self.in_flight = Some((cseq, kind));
        Ok(Outgoing {
            cseq,
            kind,
            request,
        })
    }

    fn teardown_or_stopped(&mut self) -> Transition {
        if self.session_id.is_none() {
            self.state = SessionState::Stopped;
            return Transition::Stopped;
        }
        let request = RtspRequest::teardown(self.url());
        match self.issue(RequestKind::Teardown, request) {
            Ok(outgoing) => Transition::Send(outgoing),
            Err(e) => self.fail(e),
        }
    }

    fn fail(&mut self, reason: Error) -> Transition {
        warn!("{}: session failed in state {}: {}", self.params.name, self.state, reason);
        self.state = SessionState::Failed;
        self.queue.clear();
        self.in_flight = None;
        let teardown = if self.session_id.is_some() {
            let request = RtspRequest::teardown(self.url());
            self.issue(RequestKind::Teardown, request).ok()
        } else {
            None
        };
        Transition::Failed { teardown, reason }
    }
}

/// Parse a SETUP response Transport header. The transport must be UDP
/// and all three ports must be present.
pub fn parse_transport_header(header: &str) -> Result<RaopPorts> {
    let mut parts = header.split(';').map(str::trim);
    let protocol = parts.next().unwrap_or_default();
    if !protocol.starts_with("RTP/AVP/UDP") {
        return Err(RtspError::InvalidTransport(format!("not a UDP transport: {}", protocol)).into());
    }

    let mut server_port = None;
    let mut control_port = None;
    let mut timing_port = None;
    for part in parts {
        let Some((key, value)) = part.split_once('=') else {
            continue;
        };
        let slot = match key {
            "server_port" => &mut server_port,
            "control_port" => &mut control_port,
            "timing_port" => &mut timing_port,
            _ => continue,
        };
        let port: u16 = value
            .parse()
            .map_err(|_| RtspError::InvalidTransport(format!("bad {}: {}", key, value)))?;
        *slot = Some(port);
    }

    let missing = |name: &str| RtspError::InvalidTransport(format!("missing {}", name));
    Ok(RaopPorts {
        server_port: server_port.ok_or_else(|| missing("server_port"))?,
        control_port: control_port.ok_or_else(|| missing("control_port"))?,
        timing_port: timing_port.ok_or_else(|| missing("timing_port"))?,
    })
}
