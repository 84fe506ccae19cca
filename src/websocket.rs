//! # Media Stream WebSocket Handler
//!
//! Telephony media streams connect to `/audiostream`. Each connection is one call
//! and gets exactly one session in the registry.
//!
//! ## WebSocket Protocol:
//! All frames are JSON text with an `event` field.
//! 1. **connected**: the media stream is up (informational)
//! 2. **start**: carries the `streamSid` that every outbound frame must echo
//! 3. **media**: base64 G.711 µ-law audio from the caller, 8 kHz mono
//! 4. **mark**: playback acknowledgements (informational)
//! 5. **stop**: the call is over
//!
//! ## Message Format:
//! - **Client → Server**: `media` frames are decoded to PCM16 and routed to the session
//! - **Server → Client**: synthesized PCM16 is encoded back to µ-law and sent as
//!   `{"event":"media","streamSid":...,"media":{"payload":...}}`; a `clear` frame
//!   flushes buffered playback after a barge-in
//!
//! ## Lifecycle:
//! The session is created when the socket starts. Close, `stop`, a protocol error,
//! or a missed heartbeat stops the actor, and stopping ends the session.

use crate::audio::codec::{pcm16_to_ulaw, ulaw_to_pcm16};
use crate::audio::PcmChunk;
use crate::collaborators::Transport;
use crate::error::TransportError;
use crate::session::{SessionId, SessionRegistry};
use crate::state::AppState;

use actix::prelude::*;
use actix_web::{web, HttpRequest, HttpResponse, Result as ActixResult};
use actix_web_actors::ws;
use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);
const CLIENT_TIMEOUT: Duration = Duration::from_secs(60);

/// Frames sent by the media stream.
#[derive(Debug, Deserialize)]
#[serde(tag = "event", rename_all = "lowercase")]
pub enum InboundEvent {
    Connected {
        #[serde(default)]
        protocol: Option<String>,
    },
    Start {
        #[serde(rename = "streamSid")]
        stream_sid: String,
    },
    Media {
        media: MediaPayload,
    },
    Mark {
        #[serde(default)]
        mark: Option<MarkPayload>,
    },
    Stop {},
}

#[derive(Debug, Deserialize, Serialize)]
pub struct MediaPayload {
    pub payload: String,
}

#[derive(Debug, Deserialize)]
pub struct MarkPayload {
    pub name: String,
}

/// Frames we send back.
#[derive(Debug, Serialize)]
#[serde(tag = "event", rename_all = "lowercase")]
enum OutboundEvent<'a> {
    Media {
        #[serde(rename = "streamSid")]
        stream_sid: &'a str,
        media: MediaPayload,
    },
    Clear {
        #[serde(rename = "streamSid")]
        stream_sid: &'a str,
    },
}

/// Decode one inbound `media` payload into PCM16 LE.
fn decode_media(payload: &str) -> Result<PcmChunk, String> {
    let ulaw = BASE64
        .decode(payload)
        .map_err(|e| format!("invalid base64 payload: {}", e))?;
    Ok(ulaw_to_pcm16(&ulaw))
}

/// Encode PCM16 LE as an outbound `media` frame.
fn encode_media(stream_sid: &str, pcm: &[u8]) -> Result<String, String> {
    let ulaw = pcm16_to_ulaw(pcm)?;
    let event = OutboundEvent::Media {
        stream_sid,
        media: MediaPayload {
            payload: BASE64.encode(ulaw),
        },
    };
    serde_json::to_string(&event).map_err(|e| e.to_string())
}

/// Synthesized audio headed for the caller.
#[derive(Message)]
#[rtype(result = "()")]
struct OutboundAudio(PcmChunk);

/// Drop whatever the caller's side has buffered.
#[derive(Message)]
#[rtype(result = "()")]
struct ClearPlayback;

/// The session's view of this connection.
///
/// Audio is refused until the `start` event has named the stream, since an
/// outbound frame without a `streamSid` would be discarded by the peer.
pub struct MediaStreamTransport {
    addr: Addr<MediaStreamSocket>,
    stream_started: Arc<AtomicBool>,
}

impl MediaStreamTransport {
    fn new(addr: Addr<MediaStreamSocket>, stream_started: Arc<AtomicBool>) -> Self {
        Self {
            addr,
            stream_started,
        }
    }
}

#[async_trait]
impl Transport for MediaStreamTransport {
    async fn send(&self, chunk: PcmChunk) -> Result<(), TransportError> {
        if !self.addr.connected() {
            return Err(TransportError::Closed);
        }
        if !self.stream_started.load(Ordering::SeqCst) {
            return Err(TransportError::Send("stream not started".to_string()));
        }
        // do_send bypasses the mailbox capacity, so bursts of audio are never refused
        self.addr.do_send(OutboundAudio(chunk));
        Ok(())
    }

    fn is_closed(&self) -> bool {
        !self.addr.connected()
    }

    fn clear(&self) {
        self.addr.do_send(ClearPlayback);
    }
}

/// WebSocket actor for one telephony media stream.
pub struct MediaStreamSocket {
    registry: Arc<SessionRegistry>,
    session_id: Option<SessionId>,
    /// Set by the `start` event; outbound audio before it has nowhere to go
    stream_sid: Option<String>,
    /// Mirrors `stream_sid.is_some()` for the transport, which lives outside the actor
    stream_started: Arc<AtomicBool>,
    last_heartbeat: Instant,
}

impl MediaStreamSocket {
    pub fn new(registry: Arc<SessionRegistry>) -> Self {
        Self {
            registry,
            session_id: None,
            stream_sid: None,
            stream_started: Arc::new(AtomicBool::new(false)),
            last_heartbeat: Instant::now(),
        }
    }

    fn start_heartbeat(&self, ctx: &mut ws::WebsocketContext<Self>) {
        ctx.run_interval(HEARTBEAT_INTERVAL, |act, ctx| {
            if Instant::now().duration_since(act.last_heartbeat) > CLIENT_TIMEOUT {
                warn!("Media stream heartbeat timeout, closing connection");
                ctx.stop();
                return;
            }
            // Ended from elsewhere, e.g. the sessions API
            if let Some(session_id) = &act.session_id {
                if !act.registry.contains(session_id) {
                    info!(session_id = %session_id, "Session ended, closing media stream");
                    ctx.close(None);
                    ctx.stop();
                    return;
                }
            }
            ctx.ping(b"");
        });
    }

    fn create_session(&self, ctx: &mut ws::WebsocketContext<Self>) {
        let registry = self.registry.clone();
        let transport: Arc<dyn Transport> = Arc::new(MediaStreamTransport::new(
            ctx.address(),
            self.stream_started.clone(),
        ));

        // Frames wait in the stream until the session exists, so no audio is lost
        ctx.wait(
            async move { registry.create(transport).await }
                .into_actor(self)
                .map(|created, act, ctx| match created {
                    Ok(session_id) => {
                        info!(session_id = %session_id, "Media stream attached to session");
                        act.session_id = Some(session_id);
                    }
                    Err(err) => {
                        error!(error = %err, "Could not create a session for the media stream");
                        ctx.close(Some(ws::CloseReason {
                            code: ws::CloseCode::Again,
                            description: Some(err.to_string()),
                        }));
                        ctx.stop();
                    }
                }),
        );
    }

    fn handle_event(&mut self, event: InboundEvent, ctx: &mut ws::WebsocketContext<Self>) {
        match event {
            InboundEvent::Connected { protocol } => {
                debug!(protocol = ?protocol, "Media stream connected");
            }
            InboundEvent::Start { stream_sid } => {
                info!(stream_sid = %stream_sid, "Media stream started");
                self.stream_sid = Some(stream_sid);
                self.stream_started.store(true, Ordering::SeqCst);
            }
            InboundEvent::Media { media } => self.handle_media(&media.payload),
            InboundEvent::Mark { mark } => {
                debug!(mark = ?mark.map(|m| m.name), "Playback mark");
            }
            InboundEvent::Stop {} => {
                info!("Media stream stopped by the caller side");
                ctx.close(None);
                ctx.stop();
            }
        }
    }

    fn handle_media(&mut self, payload: &str) {
        let Some(session_id) = &self.session_id else {
            debug!("Dropping media received before the session was attached");
            return;
        };

        match decode_media(payload) {
            Ok(pcm) => {
                if !self.registry.route_audio(session_id, pcm) {
                    debug!(session_id = %session_id, "Session gone, dropping media");
                }
            }
            Err(err) => warn!(session_id = %session_id, error = %err, "Bad media frame"),
        }
    }
}

impl Actor for MediaStreamSocket {
    type Context = ws::WebsocketContext<Self>;

    fn started(&mut self, ctx: &mut Self::Context) {
        info!("Media stream connection started");
        self.start_heartbeat(ctx);
        self.create_session(ctx);
    }

    fn stopped(&mut self, _ctx: &mut Self::Context) {
        if let Some(session_id) = self.session_id.take() {
            self.registry.end(&session_id);
        }
        info!("Media stream connection stopped");
    }
}

impl StreamHandler<Result<ws::Message, ws::ProtocolError>> for MediaStreamSocket {
    fn handle(&mut self, msg: Result<ws::Message, ws::ProtocolError>, ctx: &mut Self::Context) {
        match msg {
            Ok(ws::Message::Text(text)) => {
                self.last_heartbeat = Instant::now();
                match serde_json::from_str::<InboundEvent>(&text) {
                    Ok(event) => self.handle_event(event, ctx),
                    Err(err) => warn!(error = %err, "Ignoring unrecognized media stream frame"),
                }
            }
            Ok(ws::Message::Binary(data)) => {
                debug!(bytes = data.len(), "Ignoring binary frame");
            }
            Ok(ws::Message::Ping(data)) => {
                ctx.pong(&data);
                self.last_heartbeat = Instant::now();
            }
            Ok(ws::Message::Pong(_)) => {
                self.last_heartbeat = Instant::now();
            }
            Ok(ws::Message::Close(reason)) => {
                info!("Media stream closed: {:?}", reason);
                ctx.close(reason);
                ctx.stop();
            }
            Ok(ws::Message::Continuation(_)) => {
                warn!("Received unexpected continuation frame");
            }
            Ok(ws::Message::Nop) => {}
            Err(err) => {
                error!("Media stream protocol error: {}", err);
                ctx.stop();
            }
        }
    }
}

impl Handler<OutboundAudio> for MediaStreamSocket {
    type Result = ();

    fn handle(&mut self, msg: OutboundAudio, ctx: &mut Self::Context) {
        let Some(stream_sid) = &self.stream_sid else {
            debug!("No stream yet, dropping outbound audio");
            return;
        };
        match encode_media(stream_sid, &msg.0) {
            Ok(frame) => ctx.text(frame),
            Err(err) => warn!(error = %err, "Could not encode outbound audio"),
        }
    }
}

impl Handler<ClearPlayback> for MediaStreamSocket {
    type Result = ();

    fn handle(&mut self, _msg: ClearPlayback, ctx: &mut Self::Context) {
        if let Some(stream_sid) = &self.stream_sid {
            let clear = OutboundEvent::Clear { stream_sid };
            if let Ok(frame) = serde_json::to_string(&clear) {
                ctx.text(frame);
            }
        }
    }
}

/// WebSocket endpoint handler.
///
/// ## HTTP to WebSocket Upgrade:
/// Upgrades the request and hands the connection to a `MediaStreamSocket` actor.
pub async fn media_stream(
    req: HttpRequest,
    stream: web::Payload,
    app_state: web::Data<AppState>,
) -> ActixResult<HttpResponse> {
    info!(
        "New media stream connection from: {:?}",
        req.connection_info().peer_addr()
    );
    ws::start(
        MediaStreamSocket::new(app_state.registry.clone()),
        &req,
        stream,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::codec::linear_to_ulaw;
    use crate::config::AppConfig;
    use crate::session::testing::{wait_until, FakeFactory};
    use crate::session::SessionSettings;
    use crate::state::BridgeMetrics;
    use actix_web::error::PayloadError;
    use actix_web::web::Bytes;
    use futures_util::StreamExt;
    use std::sync::Mutex;
    use tokio::sync::mpsc;
    use tokio_stream::wrappers::UnboundedReceiverStream;

    #[test]
    fn test_parses_stream_events() {
        let start = r#"{"event":"start","sequenceNumber":"1","start":{"accountSid":"AC1","streamSid":"MZ1","tracks":["inbound"]},"streamSid":"MZ1"}"#;
        match serde_json::from_str::<InboundEvent>(start).unwrap() {
            InboundEvent::Start { stream_sid } => assert_eq!(stream_sid, "MZ1"),
            other => panic!("unexpected event: {:?}", other),
        }

        let media = r#"{"event":"media","sequenceNumber":"3","media":{"track":"inbound","chunk":"1","timestamp":"5","payload":"/w=="},"streamSid":"MZ1"}"#;
        assert!(matches!(
            serde_json::from_str::<InboundEvent>(media).unwrap(),
            InboundEvent::Media { media } if media.payload == "/w=="
        ));

        let connected = r#"{"event":"connected","protocol":"Call","version":"1.0.0"}"#;
        assert!(matches!(
            serde_json::from_str::<InboundEvent>(connected).unwrap(),
            InboundEvent::Connected { .. }
        ));

        let stop = r#"{"event":"stop","sequenceNumber":"9","stop":{"callSid":"CA1"},"streamSid":"MZ1"}"#;
        assert!(matches!(
            serde_json::from_str::<InboundEvent>(stop).unwrap(),
            InboundEvent::Stop {}
        ));
    }

    #[test]
    fn test_unknown_event_is_rejected() {
        assert!(serde_json::from_str::<InboundEvent>(r#"{"event":"dtmf"}"#).is_err());
    }

    #[test]
    fn test_decode_media_to_pcm() {
        // 0xFF is µ-law silence
        let payload = BASE64.encode([0xFFu8, 0xFF, 0xFF]);
        assert_eq!(decode_media(&payload).unwrap(), vec![0u8; 6]);
        assert!(decode_media("not base64!").is_err());
    }

    #[test]
    fn test_encode_media_frame() {
        let pcm: Vec<u8> = [0i16, 1000, -1000]
            .iter()
            .flat_map(|s| s.to_le_bytes())
            .collect();
        let frame = encode_media("MZ1", &pcm).unwrap();
        let json: serde_json::Value = serde_json::from_str(&frame).unwrap();

        assert_eq!(json["event"], "media");
        assert_eq!(json["streamSid"], "MZ1");
        let ulaw = BASE64
            .decode(json["media"]["payload"].as_str().unwrap())
            .unwrap();
        assert_eq!(
            ulaw,
            vec![linear_to_ulaw(0), linear_to_ulaw(1000), linear_to_ulaw(-1000)]
        );
    }

    #[test]
    fn test_encode_rejects_half_sample() {
        assert!(encode_media("MZ1", &[1, 2, 3]).is_err());
    }

    /// A client text frame. A zero mask leaves the payload as is.
    fn client_text_frame(text: &str) -> Bytes {
        assert!(text.len() < 126);
        let mut frame = vec![0x81, 0x80 | text.len() as u8, 0, 0, 0, 0];
        frame.extend_from_slice(text.as_bytes());
        Bytes::from(frame)
    }

    #[actix::test]
    async fn test_transport_refuses_audio_until_stream_starts() {
        let config = AppConfig::default();
        let registry = Arc::new(SessionRegistry::new(
            FakeFactory::new(),
            SessionSettings::from(&config.session),
            Arc::new(BridgeMetrics::new()),
        ));
        let socket = MediaStreamSocket::new(registry.clone());
        let started = socket.stream_started.clone();

        let (frames_tx, frames_rx) = mpsc::unbounded_channel::<Result<Bytes, PayloadError>>();
        let (addr, output) =
            ws::WebsocketContext::create_with_addr(socket, UnboundedReceiverStream::new(frames_rx));
        let written = Arc::new(Mutex::new(String::new()));
        {
            let written = written.clone();
            actix::spawn(async move {
                let mut output = Box::pin(output);
                while let Some(Ok(bytes)) = output.next().await {
                    written
                        .lock()
                        .unwrap()
                        .push_str(&String::from_utf8_lossy(&bytes));
                }
            });
        }
        wait_until(|| registry.session_count() == 1).await;

        let transport = MediaStreamTransport::new(addr, started.clone());
        assert_eq!(
            transport.send(vec![0, 0]).await,
            Err(TransportError::Send("stream not started".to_string()))
        );

        frames_tx
            .send(Ok(client_text_frame(r#"{"event":"start","streamSid":"MZ1"}"#)))
            .unwrap();
        wait_until(|| started.load(Ordering::SeqCst)).await;

        assert_eq!(transport.send(vec![0, 0]).await, Ok(()));
        wait_until(|| written.lock().unwrap().contains(r#""event":"media""#)).await;
        assert!(written.lock().unwrap().contains(r#""streamSid":"MZ1""#));
    }

    #[test]
    fn test_clear_frame_shape() {
        let frame = serde_json::to_string(&OutboundEvent::Clear { stream_sid: "MZ1" }).unwrap();
        assert_eq!(frame, r#"{"event":"clear","streamSid":"MZ1"}"#);
    }
}
