//! REST + WebSocket relay transport. A call is placed and torn down via the
//! phone backend's REST endpoints; a stream socket carries control frames
//! and inbound audio for the call's lifetime.

use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc, Mutex as StdMutex, PoisonError,
};

use async_trait::async_trait;
use futures::{
    stream::{SplitSink, SplitStream},
    SinkExt, StreamExt,
};
use reqwest::Client;
use shared::{
    domain::CallSid,
    error::{ApiError, ErrorCode},
    protocol::{HangupRequest, PlaceCallRequest, PlaceCallResponse, StreamCommand, StreamEvent},
};
use tokio::{net::TcpStream, sync::broadcast, task::JoinHandle};
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};
use tracing::{debug, warn};

use crate::{
    classify_rejection, AudioSink, CallLink, CallTransport, CallTransportEvent, DialRequest,
    NullAudioSink, TransportError,
};

const EVENT_CHANNEL_CAPACITY: usize = 64;

type WsWriter = SplitSink<WebSocketStream<MaybeTlsStream<TcpStream>>, Message>;
type WsReader = SplitStream<WebSocketStream<MaybeTlsStream<TcpStream>>>;

fn lock_unpoisoned<T>(mutex: &StdMutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Transport over the phone backend's call relay. Created once at startup;
/// becomes ready when `set_bearer` installs the login credential and stops
/// being ready when `clear_bearer` drops it at logout.
pub struct RelayTransport {
    http: Client,
    base_url: String,
    bearer: StdMutex<Option<String>>,
    sink: Arc<dyn AudioSink>,
}

impl RelayTransport {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self::with_audio_sink(base_url, Arc::new(NullAudioSink))
    }

    pub fn with_audio_sink(base_url: impl Into<String>, sink: Arc<dyn AudioSink>) -> Self {
        Self {
            http: Client::new(),
            base_url: base_url.into(),
            bearer: StdMutex::new(None),
            sink,
        }
    }

    /// Install the credential that completes transport setup.
    pub fn set_bearer(&self, token: impl Into<String>) {
        *lock_unpoisoned(&self.bearer) = Some(token.into());
    }

    pub fn clear_bearer(&self) {
        *lock_unpoisoned(&self.bearer) = None;
    }
}

#[async_trait]
impl CallTransport for RelayTransport {
    fn is_ready(&self) -> bool {
        lock_unpoisoned(&self.bearer).is_some()
    }

    async fn connect(&self, request: DialRequest) -> Result<Arc<dyn CallLink>, TransportError> {
        let Some(bearer) = lock_unpoisoned(&self.bearer).clone() else {
            return Err(TransportError::NotReady);
        };

        let response = self
            .http
            .post(format!("{}/phone/call", self.base_url))
            .bearer_auth(&bearer)
            .json(&PlaceCallRequest {
                phone_number: request.destination.clone(),
                user_id: request.user_id,
            })
            .send()
            .await
            .map_err(|err| TransportError::Network(err.to_string()))?;

        if !response.status().is_success() {
            return Err(rejection_from_error_response(response).await);
        }

        let body: PlaceCallResponse = response
            .json()
            .await
            .map_err(|err| TransportError::Other(format!("invalid place-call response: {err}")))?;

        let call_sid = match body {
            PlaceCallResponse {
                call_sid: Some(sid),
                ..
            } => sid,
            PlaceCallResponse {
                error: Some(reason),
                ..
            } => return Err(classify_rejection(&reason)),
            PlaceCallResponse { .. } => {
                return Err(TransportError::Other(
                    "place-call response carried neither callSid nor error".into(),
                ))
            }
        };

        let ws_url = stream_url(&self.base_url, &call_sid)?;
        let (ws_stream, _) = match connect_async(&ws_url).await {
            Ok(connected) => connected,
            Err(err) => {
                // The backend already placed the call; release it before failing.
                let _ = post_hangup(&self.http, &self.base_url, &bearer, &call_sid).await;
                return Err(TransportError::Network(format!(
                    "failed to open call stream: {err}"
                )));
            }
        };
        let (writer, reader) = ws_stream.split();

        debug!(%call_sid, "call stream established");
        Ok(RelayLink::start(
            self.http.clone(),
            self.base_url.clone(),
            bearer,
            call_sid,
            writer,
            reader,
            Arc::clone(&self.sink),
        ))
    }
}

/// One placed call: the stream socket halves, the hangup route, and the
/// event channel feeding the controller.
pub struct RelayLink {
    http: Client,
    base_url: String,
    bearer: String,
    call_sid: CallSid,
    events: broadcast::Sender<CallTransportEvent>,
    first_rx: StdMutex<Option<broadcast::Receiver<CallTransportEvent>>>,
    writer: tokio::sync::Mutex<Option<WsWriter>>,
    sink: Arc<dyn AudioSink>,
    hung_up: Arc<AtomicBool>,
    reader_task: StdMutex<Option<JoinHandle<()>>>,
}

impl RelayLink {
    fn start(
        http: Client,
        base_url: String,
        bearer: String,
        call_sid: CallSid,
        writer: WsWriter,
        reader: WsReader,
        sink: Arc<dyn AudioSink>,
    ) -> Arc<dyn CallLink> {
        let (events, first_rx) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let hung_up = Arc::new(AtomicBool::new(false));

        // Buffered by `first_rx` until the controller subscribes, so the
        // acceptance cannot be lost.
        let _ = events.send(CallTransportEvent::Accepted {
            call_sid: call_sid.clone(),
        });

        let reader_task = tokio::spawn(run_stream_reader(
            reader,
            events.clone(),
            Arc::clone(&sink),
            Arc::clone(&hung_up),
        ));

        Arc::new(Self {
            http,
            base_url,
            bearer,
            call_sid,
            events,
            first_rx: StdMutex::new(Some(first_rx)),
            writer: tokio::sync::Mutex::new(Some(writer)),
            sink,
            hung_up,
            reader_task: StdMutex::new(Some(reader_task)),
        })
    }

    async fn send_command(&self, command: &StreamCommand) -> Result<(), TransportError> {
        let frame = serde_json::to_string(command)
            .map_err(|err| TransportError::Other(format!("encode stream command: {err}")))?;
        let mut guard = self.writer.lock().await;
        let Some(writer) = guard.as_mut() else {
            return Err(TransportError::Other("call stream is closed".into()));
        };
        writer
            .send(Message::Text(frame))
            .await
            .map_err(|err| TransportError::Network(format!("stream send failed: {err}")))
    }
}

#[async_trait]
impl CallLink for RelayLink {
    async fn hang_up(&self) -> Result<(), TransportError> {
        if self.hung_up.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        if let Some(task) = lock_unpoisoned(&self.reader_task).take() {
            task.abort();
        }
        if let Some(mut writer) = self.writer.lock().await.take() {
            let _ = writer.send(Message::Close(None)).await;
        }
        post_hangup(&self.http, &self.base_url, &self.bearer, &self.call_sid).await
    }

    async fn send_tone(&self, digit: char) -> Result<(), TransportError> {
        self.send_command(&StreamCommand::Dtmf { digit }).await
    }

    async fn set_muted(&self, muted: bool) -> Result<(), TransportError> {
        self.sink.set_muted(muted);
        self.send_command(&StreamCommand::Mute { muted }).await
    }

    fn subscribe_events(&self) -> broadcast::Receiver<CallTransportEvent> {
        lock_unpoisoned(&self.first_rx)
            .take()
            .unwrap_or_else(|| self.events.subscribe())
    }
}

impl Drop for RelayLink {
    fn drop(&mut self) {
        if let Some(task) = lock_unpoisoned(&self.reader_task).take() {
            task.abort();
        }
    }
}

/// Pump the stream socket until a terminal event. Emits at most one of
/// `Disconnected`/`Failed`; a local hangup suppresses the emission so the
/// session does not see its own teardown echoed back.
async fn run_stream_reader(
    mut reader: WsReader,
    events: broadcast::Sender<CallTransportEvent>,
    sink: Arc<dyn AudioSink>,
    hung_up: Arc<AtomicBool>,
) {
    while let Some(message) = reader.next().await {
        if hung_up.load(Ordering::SeqCst) {
            return;
        }
        match message {
            Ok(Message::Text(text)) => match serde_json::from_str::<StreamEvent>(&text) {
                Ok(StreamEvent::Disconnected { reason }) => {
                    let _ = events.send(CallTransportEvent::Disconnected { reason });
                    return;
                }
                Ok(StreamEvent::Failed { error }) => {
                    let _ = events.send(CallTransportEvent::Failed {
                        error: classify_rejection(&error),
                    });
                    return;
                }
                Err(err) => warn!(%err, "unrecognized frame on call stream"),
            },
            Ok(Message::Binary(frame)) => sink.play_frame(&frame),
            Ok(Message::Close(_)) => break,
            Ok(_) => {}
            Err(err) => {
                let _ = events.send(CallTransportEvent::Failed {
                    error: TransportError::Network(format!("stream receive failed: {err}")),
                });
                return;
            }
        }
    }
    if !hung_up.load(Ordering::SeqCst) {
        let _ = events.send(CallTransportEvent::Disconnected { reason: None });
    }
}

async fn rejection_from_error_response(response: reqwest::Response) -> TransportError {
    let status = response.status();
    match response.json::<ApiError>().await {
        Ok(ApiError {
            code: ErrorCode::InsufficientCredits,
            ..
        }) => TransportError::InsufficientCredits,
        Ok(ApiError { message, .. }) => classify_rejection(&message),
        Err(_) => TransportError::Other(format!("place-call failed with status {status}")),
    }
}

async fn post_hangup(
    http: &Client,
    base_url: &str,
    bearer: &str,
    call_sid: &CallSid,
) -> Result<(), TransportError> {
    http.post(format!("{base_url}/phone/hangup"))
        .bearer_auth(bearer)
        .json(&HangupRequest {
            call_sid: call_sid.clone(),
        })
        .send()
        .await
        .map_err(|err| TransportError::Network(err.to_string()))?
        .error_for_status()
        .map_err(|err| TransportError::Other(format!("hangup rejected: {err}")))?;
    Ok(())
}

fn stream_url(base_url: &str, call_sid: &CallSid) -> Result<String, TransportError> {
    let ws_base = if base_url.starts_with("https://") {
        base_url.replacen("https://", "wss://", 1)
    } else if base_url.starts_with("http://") {
        base_url.replacen("http://", "ws://", 1)
    } else {
        return Err(TransportError::Other(format!(
            "base url must start with http:// or https://: {base_url}"
        )));
    };
    Ok(format!("{ws_base}/phone/stream?callSid={call_sid}"))
}

#[cfg(test)]
#[path = "tests/relay_tests.rs"]
mod tests;
