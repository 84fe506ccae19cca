//! In-memory collaborators for session tests.

use crate::audio::PcmChunk;
use crate::collaborators::{
    AudioSink, CollaboratorFactory, Generator, Recognizer, RecognizerEvent, RecognizerEvents,
    Synthesizer, TextStream, Transport,
};
use crate::error::{
    GenerationError, RecognitionError, SessionError, SynthesisError, TransportError,
};
use crate::session::actor::SessionEvent;
use crate::session::history::ChatMessage;
use crate::session::SessionId;
use async_trait::async_trait;
use futures_util::StreamExt;
use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};
use tokio_stream::wrappers::UnboundedReceiverStream;

const WAIT_LIMIT: Duration = Duration::from_secs(2);

/// Poll `condition` until it holds, failing the test after two seconds.
pub async fn wait_until(condition: impl Fn() -> bool) {
    let polled = tokio::time::timeout(WAIT_LIMIT, async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await;
    assert!(polled.is_ok(), "condition not met within {:?}", WAIT_LIMIT);
}

/// Next event matching `wanted`, skipping everything else.
pub async fn next_event(
    events: &mut broadcast::Receiver<SessionEvent>,
    wanted: impl Fn(&SessionEvent) -> bool,
) -> SessionEvent {
    let found = tokio::time::timeout(WAIT_LIMIT, async {
        loop {
            match events.recv().await {
                Ok(event) if wanted(&event) => return event,
                Ok(_) => continue,
                Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => panic!("event channel closed"),
            }
        }
    })
    .await;
    match found {
        Ok(event) => event,
        Err(_) => panic!("expected event not seen within {:?}", WAIT_LIMIT),
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[derive(Default)]
pub struct RecordingTransport {
    sent: Mutex<Vec<PcmChunk>>,
    attempts: AtomicUsize,
    fail_attempts: HashSet<usize>,
    closed: AtomicBool,
    clears: AtomicUsize,
}

impl RecordingTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Fails the sends with these zero-based attempt numbers.
    pub fn failing_on(attempts: &[usize]) -> Arc<Self> {
        Arc::new(Self {
            fail_attempts: attempts.iter().copied().collect(),
            ..Self::default()
        })
    }

    pub fn sent(&self) -> Vec<PcmChunk> {
        lock(&self.sent).clone()
    }

    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }

    pub fn clears(&self) -> usize {
        self.clears.load(Ordering::SeqCst)
    }

    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl Transport for RecordingTransport {
    async fn send(&self, chunk: PcmChunk) -> Result<(), TransportError> {
        let attempt = self.attempts.fetch_add(1, Ordering::SeqCst);
        if self.is_closed() {
            return Err(TransportError::Closed);
        }
        if self.fail_attempts.contains(&attempt) {
            return Err(TransportError::Send("scripted failure".to_string()));
        }
        lock(&self.sent).push(chunk);
        Ok(())
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn clear(&self) {
        self.clears.fetch_add(1, Ordering::SeqCst);
    }
}

enum Script {
    Items(Vec<Result<String, GenerationError>>),
    Channel(mpsc::UnboundedReceiver<Result<String, GenerationError>>),
    OpenFailure(GenerationError),
}

/// Generator that replays one queued script per `stream` call.
/// An empty queue yields an empty response.
#[derive(Default)]
pub struct ScriptedGenerator {
    scripts: Mutex<VecDeque<Script>>,
    requests: Mutex<Vec<Vec<ChatMessage>>>,
}

impl ScriptedGenerator {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn push_increments(&self, increments: &[&str]) {
        self.push_items(increments.iter().map(|s| Ok(s.to_string())).collect());
    }

    pub fn push_items(&self, items: Vec<Result<String, GenerationError>>) {
        lock(&self.scripts).push_back(Script::Items(items));
    }

    /// Queue a stream the test feeds by hand. Dropping the sender ends it.
    pub fn push_channel(&self) -> mpsc::UnboundedSender<Result<String, GenerationError>> {
        let (tx, rx) = mpsc::unbounded_channel();
        lock(&self.scripts).push_back(Script::Channel(rx));
        tx
    }

    pub fn push_open_failure(&self, err: GenerationError) {
        lock(&self.scripts).push_back(Script::OpenFailure(err));
    }

    /// Every history snapshot the generator was called with.
    pub fn requests(&self) -> Vec<Vec<ChatMessage>> {
        lock(&self.requests).clone()
    }
}

#[async_trait]
impl Generator for ScriptedGenerator {
    async fn stream(&self, history: Vec<ChatMessage>) -> Result<TextStream, GenerationError> {
        lock(&self.requests).push(history);
        let script = lock(&self.scripts).pop_front();
        match script {
            None => Ok(futures_util::stream::empty().boxed()),
            Some(Script::Items(items)) => Ok(futures_util::stream::iter(items).boxed()),
            Some(Script::Channel(rx)) => Ok(UnboundedReceiverStream::new(rx).boxed()),
            Some(Script::OpenFailure(err)) => Err(err),
        }
    }
}

/// Emits the increment's bytes as audio. With more than one chunk per increment,
/// chunk `i` of increment `t` is `"t#i"`.
///
/// A lingering synthesizer also keeps a clone of the last sink it was given, the
/// way a streaming backend keeps delivering audio after `push_text` returns.
#[derive(Default)]
pub struct ChunkingSynthesizer {
    chunks_per_increment: usize,
    fail_on: Option<String>,
    linger: bool,
    held: Mutex<Option<AudioSink>>,
    pushed: Mutex<Vec<String>>,
}

impl ChunkingSynthesizer {
    pub fn new(chunks_per_increment: usize) -> Arc<Self> {
        Arc::new(Self {
            chunks_per_increment,
            ..Self::default()
        })
    }

    pub fn failing_on(increment: &str) -> Arc<Self> {
        Arc::new(Self {
            chunks_per_increment: 1,
            fail_on: Some(increment.to_string()),
            ..Self::default()
        })
    }

    pub fn lingering() -> Arc<Self> {
        Arc::new(Self {
            chunks_per_increment: 1,
            linger: true,
            ..Self::default()
        })
    }

    pub fn pushed(&self) -> Vec<String> {
        lock(&self.pushed).clone()
    }

    /// Emit through the held sink. `false` if there is none or the turn is over.
    pub fn emit_late(&self, chunk: &[u8]) -> bool {
        lock(&self.held)
            .as_ref()
            .map(|sink| sink.emit(chunk.to_vec()))
            .unwrap_or(false)
    }

    /// Drop the held sink so the turn's relay can finish.
    pub fn release(&self) {
        lock(&self.held).take();
    }
}

#[async_trait]
impl Synthesizer for ChunkingSynthesizer {
    async fn push_text(&self, increment: &str, sink: &AudioSink) -> Result<(), SynthesisError> {
        lock(&self.pushed).push(increment.to_string());
        if self.fail_on.as_deref() == Some(increment) {
            return Err(SynthesisError::Stream("scripted failure".to_string()));
        }
        if self.chunks_per_increment <= 1 {
            sink.emit(increment.as_bytes().to_vec());
        } else {
            for i in 0..self.chunks_per_increment {
                sink.emit(format!("{}#{}", increment, i).into_bytes());
            }
        }
        if self.linger {
            *lock(&self.held) = Some(sink.clone());
        }
        Ok(())
    }
}

/// Recognizer driven by the test through `emit_*`.
#[derive(Default)]
pub struct FakeRecognizer {
    events: Mutex<Option<RecognizerEvents>>,
    audio: Mutex<Vec<PcmChunk>>,
    stops: AtomicUsize,
    fail_start: bool,
}

impl FakeRecognizer {
    pub fn emit_partial(&self, text: &str) {
        self.emit(RecognizerEvent::Partial(text.to_string()));
    }

    pub fn emit_final(&self, text: &str) {
        self.emit(RecognizerEvent::Final(text.to_string()));
    }

    pub fn emit_error(&self, err: RecognitionError) {
        self.emit(RecognizerEvent::Error(err));
    }

    fn emit(&self, event: RecognizerEvent) {
        if let Some(events) = lock(&self.events).as_ref() {
            let _ = events.send(event);
        }
    }

    pub fn audio(&self) -> Vec<PcmChunk> {
        lock(&self.audio).clone()
    }

    pub fn stop_count(&self) -> usize {
        self.stops.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Recognizer for FakeRecognizer {
    async fn start(&self, events: RecognizerEvents) -> Result<(), RecognitionError> {
        if self.fail_start {
            return Err(RecognitionError::Connect("refused".to_string()));
        }
        *lock(&self.events) = Some(events);
        Ok(())
    }

    async fn send_audio(&self, chunk: PcmChunk) -> Result<(), RecognitionError> {
        lock(&self.audio).push(chunk);
        Ok(())
    }

    fn stop(&self) {
        self.stops.fetch_add(1, Ordering::SeqCst);
        lock(&self.events).take();
    }
}

/// Factory handing every session a fresh recognizer and the shared fakes.
pub struct FakeFactory {
    pub generator: Arc<ScriptedGenerator>,
    pub synthesizer: Arc<ChunkingSynthesizer>,
    recognizers: Mutex<Vec<Arc<FakeRecognizer>>>,
    fail_recognizer_start: AtomicBool,
}

impl FakeFactory {
    pub fn new() -> Arc<Self> {
        Self::with_synthesizer(ChunkingSynthesizer::new(1))
    }

    pub fn with_synthesizer(synthesizer: Arc<ChunkingSynthesizer>) -> Arc<Self> {
        Arc::new(Self {
            generator: ScriptedGenerator::new(),
            synthesizer,
            recognizers: Mutex::new(Vec::new()),
            fail_recognizer_start: AtomicBool::new(false),
        })
    }

    /// Recognizers built from now on refuse to start.
    pub fn fail_recognizer_start(&self) {
        self.fail_recognizer_start.store(true, Ordering::SeqCst);
    }

    /// The recognizer of the most recently created session.
    pub fn last_recognizer(&self) -> Arc<FakeRecognizer> {
        lock(&self.recognizers)
            .last()
            .cloned()
            .expect("no recognizer built yet")
    }

    pub fn recognizer_at(&self, index: usize) -> Arc<FakeRecognizer> {
        lock(&self.recognizers)[index].clone()
    }
}

impl CollaboratorFactory for FakeFactory {
    fn recognizer(&self, _session_id: &SessionId) -> Result<Arc<dyn Recognizer>, SessionError> {
        let recognizer = Arc::new(FakeRecognizer {
            fail_start: self.fail_recognizer_start.load(Ordering::SeqCst),
            ..FakeRecognizer::default()
        });
        lock(&self.recognizers).push(recognizer.clone());
        Ok(recognizer)
    }

    fn synthesizer(&self, _session_id: &SessionId) -> Result<Arc<dyn Synthesizer>, SessionError> {
        Ok(self.synthesizer.clone())
    }

    fn generator(&self) -> Arc<dyn Generator> {
        self.generator.clone()
    }
}
