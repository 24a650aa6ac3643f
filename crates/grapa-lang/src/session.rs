use std::{
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    thread::{self, JoinHandle},
    time::Duration,
};

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, bounded, unbounded};
use tracing::{debug, error, warn};

use crate::{
    Engine, Node,
    error::{Error, InnerError},
    lexer::{Lexer, Lexicon, SharedLexicon, read_lexicon},
    segment::{Segment, Segmenter},
};

const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Work run on the executor thread between two segments.
type Request = Box<dyn FnOnce(&mut Engine) + Send>;

/// Output of an [`AsyncSession`].
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    /// Value of an executed segment.
    Result(Node),
    /// The executor is idle and waiting for input.
    Prompt,
    Exited,
    Failed(String),
}

/// Input of an [`AsyncSession`].
#[derive(Debug, Clone, PartialEq)]
pub enum Input {
    Text(Vec<u8>),
    /// End of input: flush partial tokens and the pending statement.
    Finish,
    /// Drops buffered input and any unterminated statement.
    Clear,
}

/// Where a finished segment's value goes.
pub(crate) enum Completion<'a> {
    Inline(&'a mut Vec<Node>),
    Channel(&'a Sender<SessionEvent>),
}

impl Completion<'_> {
    fn complete(&mut self, value: Node) {
        match self {
            Completion::Inline(results) => results.push(value),
            Completion::Channel(events) => {
                if events.send(SessionEvent::Result(value)).is_err() {
                    debug!("session event receiver dropped");
                }
            }
        }
    }
}

/// Runs one segment. Returns `false` once the session is done.
pub(crate) fn dispatch(
    engine: &mut Engine,
    segment: Segment,
    completion: &mut Completion<'_>,
) -> Result<bool, InnerError> {
    match segment {
        Segment::Exit => {
            engine.exited = true;
            Ok(false)
        }
        Segment::Execute(tokens) => {
            let value = engine.execute_tokens(&tokens)?;
            completion.complete(value);
            Ok(!engine.exited)
        }
    }
}

/// Pulls every token the lexer can produce and runs the segments they
/// complete. With `finish`, whatever is still buffered runs as well.
pub(crate) fn drain(
    engine: &mut Engine,
    lexer: &mut Lexer,
    segmenter: &mut Segmenter,
    finish: bool,
    completion: &mut Completion<'_>,
) -> Result<bool, InnerError> {
    while let Some(token) = lexer.next_token() {
        if let Some(segment) = segmenter.push(token)
            && !dispatch(engine, segment, completion)?
        {
            return Ok(false);
        }
        if engine.stop.load(Ordering::Relaxed) {
            return Ok(false);
        }
    }

    for e in lexer.take_errors() {
        warn!(error = %e, offset = e.offset(), "lexer");
    }

    if !finish {
        return Ok(true);
    }
    match segmenter.finish() {
        Some(segment) => dispatch(engine, segment, completion),
        None => Ok(true),
    }
}

/// Synchronous session: input is fed in chunks and statements run on the
/// caller's thread as soon as they are complete.
pub struct Session {
    engine: Engine,
    lexer: Lexer,
    segmenter: Segmenter,
}

impl Default for Session {
    fn default() -> Self {
        Self::new(Engine::default())
    }
}

impl Session {
    pub fn new(engine: Engine) -> Self {
        let lexer = Lexer::new(Arc::clone(&engine.lexicon));
        Self {
            engine,
            lexer,
            segmenter: Segmenter::new(false),
        }
    }

    /// Feeds a chunk, returning the values of the segments it completed.
    #[allow(clippy::result_large_err)]
    pub fn feed(&mut self, bytes: &[u8]) -> Result<Vec<Node>, Error> {
        self.lexer.feed(bytes);
        self.run(false)
            .map_err(|e| Error::from_error(&String::from_utf8_lossy(bytes), e))
    }

    /// Ends the input and runs whatever is still pending.
    #[allow(clippy::result_large_err)]
    pub fn finish(&mut self) -> Result<Vec<Node>, Error> {
        self.lexer.finish();
        let result = self.run(true);
        self.lexer.clear();
        result.map_err(Error::detached)
    }

    /// Feeds a complete text and returns the value of its last segment.
    #[allow(clippy::result_large_err)]
    pub fn eval(&mut self, code: &str) -> Result<Node, Error> {
        let mut results = self.feed(code.as_bytes())?;
        results.extend(self.finish()?);
        Ok(results.pop().unwrap_or_default())
    }

    fn run(&mut self, finish: bool) -> Result<Vec<Node>, InnerError> {
        let mut results = Vec::new();
        drain(
            &mut self.engine,
            &mut self.lexer,
            &mut self.segmenter,
            finish,
            &mut Completion::Inline(&mut results),
        )?;
        Ok(results)
    }

    pub fn last(&self) -> &Node {
        self.engine.last()
    }

    /// Drops pending input and all variables.
    pub fn clear(&mut self) {
        self.lexer.clear();
        self.segmenter.clear();
        self.engine.clear();
    }

    /// True while a `start`..`end` block is open.
    pub fn in_block(&self) -> bool {
        self.segmenter.in_block()
    }

    pub fn is_exited(&self) -> bool {
        self.engine.exited()
    }

    pub fn engine(&self) -> &Engine {
        &self.engine
    }

    pub fn engine_mut(&mut self) -> &mut Engine {
        &mut self.engine
    }

    pub fn into_engine(self) -> Engine {
        self.engine
    }
}

/// Session that lexes on one thread and executes on another.
///
/// The lexer thread waits for the executor to acknowledge each segment
/// before reading on, so token and rule changes made by a statement apply
/// to the input that follows it.
pub struct AsyncSession {
    input: Option<Sender<Input>>,
    requests: Sender<Request>,
    events: Receiver<SessionEvent>,
    lexicon: SharedLexicon,
    stop: Arc<AtomicBool>,
    lexer_thread: Option<JoinHandle<()>>,
    executor_thread: Option<JoinHandle<Engine>>,
}

impl AsyncSession {
    pub fn spawn(engine: Engine) -> Self {
        let (input_tx, input_rx) = unbounded::<Input>();
        let (segment_tx, segment_rx) = unbounded::<Segment>();
        let (ack_tx, ack_rx) = unbounded::<bool>();
        let (event_tx, event_rx) = unbounded::<SessionEvent>();
        let (request_tx, request_rx) = unbounded::<Request>();
        let stop = engine.stop_flag();

        let lexicon = Arc::clone(&engine.lexicon);
        let lexer = Lexer::new(Arc::clone(&lexicon));
        let lexer_stop = Arc::clone(&stop);
        let lexer_thread = thread::spawn(move || {
            lex_loop(lexer, input_rx, segment_tx, ack_rx, lexer_stop);
        });

        let executor_stop = Arc::clone(&stop);
        let executor_thread = thread::spawn(move || {
            execute_loop(engine, segment_rx, request_rx, ack_tx, event_tx, executor_stop)
        });

        Self {
            input: Some(input_tx),
            requests: request_tx,
            events: event_rx,
            lexicon,
            stop,
            lexer_thread: Some(lexer_thread),
            executor_thread: Some(executor_thread),
        }
    }

    pub fn send(&self, text: &str) {
        self.send_input(Input::Text(text.as_bytes().to_vec()));
    }

    pub fn send_input(&self, input: Input) {
        if let Some(sender) = &self.input
            && sender.send(input).is_err()
        {
            debug!("session input closed");
        }
    }

    pub fn finish(&self) {
        self.send_input(Input::Finish);
    }

    pub fn clear(&self) {
        self.send_input(Input::Clear);
    }

    /// Snapshot of the token tables the lexer thread reads.
    pub fn lexicon(&self) -> Lexicon {
        read_lexicon(&self.lexicon).clone()
    }

    /// Runs `f` against the executor's engine and waits for its result.
    /// Returns `None` once the executor has stopped.
    pub fn inspect<R, F>(&self, f: F) -> Option<R>
    where
        F: FnOnce(&mut Engine) -> R + Send + 'static,
        R: Send + 'static,
    {
        let (reply_tx, reply_rx) = bounded(1);
        let request: Request = Box::new(move |engine| {
            if reply_tx.send(f(engine)).is_err() {
                debug!("inspect caller went away");
            }
        });
        self.requests.send(request).ok()?;
        reply_rx.recv().ok()
    }

    pub fn events(&self) -> &Receiver<SessionEvent> {
        &self.events
    }

    pub fn recv_timeout(&self, timeout: Duration) -> Option<SessionEvent> {
        self.events.recv_timeout(timeout).ok()
    }

    /// Asks both threads to stop; a running loop fails with `Stopped`.
    pub fn stop(&self) {
        self.stop.store(true, Ordering::Relaxed);
    }

    pub fn is_stopped(&self) -> bool {
        self.stop.load(Ordering::Relaxed)
    }

    /// Closes the input, waits for pending work and returns the engine.
    pub fn join(mut self) -> Option<Engine> {
        self.shutdown()
    }

    fn shutdown(&mut self) -> Option<Engine> {
        self.input.take();
        if let Some(handle) = self.lexer_thread.take()
            && handle.join().is_err()
        {
            error!("lexer thread panicked");
        }
        match self.executor_thread.take().map(JoinHandle::join) {
            Some(Ok(engine)) => Some(engine),
            Some(Err(_)) => {
                error!("executor thread panicked");
                None
            }
            None => None,
        }
    }
}

impl Drop for AsyncSession {
    fn drop(&mut self) {
        if self.executor_thread.is_some() {
            self.stop();
            self.shutdown();
        }
    }
}

fn lex_loop(
    mut lexer: Lexer,
    input: Receiver<Input>,
    segments: Sender<Segment>,
    acks: Receiver<bool>,
    stop: Arc<AtomicBool>,
) {
    let mut segmenter = Segmenter::new(true);

    // hands a segment over and waits until it ran
    let submit = |segment: Segment| -> bool {
        segments.send(segment).is_ok() && acks.recv().unwrap_or(false)
    };

    let mut closed = false;
    while !closed && !stop.load(Ordering::Relaxed) {
        let finish = match input.recv_timeout(POLL_INTERVAL) {
            Ok(Input::Text(bytes)) => {
                lexer.feed(&bytes);
                false
            }
            Ok(Input::Finish) => {
                lexer.finish();
                true
            }
            Ok(Input::Clear) => {
                lexer.clear();
                segmenter.clear();
                continue;
            }
            Err(RecvTimeoutError::Timeout) => continue,
            Err(RecvTimeoutError::Disconnected) => {
                closed = true;
                lexer.finish();
                true
            }
        };

        let mut running = true;
        while running && let Some(token) = lexer.next_token() {
            if let Some(segment) = segmenter.push(token) {
                running = submit(segment);
            }
        }
        for e in lexer.take_errors() {
            warn!(error = %e, offset = e.offset(), "lexer");
        }
        if running && finish {
            if let Some(segment) = segmenter.finish() {
                running = submit(segment);
            }
            lexer.clear();
        }

        if !running {
            break;
        }
    }
}

fn execute_loop(
    mut engine: Engine,
    segments: Receiver<Segment>,
    requests: Receiver<Request>,
    acks: Sender<bool>,
    events: Sender<SessionEvent>,
    stop: Arc<AtomicBool>,
) -> Engine {
    let emit = |event: SessionEvent| {
        if events.send(event).is_err() {
            debug!("session event receiver dropped");
        }
    };

    while !stop.load(Ordering::Relaxed) {
        while let Ok(request) = requests.try_recv() {
            request(&mut engine);
        }

        let segment = match segments.recv_timeout(POLL_INTERVAL) {
            Ok(segment) => segment,
            Err(RecvTimeoutError::Timeout) => continue,
            Err(RecvTimeoutError::Disconnected) => break,
        };

        let running = match dispatch(&mut engine, segment, &mut Completion::Channel(&events)) {
            Ok(running) => running,
            Err(e) => {
                error!(error = %e, "segment failed");
                emit(SessionEvent::Failed(e.to_string()));
                true
            }
        };

        if running {
            emit(SessionEvent::Prompt);
        } else {
            emit(SessionEvent::Exited);
        }
        if acks.send(running).is_err() || !running {
            break;
        }
    }

    engine
}
