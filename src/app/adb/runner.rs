use std::collections::HashMap;
use std::io::Read;
use std::process::{Command, Stdio};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError, Sender};
use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};

use tracing::{debug, warn};

use crate::app::logging::LogSink;

/// Exit code reported when the program could not be started at all.
pub const LAUNCH_FAILED_EXIT_CODE: i32 = -1;
/// Exit code reported when the process ended without one (killed by a signal).
pub const ABNORMAL_EXIT_CODE: i32 = -2;

// After the child exits, grandchildren (e.g. a forked adb server) may keep the
// pipes open. Drain for this long without new data, then complete anyway.
const EXIT_DRAIN_GRACE: Duration = Duration::from_millis(250);
const READ_BUFFER_SIZE: usize = 4096;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputChunk {
    pub seq: u64,
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Completion {
    pub seq: u64,
    pub code: i32,
    pub output: String,
}

impl Completion {
    pub fn succeeded(&self) -> bool {
        self.code == 0
    }
}

struct ActiveInvocation {
    command_line: String,
    started_at: Instant,
}

pub type OutputSubscriber = Arc<dyn Fn(&OutputChunk) + Send + Sync>;
pub type FinishedSubscriber = Arc<dyn Fn(&Completion) + Send + Sync>;
type CompletionCallback = Box<dyn FnOnce(i32, String) + Send>;

pub struct RunRequest {
    program: String,
    args: Vec<String>,
    callback: Option<CompletionCallback>,
    use_logging: bool,
}

impl RunRequest {
    pub fn new<I, S>(program: impl Into<String>, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            program: program.into(),
            args: args.into_iter().map(Into::into).collect(),
            callback: None,
            use_logging: true,
        }
    }

    /// Called exactly once with the exit code and the full captured output.
    pub fn on_finished<F>(mut self, callback: F) -> Self
    where
        F: FnOnce(i32, String) + Send + 'static,
    {
        self.callback = Some(Box::new(callback));
        self
    }

    pub fn use_logging(mut self, enabled: bool) -> Self {
        self.use_logging = enabled;
        self
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    pub fn args(&self) -> &[String] {
        &self.args
    }

    pub fn command_line(&self) -> String {
        if self.args.is_empty() {
            self.program.clone()
        } else {
            format!("{} {}", self.program, self.args.join(" "))
        }
    }
}

struct RunnerShared {
    sink: Option<Arc<dyn LogSink>>,
    logging_enabled: bool,
    issued: AtomicU64,
    active: Mutex<HashMap<u64, ActiveInvocation>>,
    idle: Condvar,
    output_subscribers: Mutex<Vec<OutputSubscriber>>,
    finished_subscribers: Mutex<Vec<FinishedSubscriber>>,
}

impl RunnerShared {
    fn output_subscribers(&self) -> Vec<OutputSubscriber> {
        match self.output_subscribers.lock() {
            Ok(guard) => guard.clone(),
            Err(_) => Vec::new(),
        }
    }

    fn finished_subscribers(&self) -> Vec<FinishedSubscriber> {
        match self.finished_subscribers.lock() {
            Ok(guard) => guard.clone(),
            Err(_) => Vec::new(),
        }
    }

    fn remove_active(&self, seq: u64) {
        let mut guard = match self.active.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if let Some(finished) = guard.remove(&seq) {
            debug!(
                seq,
                command = %finished.command_line,
                elapsed_ms = finished.started_at.elapsed().as_millis() as u64,
                "invocation left the active set"
            );
        }
        if guard.is_empty() {
            self.idle.notify_all();
        }
    }
}

/// Launches external programs without blocking the caller and reports each
/// one's output and exit status through callbacks.
///
/// Clones share the same sequence counter, active set and subscribers.
#[derive(Clone)]
pub struct ProcessRunner {
    shared: Arc<RunnerShared>,
}

impl ProcessRunner {
    pub fn new(sink: Option<Arc<dyn LogSink>>) -> Self {
        Self::with_logging(sink, true)
    }

    pub fn with_logging(sink: Option<Arc<dyn LogSink>>, logging_enabled: bool) -> Self {
        Self {
            shared: Arc::new(RunnerShared {
                sink,
                logging_enabled,
                issued: AtomicU64::new(0),
                active: Mutex::new(HashMap::new()),
                idle: Condvar::new(),
                output_subscribers: Mutex::new(Vec::new()),
                finished_subscribers: Mutex::new(Vec::new()),
            }),
        }
    }

    pub fn subscribe_output<F>(&self, subscriber: F)
    where
        F: Fn(&OutputChunk) + Send + Sync + 'static,
    {
        if let Ok(mut guard) = self.shared.output_subscribers.lock() {
            guard.push(Arc::new(subscriber));
        }
    }

    pub fn subscribe_finished<F>(&self, subscriber: F)
    where
        F: Fn(&Completion) + Send + Sync + 'static,
    {
        if let Ok(mut guard) = self.shared.finished_subscribers.lock() {
            guard.push(Arc::new(subscriber));
        }
    }

    /// Number of invocations issued so far; also the last tag handed out.
    pub fn issued(&self) -> u64 {
        self.shared.issued.load(Ordering::SeqCst)
    }

    pub fn active_count(&self) -> usize {
        self.shared
            .active
            .lock()
            .map(|guard| guard.len())
            .unwrap_or(0)
    }

    /// Blocks until no invocation is in flight. Invocations started from a
    /// completion callback are registered before the parent leaves the set,
    /// so chained runs are waited for as well.
    pub fn wait_idle(&self) {
        let mut guard = match self.shared.active.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        while !guard.is_empty() {
            guard = match self.shared.idle.wait(guard) {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
        }
    }

    /// Starts `request` on a background thread and returns its sequence
    /// number. The completion callback fires exactly once, including when the
    /// program cannot be started (`LAUNCH_FAILED_EXIT_CODE`).
    pub fn run(&self, request: RunRequest) -> u64 {
        let seq = self.shared.issued.fetch_add(1, Ordering::SeqCst) + 1;
        let tag = format!("[{seq}]");
        let command_line = request.command_line();
        let logging = request.use_logging && self.shared.logging_enabled;

        if let Ok(mut guard) = self.shared.active.lock() {
            guard.insert(
                seq,
                ActiveInvocation {
                    command_line: command_line.clone(),
                    started_at: Instant::now(),
                },
            );
        }

        let sink = if logging {
            self.shared.sink.clone()
        } else {
            None
        };
        if let Some(sink) = sink.as_ref() {
            sink.info(&tag, &command_line);
        }

        let invocation = Invocation {
            seq,
            tag,
            command_line,
            program: request.program,
            args: request.args,
            callback: request.callback,
            sink,
            output: String::new(),
        };
        let shared = Arc::clone(&self.shared);
        std::thread::spawn(move || invocation.drive(shared));
        seq
    }
}

enum RunnerEvent {
    Output(String),
    StreamClosed,
    Exited(i32),
}

struct ActiveGuard {
    shared: Arc<RunnerShared>,
    seq: u64,
}

impl Drop for ActiveGuard {
    fn drop(&mut self) {
        self.shared.remove_active(self.seq);
    }
}

struct Invocation {
    seq: u64,
    tag: String,
    command_line: String,
    program: String,
    args: Vec<String>,
    callback: Option<CompletionCallback>,
    sink: Option<Arc<dyn LogSink>>,
    output: String,
}

impl Invocation {
    fn drive(mut self, shared: Arc<RunnerShared>) {
        let guard = ActiveGuard {
            shared: Arc::clone(&shared),
            seq: self.seq,
        };

        let code = self.execute(&shared);
        let output = std::mem::take(&mut self.output);

        if let Some(callback) = self.callback.take() {
            callback(code, output.clone());
        }
        let completion = Completion {
            seq: self.seq,
            code,
            output,
        };
        for subscriber in shared.finished_subscribers() {
            subscriber(&completion);
        }

        if let Some(sink) = self.sink.as_ref() {
            let message = format!("{} exited with code {code}", self.command_line);
            if code == 0 {
                sink.success(&self.tag, &message);
            } else {
                sink.error(&self.tag, &message);
            }
        }
        drop(guard);
    }

    fn execute(&mut self, shared: &RunnerShared) -> i32 {
        let mut child = match Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
        {
            Ok(child) => child,
            Err(err) => {
                warn!(seq = self.seq, program = %self.program, error = %err, "failed to start process");
                let message = format!("failed to start {}: {err}", self.program);
                self.deliver(shared, message);
                return LAUNCH_FAILED_EXIT_CODE;
            }
        };

        let (tx, rx) = mpsc::channel::<RunnerEvent>();
        let mut open_streams = 0usize;
        if let Some(stdout) = child.stdout.take() {
            spawn_reader(stdout, tx.clone(), self.seq, "stdout");
            open_streams += 1;
        }
        if let Some(stderr) = child.stderr.take() {
            spawn_reader(stderr, tx.clone(), self.seq, "stderr");
            open_streams += 1;
        }

        let seq = self.seq;
        std::thread::spawn(move || {
            let code = match child.wait() {
                Ok(status) => status.code().unwrap_or(ABNORMAL_EXIT_CODE),
                Err(err) => {
                    warn!(seq, error = %err, "failed to wait for process");
                    ABNORMAL_EXIT_CODE
                }
            };
            let _ = tx.send(RunnerEvent::Exited(code));
        });

        let mut exit_code = None;
        loop {
            if let Some(code) = exit_code {
                if open_streams == 0 {
                    return code;
                }
            }
            let event = if exit_code.is_some() {
                match rx.recv_timeout(EXIT_DRAIN_GRACE) {
                    Ok(event) => event,
                    Err(RecvTimeoutError::Timeout) => {
                        warn!(seq, "process exited but its output pipes are still open");
                        return exit_code.unwrap_or(ABNORMAL_EXIT_CODE);
                    }
                    Err(RecvTimeoutError::Disconnected) => {
                        return exit_code.unwrap_or(ABNORMAL_EXIT_CODE)
                    }
                }
            } else {
                match rx.recv() {
                    Ok(event) => event,
                    Err(_) => return ABNORMAL_EXIT_CODE,
                }
            };
            match event {
                RunnerEvent::Output(text) => self.deliver(shared, text),
                RunnerEvent::StreamClosed => open_streams = open_streams.saturating_sub(1),
                RunnerEvent::Exited(code) => exit_code = Some(code),
            }
        }
    }

    fn deliver(&mut self, shared: &RunnerShared, text: String) {
        if text.is_empty() {
            return;
        }
        self.output.push_str(&text);
        let chunk = OutputChunk {
            seq: self.seq,
            text,
        };
        for subscriber in shared.output_subscribers() {
            subscriber(&chunk);
        }
        if let Some(sink) = self.sink.as_ref() {
            sink.debug(&self.tag, &chunk.text);
        }
    }
}

fn spawn_reader<R>(mut reader: R, tx: Sender<RunnerEvent>, seq: u64, stream: &'static str)
where
    R: Read + Send + 'static,
{
    std::thread::spawn(move || {
        let mut temp = [0u8; READ_BUFFER_SIZE];
        let mut pending = Vec::<u8>::new();
        loop {
            let count = match reader.read(&mut temp) {
                Ok(0) => break,
                Ok(count) => count,
                Err(err) if err.kind() == std::io::ErrorKind::Interrupted => continue,
                Err(err) => {
                    warn!(seq, stream, error = %err, "failed to read process output");
                    break;
                }
            };
            pending.extend_from_slice(&temp[..count]);
            let keep = incomplete_utf8_suffix(&pending);
            let tail = pending.split_off(pending.len() - keep);
            let text = String::from_utf8_lossy(&pending).into_owned();
            pending = tail;
            if !text.is_empty() && tx.send(RunnerEvent::Output(text)).is_err() {
                return;
            }
        }
        if !pending.is_empty() {
            let text = String::from_utf8_lossy(&pending).into_owned();
            let _ = tx.send(RunnerEvent::Output(text));
        }
        let _ = tx.send(RunnerEvent::StreamClosed);
    });
}

/// Length of a trailing, not yet complete UTF-8 sequence in `bytes`.
fn incomplete_utf8_suffix(bytes: &[u8]) -> usize {
    for back in 1..=bytes.len().min(3) {
        let byte = bytes[bytes.len() - back];
        if byte & 0b1100_0000 == 0b1000_0000 {
            continue;
        }
        let width = match byte {
            0xF0..=0xFF => 4,
            0xE0..=0xEF => 3,
            0xC0..=0xDF => 2,
            _ => 1,
        };
        return if width > back { back } else { 0 };
    }
    0
}
