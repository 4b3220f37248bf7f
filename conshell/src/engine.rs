//! # Execution Engine
//!
//! The engine owns the registry and drives every run from request to cleanup:
//!
//! ```text
//! Validating -> Registered -> Spawning -> Running -> {Exited | TimedOut | Cancelled | LaunchFailed} -> Cleaned up
//! ```
//!
//! [`Engine::execute`] validates the request, reserves an ID, announces it and returns at
//! once. Everything else happens on a spawned task per process: the command line is
//! assembled, the shell is launched with stdout and stderr sharing one pipe, the pipe is
//! drained through a [`StreamDecoder`], and the exit is reported.
//!
//! Stop requests, timeouts and shutdown all cancel the process's token. The task checks it
//! right after spawning and races it against every read, so abandoned output is never
//! drained. Whoever removes the registry entry first owns the single terminal
//! notification; the stdin pipe and the log file are closed exactly once on every path.

use crate::{
    config::EngineConfig,
    decoder::{Decoded, StreamDecoder},
    environment::{
        DEFAULT_PROFILE, EnvironmentAssembly, MemoryProfileStore, ProfileStore, assemble_environment,
        is_default_profile,
    },
    error::{EngineError, ValidationError},
    messages::{MessageCatalog, Severity, Translate},
    platform::{PlatformCapabilities, ProcessTable},
    process_log::ProcessLog,
    quoting::build_command_line,
    registry::{ManagedProcess, ProcessRegistry},
    sink::OutputSink,
    stats::{ResourceSample, StatsCollector},
};
use serde::Serialize;
use std::{
    io::Read,
    path::PathBuf,
    process::Stdio,
    sync::{Arc, Mutex},
    time::{Duration, SystemTime},
};
use tokio::{process::Child, sync::mpsc, task::JoinHandle};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// How long shutdown waits for process tasks to wind down before aborting them.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(2);

/// Output chunks buffered between the pipe reader and the decoder.
const CHUNK_QUEUE: usize = 32;

/// A request to run one command.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EngineRequest {
    /// Already word-split command tokens.
    pub tokens: Vec<String>,
    pub working_dir: Option<PathBuf>,
    /// Environment profile name; `None` means the default profile.
    pub profile: Option<String>,
    /// Overrides the configured default timeout. Zero disables the timeout.
    pub timeout: Option<Duration>,
}

impl EngineRequest {
    pub fn new<S: Into<String>>(tokens: impl IntoIterator<Item = S>) -> Self {
        Self {
            tokens: tokens.into_iter().map(Into::into).collect(),
            ..Self::default()
        }
    }

    pub fn working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    pub fn profile(mut self, name: impl Into<String>) -> Self {
        self.profile = Some(name.into());
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

/// Structured view of one tracked process for the listing.
#[derive(Debug, Clone, Serialize)]
pub struct ProcessSummary {
    pub id: u32,
    pub command: String,
    #[serde(serialize_with = "crate::utils::time::serialize")]
    pub started_at: SystemTime,
    pub uptime_secs: u64,
    /// Registered but not yet spawned.
    pub starting: bool,
    pub pid: Option<u32>,
    /// Present only while the OS process is alive.
    pub stats: Option<ResourceSample>,
}

/// How a process task ended.
#[derive(Debug)]
enum Outcome {
    Exited(Option<i32>),
    /// Stop, timeout or shutdown took over; they report for themselves.
    Abandoned,
    ControlByte(u8),
    Failed(EngineError),
}

struct EngineInner {
    config: EngineConfig,
    registry: ProcessRegistry,
    sink: Arc<dyn OutputSink>,
    messages: Arc<dyn Translate>,
    profiles: Arc<dyn ProfileStore>,
    platform: PlatformCapabilities,
    stats: StatsCollector,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

/// Configures the collaborators of an [`Engine`].
pub struct EngineBuilder {
    config: EngineConfig,
    sink: Arc<dyn OutputSink>,
    messages: Arc<dyn Translate>,
    profiles: Arc<dyn ProfileStore>,
    platform: Option<PlatformCapabilities>,
}

impl EngineBuilder {
    pub fn messages(mut self, messages: Arc<dyn Translate>) -> Self {
        self.messages = messages;
        self
    }

    pub fn profiles(mut self, profiles: Arc<dyn ProfileStore>) -> Self {
        self.profiles = profiles;
        self
    }

    pub fn platform(mut self, platform: PlatformCapabilities) -> Self {
        self.platform = Some(platform);
        self
    }

    pub fn build(self) -> Engine {
        let platform = self
            .platform
            .unwrap_or_else(|| PlatformCapabilities::native(self.config.stats_cache_window()));
        let stats = StatsCollector::new(Arc::clone(&platform.memory));
        Engine {
            inner: Arc::new(EngineInner {
                config: self.config,
                registry: ProcessRegistry::new(),
                sink: self.sink,
                messages: self.messages,
                profiles: self.profiles,
                platform,
                stats,
                tasks: Mutex::new(Vec::new()),
            }),
        }
    }
}

/// Handle to the execution engine. Cheap to clone.
#[derive(Clone)]
pub struct Engine {
    inner: Arc<EngineInner>,
}

impl Engine {
    /// An engine with the built-in messages, no stored profiles and native platform support.
    pub fn new(config: EngineConfig, sink: Arc<dyn OutputSink>) -> Self {
        Self::builder(config, sink).build()
    }

    pub fn builder(config: EngineConfig, sink: Arc<dyn OutputSink>) -> EngineBuilder {
        EngineBuilder {
            config,
            sink,
            messages: Arc::new(MessageCatalog::default()),
            profiles: Arc::new(MemoryProfileStore::default()),
            platform: None,
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.inner.config
    }

    pub fn messages(&self) -> &dyn Translate {
        self.inner.messages.as_ref()
    }

    /// Sends a pre-rendered line to the output sink.
    pub fn emit(&self, line: String) {
        self.inner.sink.send(line);
    }

    /// Sends one notification line to the output sink.
    pub fn report(&self, severity: Severity, key: &str, placeholders: &[(&str, String)]) {
        self.inner.report(severity, key, placeholders);
    }

    /// Starts a command and returns its ID as soon as it is registered.
    ///
    /// Validation failures are returned before any ID is reserved. Launch and stream
    /// failures happen later and are reported through the output sink.
    pub async fn execute(&self, request: EngineRequest) -> Result<u32, EngineError> {
        let inner = &self.inner;
        if request.tokens.is_empty() {
            return Err(ValidationError::EmptyCommand.into());
        }
        if let Some(dir) = &request.working_dir
            && !dir.is_dir()
        {
            return Err(ValidationError::WorkingDirectory(dir.clone()).into());
        }

        let assembly = inner.resolve_profile(request.profile.as_deref());
        let command_text = build_command_line(&request.tokens, inner.platform.launcher.family());

        let process = inner.registry.reserve(command_text).await;
        let id = process.id();
        inner.report(Severity::Info, "process-starting", &[("id", id.to_string())]);
        info!("Process {} registered: {}", id, process.command_text());

        if inner.config.enable_process_logging {
            match ProcessLog::create(
                &inner.config.process_log_dir,
                id,
                process.command_text(),
                process.started_at(),
            ) {
                Ok(log) => {
                    debug!("Process {} logging to {}", id, log.path().display());
                    process.set_log(log);
                }
                Err(e) => warn!("Process {} log could not be created: {}", id, e),
            }
        }

        let timeout = inner.config.effective_timeout(request.timeout);
        let task = tokio::spawn(run_process(
            Arc::clone(inner),
            process,
            assembly,
            request.working_dir,
            timeout,
        ));
        inner.track(task);
        Ok(id)
    }

    /// Kills a process and all of its descendants. Returns whether the ID was tracked.
    pub async fn stop(&self, id: u32) -> bool {
        let inner = &self.inner;
        let Some(process) = inner.registry.remove(id).await else {
            inner.report(Severity::Error, "process-not-found", &[("id", id.to_string())]);
            return false;
        };
        process.cancel();
        if let Some(pid) = process.pid() {
            inner.kill_tree(pid).await;
        }
        process.close_io().await;
        info!("Process {} stopped by operator", id);
        inner.report(Severity::Warn, "process-stopped", &[("id", id.to_string())]);
        true
    }

    /// Writes `text` and a newline to the process's input.
    pub async fn send_input(&self, id: u32, text: &str) -> Result<(), EngineError> {
        let process = self
            .inner
            .registry
            .get(id)
            .await
            .ok_or(EngineError::NotFound(id))?;
        if process.is_starting() {
            return Err(EngineError::NotReady(id));
        }
        match process.write_input(text).await {
            Ok(true) => Ok(()),
            Ok(false) => Err(EngineError::NotInteractable(id)),
            Err(e) => {
                debug!("Process {} input write failed: {}", id, e);
                Err(EngineError::NotInteractable(id))
            }
        }
    }

    /// Structured listing of every tracked process, sampling stats for live ones.
    pub async fn snapshot(&self) -> Vec<ProcessSummary> {
        let processes = self.inner.registry.list_all().await;
        if processes.is_empty() {
            return Vec::new();
        }
        let stats = self.inner.stats.clone();
        let sampled = Arc::new(processes);
        let for_table = Arc::clone(&sampled);
        let result = tokio::task::spawn_blocking(move || {
            let table = ProcessTable::snapshot();
            for_table
                .iter()
                .map(|process| summarize(process, stats.sample(&table, process)))
                .collect::<Vec<_>>()
        })
        .await;
        match result {
            Ok(summaries) => summaries,
            Err(e) => {
                warn!("Process sampling failed: {}", e);
                sampled.iter().map(|process| summarize(process, None)).collect()
            }
        }
    }

    /// The operator listing: a header and one line per process, or a single "empty" line.
    pub async fn list(&self) -> Vec<String> {
        let summaries = self.snapshot().await;
        let messages = &self.inner.messages;
        if summaries.is_empty() {
            return vec![messages.notification(Severity::Warn, "list-empty", &[])];
        }
        let mut lines = Vec::with_capacity(summaries.len() + 1);
        lines.push(messages.notification(Severity::Info, "list-header", &[]));
        for summary in summaries {
            let status = if summary.starting {
                messages.translate("list-starting", &[])
            } else {
                String::new()
            };
            let stats = summary
                .stats
                .map(|sample| {
                    messages.translate(
                        "process-stats",
                        &[("mem", sample.memory), ("cpu", sample.cpu)],
                    )
                })
                .unwrap_or_default();
            lines.push(format!(
                "§f[{}] {}§a{} §7({}s) {}",
                summary.id, status, summary.command, summary.uptime_secs, stats
            ));
        }
        lines
    }

    /// IDs currently tracked, in ascending order.
    pub async fn active_ids(&self) -> Vec<u32> {
        self.inner
            .registry
            .list_all()
            .await
            .iter()
            .map(|process| process.id())
            .collect()
    }

    /// Kills every tracked process tree, closes all pipes and logs, and clears the registry.
    pub async fn shutdown(&self) {
        let inner = &self.inner;
        let processes = inner.registry.drain().await;
        if !processes.is_empty() {
            info!("Stopping {} active processes", processes.len());
        }
        for process in &processes {
            process.cancel();
        }
        let pids: Vec<u32> = processes.iter().filter_map(|p| p.pid()).collect();
        if !pids.is_empty() {
            let killed = tokio::task::spawn_blocking(move || {
                let table = ProcessTable::snapshot();
                pids.iter().map(|pid| table.terminate_tree(*pid)).sum::<usize>()
            })
            .await;
            match killed {
                Ok(count) => debug!("Shutdown delivered {} kill signals", count),
                Err(e) => warn!("Shutdown kill pass failed: {}", e),
            }
        }
        for process in &processes {
            process.close_io().await;
        }

        let tasks = std::mem::take(&mut *inner.lock_tasks());
        let deadline = tokio::time::Instant::now() + SHUTDOWN_GRACE;
        for mut task in tasks {
            if tokio::time::timeout_at(deadline, &mut task).await.is_err() {
                warn!("Process task did not finish in time, aborting");
                task.abort();
            }
        }
    }
}

fn summarize(process: &ManagedProcess, stats: Option<ResourceSample>) -> ProcessSummary {
    ProcessSummary {
        id: process.id(),
        command: process.command_text().to_string(),
        started_at: process.started_at(),
        uptime_secs: process.uptime().as_secs(),
        starting: process.is_starting(),
        pid: process.pid(),
        stats,
    }
}

impl EngineInner {
    fn report(&self, severity: Severity, key: &str, placeholders: &[(&str, String)]) {
        self.sink
            .send(self.messages.notification(severity, key, placeholders));
    }

    fn lock_tasks(&self) -> std::sync::MutexGuard<'_, Vec<JoinHandle<()>>> {
        self.tasks
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn track(&self, task: JoinHandle<()>) {
        let mut tasks = self.lock_tasks();
        tasks.retain(|task| !task.is_finished());
        tasks.push(task);
    }

    /// Loads the named profile, falling back to the default one with a warning.
    fn resolve_profile(&self, name: Option<&str>) -> EnvironmentAssembly {
        let name = name
            .filter(|name| !is_default_profile(name))
            .unwrap_or(DEFAULT_PROFILE);
        let profiles = self.profiles.load();
        match profiles.get(name) {
            Some(lines) => assemble_environment(lines),
            None => {
                self.report(Severity::Warn, "env-fallback", &[("name", name.to_string())]);
                profiles
                    .get(DEFAULT_PROFILE)
                    .map(|lines| assemble_environment(lines))
                    .unwrap_or_default()
            }
        }
    }

    async fn kill_tree(&self, pid: u32) {
        match tokio::task::spawn_blocking(move || ProcessTable::snapshot().terminate_tree(pid)).await
        {
            Ok(count) => debug!("Delivered {} kill signals to tree of pid {}", count, pid),
            Err(e) => warn!("Killing tree of pid {} failed: {}", pid, e),
        }
    }

    /// Sends one decoded unit to the sink and the process log.
    fn dispatch(&self, process: &ManagedProcess, decoded: Decoded, control: &mut Option<u8>) {
        let text = match decoded {
            Decoded::Line(text) => text,
            Decoded::Truncated => self.messages.translate("line-truncated", &[]),
            Decoded::ControlByte(byte) => {
                *control = Some(byte);
                return;
            }
        };
        self.sink.send(format!(
            "{}[{}]§r {}",
            self.config.id_prefix,
            process.id(),
            text
        ));
        process.append_log(&text);
    }

    /// Reports how a task ended, if it still owns the registry entry, then closes its I/O.
    async fn finish(&self, process: &Arc<ManagedProcess>, outcome: Outcome) {
        let id = process.id();
        match outcome {
            Outcome::Abandoned => debug!("Process {} abandoned", id),
            Outcome::Exited(code) => {
                let code = code.unwrap_or(-1);
                info!("Process {} exited with code {}", id, code);
                if self.registry.remove_entry(process).await {
                    self.report(
                        Severity::Warn,
                        "process-exited",
                        &[("id", id.to_string()), ("code", code.to_string())],
                    );
                }
            }
            Outcome::ControlByte(byte) => {
                warn!("Process {} terminated for control byte 0x{:02x}", id, byte);
                if self.registry.remove_entry(process).await {
                    let reason = self
                        .messages
                        .translate("control-byte", &[("byte", format!("{byte:02x}"))]);
                    self.report(
                        Severity::Error,
                        "process-error",
                        &[("id", id.to_string()), ("error", reason)],
                    );
                }
            }
            Outcome::Failed(e) => {
                error!("Process {} failed: {}", id, e);
                if self.registry.remove_entry(process).await {
                    self.report(
                        Severity::Error,
                        "process-error",
                        &[("id", id.to_string()), ("error", e.to_string())],
                    );
                }
            }
        }
        process.close_io().await;
    }
}

async fn run_process(
    inner: Arc<EngineInner>,
    process: Arc<ManagedProcess>,
    assembly: EnvironmentAssembly,
    working_dir: Option<PathBuf>,
    timeout: Option<Duration>,
) {
    let outcome = drive(&inner, &process, &assembly, working_dir, timeout)
        .await
        .unwrap_or_else(Outcome::Failed);
    inner.finish(&process, outcome).await;
}

async fn drive(
    inner: &Arc<EngineInner>,
    process: &Arc<ManagedProcess>,
    assembly: &EnvironmentAssembly,
    working_dir: Option<PathBuf>,
    timeout: Option<Duration>,
) -> Result<Outcome, EngineError> {
    if process.is_cancelled() {
        return Ok(Outcome::Abandoned);
    }

    let launcher = &inner.platform.launcher;
    let command_line = assembly.wrap_command(process.command_text(), launcher.family());
    let (reader, writer) = std::io::pipe()?;
    let mut command = launcher.command(&command_line);
    assembly.apply(&mut command);
    if let Some(dir) = working_dir {
        command.current_dir(dir);
    }
    command
        .stdin(Stdio::piped())
        .stdout(writer.try_clone()?)
        .stderr(writer)
        .kill_on_drop(true);
    let spawned = command.spawn();
    // The command holds our copies of the write end; the reader only sees EOF once they
    // are gone.
    drop(command);
    let mut child = spawned.map_err(EngineError::LaunchFailure)?;

    let pid = child.id();
    process.attach(pid, child.stdin.take()).await;
    if process.is_cancelled() {
        abandon(inner, &mut child, pid).await;
        return Ok(Outcome::Abandoned);
    }
    info!("Process {} running as pid {:?}", process.id(), pid);

    let timer_stop = CancellationToken::new();
    let _timer_guard = timer_stop.clone().drop_guard();
    if let Some(timeout) = timeout {
        tokio::spawn(expire(
            Arc::clone(inner),
            Arc::clone(process),
            timeout,
            timer_stop,
        ));
    }

    let (tx, mut rx) = mpsc::channel(CHUNK_QUEUE);
    let buffer_size = inner.config.read_buffer_size;
    std::thread::Builder::new()
        .name(format!("conshell-reader-{}", process.id()))
        .spawn(move || read_pipe(reader, buffer_size, tx))?;

    let mut decoder = StreamDecoder::new(inner.config.decoder_options());
    let mut control = None;
    loop {
        let received = tokio::select! {
            biased;
            _ = process.cancellation().cancelled() => None,
            chunk = rx.recv() => Some(chunk),
        };
        let Some(chunk) = received else {
            abandon(inner, &mut child, pid).await;
            return Ok(Outcome::Abandoned);
        };
        let mut next = chunk;
        if next.is_none() {
            break;
        }
        let mut failed = false;
        // Decode everything already queued before treating the source as idle.
        while let Some(read) = next {
            match read {
                Ok(bytes) => decoder.feed(&bytes, &mut |decoded| {
                    inner.dispatch(process, decoded, &mut control)
                }),
                Err(e) => {
                    warn!("Process {}: {}", process.id(), EngineError::Stream(e));
                    failed = true;
                    break;
                }
            }
            next = rx.try_recv().ok();
        }
        if let Some(byte) = control {
            abandon(inner, &mut child, pid).await;
            return Ok(Outcome::ControlByte(byte));
        }
        if failed {
            break;
        }
        decoder.flush_idle(&mut |decoded| inner.dispatch(process, decoded, &mut control));
    }
    decoder.finish(&mut |decoded| inner.dispatch(process, decoded, &mut control));

    let waited = tokio::select! {
        biased;
        _ = process.cancellation().cancelled() => None,
        status = child.wait() => Some(status),
    };
    let Some(status) = waited else {
        abandon(inner, &mut child, pid).await;
        return Ok(Outcome::Abandoned);
    };
    Ok(Outcome::Exited(status?.code()))
}

async fn abandon(inner: &EngineInner, child: &mut Child, pid: Option<u32>) {
    // Descendants first: once the root dies they are reparented and can no longer be found.
    if let Some(pid) = pid {
        inner.kill_tree(pid).await;
    }
    if let Err(e) = child.start_kill() {
        debug!("Kill after abandon: {}", e);
    }
    if let Err(e) = child.wait().await {
        debug!("Reaping abandoned child: {}", e);
    }
}

async fn expire(
    inner: Arc<EngineInner>,
    process: Arc<ManagedProcess>,
    timeout: Duration,
    stop: CancellationToken,
) {
    tokio::select! {
        _ = stop.cancelled() => return,
        _ = tokio::time::sleep(timeout) => {}
    }
    if !inner.registry.remove_entry(&process).await {
        return;
    }
    let id = process.id();
    warn!(
        "{}",
        EngineError::Timeout {
            id,
            seconds: timeout.as_secs()
        }
    );
    process.cancel();
    if let Some(pid) = process.pid() {
        inner.kill_tree(pid).await;
    }
    inner.report(Severity::Error, "process-timeout", &[("id", id.to_string())]);
}

/// Blocking pipe reader. Ends on EOF, on a read error, or when the decoder side is gone.
fn read_pipe(
    mut reader: std::io::PipeReader,
    buffer_size: usize,
    tx: mpsc::Sender<std::io::Result<Vec<u8>>>,
) {
    let mut buffer = vec![0u8; buffer_size];
    loop {
        match reader.read(&mut buffer) {
            Ok(0) => break,
            Ok(n) => {
                if tx.blocking_send(Ok(buffer[..n].to_vec())).is_err() {
                    break;
                }
            }
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) => {
                let _ = tx.blocking_send(Err(e));
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sink::ChannelSink;

    #[test]
    fn request_builder_collects_options() {
        let request = EngineRequest::new(["echo", "hi"])
            .working_dir("/tmp")
            .profile("build")
            .timeout(Duration::from_secs(3));
        assert_eq!(request.tokens, vec!["echo", "hi"]);
        assert_eq!(request.working_dir, Some(PathBuf::from("/tmp")));
        assert_eq!(request.profile.as_deref(), Some("build"));
        assert_eq!(request.timeout, Some(Duration::from_secs(3)));
    }

    #[tokio::test]
    async fn empty_command_is_rejected_without_reserving() {
        let (sink, mut rx) = ChannelSink::new();
        let engine = Engine::new(EngineConfig::default(), Arc::new(sink));
        let err = engine
            .execute(EngineRequest::new(Vec::<String>::new()))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            EngineError::Validation(ValidationError::EmptyCommand)
        ));
        assert!(engine.active_ids().await.is_empty());
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn empty_listing_is_a_single_warning() {
        let (sink, _rx) = ChannelSink::new();
        let engine = Engine::new(EngineConfig::default(), Arc::new(sink));
        let lines = engine.list().await;
        assert_eq!(lines.len(), 1);
        assert!(lines[0].ends_with("No running processes"));
    }

    #[tokio::test]
    async fn unknown_ids_are_reported_not_fatal() {
        let (sink, mut rx) = ChannelSink::new();
        let engine = Engine::new(EngineConfig::default(), Arc::new(sink));
        assert!(!engine.stop(9).await);
        assert!(rx.recv().await.unwrap().contains("No running process"));
        assert!(matches!(
            engine.send_input(9, "x").await,
            Err(EngineError::NotFound(9))
        ));
    }
}
