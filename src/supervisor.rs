//! Process lifecycle controller.
//!
//! Owns the mapping from instance key to process bookkeeping: spawns
//! validated worker CLIs with piped stdio, forwards their output to the
//! event bus, detects unexpected exits, and applies the restart policy
//! with cancellable timers. All state lives in one owned struct behind a
//! cloneable handle, so independent supervisors can coexist in tests.
//!
//! Per-key operations are serialized through the [`LockRegistry`];
//! operations on distinct keys never contend. A generation counter per
//! entry keeps exit notifications from a replaced process from touching
//! its successor's bookkeeping.

use std::collections::HashMap;
use std::process::Stdio;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::process::{Child, ChildStdin, Command};
use tokio::sync::{Mutex as AsyncMutex, oneshot};
use tokio::task::JoinHandle;

use crate::bus::{EventBus, EventData, InstanceEvent, Topic};
use crate::config::Config;
use crate::discovery::Discovery;
use crate::error::{Result, WardenError};
use crate::instance::{InstanceConfig, InstanceStatus};
use crate::locks::LockRegistry;
use crate::policy::{RestartDecision, RestartPolicy};
use crate::validate;

/// Environment variable carrying the system prompt to the child.
pub const SYSTEM_PROMPT_ENV: &str = "WARDEN_SYSTEM_PROMPT";

/// Size of the read buffer for forwarded stdout/stderr chunks.
const CHUNK_BUF_SIZE: usize = 4096;

/// Per-instance bookkeeping.
struct InstanceEntry {
    config: InstanceConfig,
    status: InstanceStatus,
    restart_attempts: u32,
    last_crash: Option<Instant>,
    /// Bumped on every spawn and shutdown; stale exits compare against it.
    generation: u64,
    stdin: Option<Arc<AsyncMutex<ChildStdin>>>,
    /// Tells the waiter task to kill the child instead of treating the
    /// exit as a crash.
    shutdown_tx: Option<oneshot::Sender<()>>,
    reader_tasks: Vec<JoinHandle<()>>,
    /// Pending backoff timer for a scheduled respawn.
    restart_timer: Option<JoinHandle<()>>,
}

impl InstanceEntry {
    fn new(config: InstanceConfig) -> Self {
        Self {
            config,
            status: InstanceStatus::Idle,
            restart_attempts: 0,
            last_crash: None,
            generation: 0,
            stdin: None,
            shutdown_tx: None,
            reader_tasks: Vec::new(),
            restart_timer: None,
        }
    }

    fn detach(&mut self) {
        self.stdin = None;
        self.shutdown_tx = None;
        for task in self.reader_tasks.drain(..) {
            task.abort();
        }
        if let Some(timer) = self.restart_timer.take() {
            timer.abort();
        }
    }
}

struct SupervisorInner {
    command: String,
    allowed_commands: Vec<String>,
    policy: RestartPolicy,
    max_message_len: usize,
    max_path_len: usize,
    stagger: Duration,
    order: Vec<String>,
    entries: Mutex<HashMap<String, InstanceEntry>>,
    bus: EventBus,
    locks: LockRegistry,
}

/// Supervisor for a fixed set of named worker subprocesses.
#[derive(Clone)]
pub struct Supervisor {
    inner: Arc<SupervisorInner>,
}

impl Supervisor {
    /// Build a supervisor from configuration and discovery results.
    ///
    /// One entry is created per configured instance; the set is fixed for
    /// the supervisor's lifetime.
    pub fn new(config: &Config, discovery: &Discovery) -> Self {
        let mut entries = HashMap::new();
        let mut order = Vec::new();
        for spec in &config.instances {
            let resolved = InstanceConfig::resolve(spec, &discovery.settings, &discovery.working_dirs);
            order.push(spec.key.clone());
            entries.insert(spec.key.clone(), InstanceEntry::new(resolved));
        }

        Self {
            inner: Arc::new(SupervisorInner {
                command: config.command.clone(),
                allowed_commands: config.allowed_commands.clone(),
                policy: RestartPolicy::from(&config.policy),
                max_message_len: config.limits.max_message_len,
                max_path_len: config.limits.max_path_len,
                stagger: Duration::from_millis(config.stagger_ms),
                order,
                entries: Mutex::new(entries),
                bus: EventBus::new(),
                locks: LockRegistry::new(),
            }),
        }
    }

    /// The event bus carrying lifecycle and output events.
    pub fn bus(&self) -> &EventBus {
        &self.inner.bus
    }

    /// Configured instance keys in declaration order.
    pub fn keys(&self) -> Vec<String> {
        self.inner.order.clone()
    }

    /// Spawn an instance. No-op when it is already running.
    ///
    /// An explicit spawn resets the restart budget, so it also revives a
    /// permanently failed instance. Concurrent callers for the same key
    /// are serialized; exactly one process is created.
    pub async fn spawn_instance(&self, key: &str) -> Result<()> {
        let _guard = self.inner.locks.acquire(key).await;
        self.inner.spawn_locked(key, true).await
    }

    /// Send a message line to an instance, spawning it first if needed.
    ///
    /// Fails with [`WardenError::Unavailable`] when no usable input stream
    /// exists after the spawn attempt.
    pub async fn send_to_instance(&self, key: &str, message: &str) -> Result<()> {
        let check = validate::validate_message_length(message, self.inner.max_message_len);
        if !check.valid {
            return Err(WardenError::Validation(
                check.reason.unwrap_or_else(|| "message rejected".to_string()),
            ));
        }

        let _guard = self.inner.locks.acquire(key).await;

        let needs_spawn = {
            let entries = self.inner.entries.lock().unwrap();
            let entry = entries
                .get(key)
                .ok_or_else(|| WardenError::UnknownInstance(key.to_string()))?;
            entry.status != InstanceStatus::Running || entry.stdin.is_none()
        };
        if needs_spawn {
            self.inner.spawn_locked(key, true).await?;
        }

        let stdin = {
            let entries = self.inner.entries.lock().unwrap();
            entries.get(key).and_then(|e| e.stdin.clone())
        };
        let Some(stdin) = stdin else {
            return Err(WardenError::Unavailable(key.to_string()));
        };

        let mut stream = stdin.lock().await;
        let write = async {
            stream.write_all(message.as_bytes()).await?;
            stream.write_all(b"\n").await?;
            stream.flush().await
        };
        write
            .await
            .map_err(|e| WardenError::Unavailable(format!("{}: {}", key, e)))
    }

    /// Current status of one instance. Never triggers I/O.
    pub fn status(&self, key: &str) -> Result<InstanceStatus> {
        let entries = self.inner.entries.lock().unwrap();
        entries
            .get(key)
            .map(|e| e.status)
            .ok_or_else(|| WardenError::UnknownInstance(key.to_string()))
    }

    /// Current status of every instance.
    pub fn all_statuses(&self) -> HashMap<String, InstanceStatus> {
        let entries = self.inner.entries.lock().unwrap();
        entries.iter().map(|(k, e)| (k.clone(), e.status)).collect()
    }

    /// Spawn every configured instance, staggered to avoid a process
    /// creation storm. One instance failing never stops the rest.
    pub async fn start_all(&self) {
        for (i, key) in self.inner.order.iter().enumerate() {
            if i > 0 {
                tokio::time::sleep(self.inner.stagger).await;
            }
            if let Err(e) = self.spawn_instance(key).await {
                log::error!("start_all: {} failed to spawn: {}", key, e);
            }
        }
    }

    /// Terminate every live process and reset all bookkeeping to idle.
    ///
    /// Pending restart timers are cancelled so nothing fires against a
    /// torn-down supervisor. Idempotent.
    pub async fn shutdown(&self) {
        for key in &self.inner.order {
            let _guard = self.inner.locks.acquire(key).await;

            let (shutdown_tx, from) = {
                let mut entries = self.inner.entries.lock().unwrap();
                let Some(entry) = entries.get_mut(key) else {
                    continue;
                };
                let from = entry.status;
                entry.generation += 1;
                let tx = entry.shutdown_tx.take();
                entry.detach();
                entry.status = InstanceStatus::Idle;
                entry.restart_attempts = 0;
                entry.last_crash = None;
                (tx, from)
            };

            if let Some(tx) = shutdown_tx {
                let _ = tx.send(());
            }
            if from != InstanceStatus::Idle {
                self.inner.publish_status(key, from, InstanceStatus::Idle);
            }
        }
        log::info!("supervisor shut down");
    }
}

impl SupervisorInner {
    fn publish_status(&self, key: &str, from: InstanceStatus, to: InstanceStatus) {
        log::debug!("{}: {} -> {}", key, from, to);
        let event = InstanceEvent::new(key, EventData::StatusChanged {
            from: from.to_string(),
            to: to.to_string(),
        });
        self.bus.publish(&Topic::Status(key.to_string()), &event);
    }

    fn set_status(&self, key: &str, to: InstanceStatus) {
        let from = {
            let mut entries = self.entries.lock().unwrap();
            let Some(entry) = entries.get_mut(key) else {
                return;
            };
            let from = entry.status;
            entry.status = to;
            from
        };
        if from != to {
            self.publish_status(key, from, to);
        }
    }

    /// Spawn while the caller holds the key's lock.
    ///
    /// `explicit` marks an external spawn request, which resets the restart
    /// budget; the policy-scheduled respawn path keeps its count.
    async fn spawn_locked(self: &Arc<Self>, key: &str, explicit: bool) -> Result<()> {
        let (config, generation) = {
            let mut entries = self.entries.lock().unwrap();
            let entry = entries
                .get_mut(key)
                .ok_or_else(|| WardenError::UnknownInstance(key.to_string()))?;

            if entry.status == InstanceStatus::Running {
                return Ok(());
            }
            if explicit {
                entry.restart_attempts = 0;
                entry.last_crash = None;
            }
            entry.detach();
            entry.generation += 1;
            (entry.config.clone(), entry.generation)
        };

        if let Err(reason) = self.validate_spawn(key, &config) {
            self.set_status(key, InstanceStatus::Crashed);
            return Err(WardenError::Validation(reason));
        }

        self.set_status(key, InstanceStatus::Restarting);

        let mut cmd = Command::new(&self.command);
        cmd.args(config.args())
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(cwd) = config.cwd() {
            cmd.current_dir(cwd);
        }
        if let Some(prompt) = &config.system_prompt {
            cmd.env(SYSTEM_PROMPT_ENV, prompt);
        }

        let mut child = match cmd.spawn() {
            Ok(child) => child,
            Err(e) => {
                // OS refused the spawn: absorbed into the state machine and
                // handled like an unexpected exit.
                log::error!("{}: spawn failed: {}", key, e);
                self.handle_crash_locked(key, generation, &format!("spawn error: {}", e));
                return Ok(());
            }
        };

        let mut stdin = child
            .stdin
            .take()
            .ok_or_else(|| WardenError::Spawn(format!("{}: no stdin handle", key)))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| WardenError::Spawn(format!("{}: no stdout handle", key)))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| WardenError::Spawn(format!("{}: no stderr handle", key)))?;

        if let Some(prompt) = &config.system_prompt {
            let write = async {
                stdin.write_all(prompt.as_bytes()).await?;
                stdin.write_all(b"\n").await?;
                stdin.flush().await
            };
            if let Err(e) = write.await {
                log::warn!("{}: failed to write system prompt: {}", key, e);
            }
        }

        let stdout_task = self.spawn_reader(key, stdout, false);
        let stderr_task = self.spawn_reader(key, stderr, true);

        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        self.spawn_waiter(key, generation, child, shutdown_rx);

        {
            let mut entries = self.entries.lock().unwrap();
            let Some(entry) = entries.get_mut(key) else {
                return Err(WardenError::UnknownInstance(key.to_string()));
            };
            entry.stdin = Some(Arc::new(AsyncMutex::new(stdin)));
            entry.shutdown_tx = Some(shutdown_tx);
            entry.reader_tasks = vec![stdout_task, stderr_task];
        }

        self.set_status(key, InstanceStatus::Running);
        self.bus.publish(
            &Topic::Started,
            &InstanceEvent::new(key, EventData::Started),
        );
        log::info!("{}: running ({})", key, self.command);

        Ok(())
    }

    fn validate_spawn(&self, key: &str, config: &InstanceConfig) -> std::result::Result<(), String> {
        if !validate::validate_instance_key(key) {
            return Err(format!("invalid instance key '{}'", key));
        }
        let args = config.args();
        let check = validate::validate_spawn_args(&self.command, &args, &self.allowed_commands);
        if !check.valid {
            return Err(check.reason.unwrap_or_else(|| "spawn args rejected".to_string()));
        }
        for dir in &config.working_dirs {
            let check = validate::validate_path(&dir.to_string_lossy(), self.max_path_len);
            if !check.valid {
                return Err(check.reason.unwrap_or_else(|| "path rejected".to_string()));
            }
        }
        Ok(())
    }

    /// Forward raw chunks from a child stream to the bus until EOF.
    fn spawn_reader<R>(self: &Arc<Self>, key: &str, mut stream: R, is_stderr: bool) -> JoinHandle<()>
    where
        R: AsyncReadExt + Unpin + Send + 'static,
    {
        let weak = Arc::downgrade(self);
        let key = key.to_string();
        tokio::spawn(async move {
            let mut buf = [0u8; CHUNK_BUF_SIZE];
            loop {
                match stream.read(&mut buf).await {
                    Ok(0) | Err(_) => break,
                    Ok(n) => {
                        let Some(inner) = weak.upgrade() else { break };
                        let chunk = String::from_utf8_lossy(&buf[..n]).into_owned();
                        let (topic, data) = if is_stderr {
                            (Topic::Stderr(key.clone()), EventData::Stderr(chunk))
                        } else {
                            (Topic::Output(key.clone()), EventData::Output(chunk))
                        };
                        inner.bus.publish(&topic, &InstanceEvent::new(&key, data));
                    }
                }
            }
        })
    }

    /// Wait for the child to exit, or for a shutdown signal to kill it.
    fn spawn_waiter(
        self: &Arc<Self>,
        key: &str,
        generation: u64,
        mut child: Child,
        mut shutdown_rx: oneshot::Receiver<()>,
    ) {
        let weak = Arc::downgrade(self);
        let key = key.to_string();
        tokio::spawn(async move {
            tokio::select! {
                _ = &mut shutdown_rx => {
                    if let Err(e) = child.kill().await {
                        log::warn!("{}: kill failed: {}", key, e);
                    }
                }
                status = child.wait() => {
                    let reason = match status {
                        Ok(status) => format!("exited with {}", status),
                        Err(e) => format!("wait error: {}", e),
                    };
                    if let Some(inner) = weak.upgrade() {
                        inner.on_unexpected_exit(&key, generation, &reason).await;
                    }
                }
            }
        });
    }

    async fn on_unexpected_exit(self: &Arc<Self>, key: &str, generation: u64, reason: &str) {
        let _guard = self.locks.acquire(key).await;
        self.handle_crash_locked(key, generation, reason);
    }

    /// Crash bookkeeping and restart scheduling. Caller holds the key lock.
    fn handle_crash_locked(self: &Arc<Self>, key: &str, generation: u64, reason: &str) {
        let decision = {
            let mut entries = self.entries.lock().unwrap();
            let Some(entry) = entries.get_mut(key) else {
                return;
            };
            // A spawn or shutdown has replaced this process; nothing to do.
            if entry.generation != generation {
                return;
            }
            entry.detach();

            let ms_since = entry.last_crash.map(|t| t.elapsed().as_millis() as u64);
            entry.last_crash = Some(Instant::now());
            self.policy.decide(entry.restart_attempts, ms_since)
        };

        log::warn!("{}: crashed: {}", key, reason);
        self.set_status(key, InstanceStatus::Crashed);

        match decision {
            RestartDecision::Restart { attempt, delay } => {
                log::info!(
                    "{}: scheduling restart attempt {} in {}ms",
                    key,
                    attempt,
                    delay.as_millis()
                );
                let timer = self.schedule_restart(key, generation, delay);
                let mut entries = self.entries.lock().unwrap();
                if let Some(entry) = entries.get_mut(key) {
                    entry.restart_attempts = attempt;
                    entry.restart_timer = Some(timer);
                }
            }
            RestartDecision::Fail => {
                log::error!("{}: restart budget exhausted, giving up", key);
                self.set_status(key, InstanceStatus::Failed);
                self.bus.publish(
                    &Topic::Failed,
                    &InstanceEvent::new(key, EventData::Failed),
                );
            }
        }
    }

    fn schedule_restart(self: &Arc<Self>, key: &str, generation: u64, delay: Duration) -> JoinHandle<()> {
        let weak = Arc::downgrade(self);
        let key = key.to_string();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let Some(inner) = weak.upgrade() else { return };

            let _guard = inner.locks.acquire(&key).await;
            let still_crashed = {
                let entries = inner.entries.lock().unwrap();
                entries
                    .get(&key)
                    .is_some_and(|e| e.generation == generation && e.status == InstanceStatus::Crashed)
            };
            if !still_crashed {
                return;
            }
            if let Err(e) = inner.spawn_locked(&key, false).await {
                log::error!("{}: scheduled respawn failed: {}", key, e);
            }
        })
    }
}
