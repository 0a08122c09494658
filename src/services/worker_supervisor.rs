//! Worker supervisor: spawns, monitors and restarts subprocess workers
//! (spec.md §4.5).
//!
//! Grounded on the teacher's
//! `infrastructure::substrates::claude_code::ClaudeCodeSubstrate` for the
//! subprocess spawn/stdin-write/stdout-read pattern. The teacher's
//! substrate runs one prompt to completion and exits; a worker here is
//! long-lived, so the pattern is adapted into a persistent child process
//! with a background reader task instead of a single `execute()` call.

use std::collections::{HashMap, VecDeque};
use std::process::Stdio;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use nix::sys::signal::{self, Signal};
use nix::unistd::Pid;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, Command};
use tokio::sync::{Mutex as AsyncMutex, RwLock as AsyncRwLock};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::config::tuning;
use crate::domain::errors::WorkerError;
use crate::domain::models::{
    format_for_resume, OutputLine, SpawnConfig, Worker, WorkerEvent, WorkerHealth, WorkerStatus,
};
use crate::domain::ports::{CheckpointStore, WorkerRepository};
use crate::services::event_bus::{kinds, Event, EventBus, Topic};
use crate::services::mail_handoff::MailHandoffService;

/// Process-management state for one live worker. Domain state (`status`,
/// `session_id`, `restart_count`, ...) lives in the persisted `Worker` row;
/// this struct holds only what cannot survive a process restart.
struct WorkerHandle {
    child: AsyncMutex<Child>,
    stdin: AsyncMutex<Option<ChildStdin>>,
    output: AsyncMutex<VecDeque<OutputLine>>,
    sequence: AtomicU64,
    last_heartbeat: AsyncMutex<Option<DateTime<Utc>>>,
    config: SpawnConfig,
}

/// Spawns, tracks, and restarts subprocess workers.
pub struct WorkerSupervisor {
    repo: Arc<dyn WorkerRepository>,
    checkpoints: Arc<dyn CheckpointStore>,
    mail: Arc<MailHandoffService>,
    events: Arc<EventBus>,
    max_workers: usize,
    max_depth: u32,
    fleet_url: String,
    handles: AsyncRwLock<HashMap<Uuid, Arc<WorkerHandle>>>,
}

impl WorkerSupervisor {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        repo: Arc<dyn WorkerRepository>,
        checkpoints: Arc<dyn CheckpointStore>,
        mail: Arc<MailHandoffService>,
        events: Arc<EventBus>,
        max_workers: usize,
        max_depth: u32,
        fleet_url: String,
    ) -> Self {
        Self {
            repo,
            checkpoints,
            mail,
            events,
            max_workers,
            max_depth,
            fleet_url,
            handles: AsyncRwLock::new(HashMap::new()),
        }
    }

    /// Active (non-dismissed) worker count, used by the spawn controller
    /// to decide whether it can still drain against the hard/soft caps.
    pub async fn active_worker_count(&self) -> Result<usize, WorkerError> {
        Ok(self.repo.count_non_dismissed().await?)
    }

    /// Loads non-terminal workers from storage on process start. Since the
    /// in-memory handle table never survives a process restart, none of
    /// these rows have a live counterpart here; each is transitioned to
    /// `error` so the supervisor's domain state matches reality rather
    /// than silently pretending a process from a previous run is still
    /// being supervised.
    pub async fn recover_on_startup(&self) -> Result<usize, WorkerError> {
        let orphaned = self.repo.list_non_dismissed().await?;
        let mut recovered = 0;
        for mut worker in orphaned {
            if worker.status.is_terminal() {
                continue;
            }
            worker.status = WorkerStatus::Error;
            self.repo.update(&worker).await?;
            self.events.publish_broadcast(
                &Topic::Chat(worker.team_name.clone()),
                Event::new(kinds::WORKER_EXIT, serde_json::json!({"handle": worker.handle, "reason": "not recoverable across restart"})),
            );
            recovered += 1;
        }
        Ok(recovered)
    }

    pub async fn spawn(&self, mut config: SpawnConfig) -> Result<Worker, WorkerError> {
        if config.depth_level > self.max_depth {
            return Err(WorkerError::DepthExceeded(config.depth_level, self.max_depth));
        }
        if self.repo.count_non_dismissed().await? >= self.max_workers {
            return Err(WorkerError::AtCapacity(self.max_workers));
        }
        if self.repo.get_by_handle(&config.team_name, &config.handle).await?.is_some() {
            return Err(WorkerError::HandleInUse(config.handle.clone()));
        }

        if let Ok(injected) = self.mail.format_for_injection(&config.handle).await {
            if !injected.is_empty() {
                config.initial_prompt = Some(match config.initial_prompt {
                    Some(original) => format!("{injected}\n\n{original}"),
                    None => injected,
                });
            }
        }

        let worker = Worker::new(Uuid::new_v4(), &config, Utc::now());
        self.repo.create(&worker).await?;

        let handle = self.launch(worker.id, config).await?;
        self.handles.write().await.insert(worker.id, handle);

        Ok(worker)
    }

    /// Spawns the OS process and the stdout/stderr reader tasks. Does not
    /// touch storage beyond what the caller (`spawn`/restart path) already
    /// did.
    async fn launch(&self, worker_id: Uuid, config: SpawnConfig) -> Result<Arc<WorkerHandle>, WorkerError> {
        let mut command = Command::new(&config.command);
        command
            .args(&config.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .env("CLAUDE_CODE_AGENT_NAME", &config.handle)
            .env("CLAUDE_CODE_AGENT_ID", worker_id.to_string())
            .env("CLAUDE_CODE_TEAM_NAME", &config.team_name)
            .env("CLAUDE_CODE_AGENT_TYPE", config.role.as_str())
            .env("CLAUDE_CODE_AGENT_UID", Uuid::new_v4().to_string())
            .env("CLAUDE_FLEET_URL", &self.fleet_url);
        if let Some(swarm_id) = &config.swarm_id {
            command.env("CLAUDE_CODE_SWARM_ID", swarm_id);
        }
        if let Some(worktree) = &config.worktree_path {
            command.current_dir(worktree);
        }

        let mut child = command.spawn().map_err(|e| WorkerError::SpawnFailed(e.to_string()))?;

        let mut stdin = child.stdin.take();
        let stdout = child.stdout.take().ok_or_else(|| WorkerError::SpawnFailed("missing stdout handle".to_string()))?;
        let stderr = child.stderr.take().ok_or_else(|| WorkerError::SpawnFailed("missing stderr handle".to_string()))?;

        if let Some(prompt) = &config.initial_prompt {
            if let Some(stdin_handle) = stdin.as_mut() {
                let _ = stdin_handle.write_all(prompt.as_bytes()).await;
                let _ = stdin_handle.write_all(b"\n").await;
                let _ = stdin_handle.flush().await;
            }
        }

        let handle = Arc::new(WorkerHandle {
            child: AsyncMutex::new(child),
            stdin: AsyncMutex::new(stdin),
            output: AsyncMutex::new(VecDeque::with_capacity(tuning::MAX_OUTPUT_LINES)),
            sequence: AtomicU64::new(0),
            last_heartbeat: AsyncMutex::new(None),
            config,
        });

        tokio::spawn(Self::read_stdout(
            worker_id,
            Arc::clone(&handle),
            stdout,
            Arc::clone(&self.repo),
            Arc::clone(&self.events),
        ));
        tokio::spawn(Self::read_stderr(worker_id, stderr));

        Ok(handle)
    }

    async fn read_stdout(
        worker_id: Uuid,
        handle: Arc<WorkerHandle>,
        stdout: tokio::process::ChildStdout,
        repo: Arc<dyn WorkerRepository>,
        events: Arc<EventBus>,
    ) {
        let mut reader = BufReader::new(stdout);
        let mut line = String::new();
        loop {
            line.clear();
            match reader.read_line(&mut line).await {
                Ok(0) => break,
                Ok(_) => {}
                Err(error) => {
                    tracing::warn!(worker_id = %worker_id, %error, "worker stdout read failed");
                    break;
                }
            }
            let trimmed = line.trim_end();
            if trimmed.is_empty() {
                continue;
            }
            let event: WorkerEvent = match serde_json::from_str(trimmed) {
                Ok(event) => event,
                Err(error) => {
                    tracing::debug!(worker_id = %worker_id, %error, line = %trimmed, "non-JSON worker output, ignored");
                    continue;
                }
            };

            let now = Utc::now();
            *handle.last_heartbeat.lock().await = Some(now);

            if let WorkerEvent::System { session_id: Some(session_id), .. } = &event {
                if let Ok(Some(mut worker)) = repo.get(worker_id).await {
                    worker.session_id = Some(session_id.clone());
                    if worker.status == WorkerStatus::Pending {
                        worker.status = WorkerStatus::Ready;
                    }
                    worker.last_heartbeat = Some(now);
                    let _ = repo.update(&worker).await;
                }
            } else if let Ok(Some(mut worker)) = repo.get(worker_id).await {
                worker.last_heartbeat = Some(now);
                let _ = repo.update(&worker).await;
            }

            let sequence = handle.sequence.fetch_add(1, Ordering::Relaxed);
            let mut buffer = handle.output.lock().await;
            if buffer.len() >= tuning::MAX_OUTPUT_LINES {
                buffer.pop_front();
            }
            buffer.push_back(OutputLine { sequence, timestamp: now, event: event.clone() });
            drop(buffer);

            events.publish_broadcast(
                &Topic::Chat(handle.config.team_name.clone()),
                Event::new(kinds::WORKER_OUTPUT, serde_json::json!({"handle": handle.config.handle, "event": event})),
            );
        }
    }

    async fn read_stderr(worker_id: Uuid, stderr: tokio::process::ChildStderr) {
        let mut reader = BufReader::new(stderr);
        let mut line = String::new();
        loop {
            line.clear();
            match reader.read_line(&mut line).await {
                Ok(0) => break,
                Ok(_) => {
                    let trimmed = line.trim_end();
                    if !trimmed.is_empty() {
                        tracing::warn!(worker_id = %worker_id, stderr = %trimmed, "worker stderr");
                    }
                }
                Err(_) => break,
            }
        }
    }

    pub async fn send(&self, worker_id: Uuid, message: &str) -> Result<(), WorkerError> {
        let handles = self.handles.read().await;
        let handle = handles.get(&worker_id).ok_or_else(|| WorkerError::NotFound(worker_id.to_string()))?;
        let mut stdin = handle.stdin.lock().await;
        let stdin = stdin.as_mut().ok_or(WorkerError::StdinClosed)?;
        stdin.write_all(message.as_bytes()).await.map_err(|e| WorkerError::SpawnFailed(e.to_string()))?;
        stdin.write_all(b"\n").await.map_err(|e| WorkerError::SpawnFailed(e.to_string()))?;
        stdin.flush().await.map_err(|e| WorkerError::SpawnFailed(e.to_string()))?;
        drop(stdin);

        if let Ok(Some(mut worker)) = self.repo.get(worker_id).await {
            worker.status = WorkerStatus::Busy;
            let _ = self.repo.update(&worker).await;
        }
        Ok(())
    }

    /// Output lines with `sequence > after`, oldest first.
    pub async fn get_output(&self, worker_id: Uuid, after: u64) -> Result<Vec<OutputLine>, WorkerError> {
        let handles = self.handles.read().await;
        let handle = handles.get(&worker_id).ok_or_else(|| WorkerError::NotFound(worker_id.to_string()))?;
        let buffer = handle.output.lock().await;
        Ok(buffer.iter().filter(|line| line.sequence > after).cloned().collect())
    }

    /// Health classification from time since `lastHeartbeat`. A worker
    /// with no handle at all (never tracked, or already dismissed) has no
    /// health — callers should treat `None` as "not supervised".
    pub async fn health(&self, worker_id: Uuid) -> Option<WorkerHealth> {
        let handles = self.handles.read().await;
        let handle = handles.get(&worker_id)?;
        let last = *handle.last_heartbeat.lock().await;
        Some(classify_health(last, Utc::now()))
    }

    /// Idempotent: dismissing an already-dismissed (or unknown) worker
    /// returns `false` without side effects (spec.md §8, scenario S1).
    pub async fn dismiss(&self, worker_id: Uuid) -> Result<bool, WorkerError> {
        let Some(mut worker) = self.repo.get(worker_id).await? else {
            return Ok(false);
        };
        if worker.status == WorkerStatus::Dismissed {
            return Ok(false);
        }

        let handle = {
            let mut handles = self.handles.write().await;
            handles.remove(&worker_id)
        };
        if let Some(handle) = handle {
            terminate(&handle).await;
        }

        worker.status = WorkerStatus::Dismissed;
        worker.dismissed_at = Some(Utc::now());
        self.repo.update(&worker).await?;
        self.events.publish_broadcast(
            &Topic::Chat(worker.team_name.clone()),
            Event::new(kinds::WORKER_DISMISSED, serde_json::json!({"handle": worker.handle})),
        );
        Ok(true)
    }

    pub async fn dismiss_all(&self) -> Result<usize, WorkerError> {
        let ids: Vec<Uuid> = self.handles.read().await.keys().copied().collect();
        let mut count = 0;
        for id in ids {
            if self.dismiss(id).await? {
                count += 1;
            }
        }
        Ok(count)
    }

    /// One pass of the health-check loop (spec.md §5, §6): evaluates every
    /// tracked worker and restarts or errors out the unhealthy ones.
    pub async fn check_health(&self) -> Result<(), WorkerError> {
        let ids: Vec<Uuid> = self.handles.read().await.keys().copied().collect();
        for id in ids {
            self.check_worker_health(id).await?;
        }
        Ok(())
    }

    async fn check_worker_health(&self, worker_id: Uuid) -> Result<(), WorkerError> {
        let Some(worker) = self.repo.get(worker_id).await? else {
            return Ok(());
        };
        if worker.status.is_terminal() {
            return Ok(());
        }

        let last_heartbeat = {
            let handles = self.handles.read().await;
            match handles.get(&worker_id) {
                Some(handle) => *handle.last_heartbeat.lock().await,
                None => return Ok(()),
            }
        };

        let health = classify_health(last_heartbeat, Utc::now());
        if health != WorkerHealth::Unhealthy {
            return Ok(());
        }

        if !worker.auto_restart || worker.restart_count >= tuning::MAX_RESTART_ATTEMPTS {
            let reason = if worker.auto_restart { "restart budget exhausted" } else { "auto-restart disabled" };
            let mut worker = worker;
            worker.status = WorkerStatus::Error;
            self.repo.update(&worker).await?;
            self.events.publish_broadcast(
                &Topic::Chat(worker.team_name.clone()),
                Event::new(kinds::WORKER_EXIT, serde_json::json!({"handle": worker.handle, "reason": reason})),
            );
            return Ok(());
        }

        self.restart(worker_id).await
    }

    async fn restart(&self, worker_id: Uuid) -> Result<(), WorkerError> {
        let old_handle = {
            let mut handles = self.handles.write().await;
            handles.remove(&worker_id)
        };
        let Some(old_handle) = old_handle else {
            return Ok(());
        };
        terminate(&old_handle).await;

        let mut config = old_handle.config.clone();
        if let Ok(Some(checkpoint)) = self.checkpoints.get_latest(&config.handle).await {
            let resume = format_for_resume(&checkpoint);
            config.initial_prompt = Some(match config.initial_prompt {
                Some(original) => format!("{resume}\n\n{original}"),
                None => resume,
            });
        }

        let new_handle = self.launch(worker_id, config).await?;
        self.handles.write().await.insert(worker_id, new_handle);

        if let Some(mut worker) = self.repo.get(worker_id).await? {
            worker.restart_count += 1;
            worker.status = WorkerStatus::Pending;
            self.repo.update(&worker).await?;
        }
        Ok(())
    }

    /// Runs the health-check loop until `token` is cancelled.
    pub async fn run_health_loop(self: Arc<Self>, token: CancellationToken) {
        let mut interval = tokio::time::interval(tuning::HEALTH_CHECK_INTERVAL);
        loop {
            tokio::select! {
                _ = token.cancelled() => break,
                _ = interval.tick() => {
                    if let Err(error) = self.check_health().await {
                        tracing::warn!(%error, "health check pass failed");
                    }
                }
            }
        }
    }
}

fn classify_health(last_heartbeat: Option<DateTime<Utc>>, now: DateTime<Utc>) -> WorkerHealth {
    let Some(last) = last_heartbeat else {
        return WorkerHealth::Unhealthy;
    };
    let elapsed = (now - last).to_std().unwrap_or(std::time::Duration::MAX);
    if elapsed < tuning::HEALTHY_THRESHOLD {
        WorkerHealth::Healthy
    } else if elapsed < tuning::UNHEALTHY_THRESHOLD {
        WorkerHealth::Degraded
    } else {
        WorkerHealth::Unhealthy
    }
}

/// SIGTERM, then SIGKILL after `DISMISS_GRACE_PERIOD` if the process has
/// not exited.
async fn terminate(handle: &WorkerHandle) {
    let mut child = handle.child.lock().await;
    if let Some(pid) = child.id() {
        let pid = Pid::from_raw(pid as i32);
        let _ = signal::kill(pid, Signal::SIGTERM);
    }

    match tokio::time::timeout(tuning::DISMISS_GRACE_PERIOD, child.wait()).await {
        Ok(_) => {}
        Err(_) => {
            let _ = child.start_kill();
            let _ = child.wait().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classify_health_boundaries() {
        let now = Utc::now();
        assert_eq!(classify_health(Some(now), now), WorkerHealth::Healthy);
        assert_eq!(classify_health(Some(now - chrono::Duration::seconds(40)), now), WorkerHealth::Degraded);
        assert_eq!(classify_health(Some(now - chrono::Duration::seconds(70)), now), WorkerHealth::Unhealthy);
        assert_eq!(classify_health(None, now), WorkerHealth::Unhealthy);
    }
}
