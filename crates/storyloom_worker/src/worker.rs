//! Worker process: connects to the coordinator as a ZMQ DEALER, executes
//! dispatched jobs one at a time, chapter by chapter, through
//! `storyloom_pipeline`, and reports back over the same DEALER/ROUTER
//! pairing using multipart `[header, payload]` frames.

use std::sync::Arc;
use std::time::{Duration, Instant};

use thiserror::Error;
use tokio::time::timeout;
use tracing::{info, warn};
use zeromq::{DealerSocket, Socket, SocketRecv, SocketSend, ZmqMessage};

use storyloom_coordination::ResourceSampler;
use storyloom_db::{repo, DbError, DbPool};
use storyloom_pipeline::{DescriptionPipeline, ModelCache};
use storyloom_protocol::{
    AbortCommand, DispatchCommand, ErrorPayload, HeartbeatPayload, IdentifyPayload, JobOutcome,
    JobReceipt, Message, OpCode, OrchestratorError, ProtocolError, WireJobId,
};

use crate::cancel::CancellationToken;

#[derive(Debug, Error)]
pub enum WorkerError {
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
    #[error("zmq error: {0}")]
    Zmq(String),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
    #[error(transparent)]
    Db(#[from] DbError),
}

impl From<zeromq::ZmqError> for WorkerError {
    fn from(err: zeromq::ZmqError) -> Self {
        WorkerError::Zmq(err.to_string())
    }
}

/// Worker runtime configuration: the `orchestrator worker` CLI surface
/// plus the execution-model limits that normally come from
/// [`storyloom_protocol::config::OrchestratorConfig`].
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub connect: String,
    pub worker_id: String,
    pub queues: Vec<String>,
    pub concurrency: u32,
    pub soft_time_limit: Duration,
    pub hard_time_limit: Duration,
    pub max_tasks_per_child: u32,
    pub max_memory_per_child_bytes: u64,
    pub max_memory_percent: f32,
    pub max_cpu_percent: f32,
    pub nlp_model_cache_size: usize,
    pub nlp_model_ttl: Duration,
}

impl WorkerConfig {
    /// Builds worker limits from the shared orchestrator configuration, the
    /// way `storyloom serve` and `storyloom worker` both do.
    pub fn from_orchestrator_config(
        connect: String,
        worker_id: String,
        queues: Vec<String>,
        concurrency: u32,
        cfg: &storyloom_protocol::config::OrchestratorConfig,
    ) -> Self {
        Self {
            connect,
            worker_id,
            queues,
            concurrency,
            soft_time_limit: cfg.soft_time_limit(),
            hard_time_limit: cfg.hard_time_limit(),
            max_tasks_per_child: cfg.max_tasks_per_child,
            max_memory_per_child_bytes: cfg.max_memory_per_child_bytes,
            max_memory_percent: cfg.max_memory_percent,
            max_cpu_percent: cfg.max_cpu_percent,
            nlp_model_cache_size: cfg.nlp_model_cache_size,
            nlp_model_ttl: Duration::from_secs(cfg.nlp_model_ttl_seconds),
        }
    }
}

/// How long a single `recv` waits before the caller gets `None` back — used
/// both for the idle main loop and for the mid-job control-plane poll
/// between chapters ("cancellation is cooperative: the
/// executor checks a cancel flag between chapters").
const RECV_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// How often a running job reports progress.
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(10);

/// Outcome of streaming a book's chapters through the pipeline, short of an
/// error that should fail the whole job.
enum ChapterLoopOutcome {
    Completed {
        descriptions_found: u32,
        images_requested: u32,
    },
    Cancelled {
        descriptions_found: u32,
        images_requested: u32,
    },
}

pub struct Worker {
    config: WorkerConfig,
    socket: DealerSocket,
    pool: DbPool,
    pipeline: Arc<DescriptionPipeline>,
    resources: Arc<dyn ResourceSampler>,
    model_cache: ModelCache,
    tasks_completed: u32,
}

impl Worker {
    /// Connect to the coordinator and send the `Identify` handshake
    ///.
    pub async fn connect(
        config: WorkerConfig,
        pool: DbPool,
        pipeline: Arc<DescriptionPipeline>,
        resources: Arc<dyn ResourceSampler>,
    ) -> Result<Self, WorkerError> {
        let mut socket = DealerSocket::new();
        socket.connect(&config.connect).await?;
        info!(addr = %config.connect, worker_id = %config.worker_id, "connected to coordinator");

        let model_cache = ModelCache::new(config.nlp_model_cache_size, config.nlp_model_ttl);
        let mut worker = Self {
            config,
            socket,
            pool,
            pipeline,
            resources,
            model_cache,
            tasks_completed: 0,
        };
        worker.send_identify().await?;
        Ok(worker)
    }

    async fn send_identify(&mut self) -> Result<(), WorkerError> {
        let payload = IdentifyPayload {
            worker_id: self.config.worker_id.clone(),
            queues: self.config.queues.clone(),
            concurrency: self.config.concurrency,
        };
        self.send(OpCode::Identify, WireJobId::new(0), &payload).await
    }

    async fn send<T: serde::Serialize>(
        &mut self,
        opcode: OpCode,
        job_id: WireJobId,
        payload: &T,
    ) -> Result<(), WorkerError> {
        let bytes = serde_json::to_vec(payload)?;
        let msg = Message::new(opcode, job_id, bytes)?;
        let (header, body) = msg.pack()?;

        // DEALER sends don't carry an explicit identity frame; ZMQ stamps
        // the routing envelope on the wire for the peer ROUTER to see.
        let mut multipart = ZmqMessage::from(header);
        multipart.push_back(body.into());
        self.socket.send(multipart).await?;
        Ok(())
    }

    /// Receive one frame set, or `None` on a recv timeout.
    async fn recv(&mut self) -> Result<Option<Message>, WorkerError> {
        let received = match timeout(RECV_POLL_INTERVAL, self.socket.recv()).await {
            Ok(Ok(msg)) => msg,
            Ok(Err(e)) => return Err(WorkerError::from(e)),
            Err(_) => return Ok(None),
        };

        let parts: Vec<Vec<u8>> = received.into_vec().into_iter().map(|b| b.to_vec()).collect();
        if parts.len() < 2 {
            warn!(frames = parts.len(), "expected [header, payload] from coordinator");
            return Ok(None);
        }

        Ok(Some(Message::unpack(&[parts[0].clone(), parts[1].clone()])?))
    }

    /// Main event loop. One job runs at a time per connection;
    /// fan-out across jobs happens by running more worker processes, not by
    /// this loop overlapping dispatches.
    pub async fn run(&mut self) -> Result<(), WorkerError> {
        loop {
            let Some(msg) = self.recv().await? else {
                continue;
            };

            match msg.header.opcode {
                OpCode::Dispatch => {
                    let command: DispatchCommand = serde_json::from_slice(&msg.payload)?;
                    info!(job_id = %command.job_id, book_id = %command.book_id, "dispatch received");

                    let receipt = self.execute_job(&command).await;
                    self.send(OpCode::Conclude, msg.header.job_id, &receipt).await?;
                    self.tasks_completed += 1;

                    if self.should_recycle() {
                        info!(
                            tasks_completed = self.tasks_completed,
                            "recycling worker after reaching task/memory limit, exiting for supervisor restart"
                        );
                        return Ok(());
                    }
                }
                OpCode::Abort => {
                    // An abort reaching the idle loop (rather than the
                    // mid-job poll below) targets a job already concluded;
                    // nothing to do.
                    let abort: AbortCommand = serde_json::from_slice(&msg.payload)?;
                    warn!(job_id = %abort.job_id, "abort received while idle, ignoring");
                }
                OpCode::Reload => {
                    info!("reload requested, clearing NLP model residency cache");
                    self.model_cache.evict_expired();
                }
                OpCode::Err => {
                    let err: ErrorPayload = serde_json::from_slice(&msg.payload)?;
                    warn!(message = %err.message, transient = err.is_transient, "coordinator reported error");
                }
                other => {
                    warn!(opcode = ?other, "unexpected opcode from coordinator");
                }
            }
        }
    }

    /// Max-tasks/max-memory recycling: the worker exits
    /// cleanly and relies on an external process supervisor to restart it.
    fn should_recycle(&self) -> bool {
        if self.tasks_completed >= self.config.max_tasks_per_child {
            return true;
        }
        current_process_rss_bytes() >= self.config.max_memory_per_child_bytes
    }

    async fn execute_job(&mut self, command: &DispatchCommand) -> JobReceipt {
        match self.run_job(command).await {
            Ok(receipt) => receipt,
            Err(err) => JobReceipt {
                job_id: command.job_id.clone(),
                status: JobOutcome::Failed,
                descriptions_found: 0,
                images_requested: 0,
                error_message: Some(err.to_string()),
                is_transient: err.is_transient(),
                unavailable_processors: self.pipeline.unavailable_processors(),
            },
        }
    }

    async fn run_job(&mut self, command: &DispatchCommand) -> Result<JobReceipt, OrchestratorError> {
        // Pre-task hook: defer under load rather than
        // start a job the worker can't actually carry.
        if self.resources.memory_percent() > self.config.max_memory_percent
            || self.resources.cpu_percent() > self.config.max_cpu_percent
        {
            return Err(OrchestratorError::TransientIo(
                "worker under resource pressure, deferring job".to_string(),
            ));
        }

        let book = repo::get_book(&self.pool, &command.book_id)
            .await
            .map_err(|e| OrchestratorError::Fatal(e.to_string()))?;

        repo::set_book_processing(&self.pool, &command.book_id, true)
            .await
            .map_err(|e| OrchestratorError::TransientIo(e.to_string()))?;

        let cancel = CancellationToken::new();
        let loop_result = self
            .process_chapters(command, &book.owner_id, &cancel)
            .await;

        // Post-task hook: drop stale model residency
        // entries, the idiomatic stand-in for "force heap compaction/GC".
        self.model_cache.evict_expired();

        // Always clear the processing flag before returning: a job that
        // ends in retry must not leave the book permanently stuck.
        let _ = repo::set_book_processing(&self.pool, &command.book_id, false).await;

        match loop_result? {
            ChapterLoopOutcome::Completed {
                descriptions_found,
                images_requested,
            } => {
                repo::set_book_parsed(&self.pool, &command.book_id)
                    .await
                    .map_err(|e| OrchestratorError::TransientIo(e.to_string()))?;
                Ok(JobReceipt {
                    job_id: command.job_id.clone(),
                    status: JobOutcome::Success,
                    descriptions_found,
                    images_requested,
                    error_message: None,
                    is_transient: false,
                    unavailable_processors: self.pipeline.unavailable_processors(),
                })
            }
            ChapterLoopOutcome::Cancelled {
                descriptions_found,
                images_requested,
            } => Ok(JobReceipt {
                job_id: command.job_id.clone(),
                status: JobOutcome::Cancelled,
                descriptions_found,
                images_requested,
                error_message: None,
                is_transient: false,
                unavailable_processors: self.pipeline.unavailable_processors(),
            }),
        }
    }

    /// Streams a book's chapters through the pipeline in order, skipping
    /// chapters already parsed, checking the soft and hard time limits and
    /// the cooperative cancel flag between each one, and sending periodic
    /// heartbeats.
    async fn process_chapters(
        &mut self,
        command: &DispatchCommand,
        owner_id: &str,
        cancel: &CancellationToken,
    ) -> Result<ChapterLoopOutcome, OrchestratorError> {
        let chapters = repo::chapters_for_book(&self.pool, &command.book_id)
            .await
            .map_err(|e| OrchestratorError::TransientIo(e.to_string()))?;

        let total = chapters.len() as u32;
        let mut descriptions_found: u32 = 0;
        let mut images_requested: u32 = 0;
        let started_at = Instant::now();
        let mut last_heartbeat = Instant::now();

        for (index, chapter) in chapters.iter().enumerate() {
            if chapter.is_description_parsed {
                continue;
            }

            if cancel.is_cancelled() {
                return Ok(ChapterLoopOutcome::Cancelled {
                    descriptions_found,
                    images_requested,
                });
            }

            let elapsed = started_at.elapsed();
            if elapsed >= self.config.hard_time_limit {
                warn!(job_id = %command.job_id, ?elapsed, "hard time limit exceeded, treating as executor failure");
                return Err(OrchestratorError::Timeout(format!(
                    "hard time limit of {:?} exceeded",
                    self.config.hard_time_limit
                )));
            }
            if elapsed >= self.config.soft_time_limit {
                warn!(job_id = %command.job_id, ?elapsed, "soft time limit exceeded, stopping cooperatively");
                return Err(OrchestratorError::Timeout(format!(
                    "soft time limit of {:?} exceeded",
                    self.config.soft_time_limit
                )));
            }

            self.warm_processors().await;

            let descriptions = self
                .pipeline
                .process_chapter(&self.pool, owner_id, chapter)
                .await
                .map_err(|e| OrchestratorError::ProcessorUnavailable(e.to_string()))?;

            descriptions_found += descriptions.len() as u32;
            images_requested +=
                descriptions.iter().filter(|d| d.is_suitable_for_generation).count() as u32;

            if last_heartbeat.elapsed() >= HEARTBEAT_INTERVAL {
                let heartbeat = HeartbeatPayload {
                    job_id: command.job_id.clone(),
                    chapters_completed: (index + 1) as u32,
                    chapters_total: total,
                };
                if let Err(err) = self.send(OpCode::Heartbeat, WireJobId::new(0), &heartbeat).await {
                    warn!(job_id = %command.job_id, error = %err, "failed to send heartbeat");
                }
                last_heartbeat = Instant::now();
            }

            self.poll_for_abort(command, cancel).await;
        }

        Ok(ChapterLoopOutcome::Completed {
            descriptions_found,
            images_requested,
        })
    }

    /// Non-blocking poll for an in-flight `Abort` targeting the current job,
    /// run between every chapter so cancellation doesn't wait for the whole
    /// book ("checks a cancel flag between chapters").
    async fn poll_for_abort(&mut self, command: &DispatchCommand, cancel: &CancellationToken) {
        match self.recv().await {
            Ok(Some(msg)) if msg.header.opcode == OpCode::Abort => {
                match serde_json::from_slice::<AbortCommand>(&msg.payload) {
                    Ok(abort) if abort.job_id == command.job_id => {
                        info!(job_id = %command.job_id, reason = %abort.reason, "abort requested, stopping cooperatively");
                        cancel.cancel();
                    }
                    Ok(abort) => {
                        warn!(job_id = %abort.job_id, current = %command.job_id, "abort for a different job, ignoring");
                    }
                    Err(e) => warn!(error = %e, "failed to parse abort payload"),
                }
            }
            Ok(Some(msg)) => {
                warn!(opcode = ?msg.header.opcode, "ignoring unexpected message mid-job");
            }
            Ok(None) => {}
            Err(e) => warn!(error = %e, "control-plane poll error mid-job"),
        }
    }

    /// Warms every enabled processor's model via the residency cache
    /// (the "per-process LRU-like registry"): a processor past its
    /// TTL or never loaded gets a fresh `load()` before extraction.
    async fn warm_processors(&mut self) {
        for (processor, _cfg) in self.pipeline.registry().enabled() {
            let name = processor.name().to_string();
            if self.model_cache.needs_load(&name) {
                if let Err(e) = processor.load().await {
                    warn!(processor = %name, error = %e, "model load failed, extraction may fall back to unavailable");
                }
            }
            self.model_cache.touch(&name);
        }
    }
}

/// Current process RSS in bytes, for max-memory-per-child recycling. A
/// fresh, single-process `System` snapshot rather than the shared
/// [`ResourceSampler`]: that trait reports system-wide usage for the
/// pre-task admission hook, not this process's own footprint.
fn current_process_rss_bytes() -> u64 {
    use sysinfo::System;

    let Ok(pid) = sysinfo::get_current_pid() else {
        return 0;
    };
    let mut system = System::new();
    system.refresh_process(pid);
    system.process(pid).map(|p| p.memory()).unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn worker_config_carries_execution_limits_from_orchestrator_config() {
        let cfg = storyloom_protocol::config::OrchestratorConfig::default();
        let worker_cfg = WorkerConfig::from_orchestrator_config(
            "tcp://127.0.0.1:5575".to_string(),
            "worker-1".to_string(),
            vec!["normal".to_string()],
            1,
            &cfg,
        );
        assert_eq!(worker_cfg.soft_time_limit, Duration::from_secs(1500));
        assert_eq!(worker_cfg.hard_time_limit, Duration::from_secs(1800));
        assert_eq!(worker_cfg.max_tasks_per_child, 10);
    }
}
