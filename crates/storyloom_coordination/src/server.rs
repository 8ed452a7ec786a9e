//! Control-plane listener: the ROUTER side of the Split Plane Protocol.
//!
//! Tracks the connected worker registry and drives the message loop for
//! `ParsingJob` dispatch. Workers connect with a `DealerSocket` (see
//! `storyloom_worker::worker::Worker`);
//! each inbound frame set carries a ZMQ routing identity as its first
//! frame, which this listener strips before unpacking the protocol header.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use tracing::{info, warn};
use zeromq::{RouterSocket, Socket, SocketRecv, SocketSend};

use storyloom_protocol::{
    DispatchCommand, ErrorPayload, Header, HeartbeatPayload, IdentifyPayload, JobReceipt, Message,
    OpCode, WireJobId,
};

use crate::db::JobQueue;

const WORKER_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerStatus {
    Idle,
    Busy,
}

struct ConnectedWorker {
    status: WorkerStatus,
    current_job_id: Option<String>,
    last_seen: Instant,
}

/// ROUTER-side listener. Tracks connected workers and routes dispatch
/// commands and abort requests by ZMQ identity frame.
pub struct CoordinationServer {
    socket: RouterSocket,
    workers: HashMap<Vec<u8>, ConnectedWorker>,
    queue: JobQueue,
}

impl CoordinationServer {
    pub async fn bind(addr: &str, queue: JobQueue) -> anyhow::Result<Self> {
        let mut socket = RouterSocket::new();
        socket.bind(addr).await?;
        info!(addr, "coordination server bound");
        Ok(Self {
            socket,
            workers: HashMap::new(),
            queue,
        })
    }

    /// Idle-worker identities, for the dispatcher to hand jobs to.
    pub fn idle_workers(&self) -> Vec<Vec<u8>> {
        self.workers
            .iter()
            .filter(|(_, w)| w.status == WorkerStatus::Idle)
            .map(|(id, _)| id.clone())
            .collect()
    }

    pub async fn dispatch_to(
        &mut self,
        identity: Vec<u8>,
        job_id: WireJobId,
        command: &DispatchCommand,
    ) -> anyhow::Result<()> {
        let payload = serde_json::to_vec(command)?;
        let msg = Message::new(OpCode::Dispatch, job_id, payload)?;
        self.send_to(identity.clone(), msg).await?;
        if let Some(worker) = self.workers.get_mut(&identity) {
            worker.status = WorkerStatus::Busy;
            worker.current_job_id = Some(command.job_id.clone());
        }
        Ok(())
    }

    pub async fn abort(&mut self, identity: Vec<u8>, job_id: WireJobId, reason: &str) -> anyhow::Result<()> {
        let payload = storyloom_protocol::AbortCommand {
            job_id: job_id.to_string(),
            reason: reason.to_string(),
        };
        let bytes = serde_json::to_vec(&payload)?;
        let msg = Message::new(OpCode::Abort, job_id, bytes)?;
        self.send_to(identity, msg).await
    }

    async fn send_to(&mut self, identity: Vec<u8>, msg: Message) -> anyhow::Result<()> {
        let (header_bytes, payload_bytes) = msg.pack()?;

        // ROUTER sends need the destination identity as the first frame.
        let mut multipart = zeromq::ZmqMessage::from(identity);
        multipart.push_back(header_bytes.into());
        multipart.push_back(payload_bytes.into());
        self.socket.send(multipart).await?;
        Ok(())
    }

    /// Receive and dispatch one inbound frame set. Returns `Ok(false)` on a
    /// recv timeout so the caller's loop can interleave dispatch ticks.
    pub async fn recv_one(&mut self) -> anyhow::Result<bool> {
        let timeout = Duration::from_millis(100);
        let multipart = match tokio::time::timeout(timeout, self.socket.recv()).await {
            Ok(Ok(msg)) => msg,
            Ok(Err(e)) => return Err(anyhow::anyhow!("zmq recv error: {e}")),
            Err(_) => return Ok(false),
        };

        let parts: Vec<Vec<u8>> = multipart.into_vec().into_iter().map(|b| b.to_vec()).collect();
        if parts.len() < 3 {
            warn!(frames = parts.len(), "expected [identity, header, payload]");
            return Ok(true);
        }

        let identity = parts[0].clone();
        let header = Header::unpack(&parts[1])?;
        let payload = &parts[2];

        self.workers
            .entry(identity.clone())
            .or_insert(ConnectedWorker {
                status: WorkerStatus::Idle,
                current_job_id: None,
                last_seen: Instant::now(),
            })
            .last_seen = Instant::now();

        match header.opcode {
            OpCode::Identify => {
                let identify: IdentifyPayload = serde_json::from_slice(payload)?;
                info!(worker_id = %identify.worker_id, "worker identified");
            }
            OpCode::Heartbeat => {
                let hb: HeartbeatPayload = serde_json::from_slice(payload)?;
                info!(job_id = %hb.job_id, completed = hb.chapters_completed, total = hb.chapters_total, "heartbeat");
            }
            OpCode::Conclude => {
                let receipt: JobReceipt = serde_json::from_slice(payload)?;
                self.handle_conclude(identity, receipt).await?;
            }
            OpCode::Err => {
                let err: ErrorPayload = serde_json::from_slice(payload)?;
                warn!(message = %err.message, transient = err.is_transient, "worker reported error");
            }
            other => {
                warn!(opcode = ?other, "unexpected opcode from worker");
            }
        }

        Ok(true)
    }

    async fn handle_conclude(&mut self, identity: Vec<u8>, receipt: JobReceipt) -> anyhow::Result<()> {
        if let Some(worker) = self.workers.get_mut(&identity) {
            worker.status = WorkerStatus::Idle;
            worker.current_job_id = None;
        }

        match receipt.status {
            storyloom_protocol::JobOutcome::Success => {
                self.queue.complete_job(&receipt.job_id).await?;
            }
            storyloom_protocol::JobOutcome::Cancelled => {
                self.queue.cancel_job(&receipt.job_id).await?;
            }
            storyloom_protocol::JobOutcome::Failed => {
                let message = receipt.error_message.unwrap_or_default();
                let attempts = self
                    .queue
                    .get_job(&receipt.job_id)
                    .await?
                    .map(|j| j.attempts)
                    .unwrap_or(0);

                if crate::retry::should_retry(attempts, receipt.is_transient) {
                    let delay = crate::retry::backoff_duration(attempts as u32);
                    let not_before = chrono::Utc::now()
                        + chrono::Duration::from_std(delay).unwrap_or_default();
                    self.queue
                        .requeue_job_after_failure(&receipt.job_id, &message, not_before)
                        .await?;
                } else {
                    self.queue.fail_job(&receipt.job_id, &message).await?;
                }
            }
        }
        Ok(())
    }

    /// Drop workers that haven't been heard from in `WORKER_TIMEOUT`.
    pub fn reap_stale_workers(&mut self) {
        let now = Instant::now();
        self.workers
            .retain(|_, w| now.duration_since(w.last_seen) < WORKER_TIMEOUT);
    }
}

