//! Bounded worker pool that executes remote calls.
//!
//! Requests are admitted through [`RequestProcessor::submit`], which returns a
//! [`PendingResponse`] resolving to exactly one [`RpcResponse`]. Admitted
//! jobs go through a bounded queue drained by a fixed set of workers. When
//! the queue is full the job runs on the submitting task instead (caller
//! runs), which slows the producer down rather than dropping work.

mod local;
mod pending;

pub use local::{parse_log_level, LocalHandler, LocalMethod, LogLevelControl};
pub use pending::{PendingGuard, PendingRequests};

use crate::config::ProcessorConfig;
use crate::error::BridgeError;
use crate::network::RetryExecutor;
use crate::protocol::{Notification, Request, RequestId, RpcResponse};
use futures::future::BoxFuture;
use serde::Serialize;
use std::future::IntoFuture;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Unit of work on the queue.
enum Job {
    Request {
        request: Request,
        reply: oneshot::Sender<RpcResponse>,
        guard: PendingGuard,
    },
    Notification(Notification),
}

impl Job {
    fn method(&self) -> &str {
        match self {
            Job::Request { request, .. } => &request.method,
            Job::Notification(notification) => &notification.method,
        }
    }

    /// Complete the job without running it.
    fn fail(self, err: &BridgeError) {
        match self {
            Job::Request {
                request,
                reply,
                guard,
            } => {
                drop(guard);
                let _ = reply.send(RpcResponse::from_error(Some(request.id), err));
            }
            Job::Notification(notification) => {
                debug!("Dropping notification {}: {}", notification.method, err);
            }
        }
    }
}

#[derive(Debug, Default)]
struct Counters {
    submitted: AtomicU64,
    completed: AtomicU64,
    caller_runs: AtomicU64,
    rejected: AtomicU64,
    notifications: AtomicU64,
}

/// Point-in-time processor counters.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ProcessorStats {
    pub submitted: u64,
    pub completed: u64,
    /// Jobs executed on the submitting task because the queue was full.
    pub caller_runs: u64,
    /// Requests answered with an error before reaching a worker.
    pub rejected: u64,
    pub notifications: u64,
    pub in_flight: usize,
}

/// Bounded executor for remote calls.
pub struct RequestProcessor {
    queue: Mutex<Option<mpsc::Sender<Job>>>,
    receiver: Arc<tokio::sync::Mutex<mpsc::Receiver<Job>>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    shut_down: AtomicBool,
    executor: Arc<RetryExecutor>,
    local: LocalHandler,
    pending: Arc<PendingRequests>,
    counters: Arc<Counters>,
    request_timeout: Option<Duration>,
}

impl RequestProcessor {
    /// Start the worker pool. Must be called from within a tokio runtime.
    pub fn start(config: &ProcessorConfig, executor: Arc<RetryExecutor>, local: LocalHandler) -> Self {
        let (sender, receiver) = mpsc::channel(config.queue_capacity.max(1));
        let receiver = Arc::new(tokio::sync::Mutex::new(receiver));
        let counters = Arc::new(Counters::default());

        let workers = (0..config.workers.max(1))
            .map(|index| {
                tokio::spawn(worker_loop(
                    index,
                    Arc::clone(&receiver),
                    Arc::clone(&executor),
                    Arc::clone(&counters),
                ))
            })
            .collect::<Vec<_>>();

        info!(
            "Request processor started with {} workers, queue capacity {}",
            workers.len(),
            config.queue_capacity
        );

        Self {
            queue: Mutex::new(Some(sender)),
            receiver,
            workers: Mutex::new(workers),
            shut_down: AtomicBool::new(false),
            executor,
            local,
            pending: PendingRequests::new(),
            counters,
            request_timeout: config.request_timeout,
        }
    }

    /// Admit a request and return the future of its response.
    ///
    /// Local control methods, duplicates of in-flight ids and submissions
    /// after shutdown resolve immediately. When the queue is full the remote
    /// call runs before this method returns.
    pub async fn submit(&self, request: Request) -> PendingResponse {
        self.counters.submitted.fetch_add(1, Ordering::Relaxed);

        if self.is_shut_down() {
            self.counters.rejected.fetch_add(1, Ordering::Relaxed);
            return PendingResponse::ready(RpcResponse::from_error(
                Some(request.id),
                &BridgeError::ProcessorShutdown,
            ));
        }

        if let Some(response) = self.local.handle(&request) {
            self.counters.completed.fetch_add(1, Ordering::Relaxed);
            return PendingResponse::ready(response);
        }

        let guard = match self.pending.register(&request) {
            Ok(guard) => guard,
            Err(err) => {
                warn!("Rejecting request {}: {}", request.id, err);
                self.counters.rejected.fetch_add(1, Ordering::Relaxed);
                return PendingResponse::ready(RpcResponse::from_error(Some(request.id), &err));
            }
        };

        let id = request.id.clone();
        let (reply, receiver) = oneshot::channel();
        self.enqueue(Job::Request {
            request,
            reply,
            guard,
        })
        .await;

        PendingResponse {
            id: Some(id),
            state: PendingState::Waiting(receiver),
            timeout: self.request_timeout,
        }
    }

    /// Forward a notification. Failures are logged, never reported.
    pub async fn notify(&self, notification: Notification) {
        if self.local.absorbs_notification(&notification.method) {
            debug!("Absorbed notification {}", notification.method);
            return;
        }
        if self.is_shut_down() {
            debug!(
                "Dropping notification {} after shutdown",
                notification.method
            );
            return;
        }
        self.counters.notifications.fetch_add(1, Ordering::Relaxed);
        self.enqueue(Job::Notification(notification)).await;
    }

    async fn enqueue(&self, job: Job) {
        let sender = self
            .queue
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        let Some(sender) = sender else {
            job.fail(&BridgeError::ProcessorShutdown);
            return;
        };

        match sender.try_send(job) {
            Ok(()) => {}
            Err(TrySendError::Full(job)) => {
                self.counters.caller_runs.fetch_add(1, Ordering::Relaxed);
                debug!("Queue full, running {} on the submitting task", job.method());
                run_job(job, &self.executor, &self.counters).await;
            }
            Err(TrySendError::Closed(job)) => job.fail(&BridgeError::ProcessorShutdown),
        }
    }

    /// Stop accepting work and drain in-flight jobs.
    ///
    /// Workers get `grace` to finish what is queued; after that they are
    /// aborted and every unfinished request resolves to a shutdown error.
    /// Calling this more than once is a no-op.
    pub async fn shutdown(&self, grace: Duration) {
        if self.shut_down.swap(true, Ordering::SeqCst) {
            return;
        }

        drop(
            self.queue
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .take(),
        );
        let workers =
            std::mem::take(&mut *self.workers.lock().unwrap_or_else(PoisonError::into_inner));
        let aborts: Vec<_> = workers.iter().map(JoinHandle::abort_handle).collect();

        info!(
            "Draining request processor ({} in flight, grace {:?})",
            self.pending.len(),
            grace
        );

        if tokio::time::timeout(grace, futures::future::join_all(workers))
            .await
            .is_err()
        {
            warn!(
                "Shutdown grace of {:?} elapsed with {} requests in flight, aborting workers",
                grace,
                self.pending.len()
            );
            for handle in &aborts {
                handle.abort();
            }
        }

        let mut receiver = self.receiver.lock().await;
        receiver.close();
        let mut dropped = 0usize;
        while let Ok(job) = receiver.try_recv() {
            job.fail(&BridgeError::ProcessorShutdown);
            dropped += 1;
        }
        if dropped > 0 {
            warn!("Failed {} queued jobs on shutdown", dropped);
        }
        info!("Request processor stopped");
    }

    pub fn is_shut_down(&self) -> bool {
        self.shut_down.load(Ordering::SeqCst)
    }

    pub fn pending(&self) -> &PendingRequests {
        &self.pending
    }

    pub fn stats(&self) -> ProcessorStats {
        ProcessorStats {
            submitted: self.counters.submitted.load(Ordering::Relaxed),
            completed: self.counters.completed.load(Ordering::Relaxed),
            caller_runs: self.counters.caller_runs.load(Ordering::Relaxed),
            rejected: self.counters.rejected.load(Ordering::Relaxed),
            notifications: self.counters.notifications.load(Ordering::Relaxed),
            in_flight: self.pending.len(),
        }
    }
}

async fn worker_loop(
    index: usize,
    receiver: Arc<tokio::sync::Mutex<mpsc::Receiver<Job>>>,
    executor: Arc<RetryExecutor>,
    counters: Arc<Counters>,
) {
    loop {
        let job = {
            let mut receiver = receiver.lock().await;
            receiver.recv().await
        };
        let Some(job) = job else {
            debug!("Worker {} exiting", index);
            break;
        };
        run_job(job, &executor, &counters).await;
    }
}

async fn run_job(job: Job, executor: &RetryExecutor, counters: &Counters) {
    match job {
        Job::Request {
            request,
            reply,
            guard,
        } => {
            let (outcome, stats) = executor.call(&request.to_forward_body()).await;
            match &outcome {
                Ok(_) => debug!(
                    "{} ({}) completed after {} attempt(s)",
                    request.method, request.id, stats.attempts
                ),
                Err(err) => warn!(
                    "{} ({}) failed after {} attempt(s): {}",
                    request.method, request.id, stats.attempts, err
                ),
            }

            let response = RpcResponse::from_outcome(request.id, outcome);
            drop(guard);
            counters.completed.fetch_add(1, Ordering::Relaxed);
            if reply.send(response).is_err() {
                debug!("Response receiver dropped before completion");
            }
        }
        Job::Notification(notification) => {
            let (outcome, _) = executor.call(&notification.to_forward_body()).await;
            if let Err(err) = outcome {
                warn!("Notification {} failed: {}", notification.method, err);
            }
        }
    }
}

enum PendingState {
    Ready(RpcResponse),
    Waiting(oneshot::Receiver<RpcResponse>),
}

/// Future of the single response owed to a request.
pub struct PendingResponse {
    id: Option<RequestId>,
    state: PendingState,
    timeout: Option<Duration>,
}

impl PendingResponse {
    fn ready(response: RpcResponse) -> Self {
        Self {
            id: response.id.clone(),
            state: PendingState::Ready(response),
            timeout: None,
        }
    }

    pub fn id(&self) -> Option<&RequestId> {
        self.id.as_ref()
    }

    pub fn is_ready(&self) -> bool {
        matches!(self.state, PendingState::Ready(_))
    }

    /// Wait for the response.
    ///
    /// Resolves to a timeout error when the request timeout elapses first,
    /// and to a shutdown error when the job was abandoned.
    pub async fn wait(self) -> RpcResponse {
        let receiver = match self.state {
            PendingState::Ready(response) => return response,
            PendingState::Waiting(receiver) => receiver,
        };

        let received = match self.timeout {
            Some(limit) => match tokio::time::timeout(limit, receiver).await {
                Ok(received) => received,
                Err(_) => {
                    warn!("Request {:?} timed out after {:?}", self.id, limit);
                    return RpcResponse::from_error(self.id, &BridgeError::Timeout(limit));
                }
            },
            None => receiver.await,
        };

        received.unwrap_or_else(|_| {
            RpcResponse::from_error(self.id, &BridgeError::ProcessorShutdown)
        })
    }
}

impl IntoFuture for PendingResponse {
    type Output = RpcResponse;
    type IntoFuture = BoxFuture<'static, RpcResponse>;

    fn into_future(self) -> Self::IntoFuture {
        Box::pin(self.wait())
    }
}
