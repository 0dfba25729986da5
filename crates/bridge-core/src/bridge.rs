//! The bridge context.
//!
//! A [`Bridge`] owns every component of one bridge process: configuration,
//! session id, remote transport, request processor, coalescer, output writer,
//! connection state and shutdown signal. Nothing is global; the binary
//! builds one instance, probes the remote with [`Bridge::connect`], then
//! drives the local input through [`Bridge::run`].

use crate::coalesce::Coalescer;
use crate::config::BridgeConfig;
use crate::error::{BridgeError, Result};
use crate::lifecycle::{CancellationToken, ConnectionState, ConnectionStateMachine};
use crate::network::{HttpTransport, RemoteTransport, RetryExecutor};
use crate::processor::{LocalHandler, LogLevelControl, PendingResponse, ProcessorStats, RequestProcessor};
use crate::protocol::{Classifier, Message, Request, RpcResponse};
use crate::transport::{LineReader, LineWriter};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncBufRead, AsyncWrite};
use tokio::sync::mpsc;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};

/// Why [`Bridge::run`] returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BridgeExit {
    /// The local input stream was closed.
    EndOfInput,
    /// The `shutdown` control method or an OS signal asked us to stop.
    ShutdownRequested,
    /// Reading input or writing output failed.
    TransportFailure,
}

/// Builder for [`Bridge`].
///
/// # Example
///
/// ```rust,ignore
/// let bridge = Bridge::builder(BridgeConfig::new(api_key))
///     .with_log_control(log_handle)
///     .build(tokio::io::stdout())?;
/// bridge.connect().await?;
/// let exit = bridge.run(BufReader::new(tokio::io::stdin())).await?;
/// ```
pub struct BridgeBuilder {
    config: BridgeConfig,
    transport: Option<Arc<dyn RemoteTransport>>,
    log_control: Option<Arc<dyn LogLevelControl>>,
    session_id: Option<String>,
    signal: Option<CancellationToken>,
}

impl BridgeBuilder {
    pub fn new(config: BridgeConfig) -> Self {
        Self {
            config,
            transport: None,
            log_control: None,
            session_id: None,
            signal: None,
        }
    }

    /// Use a custom remote transport instead of the HTTP one.
    pub fn with_transport(mut self, transport: Arc<dyn RemoteTransport>) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Hook used by `logging/setLevel`.
    pub fn with_log_control(mut self, control: Arc<dyn LogLevelControl>) -> Self {
        self.log_control = Some(control);
        self
    }

    /// Fix the session correlation id. Default: a random UUID v4.
    pub fn with_session_id(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    /// Share an existing shutdown token, e.g. one wired to OS signals.
    pub fn with_shutdown_signal(mut self, signal: CancellationToken) -> Self {
        self.signal = Some(signal);
        self
    }

    /// Validate the configuration and assemble the bridge.
    ///
    /// Starts the worker pool, so it must be called from within a tokio
    /// runtime.
    pub fn build<W>(self, output: W) -> Result<Bridge>
    where
        W: AsyncWrite + Send + Unpin + 'static,
    {
        self.config.validate()?;

        let session_id = self
            .session_id
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
        let transport: Arc<dyn RemoteTransport> = match self.transport {
            Some(transport) => transport,
            None => Arc::new(HttpTransport::new(&self.config.remote, session_id.clone())?),
        };
        let signal = self.signal.unwrap_or_default();
        let state = Arc::new(ConnectionStateMachine::new());

        let executor = Arc::new(RetryExecutor::new(
            Arc::clone(&transport),
            self.config.retry.clone(),
        ));
        let local = LocalHandler::new(signal.clone(), self.log_control);
        let processor = RequestProcessor::start(&self.config.processor, executor, local);

        let (released_tx, released) = mpsc::unbounded_channel();
        let coalescer = Coalescer::new(
            self.config.coalesce.window,
            self.config.coalesce.mode,
            move |request: Request| {
                if released_tx.send(request).is_err() {
                    debug!("Coalesced request released after the read loop ended");
                }
            },
        );

        info!(
            "Bridge session {} forwarding to {}",
            session_id,
            self.config.remote.mcp_url()
        );

        Ok(Bridge {
            classifier: Classifier::new(self.config.coalesce.batchable_methods.clone()),
            writer: Arc::new(LineWriter::new(output, Arc::clone(&state))),
            config: self.config,
            session_id,
            transport,
            processor,
            coalescer,
            released,
            state,
            signal,
            tracker: TaskTracker::new(),
            transport_failed: Arc::new(AtomicBool::new(false)),
        })
    }
}

/// One running bridge instance.
pub struct Bridge {
    config: BridgeConfig,
    session_id: String,
    transport: Arc<dyn RemoteTransport>,
    processor: RequestProcessor,
    classifier: Classifier,
    coalescer: Coalescer<Request>,
    released: mpsc::UnboundedReceiver<Request>,
    writer: Arc<LineWriter>,
    state: Arc<ConnectionStateMachine>,
    signal: CancellationToken,
    tracker: TaskTracker,
    transport_failed: Arc<AtomicBool>,
}

impl Bridge {
    pub fn builder(config: BridgeConfig) -> BridgeBuilder {
        BridgeBuilder::new(config)
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn config(&self) -> &BridgeConfig {
        &self.config
    }

    pub fn state(&self) -> ConnectionState {
        self.state.state()
    }

    /// Token that stops [`Bridge::run`] when cancelled.
    pub fn shutdown_signal(&self) -> CancellationToken {
        self.signal.clone()
    }

    pub fn stats(&self) -> ProcessorStats {
        self.processor.stats()
    }

    /// Run the startup liveness probe and enter `CONNECTED`.
    ///
    /// Authentication and authorization failures come back as their own
    /// error variants so the caller can report them distinctly.
    pub async fn connect(&self) -> Result<()> {
        info!("Probing remote service at {}", self.config.remote.health_url());
        if let Err(err) = self.transport.health_check().await {
            if err.is_auth_error() {
                error!("Liveness probe rejected credentials: {}", err);
            } else {
                error!("Liveness probe failed: {}", err);
            }
            return Err(err);
        }

        if !self.state.mark_connected() {
            debug!("Bridge already left {}", ConnectionState::Connecting);
        }
        Ok(())
    }

    /// Read requests from `input` until end of input, a shutdown request or a
    /// transport failure, then shut down.
    ///
    /// Every request read before the loop exits gets exactly one response
    /// line, including requests still buffered by the coalescer.
    pub async fn run<R>(&mut self, input: R) -> Result<BridgeExit>
    where
        R: AsyncBufRead + Unpin,
    {
        if !self.state.accepts_requests() {
            return Err(BridgeError::NotConnected {
                state: self.state.state().to_string(),
            });
        }

        let mut reader = LineReader::new(input);
        let exit = loop {
            tokio::select! {
                biased;

                _ = self.signal.cancelled() => {
                    break if self.transport_failed.load(Ordering::SeqCst) {
                        BridgeExit::TransportFailure
                    } else {
                        info!("Shutdown requested");
                        BridgeExit::ShutdownRequested
                    };
                }
                Some(request) = self.released.recv() => {
                    self.dispatch(request).await;
                }
                line = reader.next_line() => match line {
                    Ok(Some(line)) => self.handle_line(&line).await,
                    Ok(None) => {
                        info!("End of input");
                        break BridgeExit::EndOfInput;
                    }
                    Err(err) => {
                        error!("Failed to read input: {}", err);
                        break BridgeExit::TransportFailure;
                    }
                },
            }
        };

        self.shutdown().await;
        Ok(exit)
    }

    async fn handle_line(&self, line: &str) {
        let Some(message) = self.classifier.classify(line) else {
            return;
        };

        match message {
            Message::Invalid(invalid) => {
                if let Some(response) = invalid.response() {
                    write_response(&self.writer, &response, &self.transport_failed, &self.signal)
                        .await;
                }
            }
            Message::Notification(notification) => self.processor.notify(notification).await,
            Message::Request(request) => {
                if request.batchable && self.coalescer.is_enabled() {
                    debug!("Coalescing {} ({})", request.method, request.id);
                    self.coalescer.enqueue(request);
                } else {
                    self.dispatch(request).await;
                }
            }
        }
    }

    /// Submit a request and write its response from a tracked task.
    async fn dispatch(&self, request: Request) {
        let pending: PendingResponse = self.processor.submit(request).await;
        let writer = Arc::clone(&self.writer);
        let failed = Arc::clone(&self.transport_failed);
        let signal = self.signal.clone();

        self.tracker.spawn(async move {
            let response = pending.await;
            write_response(&writer, &response, &failed, &signal).await;
        });
    }

    async fn shutdown(&mut self) {
        if !self.state.begin_shutdown() {
            return;
        }
        let grace = self.config.processor.shutdown_grace;
        info!("Bridge state: {}", self.state.state());

        self.coalescer.flush();
        while let Ok(request) = self.released.try_recv() {
            self.dispatch(request).await;
        }

        self.processor.shutdown(grace).await;

        self.tracker.close();
        if tokio::time::timeout(grace, self.tracker.wait()).await.is_err() {
            warn!(
                "{} response writers still running after {:?}",
                self.tracker.len(),
                grace
            );
        }

        self.state.mark_disconnected();
        let stats = self.processor.stats();
        info!(
            "Bridge stopped: {} submitted, {} completed, {} caller-runs, {} rejected",
            stats.submitted, stats.completed, stats.caller_runs, stats.rejected
        );
    }
}

async fn write_response(
    writer: &LineWriter,
    response: &RpcResponse,
    failed: &AtomicBool,
    signal: &CancellationToken,
) {
    match writer.write_response(response).await {
        Ok(()) => {}
        Err(BridgeError::TransportClosed) => {
            warn!("Response for {:?} dropped, output already closed", response.id);
        }
        Err(err) => {
            error!("Failed to write response for {:?}: {}", response.id, err);
            failed.store(true, Ordering::SeqCst);
            signal.cancel();
        }
    }
}
