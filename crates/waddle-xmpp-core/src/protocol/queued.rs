//! Partitioned, ordered stanza processing on the tokio runtime.
//!
//! Every session is pinned to one partition, so its stanzas are processed
//! one after the other in arrival order while different partitions run in
//! parallel. Handlers are synchronous and run on the blocking pool.

use std::sync::{Arc, Mutex};

use futures::future::join_all;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::config::QueueConfig;
use crate::error::{ProtocolError, ProtocolErrorKind};
use crate::protocol::worker::{ProtocolWorker, StanzaProcessor};
use crate::session::SessionContext;
use crate::stanza::Stanza;

enum Work {
    Stanza(Arc<SessionContext>, Stanza),
    TlsEstablished(Arc<SessionContext>),
}

impl Work {
    fn session_id(&self) -> Uuid {
        match self {
            Self::Stanza(session, _) | Self::TlsEstablished(session) => session.id(),
        }
    }

    fn run(self, worker: &ProtocolWorker) {
        match self {
            Self::Stanza(session, stanza) => worker.process_stanza(&session, stanza),
            Self::TlsEstablished(session) => {
                if let Err(e) = worker.process_tls_established(&session) {
                    warn!(session_id = %session.id(), error = %e, "TLS notification rejected");
                }
            }
        }
    }
}

/// [`StanzaProcessor`] that queues work per session partition.
///
/// Must be created inside a tokio runtime.
pub struct QueuedStanzaProcessor {
    partitions: Vec<mpsc::UnboundedSender<Work>>,
    shutdown: CancellationToken,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl QueuedStanzaProcessor {
    pub fn new(worker: Arc<ProtocolWorker>, config: &QueueConfig) -> Self {
        Self::with_shutdown(worker, config, CancellationToken::new())
    }

    /// Like [`QueuedStanzaProcessor::new`], stopping when `shutdown` is
    /// cancelled.
    pub fn with_shutdown(worker: Arc<ProtocolWorker>, config: &QueueConfig, shutdown: CancellationToken) -> Self {
        let count = config.partitions.max(1);
        info!(partitions = count, "Creating queued stanza processor");

        let mut partitions = Vec::with_capacity(count);
        let mut tasks = Vec::with_capacity(count);
        for index in 0..count {
            let (tx, rx) = mpsc::unbounded_channel();
            partitions.push(tx);
            tasks.push(tokio::spawn(run_partition(
                index,
                Arc::clone(&worker),
                rx,
                shutdown.clone(),
            )));
        }

        Self {
            partitions,
            shutdown,
            tasks: Mutex::new(tasks),
        }
    }

    pub fn partition_count(&self) -> usize {
        self.partitions.len()
    }

    /// The partition `session_id` is pinned to.
    pub fn partition_for(&self, session_id: Uuid) -> usize {
        (session_id.as_u128() % self.partitions.len() as u128) as usize
    }

    fn enqueue(&self, work: Work) -> Result<(), ProtocolError> {
        let partition = self.partition_for(work.session_id());
        self.partitions[partition]
            .send(work)
            .map_err(|_| ProtocolError::new(ProtocolErrorKind::Other, "stanza processor is shut down"))
    }

    /// Stop every partition after the item it is currently processing.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }

    /// Stop and wait for every partition task to finish.
    pub async fn shutdown_and_wait(&self) {
        self.shutdown();
        let tasks = std::mem::take(&mut *self.tasks.lock().unwrap_or_else(|e| e.into_inner()));
        for result in join_all(tasks).await {
            if let Err(e) = result {
                error!(error = %e, "Partition task failed");
            }
        }
    }
}

impl StanzaProcessor for QueuedStanzaProcessor {
    fn process_stanza(&self, session: &Arc<SessionContext>, stanza: Stanza) {
        if let Err(e) = self.enqueue(Work::Stanza(Arc::clone(session), stanza)) {
            warn!(session_id = %session.id(), error = %e, "Dropping stanza");
        }
    }

    /// Queued behind the session's pending stanzas. Only a shut down
    /// processor fails here; state errors are logged when the
    /// notification is processed.
    fn process_tls_established(&self, session: &Arc<SessionContext>) -> Result<(), ProtocolError> {
        self.enqueue(Work::TlsEstablished(Arc::clone(session)))
    }
}

impl Drop for QueuedStanzaProcessor {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

async fn run_partition(
    index: usize,
    worker: Arc<ProtocolWorker>,
    mut queue: mpsc::UnboundedReceiver<Work>,
    shutdown: CancellationToken,
) {
    debug!(partition = index, "Stanza partition started");
    loop {
        let work = tokio::select! {
            biased;
            _ = shutdown.cancelled() => break,
            work = queue.recv() => match work {
                Some(work) => work,
                None => break,
            },
        };

        let worker = Arc::clone(&worker);
        let session_id = work.session_id();
        match tokio::task::spawn_blocking(move || work.run(&worker)).await {
            Ok(()) => {}
            Err(e) if e.is_panic() => {
                error!(partition = index, session_id = %session_id, "Stanza processing panicked");
            }
            Err(e) => {
                warn!(partition = index, error = %e, "Stanza processing cancelled");
            }
        }
    }
    debug!(partition = index, "Stanza partition stopped");
}
