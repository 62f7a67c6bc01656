//! Background subtree propagation.
//!
//! Archive and restore return as soon as the target record is patched; the
//! descendant walk is queued here and executed by a single worker task.
//! Every job goes through the [`PropagationJournal`] first so that jobs
//! interrupted by a crash are re-queued the next time the queue starts.

use std::sync::Arc;

use anyhow::anyhow;
use tokio::sync::{mpsc, oneshot, RwLock};
use tokio::task::JoinHandle;
use tracing::{info, warn};
use uuid::Uuid;

use crate::error::{DocError, DocResult};
use crate::events::{Event, EventBus};
use crate::journal::{JournalRecord, PendingJob, PropagationJournal};
use crate::storage::DocumentTable;
use crate::tree::{self, PropagationReport, SubtreeChange};

type Outcome = DocResult<PropagationReport>;

struct Job {
    pending: PendingJob,
    done: oneshot::Sender<Outcome>,
}

/// Handle on a queued propagation. Dropping it does not cancel the job.
pub struct PropagationTicket {
    job: Uuid,
    rx: oneshot::Receiver<Outcome>,
}

impl PropagationTicket {
    pub fn job_id(&self) -> Uuid {
        self.job
    }

    /// Wait until the whole subtree has been written.
    pub async fn wait(self) -> Outcome {
        let job = self.job;
        self.rx.await.map_err(|_| {
            DocError::Storage(anyhow!("propagation worker stopped before job {} finished", job))
        })?
    }
}

pub struct PropagationQueue {
    tx: mpsc::UnboundedSender<Job>,
    journal: Arc<PropagationJournal>,
    worker: JoinHandle<()>,
    recovered: Vec<PropagationTicket>,
}

impl PropagationQueue {
    /// Spawn the worker and re-queue every job the journal still lists as
    /// pending. Must be called from within a tokio runtime.
    pub fn start(
        table: Arc<RwLock<DocumentTable>>,
        journal: Arc<PropagationJournal>,
        events: EventBus,
        max_depth: usize,
    ) -> anyhow::Result<Self> {
        let pending = journal.pending()?;
        let (tx, rx) = mpsc::unbounded_channel();
        let worker = tokio::spawn(Self::run(rx, table, journal.clone(), events, max_depth));

        let mut queue = Self {
            tx,
            journal,
            worker,
            recovered: Vec::new(),
        };
        if !pending.is_empty() {
            info!(jobs = pending.len(), "resuming unfinished subtree propagations");
        }
        for job in pending {
            let ticket = queue.submit(job)?;
            queue.recovered.push(ticket);
        }
        Ok(queue)
    }

    /// Record the job in the journal and hand it to the worker.
    pub fn schedule(
        &self,
        user_id: &str,
        root: Uuid,
        change: SubtreeChange,
    ) -> DocResult<PropagationTicket> {
        let pending = PendingJob {
            job: Uuid::new_v4(),
            user_id: user_id.to_string(),
            root,
            change,
        };
        self.journal
            .append(&JournalRecord::Scheduled(pending.clone()))?;
        self.submit(pending)
    }

    /// Tickets for jobs resumed from the journal at startup.
    pub fn take_recovered(&mut self) -> Vec<PropagationTicket> {
        std::mem::take(&mut self.recovered)
    }

    /// Stop accepting jobs and wait for the queued ones to finish.
    pub async fn shutdown(self) -> anyhow::Result<()> {
        drop(self.tx);
        self.worker.await?;
        Ok(())
    }

    fn submit(&self, pending: PendingJob) -> DocResult<PropagationTicket> {
        let (done, rx) = oneshot::channel();
        let job = pending.job;
        self.tx
            .send(Job { pending, done })
            .map_err(|_| DocError::Storage(anyhow!("propagation queue is closed")))?;
        Ok(PropagationTicket { job, rx })
    }

    /// A missing root does not count: its former children are still walked.
    async fn root_disagrees(
        table: &RwLock<DocumentTable>,
        root: Uuid,
        change: SubtreeChange,
    ) -> bool {
        table
            .read()
            .await
            .get(root)
            .map_or(false, |doc| doc.is_archived != change.archived())
    }

    async fn run(
        mut rx: mpsc::UnboundedReceiver<Job>,
        table: Arc<RwLock<DocumentTable>>,
        journal: Arc<PropagationJournal>,
        events: EventBus,
        max_depth: usize,
    ) {
        while let Some(Job { pending, done }) = rx.recv().await {
            let PendingJob {
                job,
                ref user_id,
                root,
                change,
            } = pending;
            let outcome = if Self::root_disagrees(&table, root, change).await {
                info!(%job, %root, ?change, "root changed since scheduling, skipping propagation");
                Ok(PropagationReport {
                    superseded: true,
                    ..PropagationReport::default()
                })
            } else {
                tree::propagate(&table, user_id, root, change, max_depth).await
            };
            match &outcome {
                Ok(report) => {
                    // left unfinished on failure so the next start retries it
                    if let Err(e) = journal.append(&JournalRecord::Finished { job }) {
                        warn!(%job, error = %e, "could not mark propagation finished");
                    }
                    info!(%job, %root, ?change, patched = report.patched, "subtree propagation finished");
                    events.send(Event::PropagationFinished {
                        job,
                        root,
                        patched: report.patched,
                    });
                }
                Err(e) => {
                    warn!(%job, %root, ?change, error = %e, "subtree propagation failed");
                    events.send(Event::PropagationFailed {
                        job,
                        root,
                        error: e.to_string(),
                    });
                }
            }
            let _ = done.send(outcome);
        }
    }
}
