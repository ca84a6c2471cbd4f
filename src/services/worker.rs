use crate::services::executor::{Envelope, JobQueue};
use crate::services::pipeline::Pipelines;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;

pub struct BackgroundWorker {
    id: usize,
    queue: JobQueue,
    pipelines: Arc<Pipelines>,
    shutdown: watch::Receiver<bool>,
}

impl BackgroundWorker {
    pub fn new(
        id: usize,
        queue: JobQueue,
        pipelines: Arc<Pipelines>,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self {
            id,
            queue,
            pipelines,
            shutdown,
        }
    }

    pub async fn run(mut self) {
        tracing::info!("👷 Worker {} started", self.id);

        loop {
            if *self.shutdown.borrow() {
                break;
            }
            tokio::select! {
                _ = self.shutdown.changed() => {
                    tracing::info!("🛑 Worker {} shutting down", self.id);
                    break;
                }
                envelope = self.queue.next() => match envelope {
                    Some(envelope) => self.execute(envelope).await,
                    None => {
                        tracing::info!("Worker {}: job queue closed", self.id);
                        break;
                    }
                }
            }
        }
    }

    async fn execute(&self, envelope: Envelope) {
        let Envelope { id, request } = envelope;
        let name = request.name();
        tracing::debug!("Worker {} picked up job {} ({})", self.id, id, name);
        self.queue.results().mark_running(id);

        // Run on its own task so a panicking pipeline only fails this job
        let pipelines = self.pipelines.clone();
        let outcome = match tokio::spawn(async move { pipelines.dispatch(request).await }).await {
            Ok(outcome) => outcome,
            Err(e) => {
                tracing::error!("Job {} ({}) crashed: {}", id, name, e);
                None
            }
        };

        if !self.queue.results().complete(id, outcome) {
            tracing::warn!("Job {} ({}) finished after its caller gave up", id, name);
        }
    }
}

/// Starts `count` workers sharing one queue.
pub fn spawn_workers(
    count: usize,
    queue: JobQueue,
    pipelines: Arc<Pipelines>,
    shutdown: watch::Receiver<bool>,
) -> Vec<JoinHandle<()>> {
    (0..count.max(1))
        .map(|id| {
            let worker =
                BackgroundWorker::new(id, queue.clone(), pipelines.clone(), shutdown.clone());
            tokio::spawn(worker.run())
        })
        .collect()
}
