use crate::{
    analyzer::Analyzer,
    api::AnalysisResponse,
    error::AnalysisError,
    store::RecordStore,
};
use crossbeam::channel::{Receiver, Sender, bounded, unbounded};
use std::{path::PathBuf, thread::JoinHandle};
use tracing::{error, info};

#[derive(Debug, Clone)]
pub struct AnalysisJob {
    pub video_id: String,
    pub path: PathBuf,
    pub fps_override: Option<f64>,
}

pub type JobResult = Result<AnalysisResponse, AnalysisError>;

type JobMessage = (AnalysisJob, Sender<JobResult>);

/// Runs jobs one after the other, so a video is never analyzed twice at the same time.
pub struct AnalysisWorker {
    receiver: Receiver<JobMessage>,
    analyzer: Analyzer,
    store: Box<dyn RecordStore + Send>,
}

impl AnalysisWorker {
    pub fn new(
        analyzer: Analyzer,
        store: Box<dyn RecordStore + Send>,
        receiver: Receiver<JobMessage>,
    ) -> Self {
        Self {
            receiver,
            analyzer,
            store,
        }
    }

    /// Serves jobs until every sender is gone, then hands the store back.
    pub fn run(mut self) -> Box<dyn RecordStore + Send> {
        while let Ok((job, response_sender)) = self.receiver.recv() {
            let AnalysisJob {
                video_id,
                path,
                fps_override,
            } = job;
            let result = self.analyzer.analyze_path(
                &video_id,
                &path,
                fps_override,
                self.store.as_mut(),
            );
            if let Err(err) = response_sender.send(result) {
                error!(%video_id, ?err, "Failed to send result from worker");
            }
        }
        info!("Analysis worker stopped");
        self.store
    }
}

/// Handle to a worker thread.
pub struct AnalysisQueue {
    sender: Sender<JobMessage>,
    handle: JoinHandle<Box<dyn RecordStore + Send>>,
}

impl AnalysisQueue {
    pub fn spawn(analyzer: Analyzer, store: Box<dyn RecordStore + Send>) -> anyhow::Result<Self> {
        let (sender, receiver) = unbounded();
        let worker = AnalysisWorker::new(analyzer, store, receiver);
        let handle = std::thread::Builder::new()
            .name("analysis-worker".to_string())
            .spawn(move || worker.run())?;
        Ok(Self { sender, handle })
    }

    /// Queues a job. The returned receiver yields its result once the worker gets to it.
    pub fn submit(&self, job: AnalysisJob) -> anyhow::Result<Receiver<JobResult>> {
        let (response_sender, response_receiver) = bounded(1);
        self.sender
            .send((job, response_sender))
            .map_err(|_| anyhow::anyhow!("Analysis worker is gone"))?;
        Ok(response_receiver)
    }

    pub fn analyze(&self, job: AnalysisJob) -> anyhow::Result<JobResult> {
        Ok(self.submit(job)?.recv()?)
    }

    /// Waits for queued jobs to finish and returns the store.
    pub fn shutdown(self) -> anyhow::Result<Box<dyn RecordStore + Send>> {
        drop(self.sender);
        self.handle
            .join()
            .map_err(|_| anyhow::anyhow!("Analysis worker panicked"))
    }
}
