use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, info_span, warn};

use crate::activity::EventSink;
use crate::config::AppConfig;
use crate::context::AppContext;
use crate::core::hardware::DriveCandidate;
use crate::core::models::{CopyJob, JobEvent, TranscodeRequest};
use crate::core::progress::ProgressTracker;
use crate::core::transcode::{find_title_vobs, transcode_title};
use crate::core::transfer_engine::{
    CopyMode, TransferEngine, TransferRequest, TransferResult, TransferStatus, create_engine,
};
use crate::error::{CopyError, JobError, TranscodeError};

/// Bound on undelivered events before the worker waits for the foreground.
const EVENT_CHANNEL_CAPACITY: usize = 64;

/// What a finished job produced.
#[derive(Debug)]
pub struct JobSummary {
    pub result: Result<TransferResult, CopyError>,
    /// Present when a transcode was requested and attempted.
    pub transcode: Option<Result<PathBuf, TranscodeError>>,
}

/// The foreground's side of a running job.
pub struct JobHandle {
    id: String,
    events: mpsc::Receiver<JobEvent>,
    cancel: CancellationToken,
    worker: JoinHandle<JobSummary>,
}

impl JobHandle {
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Ask the worker to stop at its next check.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Next event from the worker, `None` once it has finished.
    pub async fn next_event(&mut self) -> Option<JobEvent> {
        self.events.recv().await
    }

    /// Wait for the worker, discarding any events not yet received.
    pub async fn wait(mut self) -> Result<JobSummary, JobError> {
        while self.events.recv().await.is_some() {}
        self.worker.await.map_err(|e| JobError::WorkerFailed {
            job_id: self.id.clone(),
            message: e.to_string(),
        })
    }
}

/// Holds the id of the active job; cleared when the worker exits.
struct ActiveJobGuard {
    slot: Arc<Mutex<Option<String>>>,
}

impl Drop for ActiveJobGuard {
    fn drop(&mut self) {
        if let Ok(mut slot) = self.slot.lock() {
            *slot = None;
        }
    }
}

/// Runs copy jobs one at a time on a blocking worker.
pub struct Orchestrator {
    ctx: AppContext,
    active: Arc<Mutex<Option<String>>>,
}

impl Orchestrator {
    pub fn new(ctx: AppContext) -> Self {
        Self {
            ctx,
            active: Arc::new(Mutex::new(None)),
        }
    }

    pub fn context(&self) -> &AppContext {
        &self.ctx
    }

    /// Id of the job currently running, if any.
    pub fn active_job(&self) -> Option<String> {
        self.active.lock().ok().and_then(|slot| slot.clone())
    }

    /// Path to read for `drive` in the given mode.
    ///
    /// Image copies read the raw device. Tree copies read the mounted
    /// directory, falling back to the candidate itself.
    pub fn source_for(&self, drive: &DriveCandidate, mode: CopyMode) -> PathBuf {
        match mode {
            CopyMode::Image => self.ctx.adapter.raw_device_path(drive),
            CopyMode::Tree => self
                .ctx
                .adapter
                .mount_point(drive)
                .unwrap_or_else(|| drive.as_path().to_path_buf()),
        }
    }

    /// Start `job` with the engine configured for its mode.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(&self, job: CopyJob) -> Result<JobHandle, JobError> {
        let engine = create_engine(job.mode, &self.ctx.config);
        self.start_with_engine(job, engine)
    }

    /// Start `job` with a caller-supplied engine.
    ///
    /// Fails with [`JobError::Busy`] while another job is running.
    pub fn start_with_engine(
        &self,
        job: CopyJob,
        engine: Box<dyn TransferEngine>,
    ) -> Result<JobHandle, JobError> {
        let guard = {
            let mut slot = self
                .active
                .lock()
                .map_err(|_| JobError::Busy("job state unavailable".to_string()))?;
            if let Some(active_id) = slot.as_ref() {
                return Err(JobError::Busy(active_id.clone()));
            }
            *slot = Some(job.id.clone());
            ActiveJobGuard {
                slot: self.active.clone(),
            }
        };

        let (tx, rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let cancel = CancellationToken::new();
        let id = job.id.clone();

        let worker = JobWorker {
            job,
            engine,
            config: self.ctx.config.clone(),
            cancel: cancel.clone(),
            tx,
            progress: self.ctx.progress.clone(),
            activity: self.ctx.activity.clone(),
        };

        let handle = tokio::task::spawn_blocking(move || {
            let _guard = guard;
            worker.run()
        });

        Ok(JobHandle {
            id,
            events: rx,
            cancel,
            worker: handle,
        })
    }
}

/// Everything the blocking worker owns for the life of one job.
struct JobWorker {
    job: CopyJob,
    engine: Box<dyn TransferEngine>,
    config: Arc<AppConfig>,
    cancel: CancellationToken,
    tx: mpsc::Sender<JobEvent>,
    progress: ProgressTracker,
    activity: Arc<dyn EventSink>,
}

impl JobWorker {
    fn send(&self, event: JobEvent) {
        // A dropped receiver only means nobody is watching.
        let _ = self.tx.blocking_send(event);
    }

    fn run(self) -> JobSummary {
        let job = &self.job;
        let span = info_span!("job", job_id = %job.id, mode = %job.mode);
        let _enter = span.enter();

        info!(
            source = %job.source.display(),
            destination = %job.destination.display(),
            "Job started"
        );
        self.activity.record(&format!(
            "Starting {} copy: {} -> {}",
            job.mode,
            job.source.display(),
            job.destination.display()
        ));
        self.send(JobEvent::Started {
            job_id: job.id.clone(),
            mode: job.mode,
            source: job.source.clone(),
            destination: job.destination.clone(),
        });

        self.progress.clear_blocking();
        let request = TransferRequest {
            source: job.source.clone(),
            destination: job.destination.clone(),
        };
        let result = self.engine.transfer(&request, &self.cancel, &mut |status| {
            if let TransferStatus::InProgress(sample) = &status {
                self.progress.update_blocking(*sample);
            }
            self.send(JobEvent::Transfer(status));
        });

        match &result {
            Ok(transfer) => {
                for failure in &transfer.failures {
                    self.activity.record(&format!(
                        "Failed to copy {}: {}",
                        failure.relative_path.display(),
                        failure.message
                    ));
                }
                self.activity.record(&transfer.summary());
            }
            Err(e) => {
                warn!(error = %e, "Copy failed");
                self.activity.record(&format!("Copy failed: {}", e));
            }
        }

        let transcode = match (&result, &job.transcode) {
            (Ok(transfer), Some(request)) if !transfer.is_cancelled() => {
                self.run_transcode(request)
            }
            _ => None,
        };

        info!("Job finished");
        JobSummary {
            result,
            transcode,
        }
    }

    /// Convert the copied title. Failures here never change the copy result.
    fn run_transcode(
        &self,
        request: &TranscodeRequest,
    ) -> Option<Result<PathBuf, TranscodeError>> {
        let job = &self.job;
        if job.mode != CopyMode::Tree {
            warn!("Transcode skipped: only tree copies contain VOB files");
            self.activity
                .record("Transcode skipped: only folder copies can be converted");
            return None;
        }
        if self.cancel.is_cancelled() {
            return None;
        }

        let mut config = self.config.transcode.clone();
        if request.stream_copy {
            config.reencode = false;
        }
        let output = request
            .output
            .clone()
            .unwrap_or_else(|| job.destination.join(&config.output_name));

        let group = match find_title_vobs(&job.destination) {
            Ok(group) => group,
            Err(e) => {
                self.activity.record(&format!("Transcode failed: {}", e));
                return Some(Err(e));
            }
        };

        self.activity.record(&format!(
            "Converting {} VOB file(s) to {}",
            group.files.len(),
            output.display()
        ));
        self.send(JobEvent::TranscodeStarted {
            output: output.clone(),
            files: group.files.len(),
        });

        let result = transcode_title(&job.destination, &output, &config, &mut |position| {
            self.send(JobEvent::TranscodeProgress(position));
        });

        match &result {
            Ok(path) => self
                .activity
                .record(&format!("Transcode complete: {}", path.display())),
            Err(e) => self.activity.record(&format!("Transcode failed: {}", e)),
        }
        Some(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::activity::MemorySink;
    use crate::adapters::SimulatedAdapter;
    use crate::config::SimulatedDrive;
    use crate::core::progress::ProgressSample;
    use crate::core::transfer_engine::CopyOutcome;
    use crate::settings::MemorySettingsStore;
    use std::time::Duration;

    fn context(sink: Arc<MemorySink>) -> AppContext {
        let adapter = SimulatedAdapter::new(vec![SimulatedDrive {
            device: PathBuf::from("/sim/sr0"),
            mount_point: Some(PathBuf::from("/sim/mnt/dvd")),
        }]);
        AppContext::with_parts(
            AppConfig::default(),
            Arc::new(adapter),
            Arc::new(MemorySettingsStore::default()),
            sink,
        )
    }

    /// Emits three samples, then waits for cancellation.
    struct StallingEngine;

    impl TransferEngine for StallingEngine {
        fn transfer(
            &self,
            _req: &TransferRequest,
            cancel: &CancellationToken,
            on_status: &mut dyn FnMut(TransferStatus),
        ) -> Result<TransferResult, CopyError> {
            for i in 1..=3 {
                on_status(TransferStatus::InProgress(ProgressSample {
                    bytes_copied: i * 10,
                    total_bytes: Some(100),
                    ..Default::default()
                }));
            }
            while !cancel.is_cancelled() {
                std::thread::sleep(Duration::from_millis(5));
            }
            Ok(TransferResult {
                outcome: CopyOutcome::Cancelled,
                bytes_copied: 30,
                total_bytes: Some(100),
                files_copied: None,
                total_files: None,
                failures: Vec::new(),
                duration: Duration::ZERO,
                file_hashes: None,
            })
        }
    }

    #[test]
    fn test_source_for_mode() {
        let orchestrator = Orchestrator::new(context(Arc::new(MemorySink::new())));
        let drive = DriveCandidate::new("/sim/sr0");
        assert_eq!(
            orchestrator.source_for(&drive, CopyMode::Image),
            PathBuf::from("/sim/sr0")
        );
        assert_eq!(
            orchestrator.source_for(&drive, CopyMode::Tree),
            PathBuf::from("/sim/mnt/dvd")
        );
    }

    #[tokio::test]
    async fn test_second_job_is_refused_until_first_finishes() {
        let sink = Arc::new(MemorySink::new());
        let orchestrator = Orchestrator::new(context(sink.clone()));

        let first = CopyJob::new("/sim/sr0", "/tmp/a.iso", CopyMode::Image);
        let first_id = first.id.clone();
        let mut handle = orchestrator
            .start_with_engine(first, Box::new(StallingEngine))
            .unwrap();
        assert_eq!(orchestrator.active_job(), Some(first_id.clone()));

        let second = CopyJob::new("/sim/sr0", "/tmp/b.iso", CopyMode::Image);
        match orchestrator.start_with_engine(second, Box::new(StallingEngine)) {
            Err(JobError::Busy(id)) => assert_eq!(id, first_id),
            other => panic!("expected Busy, got {:?}", other.map(|h| h.id().to_string())),
        }

        assert!(matches!(handle.next_event().await, Some(JobEvent::Started { .. })));
        let mut seen = Vec::new();
        while seen.len() < 3 {
            match handle.next_event().await {
                Some(JobEvent::Transfer(TransferStatus::InProgress(s))) => {
                    seen.push(s.bytes_copied)
                }
                other => panic!("unexpected event {:?}", other),
            }
        }
        assert_eq!(seen, vec![10, 20, 30]);

        handle.cancel();
        let summary = handle.wait().await.unwrap();
        assert!(summary.result.unwrap().is_cancelled());
        assert!(summary.transcode.is_none());
        assert_eq!(orchestrator.active_job(), None);
        assert_eq!(
            orchestrator.context().progress.latest().await.unwrap().bytes_copied,
            30
        );

        let third = CopyJob::new("/sim/sr0", "/tmp/c.iso", CopyMode::Image);
        let handle = orchestrator
            .start_with_engine(third, Box::new(StallingEngine))
            .unwrap();
        handle.cancel();
        handle.wait().await.unwrap();

        let messages = sink.messages();
        assert!(messages[0].starts_with("Starting image copy"));
        assert!(messages.iter().any(|m| m.starts_with("Cancelled after")));
    }

    #[tokio::test]
    async fn test_failed_copy_is_reported_and_releases_guard() {
        let temp = tempfile::tempdir().unwrap();
        let sink = Arc::new(MemorySink::new());
        let orchestrator = Orchestrator::new(context(sink.clone()));

        let earlier = CopyJob::new("/sim/sr0", temp.path().join("a.iso"), CopyMode::Image);
        let handle = orchestrator
            .start_with_engine(earlier, Box::new(StallingEngine))
            .unwrap();
        handle.cancel();
        handle.wait().await.unwrap();
        assert!(orchestrator.context().progress.latest().await.is_some());

        let job = CopyJob::new(
            temp.path().join("no-such-device"),
            temp.path().join("out.iso"),
            CopyMode::Image,
        );
        let summary = orchestrator.start(job).unwrap().wait().await.unwrap();

        assert!(matches!(summary.result, Err(CopyError::NotFound { .. })));
        assert_eq!(orchestrator.active_job(), None);
        // No sample from the earlier job survives into this one.
        assert!(orchestrator.context().progress.latest().await.is_none());
        assert!(sink.messages().iter().any(|m| m.starts_with("Copy failed")));
    }

    #[tokio::test]
    async fn test_transcode_skipped_for_image_copies() {
        let temp = tempfile::tempdir().unwrap();
        let source = temp.path().join("disc.bin");
        std::fs::write(&source, vec![1u8; 1000]).unwrap();

        let sink = Arc::new(MemorySink::new());
        let orchestrator = Orchestrator::new(context(sink.clone()));
        let job = CopyJob::new(&source, temp.path().join("disc.iso"), CopyMode::Image)
            .with_transcode(TranscodeRequest::default());

        let summary = orchestrator.start(job).unwrap().wait().await.unwrap();
        assert_eq!(summary.result.unwrap().bytes_copied, 1000);
        assert!(summary.transcode.is_none());
        assert!(sink.messages().iter().any(|m| m.starts_with("Transcode skipped")));
    }
}
