//! End-to-end jobs through the orchestrator with a simulated drive.

use discdup::activity::MemorySink;
use discdup::adapters::SimulatedAdapter;
use discdup::config::{AppConfig, SimulatedDrive};
use discdup::context::AppContext;
use discdup::core::{
    CopyJob, CopyMode, JobEvent, Orchestrator, TranscodeRequest, TransferStatus,
};
use discdup::settings::MemorySettingsStore;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::tempdir;

fn create_file(path: &Path, content: &[u8]) {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).unwrap();
    }
    std::fs::write(path, content).unwrap();
}

fn context(config: AppConfig, drive: SimulatedDrive, sink: Arc<MemorySink>) -> AppContext {
    AppContext::with_parts(
        config,
        Arc::new(SimulatedAdapter::new(vec![drive])),
        Arc::new(MemorySettingsStore::default()),
        sink,
    )
}

#[tokio::test]
async fn test_image_job_from_simulated_drive() {
    let temp = tempdir().unwrap();
    let device = temp.path().join("disc.bin");
    let data: Vec<u8> = (0..200_000u32).map(|i| (i % 199) as u8).collect();
    std::fs::write(&device, &data).unwrap();

    let sink = Arc::new(MemorySink::new());
    let ctx = context(
        AppConfig::default(),
        SimulatedDrive {
            device: device.clone(),
            mount_point: None,
        },
        sink.clone(),
    );

    let drives = ctx.adapter.list_drives();
    assert_eq!(drives.len(), 1);
    let orchestrator = Orchestrator::new(ctx);
    let source = orchestrator.source_for(&drives[0], CopyMode::Image);
    assert_eq!(source, device);

    let image = temp.path().join("disc.iso");
    let mut handle = orchestrator
        .start(CopyJob::new(source, &image, CopyMode::Image))
        .unwrap();

    let mut events = Vec::new();
    while let Some(event) = handle.next_event().await {
        events.push(event);
    }
    let summary = handle.wait().await.unwrap();

    assert!(matches!(events.first(), Some(JobEvent::Started { mode: CopyMode::Image, .. })));
    let copied: Vec<u64> = events
        .iter()
        .filter_map(|e| match e {
            JobEvent::Transfer(TransferStatus::InProgress(s)) => Some(s.bytes_copied),
            _ => None,
        })
        .collect();
    assert!(copied.windows(2).all(|w| w[0] < w[1]));
    assert_eq!(copied.last(), Some(&(data.len() as u64)));

    assert_eq!(summary.result.unwrap().bytes_copied, data.len() as u64);
    assert_eq!(std::fs::read(&image).unwrap(), data);
    assert_eq!(sink.messages().len(), 2);
}

#[tokio::test]
async fn test_empty_simulator_reports_sentinel() {
    let sink = Arc::new(MemorySink::new());
    let ctx = AppContext::with_parts(
        AppConfig::default(),
        Arc::new(SimulatedAdapter::default()),
        Arc::new(MemorySettingsStore::default()),
        sink,
    );
    let drives = ctx.adapter.list_drives();
    assert_eq!(drives.len(), 1);
    assert_eq!(drives[0].as_str(), "No DVD drive found");
}

#[cfg(unix)]
#[tokio::test]
async fn test_tree_job_then_transcode() {
    use std::os::unix::fs::PermissionsExt;

    let temp = tempdir().unwrap();
    let mount = temp.path().join("mnt/dvd");
    create_file(&mount.join("VIDEO_TS/VIDEO_TS.IFO"), b"ifo");
    create_file(&mount.join("VIDEO_TS/VTS_01_1.VOB"), &vec![1u8; 4096]);
    create_file(&mount.join("VIDEO_TS/VTS_01_2.VOB"), &vec![2u8; 2048]);
    std::fs::create_dir_all(mount.join("AUDIO_TS")).unwrap();

    let bin = tempdir().unwrap();
    let encoder = bin.path().join("fake-ffmpeg");
    std::fs::write(
        &encoder,
        "#!/bin/sh\nfor last; do :; done\ncp \"$7\" \"$last\"\nprintf 'time=00:00:02.00\\r' >&2\n",
    )
    .unwrap();
    std::fs::set_permissions(&encoder, std::fs::Permissions::from_mode(0o755)).unwrap();

    let mut config = AppConfig::default();
    config.transcode.encoder = encoder.to_string_lossy().into_owned();

    let sink = Arc::new(MemorySink::new());
    let ctx = context(
        config,
        SimulatedDrive {
            device: PathBuf::from("/sim/sr0"),
            mount_point: Some(mount.clone()),
        },
        sink.clone(),
    );
    let orchestrator = Orchestrator::new(ctx);
    let drive = orchestrator.context().adapter.list_drives().remove(0);
    let source = orchestrator.source_for(&drive, CopyMode::Tree);
    assert_eq!(source, mount);

    let dest = temp.path().join("backup");
    let job = CopyJob::new(source, &dest, CopyMode::Tree).with_transcode(TranscodeRequest {
        output: None,
        stream_copy: true,
    });
    let mut handle = orchestrator.start(job).unwrap();

    let mut kinds = Vec::new();
    while let Some(event) = handle.next_event().await {
        let kind = match event {
            JobEvent::Started { .. } => "started",
            JobEvent::Transfer(_) => "transfer",
            JobEvent::TranscodeStarted { files, .. } => {
                assert_eq!(files, 2);
                "transcode_started"
            }
            JobEvent::TranscodeProgress(_) => "transcode_progress",
        };
        if kinds.last() != Some(&kind) {
            kinds.push(kind);
        }
    }
    let summary = handle.wait().await.unwrap();

    assert_eq!(
        kinds,
        vec!["started", "transfer", "transcode_started", "transcode_progress"]
    );

    let transfer = summary.result.unwrap();
    assert_eq!(transfer.files_copied, Some(3));
    assert!(dest.join("AUDIO_TS").is_dir());

    let output = summary.transcode.unwrap().unwrap();
    assert_eq!(output, dest.join("movie.mp4"));
    let list = std::fs::read_to_string(&output).unwrap();
    assert_eq!(list.lines().count(), 2);
    assert!(list.lines().next().unwrap().ends_with("VTS_01_1.VOB'"));

    let messages = sink.messages();
    assert!(messages.iter().any(|m| m.starts_with("Converting 2 VOB file(s)")));
    assert!(messages.last().unwrap().starts_with("Transcode complete"));
}
