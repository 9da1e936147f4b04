pub mod hardware;
pub mod models;
pub mod orchestrator;
pub mod progress;
pub mod transcode;
pub mod transfer_engine;
pub mod verifier;

pub use hardware::{DriveAdapter, DriveCandidate};
pub use models::{CopyJob, JobEvent, TranscodeRequest};
pub use orchestrator::{JobHandle, JobSummary, Orchestrator};
pub use progress::{ProgressReport, ProgressSample, ProgressTracker};
pub use transcode::{TranscodeGroup, find_title_vobs, transcode_title};
pub use transfer_engine::{CopyMode, CopyOutcome, TransferResult, TransferStatus};
pub use verifier::{VerifyResult, verify_from_hashes};
