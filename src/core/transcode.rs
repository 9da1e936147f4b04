//! Concatenate a copied title's VOB files into a single playable file with
//! an external encoder.

use crate::config::TranscodeConfig;
use crate::error::TranscodeError;
use regex::Regex;
use std::collections::BTreeMap;
use std::fs;
use std::io::{BufReader, Read, Write};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::sync::LazyLock;
use std::thread;
use std::time::Duration;
use tracing::{debug, info, info_span, warn};

/// Encoder status lines look like `frame= 120 ... time=00:01:02.50 ...`.
static TIME_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"time=(\d+):(\d+):(\d+(?:\.\d+)?)").expect("time regex is valid")
});

/// Files are grouped under this key when their name has no `_` separator.
const MISC_GROUP: &str = "misc";

/// The video objects making up one title.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TranscodeGroup {
    /// `VTS_01` for `VTS_01_1.VOB`.
    pub key: String,
    /// Sorted by name.
    pub files: Vec<PathBuf>,
    pub total_bytes: u64,
}

/// Locate the `VIDEO_TS` directory directly under `root`, ignoring case.
fn find_video_ts(root: &Path) -> Option<PathBuf> {
    let entries = fs::read_dir(root).ok()?;
    entries
        .filter_map(Result::ok)
        .filter(|entry| entry.path().is_dir())
        .find(|entry| entry.file_name().to_string_lossy().eq_ignore_ascii_case("VIDEO_TS"))
        .map(|entry| entry.path())
}

fn group_key(file_name: &str) -> String {
    let mut parts = file_name.split('_');
    match (parts.next(), parts.next()) {
        (Some(first), Some(second)) => format!("{}_{}", first, second),
        _ => MISC_GROUP.to_string(),
    }
}

/// Pick the largest group of VOB files under `root/VIDEO_TS`.
///
/// Files are grouped by the first two `_`-separated parts of their name.
/// The group with the most bytes wins; ties go to the lexicographically
/// first key. A group with no bytes is never chosen.
pub fn find_title_vobs(root: &Path) -> Result<TranscodeGroup, TranscodeError> {
    let no_files = || TranscodeError::NoVideoObjects(root.to_path_buf());
    let video_ts = find_video_ts(root).ok_or_else(no_files)?;

    let entries = fs::read_dir(&video_ts)
        .map_err(|e| TranscodeError::io(format!("Failed to read {}", video_ts.display()), e))?;

    let mut groups: BTreeMap<String, (Vec<PathBuf>, u64)> = BTreeMap::new();
    for entry in entries.filter_map(Result::ok) {
        let name = entry.file_name().to_string_lossy().into_owned();
        if !name.to_ascii_uppercase().ends_with(".VOB") {
            continue;
        }
        let size = match entry.metadata() {
            Ok(m) if m.is_file() => m.len(),
            Ok(_) => continue,
            Err(e) => {
                debug!(file = %name, error = %e, "Skipping unreadable VOB");
                continue;
            }
        };
        let group = groups.entry(group_key(&name)).or_default();
        group.0.push(entry.path());
        group.1 += size;
    }

    let mut best: Option<(String, Vec<PathBuf>, u64)> = None;
    for (key, (files, total)) in groups {
        let best_total = best.as_ref().map_or(0, |(_, _, t)| *t);
        if total > best_total {
            best = Some((key, files, total));
        }
    }

    let (key, mut files, total_bytes) = best.ok_or_else(no_files)?;
    files.sort();
    Ok(TranscodeGroup {
        key,
        files,
        total_bytes,
    })
}

/// Line for the encoder's concat demuxer list.
fn concat_entry(path: &Path) -> String {
    format!("file '{}'\n", path.to_string_lossy().replace('\'', r"'\''"))
}

fn codec_args(config: &TranscodeConfig) -> Vec<String> {
    if config.reencode {
        vec![
            "-c:v".into(),
            config.video_codec.clone(),
            "-preset".into(),
            config.preset.clone(),
            "-crf".into(),
            config.crf.to_string(),
            "-c:a".into(),
            config.audio_codec.clone(),
            "-b:a".into(),
            config.audio_bitrate.clone(),
        ]
    } else {
        vec!["-c".into(), "copy".into()]
    }
}

/// Position reported by an encoder status line, if it carries one.
pub fn parse_progress_time(line: &str) -> Option<Duration> {
    let caps = TIME_RE.captures(line)?;
    let hours: u64 = caps.get(1)?.as_str().parse().ok()?;
    let minutes: u64 = caps.get(2)?.as_str().parse().ok()?;
    let seconds: f64 = caps.get(3)?.as_str().parse().ok()?;
    let whole = hours.checked_mul(3600)?.checked_add(minutes.checked_mul(60)?)?;
    Duration::from_secs(whole).checked_add(Duration::try_from_secs_f64(seconds).ok()?)
}

/// Join the main title under `root` into `output`.
///
/// The encoder is only looked up once there is something to encode. The
/// concat list is written next to the VOBs and removed on every path out.
/// `on_progress` receives the encoder's reported position as it advances.
pub fn transcode_title(
    root: &Path,
    output: &Path,
    config: &TranscodeConfig,
    on_progress: &mut dyn FnMut(Duration),
) -> Result<PathBuf, TranscodeError> {
    let span = info_span!("transcode", root = %root.display(), output = %output.display());
    let _enter = span.enter();

    let root = fs::canonicalize(root)
        .map_err(|e| TranscodeError::io(format!("Failed to resolve {}", root.display()), e))?;
    let group = find_title_vobs(&root)?;
    info!(
        group = %group.key,
        files = group.files.len(),
        total_bytes = group.total_bytes,
        "Selected title"
    );

    let encoder = which::which(&config.encoder)
        .map_err(|_| TranscodeError::EncoderNotFound(config.encoder.clone()))?;

    let mut list = tempfile::Builder::new()
        .prefix("vob_list")
        .suffix(".txt")
        .tempfile_in(&root)
        .map_err(|e| TranscodeError::io("Failed to create concat list", e))?;
    for file in &group.files {
        list.write_all(concat_entry(file).as_bytes())
            .map_err(|e| TranscodeError::io("Failed to write concat list", e))?;
    }
    list.flush()
        .map_err(|e| TranscodeError::io("Failed to write concat list", e))?;

    let mut command = Command::new(&encoder);
    command
        .args(["-y", "-f", "concat", "-safe", "0", "-i"])
        .arg(list.path())
        .args(codec_args(config))
        .arg(output)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());

    info!(encoder = %encoder.display(), reencode = config.reencode, "Running encoder");
    let mut child = command
        .spawn()
        .map_err(|e| TranscodeError::io(format!("Failed to start {}", encoder.display()), e))?;

    // Drain stdout separately so a chatty encoder cannot stall on a full pipe.
    let stdout_drain = child.stdout.take().map(|mut stdout| {
        thread::spawn(move || {
            let mut sink = Vec::new();
            let _ = stdout.read_to_end(&mut sink);
        })
    });

    let mut stderr_text = String::new();
    if let Some(stderr) = child.stderr.take() {
        let mut reader = BufReader::new(stderr);
        let mut line_buffer = Vec::new();
        let mut byte_buffer = [0u8; 1];
        let mut last_position = None;

        loop {
            let n = match reader.read(&mut byte_buffer) {
                Ok(n) => n,
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    warn!(error = %e, "Failed to read encoder output");
                    break;
                }
            };
            let done = n == 0;
            let b = byte_buffer[0];

            if done || b == b'\r' || b == b'\n' {
                if !line_buffer.is_empty() {
                    let line = String::from_utf8_lossy(&line_buffer).into_owned();
                    // Status lines repeat for the whole encode; keep only diagnostics.
                    match parse_progress_time(&line) {
                        Some(position) if last_position != Some(position) => {
                            last_position = Some(position);
                            on_progress(position);
                        }
                        Some(_) => {}
                        None => {
                            stderr_text.push_str(&line);
                            stderr_text.push('\n');
                        }
                    }
                    line_buffer.clear();
                }
                if done {
                    break;
                }
            } else {
                line_buffer.push(b);
            }
        }
    }

    let status = child
        .wait()
        .map_err(|e| TranscodeError::io("Failed to wait for encoder", e))?;
    if let Some(handle) = stdout_drain {
        let _ = handle.join();
    }
    drop(list);

    if !status.success() {
        warn!(%status, "Encoder failed");
        return Err(TranscodeError::EncoderFailed {
            status,
            stderr: stderr_text,
        });
    }

    info!("Transcode complete");
    Ok(output.to_path_buf())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn make_vob(dir: &Path, name: &str, size: u64) {
        let file = fs::File::create(dir.join(name)).unwrap();
        file.set_len(size).unwrap();
    }

    #[test]
    fn test_group_key() {
        assert_eq!(group_key("VTS_01_1.VOB"), "VTS_01");
        assert_eq!(group_key("VIDEO_TS.VOB"), "VIDEO_TS.VOB");
        assert_eq!(group_key("TRAILER.VOB"), "misc");
    }

    #[test]
    fn test_largest_group_wins() {
        let temp = tempdir().unwrap();
        let video_ts = temp.path().join("VIDEO_TS");
        fs::create_dir(&video_ts).unwrap();
        make_vob(&video_ts, "VTS_01_1.VOB", 10 * 1024 * 1024);
        make_vob(&video_ts, "VTS_02_2.VOB", 30 * 1024 * 1024);
        make_vob(&video_ts, "VTS_02_1.VOB", 20 * 1024 * 1024);
        fs::write(video_ts.join("VTS_02_0.IFO"), b"ifo").unwrap();

        let group = find_title_vobs(temp.path()).unwrap();
        assert_eq!(group.key, "VTS_02");
        assert_eq!(group.total_bytes, 50 * 1024 * 1024);
        assert_eq!(
            group.files,
            vec![video_ts.join("VTS_02_1.VOB"), video_ts.join("VTS_02_2.VOB")]
        );
    }

    #[test]
    fn test_tie_goes_to_first_key_and_case_is_ignored() {
        let temp = tempdir().unwrap();
        let video_ts = temp.path().join("video_ts");
        fs::create_dir(&video_ts).unwrap();
        make_vob(&video_ts, "vts_02_1.vob", 100);
        make_vob(&video_ts, "VTS_01_1.VOB", 100);

        let group = find_title_vobs(temp.path()).unwrap();
        assert_eq!(group.key, "VTS_01");
    }

    #[test]
    fn test_empty_vobs_are_not_a_title() {
        let temp = tempdir().unwrap();
        let video_ts = temp.path().join("VIDEO_TS");
        fs::create_dir(&video_ts).unwrap();
        make_vob(&video_ts, "VTS_01_1.VOB", 0);

        let result = find_title_vobs(temp.path());
        assert!(matches!(result, Err(TranscodeError::NoVideoObjects(_))));
    }

    #[test]
    fn test_missing_video_ts() {
        let temp = tempdir().unwrap();
        let result = find_title_vobs(temp.path());
        assert!(matches!(result, Err(TranscodeError::NoVideoObjects(_))));
    }

    #[test]
    fn test_concat_entry_escapes_quotes() {
        assert_eq!(
            concat_entry(Path::new("/media/It's/VTS_01_1.VOB")),
            "file '/media/It'\\''s/VTS_01_1.VOB'\n"
        );
    }

    #[test]
    fn test_codec_args() {
        let mut config = TranscodeConfig::default();
        assert_eq!(
            codec_args(&config),
            vec![
                "-c:v", "libx264", "-preset", "medium", "-crf", "20", "-c:a", "aac", "-b:a",
                "192k"
            ]
        );
        config.reencode = false;
        assert_eq!(codec_args(&config), vec!["-c", "copy"]);
    }

    #[test]
    fn test_parse_progress_time() {
        assert_eq!(
            parse_progress_time("frame=  120 fps= 30 q=28.0 size= 1024kB time=00:01:02.50 bitrate=..."),
            Some(Duration::from_millis(62_500))
        );
        assert_eq!(
            parse_progress_time("time=01:00:00"),
            Some(Duration::from_secs(3600))
        );
        assert_eq!(parse_progress_time("Input #0, concat"), None);
    }

    #[test]
    fn test_parse_progress_time_rejects_absurd_values() {
        assert_eq!(parse_progress_time("time=99999999999999999999:00:00.00"), None);
        assert_eq!(parse_progress_time("time=9999999999999999:00:00.00"), None);
        let huge_seconds = format!("time=00:00:{}", "9".repeat(400));
        assert_eq!(parse_progress_time(&huge_seconds), None);
    }

    #[test]
    fn test_no_vobs_never_looks_up_encoder() {
        let temp = tempdir().unwrap();
        let config = TranscodeConfig {
            encoder: "definitely-not-an-encoder-binary".into(),
            ..Default::default()
        };
        let result = transcode_title(
            temp.path(),
            &temp.path().join("movie.mp4"),
            &config,
            &mut |_| {},
        );
        assert!(matches!(result, Err(TranscodeError::NoVideoObjects(_))));
    }

    #[test]
    fn test_missing_encoder() {
        let temp = tempdir().unwrap();
        let video_ts = temp.path().join("VIDEO_TS");
        fs::create_dir(&video_ts).unwrap();
        make_vob(&video_ts, "VTS_01_1.VOB", 10);

        let config = TranscodeConfig {
            encoder: "definitely-not-an-encoder-binary".into(),
            ..Default::default()
        };
        let result = transcode_title(
            temp.path(),
            &temp.path().join("movie.mp4"),
            &config,
            &mut |_| {},
        );
        assert!(matches!(result, Err(TranscodeError::EncoderNotFound(_))));
    }
}
