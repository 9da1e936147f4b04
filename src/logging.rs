//! Tracing setup for the CLI.
//!
//! Console output goes to stderr so it does not interleave with the
//! progress bar's redraws; JSON output is available for log collection.

use std::time::{Duration, Instant};
use tracing::Level;
use tracing_subscriber::{
    EnvFilter,
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
};

#[derive(Debug, Clone, Copy, Default)]
pub struct LogConfig {
    /// One JSON object per event
    pub json: bool,
    /// Default level DEBUG instead of INFO
    pub verbose: bool,
}

/// Install the global subscriber; `RUST_LOG` replaces the default
/// `discdup=<level>` filter.
pub fn init(config: LogConfig) {
    let level = if config.verbose { Level::DEBUG } else { Level::INFO };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directive(level)));

    let json = config.json.then(|| {
        fmt::layer()
            .json()
            .with_writer(std::io::stderr)
            .with_span_events(FmtSpan::CLOSE)
            .with_current_span(true)
    });
    let console = (!config.json).then(|| {
        fmt::layer()
            .with_writer(std::io::stderr)
            .with_target(false)
    });

    tracing_subscriber::registry()
        .with(filter)
        .with(json)
        .with(console)
        .init();
}

fn default_directive(level: Level) -> String {
    format!("discdup={}", level.as_str().to_lowercase())
}

/// Lets a copy loop log its progress every `interval` rather than every block.
pub struct LogThrottle {
    interval: Duration,
    last: Option<Instant>,
}

impl LogThrottle {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            last: None,
        }
    }

    /// True on the first call and whenever `interval` has passed since the
    /// last true.
    pub fn should_log(&mut self) -> bool {
        let now = Instant::now();
        match self.last {
            Some(last) if now.duration_since(last) < self.interval => false,
            _ => {
                self.last = Some(now);
                true
            }
        }
    }
}
