//! Download progress and playback readiness reporting
//!
//! A monitor samples the container's completed byte counter once a second,
//! derives throughput from the previous sample and renders a status frame.
//! Rendering is kept separate from the ticking task so frames can be
//! checked without a terminal or a clock.

use std::io::Write;
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::container::Container;

/// ANSI sequence that clears the screen and homes the cursor.
const CLEAR_SCREEN: &str = "\x1b[2J\x1b[H";

const TICK_INTERVAL: Duration = Duration::from_secs(1);

/// How the server exposes the container.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServingMode {
    /// One selected file at `/`.
    SingleFile,
    /// Playlist of every playable file.
    Playlist,
}

/// Completion counters from one tick together with the previous tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProgressSample {
    pub completed: u64,
    pub previous: u64,
    pub total: u64,
}

impl ProgressSample {
    /// Bytes completed since the previous sample, one second earlier.
    pub fn throughput(&self) -> u64 {
        self.completed.saturating_sub(self.previous)
    }

    /// Completion percentage in `[0, 100]`.
    pub fn percent(&self) -> f64 {
        if self.total == 0 {
            return 0.0;
        }
        self.completed as f64 / self.total as f64 * 100.0
    }

    pub fn is_complete(&self) -> bool {
        self.completed >= self.total
    }
}

/// Readiness line shown under the progress figures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Readiness {
    /// Single-file mode, readahead threshold not reached yet.
    Buffering,
    /// Single-file mode, enough of the container is present to start.
    ReadyToOpen,
    /// Playlist mode has no single gate.
    Playlist,
}

impl Readiness {
    /// Readiness of `sample` for a server in `mode` with the given threshold.
    pub fn evaluate(mode: ServingMode, sample: &ProgressSample, threshold: u64) -> Self {
        match mode {
            ServingMode::Playlist => Self::Playlist,
            ServingMode::SingleFile if sample.completed >= threshold => Self::ReadyToOpen,
            ServingMode::SingleFile => Self::Buffering,
        }
    }

    /// Operator-facing message; `address` is the `host:port` clients use.
    pub fn message(&self, address: &str) -> String {
        match self {
            Self::Buffering => "Buffering start of media. Please wait...".to_string(),
            Self::ReadyToOpen => format!(
                "Open your media player and enter http://{address} as the network address."
            ),
            Self::Playlist => format!(
                "Load this M3U playlist into your media player http://{address}/playlist.m3u"
            ),
        }
    }
}

/// Renders one status frame.
///
/// The progress line only appears once some bytes are complete and the
/// speed line only while the download is unfinished.
pub fn render_status(
    name: &str,
    sample: &ProgressSample,
    readiness: Readiness,
    address: &str,
) -> String {
    let mut frame = String::new();
    frame.push_str(name);
    frame.push('\n');
    frame.push_str(&"=".repeat(name.chars().count()));
    frame.push('\n');

    if sample.completed > 0 {
        frame.push_str(&format!(
            "Progress: \t{} / {}  {:.2}%\n",
            format_bytes(sample.completed),
            format_bytes(sample.total),
            sample.percent()
        ));
    }

    if sample.completed < sample.total {
        frame.push_str(&format!(
            "Download speed: {}/s\n",
            format_bytes(sample.throughput())
        ));
    }

    frame.push('\n');
    frame.push_str(&readiness.message(address));
    frame.push('\n');
    frame
}

/// Formats a byte count with 1024-based units.
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: &[&str] = &["B", "KB", "MB", "GB", "TB"];

    if bytes < 1024 {
        return format!("{bytes} B");
    }

    let mut value = bytes as f64;
    let mut unit_index = 0;

    while value >= 1024.0 && unit_index < UNITS.len() - 1 {
        value /= 1024.0;
        unit_index += 1;
    }

    if value >= 10.0 {
        format!("{:.0} {}", value, UNITS[unit_index])
    } else {
        format!("{:.1} {}", value, UNITS[unit_index])
    }
}

/// Periodic progress reporter for one container.
#[derive(Debug)]
pub struct ProgressMonitor {
    container: Arc<Container>,
    mode: ServingMode,
    readiness_threshold: u64,
    address: String,
    clear_screen: bool,
    previous: Option<u64>,
}

impl ProgressMonitor {
    /// Creates a monitor. `readiness_threshold` is the stream readahead size
    /// and `address` the `host:port` advertised to the operator.
    pub fn new(
        container: Arc<Container>,
        mode: ServingMode,
        readiness_threshold: u64,
        address: impl Into<String>,
    ) -> Self {
        Self {
            container,
            mode,
            readiness_threshold,
            address: address.into(),
            clear_screen: false,
            previous: None,
        }
    }

    /// Clears the terminal before every frame.
    pub fn with_clear_screen(mut self, clear: bool) -> Self {
        self.clear_screen = clear;
        self
    }

    /// Takes a sample; the first one reports zero throughput.
    pub fn sample(&mut self) -> ProgressSample {
        let completed = self.container.completed_bytes();
        let previous = self.previous.replace(completed).unwrap_or(completed);

        ProgressSample {
            completed,
            previous,
            total: self.container.total_bytes(),
        }
    }

    /// Samples and renders the next frame.
    pub fn next_frame(&mut self) -> String {
        let sample = self.sample();
        let readiness = Readiness::evaluate(self.mode, &sample, self.readiness_threshold);
        render_status(self.container.name(), &sample, readiness, &self.address)
    }

    /// Runs the monitor on a one-second interval, writing frames to `sink`
    /// until the returned task is aborted.
    pub fn spawn<W>(mut self, mut sink: W) -> JoinHandle<()>
    where
        W: Write + Send + 'static,
    {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(TICK_INTERVAL);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                ticker.tick().await;
                let frame = self.next_frame();
                if let Err(e) = self.write_frame(&mut sink, &frame) {
                    tracing::debug!("Skipping progress frame: {}", e);
                }
            }
        })
    }

    fn write_frame<W: Write>(&self, sink: &mut W, frame: &str) -> std::io::Result<()> {
        if self.clear_screen {
            sink.write_all(CLEAR_SCREEN.as_bytes())?;
        }
        sink.write_all(frame.as_bytes())?;
        sink.flush()
    }
}
