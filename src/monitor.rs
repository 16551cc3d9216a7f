//! Stall detection on the player's stderr.
//!
//! ffplay redraws a status line (`  12.34 A-V: -0.001 fd= 0 ...`) several
//! times per second. The leading number is the playback clock; if it does not
//! move across a whole polling interval the player is considered frozen.

use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::time::{self, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

const MARKER: &str = "A-V";

/// Extract the playback clock, in whole seconds, from a status line.
pub fn parse_timestamp(line: &str) -> Option<u64> {
    let index = line.find(MARKER)?;
    let token = line[..index].split_whitespace().next_back()?;
    let seconds: f64 = token.parse().ok()?;
    if !seconds.is_finite() {
        return None;
    }
    let whole = seconds.trunc();
    (whole >= 1.0).then_some(whole as u64)
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Sample {
    /// Nothing reported yet
    Waiting,
    Baseline(u64),
    Advancing(u64),
    Stalled(u64),
}

/// Compares the latest reported clock with the one seen at the previous poll.
#[derive(Debug, Default)]
pub struct StallDetector {
    latest: Option<u64>,
    baseline: Option<u64>,
}

impl StallDetector {
    pub fn observe(&mut self, timestamp: u64) {
        self.latest = Some(timestamp);
    }

    pub fn sample(&mut self) -> Sample {
        let Some(latest) = self.latest else {
            return Sample::Waiting;
        };
        match self.baseline {
            None => {
                self.baseline = Some(latest);
                Sample::Baseline(latest)
            }
            Some(baseline) if baseline == latest => Sample::Stalled(latest),
            Some(_) => {
                self.baseline = Some(latest);
                Sample::Advancing(latest)
            }
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Outcome {
    /// The clock stopped at this many seconds
    Stalled(u64),
    Cancelled,
}

/// Read `stream` until a stall is seen or `cancel` fires.
///
/// Reading and polling share one task; both stop when this returns.
pub async fn watch<R>(stream: R, period: Duration, cancel: CancellationToken) -> Outcome
where
    R: AsyncRead + Unpin,
{
    let mut reader = BufReader::new(stream);
    let mut buf = Vec::new();
    let mut open = true;
    let mut detector = StallDetector::default();

    let mut ticker = time::interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => return Outcome::Cancelled,
            read = reader.read_until(b'\r', &mut buf), if open => {
                match read {
                    Ok(0) => open = false,
                    Ok(_) => {
                        let text = String::from_utf8_lossy(&buf);
                        for line in text.split('\n') {
                            if let Some(timestamp) = parse_timestamp(line) {
                                detector.observe(timestamp);
                            }
                        }
                        buf.clear();
                    }
                    Err(e) => {
                        tracing::debug!("player stderr closed: {}", e);
                        open = false;
                    }
                }
            }
            _ = ticker.tick() => match detector.sample() {
                Sample::Waiting => {}
                Sample::Baseline(t) | Sample::Advancing(t) => tracing::debug!("time: {} s", t),
                Sample::Stalled(t) => {
                    tracing::warn!("playback stalled at {} s", t);
                    return Outcome::Stalled(t);
                }
            },
        }
    }
}
