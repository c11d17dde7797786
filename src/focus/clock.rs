use chrono::{DateTime, Duration, Utc};

/// Tick period shared by the block countdown and the reveal countdown
pub const TICK_PERIOD: std::time::Duration = std::time::Duration::from_secs(1);

/// Where "now" comes from
#[derive(Debug, Clone, Copy)]
pub enum TimeSource {
    /// Wall clock
    System,
    /// Frozen at one instant
    Fixed(DateTime<Utc>),
    /// Wall-clock anchor advanced by tokio's clock, so paused-time tests can move it
    Anchored {
        wall: DateTime<Utc>,
        anchor: tokio::time::Instant,
    },
}

impl TimeSource {
    pub fn fixed(at: DateTime<Utc>) -> Self {
        Self::Fixed(at)
    }

    pub fn anchored(wall: DateTime<Utc>) -> Self {
        Self::Anchored {
            wall,
            anchor: tokio::time::Instant::now(),
        }
    }

    pub fn now(&self) -> DateTime<Utc> {
        match self {
            Self::System => Utc::now(),
            Self::Fixed(at) => *at,
            Self::Anchored { wall, anchor } => {
                let elapsed = Duration::from_std(anchor.elapsed()).unwrap_or_else(|_| Duration::zero());
                *wall + elapsed
            }
        }
    }
}

/// One observation of a countdown
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ClockReading {
    pub remaining: Duration,
    pub progress: f64,
    /// Set on the single reading that reached zero
    pub expired: bool,
}

impl ClockReading {
    pub fn remaining_display(&self) -> String {
        format_hms(self.remaining)
    }
}

/// Maps `(start, end, now)` to remaining time and progress
///
/// The clock fires its expiry exactly once; after that `tick` yields nothing and a
/// new interval needs a new clock.
#[derive(Debug, Clone)]
pub struct CountdownClock {
    start: DateTime<Utc>,
    end: DateTime<Utc>,
    fired: bool,
}

impl CountdownClock {
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        Self {
            start,
            end,
            fired: false,
        }
    }

    /// Whether expiry has already fired
    pub fn is_stopped(&self) -> bool {
        self.fired
    }

    /// `max(0, end - now)`
    pub fn remaining_at(&self, now: DateTime<Utc>) -> Duration {
        (self.end - now).max(Duration::zero())
    }

    /// `clamp((now - start) / (end - start), 0, 1)`
    pub fn progress_at(&self, now: DateTime<Utc>) -> f64 {
        let total = (self.end - self.start).num_milliseconds();
        if total <= 0 {
            return 1.0;
        }

        let elapsed = (now - self.start).num_milliseconds();
        (elapsed as f64 / total as f64).clamp(0.0, 1.0)
    }

    pub fn reading_at(&self, now: DateTime<Utc>) -> ClockReading {
        ClockReading {
            remaining: self.remaining_at(now),
            progress: self.progress_at(now),
            expired: false,
        }
    }

    /// Advance the clock; `None` once expiry has fired
    pub fn tick(&mut self, now: DateTime<Utc>) -> Option<ClockReading> {
        if self.fired {
            return None;
        }

        let mut reading = self.reading_at(now);
        if reading.remaining <= Duration::zero() {
            self.fired = true;
            reading.expired = true;
            reading.progress = 1.0;
        }
        Some(reading)
    }
}

/// Format a duration as zero-padded `HH:MM:SS`, saturating at `00:00:00`
pub fn format_hms(duration: Duration) -> String {
    let total = duration.num_seconds().max(0);
    let hours = total / 3600;
    let minutes = (total % 3600) / 60;
    let seconds = total % 60;
    format!("{:02}:{:02}:{:02}", hours, minutes, seconds)
}
