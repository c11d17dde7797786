use chrono::{DateTime, Duration, Utc};
use rand::Rng;
use std::fmt;

use super::clock::CountdownClock;
use super::error::ChallengeError;

/// Mandatory wait before an unlock code becomes visible
pub const REVEAL_DELAY_SECS: i64 = 300;

const CODE_MIN: u32 = 100_000;
const CODE_MAX: u32 = 999_999;

/// Result of comparing a submitted code
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VerifyOutcome {
    Match,
    NoMatch,
}

/// One-time unlock code gated behind the reveal delay
pub struct UnlockChallenge {
    code: String,
    generated_at: DateTime<Utc>,
    revealed: bool,
}

impl UnlockChallenge {
    /// Generate a fresh code from the thread-local RNG
    pub fn create(now: DateTime<Utc>) -> Self {
        Self::create_with_rng(now, &mut rand::thread_rng())
    }

    pub fn create_with_rng<R: Rng + ?Sized>(now: DateTime<Utc>, rng: &mut R) -> Self {
        let code = rng.gen_range(CODE_MIN..=CODE_MAX).to_string();
        Self {
            code,
            generated_at: now,
            revealed: false,
        }
    }

    pub fn reveal_delay() -> Duration {
        Duration::seconds(REVEAL_DELAY_SECS)
    }

    pub fn reveal_at(&self) -> DateTime<Utc> {
        self.generated_at + Self::reveal_delay()
    }

    /// Countdown covering the reveal delay
    pub fn reveal_clock(&self) -> CountdownClock {
        CountdownClock::new(self.generated_at, self.reveal_at())
    }

    /// Reveal the code once the delay has elapsed; returns true only on the reveal itself
    pub fn refresh(&mut self, now: DateTime<Utc>) -> bool {
        if !self.revealed && now >= self.reveal_at() {
            self.revealed = true;
            return true;
        }
        false
    }

    pub fn is_revealed(&self) -> bool {
        self.revealed
    }

    pub fn remaining_delay(&self, now: DateTime<Utc>) -> Duration {
        (self.reveal_at() - now).max(Duration::zero())
    }

    pub fn display_code(&self) -> Result<&str, ChallengeError> {
        if !self.revealed {
            return Err(self.not_revealed());
        }
        Ok(&self.code)
    }

    /// Compare a submitted code; attempts are unlimited
    pub fn verify(&self, submitted: &str) -> Result<VerifyOutcome, ChallengeError> {
        if !self.revealed {
            return Err(self.not_revealed());
        }

        if submitted == self.code {
            Ok(VerifyOutcome::Match)
        } else {
            Ok(VerifyOutcome::NoMatch)
        }
    }

    fn not_revealed(&self) -> ChallengeError {
        ChallengeError::NotYetRevealed {
            reveal_at: self.reveal_at(),
        }
    }
}

// Keep the code out of logs
impl fmt::Debug for UnlockChallenge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UnlockChallenge")
            .field("code", &"******")
            .field("generated_at", &self.generated_at)
            .field("revealed", &self.revealed)
            .finish()
    }
}
