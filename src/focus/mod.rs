// Block-session lifecycle and the delayed unlock
//
// Idle -> Active -> PendingUnlock -> Idle. The machine owns all session state; the
// ticker and runner only feed it time and codes.

pub mod challenge;
pub mod clock;
pub mod error;
pub mod machine;
pub mod runner;
pub mod state;
pub mod ticker;

pub use challenge::{REVEAL_DELAY_SECS, UnlockChallenge, VerifyOutcome};
pub use clock::{ClockReading, CountdownClock, TICK_PERIOD, TimeSource, format_hms};
pub use error::{ChallengeError, SessionError};
pub use machine::{SelectionPolicy, SessionEvent, SessionSettings, SessionStateMachine, UnlockReport};
pub use runner::SessionRunner;
pub use state::{SessionPhase, SessionSnapshot, SessionStatus, SessionStore};
pub use ticker::{TickEvent, Ticker};
