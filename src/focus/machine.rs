use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::challenge::{UnlockChallenge, VerifyOutcome};
use super::clock::{ClockReading, CountdownClock};
use super::error::SessionError;
use super::state::{SNAPSHOT_VERSION, SessionPhase, SessionSnapshot, SessionStatus};
use crate::catalog::{Platform, Selection};
use crate::gateway::{BlockingGateway, GatewayError, with_timeout};

/// What happens to the selection once a session is unlocked
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SelectionPolicy {
    #[default]
    Clear,
    Retain,
}

#[derive(Debug, Clone)]
pub struct SessionSettings {
    pub selection_policy: SelectionPolicy,
    /// Upper bound on every gateway call
    pub gateway_timeout: std::time::Duration,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            selection_policy: SelectionPolicy::Clear,
            gateway_timeout: std::time::Duration::from_secs(30),
        }
    }
}

/// Notification produced by a tick or a code submission
#[derive(Debug)]
pub enum SessionEvent {
    /// Block countdown progressed
    Countdown(ClockReading),
    /// Block ended; the unlock flow starts
    Expired { session_id: Uuid },
    /// Reveal delay progressed
    RevealCountdown(ClockReading),
    CodeRevealed { code: String },
    CodeRejected,
    CodeNotReady { reveal_at: DateTime<Utc> },
    Unlocked(UnlockReport),
}

/// Outcome of lifting a block
#[derive(Debug)]
pub struct UnlockReport {
    pub session_id: Uuid,
    pub platforms: Vec<Platform>,
    /// Set when the backend failed to lift the block; the session is Idle regardless
    pub gateway_error: Option<GatewayError>,
}

#[derive(Debug)]
struct ActiveSession {
    id: Uuid,
    started_at: DateTime<Utc>,
    ends_at: DateTime<Utc>,
    clock: CountdownClock,
}

#[derive(Debug)]
struct PendingUnlock {
    id: Uuid,
    started_at: DateTime<Utc>,
    ends_at: DateTime<Utc>,
    challenge: UnlockChallenge,
    reveal_clock: CountdownClock,
    verified: bool,
}

#[derive(Debug)]
enum SessionState {
    Idle,
    Active(ActiveSession),
    PendingUnlock(PendingUnlock),
}

/// Owner of the single block session and its selection
///
/// Every phase change bumps `generation`; ticks stamped with an older generation are
/// dropped so a timer from a previous phase can never touch the current one.
pub struct SessionStateMachine<G: BlockingGateway> {
    gateway: G,
    settings: SessionSettings,
    selection: Selection,
    state: SessionState,
    generation: u64,
}

impl<G: BlockingGateway> SessionStateMachine<G> {
    pub fn new(gateway: G, settings: SessionSettings) -> Self {
        Self {
            gateway,
            settings,
            selection: Selection::new(),
            state: SessionState::Idle,
            generation: 0,
        }
    }

    pub fn gateway(&self) -> &G {
        &self.gateway
    }

    pub fn selection(&self) -> &Selection {
        &self.selection
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn phase(&self) -> SessionPhase {
        match self.state {
            SessionState::Idle => SessionPhase::Idle,
            SessionState::Active(_) => SessionPhase::Active,
            SessionState::PendingUnlock(_) => SessionPhase::PendingUnlock,
        }
    }

    /// Whether the current phase still has a countdown to drive
    pub fn needs_ticks(&self) -> bool {
        match &self.state {
            SessionState::Idle => false,
            SessionState::Active(_) => true,
            SessionState::PendingUnlock(pending) => !pending.challenge.is_revealed(),
        }
    }

    fn ensure_idle(&self) -> Result<(), SessionError> {
        if matches!(self.state, SessionState::Idle) {
            Ok(())
        } else {
            Err(SessionError::SessionActive)
        }
    }

    pub fn select(&mut self, platform: Platform) -> Result<(), SessionError> {
        self.ensure_idle()?;
        self.selection.insert(platform);
        Ok(())
    }

    pub fn deselect(&mut self, platform: Platform) -> Result<(), SessionError> {
        self.ensure_idle()?;
        self.selection.remove(platform);
        Ok(())
    }

    /// Flip one platform; returns whether it is now selected
    pub fn toggle(&mut self, platform: Platform) -> Result<bool, SessionError> {
        self.ensure_idle()?;
        Ok(self.selection.toggle(platform))
    }

    pub fn select_all(&mut self) -> Result<(), SessionError> {
        self.ensure_idle()?;
        self.selection.select_all();
        Ok(())
    }

    /// "Block all" / "Deselect all" button semantics
    pub fn toggle_all(&mut self) -> Result<(), SessionError> {
        self.ensure_idle()?;
        if self.selection.is_all() {
            self.selection.clear();
        } else {
            self.selection.select_all();
        }
        Ok(())
    }

    pub fn cancel_selection(&mut self) -> Result<(), SessionError> {
        self.ensure_idle()?;
        self.selection.clear();
        Ok(())
    }

    pub fn replace_selection(&mut self, selection: Selection) -> Result<(), SessionError> {
        self.ensure_idle()?;
        self.selection = selection;
        Ok(())
    }

    /// Replace the selection and start a session with it
    pub async fn start_with(
        &mut self,
        selection: Selection,
        duration_hours: u32,
        now: DateTime<Utc>,
    ) -> Result<Uuid, SessionError> {
        self.replace_selection(selection)?;
        self.start_session(duration_hours, now).await
    }

    /// Ask the backend to block the selection and go Active
    ///
    /// Any failure leaves the session Idle with the selection intact.
    pub async fn start_session(
        &mut self,
        duration_hours: u32,
        now: DateTime<Utc>,
    ) -> Result<Uuid, SessionError> {
        self.ensure_idle()?;
        if self.selection.is_empty() {
            return Err(SessionError::InvalidSelection);
        }
        if duration_hours == 0 {
            return Err(SessionError::InvalidDuration);
        }
        let ends_at = block_end(now, duration_hours).ok_or(SessionError::InvalidDuration)?;

        let ids = self.selection.enforcement_ids();
        debug!("Requesting block for {:?} ({}h)", ids, duration_hours);

        if let Err(e) = with_timeout(
            "blockApps",
            self.settings.gateway_timeout,
            self.gateway.block_apps(&ids, duration_hours),
        )
        .await
        {
            warn!("Failed to start block session: {}", e);
            return Err(SessionError::Gateway(e));
        }

        let id = Uuid::new_v4();
        self.state = SessionState::Active(ActiveSession {
            id,
            started_at: now,
            ends_at,
            clock: CountdownClock::new(now, ends_at),
        });
        self.generation += 1;

        info!(
            "Block session {} started for {} platform(s), ends at {}",
            id,
            self.selection.len(),
            ends_at.format("%Y-%m-%d %H:%M:%S UTC")
        );
        Ok(id)
    }

    /// Feed one tick from the ticker of `generation`
    pub fn tick(&mut self, generation: u64, now: DateTime<Utc>) -> Option<SessionEvent> {
        if generation != self.generation {
            debug!(
                "Dropping stale tick (generation {}, current {})",
                generation, self.generation
            );
            return None;
        }

        match &mut self.state {
            SessionState::Idle => None,
            SessionState::Active(active) => {
                let reading = active.clock.tick(now)?;
                if reading.expired {
                    self.expire(now)
                } else {
                    Some(SessionEvent::Countdown(reading))
                }
            }
            SessionState::PendingUnlock(pending) => {
                if pending.challenge.refresh(now) {
                    pending.reveal_clock.tick(now);
                    info!("Unlock code for session {} revealed", pending.id);
                    return match pending.challenge.display_code() {
                        Ok(code) => Some(SessionEvent::CodeRevealed {
                            code: code.to_string(),
                        }),
                        Err(_) => None,
                    };
                }
                if pending.challenge.is_revealed() {
                    return None;
                }
                pending.reveal_clock.tick(now).map(SessionEvent::RevealCountdown)
            }
        }
    }

    /// Expire the session if its end time has passed
    ///
    /// Fires at most once per session; later calls are no-ops.
    pub fn check_expiry(&mut self, now: DateTime<Utc>) -> Option<SessionEvent> {
        match &self.state {
            SessionState::Active(active) if now >= active.ends_at => self.expire(now),
            _ => None,
        }
    }

    fn expire(&mut self, now: DateTime<Utc>) -> Option<SessionEvent> {
        let SessionState::Active(active) = &self.state else {
            return None;
        };
        let (id, started_at, ends_at) = (active.id, active.started_at, active.ends_at);

        let challenge = UnlockChallenge::create(now);
        let reveal_clock = challenge.reveal_clock();
        info!(
            "Block session {} ended, unlock code reveals at {}",
            id,
            challenge.reveal_at().format("%H:%M:%S UTC")
        );

        self.state = SessionState::PendingUnlock(PendingUnlock {
            id,
            started_at,
            ends_at,
            challenge,
            reveal_clock,
            verified: false,
        });
        self.generation += 1;

        Some(SessionEvent::Expired { session_id: id })
    }

    /// Check a submitted unlock code; attempts are unlimited
    pub fn verify(&mut self, code: &str, now: DateTime<Utc>) -> Result<VerifyOutcome, SessionError> {
        let SessionState::PendingUnlock(pending) = &mut self.state else {
            return Err(SessionError::NotPendingUnlock);
        };

        pending.challenge.refresh(now);
        let outcome = pending.challenge.verify(code)?;
        match outcome {
            VerifyOutcome::Match => {
                info!("Unlock code accepted for session {}", pending.id);
                pending.verified = true;
            }
            VerifyOutcome::NoMatch => debug!("Unlock code rejected"),
        }
        Ok(outcome)
    }

    /// Lift the block after a verified code and return to Idle
    ///
    /// A backend failure here is logged and reported, but never keeps the user blocked.
    pub async fn complete_unlock(&mut self) -> Result<UnlockReport, SessionError> {
        let session_id = match &self.state {
            SessionState::PendingUnlock(pending) if pending.verified => pending.id,
            SessionState::PendingUnlock(_) => return Err(SessionError::NotVerified),
            _ => return Err(SessionError::NotPendingUnlock),
        };

        let platforms: Vec<Platform> = self.selection.iter().collect();
        let ids = self.selection.enforcement_ids();
        let gateway_error = match with_timeout(
            "unblockApps",
            self.settings.gateway_timeout,
            self.gateway.unblock_apps(&ids),
        )
        .await
        {
            Ok(()) => None,
            Err(e) => {
                warn!("Failed to lift block for session {}: {}", session_id, e);
                Some(e)
            }
        };

        self.state = SessionState::Idle;
        self.generation += 1;
        if self.settings.selection_policy == SelectionPolicy::Clear {
            self.selection.clear();
        }

        info!("Block session {} unlocked", session_id);
        Ok(UnlockReport {
            session_id,
            platforms,
            gateway_error,
        })
    }

    /// Reattach to a persisted session
    ///
    /// A pending snapshot gets a fresh challenge with the full reveal delay.
    pub fn restore(&mut self, snapshot: SessionSnapshot, now: DateTime<Utc>) -> Result<(), SessionError> {
        self.ensure_idle()?;
        let selection: Selection = snapshot.platforms.iter().copied().collect();
        if selection.is_empty() {
            return Err(SessionError::InvalidSelection);
        }
        if snapshot.ends_at <= snapshot.started_at {
            return Err(SessionError::InvalidDuration);
        }

        let state = match snapshot.phase {
            SessionPhase::Idle => {
                debug!("Ignoring idle snapshot");
                return Ok(());
            }
            SessionPhase::Active => SessionState::Active(ActiveSession {
                id: snapshot.session_id,
                started_at: snapshot.started_at,
                ends_at: snapshot.ends_at,
                clock: CountdownClock::new(snapshot.started_at, snapshot.ends_at),
            }),
            SessionPhase::PendingUnlock => {
                let challenge = UnlockChallenge::create(now);
                let reveal_clock = challenge.reveal_clock();
                SessionState::PendingUnlock(PendingUnlock {
                    id: snapshot.session_id,
                    started_at: snapshot.started_at,
                    ends_at: snapshot.ends_at,
                    challenge,
                    reveal_clock,
                    verified: false,
                })
            }
        };
        self.selection = selection;
        self.state = state;
        self.generation += 1;

        info!("Restored block session {} ({})", snapshot.session_id, snapshot.phase);
        Ok(())
    }

    /// Persistable form of the current session; `None` when Idle
    pub fn snapshot(&self) -> Option<SessionSnapshot> {
        let (session_id, phase, started_at, ends_at) = match &self.state {
            SessionState::Idle => return None,
            SessionState::Active(active) => (
                active.id,
                SessionPhase::Active,
                active.started_at,
                active.ends_at,
            ),
            SessionState::PendingUnlock(pending) => (
                pending.id,
                SessionPhase::PendingUnlock,
                pending.started_at,
                pending.ends_at,
            ),
        };

        Some(SessionSnapshot {
            version: SNAPSHOT_VERSION.to_string(),
            session_id,
            phase,
            platforms: self.selection.iter().collect(),
            started_at,
            ends_at,
        })
    }

    pub fn status(&self, now: DateTime<Utc>) -> SessionStatus {
        let platforms: Vec<Platform> = self.selection.iter().collect();
        match &self.state {
            SessionState::Idle => SessionStatus::idle(platforms),
            SessionState::Active(active) => {
                let reading = active.clock.reading_at(now);
                SessionStatus {
                    phase: SessionPhase::Active,
                    session_id: Some(active.id),
                    platforms,
                    started_at: Some(active.started_at),
                    ends_at: Some(active.ends_at),
                    remaining: reading.remaining,
                    progress: reading.progress,
                    reveal_remaining: None,
                    code_revealed: false,
                }
            }
            SessionState::PendingUnlock(pending) => SessionStatus {
                phase: SessionPhase::PendingUnlock,
                session_id: Some(pending.id),
                platforms,
                started_at: Some(pending.started_at),
                ends_at: Some(pending.ends_at),
                remaining: Duration::zero(),
                progress: 1.0,
                reveal_remaining: Some(pending.challenge.remaining_delay(now)),
                code_revealed: pending.challenge.is_revealed(),
            },
        }
    }
}

/// `now + hours`, or `None` when the end falls outside the representable range
pub fn block_end(now: DateTime<Utc>, duration_hours: u32) -> Option<DateTime<Utc>> {
    now.checked_add_signed(Duration::try_hours(i64::from(duration_hours))?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::focus::challenge::REVEAL_DELAY_SECS;
    use crate::focus::error::ChallengeError;
    use crate::gateway::testing::{GatewayCall, RecordingGateway};
    use chrono::TimeZone;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 11, 16, 9, 0, 0).unwrap()
    }

    fn machine(gateway: &RecordingGateway) -> SessionStateMachine<RecordingGateway> {
        SessionStateMachine::new(gateway.clone(), SessionSettings::default())
    }

    fn insta_tiktok() -> Selection {
        [Platform::Instagram, Platform::Tiktok].into_iter().collect()
    }

    fn insta_tiktok_ids() -> Vec<String> {
        vec![
            "com.instagram.android".to_string(),
            "com.zhiliaoapp.musically".to_string(),
        ]
    }

    /// Start a 1h session, expire it and reveal the code
    async fn revealed(machine: &mut SessionStateMachine<RecordingGateway>) -> (DateTime<Utc>, String) {
        machine.start_with(insta_tiktok(), 1, t0()).await.unwrap();
        let end = t0() + Duration::hours(1);
        assert!(machine.check_expiry(end).is_some());

        let reveal = end + Duration::seconds(REVEAL_DELAY_SECS);
        match machine.tick(machine.generation(), reveal) {
            Some(SessionEvent::CodeRevealed { code }) => (reveal, code),
            other => panic!("expected reveal, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_start_session_goes_active() {
        for hours in [1, 2, 4, 8] {
            let gateway = RecordingGateway::new();
            let mut machine = machine(&gateway);
            machine.start_with(insta_tiktok(), hours, t0()).await.unwrap();

            let status = machine.status(t0());
            assert_eq!(status.phase, SessionPhase::Active);
            assert_eq!(status.started_at, Some(t0()));
            assert_eq!(status.ends_at, Some(t0() + Duration::hours(i64::from(hours))));
            assert_eq!(status.remaining, Duration::hours(i64::from(hours)));
            assert_eq!(
                gateway.calls(),
                vec![GatewayCall::Block {
                    ids: insta_tiktok_ids(),
                    duration_hours: hours
                }]
            );
        }
    }

    #[tokio::test]
    async fn test_empty_selection_is_rejected() {
        let gateway = RecordingGateway::new();
        let mut machine = machine(&gateway);

        let err = machine.start_session(1, t0()).await.unwrap_err();
        assert!(matches!(err, SessionError::InvalidSelection));
        assert_eq!(machine.phase(), SessionPhase::Idle);
        assert!(gateway.calls().is_empty());
    }

    #[tokio::test]
    async fn test_zero_duration_is_rejected() {
        let gateway = RecordingGateway::new();
        let mut machine = machine(&gateway);

        let err = machine.start_with(insta_tiktok(), 0, t0()).await.unwrap_err();
        assert!(matches!(err, SessionError::InvalidDuration));
        assert_eq!(machine.phase(), SessionPhase::Idle);
    }

    #[tokio::test]
    async fn test_gateway_failure_keeps_idle_and_allows_retry() {
        let gateway = RecordingGateway::failing_block();
        let mut machine = machine(&gateway);

        let err = machine.start_with(insta_tiktok(), 2, t0()).await.unwrap_err();
        assert!(matches!(err, SessionError::Gateway(GatewayError::Unavailable(_))));
        assert_eq!(machine.phase(), SessionPhase::Idle);
        assert_eq!(machine.selection(), &insta_tiktok());
        let generation = machine.generation();

        gateway.set_fail_block(false);
        machine.start_session(2, t0()).await.unwrap();
        assert_eq!(machine.phase(), SessionPhase::Active);
        assert_eq!(machine.generation(), generation + 1);
    }

    struct HungGateway;

    impl BlockingGateway for HungGateway {
        async fn block_apps(&self, _ids: &[String], _hours: u32) -> Result<(), GatewayError> {
            std::future::pending().await
        }
        async fn unblock_apps(&self, _ids: &[String]) -> Result<(), GatewayError> {
            std::future::pending().await
        }
        async fn is_app_blocked(&self, _id: &str) -> Result<bool, GatewayError> {
            Ok(false)
        }
        async fn usage_stats(&self) -> Result<Vec<crate::gateway::UsageStat>, GatewayError> {
            Ok(Vec::new())
        }
        async fn request_permissions(&self) -> Result<bool, GatewayError> {
            Ok(true)
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_hung_gateway_times_out_and_stays_idle() {
        let mut machine = SessionStateMachine::new(HungGateway, SessionSettings::default());

        let err = machine.start_with(insta_tiktok(), 1, t0()).await.unwrap_err();
        assert!(matches!(err, SessionError::Gateway(GatewayError::Timeout { .. })));
        assert_eq!(machine.phase(), SessionPhase::Idle);
    }

    #[tokio::test]
    async fn test_selection_is_frozen_while_not_idle() {
        let gateway = RecordingGateway::new();
        let mut machine = machine(&gateway);
        machine.start_with(insta_tiktok(), 1, t0()).await.unwrap();

        assert!(matches!(machine.select(Platform::Youtube), Err(SessionError::SessionActive)));
        assert!(matches!(machine.toggle(Platform::Instagram), Err(SessionError::SessionActive)));
        assert!(matches!(machine.toggle_all(), Err(SessionError::SessionActive)));
        assert!(matches!(machine.cancel_selection(), Err(SessionError::SessionActive)));
        assert!(matches!(
            machine.start_session(1, t0()).await,
            Err(SessionError::SessionActive)
        ));
        assert_eq!(machine.selection(), &insta_tiktok());

        machine.check_expiry(t0() + Duration::hours(1));
        assert!(matches!(machine.deselect(Platform::Tiktok), Err(SessionError::SessionActive)));
        assert!(matches!(machine.select_all(), Err(SessionError::SessionActive)));
    }

    #[test]
    fn test_toggle_all() {
        let mut machine = machine(&RecordingGateway::new());
        machine.toggle_all().unwrap();
        assert!(machine.selection().is_all());
        machine.toggle_all().unwrap();
        assert!(machine.selection().is_empty());

        assert!(machine.toggle(Platform::Snapchat).unwrap());
        assert!(!machine.toggle(Platform::Snapchat).unwrap());
    }

    #[tokio::test]
    async fn test_countdown_then_single_expiry() {
        let gateway = RecordingGateway::new();
        let mut machine = machine(&gateway);
        machine.start_with(insta_tiktok(), 1, t0()).await.unwrap();
        let generation = machine.generation();

        match machine.tick(generation, t0() + Duration::minutes(15)) {
            Some(SessionEvent::Countdown(reading)) => {
                assert_eq!(reading.remaining_display(), "00:45:00");
                assert!((reading.progress - 0.25).abs() < 1e-9);
            }
            other => panic!("expected countdown, got {:?}", other),
        }

        let end = t0() + Duration::hours(1);
        assert!(matches!(
            machine.tick(generation, end),
            Some(SessionEvent::Expired { .. })
        ));
        assert_eq!(machine.phase(), SessionPhase::PendingUnlock);

        // Further expiry checks fire nothing and keep the same challenge
        assert!(machine.check_expiry(end + Duration::seconds(10)).is_none());
        assert!(machine.check_expiry(end + Duration::seconds(20)).is_none());
        assert!(machine.tick(generation, end + Duration::seconds(30)).is_none());
        let status = machine.status(end + Duration::seconds(30));
        assert_eq!(status.reveal_remaining, Some(Duration::seconds(270)));
        assert_eq!(status.progress, 1.0);
        assert_eq!(status.remaining, Duration::zero());
    }

    #[tokio::test]
    async fn test_stale_generation_ticks_are_dropped() {
        let gateway = RecordingGateway::new();
        let mut machine = machine(&gateway);
        let idle_generation = machine.generation();
        machine.start_with(insta_tiktok(), 1, t0()).await.unwrap();

        assert!(machine.tick(idle_generation, t0() + Duration::hours(2)).is_none());
        assert_eq!(machine.phase(), SessionPhase::Active);
    }

    #[tokio::test]
    async fn test_reveal_countdown_and_reveal() {
        let gateway = RecordingGateway::new();
        let mut machine = machine(&gateway);
        machine.start_with(insta_tiktok(), 1, t0()).await.unwrap();
        let end = t0() + Duration::hours(1);
        machine.check_expiry(end);
        let generation = machine.generation();

        match machine.tick(generation, end + Duration::seconds(REVEAL_DELAY_SECS - 1)) {
            Some(SessionEvent::RevealCountdown(reading)) => {
                assert_eq!(reading.remaining_display(), "00:00:01");
            }
            other => panic!("expected reveal countdown, got {:?}", other),
        }
        assert!(matches!(
            machine.verify("123456", end + Duration::seconds(60)),
            Err(SessionError::Challenge(ChallengeError::NotYetRevealed { .. }))
        ));

        match machine.tick(generation, end + Duration::seconds(REVEAL_DELAY_SECS)) {
            Some(SessionEvent::CodeRevealed { code }) => {
                assert_eq!(code.len(), 6);
                assert!(code.chars().all(|c| c.is_ascii_digit()));
            }
            other => panic!("expected reveal, got {:?}", other),
        }
        assert!(!machine.needs_ticks());
        assert!(machine.status(end + Duration::seconds(400)).code_revealed);
    }

    #[tokio::test]
    async fn test_unlock_requires_match() {
        let gateway = RecordingGateway::new();
        let mut machine = machine(&gateway);
        let (now, code) = revealed(&mut machine).await;
        let wrong = if code == "123456" { "654321" } else { "123456" };

        assert_eq!(machine.verify(wrong, now).unwrap(), VerifyOutcome::NoMatch);
        assert_eq!(machine.phase(), SessionPhase::PendingUnlock);
        assert!(matches!(
            machine.complete_unlock().await,
            Err(SessionError::NotVerified)
        ));

        assert_eq!(machine.verify(&code, now).unwrap(), VerifyOutcome::Match);
        let report = machine.complete_unlock().await.unwrap();
        assert!(report.gateway_error.is_none());
        assert_eq!(report.platforms, vec![Platform::Instagram, Platform::Tiktok]);
        assert_eq!(machine.phase(), SessionPhase::Idle);
        assert!(machine.selection().is_empty());
        assert_eq!(
            gateway.calls().last(),
            Some(&GatewayCall::Unblock {
                ids: insta_tiktok_ids()
            })
        );
    }

    #[tokio::test]
    async fn test_unlock_survives_gateway_failure() {
        let gateway = RecordingGateway::failing_unblock();
        let mut machine = machine(&gateway);
        let (now, code) = revealed(&mut machine).await;

        machine.verify(&code, now).unwrap();
        let report = machine.complete_unlock().await.unwrap();

        assert!(matches!(report.gateway_error, Some(GatewayError::Rejected { .. })));
        assert_eq!(machine.phase(), SessionPhase::Idle);
    }

    #[tokio::test]
    async fn test_retain_policy_keeps_selection() {
        let gateway = RecordingGateway::new();
        let settings = SessionSettings {
            selection_policy: SelectionPolicy::Retain,
            ..SessionSettings::default()
        };
        let mut machine = SessionStateMachine::new(gateway, settings);
        let (now, code) = revealed(&mut machine).await;

        machine.verify(&code, now).unwrap();
        machine.complete_unlock().await.unwrap();
        assert_eq!(machine.selection(), &insta_tiktok());
    }

    #[tokio::test]
    async fn test_unlock_outside_pending_is_rejected() {
        let mut machine = machine(&RecordingGateway::new());
        assert!(matches!(
            machine.complete_unlock().await,
            Err(SessionError::NotPendingUnlock)
        ));
        assert!(matches!(
            machine.verify("123456", t0()),
            Err(SessionError::NotPendingUnlock)
        ));
    }

    #[tokio::test]
    async fn test_snapshot_and_restore_active() {
        let gateway = RecordingGateway::new();
        let mut original = machine(&gateway);
        let id = original.start_with(insta_tiktok(), 2, t0()).await.unwrap();
        let snapshot = original.snapshot().unwrap();
        assert_eq!(snapshot.session_id, id);
        assert_eq!(snapshot.phase, SessionPhase::Active);

        let mut restored = machine(&RecordingGateway::new());
        let later = t0() + Duration::hours(3);
        restored.restore(snapshot, later).unwrap();
        assert_eq!(restored.selection(), &insta_tiktok());

        // End time already passed: the first tick expires it
        assert!(matches!(
            restored.tick(restored.generation(), later),
            Some(SessionEvent::Expired { session_id }) if session_id == id
        ));
    }

    #[tokio::test]
    async fn test_restore_pending_gets_fresh_challenge() {
        let gateway = RecordingGateway::new();
        let mut original = machine(&gateway);
        original.start_with(insta_tiktok(), 1, t0()).await.unwrap();
        original.check_expiry(t0() + Duration::hours(1));
        let snapshot = original.snapshot().unwrap();
        assert_eq!(snapshot.phase, SessionPhase::PendingUnlock);

        let mut restored = machine(&RecordingGateway::new());
        let now = t0() + Duration::hours(5);
        restored.restore(snapshot, now).unwrap();

        let status = restored.status(now);
        assert_eq!(status.phase, SessionPhase::PendingUnlock);
        assert_eq!(
            status.reveal_remaining,
            Some(Duration::seconds(REVEAL_DELAY_SECS))
        );
        assert!(!status.code_revealed);
    }

    #[tokio::test]
    async fn test_restore_requires_idle() {
        let gateway = RecordingGateway::new();
        let mut machine = machine(&gateway);
        machine.start_with(insta_tiktok(), 1, t0()).await.unwrap();
        let snapshot = machine.snapshot().unwrap();

        assert!(matches!(
            machine.restore(snapshot, t0()),
            Err(SessionError::SessionActive)
        ));
    }

    #[tokio::test]
    async fn test_unrepresentable_end_time_is_rejected_before_blocking() {
        let gateway = RecordingGateway::new();
        let mut machine = machine(&gateway);

        let err = machine
            .start_with([Platform::Instagram].into_iter().collect(), u32::MAX, t0())
            .await;
        assert!(matches!(err, Err(SessionError::InvalidDuration)));
        assert_eq!(machine.phase(), SessionPhase::Idle);
        assert!(gateway.calls().is_empty());
    }

    #[test]
    fn test_block_end() {
        assert_eq!(block_end(t0(), 8), Some(t0() + Duration::hours(8)));
        assert_eq!(block_end(DateTime::<Utc>::MAX_UTC, 1), None);
    }

    #[tokio::test]
    async fn test_idle_snapshot_leaves_selection_alone() {
        let gateway = RecordingGateway::new();
        let mut original = machine(&gateway);
        original.start_with(insta_tiktok(), 1, t0()).await.unwrap();
        let mut snapshot = original.snapshot().unwrap();
        snapshot.phase = SessionPhase::Idle;

        let mut restored = machine(&RecordingGateway::new());
        restored.select(Platform::Youtube).unwrap();
        let generation = restored.generation();
        restored.restore(snapshot, t0()).unwrap();

        assert_eq!(restored.phase(), SessionPhase::Idle);
        assert_eq!(restored.selection(), &[Platform::Youtube].into_iter().collect::<Selection>());
        assert_eq!(restored.generation(), generation);
    }
}
