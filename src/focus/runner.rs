use anyhow::{Context, Result};
use tokio::sync::mpsc;
use tracing::{debug, info};

use super::challenge::VerifyOutcome;
use super::clock::{TICK_PERIOD, TimeSource};
use super::error::{ChallengeError, SessionError};
use super::machine::{SessionEvent, SessionStateMachine};
use super::state::{SessionPhase, SessionStore};
use super::ticker::{TickEvent, Ticker};
use crate::gateway::BlockingGateway;

const TICK_BUFFER: usize = 16;

/// Drives one attached session from ticks and submitted codes
///
/// Ticks and codes are handled one at a time on a single task, so a tick can never
/// interleave with an in-flight unlock.
pub struct SessionRunner<G: BlockingGateway> {
    machine: SessionStateMachine<G>,
    time: TimeSource,
    sessions: Option<SessionStore>,
}

impl<G: BlockingGateway> SessionRunner<G> {
    pub fn new(machine: SessionStateMachine<G>, time: TimeSource) -> Self {
        Self {
            machine,
            time,
            sessions: None,
        }
    }

    /// Persist the session snapshot on every phase change
    pub fn with_store(mut self, sessions: SessionStore) -> Self {
        self.sessions = Some(sessions);
        self
    }

    pub fn machine(&self) -> &SessionStateMachine<G> {
        &self.machine
    }

    pub fn into_machine(self) -> SessionStateMachine<G> {
        self.machine
    }

    /// Write the current snapshot, or clear it when Idle
    pub fn persist(&self) -> Result<()> {
        let Some(sessions) = &self.sessions else {
            return Ok(());
        };

        match self.machine.snapshot() {
            Some(snapshot) => sessions.save(&snapshot),
            None => sessions.clear(),
        }
    }

    /// Run until the session is back to Idle or `codes` closes
    ///
    /// Returns the phase the session was left in.
    pub async fn run(
        &mut self,
        mut codes: mpsc::Receiver<String>,
        events: mpsc::UnboundedSender<SessionEvent>,
    ) -> Result<SessionPhase> {
        let (tick_tx, mut tick_rx) = mpsc::channel::<TickEvent>(TICK_BUFFER);
        let mut ticker: Option<Ticker> = None;

        self.persist()?;
        info!("Attached to session ({})", self.machine.phase());

        loop {
            if self.machine.phase() == SessionPhase::Idle {
                break;
            }

            // Restart the ticker whenever the phase (and so the generation) changed
            let generation = self.machine.generation();
            let current = ticker.as_ref().map(Ticker::generation);
            if !self.machine.needs_ticks() {
                ticker = None;
            } else if current != Some(generation) {
                debug!("Starting ticker for generation {}", generation);
                ticker = Some(Ticker::start(generation, TICK_PERIOD, self.time, tick_tx.clone()));
            }

            tokio::select! {
                Some(tick) = tick_rx.recv() => {
                    let before = self.machine.phase();
                    let event = self.machine.tick(tick.generation, tick.at);
                    if self.machine.phase() != before {
                        self.persist()?;
                    }
                    if let Some(event) = event {
                        emit(&events, event);
                    }
                }
                code = codes.recv() => match code {
                    Some(code) => {
                        if let Some(event) = self.submit(code.trim()).await? {
                            emit(&events, event);
                        }
                    }
                    None => {
                        info!("Code input closed, detaching from session");
                        break;
                    }
                },
            }
        }

        Ok(self.machine.phase())
    }

    async fn submit(&mut self, code: &str) -> Result<Option<SessionEvent>> {
        let now = self.time.now();
        let event = match self.machine.verify(code, now) {
            Ok(VerifyOutcome::Match) => {
                let report = self
                    .machine
                    .complete_unlock()
                    .await
                    .context("Failed to complete unlock")?;
                self.persist()?;
                SessionEvent::Unlocked(report)
            }
            Ok(VerifyOutcome::NoMatch) => SessionEvent::CodeRejected,
            Err(SessionError::Challenge(ChallengeError::NotYetRevealed { reveal_at })) => {
                SessionEvent::CodeNotReady { reveal_at }
            }
            Err(SessionError::NotPendingUnlock) => {
                debug!("Ignoring code while session is {}", self.machine.phase());
                return Ok(None);
            }
            Err(e) => return Err(e.into()),
        };
        Ok(Some(event))
    }
}

fn emit(events: &mpsc::UnboundedSender<SessionEvent>, event: SessionEvent) {
    if events.send(event).is_err() {
        debug!("Event receiver closed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{Platform, Selection};
    use crate::focus::challenge::REVEAL_DELAY_SECS;
    use crate::focus::machine::SessionSettings;
    use crate::gateway::testing::{GatewayCall, RecordingGateway};
    use crate::storage::MemoryStore;
    use chrono::{DateTime, TimeZone, Utc};
    use std::sync::Arc;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 11, 16, 9, 0, 0).unwrap()
    }

    fn insta_tiktok() -> Selection {
        [Platform::Instagram, Platform::Tiktok].into_iter().collect()
    }

    /// Next event that is not a countdown reading
    async fn next_event(rx: &mut mpsc::UnboundedReceiver<SessionEvent>) -> SessionEvent {
        loop {
            match rx.recv().await {
                Some(SessionEvent::Countdown(_)) | Some(SessionEvent::RevealCountdown(_)) => continue,
                Some(event) => return event,
                None => panic!("event stream closed"),
            }
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_block_expire_reveal_unlock() {
        let gateway = RecordingGateway::new();
        let time = TimeSource::anchored(t0());
        let sessions = SessionStore::new(Arc::new(MemoryStore::new()));

        let mut machine = SessionStateMachine::new(gateway.clone(), SessionSettings::default());
        machine.start_with(insta_tiktok(), 1, time.now()).await.unwrap();
        assert_eq!(machine.phase(), SessionPhase::Active);

        let mut runner = SessionRunner::new(machine, time).with_store(sessions.clone());
        let (code_tx, code_rx) = mpsc::channel(4);
        let (event_tx, mut event_rx) = mpsc::unbounded_channel();
        let handle = tokio::spawn(async move {
            let phase = runner.run(code_rx, event_tx).await?;
            Ok::<_, anyhow::Error>((phase, runner))
        });

        // Codes are ignored while the block is running
        code_tx.send("123456".to_string()).await.unwrap();

        match next_event(&mut event_rx).await {
            SessionEvent::Expired { .. } => {}
            other => panic!("expected expiry, got {:?}", other),
        }
        assert!(time.now() >= t0() + chrono::Duration::hours(1));
        let snapshot = sessions.load().unwrap().unwrap();
        assert_eq!(snapshot.phase, SessionPhase::PendingUnlock);
        assert_eq!(snapshot.platforms, vec![Platform::Instagram, Platform::Tiktok]);

        code_tx.send("000000".to_string()).await.unwrap();
        match next_event(&mut event_rx).await {
            SessionEvent::CodeNotReady { reveal_at } => {
                assert!(reveal_at >= t0() + chrono::Duration::seconds(3600 + REVEAL_DELAY_SECS));
            }
            other => panic!("expected code not ready, got {:?}", other),
        }

        let code = match next_event(&mut event_rx).await {
            SessionEvent::CodeRevealed { code } => code,
            other => panic!("expected reveal, got {:?}", other),
        };
        assert!(time.now() >= t0() + chrono::Duration::seconds(3600 + REVEAL_DELAY_SECS));

        let wrong = if code == "123456" { "654321" } else { "123456" };
        code_tx.send(wrong.to_string()).await.unwrap();
        assert!(matches!(next_event(&mut event_rx).await, SessionEvent::CodeRejected));

        code_tx.send(format!("{}\n", code)).await.unwrap();
        match next_event(&mut event_rx).await {
            SessionEvent::Unlocked(report) => assert!(report.gateway_error.is_none()),
            other => panic!("expected unlock, got {:?}", other),
        }

        let (phase, runner) = handle.await.unwrap().unwrap();
        assert_eq!(phase, SessionPhase::Idle);
        assert!(runner.machine().selection().is_empty());
        assert!(sessions.load().unwrap().is_none());
        assert_eq!(
            gateway.calls().last(),
            Some(&GatewayCall::Unblock {
                ids: vec![
                    "com.instagram.android".to_string(),
                    "com.zhiliaoapp.musically".to_string(),
                ]
            })
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_closed_input_detaches_and_keeps_snapshot() {
        let time = TimeSource::anchored(t0());
        let sessions = SessionStore::new(Arc::new(MemoryStore::new()));
        let mut machine = SessionStateMachine::new(RecordingGateway::new(), SessionSettings::default());
        let id = machine.start_with(insta_tiktok(), 2, time.now()).await.unwrap();

        let mut runner = SessionRunner::new(machine, time).with_store(sessions.clone());
        let (code_tx, code_rx) = mpsc::channel::<String>(1);
        drop(code_tx);
        let (event_tx, _event_rx) = mpsc::unbounded_channel();

        let phase = runner.run(code_rx, event_tx).await.unwrap();
        assert_eq!(phase, SessionPhase::Active);

        let snapshot = sessions.load().unwrap().unwrap();
        assert_eq!(snapshot.session_id, id);
        assert_eq!(snapshot.phase, SessionPhase::Active);
    }

    #[tokio::test(start_paused = true)]
    async fn test_idle_machine_returns_immediately() {
        let machine = SessionStateMachine::new(RecordingGateway::new(), SessionSettings::default());
        let mut runner = SessionRunner::new(machine, TimeSource::anchored(t0()));
        let (_code_tx, code_rx) = mpsc::channel::<String>(1);
        let (event_tx, _event_rx) = mpsc::unbounded_channel();

        assert_eq!(runner.run(code_rx, event_tx).await.unwrap(), SessionPhase::Idle);
        assert!(runner.into_machine().snapshot().is_none());
    }
}
