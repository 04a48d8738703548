//! Collect Coordinator
//!
//! Runs one collection round: broadcast a task, absorb responses one at a
//! time, and close on quorum + grace, full response, timeout or abort.
//! The round owns its batch until it closes and then hands it over by value.

use crate::discovery::dispatch::{DispatchError, TaskDispatch};
use crate::discovery::types::{Envelope, ParticipantId, ResponseOutcome, SitePayload};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::time::Duration;
use thiserror::Error;
use tokio::time::{sleep_until, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

pub const DEFAULT_ROUND_TIMEOUT: Duration = Duration::from_secs(300);

// ============================================================================
// Errors
// ============================================================================

#[derive(Error, Debug)]
pub enum CollectError {
    #[error("Quorum of {min_responses} can never be met with {targets} targets")]
    QuorumUnreachable { min_responses: usize, targets: usize },

    #[error("Dispatch failed: {0}")]
    Dispatch(#[from] DispatchError),
}

// ============================================================================
// Round state
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RoundState {
    Idle,
    Collecting,
    QuorumMet,
    Closed,
}

impl RoundState {
    /// Whether responses are still applied to the batch
    pub fn can_absorb(&self) -> bool {
        matches!(self, RoundState::Collecting | RoundState::QuorumMet)
    }

    pub fn can_transition_to(&self, next: RoundState) -> bool {
        use RoundState::*;
        matches!(
            (self, next),
            (Idle, Collecting) | (Collecting, QuorumMet) | (Collecting, Closed) | (QuorumMet, Closed)
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CloseReason {
    AllResponded,
    GracePeriodElapsed,
    RoundTimeout,
    Aborted,
    /// Every sender went away with targets still silent
    TransportClosed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoundPolicy {
    /// Successful responses needed before the round may close early
    pub min_responses: usize,
    /// Extra wait once quorum is reached, measured from that instant
    pub grace_period: Duration,
    /// Hard bound on the whole round
    pub round_timeout: Duration,
}

impl RoundPolicy {
    pub fn new(min_responses: usize, grace_period: Duration) -> Self {
        Self {
            min_responses,
            grace_period,
            round_timeout: DEFAULT_ROUND_TIMEOUT,
        }
    }

    pub fn with_round_timeout(mut self, round_timeout: Duration) -> Self {
        self.round_timeout = round_timeout;
        self
    }
}

// ============================================================================
// Batch
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
pub struct Collected<T> {
    pub participant: ParticipantId,
    /// Zero-based arrival position
    pub arrival: usize,
    /// Time since the round started
    pub elapsed: Duration,
    pub payload: T,
}

/// Successful responses in arrival order
#[derive(Debug, Clone, PartialEq)]
pub struct CollectedBatch<T> {
    items: Vec<Collected<T>>,
}

impl<T> CollectedBatch<T> {
    fn new() -> Self {
        Self { items: Vec::new() }
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Collected<T>> {
        self.items.iter()
    }

    pub fn into_payloads(self) -> Vec<T> {
        self.items.into_iter().map(|c| c.payload).collect()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchStatus {
    /// Nothing collected; callers decide whether that is fatal
    Empty,
    BelowQuorum,
    QuorumMet,
}

#[derive(Debug)]
pub struct RoundOutcome<T> {
    pub round_id: Uuid,
    pub batch: CollectedBatch<T>,
    pub failed: BTreeMap<ParticipantId, String>,
    pub missing: BTreeSet<ParticipantId>,
    pub close_reason: CloseReason,
    pub quorum_met: bool,
    pub started_at: DateTime<Utc>,
    pub closed_at: DateTime<Utc>,
}

impl<T> RoundOutcome<T> {
    pub fn status(&self) -> BatchStatus {
        if self.batch.is_empty() {
            BatchStatus::Empty
        } else if self.quorum_met {
            BatchStatus::QuorumMet
        } else {
            BatchStatus::BelowQuorum
        }
    }

    pub fn into_batch(self) -> CollectedBatch<T> {
        self.batch
    }
}

// ============================================================================
// Absorption
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Absorption {
    Accepted,
    Failed,
    Duplicate,
    UnknownTask,
    UnknownParticipant,
    Closed,
}

struct Round<T> {
    id: Uuid,
    state: RoundState,
    task_name: String,
    targets: BTreeSet<ParticipantId>,
    min_responses: usize,
    started: Instant,
    quorum_at: Option<Instant>,
    responded: BTreeSet<ParticipantId>,
    batch: CollectedBatch<T>,
    failed: BTreeMap<ParticipantId, String>,
}

impl<T: SitePayload> Round<T> {
    fn new(task_name: &str, targets: BTreeSet<ParticipantId>, min_responses: usize) -> Self {
        Self {
            id: Uuid::new_v4(),
            state: RoundState::Idle,
            task_name: task_name.to_string(),
            targets,
            min_responses,
            started: Instant::now(),
            quorum_at: None,
            responded: BTreeSet::new(),
            batch: CollectedBatch::new(),
            failed: BTreeMap::new(),
        }
    }

    fn transition(&mut self, next: RoundState) {
        if !self.state.can_transition_to(next) {
            return;
        }
        debug!(round_id = %self.id, from = ?self.state, to = ?next, "Round state change");
        self.state = next;
    }

    fn begin(&mut self) {
        self.started = Instant::now();
        self.transition(RoundState::Collecting);
        self.check_quorum(self.started);
    }

    fn check_quorum(&mut self, now: Instant) {
        if self.quorum_at.is_none() && self.batch.len() >= self.min_responses {
            self.quorum_at = Some(now);
            info!(
                round_id = %self.id,
                successes = self.batch.len(),
                "Quorum of {} reached, grace window open",
                self.min_responses
            );
            self.transition(RoundState::QuorumMet);
        }
    }

    fn all_responded(&self) -> bool {
        self.responded.len() == self.targets.len()
    }

    fn grace_deadline(&self, grace_period: Duration) -> Option<Instant> {
        self.quorum_at.map(|at| at + grace_period)
    }

    fn absorb(&mut self, envelope: Envelope<T>, now: Instant) -> Absorption {
        if !self.state.can_absorb() {
            return Absorption::Closed;
        }
        if envelope.task != self.task_name {
            warn!(
                round_id = %self.id,
                participant = %envelope.participant,
                "Ignoring result for unexpected task '{}'",
                envelope.task
            );
            return Absorption::UnknownTask;
        }
        if !self.targets.contains(&envelope.participant) {
            warn!(round_id = %self.id, "Ignoring result from non-target {}", envelope.participant);
            return Absorption::UnknownParticipant;
        }
        if self.responded.contains(&envelope.participant) {
            debug!(round_id = %self.id, "Ignoring duplicate response from {}", envelope.participant);
            return Absorption::Duplicate;
        }

        self.responded.insert(envelope.participant.clone());
        match envelope.outcome {
            ResponseOutcome::Success(payload) => {
                info!(
                    round_id = %self.id,
                    participant = %envelope.participant,
                    "Collected {}",
                    payload.describe()
                );
                let arrival = self.batch.len();
                self.batch.items.push(Collected {
                    participant: envelope.participant,
                    arrival,
                    elapsed: now.duration_since(self.started),
                    payload,
                });
                self.check_quorum(now);
                Absorption::Accepted
            }
            ResponseOutcome::Failed(error) => {
                warn!(
                    round_id = %self.id,
                    participant = %envelope.participant,
                    "Site reported failure: {}",
                    error
                );
                self.failed.insert(envelope.participant, error);
                Absorption::Failed
            }
        }
    }

    fn close(mut self, reason: CloseReason, started_at: DateTime<Utc>) -> RoundOutcome<T> {
        self.transition(RoundState::Closed);

        let missing: BTreeSet<ParticipantId> =
            self.targets.difference(&self.responded).cloned().collect();
        let quorum_met = self.quorum_at.is_some();

        info!(
            round_id = %self.id,
            reason = ?reason,
            collected = self.batch.len(),
            failed = self.failed.len(),
            missing = missing.len(),
            "Round closed"
        );
        if !quorum_met {
            warn!(
                round_id = %self.id,
                "Round closed below quorum ({}/{})",
                self.batch.len(),
                self.min_responses
            );
        }

        RoundOutcome {
            round_id: self.id,
            batch: self.batch,
            failed: self.failed,
            missing,
            close_reason: reason,
            quorum_met,
            started_at,
            closed_at: Utc::now(),
        }
    }
}

// ============================================================================
// Coordinator
// ============================================================================

pub struct CollectCoordinator<D> {
    dispatch: D,
    task_name: String,
}

impl<D: TaskDispatch> CollectCoordinator<D> {
    pub fn new(dispatch: D, task_name: impl Into<String>) -> Self {
        Self {
            dispatch,
            task_name: task_name.into(),
        }
    }

    /// Run one round. Partial collection, failures and abort all produce an
    /// outcome; only a quorum larger than the population or a broken
    /// transport is an error.
    pub async fn start_round(
        &self,
        targets: BTreeSet<ParticipantId>,
        policy: &RoundPolicy,
        abort: CancellationToken,
    ) -> Result<RoundOutcome<D::Payload>, CollectError> {
        if policy.min_responses > targets.len() {
            return Err(CollectError::QuorumUnreachable {
                min_responses: policy.min_responses,
                targets: targets.len(),
            });
        }

        let started_at = Utc::now();
        let mut round = Round::new(&self.task_name, targets, policy.min_responses);
        info!(
            round_id = %round.id,
            task = %self.task_name,
            targets = round.targets.len(),
            min_responses = policy.min_responses,
            "Starting collection round"
        );

        let mut rx = self.dispatch.broadcast(&self.task_name, &round.targets).await?;
        round.begin();
        let round_deadline = round.started + policy.round_timeout;

        let reason = loop {
            if abort.is_cancelled() {
                break CloseReason::Aborted;
            }
            if round.all_responded() {
                break CloseReason::AllResponded;
            }

            let (deadline, on_expiry) = match round.grace_deadline(policy.grace_period) {
                Some(grace) if grace < round_deadline => (grace, CloseReason::GracePeriodElapsed),
                _ => (round_deadline, CloseReason::RoundTimeout),
            };

            tokio::select! {
                biased;
                _ = abort.cancelled() => break CloseReason::Aborted,
                _ = sleep_until(deadline) => break on_expiry,
                received = rx.recv() => match received {
                    Some(envelope) => {
                        round.absorb(envelope, Instant::now());
                    }
                    None => break CloseReason::TransportClosed,
                },
            }
        };

        if reason == CloseReason::Aborted {
            info!(round_id = %round.id, "Round aborted, keeping {} records", round.batch.len());
        }

        Ok(round.close(reason, started_at))
    }
}
