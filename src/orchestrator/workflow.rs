// orchestrator/workflow.rs
//
// Linear state machine driving backup and restore runs

/// States of the backup and restore machines.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    Ready,
    DeploymentExists,
    IsBackupable,
    ArtifactCreated,
    Locked,
    BackedUp,
    Unlocked,
    Drained,
    Finished,
    ArtifactMatches,
    RestorePushed,
    Restored,
    CleanupDone,
}

/// Guarded events, fired in declaration order by the driver loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Event {
    CheckDeployment,
    CheckIsBackupable,
    CreateArtifact,
    PreBackupLock,
    Backup,
    PostBackupUnlock,
    Drain,
    CheckArtifactMatches,
    CopyToRemote,
    Restore,
    Cleanup,
}

/// One row of the transition table: `event` fires only from `sources`.
pub struct Transition {
    pub event: Event,
    pub sources: &'static [State],
    pub dst: State,
}

/// A linear machine over a transition table.
///
/// The driver walks the table's events in order, asking `can_fire` for
/// each; a handler that cancels leaves the state unchanged, so later
/// events whose sources are now unreachable simply do not fire. Cleanup
/// rows list every post-`DeploymentExists` state, making release
/// unconditional.
pub struct Workflow {
    state: State,
    transitions: Vec<Transition>,
}

impl Workflow {
    pub fn new(transitions: Vec<Transition>) -> Self {
        Self {
            state: State::Ready,
            transitions,
        }
    }

    pub fn state(&self) -> State {
        self.state
    }

    /// The ordered event list the driver iterates.
    pub fn events(&self) -> Vec<Event> {
        self.transitions.iter().map(|t| t.event).collect()
    }

    /// The destination state, when `event` can fire from the current state.
    pub fn can_fire(&self, event: Event) -> Option<State> {
        self.transitions
            .iter()
            .find(|t| t.event == event && t.sources.contains(&self.state))
            .map(|t| t.dst)
    }

    pub fn fire(&mut self, dst: State) {
        self.state = dst;
    }
}

/// Transition table for a full backup run.
pub fn backup_transitions() -> Vec<Transition> {
    vec![
        Transition {
            event: Event::CheckDeployment,
            sources: &[State::Ready],
            dst: State::DeploymentExists,
        },
        Transition {
            event: Event::CheckIsBackupable,
            sources: &[State::DeploymentExists],
            dst: State::IsBackupable,
        },
        Transition {
            event: Event::CreateArtifact,
            sources: &[State::IsBackupable],
            dst: State::ArtifactCreated,
        },
        Transition {
            event: Event::PreBackupLock,
            sources: &[State::ArtifactCreated],
            dst: State::Locked,
        },
        Transition {
            event: Event::Backup,
            sources: &[State::Locked],
            dst: State::BackedUp,
        },
        // Unlock also fires from ArtifactCreated, so a failed lock still
        // gets its unlock attempt.
        Transition {
            event: Event::PostBackupUnlock,
            sources: &[State::BackedUp, State::ArtifactCreated],
            dst: State::Unlocked,
        },
        Transition {
            event: Event::Drain,
            sources: &[State::Unlocked],
            dst: State::Drained,
        },
        Transition {
            event: Event::Cleanup,
            sources: &[
                State::DeploymentExists,
                State::IsBackupable,
                State::ArtifactCreated,
                State::Unlocked,
                State::Drained,
            ],
            dst: State::Finished,
        },
    ]
}

/// Transition table for the pre-check flavour: it validates invariants,
/// then cleans up without ever creating an artifact.
pub fn backup_check_transitions() -> Vec<Transition> {
    vec![
        Transition {
            event: Event::CheckDeployment,
            sources: &[State::Ready],
            dst: State::DeploymentExists,
        },
        Transition {
            event: Event::CheckIsBackupable,
            sources: &[State::DeploymentExists],
            dst: State::IsBackupable,
        },
        Transition {
            event: Event::Cleanup,
            sources: &[State::DeploymentExists, State::IsBackupable],
            dst: State::Finished,
        },
    ]
}

/// Transition table for a restore run.
pub fn restore_transitions() -> Vec<Transition> {
    vec![
        Transition {
            event: Event::CheckDeployment,
            sources: &[State::Ready],
            dst: State::DeploymentExists,
        },
        Transition {
            event: Event::CheckArtifactMatches,
            sources: &[State::DeploymentExists],
            dst: State::ArtifactMatches,
        },
        Transition {
            event: Event::CopyToRemote,
            sources: &[State::ArtifactMatches],
            dst: State::RestorePushed,
        },
        Transition {
            event: Event::Restore,
            sources: &[State::RestorePushed],
            dst: State::Restored,
        },
        Transition {
            event: Event::Cleanup,
            sources: &[
                State::DeploymentExists,
                State::ArtifactMatches,
                State::RestorePushed,
                State::Restored,
            ],
            dst: State::CleanupDone,
        },
    ]
}
