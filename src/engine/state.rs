//! Life-cycle states and transitions for plan items and case-file items.

use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};

/// Life-cycle state of a plan item.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default,
)]
pub enum State {
    #[default]
    Null,
    Available,
    Enabled,
    Disabled,
    Active,
    Suspended,
    Failed,
    Completed,
    Terminated,
    Closed,
}

impl State {
    pub const ALL: [State; 10] = [
        State::Null,
        State::Available,
        State::Enabled,
        State::Disabled,
        State::Active,
        State::Suspended,
        State::Failed,
        State::Completed,
        State::Terminated,
        State::Closed,
    ];

    /// States from which a stage may still consider completion.
    pub fn is_semi_terminal(self) -> bool {
        matches!(
            self,
            State::Closed | State::Completed | State::Disabled | State::Failed | State::Terminated
        )
    }

    pub fn is_active(self) -> bool {
        self == State::Active
    }

    pub fn is_null(self) -> bool {
        self == State::Null
    }

    /// Entered its work and not yet finished.
    pub fn is_started(self) -> bool {
        matches!(self, State::Active | State::Suspended | State::Failed)
    }
}

impl Display for State {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}", self)
    }
}

/// Named edge of a plan-item state machine.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default,
)]
pub enum Transition {
    #[default]
    None,
    Create,
    Enable,
    Disable,
    Reenable,
    Start,
    ManualStart,
    Suspend,
    Resume,
    ParentSuspend,
    ParentResume,
    Fault,
    Reactivate,
    Complete,
    Terminate,
    ParentTerminate,
    Exit,
    Occur,
    Close,
}

impl Transition {
    pub const ALL: [Transition; 19] = [
        Transition::None,
        Transition::Create,
        Transition::Enable,
        Transition::Disable,
        Transition::Reenable,
        Transition::Start,
        Transition::ManualStart,
        Transition::Suspend,
        Transition::Resume,
        Transition::ParentSuspend,
        Transition::ParentResume,
        Transition::Fault,
        Transition::Reactivate,
        Transition::Complete,
        Transition::Terminate,
        Transition::ParentTerminate,
        Transition::Exit,
        Transition::Occur,
        Transition::Close,
    ];

    /// Transitions that move an item out of `Available` when its lifecycle begins.
    pub fn is_entry(self) -> bool {
        matches!(
            self,
            Transition::Start | Transition::Enable | Transition::Occur
        )
    }
}

impl Display for Transition {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}", self)
    }
}

/// State of a case-file item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum CaseFileItemState {
    #[default]
    Null,
    Available,
    Discarded,
}

impl Display for CaseFileItemState {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}", self)
    }
}

/// Content operation performed on a case-file item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CaseFileItemTransition {
    Create,
    Update,
    Replace,
    Delete,
}

impl CaseFileItemTransition {
    /// State the item must be in before the operation is allowed.
    pub fn required_state(self) -> CaseFileItemState {
        match self {
            CaseFileItemTransition::Create => CaseFileItemState::Null,
            _ => CaseFileItemState::Available,
        }
    }

    pub fn target_state(self) -> CaseFileItemState {
        match self {
            CaseFileItemTransition::Delete => CaseFileItemState::Discarded,
            _ => CaseFileItemState::Available,
        }
    }
}

impl Display for CaseFileItemTransition {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}", self)
    }
}
