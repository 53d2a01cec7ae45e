use std::fmt;
use std::sync::{Mutex, MutexGuard, PoisonError, RwLock, RwLockWriteGuard, TryLockError};

use thiserror::Error;
use tracing::debug;

use crate::metric::MetricKind;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ViewState {
    ConnectionSetup,
    InstanceMenu,
    Dashboard,
    Processlist,
    Locks,
    Memory,
    ErrorLog,
}

impl ViewState {
    /// Views listed in the instance menu, in menu order.
    pub const MENU: [Self; 6] = [
        Self::Dashboard,
        Self::Processlist,
        Self::Locks,
        Self::Memory,
        Self::ErrorLog,
        Self::ConnectionSetup,
    ];

    #[must_use]
    pub fn title(self) -> &'static str {
        match self {
            Self::ConnectionSetup => "Connection Setup",
            Self::InstanceMenu => "Instance Menu",
            Self::Dashboard => "Dashboard",
            Self::Processlist => "Processlist",
            Self::Locks => "Locks",
            Self::Memory => "Memory",
            Self::ErrorLog => "Error Log",
        }
    }

    #[must_use]
    pub fn required_metrics(self) -> &'static [MetricKind] {
        match self {
            Self::ConnectionSetup | Self::InstanceMenu => &[],
            Self::Dashboard => &[
                MetricKind::Checkpoint,
                MetricKind::MemoryGlobal,
                MetricKind::StatementCounts,
                MetricKind::InnodbCounters,
            ],
            Self::Processlist => &[MetricKind::Processlist],
            Self::Locks => &[MetricKind::Locks],
            Self::Memory => &[
                MetricKind::MemoryGlobal,
                MetricKind::MemoryByUser,
                MetricKind::MemoryByArea,
                MetricKind::TempTableMemory,
            ],
            Self::ErrorLog => &[MetricKind::ErrorLog],
        }
    }

    #[must_use]
    pub fn is_metric_view(self) -> bool {
        !self.required_metrics().is_empty()
    }
}

impl fmt::Display for ViewState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.title())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransitionError {
    #[error("Please make sure to have a minimum of one connection online before changing views.")]
    GuardRejected { from: ViewState, to: ViewState },
    #[error("a view transition is already in progress")]
    InProgress,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ViewSnapshot {
    pub current: ViewState,
    pub previous: Option<ViewState>,
}

/// Active screen plus one step of back history.
///
/// Transitions take the gate with `try_lock`; a request that arrives while
/// another transition holds it is rejected with [`TransitionError::InProgress`].
/// Readers only touch `state` and never contend for the gate.
#[derive(Debug)]
pub struct ViewStateMachine {
    gate: Mutex<()>,
    state: RwLock<ViewSnapshot>,
}

pub(crate) type Transition<'a> = (MutexGuard<'a, ()>, RwLockWriteGuard<'a, ViewSnapshot>);

impl Default for ViewStateMachine {
    fn default() -> Self {
        Self::new()
    }
}

impl ViewStateMachine {
    #[must_use]
    pub fn new() -> Self {
        Self {
            gate: Mutex::new(()),
            state: RwLock::new(ViewSnapshot {
                current: ViewState::ConnectionSetup,
                previous: None,
            }),
        }
    }

    #[must_use]
    pub fn snapshot(&self) -> ViewSnapshot {
        *self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    #[must_use]
    pub fn current(&self) -> ViewState {
        self.snapshot().current
    }

    /// Leaves setup for the menu once an instance is online; no-op elsewhere.
    pub fn on_instance_connected(&self, online: usize) -> Result<ViewState, TransitionError> {
        let (_gate, mut state) = self.begin()?;
        if state.current != ViewState::ConnectionSetup || online == 0 {
            return Ok(state.current);
        }
        Ok(apply(&mut state, ViewState::InstanceMenu))
    }

    pub fn switch_to(&self, target: ViewState, online: usize) -> Result<ViewState, TransitionError> {
        let (_gate, mut state) = self.begin()?;
        guard(state.current, target, online)?;
        if state.current == target {
            return Ok(target);
        }
        Ok(apply(&mut state, target))
    }

    pub fn request_setup(&self, online: usize) -> Result<ViewState, TransitionError> {
        self.switch_to(ViewState::ConnectionSetup, online)
    }

    /// Returns to the previous view; the menu when there is no history.
    pub fn go_back(&self, online: usize) -> Result<ViewState, TransitionError> {
        let (_gate, mut state) = self.begin()?;
        let target = state.previous.unwrap_or(ViewState::InstanceMenu);
        guard(state.current, target, online)?;
        if state.current == target {
            return Ok(target);
        }
        Ok(apply(&mut state, target))
    }

    pub(crate) fn begin(&self) -> Result<Transition<'_>, TransitionError> {
        let gate = match self.gate.try_lock() {
            Ok(gate) => gate,
            Err(TryLockError::Poisoned(poisoned)) => poisoned.into_inner(),
            Err(TryLockError::WouldBlock) => return Err(TransitionError::InProgress),
        };
        let state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        Ok((gate, state))
    }
}

fn guard(from: ViewState, to: ViewState, online: usize) -> Result<(), TransitionError> {
    let touches_setup = from == ViewState::ConnectionSetup || to == ViewState::ConnectionSetup;
    if touches_setup && from != to && online == 0 {
        return Err(TransitionError::GuardRejected { from, to });
    }
    Ok(())
}

fn apply(state: &mut ViewSnapshot, target: ViewState) -> ViewState {
    debug!(from = %state.current, to = %target, "view transition");
    state.previous = Some(state.current);
    state.current = target;
    target
}
