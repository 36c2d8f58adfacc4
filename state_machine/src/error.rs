use thiserror::Error;

use crate::state::StateId;
use crate::transition::TransitionId;

pub type MachineResult<T> = Result<T, MachineError>;

/// Everything that can go wrong while building or driving a [crate::machine::StateMachine].
///
/// Apart from [MachineError::PendingEvent] and [MachineError::IgnoredEvent], which are only
/// produced by the configurable event policies, these are programming mistakes in the way the
/// machine was declared and are not meant to be recovered from.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MachineError {
  #[error("unknown state {0}")]
  UnknownState(StateId),

  #[error("unknown transition {0}")]
  UnknownTransition(TransitionId),

  #[error("state {child} already belongs to {parent}")]
  StateAlreadyOwned { child: StateId, parent: StateId },

  #[error("adding {child} under {parent} would create a cycle")]
  CyclicHierarchy { parent: StateId, child: StateId },

  #[error("{state} is not a child of {parent}")]
  NotAChild { parent: StateId, state: StateId },

  #[error("pseudo state {0} cannot own child states")]
  PseudoStateChildren(StateId),

  #[error("{0} cannot be used as an initial state")]
  InvalidInitialState(StateId),

  #[error("{0} has child states but no initial state")]
  MissingInitialState(StateId),

  #[error("{0} is not attached to the machine")]
  DetachedState(StateId),

  #[error("listener is already registered")]
  DuplicateListener,

  #[error("machine has already been started")]
  AlreadyStarted,

  #[error("machine has not been started")]
  NotStarted,

  #[error("{count} transitions in {state} match event {event}")]
  AmbiguousTransition { state: StateId, event: String, count: usize },

  #[error("redirect {0} did not resolve to one of its candidates")]
  UnresolvedRedirect(StateId),

  #[error("pseudo state {0} never resolves to a real state")]
  PseudoStateLoop(StateId),

  #[error("targets {0:?} compete for the same exclusive region")]
  ConflictingTargets(Vec<StateId>),

  #[error("event {event} arrived while another event was being processed")]
  PendingEvent { event: String },

  #[error("no transition matches event {event}")]
  IgnoredEvent { event: String },
}
