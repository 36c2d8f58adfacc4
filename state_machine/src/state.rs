use std::fmt::{Debug, Display, Formatter};

use crate::listener::{ListenerRegistry, StateListener};
use crate::transition::{TransitionContext, TransitionId};

/// Handle of a state inside the arena owned by a [crate::machine::StateMachine].  Handles are
/// only meaningful for the machine that created them.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StateId(pub(crate) usize);

impl StateId {
  pub fn index(self) -> usize {
    self.0
  }
}

impl Display for StateId {
  fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
    write!(f, "#{}", self.0)
  }
}

/// How the children of a composite state are active.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ChildMode {
  /// Exactly one child is active at a time; entering the parent enters its initial child.
  Exclusive,

  /// Every child is an independent region and all of them are active together.
  Parallel,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum HistoryType {
  /// Remembers only the direct child that was last active.
  Shallow,

  /// Remembers the whole nested path that was last active.
  Deep,
}

pub type RedirectFn<E> = Box<dyn Fn(&TransitionContext<'_, E>) -> Option<StateId> + Send + Sync>;

/// Choice point: picks one of `candidates` at the moment a transition targets it.
pub struct Redirect<E> {
  pub(crate) candidates: Vec<StateId>,
  pub(crate) select: RedirectFn<E>,
}

impl<E> Redirect<E> {
  pub fn candidates(&self) -> &[StateId] {
    &self.candidates
  }
}

pub enum StateKind<E> {
  Plain,

  /// Reaching a final state completes its parent.
  Final,

  /// Root of a machine embedded in another one.  Behaves as a composite at run time but is
  /// drawn as a single opaque state.
  NestedMachine,

  /// Never current; entering it redirects to the remembered child of its parent, or to
  /// `default` (then the parent's initial state) when nothing was remembered yet.
  History { history_type: HistoryType, default: Option<StateId> },

  /// Never current; entering it redirects to whatever the selection function picks.
  Redirect(Redirect<E>),
}

impl<E> StateKind<E> {
  pub fn is_pseudo(&self) -> bool {
    matches!(self, StateKind::History { .. } | StateKind::Redirect(_))
  }

  pub fn is_final(&self) -> bool {
    matches!(self, StateKind::Final)
  }
}

impl<E> Debug for StateKind<E> {
  fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
    match self {
      StateKind::Plain => write!(f, "Plain"),
      StateKind::Final => write!(f, "Final"),
      StateKind::NestedMachine => write!(f, "NestedMachine"),
      StateKind::History { history_type, default } => f
          .debug_struct("History")
          .field("history_type", history_type)
          .field("default", default)
          .finish(),
      StateKind::Redirect(redirect) => f
          .debug_tuple("Redirect")
          .field(&redirect.candidates)
          .finish(),
    }
  }
}

pub struct StateNode<E> {
  pub(crate) id: StateId,
  pub(crate) name: Option<String>,
  pub(crate) kind: StateKind<E>,
  pub(crate) parent: Option<StateId>,
  pub(crate) children: Vec<StateId>,
  pub(crate) child_mode: ChildMode,
  pub(crate) initial: Option<StateId>,
  pub(crate) transitions: Vec<TransitionId>,
  pub(crate) listeners: ListenerRegistry<dyn StateListener<E>>,
}

impl<E> StateNode<E> {
  pub(crate) fn new(id: StateId, name: Option<String>, kind: StateKind<E>) -> Self {
    Self {
      id,
      name,
      kind,
      parent: None,
      children: vec![],
      child_mode: ChildMode::Exclusive,
      initial: None,
      transitions: vec![],
      listeners: ListenerRegistry::new(),
    }
  }

  pub fn id(&self) -> StateId {
    self.id
  }

  pub fn name(&self) -> Option<&str> {
    self.name.as_deref()
  }

  /// Name used in log lines and errors; unnamed states fall back to their handle.
  pub fn debug_name(&self) -> String {
    match &self.name {
      Some(name) => name.clone(),
      None => format!("State{}", self.id.0),
    }
  }

  pub fn kind(&self) -> &StateKind<E> {
    &self.kind
  }

  pub fn parent(&self) -> Option<StateId> {
    self.parent
  }

  /// Children in the order they were added.
  pub fn children(&self) -> &[StateId] {
    &self.children
  }

  pub fn child_mode(&self) -> ChildMode {
    self.child_mode
  }

  pub fn initial(&self) -> Option<StateId> {
    self.initial
  }

  pub fn transitions(&self) -> &[TransitionId] {
    &self.transitions
  }

  pub fn is_composite(&self) -> bool {
    !self.children.is_empty()
  }
}
