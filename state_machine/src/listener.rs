use std::sync::{Arc, Mutex, PoisonError};

use crate::error::{MachineError, MachineResult};
use crate::machine::StateMachine;
use crate::state::StateId;
use crate::transition::TransitionParams;

/// Observer attached to a single state.
pub trait StateListener<E>: Send + Sync {
  fn on_entry(&self, _machine: &StateMachine<E>, _state: StateId, _params: &TransitionParams<'_, E>) {}
  fn on_exit(&self, _machine: &StateMachine<E>, _state: StateId, _params: &TransitionParams<'_, E>) {}

  /// The state (a composite) reached a final child, or all of its regions did.
  fn on_finished(&self, _machine: &StateMachine<E>, _state: StateId) {}
}

/// Observer attached to a single transition.
pub trait TransitionListener<E>: Send + Sync {
  fn on_triggered(&self, machine: &StateMachine<E>, params: &TransitionParams<'_, E>);
}

/// Observer of the whole machine.
pub trait MachineListener<E>: Send + Sync {
  fn on_started(&self, _machine: &StateMachine<E>) {}
  fn on_transition(&self, _machine: &StateMachine<E>, _params: &TransitionParams<'_, E>) {}
  fn on_finished(&self, _machine: &StateMachine<E>) {}
}

/// Copy-on-write set of listeners.  Notifying iterates a snapshot, so listeners may add or remove
/// registrations (their own included) from inside a callback.
pub struct ListenerRegistry<L: ?Sized> {
  listeners: Mutex<Arc<Vec<Arc<L>>>>,
}

impl<L: ?Sized> ListenerRegistry<L> {
  pub fn new() -> Self {
    Self { listeners: Mutex::new(Arc::new(vec![])) }
  }

  /// Registering the same instance twice is rejected; identity is the allocation, not equality.
  pub fn add(&self, listener: Arc<L>) -> MachineResult<()> {
    let mut current = self.listeners.lock().unwrap_or_else(PoisonError::into_inner);
    if current.iter().any(|l| same_listener(l, &listener)) {
      return Err(MachineError::DuplicateListener);
    }
    let mut next = Vec::clone(&current);
    next.push(listener);
    *current = Arc::new(next);
    Ok(())
  }

  pub fn remove(&self, listener: &Arc<L>) -> bool {
    let mut current = self.listeners.lock().unwrap_or_else(PoisonError::into_inner);
    let before = current.len();
    let next: Vec<Arc<L>> = current
        .iter()
        .filter(|l| !same_listener(l, listener))
        .cloned()
        .collect();
    let removed = next.len() != before;
    *current = Arc::new(next);
    removed
  }

  pub fn snapshot(&self) -> Arc<Vec<Arc<L>>> {
    self.listeners.lock().unwrap_or_else(PoisonError::into_inner).clone()
  }

  pub fn len(&self) -> usize {
    self.snapshot().len()
  }

  pub fn is_empty(&self) -> bool {
    self.len() == 0
  }
}

impl<L: ?Sized> Default for ListenerRegistry<L> {
  fn default() -> Self {
    Self::new()
  }
}

fn same_listener<L: ?Sized>(a: &Arc<L>, b: &Arc<L>) -> bool {
  Arc::as_ptr(a).cast::<()>() == Arc::as_ptr(b).cast::<()>()
}
