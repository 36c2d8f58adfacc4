use std::cmp::min;

use crate::error::{MachineError, MachineResult};
use crate::state::*;
use crate::transition::*;

/// Arena holding every state and transition of one machine.  Index 0 is the machine itself.
pub struct StateGraph<E> {
  pub(crate) nodes: Vec<StateNode<E>>,
  pub(crate) transitions: Vec<TransitionNode<E>>,
}

impl<E> StateGraph<E> {
  pub(crate) fn new(root_name: String) -> Self {
    let root = StateNode::new(StateId(0), Some(root_name), StateKind::Plain);
    Self { nodes: vec![root], transitions: vec![] }
  }

  pub fn root(&self) -> StateId {
    StateId(0)
  }

  /// Number of states, the machine itself included, so never zero.
  pub(crate) fn state_count(&self) -> usize {
    self.nodes.len()
  }

  pub fn lookup(&self, id: StateId) -> MachineResult<&StateNode<E>> {
    self.nodes.get(id.0).ok_or(MachineError::UnknownState(id))
  }

  pub(crate) fn lookup_mut(&mut self, id: StateId) -> MachineResult<&mut StateNode<E>> {
    self.nodes.get_mut(id.0).ok_or(MachineError::UnknownState(id))
  }

  /// Only for handles already validated against this graph.
  pub(crate) fn node(&self, id: StateId) -> &StateNode<E> {
    &self.nodes[id.0]
  }

  pub fn transition(&self, id: TransitionId) -> MachineResult<&TransitionNode<E>> {
    self.transitions.get(id.0).ok_or(MachineError::UnknownTransition(id))
  }

  pub(crate) fn transition_node(&self, id: TransitionId) -> &TransitionNode<E> {
    &self.transitions[id.0]
  }

  pub fn states(&self) -> impl Iterator<Item = &StateNode<E>> {
    self.nodes.iter()
  }

  pub fn transitions(&self) -> impl Iterator<Item = &TransitionNode<E>> {
    self.transitions.iter()
  }

  pub fn find(&self, name: &str) -> Option<StateId> {
    self.nodes.iter().find(|n| n.name.as_deref() == Some(name)).map(|n| n.id)
  }

  /// Creates a state with no parent yet.
  pub(crate) fn add_state(&mut self, name: Option<String>, kind: StateKind<E>) -> StateId {
    let id = StateId(self.nodes.len());
    self.nodes.push(StateNode::new(id, name, kind));
    id
  }

  pub(crate) fn add_child(&mut self, parent: StateId, child: StateId) -> MachineResult<()> {
    let parent_node = self.lookup(parent)?;
    if parent_node.kind.is_pseudo() || parent_node.kind.is_final() {
      return Err(MachineError::PseudoStateChildren(parent));
    }
    let child_node = self.lookup(child)?;
    if let Some(owner) = child_node.parent {
      return Err(MachineError::StateAlreadyOwned { child, parent: owner });
    }
    if child == self.root() || self.is_ancestor_or_self(child, parent) {
      return Err(MachineError::CyclicHierarchy { parent, child });
    }
    self.nodes[child.0].parent = Some(parent);
    self.nodes[parent.0].children.push(child);
    Ok(())
  }

  pub(crate) fn set_initial(&mut self, parent: StateId, child: StateId) -> MachineResult<()> {
    let child_node = self.lookup(child)?;
    if child_node.parent != Some(parent) {
      return Err(MachineError::NotAChild { parent, state: child });
    }
    if child_node.kind.is_pseudo() {
      return Err(MachineError::InvalidInitialState(child));
    }
    self.lookup_mut(parent)?.initial = Some(child);
    Ok(())
  }

  pub(crate) fn add_transition(&mut self, source: StateId, transition: Transition<E>) -> MachineResult<TransitionId> {
    let source_node = self.lookup(source)?;
    if source_node.kind.is_pseudo() {
      return Err(MachineError::PseudoStateChildren(source));
    }
    let id = TransitionId(self.transitions.len());
    let Transition { name, matcher, producer } = transition;
    self.transitions.push(TransitionNode {
      id,
      source,
      name,
      matcher,
      producer,
      listeners: Default::default(),
    });
    self.nodes[source.0].transitions.push(id);
    Ok(id)
  }

  pub fn is_neighbor(&self, a: StateId, b: StateId) -> bool {
    match (self.node(a).parent, self.node(b).parent) {
      (Some(pa), Some(pb)) => pa == pb,
      _ => false,
    }
  }

  pub fn is_ancestor_or_self(&self, ancestor: StateId, state: StateId) -> bool {
    let mut next = Some(state);
    while let Some(current) = next {
      if current == ancestor {
        return true;
      }
      next = self.node(current).parent;
    }
    false
  }

  /// States from the top-most ancestor down to `state` itself.
  pub fn path_from_root(&self, state: StateId) -> Vec<StateId> {
    let mut path = Vec::<StateId>::new();
    let mut next = Some(state);
    while let Some(current) = next {
      path.push(current);
      next = self.node(current).parent;
    }
    path.reverse();
    path
  }

  pub fn lowest_common_ancestor(&self, states: &[StateId]) -> StateId {
    let mut paths = states.iter().map(|&s| self.path_from_root(s));
    let mut common = match paths.next() {
      Some(path) => path,
      None => return self.root(),
    };
    for path in paths {
      let n = find_index_of_difference(&common, &path);
      common.truncate(n);
    }
    common.last().copied().unwrap_or_else(|| self.root())
  }

  pub(crate) fn is_reachable(&self, state: StateId) -> bool {
    self.is_ancestor_or_self(self.root(), state)
  }
}

/// Compute the index at which two slices begin to differ.  For example, given
/// a=[ 1, 2, 3, 4, 5 ] and b=[ 1, 2, 6, 7 ], we would return 2 because it is the lowest
/// value for which a[i] != b[i].  If one is a prefix of the other, the return value is the
/// length of the shorter one.
pub(crate) fn find_index_of_difference<T: PartialEq>(a: &[T], b: &[T]) -> usize {
  let n = min(a.len(), b.len());
  (0..n).find(|&i| a[i] != b[i]).unwrap_or(n)
}
