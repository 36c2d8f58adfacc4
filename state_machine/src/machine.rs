use std::any::Any;
use std::collections::{HashMap, HashSet};
use std::fmt::{Arguments, Debug};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::config::MachineConfig;
use crate::error::{MachineError, MachineResult};
use crate::graph::StateGraph;
use crate::listener::*;
use crate::state::*;
use crate::transition::*;

/// A hierarchical state machine.
///
/// The machine is itself the root state of an arena of nested states.  Declare states and
/// transitions with `&mut self`, call [StateMachine::start] once, then feed events through
/// [StateMachine::process_event].  Processing takes `&self` so listeners can inspect the machine
/// while being notified; calling back into `process_event` from a listener is routed to the
/// configured [crate::config::PendingEventHandler] instead of being executed.
pub struct StateMachine<E> {
  graph: StateGraph<E>,
  config: MachineConfig<E>,
  listeners: ListenerRegistry<dyn MachineListener<E>>,
  runtime: Mutex<Runtime>,
  processing: AtomicBool,
}

#[derive(Default)]
struct Runtime {
  started: bool,
  finished: bool,

  /// Every active state, composites included.
  active: HashSet<StateId>,

  /// Active child of each active exclusive composite.
  current: HashMap<StateId, StateId>,

  /// Last child entered under each exclusive composite; outlives the parent's activity so
  /// history states can come back to it.
  history: HashMap<StateId, StateId>,

  /// Composites that reached completion since they were last entered.
  finished_states: HashSet<StateId>,
}

/// Frozen view of the active configuration used while resolving a transition, so no lock is held
/// while user code runs.
struct Configuration {
  active: HashSet<StateId>,
  history: HashMap<StateId, StateId>,
}

struct StateChanges {
  exits: Vec<StateId>,
  enters: Vec<StateId>,
}

impl StateChanges {
  fn none() -> Self {
    Self { exits: vec![], enters: vec![] }
  }
}

struct ProcessingGuard<'a>(&'a AtomicBool);

impl Drop for ProcessingGuard<'_> {
  fn drop(&mut self) {
    self.0.store(false, Ordering::Release);
  }
}

impl<E: Debug + 'static> StateMachine<E> {
  pub fn new(name: impl Into<String>) -> Self {
    Self::with_config(name, MachineConfig::default())
  }

  pub fn with_config(name: impl Into<String>, config: MachineConfig<E>) -> Self {
    Self {
      graph: StateGraph::new(name.into()),
      config,
      listeners: ListenerRegistry::new(),
      runtime: Mutex::new(Runtime::default()),
      processing: AtomicBool::new(false),
    }
  }
}

impl<E: Debug> StateMachine<E> {
  pub fn root(&self) -> StateId {
    self.graph.root()
  }

  pub fn name(&self) -> String {
    self.graph.node(self.root()).debug_name()
  }

  pub(crate) fn graph(&self) -> &StateGraph<E> {
    &self.graph
  }

  pub fn state(&self, id: StateId) -> MachineResult<&StateNode<E>> {
    self.graph.lookup(id)
  }

  pub fn transition(&self, id: TransitionId) -> MachineResult<&TransitionNode<E>> {
    self.graph.transition(id)
  }

  /// Every state in creation order, starting with the machine itself.
  pub fn states(&self) -> impl Iterator<Item = &StateNode<E>> {
    self.graph.states()
  }

  pub fn transitions(&self) -> impl Iterator<Item = &TransitionNode<E>> {
    self.graph.transitions()
  }

  pub fn find_state(&self, name: &str) -> Option<StateId> {
    self.graph.find(name)
  }

  pub fn state_count(&self) -> usize {
    self.graph.state_count()
  }

  // ---------------------------------------------------------------------------------------------
  // Construction

  fn ensure_not_started(&mut self) -> MachineResult<()> {
    let runtime = self.runtime.get_mut().unwrap_or_else(PoisonError::into_inner);
    if runtime.started {
      return Err(MachineError::AlreadyStarted);
    }
    Ok(())
  }

  fn add_child_of_kind(&mut self, parent: StateId, name: Option<String>, kind: StateKind<E>) -> MachineResult<StateId> {
    self.ensure_not_started()?;
    self.graph.lookup(parent)?;
    let id = self.graph.add_state(name, kind);
    if let Err(e) = self.graph.add_child(parent, id) {
      // Roll back the orphan so a failed call leaves the arena as it was.
      self.graph.nodes.pop();
      return Err(e);
    }
    Ok(id)
  }

  /// Creates a state that is not attached anywhere yet; attach it with [StateMachine::add_child]
  /// before starting the machine.
  pub fn create_state(&mut self, name: Option<&str>) -> MachineResult<StateId> {
    self.ensure_not_started()?;
    Ok(self.graph.add_state(name.map(String::from), StateKind::Plain))
  }

  pub fn add_child(&mut self, parent: StateId, child: StateId) -> MachineResult<()> {
    self.ensure_not_started()?;
    self.graph.add_child(parent, child)
  }

  pub fn add_state(&mut self, parent: StateId, name: &str) -> MachineResult<StateId> {
    self.add_child_of_kind(parent, Some(name.to_string()), StateKind::Plain)
  }

  pub fn add_unnamed_state(&mut self, parent: StateId) -> MachineResult<StateId> {
    self.add_child_of_kind(parent, None, StateKind::Plain)
  }

  pub fn add_final_state(&mut self, parent: StateId, name: &str) -> MachineResult<StateId> {
    self.add_child_of_kind(parent, Some(name.to_string()), StateKind::Final)
  }

  /// Adds a composite that stands for an embedded machine.  Its children are declared on this
  /// machine like any other; it only differs in how it is exported.
  pub fn add_nested_machine(&mut self, parent: StateId, name: &str) -> MachineResult<StateId> {
    self.add_child_of_kind(parent, Some(name.to_string()), StateKind::NestedMachine)
  }

  /// Adds a history pseudo state recording the active child of `parent`.  `default` must be a
  /// child of `parent` when given.
  pub fn add_history_state(
    &mut self,
    parent: StateId,
    name: Option<&str>,
    history_type: HistoryType,
    default: Option<StateId>) -> MachineResult<StateId> {
    if let Some(default) = default {
      if self.graph.lookup(default)?.parent != Some(parent) {
        return Err(MachineError::NotAChild { parent, state: default });
      }
    }
    self.add_child_of_kind(parent, name.map(String::from), StateKind::History { history_type, default })
  }

  /// Adds a choice point that, when targeted, continues to whichever of `candidates` `select`
  /// returns.  Returning `None` or a state outside `candidates` fails the transition.
  pub fn add_redirect_state<F>(
    &mut self,
    parent: StateId,
    name: Option<&str>,
    candidates: Vec<StateId>,
    select: F) -> MachineResult<StateId>
      where F: Fn(&TransitionContext<'_, E>) -> Option<StateId> + Send + Sync + 'static {
    for &candidate in &candidates {
      self.graph.lookup(candidate)?;
    }
    let redirect = Redirect { candidates, select: Box::new(select) };
    self.add_child_of_kind(parent, name.map(String::from), StateKind::Redirect(redirect))
  }

  pub fn set_child_mode(&mut self, state: StateId, mode: ChildMode) -> MachineResult<()> {
    self.ensure_not_started()?;
    self.graph.lookup_mut(state)?.child_mode = mode;
    Ok(())
  }

  pub fn set_initial_state(&mut self, parent: StateId, child: StateId) -> MachineResult<()> {
    self.ensure_not_started()?;
    self.graph.set_initial(parent, child)
  }

  pub fn add_transition(&mut self, source: StateId, transition: Transition<E>) -> MachineResult<TransitionId> {
    self.ensure_not_started()?;
    self.graph.add_transition(source, transition)
  }

  // ---------------------------------------------------------------------------------------------
  // Listeners

  pub fn add_listener(&self, listener: Arc<dyn MachineListener<E>>) -> MachineResult<()> {
    self.listeners.add(listener)
  }

  pub fn remove_listener(&self, listener: &Arc<dyn MachineListener<E>>) -> bool {
    self.listeners.remove(listener)
  }

  pub fn add_state_listener(&self, state: StateId, listener: Arc<dyn StateListener<E>>) -> MachineResult<()> {
    self.graph.lookup(state)?.listeners.add(listener)
  }

  pub fn remove_state_listener(&self, state: StateId, listener: &Arc<dyn StateListener<E>>) -> MachineResult<bool> {
    Ok(self.graph.lookup(state)?.listeners.remove(listener))
  }

  pub fn add_transition_listener(
    &self,
    transition: TransitionId,
    listener: Arc<dyn TransitionListener<E>>) -> MachineResult<()> {
    self.graph.transition(transition)?.listeners.add(listener)
  }

  pub fn remove_transition_listener(
    &self,
    transition: TransitionId,
    listener: &Arc<dyn TransitionListener<E>>) -> MachineResult<bool> {
    Ok(self.graph.transition(transition)?.listeners.remove(listener))
  }

  // ---------------------------------------------------------------------------------------------
  // Queries

  fn runtime(&self) -> MutexGuard<'_, Runtime> {
    self.runtime.lock().unwrap_or_else(PoisonError::into_inner)
  }

  pub fn is_started(&self) -> bool {
    self.runtime().started
  }

  pub fn is_finished(&self) -> bool {
    self.runtime().finished
  }

  pub fn is_processing(&self) -> bool {
    self.processing.load(Ordering::Acquire)
  }

  pub fn is_active(&self, state: StateId) -> bool {
    self.runtime().active.contains(&state)
  }

  /// Active child of an exclusive composite.
  pub fn current_state(&self, parent: StateId) -> Option<StateId> {
    self.runtime().current.get(&parent).copied()
  }

  /// Child a shallow history of `parent` would come back to.
  pub fn remembered_state(&self, parent: StateId) -> Option<StateId> {
    self.runtime().history.get(&parent).copied()
  }

  /// All active states, parents before children, siblings in declaration order.
  pub fn active_states(&self) -> Vec<StateId> {
    let runtime = self.runtime();
    let mut out = vec![];
    if runtime.active.contains(&self.root()) {
      self.collect_active(self.root(), &runtime.active, &mut out);
    }
    out
  }

  /// Active states without an active child.
  pub fn active_leaves(&self) -> Vec<StateId> {
    let runtime = self.runtime();
    let mut out = vec![];
    if runtime.active.contains(&self.root()) {
      self.collect_active(self.root(), &runtime.active, &mut out);
    }
    out.retain(|&s| !self.graph.node(s).children.iter().any(|c| runtime.active.contains(c)));
    out
  }

  fn collect_active(&self, state: StateId, active: &HashSet<StateId>, out: &mut Vec<StateId>) {
    out.push(state);
    for &child in &self.graph.node(state).children {
      if active.contains(&child) {
        self.collect_active(child, active, out);
      }
    }
  }

  fn configuration(&self) -> Configuration {
    let runtime = self.runtime();
    Configuration {
      active: runtime.active.clone(),
      history: runtime.history.clone(),
    }
  }

  fn debug_name(&self, state: StateId) -> String {
    self.graph.node(state).debug_name()
  }

  fn debug_names(&self, states: &[StateId]) -> String {
    states.iter().map(|&s| self.debug_name(s)).collect::<Vec<_>>().join(", ")
  }

  fn log(&self, message: Arguments<'_>) {
    self.config.logger.log(message);
  }

  // ---------------------------------------------------------------------------------------------
  // Execution

  fn enter_processing(&self) -> Option<ProcessingGuard<'_>> {
    match self.processing.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire) {
      Ok(_) => Some(ProcessingGuard(&self.processing)),
      Err(_) => None,
    }
  }

  fn validate(&self) -> MachineResult<()> {
    for node in self.graph.states() {
      if !self.graph.is_reachable(node.id) {
        return Err(MachineError::DetachedState(node.id));
      }
      let enterable_children = node.children.iter().any(|&c| !self.graph.node(c).kind.is_pseudo());
      if node.child_mode == ChildMode::Exclusive && enterable_children && node.initial.is_none() {
        return Err(MachineError::MissingInitialState(node.id));
      }
    }
    Ok(())
  }

  /// Enters the root and, recursively, the initial states below it.
  pub fn start(&self) -> MachineResult<()> {
    let _guard = match self.enter_processing() {
      Some(guard) => guard,
      None => return Err(MachineError::AlreadyStarted),
    };
    if self.is_started() {
      return Err(MachineError::AlreadyStarted);
    }
    self.validate()?;

    let mut enters = vec![];
    self.plan_entry(self.root(), &[], &mut enters)?;
    self.runtime().started = true;

    self.log(format_args!("{}: Starting...", self.name()));
    for listener in self.listeners.snapshot().iter() {
      listener.on_started(self);
    }

    let direction = Direction::Targets(self.graph.node(self.root()).initial.into_iter().collect());
    let params = TransitionParams {
      transition: None,
      source: None,
      direction: &direction,
      targets: direction.targets(),
      event: MachineEvent::Start,
      argument: None,
    };
    self.apply_state_changes(StateChanges { exits: vec![], enters }, &params);
    Ok(())
  }

  pub fn process_event(&self, event: E) -> MachineResult<()> {
    self.process_event_internal(event, None)
  }

  pub fn process_event_with(&self, event: E, argument: &dyn Any) -> MachineResult<()> {
    self.process_event_internal(event, Some(argument))
  }

  fn process_event_internal(&self, event: E, argument: Option<&dyn Any>) -> MachineResult<()> {
    let _guard = match self.enter_processing() {
      Some(guard) => guard,
      None => {
        self.log(format_args!("{}: Pending [{:?}]", self.name(), event));
        return self.config.pending_event_handler.on_pending_event(event, argument);
      }
    };

    let (started, finished) = {
      let runtime = self.runtime();
      (runtime.started, runtime.finished)
    };
    if !started {
      return Err(MachineError::NotStarted);
    }
    if finished {
      self.log(format_args!("{}: Finished, ignoring [{:?}]", self.name(), event));
      return self.config.ignored_event_handler.on_ignored_event(&[], &event, argument);
    }

    self.log(format_args!("{}: Received [{:?}]", self.name(), event));
    let configuration = self.configuration();
    match self.find_transition(self.root(), &event, &configuration)? {
      Some(transition) => self.fire_transition(transition, &event, argument, &configuration),
      None => {
        let leaves = self.active_leaves();
        self.log(format_args!("{}: [{}] ignored [{:?}]", self.name(), self.debug_names(&leaves), event));
        self.config.ignored_event_handler.on_ignored_event(&leaves, &event, argument)
      }
    }
  }

  /// Offers `event` to the active descendants of `state` before `state` itself, so the deepest
  /// active state wins.  More than one match at the same level is a declaration error.
  fn find_transition(&self, state: StateId, event: &E, configuration: &Configuration) -> MachineResult<Option<TransitionId>> {
    let node = self.graph.node(state);

    let mut from_children = vec![];
    for &child in node.children.iter().filter(|c| configuration.active.contains(c)) {
      if let Some(found) = self.find_transition(child, event, configuration)? {
        from_children.push(found);
      }
    }
    if from_children.len() > 1 {
      return Err(MachineError::AmbiguousTransition {
        state,
        event: format!("{:?}", event),
        count: from_children.len(),
      });
    }
    if let Some(found) = from_children.pop() {
      return Ok(Some(found));
    }

    let matching: Vec<TransitionId> = node.transitions
        .iter()
        .copied()
        .filter(|&t| self.graph.transition_node(t).matcher.is_match(event))
        .collect();
    match matching.len() {
      0 => Ok(None),
      1 => Ok(Some(matching[0])),
      count => Err(MachineError::AmbiguousTransition { state, event: format!("{:?}", event), count }),
    }
  }

  fn fire_transition(
    &self,
    transition_id: TransitionId,
    event: &E,
    argument: Option<&dyn Any>,
    configuration: &Configuration) -> MachineResult<()> {
    let transition = self.graph.transition_node(transition_id);
    let source = transition.source;
    let active_states = self.active_states();
    let context = TransitionContext {
      event: MachineEvent::User(event),
      argument,
      source: Some(source),
      active_states: &active_states,
    };
    let direction = transition.producer.produce(&ProducerPolicy::Runtime(&context));

    // Resolve everything that can fail before anybody is notified.
    let (targets, state_changes) = match &direction {
      Direction::Targets(declared) => {
        let targets = self.resolve_targets(declared, &context, configuration)?;
        let state_changes = self.compute_state_changes(source, &targets, configuration)?;
        (targets, state_changes)
      }
      Direction::Stay | Direction::NoTransition => (vec![], StateChanges::none()),
    };

    let params = TransitionParams {
      transition: Some(transition_id),
      source: Some(source),
      direction: &direction,
      targets: &targets,
      event: MachineEvent::User(event),
      argument,
    };

    match &direction {
      Direction::NoTransition => {
        self.log(format_args!(
          "{}: [{}] declined {}",
          self.name(),
          self.debug_name(source),
          transition.debug_name()));
      }
      Direction::Stay => {
        self.log(format_args!(
          "{}: [{}] handled {} in place",
          self.name(),
          self.debug_name(source),
          transition.debug_name()));
      }
      Direction::Targets(_) => {
        self.log(format_args!(
          "{}: [{}] => [{}] via {}",
          self.name(),
          self.debug_name(source),
          self.debug_names(&targets),
          transition.debug_name()));
      }
    }

    for listener in transition.listeners.snapshot().iter() {
      listener.on_triggered(self, &params);
    }
    if direction == Direction::NoTransition {
      return Ok(());
    }
    for listener in self.listeners.snapshot().iter() {
      listener.on_transition(self, &params);
    }
    self.apply_state_changes(state_changes, &params);
    Ok(())
  }

  fn resolve_targets(
    &self,
    declared: &[StateId],
    context: &TransitionContext<'_, E>,
    configuration: &Configuration) -> MachineResult<Vec<StateId>> {
    let mut resolved = vec![];
    for &target in declared {
      self.graph.lookup(target)?;
      self.resolve_target(target, context, configuration, 0, &mut resolved)?;
    }
    let mut seen = HashSet::new();
    resolved.retain(|s| seen.insert(*s));
    Ok(resolved)
  }

  fn resolve_target(
    &self,
    target: StateId,
    context: &TransitionContext<'_, E>,
    configuration: &Configuration,
    depth: usize,
    out: &mut Vec<StateId>) -> MachineResult<()> {
    if depth > self.graph.state_count() {
      return Err(MachineError::PseudoStateLoop(target));
    }
    let node = self.graph.node(target);
    match &node.kind {
      StateKind::Plain | StateKind::Final | StateKind::NestedMachine => {
        out.push(target);
        Ok(())
      }
      StateKind::History { history_type, default } => {
        let parent = node.parent.ok_or(MachineError::DetachedState(target))?;
        if !self.has_history(parent, configuration) {
          return match default {
            Some(default) => self.resolve_target(*default, context, configuration, depth + 1, out),
            None => {
              out.push(parent);
              Ok(())
            }
          };
        }
        match (self.graph.node(parent).child_mode, history_type) {
          (ChildMode::Exclusive, HistoryType::Shallow) => out.extend(configuration.history.get(&parent)),
          (ChildMode::Exclusive, HistoryType::Deep) => {
            if let Some(&remembered) = configuration.history.get(&parent) {
              self.collect_deep_history(remembered, configuration, out);
            }
          }
          // Every region comes back to the child it last had.
          (ChildMode::Parallel, HistoryType::Shallow) => {
            for region in self.regions(parent) {
              out.push(configuration.history.get(&region).copied().unwrap_or(region));
            }
          }
          (ChildMode::Parallel, HistoryType::Deep) => self.collect_deep_history(parent, configuration, out),
        }
        Ok(())
      }
      StateKind::Redirect(redirect) => {
        let selected = (redirect.select)(context)
            .filter(|s| redirect.candidates.contains(s))
            .ok_or(MachineError::UnresolvedRedirect(target))?;
        self.resolve_target(selected, context, configuration, depth + 1, out)
      }
    }
  }

  /// Children of a composite that can be entered, i.e. everything but pseudo states.
  fn regions(&self, state: StateId) -> impl Iterator<Item = StateId> + '_ {
    self.graph.node(state).children.iter().copied().filter(move |&c| !self.graph.node(c).kind.is_pseudo())
  }

  /// A parallel composite has history once any of its regions recorded a child.
  fn has_history(&self, parent: StateId, configuration: &Configuration) -> bool {
    match self.graph.node(parent).child_mode {
      ChildMode::Exclusive => configuration.history.contains_key(&parent),
      ChildMode::Parallel => self.regions(parent).any(|r| configuration.history.contains_key(&r)),
    }
  }

  /// Follows remembered children down from `state`, taking every region of parallel composites.
  fn collect_deep_history(&self, state: StateId, configuration: &Configuration, out: &mut Vec<StateId>) {
    let node = self.graph.node(state);
    if !node.is_composite() {
      out.push(state);
      return;
    }
    match node.child_mode {
      ChildMode::Exclusive => match configuration.history.get(&state) {
        Some(&remembered) => self.collect_deep_history(remembered, configuration, out),
        None => out.push(state),
      },
      ChildMode::Parallel => {
        let before = out.len();
        for region in self.regions(state) {
          self.collect_deep_history(region, configuration, out);
        }
        if out.len() == before {
          out.push(state);
        }
      }
    }
  }

  /// Works out which states a transition from `source` to `targets` leaves and enters.  The
  /// transition's domain is the lowest common ancestor of all of them.  When that ancestor is
  /// one of the endpoints, only its own subtree is exited and re-entered; its siblings, parallel
  /// regions included, keep running.
  fn compute_state_changes(
    &self,
    source: StateId,
    targets: &[StateId],
    configuration: &Configuration) -> MachineResult<StateChanges> {
    if targets.is_empty() || targets == [source] {
      return Ok(StateChanges::none());
    }

    let mut endpoints = vec![source];
    endpoints.extend_from_slice(targets);
    let domain = self.graph.lowest_common_ancestor(&endpoints);

    let mut exits = vec![];
    let mut enters = vec![];
    if domain != self.root() && endpoints.contains(&domain) {
      if configuration.active.contains(&domain) {
        self.collect_exits(domain, configuration, &mut exits);
      }
      self.plan_entry(domain, targets, &mut enters)?;
    } else {
      for &child in &self.graph.node(domain).children {
        if configuration.active.contains(&child) {
          self.collect_exits(child, configuration, &mut exits);
        }
      }
      self.plan_children(domain, targets, &mut enters)?;
    }

    Ok(StateChanges { exits, enters })
  }

  /// Children first so the innermost states exit before the composites around them.
  fn collect_exits(&self, state: StateId, configuration: &Configuration, out: &mut Vec<StateId>) {
    for &child in &self.graph.node(state).children {
      if configuration.active.contains(&child) {
        self.collect_exits(child, configuration, out);
      }
    }
    out.push(state);
  }

  fn plan_entry(&self, state: StateId, targets: &[StateId], out: &mut Vec<StateId>) -> MachineResult<()> {
    out.push(state);
    self.plan_children(state, targets, out)
  }

  /// Chooses which children of `state` get entered: the ones leading to `targets`, otherwise
  /// the initial child (exclusive) or every region (parallel).
  fn plan_children(&self, state: StateId, targets: &[StateId], out: &mut Vec<StateId>) -> MachineResult<()> {
    let node = self.graph.node(state);
    if !node.is_composite() {
      return Ok(());
    }
    match node.child_mode {
      ChildMode::Exclusive => {
        let leading: Vec<StateId> = node.children
            .iter()
            .copied()
            .filter(|&c| targets.iter().any(|&t| self.graph.is_ancestor_or_self(c, t)))
            .collect();
        if leading.len() > 1 {
          return Err(MachineError::ConflictingTargets(targets.to_vec()));
        }
        let next = match leading.first().copied().or(node.initial) {
          Some(next) => next,
          None if node.children.iter().all(|&c| self.graph.node(c).kind.is_pseudo()) => return Ok(()),
          None => return Err(MachineError::MissingInitialState(state)),
        };
        self.plan_entry(next, targets, out)
      }
      ChildMode::Parallel => {
        for &child in &node.children {
          if !self.graph.node(child).kind.is_pseudo() {
            self.plan_entry(child, targets, out)?;
          }
        }
        Ok(())
      }
    }
  }

  /// Exit notifications see the old configuration, entry notifications the new one.
  fn apply_state_changes(&self, state_changes: StateChanges, params: &TransitionParams<'_, E>) {
    for &state in &state_changes.exits {
      self.log(format_args!("{}: Exiting [{}]...", self.name(), self.debug_name(state)));
      for listener in self.graph.node(state).listeners.snapshot().iter() {
        listener.on_exit(self, state, params);
      }
    }

    {
      let mut runtime = self.runtime();
      for state in &state_changes.exits {
        runtime.active.remove(state);
        runtime.current.remove(state);
        runtime.finished_states.remove(state);
        if let Some(parent) = self.graph.node(*state).parent {
          if runtime.current.get(&parent) == Some(state) {
            runtime.current.remove(&parent);
          }
        }
      }
      for &state in &state_changes.enters {
        runtime.active.insert(state);
        if let Some(parent) = self.graph.node(state).parent {
          if self.graph.node(parent).child_mode == ChildMode::Exclusive {
            runtime.current.insert(parent, state);
            runtime.history.insert(parent, state);
          }
        }
      }
    }

    for &state in &state_changes.enters {
      self.log(format_args!("{}: Entering [{}]...", self.name(), self.debug_name(state)));
      for listener in self.graph.node(state).listeners.snapshot().iter() {
        listener.on_entry(self, state, params);
      }
    }

    self.notify_finished(&state_changes.enters);
  }

  fn notify_finished(&self, entered: &[StateId]) {
    for &state in entered.iter().filter(|&&s| self.graph.node(s).kind.is_final()) {
      let mut next = self.graph.node(state).parent;
      while let Some(parent) = next {
        let newly_finished = {
          let mut runtime = self.runtime();
          if runtime.finished_states.contains(&parent) || !self.is_composite_finished(parent, &runtime) {
            false
          } else {
            runtime.finished_states.insert(parent);
            if parent == self.root() {
              runtime.finished = true;
            }
            true
          }
        };
        if !newly_finished {
          break;
        }

        self.log(format_args!("{}: [{}] finished", self.name(), self.debug_name(parent)));
        for listener in self.graph.node(parent).listeners.snapshot().iter() {
          listener.on_finished(self, parent);
        }
        if parent == self.root() {
          for listener in self.listeners.snapshot().iter() {
            listener.on_finished(self);
          }
        }
        next = self.graph.node(parent).parent;
      }
    }
  }

  fn is_composite_finished(&self, state: StateId, runtime: &Runtime) -> bool {
    let node = self.graph.node(state);
    match node.child_mode {
      ChildMode::Exclusive => runtime.current
          .get(&state)
          .map_or(false, |&c| self.graph.node(c).kind.is_final()),
      ChildMode::Parallel => node.children
          .iter()
          .filter(|&&c| !self.graph.node(c).kind.is_pseudo())
          .all(|c| runtime.finished_states.contains(c)
              || (self.graph.node(*c).kind.is_final() && runtime.active.contains(c))),
    }
  }
}
