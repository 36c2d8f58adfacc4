use std::any::Any;
use std::fmt::{Debug, Display, Formatter};
use std::mem::Discriminant;

use crate::listener::{ListenerRegistry, TransitionListener};
use crate::state::StateId;

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TransitionId(pub(crate) usize);

impl Display for TransitionId {
  fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
    write!(f, "T{}", self.0)
  }
}

/// What drove a notification: the synthetic start of the machine or a user event.
pub enum MachineEvent<'a, E> {
  Start,
  User(&'a E),
}

impl<'a, E> MachineEvent<'a, E> {
  pub fn user(&self) -> Option<&'a E> {
    match *self {
      MachineEvent::Start => None,
      MachineEvent::User(event) => Some(event),
    }
  }

  pub fn is_start(&self) -> bool {
    matches!(self, MachineEvent::Start)
  }
}

impl<E> Clone for MachineEvent<'_, E> {
  fn clone(&self) -> Self {
    *self
  }
}

impl<E> Copy for MachineEvent<'_, E> {}

impl<E: Debug> Debug for MachineEvent<'_, E> {
  fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
    match self {
      MachineEvent::Start => write!(f, "StartEvent"),
      MachineEvent::User(event) => write!(f, "{:?}", event),
    }
  }
}

/// Strips the payload off a `Debug` rendering so `Move(3)` and `Move { x: 3 }` both become
/// `Move`.
pub fn event_type_name<E: Debug>(event: &E) -> String {
  let rendered = format!("{:?}", event);
  let end = rendered.find(|c: char| c == '(' || c == '{' || c == ' ').unwrap_or(rendered.len());
  rendered[..end].to_string()
}

/// Predicate deciding whether a transition reacts to an event, plus the name the event type is
/// drawn with in exported diagrams.
pub struct EventMatcher<E> {
  name: String,
  predicate: Box<dyn Fn(&E) -> bool + Send + Sync>,
}

impl<E> EventMatcher<E> {
  pub fn new<F>(name: impl Into<String>, predicate: F) -> Self
      where F: Fn(&E) -> bool + Send + Sync + 'static {
    Self { name: name.into(), predicate: Box::new(predicate) }
  }

  pub fn name(&self) -> &str {
    &self.name
  }

  pub fn is_match(&self, event: &E) -> bool {
    (self.predicate)(event)
  }
}

impl<E: Debug + PartialEq + Send + Sync + 'static> EventMatcher<E> {
  /// Matches events equal to `event`, payload included.
  pub fn exact(event: E) -> Self {
    Self::new(event_type_name(&event), move |e| *e == event)
  }
}

impl<E: Debug + 'static> EventMatcher<E> {
  /// Matches every event of the same enum variant as `sample`, whatever its payload.
  pub fn variant(sample: &E) -> Self {
    let discriminant: Discriminant<E> = std::mem::discriminant(sample);
    Self::new(event_type_name(sample), move |e| std::mem::discriminant(e) == discriminant)
  }
}

/// Outcome of asking a transition where it leads.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Direction {
  /// Handled without leaving the current configuration.
  Stay,

  /// Matched the event but declined to fire.
  NoTransition,

  /// Leads to these states; several targets are only valid across parallel regions.
  Targets(Vec<StateId>),
}

impl Direction {
  pub fn targets(&self) -> &[StateId] {
    match self {
      Direction::Targets(targets) => targets,
      _ => &[],
    }
  }
}

/// Everything a direction producer or redirect selector gets to look at.
pub struct TransitionContext<'a, E> {
  pub event: MachineEvent<'a, E>,
  pub argument: Option<&'a dyn Any>,
  pub source: Option<StateId>,
  pub active_states: &'a [StateId],
}

pub type DirectionFn<E> = Box<dyn Fn(&TransitionContext<'_, E>) -> Direction + Send + Sync>;

pub(crate) enum DirectionProducer<E> {
  Fixed(Direction),
  Conditional(DirectionFn<E>),
}

/// How a producer is consulted.  Export only wants the statically known targets, so it must not
/// run user closures that expect a live event.
pub(crate) enum ProducerPolicy<'a, 'b, E> {
  Runtime(&'a TransitionContext<'b, E>),
  CollectTargets,
}

impl<E> DirectionProducer<E> {
  pub(crate) fn produce(&self, policy: &ProducerPolicy<'_, '_, E>) -> Direction {
    match (self, policy) {
      (DirectionProducer::Fixed(direction), _) => direction.clone(),
      (DirectionProducer::Conditional(producer), ProducerPolicy::Runtime(context)) => producer(context),
      (DirectionProducer::Conditional(_), ProducerPolicy::CollectTargets) => Direction::NoTransition,
    }
  }
}

/// Declaration of a transition, handed to [crate::machine::StateMachine::add_transition].
pub struct Transition<E> {
  pub(crate) name: Option<String>,
  pub(crate) matcher: EventMatcher<E>,
  pub(crate) producer: DirectionProducer<E>,
}

impl<E> Transition<E> {
  /// A targetless transition reacting to `matcher`; pick a target with [Transition::to].
  pub fn on(matcher: EventMatcher<E>) -> Self {
    Self {
      name: None,
      matcher,
      producer: DirectionProducer::Fixed(Direction::Stay),
    }
  }

  pub fn named(mut self, name: impl Into<String>) -> Self {
    self.name = Some(name.into());
    self
  }

  pub fn to(self, target: StateId) -> Self {
    self.to_all([target])
  }

  pub fn to_all(mut self, targets: impl IntoIterator<Item = StateId>) -> Self {
    self.producer = DirectionProducer::Fixed(Direction::Targets(targets.into_iter().collect()));
    self
  }

  pub fn stay(mut self) -> Self {
    self.producer = DirectionProducer::Fixed(Direction::Stay);
    self
  }

  /// Decide the direction when the event arrives.  Such transitions are left out of exported
  /// diagrams since their targets are unknown until then.
  pub fn conditional<F>(mut self, producer: F) -> Self
      where F: Fn(&TransitionContext<'_, E>) -> Direction + Send + Sync + 'static {
    self.producer = DirectionProducer::Conditional(Box::new(producer));
    self
  }
}

pub struct TransitionNode<E> {
  pub(crate) id: TransitionId,
  pub(crate) source: StateId,
  pub(crate) name: Option<String>,
  pub(crate) matcher: EventMatcher<E>,
  pub(crate) producer: DirectionProducer<E>,
  pub(crate) listeners: ListenerRegistry<dyn TransitionListener<E>>,
}

impl<E> TransitionNode<E> {
  pub fn id(&self) -> TransitionId {
    self.id
  }

  pub fn source(&self) -> StateId {
    self.source
  }

  pub fn name(&self) -> Option<&str> {
    self.name.as_deref()
  }

  pub fn matcher(&self) -> &EventMatcher<E> {
    &self.matcher
  }

  pub fn is_conditional(&self) -> bool {
    matches!(self.producer, DirectionProducer::Conditional(_))
  }

  pub(crate) fn debug_name(&self) -> String {
    match &self.name {
      Some(name) => name.clone(),
      None => format!("{}[{}]", self.id, self.matcher.name()),
    }
  }
}

/// Passed to every notification fired for one transition (or for the start of the machine).
pub struct TransitionParams<'a, E> {
  /// `None` for the synthetic start transition.
  pub transition: Option<TransitionId>,
  pub source: Option<StateId>,
  pub direction: &'a Direction,
  /// Concrete states the transition resolved to, with history and redirects applied.
  pub targets: &'a [StateId],
  pub event: MachineEvent<'a, E>,
  pub argument: Option<&'a dyn Any>,
}
