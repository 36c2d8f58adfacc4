use std::any::Any;
use std::fmt::{Arguments, Debug};

use log::Level;

use crate::error::{MachineError, MachineResult};
use crate::state::StateId;

/// Sink for the machine's trace lines.
pub trait Logger: Send + Sync {
  fn log(&self, message: Arguments<'_>);
}

/// Forwards trace lines to the `log` facade.
pub struct LogCrateLogger {
  target: &'static str,
  level: Level,
}

impl LogCrateLogger {
  pub fn new(target: &'static str, level: Level) -> Self {
    Self { target, level }
  }
}

impl Default for LogCrateLogger {
  fn default() -> Self {
    Self::new("state_machine", Level::Debug)
  }
}

impl Logger for LogCrateLogger {
  fn log(&self, message: Arguments<'_>) {
    log::log!(target: self.target, self.level, "{}", message);
  }
}

pub struct NoopLogger;

impl Logger for NoopLogger {
  fn log(&self, _message: Arguments<'_>) {}
}

/// Called when no transition matches an event.  `states` are the active leaf states that were
/// offered the event.
pub trait IgnoredEventHandler<E>: Send + Sync {
  fn on_ignored_event(&self, states: &[StateId], event: &E, argument: Option<&dyn Any>) -> MachineResult<()>;
}

impl<E, F> IgnoredEventHandler<E> for F
    where F: Fn(&[StateId], &E, Option<&dyn Any>) -> MachineResult<()> + Send + Sync {
  fn on_ignored_event(&self, states: &[StateId], event: &E, argument: Option<&dyn Any>) -> MachineResult<()> {
    self(states, event, argument)
  }
}

pub struct DiscardIgnoredEvents;

impl<E> IgnoredEventHandler<E> for DiscardIgnoredEvents {
  fn on_ignored_event(&self, _states: &[StateId], _event: &E, _argument: Option<&dyn Any>) -> MachineResult<()> {
    Ok(())
  }
}

pub struct ThrowingIgnoredEventHandler;

impl<E: Debug> IgnoredEventHandler<E> for ThrowingIgnoredEventHandler {
  fn on_ignored_event(&self, _states: &[StateId], event: &E, _argument: Option<&dyn Any>) -> MachineResult<()> {
    Err(MachineError::IgnoredEvent { event: format!("{:?}", event) })
  }
}

/// Called with an event that arrived while another one was still being processed, typically from
/// inside a listener.  The machine never queues such events itself; a handler that wants them
/// replayed has to keep them and feed them back once the outer call returns.
pub trait PendingEventHandler<E>: Send + Sync {
  fn on_pending_event(&self, event: E, argument: Option<&dyn Any>) -> MachineResult<()>;
}

impl<E, F> PendingEventHandler<E> for F
    where F: Fn(E, Option<&dyn Any>) -> MachineResult<()> + Send + Sync {
  fn on_pending_event(&self, event: E, argument: Option<&dyn Any>) -> MachineResult<()> {
    self(event, argument)
  }
}

pub struct ThrowingPendingEventHandler;

impl<E: Debug> PendingEventHandler<E> for ThrowingPendingEventHandler {
  fn on_pending_event(&self, event: E, _argument: Option<&dyn Any>) -> MachineResult<()> {
    Err(MachineError::PendingEvent { event: format!("{:?}", event) })
  }
}

/// Policies a machine is constructed with.
///
/// * `logger` receives every trace line the engine produces.
/// * `ignored_event_handler` decides what an unmatched event means; the default accepts it.
/// * `pending_event_handler` decides what a re-entrant `process_event` means; the default fails
///   with [MachineError::PendingEvent].
pub struct MachineConfig<E> {
  pub logger: Box<dyn Logger>,
  pub ignored_event_handler: Box<dyn IgnoredEventHandler<E>>,
  pub pending_event_handler: Box<dyn PendingEventHandler<E>>,
}

impl<E: Debug + 'static> Default for MachineConfig<E> {
  fn default() -> Self {
    Self {
      logger: Box::new(LogCrateLogger::default()),
      ignored_event_handler: Box::new(DiscardIgnoredEvents),
      pending_event_handler: Box::new(ThrowingPendingEventHandler),
    }
  }
}

impl<E: 'static> MachineConfig<E> {
  pub fn with_logger(mut self, logger: impl Logger + 'static) -> Self {
    self.logger = Box::new(logger);
    self
  }

  pub fn with_ignored_event_handler<F>(mut self, handler: F) -> Self
      where F: Fn(&[StateId], &E, Option<&dyn Any>) -> MachineResult<()> + Send + Sync + 'static {
    self.ignored_event_handler = Box::new(handler);
    self
  }

  pub fn with_pending_event_handler<F>(mut self, handler: F) -> Self
      where F: Fn(E, Option<&dyn Any>) -> MachineResult<()> + Send + Sync + 'static {
    self.pending_event_handler = Box::new(handler);
    self
  }
}
