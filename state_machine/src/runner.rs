use std::fmt::Debug;

use tokio::sync::mpsc::{Receiver, Sender};
use tokio::task::{JoinError, JoinHandle};
use tokio::time::{Duration, Instant};

use crate::error::{MachineError, MachineResult};
use crate::machine::StateMachine;

/// Hosts a started [StateMachine] inside a tokio task and feeds it events one at a time.
///
/// The machine itself is synchronous; the runner only decides when `process_event` is called.
/// Listeners that want to react with another event should post it through a [Dispatcher] rather
/// than calling back into the machine, which would be treated as a pending event.
pub struct MachineRunner<E> {
  tx: Sender<RunnerEvent<E>>,
  join_handle: JoinHandle<RunnerOutcome<E>>,
}

/// What the runner hands back on shutdown: the machine, so the caller can inspect where it ended
/// up, and every error `process_event` returned along the way.
pub struct RunnerOutcome<E> {
  pub machine: StateMachine<E>,
  pub errors: Vec<MachineError>,
}

impl<E: Debug + Send + 'static> MachineRunner<E> {
  pub fn start(machine: StateMachine<E>) -> MachineResult<Self> {
    machine.start()?;

    let (tx, rx) = tokio::sync::mpsc::channel(32);
    let join_handle = tokio::spawn(async move {
      let mut internal = RunnerInternal {
        machine,
        rx,
        errors: vec![],
      };
      internal.handle_events().await;
      RunnerOutcome {
        machine: internal.machine,
        errors: internal.errors,
      }
    });
    Ok(Self { tx, join_handle })
  }

  pub fn dispatcher(&self) -> Dispatcher<E> {
    Dispatcher { tx: self.tx.clone() }
  }

  /// Stops after every event queued before this call has been processed.
  pub async fn shutdown(self) -> Result<RunnerOutcome<E>, JoinError> {
    if self.tx.send(RunnerEvent::Shutdown).await.is_err() {
      log::warn!("Runner already stopped before shutdown was requested");
    }
    self.join_handle.await
  }
}

pub struct Dispatcher<E> {
  tx: Sender<RunnerEvent<E>>,
}

impl<E> Clone for Dispatcher<E> {
  fn clone(&self) -> Self {
    Self { tx: self.tx.clone() }
  }
}

impl<E: Debug + Send + 'static> Dispatcher<E> {
  pub async fn dispatch(&self, event: E) {
    if let Err(e) = self.tx.send(RunnerEvent::Event(event)).await {
      log::warn!("Dropping event, runner is gone: {:?}", e.0);
    }
  }

  /// Posts without waiting; usable from synchronous listener callbacks.
  pub fn dispatch_sync(&self, event: E) {
    self.dispatch_delay(event, Duration::from_millis(0));
  }

  pub fn dispatch_delay_ms(&self, event: E, delay_ms: u64) {
    self.dispatch_delay(event, Duration::from_millis(delay_ms));
  }

  pub fn dispatch_delay(&self, event: E, delay: Duration) {
    let clone_self = self.clone();
    tokio::spawn(async move {
      tokio::time::sleep(delay).await;
      clone_self.dispatch(event).await;
    });
  }

  pub fn dispatch_at_time(&self, event: E, deadline: Instant) {
    let clone_self = self.clone();
    tokio::spawn(async move {
      tokio::time::sleep_until(deadline).await;
      clone_self.dispatch(event).await;
    });
  }
}

enum RunnerEvent<E> {
  Event(E),

  /// Stop handling events; anything queued after this one is dropped.
  Shutdown,
}

impl<E: Debug> Debug for RunnerEvent<E> {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    match self {
      RunnerEvent::Event(event) => write!(f, "{:?}", event),
      RunnerEvent::Shutdown => write!(f, "Shutdown"),
    }
  }
}

struct RunnerInternal<E> {
  machine: StateMachine<E>,
  rx: Receiver<RunnerEvent<E>>,
  errors: Vec<MachineError>,
}

impl<E: Debug> RunnerInternal<E> {
  async fn handle_events(&mut self) {
    while let Some(event) = self.rx.recv().await {
      match event {
        RunnerEvent::Event(event) => {
          if let Err(e) = self.machine.process_event(event) {
            log::error!("{}: {}", self.machine.name(), e);
            self.errors.push(e);
          }
        }
        RunnerEvent::Shutdown => {
          log::debug!("{}: Received shutdown signal...", self.machine.name());
          self.rx.close();
          break;
        }
      }
    }
    log::debug!("{}: No longer handling events", self.machine.name());
  }
}
