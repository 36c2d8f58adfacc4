use std::fmt::Debug;
use std::sync::Arc;

use log::{debug, info};
use state_machine::{
    MachineListener, MachineResult, StateId, StateListener, StateMachine, TransitionParams,
};

/// Listener that narrates a machine's progress through the `log` facade: transitions and
/// lifecycle at info, individual entries and exits at debug.
pub struct TransitionLogger;

impl TransitionLogger {
    /// Registers one logger on the machine and on every state it has.
    pub fn attach<E: Debug + 'static>(machine: &StateMachine<E>) -> MachineResult<Arc<Self>> {
        let logger = Arc::new(TransitionLogger);
        machine.add_listener(logger.clone())?;
        for state in machine.states() {
            machine.add_state_listener(state.id(), logger.clone())?;
        }
        Ok(logger)
    }
}

fn state_name<E: Debug>(machine: &StateMachine<E>, state: StateId) -> String {
    machine.state(state).map(|s| s.debug_name()).unwrap_or_else(|_| state.to_string())
}

impl<E: Debug> MachineListener<E> for TransitionLogger {
    fn on_started(&self, machine: &StateMachine<E>) {
        info!("{}: started", machine.name());
    }

    fn on_transition(&self, machine: &StateMachine<E>, params: &TransitionParams<'_, E>) {
        let source = params.source.map(|s| state_name(machine, s)).unwrap_or_default();
        let targets: Vec<String> = params.targets.iter().map(|&s| state_name(machine, s)).collect();
        info!("{}: {} --{:?}--> [{}]", machine.name(), source, params.event, targets.join(", "));
    }

    fn on_finished(&self, machine: &StateMachine<E>) {
        info!("{}: finished", machine.name());
    }
}

impl<E: Debug> StateListener<E> for TransitionLogger {
    fn on_entry(&self, machine: &StateMachine<E>, state: StateId, _params: &TransitionParams<'_, E>) {
        debug!("{}: entered {}", machine.name(), state_name(machine, state));
    }

    fn on_exit(&self, machine: &StateMachine<E>, state: StateId, _params: &TransitionParams<'_, E>) {
        debug!("{}: exited {}", machine.name(), state_name(machine, state));
    }

    fn on_finished(&self, machine: &StateMachine<E>, state: StateId) {
        debug!("{}: {} finished", machine.name(), state_name(machine, state));
    }
}
