use std::collections::{BTreeMap, HashMap};

use state_machine::{
    ChildMode, EventMatcher, HistoryType, MachineConfig, MachineError, StateId, StateMachine, Transition,
};
use thiserror::Error;

use crate::description::*;

#[derive(Error, Debug)]
pub enum DescriptionError {
    #[error("state name {0} is used more than once")]
    DuplicateState(String),

    #[error("no state named {0}")]
    UnknownState(String),

    #[error("{0} states need a name")]
    MissingName(&'static str),

    #[error("pseudo state {0} cannot have child states or transitions")]
    PseudoStateContent(String),

    #[error("choice {0} has no route and no otherwise target")]
    EmptyChoice(String),

    #[error(transparent)]
    Machine(#[from] MachineError),
}

/// Turns a [MachineDescription] into a ready to start [StateMachine] over string events.
///
/// States are declared first, then history states, then choices (their targets must exist by
/// then), then initial states and transitions.  A choice may lead to another choice only if
/// that one is declared earlier.
pub struct MachineFactory<'d> {
    machine: StateMachine<String>,
    ids: HashMap<String, StateId>,
    scopes: Vec<Scope<'d>>,
}

/// A state that can own children, with the parts of its description still to be applied.
struct Scope<'d> {
    id: StateId,
    parallel: bool,
    initial: Option<&'d str>,
    states: &'d [StateDescription],
    transitions: &'d [TransitionDescription],
}

impl<'d> MachineFactory<'d> {
    pub fn build(
        description: &'d MachineDescription,
        config: MachineConfig<String>,
    ) -> Result<StateMachine<String>, DescriptionError> {
        let machine = StateMachine::with_config(description.name.as_str(), config);
        let root = Scope {
            id: machine.root(),
            parallel: description.parallel,
            initial: description.initial.as_deref(),
            states: &description.states,
            transitions: &[],
        };
        let mut factory = Self { machine, ids: HashMap::new(), scopes: vec![] };
        factory.ids.insert(description.name.clone(), root.id);
        factory.declare_states(root)?;

        // Choices may lead to history states, so every history exists before the first choice.
        for histories in [true, false] {
            for i in 0..factory.scopes.len() {
                let (id, states) = (factory.scopes[i].id, factory.scopes[i].states);
                factory.declare_pseudo_states(id, states, histories)?;
            }
        }
        for i in 0..factory.scopes.len() {
            factory.declare_structure(i)?;
        }
        Ok(factory.machine)
    }

    fn declare_states(&mut self, scope: Scope<'d>) -> Result<(), DescriptionError> {
        let parent = scope.id;
        let states = scope.states;
        self.scopes.push(scope);

        for state in states.iter().filter(|s| !s.kind.is_pseudo()) {
            let name = state.name.as_deref();
            let id = match (state.kind, name) {
                (StateKindDescription::Final, Some(name)) => self.machine.add_final_state(parent, name)?,
                (StateKindDescription::Final, None) => return Err(DescriptionError::MissingName("final")),
                (StateKindDescription::NestedMachine, Some(name)) => self.machine.add_nested_machine(parent, name)?,
                (StateKindDescription::NestedMachine, None) => {
                    return Err(DescriptionError::MissingName("nested machine"))
                }
                (_, Some(name)) => self.machine.add_state(parent, name)?,
                (_, None) => self.machine.add_unnamed_state(parent)?,
            };
            if let Some(name) = name {
                self.register(name, id)?;
            }
            self.declare_states(Scope {
                id,
                parallel: state.parallel,
                initial: state.initial.as_deref(),
                states: &state.states,
                transitions: &state.transitions,
            })?;
        }
        Ok(())
    }

    fn declare_pseudo_states(
        &mut self,
        parent: StateId,
        states: &'d [StateDescription],
        histories: bool,
    ) -> Result<(), DescriptionError> {
        let wanted = states
            .iter()
            .filter(|s| s.kind.is_pseudo() && (s.kind == StateKindDescription::Choice) != histories);
        for state in wanted {
            let label = state.name.clone().unwrap_or_else(|| format!("unnamed child of {}", parent));
            if !state.states.is_empty() || !state.transitions.is_empty() {
                return Err(DescriptionError::PseudoStateContent(label));
            }
            let name = state.name.as_deref();
            let id = match state.kind {
                StateKindDescription::ShallowHistory | StateKindDescription::DeepHistory => {
                    let history_type = if state.kind == StateKindDescription::DeepHistory {
                        HistoryType::Deep
                    } else {
                        HistoryType::Shallow
                    };
                    let default = state.default.as_deref().map(|d| self.lookup(d)).transpose()?;
                    self.machine.add_history_state(parent, name, history_type, default)?
                }
                _ => self.declare_choice(parent, name, label, state)?,
            };
            if let Some(name) = name {
                self.register(name, id)?;
            }
        }
        Ok(())
    }

    fn declare_choice(
        &mut self,
        parent: StateId,
        name: Option<&str>,
        label: String,
        state: &StateDescription,
    ) -> Result<StateId, DescriptionError> {
        let mut routes = BTreeMap::new();
        for (event, target) in &state.routes {
            routes.insert(event.clone(), self.lookup(target)?);
        }
        let otherwise = state.otherwise.as_deref().map(|o| self.lookup(o)).transpose()?;

        let mut candidates: Vec<StateId> = routes.values().copied().chain(otherwise).collect();
        candidates.sort();
        candidates.dedup();
        if candidates.is_empty() {
            return Err(DescriptionError::EmptyChoice(label));
        }

        let id = self.machine.add_redirect_state(parent, name, candidates, move |context| {
            context.event
                .user()
                .and_then(|event| routes.get(event.as_str()).copied())
                .or(otherwise)
        })?;
        Ok(id)
    }

    fn declare_structure(&mut self, index: usize) -> Result<(), DescriptionError> {
        let (id, parallel, initial, transitions) = {
            let scope = &self.scopes[index];
            (scope.id, scope.parallel, scope.initial, scope.transitions)
        };
        if parallel {
            self.machine.set_child_mode(id, ChildMode::Parallel)?;
        }
        if let Some(initial) = initial {
            let initial = self.lookup(initial)?;
            self.machine.set_initial_state(id, initial)?;
        }
        for transition in transitions {
            let targets = transition
                .all_targets()
                .into_iter()
                .map(|t| self.lookup(t))
                .collect::<Result<Vec<_>, _>>()?;

            let expected = transition.event.clone();
            let mut declaration = Transition::on(EventMatcher::new(
                transition.event.as_str(),
                move |event: &String| *event == expected));
            if let Some(name) = &transition.name {
                declaration = declaration.named(name.as_str());
            }
            if !targets.is_empty() {
                declaration = declaration.to_all(targets);
            }
            self.machine.add_transition(id, declaration)?;
        }
        Ok(())
    }

    fn register(&mut self, name: &str, id: StateId) -> Result<(), DescriptionError> {
        if self.ids.insert(name.to_string(), id).is_some() {
            return Err(DescriptionError::DuplicateState(name.to_string()));
        }
        Ok(())
    }

    fn lookup(&self, name: &str) -> Result<StateId, DescriptionError> {
        self.ids.get(name).copied().ok_or_else(|| DescriptionError::UnknownState(name.to_string()))
    }
}
