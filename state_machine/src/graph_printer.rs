use std::fmt::Debug;

use crate::machine::StateMachine;
use crate::state::*;
use crate::transition::*;

const STAR: &str = "[*]";
const SINGLE_INDENT: &str = "    ";
const PARALLEL: &str = "--";
const CHOICE: &str = "<<choice>>";
const SHALLOW_HISTORY: &str = "[H]";
const DEEP_HISTORY: &str = "[H*]";

#[derive(Copy, Clone, Debug, Default)]
pub struct ExportOptions {
  /// Append the event type to transition labels, after the transition name if it has one.
  pub show_event_labels: bool,
}

/// Renders a machine as a PlantUML state diagram without touching its runtime state.
///
/// # Example output:
///
/// ```text
/// @startuml
/// hide empty description
/// state Initialized {
///     state Ready
///     state Busy
///     [*] --> Ready
///     Ready --> Busy : DoWork
///     Busy --> Ready : OnWorkSuccess
/// }
/// state WaitingToInit
/// [*] --> Initialized
/// Busy --> WaitingToInit : OnWorkFailed
/// @enduml
/// ```
///
/// Edges whose ends are not siblings cannot be drawn inside the nested blocks, so they are held
/// back and emitted after every declaration.  Nested machines are drawn as a single state, so
/// an edge into one of their inner states points at the nested machine.  Transitions whose targets are only computed when
/// the event arrives (see [Transition::conditional]) are not drawn at all.
pub struct StateGraphPrinter<'a, E> {
  machine: &'a StateMachine<E>,
  options: ExportOptions,
  out: String,
  indent: usize,
  cross_level_transitions: Vec<String>,
}

impl<'a, E: Debug> StateGraphPrinter<'a, E> {
  pub fn export_plantuml(machine: &'a StateMachine<E>, options: ExportOptions) -> String {
    let mut printer = Self {
      machine,
      options,
      out: String::new(),
      indent: 0,
      cross_level_transitions: vec![],
    };
    printer.visit_machine();
    printer.out
  }

  fn visit_machine(&mut self) {
    self.line("@startuml");
    self.line("hide empty description");
    self.process_state_body(self.machine.root());
    for transition in std::mem::take(&mut self.cross_level_transitions) {
      self.line(&transition);
    }
    self.line("@enduml");
  }

  fn visit_state(&mut self, state: StateId) {
    let node = self.node(state);
    let name = self.graph_name(state);
    match node.kind() {
      StateKind::History { .. } => (),
      StateKind::Redirect(_) => self.line(&format!("state {} {}", name, CHOICE)),
      StateKind::NestedMachine => self.line(&format!("state {}", name)),
      StateKind::Plain | StateKind::Final => {
        if node.is_composite() {
          self.line(&format!("state {} {{", name));
          self.indent += 1;
          self.process_state_body(state);
          self.indent -= 1;
          self.line("}");
        } else {
          self.line(&format!("state {}", name));
        }
      }
    }
  }

  fn process_state_body(&mut self, state: StateId) {
    let node = self.node(state);
    let visible: Vec<StateId> = node.children()
        .iter()
        .copied()
        .filter(|&c| !matches!(self.node(c).kind(), StateKind::History { .. }))
        .collect();

    for (i, &child) in visible.iter().enumerate() {
      self.visit_state(child);
      if node.child_mode() == ChildMode::Parallel && i + 1 != visible.len() {
        self.line(PARALLEL);
      }
    }

    if node.child_mode() == ChildMode::Exclusive {
      if let Some(initial) = node.initial() {
        self.line(&format!("{} --> {}", STAR, self.graph_name(initial)));
      }
    }

    for &child in node.children() {
      for &transition in self.node(child).transitions() {
        self.visit_transition(transition);
      }
      if let StateKind::Redirect(redirect) = self.node(child).kind() {
        for &candidate in redirect.candidates() {
          self.edge(child, candidate, String::new());
        }
      }
    }

    for &child in node.children() {
      if self.node(child).kind().is_final() {
        self.line(&format!("{} --> {}", self.graph_name(child), STAR));
      }
    }
  }

  fn visit_transition(&mut self, transition: TransitionId) {
    let machine = self.machine;
    let node = match machine.transition(transition) {
      Ok(node) => node,
      Err(_) => return,
    };
    let targets = match node.producer.produce(&ProducerPolicy::CollectTargets) {
      Direction::Targets(targets) => targets,
      Direction::Stay | Direction::NoTransition => return,
    };
    let label = self.label(node);
    for target in targets {
      self.edge(node.source(), target, label.clone());
    }
  }

  fn edge(&mut self, source: StateId, target: StateId, label: String) {
    let (shown, target_name) = match self.hidden_behind(target) {
      Some(nested) => (nested, self.graph_name(nested)),
      None => (target, self.target_graph_name(target)),
    };
    let text = format!("{} --> {}{}", self.graph_name(source), target_name, label);
    if self.machine.graph().is_neighbor(source, shown) {
      self.line(&text);
    } else {
      self.cross_level_transitions.push(text);
    }
  }

  /// The outermost nested machine drawn in place of `state`, if `state` lives inside one.  A
  /// history state counts as part of its owner, so the history of a nested machine stays visible.
  fn hidden_behind(&self, state: StateId) -> Option<StateId> {
    let node = self.node(state);
    let mut ancestor = match node.kind() {
      StateKind::History { .. } => node.parent().and_then(|p| self.node(p).parent()),
      _ => node.parent(),
    };
    let mut outermost = None;
    while let Some(current) = ancestor {
      if matches!(self.node(current).kind(), StateKind::NestedMachine) {
        outermost = Some(current);
      }
      ancestor = self.node(current).parent();
    }
    outermost
  }

  fn label(&self, transition: &TransitionNode<E>) -> String {
    let mut parts: Vec<&str> = vec![];
    if let Some(name) = transition.name() {
      parts.push(name);
    }
    if self.options.show_event_labels {
      parts.push(transition.matcher().name());
    }
    if parts.is_empty() {
      String::new()
    } else {
      format!(" : {}", parts.join(" "))
    }
  }

  fn node(&self, state: StateId) -> &'a StateNode<E> {
    self.machine.graph().node(state)
  }

  fn graph_name(&self, state: StateId) -> String {
    let node = self.node(state);
    let name = node.debug_name().replace(' ', "_");
    match node.kind() {
      StateKind::NestedMachine => format!("{}_StateMachine", name),
      _ => name,
    }
  }

  fn target_graph_name(&self, state: StateId) -> String {
    let node = self.node(state);
    match (node.kind(), node.parent()) {
      (StateKind::History { history_type, .. }, Some(parent)) => {
        let marker = match history_type {
          HistoryType::Shallow => SHALLOW_HISTORY,
          HistoryType::Deep => DEEP_HISTORY,
        };
        format!("{}{}", self.graph_name(parent), marker)
      }
      _ => self.graph_name(state),
    }
  }

  fn line(&mut self, text: &str) {
    for _ in 0..self.indent {
      self.out.push_str(SINGLE_INDENT);
    }
    self.out.push_str(text);
    self.out.push('\n');
  }
}

impl<E: Debug> StateMachine<E> {
  pub fn export_plantuml(&self, options: ExportOptions) -> String {
    StateGraphPrinter::export_plantuml(self, options)
  }
}
