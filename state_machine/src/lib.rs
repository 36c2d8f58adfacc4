pub mod config;
pub mod error;
pub mod graph;
pub mod graph_printer;
pub mod listener;
pub mod machine;
pub mod runner;
pub mod state;
pub mod transition;

pub use config::*;
pub use error::*;
pub use graph_printer::{ExportOptions, StateGraphPrinter};
pub use listener::*;
pub use machine::StateMachine;
pub use runner::{Dispatcher, MachineRunner, RunnerOutcome};
pub use state::*;
pub use transition::*;

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use crate::config::*;
    use crate::error::*;
    use crate::listener::*;
    use crate::machine::*;
    use crate::state::*;
    use crate::transition::*;

    #[derive(Debug, PartialEq, Clone)]
    enum TestEvent {
        Go,
        Back,
        Next,
        Leave,
        Flip,
        Both,
        Split,
        Clash,
        Finish,
        Quit,
        Anything,
    }

    fn on(event: TestEvent) -> Transition<TestEvent> {
        Transition::on(EventMatcher::exact(event))
    }

    fn name_of(machine: &StateMachine<TestEvent>, state: StateId) -> String {
        machine.state(state).map(|s| s.debug_name()).unwrap_or_default()
    }

    fn names(machine: &StateMachine<TestEvent>, states: &[StateId]) -> Vec<String> {
        states.iter().map(|&s| name_of(machine, s)).collect()
    }

    /// Writes down every notification it sees, in order.
    #[derive(Default)]
    struct Recorder {
        events: Mutex<Vec<String>>,
    }

    impl Recorder {
        fn push(&self, label: String) {
            self.events.lock().unwrap().push(label);
        }

        fn take(&self) -> Vec<String> {
            std::mem::take(&mut *self.events.lock().unwrap())
        }
    }

    fn transition_label(machine: &StateMachine<TestEvent>, params: &TransitionParams<'_, TestEvent>) -> String {
        match params.transition {
            Some(t) => machine.transition(t).ok().and_then(|t| t.name()).unwrap_or("?").to_string(),
            None => "start".to_string(),
        }
    }

    impl StateListener<TestEvent> for Recorder {
        fn on_entry(&self, machine: &StateMachine<TestEvent>, state: StateId, _params: &TransitionParams<'_, TestEvent>) {
            self.push(format!("entry {}", name_of(machine, state)));
        }

        fn on_exit(&self, machine: &StateMachine<TestEvent>, state: StateId, _params: &TransitionParams<'_, TestEvent>) {
            self.push(format!("exit {}", name_of(machine, state)));
        }

        fn on_finished(&self, machine: &StateMachine<TestEvent>, state: StateId) {
            self.push(format!("finished {}", name_of(machine, state)));
        }
    }

    impl TransitionListener<TestEvent> for Recorder {
        fn on_triggered(&self, machine: &StateMachine<TestEvent>, params: &TransitionParams<'_, TestEvent>) {
            self.push(format!("triggered {}", transition_label(machine, params)));
        }
    }

    impl MachineListener<TestEvent> for Recorder {
        fn on_started(&self, _machine: &StateMachine<TestEvent>) {
            self.push("started".to_string());
        }

        fn on_transition(&self, machine: &StateMachine<TestEvent>, params: &TransitionParams<'_, TestEvent>) {
            self.push(format!("transition {}", transition_label(machine, params)));
        }

        fn on_finished(&self, _machine: &StateMachine<TestEvent>) {
            self.push("machine finished".to_string());
        }
    }

    fn watch_all(machine: &StateMachine<TestEvent>) -> Arc<Recorder> {
        let recorder = Arc::new(Recorder::default());
        machine.add_listener(recorder.clone()).unwrap();
        for state in machine.states() {
            machine.add_state_listener(state.id(), recorder.clone()).unwrap();
        }
        for transition in machine.transitions() {
            machine.add_transition_listener(transition.id(), recorder.clone()).unwrap();
        }
        recorder
    }

    /// Two siblings `A` (initial) and `B`; `A --go--> B`, `B --back--> A`.
    fn two_states() -> (StateMachine<TestEvent>, StateId, StateId) {
        let mut machine = StateMachine::new("Machine");
        let root = machine.root();
        let a = machine.add_state(root, "A").unwrap();
        let b = machine.add_state(root, "B").unwrap();
        machine.set_initial_state(root, a).unwrap();
        machine.add_transition(a, on(TestEvent::Go).named("go").to(b)).unwrap();
        machine.add_transition(b, on(TestEvent::Back).named("back").to(a)).unwrap();
        (machine, a, b)
    }

    #[test]
    fn test_start_enters_initial_states() {
        let (machine, a, _) = two_states();
        let recorder = watch_all(&machine);
        machine.start().unwrap();

        assert_eq!(recorder.take(), vec!["started", "entry Machine", "entry A"]);
        assert_eq!(machine.current_state(machine.root()), Some(a));
        assert!(machine.is_started());
        assert!(!machine.is_processing());
    }

    #[test]
    fn test_transition_notification_order() {
        let (machine, _, b) = two_states();
        let recorder = watch_all(&machine);
        machine.start().unwrap();
        recorder.take();

        machine.process_event(TestEvent::Go).unwrap();
        assert_eq!(recorder.take(), vec!["triggered go", "transition go", "exit A", "entry B"]);
        assert_eq!(machine.current_state(machine.root()), Some(b));
    }

    /// Records where the machine's cursor points whenever a state is exited or entered.
    struct CursorWatcher {
        seen: Mutex<Vec<String>>,
    }

    impl StateListener<TestEvent> for CursorWatcher {
        fn on_entry(&self, machine: &StateMachine<TestEvent>, state: StateId, _params: &TransitionParams<'_, TestEvent>) {
            let current = machine.current_state(machine.root()).map(|s| name_of(machine, s));
            self.seen.lock().unwrap().push(format!("entry {} sees {:?}", name_of(machine, state), current));
        }

        fn on_exit(&self, machine: &StateMachine<TestEvent>, state: StateId, _params: &TransitionParams<'_, TestEvent>) {
            let current = machine.current_state(machine.root()).map(|s| name_of(machine, s));
            self.seen.lock().unwrap().push(format!("exit {} sees {:?}", name_of(machine, state), current));
        }
    }

    #[test]
    fn test_exit_sees_old_cursor_and_entry_sees_new() {
        let (machine, a, b) = two_states();
        let watcher = Arc::new(CursorWatcher { seen: Mutex::new(vec![]) });
        machine.add_state_listener(a, watcher.clone()).unwrap();
        machine.add_state_listener(b, watcher.clone()).unwrap();
        machine.start().unwrap();
        machine.process_event(TestEvent::Go).unwrap();

        assert_eq!(*watcher.seen.lock().unwrap(), vec![
            "entry A sees Some(\"A\")",
            "exit A sees Some(\"A\")",
            "entry B sees Some(\"B\")",
        ]);
    }

    #[test]
    fn test_ignored_event_leaves_cursor_alone() {
        let ignored = Arc::new(Mutex::new(vec![]));
        let ignored_clone = ignored.clone();
        let config = MachineConfig::default()
                .with_ignored_event_handler(move |states: &[StateId], event: &TestEvent, _argument| {
                    ignored_clone.lock().unwrap().push((states.to_vec(), event.clone()));
                    Ok(())
                });
        let mut machine = StateMachine::with_config("Machine", config);
        let root = machine.root();
        let a = machine.add_state(root, "A").unwrap();
        machine.set_initial_state(root, a).unwrap();
        let recorder = watch_all(&machine);
        machine.start().unwrap();
        recorder.take();

        machine.process_event(TestEvent::Anything).unwrap();
        assert!(recorder.take().is_empty());
        assert_eq!(machine.current_state(root), Some(a));
        assert_eq!(*ignored.lock().unwrap(), vec![(vec![a], TestEvent::Anything)]);
    }

    #[test]
    fn test_strict_ignored_event_handler() {
        let config = MachineConfig::<TestEvent> { ignored_event_handler: Box::new(ThrowingIgnoredEventHandler), ..Default::default() };
        let mut machine = StateMachine::with_config("Machine", config);
        let root = machine.root();
        let a = machine.add_state(root, "A").unwrap();
        machine.set_initial_state(root, a).unwrap();
        machine.start().unwrap();

        assert_eq!(
            machine.process_event(TestEvent::Anything),
            Err(MachineError::IgnoredEvent { event: "Anything".to_string() }));
    }

    #[test]
    fn test_ambiguous_match_fails_before_any_notification() {
        let (mut machine, a, _) = two_states();
        let root = machine.root();
        let c = machine.add_state(root, "C").unwrap();
        machine.add_transition(a, on(TestEvent::Go).named("go again").to(c)).unwrap();
        let recorder = watch_all(&machine);
        machine.start().unwrap();
        recorder.take();

        assert_eq!(
            machine.process_event(TestEvent::Go),
            Err(MachineError::AmbiguousTransition { state: a, event: "Go".to_string(), count: 2 }));
        assert!(recorder.take().is_empty());
        assert_eq!(machine.current_state(root), Some(a));
        assert!(!machine.is_processing());
    }

    #[test]
    fn test_declined_transition_only_triggers() {
        let mut machine = StateMachine::new("Machine");
        let root = machine.root();
        let a = machine.add_state(root, "A").unwrap();
        let b = machine.add_state(root, "B").unwrap();
        machine.set_initial_state(root, a).unwrap();
        machine.add_transition(a, on(TestEvent::Go).named("maybe").conditional(move |context| {
            match context.argument.and_then(|arg| arg.downcast_ref::<bool>()) {
                Some(true) => Direction::Targets(vec![b]),
                _ => Direction::NoTransition,
            }
        })).unwrap();
        let recorder = watch_all(&machine);
        machine.start().unwrap();
        recorder.take();

        machine.process_event(TestEvent::Go).unwrap();
        assert_eq!(recorder.take(), vec!["triggered maybe"]);
        assert_eq!(machine.current_state(root), Some(a));

        machine.process_event_with(TestEvent::Go, &true).unwrap();
        assert_eq!(recorder.take(), vec!["triggered maybe", "transition maybe", "exit A", "entry B"]);
    }

    #[test]
    fn test_targetless_and_self_transitions_keep_states() {
        let mut machine = StateMachine::new("Machine");
        let root = machine.root();
        let a = machine.add_state(root, "A").unwrap();
        machine.set_initial_state(root, a).unwrap();
        machine.add_transition(a, on(TestEvent::Next).named("stay")).unwrap();
        machine.add_transition(a, on(TestEvent::Go).named("self").to(a)).unwrap();
        let recorder = watch_all(&machine);
        machine.start().unwrap();
        recorder.take();

        machine.process_event(TestEvent::Next).unwrap();
        machine.process_event(TestEvent::Go).unwrap();
        assert_eq!(recorder.take(), vec![
            "triggered stay",
            "transition stay",
            "triggered self",
            "transition self",
        ]);
        assert_eq!(machine.current_state(root), Some(a));
    }

    /// Root holds `P` (initial) with children `A` (initial) and `B`, plus a sibling `Q`.
    fn nested() -> (StateMachine<TestEvent>, StateId, StateId, StateId, StateId) {
        let mut machine = StateMachine::new("Machine");
        let root = machine.root();
        let p = machine.add_state(root, "P").unwrap();
        let a = machine.add_state(p, "A").unwrap();
        let b = machine.add_state(p, "B").unwrap();
        let q = machine.add_state(root, "Q").unwrap();
        machine.set_initial_state(root, p).unwrap();
        machine.set_initial_state(p, a).unwrap();
        machine.add_transition(a, on(TestEvent::Next).named("next").to(b)).unwrap();
        machine.add_transition(p, on(TestEvent::Leave).named("leave").to(q)).unwrap();
        (machine, p, a, b, q)
    }

    #[test]
    fn test_hierarchical_exit_and_entry() {
        let (mut machine, p, _, _, q) = nested();
        machine.add_transition(q, on(TestEvent::Back).named("back").to(p)).unwrap();
        let recorder = watch_all(&machine);
        machine.start().unwrap();
        assert_eq!(recorder.take(), vec!["started", "entry Machine", "entry P", "entry A"]);

        machine.process_event(TestEvent::Next).unwrap();
        machine.process_event(TestEvent::Leave).unwrap();
        assert_eq!(recorder.take(), vec![
            "triggered next",
            "transition next",
            "exit A",
            "entry B",
            "triggered leave",
            "transition leave",
            "exit B",
            "exit P",
            "entry Q",
        ]);

        machine.process_event(TestEvent::Back).unwrap();
        assert_eq!(recorder.take(), vec!["triggered back", "transition back", "exit Q", "entry P", "entry A"]);
        assert_eq!(names(&machine, &machine.active_states()), vec!["Machine", "P", "A"]);
    }

    #[test]
    fn test_deepest_active_state_wins() {
        let (mut machine, p, a, b, _) = nested();
        machine.add_transition(a, on(TestEvent::Leave).named("inner leave").to(b)).unwrap();
        machine.start().unwrap();

        machine.process_event(TestEvent::Leave).unwrap();
        assert_eq!(machine.current_state(p), Some(b));

        // B has no transition of its own, so P handles it.
        machine.process_event(TestEvent::Leave).unwrap();
        assert_eq!(names(&machine, &machine.active_leaves()), vec!["Q"]);
    }

    #[test]
    fn test_transition_to_own_parent_reenters_it() {
        let (mut machine, p, _, b, _) = nested();
        machine.add_transition(b, on(TestEvent::Back).named("up").to(p)).unwrap();
        let recorder = watch_all(&machine);
        machine.start().unwrap();
        machine.process_event(TestEvent::Next).unwrap();
        recorder.take();

        machine.process_event(TestEvent::Back).unwrap();
        assert_eq!(recorder.take(), vec![
            "triggered up",
            "transition up",
            "exit B",
            "exit P",
            "entry P",
            "entry A",
        ]);
    }

    #[test]
    fn test_shallow_history() {
        let (mut machine, p, _, b, q) = nested();
        let history = machine.add_history_state(p, Some("H"), HistoryType::Shallow, None).unwrap();
        machine.add_transition(q, on(TestEvent::Back).named("back").to(history)).unwrap();
        machine.start().unwrap();

        machine.process_event(TestEvent::Next).unwrap();
        machine.process_event(TestEvent::Leave).unwrap();
        assert_eq!(machine.remembered_state(p), Some(b));

        for _ in 0..2 {
            machine.process_event(TestEvent::Back).unwrap();
            assert_eq!(names(&machine, &machine.active_states()), vec!["Machine", "P", "B"]);
            machine.process_event(TestEvent::Leave).unwrap();
        }
    }

    #[test]
    fn test_history_without_record_uses_default() {
        let mut machine = StateMachine::new("Machine");
        let root = machine.root();
        let q = machine.add_state(root, "Q").unwrap();
        let p = machine.add_state(root, "P").unwrap();
        let a = machine.add_state(p, "A").unwrap();
        let b = machine.add_state(p, "B").unwrap();
        machine.set_initial_state(root, q).unwrap();
        machine.set_initial_state(p, a).unwrap();
        let with_default = machine.add_history_state(p, None, HistoryType::Shallow, Some(b)).unwrap();
        machine.add_transition(q, on(TestEvent::Go).to(with_default)).unwrap();

        assert_eq!(
            machine.add_history_state(p, None, HistoryType::Shallow, Some(q)),
            Err(MachineError::NotAChild { parent: p, state: q }));

        machine.start().unwrap();
        machine.process_event(TestEvent::Go).unwrap();
        assert_eq!(machine.current_state(p), Some(b));

        let mut fresh = StateMachine::new("Machine");
        let root = fresh.root();
        let q = fresh.add_state(root, "Q").unwrap();
        let p = fresh.add_state(root, "P").unwrap();
        let a = fresh.add_state(p, "A").unwrap();
        fresh.set_initial_state(root, q).unwrap();
        fresh.set_initial_state(p, a).unwrap();
        let history = fresh.add_history_state(p, None, HistoryType::Shallow, None).unwrap();
        fresh.add_transition(q, on(TestEvent::Back).to(history)).unwrap();
        fresh.start().unwrap();
        fresh.process_event(TestEvent::Back).unwrap();
        assert_eq!(fresh.current_state(p), Some(a));
    }

    #[test]
    fn test_deep_history_restores_nested_path() {
        let mut machine = StateMachine::new("Machine");
        let root = machine.root();
        let p = machine.add_state(root, "P").unwrap();
        let a = machine.add_state(p, "A").unwrap();
        let a1 = machine.add_state(a, "A1").unwrap();
        let a2 = machine.add_state(a, "A2").unwrap();
        let q = machine.add_state(root, "Q").unwrap();
        machine.set_initial_state(root, p).unwrap();
        machine.set_initial_state(p, a).unwrap();
        machine.set_initial_state(a, a1).unwrap();
        let shallow = machine.add_history_state(p, Some("H"), HistoryType::Shallow, None).unwrap();
        let deep = machine.add_history_state(p, Some("H*"), HistoryType::Deep, None).unwrap();
        machine.add_transition(a1, on(TestEvent::Next).to(a2)).unwrap();
        machine.add_transition(p, on(TestEvent::Leave).to(q)).unwrap();
        machine.add_transition(q, on(TestEvent::Back).to(deep)).unwrap();
        machine.add_transition(q, on(TestEvent::Go).to(shallow)).unwrap();
        machine.start().unwrap();

        machine.process_event(TestEvent::Next).unwrap();
        machine.process_event(TestEvent::Leave).unwrap();
        machine.process_event(TestEvent::Back).unwrap();
        assert_eq!(names(&machine, &machine.active_states()), vec!["Machine", "P", "A", "A2"]);

        machine.process_event(TestEvent::Leave).unwrap();
        machine.process_event(TestEvent::Go).unwrap();
        assert_eq!(names(&machine, &machine.active_states()), vec!["Machine", "P", "A", "A1"]);
    }

    #[test]
    fn test_redirect_resolves_to_candidate() {
        let mut machine = StateMachine::new("Machine");
        let root = machine.root();
        let a = machine.add_state(root, "A").unwrap();
        let b = machine.add_state(root, "B").unwrap();
        let c = machine.add_state(root, "C").unwrap();
        machine.set_initial_state(root, a).unwrap();
        let choice = machine.add_redirect_state(root, Some("Choice"), vec![b, c], move |context| {
            match context.argument.and_then(|arg| arg.downcast_ref::<i32>()) {
                Some(1) => Some(b),
                Some(2) => Some(c),
                Some(_) => Some(a),
                None => None,
            }
        }).unwrap();
        machine.add_transition(a, on(TestEvent::Go).named("go").to(choice)).unwrap();
        machine.add_transition(b, on(TestEvent::Back).to(a)).unwrap();
        machine.add_transition(c, on(TestEvent::Back).to(a)).unwrap();
        let recorder = watch_all(&machine);
        machine.start().unwrap();
        recorder.take();

        machine.process_event_with(TestEvent::Go, &1).unwrap();
        assert_eq!(recorder.take(), vec!["triggered go", "transition go", "exit A", "entry B"]);
        machine.process_event(TestEvent::Back).unwrap();

        machine.process_event_with(TestEvent::Go, &2).unwrap();
        assert_eq!(machine.current_state(root), Some(c));
        machine.process_event(TestEvent::Back).unwrap();
        recorder.take();

        assert_eq!(machine.process_event(TestEvent::Go), Err(MachineError::UnresolvedRedirect(choice)));
        assert_eq!(machine.process_event_with(TestEvent::Go, &3), Err(MachineError::UnresolvedRedirect(choice)));
        assert!(recorder.take().is_empty());
        assert_eq!(machine.current_state(root), Some(a));
    }

    /// Root holds parallel `P` (initial) with regions `X` {X1, X2} and `Y` {Y1, Y2}, plus `Q`.
    fn parallel() -> (StateMachine<TestEvent>, StateId, StateId, StateId) {
        let mut machine = StateMachine::new("Machine");
        let root = machine.root();
        let p = machine.add_state(root, "P").unwrap();
        machine.set_child_mode(p, ChildMode::Parallel).unwrap();
        let x = machine.add_state(p, "X").unwrap();
        let x1 = machine.add_state(x, "X1").unwrap();
        let x2 = machine.add_state(x, "X2").unwrap();
        let y = machine.add_state(p, "Y").unwrap();
        let y1 = machine.add_state(y, "Y1").unwrap();
        let y2 = machine.add_state(y, "Y2").unwrap();
        let q = machine.add_state(root, "Q").unwrap();
        machine.set_initial_state(root, p).unwrap();
        machine.set_initial_state(x, x1).unwrap();
        machine.set_initial_state(y, y1).unwrap();
        machine.add_transition(x1, on(TestEvent::Flip).named("flip").to(x2)).unwrap();
        machine.add_transition(x2, on(TestEvent::Both).to(x1)).unwrap();
        machine.add_transition(y1, on(TestEvent::Both).to(y2)).unwrap();
        machine.add_transition(p, on(TestEvent::Leave).named("leave").to(q)).unwrap();
        machine.add_transition(q, on(TestEvent::Split).named("split").to_all([x2, y2])).unwrap();
        machine.add_transition(q, on(TestEvent::Clash).to_all([x1, x2])).unwrap();
        (machine, p, q, x2)
    }

    #[test]
    fn test_parallel_regions() {
        let (machine, p, q, _) = parallel();
        let recorder = watch_all(&machine);
        machine.start().unwrap();
        assert_eq!(recorder.take(), vec![
            "started",
            "entry Machine",
            "entry P",
            "entry X",
            "entry X1",
            "entry Y",
            "entry Y1",
        ]);
        assert_eq!(names(&machine, &machine.active_leaves()), vec!["X1", "Y1"]);

        machine.process_event(TestEvent::Flip).unwrap();
        assert_eq!(recorder.take(), vec!["triggered flip", "transition flip", "exit X1", "entry X2"]);
        assert_eq!(names(&machine, &machine.active_leaves()), vec!["X2", "Y1"]);

        assert_eq!(
            machine.process_event(TestEvent::Both),
            Err(MachineError::AmbiguousTransition { state: p, event: "Both".to_string(), count: 2 }));
        assert!(recorder.take().is_empty());

        machine.process_event(TestEvent::Leave).unwrap();
        assert_eq!(recorder.take(), vec![
            "triggered leave",
            "transition leave",
            "exit X2",
            "exit X",
            "exit Y1",
            "exit Y",
            "exit P",
            "entry Q",
        ]);
        assert_eq!(machine.current_state(machine.root()), Some(q));
    }

    #[test]
    fn test_transition_within_region_leaves_other_regions_alone() {
        let (mut machine, _, _, x2) = parallel();
        let x = machine.find_state("X").unwrap();
        let y = machine.find_state("Y").unwrap();
        let y1 = machine.find_state("Y1").unwrap();
        let y2 = machine.find_state("Y2").unwrap();
        machine.add_transition(y1, on(TestEvent::Next).named("flip y").to(y2)).unwrap();
        machine.add_transition(x2, on(TestEvent::Finish).named("reset x").to(x)).unwrap();
        machine.add_transition(y, on(TestEvent::Quit).named("reset y").to(y1)).unwrap();
        let recorder = watch_all(&machine);

        machine.start().unwrap();
        machine.process_event(TestEvent::Flip).unwrap();
        machine.process_event(TestEvent::Next).unwrap();
        recorder.take();

        machine.process_event(TestEvent::Finish).unwrap();
        assert_eq!(recorder.take(), vec![
            "triggered reset x",
            "transition reset x",
            "exit X2",
            "exit X",
            "entry X",
            "entry X1",
        ]);
        assert_eq!(names(&machine, &machine.active_leaves()), vec!["X1", "Y2"]);

        machine.process_event(TestEvent::Quit).unwrap();
        assert_eq!(recorder.take(), vec![
            "triggered reset y",
            "transition reset y",
            "exit Y2",
            "exit Y",
            "entry Y",
            "entry Y1",
        ]);
        assert_eq!(names(&machine, &machine.active_leaves()), vec!["X1", "Y1"]);
    }

    #[test]
    fn test_history_of_parallel_state_restores_every_region() {
        let (mut machine, p, q, _) = parallel();
        let y1 = machine.find_state("Y1").unwrap();
        let y2 = machine.find_state("Y2").unwrap();
        let deep = machine.add_history_state(p, Some("H"), HistoryType::Deep, None).unwrap();
        let shallow = machine.add_history_state(p, Some("HS"), HistoryType::Shallow, None).unwrap();
        machine.add_transition(y1, on(TestEvent::Next).named("flip y").to(y2)).unwrap();
        machine.add_transition(q, on(TestEvent::Back).named("deep back").to(deep)).unwrap();
        machine.add_transition(q, on(TestEvent::Go).named("shallow back").to(shallow)).unwrap();
        let recorder = watch_all(&machine);

        machine.start().unwrap();
        machine.process_event(TestEvent::Flip).unwrap();
        machine.process_event(TestEvent::Next).unwrap();
        machine.process_event(TestEvent::Leave).unwrap();
        recorder.take();

        machine.process_event(TestEvent::Back).unwrap();
        assert_eq!(recorder.take(), vec![
            "triggered deep back",
            "transition deep back",
            "exit Q",
            "entry P",
            "entry X",
            "entry X2",
            "entry Y",
            "entry Y2",
        ]);
        assert_eq!(names(&machine, &machine.active_leaves()), vec!["X2", "Y2"]);

        machine.process_event(TestEvent::Leave).unwrap();
        machine.process_event(TestEvent::Go).unwrap();
        assert_eq!(names(&machine, &machine.active_leaves()), vec!["X2", "Y2"]);
    }

    #[test]
    fn test_history_of_unvisited_parallel_state_enters_it() {
        let (mut machine, p, q, _) = parallel();
        let deep = machine.add_history_state(p, Some("H"), HistoryType::Deep, None).unwrap();
        let root = machine.root();
        machine.add_transition(q, on(TestEvent::Back).to(deep)).unwrap();
        machine.set_initial_state(root, q).unwrap();

        machine.start().unwrap();
        machine.process_event(TestEvent::Back).unwrap();
        assert_eq!(names(&machine, &machine.active_leaves()), vec!["X1", "Y1"]);
    }

    #[test]
    fn test_multiple_targets_enter_parallel_regions() {
        let (machine, _, _, _) = parallel();
        machine.start().unwrap();
        machine.process_event(TestEvent::Leave).unwrap();
        let recorder = watch_all(&machine);

        machine.process_event(TestEvent::Split).unwrap();
        assert_eq!(recorder.take(), vec![
            "triggered split",
            "transition split",
            "exit Q",
            "entry P",
            "entry X",
            "entry X2",
            "entry Y",
            "entry Y2",
        ]);

        machine.process_event(TestEvent::Leave).unwrap();
        let x1 = machine.find_state("X1").unwrap();
        let x2 = machine.find_state("X2").unwrap();
        assert_eq!(machine.process_event(TestEvent::Clash), Err(MachineError::ConflictingTargets(vec![x1, x2])));
    }

    #[test]
    fn test_final_states_finish_parents_and_machine() {
        let ignored = Arc::new(Mutex::new(0));
        let ignored_clone = ignored.clone();
        let config = MachineConfig::default()
                .with_ignored_event_handler(move |_states: &[StateId], _event: &TestEvent, _argument| {
                    *ignored_clone.lock().unwrap() += 1;
                    Ok(())
                });
        let mut machine = StateMachine::with_config("Machine", config);
        let root = machine.root();
        let work = machine.add_state(root, "Work").unwrap();
        let step = machine.add_state(work, "Step").unwrap();
        let done = machine.add_final_state(work, "Done").unwrap();
        let end = machine.add_final_state(root, "End").unwrap();
        machine.set_initial_state(root, work).unwrap();
        machine.set_initial_state(work, step).unwrap();
        machine.add_transition(step, on(TestEvent::Finish).named("finish").to(done)).unwrap();
        machine.add_transition(work, on(TestEvent::Quit).named("quit").to(end)).unwrap();
        let recorder = watch_all(&machine);
        machine.start().unwrap();
        recorder.take();

        machine.process_event(TestEvent::Finish).unwrap();
        assert_eq!(recorder.take(), vec![
            "triggered finish",
            "transition finish",
            "exit Step",
            "entry Done",
            "finished Work",
        ]);
        assert!(!machine.is_finished());

        machine.process_event(TestEvent::Quit).unwrap();
        assert_eq!(recorder.take(), vec![
            "triggered quit",
            "transition quit",
            "exit Done",
            "exit Work",
            "entry End",
            "finished Machine",
            "machine finished",
        ]);
        assert!(machine.is_finished());

        machine.process_event(TestEvent::Quit).unwrap();
        assert!(recorder.take().is_empty());
        assert_eq!(*ignored.lock().unwrap(), 1);
    }

    #[test]
    fn test_parallel_finishes_when_every_region_does() {
        let mut machine = StateMachine::new("Machine");
        let root = machine.root();
        let p = machine.add_state(root, "P").unwrap();
        machine.set_child_mode(p, ChildMode::Parallel).unwrap();
        machine.set_initial_state(root, p).unwrap();
        let r1 = machine.add_state(p, "R1").unwrap();
        let a = machine.add_state(r1, "a").unwrap();
        let f1 = machine.add_final_state(r1, "f1").unwrap();
        let r2 = machine.add_state(p, "R2").unwrap();
        let b = machine.add_state(r2, "b").unwrap();
        let f2 = machine.add_final_state(r2, "f2").unwrap();
        machine.set_initial_state(r1, a).unwrap();
        machine.set_initial_state(r2, b).unwrap();
        machine.add_transition(a, on(TestEvent::Go).to(f1)).unwrap();
        machine.add_transition(b, on(TestEvent::Next).to(f2)).unwrap();
        let recorder = Arc::new(Recorder::default());
        machine.add_state_listener(p, recorder.clone()).unwrap();
        machine.add_state_listener(r1, recorder.clone()).unwrap();
        machine.add_state_listener(r2, recorder.clone()).unwrap();
        machine.start().unwrap();
        recorder.take();

        machine.process_event(TestEvent::Go).unwrap();
        assert_eq!(recorder.take(), vec!["finished R1"]);
        machine.process_event(TestEvent::Next).unwrap();
        assert_eq!(recorder.take(), vec!["finished R2", "finished P"]);
    }

    /// Calls back into the machine from inside an entry notification.
    struct Reentrant {
        results: Mutex<Vec<MachineResult<()>>>,
    }

    impl StateListener<TestEvent> for Reentrant {
        fn on_entry(&self, machine: &StateMachine<TestEvent>, _state: StateId, params: &TransitionParams<'_, TestEvent>) {
            if !params.event.is_start() {
                self.results.lock().unwrap().push(machine.process_event(TestEvent::Back));
            }
        }
    }

    #[test]
    fn test_reentrant_event_goes_to_pending_handler() {
        let (machine, _, b) = two_states();
        let listener = Arc::new(Reentrant { results: Mutex::new(vec![]) });
        machine.add_state_listener(b, listener.clone()).unwrap();
        machine.start().unwrap();

        machine.process_event(TestEvent::Go).unwrap();
        assert_eq!(
            *listener.results.lock().unwrap(),
            vec![Err(MachineError::PendingEvent { event: "Back".to_string() })]);
        assert_eq!(machine.current_state(machine.root()), Some(b));
        assert!(!machine.is_processing());
    }

    #[test]
    fn test_tolerant_pending_handler_can_replay() {
        let queue = Arc::new(Mutex::new(vec![]));
        let queue_clone = queue.clone();
        let config = MachineConfig::default()
                .with_pending_event_handler(move |event: TestEvent, _argument| {
                    queue_clone.lock().unwrap().push(event);
                    Ok(())
                });
        let mut machine = StateMachine::with_config("Machine", config);
        let root = machine.root();
        let a = machine.add_state(root, "A").unwrap();
        let b = machine.add_state(root, "B").unwrap();
        machine.set_initial_state(root, a).unwrap();
        machine.add_transition(a, on(TestEvent::Go).to(b)).unwrap();
        machine.add_transition(b, on(TestEvent::Back).to(a)).unwrap();
        let listener = Arc::new(Reentrant { results: Mutex::new(vec![]) });
        machine.add_state_listener(b, listener.clone()).unwrap();
        machine.start().unwrap();

        machine.process_event(TestEvent::Go).unwrap();
        assert_eq!(*listener.results.lock().unwrap(), vec![Ok(())]);
        assert_eq!(machine.current_state(root), Some(b));

        let pending: Vec<TestEvent> = std::mem::take(&mut *queue.lock().unwrap());
        for event in pending {
            machine.process_event(event).unwrap();
        }
        assert_eq!(machine.current_state(root), Some(a));
    }

    /// Unregisters another listener the first time it is told about a transition.
    struct Remover {
        target: Arc<dyn MachineListener<TestEvent>>,
    }

    impl MachineListener<TestEvent> for Remover {
        fn on_transition(&self, machine: &StateMachine<TestEvent>, _params: &TransitionParams<'_, TestEvent>) {
            machine.remove_listener(&self.target);
        }
    }

    #[test]
    fn test_listener_removed_during_notification() {
        let (machine, _, _) = two_states();
        let recorder = Arc::new(Recorder::default());
        let target: Arc<dyn MachineListener<TestEvent>> = recorder.clone();
        machine.add_listener(Arc::new(Remover { target: target.clone() })).unwrap();
        machine.add_listener(target.clone()).unwrap();
        assert_eq!(machine.add_listener(target), Err(MachineError::DuplicateListener));
        machine.start().unwrap();
        recorder.take();

        machine.process_event(TestEvent::Go).unwrap();
        machine.process_event(TestEvent::Back).unwrap();
        assert_eq!(recorder.take(), vec!["transition go"]);
    }

    #[test]
    fn test_lifecycle_errors() {
        let (mut machine, a, b) = two_states();
        assert_eq!(machine.process_event(TestEvent::Go), Err(MachineError::NotStarted));

        let root = machine.root();
        assert_eq!(machine.add_child(root, a), Err(MachineError::StateAlreadyOwned { child: a, parent: root }));
        assert_eq!(machine.set_initial_state(a, b), Err(MachineError::NotAChild { parent: a, state: b }));

        machine.start().unwrap();
        assert_eq!(machine.start(), Err(MachineError::AlreadyStarted));
        assert_eq!(machine.add_state(root, "Late"), Err(MachineError::AlreadyStarted));
    }

    #[test]
    fn test_start_validates_tree() {
        let mut machine = StateMachine::<TestEvent>::new("Machine");
        let root = machine.root();
        let p = machine.add_state(root, "P").unwrap();
        machine.add_state(p, "A").unwrap();
        machine.set_initial_state(root, p).unwrap();
        assert_eq!(machine.start(), Err(MachineError::MissingInitialState(p)));

        let mut machine = StateMachine::<TestEvent>::new("Machine");
        let root = machine.root();
        let a = machine.add_state(root, "A").unwrap();
        machine.set_initial_state(root, a).unwrap();
        let loose = machine.create_state(Some("Loose")).unwrap();
        assert_eq!(machine.start(), Err(MachineError::DetachedState(loose)));
        assert!(!machine.is_started());

        machine.add_child(a, loose).unwrap();
        machine.set_initial_state(a, loose).unwrap();
        machine.start().unwrap();
        assert_eq!(names(&machine, &machine.active_states()), vec!["Machine", "A", "Loose"]);
    }

    #[test]
    fn test_final_and_pseudo_states_cannot_own_children() {
        let mut machine = StateMachine::<TestEvent>::new("Machine");
        let root = machine.root();
        let done = machine.add_final_state(root, "Done").unwrap();
        let count = machine.state_count();
        assert_eq!(machine.add_state(done, "Child"), Err(MachineError::PseudoStateChildren(done)));
        assert_eq!(machine.state_count(), count);
    }
}
