//! Hierarchical state machine with guarded transitions and entry/exit actions.
//!
//! The machine is generic over three types: the state tag `S`, the trigger tag
//! `T` (both small `Copy` enums in practice) and the context `C`, the data the
//! actions operate on. Keeping the context outside the machine is what lets an
//! entry action mutate a parse buffer while the machine itself mediates the
//! transition.

use std::collections::{HashMap, VecDeque};
use std::fmt::Debug;
use std::hash::Hash;

use log::trace;
use thiserror::Error;

/// Errors raised by [`StateMachine::fire`].
///
/// Both variants indicate a configuration or sequencing bug in the caller, not
/// a runtime condition to recover from.
#[derive(Debug, Error)]
pub enum MachineError {
    /// The current state (and none of its super-states) permits the trigger.
    #[error("trigger {trigger} is undefined for state {state}")]
    UndefinedTrigger {
        /// The state the machine was in when the trigger was fired.
        state: String,
        /// The trigger that was fired.
        trigger: String,
    },

    /// More than one transition for the trigger had a satisfied guard, either
    /// within one state or across its super-states.
    #[error("trigger {trigger} permits multiple transitions from state {state}")]
    AmbiguousTransition {
        /// The state the machine was in when the trigger was fired.
        state: String,
        /// The trigger that was fired.
        trigger: String,
    },
}

/// Queue of follow-up triggers requested by entry/exit actions.
///
/// Actions receive a `&mut Worklist<T>` and call [`fire`](Worklist::fire) to
/// continue the machine once they return. [`StateMachine::fire`] drains the
/// queue in FIFO order, which reproduces the behavior of actions that re-enter
/// the machine recursively, without the unbounded stack.
pub struct Worklist<T> {
    queue: VecDeque<T>,
}

impl<T> Worklist<T> {
    fn new() -> Self {
        Self {
            queue: VecDeque::new(),
        }
    }

    /// Requests `trigger` to be fired after the current action returns.
    pub fn fire(&mut self, trigger: T) {
        self.queue.push_back(trigger);
    }
}

type Action<T, C> = Box<dyn FnMut(&mut C, &mut Worklist<T>)>;
type Guard<C> = Box<dyn Fn(&C) -> bool>;

struct Transition<S, C> {
    destination: S,
    guard: Option<Guard<C>>,
}

impl<S: Copy, C> Transition<S, C> {
    fn allowed(&self, ctx: &C) -> bool {
        match &self.guard {
            Some(guard) => guard(ctx),
            None => true,
        }
    }
}

/// Configuration of a single state: its super-states, its permitted
/// transitions and its entry/exit actions.
struct StateConfig<S, T, C> {
    parents: Vec<S>,
    transitions: Vec<(T, Transition<S, C>)>,
    entered: Option<Action<T, C>>,
    exited: Option<Action<T, C>>,
}

impl<S, T, C> Default for StateConfig<S, T, C> {
    fn default() -> Self {
        Self {
            parents: Vec::new(),
            transitions: Vec::new(),
            entered: None,
            exited: None,
        }
    }
}

/// A hierarchical state machine.
///
/// See the [crate documentation](crate) for an overview and example.
pub struct StateMachine<S, T, C> {
    state: S,
    configs: HashMap<S, StateConfig<S, T, C>>,
}

impl<S, T, C> StateMachine<S, T, C>
where
    S: Copy + Eq + Hash + Debug,
    T: Copy + Eq + Debug,
{
    /// Creates a machine in `initial` with no states configured.
    pub fn new(initial: S) -> Self {
        Self {
            state: initial,
            configs: HashMap::new(),
        }
    }

    /// The current state.
    pub fn state(&self) -> S {
        self.state
    }

    /// Begins (or resumes) configuring `state`.
    ///
    /// Configuration is expected to happen once, before the first
    /// [`fire`](Self::fire); the configuration map is not meant to be mutated
    /// on the hot path.
    pub fn configure(&mut self, state: S) -> StateConfigurer<'_, S, T, C> {
        self.configs.entry(state).or_default();
        StateConfigurer {
            machine: self,
            state,
        }
    }

    /// Whether firing `trigger` now would resolve to a transition.
    pub fn can_fire(&self, trigger: T, ctx: &C) -> bool {
        matches!(self.resolve(self.state, trigger, ctx), Ok(Some(_)))
    }

    /// Fires `trigger`, running the exit action of the source state, mutating
    /// the current state and running the entry action of the destination, then
    /// continues with any triggers the actions pushed onto the worklist.
    ///
    /// # Errors
    ///
    /// [`MachineError::UndefinedTrigger`] if no transition resolves,
    /// [`MachineError::AmbiguousTransition`] if more than one does. Both are
    /// programmer errors; the machine state is left at whatever point the
    /// drive had reached.
    pub fn fire(&mut self, trigger: T, ctx: &mut C) -> Result<(), MachineError> {
        let mut worklist = Worklist::new();
        worklist.fire(trigger);

        while let Some(trigger) = worklist.queue.pop_front() {
            let source = self.state;
            let destination = self.resolve(source, trigger, ctx)?.ok_or_else(|| {
                MachineError::UndefinedTrigger {
                    state: format!("{source:?}"),
                    trigger: format!("{trigger:?}"),
                }
            })?;

            if let Some(config) = self.configs.get_mut(&source) {
                if let Some(exited) = config.exited.as_mut() {
                    exited(ctx, &mut worklist);
                }
            }

            trace!("{source:?} --{trigger:?}--> {destination:?}");
            self.state = destination;

            if let Some(config) = self.configs.get_mut(&destination) {
                if let Some(entered) = config.entered.as_mut() {
                    entered(ctx, &mut worklist);
                }
            }
        }

        Ok(())
    }

    /// Resolves `trigger` from `state`: first among the state's own
    /// transitions, then (only if none matched) across its super-states.
    /// `Ok(None)` means the trigger is undefined along this chain.
    fn resolve(&self, state: S, trigger: T, ctx: &C) -> Result<Option<S>, MachineError> {
        let Some(config) = self.configs.get(&state) else {
            return Ok(None);
        };

        let mut destination = None;
        for (candidate, transition) in &config.transitions {
            if *candidate == trigger && transition.allowed(ctx) {
                if destination.is_some() {
                    return Err(MachineError::AmbiguousTransition {
                        state: format!("{state:?}"),
                        trigger: format!("{trigger:?}"),
                    });
                }
                destination = Some(transition.destination);
            }
        }
        if destination.is_some() {
            return Ok(destination);
        }

        for parent in &config.parents {
            if let Some(inherited) = self.resolve(*parent, trigger, ctx)? {
                if destination.is_some() {
                    return Err(MachineError::AmbiguousTransition {
                        state: format!("{state:?}"),
                        trigger: format!("{trigger:?}"),
                    });
                }
                destination = Some(inherited);
            }
        }
        Ok(destination)
    }

    /// Walks the super-state graph from `from`, returning true if `needle` is
    /// reachable.
    fn inherits_from(&self, from: S, needle: S) -> bool {
        if from == needle {
            return true;
        }
        match self.configs.get(&from) {
            Some(config) => config
                .parents
                .iter()
                .any(|parent| self.inherits_from(*parent, needle)),
            None => false,
        }
    }
}

/// Builder returned by [`StateMachine::configure`].
///
/// Methods chain by value, so a full state reads as one expression:
///
/// ```rust
/// # use statio::StateMachine;
/// # #[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
/// # enum S { A, B, C }
/// # #[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
/// # enum T { Go, Back }
/// # let mut machine: StateMachine<S, T, ()> = StateMachine::new(S::A);
/// machine
///     .configure(S::B)
///     .substate_of(S::A)
///     .on_entry(|_ctx, _fire| {})
///     .permit(T::Go, S::C)
///     .permit(T::Back, S::A);
/// ```
pub struct StateConfigurer<'a, S, T, C> {
    machine: &'a mut StateMachine<S, T, C>,
    state: S,
}

impl<S, T, C> StateConfigurer<'_, S, T, C>
where
    S: Copy + Eq + Hash + Debug,
    T: Copy + Eq + Debug,
{
    fn config(&mut self) -> &mut StateConfig<S, T, C> {
        self.machine
            .configs
            .get_mut(&self.state)
            .expect("configurer state is always present")
    }

    /// Permits an unconditional transition to `destination` on `trigger`.
    pub fn permit(mut self, trigger: T, destination: S) -> Self {
        self.config().transitions.push((
            trigger,
            Transition {
                destination,
                guard: None,
            },
        ));
        self
    }

    /// Permits a transition to `destination` on `trigger` only while `guard`
    /// holds. At most one guard per `(state, trigger)` pair may evaluate true
    /// at fire time.
    pub fn permit_if(
        mut self,
        trigger: T,
        destination: S,
        guard: impl Fn(&C) -> bool + 'static,
    ) -> Self {
        self.config().transitions.push((
            trigger,
            Transition {
                destination,
                guard: Some(Box::new(guard)),
            },
        ));
        self
    }

    /// Declares this state a sub-state of `parent`. Triggers not handled here
    /// fall through to `parent`; transitions declared here shadow inherited
    /// ones.
    ///
    /// # Panics
    ///
    /// Panics if the declaration would close a cycle in the hierarchy.
    pub fn substate_of(mut self, parent: S) -> Self {
        assert!(
            !self.machine.inherits_from(parent, self.state),
            "state {:?} cannot be a sub-state of {:?}: hierarchy cycle",
            self.state,
            parent,
        );
        let config = self.config();
        if !config.parents.contains(&parent) {
            config.parents.push(parent);
        }
        self
    }

    /// Sets the entry action, invoked after every transition into this state.
    pub fn on_entry(mut self, action: impl FnMut(&mut C, &mut Worklist<T>) + 'static) -> Self {
        self.config().entered = Some(Box::new(action));
        self
    }

    /// Sets the exit action, invoked before every transition out of this
    /// state.
    pub fn on_exit(mut self, action: impl FnMut(&mut C, &mut Worklist<T>) + 'static) -> Self {
        self.config().exited = Some(Box::new(action));
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
    enum State {
        Idle,
        Active,
        Burst,
        Closed,
    }

    #[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
    enum Trigger {
        Start,
        Tick,
        Stop,
    }

    #[derive(Default)]
    struct Log {
        entries: Vec<&'static str>,
        armed: bool,
    }

    fn machine() -> StateMachine<State, Trigger, Log> {
        StateMachine::new(State::Idle)
    }

    #[test]
    fn fire_runs_exit_then_entry() {
        let mut m = machine();
        m.configure(State::Idle)
            .on_exit(|log: &mut Log, _| log.entries.push("exit-idle"))
            .permit(Trigger::Start, State::Active);
        m.configure(State::Active)
            .on_entry(|log: &mut Log, _| log.entries.push("enter-active"));

        let mut log = Log::default();
        m.fire(Trigger::Start, &mut log).unwrap();
        assert_eq!(log.entries, ["exit-idle", "enter-active"]);
        assert_eq!(m.state(), State::Active);
    }

    #[test]
    fn undefined_trigger_is_an_error() {
        let mut m = machine();
        m.configure(State::Idle).permit(Trigger::Start, State::Active);

        let mut log = Log::default();
        assert!(matches!(
            m.fire(Trigger::Stop, &mut log),
            Err(MachineError::UndefinedTrigger { .. })
        ));
    }

    #[test]
    fn two_satisfied_guards_are_ambiguous() {
        let mut m = machine();
        m.configure(State::Idle)
            .permit_if(Trigger::Start, State::Active, |_| true)
            .permit_if(Trigger::Start, State::Closed, |_| true);

        let mut log = Log::default();
        assert!(matches!(
            m.fire(Trigger::Start, &mut log),
            Err(MachineError::AmbiguousTransition { .. })
        ));
    }

    #[test]
    fn false_guard_hides_its_transition() {
        let mut m = machine();
        m.configure(State::Idle)
            .permit_if(Trigger::Start, State::Active, |log: &Log| log.armed)
            .permit_if(Trigger::Start, State::Closed, |log: &Log| !log.armed);

        let mut log = Log::default();
        m.fire(Trigger::Start, &mut log).unwrap();
        assert_eq!(m.state(), State::Closed);
    }

    #[test]
    fn substate_inherits_super_state_transitions() {
        let mut m = machine();
        m.configure(State::Idle).permit(Trigger::Start, State::Burst);
        m.configure(State::Active).permit(Trigger::Stop, State::Closed);
        m.configure(State::Burst).substate_of(State::Active);

        let mut log = Log::default();
        m.fire(Trigger::Start, &mut log).unwrap();
        m.fire(Trigger::Stop, &mut log).unwrap();
        assert_eq!(m.state(), State::Closed);
    }

    #[test]
    fn substate_transition_shadows_super_state() {
        let mut m = machine();
        m.configure(State::Idle).permit(Trigger::Start, State::Burst);
        m.configure(State::Active).permit(Trigger::Tick, State::Closed);
        m.configure(State::Burst)
            .substate_of(State::Active)
            .permit(Trigger::Tick, State::Idle);

        let mut log = Log::default();
        m.fire(Trigger::Start, &mut log).unwrap();
        m.fire(Trigger::Tick, &mut log).unwrap();
        assert_eq!(m.state(), State::Idle);
    }

    #[test]
    fn worklist_triggers_run_in_order() {
        let mut m = machine();
        m.configure(State::Idle).permit(Trigger::Start, State::Active);
        m.configure(State::Active)
            .on_entry(|log: &mut Log, fire| {
                log.entries.push("enter-active");
                fire.fire(Trigger::Tick);
            })
            .permit(Trigger::Tick, State::Burst);
        m.configure(State::Burst)
            .on_entry(|log: &mut Log, _| log.entries.push("enter-burst"));

        let mut log = Log::default();
        m.fire(Trigger::Start, &mut log).unwrap();
        assert_eq!(log.entries, ["enter-active", "enter-burst"]);
        assert_eq!(m.state(), State::Burst);
    }

    #[test]
    fn self_loop_reenters_entry_action() {
        let mut m = machine();
        m.configure(State::Idle).permit(Trigger::Start, State::Active);
        m.configure(State::Active)
            .on_entry(|log: &mut Log, fire| {
                log.entries.push("tick");
                if log.entries.len() < 3 {
                    fire.fire(Trigger::Tick);
                }
            })
            .permit(Trigger::Tick, State::Active);

        let mut log = Log::default();
        m.fire(Trigger::Start, &mut log).unwrap();
        assert_eq!(log.entries, ["tick", "tick", "tick"]);
    }

    #[test]
    #[should_panic(expected = "hierarchy cycle")]
    fn hierarchy_cycles_are_refused() {
        let mut m = machine();
        m.configure(State::Active).substate_of(State::Burst);
        m.configure(State::Burst).substate_of(State::Active);
    }
}
