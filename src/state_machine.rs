use std::{collections::HashMap, fmt::Debug, hash::Hash};

/// The event is not defined for the machine's current state. The machine
/// stays where it was; callers decide whether to log or count the event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("invalid event {event:?} at state {state:?}")]
pub struct InvalidTransition<S: Debug, K: Debug> {
    pub state: S,
    pub event: K,
}

/// A tagged transition descriptor: either one fixed target with an optional
/// effect, or a set of allowed targets resolved by a chooser. Effects and
/// choosers are plain fns so a whole table can live in a static.
pub enum Transition<S: 'static, C, E> {
    Single {
        target: S,
        effect: Option<fn(&mut C, &E)>,
    },
    Multiple {
        targets: &'static [S],
        chooser: fn(&mut C, &E) -> S,
    },
}

pub struct TransitionTable<S: 'static, K, C, E> {
    transitions: HashMap<(S, K), Transition<S, C, E>>,
}

pub struct TransitionTableBuilder<S: 'static, K, C, E> {
    transitions: HashMap<(S, K), Transition<S, C, E>>,
}

impl<S, K, C, E> TransitionTableBuilder<S, K, C, E>
where
    S: Copy + Eq + Hash + Debug,
    K: Copy + Eq + Hash + Debug,
{
    pub fn new() -> Self {
        Self {
            transitions: HashMap::new(),
        }
    }

    /// Arc with no effect.
    pub fn transition(self, from: S, to: S, on: K) -> Self {
        self.insert(from, on, Transition::Single {
            target: to,
            effect: None,
        })
    }

    /// Arc with an effect invoked before the state changes.
    pub fn transition_with(self, from: S, to: S, on: K, effect: fn(&mut C, &E)) -> Self {
        self.insert(from, on, Transition::Single {
            target: to,
            effect: Some(effect),
        })
    }

    /// Arc whose target is resolved by the chooser; the result must be one
    /// of `targets`.
    pub fn multi_transition(
        self,
        from: S,
        targets: &'static [S],
        on: K,
        chooser: fn(&mut C, &E) -> S,
    ) -> Self {
        self.insert(from, on, Transition::Multiple { targets, chooser })
    }

    /// Self-loops that swallow each listed event without any effect.
    pub fn absorb(mut self, state: S, events: &[K]) -> Self {
        for event in events {
            self = self.transition(state, state, *event);
        }
        self
    }

    pub fn build(self) -> TransitionTable<S, K, C, E> {
        TransitionTable {
            transitions: self.transitions,
        }
    }

    fn insert(mut self, from: S, on: K, transition: Transition<S, C, E>) -> Self {
        let replaced = self.transitions.insert((from, on), transition);
        assert!(
            replaced.is_none(),
            "duplicate transition for ({from:?}, {on:?})"
        );
        self
    }
}

impl<S, K, C, E> Default for TransitionTableBuilder<S, K, C, E>
where
    S: Copy + Eq + Hash + Debug,
    K: Copy + Eq + Hash + Debug,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<S, K, C, E> TransitionTable<S, K, C, E>
where
    S: Copy + Eq + Hash + Debug,
    K: Copy + Eq + Hash + Debug,
{
    /// Resolves the target state for `(from, kind)`, running the arc's
    /// effect or chooser against `ctx`. Undefined pairs and choosers that
    /// land outside their declared target set fail without changing
    /// anything.
    pub fn next(&self, from: S, kind: K, ctx: &mut C, event: &E) -> Result<S, InvalidTransition<S, K>> {
        match self.transitions.get(&(from, kind)) {
            None => Err(InvalidTransition {
                state: from,
                event: kind,
            }),
            Some(Transition::Single { target, effect }) => {
                if let Some(effect) = effect {
                    effect(ctx, event);
                }
                Ok(*target)
            }
            Some(Transition::Multiple { targets, chooser }) => {
                let target = chooser(ctx, event);
                if !targets.contains(&target) {
                    return Err(InvalidTransition {
                        state: from,
                        event: kind,
                    });
                }
                Ok(target)
            }
        }
    }

    pub fn defines(&self, from: S, kind: K) -> bool {
        self.transitions.contains_key(&(from, kind))
    }
}

/// Current-state holder over a shared transition table.
pub struct StateMachine<S: 'static, K: 'static, C: 'static, E: 'static> {
    table: &'static TransitionTable<S, K, C, E>,
    current: S,
}

impl<S, K, C, E> StateMachine<S, K, C, E>
where
    S: Copy + Eq + Hash + Debug,
    K: Copy + Eq + Hash + Debug,
{
    pub fn new(table: &'static TransitionTable<S, K, C, E>, initial: S) -> Self {
        Self {
            table,
            current: initial,
        }
    }

    pub fn current_state(&self) -> S {
        self.current
    }

    pub fn do_transition(
        &mut self,
        kind: K,
        ctx: &mut C,
        event: &E,
    ) -> Result<S, InvalidTransition<S, K>> {
        let next = self.table.next(self.current, kind, ctx, event)?;
        self.current = next;
        Ok(next)
    }
}
