//! # Statio - State Machines for Evented Protocol Code
//!
//! `statio` is the core building block of the statio workspace: a reusable,
//! nestable state-machine primitive plus the subscriber-list event type that
//! the higher layers (TCP/TLS transports, HTTP, XML, XMPP) are written
//! against.
//!
//! ## Core Concepts
//!
//! ### State Machine
//!
//! A [`StateMachine`] is configured once, before use, by declaring per-state
//! transitions, hierarchy and actions:
//!
//! - **Transitions** are `(trigger, destination)` pairs, optionally guarded by
//!   a predicate. For any fired trigger, at most one guard in a state may hold.
//! - **Hierarchy**: a state may be declared a sub-state of one or more
//!   super-states. Triggers undefined on the current state fall through to the
//!   super-states; transitions declared on the sub-state shadow inherited ones.
//! - **Actions**: entry and exit hooks run synchronously as part of the
//!   [`fire`](StateMachine::fire) that caused the transition, in
//!   exit → mutate → entry order.
//!
//! ### The Worklist
//!
//! Entry actions are where parsers live: an action consumes what it can from a
//! buffer and then requests the next trigger, over and over, until the buffer
//! cannot advance. Rather than re-entering `fire` recursively, actions push
//! follow-up triggers onto a [`Worklist`]; `fire` drains it iteratively, so
//! arbitrarily long trigger chains run in constant stack space.
//!
//! ```rust
//! use statio::StateMachine;
//!
//! #[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
//! enum State { Idle, Running }
//! #[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
//! enum Trigger { Start, Stop }
//!
//! struct Counter { starts: usize }
//!
//! let mut machine = StateMachine::new(State::Idle);
//! machine
//!     .configure(State::Idle)
//!     .permit(Trigger::Start, State::Running);
//! machine
//!     .configure(State::Running)
//!     .on_entry(|counter: &mut Counter, _fire| counter.starts += 1)
//!     .permit(Trigger::Stop, State::Idle);
//!
//! let mut counter = Counter { starts: 0 };
//! machine.fire(Trigger::Start, &mut counter).unwrap();
//! assert_eq!(machine.state(), State::Running);
//! assert_eq!(counter.starts, 1);
//! ```
//!
//! ### Event
//!
//! [`Event`] is an ordered list of handlers with value-style sharing: handles
//! are cheap clones of the same list, subscription returns a token for later
//! removal, and emission iterates a snapshot so handlers may subscribe or
//! unsubscribe mid-dispatch.
//!
//! ## Threading
//!
//! Everything here is single-threaded by design; state machines and events are
//! owned and driven from one cooperative event loop.

#![warn(rust_2018_idioms)]
#![warn(missing_docs)]

pub(crate) mod event;
pub(crate) mod machine;

pub use event::{Event, Subscription};
pub use machine::{MachineError, StateConfigurer, StateMachine, Worklist};
