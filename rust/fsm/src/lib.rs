//! State Machine Compiler for Accord
//!
//! Compiles the transition statements of a protocol into a
//! deterministic validator, one per endpoint side. The declared
//! triggers name actions from the parent's point of view; compiling
//! for the child flips them, so the same declarative rule guards the
//! outgoing direction on one side and the incoming direction on the
//! other.
//!
//! The validator is consulted before every send and after every
//! receive. Both endpoints run it independently, so a desynchronized
//! peer is caught locally without trusting the wire.

mod machine;

pub use machine::{StateMachine, TransitionError};
