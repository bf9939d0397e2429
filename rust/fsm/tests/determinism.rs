//! The compiled validator is a pure function of (state, trigger):
//! replaying any trigger sequence yields identical outcomes, and an
//! actor that reaches Dead stays unusable forever.

use accord_types::{
    Action, Direction, MessageDecl, MessageRole, Protocol, Semantics, Side, State, TransitionEdge,
    TransitionStmt, Trigger,
};
use accord_fsm::{StateMachine, TransitionError};
use proptest::prelude::*;

fn sample_protocol() -> Protocol {
    let msg = |name: &str| MessageDecl {
        name: name.into(),
        direction: Direction::InOut,
        role: MessageRole::Regular,
        semantics: Semantics::Async,
        params: vec![],
        returns: vec![],
    };
    Protocol {
        name: "Sample".into(),
        namespace: vec![],
        manager: None,
        manages: vec![],
        messages: vec![msg("A"), msg("B"), msg("C")],
        transitions: vec![
            TransitionStmt::new(
                State::Start,
                vec![
                    TransitionEdge {
                        trigger: Trigger::send("A"),
                        dest: State::named("Mid"),
                    },
                    TransitionEdge {
                        trigger: Trigger::recv("B"),
                        dest: State::Start,
                    },
                ],
            ),
            TransitionStmt::new(
                State::named("Mid"),
                vec![
                    TransitionEdge {
                        trigger: Trigger::recv("C"),
                        dest: State::Start,
                    },
                    TransitionEdge {
                        trigger: Trigger::send("B"),
                        dest: State::named("Mid"),
                    },
                ],
            ),
        ],
        semantics: Semantics::Async,
        toplevel: true,
    }
}

fn trigger_strategy() -> impl Strategy<Value = (Action, &'static str)> {
    (
        prop_oneof![Just(Action::Send), Just(Action::Recv)],
        prop_oneof![Just("A"), Just("B"), Just("C")],
    )
}

proptest! {
    #[test]
    fn replay_is_deterministic(seq in proptest::collection::vec(trigger_strategy(), 0..32)) {
        let m = StateMachine::compile(&sample_protocol(), Side::Parent);
        let run = |m: &StateMachine| {
            let mut state = m.initial();
            let mut outcomes = Vec::new();
            for (action, message) in &seq {
                match m.apply(&state, *action, message) {
                    Ok(next) => {
                        outcomes.push(Ok(next.clone()));
                        state = next;
                    }
                    Err(e) => {
                        outcomes.push(Err(e));
                        // A rejection parks the actor in Error.
                        state = State::Error;
                    }
                }
            }
            outcomes
        };
        prop_assert_eq!(run(&m), run(&m));
    }

    #[test]
    fn error_state_admits_nothing(seq in proptest::collection::vec(trigger_strategy(), 1..8)) {
        let m = StateMachine::compile(&sample_protocol(), Side::Parent);
        for (action, message) in &seq {
            prop_assert!(
                matches!(
                    m.apply(&State::Error, *action, message),
                    Err(TransitionError::Rejected { .. })
                ),
                "expected Rejected for {:?} {}",
                action,
                message
            );
        }
    }
}
