//! Full parent/child exchanges over a loopback pair.

use std::cell::RefCell;
use std::rc::Rc;

use accord::loopback::{loopback_pair, LoopbackTransport};
use accord::{
    ActorId, CompileUnit, DataType, DestroyReason, Direction, Endpoint, EndpointHandlers,
    FatalError, FieldDecl, HandlerError, MessageDecl, MessageRole, Param, PrimitiveType, Protocol,
    ProtocolTree, RegionKind, SendError, Semantics, Side, State, StructDecl, TransitionEdge,
    TransitionStmt, Trigger, TypeContext, Value,
};
use assert_matches::assert_matches;

#[derive(Clone, Default)]
struct Recorder {
    log: Rc<RefCell<Vec<String>>>,
    seen: Rc<RefCell<Vec<(String, Vec<Value>)>>>,
}

impl Recorder {
    fn log_contains(&self, needle: &str) -> bool {
        self.log.borrow().iter().any(|e| e == needle)
    }
}

impl EndpointHandlers for Recorder {
    fn recv(
        &mut self,
        _actor: ActorId,
        _protocol: &str,
        message: &str,
        params: Vec<Value>,
    ) -> Result<Vec<Value>, HandlerError> {
        self.seen.borrow_mut().push((message.to_string(), params));
        match message {
            "Describe" => Ok(vec![Value::Int(42)]),
            "CreateWorkerChecked" => Ok(vec![Value::Int(7)]),
            _ => Ok(vec![]),
        }
    }

    fn alloc(&mut self, protocol: &str, id: ActorId) -> bool {
        self.log.borrow_mut().push(format!("alloc {protocol} {id}"));
        true
    }

    fn dealloc(&mut self, protocol: &str, id: ActorId) {
        self.log
            .borrow_mut()
            .push(format!("dealloc {protocol} {id}"));
    }

    fn about_to_destroy(&mut self, id: ActorId, protocol: &str, reason: DestroyReason) {
        self.log
            .borrow_mut()
            .push(format!("destroy {protocol} {id} {reason:?}"));
    }
}

fn message(name: &str, direction: Direction, role: MessageRole) -> MessageDecl {
    MessageDecl {
        name: name.into(),
        direction,
        role,
        semantics: Semantics::Async,
        params: vec![],
        returns: vec![],
    }
}

/// A stateless toplevel managing one worker protocol, with a struct
/// parameter that carries an actor reference.
fn managed_unit() -> CompileUnit {
    let mut ctx = TypeContext::new();
    ctx.add_struct(StructDecl {
        name: "Task".into(),
        fields: vec![
            FieldDecl::new("label", DataType::Primitive(PrimitiveType::Str)),
            FieldDecl::new("worker", DataType::actor("Worker")),
        ],
    })
    .unwrap();

    let registry = Protocol {
        name: "Registry".into(),
        namespace: vec![],
        manager: None,
        manages: vec!["Worker".into()],
        messages: vec![
            message(
                "CreateWorker",
                Direction::Out,
                MessageRole::Constructor {
                    constructs: "Worker".into(),
                },
            ),
            {
                let mut m = message(
                    "CreateWorkerChecked",
                    Direction::Out,
                    MessageRole::Constructor {
                        constructs: "Worker".into(),
                    },
                );
                m.semantics = Semantics::Sync;
                m.returns = vec![Param::new("token", DataType::Primitive(PrimitiveType::Int))];
                m
            },
            {
                let mut m = message("Describe", Direction::Out, MessageRole::Regular);
                m.semantics = Semantics::Sync;
                m.params = vec![Param::new("who", DataType::Primitive(PrimitiveType::Str))];
                m.returns = vec![Param::new("count", DataType::Primitive(PrimitiveType::Int))];
                m
            },
            {
                let mut m = message("Assign", Direction::Out, MessageRole::Regular);
                m.params = vec![Param::new("task", DataType::Struct("Task".into()))];
                m
            },
        ],
        transitions: vec![],
        semantics: Semantics::Rpc,
        toplevel: true,
    };
    let worker = Protocol {
        name: "Worker".into(),
        namespace: vec![],
        manager: Some("Registry".into()),
        manages: vec![],
        messages: vec![
            message("Nudge", Direction::Out, MessageRole::Regular),
            message("__delete__", Direction::Out, MessageRole::Destructor),
        ],
        transitions: vec![],
        semantics: Semantics::Async,
        toplevel: false,
    };
    CompileUnit::new(ProtocolTree::new(vec![registry, worker]), ctx).unwrap()
}

/// Start --Send(Init)--> Running --Recv(Reset)--> Start, declared from
/// the parent's point of view.
fn stateful_unit() -> CompileUnit {
    let registry = Protocol {
        name: "Registry".into(),
        namespace: vec![],
        manager: None,
        manages: vec![],
        messages: vec![
            message("Init", Direction::Out, MessageRole::Regular),
            message("Reset", Direction::In, MessageRole::Regular),
        ],
        transitions: vec![
            TransitionStmt::new(
                State::Start,
                vec![TransitionEdge {
                    trigger: Trigger::send("Init"),
                    dest: State::named("Running"),
                }],
            ),
            TransitionStmt::new(
                State::named("Running"),
                vec![TransitionEdge {
                    trigger: Trigger::recv("Reset"),
                    dest: State::Start,
                }],
            ),
        ],
        semantics: Semantics::Async,
        toplevel: true,
    };
    CompileUnit::new(ProtocolTree::new(vec![registry]), TypeContext::new()).unwrap()
}

#[test]
fn constructor_identity_agrees_across_the_pair() {
    let child_rec = Recorder::default();
    let (parent, child) = loopback_pair(managed_unit(), Recorder::default(), child_rec.clone());

    let (worker, _) = parent
        .borrow_mut()
        .create_actor(ActorId::NULL, "CreateWorker", vec![])
        .unwrap();
    // The initiating side allocates ascending above the FREED
    // sentinel.
    assert_eq!(worker, ActorId(2));
    assert_eq!(child.borrow().actors().get(worker).unwrap().protocol, "Worker");
    assert!(child_rec.log_contains(&format!("alloc Worker {worker}")));
}

#[test]
fn blocking_constructor_returns_declared_reply_values() {
    let (parent, child) = loopback_pair(managed_unit(), Recorder::default(), Recorder::default());

    let (worker, returns) = parent
        .borrow_mut()
        .create_actor(ActorId::NULL, "CreateWorkerChecked", vec![])
        .unwrap();
    assert_eq!(worker, ActorId(2));
    // The acceptance flag is consumed; only the declared returns come
    // back to the caller.
    assert_eq!(returns, vec![Value::Int(7)]);
    assert_eq!(child.borrow().actors().get(worker).unwrap().protocol, "Worker");
}

#[test]
fn transmit_failure_destroys_the_half_created_actor() {
    let rec = Recorder::default();
    // Unconnected transport: every send fails after the actor has
    // already been registered locally.
    let mut ep = Endpoint::new(
        managed_unit(),
        Side::Parent,
        LoopbackTransport::new(),
        rec.clone(),
    );

    let err = ep
        .create_actor(ActorId::NULL, "CreateWorker", vec![])
        .unwrap_err();
    assert_matches!(err, SendError::Fatal(FatalError::Transport(_)));
    assert!(ep.actors().get(ActorId(2)).is_none());
    assert!(rec.log_contains(&format!("destroy Worker {} FailedConstructor", ActorId(2))));

    // The blocking arm tears down the same way; identities are never
    // reused, so the second attempt burns ActorId(3).
    let err = ep
        .create_actor(ActorId::NULL, "CreateWorkerChecked", vec![])
        .unwrap_err();
    assert_matches!(err, SendError::Fatal(FatalError::Transport(_)));
    assert!(ep.actors().get(ActorId(3)).is_none());
    assert!(ep.actors().get(ActorId::NULL).unwrap().managees().is_empty());
}

#[test]
fn sync_exchange_returns_declared_values() {
    let (parent, _child) = loopback_pair(managed_unit(), Recorder::default(), Recorder::default());
    let reply = parent
        .borrow_mut()
        .send(ActorId::NULL, "Describe", vec![Value::str("pool")])
        .unwrap();
    assert_eq!(reply, vec![Value::Int(42)]);
}

#[test]
fn actor_references_travel_by_identity() {
    let child_rec = Recorder::default();
    let (parent, _child) = loopback_pair(managed_unit(), Recorder::default(), child_rec.clone());

    let (worker, _) = parent
        .borrow_mut()
        .create_actor(ActorId::NULL, "CreateWorker", vec![])
        .unwrap();
    let task = Value::record([
        ("label", Value::str("build")),
        ("worker", Value::Actor(worker)),
    ]);
    parent
        .borrow_mut()
        .send(ActorId::NULL, "Assign", vec![task.clone()])
        .unwrap();

    let seen = child_rec.seen.borrow();
    let (name, params) = seen.last().unwrap();
    assert_eq!(name, "Assign");
    assert_eq!(params, &vec![task]);
}

#[test]
fn declared_ordering_is_enforced_on_the_sender() {
    let (parent, _child) = loopback_pair(stateful_unit(), Recorder::default(), Recorder::default());

    parent
        .borrow_mut()
        .send(ActorId::NULL, "Init", vec![])
        .unwrap();
    // Running has no edge for Init; the endpoint refuses to transmit.
    assert_matches!(
        parent.borrow_mut().send(ActorId::NULL, "Init", vec![]),
        Err(FatalError::Transition(_))
    );
}

#[test]
fn triggers_outside_the_declared_state_are_rejected() {
    let (_parent, child) = loopback_pair(stateful_unit(), Recorder::default(), Recorder::default());
    // Reset is only legal from Running; both endpoints start at Start.
    assert_matches!(
        child.borrow_mut().send(ActorId::NULL, "Reset", vec![]),
        Err(FatalError::Transition(_))
    );
}

#[test]
fn reset_round_trip_returns_both_sides_to_start() {
    let (parent, child) = loopback_pair(stateful_unit(), Recorder::default(), Recorder::default());
    parent
        .borrow_mut()
        .send(ActorId::NULL, "Init", vec![])
        .unwrap();
    child
        .borrow_mut()
        .send(ActorId::NULL, "Reset", vec![])
        .unwrap();
    // Legal again from Start.
    parent
        .borrow_mut()
        .send(ActorId::NULL, "Init", vec![])
        .unwrap();
}

#[test]
fn destructor_tears_down_both_sides() {
    let parent_rec = Recorder::default();
    let child_rec = Recorder::default();
    let (parent, child) = loopback_pair(managed_unit(), parent_rec.clone(), child_rec.clone());

    let (worker, _) = parent
        .borrow_mut()
        .create_actor(ActorId::NULL, "CreateWorker", vec![])
        .unwrap();
    parent.borrow_mut().destroy_actor(worker, vec![]).unwrap();

    assert!(parent.borrow().actors().get(worker).is_none());
    assert!(child.borrow().actors().get(worker).is_none());
    assert!(parent.borrow().actors().get(ActorId::NULL).unwrap().managees().is_empty());
    assert!(parent_rec.log_contains(&format!("destroy Worker {worker} Deletion")));
    assert!(child_rec.log_contains(&format!("dealloc Worker {worker}")));
}

#[test]
fn remote_destroy_clears_the_origin_registry_before_handle_release() {
    let (parent, child) = loopback_pair(managed_unit(), Recorder::default(), Recorder::default());

    let handle = parent
        .borrow_mut()
        .create_shmem(4096, RegionKind::Protected)
        .unwrap();
    let id = handle.id();
    // The create handshake mirrored the region on the peer.
    assert!(child.borrow().shmem_region(id).is_some());

    child.borrow_mut().destroy_shmem(id).unwrap();

    // The origin processed the unshare notice and dropped its
    // registry entry while the user handle is still alive.
    assert!(parent.borrow().shmem_region(id).is_none());
    assert_eq!(Rc::strong_count(&handle), 1);
    assert_eq!(handle.size(), 4096);
}

#[test]
fn messages_after_delete_are_routing_errors() {
    let (parent, child) = loopback_pair(managed_unit(), Recorder::default(), Recorder::default());
    let (worker, _) = parent
        .borrow_mut()
        .create_actor(ActorId::NULL, "CreateWorker", vec![])
        .unwrap();
    parent.borrow_mut().destroy_actor(worker, vec![]).unwrap();

    // The local table refuses immediately; nothing reaches the wire.
    assert_matches!(
        parent.borrow_mut().send(worker, "Nudge", vec![]),
        Err(FatalError::Lifecycle(_))
    );
    drop(child);
}
