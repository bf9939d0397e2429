//! Protocol declarations and the protocol tree.
//!
//! A protocol describes one actor type: its messages, its legal message
//! orderings, and its place in the manager/managee ownership tree. The
//! decorated output of the front end arrives here already type-checked;
//! [`ProtocolTree::validate`] re-establishes the structural invariants
//! this stage depends on rather than trusting the producer.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{DataType, Side, State, TransitionStmt};

/// Escalating blocking levels for a message exchange.
///
/// The derived ordering is meaningful: a toplevel protocol's tier bounds
/// the tiers of every message in its tree.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
pub enum Semantics {
    /// Fire-and-forget; never blocks.
    #[default]
    Async,
    /// Blocks the caller until the matching reply.
    Sync,
    /// Blocks, but permits bounded reentrant processing of incoming
    /// calls while awaiting the reply.
    Rpc,
}

/// Which endpoint side may transmit a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Direction {
    /// Delivered to the parent side (the child transmits).
    In,
    /// Delivered to the child side (the parent transmits).
    Out,
    /// Either side may transmit.
    InOut,
}

/// The lifecycle role of a message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum MessageRole {
    /// An ordinary message.
    Regular,
    /// Creates an actor of the named managee protocol. Carries an
    /// implicit leading parameter: the handle of the actor being
    /// created.
    Constructor {
        /// The managee protocol this constructor instantiates.
        constructs: String,
    },
    /// Destroys the actor it is routed to.
    Destructor,
}

/// A declared message parameter or return value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Param {
    /// Parameter name.
    pub name: String,
    /// Parameter type.
    pub ty: DataType,
}

impl Param {
    /// Build a parameter declaration.
    #[must_use]
    pub fn new(name: impl Into<String>, ty: DataType) -> Self {
        Param {
            name: name.into(),
            ty,
        }
    }
}

/// A declared message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageDecl {
    /// Message name, unique within its protocol.
    pub name: String,
    /// Which side transmits.
    pub direction: Direction,
    /// Lifecycle role.
    pub role: MessageRole,
    /// Blocking tier.
    pub semantics: Semantics,
    /// Ordered input parameters.
    pub params: Vec<Param>,
    /// Ordered reply parameters; non-empty only for blocking tiers.
    pub returns: Vec<Param>,
}

impl MessageDecl {
    /// True iff `side` may transmit this message.
    #[must_use]
    pub fn sent_by(&self, side: Side) -> bool {
        match (self.direction, side) {
            (Direction::InOut, _) => true,
            (Direction::In, Side::Child) | (Direction::Out, Side::Parent) => true,
            _ => false,
        }
    }

    /// True iff `side` may receive this message.
    #[must_use]
    pub fn received_by(&self, side: Side) -> bool {
        self.sent_by(side.other())
    }

    /// True iff a reply payload is declared.
    #[must_use]
    pub fn has_reply(&self) -> bool {
        !self.returns.is_empty()
    }
}

/// One actor protocol within a tree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Protocol {
    /// Protocol name, unique within the tree.
    pub name: String,
    /// Namespace path the front end declared, outermost first.
    pub namespace: Vec<String>,
    /// Name of the managing protocol; `None` only for the toplevel.
    pub manager: Option<String>,
    /// Names of the protocols this one manages.
    pub manages: Vec<String>,
    /// Ordered message declarations.
    pub messages: Vec<MessageDecl>,
    /// Ordered transition statements.
    pub transitions: Vec<TransitionStmt>,
    /// This protocol's send-semantics tier.
    pub semantics: Semantics,
    /// Whether this protocol roots the tree.
    pub toplevel: bool,
}

impl Protocol {
    /// Look up a declared message by name.
    #[must_use]
    pub fn message(&self, name: &str) -> Option<&MessageDecl> {
        self.messages.iter().find(|m| m.name == name)
    }

    /// The declared destructor, if any.
    #[must_use]
    pub fn destructor(&self) -> Option<&MessageDecl> {
        self.messages
            .iter()
            .find(|m| matches!(m.role, MessageRole::Destructor))
    }
}

/// Structural defects detected by [`ProtocolTree::validate`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ModelError {
    /// The tree has no toplevel, or more than one.
    #[error("protocol tree must have exactly one toplevel, found {0}")]
    ToplevelCount(usize),
    /// Two protocols share a name.
    #[error("duplicate protocol `{0}`")]
    DuplicateProtocol(String),
    /// A non-toplevel protocol lacks a manager.
    #[error("protocol `{0}` has no manager and is not toplevel")]
    Unmanaged(String),
    /// The toplevel declared a manager.
    #[error("toplevel protocol `{0}` must not declare a manager")]
    ManagedToplevel(String),
    /// A manager or managee edge names an unknown protocol.
    #[error("protocol `{0}` references unknown protocol `{1}`")]
    UnknownProtocol(String, String),
    /// Manager/managee edges disagree.
    #[error("protocol `{0}` names `{1}` as manager, but `{1}` does not manage it")]
    UnlinkedManager(String, String),
    /// A manager chain loops without reaching the toplevel.
    #[error("manager cycle through protocol `{0}`")]
    ManagerCycle(String),
    /// Two messages in one protocol share a name.
    #[error("duplicate message `{1}` in protocol `{0}`")]
    DuplicateMessage(String, String),
    /// A constructor names a protocol its owner does not manage.
    #[error("constructor `{1}` in `{0}` constructs unmanaged protocol `{2}`")]
    ConstructsUnmanaged(String, String, String),
    /// A non-blocking message declared reply parameters.
    #[error("async message `{1}` in `{0}` declares reply parameters")]
    AsyncReply(String, String),
    /// A message exceeds the toplevel's semantics tier.
    #[error("message `{1}` in `{0}` exceeds the toplevel semantics tier")]
    TierExceeded(String, String),
    /// An array directly contains another array.
    #[error("directly nested array in `{0}`")]
    NestedArray(String),
    /// A transition references an unknown message.
    #[error("transition in `{0}` references unknown message `{1}`")]
    UnknownTriggerMessage(String, String),
    /// A transition is declared from a built-in sink state.
    #[error("transition in `{0}` declared from built-in state `{1}`")]
    TransitionFromBuiltin(String, State),
    /// A transition targets a built-in entry state.
    #[error("transition in `{0}` targets built-in state `{1}`")]
    TransitionToBuiltin(String, State),
}

/// A complete, decorated protocol tree as produced by the front end.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct ProtocolTree {
    /// Protocols in declaration order; order fixes message tags.
    pub protocols: Vec<Protocol>,
}

impl ProtocolTree {
    /// Build a tree from protocols in declaration order.
    #[must_use]
    pub fn new(protocols: Vec<Protocol>) -> Self {
        ProtocolTree { protocols }
    }

    /// Look up a protocol by name.
    #[must_use]
    pub fn protocol(&self, name: &str) -> Option<&Protocol> {
        self.protocols.iter().find(|p| p.name == name)
    }

    /// The toplevel protocol. Call [`Self::validate`] first; an
    /// unvalidated tree may have none.
    #[must_use]
    pub fn toplevel(&self) -> Option<&Protocol> {
        self.protocols.iter().find(|p| p.toplevel)
    }

    /// Check the structural invariants of the tree.
    ///
    /// # Errors
    ///
    /// Returns the first [`ModelError`] found: toplevel uniqueness,
    /// manager edge consistency, manager-cycle rejection (immediate
    /// self-management is legal), message name uniqueness, tier bounds,
    /// array nesting, and transition well-formedness.
    pub fn validate(&self) -> Result<(), ModelError> {
        let toplevels = self.protocols.iter().filter(|p| p.toplevel).count();
        if toplevels != 1 {
            return Err(ModelError::ToplevelCount(toplevels));
        }

        let mut names = BTreeSet::new();
        for p in &self.protocols {
            if !names.insert(p.name.as_str()) {
                return Err(ModelError::DuplicateProtocol(p.name.clone()));
            }
        }

        for p in &self.protocols {
            self.validate_edges(p)?;
            self.validate_messages(p)?;
            self.validate_transitions(p)?;
        }

        for p in &self.protocols {
            self.validate_manager_chain(p)?;
        }

        Ok(())
    }

    fn validate_edges(&self, p: &Protocol) -> Result<(), ModelError> {
        match (&p.manager, p.toplevel) {
            (Some(_), true) => return Err(ModelError::ManagedToplevel(p.name.clone())),
            (None, false) => return Err(ModelError::Unmanaged(p.name.clone())),
            _ => {}
        }
        if let Some(mgr) = &p.manager {
            let mgr = self
                .protocol(mgr)
                .ok_or_else(|| ModelError::UnknownProtocol(p.name.clone(), mgr.clone()))?;
            if !mgr.manages.iter().any(|m| *m == p.name) {
                return Err(ModelError::UnlinkedManager(p.name.clone(), mgr.name.clone()));
            }
        }
        for m in &p.manages {
            if self.protocol(m).is_none() {
                return Err(ModelError::UnknownProtocol(p.name.clone(), m.clone()));
            }
        }
        Ok(())
    }

    fn validate_manager_chain(&self, p: &Protocol) -> Result<(), ModelError> {
        // Follow manager edges; a self-edge terminates legally, any
        // wider loop is a cycle.
        let mut seen = BTreeSet::new();
        let mut cur = p;
        while let Some(mgr) = &cur.manager {
            if *mgr == cur.name {
                return Ok(());
            }
            if !seen.insert(cur.name.clone()) {
                return Err(ModelError::ManagerCycle(p.name.clone()));
            }
            cur = self
                .protocol(mgr)
                .ok_or_else(|| ModelError::UnknownProtocol(cur.name.clone(), mgr.clone()))?;
        }
        Ok(())
    }

    fn validate_messages(&self, p: &Protocol) -> Result<(), ModelError> {
        let tier_bound = self.toplevel().map(|t| t.semantics).unwrap_or(Semantics::Rpc);
        let mut names = BTreeSet::new();
        for md in &p.messages {
            if !names.insert(md.name.as_str()) {
                return Err(ModelError::DuplicateMessage(p.name.clone(), md.name.clone()));
            }
            if md.semantics == Semantics::Async && md.has_reply() {
                return Err(ModelError::AsyncReply(p.name.clone(), md.name.clone()));
            }
            if md.semantics > tier_bound {
                return Err(ModelError::TierExceeded(p.name.clone(), md.name.clone()));
            }
            if let MessageRole::Constructor { constructs } = &md.role {
                if !p.manages.iter().any(|m| m == constructs) {
                    return Err(ModelError::ConstructsUnmanaged(
                        p.name.clone(),
                        md.name.clone(),
                        constructs.clone(),
                    ));
                }
            }
            for param in md.params.iter().chain(&md.returns) {
                if let DataType::Array(elem) = &param.ty {
                    if matches!(**elem, DataType::Array(_)) {
                        return Err(ModelError::NestedArray(param.name.clone()));
                    }
                }
            }
        }
        Ok(())
    }

    fn validate_transitions(&self, p: &Protocol) -> Result<(), ModelError> {
        for ts in &p.transitions {
            if matches!(ts.from, State::Null | State::Error | State::Dead) {
                return Err(ModelError::TransitionFromBuiltin(
                    p.name.clone(),
                    ts.from.clone(),
                ));
            }
            for edge in &ts.edges {
                if p.message(&edge.trigger.message).is_none() {
                    return Err(ModelError::UnknownTriggerMessage(
                        p.name.clone(),
                        edge.trigger.message.clone(),
                    ));
                }
                if matches!(edge.dest, State::Null | State::Error) {
                    return Err(ModelError::TransitionToBuiltin(
                        p.name.clone(),
                        edge.dest.clone(),
                    ));
                }
            }
        }
        Ok(())
    }
}

/// Numeric identity of a message kind on the wire.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct MessageTag(pub u32);

impl std::fmt::Display for MessageTag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// First tag available to declared messages. Tags below this are
/// reserved for out-of-band traffic such as the shared-memory
/// create/destroy handshake.
pub const FIRST_PROTOCOL_TAG: u32 = 16;

/// Bidirectional map between declared messages and wire tags.
///
/// Tags are assigned densely in declaration order across the whole
/// tree, so both endpoints derive identical numbering from the same
/// model without negotiation.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TagMap {
    forward: BTreeMap<(String, String), MessageTag>,
    reverse: BTreeMap<MessageTag, (String, String)>,
}

impl TagMap {
    /// Assign tags for every message in the tree.
    #[must_use]
    pub fn build(tree: &ProtocolTree) -> TagMap {
        let mut forward = BTreeMap::new();
        let mut reverse = BTreeMap::new();
        let mut next = FIRST_PROTOCOL_TAG;
        for p in &tree.protocols {
            for md in &p.messages {
                let tag = MessageTag(next);
                next += 1;
                forward.insert((p.name.clone(), md.name.clone()), tag);
                reverse.insert(tag, (p.name.clone(), md.name.clone()));
            }
        }
        TagMap { forward, reverse }
    }

    /// The tag of `message` in `protocol`.
    #[must_use]
    pub fn tag(&self, protocol: &str, message: &str) -> Option<MessageTag> {
        self.forward
            .get(&(protocol.to_string(), message.to_string()))
            .copied()
    }

    /// The (protocol, message) pair a tag names.
    #[must_use]
    pub fn decl(&self, tag: MessageTag) -> Option<(&str, &str)> {
        self.reverse
            .get(&tag)
            .map(|(p, m)| (p.as_str(), m.as_str()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{PrimitiveType, TransitionEdge, Trigger};
    use assert_matches::assert_matches;

    fn msg(name: &str) -> MessageDecl {
        MessageDecl {
            name: name.into(),
            direction: Direction::Out,
            role: MessageRole::Regular,
            semantics: Semantics::Async,
            params: vec![],
            returns: vec![],
        }
    }

    fn toplevel(name: &str) -> Protocol {
        Protocol {
            name: name.into(),
            namespace: vec!["accord".into(), "test".into()],
            manager: None,
            manages: vec![],
            messages: vec![],
            transitions: vec![],
            semantics: Semantics::Rpc,
            toplevel: true,
        }
    }

    fn managed(name: &str, manager: &str) -> Protocol {
        Protocol {
            name: name.into(),
            namespace: vec![],
            manager: Some(manager.into()),
            manages: vec![],
            messages: vec![],
            transitions: vec![],
            semantics: Semantics::Async,
            toplevel: false,
        }
    }

    #[test]
    fn exactly_one_toplevel_required() {
        let tree = ProtocolTree::new(vec![]);
        assert_matches!(tree.validate(), Err(ModelError::ToplevelCount(0)));

        let tree = ProtocolTree::new(vec![toplevel("A"), toplevel("B")]);
        assert_matches!(tree.validate(), Err(ModelError::ToplevelCount(2)));
    }

    #[test]
    fn manager_edges_must_be_mutual() {
        let mut top = toplevel("Top");
        top.manages.push("Kid".into());
        let tree = ProtocolTree::new(vec![top, managed("Kid", "Top")]);
        assert_eq!(tree.validate(), Ok(()));

        let tree = ProtocolTree::new(vec![toplevel("Top"), managed("Kid", "Top")]);
        assert_matches!(tree.validate(), Err(ModelError::UnlinkedManager(_, _)));
    }

    #[test]
    fn manager_cycles_are_rejected_but_self_management_is_not() {
        let mut top = toplevel("Top");
        top.manages.push("A".into());
        let mut a = managed("A", "Top");
        a.manages.push("A".into());
        let tree = ProtocolTree::new(vec![top, a]);
        assert_eq!(tree.validate(), Ok(()));

        let mut top = toplevel("Top");
        top.manages.push("A".into());
        let mut a = managed("A", "B");
        a.manages.push("B".into());
        let mut b = managed("B", "A");
        b.manages.push("A".into());
        let tree = ProtocolTree::new(vec![top, a, b]);
        assert_matches!(tree.validate(), Err(ModelError::ManagerCycle(_)));
    }

    #[test]
    fn async_messages_cannot_declare_replies() {
        let mut top = toplevel("Top");
        let mut m = msg("Ping");
        m.returns
            .push(Param::new("pong", DataType::Primitive(PrimitiveType::Int)));
        top.messages.push(m);
        let tree = ProtocolTree::new(vec![top]);
        assert_matches!(tree.validate(), Err(ModelError::AsyncReply(_, _)));
    }

    #[test]
    fn tier_bound_follows_the_toplevel() {
        let mut top = toplevel("Top");
        top.semantics = Semantics::Async;
        let mut m = msg("Call");
        m.semantics = Semantics::Sync;
        m.returns
            .push(Param::new("r", DataType::Primitive(PrimitiveType::Bool)));
        top.messages.push(m);
        let tree = ProtocolTree::new(vec![top]);
        assert_matches!(tree.validate(), Err(ModelError::TierExceeded(_, _)));
    }

    #[test]
    fn transitions_must_reference_declared_messages() {
        let mut top = toplevel("Top");
        top.messages.push(msg("Init"));
        top.transitions.push(TransitionStmt::new(
            State::Start,
            vec![TransitionEdge {
                trigger: Trigger::send("Missing"),
                dest: State::named("Running"),
            }],
        ));
        let tree = ProtocolTree::new(vec![top]);
        assert_matches!(tree.validate(), Err(ModelError::UnknownTriggerMessage(_, _)));
    }

    #[test]
    fn tags_are_dense_and_reversible() {
        let mut top = toplevel("Top");
        top.messages.push(msg("A"));
        top.messages.push(msg("B"));
        let tree = ProtocolTree::new(vec![top]);
        let tags = TagMap::build(&tree);

        let a = tags.tag("Top", "A").unwrap();
        let b = tags.tag("Top", "B").unwrap();
        assert_eq!(a.0, FIRST_PROTOCOL_TAG);
        assert_eq!(b.0, FIRST_PROTOCOL_TAG + 1);
        assert_eq!(tags.decl(a), Some(("Top", "A")));
        assert_eq!(tags.decl(MessageTag(2)), None);
    }

    #[test]
    fn direction_controls_which_side_sends() {
        let mut m = msg("Note");
        m.direction = Direction::In;
        assert!(m.sent_by(Side::Child));
        assert!(!m.sent_by(Side::Parent));
        assert!(m.received_by(Side::Parent));

        m.direction = Direction::InOut;
        assert!(m.sent_by(Side::Parent) && m.sent_by(Side::Child));
    }
}
