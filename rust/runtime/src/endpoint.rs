//! Per-endpoint assembly of the whole runtime.
//!
//! One [`Endpoint`] is one side of one toplevel protocol tree. It owns
//! the actor table, the shared-memory broker, one compiled state
//! machine per protocol, and the transport, and exposes the typed
//! entry points: plain sends, the constructor/destructor choreography,
//! shared-memory management, and inbound dispatch.
//!
//! Incoming traffic whose routing identity does not address the
//! toplevel is resolved through the actor table to the addressed
//! descendant and validated against *that* actor's machine; nothing is
//! ever handled on the toplevel's behalf by accident.

use std::collections::BTreeMap;
use std::rc::Rc;

use tracing::{debug, warn};

use accord_fsm::{StateMachine, TransitionError};
use accord_types::{CompileUnit, MessageDecl, MessageRole, Param, Semantics, Side, State, TagMap};

use crate::actor::{ActorEntry, ActorId, ActorTable, DestroyReason};
use crate::codec::{Codec, CodecError};
use crate::error::{DispatchOutcome, FatalError, SendError};
use crate::hooks::EndpointHandlers;
use crate::shmem::{RegionKind, SharedRegion, ShmemBroker, ShmemError, ShmemId};
use crate::transport::{MessageSink, Transport, TransportError};
use crate::value::Value;
use crate::wire::{WireMessage, SHMEM_CREATED_TAG, SHMEM_DESTROYED_TAG};

/// One side of a toplevel protocol tree, fully assembled.
pub struct Endpoint<T, H> {
    side: Side,
    unit: CompileUnit,
    tags: TagMap,
    machines: BTreeMap<String, StateMachine>,
    actors: ActorTable,
    shmem: ShmemBroker,
    transport: T,
    handlers: H,
}

impl<T: Transport, H: EndpointHandlers> Endpoint<T, H> {
    /// Assemble an endpoint for `side` of a validated compile unit.
    /// The toplevel actor is registered immediately under
    /// [`ActorId::NULL`].
    #[must_use]
    pub fn new(unit: CompileUnit, side: Side, transport: T, handlers: H) -> Self {
        let tags = TagMap::build(unit.tree());
        let machines: BTreeMap<String, StateMachine> = unit
            .tree()
            .protocols
            .iter()
            .map(|p| (p.name.clone(), StateMachine::compile(p, side)))
            .collect();
        let mut actors = ActorTable::new(side);
        if let Some(top) = unit.tree().toplevel() {
            let state = machines[&top.name].initial();
            // The table is empty; NULL cannot be occupied.
            let _ = actors.insert(ActorEntry::new(ActorId::NULL, &top.name, None, state));
        }
        Endpoint {
            side,
            unit,
            tags,
            machines,
            actors,
            shmem: ShmemBroker::new(side),
            transport,
            handlers,
        }
    }

    /// This endpoint's side.
    #[must_use]
    pub fn side(&self) -> Side {
        self.side
    }

    /// The actor table, for inspection.
    #[must_use]
    pub fn actors(&self) -> &ActorTable {
        &self.actors
    }

    /// The registered region for a shared-memory id, if any.
    #[must_use]
    pub fn shmem_region(&self, id: ShmemId) -> Option<Rc<SharedRegion>> {
        self.shmem.get(id)
    }

    /// Mutable access to the transport, for wiring it up after
    /// construction.
    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    /// Send a plain declared message on `actor` and, for blocking
    /// tiers, return the decoded reply values.
    ///
    /// # Errors
    ///
    /// Fatal on direction violations, transition rejections, encoding
    /// failures, and transport failures.
    pub fn send(
        &mut self,
        actor: ActorId,
        message: &str,
        values: Vec<Value>,
    ) -> Result<Vec<Value>, FatalError> {
        let entry = self.actors.lookup(actor)?.clone();
        let decl = self.find_decl(&entry.protocol, message)?;
        if !matches!(decl.role, MessageRole::Regular) {
            return Err(FatalError::WrongEntryPoint {
                message: message.to_string(),
            });
        }
        self.check_sendable(&entry.protocol, &decl)?;
        self.advance_on_send(actor, &entry.protocol, &entry.state, message)?;

        let payload = self.encode(&decl.params, &values)?;
        let tag = self
            .tags
            .tag(&entry.protocol, message)
            .ok_or_else(|| FatalError::UnknownDecl(message.to_string()))?;
        let msg = WireMessage {
            routing: actor,
            tag,
            semantics: decl.semantics,
            is_reply: false,
            payload,
        };
        debug!(%actor, message, "send");
        match decl.semantics {
            Semantics::Async => {
                self.transport.send_async(msg)?;
                Ok(Vec::new())
            }
            Semantics::Sync | Semantics::Rpc => {
                let reply = self.send_blocking(msg, message)?;
                Ok(self.decode(&decl.returns, &reply.payload)?)
            }
        }
    }

    /// Send a constructor on `manager`, creating an actor of the
    /// constructed protocol. Returns the new actor's identity, which
    /// both endpoints register, and for blocking tiers the decoded
    /// reply values.
    ///
    /// Any failure past registration, transmit failure included,
    /// tears the half-created actor back down with
    /// [`DestroyReason::FailedConstructor`] before surfacing.
    ///
    /// # Errors
    ///
    /// [`SendError::ConstructorFailed`] when a blocking constructor is
    /// refused by the peer; [`SendError::Fatal`] otherwise.
    pub fn create_actor(
        &mut self,
        manager: ActorId,
        message: &str,
        values: Vec<Value>,
    ) -> Result<(ActorId, Vec<Value>), SendError> {
        let entry = self
            .actors
            .lookup(manager)
            .map_err(FatalError::from)?
            .clone();
        let decl = self.find_decl(&entry.protocol, message)?;
        let MessageRole::Constructor { constructs } = decl.role.clone() else {
            return Err(FatalError::WrongEntryPoint {
                message: message.to_string(),
            }
            .into());
        };
        self.check_sendable(&entry.protocol, &decl)?;
        self.advance_on_send(manager, &entry.protocol, &entry.state, message)?;

        let id = self.actors.allocate_id();
        let state = self.machines[&constructs].initial();
        self.actors
            .insert(ActorEntry::new(id, &constructs, Some(manager), state))
            .map_err(FatalError::from)?;
        self.actors.attach(manager, id).map_err(FatalError::from)?;

        // The implicit leading parameter: the identity the peer must
        // register the new actor under.
        let mut payload = Vec::new();
        self.transport.scalar_codec().write_int(&mut payload, id.0);
        payload.extend_from_slice(&self.encode(&decl.params, &values)?);
        let tag = self
            .tags
            .tag(&entry.protocol, message)
            .ok_or_else(|| FatalError::UnknownDecl(message.to_string()))?;
        let msg = WireMessage {
            routing: manager,
            tag,
            semantics: decl.semantics,
            is_reply: false,
            payload,
        };
        debug!(%manager, %id, message, "construct");
        match decl.semantics {
            Semantics::Async => {
                if let Err(e) = self.transport.send_async(msg) {
                    return Err(self.constructor_failed(id, e.into()));
                }
                Ok((id, Vec::new()))
            }
            Semantics::Sync | Semantics::Rpc => {
                let reply = match self.send_blocking(msg, message) {
                    Ok(reply) => reply,
                    Err(e) => return Err(self.constructor_failed(id, e)),
                };
                let mut input = reply.payload.as_slice();
                let accepted = match self.transport.scalar_codec().read_bool(&mut input) {
                    Ok(v) => v,
                    Err(e) => return Err(self.constructor_failed(id, e.into())),
                };
                if !accepted {
                    self.destroy_local(id, DestroyReason::FailedConstructor)?;
                    return Err(SendError::ConstructorFailed);
                }
                match self.decode(&decl.returns, input) {
                    Ok(returns) => Ok((id, returns)),
                    Err(e) => Err(self.constructor_failed(id, e.into())),
                }
            }
        }
    }

    /// Tear down a half-created actor and wrap the failure that killed
    /// its construction.
    fn constructor_failed(&mut self, id: ActorId, err: FatalError) -> SendError {
        if let Err(e) = self.destroy_local(id, DestroyReason::FailedConstructor) {
            return SendError::Fatal(e);
        }
        SendError::Fatal(err)
    }

    /// Send `actor`'s destructor and tear down its whole local
    /// subtree. For blocking destructors the decoded reply values are
    /// returned.
    ///
    /// # Errors
    ///
    /// Fatal on any contract or transport failure.
    pub fn destroy_actor(
        &mut self,
        actor: ActorId,
        values: Vec<Value>,
    ) -> Result<Vec<Value>, FatalError> {
        let entry = self.actors.lookup(actor)?.clone();
        let protocol = self
            .unit
            .tree()
            .protocol(&entry.protocol)
            .ok_or_else(|| FatalError::UnknownDecl(entry.protocol.clone()))?;
        let decl = protocol
            .destructor()
            .cloned()
            .ok_or_else(|| FatalError::UnknownDecl(format!("{} destructor", entry.protocol)))?;
        self.check_sendable(&entry.protocol, &decl)?;
        self.advance_on_send(actor, &entry.protocol, &entry.state, &decl.name)?;

        let payload = self.encode(&decl.params, &values)?;
        let tag = self
            .tags
            .tag(&entry.protocol, &decl.name)
            .ok_or_else(|| FatalError::UnknownDecl(decl.name.clone()))?;
        let msg = WireMessage {
            routing: actor,
            tag,
            semantics: decl.semantics,
            is_reply: false,
            payload,
        };
        debug!(%actor, "destroy");
        let returns = match decl.semantics {
            Semantics::Async => {
                self.transport.send_async(msg)?;
                Vec::new()
            }
            Semantics::Sync | Semantics::Rpc => {
                let reply = self.send_blocking(msg, &decl.name)?;
                self.decode(&decl.returns, &reply.payload)?
            }
        };
        self.destroy_local(actor, DestroyReason::Deletion)?;
        Ok(returns)
    }

    /// Create a shared region of `size` zeroed bytes and announce it.
    /// The descriptor message goes out before the region is
    /// registered, so the peer can never race a reference to an id we
    /// have not yet committed to.
    ///
    /// # Errors
    ///
    /// Fatal on transport failure or a zero size.
    pub fn create_shmem(
        &mut self,
        size: usize,
        kind: RegionKind,
    ) -> Result<Rc<SharedRegion>, FatalError> {
        let pending = self.shmem.prepare_create(size, kind)?;
        self.announce_shmem(pending.id(), size, kind)?;
        Ok(self.shmem.commit(pending))
    }

    /// Adopt caller-provided bytes as a shared region and announce it.
    ///
    /// # Errors
    ///
    /// Fatal on transport failure or an empty buffer.
    pub fn adopt_shmem(
        &mut self,
        bytes: Vec<u8>,
        kind: RegionKind,
    ) -> Result<Rc<SharedRegion>, FatalError> {
        let size = bytes.len();
        let pending = self.shmem.prepare_adopt(bytes, kind)?;
        self.announce_shmem(pending.id(), size, kind)?;
        Ok(self.shmem.commit(pending))
    }

    /// Destroy a shared region. The destroy notice is on the wire
    /// before the local registration is released.
    ///
    /// # Errors
    ///
    /// Fatal on transport failure or an unknown id.
    pub fn destroy_shmem(&mut self, id: ShmemId) -> Result<(), FatalError> {
        if self.shmem.get(id).is_none() {
            return Err(FatalError::Shmem(ShmemError::NotRegistered(id)));
        }
        let mut payload = Vec::new();
        self.transport.scalar_codec().write_int(&mut payload, id.0);
        self.transport.send_async(WireMessage {
            routing: ActorId::NULL,
            tag: SHMEM_DESTROYED_TAG,
            semantics: Semantics::Async,
            is_reply: false,
            payload,
        })?;
        self.shmem.release(id)?;
        Ok(())
    }

    /// Orderly channel shutdown: destroy the whole actor tree with
    /// [`DestroyReason::NormalShutdown`] and drop every shared-memory
    /// registration.
    ///
    /// # Errors
    ///
    /// Fatal only if the table is internally inconsistent.
    pub fn close(&mut self) -> Result<(), FatalError> {
        self.teardown(DestroyReason::NormalShutdown)
    }

    /// The channel died underneath us: tear down with
    /// [`DestroyReason::AbnormalShutdown`].
    ///
    /// # Errors
    ///
    /// Fatal only if the table is internally inconsistent.
    pub fn abort(&mut self) -> Result<(), FatalError> {
        self.teardown(DestroyReason::AbnormalShutdown)
    }

    fn teardown(&mut self, reason: DestroyReason) -> Result<(), FatalError> {
        if self.actors.get(ActorId::NULL).is_some() {
            self.destroy_local(ActorId::NULL, reason)?;
        }
        self.shmem.release_all();
        Ok(())
    }

    /// Dispatch one incoming message: route, validate direction and
    /// ordering, decode, hand to the caller's handler, and build the
    /// reply for blocking tiers.
    ///
    /// # Errors
    ///
    /// Fatal on contract violations (illegal transitions,
    /// corruption-class decode failures); everything else is reported
    /// through the returned [`DispatchOutcome`].
    pub fn dispatch(
        &mut self,
        msg: WireMessage,
    ) -> Result<(DispatchOutcome, Option<WireMessage>), FatalError> {
        if msg.tag == SHMEM_CREATED_TAG {
            return self.recv_shmem_created(&msg);
        }
        if msg.tag == SHMEM_DESTROYED_TAG {
            return self.recv_shmem_destroyed(&msg);
        }
        if msg.is_reply {
            return Ok(self.verdict(DispatchOutcome::NotKnown, "reply"));
        }
        let Some((proto_name, msg_name)) = self.tags.decl(msg.tag) else {
            return Ok(self.verdict(DispatchOutcome::NotKnown, "unknown tag"));
        };
        let (proto_name, msg_name) = (proto_name.to_string(), msg_name.to_string());
        let Some(entry) = self.actors.get(msg.routing).cloned() else {
            return Ok(self.verdict(DispatchOutcome::RouteError, &msg_name));
        };
        let decl = self.find_decl(&proto_name, &msg_name)?;
        if !decl.received_by(self.side) || entry.protocol != proto_name {
            return Ok(self.verdict(DispatchOutcome::NotAllowed, &msg_name));
        }

        debug!(routing = %msg.routing, message = %msg_name, "dispatch");
        match decl.role.clone() {
            MessageRole::Regular => self.recv_regular(&msg, &entry, &decl, &msg_name),
            MessageRole::Constructor { constructs } => {
                self.recv_constructor(&msg, &entry, &decl, &msg_name, &constructs)
            }
            MessageRole::Destructor => self.recv_destructor(&msg, &entry, &decl, &msg_name),
        }
    }

    fn recv_regular(
        &mut self,
        msg: &WireMessage,
        entry: &ActorEntry,
        decl: &MessageDecl,
        msg_name: &str,
    ) -> Result<(DispatchOutcome, Option<WireMessage>), FatalError> {
        let params = match self.decode(&decl.params, &msg.payload) {
            Ok(v) => v,
            Err(e) => return self.read_failure(e, msg_name),
        };
        self.advance_on_recv(msg.routing, &entry.protocol, &entry.state, msg_name)?;
        match self
            .handlers
            .recv(msg.routing, &entry.protocol, msg_name, params)
        {
            Ok(returns) => {
                let reply = self.build_reply(msg, decl, None, &returns)?;
                Ok((DispatchOutcome::Processed, reply))
            }
            Err(_) => Ok(self.verdict(DispatchOutcome::ProcessingError, msg_name)),
        }
    }

    fn recv_constructor(
        &mut self,
        msg: &WireMessage,
        entry: &ActorEntry,
        decl: &MessageDecl,
        msg_name: &str,
        constructs: &str,
    ) -> Result<(DispatchOutcome, Option<WireMessage>), FatalError> {
        let mut input = msg.payload.as_slice();
        let remote_id = {
            let raw = match self.transport.scalar_codec().read_int(&mut input) {
                Ok(v) => v,
                Err(e) => return self.read_failure(e, msg_name),
            };
            ActorId(raw)
        };
        let params = match self.decode(&decl.params, input) {
            Ok(v) => v,
            Err(e) => return self.read_failure(e, msg_name),
        };
        self.advance_on_recv(msg.routing, &entry.protocol, &entry.state, msg_name)?;

        if !self.handlers.alloc(constructs, remote_id) {
            warn!(%remote_id, constructs, "constructor refused");
            let reply = self.build_reply(msg, decl, Some(false), &[])?;
            let (outcome, _) = self.verdict(DispatchOutcome::ProcessingError, msg_name);
            return Ok((outcome, reply));
        }
        let state = self.machines[constructs].initial();
        self.actors
            .insert(ActorEntry::new(remote_id, constructs, Some(msg.routing), state))?;
        self.actors.attach(msg.routing, remote_id)?;

        match self
            .handlers
            .recv(remote_id, constructs, msg_name, params)
        {
            Ok(returns) => {
                let reply = self.build_reply(msg, decl, Some(true), &returns)?;
                Ok((DispatchOutcome::Processed, reply))
            }
            Err(_) => {
                self.destroy_local(remote_id, DestroyReason::FailedConstructor)?;
                let reply = self.build_reply(msg, decl, Some(false), &[])?;
                let (outcome, _) = self.verdict(DispatchOutcome::ProcessingError, msg_name);
                Ok((outcome, reply))
            }
        }
    }

    fn recv_destructor(
        &mut self,
        msg: &WireMessage,
        entry: &ActorEntry,
        decl: &MessageDecl,
        msg_name: &str,
    ) -> Result<(DispatchOutcome, Option<WireMessage>), FatalError> {
        let params = match self.decode(&decl.params, &msg.payload) {
            Ok(v) => v,
            Err(e) => return self.read_failure(e, msg_name),
        };
        self.advance_on_recv(msg.routing, &entry.protocol, &entry.state, msg_name)?;
        let returns = match self
            .handlers
            .recv(msg.routing, &entry.protocol, msg_name, params)
        {
            Ok(returns) => returns,
            Err(_) => return Ok(self.verdict(DispatchOutcome::ProcessingError, msg_name)),
        };
        // Encode the reply while the dying actor is still resolvable,
        // then tear it down.
        let reply = self.build_reply(msg, decl, None, &returns)?;
        self.destroy_local(msg.routing, DestroyReason::Deletion)?;
        Ok((DispatchOutcome::Processed, reply))
    }

    fn recv_shmem_created(
        &mut self,
        msg: &WireMessage,
    ) -> Result<(DispatchOutcome, Option<WireMessage>), FatalError> {
        let sc = self.transport.scalar_codec();
        let mut input = msg.payload.as_slice();
        let parsed = (|| -> Result<(i64, i64, i64), CodecError> {
            Ok((sc.read_int(&mut input)?, sc.read_int(&mut input)?, sc.read_int(&mut input)?))
        })();
        let Ok((id, size, kind)) = parsed else {
            return Ok(self.verdict(DispatchOutcome::PayloadError, "shmem create"));
        };
        let (Ok(size), Some(kind)) = (usize::try_from(size), decode_region_kind(kind)) else {
            return Ok(self.verdict(DispatchOutcome::PayloadError, "shmem create"));
        };
        self.shmem.on_created(ShmemId(id), size, kind);
        Ok((DispatchOutcome::Processed, None))
    }

    fn recv_shmem_destroyed(
        &mut self,
        msg: &WireMessage,
    ) -> Result<(DispatchOutcome, Option<WireMessage>), FatalError> {
        let mut input = msg.payload.as_slice();
        let Ok(id) = self.transport.scalar_codec().read_int(&mut input) else {
            return Ok(self.verdict(DispatchOutcome::PayloadError, "shmem destroy"));
        };
        self.shmem.on_destroyed(ShmemId(id));
        Ok((DispatchOutcome::Processed, None))
    }

    fn announce_shmem(
        &mut self,
        id: ShmemId,
        size: usize,
        kind: RegionKind,
    ) -> Result<(), FatalError> {
        let mut payload = Vec::new();
        {
            let sc = self.transport.scalar_codec();
            sc.write_int(&mut payload, id.0);
            sc.write_int(&mut payload, size as i64);
            sc.write_int(&mut payload, encode_region_kind(kind));
        }
        self.transport.send_async(WireMessage {
            routing: ActorId::NULL,
            tag: SHMEM_CREATED_TAG,
            semantics: Semantics::Async,
            is_reply: false,
            payload,
        })?;
        Ok(())
    }

    fn build_reply(
        &mut self,
        msg: &WireMessage,
        decl: &MessageDecl,
        accepted: Option<bool>,
        returns: &[Value],
    ) -> Result<Option<WireMessage>, FatalError> {
        if decl.semantics == Semantics::Async {
            return Ok(None);
        }
        let mut payload = Vec::new();
        if let Some(ok) = accepted {
            self.transport.scalar_codec().write_bool(&mut payload, ok);
        }
        if accepted != Some(false) {
            payload.extend_from_slice(&self.encode(&decl.returns, returns)?);
        }
        Ok(Some(WireMessage {
            routing: msg.routing,
            tag: msg.tag,
            semantics: decl.semantics,
            is_reply: true,
            payload,
        }))
    }

    fn send_blocking(&mut self, msg: WireMessage, name: &str) -> Result<WireMessage, FatalError> {
        let semantics = msg.semantics;
        self.handlers.entered_call();
        self.transport.entered_blocking();
        let result = {
            let handlers = &mut self.handlers;
            let mut keep_waiting = || handlers.should_continue_from_timeout();
            match semantics {
                Semantics::Rpc => self.transport.send_rpc(msg, &mut keep_waiting),
                _ => self.transport.send_sync(msg, &mut keep_waiting),
            }
        };
        self.transport.exited_blocking();
        self.handlers.exited_call();
        match result {
            Ok(reply) => Ok(reply),
            Err(TransportError::ReplyTimeout) => Err(FatalError::ReplyTimeout(name.to_string())),
            Err(e) => Err(e.into()),
        }
    }

    fn find_decl(&self, protocol: &str, message: &str) -> Result<MessageDecl, FatalError> {
        self.unit
            .tree()
            .protocol(protocol)
            .and_then(|p| p.message(message))
            .cloned()
            .ok_or_else(|| FatalError::UnknownDecl(format!("{protocol}.{message}")))
    }

    fn check_sendable(&self, protocol: &str, decl: &MessageDecl) -> Result<(), FatalError> {
        if decl.sent_by(self.side) {
            Ok(())
        } else {
            Err(FatalError::WrongDirection {
                protocol: protocol.to_string(),
                message: decl.name.clone(),
            })
        }
    }

    fn advance_on_send(
        &mut self,
        actor: ActorId,
        protocol: &str,
        state: &State,
        message: &str,
    ) -> Result<(), FatalError> {
        let next = self.machines[protocol].on_send(state, message);
        self.record_transition(actor, next)
    }

    fn advance_on_recv(
        &mut self,
        actor: ActorId,
        protocol: &str,
        state: &State,
        message: &str,
    ) -> Result<(), FatalError> {
        let next = self.machines[protocol].on_recv(state, message);
        self.record_transition(actor, next)
    }

    fn record_transition(
        &mut self,
        actor: ActorId,
        next: Result<State, TransitionError>,
    ) -> Result<(), FatalError> {
        match next {
            Ok(state) => {
                self.actors.set_state(actor, state)?;
                Ok(())
            }
            Err(e) => {
                warn!(%actor, error = %e, "transition rejected");
                // The actor is poisoned even though the channel is
                // about to die anyway.
                let _ = self.actors.set_state(actor, State::Error);
                Err(e.into())
            }
        }
    }

    fn read_failure(
        &mut self,
        err: CodecError,
        message: &str,
    ) -> Result<(DispatchOutcome, Option<WireMessage>), FatalError> {
        match err.read_verdict() {
            Some(outcome) => Ok(self.verdict(outcome, message)),
            None => Err(FatalError::Codec(err)),
        }
    }

    fn verdict(
        &mut self,
        outcome: DispatchOutcome,
        message: &str,
    ) -> (DispatchOutcome, Option<WireMessage>) {
        if outcome != DispatchOutcome::Processed {
            warn!(?outcome, message, "dispatch failed");
            self.handlers.processing_error(outcome, message);
        }
        (outcome, None)
    }

    fn destroy_local(&mut self, actor: ActorId, reason: DestroyReason) -> Result<(), FatalError> {
        let handlers = &mut self.handlers;
        self.actors.destroy_subtree(actor, reason, &mut |entry, why| {
            handlers.about_to_destroy(entry.id, &entry.protocol, why);
        })?;
        let handlers = &mut self.handlers;
        self.actors
            .dealloc_subtree(actor, &mut |protocol, id| handlers.dealloc(protocol, id))?;
        Ok(())
    }

    fn encode(&mut self, params: &[Param], values: &[Value]) -> Result<Vec<u8>, FatalError> {
        let codec = Codec::new(self.unit.context(), self.side, self.transport.scalar_codec());
        codec
            .encode_params(params, values, &self.actors, &mut self.shmem)
            .map_err(FatalError::from)
    }

    fn decode(&mut self, params: &[Param], payload: &[u8]) -> Result<Vec<Value>, CodecError> {
        let codec = Codec::new(self.unit.context(), self.side, self.transport.scalar_codec());
        codec.decode_params(params, payload, &self.actors, &mut self.shmem)
    }
}

impl<T: Transport, H: EndpointHandlers> MessageSink for Endpoint<T, H> {
    fn deliver(&mut self, msg: WireMessage) -> Result<Option<WireMessage>, TransportError> {
        let blocking = msg.semantics != Semantics::Async;
        match self.dispatch(msg) {
            Ok((_, Some(reply))) => Ok(Some(reply)),
            Ok((DispatchOutcome::Processed, None)) => Ok(None),
            Ok((outcome, None)) if blocking => {
                Err(TransportError::Remote(format!("{outcome:?}")))
            }
            Ok((_, None)) => Ok(None),
            Err(e) => {
                // Parent terminates the peer, child terminates itself;
                // either way the channel is done.
                warn!(error = %e, action = ?FatalError::response(self.side), "fatal dispatch failure");
                Err(TransportError::Remote(e.to_string()))
            }
        }
    }
}

fn encode_region_kind(kind: RegionKind) -> i64 {
    match kind {
        RegionKind::Protected => 0,
        RegionKind::Unsafe => 1,
    }
}

fn decode_region_kind(raw: i64) -> Option<RegionKind> {
    match raw {
        0 => Some(RegionKind::Protected),
        1 => Some(RegionKind::Unsafe),
        _ => None,
    }
}
