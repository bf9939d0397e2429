//! In-process endpoint pairing.
//!
//! A [`LoopbackTransport`] hands each outgoing message straight to the
//! peer endpoint's dispatch and returns the reply inline, so a full
//! parent/child exchange runs synchronously on one thread. This is
//! the reference wiring for tests; a real deployment implements
//! [`Transport`] over an actual process boundary instead.
//!
//! Delivery is reentrant through `RefCell`, so a handler must not
//! send back toward the endpoint that is currently mid-send; the
//! borrow panic that results is a programming error, not a protocol
//! one.

use std::cell::RefCell;
use std::rc::Rc;

use accord_runtime::{
    Endpoint, EndpointHandlers, LittleEndianCodec, MessageSink, ScalarCodec, Transport,
    TransportError, WireMessage,
};
use accord_types::{CompileUnit, Side};

/// Transport that delivers directly into a peer [`MessageSink`].
#[derive(Default)]
pub struct LoopbackTransport {
    peer: Option<Rc<RefCell<dyn MessageSink>>>,
}

impl LoopbackTransport {
    /// An unconnected transport; sending before [`Self::connect`]
    /// fails with [`TransportError::PeerGone`].
    #[must_use]
    pub fn new() -> Self {
        LoopbackTransport { peer: None }
    }

    /// Wire this transport to its peer endpoint.
    pub fn connect(&mut self, peer: Rc<RefCell<dyn MessageSink>>) {
        self.peer = Some(peer);
    }

    fn deliver(&mut self, msg: WireMessage) -> Result<Option<WireMessage>, TransportError> {
        let peer = self.peer.as_ref().ok_or(TransportError::PeerGone)?;
        peer.borrow_mut().deliver(msg)
    }
}

impl Transport for LoopbackTransport {
    fn scalar_codec(&self) -> &dyn ScalarCodec {
        &LittleEndianCodec
    }

    fn send_async(&mut self, msg: WireMessage) -> Result<(), TransportError> {
        self.deliver(msg).map(|_| ())
    }

    fn send_sync(
        &mut self,
        msg: WireMessage,
        _keep_waiting: &mut dyn FnMut() -> bool,
    ) -> Result<WireMessage, TransportError> {
        self.deliver(msg)?
            .ok_or_else(|| TransportError::Remote("no reply produced".into()))
    }

    fn send_rpc(
        &mut self,
        msg: WireMessage,
        keep_waiting: &mut dyn FnMut() -> bool,
    ) -> Result<WireMessage, TransportError> {
        // Delivery is synchronous; reentrancy shows up as a direct
        // nested dispatch rather than a wait.
        self.send_sync(msg, keep_waiting)
    }
}

/// A connected parent/child endpoint pair over one compile unit.
pub type LoopbackEndpoint<H> = Rc<RefCell<Endpoint<LoopbackTransport, H>>>;

/// Build both endpoints of `unit` and wire them to each other.
#[must_use]
pub fn loopback_pair<HP, HC>(
    unit: CompileUnit,
    parent_handlers: HP,
    child_handlers: HC,
) -> (LoopbackEndpoint<HP>, LoopbackEndpoint<HC>)
where
    HP: EndpointHandlers + 'static,
    HC: EndpointHandlers + 'static,
{
    let parent = Rc::new(RefCell::new(Endpoint::new(
        unit.clone(),
        Side::Parent,
        LoopbackTransport::new(),
        parent_handlers,
    )));
    let child = Rc::new(RefCell::new(Endpoint::new(
        unit,
        Side::Child,
        LoopbackTransport::new(),
        child_handlers,
    )));
    parent
        .borrow_mut()
        .transport_mut()
        .connect(child.clone() as Rc<RefCell<dyn MessageSink>>);
    child
        .borrow_mut()
        .transport_mut()
        .connect(parent.clone() as Rc<RefCell<dyn MessageSink>>);
    (parent, child)
}
