//! Recording fakes for the transport and routing seams.

use crate::routing::{Route, RouteError, RouteLookup};
use crate::transport::{DatagramSender, TransportError};
use crate::tree::{TreeController, TreeEvent, TreeState, TreeStats};
use std::cell::RefCell;
use std::net::{Ipv4Addr, SocketAddr};
use std::rc::Rc;
use std::time::Duration;

/// Sender that records every datagram and can be told to fail.
#[derive(Debug, Default)]
pub struct RecordingSender {
    pub sent: Vec<(Vec<u8>, SocketAddr)>,
    pub fail: bool,
}

impl RecordingSender {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing() -> Self {
        Self {
            sent: Vec::new(),
            fail: true,
        }
    }

    /// Payload of the last datagram sent.
    pub fn last(&self) -> Option<&[u8]> {
        self.sent.last().map(|(data, _)| data.as_slice())
    }
}

impl DatagramSender for RecordingSender {
    fn send_to(&mut self, data: &[u8], to: SocketAddr) -> Result<usize, TransportError> {
        if self.fail {
            return Err(TransportError::SendFailed("refused".into()));
        }
        self.sent.push((data.to_vec(), to));
        Ok(data.len())
    }
}

/// Route lookup whose answer can be changed after it was handed out.
#[derive(Clone, Debug, Default)]
pub struct SharedRoutes {
    gateway: Rc<RefCell<Option<Ipv4Addr>>>,
    lookups: Rc<RefCell<usize>>,
}

impl SharedRoutes {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn via(gateway: Ipv4Addr) -> Self {
        let routes = Self::new();
        routes.set_gateway(Some(gateway));
        routes
    }

    /// Set the gateway every lookup answers with; `None` fails lookups.
    pub fn set_gateway(&self, gateway: Option<Ipv4Addr>) {
        *self.gateway.borrow_mut() = gateway;
    }

    pub fn lookups(&self) -> usize {
        *self.lookups.borrow()
    }
}

impl RouteLookup for SharedRoutes {
    fn route_to(&self, destination: Ipv4Addr) -> Result<Route, RouteError> {
        *self.lookups.borrow_mut() += 1;
        self.gateway
            .borrow()
            .map(|gateway| Route::new(destination, gateway))
            .ok_or(RouteError::NoRoute(destination))
    }
}

/// Tree controller with a parent fixed up front and no probe timer.
#[derive(Debug)]
pub struct FixedTree {
    parent: Option<Ipv4Addr>,
    state: TreeState,
}

impl FixedTree {
    pub fn new(parent: Option<Ipv4Addr>) -> Self {
        Self {
            parent,
            state: TreeState::Unbound,
        }
    }
}

impl TreeController for FixedTree {
    fn start(&mut self, _now: Duration) {
        self.state = TreeState::Probing;
    }

    fn stop(&mut self) {
        self.state = TreeState::Stopped;
    }

    fn state(&self) -> TreeState {
        self.state
    }

    fn parent(&self) -> Option<Ipv4Addr> {
        self.parent
    }

    fn next_deadline(&self) -> Option<Duration> {
        None
    }

    fn poll(&mut self, _now: Duration, _sender: &mut dyn DatagramSender) -> Option<TreeEvent> {
        None
    }

    fn stats(&self) -> TreeStats {
        TreeStats::default()
    }
}
