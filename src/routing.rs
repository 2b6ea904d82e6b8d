//! Next-hop route lookup.
//!
//! The tree controller only needs one capability from the routing layer:
//! "which gateway would a packet to this destination leave through". The
//! `RouteLookup` trait is that seam; `StaticRoutes` is the table-driven
//! implementation used by the node runtime.

use std::collections::HashMap;
use std::net::Ipv4Addr;
use thiserror::Error;

/// Gateway meaning "no intermediate hop known".
pub const LOOPBACK_GATEWAY: Ipv4Addr = Ipv4Addr::LOCALHOST;

/// Errors from a route lookup.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RouteError {
    #[error("no route to {0}")]
    NoRoute(Ipv4Addr),

    #[error("routing layer unavailable: {0}")]
    Unavailable(String),
}

/// Outbound route to a destination.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Route {
    pub destination: Ipv4Addr,
    pub gateway: Ipv4Addr,
    /// Local source address, unspecified when unknown.
    pub source: Ipv4Addr,
}

impl Route {
    pub fn new(destination: Ipv4Addr, gateway: Ipv4Addr) -> Self {
        Self {
            destination,
            gateway,
            source: Ipv4Addr::UNSPECIFIED,
        }
    }

    /// Whether the gateway is the loopback address.
    pub fn is_loopback(&self) -> bool {
        self.gateway == LOOPBACK_GATEWAY
    }
}

/// Routing-table lookup.
pub trait RouteLookup {
    fn route_to(&self, destination: Ipv4Addr) -> Result<Route, RouteError>;
}

/// Fixed next-hop table with an optional default gateway.
#[derive(Clone, Debug, Default)]
pub struct StaticRoutes {
    routes: HashMap<Ipv4Addr, Ipv4Addr>,
    default_gateway: Option<Ipv4Addr>,
}

impl StaticRoutes {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace the gateway for `destination`.
    pub fn insert(&mut self, destination: Ipv4Addr, gateway: Ipv4Addr) -> Option<Ipv4Addr> {
        self.routes.insert(destination, gateway)
    }

    pub fn remove(&mut self, destination: Ipv4Addr) -> Option<Ipv4Addr> {
        self.routes.remove(&destination)
    }

    pub fn set_default_gateway(&mut self, gateway: Option<Ipv4Addr>) {
        self.default_gateway = gateway;
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }
}

impl RouteLookup for StaticRoutes {
    fn route_to(&self, destination: Ipv4Addr) -> Result<Route, RouteError> {
        self.routes
            .get(&destination)
            .copied()
            .or(self.default_gateway)
            .map(|gateway| Route::new(destination, gateway))
            .ok_or(RouteError::NoRoute(destination))
    }
}

impl FromIterator<(Ipv4Addr, Ipv4Addr)> for StaticRoutes {
    fn from_iter<I: IntoIterator<Item = (Ipv4Addr, Ipv4Addr)>>(iter: I) -> Self {
        Self {
            routes: iter.into_iter().collect(),
            default_gateway: None,
        }
    }
}
