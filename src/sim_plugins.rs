use std::collections::BTreeMap;

use crate::sim_error::{SimError, SimResult};
use crate::sim_interface::{Link, Monitor, NodeId, Peer, SimTime};
use crate::sim_link::ReliableLink;

pub type PeerFactory = Box<dyn Fn(NodeId, Box<dyn Link>) -> SimResult<Box<dyn Peer>>>;
pub type LinkFactory = Box<dyn Fn(NodeId, SimTime) -> Box<dyn Link>>;
pub type MonitorFactory = Box<dyn Fn() -> Box<dyn Monitor>>;

/// Name to constructor maps for every pluggable component. Scenario files
/// and checkpoints refer to plugins by these names.
pub struct PluginRegistry {
    peers: BTreeMap<String, PeerFactory>,
    links: BTreeMap<String, LinkFactory>,
    monitors: BTreeMap<String, MonitorFactory>,
}

impl Default for PluginRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl PluginRegistry {
    /// A registry holding only the built-in `reliable` link.
    pub fn new() -> Self {
        let mut registry = Self::empty();
        registry.register_link("reliable", |id, latency| Box::new(ReliableLink::new(id, latency)));
        registry
    }

    pub fn empty() -> Self {
        Self {
            peers: BTreeMap::new(),
            links: BTreeMap::new(),
            monitors: BTreeMap::new(),
        }
    }

    pub fn register_peer<F>(&mut self, name: &str, factory: F)
    where
        F: Fn(NodeId, Box<dyn Link>) -> SimResult<Box<dyn Peer>> + 'static,
    {
        self.peers.insert(name.to_string(), Box::new(factory));
    }

    pub fn register_link<F>(&mut self, name: &str, factory: F)
    where
        F: Fn(NodeId, SimTime) -> Box<dyn Link> + 'static,
    {
        self.links.insert(name.to_string(), Box::new(factory));
    }

    pub fn register_monitor<F>(&mut self, name: &str, factory: F)
    where
        F: Fn() -> Box<dyn Monitor> + 'static,
    {
        self.monitors.insert(name.to_string(), Box::new(factory));
    }

    pub fn has_peer(&self, name: &str) -> bool {
        self.peers.contains_key(name)
    }

    pub fn has_link(&self, name: &str) -> bool {
        self.links.contains_key(name)
    }

    pub fn has_monitor(&self, name: &str) -> bool {
        self.monitors.contains_key(name)
    }

    pub fn peer_names(&self) -> impl Iterator<Item = &str> {
        self.peers.keys().map(String::as_str)
    }

    pub fn link(&self, name: &str, id: NodeId, latency: SimTime) -> SimResult<Box<dyn Link>> {
        let factory = self
            .links
            .get(name)
            .ok_or_else(|| SimError::UnknownLinkType(name.to_string()))?;
        Ok(factory(id, latency))
    }

    pub fn peer(&self, name: &str, id: NodeId, link: Box<dyn Link>) -> SimResult<Box<dyn Peer>> {
        let factory = self
            .peers
            .get(name)
            .ok_or_else(|| SimError::UnknownPeerType(name.to_string()))?;
        factory(id, link)
    }

    /// Build a peer together with its link.
    pub fn instantiate(
        &self,
        peer_type: &str,
        link_type: &str,
        id: NodeId,
        latency: SimTime,
    ) -> SimResult<Box<dyn Peer>> {
        let link = self.link(link_type, id, latency)?;
        self.peer(peer_type, id, link)
    }

    pub fn monitor(&self, name: &str) -> SimResult<Box<dyn Monitor>> {
        let factory = self
            .monitors
            .get(name)
            .ok_or_else(|| SimError::UnknownMonitorType(name.to_string()))?;
        Ok(factory())
    }
}
