use openlcb_types::{Alias, NodeId, Psi};

use crate::event_transport::EventEnumerator;
use crate::login::LoginStateMachine;

/// Static identity and declared capabilities of a node (§3).
#[derive(Debug, Clone, Copy)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct NodeParameters {
    pub node_id: NodeId,
    pub simple_protocol_subset: bool,
    pub psi: Psi,
}

impl NodeParameters {
    pub const fn new(node_id: NodeId, psi: Psi) -> Self {
        Self {
            node_id,
            simple_protocol_subset: false,
            psi,
        }
    }
}

/// A logical OpenLCB node hosted by this [`crate::engine::Engine`].
///
/// Bundles identity, the login/alias state machine, the event
/// enumeration cursor, and the bit flags §3 requires every node to
/// carry: everything that is per-node rather than per-bus-transport.
pub struct OpenLcbNode {
    pub params: NodeParameters,
    pub login: LoginStateMachine,
    pub enumerator: EventEnumerator,
    /// Set once login completes and the node starts sourcing/accepting traffic.
    pub initialized: bool,
    /// Set once the node has an alias and is allowed to send frames.
    pub permitted: bool,
    /// Fatal: a Verified Node ID matching ours was seen on the bus (§4.11).
    /// Once set the node must stop participating.
    pub duplicate_id_detected: bool,
    /// A Datagram Received OK ack has gone out for the in-flight datagram
    /// but its reply (write/read/operation) has not yet been sent.
    pub openlcb_datagram_ack_sent: bool,
    /// The peer asked for the last datagram to be resent.
    pub resend_datagram: bool,
    /// Config-memory writes are frozen for a firmware upgrade in progress
    /// (toggled by the Freeze/Unfreeze operations datagram).
    pub firmware_upgrade_active: bool,
    /// Count of 100 ms ticks the node has observed since construction.
    pub tick_count: u32,
    /// Alias of the sender of the most recently accepted datagram, kept
    /// so a requested resend knows where to send it.
    pub last_datagram_source: Option<Alias>,
}

impl OpenLcbNode {
    pub fn new(params: NodeParameters) -> Self {
        let login = LoginStateMachine::new(params.node_id, params.simple_protocol_subset);
        Self {
            params,
            login,
            enumerator: EventEnumerator::new(),
            initialized: false,
            permitted: false,
            duplicate_id_detected: false,
            openlcb_datagram_ack_sent: false,
            resend_datagram: false,
            firmware_upgrade_active: false,
            tick_count: 0,
            last_datagram_source: None,
        }
    }

    pub fn node_id(&self) -> NodeId {
        self.params.node_id
    }

    pub fn alias(&self) -> Alias {
        self.login.candidate_alias()
    }

    pub fn is_logged_in(&self) -> bool {
        self.login.is_logged_in()
    }

    /// Whether the node may still source or accept traffic. False once a
    /// duplicate Node ID has been detected (§4.11: fatal to this node).
    pub fn is_active(&self) -> bool {
        !self.duplicate_id_detected
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_node_starts_logged_out() {
        let node = OpenLcbNode::new(NodeParameters::new(NodeId::new(1), Psi::empty()));
        assert!(!node.is_logged_in());
    }
}
