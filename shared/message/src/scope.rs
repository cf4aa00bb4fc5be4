//! Publish scope carried on delivery routing keys

use std::fmt;

/// Where a message fans out to.
///
/// Producers select the scope by publishing with one of these routing keys;
/// anything else is rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scope {
    /// Node-local topic exchange only.
    Node,
    /// Cloud-bound durable exchange only.
    Beehive,
    /// Both sinks.
    All,
}

impl Scope {
    /// Parse a delivery routing key into a scope.
    pub fn parse(routing_key: &str) -> Option<Self> {
        match routing_key {
            "node" => Some(Scope::Node),
            "beehive" => Some(Scope::Beehive),
            "all" => Some(Scope::All),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Scope::Node => "node",
            Scope::Beehive => "beehive",
            Scope::All => "all",
        }
    }

    /// Whether the node-local topic exchange receives this message.
    pub fn publishes_node(&self) -> bool {
        matches!(self, Scope::Node | Scope::All)
    }

    /// Whether the beehive exchange receives this message.
    pub fn publishes_beehive(&self) -> bool {
        matches!(self, Scope::Beehive | Scope::All)
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
