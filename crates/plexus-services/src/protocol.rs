//! Well-known ledger keys shared by every peer.

/// Registry of assigned addresses; entry key is the peer id.
pub const MACHINES_LEDGER_KEY: &str = "machines";

/// Heartbeats; entry key is the peer id, value the wall clock in ms.
pub const HEALTHCHECK_LEDGER_KEY: &str = "healthcheck";

/// Election domain of the address allocator.
pub const DHCP_LEDGER_KEY: &str = "dhcp";

/// Entry key of a leader marker within an election domain.
pub const LEADER_ENTRY_KEY: &str = "leader";
