// Coordination-server client, peer bookkeeping and NAT topology discovery.

pub mod api;
pub mod client;
pub mod error;
pub mod ice;
pub mod memory;
pub mod peers;
pub mod sse;
pub mod topology;

pub use api::{PushStream, RoomApi};
pub use client::RoomClient;
pub use error::NetError;
pub use ice::{IceCandidate, IceGatherer, WebRtcGatherer};
pub use memory::{MemoryRoom, RoomCall};
pub use peers::{PeerRegistry, WireInfo, WireSource};
pub use topology::{classify_nat, DiscoveryState, NatType, TopologyDiscovery};
