pub mod network;
pub mod peer;

pub use network::TestNetwork;
pub use peer::TestPeer;
