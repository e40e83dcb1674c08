pub mod bridge;
pub mod channel;

pub use bridge::BridgeState;
pub use channel::ChannelPhase;
