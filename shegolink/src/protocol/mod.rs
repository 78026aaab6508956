//! Wire protocol: framing, chunking and inbound classification.

pub mod chunk;
pub mod echo;
pub mod frame;
pub mod status;

// Re-export common types
pub use chunk::{ChunkPlan, Chunks, MAX_TRANSFER_SIZE};
pub use echo::EchoFilter;
pub use frame::{Destination, Frame, threshold_from_mm};
pub use status::{DeviceEvent, StatusCode, StatusDecoder, StatusEvent};
