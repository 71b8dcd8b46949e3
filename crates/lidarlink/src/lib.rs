//! Host-side bridge between a vendor LiDAR SDK and an embedding runtime.
//!
//! The SDK pushes frames from its own threads; the bridge snapshots the
//! installed [`FrameHandler`], attaches the delivery thread to the embedding
//! runtime when needed, copies the payload into an owned buffer and hands it
//! over. A frame that cannot be delivered is dropped, never queued; the next
//! frame starts clean.
//!
//! [`export`] is the C surface an embedder loads; everything else is usable
//! in-process through [`Bridge`].

mod bridge;
mod ffi_guard;
mod handler;
mod registry;
mod relay;
mod runtime;
mod sdk;

pub mod export;
pub mod stats;

pub use bridge::Bridge;
pub use handler::{
    ChannelHandler, ForeignHandler, Frame, FrameHandler, HandlerVTableError, OwnedFrame,
};
pub use registry::CallbackRegistry;
pub use relay::RelaySnapshot;
pub use runtime::{
    AttachError, CaptureError, ForeignRuntime, LocalRuntime, RuntimeCrossing, RuntimeHost,
};
pub use sdk::{DynamicSdk, ReplaySdk, SensorSdk};
