//! Lifecycle composition: one SDK, one host runtime, one handler slot.

use core::ffi::c_void;
use std::sync::Arc;

use tracing::{info, warn};

use crate::handler::FrameHandler;
use crate::relay::{BridgeShared, RelaySnapshot, frame_trampoline};
use crate::runtime::RuntimeHost;
use crate::sdk::SensorSdk;

/// The bridge between a sensor SDK and an embedding host runtime.
///
/// Lifecycle calls (`init`, `start`, `set_handler`, `stop`) are expected from a
/// single control thread; frames arrive concurrently on whatever threads the
/// SDK owns. Construction captures the runtime-attachment context, before any
/// SDK call can produce a frame.
pub struct Bridge {
    shared: Arc<BridgeShared>,
    sdk: Arc<dyn SensorSdk>,
}

impl Bridge {
    pub fn new(sdk: Arc<dyn SensorSdk>, runtime: Arc<dyn RuntimeHost>) -> Self {
        Self {
            shared: Arc::new(BridgeShared::new(runtime)),
            sdk,
        }
    }

    /// Forwards the opaque config source to the SDK.
    ///
    /// The bridge does not interpret the string; whether it names a file, a
    /// profile, or inline settings is between the caller and the vendor.
    /// False means the SDK refused; the caller may fix the input and retry.
    pub fn init(&self, config_source: &str) -> bool {
        let ok = self.sdk.initialize(config_source);
        if ok {
            info!("sensor sdk initialized");
        } else {
            warn!("sensor sdk refused to initialize");
        }
        ok
    }

    pub fn start(&self) -> bool {
        let ok = self.sdk.start();
        if ok {
            info!("sensor sdk started");
        } else {
            warn!("sensor sdk refused to start");
        }
        ok
    }

    /// Installs (or with `None` clears) the frame handler, then points the SDK
    /// at the trampoline.
    ///
    /// The slot is filled before the SDK can route a frame, so an early frame
    /// finds either nothing (dropped) or the new handler, never a half-installed
    /// one. The previous handler's durable reference is released exactly once,
    /// after any in-flight delivery lets go of it.
    pub fn set_handler(&self, handler: Option<Box<dyn FrameHandler>>) {
        let installing = handler.is_some();
        self.shared.registry.install(handler);
        if installing {
            self.sdk
                .set_frame_callback(Some(frame_trampoline), self.shared_context());
            info!("frame handler installed");
        } else {
            self.sdk.set_frame_callback(None, core::ptr::null_mut());
            info!("frame handler cleared");
        }
    }

    /// Stops the SDK first, then tears down the handler slot, in that order:
    /// once the slot goes empty no new frame can be in flight behind it.
    /// Safe to call any number of times.
    pub fn stop(&self) {
        self.sdk.uninitialize();
        self.shared.registry.teardown();
        info!("bridge stopped");
    }

    pub fn handler_installed(&self) -> bool {
        self.shared.registry.is_installed()
    }

    pub fn stats(&self) -> RelaySnapshot {
        self.shared.stats.snapshot()
    }

    fn shared_context(&self) -> *mut c_void {
        Arc::as_ptr(&self.shared) as *mut c_void
    }
}

impl Drop for Bridge {
    fn drop(&mut self) {
        // The trampoline context dies with `shared`; the SDK must stop calling
        // before that happens.
        self.sdk.set_frame_callback(None, core::ptr::null_mut());
    }
}
