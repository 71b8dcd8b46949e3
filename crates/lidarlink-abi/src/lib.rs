//! C ABI shared by the sensor SDK, the bridge, and the embedding host runtime.
//! Everything here is `#[repr(C)]` and free of dependencies; layout changes bump
//! [`LIDARLINK_ABI_VERSION`].

use core::ffi::{c_char, c_void};

// Single in-development ABI version.
// Note: this ABI may change in place during early development.
pub const LIDARLINK_ABI_VERSION: u32 = 1;

// Symbols the bridge resolves from the vendor SDK shared library.
pub const SDK_INITIALIZE_SYMBOL: &str = "lidar_sdk_initialize";
pub const SDK_START_SYMBOL: &str = "lidar_sdk_start";
pub const SDK_UNINITIALIZE_SYMBOL: &str = "lidar_sdk_uninitialize";
pub const SDK_SET_FRAME_CALLBACK_SYMBOL: &str = "lidar_sdk_set_frame_callback";

// Payload encoding tags as emitted by the SDK. The bridge forwards them verbatim;
// only downstream consumers interpret them.
pub const LK_DATA_CARTESIAN_HIGH: u8 = 0x01;
pub const LK_DATA_CARTESIAN_LOW: u8 = 0x02;
pub const LK_DATA_SPHERICAL: u8 = 0x03;

/// One point-cloud frame as handed over by the sensor SDK.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct LkFramePacket {
    /// Payload size in bytes. Drives the boundary copy.
    pub length: u32,
    /// Number of points encoded in the payload.
    pub dot_num: u32,
    /// Payload encoding tag (`LK_DATA_*`).
    pub data_type: u8,
    pub reserved: [u8; 3],
    /// Payload bytes. Valid only while the frame callback runs; the SDK may reuse
    /// or free the memory as soon as the callback returns.
    pub data: *const u8,
}

/// Per-frame callback the bridge registers with the SDK.
///
/// Invoked on SDK-owned threads, potentially at thousands of frames per second.
/// `user_context` is the opaque pointer supplied at registration time, passed back
/// unchanged on every invocation.
pub type LkFrameCallback = unsafe extern "C" fn(
    device_handle: u32,
    device_type: u8,
    packet: *const LkFramePacket,
    user_context: *mut c_void,
);

pub type LkSdkInitializeFn = unsafe extern "C" fn(config_path: *const c_char) -> bool;
pub type LkSdkStartFn = unsafe extern "C" fn() -> bool;
pub type LkSdkUninitializeFn = unsafe extern "C" fn();
pub type LkSdkSetFrameCallbackFn =
    unsafe extern "C" fn(callback: Option<LkFrameCallback>, user_context: *mut c_void);

/// Durable reference to a host-side frame handler.
///
/// Ownership: `ctx` is owned by the host runtime. The bridge calls `retain` when it
/// stores the handler and `release` exactly once when it lets go; the host frees
/// `ctx` only after the reference count reaches zero. `on_frame` must be populated
/// for the handler to be installable.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct LkFrameHandler {
    pub ctx: *mut c_void,
    /// Called once per relayed frame. `payload` points at a bridge-owned copy that
    /// is valid only for the duration of the call; handlers that keep the bytes
    /// must copy them before returning.
    pub on_frame: Option<
        extern "C" fn(
            ctx: *mut c_void,
            device_handle: i32,
            device_type: i32,
            point_count: i32,
            data_type: i32,
            payload: *const u8,
            payload_len: usize,
        ),
    >,
    pub retain: Option<extern "C" fn(ctx: *mut c_void)>,
    pub release: Option<extern "C" fn(ctx: *mut c_void)>,
}

// Frames arrive on SDK-owned threads, so the host must provide callbacks that
// tolerate invocation from any thread. That contract is part of this ABI.
unsafe impl Send for LkFrameHandler {}
unsafe impl Sync for LkFrameHandler {}

/// Thread-attachment surface of the embedding runtime.
///
/// Runtimes that require per-thread registration before cross-boundary calls fill
/// in all three slots. Missing slots have defined meanings: no `attach_thread`
/// means every thread already counts as attached; no `thread_is_attached` means
/// the bridge attaches fresh on every crossing; no `detach_thread` means
/// attachments are permanent.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct LkHostRuntime {
    /// Must equal [`LIDARLINK_ABI_VERSION`]; checked once when the bridge captures
    /// the vtable.
    pub abi_version: u32,
    pub user_data: *mut c_void,
    /// True when the calling thread is already registered with the runtime.
    pub thread_is_attached: Option<extern "C" fn(user_data: *mut c_void) -> bool>,
    /// Register the calling thread. False when the runtime cannot accept it.
    pub attach_thread: Option<extern "C" fn(user_data: *mut c_void) -> bool>,
    /// Unregister the calling thread; pairs with one successful `attach_thread`.
    pub detach_thread: Option<extern "C" fn(user_data: *mut c_void)>,
}

// Attachment calls happen on whichever thread carries the frame; `user_data` must
// be usable from any of them.
unsafe impl Send for LkHostRuntime {}
unsafe impl Sync for LkHostRuntime {}
