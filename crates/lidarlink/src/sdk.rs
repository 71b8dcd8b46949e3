//! The slice of the vendor sensor SDK the bridge consumes, plus an in-process
//! stand-in for tests and demos.

use core::ffi::c_void;
use std::env;
use std::ffi::CString;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use anyhow::{Context, Result};
use libloading::{Library, Symbol};
use parking_lot::Mutex;
use tracing::info;

use lidarlink_abi::{
    LkFrameCallback, LkSdkInitializeFn, LkSdkSetFrameCallbackFn, LkSdkStartFn,
    LkSdkUninitializeFn, SDK_INITIALIZE_SYMBOL, SDK_SET_FRAME_CALLBACK_SYMBOL, SDK_START_SYMBOL,
    SDK_UNINITIALIZE_SYMBOL,
};

/// What the bridge needs from the vendor SDK.
///
/// Implementations must tolerate the full lifecycle dance: `initialize` and
/// `start` may fail and be retried, `uninitialize` may arrive more than once,
/// and `set_frame_callback(None, ..)` must stop deliveries before it returns.
pub trait SensorSdk: Send + Sync {
    fn initialize(&self, config_source: &str) -> bool;
    fn start(&self) -> bool;
    fn uninitialize(&self);
    fn set_frame_callback(&self, callback: Option<LkFrameCallback>, user_context: *mut c_void);
}

/// Vendor SDK bound at runtime from its shared library.
///
/// Nothing links against the vendor at build time; the four consumed entry
/// points are resolved by name. The `Library` lives in the same struct as the
/// function pointers it produced, so the code stays mapped for as long as any
/// of them can be called.
pub struct DynamicSdk {
    initialize: LkSdkInitializeFn,
    start: LkSdkStartFn,
    uninitialize: LkSdkUninitializeFn,
    set_frame_callback: LkSdkSetFrameCallbackFn,
    _lib: Library,
}

impl DynamicSdk {
    /// Platform file name of the vendor library (`liblidar_sdk.so` and friends).
    pub fn default_library_name() -> String {
        format!(
            "{}lidar_sdk{}",
            env::consts::DLL_PREFIX,
            env::consts::DLL_SUFFIX
        )
    }

    /// Binds the consumed entry points out of the library at `path`.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        // SAFETY: loading the vendor library runs its initialisers; binding it
        // is the whole point.
        let lib = unsafe { Library::new(path) }
            .with_context(|| format!("load sensor sdk library {}", path.display()))?;

        let initialize = unsafe { resolve::<LkSdkInitializeFn>(&lib, SDK_INITIALIZE_SYMBOL) }?;
        let start = unsafe { resolve::<LkSdkStartFn>(&lib, SDK_START_SYMBOL) }?;
        let uninitialize =
            unsafe { resolve::<LkSdkUninitializeFn>(&lib, SDK_UNINITIALIZE_SYMBOL) }?;
        let set_frame_callback =
            unsafe { resolve::<LkSdkSetFrameCallbackFn>(&lib, SDK_SET_FRAME_CALLBACK_SYMBOL) }?;

        info!("sensor sdk bound from {}", path.display());
        Ok(Self {
            initialize,
            start,
            uninitialize,
            set_frame_callback,
            _lib: lib,
        })
    }
}

/// # Safety
///
/// `T` must be the correct function-pointer type for `symbol` in `lib`.
unsafe fn resolve<T: Copy>(lib: &Library, symbol: &'static str) -> Result<T> {
    let sym: Symbol<T> = unsafe { lib.get(symbol.as_bytes()) }
        .with_context(|| format!("resolve sdk symbol `{symbol}`"))?;
    Ok(*sym)
}

impl SensorSdk for DynamicSdk {
    fn initialize(&self, config_source: &str) -> bool {
        let Ok(config) = CString::new(config_source) else {
            // Interior NUL cannot cross as a C string.
            return false;
        };
        // SAFETY: the vendor contract takes a NUL-terminated string and reads it
        // synchronously.
        unsafe { (self.initialize)(config.as_ptr()) }
    }

    fn start(&self) -> bool {
        // SAFETY: no arguments; vendor contract.
        unsafe { (self.start)() }
    }

    fn uninitialize(&self) {
        // SAFETY: no arguments; vendor contract.
        unsafe { (self.uninitialize)() }
    }

    fn set_frame_callback(&self, callback: Option<LkFrameCallback>, user_context: *mut c_void) {
        // SAFETY: registration is synchronous; the caller guarantees
        // `user_context` stays valid until unregistered.
        unsafe { (self.set_frame_callback)(callback, user_context) }
    }
}

#[derive(Clone, Copy)]
struct Registration {
    callback: LkFrameCallback,
    user_context: *mut c_void,
}

// The registration crosses into whichever thread calls `deliver`; context
// validity is the registrant's contract, exactly as with the real SDK.
unsafe impl Send for Registration {}

/// In-process SDK stand-in.
///
/// `deliver` plays one crafted packet through whatever callback is currently
/// registered, synchronously on the calling thread, then scribbles over the
/// scratch payload. A handler that held on to a pointer into "SDK memory"
/// reads garbage afterwards instead of passing by accident.
///
/// Deliberately keeps its registration across `uninitialize` so tests can model
/// a misbehaving SDK that emits one more frame after shutdown.
#[derive(Default)]
pub struct ReplaySdk {
    registration: Mutex<Option<Registration>>,
    fail_initialize: AtomicBool,
    fail_start: AtomicBool,
    initialize_calls: AtomicUsize,
    start_calls: AtomicUsize,
    uninitialize_calls: AtomicUsize,
    last_config: Mutex<Option<String>>,
}

impl ReplaySdk {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_initialize(&self, fail: bool) {
        self.fail_initialize.store(fail, Ordering::SeqCst);
    }

    pub fn fail_start(&self, fail: bool) {
        self.fail_start.store(fail, Ordering::SeqCst);
    }

    pub fn initialize_calls(&self) -> usize {
        self.initialize_calls.load(Ordering::SeqCst)
    }

    pub fn start_calls(&self) -> usize {
        self.start_calls.load(Ordering::SeqCst)
    }

    pub fn uninitialize_calls(&self) -> usize {
        self.uninitialize_calls.load(Ordering::SeqCst)
    }

    pub fn last_config(&self) -> Option<String> {
        self.last_config.lock().clone()
    }

    pub fn has_callback(&self) -> bool {
        self.registration.lock().is_some()
    }

    /// Plays one frame through the registered callback. No-op when nothing is
    /// registered.
    pub fn deliver(
        &self,
        device_handle: u32,
        device_type: u8,
        data_type: u8,
        dot_num: u32,
        payload: &[u8],
    ) {
        let Some(registration) = *self.registration.lock() else {
            return;
        };
        let mut scratch = payload.to_vec();
        let packet = lidarlink_abi::LkFramePacket {
            length: scratch.len() as u32,
            dot_num,
            data_type,
            reserved: [0; 3],
            data: if scratch.is_empty() {
                core::ptr::null()
            } else {
                scratch.as_ptr()
            },
        };
        // SAFETY: packet and scratch outlive the synchronous call; the callback
        // contract allows the memory to be reused afterwards, which the
        // scribble below exercises.
        unsafe {
            (registration.callback)(device_handle, device_type, &packet, registration.user_context)
        };
        scratch.fill(0xAA);
    }

    /// Plays a null packet descriptor through the callback.
    pub fn deliver_null_packet(&self, device_handle: u32, device_type: u8) {
        let Some(registration) = *self.registration.lock() else {
            return;
        };
        // SAFETY: the callback must tolerate a null descriptor; that tolerance
        // is what callers of this helper are testing.
        unsafe {
            (registration.callback)(
                device_handle,
                device_type,
                core::ptr::null(),
                registration.user_context,
            )
        };
    }

    /// Plays a malformed packet: non-zero declared length over a null payload.
    pub fn deliver_malformed(&self, device_handle: u32, device_type: u8, declared_len: u32) {
        let Some(registration) = *self.registration.lock() else {
            return;
        };
        let packet = lidarlink_abi::LkFramePacket {
            length: declared_len,
            dot_num: 0,
            data_type: 0,
            reserved: [0; 3],
            data: core::ptr::null(),
        };
        // SAFETY: descriptor is valid; only its payload pointer is junk, which
        // is the condition under test.
        unsafe {
            (registration.callback)(device_handle, device_type, &packet, registration.user_context)
        };
    }
}

impl SensorSdk for ReplaySdk {
    fn initialize(&self, config_source: &str) -> bool {
        self.initialize_calls.fetch_add(1, Ordering::SeqCst);
        *self.last_config.lock() = Some(config_source.to_string());
        !self.fail_initialize.load(Ordering::SeqCst)
    }

    fn start(&self) -> bool {
        self.start_calls.fetch_add(1, Ordering::SeqCst);
        !self.fail_start.load(Ordering::SeqCst)
    }

    fn uninitialize(&self) {
        self.uninitialize_calls.fetch_add(1, Ordering::SeqCst);
    }

    fn set_frame_callback(&self, callback: Option<LkFrameCallback>, user_context: *mut c_void) {
        *self.registration.lock() = callback.map(|callback| Registration {
            callback,
            user_context,
        });
    }
}
