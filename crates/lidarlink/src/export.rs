//! C surface for foreign embedders loading the bridge as a shared library.
//!
//! A process gets one bridge: the first successful `lidarlink_init` binds the
//! vendor SDK, captures the host runtime, and stores the bridge for every later
//! call. Embedders with a Rust main should use [`Bridge`](crate::Bridge)
//! directly instead.

use core::ffi::c_char;
use std::ffi::CStr;
use std::sync::{Arc, OnceLock};

use parking_lot::Mutex;
use tracing::warn;
use tracing_subscriber::EnvFilter;

use lidarlink_abi::{LkFrameHandler, LkHostRuntime};

use crate::bridge::Bridge;
use crate::ffi_guard::{guard_void, guard_with_default};
use crate::handler::ForeignHandler;
use crate::runtime::{ForeignRuntime, LocalRuntime, RuntimeHost};
use crate::sdk::DynamicSdk;

/// Overrides the vendor library the process-wide bridge binds at first init.
pub const SDK_LIBRARY_ENV: &str = "LIDARLINK_SDK_LIBRARY";

static BRIDGE: OnceLock<Bridge> = OnceLock::new();
static INIT_LOCK: Mutex<()> = Mutex::new(());
static TRACING: OnceLock<()> = OnceLock::new();

/// Installs a default tracing subscriber honouring `RUST_LOG`.
///
/// Runs at most once and yields to any subscriber the embedder installed
/// earlier. Foreign embedders get logs without having a Rust main.
pub fn init_tracing() {
    TRACING.get_or_init(|| {
        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_thread_names(true)
            .try_init();
    });
}

fn build_bridge(runtime: Arc<dyn RuntimeHost>) -> anyhow::Result<Bridge> {
    let library =
        std::env::var(SDK_LIBRARY_ENV).unwrap_or_else(|_| DynamicSdk::default_library_name());
    let sdk = DynamicSdk::load(&library)?;
    Ok(Bridge::new(Arc::new(sdk), runtime))
}

/// Borrows a NUL-terminated UTF-8 string. None for null or non-UTF-8 input.
///
/// # Safety
///
/// Non-null `ptr` must point at a NUL-terminated string valid for the call.
unsafe fn cstr_to_str<'a>(ptr: *const c_char) -> Option<&'a str> {
    if ptr.is_null() {
        return None;
    }
    // SAFETY: non-null per the check above; NUL-terminated per this function's
    // contract.
    unsafe { CStr::from_ptr(ptr) }.to_str().ok()
}

/// Initializes the process-wide bridge and forwards `config_path` to the SDK.
///
/// The first call binds the vendor library and captures `runtime` (null means
/// no attachment discipline). Concurrent first calls are serialized, so at
/// most one bridge is ever constructed. Later calls only re-forward the
/// config. False on any refusal; the caller may retry.
///
/// # Safety
///
/// `config_path`, when non-null, must be a NUL-terminated string. `runtime`,
/// when non-null, must point at a vtable valid for the duration of the call;
/// the bridge copies it.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn lidarlink_init(
    config_path: *const c_char,
    runtime: *const LkHostRuntime,
) -> bool {
    guard_with_default("lidarlink_init", false, || {
        init_tracing();
        let Some(config) = (unsafe { cstr_to_str(config_path) }) else {
            warn!("init rejected: config path is null or not utf-8");
            return false;
        };
        if BRIDGE.get().is_none() {
            // Construction runs in a critical section and re-checks the slot:
            // a losing racer must never build a second bridge, whose teardown
            // would unregister the winner's callback from the vendor library.
            let _building = INIT_LOCK.lock();
            if BRIDGE.get().is_none() {
                let captured: Arc<dyn RuntimeHost> = if runtime.is_null() {
                    Arc::new(LocalRuntime)
                } else {
                    // SAFETY: non-null runtime is valid for this call per the
                    // function contract; capture copies the vtable.
                    match ForeignRuntime::capture(unsafe { *runtime }) {
                        Ok(captured) => Arc::new(captured),
                        Err(e) => {
                            warn!("init rejected: {e}");
                            return false;
                        }
                    }
                };
                match build_bridge(captured) {
                    Ok(bridge) => {
                        let _ = BRIDGE.set(bridge);
                    }
                    Err(e) => {
                        warn!("init rejected: {e:#}");
                        return false;
                    }
                }
            }
        }
        match BRIDGE.get() {
            Some(bridge) => bridge.init(config),
            None => false,
        }
    })
}

#[unsafe(no_mangle)]
pub extern "C" fn lidarlink_start() -> bool {
    guard_with_default("lidarlink_start", false, || match BRIDGE.get() {
        Some(bridge) => bridge.start(),
        None => false,
    })
}

#[unsafe(no_mangle)]
pub extern "C" fn lidarlink_stop() {
    guard_void("lidarlink_stop", || {
        if let Some(bridge) = BRIDGE.get() {
            bridge.stop();
        }
    });
}

/// Installs (non-null) or clears (null) the frame handler.
///
/// Returns false when no bridge exists yet or the vtable is uninstallable.
///
/// # Safety
///
/// `handler`, when non-null, must point at a vtable valid for the duration of
/// the call; the bridge copies it and takes its own durable reference via the
/// vtable's `retain`.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn lidarlink_set_handler(handler: *const LkFrameHandler) -> bool {
    guard_with_default("lidarlink_set_handler", false, || {
        let Some(bridge) = BRIDGE.get() else {
            return false;
        };
        if handler.is_null() {
            bridge.set_handler(None);
            return true;
        }
        // SAFETY: non-null handler is valid for this call per the function
        // contract; the adapter copies the vtable.
        match ForeignHandler::from_raw(unsafe { *handler }) {
            Ok(adapted) => {
                bridge.set_handler(Some(Box::new(adapted)));
                true
            }
            Err(e) => {
                warn!("handler rejected: {e}");
                false
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    // The process-wide slot stays empty throughout this suite: no vendor
    // library exists in the test environment, so every init fails before
    // construction. The exports must stay well-behaved regardless. The mutex
    // serializes the tests because they share the process environment.
    static TEST_MUTEX: Mutex<()> = Mutex::new(());

    #[test]
    fn init_rejects_null_config() {
        let _guard = TEST_MUTEX.lock();
        assert!(!unsafe { lidarlink_init(core::ptr::null(), core::ptr::null()) });
    }

    #[test]
    fn init_fails_cleanly_without_vendor_library() {
        let _guard = TEST_MUTEX.lock();
        // Point the binding at a library that cannot exist.
        unsafe { std::env::set_var(SDK_LIBRARY_ENV, "/nonexistent/liblidar_sdk.so") };
        let config = c"config.json";
        assert!(!unsafe { lidarlink_init(config.as_ptr(), core::ptr::null()) });
    }

    #[test]
    fn surface_is_inert_without_a_bridge() {
        let _guard = TEST_MUTEX.lock();
        assert!(!lidarlink_start());
        lidarlink_stop();
        assert!(!unsafe { lidarlink_set_handler(core::ptr::null()) });
    }

    #[test]
    fn racing_first_inits_fail_independently() {
        let _guard = TEST_MUTEX.lock();
        unsafe { std::env::set_var(SDK_LIBRARY_ENV, "/nonexistent/liblidar_sdk.so") };

        // &'static CStr, so the address stays valid for both racers.
        let config = c"config.json".as_ptr() as usize;
        let racers: Vec<_> = (0..2)
            .map(|i| {
                std::thread::Builder::new()
                    .name(format!("init-racer-{i}"))
                    .spawn(move || unsafe {
                        lidarlink_init(config as *const c_char, core::ptr::null())
                    })
                    .expect("spawn racer")
            })
            .collect();
        for racer in racers {
            assert!(!racer.join().expect("racer thread"));
        }
    }
}
