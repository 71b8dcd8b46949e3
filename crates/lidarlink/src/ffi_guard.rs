//! Panic guards for the `extern "C"` boundary.
//!
//! The frame trampoline and every exported entry point must not unwind into
//! foreign callers; that is undefined behaviour.  These helpers centralise the
//! `catch_unwind` boilerplate so each entry point states only its name and a
//! fallback value.

use tracing::error;

/// Extract a human-readable message from a panic payload.
pub(crate) fn panic_message(payload: Box<dyn core::any::Any + Send>) -> String {
    if let Some(msg) = payload.downcast_ref::<&'static str>() {
        return (*msg).to_string();
    }
    if let Some(msg) = payload.downcast_ref::<String>() {
        return msg.clone();
    }
    "non-string panic payload".to_string()
}

/// Catch panics in boundary calls that return nothing.
///
/// A panic is logged with a backtrace and absorbed; the foreign caller gets
/// control back as if the call had completed.
pub(crate) fn guard_void(op: &'static str, f: impl FnOnce()) {
    if let Err(payload) = std::panic::catch_unwind(std::panic::AssertUnwindSafe(f)) {
        let msg = panic_message(payload);
        let bt = std::backtrace::Backtrace::force_capture();
        error!("panic in ffi `{op}`: {msg}\nbacktrace:\n{bt}");
    }
}

/// Catch panics in boundary calls that return a value with a known safe default.
pub(crate) fn guard_with_default<T>(op: &'static str, default: T, f: impl FnOnce() -> T) -> T {
    match std::panic::catch_unwind(std::panic::AssertUnwindSafe(f)) {
        Ok(val) => val,
        Err(payload) => {
            let msg = panic_message(payload);
            let bt = std::backtrace::Backtrace::force_capture();
            error!("panic in ffi `{op}`: {msg}\nbacktrace:\n{bt}");
            default
        }
    }
}
