//! The per-frame delivery path.
//!
//! The SDK invokes [`frame_trampoline`] on threads it owns, at rates up to
//! thousands of frames per second. Everything on this path follows one rule:
//! a frame may be lost, the thread may not. Any failure degrades to a silent
//! single-frame drop and the SDK gets control back.

use core::ffi::c_void;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use lidarlink_abi::LkFramePacket;

use crate::ffi_guard::guard_void;
use crate::handler::Frame;
use crate::registry::CallbackRegistry;
use crate::runtime::{RuntimeCrossing, RuntimeHost};

/// State shared between the bridge and the frame trampoline.
///
/// The trampoline's `user_context` is a raw pointer to one of these; the owning
/// bridge keeps the allocation alive until the SDK callback is unregistered.
pub(crate) struct BridgeShared {
    pub(crate) registry: CallbackRegistry,
    pub(crate) runtime: Arc<dyn RuntimeHost>,
    pub(crate) stats: RelayStats,
}

impl BridgeShared {
    pub(crate) fn new(runtime: Arc<dyn RuntimeHost>) -> Self {
        Self {
            registry: CallbackRegistry::new(),
            runtime,
            stats: RelayStats::default(),
        }
    }
}

/// Per-outcome delivery counters. Plain atomics; the hot path takes no locks.
#[derive(Default)]
pub(crate) struct RelayStats {
    delivered: AtomicU64,
    no_handler: AtomicU64,
    attach_failed: AtomicU64,
    bad_packet: AtomicU64,
    alloc_failed: AtomicU64,
}

impl RelayStats {
    pub(crate) fn snapshot(&self) -> RelaySnapshot {
        RelaySnapshot {
            delivered: self.delivered.load(Ordering::Relaxed),
            dropped_no_handler: self.no_handler.load(Ordering::Relaxed),
            dropped_attach_failed: self.attach_failed.load(Ordering::Relaxed),
            dropped_bad_packet: self.bad_packet.load(Ordering::Relaxed),
            dropped_alloc_failed: self.alloc_failed.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time copy of the relay counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RelaySnapshot {
    pub delivered: u64,
    pub dropped_no_handler: u64,
    pub dropped_attach_failed: u64,
    pub dropped_bad_packet: u64,
    pub dropped_alloc_failed: u64,
}

impl RelaySnapshot {
    pub fn dropped_total(&self) -> u64 {
        self.dropped_no_handler
            + self.dropped_attach_failed
            + self.dropped_bad_packet
            + self.dropped_alloc_failed
    }
}

/// Frame callback registered with the SDK.
///
/// Must never unwind into the SDK; the whole body runs under the panic guard.
pub(crate) unsafe extern "C" fn frame_trampoline(
    device_handle: u32,
    device_type: u8,
    packet: *const LkFramePacket,
    user_context: *mut c_void,
) {
    guard_void("frame_trampoline", || {
        if user_context.is_null() {
            return;
        }
        // SAFETY: `user_context` is the `BridgeShared` pointer supplied at
        // registration; the owning bridge keeps it alive until the callback is
        // unregistered.
        let shared = unsafe { &*(user_context as *const BridgeShared) };
        if packet.is_null() {
            shared.stats.bad_packet.fetch_add(1, Ordering::Relaxed);
            return;
        }
        // SAFETY: a non-null packet descriptor is valid for the duration of the
        // callback, per the SDK contract.
        let packet = unsafe { &*packet };
        relay_frame(shared, device_handle, device_type, packet);
    });
}

/// Delivery of one frame. Runs inside the SDK callback, after the null guards.
fn relay_frame(shared: &BridgeShared, device_handle: u32, device_type: u8, packet: &LkFramePacket) {
    // Empty slot is the steady state after teardown, not an error.
    let Some(handler) = shared.registry.current() else {
        shared.stats.no_handler.fetch_add(1, Ordering::Relaxed);
        return;
    };

    let Ok(_crossing) = RuntimeCrossing::enter(shared.runtime.as_ref()) else {
        shared.stats.attach_failed.fetch_add(1, Ordering::Relaxed);
        return;
    };

    // SAFETY: inside the callback, `packet.data` is valid for `packet.length`
    // bytes when non-null, per the SDK contract.
    let buffer = match unsafe { FrameBuffer::copy_from(packet) } {
        Ok(buffer) => buffer,
        Err(CopyError::BadPacket) => {
            shared.stats.bad_packet.fetch_add(1, Ordering::Relaxed);
            return;
        }
        Err(CopyError::AllocFailed) => {
            shared.stats.alloc_failed.fetch_add(1, Ordering::Relaxed);
            return;
        }
    };

    handler.on_frame(Frame {
        device_handle: device_handle as i32,
        device_type: device_type as i32,
        point_count: packet.dot_num as i32,
        data_type: packet.data_type as i32,
        payload: buffer.as_slice(),
    });
    shared.stats.delivered.fetch_add(1, Ordering::Relaxed);

    // Scope end releases the buffer first, then the crossing.
}

#[derive(Debug, PartialEq, Eq)]
pub(crate) enum CopyError {
    BadPacket,
    AllocFailed,
}

/// Bridge-owned copy of one packet payload: the single conversion point from
/// SDK memory to memory the handler may see.
///
/// The copy never aliases the packet, so the SDK reusing its buffer after the
/// callback returns cannot reach a handler's view of the bytes.
pub(crate) struct FrameBuffer {
    bytes: Vec<u8>,
}

impl FrameBuffer {
    /// Copies `packet.length` bytes out of SDK-owned memory.
    ///
    /// A declared length of zero yields an empty buffer regardless of `data`;
    /// a non-zero length with a null `data` pointer is malformed. Allocation
    /// goes through `try_reserve_exact` so an out-of-memory frame is dropped,
    /// not aborted on.
    ///
    /// # Safety
    ///
    /// When `data` is non-null it must be valid for `length` bytes for the
    /// duration of the call.
    pub(crate) unsafe fn copy_from(packet: &LkFramePacket) -> Result<Self, CopyError> {
        let len = packet.length as usize;
        if len == 0 {
            return Ok(Self { bytes: Vec::new() });
        }
        if packet.data.is_null() {
            return Err(CopyError::BadPacket);
        }
        let mut bytes = Vec::new();
        if bytes.try_reserve_exact(len).is_err() {
            return Err(CopyError::AllocFailed);
        }
        // SAFETY: non-null `data` with a non-zero declared length is valid for
        // `len` bytes, per this function's contract.
        bytes.extend_from_slice(unsafe { core::slice::from_raw_parts(packet.data, len) });
        Ok(Self { bytes })
    }

    pub(crate) fn as_slice(&self) -> &[u8] {
        &self.bytes
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::{FrameHandler, OwnedFrame};
    use crate::runtime::LocalRuntime;
    use parking_lot::Mutex;
    use std::sync::atomic::AtomicUsize;

    struct RecordingHandler {
        calls: Arc<AtomicUsize>,
        frames: Arc<Mutex<Vec<OwnedFrame>>>,
    }

    impl FrameHandler for RecordingHandler {
        fn on_frame(&self, frame: Frame<'_>) {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.frames.lock().push(OwnedFrame::from(frame));
        }
    }

    struct PanickingHandler;

    impl FrameHandler for PanickingHandler {
        fn on_frame(&self, _frame: Frame<'_>) {
            panic!("handler blew up");
        }
    }

    fn shared_with_recording() -> (
        Box<BridgeShared>,
        Arc<AtomicUsize>,
        Arc<Mutex<Vec<OwnedFrame>>>,
    ) {
        let shared = Box::new(BridgeShared::new(Arc::new(LocalRuntime)));
        let calls = Arc::new(AtomicUsize::new(0));
        let frames = Arc::new(Mutex::new(Vec::new()));
        shared.registry.install(Some(Box::new(RecordingHandler {
            calls: calls.clone(),
            frames: frames.clone(),
        })));
        (shared, calls, frames)
    }

    fn context_of(shared: &BridgeShared) -> *mut c_void {
        shared as *const BridgeShared as *mut c_void
    }

    fn packet_over(payload: &[u8], dot_num: u32, data_type: u8) -> LkFramePacket {
        LkFramePacket {
            length: payload.len() as u32,
            dot_num,
            data_type,
            reserved: [0; 3],
            data: if payload.is_empty() {
                core::ptr::null()
            } else {
                payload.as_ptr()
            },
        }
    }

    #[test]
    fn frame_fields_and_bytes_arrive_verbatim() {
        let (shared, calls, frames) = shared_with_recording();
        let payload = [0x01u8, 0x02, 0x03];
        let packet = packet_over(&payload, 10, 2);

        unsafe { frame_trampoline(7, 1, &packet, context_of(&shared)) };

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        let frame = frames.lock().pop().expect("one frame recorded");
        assert_eq!(frame.device_handle, 7);
        assert_eq!(frame.device_type, 1);
        assert_eq!(frame.point_count, 10);
        assert_eq!(frame.data_type, 2);
        assert_eq!(frame.payload, vec![0x01, 0x02, 0x03]);
        assert_eq!(shared.stats.snapshot().delivered, 1);
    }

    #[test]
    fn buffer_copy_survives_source_mutation() {
        let mut scratch = vec![0x01u8, 0x02, 0x03];
        let packet = packet_over(&scratch, 3, 1);

        let buffer = unsafe { FrameBuffer::copy_from(&packet) }.expect("copy");
        scratch.fill(0xAA);
        assert_eq!(buffer.as_slice(), &[0x01, 0x02, 0x03]);
    }

    #[test]
    fn zero_length_packet_delivers_empty_payload() {
        let (shared, calls, frames) = shared_with_recording();
        let packet = packet_over(&[], 0, 1);

        unsafe { frame_trampoline(3, 1, &packet, context_of(&shared)) };

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(frames.lock().pop().expect("recorded").payload.is_empty());
    }

    #[test]
    fn malformed_packet_is_dropped() {
        let (shared, calls, _) = shared_with_recording();
        let packet = LkFramePacket {
            length: 16,
            dot_num: 1,
            data_type: 1,
            reserved: [0; 3],
            data: core::ptr::null(),
        };

        unsafe { frame_trampoline(3, 1, &packet, context_of(&shared)) };

        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert_eq!(shared.stats.snapshot().dropped_bad_packet, 1);
    }

    #[test]
    fn null_packet_descriptor_is_dropped() {
        let (shared, calls, _) = shared_with_recording();

        unsafe { frame_trampoline(3, 1, core::ptr::null(), context_of(&shared)) };

        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert_eq!(shared.stats.snapshot().dropped_bad_packet, 1);
    }

    #[test]
    fn null_context_is_ignored() {
        let packet = packet_over(b"abc", 1, 1);
        unsafe { frame_trampoline(3, 1, &packet, core::ptr::null_mut()) };
    }

    #[test]
    fn missing_handler_counts_a_silent_drop() {
        let shared = Box::new(BridgeShared::new(Arc::new(LocalRuntime)));
        let packet = packet_over(b"abc", 1, 1);

        unsafe { frame_trampoline(3, 1, &packet, context_of(&shared)) };

        let snapshot = shared.stats.snapshot();
        assert_eq!(snapshot.delivered, 0);
        assert_eq!(snapshot.dropped_no_handler, 1);
    }

    #[test]
    fn rejected_attachment_drops_the_frame() {
        struct RejectingRuntime;
        impl crate::runtime::RuntimeHost for RejectingRuntime {
            fn thread_is_attached(&self) -> bool {
                false
            }
            fn attach_thread(&self) -> bool {
                false
            }
            fn detach_thread(&self) {}
        }

        let shared = Box::new(BridgeShared::new(Arc::new(RejectingRuntime)));
        let calls = Arc::new(AtomicUsize::new(0));
        shared.registry.install(Some(Box::new(RecordingHandler {
            calls: calls.clone(),
            frames: Arc::new(Mutex::new(Vec::new())),
        })));
        let packet = packet_over(b"abc", 1, 1);

        unsafe { frame_trampoline(3, 1, &packet, context_of(&shared)) };

        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert_eq!(shared.stats.snapshot().dropped_attach_failed, 1);
    }

    #[test]
    fn handler_panic_is_contained_and_delivery_continues() {
        let shared = Box::new(BridgeShared::new(Arc::new(LocalRuntime)));
        shared.registry.install(Some(Box::new(PanickingHandler)));
        let packet = packet_over(b"abc", 1, 1);

        unsafe { frame_trampoline(3, 1, &packet, context_of(&shared)) };

        // Swap in a healthy handler; the path must still work.
        let calls = Arc::new(AtomicUsize::new(0));
        shared.registry.install(Some(Box::new(RecordingHandler {
            calls: calls.clone(),
            frames: Arc::new(Mutex::new(Vec::new())),
        })));
        unsafe { frame_trampoline(3, 1, &packet, context_of(&shared)) };
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn snapshot_totals_add_up() {
        let stats = RelayStats::default();
        stats.no_handler.fetch_add(2, Ordering::Relaxed);
        stats.bad_packet.fetch_add(1, Ordering::Relaxed);
        stats.delivered.fetch_add(5, Ordering::Relaxed);

        let snapshot = stats.snapshot();
        assert_eq!(snapshot.dropped_total(), 3);
        assert_eq!(snapshot.delivered, 5);
    }
}
