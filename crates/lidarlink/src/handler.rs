//! Frame consumers: the handler contract plus the two stock implementations
//! shipped with the bridge (a foreign-vtable adapter and a channel hand-off).

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use crossbeam_channel::Sender;
use lidarlink_abi::LkFrameHandler;
use thiserror::Error;

/// Borrowed view of one relayed frame.
///
/// Field order mirrors the wire callback: device handle, device type, point
/// count, data type, payload. The payload borrow ends when `on_frame` returns;
/// handlers that need the bytes later must copy them.
#[derive(Debug, Clone, Copy)]
pub struct Frame<'a> {
    pub device_handle: i32,
    pub device_type: i32,
    pub point_count: i32,
    pub data_type: i32,
    pub payload: &'a [u8],
}

/// A frame consumer installable into the bridge.
///
/// `on_frame` runs on SDK-owned delivery threads, potentially thousands of times
/// per second and potentially on several threads at once if the SDK fans out.
/// Implementations must stay quick and must never block; copy the frame and hand
/// it off if the real work is expensive.
pub trait FrameHandler: Send + Sync {
    fn on_frame(&self, frame: Frame<'_>);
}

impl<T: FrameHandler + ?Sized> FrameHandler for Arc<T> {
    fn on_frame(&self, frame: Frame<'_>) {
        (**self).on_frame(frame);
    }
}

/// Why a raw handler vtable was rejected at install time.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum HandlerVTableError {
    #[error("handler vtable has no `on_frame` slot")]
    MissingOnFrame,
}

/// Owns one durable reference to a foreign handler vtable.
///
/// Construction takes the reference (`retain`), `Drop` gives it back (`release`)
/// exactly once. The call target is validated here, at install time, so the
/// per-frame path never discovers an uncallable handler.
pub struct ForeignHandler {
    raw: LkFrameHandler,
}

impl ForeignHandler {
    pub fn from_raw(raw: LkFrameHandler) -> Result<Self, HandlerVTableError> {
        if raw.on_frame.is_none() {
            return Err(HandlerVTableError::MissingOnFrame);
        }
        if let Some(retain) = raw.retain {
            retain(raw.ctx);
        }
        Ok(Self { raw })
    }
}

impl FrameHandler for ForeignHandler {
    fn on_frame(&self, frame: Frame<'_>) {
        // Checked at construction; kept as a degenerate guard so a host that
        // hands out a self-mutating vtable gets a dropped frame, not a fault.
        let Some(on_frame) = self.raw.on_frame else {
            return;
        };
        on_frame(
            self.raw.ctx,
            frame.device_handle,
            frame.device_type,
            frame.point_count,
            frame.data_type,
            frame.payload.as_ptr(),
            frame.payload.len(),
        );
    }
}

impl Drop for ForeignHandler {
    fn drop(&mut self) {
        if let Some(release) = self.raw.release {
            release(self.raw.ctx);
        }
    }
}

/// One frame copied out of the delivery path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OwnedFrame {
    pub device_handle: i32,
    pub device_type: i32,
    pub point_count: i32,
    pub data_type: i32,
    pub payload: Vec<u8>,
}

impl From<Frame<'_>> for OwnedFrame {
    fn from(frame: Frame<'_>) -> Self {
        Self {
            device_handle: frame.device_handle,
            device_type: frame.device_type,
            point_count: frame.point_count,
            data_type: frame.data_type,
            payload: frame.payload.to_vec(),
        }
    }
}

/// Forwards each frame into a channel without ever blocking the delivery thread.
///
/// A full bounded channel or a hung-up receiver costs the frame, consistent with
/// the bridge-wide single-frame-loss policy; `dropped()` reports how often.
pub struct ChannelHandler {
    tx: Sender<OwnedFrame>,
    dropped: AtomicU64,
}

impl ChannelHandler {
    pub fn new(tx: Sender<OwnedFrame>) -> Self {
        Self {
            tx,
            dropped: AtomicU64::new(0),
        }
    }

    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

impl FrameHandler for ChannelHandler {
    fn on_frame(&self, frame: Frame<'_>) {
        if self.tx.try_send(OwnedFrame::from(frame)).is_err() {
            self.dropped.fetch_add(1, Ordering::Relaxed);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core::ffi::c_void;
    use parking_lot::Mutex;
    use std::sync::atomic::AtomicUsize;

    #[derive(Default)]
    struct RefCounts {
        retains: AtomicUsize,
        releases: AtomicUsize,
        calls: AtomicUsize,
        last_payload: Mutex<Vec<u8>>,
    }

    extern "C" fn count_retain(ctx: *mut c_void) {
        let counts = unsafe { &*(ctx as *const RefCounts) };
        counts.retains.fetch_add(1, Ordering::SeqCst);
    }

    extern "C" fn count_release(ctx: *mut c_void) {
        let counts = unsafe { &*(ctx as *const RefCounts) };
        counts.releases.fetch_add(1, Ordering::SeqCst);
    }

    extern "C" fn record_frame(
        ctx: *mut c_void,
        _device_handle: i32,
        _device_type: i32,
        _point_count: i32,
        _data_type: i32,
        payload: *const u8,
        payload_len: usize,
    ) {
        let counts = unsafe { &*(ctx as *const RefCounts) };
        counts.calls.fetch_add(1, Ordering::SeqCst);
        let bytes = if payload_len == 0 {
            Vec::new()
        } else {
            unsafe { core::slice::from_raw_parts(payload, payload_len) }.to_vec()
        };
        *counts.last_payload.lock() = bytes;
    }

    fn vtable_over(counts: &RefCounts) -> LkFrameHandler {
        LkFrameHandler {
            ctx: counts as *const RefCounts as *mut c_void,
            on_frame: Some(record_frame),
            retain: Some(count_retain),
            release: Some(count_release),
        }
    }

    fn frame(payload: &[u8]) -> Frame<'_> {
        Frame {
            device_handle: 7,
            device_type: 1,
            point_count: 10,
            data_type: 2,
            payload,
        }
    }

    #[test]
    fn foreign_handler_retains_on_construction_and_releases_on_drop() {
        let counts = RefCounts::default();
        let handler = ForeignHandler::from_raw(vtable_over(&counts)).expect("valid vtable");
        assert_eq!(counts.retains.load(Ordering::SeqCst), 1);
        assert_eq!(counts.releases.load(Ordering::SeqCst), 0);

        drop(handler);
        assert_eq!(counts.retains.load(Ordering::SeqCst), 1);
        assert_eq!(counts.releases.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn foreign_handler_rejects_missing_call_target() {
        let counts = RefCounts::default();
        let mut raw = vtable_over(&counts);
        raw.on_frame = None;

        let Err(err) = ForeignHandler::from_raw(raw) else {
            panic!("vtable without on_frame must be rejected");
        };
        assert_eq!(err, HandlerVTableError::MissingOnFrame);
        // A rejected vtable must not leak a reference.
        assert_eq!(counts.retains.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn foreign_handler_forwards_fields_and_payload() {
        let counts = RefCounts::default();
        let handler = ForeignHandler::from_raw(vtable_over(&counts)).expect("valid vtable");

        handler.on_frame(frame(&[0x01, 0x02, 0x03]));
        assert_eq!(counts.calls.load(Ordering::SeqCst), 1);
        assert_eq!(*counts.last_payload.lock(), vec![0x01, 0x02, 0x03]);

        handler.on_frame(frame(&[]));
        assert_eq!(counts.calls.load(Ordering::SeqCst), 2);
        assert!(counts.last_payload.lock().is_empty());
    }

    #[test]
    fn foreign_handler_tolerates_missing_refcount_slots() {
        let counts = RefCounts::default();
        let mut raw = vtable_over(&counts);
        raw.retain = None;
        raw.release = None;

        let handler = ForeignHandler::from_raw(raw).expect("valid vtable");
        handler.on_frame(frame(b"x"));
        drop(handler);
        assert_eq!(counts.calls.load(Ordering::SeqCst), 1);
        assert_eq!(counts.retains.load(Ordering::SeqCst), 0);
        assert_eq!(counts.releases.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn channel_handler_forwards_owned_copies() {
        let (tx, rx) = crossbeam_channel::unbounded();
        let handler = ChannelHandler::new(tx);

        handler.on_frame(frame(&[9, 8, 7]));
        let owned = rx.try_recv().expect("one frame queued");
        assert_eq!(owned.device_handle, 7);
        assert_eq!(owned.point_count, 10);
        assert_eq!(owned.payload, vec![9, 8, 7]);
        assert_eq!(handler.dropped(), 0);
    }

    #[test]
    fn channel_handler_drops_instead_of_blocking() {
        let (tx, rx) = crossbeam_channel::bounded(1);
        let handler = ChannelHandler::new(tx);

        handler.on_frame(frame(b"a"));
        handler.on_frame(frame(b"b"));
        assert_eq!(handler.dropped(), 1);
        assert_eq!(rx.try_recv().expect("first frame kept").payload, b"a");

        drop(rx);
        handler.on_frame(frame(b"c"));
        assert_eq!(handler.dropped(), 2);
    }
}
