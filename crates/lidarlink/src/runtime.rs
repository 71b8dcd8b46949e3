//! Thread attachment to the embedding host runtime.
//!
//! Runtimes that require per-thread registration (a VM, a scripting engine, an
//! actor system with thread affinity) expose attach/detach hooks; the relay
//! wraps every handler invocation in a [`RuntimeCrossing`] so a thread the
//! embedder attached stays attached and a thread the bridge attached gets
//! detached again.

use lidarlink_abi::{LIDARLINK_ABI_VERSION, LkHostRuntime};
use thiserror::Error;

/// Thread-attachment contract of the embedding runtime.
///
/// All three methods must be callable from any thread; frames arrive on
/// whichever threads the SDK owns.
pub trait RuntimeHost: Send + Sync {
    /// True when the calling thread already holds an attachment.
    fn thread_is_attached(&self) -> bool;
    /// Register the calling thread. False when the runtime cannot accept it.
    fn attach_thread(&self) -> bool;
    /// Unregister the calling thread; pairs with one successful
    /// [`attach_thread`](RuntimeHost::attach_thread).
    fn detach_thread(&self);
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum AttachError {
    #[error("host runtime rejected thread attachment")]
    Rejected,
}

/// Scoped attachment of the current thread to the host runtime.
///
/// Entering reuses an attachment the thread already holds; otherwise it attaches
/// fresh and remembers that it did. Drop detaches only in the fresh case, so
/// threads owned by the embedder keep their attachment across deliveries.
#[must_use = "dropping the crossing immediately detaches a fresh attachment"]
pub struct RuntimeCrossing<'a> {
    host: &'a dyn RuntimeHost,
    owned: bool,
}

impl<'a> RuntimeCrossing<'a> {
    pub fn enter(host: &'a dyn RuntimeHost) -> Result<Self, AttachError> {
        if host.thread_is_attached() {
            return Ok(Self { host, owned: false });
        }
        if !host.attach_thread() {
            return Err(AttachError::Rejected);
        }
        Ok(Self { host, owned: true })
    }

    /// True when this crossing created the attachment (and will release it).
    pub fn is_fresh(&self) -> bool {
        self.owned
    }
}

impl Drop for RuntimeCrossing<'_> {
    fn drop(&mut self) {
        if self.owned {
            self.host.detach_thread();
        }
    }
}

/// In-process embedding: every thread is always attached.
#[derive(Debug, Default, Clone, Copy)]
pub struct LocalRuntime;

impl RuntimeHost for LocalRuntime {
    fn thread_is_attached(&self) -> bool {
        true
    }

    fn attach_thread(&self) -> bool {
        true
    }

    fn detach_thread(&self) {}
}

/// Why a host runtime vtable was rejected at capture time.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CaptureError {
    #[error("host runtime abi mismatch: bridge speaks {bridge}, host sent {host}")]
    AbiMismatch { bridge: u32, host: u32 },
}

/// A captured host runtime vtable.
///
/// Capture happens once, at bridge construction, and copies the vtable; the
/// per-frame path only reads the copy. Missing optional slots fall back to the
/// semantics documented on [`LkHostRuntime`].
pub struct ForeignRuntime {
    vtable: LkHostRuntime,
}

impl ForeignRuntime {
    pub fn capture(vtable: LkHostRuntime) -> Result<Self, CaptureError> {
        if vtable.abi_version != LIDARLINK_ABI_VERSION {
            return Err(CaptureError::AbiMismatch {
                bridge: LIDARLINK_ABI_VERSION,
                host: vtable.abi_version,
            });
        }
        Ok(Self { vtable })
    }
}

impl RuntimeHost for ForeignRuntime {
    fn thread_is_attached(&self) -> bool {
        // No attachment machinery at all means every thread counts as attached.
        if self.vtable.attach_thread.is_none() {
            return true;
        }
        let Some(is_attached) = self.vtable.thread_is_attached else {
            return false;
        };
        is_attached(self.vtable.user_data)
    }

    fn attach_thread(&self) -> bool {
        let Some(attach) = self.vtable.attach_thread else {
            return true;
        };
        attach(self.vtable.user_data)
    }

    fn detach_thread(&self) {
        let Some(detach) = self.vtable.detach_thread else {
            return;
        };
        detach(self.vtable.user_data);
    }
}
