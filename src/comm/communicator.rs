//! Thin façade over intra-process (threaded) or inter-process (MPI) message
//! passing.
//!
//! Messages are *contiguous byte slices* (no zero-copy guarantees).
//! All handles are **waitable** but non-blocking -- exchange.rs calls
//! `.wait()` before it trusts that a buffer is ready.

use bytes::Bytes;
use dashmap::DashMap;
use once_cell::sync::Lazy;
use std::collections::VecDeque;
use std::sync::Arc;
use std::thread::JoinHandle;

/// Non-blocking communication interface (minimal by design).
///
/// The sparsity-pattern collectives (`crate::comm::exchange`) are built
/// entirely from `rank`/`size` and these two point-to-point primitives.
pub trait Communicator: Send + Sync + 'static {
    /// Handle returned by `isend`.
    type SendHandle: Wait;
    /// Handle returned by `irecv`.
    type RecvHandle: Wait;

    /// This process's rank, in `0..size()`.
    fn rank(&self) -> usize;
    /// Number of participating processes.
    fn size(&self) -> usize;

    fn isend(&self, peer: usize, tag: u16, buf: &[u8]) -> Self::SendHandle;
    fn irecv(&self, peer: usize, tag: u16, buf: &mut [u8]) -> Self::RecvHandle;
}

/// Anything that can be waited on.
pub trait Wait {
    /// Wait for completion and return the received data (if any).
    fn wait(self) -> Option<Vec<u8>>;
}

/// Typed message tag. `base()` is the raw wire tag; `offset(k)` derives the
/// tag of the k-th stage of a multi-stage collective.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct CommTag(pub u16);

impl CommTag {
    pub const fn base(self) -> u16 {
        self.0
    }
    pub const fn offset(self, delta: u16) -> CommTag {
        CommTag(self.0 + delta)
    }
}

/// Compile-time no-op comm for pure serial runs and unit tests.
#[derive(Clone, Debug, Default)]
pub struct NoComm;

impl Wait for () {
    fn wait(self) -> Option<Vec<u8>> {
        None
    }
}

impl Communicator for NoComm {
    type SendHandle = ();
    type RecvHandle = ();

    fn rank(&self) -> usize {
        0
    }
    fn size(&self) -> usize {
        1
    }
    fn isend(&self, _peer: usize, _tag: u16, _buf: &[u8]) {}
    fn irecv(&self, _peer: usize, _tag: u16, _buf: &mut [u8]) {}
}

// --- ThreadComm: intra-process ranks over a shared mailbox ---
type Key = (usize, usize, u16); // (src, dst, tag)

static MAILBOX: Lazy<DashMap<Key, VecDeque<Bytes>>> = Lazy::new(DashMap::new);

pub struct LocalHandle {
    buf: Arc<parking_lot::Mutex<Option<Vec<u8>>>>,
    handle: Option<JoinHandle<()>>,
}

impl Wait for LocalHandle {
    fn wait(mut self) -> Option<Vec<u8>> {
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
        let mut guard = self.buf.lock();
        guard.take()
    }
}

/// One "rank" of an in-process communicator group. Ranks share a global
/// mailbox keyed by `(src, dst, tag)`; messages between the same pair with
/// the same tag are delivered FIFO. Intended for tests and single-node runs;
/// concurrent groups must use disjoint tag ranges.
#[derive(Clone, Debug)]
pub struct ThreadComm {
    rank: usize,
    size: usize,
}

impl ThreadComm {
    pub fn new(rank: usize, size: usize) -> Self {
        assert!(rank < size, "rank {rank} out of range for size {size}");
        Self { rank, size }
    }
}

impl Communicator for ThreadComm {
    type SendHandle = ();
    type RecvHandle = LocalHandle;

    fn rank(&self) -> usize {
        self.rank
    }
    fn size(&self) -> usize {
        self.size
    }

    fn isend(&self, peer: usize, tag: u16, buf: &[u8]) {
        let key = (self.rank, peer, tag);
        MAILBOX
            .entry(key)
            .or_default()
            .push_back(Bytes::from(buf.to_vec()));
    }

    fn irecv(&self, peer: usize, tag: u16, buf: &mut [u8]) -> LocalHandle {
        let key = (peer, self.rank, tag);
        let buf_arc = Arc::new(parking_lot::Mutex::new(None));
        let buf_arc_clone = buf_arc.clone();
        let buf_len = buf.len();
        let handle = std::thread::spawn(move || {
            loop {
                let msg = MAILBOX.get_mut(&key).and_then(|mut q| q.pop_front());
                if let Some(bytes) = msg {
                    let n = bytes.len().min(buf_len);
                    *buf_arc_clone.lock() = Some(bytes[..n].to_vec());
                    break;
                }
                std::thread::yield_now();
            }
        });
        LocalHandle {
            buf: buf_arc,
            handle: Some(handle),
        }
    }
}

// --- MPI backend (feature = "mpi-support") ---
#[cfg(feature = "mpi-support")]
mod mpi_backend {
    use super::{Communicator, Wait};
    use mpi::request::{Request, StaticScope};
    use mpi::topology::SimpleCommunicator;
    use mpi::traits::*;

    pub struct MpiComm {
        _universe: mpi::environment::Universe,
        world: SimpleCommunicator,
        rank: usize,
        size: usize,
    }

    impl MpiComm {
        /// Initialize MPI and bind to `MPI_COMM_WORLD`. Failure to bring up
        /// the MPI runtime is unrecoverable.
        pub fn new() -> Self {
            let universe = mpi::initialize().expect("MPI initialization failed");
            let world = universe.world();
            let rank = world.rank() as usize;
            let size = world.size() as usize;
            Self {
                _universe: universe,
                world,
                rank,
                size,
            }
        }
    }

    // The world communicator is process-global and only touched through
    // immediate-mode operations.
    unsafe impl Send for MpiComm {}
    unsafe impl Sync for MpiComm {}

    pub struct MpiSendHandle {
        req: Request<'static, [u8], StaticScope>,
        buf: *mut [u8],
    }
    unsafe impl Send for MpiSendHandle {}

    impl Wait for MpiSendHandle {
        fn wait(self) -> Option<Vec<u8>> {
            self.req.wait_without_status();
            // Reclaim the staging buffer leaked in `isend`.
            drop(unsafe { Box::from_raw(self.buf) });
            None
        }
    }

    pub struct MpiRecvHandle {
        req: Request<'static, [u8], StaticScope>,
        buf: *mut [u8],
    }
    unsafe impl Send for MpiRecvHandle {}

    impl Wait for MpiRecvHandle {
        fn wait(self) -> Option<Vec<u8>> {
            self.req.wait_without_status();
            let boxed = unsafe { Box::from_raw(self.buf) };
            Some(boxed.into_vec())
        }
    }

    impl Communicator for MpiComm {
        type SendHandle = MpiSendHandle;
        type RecvHandle = MpiRecvHandle;

        fn rank(&self) -> usize {
            self.rank
        }
        fn size(&self) -> usize {
            self.size
        }

        fn isend(&self, peer: usize, tag: u16, buf: &[u8]) -> MpiSendHandle {
            // Requests under StaticScope need a 'static buffer; stage a copy
            // and reclaim it when the handle is waited on.
            let ptr: *mut [u8] = Box::into_raw(buf.to_vec().into_boxed_slice());
            let slice: &'static [u8] = unsafe { &*ptr };
            let req = self
                .world
                .process_at_rank(peer as i32)
                .immediate_send_with_tag(StaticScope, slice, tag as i32);
            MpiSendHandle { req, buf: ptr }
        }

        fn irecv(&self, peer: usize, tag: u16, buf: &mut [u8]) -> MpiRecvHandle {
            let ptr: *mut [u8] = Box::into_raw(vec![0u8; buf.len()].into_boxed_slice());
            let slice: &'static mut [u8] = unsafe { &mut *ptr };
            let req = self
                .world
                .process_at_rank(peer as i32)
                .immediate_receive_into_with_tag(StaticScope, slice, tag as i32);
            MpiRecvHandle { req, buf: ptr }
        }
    }
}

#[cfg(feature = "mpi-support")]
pub use mpi_backend::MpiComm;
