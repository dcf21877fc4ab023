//! Transient handle accounting
//!
//! Key and operation handles live in bounded secure memory. Every handle is
//! a guard drawn from a [`HandlePool`]; dropping the guard returns the slot,
//! so a handle is released on every exit path of the invocation that owns it.

use crate::error::{Result, TeeError};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::{debug, trace};

/// Default number of simultaneously live transient handles
pub const DEFAULT_MAX_TRANSIENT_HANDLES: usize = 16;

/// What a transient handle stands for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandleKind {
    /// Key material opened from persistent storage
    Key,
    /// Key material being generated
    Generation,
    /// Cipher, signature or digest operation state
    Operation,
}

#[derive(Debug)]
struct PoolState {
    in_use: AtomicUsize,
    capacity: usize,
}

/// Bounded pool of transient handles
#[derive(Debug, Clone)]
pub struct HandlePool {
    state: Arc<PoolState>,
}

impl HandlePool {
    pub fn new(capacity: usize) -> Self {
        Self {
            state: Arc::new(PoolState {
                in_use: AtomicUsize::new(0),
                capacity,
            }),
        }
    }

    /// Takes one slot, failing with `OutOfMemory` when the pool is exhausted
    pub fn acquire(&self, kind: HandleKind) -> Result<TransientHandle> {
        let capacity = self.state.capacity;
        self.state
            .in_use
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| {
                (n < capacity).then_some(n + 1)
            })
            .map_err(|n| {
                debug!(?kind, in_use = n, capacity, "transient handle pool exhausted");
                TeeError::OutOfMemory(format!("{} of {} handles in use", n, capacity))
            })?;
        trace!(?kind, "transient handle acquired");
        Ok(TransientHandle {
            kind,
            state: Arc::clone(&self.state),
        })
    }

    /// Number of live handles
    pub fn in_use(&self) -> usize {
        self.state.in_use.load(Ordering::Acquire)
    }

    pub fn capacity(&self) -> usize {
        self.state.capacity
    }
}

impl Default for HandlePool {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_TRANSIENT_HANDLES)
    }
}

/// A live slot in the pool, released on drop
#[derive(Debug)]
pub struct TransientHandle {
    kind: HandleKind,
    state: Arc<PoolState>,
}

impl TransientHandle {
    pub fn kind(&self) -> HandleKind {
        self.kind
    }
}

impl Drop for TransientHandle {
    fn drop(&mut self) {
        self.state.in_use.fetch_sub(1, Ordering::AcqRel);
        trace!(kind = ?self.kind, "transient handle released");
    }
}
