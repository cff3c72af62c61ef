//! Bounded Pool of Fixed-Size Buffers
//!
//! The sender and receiver never allocate I/O buffers on their own; they
//! borrow them from a [`BufferPool`]. The pool bounds how many buffers are in
//! circulation and parks callers when all of them are out.
//!
//! ## Ownership
//!
//! ```text
//!            try_acquire()                      drop / release()
//!   free list ────────────> PooledBuffer (sender | receiver) ──────────┐
//!       ▲                                                               │
//!       │  no waiter                                 oldest live waiter │
//!       └──────────────────────────── release ──────────────────────────┤
//!                                                                       ▼
//!                                                            BufferWaiter resolves
//! ```
//!
//! A buffer is owned by exactly one of: the free list, a `PooledBuffer`
//! handle, or a oneshot channel in flight to a waiter. `outstanding + free`
//! never exceeds the configured maximum.

use crate::config::MIN_BUFFER_SIZE;
use bytes::BytesMut;
use std::collections::VecDeque;
use std::fmt;
use std::future::Future;
use std::ops::{Deref, DerefMut};
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard};
use std::task::{Context, Poll};
use tokio::sync::oneshot;
use tracing::trace;

struct PoolState {
    free: Vec<BytesMut>,
    outstanding: usize,
    waiters: VecDeque<oneshot::Sender<BytesMut>>,
}

struct PoolInner {
    name: &'static str,
    buffer_size: usize,
    max_buffers: usize,
    state: Mutex<PoolState>,
}

impl PoolInner {
    fn lock(&self) -> MutexGuard<'_, PoolState> {
        // Every critical section leaves the state consistent.
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn release(&self, mut buf: BytesMut) {
        buf.clear();
        let mut state = self.lock();

        // Hand the buffer straight to the oldest waiter still listening.
        while let Some(waiter) = state.waiters.pop_front() {
            match waiter.send(buf) {
                Ok(()) => {
                    trace!(pool = self.name, "Buffer handed to waiter");
                    return;
                }
                Err(returned) => buf = returned,
            }
        }

        state.outstanding = state.outstanding.saturating_sub(1);
        if buf.capacity() >= self.buffer_size
            && state.free.len() + state.outstanding < self.max_buffers
        {
            state.free.push(buf);
        }
    }
}

/// Snapshot of a pool's occupancy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BufferPoolStats {
    /// Buffers sitting in the free list
    pub free: usize,
    /// Buffers currently handed out
    pub outstanding: usize,
    /// Callers parked until a buffer is released
    pub waiting: usize,
    /// Configured maximum
    pub max_buffers: usize,
}

/// Result of [`BufferPool::try_acquire`].
pub enum Acquire {
    /// A buffer was available immediately.
    Ready(PooledBuffer),
    /// The pool is exhausted; the waiter resolves on the next release.
    Waiting(BufferWaiter),
}

/// A bounded pool of `buffer_size`-byte buffers.
///
/// Cloning the handle shares the same pool.
#[derive(Clone)]
pub struct BufferPool {
    inner: Arc<PoolInner>,
}

impl fmt::Debug for BufferPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BufferPool")
            .field("name", &self.inner.name)
            .field("buffer_size", &self.inner.buffer_size)
            .field("stats", &self.stats())
            .finish()
    }
}

impl BufferPool {
    /// Creates an empty pool. Buffers are allocated lazily up to `max_buffers`.
    ///
    /// `buffer_size` is raised to [`MIN_BUFFER_SIZE`] so any frame header
    /// fits in an empty buffer.
    pub fn new(name: &'static str, buffer_size: usize, max_buffers: usize) -> Self {
        Self {
            inner: Arc::new(PoolInner {
                name,
                buffer_size: buffer_size.max(MIN_BUFFER_SIZE),
                max_buffers: max_buffers.max(1),
                state: Mutex::new(PoolState {
                    free: Vec::new(),
                    outstanding: 0,
                    waiters: VecDeque::new(),
                }),
            }),
        }
    }

    /// Size in bytes of every buffer handed out.
    pub fn buffer_size(&self) -> usize {
        self.inner.buffer_size
    }

    /// Returns a buffer immediately if one is free (or may still be
    /// allocated); otherwise registers a waiter.
    pub fn try_acquire(&self) -> Acquire {
        let mut state = self.inner.lock();

        if let Some(buf) = state.free.pop() {
            state.outstanding += 1;
            return Acquire::Ready(PooledBuffer::new(buf, Arc::clone(&self.inner)));
        }

        if state.outstanding < self.inner.max_buffers {
            state.outstanding += 1;
            let buf = BytesMut::with_capacity(self.inner.buffer_size);
            return Acquire::Ready(PooledBuffer::new(buf, Arc::clone(&self.inner)));
        }

        let (tx, rx) = oneshot::channel();
        state.waiters.push_back(tx);
        trace!(
            pool = self.inner.name,
            waiting = state.waiters.len(),
            "Buffer pool exhausted, waiting"
        );
        Acquire::Waiting(BufferWaiter {
            rx: Some(rx),
            pool: Arc::clone(&self.inner),
        })
    }

    /// Waits until a buffer is available.
    pub async fn acquire(&self) -> PooledBuffer {
        match self.try_acquire() {
            Acquire::Ready(buf) => buf,
            Acquire::Waiting(waiter) => waiter.await,
        }
    }

    pub fn stats(&self) -> BufferPoolStats {
        let state = self.inner.lock();
        BufferPoolStats {
            free: state.free.len(),
            outstanding: state.outstanding,
            waiting: state.waiters.iter().filter(|w| !w.is_closed()).count(),
            max_buffers: self.inner.max_buffers,
        }
    }
}

/// Future returned when the pool is exhausted.
///
/// Dropping it gives up the place in line; a buffer already sent to it is
/// returned to the pool.
pub struct BufferWaiter {
    rx: Option<oneshot::Receiver<BytesMut>>,
    pool: Arc<PoolInner>,
}

impl Future for BufferWaiter {
    type Output = PooledBuffer;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        loop {
            let rx = match this.rx.as_mut() {
                Some(rx) => rx,
                None => {
                    // Already completed once; behave like a fresh acquire.
                    let pool = BufferPool {
                        inner: Arc::clone(&this.pool),
                    };
                    match pool.try_acquire() {
                        Acquire::Ready(buf) => return Poll::Ready(buf),
                        Acquire::Waiting(mut waiter) => {
                            this.rx = waiter.rx.take();
                            continue;
                        }
                    }
                }
            };

            match Pin::new(rx).poll(cx) {
                Poll::Ready(Ok(buf)) => {
                    this.rx = None;
                    return Poll::Ready(PooledBuffer::new(buf, Arc::clone(&this.pool)));
                }
                // Sender vanished without a buffer; queue up again.
                Poll::Ready(Err(_)) => this.rx = None,
                Poll::Pending => return Poll::Pending,
            }
        }
    }
}

impl Drop for BufferWaiter {
    fn drop(&mut self) {
        if let Some(mut rx) = self.rx.take() {
            rx.close();
            if let Ok(buf) = rx.try_recv() {
                self.pool.release(buf);
            }
        }
    }
}

/// A buffer on loan from a [`BufferPool`]; returned when dropped.
pub struct PooledBuffer {
    buf: BytesMut,
    pool: Arc<PoolInner>,
}

impl PooledBuffer {
    fn new(buf: BytesMut, pool: Arc<PoolInner>) -> Self {
        Self { buf, pool }
    }

    /// Fixed capacity of this buffer.
    pub fn limit(&self) -> usize {
        self.pool.buffer_size
    }

    /// Bytes that still fit before reaching the limit.
    pub fn remaining(&self) -> usize {
        self.pool.buffer_size.saturating_sub(self.buf.len())
    }

    /// Returns true if no more bytes fit.
    pub fn is_full(&self) -> bool {
        self.remaining() == 0
    }

    /// Returns the buffer to its pool. Same as dropping it.
    pub fn release(self) {}
}

impl Deref for PooledBuffer {
    type Target = BytesMut;

    fn deref(&self) -> &BytesMut {
        &self.buf
    }
}

impl DerefMut for PooledBuffer {
    fn deref_mut(&mut self) -> &mut BytesMut {
        &mut self.buf
    }
}

impl fmt::Debug for PooledBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PooledBuffer")
            .field("pool", &self.pool.name)
            .field("len", &self.buf.len())
            .field("limit", &self.pool.buffer_size)
            .finish()
    }
}

impl Drop for PooledBuffer {
    fn drop(&mut self) {
        let buf = std::mem::take(&mut self.buf);
        self.pool.release(buf);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio_test::{assert_pending, assert_ready, task};

    fn ready(pool: &BufferPool) -> PooledBuffer {
        match pool.try_acquire() {
            Acquire::Ready(buf) => buf,
            Acquire::Waiting(_) => panic!("expected a free buffer"),
        }
    }

    fn waiting(pool: &BufferPool) -> BufferWaiter {
        match pool.try_acquire() {
            Acquire::Ready(_) => panic!("expected the pool to be exhausted"),
            Acquire::Waiting(waiter) => waiter,
        }
    }

    #[test]
    fn test_tiny_buffer_size_is_raised_to_minimum() {
        let pool = BufferPool::new("test", 3, 1);
        assert_eq!(pool.buffer_size(), MIN_BUFFER_SIZE);
        assert_eq!(ready(&pool).limit(), MIN_BUFFER_SIZE);
    }

    #[test]
    fn test_buffers_have_fixed_limit() {
        let pool = BufferPool::new("test", 128, 2);
        let buf = ready(&pool);
        assert_eq!(buf.limit(), 128);
        assert_eq!(buf.remaining(), 128);
        assert!(buf.capacity() >= 128);
    }

    #[test]
    fn test_bound_is_respected() {
        let pool = BufferPool::new("test", 64, 3);
        let a = ready(&pool);
        let b = ready(&pool);
        let c = ready(&pool);
        let _w = waiting(&pool);

        let stats = pool.stats();
        assert_eq!(stats.outstanding, 3);
        assert_eq!(stats.free, 0);
        assert_eq!(stats.waiting, 1);

        drop(a);
        drop(b);
        drop(c);
        let stats = pool.stats();
        // One buffer went to the waiter, two came back to the free list
        assert_eq!(stats.outstanding, 1);
        assert_eq!(stats.free, 2);
        assert!(stats.outstanding + stats.free <= stats.max_buffers);
    }

    #[test]
    fn test_released_buffer_is_reused_and_cleared() {
        let pool = BufferPool::new("test", 64, 1);
        let mut buf = ready(&pool);
        buf.extend_from_slice(b"stale");
        buf.release();

        let buf = ready(&pool);
        assert!(buf.is_empty());
        assert_eq!(pool.stats().free, 0);
    }

    #[test]
    fn test_waiter_not_woken_without_release() {
        let pool = BufferPool::new("test", 64, 1);
        let held = ready(&pool);
        let mut waiter = task::spawn(waiting(&pool));

        assert_pending!(waiter.poll());
        // Acquiring and failing again does not wake the first waiter
        let _other = waiting(&pool);
        assert!(!waiter.is_woken());

        drop(held);
        assert!(waiter.is_woken());
        let buf = assert_ready!(waiter.poll());
        assert_eq!(buf.limit(), 64);
    }

    #[test]
    fn test_waiters_served_in_order_exactly_once() {
        let pool = BufferPool::new("test", 64, 1);
        let held = ready(&pool);
        let mut first = task::spawn(waiting(&pool));
        let mut second = task::spawn(waiting(&pool));
        assert_pending!(first.poll());
        assert_pending!(second.poll());

        drop(held);
        assert!(first.is_woken());
        assert!(!second.is_woken());
        let buf = assert_ready!(first.poll());
        assert_pending!(second.poll());

        drop(buf);
        assert!(second.is_woken());
        let _buf = assert_ready!(second.poll());
        assert_eq!(pool.stats().waiting, 0);
    }

    #[test]
    fn test_dropped_waiter_is_skipped() {
        let pool = BufferPool::new("test", 64, 1);
        let held = ready(&pool);
        let gone = waiting(&pool);
        let mut live = task::spawn(waiting(&pool));
        assert_pending!(live.poll());

        drop(gone);
        drop(held);
        assert!(live.is_woken());
        let _buf = assert_ready!(live.poll());
    }

    #[test]
    fn test_waiter_dropped_after_handoff_returns_buffer() {
        let pool = BufferPool::new("test", 64, 1);
        let held = ready(&pool);
        let waiter = waiting(&pool);

        // The buffer moves into the waiter's channel...
        drop(held);
        assert_eq!(pool.stats().outstanding, 1);

        // ...and comes back when the waiter is abandoned.
        drop(waiter);
        let stats = pool.stats();
        assert_eq!(stats.outstanding, 0);
        assert_eq!(stats.free, 1);
    }

    #[tokio::test]
    async fn test_acquire_waits_for_release() {
        let pool = BufferPool::new("test", 64, 1);
        let held = pool.acquire().await;

        let pool_clone = pool.clone();
        let handle = tokio::spawn(async move { pool_clone.acquire().await.limit() });

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!handle.is_finished());

        drop(held);
        assert_eq!(handle.await.unwrap(), 64);
    }

    #[tokio::test]
    async fn test_concurrent_borrowers_stay_within_bound() {
        let pool = BufferPool::new("test", 64, 4);
        let mut handles = Vec::new();

        for i in 0..32u8 {
            let pool = pool.clone();
            handles.push(tokio::spawn(async move {
                for _ in 0..50 {
                    let mut buf = pool.acquire().await;
                    buf.extend_from_slice(&[i]);
                    let stats = pool.stats();
                    assert!(stats.outstanding <= 4);
                    assert!(stats.outstanding + stats.free <= 4);
                    tokio::task::yield_now().await;
                }
            }));
        }

        for handle in handles {
            handle.await.unwrap();
        }

        let stats = pool.stats();
        assert_eq!(stats.outstanding, 0);
        assert!(stats.free <= 4);
        assert_eq!(stats.waiting, 0);
    }
}
