//! Connection allocation and bandwidth limiting shared by every storage
//! backend.

use std::collections::VecDeque;
use std::io::{self, Write};
use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};

/// Relative priority used to order waiters on a [`ServerAllocator`]. Higher
/// variants are served first among currently-waiting callers; this is a
/// scheduling hint, not a real-time guarantee.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Priority {
    Low,
    Normal,
    High,
}

struct AllocatorState {
    in_use: usize,
    limit: usize,
    waiters: VecDeque<Priority>,
}

/// Per-host counted semaphore bounding concurrent connections, with
/// priority-ordered admission — lets a backend cap how many simultaneous
/// sessions it opens against one server.
pub struct ServerAllocator {
    state: Mutex<AllocatorState>,
    cond: Condvar,
}

impl ServerAllocator {
    pub fn new(limit: usize) -> Self {
        Self {
            state: Mutex::new(AllocatorState { in_use: 0, limit: limit.max(1), waiters: VecDeque::new() }),
            cond: Condvar::new(),
        }
    }

    /// Block until a connection slot is free, honoring `priority` among
    /// other waiters. Returns a guard that releases the slot on drop.
    pub fn acquire(self: &Arc<Self>, priority: Priority) -> ServerLease {
        let mut guard = self.state.lock().unwrap();
        guard.waiters.push_back(priority);
        loop {
            let highest_waiting = guard.waiters.iter().copied().max();
            let my_turn = highest_waiting == Some(priority) && guard.in_use < guard.limit;
            if my_turn {
                guard.in_use += 1;
                if let Some(pos) = guard.waiters.iter().position(|p| *p == priority) {
                    guard.waiters.remove(pos);
                }
                break;
            }
            guard = self.cond.wait(guard).unwrap();
        }
        drop(guard);
        ServerLease { allocator: Arc::clone(self), priority }
    }

    /// Whether anyone is currently blocked waiting for a slot on this
    /// allocator, of any priority.
    pub fn has_waiters(&self) -> bool {
        !self.state.lock().unwrap().waiters.is_empty()
    }
}

pub struct ServerLease {
    allocator: Arc<ServerAllocator>,
    priority: Priority,
}

impl ServerLease {
    /// True once a strictly higher-priority caller is waiting on this
    /// allocator — a cooperative holder should release at the next fragment
    /// boundary when this flips to true.
    pub fn is_allocation_pending(&self) -> bool {
        let guard = self.allocator.state.lock().unwrap();
        guard.waiters.iter().any(|p| *p > self.priority)
    }
}

impl Drop for ServerLease {
    fn drop(&mut self) {
        let mut guard = self.allocator.state.lock().unwrap();
        guard.in_use = guard.in_use.saturating_sub(1);
        drop(guard);
        self.allocator.cond.notify_all();
    }
}

/// Token-bucket bandwidth limiter applied around outbound writes. The
/// schedule is a caller-supplied bytes-per-second ceiling; callers consult
/// it between chunks so a single huge fragment doesn't starve the limiter's
/// granularity.
pub struct BandwidthLimiter {
    bytes_per_second: u64,
    tokens: Mutex<(f64, Instant)>,
}

impl BandwidthLimiter {
    pub fn new(bytes_per_second: u64) -> Self {
        Self { bytes_per_second, tokens: Mutex::new((bytes_per_second as f64, Instant::now())) }
    }

    /// Unlimited bandwidth — acquire never blocks.
    pub fn unlimited() -> Self {
        Self::new(0)
    }

    /// Block as needed so that, averaged over time, no more than
    /// `bytes_per_second` bytes pass through this limiter.
    pub fn acquire(&self, bytes: usize) {
        if self.bytes_per_second == 0 {
            return;
        }
        let mut guard = self.tokens.lock().unwrap();
        let (tokens, last) = &mut *guard;
        let now = Instant::now();
        let elapsed = now.duration_since(*last).as_secs_f64();
        *tokens = (*tokens + elapsed * self.bytes_per_second as f64).min(self.bytes_per_second as f64);
        *last = now;

        let need = bytes as f64;
        if *tokens >= need {
            *tokens -= need;
            return;
        }
        let deficit = need - *tokens;
        let wait = Duration::from_secs_f64(deficit / self.bytes_per_second as f64);
        *tokens = 0.0;
        drop(guard);
        std::thread::sleep(wait);
    }
}

/// Buffered writer with a configurable flush threshold, wrapping any
/// storage handle so small fragment writes become large sequential ones.
pub struct WriteBuffer<W: Write> {
    inner: W,
    buf: Vec<u8>,
    capacity: usize,
    pub bytes_written: u64,
}

impl<W: Write> WriteBuffer<W> {
    pub fn new(inner: W, capacity: usize) -> Self {
        Self { inner, buf: Vec::with_capacity(capacity), capacity: capacity.max(1), bytes_written: 0 }
    }

    fn flush_if_full(&mut self) -> io::Result<()> {
        if self.buf.len() >= self.capacity {
            self.inner.write_all(&self.buf)?;
            self.buf.clear();
        }
        Ok(())
    }
}

impl<W: Write> Write for WriteBuffer<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if buf.len() >= self.capacity {
            self.inner.write_all(&self.buf)?;
            self.buf.clear();
            self.inner.write_all(buf)?;
        } else {
            self.buf.extend_from_slice(buf);
            self.flush_if_full()?;
        }
        self.bytes_written += buf.len() as u64;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        if !self.buf.is_empty() {
            self.inner.write_all(&self.buf)?;
            self.buf.clear();
        }
        self.inner.flush()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_buffer_flushes() {
        let mut buf: Vec<u8> = Vec::new();
        {
            let mut wb = WriteBuffer::new(&mut buf, 8);
            wb.write_all(b"hello").unwrap();
            wb.write_all(b" world!").unwrap();
            wb.flush().unwrap();
        }
        assert_eq!(&buf, b"hello world!");
    }

    #[test]
    fn allocator_respects_limit() {
        let allocator = Arc::new(ServerAllocator::new(1));
        let lease = allocator.acquire(Priority::Normal);
        assert_eq!(allocator.state.lock().unwrap().in_use, 1);
        drop(lease);
        assert_eq!(allocator.state.lock().unwrap().in_use, 0);
    }

    #[test]
    fn high_priority_waiter_flips_allocation_pending_on_holder() {
        let allocator = Arc::new(ServerAllocator::new(1));
        let lease = allocator.acquire(Priority::Low);
        assert!(!lease.is_allocation_pending());
        allocator.state.lock().unwrap().waiters.push_back(Priority::High);
        assert!(lease.is_allocation_pending());
    }

    #[test]
    fn unlimited_bandwidth_never_sleeps_meaningfully() {
        let limiter = BandwidthLimiter::unlimited();
        let start = Instant::now();
        limiter.acquire(10 * 1024 * 1024);
        assert!(start.elapsed() < Duration::from_millis(50));
    }
}
