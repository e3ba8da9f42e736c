//! Size-classed buffer pool for the packet receive path.
//!
//! Receive loops acquire a [`PooledBuf`] sized for the incoming payload,
//! hand it to the packet handler, and the storage returns to its class
//! free list when the guard drops. The pool is bounded per class; when a
//! class is exhausted the caller gets `PoolError::Exhausted`, drops the
//! packet and logs.

use crate::error::PoolError;
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

/// Buffer pool tuning.
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Buffer sizes, ascending. A request is served from the smallest
    /// class that fits it.
    pub class_sizes: Vec<usize>,
    /// Maximum buffers alive (free + in flight) per class.
    pub max_per_class: usize,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            class_sizes: vec![512, 4 * 1024, 64 * 1024],
            max_per_class: 256,
        }
    }
}

struct SizeClass {
    size: usize,
    free: Mutex<Vec<Vec<u8>>>,
    /// Buffers currently alive for this class, free or in flight.
    alive: AtomicUsize,
    max: usize,
}

struct PoolInner {
    classes: Vec<SizeClass>,
}

/// Thread-safe size-classed buffer pool.
#[derive(Clone)]
pub struct BufferPool {
    inner: Arc<PoolInner>,
}

impl BufferPool {
    /// Create a pool from a configuration.
    ///
    /// Class sizes are sorted ascending; duplicates are kept (harmless).
    #[must_use]
    pub fn new(config: PoolConfig) -> Self {
        let mut sizes = config.class_sizes;
        sizes.sort_unstable();
        let classes = sizes
            .into_iter()
            .map(|size| SizeClass {
                size,
                free: Mutex::new(Vec::new()),
                alive: AtomicUsize::new(0),
                max: config.max_per_class,
            })
            .collect();
        Self {
            inner: Arc::new(PoolInner { classes }),
        }
    }

    /// Acquire a buffer able to hold `len` bytes.
    ///
    /// The returned guard dereferences to exactly `len` bytes.
    ///
    /// # Errors
    ///
    /// Returns `PoolError::Oversize` if `len` exceeds the largest class,
    /// `PoolError::Exhausted` if the matching class has no capacity left.
    pub fn acquire(&self, len: usize) -> Result<PooledBuf, PoolError> {
        let (class_idx, class) = self
            .inner
            .classes
            .iter()
            .enumerate()
            .find(|(_, c)| c.size >= len)
            .ok_or(PoolError::Oversize {
                len,
                max: self.inner.classes.last().map_or(0, |c| c.size),
            })?;

        let data = {
            let mut free = class.free.lock().expect("pool lock poisoned");
            match free.pop() {
                Some(buf) => buf,
                None => {
                    // No free buffer; mint one if the class has headroom.
                    if class.alive.load(Ordering::Relaxed) >= class.max {
                        return Err(PoolError::Exhausted {
                            class_size: class.size,
                        });
                    }
                    class.alive.fetch_add(1, Ordering::Relaxed);
                    vec![0u8; class.size]
                }
            }
        };

        Ok(PooledBuf {
            data,
            len,
            class_idx,
            pool: Arc::clone(&self.inner),
        })
    }

    /// Number of free buffers currently parked in the pool.
    #[must_use]
    pub fn free_count(&self) -> usize {
        self.inner
            .classes
            .iter()
            .map(|c| c.free.lock().expect("pool lock poisoned").len())
            .sum()
    }
}

impl Default for BufferPool {
    fn default() -> Self {
        Self::new(PoolConfig::default())
    }
}

/// Owned view into a pooled buffer; storage returns to the pool on drop.
pub struct PooledBuf {
    data: Vec<u8>,
    len: usize,
    class_idx: usize,
    pool: Arc<PoolInner>,
}

impl PooledBuf {
    /// Logical length of the buffer.
    #[must_use]
    pub fn len(&self) -> usize {
        self.len
    }

    /// Whether the logical length is zero.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Shrink or grow the logical length, bounded by the class size.
    pub fn set_len(&mut self, len: usize) {
        assert!(len <= self.data.len(), "len beyond class capacity");
        self.len = len;
    }

    /// Copy the logical contents into a fresh `Vec`.
    #[must_use]
    pub fn to_vec(&self) -> Vec<u8> {
        self[..].to_vec()
    }
}

impl Deref for PooledBuf {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        &self.data[..self.len]
    }
}

impl DerefMut for PooledBuf {
    fn deref_mut(&mut self) -> &mut [u8] {
        &mut self.data[..self.len]
    }
}

impl std::fmt::Debug for PooledBuf {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PooledBuf")
            .field("len", &self.len)
            .field("class", &self.pool.classes[self.class_idx].size)
            .finish()
    }
}

impl Drop for PooledBuf {
    fn drop(&mut self) {
        let class = &self.pool.classes[self.class_idx];
        let data = std::mem::take(&mut self.data);
        let mut free = class.free.lock().expect("pool lock poisoned");
        free.push(data);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn small_pool() -> BufferPool {
        BufferPool::new(PoolConfig {
            class_sizes: vec![64, 1024],
            max_per_class: 2,
        })
    }

    #[test]
    fn test_acquire_and_release() {
        let pool = small_pool();
        {
            let buf = pool.acquire(10).unwrap();
            assert_eq!(buf.len(), 10);
        }
        // Released buffer is parked, not destroyed.
        assert_eq!(pool.free_count(), 1);
    }

    #[test]
    fn test_smallest_fitting_class() {
        let pool = small_pool();
        let small = pool.acquire(64).unwrap();
        let big = pool.acquire(65).unwrap();
        assert_eq!(small.data.len(), 64);
        assert_eq!(big.data.len(), 1024);
    }

    #[test]
    fn test_exhaustion() {
        let pool = small_pool();
        let _a = pool.acquire(10).unwrap();
        let _b = pool.acquire(10).unwrap();
        assert!(matches!(
            pool.acquire(10),
            Err(PoolError::Exhausted { class_size: 64 })
        ));
    }

    #[test]
    fn test_release_unblocks_acquire() {
        let pool = small_pool();
        let a = pool.acquire(10).unwrap();
        let _b = pool.acquire(10).unwrap();
        drop(a);
        assert!(pool.acquire(10).is_ok());
    }

    #[test]
    fn test_oversize_rejected() {
        let pool = small_pool();
        assert!(matches!(
            pool.acquire(4096),
            Err(PoolError::Oversize { len: 4096, max: 1024 })
        ));
    }

    #[test]
    fn test_mutation_via_deref() {
        let pool = small_pool();
        let mut buf = pool.acquire(4).unwrap();
        buf.copy_from_slice(&[1, 2, 3, 4]);
        assert_eq!(&buf[..], &[1, 2, 3, 4]);
        buf.set_len(2);
        assert_eq!(&buf[..], &[1, 2]);
    }

    #[test]
    fn test_zero_len_buffer() {
        let pool = small_pool();
        let buf = pool.acquire(0).unwrap();
        assert!(buf.is_empty());
    }

    #[test]
    fn test_pool_is_shared_across_clones() {
        let pool = small_pool();
        let clone = pool.clone();
        let _a = pool.acquire(10).unwrap();
        let _b = clone.acquire(10).unwrap();
        assert!(clone.acquire(10).is_err());
    }
}
