//! MIT License
//!
//! Copyright (c) 2026 Fei Wang
//!
//! 读写信号量 (rw_semaphore)
//!
//! 对应 Linux 的 include/linux/rwsem.h，这里是自旋实现。
//! 与 `spin::RwLock` 不同，加锁和解锁是分开的调用，
//! 便于 lock_rename() 这类跨函数持锁的场景。
//!
//! 状态编码：
//! - `0`：空闲
//! - `> 0`：读者数量
//! - `WRITER`：被写者持有

use core::hint::spin_loop;
use core::sync::atomic::{AtomicIsize, AtomicU64, Ordering};

const WRITER: isize = -1;

pub struct RwSemaphore {
    state: AtomicIsize,
    /// 累计加锁次数（读 + 写），用于观测锁竞争
    acquisitions: AtomicU64,
}

impl RwSemaphore {
    pub const fn new() -> Self {
        Self {
            state: AtomicIsize::new(0),
            acquisitions: AtomicU64::new(0),
        }
    }

    /// 获取读锁
    pub fn down_read(&self) {
        loop {
            if self.try_down_read() {
                return;
            }
            spin_loop();
        }
    }

    pub fn try_down_read(&self) -> bool {
        let cur = self.state.load(Ordering::Relaxed);
        if cur >= 0
            && self
                .state
                .compare_exchange_weak(cur, cur + 1, Ordering::Acquire, Ordering::Relaxed)
                .is_ok()
        {
            self.acquisitions.fetch_add(1, Ordering::Relaxed);
            return true;
        }
        false
    }

    pub fn up_read(&self) {
        let prev = self.state.fetch_sub(1, Ordering::Release);
        debug_assert!(prev > 0, "up_read on rwsem not held for read");
    }

    /// 获取写锁
    pub fn down_write(&self) {
        loop {
            if self.try_down_write() {
                return;
            }
            spin_loop();
        }
    }

    pub fn try_down_write(&self) -> bool {
        if self
            .state
            .compare_exchange(0, WRITER, Ordering::Acquire, Ordering::Relaxed)
            .is_ok()
        {
            self.acquisitions.fetch_add(1, Ordering::Relaxed);
            return true;
        }
        false
    }

    pub fn up_write(&self) {
        let prev = self.state.swap(0, Ordering::Release);
        debug_assert_eq!(prev, WRITER, "up_write on rwsem not held for write");
    }

    pub fn is_locked(&self) -> bool {
        self.state.load(Ordering::Relaxed) != 0
    }

    pub fn is_write_locked(&self) -> bool {
        self.state.load(Ordering::Relaxed) == WRITER
    }

    pub fn acquisitions(&self) -> u64 {
        self.acquisitions.load(Ordering::Relaxed)
    }
}

impl Default for RwSemaphore {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_readers_share_writer_excludes() {
        let sem = RwSemaphore::new();
        sem.down_read();
        assert!(sem.try_down_read());
        assert!(!sem.try_down_write());
        sem.up_read();
        sem.up_read();
        assert!(sem.try_down_write());
        assert!(!sem.try_down_read());
        assert!(sem.is_write_locked());
        sem.up_write();
        assert!(!sem.is_locked());
        assert_eq!(sem.acquisitions(), 3);
    }
}
