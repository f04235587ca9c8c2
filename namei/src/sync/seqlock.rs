//! MIT License
//!
//! Copyright (c) 2026 Fei Wang
//!
//! 顺序计数器 (seqcount) 与顺序锁 (seqlock)
//!
//! 对应 Linux 的 include/linux/seqlock.h
//!
//! 乐观读协议：
//! 1. `read_begin()` 读取偶数代号（奇数表示有写者正在修改）
//! 2. 读取被保护的数据
//! 3. `read_retry(start)` 重新比较代号，不一致说明数据可能被撕裂，需要重来
//!
//! mount_lock、rename_lock 以及每个 dentry 的 d_seq 都使用同一个原语。

use core::hint::spin_loop;
use core::sync::atomic::{fence, AtomicU32, Ordering};

/// 顺序计数器
///
/// 只提供代号，不负责写者之间的互斥；写者需要自己持有外部锁。
pub struct SeqCount {
    sequence: AtomicU32,
}

impl SeqCount {
    pub const fn new() -> Self {
        Self {
            sequence: AtomicU32::new(0),
        }
    }

    /// 开始一次乐观读，等待正在进行的写者结束
    #[inline]
    pub fn read_begin(&self) -> u32 {
        loop {
            let seq = self.sequence.load(Ordering::Acquire);
            if seq & 1 == 0 {
                return seq;
            }
            spin_loop();
        }
    }

    /// 读取当前代号，不等待写者
    ///
    /// 如果有写者在进行，返回的奇数代号保证让随后的 `read_retry` 失败。
    #[inline]
    pub fn raw_read(&self) -> u32 {
        self.sequence.load(Ordering::Acquire)
    }

    /// 检查读期间数据是否被修改
    #[inline]
    pub fn read_retry(&self, start: u32) -> bool {
        fence(Ordering::Acquire);
        start & 1 != 0 || self.sequence.load(Ordering::Relaxed) != start
    }

    /// 进入写临界区（代号变为奇数）
    #[inline]
    pub fn write_begin(&self) {
        self.sequence.fetch_add(1, Ordering::Relaxed);
        fence(Ordering::Release);
    }

    /// 离开写临界区（代号变回偶数）
    #[inline]
    pub fn write_end(&self) {
        self.sequence.fetch_add(1, Ordering::Release);
    }

    /// 使所有进行中的读者失效，不需要写临界区
    #[inline]
    pub fn invalidate(&self) {
        self.sequence.fetch_add(2, Ordering::Release);
    }

    /// 通用乐观读：重复执行 `f` 直到读到一致的快照
    pub fn read<R, F: FnMut() -> R>(&self, mut f: F) -> R {
        loop {
            let seq = self.read_begin();
            let value = f();
            if !self.read_retry(seq) {
                return value;
            }
        }
    }

    /// 写临界区守卫
    pub fn write(&self) -> SeqCountWriteGuard<'_> {
        self.write_begin();
        SeqCountWriteGuard { seq: self }
    }
}

impl Default for SeqCount {
    fn default() -> Self {
        Self::new()
    }
}

pub struct SeqCountWriteGuard<'a> {
    seq: &'a SeqCount,
}

impl Drop for SeqCountWriteGuard<'_> {
    fn drop(&mut self) {
        self.seq.write_end();
    }
}

/// 顺序锁：顺序计数器 + 写者互斥锁
///
/// 对应 Linux 的 seqlock_t
pub struct SeqLock {
    seqcount: SeqCount,
    lock: spin::Mutex<()>,
}

impl SeqLock {
    pub const fn new() -> Self {
        Self {
            seqcount: SeqCount::new(),
            lock: spin::Mutex::new(()),
        }
    }

    #[inline]
    pub fn read_begin(&self) -> u32 {
        self.seqcount.read_begin()
    }

    #[inline]
    pub fn read_retry(&self, start: u32) -> bool {
        self.seqcount.read_retry(start)
    }

    pub fn read<R, F: FnMut() -> R>(&self, f: F) -> R {
        self.seqcount.read(f)
    }

    /// 获取写锁并进入写临界区
    pub fn write_lock(&self) -> SeqLockWriteGuard<'_> {
        let guard = self.lock.lock();
        self.seqcount.write_begin();
        SeqLockWriteGuard {
            seqlock: self,
            _guard: guard,
        }
    }

    /// 只获取写者互斥，不改变代号（read_seqlock_excl）
    pub fn lock_excl(&self) -> spin::MutexGuard<'_, ()> {
        self.lock.lock()
    }
}

impl Default for SeqLock {
    fn default() -> Self {
        Self::new()
    }
}

pub struct SeqLockWriteGuard<'a> {
    seqlock: &'a SeqLock,
    _guard: spin::MutexGuard<'a, ()>,
}

impl Drop for SeqLockWriteGuard<'_> {
    fn drop(&mut self) {
        // 先结束写临界区，再释放互斥锁（字段 _guard 在此之后析构）
        self.seqlock.seqcount.write_end();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_seqcount_detects_writer() {
        let seq = SeqCount::new();
        let start = seq.read_begin();
        assert!(!seq.read_retry(start));
        {
            let _w = seq.write();
            assert!(seq.read_retry(start));
            assert_eq!(seq.raw_read() & 1, 1);
        }
        assert!(seq.read_retry(start));
        let again = seq.read_begin();
        assert!(!seq.read_retry(again));
    }

    #[test]
    fn test_odd_start_always_retries() {
        let seq = SeqCount::new();
        seq.write_begin();
        let odd = seq.raw_read();
        seq.write_end();
        assert!(seq.read_retry(odd));
    }

    #[test]
    fn test_seqlock_read_snapshot() {
        use core::sync::atomic::AtomicU64;
        let lock = SeqLock::new();
        let a = AtomicU64::new(1);
        let b = AtomicU64::new(1);
        {
            let _w = lock.write_lock();
            a.store(2, Ordering::Relaxed);
            b.store(2, Ordering::Relaxed);
        }
        let (x, y) = lock.read(|| (a.load(Ordering::Relaxed), b.load(Ordering::Relaxed)));
        assert_eq!(x, y);
    }
}
