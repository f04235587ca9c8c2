//! MIT License
//!
//! Copyright (c) 2026 Fei Wang
//!
//! 同步原语 (Synchronization Primitives)
//!
//! 遵循 Linux 内核的同步机制设计：
//! - `include/linux/seqlock.h` - 顺序计数器 / 顺序锁
//! - `include/linux/rwsem.h` - 读写信号量（inode 的 i_rwsem）
//!
//! 互斥锁和读写自旋锁直接使用 `spin` crate。

pub mod rwsem;
pub mod seqlock;

pub use rwsem::RwSemaphore;
pub use seqlock::{SeqCount, SeqCountWriteGuard, SeqLock, SeqLockWriteGuard};
