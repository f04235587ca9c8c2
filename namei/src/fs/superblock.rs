//! MIT License
//!
//! Copyright (c) 2026 Fei Wang
//!
//! 超级块和文件系统类型
//!
//! 遵循 Linux 内核的超级块设计 (fs/super.c, include/linux/fs.h)
//!
//! 路径解析用到的超级块状态：
//! - 只读标志与 POSIX ACL 支持 (`SB_RDONLY` / `SB_POSIXACL`)
//! - `s_max_links`：目录硬链接上限
//! - `s_vfs_rename_mutex`：跨目录 rename 的串行化锁
//! - 本文件系统的 dentry 哈希表与默认 dentry 操作

use alloc::sync::Arc;
use bitflags::bitflags;
use core::sync::atomic::{AtomicU32, AtomicU64, Ordering};

use crate::fs::dentry::{Dentry, DentryHashTable, DentryOperations};
use crate::sync::RwSemaphore;

bitflags! {
    /// s_flags (include/linux/fs.h)
    #[derive(Debug, Copy, Clone, PartialEq, Eq)]
    pub struct SuperBlockFlags: u32 {
        /// 只读
        const SB_RDONLY   = 1 << 0;
        const SB_NOSUID   = 1 << 1;
        const SB_NODEV    = 1 << 2;
        const SB_NOEXEC   = 1 << 3;
        const SB_NOATIME  = 1 << 10;
        /// 支持 POSIX ACL
        const SB_POSIXACL = 1 << 16;
    }
}

bitflags! {
    /// file_system_type.fs_flags
    #[derive(Debug, Copy, Clone, PartialEq, Eq)]
    pub struct FsTypeFlags: u32 {
        const FS_REQUIRES_DEV      = 1;
        /// 驱动的 rename 自己完成 d_move
        const FS_RENAME_DOES_D_MOVE = 32768;
    }
}

/// 文件系统类型
#[derive(Debug)]
pub struct FileSystemType {
    /// 文件系统名称
    pub name: &'static str,
    /// 文件系统标志
    pub fs_flags: FsTypeFlags,
}

impl FileSystemType {
    pub const fn new(name: &'static str, fs_flags: FsTypeFlags) -> Self {
        Self { name, fs_flags }
    }
}

static NEXT_SB_ID: AtomicU64 = AtomicU64::new(1);

/// 超级块
pub struct SuperBlock {
    s_id: u64,
    /// 文件系统标志
    s_flags: AtomicU32,
    /// 文件系统魔数
    pub s_magic: u32,
    /// 目录最大硬链接数，0 表示不限制
    pub s_max_links: u32,
    /// 文件系统类型
    pub s_type: &'static FileSystemType,
    /// 跨目录 rename 串行化
    pub s_vfs_rename_mutex: RwSemaphore,
    /// dentry 哈希表
    pub(crate) s_dcache: DentryHashTable,
    /// 根 dentry（不持有逻辑引用）
    s_root: spin::RwLock<Option<Arc<Dentry>>>,
    /// 新建 dentry 的默认操作
    s_d_op: spin::RwLock<Option<Arc<dyn DentryOperations>>>,
    /// inode 编号分配
    next_ino: AtomicU64,
}

impl SuperBlock {
    /// 创建新超级块
    pub fn new(fs_type: &'static FileSystemType, magic: u32, flags: SuperBlockFlags) -> Arc<Self> {
        Arc::new(Self {
            s_id: NEXT_SB_ID.fetch_add(1, Ordering::Relaxed),
            s_flags: AtomicU32::new(flags.bits()),
            s_magic: magic,
            s_max_links: 0,
            s_type: fs_type,
            s_vfs_rename_mutex: RwSemaphore::new(),
            s_dcache: DentryHashTable::new(),
            s_root: spin::RwLock::new(None),
            s_d_op: spin::RwLock::new(None),
            next_ino: AtomicU64::new(1),
        })
    }

    /// 带硬链接上限的超级块
    pub fn with_max_links(
        fs_type: &'static FileSystemType,
        magic: u32,
        flags: SuperBlockFlags,
        max_links: u32,
    ) -> Arc<Self> {
        Arc::new(Self {
            s_id: NEXT_SB_ID.fetch_add(1, Ordering::Relaxed),
            s_flags: AtomicU32::new(flags.bits()),
            s_magic: magic,
            s_max_links: max_links,
            s_type: fs_type,
            s_vfs_rename_mutex: RwSemaphore::new(),
            s_dcache: DentryHashTable::new(),
            s_root: spin::RwLock::new(None),
            s_d_op: spin::RwLock::new(None),
            next_ino: AtomicU64::new(1),
        })
    }

    pub fn id(&self) -> u64 {
        self.s_id
    }

    pub fn flags(&self) -> SuperBlockFlags {
        SuperBlockFlags::from_bits_truncate(self.s_flags.load(Ordering::Acquire))
    }

    pub fn set_flags(&self, flags: SuperBlockFlags) {
        self.s_flags.store(flags.bits(), Ordering::Release);
    }

    /// 对应 sb_rdonly()
    pub fn is_rdonly(&self) -> bool {
        self.flags().contains(SuperBlockFlags::SB_RDONLY)
    }

    /// 对应 IS_POSIXACL()
    pub fn is_posixacl(&self) -> bool {
        self.flags().contains(SuperBlockFlags::SB_POSIXACL)
    }

    pub fn root(&self) -> Option<Arc<Dentry>> {
        self.s_root.read().clone()
    }

    pub(crate) fn set_root(&self, root: &Arc<Dentry>) {
        *self.s_root.write() = Some(root.clone());
    }

    /// 缓存中的 dentry 数量
    pub fn dcache_len(&self) -> usize {
        self.s_dcache.len()
    }

    pub fn set_d_op(&self, ops: Arc<dyn DentryOperations>) {
        *self.s_d_op.write() = Some(ops);
    }

    pub fn d_op(&self) -> Option<Arc<dyn DentryOperations>> {
        self.s_d_op.read().clone()
    }

    /// 分配 inode 编号（get_next_ino）
    pub fn next_ino(&self) -> u64 {
        self.next_ino.fetch_add(1, Ordering::Relaxed)
    }

    /// 丢弃全部缓存的 dentry（generic_shutdown_super 的 dcache 部分）
    pub fn shrink_dcache_sb(&self) {
        self.s_dcache.clear();
        *self.s_root.write() = None;
    }
}
