//! MIT License
//!
//! Copyright (c) 2026 Fei Wang
//!
//! 路径 (mount + dentry) 与查找标志
//!
//! 对应 Linux 的 struct path (include/linux/path.h) 和 LOOKUP_* (include/linux/namei.h)

use alloc::sync::Arc;
use bitflags::bitflags;
use core::fmt;

use crate::fs::dentry::{Dentry, DentryRef};
use crate::fs::inode::Inode;
use crate::fs::mount::{MountRef, VfsMount};

bitflags! {
    /// 路径查找标志
    ///
    /// 对应 Linux 的 LOOKUP_* 宏 (include/linux/namei.h)
    #[derive(Debug, Copy, Clone, PartialEq, Eq)]
    pub struct LookupFlags: u32 {
        /// 跟随末尾的符号链接
        const FOLLOW        = 0x0001;
        /// 结果必须是目录
        const DIRECTORY     = 0x0002;
        /// 末尾分量也触发自动挂载
        const AUTOMOUNT     = 0x0004;
        /// 查找父目录
        const PARENT        = 0x0010;
        /// 强制 revalidate（ESTALE 重试）
        const REVAL         = 0x0020;
        /// RCU（推测）模式
        const RCU           = 0x0040;
        /// 在结果上继续穿越挂载
        const MOUNTPOINT    = 0x0080;

        /// 意图：open
        const OPEN          = 0x0100;
        /// 意图：create
        const CREATE        = 0x0200;
        /// 意图：排他创建
        const EXCL          = 0x0400;
        /// 意图：rename 目标
        const RENAME_TARGET = 0x0800;

        /// 允许空路径
        const EMPTY         = 0x4000;
        /// 起点先向下穿越挂载
        const DOWN          = 0x8000;

        /// 任何符号链接都返回 ELOOP
        const NO_SYMLINKS   = 0x01_0000;
        /// 不跟随魔法链接
        const NO_MAGICLINKS = 0x02_0000;
        /// 不穿越挂载
        const NO_XDEV       = 0x04_0000;
        /// 不能逃出起点
        const BENEATH       = 0x08_0000;
        /// 起点当作根
        const IN_ROOT       = 0x10_0000;
        /// 只使用缓存，不调用驱动
        const CACHED        = 0x20_0000;
        /// linkat(AT_EMPTY_PATH)
        const LINKAT_EMPTY  = 0x40_0000;

        const IS_SCOPED = Self::BENEATH.bits() | Self::IN_ROOT.bits();
        /// 对末尾分量的意图
        const INTENT_FLAGS = Self::OPEN.bits()
            | Self::CREATE.bits()
            | Self::EXCL.bits()
            | Self::RENAME_TARGET.bits();
    }
}

/// 最后一个分量的类型
///
/// 对应 Linux 的 LAST_NORM / LAST_ROOT / LAST_DOT / LAST_DOTDOT
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum LastType {
    Norm,
    Root,
    Dot,
    DotDot,
}

/// 路径：一对同时获取、同时释放的 mount 与 dentry 引用
///
/// 对应 Linux 的 struct path；`Clone` 即 path_get()，析构即 path_put()。
#[derive(Clone)]
pub struct Path {
    pub mnt: MountRef,
    pub dentry: DentryRef,
}

impl Path {
    pub fn new(mnt: MountRef, dentry: DentryRef) -> Self {
        Self { mnt, dentry }
    }

    /// 从裸指针对取引用（调用者保证两者都还活着）
    pub fn get(mnt: &Arc<VfsMount>, dentry: &Arc<Dentry>) -> Self {
        Self {
            mnt: MountRef::get(mnt),
            dentry: DentryRef::get(dentry),
        }
    }

    pub fn mnt(&self) -> &Arc<VfsMount> {
        self.mnt.as_arc()
    }

    pub fn dentry(&self) -> &Arc<Dentry> {
        self.dentry.as_arc()
    }

    pub fn inode(&self) -> Option<Arc<Inode>> {
        self.dentry.inode()
    }

    /// 对应 path_equal()
    pub fn equal(&self, other: &Path) -> bool {
        self.is(other.mnt(), other.dentry())
    }

    /// 是否指向给定的 mount 与 dentry
    pub fn is(&self, mnt: &Arc<VfsMount>, dentry: &Arc<Dentry>) -> bool {
        Arc::ptr_eq(self.mnt(), mnt) && Arc::ptr_eq(self.dentry(), dentry)
    }
}

impl fmt::Debug for Path {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Path")
            .field("mnt", &self.mnt().id())
            .field("dentry", &self.dentry().name())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scoped_flags() {
        assert!(LookupFlags::IS_SCOPED.contains(LookupFlags::BENEATH));
        assert!(LookupFlags::IS_SCOPED.contains(LookupFlags::IN_ROOT));
        assert!(!LookupFlags::INTENT_FLAGS.intersects(LookupFlags::FOLLOW | LookupFlags::RCU));
    }
}
