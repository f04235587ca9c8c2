//! MIT License
//!
//! Copyright (c) 2026 Fei Wang
//!
//! 安全模块钩子
//!
//! 对应 Linux 的 security_inode_*() 调用点 (include/linux/security.h)。
//! 路径解析核心只在固定位置调用这些钩子，并把返回值当作通过/拒绝；
//! 所有方法默认放行。

use alloc::sync::Arc;

use crate::errno::Errno;
use crate::fs::dentry::Dentry;
use crate::fs::inode::Inode;
use crate::fs::perm::MayFlags;
use crate::fs::rename::RenameFlags;

#[allow(unused_variables)]
pub trait SecurityHooks: Send + Sync {
    fn inode_permission(&self, inode: &Arc<Inode>, mask: MayFlags) -> Result<(), Errno> {
        Ok(())
    }

    fn inode_follow_link(&self, dentry: &Arc<Dentry>, inode: &Arc<Inode>, rcu: bool) -> Result<(), Errno> {
        Ok(())
    }

    fn inode_create(&self, dir: &Arc<Inode>, dentry: &Arc<Dentry>, mode: u32) -> Result<(), Errno> {
        Ok(())
    }

    fn inode_mkdir(&self, dir: &Arc<Inode>, dentry: &Arc<Dentry>, mode: u32) -> Result<(), Errno> {
        Ok(())
    }

    fn inode_mknod(&self, dir: &Arc<Inode>, dentry: &Arc<Dentry>, mode: u32, dev: u64) -> Result<(), Errno> {
        Ok(())
    }

    fn inode_symlink(&self, dir: &Arc<Inode>, dentry: &Arc<Dentry>, target: &[u8]) -> Result<(), Errno> {
        Ok(())
    }

    fn inode_link(&self, old: &Arc<Dentry>, dir: &Arc<Inode>, new: &Arc<Dentry>) -> Result<(), Errno> {
        Ok(())
    }

    fn inode_unlink(&self, dir: &Arc<Inode>, dentry: &Arc<Dentry>) -> Result<(), Errno> {
        Ok(())
    }

    fn inode_rmdir(&self, dir: &Arc<Inode>, dentry: &Arc<Dentry>) -> Result<(), Errno> {
        Ok(())
    }

    fn inode_rename(
        &self,
        old_dir: &Arc<Inode>,
        old_dentry: &Arc<Dentry>,
        new_dir: &Arc<Inode>,
        new_dentry: &Arc<Dentry>,
        flags: RenameFlags,
    ) -> Result<(), Errno> {
        Ok(())
    }

    fn inode_readlink(&self, dentry: &Arc<Dentry>) -> Result<(), Errno> {
        Ok(())
    }

    fn path_truncate(&self, dentry: &Arc<Dentry>) -> Result<(), Errno> {
        Ok(())
    }
}
