//! MIT License
//!
//! Copyright (c) 2026 Fei Wang
//!
//! 进程的文件系统上下文：根目录、当前目录、umask
//!
//! 对应 Linux 的 struct fs_struct (include/linux/fs_struct.h)

use alloc::sync::Arc;
use core::sync::atomic::{AtomicU32, Ordering};

use crate::fs::dentry::Dentry;
use crate::fs::mount::VfsMount;
use crate::fs::path::Path;

struct FsPaths {
    root: Path,
    pwd: Path,
}

/// 根目录、当前目录与 umask
pub struct FsStruct {
    paths: spin::RwLock<FsPaths>,
    umask: AtomicU32,
}

impl FsStruct {
    pub fn new(root: Path, pwd: Path) -> Arc<Self> {
        Arc::new(Self {
            paths: spin::RwLock::new(FsPaths { root, pwd }),
            umask: AtomicU32::new(0o022),
        })
    }

    /// 对应 get_fs_root()
    pub fn root(&self) -> Path {
        self.paths.read().root.clone()
    }

    /// 对应 get_fs_pwd()
    pub fn pwd(&self) -> Path {
        self.paths.read().pwd.clone()
    }

    /// 推测遍历使用：不取引用
    pub(crate) fn root_raw(&self) -> (Arc<VfsMount>, Arc<Dentry>) {
        let paths = self.paths.read();
        (paths.root.mnt().clone(), paths.root.dentry().clone())
    }

    pub(crate) fn pwd_raw(&self) -> (Arc<VfsMount>, Arc<Dentry>) {
        let paths = self.paths.read();
        (paths.pwd.mnt().clone(), paths.pwd.dentry().clone())
    }

    /// 对应 set_fs_root()；旧路径在锁外释放
    pub fn set_root(&self, path: Path) {
        let old = core::mem::replace(&mut self.paths.write().root, path);
        drop(old);
    }

    /// 对应 set_fs_pwd()
    pub fn set_pwd(&self, path: Path) {
        let old = core::mem::replace(&mut self.paths.write().pwd, path);
        drop(old);
    }

    pub fn umask(&self) -> u32 {
        self.umask.load(Ordering::Acquire)
    }

    /// 返回旧值
    pub fn set_umask(&self, mask: u32) -> u32 {
        self.umask.swap(mask & 0o777, Ordering::AcqRel)
    }
}
