//! MIT License
//!
//! Copyright (c) 2026 Fei Wang
//!
//! 场景测试
//!
//! 每个文件覆盖一类行为，全部运行在 `fs::rootfs` 之上：
//! - `walking`: 基本遍历、`.` / `..`、结尾 `/`、dcache 与模式回退
//! - `symlinks`: 符号链接与魔法链接
//! - `mounts`: 挂载穿越、自动挂载、受限遍历
//! - `permissions`: 搜索权限、capability、安全钩子与 fs.protected_*
//! - `create_remove`: mkdir / mknod / symlink / link / unlink / rmdir
//! - `rename`: renameat2
//! - `open`: 打开路径
//! - `concurrency`: 并发查找与 rename
//!
//! 运行测试：
//! ```bash
//! cargo test --package rux-namei
//! ```

use alloc::sync::Arc;

use crate::errno::Errno;
use crate::fs::dentry::{d_lookup, Dentry, QStr};
use crate::fs::filename::{getname_flags, getname_kernel, PathName};
use crate::fs::fs_struct::FsStruct;
use crate::fs::mount::{do_add_mount, MntFlags, MountRef, VfsMount};
use crate::fs::namei::{filename_lookup, kern_path};
use crate::fs::path::{LookupFlags, Path};
use crate::fs::rootfs::RootFs;
use crate::process::{Cred, Task};

mod create_remove;
mod mounts;
mod open;

/// 挂载表和 MOUNT_LOCK 是全局的：改动挂载的测试与断言 RCU 行为的测试互斥
static MOUNT_TABLE: spin::Mutex<()> = spin::Mutex::new(());

/// 持有期间没有别的测试改动挂载表
pub(crate) fn lock_mount_table() -> spin::MutexGuard<'static, ()> {
    MOUNT_TABLE.lock()
}

/// 内核内部的路径名
pub(crate) fn pn(name: &str) -> PathName {
    getname_kernel(name).unwrap()
}

/// AT_EMPTY_PATH 使用的空路径
pub(crate) fn empty() -> PathName {
    getname_flags(b"", None, true).unwrap()
}

/// 跟随结尾符号链接的查找
pub(crate) fn resolve(task: &Task, name: &str) -> Result<Path, Errno> {
    kern_path(task, name, LookupFlags::FOLLOW)
}

/// 以 `flags` 从 `dfd` 开始查找
pub(crate) fn resolve_at(task: &Task, dfd: Option<&Path>, name: &str, flags: LookupFlags) -> Result<Path, Errno> {
    filename_lookup(task, dfd, &pn(name), flags, None)
}

/// `parent` 下已缓存的子项
pub(crate) fn child(parent: &Arc<Dentry>, name: &[u8]) -> Option<Arc<Dentry>> {
    d_lookup(parent, &QStr::for_parent(parent, name)).map(|d| d.as_arc().clone())
}

/// 把 `guest` 挂到 `host` 的 `dir` 上，返回新挂载
pub(crate) fn mount_on(host: &RootFs, dir: &Arc<Dentry>, guest: &RootFs, flags: MntFlags) -> Arc<VfsMount> {
    let mnt: MountRef = VfsMount::new(guest.root_ref(), flags);
    let arc = mnt.as_arc().clone();
    do_add_mount(mnt, &host.path_of(dir)).unwrap();
    arc
}

/// 以 `mnt` 的根为根目录与当前目录的任务
pub(crate) fn task_on(mnt: &Arc<VfsMount>, cred: Cred) -> Task {
    let root = Path::get(mnt, mnt.root());
    Task::new(cred, FsStruct::new(root.clone(), root))
}
