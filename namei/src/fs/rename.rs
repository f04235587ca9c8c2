//! MIT License
//!
//! Copyright (c) 2026 Fei Wang
//!
//! rename
//!
//! 对应 Linux fs/namei.c 的 lock_rename() / vfs_rename() / do_renameat2()
//!
//! 加锁顺序：
//! 1. 不同父目录时先取超级块的 `s_vfs_rename_mutex`
//! 2. 祖先目录先于后代加锁，无关的两个目录按参数顺序
//! 3. 父目录之后再锁被移动或被替换的子项
//!
//! 第 2 步同时得到 "trap"：另一方祖先链上、作为某个父目录直接子项的
//! dentry。源是 trap 说明要把目录移到自己下面，目标是 trap 说明目标是
//! 源的祖先。

use alloc::sync::Arc;
use alloc::vec::Vec;
use bitflags::bitflags;

use crate::errno::Errno;
use crate::fs::dentry::{d_exchange, d_move, shrink_dcache_parent, Dentry, QStr};
use crate::fs::filename::PathName;
use crate::fs::inode::{break_deleg_wait, try_break_deleg, Inode, InodeFlags, InodeLockGuard};
use crate::fs::mount::{detach_mounts, mnt_want_write};
use crate::fs::namei::{filename_parentat, lookup_one_qstr_excl, report, retry_on_estale};
use crate::fs::path::{LastType, LookupFlags, Path};
use crate::fs::perm::{inode_permission, may_create, may_delete, MayFlags};
use crate::fs::superblock::{FsTypeFlags, SuperBlock};
use crate::process::Task;

bitflags! {
    /// renameat2 标志
    #[derive(Debug, Copy, Clone, PartialEq, Eq)]
    pub struct RenameFlags: u32 {
        /// 目标存在时失败
        const NOREPLACE = 1 << 0;
        /// 原子交换源和目标
        const EXCHANGE  = 1 << 1;
        /// 在源位置留下 whiteout
        const WHITEOUT  = 1 << 2;
    }
}

/// lock_rename() 的结果，析构即 unlock_rename()
pub struct RenameLock {
    locks: Vec<InodeLockGuard>,
    /// 持有 s_vfs_rename_mutex 的超级块
    rename_sb: Option<Arc<SuperBlock>>,
    trap: Option<Arc<Dentry>>,
}

impl RenameLock {
    pub fn trap(&self) -> Option<&Arc<Dentry>> {
        self.trap.as_ref()
    }

    fn is_trap(&self, dentry: &Arc<Dentry>) -> bool {
        self.trap.as_ref().is_some_and(|t| Arc::ptr_eq(t, dentry))
    }

    /// 是否取了 s_vfs_rename_mutex
    pub fn holds_rename_mutex(&self) -> bool {
        self.rename_sb.is_some()
    }
}

impl Drop for RenameLock {
    fn drop(&mut self) {
        // 先解开目录锁，再释放 rename 互斥
        self.locks.clear();
        if let Some(sb) = self.rename_sb.take() {
            sb.s_vfs_rename_mutex.up_write();
        }
    }
}

fn lock_dir(dentry: &Arc<Dentry>) -> Result<InodeLockGuard, Errno> {
    Ok(dentry.inode().ok_or(Errno::NoSuchFileOrDirectory)?.lock())
}

/// 对应 lock_two_directories()：调用者已经持有 `sb` 的 s_vfs_rename_mutex
fn lock_two_directories(p1: &Arc<Dentry>, p2: &Arc<Dentry>, sb: Arc<SuperBlock>) -> Result<RenameLock, Errno> {
    let locked = |first: &Arc<Dentry>, second: &Arc<Dentry>, trap: Option<Arc<Dentry>>, sb: Arc<SuperBlock>| {
        let mut locks = Vec::with_capacity(2);
        let res = lock_dir(first).and_then(|g| {
            locks.push(g);
            lock_dir(second).map(|g| locks.push(g))
        });
        let lock = RenameLock {
            locks,
            rename_sb: Some(sb),
            trap,
        };
        res.map(|()| lock)
    };

    // p2 是 p1 的祖先？p 停在 p2 的子项或 p1 所在树的根
    let mut p = p1.clone();
    while let Some(r) = p.parent() {
        if Arc::ptr_eq(&r, p2) {
            return locked(p2, p1, Some(p), sb);
        }
        p = r;
    }

    let mut q = p2.clone();
    loop {
        match q.parent() {
            Some(r) if Arc::ptr_eq(&r, p1) => return locked(p1, p2, Some(q), sb),
            Some(r) if Arc::ptr_eq(&r, &p) => return locked(p1, p2, None, sb),
            Some(r) => q = r,
            None if Arc::ptr_eq(&q, &p) => return locked(p1, p2, None, sb),
            None => break,
        }
    }
    // 调用时两者没有共同的根
    sb.s_vfs_rename_mutex.up_write();
    Err(Errno::CrossDeviceLink)
}

/// 对应 lock_rename()：锁住 rename 的两个父目录
pub fn lock_rename(p1: &Arc<Dentry>, p2: &Arc<Dentry>) -> Result<RenameLock, Errno> {
    if Arc::ptr_eq(p1, p2) {
        return Ok(RenameLock {
            locks: alloc::vec![lock_dir(p1)?],
            rename_sb: None,
            trap: None,
        });
    }
    if !Arc::ptr_eq(&p1.d_sb, &p2.d_sb) {
        return Err(Errno::CrossDeviceLink);
    }
    let sb = p1.d_sb.clone();
    sb.s_vfs_rename_mutex.down_write();
    lock_two_directories(p1, p2, sb)
}

/// 对应 lock_rename_child()：`c1` 是要移动的子项，`p2` 是目标父目录
///
/// 子项仍在 `p2` 中时不需要 rename 互斥。
pub fn lock_rename_child(c1: &Arc<Dentry>, p2: &Arc<Dentry>) -> Result<RenameLock, Errno> {
    let in_p2 = |c: &Arc<Dentry>| c.parent().is_some_and(|p| Arc::ptr_eq(&p, p2));
    if in_p2(c1) {
        let guard = lock_dir(p2)?;
        // p2 已加锁，子项不会再移出
        if in_p2(c1) {
            return Ok(RenameLock {
                locks: alloc::vec![guard],
                rename_sb: None,
                trap: None,
            });
        }
    }

    let sb = c1.d_sb.clone();
    sb.s_vfs_rename_mutex.down_write();
    match c1.parent() {
        Some(p1) if !Arc::ptr_eq(&p1, p2) => lock_two_directories(&p1, p2, sb),
        _ => {
            // 取得互斥以来 c1 没有移动，只需要锁 p2
            let res = lock_dir(p2);
            sb.s_vfs_rename_mutex.up_write();
            Ok(RenameLock {
                locks: alloc::vec![res?],
                rename_sb: None,
                trap: None,
            })
        }
    }
}

/// 对应 unlock_rename()
pub fn unlock_rename(lock: RenameLock) {
    drop(lock);
}

/// 对应 struct renamedata
pub struct RenameData<'a> {
    pub old_dir: &'a Arc<Inode>,
    pub old_dentry: &'a Arc<Dentry>,
    pub new_dir: &'a Arc<Inode>,
    pub new_dentry: &'a Arc<Dentry>,
    pub delegated_inode: &'a mut Option<Arc<Inode>>,
    pub flags: RenameFlags,
}

/// 对应 lock_two_nondirectories()：按 inode 编号顺序
fn lock_two_nondirectories(a: &Arc<Inode>, b: Option<&Arc<Inode>>, locks: &mut Vec<InodeLockGuard>) {
    match b {
        Some(b) if !Arc::ptr_eq(a, b) => {
            let (first, second) = if a.id() <= b.id() { (a, b) } else { (b, a) };
            locks.push(first.lock());
            locks.push(second.lock());
        }
        _ => locks.push(a.lock()),
    }
}

/// 对应 vfs_rename()
///
/// 调用者已经通过 [`lock_rename`] 锁住两个父目录。非目录的源或被替换的
/// 目标上有委托时返回 `TryAgain`，委托记在 `rd.delegated_inode`。
pub fn vfs_rename(task: &Task, rd: RenameData<'_>) -> Result<(), Errno> {
    let RenameData {
        old_dir,
        old_dentry,
        new_dir,
        new_dentry,
        delegated_inode,
        flags,
    } = rd;
    let exchange = flags.contains(RenameFlags::EXCHANGE);
    let is_dir = old_dentry.is_dir();
    let source = old_dentry.inode().ok_or(Errno::NoSuchFileOrDirectory)?;
    let target = new_dentry.inode();
    let same_dir = Arc::ptr_eq(old_dir, new_dir);

    // 同一个 inode 的两个硬链接：什么也不做
    if target.as_ref().is_some_and(|t| Arc::ptr_eq(t, &source)) {
        return Ok(());
    }

    may_delete(task, old_dir, old_dentry, is_dir)?;
    let new_is_dir = target.is_some() && new_dentry.is_dir();
    match &target {
        None => may_create(task, new_dir, new_dentry)?,
        Some(_) if exchange => may_delete(task, new_dir, new_dentry, new_is_dir)?,
        Some(_) => may_delete(task, new_dir, new_dentry, is_dir)?,
    }

    // 换了父目录的目录要改写 `..`
    if !same_dir {
        if is_dir {
            inode_permission(task, &source, MayFlags::WRITE)?;
        }
        if let Some(target) = &target {
            if exchange && new_is_dir {
                inode_permission(task, target, MayFlags::WRITE)?;
            }
        }
    }

    task.lsm(|h| h.inode_rename(old_dir, old_dentry, new_dir, new_dentry, flags))?;

    // 跨目录时源目录的父目录会改变；被替换的目录成为受害者
    let lock_old_subdir = !same_dir;
    let lock_new_subdir = !same_dir || !exchange;
    let mut locks = Vec::with_capacity(2);
    if is_dir {
        if lock_old_subdir {
            locks.push(source.lock());
        }
        if let Some(target) = &target {
            if !new_is_dir || lock_new_subdir {
                locks.push(target.lock());
            }
        }
    } else if new_is_dir {
        if let Some(target) = &target {
            if lock_new_subdir {
                locks.push(target.lock());
            }
        }
        locks.push(source.lock());
    } else {
        lock_two_nondirectories(&source, target.as_ref(), &mut locks);
    }

    if source.is_swapfile() || target.as_ref().is_some_and(|t| t.is_swapfile()) {
        return Err(Errno::OperationNotPermitted);
    }
    if old_dentry.is_mountpoint() || new_dentry.is_mountpoint() {
        return Err(Errno::DeviceOrResourceBusy);
    }

    let max_links = new_dir.i_sb.s_max_links;
    if max_links != 0 && !same_dir {
        if is_dir && !new_is_dir && new_dir.nlink() >= max_links {
            return Err(Errno::TooManyLinks);
        }
        if exchange && !is_dir && new_is_dir && old_dir.nlink() >= max_links {
            return Err(Errno::TooManyLinks);
        }
    }
    if !is_dir {
        try_break_deleg(&source, delegated_inode)?;
    }
    if let Some(target) = &target {
        if !new_is_dir {
            try_break_deleg(target, delegated_inode)?;
        }
    }

    old_dir.i_op.rename(old_dir, old_dentry, new_dir, new_dentry, flags)?;

    if !exchange {
        if let Some(target) = &target {
            if is_dir {
                shrink_dcache_parent(new_dentry);
                target.set_flags(InodeFlags::S_DEAD);
            }
            detach_mounts(new_dentry);
        }
    }
    if !old_dir.i_sb.s_type.fs_flags.contains(FsTypeFlags::FS_RENAME_DOES_D_MOVE) {
        if exchange {
            d_exchange(old_dentry, new_dentry);
        } else {
            d_move(old_dentry, new_dentry);
        }
    }
    drop(locks);
    log::trace!(
        "renamed {:?} -> {:?} ({:?})",
        old_dentry.name_lossy(),
        new_dentry.name_lossy(),
        flags
    );
    Ok(())
}

/// 父目录加锁之后的部分；返回时锁已释放
#[allow(clippy::too_many_arguments)]
fn rename_locked(
    task: &Task,
    old_path: &Path,
    old_last: &QStr,
    new_path: &Path,
    new_last: &QStr,
    lookup_flags: LookupFlags,
    target_flags: LookupFlags,
    flags: RenameFlags,
    delegated: &mut Option<Arc<Inode>>,
) -> Result<(), Errno> {
    let exchange = flags.contains(RenameFlags::EXCHANGE);
    let lock = lock_rename(new_path.dentry(), old_path.dentry())?;

    let old_dentry = lookup_one_qstr_excl(old_last, old_path.dentry(), lookup_flags)?;
    let new_dentry = lookup_one_qstr_excl(new_last, new_path.dentry(), lookup_flags | target_flags)?;

    if exchange && !new_dentry.is_dir() && new_last.has_trailing() {
        return Err(Errno::NotADirectory);
    }
    // 源不是目录时结尾的 `/` 都是 ENOTDIR
    if !old_dentry.is_dir() && (old_last.has_trailing() || (!exchange && new_last.has_trailing())) {
        return Err(Errno::NotADirectory);
    }
    // 源不能是目标的祖先
    if lock.is_trap(&old_dentry) {
        return Err(Errno::InvalidArgument);
    }
    // 目标不能是源的祖先
    if lock.is_trap(&new_dentry) {
        return Err(if exchange {
            Errno::InvalidArgument
        } else {
            Errno::DirectoryNotEmpty
        });
    }

    let old_dir = old_path.inode().ok_or(Errno::NoSuchFileOrDirectory)?;
    let new_dir = new_path.inode().ok_or(Errno::NoSuchFileOrDirectory)?;
    vfs_rename(
        task,
        RenameData {
            old_dir: &old_dir,
            old_dentry: &old_dentry,
            new_dir: &new_dir,
            new_dentry: &new_dentry,
            delegated_inode: delegated,
            flags,
        },
    )
}

/// 对应 do_renameat2()
pub fn do_renameat2(
    task: &Task,
    olddfd: Option<&Path>,
    from: &PathName,
    newdfd: Option<&Path>,
    to: &PathName,
    flags: u32,
) -> Result<(), Errno> {
    let flags = RenameFlags::from_bits(flags).ok_or(Errno::InvalidArgument)?;
    if flags.intersects(RenameFlags::NOREPLACE | RenameFlags::WHITEOUT) && flags.contains(RenameFlags::EXCHANGE) {
        return Err(Errno::InvalidArgument);
    }

    let mut target_flags = LookupFlags::RENAME_TARGET | LookupFlags::CREATE;
    if flags.contains(RenameFlags::EXCHANGE) {
        target_flags = LookupFlags::empty();
    }
    if flags.contains(RenameFlags::NOREPLACE) {
        target_flags |= LookupFlags::EXCL;
    }

    let mut delegated = None;
    let res = retry_on_estale(LookupFlags::empty(), |lookup_flags| {
        let (old_path, old_last, old_type) = filename_parentat(task, olddfd, from, lookup_flags, None)?;
        let (new_path, new_last, new_type) = filename_parentat(task, newdfd, to, lookup_flags, None)?;

        if !Arc::ptr_eq(old_path.mnt(), new_path.mnt()) {
            return Err(Errno::CrossDeviceLink);
        }
        if old_type != LastType::Norm {
            return Err(Errno::DeviceOrResourceBusy);
        }
        if new_type != LastType::Norm {
            return Err(if flags.contains(RenameFlags::NOREPLACE) {
                Errno::FileExists
            } else {
                Errno::DeviceOrResourceBusy
            });
        }

        let _write = mnt_want_write(old_path.mnt())?;
        loop {
            let res = rename_locked(
                task,
                &old_path,
                &old_last,
                &new_path,
                &new_last,
                lookup_flags,
                target_flags,
                flags,
                &mut delegated,
            );
            if delegated.is_some() {
                break_deleg_wait(&mut delegated)?;
                continue;
            }
            return res;
        }
    });
    report("renameat2", to, res)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs::rootfs::RootFs;

    #[test]
    fn test_lock_rename_same_dir() {
        let fs = RootFs::new();
        let root = fs.root_dentry();
        let lock = lock_rename(&root, &root).unwrap();
        assert!(lock.trap().is_none());
        assert!(!lock.holds_rename_mutex());
        assert!(fs.root_inode().i_rwsem.is_write_locked());
        unlock_rename(lock);
        assert!(!fs.root_inode().i_rwsem.is_locked());
    }

    #[test]
    fn test_lock_rename_finds_trap() {
        let fs = RootFs::new();
        let root = fs.root_dentry();
        let a = fs.mkdir_raw(&root, b"a", 0o755);
        let b = fs.mkdir_raw(&a, b"b", 0o755);
        let c = fs.mkdir_raw(&b, b"c", 0o755);
        let other = fs.mkdir_raw(&root, b"other", 0o755);

        // a 是 c 的祖先：trap 是 a 下面通向 c 的 b
        let lock = lock_rename(&c, &a).unwrap();
        assert!(lock.trap().is_some_and(|t| Arc::ptr_eq(t, &b)));
        assert!(lock.holds_rename_mutex());
        assert!(fs.sb().s_vfs_rename_mutex.is_write_locked());
        drop(lock);
        assert!(!fs.sb().s_vfs_rename_mutex.is_locked());

        let lock = lock_rename(&a, &c).unwrap();
        assert!(lock.trap().is_some_and(|t| Arc::ptr_eq(t, &b)));
        drop(lock);

        let lock = lock_rename(&c, &other).unwrap();
        assert!(lock.trap().is_none());
        drop(lock);
        assert!(!a.inode().unwrap().i_rwsem.is_locked());
        assert!(!c.inode().unwrap().i_rwsem.is_locked());
    }

    #[test]
    fn test_lock_rename_cross_sb() {
        let fs1 = RootFs::new();
        let fs2 = RootFs::new();
        assert_eq!(
            lock_rename(&fs1.root_dentry(), &fs2.root_dentry()).err(),
            Some(Errno::CrossDeviceLink)
        );
    }

    #[test]
    fn test_lock_rename_child_fast_path() {
        let fs = RootFs::new();
        let root = fs.root_dentry();
        let child = fs.create_raw(&root, b"f", 0o644);
        let dir = fs.mkdir_raw(&root, b"d", 0o755);

        let lock = lock_rename_child(&child, &root).unwrap();
        assert!(!lock.holds_rename_mutex());
        drop(lock);

        let lock = lock_rename_child(&child, &dir).unwrap();
        assert!(lock.holds_rename_mutex());
        assert!(dir.inode().unwrap().i_rwsem.is_write_locked());
        assert!(fs.root_inode().i_rwsem.is_write_locked());
    }

    #[test]
    fn test_flag_validation() {
        let fs = RootFs::new();
        let task = fs.task(crate::process::Cred::root());
        let a = crate::fs::filename::getname_kernel("/a").unwrap();
        let b = crate::fs::filename::getname_kernel("/b").unwrap();
        let bad = [
            1 << 3,
            (RenameFlags::EXCHANGE | RenameFlags::NOREPLACE).bits(),
            (RenameFlags::EXCHANGE | RenameFlags::WHITEOUT).bits(),
        ];
        for flags in bad {
            assert_eq!(do_renameat2(&task, None, &a, None, &b, flags), Err(Errno::InvalidArgument));
        }
    }
}
