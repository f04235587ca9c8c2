//! MIT License
//!
//! Copyright (c) 2026 Fei Wang
//!
//! 路径查找入口与目录修改操作
//!
//! 对应 Linux fs/namei.c 的高层部分：
//! - 整条路径查找：filename_lookup / filename_parentat / kern_path / vfs_path_lookup
//! - 单个分量查找：lookup_one_qstr_excl / lookup_one / try_lookup_noperm
//! - 创建：filename_create + vfs_create / vfs_mkdir / vfs_mknod / vfs_symlink / vfs_link
//! - 删除：vfs_rmdir / vfs_unlink
//! - 系统调用层：do_mkdirat / do_mknodat / do_symlinkat / do_linkat / do_rmdir / do_unlinkat
//!
//! 相对路径的起点 `dfd` 用 `Option<&Path>` 表示，`None` 即 AT_FDCWD。

use alloc::sync::Arc;

use crate::errno::Errno;
use crate::fs::dentry::{d_alloc, d_delete, d_invalidate, d_lookup, shrink_dcache_parent, Dentry, DentryFlags, DentryRef, QStr};
use crate::fs::filename::{getname_flags, getname_kernel, PathName};
use crate::fs::inode::{break_deleg_wait, try_break_deleg, Inode, InodeFlags, InodeLockGuard, InodeMode, InodeState};
use crate::fs::mount::{detach_mounts, mnt_want_write, MntWriteGuard};
use crate::fs::path::{LastType, LookupFlags, Path};
use crate::fs::perm::{inode_permission, may_create, may_delete, may_linkat, MayFlags};
use crate::fs::walk::{__lookup_slow, d_revalidate, lookup_slow, path_lookupat, path_parentat, with_retries, WalkStart};
use crate::process::{Capabilities, Task};

/// unlinkat: 删除目录
pub const AT_REMOVEDIR: u32 = 0x200;
/// linkat: 跟随源路径末尾的符号链接
pub const AT_SYMLINK_FOLLOW: u32 = 0x400;
/// 允许空路径，此时操作 `dfd` 本身
pub const AT_EMPTY_PATH: u32 = 0x1000;

/// whiteout 是设备号为 0 的字符设备
pub const WHITEOUT_DEV: u64 = 0;

/// 对应 retry_estale()：ESTALE 且还没有强制 revalidate 时值得再试一次
#[inline]
pub fn retry_estale(err: Errno, flags: LookupFlags) -> bool {
    err == Errno::StaleFileHandle && !flags.contains(LookupFlags::REVAL)
}

/// 以 `flags` 执行 `op`，遇到 ESTALE 时加上 `REVAL` 重来一次
pub(crate) fn retry_on_estale<T, F>(flags: LookupFlags, mut op: F) -> Result<T, Errno>
where
    F: FnMut(LookupFlags) -> Result<T, Errno>,
{
    let mut flags = flags;
    loop {
        match op(flags) {
            Err(e) if retry_estale(e, flags) => flags |= LookupFlags::REVAL,
            res => return res,
        }
    }
}

pub(crate) fn report<T>(op: &str, name: &PathName, res: Result<T, Errno>) -> Result<T, Errno> {
    if let Err(e) = &res {
        log::debug!("{}({:?}) failed: {:?}", op, name, e);
    }
    res
}

// ============================================================================
// 整条路径查找
// ============================================================================

/// 对应 filename_lookup()
///
/// `root` 不为空时以它为根（vfs_path_lookup 与受限查找）。
pub fn filename_lookup(
    task: &Task,
    dfd: Option<&Path>,
    name: &PathName,
    flags: LookupFlags,
    root: Option<&Path>,
) -> Result<Path, Errno> {
    let start = WalkStart {
        task,
        dfd,
        name: name.buffer(),
        root,
    };
    let mut links = 0;
    with_retries(flags, &mut links, |flags, links| path_lookupat(&start, flags, links))
}

/// 对应 filename_parentat()：返回父目录、最后一个分量及其类型
pub fn filename_parentat(
    task: &Task,
    dfd: Option<&Path>,
    name: &PathName,
    flags: LookupFlags,
    root: Option<&Path>,
) -> Result<(Path, QStr, LastType), Errno> {
    let start = WalkStart {
        task,
        dfd,
        name: name.buffer(),
        root,
    };
    let mut links = 0;
    with_retries(flags, &mut links, |flags, links| path_parentat(&start, flags, links))
}

/// 驱动 get_link() 中的嵌套查找，与外层共享符号链接计数
pub(crate) fn nested_lookup(
    task: &Task,
    start: Option<&Path>,
    name: &[u8],
    flags: LookupFlags,
    links: &mut u32,
) -> Result<Path, Errno> {
    let name = getname_flags(name, None, flags.contains(LookupFlags::EMPTY))?;
    let start = WalkStart {
        task,
        dfd: start,
        name: name.buffer(),
        root: None,
    };
    with_retries(flags, links, |flags, links| path_lookupat(&start, flags, links))
}

/// 对应 kern_path()
pub fn kern_path(task: &Task, name: &str, flags: LookupFlags) -> Result<Path, Errno> {
    let name = getname_kernel(name)?;
    filename_lookup(task, None, &name, flags, None)
}

/// 对应 user_path_at()：`name` 是调用者提供的原始路径文本
pub fn user_path_at(task: &Task, dfd: Option<&Path>, name: &[u8], flags: LookupFlags) -> Result<Path, Errno> {
    let name = getname_flags(name, None, flags.contains(LookupFlags::EMPTY))?;
    filename_lookup(task, dfd, &name, flags, None)
}

/// 对应 vfs_path_lookup()：以 `root` 为根和起点查找
pub fn vfs_path_lookup(task: &Task, root: &Path, name: &str, flags: LookupFlags) -> Result<Path, Errno> {
    let name = getname_kernel(name)?;
    filename_lookup(task, None, &name, flags, Some(root))
}

/// 父目录已加锁的查找结果
///
/// 字段顺序即析构顺序：先释放子项，再解锁父目录，最后释放父目录路径。
pub struct LockedChild {
    pub dentry: DentryRef,
    parent_lock: InodeLockGuard,
    pub parent: Path,
}

impl LockedChild {
    /// 已加锁的父目录 inode
    pub fn dir(&self) -> &Arc<Inode> {
        self.parent_lock.inode()
    }
}

/// 对应 kern_path_locked()：锁住父目录并查找最后一个分量
pub fn kern_path_locked(task: &Task, name: &str) -> Result<LockedChild, Errno> {
    let name = getname_kernel(name)?;
    let (parent, last, last_type) = filename_parentat(task, None, &name, LookupFlags::empty(), None)?;
    if last_type != LastType::Norm {
        return Err(Errno::InvalidArgument);
    }
    let dir = parent.inode().ok_or(Errno::NoSuchFileOrDirectory)?;
    let parent_lock = dir.lock();
    let dentry = lookup_one_qstr_excl(&last, parent.dentry(), LookupFlags::empty())?;
    Ok(LockedChild {
        dentry,
        parent_lock,
        parent,
    })
}

// ============================================================================
// 单个分量查找
// ============================================================================

/// 对应 lookup_dcache()：只查缓存，失效的项被作废
fn lookup_dcache(name: &QStr, dir: &Arc<Dentry>, flags: LookupFlags) -> Result<Option<DentryRef>, Errno> {
    let Some(dentry) = d_lookup(dir, name) else {
        return Ok(None);
    };
    let inode = dir.inode().ok_or(Errno::NoSuchFileOrDirectory)?;
    if d_revalidate(&inode, name, &dentry, flags)? {
        return Ok(Some(dentry));
    }
    d_invalidate(&dentry);
    Ok(None)
}

/// 对应 lookup_one_qstr_excl()
///
/// 调用者独占持有 `base` 的 i_rwsem。没有 `CREATE` 时负 dentry 为 ENOENT，
/// 带 `EXCL` 时正 dentry 为 EEXIST。
pub fn lookup_one_qstr_excl(name: &QStr, base: &Arc<Dentry>, flags: LookupFlags) -> Result<DentryRef, Errno> {
    let dentry = match lookup_dcache(name, base, flags)? {
        Some(dentry) => dentry,
        None => {
            let dir = base.inode().ok_or(Errno::NoSuchFileOrDirectory)?;
            // 已删除的目录里不再创建子项
            if dir.is_deaddir() {
                return Err(Errno::NoSuchFileOrDirectory);
            }
            let dentry = d_alloc(base, name);
            match dir.i_op.lookup(&dir, &dentry, flags)? {
                Some(alias) => alias,
                None => dentry,
            }
        }
    };
    if dentry.is_negative() && !flags.contains(LookupFlags::CREATE) {
        return Err(Errno::NoSuchFileOrDirectory);
    }
    if dentry.is_positive() && flags.contains(LookupFlags::EXCL) {
        return Err(Errno::FileExists);
    }
    Ok(dentry)
}

/// 对应 lookup_noperm_common()：校验名字并计算哈希
fn lookup_noperm_common(name: &[u8], base: &Arc<Dentry>) -> Result<QStr, Errno> {
    let mut this = QStr::for_parent(base, name);
    if this.is_empty() || this.is_dot() || this.is_dotdot() {
        return Err(Errno::PermissionDenied);
    }
    if name.iter().any(|&c| c == b'/' || c == 0) {
        return Err(Errno::PermissionDenied);
    }
    if base.flags().contains(DentryFlags::OP_HASH) {
        if let Some(ops) = base.d_op() {
            this.hash = ops.d_hash(base, &this)?;
        }
    }
    Ok(this)
}

fn lookup_one_common(task: &Task, name: &[u8], base: &Arc<Dentry>) -> Result<(QStr, Arc<Inode>), Errno> {
    let this = lookup_noperm_common(name, base)?;
    let dir = base.inode().ok_or(Errno::NoSuchFileOrDirectory)?;
    inode_permission(task, &dir, MayFlags::EXEC)?;
    Ok((this, dir))
}

/// 对应 lookup_noperm()：不检查权限，调用者持有 `base` 的 i_rwsem
pub fn lookup_noperm(name: &[u8], base: &Arc<Dentry>) -> Result<DentryRef, Errno> {
    let this = lookup_noperm_common(name, base)?;
    let dir = base.inode().ok_or(Errno::NoSuchFileOrDirectory)?;
    match lookup_dcache(&this, base, LookupFlags::empty())? {
        Some(dentry) => Ok(dentry),
        None => __lookup_slow(&this, base, &dir, LookupFlags::empty()),
    }
}

/// 对应 lookup_one()：检查搜索权限，调用者持有 `base` 的 i_rwsem
///
/// 结果可能是负 dentry。
pub fn lookup_one(task: &Task, name: &[u8], base: &Arc<Dentry>) -> Result<DentryRef, Errno> {
    let (this, dir) = lookup_one_common(task, name, base)?;
    match lookup_dcache(&this, base, LookupFlags::empty())? {
        Some(dentry) => Ok(dentry),
        None => __lookup_slow(&this, base, &dir, LookupFlags::empty()),
    }
}

/// 对应 lookup_one_unlocked()：调用者不持有锁，慢速路径自己加共享锁
pub fn lookup_one_unlocked(task: &Task, name: &[u8], base: &Arc<Dentry>) -> Result<DentryRef, Errno> {
    let (this, _) = lookup_one_common(task, name, base)?;
    match lookup_dcache(&this, base, LookupFlags::empty())? {
        Some(dentry) => Ok(dentry),
        None => lookup_slow(&this, base, LookupFlags::empty()),
    }
}

/// 对应 try_lookup_noperm()：只查缓存，不 revalidate
pub fn try_lookup_noperm(name: &[u8], base: &Arc<Dentry>) -> Result<Option<DentryRef>, Errno> {
    let this = lookup_noperm_common(name, base)?;
    Ok(d_lookup(base, &this))
}

// ============================================================================
// 创建
// ============================================================================

/// 待创建的目标
///
/// 持有父目录路径、父目录的独占锁、挂载写引用和（负的）目标 dentry。
/// 对应 filename_create() 的返回状态；析构即 done_path_create()，
/// 字段顺序保证按 dput → 解锁 → mnt_drop_write → path_put 释放。
pub struct PathCreate {
    pub dentry: DentryRef,
    parent_lock: InodeLockGuard,
    _write: MntWriteGuard,
    pub path: Path,
}

impl PathCreate {
    /// 已加锁的父目录 inode
    pub fn dir(&self) -> &Arc<Inode> {
        self.parent_lock.inode()
    }
}

/// 对应 filename_create()
///
/// 最后一个分量不是普通名字时返回 EEXIST。路径以 `/` 结尾而调用者
/// 不创建目录（没有 `DIRECTORY`）时不允许创建，目标不存在即 ENOENT。
pub fn filename_create(
    task: &Task,
    dfd: Option<&Path>,
    name: &PathName,
    lookup_flags: LookupFlags,
) -> Result<PathCreate, Errno> {
    let want_dir = lookup_flags.contains(LookupFlags::DIRECTORY);
    let reval_flag = lookup_flags & LookupFlags::REVAL;
    let mut create_flags = LookupFlags::CREATE | LookupFlags::EXCL;

    let (path, last, last_type) = filename_parentat(task, dfd, name, reval_flag, None)?;
    if last_type != LastType::Norm {
        return Err(Errno::FileExists);
    }

    // 只读也先不失败，尽量报告其他错误
    let write = mnt_want_write(path.mnt());
    if last.has_trailing() && !want_dir {
        create_flags.remove(LookupFlags::CREATE);
    }
    let dir = path.inode().ok_or(Errno::NoSuchFileOrDirectory)?;
    let parent_lock = dir.lock();
    let dentry = lookup_one_qstr_excl(&last, path.dentry(), reval_flag | create_flags)?;
    let write = write?;
    Ok(PathCreate {
        dentry,
        parent_lock,
        _write: write,
        path,
    })
}

/// 对应 kern_path_create()
pub fn kern_path_create(task: &Task, dfd: Option<&Path>, name: &str, lookup_flags: LookupFlags) -> Result<PathCreate, Errno> {
    let name = getname_kernel(name)?;
    filename_create(task, dfd, &name, lookup_flags)
}

/// 对应 done_path_create()
pub fn done_path_create(create: PathCreate) {
    drop(create);
}

/// 对应 mode_strip_sgid()
///
/// 在 setgid 目录中创建可被组执行的 setgid 文件时，调用者既不在目录的组里
/// 也没有 CAP_FSETID，则去掉 setgid 位。
fn mode_strip_sgid(task: &Task, dir: &Inode, mode: u32) -> u32 {
    if mode & (InodeMode::S_ISGID | InodeMode::S_IXGRP) != (InodeMode::S_ISGID | InodeMode::S_IXGRP) {
        return mode;
    }
    if InodeMode::new(mode).is_directory() || dir.mode().bits() & InodeMode::S_ISGID == 0 {
        return mode;
    }
    let cred = task.cred();
    if cred.in_group_p(dir.gid()) || cred.capable_wrt_inode_uidgid(dir.uid(), dir.gid(), Capabilities::FSETID) {
        return mode;
    }
    mode & !InodeMode::S_ISGID
}

/// 对应 vfs_prepare_mode()：去掉 setgid 与 umask，限定权限位并加上类型
pub fn vfs_prepare_mode(task: &Task, dir: &Inode, mode: u32, mask_perms: u32, type_: u32) -> u32 {
    let mut mode = mode_strip_sgid(task, dir, mode);
    // 支持 ACL 的文件系统由默认 ACL 决定
    if !dir.i_sb.is_posixacl() {
        mode &= !task.fs.umask();
    }
    mode &= mask_perms & !InodeMode::S_IFMT;
    mode | (type_ & InodeMode::S_IFMT)
}

/// 对应 vfs_create()
pub fn vfs_create(task: &Task, dir: &Arc<Inode>, dentry: &Arc<Dentry>, mode: u32, want_excl: bool) -> Result<(), Errno> {
    may_create(task, dir, dentry)?;
    let mode = vfs_prepare_mode(task, dir, mode, InodeMode::S_IALLUGO, InodeMode::S_IFREG);
    task.lsm(|h| h.inode_create(dir, dentry, mode))?;
    dir.i_op.create(task.cred(), dir, dentry, mode, want_excl)
}

/// 对应 vfs_mkdir()
pub fn vfs_mkdir(task: &Task, dir: &Arc<Inode>, dentry: &Arc<Dentry>, mode: u32) -> Result<(), Errno> {
    may_create(task, dir, dentry)?;
    let perms = InodeMode::S_IRWXU | InodeMode::S_IRWXG | InodeMode::S_IRWXO | InodeMode::S_ISVTX;
    let mode = vfs_prepare_mode(task, dir, mode, perms, 0);
    task.lsm(|h| h.inode_mkdir(dir, dentry, mode))?;

    let max_links = dir.i_sb.s_max_links;
    if max_links != 0 && dir.nlink() >= max_links {
        return Err(Errno::TooManyLinks);
    }
    dir.i_op.mkdir(task.cred(), dir, dentry, mode)
}

/// 对应 may_mknod()：mknod 允许的文件类型
pub fn may_mknod(mode: u32) -> Result<(), Errno> {
    match mode & InodeMode::S_IFMT {
        0 | InodeMode::S_IFREG | InodeMode::S_IFCHR | InodeMode::S_IFBLK | InodeMode::S_IFIFO | InodeMode::S_IFSOCK => Ok(()),
        InodeMode::S_IFDIR => Err(Errno::OperationNotPermitted),
        _ => Err(Errno::InvalidArgument),
    }
}

/// 对应 vfs_mknod()
pub fn vfs_mknod(task: &Task, dir: &Arc<Inode>, dentry: &Arc<Dentry>, mode: u32, dev: u64) -> Result<(), Errno> {
    may_create(task, dir, dentry)?;
    let ty = InodeMode::new(mode);
    let is_whiteout = ty.is_char_device() && dev == WHITEOUT_DEV;
    if (ty.is_char_device() || ty.is_block_device()) && !is_whiteout && !task.cred().capable(Capabilities::MKNOD) {
        return Err(Errno::OperationNotPermitted);
    }
    let mode = vfs_prepare_mode(task, dir, mode, mode, mode);
    task.lsm(|h| h.inode_mknod(dir, dentry, mode, dev))?;
    dir.i_op.mknod(task.cred(), dir, dentry, mode, dev)
}

/// 对应 vfs_symlink()
pub fn vfs_symlink(task: &Task, dir: &Arc<Inode>, dentry: &Arc<Dentry>, target: &[u8]) -> Result<(), Errno> {
    may_create(task, dir, dentry)?;
    task.lsm(|h| h.inode_symlink(dir, dentry, target))?;
    dir.i_op.symlink(task.cred(), dir, dentry, target)
}

/// 对应 vfs_link()
///
/// 源 inode 上有委托时返回 `TryAgain` 并把它记到 `delegated`。
pub fn vfs_link(
    task: &Task,
    old_dentry: &Arc<Dentry>,
    dir: &Arc<Inode>,
    new_dentry: &Arc<Dentry>,
    delegated: &mut Option<Arc<Inode>>,
) -> Result<(), Errno> {
    let inode = old_dentry.inode().ok_or(Errno::NoSuchFileOrDirectory)?;
    may_create(task, dir, new_dentry)?;
    if !Arc::ptr_eq(&dir.i_sb, &inode.i_sb) {
        return Err(Errno::CrossDeviceLink);
    }
    // 只追加或不可变的文件不能再加链接
    if inode.is_append() || inode.is_immutable() {
        return Err(Errno::OperationNotPermitted);
    }
    // 无法映射属主的 inode 写回时会损坏
    if inode.has_unmapped_id() {
        return Err(Errno::OperationNotPermitted);
    }
    if inode.mode().is_directory() {
        return Err(Errno::OperationNotPermitted);
    }
    task.lsm(|h| h.inode_link(old_dentry, dir, new_dentry))?;

    let res = {
        let _guard = inode.lock();
        let max_links = inode.i_sb.s_max_links;
        // nlink 为 0 的文件不能重新链接，O_TMPFILE 创建的除外
        if inode.nlink() == 0 && !inode.state().contains(InodeState::I_LINKABLE) {
            Err(Errno::NoSuchFileOrDirectory)
        } else if max_links != 0 && inode.nlink() >= max_links {
            Err(Errno::TooManyLinks)
        } else {
            try_break_deleg(&inode, delegated).and_then(|()| dir.i_op.link(old_dentry, dir, new_dentry))
        }
    };
    if res.is_ok() && inode.state().contains(InodeState::I_LINKABLE) {
        inode.clear_state(InodeState::I_LINKABLE);
    }
    res
}

// ============================================================================
// 删除
// ============================================================================

/// 对应 vfs_rmdir()：调用者独占持有 `dir`
pub fn vfs_rmdir(task: &Task, dir: &Arc<Inode>, dentry: &Arc<Dentry>) -> Result<(), Errno> {
    may_delete(task, dir, dentry, true)?;
    let inode = dentry.inode().ok_or(Errno::NoSuchFileOrDirectory)?;

    {
        let _guard = inode.lock();
        if dentry.is_mountpoint() {
            return Err(Errno::DeviceOrResourceBusy);
        }
        task.lsm(|h| h.inode_rmdir(dir, dentry))?;
        dir.i_op.rmdir(dir, dentry)?;

        shrink_dcache_parent(dentry);
        inode.set_flags(InodeFlags::S_DEAD);
        detach_mounts(dentry);
    }
    d_delete(dentry);
    Ok(())
}

/// 对应 vfs_unlink()：调用者独占持有 `dir`
///
/// 目标 inode 上有委托时返回 `TryAgain` 并把它记到 `delegated`。
pub fn vfs_unlink(
    task: &Task,
    dir: &Arc<Inode>,
    dentry: &Arc<Dentry>,
    delegated: &mut Option<Arc<Inode>>,
) -> Result<(), Errno> {
    may_delete(task, dir, dentry, false)?;
    let target = dentry.inode().ok_or(Errno::NoSuchFileOrDirectory)?;

    {
        let _guard = target.lock();
        if target.is_swapfile() {
            return Err(Errno::OperationNotPermitted);
        }
        if dentry.is_mountpoint() {
            return Err(Errno::DeviceOrResourceBusy);
        }
        task.lsm(|h| h.inode_unlink(dir, dentry))?;
        try_break_deleg(&target, delegated)?;
        dir.i_op.unlink(dir, dentry)?;
        detach_mounts(dentry);
    }
    // 被 NFS 临时改名的文件仍然存在
    if !dentry.flags().contains(DentryFlags::NFSFS_RENAMED) {
        d_delete(dentry);
    }
    Ok(())
}

// ============================================================================
// 系统调用层
// ============================================================================

/// 对应 do_mknodat()
pub fn do_mknodat(task: &Task, dfd: Option<&Path>, name: &PathName, mode: u32, dev: u64) -> Result<(), Errno> {
    may_mknod(mode)?;
    let res = retry_on_estale(LookupFlags::empty(), |lookup_flags| {
        let create = filename_create(task, dfd, name, lookup_flags)?;
        match mode & InodeMode::S_IFMT {
            0 | InodeMode::S_IFREG => vfs_create(task, create.dir(), &create.dentry, mode, true),
            InodeMode::S_IFCHR | InodeMode::S_IFBLK => vfs_mknod(task, create.dir(), &create.dentry, mode, dev),
            _ => vfs_mknod(task, create.dir(), &create.dentry, mode, 0),
        }
    });
    report("mknodat", name, res)
}

/// 对应 do_mkdirat()
pub fn do_mkdirat(task: &Task, dfd: Option<&Path>, name: &PathName, mode: u32) -> Result<(), Errno> {
    let res = retry_on_estale(LookupFlags::DIRECTORY, |lookup_flags| {
        let create = filename_create(task, dfd, name, lookup_flags)?;
        vfs_mkdir(task, create.dir(), &create.dentry, mode)
    });
    report("mkdirat", name, res)
}

/// 对应 do_symlinkat()：在 `to` 处创建指向 `from` 的符号链接
pub fn do_symlinkat(task: &Task, from: &PathName, newdfd: Option<&Path>, to: &PathName) -> Result<(), Errno> {
    let res = retry_on_estale(LookupFlags::empty(), |lookup_flags| {
        let create = filename_create(task, newdfd, to, lookup_flags)?;
        vfs_symlink(task, create.dir(), &create.dentry, from.as_bytes())
    });
    report("symlinkat", to, res)
}

/// 对应 do_linkat()
///
/// `flags` 只接受 `AT_SYMLINK_FOLLOW | AT_EMPTY_PATH`。带 `AT_EMPTY_PATH`
/// 时从 `olddfd` 出发的查找需要 CAP_DAC_READ_SEARCH，见 path_init()。
pub fn do_linkat(
    task: &Task,
    olddfd: Option<&Path>,
    oldname: &PathName,
    newdfd: Option<&Path>,
    newname: &PathName,
    flags: u32,
) -> Result<(), Errno> {
    if flags & !(AT_SYMLINK_FOLLOW | AT_EMPTY_PATH) != 0 {
        return Err(Errno::InvalidArgument);
    }
    let mut how = LookupFlags::empty();
    if flags & AT_EMPTY_PATH != 0 {
        how |= LookupFlags::LINKAT_EMPTY;
    }
    if flags & AT_SYMLINK_FOLLOW != 0 {
        how |= LookupFlags::FOLLOW;
    }

    let mut delegated = None;
    let res = retry_on_estale(how, |how| loop {
        let old_path = filename_lookup(task, olddfd, oldname, how, None)?;
        let res = {
            let create = filename_create(task, newdfd, newname, how & LookupFlags::REVAL)?;
            if !Arc::ptr_eq(old_path.mnt(), create.path.mnt()) {
                Err(Errno::CrossDeviceLink)
            } else {
                may_linkat(task, &old_path)
                    .and_then(|()| vfs_link(task, old_path.dentry(), create.dir(), &create.dentry, &mut delegated))
            }
        };
        if delegated.is_some() {
            break_deleg_wait(&mut delegated)?;
            continue;
        }
        return res;
    });
    report("linkat", newname, res)
}

/// 对应 do_rmdir()
pub fn do_rmdir(task: &Task, dfd: Option<&Path>, name: &PathName) -> Result<(), Errno> {
    let res = retry_on_estale(LookupFlags::empty(), |lookup_flags| {
        let (path, last, last_type) = filename_parentat(task, dfd, name, lookup_flags, None)?;
        match last_type {
            LastType::DotDot => return Err(Errno::DirectoryNotEmpty),
            LastType::Dot => return Err(Errno::InvalidArgument),
            LastType::Root => return Err(Errno::DeviceOrResourceBusy),
            LastType::Norm => {}
        }
        let _write = mnt_want_write(path.mnt())?;
        let dir = path.inode().ok_or(Errno::NoSuchFileOrDirectory)?;
        let _lock = dir.lock();
        let dentry = lookup_one_qstr_excl(&last, path.dentry(), lookup_flags)?;
        vfs_rmdir(task, &dir, &dentry)
    });
    report("rmdir", name, res)
}

fn unlink_locked(
    task: &Task,
    path: &Path,
    last: &QStr,
    lookup_flags: LookupFlags,
    delegated: &mut Option<Arc<Inode>>,
) -> Result<(), Errno> {
    let dir = path.inode().ok_or(Errno::NoSuchFileOrDirectory)?;
    let _lock = dir.lock();
    let dentry = lookup_one_qstr_excl(last, path.dentry(), lookup_flags)?;
    // 目标存在之后才检查结尾的 `/`，以便给出正确的错误
    if last.has_trailing() {
        return Err(if dentry.is_dir() {
            Errno::IsADirectory
        } else {
            Errno::NotADirectory
        });
    }
    vfs_unlink(task, &dir, &dentry, delegated)
}

/// 对应 do_unlinkat()
pub fn do_unlinkat(task: &Task, dfd: Option<&Path>, name: &PathName) -> Result<(), Errno> {
    let mut delegated = None;
    let res = retry_on_estale(LookupFlags::empty(), |lookup_flags| {
        let (path, last, last_type) = filename_parentat(task, dfd, name, lookup_flags, None)?;
        if last_type != LastType::Norm {
            return Err(Errno::IsADirectory);
        }
        let _write = mnt_want_write(path.mnt())?;
        loop {
            let res = unlink_locked(task, &path, &last, lookup_flags, &mut delegated);
            if delegated.is_some() {
                // 父目录锁已经释放
                break_deleg_wait(&mut delegated)?;
                continue;
            }
            return res;
        }
    });
    report("unlinkat", name, res)
}

/// unlinkat(2) 的入口：按 `flags` 分派到 rmdir 或 unlink
pub fn do_unlinkat_flags(task: &Task, dfd: Option<&Path>, name: &PathName, flags: u32) -> Result<(), Errno> {
    if flags & !AT_REMOVEDIR != 0 {
        return Err(Errno::InvalidArgument);
    }
    if flags & AT_REMOVEDIR != 0 {
        do_rmdir(task, dfd, name)
    } else {
        do_unlinkat(task, dfd, name)
    }
}
