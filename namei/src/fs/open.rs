//! MIT License
//!
//! Copyright (c) 2026 Fei Wang
//!
//! open 的路径部分
//!
//! 对应 Linux fs/namei.c 的 path_openat() 及其辅助函数，以及 fs/open.c 的
//! build_open_flags()。打开文件对象本身（file / f_op）不在这里，成功时
//! 返回 [`OpenedFile`]，只记录路径、打开标志和 FMODE_* 状态。
//!
//! 末尾分量的处理顺序：
//! 1. `lookup_fast_for_open()` 先查 dcache
//! 2. 未命中时加锁（O_CREAT 独占，否则共享）调用 `lookup_open()`，
//!    由驱动的 atomic_open 或 lookup + create 完成
//! 3. `do_open()` 做最后的检查、权限与截断

use alloc::sync::Arc;
use bitflags::bitflags;
use core::fmt;

use crate::errno::Errno;
use crate::fs::dentry::{d_alloc_name, d_alloc_parallel, d_invalidate, d_lookup, d_lookup_done, DentryRef};
use crate::fs::filename::{getname, getname_kernel, PathName};
use crate::fs::inode::{Inode, InodeMode, InodeState};
use crate::fs::mount::{mnt_want_write, MountRef};
use crate::fs::namei::vfs_prepare_mode;
use crate::fs::path::{LastType, LookupFlags, Path};
use crate::fs::perm::{inode_permission, may_create_in_sticky, may_open, MayFlags};
use crate::fs::walk::{d_revalidate, path_lookupat, with_retries, Child, Cursor, NameiData, NdPath, WalkFlags, WalkStart};
use crate::process::{Task, INVALID_GID, INVALID_UID};

bitflags! {
    /// open(2) 标志 (include/uapi/asm-generic/fcntl.h)
    #[derive(Debug, Copy, Clone, PartialEq, Eq)]
    pub struct OpenFlags: u32 {
        const O_WRONLY    = 0o1;
        const O_RDWR      = 0o2;
        const O_CREAT     = 0o100;
        const O_EXCL      = 0o200;
        const O_NOCTTY    = 0o400;
        const O_TRUNC     = 0o1000;
        const O_APPEND    = 0o2000;
        const O_NONBLOCK  = 0o4000;
        const O_DSYNC     = 0o10000;
        const FASYNC      = 0o20000;
        const O_DIRECT    = 0o40000;
        const O_LARGEFILE = 0o100000;
        const O_DIRECTORY = 0o200000;
        const O_NOFOLLOW  = 0o400000;
        const O_NOATIME   = 0o1000000;
        const O_CLOEXEC   = 0o2000000;
        const __O_SYNC    = 0o4000000;
        /// 只解析路径，不真正打开
        const O_PATH      = 0o10000000;
        const __O_TMPFILE = 0o20000000;
        const O_TMPFILE   = Self::__O_TMPFILE.bits() | Self::O_DIRECTORY.bits();
    }
}

impl OpenFlags {
    pub const O_RDONLY: OpenFlags = OpenFlags::empty();
    pub const O_ACCMODE: u32 = 3;

    /// O_PATH 下仍然有意义的标志
    pub const O_PATH_FLAGS: OpenFlags = OpenFlags::O_DIRECTORY
        .union(OpenFlags::O_NOFOLLOW)
        .union(OpenFlags::O_PATH)
        .union(OpenFlags::O_CLOEXEC);

    /// 访问模式（O_RDONLY / O_WRONLY / O_RDWR）
    pub const fn accmode(self) -> u32 {
        self.bits() & Self::O_ACCMODE
    }

    /// 对应 WILL_CREATE()
    pub const fn will_create(self) -> bool {
        self.intersects(OpenFlags::O_CREAT.union(OpenFlags::__O_TMPFILE))
    }
}

bitflags! {
    /// openat2 的 RESOLVE_* 标志
    #[derive(Debug, Copy, Clone, PartialEq, Eq)]
    pub struct ResolveFlags: u64 {
        const NO_XDEV       = 0x01;
        const NO_MAGICLINKS = 0x02;
        const NO_SYMLINKS   = 0x04;
        const BENEATH       = 0x08;
        const IN_ROOT       = 0x10;
        const CACHED        = 0x20;
    }
}

bitflags! {
    /// 打开状态 (FMODE_*)
    #[derive(Debug, Copy, Clone, PartialEq, Eq)]
    pub struct FMode: u32 {
        /// 已经打开
        const OPENED  = 1 << 0;
        /// 文件是这次打开新建的
        const CREATED = 1 << 1;
        /// O_PATH 打开
        const PATH    = 1 << 2;
    }
}

/// 对应 struct open_how：调用者给出的原始参数
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq)]
pub struct OpenHow {
    pub flags: u64,
    pub mode: u64,
    pub resolve: u64,
}

impl OpenHow {
    pub fn new(flags: OpenFlags, mode: u32) -> Self {
        Self {
            flags: flags.bits() as u64,
            mode: mode as u64,
            resolve: 0,
        }
    }

    pub fn with_resolve(mut self, resolve: ResolveFlags) -> Self {
        self.resolve = resolve.bits();
        self
    }
}

/// 对应 struct open_flags：校验后的打开意图
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct OpenOp {
    pub open_flag: OpenFlags,
    pub mode: u32,
    pub acc_mode: MayFlags,
    /// 末尾分量的查找意图（LOOKUP_OPEN / CREATE / EXCL）
    pub intent: LookupFlags,
    pub lookup_flags: LookupFlags,
}

/// 对应 build_open_how()：open(2) 的旧式参数
///
/// 未知标志被忽略；O_PATH 只保留 [`OpenFlags::O_PATH_FLAGS`]；
/// 不创建文件时 mode 为 0。
pub fn build_open_how(flags: u32, mode: u32) -> OpenHow {
    let mut open_flag = OpenFlags::from_bits_truncate(flags);
    if open_flag.contains(OpenFlags::O_PATH) {
        open_flag &= OpenFlags::O_PATH_FLAGS;
    }
    let mode = if open_flag.will_create() {
        mode & InodeMode::S_IALLUGO
    } else {
        0
    };
    OpenHow::new(open_flag, mode)
}

/// 对应 build_open_flags()
pub fn build_open_flags(how: &OpenHow) -> Result<OpenOp, Errno> {
    let flags = u32::try_from(how.flags).map_err(|_| Errno::InvalidArgument)?;
    let mut flags = OpenFlags::from_bits(flags).ok_or(Errno::InvalidArgument)?;
    let resolve = ResolveFlags::from_bits(how.resolve).ok_or(Errno::InvalidArgument)?;
    // 两种受限方式互斥
    if resolve.contains(ResolveFlags::BENEATH | ResolveFlags::IN_ROOT) {
        return Err(Errno::InvalidArgument);
    }

    let mode = if flags.will_create() {
        if how.mode & !(InodeMode::S_IALLUGO as u64) != 0 {
            return Err(Errno::InvalidArgument);
        }
        how.mode as u32 | InodeMode::S_IFREG
    } else {
        if how.mode != 0 {
            return Err(Errno::InvalidArgument);
        }
        0
    };

    // O_DIRECTORY | O_CREAT 曾经会创建普通文件
    if flags.contains(OpenFlags::O_DIRECTORY | OpenFlags::O_CREAT) {
        return Err(Errno::InvalidArgument);
    }

    let mut acc_mode = match flags.accmode() {
        0 => MayFlags::READ,
        1 => MayFlags::WRITE,
        _ => MayFlags::READ | MayFlags::WRITE,
    };
    if flags.contains(OpenFlags::__O_TMPFILE) {
        // 必须同时给出 O_DIRECTORY，旧内核上才会明确失败
        if !flags.contains(OpenFlags::O_DIRECTORY) || !acc_mode.contains(MayFlags::WRITE) {
            return Err(Errno::InvalidArgument);
        }
    }
    if flags.contains(OpenFlags::O_PATH) {
        if !OpenFlags::O_PATH_FLAGS.contains(flags) {
            return Err(Errno::InvalidArgument);
        }
        acc_mode = MayFlags::empty();
    }
    if flags.contains(OpenFlags::__O_SYNC) {
        flags |= OpenFlags::O_DSYNC;
    }
    let open_flag = flags;

    if flags.contains(OpenFlags::O_TRUNC) {
        acc_mode |= MayFlags::WRITE;
    }
    if flags.contains(OpenFlags::O_APPEND) {
        acc_mode |= MayFlags::APPEND;
    }

    let mut intent = if flags.contains(OpenFlags::O_PATH) {
        LookupFlags::empty()
    } else {
        LookupFlags::OPEN
    };
    if flags.contains(OpenFlags::O_CREAT) {
        intent |= LookupFlags::CREATE;
        if flags.contains(OpenFlags::O_EXCL) {
            intent |= LookupFlags::EXCL;
            flags |= OpenFlags::O_NOFOLLOW;
        }
    }

    let mut lookup_flags = LookupFlags::empty();
    if flags.contains(OpenFlags::O_DIRECTORY) {
        lookup_flags |= LookupFlags::DIRECTORY;
    }
    if !flags.contains(OpenFlags::O_NOFOLLOW) {
        lookup_flags |= LookupFlags::FOLLOW;
    }
    if resolve.contains(ResolveFlags::NO_XDEV) {
        lookup_flags |= LookupFlags::NO_XDEV;
    }
    if resolve.contains(ResolveFlags::NO_MAGICLINKS) {
        lookup_flags |= LookupFlags::NO_MAGICLINKS;
    }
    if resolve.contains(ResolveFlags::NO_SYMLINKS) {
        lookup_flags |= LookupFlags::NO_SYMLINKS;
    }
    if resolve.contains(ResolveFlags::BENEATH) {
        lookup_flags |= LookupFlags::BENEATH;
    }
    if resolve.contains(ResolveFlags::IN_ROOT) {
        lookup_flags |= LookupFlags::IN_ROOT;
    }
    if resolve.contains(ResolveFlags::CACHED) {
        // 创建、截断、tmpfile 都一定会阻塞
        if flags.intersects(OpenFlags::O_TRUNC | OpenFlags::O_CREAT | OpenFlags::__O_TMPFILE) {
            return Err(Errno::TryAgain);
        }
        lookup_flags |= LookupFlags::CACHED;
    }

    Ok(OpenOp {
        open_flag,
        mode,
        acc_mode,
        intent,
        lookup_flags,
    })
}

/// 驱动 atomic_open 的结果
pub enum AtomicOpenOutcome {
    /// 驱动已经完成打开；`dentry` 为 `None` 表示就是传入的那个
    Opened { dentry: Option<DentryRef>, created: bool },
    /// 只做了查找，由调用者完成打开；结果为负即 ENOENT
    Lookup(Option<DentryRef>),
}

/// 打开的结果
pub struct OpenedFile {
    pub path: Path,
    pub flags: OpenFlags,
    pub mode: FMode,
}

impl OpenedFile {
    pub fn inode(&self) -> Option<Arc<Inode>> {
        self.path.inode()
    }

    pub fn is_created(&self) -> bool {
        self.mode.contains(FMode::CREATED)
    }
}

impl fmt::Debug for OpenedFile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OpenedFile")
            .field("path", &self.path)
            .field("flags", &self.flags)
            .field("mode", &self.mode)
            .finish()
    }
}

fn ref_path<'p>(nd: &'p NameiData<'_>) -> Result<&'p Path, Errno> {
    match &nd.path {
        NdPath::Ref(path) => Ok(path),
        NdPath::Rcu { .. } => Err(Errno::NoChild),
    }
}

/// 对应 handle_truncate()
fn handle_truncate(task: &Task, path: &Path) -> Result<(), Errno> {
    let inode = path.inode().ok_or(Errno::NoSuchFileOrDirectory)?;
    task.lsm(|h| h.path_truncate(path.dentry()))?;
    inode.i_op.truncate(&inode, 0)
}

/// 对应 may_o_create()
fn may_o_create(task: &Task, dir: &Arc<Inode>, dentry: &DentryRef, mode: u32) -> Result<(), Errno> {
    if task.fsuid() == INVALID_UID || task.cred().fsgid == INVALID_GID {
        return Err(Errno::ValueTooLarge);
    }
    inode_permission(task, dir, MayFlags::WRITE | MayFlags::EXEC)?;
    task.lsm(|h| h.inode_create(dir, dentry, mode))
}

/// 对应 lookup_open()：父目录已加锁（O_CREAT 时独占）
///
/// 先检查创建权限但不立即失败：文件已存在时 O_CREAT 打开仍然应该成功，
/// 只有确实需要创建时才报告 `create_error`。
fn lookup_open(nd: &NameiData<'_>, op: &OpenOp, got_write: bool, fmode: &mut FMode) -> Result<DentryRef, Errno> {
    let task = nd.task();
    let dir = nd.path.dentry().clone();
    let dir_inode = dir.inode().ok_or(Errno::NoSuchFileOrDirectory)?;
    if dir_inode.is_deaddir() {
        return Err(Errno::NoSuchFileOrDirectory);
    }

    fmode.remove(FMode::CREATED);
    let mut cached = d_lookup(&dir, &nd.last);
    let dentry = loop {
        let dentry = match cached.take() {
            Some(dentry) => dentry,
            None => d_alloc_parallel(&dir, &nd.last)?,
        };
        if dentry.in_lookup() {
            break dentry;
        }
        if d_revalidate(&dir_inode, &nd.last, &dentry, nd.flags)? {
            break dentry;
        }
        d_invalidate(&dentry);
    };
    // 已缓存的正 dentry：交给 do_open
    if dentry.is_positive() {
        return Ok(dentry);
    }

    let mut open_flag = op.open_flag;
    let mut mode = op.mode;
    let mut create_error = None;
    if !got_write {
        open_flag.remove(OpenFlags::O_TRUNC);
    }
    if open_flag.contains(OpenFlags::O_CREAT) {
        if open_flag.contains(OpenFlags::O_EXCL) {
            open_flag.remove(OpenFlags::O_TRUNC);
        }
        mode = vfs_prepare_mode(task, &dir_inode, mode, mode, mode);
        create_error = if got_write {
            may_o_create(task, &dir_inode, &dentry, mode).err()
        } else {
            Some(Errno::ReadOnlyFileSystem)
        };
    }
    if create_error.is_some() {
        open_flag.remove(OpenFlags::O_CREAT);
    }

    let mut atomic_flag = open_flag;
    if nd.flags.contains(LookupFlags::DIRECTORY) {
        atomic_flag |= OpenFlags::O_DIRECTORY;
    }
    if let Some(res) = dir_inode.i_op.atomic_open(task.cred(), &dir_inode, &dentry, atomic_flag, mode) {
        d_lookup_done(&dentry);
        let res = res.and_then(|outcome| match outcome {
            AtomicOpenOutcome::Opened { dentry: alias, created } => {
                *fmode |= FMode::OPENED;
                if created {
                    *fmode |= FMode::CREATED;
                }
                Ok(alias.unwrap_or(dentry))
            }
            AtomicOpenOutcome::Lookup(alias) => {
                let dentry = alias.unwrap_or(dentry);
                if dentry.is_negative() {
                    Err(Errno::NoSuchFileOrDirectory)
                } else {
                    Ok(dentry)
                }
            }
        });
        return match (res, create_error) {
            (Err(Errno::NoSuchFileOrDirectory), Some(e)) => Err(e),
            (res, _) => res,
        };
    }

    let mut dentry = dentry;
    if dentry.in_lookup() {
        let res = dir_inode.i_op.lookup(&dir_inode, &dentry, nd.flags);
        d_lookup_done(&dentry);
        if let Some(alias) = res? {
            dentry = alias;
        }
    }

    // 负 dentry：创建文件
    if dentry.is_negative() && open_flag.contains(OpenFlags::O_CREAT) {
        *fmode |= FMode::CREATED;
        dir_inode.i_op.create(
            task.cred(),
            &dir_inode,
            &dentry,
            mode,
            open_flag.contains(OpenFlags::O_EXCL),
        )?;
    }
    if let Some(e) = create_error {
        if dentry.is_negative() {
            return Err(e);
        }
    }
    Ok(dentry)
}

/// 对应 lookup_fast_for_open()
fn lookup_fast_for_open(nd: &mut NameiData<'_>, open_flag: OpenFlags) -> Result<Option<Child>, Errno> {
    let trailing = nd.last.has_trailing();
    if open_flag.contains(OpenFlags::O_CREAT) {
        if trailing {
            return Err(Errno::IsADirectory);
        }
        // O_EXCL 创建不必查缓存
        if open_flag.contains(OpenFlags::O_EXCL) {
            return Ok(None);
        }
    }
    if trailing {
        nd.flags |= LookupFlags::FOLLOW | LookupFlags::DIRECTORY;
    }

    let Some(child) = nd.lookup_fast()? else {
        return Ok(None);
    };
    if open_flag.contains(OpenFlags::O_CREAT) {
        // 负 dentry 需要在锁内创建
        let negative = match &child {
            Child::Rcu(dentry) => dentry.is_negative(),
            Child::Ref(dentry) => dentry.is_negative(),
        };
        if negative {
            return Ok(None);
        }
    }
    Ok(Some(child))
}

/// 对应 open_last_lookups()
///
/// 返回 `Some` 表示末尾是需要跟随的符号链接，遍历从返回的文本继续。
fn open_last_lookups(nd: &mut NameiData<'_>, op: &OpenOp, fmode: &mut FMode) -> Result<Option<Cursor>, Errno> {
    let open_flag = op.open_flag;
    nd.flags |= op.intent;

    if nd.last_type != LastType::Norm {
        if nd.depth() > 0 {
            nd.put_link();
        }
        return nd.handle_dots(nd.last_type);
    }

    let child = match lookup_fast_for_open(nd, open_flag)? {
        Some(child) => child,
        None => {
            if nd.is_rcu() && (!open_flag.contains(OpenFlags::O_CREAT) || !nd.try_to_unlazy()) {
                return Err(Errno::NoChild);
            }

            // 先不因只读失败，留给 lookup_open 决定
            let write = if open_flag
                .intersects(OpenFlags::O_CREAT | OpenFlags::O_TRUNC | OpenFlags::O_WRONLY | OpenFlags::O_RDWR)
            {
                mnt_want_write(nd.path.mnt()).ok()
            } else {
                None
            };
            let dir_inode = nd.path.dentry().inode().ok_or(Errno::NoSuchFileOrDirectory)?;
            let res = {
                let _lock = if open_flag.contains(OpenFlags::O_CREAT) {
                    dir_inode.lock()
                } else {
                    dir_inode.lock_shared()
                };
                lookup_open(nd, op, write.is_some(), fmode)
            };
            drop(write);
            let dentry = res?;

            if fmode.intersects(FMode::OPENED | FMode::CREATED) {
                let mnt = MountRef::get(nd.path.mnt());
                nd.inode = dentry.inode();
                nd.path = NdPath::Ref(Path::new(mnt, dentry));
                return Ok(None);
            }
            Child::Ref(dentry)
        }
    };

    if nd.depth() > 0 {
        nd.put_link();
    }
    let res = nd.step_into(WalkFlags::TRAILING, child)?;
    if res.is_some() {
        nd.flags.remove(LookupFlags::OPEN | LookupFlags::CREATE | LookupFlags::EXCL);
    }
    Ok(res)
}

/// 对应 do_open()：末尾分量确定之后的检查
fn do_open(nd: &mut NameiData<'_>, op: &OpenOp, fmode: &mut FMode) -> Result<(), Errno> {
    let task = nd.task();
    if !fmode.intersects(FMode::OPENED | FMode::CREATED) {
        nd.complete_walk()?;
    }
    let mut open_flag = op.open_flag;
    let dentry = nd.path.dentry().clone();

    if open_flag.contains(OpenFlags::O_CREAT) {
        if open_flag.contains(OpenFlags::O_EXCL) && !fmode.contains(FMode::CREATED) {
            return Err(Errno::FileExists);
        }
        if dentry.is_dir() {
            return Err(Errno::IsADirectory);
        }
        let inode = dentry.inode().ok_or(Errno::NoSuchFileOrDirectory)?;
        may_create_in_sticky(task, nd.dir_mode, nd.dir_uid, &inode)?;
    }
    if nd.flags.contains(LookupFlags::DIRECTORY) && !dentry.is_dir() {
        return Err(Errno::NotADirectory);
    }

    let path = ref_path(nd)?;
    let mut acc_mode = op.acc_mode;
    let mut truncate_write = None;
    if fmode.contains(FMode::CREATED) {
        // 刚创建的文件不检查写权限，也不截断
        open_flag.remove(OpenFlags::O_TRUNC);
        acc_mode = MayFlags::empty();
    } else if dentry.is_reg() && open_flag.contains(OpenFlags::O_TRUNC) {
        truncate_write = Some(mnt_want_write(path.mnt())?);
    }
    may_open(task, path, acc_mode, open_flag)?;
    *fmode |= FMode::OPENED;
    if truncate_write.is_some() {
        handle_truncate(task, path)?;
    }
    Ok(())
}

/// 对应 vfs_tmpfile()：在 `parent` 下创建无名文件
///
/// 没有 O_EXCL 时新文件可以随后用 linkat 链接进目录树。
pub fn vfs_tmpfile(task: &Task, parent: &Path, mode: u32, open_flag: OpenFlags) -> Result<OpenedFile, Errno> {
    let dir = parent.inode().ok_or(Errno::NoSuchFileOrDirectory)?;
    inode_permission(task, &dir, MayFlags::WRITE | MayFlags::EXEC)?;

    let child = d_alloc_name(parent.dentry(), b"/");
    let mode = vfs_prepare_mode(task, &dir, mode, mode, mode);
    dir.i_op.tmpfile(task.cred(), &dir, &child, mode)?;
    let path = Path::new(MountRef::get(parent.mnt()), child);

    // 文件刚刚创建，不检查其他权限
    may_open(task, &path, MayFlags::empty(), open_flag)?;
    let inode = path.inode().ok_or(Errno::NoSuchFileOrDirectory)?;
    if !open_flag.contains(OpenFlags::O_EXCL) {
        inode.set_state(InodeState::I_LINKABLE);
    }
    Ok(OpenedFile {
        path,
        flags: open_flag,
        mode: FMode::OPENED,
    })
}

/// 对应 do_tmpfile()
fn do_tmpfile(start: &WalkStart<'_>, op: &OpenOp, flags: LookupFlags, links: &mut u32) -> Result<OpenedFile, Errno> {
    let path = path_lookupat(start, flags | LookupFlags::DIRECTORY, links)?;
    let _write = mnt_want_write(path.mnt())?;
    vfs_tmpfile(start.task, &path, op.mode, op.open_flag)
}

/// 对应 do_o_path()：O_PATH 不调用驱动的 open
fn do_o_path(start: &WalkStart<'_>, op: &OpenOp, flags: LookupFlags, links: &mut u32) -> Result<OpenedFile, Errno> {
    let path = path_lookupat(start, flags, links)?;
    Ok(OpenedFile {
        path,
        flags: op.open_flag,
        mode: FMode::OPENED | FMode::PATH,
    })
}

fn open_walk(nd: &mut NameiData<'_>, s: Cursor, op: &OpenOp, fmode: &mut FMode) -> Result<(), Errno> {
    let mut s = s;
    loop {
        nd.link_path_walk(s)?;
        match open_last_lookups(nd, op, fmode)? {
            Some(next) => s = next,
            None => break,
        }
    }
    do_open(nd, op, fmode)
}

/// 对应 path_openat()
fn path_openat(start: &WalkStart<'_>, op: &OpenOp, flags: LookupFlags, links: &mut u32) -> Result<OpenedFile, Errno> {
    if op.open_flag.contains(OpenFlags::__O_TMPFILE) {
        return do_tmpfile(start, op, flags, links);
    }
    if op.open_flag.contains(OpenFlags::O_PATH) {
        return do_o_path(start, op, flags, links);
    }

    let (mut nd, s) = NameiData::path_init(start, flags, *links)?;
    let mut fmode = FMode::empty();
    let res = open_walk(&mut nd, s, op, &mut fmode);
    *links = nd.total_link_count;
    res?;
    Ok(OpenedFile {
        path: nd.into_path()?,
        flags: op.open_flag,
        mode: fmode,
    })
}

/// 对应 do_filp_open()：RCU → 引用 → REVAL
pub fn do_filp_open(task: &Task, dfd: Option<&Path>, name: &PathName, op: &OpenOp) -> Result<OpenedFile, Errno> {
    let start = WalkStart {
        task,
        dfd,
        name: name.buffer(),
        root: None,
    };
    let mut links = 0;
    let res = with_retries(op.lookup_flags, &mut links, |flags, links| path_openat(&start, op, flags, links));
    if let Err(e) = &res {
        log::debug!("open({:?}) failed: {:?}", name, e);
    }
    res
}

/// 对应 do_file_open_root()：以 `root` 为根打开
pub fn do_file_open_root(task: &Task, root: &Path, name: &str, op: &OpenOp) -> Result<OpenedFile, Errno> {
    if root.dentry().is_symlink() && op.intent.contains(LookupFlags::OPEN) {
        return Err(Errno::TooManySymbolicLinks);
    }
    let name = getname_kernel(name)?;
    let start = WalkStart {
        task,
        dfd: None,
        name: name.buffer(),
        root: Some(root),
    };
    let mut links = 0;
    with_retries(op.lookup_flags, &mut links, |flags, links| path_openat(&start, op, flags, links))
}

/// openat2(2)
pub fn do_sys_openat2(task: &Task, dfd: Option<&Path>, filename: &[u8], how: &OpenHow) -> Result<OpenedFile, Errno> {
    let op = build_open_flags(how)?;
    let name = getname(filename)?;
    do_filp_open(task, dfd, &name, &op)
}

/// openat(2)：旧式参数
pub fn do_sys_open(task: &Task, dfd: Option<&Path>, filename: &[u8], flags: u32, mode: u32) -> Result<OpenedFile, Errno> {
    let how = build_open_how(flags, mode);
    do_sys_openat2(task, dfd, filename, &how)
}

/// 对应 filp_open()：内核内部按路径打开
pub fn filp_open(task: &Task, filename: &str, flags: u32, mode: u32) -> Result<OpenedFile, Errno> {
    let how = build_open_how(flags, mode);
    let op = build_open_flags(&how)?;
    let name = getname_kernel(filename)?;
    do_filp_open(task, None, &name, &op)
}
