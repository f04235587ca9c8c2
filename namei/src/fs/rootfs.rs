//! MIT License
//!
//! Copyright (c) 2026 Fei Wang
//!
//! RootFS - 基于内存的简单文件系统
//!
//! 对应 Linux 的 rootfs / ramfs (fs/ramfs, fs/libfs.c 的 simple_* 操作)
//!
//! 目录内容保存在驱动自己的表里（按目录 inode 的 id 索引），dcache 只是
//! 它的缓存：`lookup()` 查表后用 `d_add()` 填充 dentry（可能为负）。
//!
//! 特性：
//! - 目录、常规文件、设备节点、符号链接（内联或放在页中）、whiteout
//! - 可选的 atomic_open
//! - 可配置的 dentry 操作（revalidate / d_manage / d_automount），
//!   以及查找计数和查找闸门，便于观察 dcache 行为

use alloc::collections::BTreeMap;
use alloc::sync::{Arc, Weak};
use alloc::vec::Vec;
use core::hint::spin_loop;
use core::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use crate::config::NAME_MAX;
use crate::errno::Errno;
use crate::fs::dentry::{d_add, d_alloc_name, d_instantiate, d_lookup, d_make_root, Dentry, DentryFlags, DentryOperations, DentryRef, QStr};
use crate::fs::fs_struct::FsStruct;
use crate::fs::inode::{Inode, InodeMode, InodeOperations};
use crate::fs::link::{page_get_link, page_symlink, LinkBody, LinkContext, LinkPage};
use crate::fs::mount::{MntFlags, MountRef, VfsMount};
use crate::fs::open::{AtomicOpenOutcome, OpenFlags};
use crate::fs::path::{LookupFlags, Path};
use crate::fs::rename::RenameFlags;
use crate::fs::superblock::{FileSystemType, FsTypeFlags, SuperBlock, SuperBlockFlags};
use crate::process::{Cred, Task};

/// RootFS 魔数
///
/// 对应 Linux 的 ROOTFS_MAGIC (include/linux/magic.h)
pub const ROOTFS_MAGIC: u32 = 0x73636673; // "sfsf" - Simple File System

/// 对应 rootfs_fs_type
pub static ROOTFS_TYPE: FileSystemType = FileSystemType::new("rootfs", FsTypeFlags::empty());

type DirEntries = BTreeMap<Vec<u8>, Arc<Inode>>;

/// RootFS 的 inode 操作
pub struct RootOps {
    sb: Arc<SuperBlock>,
    me: Weak<RootOps>,
    /// 目录 inode id -> 目录内容
    dirs: spin::Mutex<BTreeMap<u64, DirEntries>>,
    /// 放在页中的符号链接：inode id -> 页
    pages: spin::Mutex<BTreeMap<u64, Arc<LinkPage>>>,
    /// 魔法链接：inode id -> 目标
    jumps: spin::Mutex<BTreeMap<u64, Path>>,
    lookups: AtomicUsize,
    lookup_gate: AtomicBool,
    lookups_waiting: AtomicUsize,
    paged_symlinks: AtomicBool,
    atomic_open: AtomicBool,
}

impl RootOps {
    fn new(sb: &Arc<SuperBlock>) -> Arc<Self> {
        Arc::new_cyclic(|me| Self {
            sb: sb.clone(),
            me: me.clone(),
            dirs: spin::Mutex::new(BTreeMap::new()),
            pages: spin::Mutex::new(BTreeMap::new()),
            jumps: spin::Mutex::new(BTreeMap::new()),
            lookups: AtomicUsize::new(0),
            lookup_gate: AtomicBool::new(false),
            lookups_waiting: AtomicUsize::new(0),
            paged_symlinks: AtomicBool::new(false),
            atomic_open: AtomicBool::new(false),
        })
    }

    fn ops(&self) -> Arc<dyn InodeOperations> {
        match self.me.upgrade() {
            Some(me) => me,
            // 只在驱动本身正在析构时发生
            None => Arc::new(NullOps),
        }
    }

    /// 对应 ramfs_get_inode()
    fn get_inode(&self, mode: u32, uid: u32, gid: u32) -> Arc<Inode> {
        let ino = self.sb.next_ino();
        let inode = Inode::new(&self.sb, ino, InodeMode::new(mode), uid, gid, self.ops());
        if inode.mode().is_directory() {
            self.dirs.lock().insert(inode.id(), BTreeMap::new());
        }
        inode
    }

    /// 对应 inode_init_owner()：setgid 目录中新建项继承目录的组
    fn new_child(&self, cred: &Cred, dir: &Inode, mode: u32) -> Arc<Inode> {
        let mut mode = mode;
        let gid = if dir.mode().bits() & InodeMode::S_ISGID != 0 {
            if InodeMode::new(mode).is_directory() {
                mode |= InodeMode::S_ISGID;
            }
            dir.gid()
        } else {
            cred.fsgid
        };
        self.get_inode(mode, cred.fsuid, gid)
    }

    fn entry(&self, dir: &Inode, name: &[u8]) -> Option<Arc<Inode>> {
        self.dirs.lock().get(&dir.id()).and_then(|d| d.get(name)).cloned()
    }

    fn insert(&self, dir: &Inode, name: &[u8], inode: Arc<Inode>) -> Result<(), Errno> {
        let mut dirs = self.dirs.lock();
        let entries = dirs.get_mut(&dir.id()).ok_or(Errno::NotADirectory)?;
        if entries.contains_key(name) {
            return Err(Errno::FileExists);
        }
        entries.insert(name.to_vec(), inode);
        Ok(())
    }

    fn remove(&self, dir: &Inode, name: &[u8]) -> Result<Arc<Inode>, Errno> {
        self.dirs
            .lock()
            .get_mut(&dir.id())
            .and_then(|d| d.remove(name))
            .ok_or(Errno::NoSuchFileOrDirectory)
    }

    fn is_empty_dir(&self, inode: &Inode) -> bool {
        self.dirs.lock().get(&inode.id()).map_or(true, |d| d.is_empty())
    }

    /// 对应 ramfs_mknod() 的公共部分
    fn make_node(&self, cred: &Cred, dir: &Arc<Inode>, dentry: &Arc<Dentry>, mode: u32) -> Result<Arc<Inode>, Errno> {
        let inode = self.new_child(cred, dir, mode);
        self.insert(dir, dentry.name().name(), inode.clone())?;
        d_instantiate(dentry, inode.clone());
        Ok(inode)
    }

    fn lookup_entry(&self, dir: &Arc<Inode>, dentry: &Arc<Dentry>) -> Result<Option<DentryRef>, Errno> {
        self.lookups.fetch_add(1, Ordering::AcqRel);
        if self.lookup_gate.load(Ordering::Acquire) {
            self.lookups_waiting.fetch_add(1, Ordering::AcqRel);
            while self.lookup_gate.load(Ordering::Acquire) {
                spin_loop();
            }
            self.lookups_waiting.fetch_sub(1, Ordering::AcqRel);
        }

        let name = dentry.name();
        if name.len() > NAME_MAX {
            return Err(Errno::NameTooLong);
        }
        d_add(dentry, self.entry(dir, name.name()));
        Ok(None)
    }
}

impl InodeOperations for RootOps {
    /// 对应 simple_lookup()
    fn lookup(&self, dir: &Arc<Inode>, dentry: &Arc<Dentry>, _flags: LookupFlags) -> Result<Option<DentryRef>, Errno> {
        self.lookup_entry(dir, dentry)
    }

    fn get_link(&self, _ctx: &mut LinkContext<'_>, dentry: Option<&Arc<Dentry>>, inode: &Arc<Inode>) -> Result<LinkBody, Errno> {
        if let Some(target) = self.jumps.lock().get(&inode.id()) {
            // 魔法链接需要取引用
            if dentry.is_none() {
                return Err(Errno::NoChild);
            }
            return Ok(LinkBody::Jump(target.clone()));
        }
        let page = self.pages.lock().get(&inode.id()).cloned();
        match page {
            Some(page) => page_get_link(dentry, inode, &page),
            None => match inode.cached_link() {
                Some(body) => Ok(LinkBody::text(&body)),
                None => Err(Errno::IOError),
            },
        }
    }

    fn create(&self, cred: &Cred, dir: &Arc<Inode>, dentry: &Arc<Dentry>, mode: u32, _excl: bool) -> Result<(), Errno> {
        self.make_node(cred, dir, dentry, InodeMode::S_IFREG | (mode & InodeMode::S_IALLUGO))
            .map(|_| ())
    }

    fn mkdir(&self, cred: &Cred, dir: &Arc<Inode>, dentry: &Arc<Dentry>, mode: u32) -> Result<(), Errno> {
        self.make_node(cred, dir, dentry, InodeMode::S_IFDIR | (mode & InodeMode::S_IALLUGO))?;
        dir.inc_nlink();
        Ok(())
    }

    /// 对应 simple_rmdir()
    fn rmdir(&self, dir: &Arc<Inode>, dentry: &Arc<Dentry>) -> Result<(), Errno> {
        let inode = dentry.inode().ok_or(Errno::NoSuchFileOrDirectory)?;
        if !self.is_empty_dir(&inode) {
            return Err(Errno::DirectoryNotEmpty);
        }
        self.remove(dir, dentry.name().name())?;
        self.dirs.lock().remove(&inode.id());
        inode.set_nlink(0);
        dir.drop_nlink();
        Ok(())
    }

    /// 对应 simple_unlink()
    fn unlink(&self, dir: &Arc<Inode>, dentry: &Arc<Dentry>) -> Result<(), Errno> {
        let inode = self.remove(dir, dentry.name().name())?;
        inode.drop_nlink();
        Ok(())
    }

    /// 对应 ramfs_symlink()
    fn symlink(&self, cred: &Cred, dir: &Arc<Inode>, dentry: &Arc<Dentry>, target: &[u8]) -> Result<(), Errno> {
        let inode = self.new_child(cred, dir, InodeMode::S_IFLNK | 0o777);
        if self.paged_symlinks.load(Ordering::Acquire) {
            let page = LinkPage::new();
            page_symlink(&inode, &page, target)?;
            self.pages.lock().insert(inode.id(), page);
        } else {
            page_symlink(&inode, &LinkPage::new(), target)?;
            inode.set_cached_link(Some(Arc::from(target)));
        }
        self.insert(dir, dentry.name().name(), inode.clone())?;
        d_instantiate(dentry, inode);
        Ok(())
    }

    fn mknod(&self, cred: &Cred, dir: &Arc<Inode>, dentry: &Arc<Dentry>, mode: u32, _dev: u64) -> Result<(), Errno> {
        let mode = if mode & InodeMode::S_IFMT == 0 {
            mode | InodeMode::S_IFREG
        } else {
            mode
        };
        self.make_node(cred, dir, dentry, mode).map(|_| ())
    }

    /// 对应 simple_link()
    fn link(&self, old_dentry: &Arc<Dentry>, dir: &Arc<Inode>, new_dentry: &Arc<Dentry>) -> Result<(), Errno> {
        let inode = old_dentry.inode().ok_or(Errno::NoSuchFileOrDirectory)?;
        self.insert(dir, new_dentry.name().name(), inode.clone())?;
        inode.inc_nlink();
        d_instantiate(new_dentry, inode);
        Ok(())
    }

    /// 对应 simple_rename()
    fn rename(
        &self,
        old_dir: &Arc<Inode>,
        old_dentry: &Arc<Dentry>,
        new_dir: &Arc<Inode>,
        new_dentry: &Arc<Dentry>,
        flags: RenameFlags,
    ) -> Result<(), Errno> {
        let old_name = old_dentry.name().name().to_vec();
        let new_name = new_dentry.name().name().to_vec();
        let source = self.entry(old_dir, &old_name).ok_or(Errno::NoSuchFileOrDirectory)?;
        let target = self.entry(new_dir, &new_name);
        let moved_dir = source.mode().is_directory() && !Arc::ptr_eq(old_dir, new_dir);

        if flags.contains(RenameFlags::EXCHANGE) {
            let target = target.ok_or(Errno::NoSuchFileOrDirectory)?;
            let mut dirs = self.dirs.lock();
            if let Some(d) = dirs.get_mut(&old_dir.id()) {
                d.insert(old_name, target.clone());
            }
            if let Some(d) = dirs.get_mut(&new_dir.id()) {
                d.insert(new_name, source.clone());
            }
            drop(dirs);
            // 目录换了父目录时 `..` 的链接数跟着走
            let target_moved = target.mode().is_directory() && !Arc::ptr_eq(old_dir, new_dir);
            if moved_dir && !target_moved {
                old_dir.drop_nlink();
                new_dir.inc_nlink();
            } else if target_moved && !moved_dir {
                new_dir.drop_nlink();
                old_dir.inc_nlink();
            }
            return Ok(());
        }

        if let Some(target) = &target {
            if flags.contains(RenameFlags::NOREPLACE) {
                return Err(Errno::FileExists);
            }
            if target.mode().is_directory() {
                if !self.is_empty_dir(target) {
                    return Err(Errno::DirectoryNotEmpty);
                }
                self.dirs.lock().remove(&target.id());
                target.set_nlink(0);
                new_dir.drop_nlink();
            } else {
                target.drop_nlink();
            }
        }

        let whiteout = if flags.contains(RenameFlags::WHITEOUT) {
            Some(self.get_inode(InodeMode::S_IFCHR, source.uid(), source.gid()))
        } else {
            None
        };
        {
            let mut dirs = self.dirs.lock();
            if let Some(d) = dirs.get_mut(&old_dir.id()) {
                d.remove(&old_name);
                if let Some(w) = whiteout {
                    d.insert(old_name, w);
                }
            }
            if let Some(d) = dirs.get_mut(&new_dir.id()) {
                d.insert(new_name, source);
            }
        }
        if moved_dir {
            old_dir.drop_nlink();
            new_dir.inc_nlink();
        }
        Ok(())
    }

    /// 对应 ramfs_tmpfile()：inode 不进入任何目录
    fn tmpfile(&self, cred: &Cred, dir: &Arc<Inode>, dentry: &Arc<Dentry>, mode: u32) -> Result<(), Errno> {
        let inode = self.new_child(cred, dir, InodeMode::S_IFREG | (mode & InodeMode::S_IALLUGO));
        inode.set_nlink(0);
        d_instantiate(dentry, inode);
        Ok(())
    }

    /// 查找与创建合在一次调用里；由 `RootFs::enable_atomic_open()` 打开
    fn atomic_open(
        &self,
        cred: &Cred,
        dir: &Arc<Inode>,
        dentry: &Arc<Dentry>,
        open_flag: OpenFlags,
        mode: u32,
    ) -> Option<Result<AtomicOpenOutcome, Errno>> {
        if !self.atomic_open.load(Ordering::Acquire) {
            return None;
        }
        Some((|| {
            if dentry.in_lookup() {
                self.lookup_entry(dir, dentry)?;
            }
            if dentry.is_positive() {
                return Ok(AtomicOpenOutcome::Lookup(None));
            }
            if !open_flag.contains(OpenFlags::O_CREAT) {
                return Ok(AtomicOpenOutcome::Lookup(None));
            }
            self.make_node(cred, dir, dentry, InodeMode::S_IFREG | (mode & InodeMode::S_IALLUGO))?;
            Ok(AtomicOpenOutcome::Opened {
                dentry: None,
                created: true,
            })
        })())
    }
}

/// 驱动析构后残留 inode 使用的操作，全部取默认实现
struct NullOps;

impl InodeOperations for NullOps {}

/// `revalidate` 对某个名字的行为
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Revalidate {
    /// 有效
    Valid,
    /// 失效一次，随后恢复有效
    Invalid,
    /// RCU 模式下需要阻塞
    NeedsBlocking,
    /// 返回 ESTALE，直到以 REVAL 重试（随后失效一次）
    Stale,
}

/// 可配置的 dentry 操作
pub struct RootDentryOps {
    revalidate: spin::Mutex<BTreeMap<Vec<u8>, Revalidate>>,
    revalidate_calls: AtomicUsize,
    weak_revalidate_calls: AtomicUsize,
    /// dentry id -> 待嫁接的挂载
    automounts: spin::Mutex<BTreeMap<u64, MountRef>>,
    /// 对 MANAGE_TRANSIT 的 dentry：true 时当作普通目录
    transit_blocked: AtomicBool,
}

impl RootDentryOps {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            revalidate: spin::Mutex::new(BTreeMap::new()),
            revalidate_calls: AtomicUsize::new(0),
            weak_revalidate_calls: AtomicUsize::new(0),
            automounts: spin::Mutex::new(BTreeMap::new()),
            transit_blocked: AtomicBool::new(false),
        })
    }

    pub fn set_revalidate(&self, name: &[u8], mode: Revalidate) {
        self.revalidate.lock().insert(name.to_vec(), mode);
    }

    pub fn revalidate_calls(&self) -> usize {
        self.revalidate_calls.load(Ordering::Acquire)
    }

    pub fn weak_revalidate_calls(&self) -> usize {
        self.weak_revalidate_calls.load(Ordering::Acquire)
    }

    /// 访问 `dentry` 时自动挂载 `mnt`
    pub fn set_automount(&self, dentry: &Arc<Dentry>, mnt: MountRef) {
        dentry.set_flags(DentryFlags::NEED_AUTOMOUNT);
        self.automounts.lock().insert(dentry.id(), mnt);
    }

    pub fn set_transit_blocked(&self, blocked: bool) {
        self.transit_blocked.store(blocked, Ordering::Release);
    }
}

impl DentryOperations for RootDentryOps {
    fn flags(&self) -> DentryFlags {
        DentryFlags::OP_REVALIDATE | DentryFlags::OP_WEAK_REVALIDATE
    }

    fn d_revalidate(&self, _dir: &Arc<Inode>, name: &QStr, _dentry: &Arc<Dentry>, flags: LookupFlags) -> Result<bool, Errno> {
        self.revalidate_calls.fetch_add(1, Ordering::AcqRel);
        let mut table = self.revalidate.lock();
        let Some(mode) = table.get(name.name()).copied() else {
            return Ok(true);
        };
        match mode {
            Revalidate::Valid => Ok(true),
            Revalidate::Invalid => {
                table.remove(name.name());
                Ok(false)
            }
            Revalidate::NeedsBlocking if flags.contains(LookupFlags::RCU) => Err(Errno::NoChild),
            Revalidate::NeedsBlocking => Ok(true),
            Revalidate::Stale if flags.contains(LookupFlags::REVAL) => {
                table.remove(name.name());
                Ok(false)
            }
            Revalidate::Stale => Err(Errno::StaleFileHandle),
        }
    }

    fn d_weak_revalidate(&self, _dentry: &Arc<Dentry>, _flags: LookupFlags) -> Result<bool, Errno> {
        self.weak_revalidate_calls.fetch_add(1, Ordering::AcqRel);
        Ok(true)
    }

    fn d_manage(&self, _mnt: &Arc<VfsMount>, _dentry: &Arc<Dentry>, rcu: bool) -> Result<(), Errno> {
        if !self.transit_blocked.load(Ordering::Acquire) {
            return Ok(());
        }
        if rcu {
            return Err(Errno::NoChild);
        }
        Err(Errno::IsADirectory)
    }

    fn d_automount(&self, _mnt: &Arc<VfsMount>, dentry: &Arc<Dentry>) -> Result<Option<MountRef>, Errno> {
        match self.automounts.lock().remove(&dentry.id()) {
            Some(mnt) => Ok(Some(mnt)),
            // 已经挂好或者从未配置
            None if dentry.is_mountpoint() => Ok(None),
            None => Err(Errno::NoSuchFileOrDirectory),
        }
    }
}

/// 一个 RootFS 实例：超级块、根 dentry 与根挂载
pub struct RootFs {
    ops: Arc<RootOps>,
    d_ops: Option<Arc<RootDentryOps>>,
    root_inode: Arc<Inode>,
    root: DentryRef,
    mnt: MountRef,
}

impl RootFs {
    /// 对应 init_rootfs() + ramfs_fill_super()
    pub fn new() -> Self {
        Self::build(SuperBlock::new(&ROOTFS_TYPE, ROOTFS_MAGIC, SuperBlockFlags::empty()), None)
    }

    /// 目录最多 `max_links` 个硬链接
    pub fn with_max_links(max_links: u32) -> Self {
        Self::build(
            SuperBlock::with_max_links(&ROOTFS_TYPE, ROOTFS_MAGIC, SuperBlockFlags::empty(), max_links),
            None,
        )
    }

    /// 所有 dentry 使用可配置的 dentry 操作
    pub fn with_dentry_ops() -> Self {
        let sb = SuperBlock::new(&ROOTFS_TYPE, ROOTFS_MAGIC, SuperBlockFlags::empty());
        let d_ops = RootDentryOps::new();
        sb.set_d_op(d_ops.clone());
        Self::build(sb, Some(d_ops))
    }

    fn build(sb: Arc<SuperBlock>, d_ops: Option<Arc<RootDentryOps>>) -> Self {
        let ops = RootOps::new(&sb);
        let inode = ops.get_inode(InodeMode::S_IFDIR | 0o755, 0, 0);
        let root = d_make_root(&sb, inode.clone());
        let mnt = VfsMount::new(DentryRef::get(&root), MntFlags::empty());
        log::debug!("rootfs: new instance sb={}", sb.id());
        Self {
            ops,
            d_ops,
            root_inode: inode,
            root,
            mnt,
        }
    }

    pub fn sb(&self) -> &Arc<SuperBlock> {
        &self.ops.sb
    }

    pub fn root_dentry(&self) -> Arc<Dentry> {
        self.root.as_arc().clone()
    }

    pub fn root_ref(&self) -> DentryRef {
        DentryRef::get(&self.root)
    }

    pub fn root_inode(&self) -> Arc<Inode> {
        self.root_inode.clone()
    }

    pub fn root_mnt(&self) -> &Arc<VfsMount> {
        self.mnt.as_arc()
    }

    /// 根挂载上的根目录
    pub fn root_path(&self) -> Path {
        Path::get(&self.mnt, &self.root)
    }

    /// 根挂载上的 `dentry`
    pub fn path_of(&self, dentry: &Arc<Dentry>) -> Path {
        Path::get(&self.mnt, dentry)
    }

    pub fn dentry_ops(&self) -> Option<&Arc<RootDentryOps>> {
        self.d_ops.as_ref()
    }

    /// 以根挂载的根为根目录与当前目录的任务
    pub fn task(&self, cred: Cred) -> Task {
        Task::new(cred, FsStruct::new(self.root_path(), self.root_path()))
    }

    /// 游离的 inode，不属于任何目录
    pub fn new_inode(&self, mode: u32, uid: u32, gid: u32) -> Arc<Inode> {
        self.ops.get_inode(mode, uid, gid)
    }

    /// 驱动 lookup 被调用的次数
    pub fn lookup_count(&self) -> usize {
        self.ops.lookups.load(Ordering::Acquire)
    }

    /// 关闭闸门时，进入 lookup 的调用者原地等待
    pub fn set_lookup_gate(&self, closed: bool) {
        self.ops.lookup_gate.store(closed, Ordering::Release);
    }

    /// 正在闸门前等待的 lookup 数
    pub fn lookups_waiting(&self) -> usize {
        self.ops.lookups_waiting.load(Ordering::Acquire)
    }

    /// 之后创建的符号链接放在页中
    pub fn set_paged_symlinks(&self, paged: bool) {
        self.ops.paged_symlinks.store(paged, Ordering::Release);
    }

    /// 符号链接所在的页
    pub fn link_page(&self, link: &Arc<Dentry>) -> Option<Arc<LinkPage>> {
        let inode = link.inode()?;
        self.ops.pages.lock().get(&inode.id()).cloned()
    }

    pub fn enable_atomic_open(&self) {
        self.ops.atomic_open.store(true, Ordering::Release);
    }

    /// 在目录表和 dcache 中放入 `parent/name`
    fn add_raw(&self, parent: &Arc<Dentry>, name: &[u8], inode: Arc<Inode>) -> Arc<Dentry> {
        let name_q = QStr::for_parent(parent, name);
        if let Some(old) = d_lookup(parent, &name_q) {
            if old.is_positive() {
                return old.as_arc().clone();
            }
        }
        if let Some(dir) = parent.inode() {
            // 同名项已经存在时保留原来的
            let _ = self.ops.insert(&dir, name, inode.clone());
            if inode.mode().is_directory() {
                dir.inc_nlink();
            }
        }
        let dentry = d_alloc_name(parent, name);
        d_add(&dentry, Some(inode));
        dentry.as_arc().clone()
    }

    /// 绕过权限检查创建目录
    pub fn mkdir_raw(&self, parent: &Arc<Dentry>, name: &[u8], mode: u32) -> Arc<Dentry> {
        let inode = self.ops.get_inode(InodeMode::S_IFDIR | (mode & InodeMode::S_IALLUGO), 0, 0);
        self.add_raw(parent, name, inode)
    }

    /// 绕过权限检查创建常规文件
    pub fn create_raw(&self, parent: &Arc<Dentry>, name: &[u8], mode: u32) -> Arc<Dentry> {
        let inode = self.ops.get_inode(InodeMode::S_IFREG | (mode & InodeMode::S_IALLUGO), 0, 0);
        self.add_raw(parent, name, inode)
    }

    /// 绕过权限检查创建符号链接
    pub fn symlink_raw(&self, parent: &Arc<Dentry>, name: &[u8], target: &[u8]) -> Arc<Dentry> {
        let inode = self.ops.get_inode(InodeMode::S_IFLNK | 0o777, 0, 0);
        if self.ops.paged_symlinks.load(Ordering::Acquire) {
            let page = LinkPage::new();
            if page_symlink(&inode, &page, target).is_ok() {
                self.ops.pages.lock().insert(inode.id(), page);
            }
        } else {
            inode.set_size(target.len() as u64);
            inode.set_cached_link(Some(Arc::from(target)));
        }
        self.add_raw(parent, name, inode)
    }

    /// 魔法链接：跟随时直接跳到 `target`（类似 /proc/self/fd/N）
    pub fn magic_link_raw(&self, parent: &Arc<Dentry>, name: &[u8], target: Path) -> Arc<Dentry> {
        let inode = self.ops.get_inode(InodeMode::S_IFLNK | 0o777, 0, 0);
        self.ops.jumps.lock().insert(inode.id(), target);
        self.add_raw(parent, name, inode)
    }
}

impl Default for RootFs {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lookup_fills_negative_dentry() {
        let fs = RootFs::new();
        let root = fs.root_dentry();
        let dir = fs.root_inode();
        let dentry = d_alloc_name(&root, b"absent");
        fs.ops.lookup(&dir, &dentry, LookupFlags::empty()).unwrap();
        assert!(dentry.is_negative());
        assert!(dentry.is_hashed());
        assert_eq!(fs.lookup_count(), 1);
    }

    #[test]
    fn test_raw_entries_visible_to_driver() {
        let fs = RootFs::new();
        let root = fs.root_dentry();
        let nlink = fs.root_inode().nlink();
        let d = fs.mkdir_raw(&root, b"d", 0o700);
        assert_eq!(fs.root_inode().nlink(), nlink + 1);
        assert_eq!(d.inode().unwrap().mode().bits(), InodeMode::S_IFDIR | 0o700);

        let found = fs.ops.entry(&fs.root_inode(), b"d").unwrap();
        assert!(Arc::ptr_eq(&found, &d.inode().unwrap()));
    }

    #[test]
    fn test_lookup_rejects_long_name() {
        let fs = RootFs::new();
        let root = fs.root_dentry();
        let long = [b'x'; NAME_MAX + 1];
        let dentry = d_alloc_name(&root, &long);
        assert_eq!(
            fs.ops.lookup(&fs.root_inode(), &dentry, LookupFlags::empty()).err(),
            Some(Errno::NameTooLong)
        );
    }

    #[test]
    fn test_revalidate_modes() {
        let ops = RootDentryOps::new();
        let fs = RootFs::new();
        let root = fs.root_dentry();
        let dir = fs.root_inode();
        let name = QStr::for_parent(&root, b"n");

        ops.set_revalidate(b"n", Revalidate::Invalid);
        assert_eq!(ops.d_revalidate(&dir, &name, &root, LookupFlags::empty()), Ok(false));
        assert_eq!(ops.d_revalidate(&dir, &name, &root, LookupFlags::empty()), Ok(true));

        ops.set_revalidate(b"n", Revalidate::NeedsBlocking);
        assert_eq!(ops.d_revalidate(&dir, &name, &root, LookupFlags::RCU), Err(Errno::NoChild));
        assert_eq!(ops.d_revalidate(&dir, &name, &root, LookupFlags::empty()), Ok(true));

        ops.set_revalidate(b"n", Revalidate::Stale);
        assert_eq!(
            ops.d_revalidate(&dir, &name, &root, LookupFlags::empty()),
            Err(Errno::StaleFileHandle)
        );
        assert_eq!(ops.d_revalidate(&dir, &name, &root, LookupFlags::REVAL), Ok(false));
        assert_eq!(ops.revalidate_calls(), 6);
    }
}
