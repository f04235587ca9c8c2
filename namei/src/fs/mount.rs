//! MIT License
//!
//! Copyright (c) 2026 Fei Wang
//!
//! 挂载点管理
//!
//! 遵循 Linux 内核的挂载点设计 (fs/namespace.c, include/linux/mount.h)
//!
//! 核心概念：
//! - `struct vfsmount`: 文件系统实例在命名空间中的一个位置
//! - 挂载哈希表：以 (父挂载, 挂载点 dentry) 为键
//! - `mount_lock`: 全局顺序锁，所有挂载拓扑的修改都在写锁内进行，
//!   推测遍历用它检测并发的 mount / umount

use alloc::collections::BTreeMap;
use alloc::sync::Arc;
use alloc::vec::Vec;
use bitflags::bitflags;
use core::fmt;
use core::mem;
use core::ops::Deref;
use core::sync::atomic::{AtomicI64, AtomicU32, AtomicU64, Ordering};

use crate::errno::Errno;
use crate::fs::dentry::{is_subdir, Dentry, DentryFlags, DentryRef};
use crate::fs::path::Path;
use crate::fs::superblock::SuperBlock;
use crate::sync::SeqLock;

/// 全局挂载顺序锁
pub static MOUNT_LOCK: SeqLock = SeqLock::new();

/// 挂载哈希表：(父挂载 id, 挂载点 dentry id) -> 子挂载
static MOUNT_HASHTABLE: spin::RwLock<BTreeMap<(u64, u64), Arc<VfsMount>>> =
    spin::RwLock::new(BTreeMap::new());

bitflags! {
    /// 挂载点标志
    ///
    /// 对应 Linux 的 MNT_* 宏 (include/linux/mount.h)
    #[derive(Debug, Copy, Clone, PartialEq, Eq)]
    pub struct MntFlags: u32 {
        const NOSUID      = 0x01;
        const NODEV       = 0x02;
        const NOEXEC      = 0x04;
        const NOATIME     = 0x08;
        const NODIRATIME  = 0x10;
        const RELATIME    = 0x20;
        /// 只读挂载
        const READONLY    = 0x40;
        /// 不跟随符号链接
        const NOSYMFOLLOW = 0x80;
        /// 已被卸载，正在等待最后的引用释放
        const DOOMED      = 0x100_0000;
    }
}

bitflags! {
    /// umount 标志
    #[derive(Debug, Copy, Clone, PartialEq, Eq)]
    pub struct UmountFlags: u32 {
        /// 懒卸载：立即从拓扑中摘除，已有的引用继续有效
        const MNT_DETACH = 0x2;
    }
}

static NEXT_MNT_ID: AtomicU64 = AtomicU64::new(1);

/// 挂载点
///
/// 对应 Linux 的 struct mount / struct vfsmount
pub struct VfsMount {
    mnt_id: u64,
    mnt_root: DentryRef,
    /// 超级块
    pub mnt_sb: Arc<SuperBlock>,
    mnt_flags: AtomicU32,
    mnt_count: AtomicI64,
    mnt_writers: AtomicU32,
    mnt_parent: spin::RwLock<Option<Arc<VfsMount>>>,
    mnt_mountpoint: spin::RwLock<Option<DentryRef>>,
}

impl VfsMount {
    /// 对应 vfs_create_mount()：新挂载尚未加入拓扑，调用者持有唯一引用
    pub fn new(root: DentryRef, flags: MntFlags) -> MountRef {
        let sb = root.d_sb.clone();
        let mnt = Arc::new(Self {
            mnt_id: NEXT_MNT_ID.fetch_add(1, Ordering::Relaxed),
            mnt_root: root,
            mnt_sb: sb,
            mnt_flags: AtomicU32::new(flags.bits()),
            mnt_count: AtomicI64::new(1),
            mnt_writers: AtomicU32::new(0),
            mnt_parent: spin::RwLock::new(None),
            mnt_mountpoint: spin::RwLock::new(None),
        });
        MountRef { mnt }
    }

    /// 对应 clone_mnt()：绑定挂载 `path` 指向的子树
    pub fn bind(path: &Path, flags: MntFlags) -> MountRef {
        Self::new(path.dentry.clone(), flags)
    }

    pub fn id(&self) -> u64 {
        self.mnt_id
    }

    pub fn root(&self) -> &Arc<Dentry> {
        self.mnt_root.as_arc()
    }

    pub fn flags(&self) -> MntFlags {
        MntFlags::from_bits_truncate(self.mnt_flags.load(Ordering::Acquire))
    }

    pub fn set_flags(&self, flags: MntFlags) {
        self.mnt_flags.fetch_or(flags.bits(), Ordering::AcqRel);
    }

    pub fn clear_flags(&self, flags: MntFlags) {
        self.mnt_flags.fetch_and(!flags.bits(), Ordering::AcqRel);
    }

    pub fn is_doomed(&self) -> bool {
        self.flags().contains(MntFlags::DOOMED)
    }

    /// 当前逻辑引用数
    pub fn count(&self) -> i64 {
        self.mnt_count.load(Ordering::Acquire)
    }

    /// 父挂载（不取引用）
    pub fn parent(&self) -> Option<Arc<VfsMount>> {
        self.mnt_parent.read().clone()
    }

    /// 挂载点 dentry（不取引用）
    pub fn mountpoint(&self) -> Option<Arc<Dentry>> {
        self.mnt_mountpoint.read().as_ref().map(|d| d.as_arc().clone())
    }

    /// 对应 mnt_has_parent()
    pub fn has_parent(&self) -> bool {
        self.mnt_parent.read().is_some()
    }

    /// 对应 __mnt_is_readonly()
    pub fn is_readonly(&self) -> bool {
        self.flags().contains(MntFlags::READONLY) || self.mnt_sb.is_rdonly()
    }

    fn add_count(&self, n: i64) {
        self.mnt_count.fetch_add(n, Ordering::AcqRel);
    }
}

impl fmt::Debug for VfsMount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VfsMount")
            .field("id", &self.mnt_id)
            .field("flags", &self.flags())
            .field("count", &self.count())
            .finish()
    }
}

/// 持有一个逻辑引用的挂载（mntget / mntput）
pub struct MountRef {
    mnt: Arc<VfsMount>,
}

impl MountRef {
    /// 对应 mntget()
    pub fn get(mnt: &Arc<VfsMount>) -> Self {
        mnt.add_count(1);
        Self { mnt: mnt.clone() }
    }

    /// 对应 legitimize_mnt()
    ///
    /// 为推测遍历中看到的挂载取引用；期间挂载拓扑发生变化则失败。
    pub fn legitimize(mnt: &Arc<VfsMount>, seq: u32) -> Option<Self> {
        mnt.add_count(1);
        let r = Self { mnt: mnt.clone() };
        if MOUNT_LOCK.read_retry(seq) {
            return None;
        }
        Some(r)
    }

    pub fn as_arc(&self) -> &Arc<VfsMount> {
        &self.mnt
    }

    pub fn ptr_eq(&self, other: &Arc<VfsMount>) -> bool {
        Arc::ptr_eq(&self.mnt, other)
    }

    /// 引用转交给挂载树
    fn into_tree(self) -> Arc<VfsMount> {
        let mnt = self.mnt.clone();
        mem::forget(self);
        mnt
    }
}

impl Deref for MountRef {
    type Target = Arc<VfsMount>;

    fn deref(&self) -> &Arc<VfsMount> {
        &self.mnt
    }
}

impl Clone for MountRef {
    fn clone(&self) -> Self {
        MountRef::get(&self.mnt)
    }
}

impl Drop for MountRef {
    fn drop(&mut self) {
        self.mnt.add_count(-1);
    }
}

impl fmt::Debug for MountRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.mnt.fmt(f)
    }
}

/// 对应 __lookup_mnt()：不取引用
pub fn __lookup_mnt(mnt: &Arc<VfsMount>, dentry: &Arc<Dentry>) -> Option<Arc<VfsMount>> {
    MOUNT_HASHTABLE.read().get(&(mnt.id(), dentry.id())).cloned()
}

/// 对应 lookup_mnt()：返回挂在 (mnt, dentry) 上的子挂载并取引用
pub fn lookup_mnt(mnt: &Arc<VfsMount>, dentry: &Arc<Dentry>) -> Option<MountRef> {
    loop {
        let seq = MOUNT_LOCK.read_begin();
        let child = __lookup_mnt(mnt, dentry)?;
        if let Some(r) = MountRef::legitimize(&child, seq) {
            return Some(r);
        }
    }
}

/// 对应 path_is_mountpoint()
pub fn path_is_mountpoint(path: &Path) -> bool {
    path.dentry().is_mountpoint() && __lookup_mnt(path.mnt(), path.dentry()).is_some()
}

/// 对应 do_add_mount()：把 `newmnt` 嫁接到 `path`
pub fn do_add_mount(newmnt: MountRef, path: &Path) -> Result<(), Errno> {
    if path.dentry().is_symlink() {
        return Err(Errno::InvalidArgument);
    }
    if newmnt.has_parent() || newmnt.is_doomed() {
        return Err(Errno::InvalidArgument);
    }
    // 同一个文件系统不能重复挂在自己的根上
    if Arc::ptr_eq(&path.mnt().mnt_sb, &newmnt.mnt_sb) && Arc::ptr_eq(path.mnt().root(), path.dentry()) {
        return Err(Errno::DeviceOrResourceBusy);
    }

    let _w = MOUNT_LOCK.write_lock();
    let key = (path.mnt().id(), path.dentry().id());
    let mut table = MOUNT_HASHTABLE.write();
    if table.contains_key(&key) {
        return Err(Errno::DeviceOrResourceBusy);
    }
    // 子挂载持有父挂载的一个引用
    path.mnt().add_count(1);
    *newmnt.mnt_parent.write() = Some(path.mnt().clone());
    *newmnt.mnt_mountpoint.write() = Some(path.dentry.clone());
    path.dentry().set_flags(DentryFlags::MOUNTED);
    log::debug!("mount {} on {}:{}", newmnt.id(), key.0, path.dentry().name_lossy());
    table.insert(key, newmnt.into_tree());
    Ok(())
}

/// 在 mount_lock 写锁内把 `mnt` 及其子挂载从拓扑中摘除
fn umount_tree(table: &mut BTreeMap<(u64, u64), Arc<VfsMount>>, mnt: &Arc<VfsMount>, released: &mut Vec<DentryRef>) {
    let children: Vec<Arc<VfsMount>> = table
        .iter()
        .filter(|(k, _)| k.0 == mnt.id())
        .map(|(_, v)| v.clone())
        .collect();
    for child in &children {
        umount_tree(table, child, released);
    }

    mnt.set_flags(MntFlags::DOOMED);
    let parent = mnt.mnt_parent.write().take();
    let mountpoint = mnt.mnt_mountpoint.write().take();
    if let (Some(parent), Some(mp)) = (parent, mountpoint) {
        let key = (parent.id(), mp.id());
        if let Some(tree_ref) = table.remove(&key) {
            tree_ref.add_count(-1);
        }
        parent.add_count(-1);
        if !table.keys().any(|k| k.1 == mp.id()) {
            mp.clear_flags(DentryFlags::MOUNTED);
        }
        released.push(mp);
    }
}

/// 对应 do_umount()
///
/// `path` 必须是某个挂载的根。非懒卸载时，除了调用者和挂载树之外
/// 还有人持有引用则返回 EBUSY。
pub fn umount(path: &Path, flags: UmountFlags) -> Result<(), Errno> {
    let mnt = path.mnt();
    if !Arc::ptr_eq(mnt.root(), path.dentry()) || !mnt.has_parent() {
        return Err(Errno::InvalidArgument);
    }

    let mut released = Vec::new();
    {
        let _w = MOUNT_LOCK.write_lock();
        let mut table = MOUNT_HASHTABLE.write();
        if !flags.contains(UmountFlags::MNT_DETACH) && mnt.count() > 2 {
            return Err(Errno::DeviceOrResourceBusy);
        }
        umount_tree(&mut table, mnt, &mut released);
    }
    log::debug!("umount {} ({:?})", mnt.id(), flags);
    // 挂载点的 dentry 引用在锁外释放
    drop(released);
    Ok(())
}

/// 对应 detach_mounts()：挂载点被删除或作废时懒卸载其上的挂载
pub fn detach_mounts(dentry: &Arc<Dentry>) {
    if !dentry.is_mountpoint() {
        return;
    }
    let mut released = Vec::new();
    {
        let _w = MOUNT_LOCK.write_lock();
        let mut table = MOUNT_HASHTABLE.write();
        let victims: Vec<Arc<VfsMount>> = table
            .iter()
            .filter(|(k, _)| k.1 == dentry.id())
            .map(|(_, v)| v.clone())
            .collect();
        for mnt in &victims {
            umount_tree(&mut table, mnt, &mut released);
        }
    }
    drop(released);
}

/// 对应 choose_mountpoint() 的公共部分
///
/// 从挂载根向上找到第一个不是其父挂载根的挂载点；遇到 `root` 则停止。
/// 调用者负责在 mount_lock 下调用或随后检查序号。
pub(crate) fn choose_mountpoint_raw(
    m: &Arc<VfsMount>,
    root_mnt: &Arc<VfsMount>,
    root_dentry: &Arc<Dentry>,
) -> Option<(Arc<VfsMount>, Arc<Dentry>)> {
    let mut m = m.clone();
    loop {
        let parent = m.parent()?;
        let mountpoint = m.mountpoint()?;
        if Arc::ptr_eq(&parent, root_mnt) && Arc::ptr_eq(&mountpoint, root_dentry) {
            return None;
        }
        if !Arc::ptr_eq(&mountpoint, parent.root()) {
            return Some((parent, mountpoint));
        }
        m = parent;
    }
}

/// 对应 choose_mountpoint()：引用模式
pub fn choose_mountpoint(m: &Arc<VfsMount>, root: &Path) -> Option<Path> {
    choose_mountpoint_at(m, root.mnt(), root.dentry())
}

pub(crate) fn choose_mountpoint_at(
    m: &Arc<VfsMount>,
    root_mnt: &Arc<VfsMount>,
    root_dentry: &Arc<Dentry>,
) -> Option<Path> {
    let _excl = MOUNT_LOCK.lock_excl();
    let (mnt, dentry) = choose_mountpoint_raw(m, root_mnt, root_dentry)?;
    Some(Path::get(&mnt, &dentry))
}

/// 对应 is_path_reachable()
fn is_path_reachable(mnt: &Arc<VfsMount>, dentry: &Arc<Dentry>, root_mnt: &Arc<VfsMount>, root_dentry: &Arc<Dentry>) -> bool {
    let mut mnt = mnt.clone();
    let mut dentry = dentry.clone();
    while !Arc::ptr_eq(&mnt, root_mnt) {
        let (Some(parent), Some(mp)) = (mnt.parent(), mnt.mountpoint()) else {
            break;
        };
        dentry = mp;
        mnt = parent;
    }
    Arc::ptr_eq(&mnt, root_mnt) && is_subdir(&dentry, root_dentry)
}

/// (mnt, dentry) 是否位于 (root_mnt, root_dentry) 之下（包括相等）
pub(crate) fn is_path_beneath(
    mnt: &Arc<VfsMount>,
    dentry: &Arc<Dentry>,
    root_mnt: &Arc<VfsMount>,
    root_dentry: &Arc<Dentry>,
) -> bool {
    let _excl = MOUNT_LOCK.lock_excl();
    is_path_reachable(mnt, dentry, root_mnt, root_dentry)
}

/// 对应 path_is_under()：`path1` 是否位于 `path2` 之下
pub fn path_is_under(path1: &Path, path2: &Path) -> bool {
    is_path_beneath(path1.mnt(), path1.dentry(), path2.mnt(), path2.dentry())
}

/// mnt_want_write() 的守卫，析构时 mnt_drop_write()
pub struct MntWriteGuard {
    mnt: Arc<VfsMount>,
}

impl Drop for MntWriteGuard {
    fn drop(&mut self) {
        self.mnt.mnt_writers.fetch_sub(1, Ordering::AcqRel);
    }
}

/// 对应 mnt_want_write()
pub fn mnt_want_write(mnt: &Arc<VfsMount>) -> Result<MntWriteGuard, Errno> {
    if mnt.is_readonly() {
        return Err(Errno::ReadOnlyFileSystem);
    }
    mnt.mnt_writers.fetch_add(1, Ordering::AcqRel);
    Ok(MntWriteGuard { mnt: mnt.clone() })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs::rootfs::RootFs;

    #[test]
    fn test_mount_and_umount() {
        let _mounts = crate::tests::lock_mount_table();
        let host = RootFs::new();
        let root_mnt = VfsMount::new(host.root_ref(), MntFlags::empty());
        let dir = host.mkdir_raw(&host.root_dentry(), b"mnt", 0o755);
        let mp = Path::get(&root_mnt, &dir);

        let guest = RootFs::new();
        let guest_mnt = VfsMount::new(guest.root_ref(), MntFlags::empty());
        let guest_arc = guest_mnt.as_arc().clone();
        do_add_mount(guest_mnt, &mp).unwrap();

        assert!(dir.is_mountpoint());
        assert!(path_is_mountpoint(&mp));
        let found = lookup_mnt(&root_mnt, &dir).expect("mounted");
        assert!(found.ptr_eq(&guest_arc));

        let target = Path::get(&guest_arc, guest_arc.root());
        // found + target 各持有一个引用
        assert_eq!(umount(&target, UmountFlags::empty()), Err(Errno::DeviceOrResourceBusy));
        drop(found);
        umount(&target, UmountFlags::empty()).unwrap();
        assert!(!dir.is_mountpoint());
        assert!(guest_arc.is_doomed());
        assert!(lookup_mnt(&root_mnt, &dir).is_none());
    }

    #[test]
    fn test_legitimize_fails_after_topology_change() {
        let _mounts = crate::tests::lock_mount_table();
        let fs = RootFs::new();
        let mnt = VfsMount::new(fs.root_ref(), MntFlags::empty());
        let seq = MOUNT_LOCK.read_begin();
        drop(MOUNT_LOCK.write_lock());
        let before = mnt.count();
        assert!(MountRef::legitimize(&mnt, seq).is_none());
        assert_eq!(mnt.count(), before);
    }

    #[test]
    fn test_detach_mounts_leaves_mount_lock_alone() {
        let _mounts = crate::tests::lock_mount_table();
        let fs = RootFs::new();
        let dir = fs.mkdir_raw(&fs.root_dentry(), b"d", 0o755);
        // 不是挂载点的 dentry 不进入 mount_lock 写区
        let seq = MOUNT_LOCK.read_begin();
        detach_mounts(&dir);
        assert!(!MOUNT_LOCK.read_retry(seq));
    }

    #[test]
    fn test_readonly_mount_refuses_write() {
        let fs = RootFs::new();
        let mnt = VfsMount::new(fs.root_ref(), MntFlags::READONLY);
        assert_eq!(mnt_want_write(&mnt).err(), Some(Errno::ReadOnlyFileSystem));
        mnt.clear_flags(MntFlags::READONLY);
        assert!(mnt_want_write(&mnt).is_ok());
    }
}
