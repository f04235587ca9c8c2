//! MIT License
//!
//! Copyright (c) 2026 Fei Wang
//!
//! 目录项 (Dentry) 与目录项缓存
//!
//! 遵循 Linux 内核的 dentry 设计 (fs/dcache.c, include/linux/dcache.h)
//!
//! 核心概念：
//! - `struct dentry`: 目录中的一个名字，关联 inode（正 dentry）或确认不存在（负 dentry）
//! - `d_seq`: 每个 dentry 的顺序计数器，名字 / 父目录 / inode 变化时递增
//! - `d_lockref`: 逻辑引用计数，死亡后标记为负值，`lockref_get_not_dead` 失败
//! - in-lookup 表：同一名字的并发慢速查找合并为一次驱动调用
//!
//! 内存由 `Arc` 管理（相当于 RCU 宽限期），逻辑引用由 `DentryRef` 持有。
//! 子 dentry 持有父 dentry 的一个逻辑引用。

use alloc::string::String;
use alloc::sync::Arc;
use alloc::vec::Vec;
use bitflags::bitflags;
use core::fmt;
use core::hint::spin_loop;
use core::mem;
use core::ops::Deref;
use core::sync::atomic::{AtomicI64, AtomicU32, AtomicU64, Ordering};

use crate::config::DCACHE_HASH_BUCKETS;
use crate::errno::Errno;
use crate::fs::hash::full_name_hash;
use crate::fs::inode::Inode;
use crate::fs::mount::{MountRef, VfsMount};
use crate::fs::path::LookupFlags;
use crate::fs::superblock::SuperBlock;
use crate::sync::{SeqCount, SeqLock};

/// 全局 rename 顺序锁
///
/// `d_move()` / `d_exchange()` 持有写锁；`..` 遍历和 `is_subdir()` 用它检测并发 rename。
pub static RENAME_LOCK: SeqLock = SeqLock::new();

bitflags! {
    /// d_flags (include/linux/dcache.h)
    #[derive(Debug, Copy, Clone, PartialEq, Eq)]
    pub struct DentryFlags: u32 {
        const OP_HASH           = 0x0000_0001;
        const OP_COMPARE        = 0x0000_0002;
        const OP_REVALIDATE     = 0x0000_0004;
        /// 断开连接的 dentry（没有可信的父目录链）
        const DISCONNECTED      = 0x0000_0020;
        const OP_WEAK_REVALIDATE = 0x0000_0800;
        /// NFS 风格的“傻瓜式重命名”占位，不能删除
        const NFSFS_RENAMED     = 0x0000_1000;
        /// 有文件系统挂载在这里
        const MOUNTED           = 0x0001_0000;
        /// 需要自动挂载
        const NEED_AUTOMOUNT    = 0x0002_0000;
        /// 穿越前需要询问 d_manage()
        const MANAGE_TRANSIT    = 0x0004_0000;
        /// 正在进行慢速查找的占位 dentry
        const PAR_LOOKUP        = 0x1000_0000;
        /// 已加入哈希表
        const HASHED            = 0x2000_0000;

        const OP_FLAGS = Self::OP_HASH.bits()
            | Self::OP_COMPARE.bits()
            | Self::OP_REVALIDATE.bits()
            | Self::OP_WEAK_REVALIDATE.bits();
        const MANAGED = Self::MOUNTED.bits()
            | Self::NEED_AUTOMOUNT.bits()
            | Self::MANAGE_TRANSIT.bits();
    }
}

/// 路径分量（名字 + 哈希）
///
/// 对应 Linux 的 struct qstr。`buf` 与路径名共享，分量只是其中一段。
#[derive(Clone)]
pub struct QStr {
    buf: Arc<[u8]>,
    start: usize,
    len: usize,
    /// 分量哈希（以父目录为盐）
    pub hash: u32,
}

impl QStr {
    /// `buf[start..start + len]`，由调用者保证范围有效
    pub fn new(buf: Arc<[u8]>, start: usize, len: usize, hash: u32) -> Self {
        debug_assert!(start + len <= buf.len());
        Self { buf, start, len, hash }
    }

    /// 用默认哈希为 `parent` 下的名字构造分量
    pub fn for_parent(parent: &Dentry, name: &[u8]) -> Self {
        let buf: Arc<[u8]> = Arc::from(name);
        let len = buf.len();
        Self {
            hash: full_name_hash(parent.salt(), name),
            buf,
            start: 0,
            len,
        }
    }

    pub fn name(&self) -> &[u8] {
        &self.buf[self.start..self.start + self.len]
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn is_dot(&self) -> bool {
        self.name() == b"."
    }

    pub fn is_dotdot(&self) -> bool {
        self.name() == b".."
    }

    /// 分量之后是否还有文本（路径以 `/` 结尾）
    pub fn has_trailing(&self) -> bool {
        matches!(self.buf.get(self.start + self.len), Some(&c) if c != 0)
    }
}

impl fmt::Debug for QStr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}#{:08x}", String::from_utf8_lossy(self.name()), self.hash)
    }
}

impl PartialEq for QStr {
    fn eq(&self, other: &Self) -> bool {
        self.hash == other.hash && self.name() == other.name()
    }
}

/// Dentry 操作接口
///
/// 对应 Linux 的 struct dentry_operations。需要在 d_flags 上打开的能力位
/// 通过 `flags()` 声明。
#[allow(unused_variables)]
pub trait DentryOperations: Send + Sync {
    /// 创建 dentry 时要设置的标志（OP_* / MANAGE_TRANSIT / NEED_AUTOMOUNT）
    fn flags(&self) -> DentryFlags {
        DentryFlags::empty()
    }

    /// 自定义分量哈希，返回新的哈希值
    fn d_hash(&self, parent: &Dentry, name: &QStr) -> Result<u32, Errno> {
        Ok(name.hash)
    }

    /// 自定义名字比较，`name` 是 `dentry` 当前的名字
    fn d_compare(&self, dentry: &Dentry, name: &[u8], target: &QStr) -> bool {
        name == target.name()
    }

    /// 缓存命中后检查是否仍然有效
    ///
    /// `Ok(true)` 有效，`Ok(false)` 需要作废后重新查找。
    /// `flags` 含 `RCU` 时不能阻塞，需要阻塞则返回 `Err(Errno::NoChild)`。
    fn d_revalidate(&self, dir: &Arc<Inode>, name: &QStr, dentry: &Arc<Dentry>, flags: LookupFlags) -> Result<bool, Errno> {
        Ok(true)
    }

    /// 遍历结束时的最终检查，只在发生过跳转时调用
    fn d_weak_revalidate(&self, dentry: &Arc<Dentry>, flags: LookupFlags) -> Result<bool, Errno> {
        Ok(true)
    }

    /// 穿越守卫
    ///
    /// `Err(Errno::IsADirectory)` 表示当作普通目录处理，不再穿越。
    fn d_manage(&self, mnt: &Arc<VfsMount>, dentry: &Arc<Dentry>, rcu: bool) -> Result<(), Errno> {
        Ok(())
    }

    /// 按需挂载，返回待嫁接的新挂载；`None` 表示别人已经挂好
    fn d_automount(&self, mnt: &Arc<VfsMount>, dentry: &Arc<Dentry>) -> Result<Option<MountRef>, Errno> {
        Err(Errno::RemoteObject)
    }
}

const LOCKREF_DEAD: i64 = -128;

/// 逻辑引用计数
struct LockRef {
    count: AtomicI64,
}

impl LockRef {
    const fn new(count: i64) -> Self {
        Self {
            count: AtomicI64::new(count),
        }
    }

    fn get(&self) {
        self.count.fetch_add(1, Ordering::AcqRel);
    }

    /// 对应 lockref_get_not_dead()
    fn get_not_dead(&self) -> bool {
        self.count
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |c| {
                if c < 0 {
                    None
                } else {
                    Some(c + 1)
                }
            })
            .is_ok()
    }

    fn put_return(&self) -> i64 {
        self.count.fetch_sub(1, Ordering::AcqRel) - 1
    }

    /// 只有计数为 0 时才能标记死亡
    fn mark_dead(&self) -> bool {
        self.count
            .compare_exchange(0, LOCKREF_DEAD, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    fn count(&self) -> i64 {
        self.count.load(Ordering::Acquire)
    }
}

static NEXT_DENTRY_ID: AtomicU64 = AtomicU64::new(1);

/// 目录项
///
/// 对应 Linux 的 struct dentry (include/linux/dcache.h)
pub struct Dentry {
    d_id: u64,
    /// 顺序计数器
    pub d_seq: SeqCount,
    d_flags: AtomicU32,
    d_lockref: LockRef,
    d_name: spin::RwLock<QStr>,
    /// 父目录，`None` 表示 IS_ROOT
    d_parent: spin::RwLock<Option<Arc<Dentry>>>,
    d_inode: spin::RwLock<Option<Arc<Inode>>>,
    /// 所属超级块
    pub d_sb: Arc<SuperBlock>,
    d_op: spin::RwLock<Option<Arc<dyn DentryOperations>>>,
}

impl Dentry {
    fn alloc(sb: &Arc<SuperBlock>, name: QStr, parent: Option<Arc<Dentry>>) -> Arc<Self> {
        let dentry = Arc::new(Self {
            d_id: NEXT_DENTRY_ID.fetch_add(1, Ordering::Relaxed),
            d_seq: SeqCount::new(),
            d_flags: AtomicU32::new(0),
            d_lockref: LockRef::new(1),
            d_name: spin::RwLock::new(name),
            d_parent: spin::RwLock::new(parent),
            d_inode: spin::RwLock::new(None),
            d_sb: sb.clone(),
            d_op: spin::RwLock::new(None),
        });
        if let Some(ops) = sb.d_op() {
            dentry.set_d_op(ops);
        }
        dentry
    }

    pub fn id(&self) -> u64 {
        self.d_id
    }

    /// 子分量哈希的盐
    pub fn salt(&self) -> u64 {
        self.d_id
    }

    pub fn name(&self) -> QStr {
        self.d_name.read().clone()
    }

    /// 名字的可读形式（日志用）
    pub fn name_lossy(&self) -> String {
        String::from_utf8_lossy(self.d_name.read().name()).into_owned()
    }

    /// 父目录（不取引用）；根返回 `None`
    pub fn parent(&self) -> Option<Arc<Dentry>> {
        self.d_parent.read().clone()
    }

    /// 对应 IS_ROOT()
    pub fn is_root(&self) -> bool {
        self.d_parent.read().is_none()
    }

    pub fn inode(&self) -> Option<Arc<Inode>> {
        self.d_inode.read().clone()
    }

    pub fn is_negative(&self) -> bool {
        self.d_inode.read().is_none()
    }

    pub fn is_positive(&self) -> bool {
        !self.is_negative()
    }

    fn mode_matches(&self, f: impl FnOnce(&Inode) -> bool) -> bool {
        self.d_inode.read().as_deref().is_some_and(f)
    }

    /// 对应 d_is_dir() / d_can_lookup()
    pub fn is_dir(&self) -> bool {
        self.mode_matches(|i| i.mode().is_directory())
    }

    pub fn is_symlink(&self) -> bool {
        self.mode_matches(|i| i.mode().is_symlink())
    }

    pub fn is_reg(&self) -> bool {
        self.mode_matches(|i| i.mode().is_regular_file())
    }

    pub fn flags(&self) -> DentryFlags {
        DentryFlags::from_bits_truncate(self.d_flags.load(Ordering::Acquire))
    }

    pub fn set_flags(&self, flags: DentryFlags) {
        self.d_flags.fetch_or(flags.bits(), Ordering::AcqRel);
    }

    pub fn clear_flags(&self, flags: DentryFlags) {
        self.d_flags.fetch_and(!flags.bits(), Ordering::AcqRel);
    }

    /// 对应 d_mountpoint()
    pub fn is_mountpoint(&self) -> bool {
        self.flags().contains(DentryFlags::MOUNTED)
    }

    pub fn is_managed(&self) -> bool {
        self.flags().intersects(DentryFlags::MANAGED)
    }

    /// 对应 d_in_lookup()
    pub fn in_lookup(&self) -> bool {
        self.flags().contains(DentryFlags::PAR_LOOKUP)
    }

    pub fn is_hashed(&self) -> bool {
        self.flags().contains(DentryFlags::HASHED)
    }

    pub fn is_dead(&self) -> bool {
        self.d_lockref.count() < 0
    }

    /// 当前逻辑引用数
    pub fn count(&self) -> i64 {
        self.d_lockref.count()
    }

    pub fn d_op(&self) -> Option<Arc<dyn DentryOperations>> {
        self.d_op.read().clone()
    }

    /// 对应 d_set_d_op()
    pub fn set_d_op(&self, ops: Arc<dyn DentryOperations>) {
        self.clear_flags(DentryFlags::OP_FLAGS);
        self.set_flags(ops.flags());
        *self.d_op.write() = Some(ops);
    }

    fn set_inode(&self, inode: Option<Arc<Inode>>) {
        let _w = self.d_seq.write();
        *self.d_inode.write() = inode;
    }
}

impl fmt::Debug for Dentry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Dentry")
            .field("id", &self.d_id)
            .field("name", &self.name())
            .field("count", &self.count())
            .field("negative", &self.is_negative())
            .finish()
    }
}

/// 持有一个逻辑引用的 dentry
///
/// 构造即 dget()，析构即 dput()。
pub struct DentryRef {
    dentry: Arc<Dentry>,
}

impl DentryRef {
    /// 对应 dget()：调用者必须已经持有一个引用
    pub fn get(dentry: &Arc<Dentry>) -> Self {
        dentry.d_lockref.get();
        Self {
            dentry: dentry.clone(),
        }
    }

    /// 对应 lockref_get_not_dead()
    pub fn try_get(dentry: &Arc<Dentry>) -> Option<Self> {
        if dentry.d_lockref.get_not_dead() {
            Some(Self {
                dentry: dentry.clone(),
            })
        } else {
            None
        }
    }

    /// 接管一个已经计入的引用
    fn from_counted(dentry: Arc<Dentry>) -> Self {
        Self { dentry }
    }

    pub fn as_arc(&self) -> &Arc<Dentry> {
        &self.dentry
    }

    pub fn ptr_eq(&self, other: &Arc<Dentry>) -> bool {
        Arc::ptr_eq(&self.dentry, other)
    }
}

impl Deref for DentryRef {
    type Target = Arc<Dentry>;

    fn deref(&self) -> &Arc<Dentry> {
        &self.dentry
    }
}

impl Clone for DentryRef {
    fn clone(&self) -> Self {
        DentryRef::get(&self.dentry)
    }
}

impl Drop for DentryRef {
    fn drop(&mut self) {
        dput(&self.dentry);
    }
}

impl fmt::Debug for DentryRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.dentry.fmt(f)
    }
}

/// 释放一个逻辑引用；不在哈希表中的 dentry 计数归零时被杀死
fn dput(dentry: &Arc<Dentry>) {
    if dentry.d_lockref.put_return() == 0 && !dentry.is_hashed() && !dentry.in_lookup() {
        dentry_kill(dentry);
    }
}

/// 对应 __dentry_kill()
fn dentry_kill(dentry: &Arc<Dentry>) {
    if !dentry.d_lockref.mark_dead() {
        return;
    }
    dentry.set_inode(None);
    if let Some(parent) = dentry.parent() {
        dput(&parent);
    }
}

/// 每个超级块的 dentry 哈希表
pub(crate) struct DentryHashTable {
    buckets: Vec<spin::RwLock<Vec<Arc<Dentry>>>>,
    in_lookup: spin::Mutex<Vec<Arc<Dentry>>>,
}

impl DentryHashTable {
    pub(crate) fn new() -> Self {
        Self {
            buckets: (0..DCACHE_HASH_BUCKETS.max(1))
                .map(|_| spin::RwLock::new(Vec::new()))
                .collect(),
            in_lookup: spin::Mutex::new(Vec::new()),
        }
    }

    fn bucket(&self, hash: u32) -> &spin::RwLock<Vec<Arc<Dentry>>> {
        &self.buckets[hash as usize % self.buckets.len()]
    }

    /// 对应 __d_rehash()
    fn insert(&self, dentry: &Arc<Dentry>) {
        let hash = dentry.d_name.read().hash;
        self.bucket(hash).write().push(dentry.clone());
        dentry.set_flags(DentryFlags::HASHED);
    }

    fn remove(&self, dentry: &Arc<Dentry>) -> bool {
        let hash = dentry.d_name.read().hash;
        let mut bucket = self.bucket(hash).write();
        let before = bucket.len();
        bucket.retain(|d| !Arc::ptr_eq(d, dentry));
        dentry.clear_flags(DentryFlags::HASHED);
        bucket.len() != before
    }

    /// 全部已哈希的子项
    fn children_of(&self, parent: &Arc<Dentry>) -> Vec<Arc<Dentry>> {
        let mut out = Vec::new();
        for bucket in &self.buckets {
            for d in bucket.read().iter() {
                if d.parent().is_some_and(|p| Arc::ptr_eq(&p, parent)) {
                    out.push(d.clone());
                }
            }
        }
        out
    }

    pub(crate) fn len(&self) -> usize {
        self.buckets.iter().map(|b| b.read().len()).sum()
    }

    pub(crate) fn clear(&self) {
        for bucket in &self.buckets {
            let drained: Vec<Arc<Dentry>> = mem::take(&mut *bucket.write());
            for d in &drained {
                d.clear_flags(DentryFlags::HASHED);
            }
        }
        self.in_lookup.lock().clear();
    }
}

fn name_matches(parent: &Arc<Dentry>, dentry: &Dentry, name: &QStr) -> bool {
    let dname = dentry.d_name.read();
    if dname.hash != name.hash {
        return false;
    }
    if parent.flags().contains(DentryFlags::OP_COMPARE) {
        if let Some(ops) = parent.d_op() {
            return ops.d_compare(dentry, dname.name(), name);
        }
    }
    dname.name() == name.name()
}

fn is_child_of(dentry: &Dentry, parent: &Arc<Dentry>) -> bool {
    dentry
        .d_parent
        .read()
        .as_ref()
        .is_some_and(|p| Arc::ptr_eq(p, parent))
}

/// 对应 __d_lookup_rcu()
///
/// 不取引用，返回 dentry 以及读取时的 d_seq。调用者之后必须用
/// `d_seq.read_retry(seq)` 验证它读到的一切。
pub fn d_lookup_rcu(parent: &Arc<Dentry>, name: &QStr) -> Option<(Arc<Dentry>, u32)> {
    let bucket = parent.d_sb.s_dcache.bucket(name.hash).read();
    for dentry in bucket.iter() {
        // 写者可能正在进行，奇数代号会让随后的检查失败
        let seq = dentry.d_seq.raw_read() & !1;
        if !is_child_of(dentry, parent) {
            continue;
        }
        if !dentry.is_hashed() {
            continue;
        }
        if !name_matches(parent, dentry, name) {
            continue;
        }
        if dentry.d_seq.read_retry(seq) {
            continue;
        }
        return Some((dentry.clone(), seq));
    }
    None
}

fn __d_lookup(parent: &Arc<Dentry>, name: &QStr) -> Option<DentryRef> {
    let bucket = parent.d_sb.s_dcache.bucket(name.hash).read();
    for dentry in bucket.iter() {
        if !is_child_of(dentry, parent) || !dentry.is_hashed() {
            continue;
        }
        if !name_matches(parent, dentry, name) {
            continue;
        }
        return DentryRef::try_get(dentry);
    }
    None
}

/// 对应 d_lookup()：在 rename_lock 保护下查找并取得引用
pub fn d_lookup(parent: &Arc<Dentry>, name: &QStr) -> Option<DentryRef> {
    loop {
        let seq = RENAME_LOCK.read_begin();
        let found = __d_lookup(parent, name);
        if found.is_some() || !RENAME_LOCK.read_retry(seq) {
            return found;
        }
    }
}

/// 对应 d_alloc()：分配一个未哈希的负 dentry
pub fn d_alloc(parent: &Arc<Dentry>, name: &QStr) -> DentryRef {
    // 子 dentry 持有父目录的引用，在 dentry_kill() 中释放
    parent.d_lockref.get();
    DentryRef::from_counted(Dentry::alloc(&parent.d_sb, name.clone(), Some(parent.clone())))
}

/// 便捷函数：用默认哈希分配 `parent/name`
pub fn d_alloc_name(parent: &Arc<Dentry>, name: &[u8]) -> DentryRef {
    d_alloc(parent, &QStr::for_parent(parent, name))
}

/// 对应 d_make_root()：文件系统根 dentry
pub fn d_make_root(sb: &Arc<SuperBlock>, inode: Arc<Inode>) -> DentryRef {
    let buf: Arc<[u8]> = Arc::from(&b"/"[..]);
    let root = Dentry::alloc(sb, QStr::new(buf, 0, 1, 0), None);
    root.set_inode(Some(inode));
    sb.set_root(&root);
    DentryRef::from_counted(root)
}

/// 对应 d_alloc_parallel()
///
/// 返回已缓存的 dentry，或者一个 in-lookup 占位（`in_lookup()` 为真），
/// 拿到占位的调用者负责调用驱动的 lookup 并最终 `d_lookup_done()`。
/// 同名的并发调用者等待占位完成，而不是重复调用驱动。
pub fn d_alloc_parallel(parent: &Arc<Dentry>, name: &QStr) -> Result<DentryRef, Errno> {
    let new = d_alloc(parent, name);
    let table = &parent.d_sb.s_dcache;
    loop {
        if let Some(found) = d_lookup(parent, name) {
            return Ok(found);
        }

        let mut in_lookup = table.in_lookup.lock();
        // 占位完成时先加入主哈希表再离开 in-lookup 表，这里在锁内重新检查
        if let Some(found) = __d_lookup(parent, name) {
            return Ok(found);
        }
        let pending = in_lookup
            .iter()
            .find(|d| is_child_of(d, parent) && name_matches(parent, d, name))
            .cloned();

        let Some(pending) = pending else {
            new.set_flags(DentryFlags::PAR_LOOKUP);
            in_lookup.push(new.as_arc().clone());
            return Ok(new);
        };
        drop(in_lookup);

        let Some(pending) = DentryRef::try_get(&pending) else {
            continue;
        };
        d_wait_lookup(&pending);
        if !pending.is_hashed() || !is_child_of(&pending, parent) || !name_matches(parent, &pending, name) {
            continue;
        }
        return Ok(pending);
    }
}

fn d_wait_lookup(dentry: &Dentry) {
    while dentry.in_lookup() {
        spin_loop();
    }
}

/// 对应 __d_lookup_unhash_wake()：占位结束
pub fn d_lookup_done(dentry: &Arc<Dentry>) {
    if !dentry.in_lookup() {
        return;
    }
    let mut in_lookup = dentry.d_sb.s_dcache.in_lookup.lock();
    in_lookup.retain(|d| !Arc::ptr_eq(d, dentry));
    dentry.clear_flags(DentryFlags::PAR_LOOKUP);
}

/// 对应 d_add()：关联 inode（可能为 None 即负 dentry）并加入哈希表
pub fn d_add(dentry: &Arc<Dentry>, inode: Option<Arc<Inode>>) {
    if inode.is_some() {
        dentry.set_inode(inode);
    }
    let table = &dentry.d_sb.s_dcache;
    if dentry.in_lookup() {
        let mut in_lookup = table.in_lookup.lock();
        if !dentry.is_hashed() {
            table.insert(dentry);
        }
        in_lookup.retain(|d| !Arc::ptr_eq(d, dentry));
        dentry.clear_flags(DentryFlags::PAR_LOOKUP);
    } else if !dentry.is_hashed() {
        table.insert(dentry);
    }
}

/// 对应 d_splice_alias()
///
/// 目录 inode 不维护别名列表，结果总是直接关联到 `dentry`。
pub fn d_splice_alias(inode: Option<Arc<Inode>>, dentry: &Arc<Dentry>) -> Result<Option<DentryRef>, Errno> {
    d_add(dentry, inode);
    Ok(None)
}

/// 对应 d_instantiate()：创建成功后填入 inode
pub fn d_instantiate(dentry: &Arc<Dentry>, inode: Arc<Inode>) {
    dentry.set_inode(Some(inode));
}

/// 对应 d_drop()：从哈希表摘除，进行中的 RCU 读者会检测到
pub fn d_drop(dentry: &Arc<Dentry>) {
    if dentry.is_hashed() {
        dentry.d_sb.s_dcache.remove(dentry);
        dentry.d_seq.invalidate();
    }
}

/// 对应 d_delete()：唯一的使用者时变为负 dentry，否则摘除
pub fn d_delete(dentry: &Arc<Dentry>) {
    if dentry.count() == 1 {
        dentry.set_inode(None);
    } else {
        d_drop(dentry);
    }
}

/// 对应 shrink_dcache_parent()：回收没有使用者的子孙
pub fn shrink_dcache_parent(parent: &Arc<Dentry>) {
    for child in parent.d_sb.s_dcache.children_of(parent) {
        if child.is_mountpoint() {
            continue;
        }
        shrink_dcache_parent(&child);
        if child.count() == 0 {
            d_drop(&child);
            dentry_kill(&child);
        }
    }
}

/// 对应 d_invalidate()：revalidate 失败后作废
pub fn d_invalidate(dentry: &Arc<Dentry>) {
    d_drop(dentry);
    shrink_dcache_parent(dentry);
    if dentry.is_mountpoint() {
        crate::fs::mount::detach_mounts(dentry);
    }
}

fn __d_move(dentry: &Arc<Dentry>, target: &Arc<Dentry>, exchange: bool) {
    let old_parent;
    {
        let _rename = RENAME_LOCK.write_lock();
        let _s1 = dentry.d_seq.write();
        let _s2 = target.d_seq.write();
        let table = &dentry.d_sb.s_dcache;

        if dentry.is_hashed() {
            table.remove(dentry);
        }
        if target.is_hashed() {
            table.remove(target);
        }

        let new_parent = target.parent();
        old_parent = mem::replace(&mut *dentry.d_parent.write(), new_parent.clone());
        if exchange {
            *target.d_parent.write() = old_parent.clone();
            let mut dn = dentry.d_name.write();
            let mut tn = target.d_name.write();
            mem::swap(&mut *dn, &mut *tn);
        } else {
            let name = target.d_name.read().clone();
            *dentry.d_name.write() = name;
            if let Some(p) = &new_parent {
                p.d_lockref.get();
            }
        }

        table.insert(dentry);
        if exchange {
            table.insert(target);
        }
    }
    if !exchange {
        if let Some(p) = old_parent {
            dput(&p);
        }
    }
}

/// 对应 d_move()：`dentry` 取代 `target` 的名字和位置，`target` 被摘除
pub fn d_move(dentry: &Arc<Dentry>, target: &Arc<Dentry>) {
    __d_move(dentry, target, false);
}

/// 对应 d_exchange()：交换两个 dentry 的名字和位置
pub fn d_exchange(dentry1: &Arc<Dentry>, dentry2: &Arc<Dentry>) {
    __d_move(dentry1, dentry2, true);
}

/// 对应 dget_parent()
pub fn dget_parent(dentry: &Arc<Dentry>) -> DentryRef {
    loop {
        let parent = dentry.parent().unwrap_or_else(|| dentry.clone());
        if let Some(r) = DentryRef::try_get(&parent) {
            if Arc::ptr_eq(&dentry.parent().unwrap_or_else(|| dentry.clone()), &parent) {
                return r;
            }
        }
        spin_loop();
    }
}

/// 对应 is_subdir()：`new_dentry` 是否在 `old_dentry` 之下（包括相等）
pub fn is_subdir(new_dentry: &Arc<Dentry>, old_dentry: &Arc<Dentry>) -> bool {
    if Arc::ptr_eq(new_dentry, old_dentry) {
        return true;
    }
    RENAME_LOCK.read(|| {
        let mut d = new_dentry.clone();
        while let Some(p) = d.parent() {
            if Arc::ptr_eq(&p, old_dentry) {
                return true;
            }
            d = p;
        }
        false
    })
}

/// 对应 d_ancestor()
///
/// 如果 `p1` 是 `p2` 的祖先，返回 `p2` 祖先链上 `p1` 的那个子项。
pub fn d_ancestor(p1: &Arc<Dentry>, p2: &Arc<Dentry>) -> Option<Arc<Dentry>> {
    let mut p = p2.clone();
    while let Some(parent) = p.parent() {
        if Arc::ptr_eq(&parent, p1) {
            return Some(p);
        }
        p = parent;
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs::rootfs;

    #[test]
    fn test_d_add_then_lookup() {
        let fs = rootfs::RootFs::new();
        let root = fs.root_dentry();
        let child = d_alloc_name(&root, b"x");
        d_add(&child, None);
        let name = QStr::for_parent(&root, b"x");
        let found = d_lookup(&root, &name).expect("hashed");
        assert!(found.ptr_eq(&child));
        assert!(found.is_negative());
        assert!(d_lookup_rcu(&root, &name).is_some());
    }

    #[test]
    fn test_unhashed_dentry_dies_on_last_put() {
        let fs = rootfs::RootFs::new();
        let root = fs.root_dentry();
        let before = root.count();
        let child = d_alloc_name(&root, b"tmp");
        assert_eq!(root.count(), before + 1);
        let raw = child.as_arc().clone();
        drop(child);
        assert!(raw.is_dead());
        assert!(DentryRef::try_get(&raw).is_none());
        assert_eq!(root.count(), before);
    }

    #[test]
    fn test_d_drop_invalidates_seq() {
        let fs = rootfs::RootFs::new();
        let root = fs.root_dentry();
        let child = d_alloc_name(&root, b"gone");
        d_add(&child, None);
        let seq = child.d_seq.read_begin();
        d_drop(&child);
        assert!(child.d_seq.read_retry(seq));
        assert!(d_lookup(&root, &QStr::for_parent(&root, b"gone")).is_none());
    }

    #[test]
    fn test_d_move_renames() {
        let fs = rootfs::RootFs::new();
        let root = fs.root_dentry();
        let a = d_alloc_name(&root, b"a");
        d_add(&a, None);
        let b = d_alloc_name(&root, b"b");
        d_add(&b, None);
        let rseq = RENAME_LOCK.read_begin();
        d_move(&a, &b);
        assert!(RENAME_LOCK.read_retry(rseq));
        assert_eq!(a.name().name(), b"b");
        assert!(!b.is_hashed());
        let found = d_lookup(&root, &QStr::for_parent(&root, b"b")).expect("moved");
        assert!(found.ptr_eq(&a));
    }

    #[test]
    fn test_ancestry() {
        let fs = rootfs::RootFs::new();
        let root = fs.root_dentry();
        let a = d_alloc_name(&root, b"a");
        let b = d_alloc_name(&a, b"b");
        assert!(is_subdir(&b, &root));
        assert!(!is_subdir(&a, &b));
        let anc = d_ancestor(&root, &b).expect("ancestor");
        assert!(Arc::ptr_eq(&anc, &a));
        assert!(d_ancestor(&b, &a).is_none());
    }
}
