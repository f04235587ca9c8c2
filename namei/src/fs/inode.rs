//! MIT License
//!
//! Copyright (c) 2026 Fei Wang
//!
//! 索引节点 (Inode)
//!
//! 遵循 Linux 内核的 inode 设计 (fs/inode.c, include/linux/fs.h)
//!
//! 核心概念：
//! - `struct inode`: 索引节点，表示文件系统中的一个对象
//! - `struct inode_operations`: 文件系统驱动提供的能力接口，这里是 `InodeOperations` trait
//! - `i_rwsem`: 目录修改需要独占持有，慢速查找时共享持有

use alloc::boxed::Box;
use alloc::sync::Arc;
use bitflags::bitflags;
use core::fmt;
use core::sync::atomic::{AtomicU32, AtomicU64, Ordering};

use crate::errno::Errno;
use crate::fs::dentry::{Dentry, DentryRef};
use crate::fs::link::{LinkBody, LinkContext};
use crate::fs::open::{AtomicOpenOutcome, OpenFlags};
use crate::fs::path::LookupFlags;
use crate::fs::perm::{generic_permission, MayFlags};
use crate::fs::posix_acl::{CachedAcl, PosixAcl};
use crate::fs::rename::RenameFlags;
use crate::fs::superblock::SuperBlock;
use crate::process::{Cred, INVALID_GID, INVALID_UID};
use crate::sync::RwSemaphore;

/// Inode 编号类型
pub type Ino = u64;

/// Inode 模式 (文件类型和权限)
///
/// 对应 Linux 的 i_mode 字段 (include/linux/fs.h)
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct InodeMode(u32);

impl InodeMode {
    /// 文件类型掩码
    pub const S_IFMT: u32 = 0o0170000;

    /// 常规文件
    pub const S_IFREG: u32 = 0o0100000;
    /// 目录
    pub const S_IFDIR: u32 = 0o0040000;
    /// 字符设备
    pub const S_IFCHR: u32 = 0o0020000;
    /// 块设备
    pub const S_IFBLK: u32 = 0o0060000;
    /// FIFO (命名管道)
    pub const S_IFIFO: u32 = 0o0010000;
    /// 符号链接
    pub const S_IFLNK: u32 = 0o0120000;
    /// Socket
    pub const S_IFSOCK: u32 = 0o0140000;

    pub const S_ISUID: u32 = 0o4000;
    pub const S_ISGID: u32 = 0o2000;
    /// 粘滞位
    pub const S_ISVTX: u32 = 0o1000;

    /// 权限位
    pub const S_IRWXU: u32 = 0o0700;  // 用户权限
    pub const S_IRUSR: u32 = 0o0400;  // 用户读
    pub const S_IWUSR: u32 = 0o0200;  // 用户写
    pub const S_IXUSR: u32 = 0o0100;  // 用户执行
    pub const S_IRWXG: u32 = 0o0070;  // 组权限
    pub const S_IRGRP: u32 = 0o0040;  // 组读
    pub const S_IWGRP: u32 = 0o0020;  // 组写
    pub const S_IXGRP: u32 = 0o0010;  // 组执行
    pub const S_IRWXO: u32 = 0o0007;  // 其他权限
    pub const S_IROTH: u32 = 0o0004;  // 其他读
    pub const S_IWOTH: u32 = 0o0002;  // 其他写
    pub const S_IXOTH: u32 = 0o0001;  // 其他执行

    pub const S_IXUGO: u32 = 0o0111;
    pub const S_IALLUGO: u32 = 0o7777;

    pub const fn new(mode: u32) -> Self {
        Self(mode)
    }

    pub const fn file_type(&self) -> u32 {
        self.0 & Self::S_IFMT
    }

    pub const fn is_regular_file(&self) -> bool {
        self.file_type() == Self::S_IFREG
    }

    pub const fn is_directory(&self) -> bool {
        self.file_type() == Self::S_IFDIR
    }

    pub const fn is_char_device(&self) -> bool {
        self.file_type() == Self::S_IFCHR
    }

    pub const fn is_block_device(&self) -> bool {
        self.file_type() == Self::S_IFBLK
    }

    pub const fn is_fifo(&self) -> bool {
        self.file_type() == Self::S_IFIFO
    }

    pub const fn is_symlink(&self) -> bool {
        self.file_type() == Self::S_IFLNK
    }

    pub const fn is_socket(&self) -> bool {
        self.file_type() == Self::S_IFSOCK
    }

    pub const fn bits(&self) -> u32 {
        self.0
    }
}

bitflags! {
    /// i_flags (include/linux/fs.h)
    #[derive(Debug, Copy, Clone, PartialEq, Eq)]
    pub struct InodeFlags: u32 {
        const S_APPEND    = 1 << 2;
        const S_IMMUTABLE = 1 << 3;
        /// 目录已被删除
        const S_DEAD      = 1 << 4;
        const S_NOATIME   = 1 << 6;
        const S_SWAPFILE  = 1 << 8;
    }
}

bitflags! {
    /// i_state 中与路径解析相关的位
    #[derive(Debug, Copy, Clone, PartialEq, Eq)]
    pub struct InodeState: u32 {
        /// O_TMPFILE 创建、允许随后 linkat
        const I_LINKABLE = 1 << 10;
    }
}

/// inode 上持有的委托 (delegation / lease)
///
/// 需要修改 inode 时先召回委托，`recall` 由持有方提供。
pub struct Delegation {
    recall: Box<dyn Fn() + Send + Sync>,
}

impl Delegation {
    pub fn new<F: Fn() + Send + Sync + 'static>(recall: F) -> Self {
        Self { recall: Box::new(recall) }
    }
}

/// Inode 操作接口
///
/// 对应 Linux 的 struct inode_operations (include/linux/fs.h)。
/// 未实现的能力使用默认方法，返回与 Linux 相同的错误码。
#[allow(unused_variables)]
pub trait InodeOperations: Send + Sync {
    /// 在目录 `dir` 中查找 `dentry` 的名字
    ///
    /// 驱动需要通过 `d_add()` / `d_splice_alias()` 把结果（可能是负 dentry）
    /// 关联到 `dentry` 上；返回 `Some` 表示改用另一个已有的别名。
    fn lookup(&self, dir: &Arc<Inode>, dentry: &Arc<Dentry>, flags: LookupFlags) -> Result<Option<DentryRef>, Errno> {
        Err(Errno::NotADirectory)
    }

    /// 取得符号链接内容
    ///
    /// RCU 模式下 `dentry` 为 `None`，需要阻塞时应返回 `Err(Errno::NoChild)`。
    fn get_link(&self, ctx: &mut LinkContext<'_>, dentry: Option<&Arc<Dentry>>, inode: &Arc<Inode>) -> Result<LinkBody, Errno> {
        Err(Errno::InvalidArgument)
    }

    /// 权限检查（默认使用 generic_permission）
    fn permission(&self, inode: &Arc<Inode>, cred: &Cred, mask: MayFlags) -> Result<(), Errno> {
        generic_permission(inode, cred, mask)
    }

    /// 读取访问 ACL，`rcu` 为真时不能阻塞
    fn get_inode_acl(&self, inode: &Arc<Inode>, rcu: bool) -> Result<Option<Arc<PosixAcl>>, Errno> {
        Ok(None)
    }

    /// 驱动自己的 readlink；`None` 表示使用 get_link 的结果
    fn readlink(&self, dentry: &Arc<Dentry>, buf: &mut [u8]) -> Option<Result<usize, Errno>> {
        None
    }

    fn create(&self, cred: &Cred, dir: &Arc<Inode>, dentry: &Arc<Dentry>, mode: u32, excl: bool) -> Result<(), Errno> {
        Err(Errno::PermissionDenied)
    }

    fn mkdir(&self, cred: &Cred, dir: &Arc<Inode>, dentry: &Arc<Dentry>, mode: u32) -> Result<(), Errno> {
        Err(Errno::OperationNotPermitted)
    }

    fn rmdir(&self, dir: &Arc<Inode>, dentry: &Arc<Dentry>) -> Result<(), Errno> {
        Err(Errno::OperationNotPermitted)
    }

    fn unlink(&self, dir: &Arc<Inode>, dentry: &Arc<Dentry>) -> Result<(), Errno> {
        Err(Errno::OperationNotPermitted)
    }

    fn symlink(&self, cred: &Cred, dir: &Arc<Inode>, dentry: &Arc<Dentry>, target: &[u8]) -> Result<(), Errno> {
        Err(Errno::OperationNotPermitted)
    }

    fn mknod(&self, cred: &Cred, dir: &Arc<Inode>, dentry: &Arc<Dentry>, mode: u32, dev: u64) -> Result<(), Errno> {
        Err(Errno::OperationNotPermitted)
    }

    fn link(&self, old_dentry: &Arc<Dentry>, dir: &Arc<Inode>, new_dentry: &Arc<Dentry>) -> Result<(), Errno> {
        Err(Errno::OperationNotPermitted)
    }

    fn rename(
        &self,
        old_dir: &Arc<Inode>,
        old_dentry: &Arc<Dentry>,
        new_dir: &Arc<Inode>,
        new_dentry: &Arc<Dentry>,
        flags: RenameFlags,
    ) -> Result<(), Errno> {
        Err(Errno::OperationNotPermitted)
    }

    /// 创建无名 inode 并关联到 `dentry`（O_TMPFILE）
    fn tmpfile(&self, cred: &Cred, dir: &Arc<Inode>, dentry: &Arc<Dentry>, mode: u32) -> Result<(), Errno> {
        Err(Errno::OperationNotSupported)
    }

    /// 合并的查找 + 创建 + 打开；`None` 表示驱动不支持
    fn atomic_open(
        &self,
        cred: &Cred,
        dir: &Arc<Inode>,
        dentry: &Arc<Dentry>,
        open_flag: OpenFlags,
        mode: u32,
    ) -> Option<Result<AtomicOpenOutcome, Errno>> {
        None
    }

    /// O_TRUNC 截断
    fn truncate(&self, inode: &Arc<Inode>, size: u64) -> Result<(), Errno> {
        inode.set_size(size);
        Ok(())
    }
}

static NEXT_INODE_ID: AtomicU64 = AtomicU64::new(1);

/// 索引节点
///
/// 对应 Linux 的 struct inode (include/linux/fs.h)
pub struct Inode {
    /// 全局唯一标识（跨超级块）
    id: u64,
    /// inode 编号
    pub i_ino: Ino,
    i_mode: AtomicU32,
    i_uid: AtomicU32,
    i_gid: AtomicU32,
    i_nlink: AtomicU32,
    i_size: AtomicU64,
    i_flags: AtomicU32,
    i_state: AtomicU32,
    /// 操作接口
    pub i_op: Arc<dyn InodeOperations>,
    /// 所属超级块
    pub i_sb: Arc<SuperBlock>,
    /// 目录读写锁
    pub i_rwsem: RwSemaphore,
    /// 缓存的访问 ACL
    i_acl: spin::RwLock<CachedAcl>,
    /// 缓存的符号链接内容（快速符号链接）
    i_link: spin::RwLock<Option<Arc<[u8]>>>,
    /// 委托
    i_deleg: spin::Mutex<Option<Delegation>>,
}

impl Inode {
    /// 创建新 inode
    pub fn new(
        sb: &Arc<SuperBlock>,
        ino: Ino,
        mode: InodeMode,
        uid: u32,
        gid: u32,
        ops: Arc<dyn InodeOperations>,
    ) -> Arc<Self> {
        let nlink = if mode.is_directory() { 2 } else { 1 };
        Arc::new(Self {
            id: NEXT_INODE_ID.fetch_add(1, Ordering::Relaxed),
            i_ino: ino,
            i_mode: AtomicU32::new(mode.bits()),
            i_uid: AtomicU32::new(uid),
            i_gid: AtomicU32::new(gid),
            i_nlink: AtomicU32::new(nlink),
            i_size: AtomicU64::new(0),
            i_flags: AtomicU32::new(0),
            i_state: AtomicU32::new(0),
            i_op: ops,
            i_sb: sb.clone(),
            i_rwsem: RwSemaphore::new(),
            i_acl: spin::RwLock::new(CachedAcl::NotCached),
            i_link: spin::RwLock::new(None),
            i_deleg: spin::Mutex::new(None),
        })
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn mode(&self) -> InodeMode {
        InodeMode::new(self.i_mode.load(Ordering::Acquire))
    }

    pub fn set_mode(&self, mode: u32) {
        self.i_mode.store(mode, Ordering::Release);
    }

    pub fn uid(&self) -> u32 {
        self.i_uid.load(Ordering::Acquire)
    }

    pub fn gid(&self) -> u32 {
        self.i_gid.load(Ordering::Acquire)
    }

    pub fn set_owner(&self, uid: u32, gid: u32) {
        self.i_uid.store(uid, Ordering::Release);
        self.i_gid.store(gid, Ordering::Release);
    }

    /// 对应 HAS_UNMAPPED_ID()
    pub fn has_unmapped_id(&self) -> bool {
        self.uid() == INVALID_UID || self.gid() == INVALID_GID
    }

    pub fn nlink(&self) -> u32 {
        self.i_nlink.load(Ordering::Acquire)
    }

    pub fn set_nlink(&self, nlink: u32) {
        self.i_nlink.store(nlink, Ordering::Release);
    }

    pub fn inc_nlink(&self) {
        self.i_nlink.fetch_add(1, Ordering::AcqRel);
    }

    /// 减少链接数，不会低于 0
    pub fn drop_nlink(&self) {
        let _ = self
            .i_nlink
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| Some(n.saturating_sub(1)));
    }

    pub fn size(&self) -> u64 {
        self.i_size.load(Ordering::Acquire)
    }

    pub fn set_size(&self, size: u64) {
        self.i_size.store(size, Ordering::Release);
    }

    pub fn flags(&self) -> InodeFlags {
        InodeFlags::from_bits_truncate(self.i_flags.load(Ordering::Acquire))
    }

    pub fn set_flags(&self, flags: InodeFlags) {
        self.i_flags.fetch_or(flags.bits(), Ordering::AcqRel);
    }

    pub fn clear_flags(&self, flags: InodeFlags) {
        self.i_flags.fetch_and(!flags.bits(), Ordering::AcqRel);
    }

    pub fn is_append(&self) -> bool {
        self.flags().contains(InodeFlags::S_APPEND)
    }

    pub fn is_immutable(&self) -> bool {
        self.flags().contains(InodeFlags::S_IMMUTABLE)
    }

    pub fn is_swapfile(&self) -> bool {
        self.flags().contains(InodeFlags::S_SWAPFILE)
    }

    /// 对应 IS_DEADDIR()
    pub fn is_deaddir(&self) -> bool {
        self.flags().contains(InodeFlags::S_DEAD)
    }

    pub fn state(&self) -> InodeState {
        InodeState::from_bits_truncate(self.i_state.load(Ordering::Acquire))
    }

    pub fn set_state(&self, state: InodeState) {
        self.i_state.fetch_or(state.bits(), Ordering::AcqRel);
    }

    pub fn clear_state(&self, state: InodeState) {
        self.i_state.fetch_and(!state.bits(), Ordering::AcqRel);
    }

    pub fn cached_acl(&self) -> CachedAcl {
        self.i_acl.read().clone()
    }

    pub fn set_cached_acl(&self, acl: CachedAcl) {
        *self.i_acl.write() = acl;
    }

    /// 快速符号链接：内容直接缓存在 inode 上
    pub fn cached_link(&self) -> Option<Arc<[u8]>> {
        self.i_link.read().clone()
    }

    pub fn set_cached_link(&self, body: Option<Arc<[u8]>>) {
        *self.i_link.write() = body;
    }

    pub fn set_delegation(&self, deleg: Delegation) {
        *self.i_deleg.lock() = Some(deleg);
    }

    pub fn has_delegation(&self) -> bool {
        self.i_deleg.lock().is_some()
    }

    /// 独占锁定（inode_lock）
    pub fn lock(self: &Arc<Self>) -> InodeLockGuard {
        self.i_rwsem.down_write();
        InodeLockGuard {
            inode: self.clone(),
            exclusive: true,
        }
    }

    /// 共享锁定（inode_lock_shared）
    pub fn lock_shared(self: &Arc<Self>) -> InodeLockGuard {
        self.i_rwsem.down_read();
        InodeLockGuard {
            inode: self.clone(),
            exclusive: false,
        }
    }
}

impl fmt::Debug for Inode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Inode")
            .field("ino", &self.i_ino)
            .field("mode", &format_args!("{:o}", self.mode().bits()))
            .field("uid", &self.uid())
            .field("gid", &self.gid())
            .field("nlink", &self.nlink())
            .finish()
    }
}

/// i_rwsem 守卫，析构时解锁
pub struct InodeLockGuard {
    inode: Arc<Inode>,
    exclusive: bool,
}

impl InodeLockGuard {
    pub fn inode(&self) -> &Arc<Inode> {
        &self.inode
    }
}

impl Drop for InodeLockGuard {
    fn drop(&mut self) {
        if self.exclusive {
            self.inode.i_rwsem.up_write();
        } else {
            self.inode.i_rwsem.up_read();
        }
    }
}

/// 对应 try_break_deleg()
///
/// inode 上有委托时记下它并返回 `TryAgain`，调用者应释放锁后调用
/// [`break_deleg_wait`] 再重试。
pub fn try_break_deleg(inode: &Arc<Inode>, delegated_inode: &mut Option<Arc<Inode>>) -> Result<(), Errno> {
    if inode.has_delegation() {
        *delegated_inode = Some(inode.clone());
        return Err(Errno::TryAgain);
    }
    Ok(())
}

/// 对应 break_deleg_wait()：召回委托
pub fn break_deleg_wait(delegated_inode: &mut Option<Arc<Inode>>) -> Result<(), Errno> {
    if let Some(inode) = delegated_inode.take() {
        let deleg = inode.i_deleg.lock().take();
        if let Some(deleg) = deleg {
            log::debug!("breaking delegation on inode {}", inode.i_ino);
            (deleg.recall)();
        }
    }
    Ok(())
}
