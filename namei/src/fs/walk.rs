//! MIT License
//!
//! Copyright (c) 2026 Fei Wang
//!
//! 路径遍历状态机
//!
//! 对应 Linux fs/namei.c 中的 struct nameidata 及 link_path_walk() 一族
//!
//! 两种模式：
//! - RCU 模式：不取任何引用，只持有 `Arc`，读到的一切都靠
//!   `d_seq` / `MOUNT_LOCK` / `RENAME_LOCK` 的序号验证
//! - 引用模式：位置是持有引用的 `Path`，析构即释放
//!
//! 从 RCU 切换到引用模式称为 unlazy：为当前位置、根和符号链接栈上的
//! 每一项补取引用，并验证看到的序号没有变化；失败时返回 `NoChild`，
//! 由入口函数以引用模式重新开始。

use alloc::sync::Arc;
use bitflags::bitflags;

use crate::collection::InlineVec;
use crate::config::{EMBEDDED_LEVELS, MAXSYMLINKS, NAME_MAX};
use crate::errno::Errno;
use crate::fs::dentry::{
    d_alloc_parallel, d_invalidate, d_lookup, d_lookup_done, d_lookup_rcu, dget_parent, is_subdir, Dentry,
    DentryFlags, DentryRef, QStr, RENAME_LOCK,
};
use crate::fs::hash::{hash_name, hashlen_hash, hashlen_len};
use crate::fs::inode::Inode;
use crate::fs::link::{DelayedCall, LinkBody, LinkContext};
use crate::fs::mount::{
    __lookup_mnt, choose_mountpoint_at, choose_mountpoint_raw, do_add_mount, is_path_beneath, lookup_mnt, MntFlags,
    MountRef, VfsMount, MOUNT_LOCK,
};
use crate::fs::path::{LastType, LookupFlags, Path};
use crate::fs::perm::{inode_permission, may_follow_link, MayFlags};
use crate::process::{Capabilities, Task};

bitflags! {
    /// nameidata 的内部状态 (ND_*)
    #[derive(Debug, Copy, Clone, PartialEq, Eq)]
    pub(crate) struct NdState: u32 {
        /// 根由调用者给定
        const ROOT_PRESET = 1;
        /// 自上一个分量以来发生过挂载穿越或绝对跳转
        const JUMPED      = 4;
    }
}

bitflags! {
    /// walk_component() / step_into() 的参数 (WALK_*)
    #[derive(Debug, Copy, Clone, PartialEq, Eq)]
    pub(crate) struct WalkFlags: u32 {
        /// 末尾分量
        const TRAILING = 1;
        /// 后面还有分量
        const MORE     = 2;
        /// 不跟随符号链接
        const NOFOLLOW = 4;
    }
}

/// 遍历中的位置
///
/// RCU 模式下只持有 `Arc`（不计入逻辑引用），引用模式下是 `Path`。
#[derive(Clone)]
pub(crate) enum NdPath {
    Rcu { mnt: Arc<VfsMount>, dentry: Arc<Dentry> },
    Ref(Path),
}

impl NdPath {
    fn rcu(mnt: &Arc<VfsMount>, dentry: &Arc<Dentry>) -> Self {
        NdPath::Rcu {
            mnt: mnt.clone(),
            dentry: dentry.clone(),
        }
    }

    fn from_path(path: &Path, rcu: bool) -> Self {
        if rcu {
            Self::rcu(path.mnt(), path.dentry())
        } else {
            NdPath::Ref(path.clone())
        }
    }

    pub(crate) fn mnt(&self) -> &Arc<VfsMount> {
        match self {
            NdPath::Rcu { mnt, .. } => mnt,
            NdPath::Ref(path) => path.mnt(),
        }
    }

    pub(crate) fn dentry(&self) -> &Arc<Dentry> {
        match self {
            NdPath::Rcu { dentry, .. } => dentry,
            NdPath::Ref(path) => path.dentry(),
        }
    }

    fn same(&self, other: &NdPath) -> bool {
        Arc::ptr_eq(self.mnt(), other.mnt()) && Arc::ptr_eq(self.dentry(), other.dentry())
    }
}

/// 对应 legitimize_path()：为 RCU 位置补取引用
///
/// 引用取到但 `seq` 已经过期时仍然转换为引用位置，返回 false，
/// 引用在 nameidata 析构时释放。
fn legitimize(pos: &mut NdPath, seq: Option<u32>, m_seq: u32) -> bool {
    let NdPath::Rcu { mnt, dentry } = pos else {
        return true;
    };
    let Some(mnt) = MountRef::legitimize(mnt, m_seq) else {
        return false;
    };
    let Some(dentry) = DentryRef::try_get(dentry) else {
        return false;
    };
    let stale = seq.is_some_and(|s| dentry.d_seq.read_retry(s));
    *pos = NdPath::Ref(Path::new(mnt, dentry));
    !stale
}

/// 查找得到的子项
pub(crate) enum Child {
    /// RCU 模式：序号在 `nd.next_seq` 中
    Rcu(Arc<Dentry>),
    Ref(DentryRef),
}

/// 路径文本上的游标；文本在缓冲区结尾或 NUL 处结束
#[derive(Clone)]
pub(crate) struct Cursor {
    buf: Arc<[u8]>,
    pos: usize,
}

impl Cursor {
    pub(crate) fn new(buf: Arc<[u8]>) -> Self {
        Self { buf, pos: 0 }
    }

    fn peek(&self) -> Option<u8> {
        self.buf.get(self.pos).copied().filter(|&c| c != 0)
    }

    pub(crate) fn at_end(&self) -> bool {
        self.peek().is_none()
    }

    fn skip_slashes(&mut self) {
        while self.peek() == Some(b'/') {
            self.pos += 1;
        }
    }

    fn rest(&self) -> &[u8] {
        &self.buf[self.pos..]
    }
}

/// 符号链接栈的一项
///
/// 字段顺序即析构顺序：先执行释放动作，再释放链接位置。
struct SavedLink {
    done: DelayedCall,
    link: NdPath,
    seq: u32,
}

/// 遍历的起点
pub(crate) struct WalkStart<'a> {
    pub task: &'a Task,
    /// 相对路径的起点，`None` 表示当前目录
    pub dfd: Option<&'a Path>,
    pub name: Arc<[u8]>,
    /// 调用者给定的根（vfs_path_lookup / do_file_open_root）
    pub root: Option<&'a Path>,
}

/// 对应 struct nameidata
pub(crate) struct NameiData<'a> {
    task: &'a Task,
    pub(crate) path: NdPath,
    pub(crate) inode: Option<Arc<Inode>>,
    pub(crate) last: QStr,
    pub(crate) last_type: LastType,
    pub(crate) flags: LookupFlags,
    state: NdState,
    root: Option<NdPath>,
    seq: u32,
    next_seq: u32,
    m_seq: u32,
    r_seq: u32,
    root_seq: u32,
    stack: InlineVec<SavedLink, EMBEDDED_LEVELS>,
    pub(crate) total_link_count: u32,
    pub(crate) dir_uid: u32,
    pub(crate) dir_mode: u32,
}

impl<'a> NameiData<'a> {
    /// 对应 path_init()
    pub(crate) fn path_init(start: &WalkStart<'a>, flags: LookupFlags, links: u32) -> Result<(Self, Cursor), Errno> {
        let mut flags = flags;
        let s = Cursor::new(start.name.clone());

        if flags.contains(LookupFlags::CACHED) && !flags.contains(LookupFlags::RCU) {
            return Err(Errno::TryAgain);
        }
        if s.at_end() {
            flags.remove(LookupFlags::RCU);
        }
        let rcu = flags.contains(LookupFlags::RCU);
        let seq_of = |d: &Arc<Dentry>| if rcu { d.d_seq.read_begin() } else { 0 };

        let m_seq = MOUNT_LOCK.read_begin();
        let r_seq = RENAME_LOCK.read_begin();
        let mut state = NdState::JUMPED;
        let mut root = None;
        let mut root_seq = 0;

        let path = if let Some(preset) = start.root {
            if !s.at_end() && !preset.dentry().is_dir() {
                return Err(Errno::NotADirectory);
            }
            state |= NdState::ROOT_PRESET;
            root_seq = seq_of(preset.dentry());
            root = Some(NdPath::Ref(preset.clone()));
            NdPath::from_path(preset, rcu)
        } else if s.peek() == Some(b'/') && !flags.contains(LookupFlags::IN_ROOT) {
            if flags.contains(LookupFlags::BENEATH) {
                return Err(Errno::CrossDeviceLink);
            }
            let fs_root = task_root(start.task, rcu);
            root_seq = seq_of(fs_root.dentry());
            root = Some(fs_root.clone());
            fs_root
        } else if let Some(dfd) = start.dfd {
            // linkat(AT_EMPTY_PATH) 以 dfd 为源，不论后面是否还有路径
            if flags.contains(LookupFlags::LINKAT_EMPTY)
                && !start.task.cred().capable(Capabilities::DAC_READ_SEARCH)
            {
                return Err(Errno::NoSuchFileOrDirectory);
            }
            if !s.at_end() && !dfd.dentry().is_dir() {
                return Err(Errno::NotADirectory);
            }
            NdPath::from_path(dfd, rcu)
        } else if rcu {
            let (mnt, dentry) = start.task.fs.pwd_raw();
            NdPath::Rcu { mnt, dentry }
        } else {
            NdPath::Ref(start.task.fs.pwd())
        };

        let seq = seq_of(path.dentry());
        if start.root.is_none() && flags.intersects(LookupFlags::IS_SCOPED) {
            root = Some(path.clone());
            root_seq = seq;
        }

        let nd = Self {
            task: start.task,
            inode: path.dentry().inode(),
            path,
            last: QStr::new(Arc::from(&b""[..]), 0, 0, 0),
            last_type: LastType::Root,
            flags,
            state,
            root,
            seq,
            next_seq: 0,
            m_seq,
            r_seq,
            root_seq,
            stack: InlineVec::new(),
            total_link_count: links,
            dir_uid: 0,
            dir_mode: 0,
        };
        Ok((nd, s))
    }

    pub(crate) fn task(&self) -> &'a Task {
        self.task
    }

    pub(crate) fn is_rcu(&self) -> bool {
        self.flags.contains(LookupFlags::RCU)
    }

    /// 符号链接栈深度
    pub(crate) fn depth(&self) -> usize {
        self.stack.len()
    }

    /// 结束遍历，交出当前位置
    pub(crate) fn into_path(self) -> Result<Path, Errno> {
        match self.path {
            NdPath::Ref(path) => Ok(path),
            NdPath::Rcu { .. } => Err(Errno::NoChild),
        }
    }

    fn leave_rcu(&mut self) {
        self.flags.remove(LookupFlags::RCU);
    }

    /// 对应 legitimize_links()
    fn legitimize_links(&mut self) -> bool {
        if self.flags.contains(LookupFlags::CACHED) {
            self.stack.clear();
            return false;
        }
        let m_seq = self.m_seq;
        self.stack
            .try_for_each_mut(|saved| {
                if legitimize(&mut saved.link, Some(saved.seq), m_seq) {
                    Ok(())
                } else {
                    Err(())
                }
            })
            .is_ok()
    }

    /// 对应 legitimize_root()
    fn legitimize_root(&mut self) -> bool {
        let (m_seq, root_seq) = (self.m_seq, self.root_seq);
        match &mut self.root {
            Some(root) if !self.state.contains(NdState::ROOT_PRESET) => legitimize(root, Some(root_seq), m_seq),
            _ => true,
        }
    }

    /// 对应 try_to_unlazy()：当前位置、栈和根全部转为引用模式
    pub(crate) fn try_to_unlazy(&mut self) -> bool {
        debug_assert!(self.is_rcu());
        let ok = self.legitimize_links()
            && legitimize(&mut self.path, Some(self.seq), self.m_seq)
            && self.legitimize_root();
        self.leave_rcu();
        #[cfg(feature = "debug_log")]
        log::trace!("namei: unlazy {}", if ok { "ok" } else { "failed" });
        ok
    }

    /// 对应 try_to_unlazy_next()：同时为刚找到的子项 `dentry` 取引用
    fn try_to_unlazy_next(&mut self, dentry: &Arc<Dentry>) -> Option<DentryRef> {
        debug_assert!(self.is_rcu());
        let child = self.unlazy_next_inner(dentry);
        self.leave_rcu();
        #[cfg(feature = "debug_log")]
        log::trace!(
            "namei: unlazy at {:?} {}",
            dentry.name(),
            if child.is_some() { "ok" } else { "failed" }
        );
        child
    }

    fn unlazy_next_inner(&mut self, dentry: &Arc<Dentry>) -> Option<DentryRef> {
        if !self.legitimize_links() {
            return None;
        }
        // 父目录的序号不必验证，子项的序号覆盖了它
        if !legitimize(&mut self.path, None, self.m_seq) {
            return None;
        }
        let child = DentryRef::try_get(dentry)?;
        if dentry.d_seq.read_retry(self.next_seq) {
            return None;
        }
        if !self.legitimize_root() {
            return None;
        }
        Some(child)
    }

    /// 对应 set_root()
    fn set_root(&mut self) -> Result<(), Errno> {
        // 受限遍历的根在 path_init() 中确定，之后不能再改
        if self.flags.intersects(LookupFlags::IS_SCOPED) {
            log::warn!("namei: scoped walk asked to reset its root");
            return Err(Errno::NotRecoverable);
        }
        let root = task_root(self.task, self.is_rcu());
        if self.is_rcu() {
            self.root_seq = root.dentry().d_seq.read_begin();
        }
        self.root = Some(root);
        Ok(())
    }

    /// 对应 nd_jump_root()：绝对路径符号链接回到根
    fn nd_jump_root(&mut self) -> Result<(), Errno> {
        if self.flags.contains(LookupFlags::BENEATH) {
            return Err(Errno::CrossDeviceLink);
        }
        if self.root.is_none() {
            self.set_root()?;
        }
        let Some(root) = self.root.clone() else {
            return Err(Errno::NoSuchFileOrDirectory);
        };
        if self.flags.contains(LookupFlags::NO_XDEV) && !Arc::ptr_eq(self.path.mnt(), root.mnt()) {
            return Err(Errno::CrossDeviceLink);
        }
        let root = match (root, self.is_rcu()) {
            // 预设的根总是引用形式，RCU 模式下位置不持有引用
            (NdPath::Ref(path), true) => NdPath::rcu(path.mnt(), path.dentry()),
            (root, _) => root,
        };
        if self.is_rcu() {
            self.seq = root.dentry().d_seq.read_begin();
        }
        self.inode = root.dentry().inode();
        self.path = root;
        self.state |= NdState::JUMPED;
        Ok(())
    }

    /// 对应 nd_jump_link()：魔法链接直接跳到目标
    fn nd_jump_link(&mut self, target: Path) -> Result<(), Errno> {
        if self.flags.contains(LookupFlags::NO_MAGICLINKS) {
            return Err(Errno::TooManySymbolicLinks);
        }
        if self.flags.contains(LookupFlags::NO_XDEV) && !Arc::ptr_eq(self.path.mnt(), target.mnt()) {
            return Err(Errno::CrossDeviceLink);
        }
        // 受限遍历不知道魔法链接会跳到哪里
        if self.flags.intersects(LookupFlags::IS_SCOPED) {
            return Err(Errno::CrossDeviceLink);
        }
        self.inode = target.inode();
        self.path = NdPath::Ref(target);
        self.state |= NdState::JUMPED;
        Ok(())
    }

    /// 对应 may_lookup()：目录的搜索权限
    fn may_lookup(&mut self) -> Result<(), Errno> {
        let inode = self.inode.clone().ok_or(Errno::NoSuchFileOrDirectory)?;
        if self.is_rcu() {
            match inode_permission(self.task, &inode, MayFlags::EXEC | MayFlags::NOT_BLOCK) {
                Err(Errno::NoChild) => {}
                res => return res,
            }
            if !self.try_to_unlazy() {
                return Err(Errno::NoChild);
            }
        }
        inode_permission(self.task, &inode, MayFlags::EXEC)
    }

    pub(crate) fn put_link(&mut self) {
        drop(self.stack.pop());
    }

    /// 对应 reserve_stack()
    fn reserve_stack(&mut self, link: &mut NdPath) -> Result<(), Errno> {
        if self.total_link_count >= MAXSYMLINKS {
            return Err(Errno::TooManySymbolicLinks);
        }
        self.total_link_count += 1;
        if !self.stack.needs_spill() || self.stack.spill(MAXSYMLINKS as usize).is_ok() {
            return Ok(());
        }
        if self.is_rcu() {
            // 分配可能需要阻塞，先离开 RCU 模式再试一次
            let grabbed = legitimize(link, Some(self.next_seq), self.m_seq);
            if !self.try_to_unlazy() || !grabbed {
                return Err(Errno::NoChild);
            }
            if self.stack.spill(MAXSYMLINKS as usize).is_ok() {
                return Ok(());
            }
        }
        Err(Errno::OutOfMemory)
    }

    /// 对应 pick_link()：把符号链接压栈并取得它的内容
    ///
    /// 返回需要继续遍历的文本；纯跳转（魔法链接或 `/`）返回 `None`。
    fn pick_link(&mut self, link: NdPath, inode: Arc<Inode>, flags: WalkFlags) -> Result<Option<Cursor>, Errno> {
        let mut link = link;
        self.reserve_stack(&mut link)?;
        let link_mnt = link.mnt().clone();
        let link_dentry = link.dentry().clone();
        self.stack.push(SavedLink {
            done: DelayedCall::none(),
            link,
            seq: self.next_seq,
        })?;
        #[cfg(feature = "debug_log")]
        log::trace!("namei: follow {:?} depth {}", link_dentry.name(), self.stack.len());

        if flags.contains(WalkFlags::TRAILING) {
            may_follow_link(self.task, self.dir_mode, self.dir_uid, &inode, self.is_rcu())?;
        }
        if self.flags.contains(LookupFlags::NO_SYMLINKS) || link_mnt.flags().contains(MntFlags::NOSYMFOLLOW) {
            return Err(Errno::TooManySymbolicLinks);
        }
        let rcu = self.is_rcu();
        self.task.lsm(|h| h.inode_follow_link(&link_dentry, &inode, rcu))?;

        let body = match inode.cached_link() {
            Some(body) => LinkBody::Text {
                body,
                done: DelayedCall::none(),
            },
            None if self.is_rcu() => match self.get_link(None, &inode) {
                Err(Errno::NoChild) if self.try_to_unlazy() => self.get_link(Some(&link_dentry), &inode)?,
                res => res?,
            },
            None => self.get_link(Some(&link_dentry), &inode)?,
        };

        match body {
            LinkBody::Jump(target) => {
                if self.is_rcu() && !self.try_to_unlazy() {
                    return Err(Errno::NoChild);
                }
                self.nd_jump_link(target)?;
            }
            LinkBody::Text { body, done } => {
                if let Some(top) = self.stack.last_mut() {
                    top.done = done;
                }
                let mut text = Cursor::new(body);
                if text.peek() == Some(b'/') {
                    self.nd_jump_root()?;
                    text.skip_slashes();
                }
                if !text.at_end() {
                    return Ok(Some(text));
                }
            }
        }
        self.put_link();
        Ok(None)
    }

    fn get_link(&mut self, dentry: Option<&Arc<Dentry>>, inode: &Arc<Inode>) -> Result<LinkBody, Errno> {
        let task = self.task;
        let flags = self.flags;
        let mut ctx = LinkContext::new(task, &mut self.total_link_count, flags);
        inode.i_op.get_link(&mut ctx, dentry, inode)
    }

    /// 对应 __follow_mount_rcu()：RCU 模式下穿越挂载
    ///
    /// 返回 false 表示需要以引用模式处理。
    fn follow_mount_rcu(&mut self, path: &mut NdPath) -> bool {
        let mut flags = path.dentry().flags();
        if !flags.intersects(DentryFlags::MANAGED) {
            return true;
        }
        if self.flags.contains(LookupFlags::NO_XDEV) {
            return false;
        }
        loop {
            if flags.contains(DentryFlags::MANAGE_TRANSIT) {
                if let Some(ops) = path.dentry().d_op() {
                    match ops.d_manage(path.mnt(), path.dentry(), true) {
                        Ok(()) => {}
                        Err(e) => return e == Errno::IsADirectory,
                    }
                }
                flags = path.dentry().flags();
            }
            if flags.contains(DentryFlags::MOUNTED) {
                if let Some(mounted) = __lookup_mnt(path.mnt(), path.dentry()) {
                    let root = mounted.root().clone();
                    self.state |= NdState::JUMPED;
                    self.next_seq = root.d_seq.read_begin();
                    flags = root.flags();
                    *path = NdPath::Rcu { mnt: mounted, dentry: root };
                    #[cfg(feature = "debug_log")]
                    log::trace!("namei: cross mount {} (rcu)", path.mnt().id());
                    if MOUNT_LOCK.read_retry(self.m_seq) {
                        return false;
                    }
                    continue;
                }
                if MOUNT_LOCK.read_retry(self.m_seq) {
                    return false;
                }
            }
            return !flags.contains(DentryFlags::NEED_AUTOMOUNT);
        }
    }

    /// 对应 handle_mounts()
    fn handle_mounts(&mut self, child: Child) -> Result<NdPath, Errno> {
        let path = match child {
            Child::Rcu(dentry) => {
                let seq = self.next_seq;
                let mut path = NdPath::rcu(self.path.mnt(), &dentry);
                if self.follow_mount_rcu(&mut path) {
                    return Ok(path);
                }
                drop(path);
                self.next_seq = seq;
                let dentry = self.try_to_unlazy_next(&dentry).ok_or(Errno::NoChild)?;
                Path::new(MountRef::get(self.path.mnt()), dentry)
            }
            Child::Ref(dentry) => Path::new(MountRef::get(self.path.mnt()), dentry),
        };
        let mut path = path;
        let jumped = traverse_mounts(&mut path, &mut self.total_link_count, self.flags)?;
        if jumped {
            if self.flags.contains(LookupFlags::NO_XDEV) {
                return Err(Errno::CrossDeviceLink);
            }
            self.state |= NdState::JUMPED;
        }
        Ok(NdPath::Ref(path))
    }

    /// 对应 step_into()：移动到 `child`，必要时开始跟随符号链接
    pub(crate) fn step_into(&mut self, flags: WalkFlags, child: Child) -> Result<Option<Cursor>, Errno> {
        let path = self.handle_mounts(child)?;
        let dentry = path.dentry().clone();
        let inode = dentry.inode();
        let follow = dentry.is_symlink()
            && !flags.contains(WalkFlags::NOFOLLOW)
            && (!flags.contains(WalkFlags::TRAILING) || self.flags.contains(LookupFlags::FOLLOW));

        if self.is_rcu() && dentry.d_seq.read_retry(self.next_seq) {
            return Err(Errno::NoChild);
        }
        if !follow {
            if self.is_rcu() && inode.is_none() {
                return Err(Errno::NoSuchFileOrDirectory);
            }
            self.path = path;
            self.inode = inode;
            self.seq = self.next_seq;
            return Ok(None);
        }
        let inode = inode.ok_or(Errno::NoSuchFileOrDirectory)?;
        self.pick_link(path, inode, flags)
    }

    /// 对应 follow_dotdot_rcu()
    fn follow_dotdot_rcu(&mut self) -> Result<Child, Errno> {
        let Some(root) = self.root.clone() else {
            return Err(Errno::NoChild);
        };
        if !self.path.same(&root) {
            let mut at_root = false;
            if Arc::ptr_eq(self.path.dentry(), self.path.mnt().root()) {
                match choose_mountpoint_raw(self.path.mnt(), root.mnt(), root.dentry()) {
                    None => at_root = true,
                    Some((mnt, mountpoint)) => {
                        if self.flags.contains(LookupFlags::NO_XDEV) {
                            return Err(Errno::NoChild);
                        }
                        self.seq = mountpoint.d_seq.read_begin();
                        self.inode = mountpoint.inode();
                        self.path = NdPath::Rcu { mnt, dentry: mountpoint };
                        if MOUNT_LOCK.read_retry(self.m_seq) {
                            return Err(Errno::NoChild);
                        }
                    }
                }
            }
            if !at_root {
                let old = self.path.dentry().clone();
                let parent = old.parent().unwrap_or_else(|| old.clone());
                self.next_seq = parent.d_seq.read_begin();
                if old.d_seq.read_retry(self.seq) {
                    return Err(Errno::NoChild);
                }
                if !path_connected(self.path.mnt(), &parent) {
                    return Err(Errno::NoChild);
                }
                return Ok(Child::Rcu(parent));
            }
        }
        if MOUNT_LOCK.read_retry(self.m_seq) {
            return Err(Errno::NoChild);
        }
        if self.flags.contains(LookupFlags::BENEATH) {
            return Err(Errno::NoChild);
        }
        self.next_seq = self.seq;
        Ok(Child::Rcu(self.path.dentry().clone()))
    }

    /// 对应 follow_dotdot()
    fn follow_dotdot(&mut self) -> Result<Child, Errno> {
        let Some(root) = self.root.clone() else {
            return Err(Errno::NoSuchFileOrDirectory);
        };
        if !self.path.same(&root) {
            let mut at_root = false;
            if Arc::ptr_eq(self.path.dentry(), self.path.mnt().root()) {
                match choose_mountpoint_at(self.path.mnt(), root.mnt(), root.dentry()) {
                    None => at_root = true,
                    Some(mountpoint) => {
                        self.inode = mountpoint.inode();
                        self.path = NdPath::Ref(mountpoint);
                        if self.flags.contains(LookupFlags::NO_XDEV) {
                            return Err(Errno::CrossDeviceLink);
                        }
                    }
                }
            }
            if !at_root {
                let parent = dget_parent(self.path.dentry());
                // rename 可能把我们移到了挂载之外
                if !path_connected(self.path.mnt(), &parent) {
                    return Err(Errno::NoSuchFileOrDirectory);
                }
                return Ok(Child::Ref(parent));
            }
        }
        if self.flags.contains(LookupFlags::BENEATH) {
            return Err(Errno::CrossDeviceLink);
        }
        Ok(Child::Ref(DentryRef::get(self.path.dentry())))
    }

    /// 对应 handle_dots()
    pub(crate) fn handle_dots(&mut self, last_type: LastType) -> Result<Option<Cursor>, Errno> {
        if last_type != LastType::DotDot {
            return Ok(None);
        }
        if self.root.is_none() {
            self.set_root()?;
        }
        let parent = if self.is_rcu() {
            self.follow_dotdot_rcu()?
        } else {
            self.follow_dotdot()?
        };
        let res = self.step_into(WalkFlags::NOFOLLOW, parent)?;
        // `..` 与并发的 rename / mount 竞争时，受限遍历无法确认没有逃出根
        if self.flags.intersects(LookupFlags::IS_SCOPED)
            && (MOUNT_LOCK.read_retry(self.m_seq) || RENAME_LOCK.read_retry(self.r_seq))
        {
            return Err(Errno::TryAgain);
        }
        Ok(res)
    }

    fn d_revalidate(&self, dentry: &Arc<Dentry>) -> Result<bool, Errno> {
        let dir = self.inode.clone().ok_or(Errno::NoSuchFileOrDirectory)?;
        d_revalidate(&dir, &self.last, dentry, self.flags)
    }

    /// 对应 lookup_fast()：只查 dcache
    ///
    /// `Ok(None)` 表示需要慢速查找，此时已经处于引用模式。
    pub(crate) fn lookup_fast(&mut self) -> Result<Option<Child>, Errno> {
        let parent = self.path.dentry().clone();
        if self.is_rcu() {
            let Some((dentry, seq)) = d_lookup_rcu(&parent, &self.last) else {
                if !self.try_to_unlazy() {
                    return Err(Errno::NoChild);
                }
                return Ok(None);
            };
            self.next_seq = seq;
            // 父目录在查找期间变化，结果不可信
            if parent.d_seq.read_retry(self.seq) {
                return Err(Errno::NoChild);
            }
            let status = self.d_revalidate(&dentry);
            if status == Ok(true) {
                return Ok(Some(Child::Rcu(dentry)));
            }
            let dref = self.try_to_unlazy_next(&dentry).ok_or(Errno::NoChild)?;
            let status = if status == Err(Errno::NoChild) {
                self.d_revalidate(&dref)
            } else {
                status
            };
            return self.finish_revalidate(dref, status);
        }
        let Some(dref) = d_lookup(&parent, &self.last) else {
            return Ok(None);
        };
        let status = self.d_revalidate(&dref);
        self.finish_revalidate(dref, status)
    }

    fn finish_revalidate(&self, dentry: DentryRef, status: Result<bool, Errno>) -> Result<Option<Child>, Errno> {
        match status {
            Ok(true) => Ok(Some(Child::Ref(dentry))),
            Ok(false) => {
                d_invalidate(&dentry);
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    /// 对应 walk_component()
    fn walk_component(&mut self, flags: WalkFlags) -> Result<Option<Cursor>, Errno> {
        if self.last_type != LastType::Norm {
            if !flags.contains(WalkFlags::MORE) && self.depth() > 0 {
                self.put_link();
            }
            return self.handle_dots(self.last_type);
        }
        let child = match self.lookup_fast()? {
            Some(child) => child,
            None => Child::Ref(lookup_slow(&self.last, self.path.dentry(), self.flags)?),
        };
        if !flags.contains(WalkFlags::MORE) && self.depth() > 0 {
            self.put_link();
        }
        self.step_into(flags, child)
    }

    /// 对应 link_path_walk()：解析除最后一个分量外的全部路径
    ///
    /// 返回时 `last` / `last_type` 为最后一个分量，`PARENT` 已清除。
    pub(crate) fn link_path_walk(&mut self, name: Cursor) -> Result<(), Errno> {
        let mut name = name;
        // 被符号链接打断的剩余文本
        let mut pending: InlineVec<Cursor, EMBEDDED_LEVELS> = InlineVec::new();

        self.last_type = LastType::Root;
        self.flags |= LookupFlags::PARENT;
        name.skip_slashes();
        if name.at_end() {
            self.dir_mode = 0;
            return Ok(());
        }

        loop {
            self.may_lookup()?;

            let parent = self.path.dentry().clone();
            let hashlen = hash_name(parent.salt(), name.rest());
            let len = hashlen_len(hashlen) as usize;
            self.last = QStr::new(name.buf.clone(), name.pos, len, hashlen_hash(hashlen));
            self.last_type = match self.last.name() {
                b".." => LastType::DotDot,
                b"." => LastType::Dot,
                _ => LastType::Norm,
            };
            match self.last_type {
                LastType::DotDot => self.state |= NdState::JUMPED,
                LastType::Norm => {
                    self.state.remove(NdState::JUMPED);
                    if parent.flags().contains(DentryFlags::OP_HASH) {
                        if let Some(ops) = parent.d_op() {
                            self.last.hash = ops.d_hash(&parent, &self.last)?;
                        }
                    }
                }
                _ => {}
            }

            name.pos += len;
            name.skip_slashes();
            let link = if name.at_end() {
                let Some(resume) = pending.pop() else {
                    let inode = self.inode.clone().ok_or(Errno::NoSuchFileOrDirectory)?;
                    self.dir_uid = inode.uid();
                    self.dir_mode = inode.mode().bits();
                    self.flags.remove(LookupFlags::PARENT);
                    return Ok(());
                };
                // 嵌套符号链接的最后一个分量
                name = resume;
                self.walk_component(WalkFlags::empty())?
            } else {
                self.walk_component(WalkFlags::MORE)?
            };

            if let Some(link) = link {
                pending.push(core::mem::replace(&mut name, link))?;
                continue;
            }
            if !self.path.dentry().is_dir() {
                if self.is_rcu() && !self.try_to_unlazy() {
                    return Err(Errno::NoChild);
                }
                return Err(Errno::NotADirectory);
            }
        }
    }

    /// 对应 lookup_last()
    fn lookup_last(&mut self) -> Result<Option<Cursor>, Errno> {
        if self.last_type == LastType::Norm && self.last.has_trailing() {
            self.flags |= LookupFlags::FOLLOW | LookupFlags::DIRECTORY;
        }
        self.walk_component(WalkFlags::TRAILING)
    }

    /// 对应 handle_lookup_down()：在当前位置向下穿越挂载
    fn handle_lookup_down(&mut self) -> Result<(), Errno> {
        let child = if self.is_rcu() {
            Child::Rcu(self.path.dentry().clone())
        } else {
            Child::Ref(DentryRef::get(self.path.dentry()))
        };
        self.next_seq = self.seq;
        self.step_into(WalkFlags::NOFOLLOW, child).map(|_| ())
    }

    /// 对应 complete_walk()：离开 RCU 模式并做最后的检查
    pub(crate) fn complete_walk(&mut self) -> Result<(), Errno> {
        if self.is_rcu() {
            // 根只在遍历中途需要，没有预设也不受限时直接放弃
            if !self.state.contains(NdState::ROOT_PRESET) && !self.flags.intersects(LookupFlags::IS_SCOPED) {
                self.root = None;
            }
            self.flags.remove(LookupFlags::CACHED);
            if !self.try_to_unlazy() {
                return Err(Errno::NoChild);
            }
        }

        if self.flags.intersects(LookupFlags::IS_SCOPED) {
            let Some(root) = &self.root else {
                return Err(Errno::CrossDeviceLink);
            };
            if !is_path_beneath(self.path.mnt(), self.path.dentry(), root.mnt(), root.dentry()) {
                return Err(Errno::CrossDeviceLink);
            }
        }

        if !self.state.contains(NdState::JUMPED) {
            return Ok(());
        }
        let dentry = self.path.dentry();
        if !dentry.flags().contains(DentryFlags::OP_WEAK_REVALIDATE) {
            return Ok(());
        }
        let Some(ops) = dentry.d_op() else {
            return Ok(());
        };
        match ops.d_weak_revalidate(dentry, self.flags)? {
            true => Ok(()),
            false => Err(Errno::StaleFileHandle),
        }
    }

    fn lookupat(&mut self, s: Cursor) -> Result<(), Errno> {
        let mut s = s;
        if self.flags.contains(LookupFlags::DOWN) {
            self.handle_lookup_down()?;
        }
        loop {
            self.link_path_walk(s)?;
            match self.lookup_last()? {
                Some(next) => s = next,
                None => break,
            }
        }
        if self.flags.contains(LookupFlags::MOUNTPOINT) {
            self.handle_lookup_down()?;
            self.state.remove(NdState::JUMPED);
        }
        self.complete_walk()?;
        if self.flags.contains(LookupFlags::DIRECTORY) && !self.path.dentry().is_dir() {
            return Err(Errno::NotADirectory);
        }
        Ok(())
    }
}

fn task_root(task: &Task, rcu: bool) -> NdPath {
    if rcu {
        let (mnt, dentry) = task.fs.root_raw();
        NdPath::Rcu { mnt, dentry }
    } else {
        NdPath::Ref(task.fs.root())
    }
}

/// 对应 path_connected()：`dentry` 是否仍在挂载根之下
fn path_connected(mnt: &VfsMount, dentry: &Arc<Dentry>) -> bool {
    if mnt.mnt_sb.root().is_some_and(|r| Arc::ptr_eq(&r, mnt.root())) {
        return true;
    }
    is_subdir(dentry, mnt.root())
}

/// 对应 d_revalidate()
pub(crate) fn d_revalidate(dir: &Arc<Inode>, name: &QStr, dentry: &Arc<Dentry>, flags: LookupFlags) -> Result<bool, Errno> {
    if !dentry.flags().contains(DentryFlags::OP_REVALIDATE) {
        return Ok(true);
    }
    match dentry.d_op() {
        Some(ops) => ops.d_revalidate(dir, name, dentry, flags),
        None => Ok(true),
    }
}

/// 对应 __lookup_slow()：调用者持有目录的 i_rwsem
pub(crate) fn __lookup_slow(name: &QStr, dir: &Arc<Dentry>, inode: &Arc<Inode>, flags: LookupFlags) -> Result<DentryRef, Errno> {
    if inode.is_deaddir() {
        return Err(Errno::NoSuchFileOrDirectory);
    }
    if name.len() > NAME_MAX {
        return Err(Errno::NameTooLong);
    }
    loop {
        let dentry = d_alloc_parallel(dir, name)?;
        if !dentry.in_lookup() {
            // 别人已经查找过（或者本来就在缓存中）
            match d_revalidate(inode, name, &dentry, flags)? {
                true => return Ok(dentry),
                false => {
                    d_invalidate(&dentry);
                    continue;
                }
            }
        }
        let res = inode.i_op.lookup(inode, &dentry, flags);
        d_lookup_done(&dentry);
        return match res? {
            Some(alias) => Ok(alias),
            None => Ok(dentry),
        };
    }
}

/// 对应 lookup_slow()：共享持有目录锁后调用驱动
pub(crate) fn lookup_slow(name: &QStr, dir: &Arc<Dentry>, flags: LookupFlags) -> Result<DentryRef, Errno> {
    let inode = dir.inode().ok_or(Errno::NoSuchFileOrDirectory)?;
    let _guard = inode.lock_shared();
    __lookup_slow(name, dir, &inode, flags)
}

/// 对应 traverse_mounts()：引用模式下穿越挂载
///
/// 返回是否换到了另一个挂载。
fn traverse_mounts(path: &mut Path, count: &mut u32, lookup_flags: LookupFlags) -> Result<bool, Errno> {
    let mut flags = path.dentry().flags();
    if !flags.intersects(DentryFlags::MANAGED) {
        if path.dentry().is_negative() {
            return Err(Errno::NoSuchFileOrDirectory);
        }
        return Ok(false);
    }

    let mut jumped = false;
    let mut ret = Ok(());
    while flags.intersects(DentryFlags::MANAGED) {
        if flags.contains(DentryFlags::MANAGE_TRANSIT) {
            let res = match path.dentry().d_op() {
                Some(ops) => ops.d_manage(path.mnt(), path.dentry(), false),
                None => Ok(()),
            };
            flags = path.dentry().flags();
            if let Err(e) = res {
                ret = Err(e);
                break;
            }
        }

        if flags.contains(DentryFlags::MOUNTED) {
            if let Some(mounted) = lookup_mnt(path.mnt(), path.dentry()) {
                let root = DentryRef::get(mounted.root());
                #[cfg(feature = "debug_log")]
                log::trace!("namei: cross mount {}", mounted.id());
                *path = Path::new(mounted, root);
                jumped = true;
                flags = path.dentry().flags();
                continue;
            }
        }

        if !flags.contains(DentryFlags::NEED_AUTOMOUNT) {
            break;
        }
        let res = follow_automount(path, count, lookup_flags);
        flags = path.dentry().flags();
        if let Err(e) = res {
            ret = Err(e);
            break;
        }
    }

    match ret {
        // 穿越守卫要求把这里当作普通目录
        Ok(()) | Err(Errno::IsADirectory) => {}
        Err(e) => return Err(e),
    }
    if path.dentry().is_negative() {
        return Err(Errno::NoSuchFileOrDirectory);
    }
    Ok(jumped)
}

/// 对应 follow_automount()
fn follow_automount(path: &Path, count: &mut u32, lookup_flags: LookupFlags) -> Result<(), Errno> {
    // 只是 stat 一个已有的目录时不触发自动挂载
    let intent = LookupFlags::PARENT
        | LookupFlags::DIRECTORY
        | LookupFlags::OPEN
        | LookupFlags::CREATE
        | LookupFlags::AUTOMOUNT;
    if !lookup_flags.intersects(intent) && path.dentry().is_positive() {
        return Err(Errno::IsADirectory);
    }
    if *count >= MAXSYMLINKS {
        return Err(Errno::TooManySymbolicLinks);
    }
    *count += 1;

    let ops = path.dentry().d_op().ok_or(Errno::RemoteObject)?;
    finish_automount(ops.d_automount(path.mnt(), path.dentry())?, path)
}

/// 对应 finish_automount()
fn finish_automount(mnt: Option<MountRef>, path: &Path) -> Result<(), Errno> {
    // 别人已经挂好了
    let Some(mnt) = mnt else {
        return Ok(());
    };
    if Arc::ptr_eq(mnt.root(), path.dentry()) {
        return Err(Errno::TooManySymbolicLinks);
    }
    match do_add_mount(mnt, path) {
        Err(Errno::DeviceOrResourceBusy) => Ok(()),
        res => res,
    }
}

/// RCU → 引用 → 强制 revalidate 的重试阶梯
///
/// 每次尝试都从 `links` 的初值开始计数，结束后写回最后一次尝试的计数。
pub(crate) fn with_retries<T, F>(flags: LookupFlags, links: &mut u32, mut attempt: F) -> Result<T, Errno>
where
    F: FnMut(LookupFlags, &mut u32) -> Result<T, Errno>,
{
    let baseline = *links;
    let mut count = baseline;
    let mut res = attempt(flags | LookupFlags::RCU, &mut count);
    if matches!(res, Err(Errno::NoChild)) {
        #[cfg(feature = "debug_log")]
        log::trace!("namei: rcu walk failed, retrying with references");
        count = baseline;
        res = attempt(flags, &mut count);
    }
    if matches!(res, Err(Errno::StaleFileHandle)) {
        #[cfg(feature = "debug_log")]
        log::trace!("namei: stale handle, retrying with LOOKUP_REVAL");
        count = baseline;
        res = attempt(flags | LookupFlags::REVAL, &mut count);
    }
    *links = count;
    res
}

/// 对应 path_lookupat()
pub(crate) fn path_lookupat(start: &WalkStart<'_>, flags: LookupFlags, links: &mut u32) -> Result<Path, Errno> {
    let (mut nd, s) = NameiData::path_init(start, flags, *links)?;
    let res = nd.lookupat(s);
    *links = nd.total_link_count;
    res?;
    nd.into_path()
}

/// 对应 path_parentat()：返回父目录、最后一个分量及其类型
pub(crate) fn path_parentat(
    start: &WalkStart<'_>,
    flags: LookupFlags,
    links: &mut u32,
) -> Result<(Path, QStr, LastType), Errno> {
    let (mut nd, s) = NameiData::path_init(start, flags, *links)?;
    let res = nd.link_path_walk(s).and_then(|()| nd.complete_walk());
    *links = nd.total_link_count;
    res?;
    let last = nd.last.clone();
    let last_type = nd.last_type;
    Ok((nd.into_path()?, last, last_type))
}
