//! MIT License
//!
//! Copyright (c) 2026 Fei Wang
//!
//! 符号链接内容
//!
//! 对应 Linux fs/namei.c 中 get_link / readlink / page_symlink 相关部分
//!
//! 驱动的 `get_link()` 返回链接文本以及一个延迟释放动作（`DelayedCall`），
//! 动作在链接从遍历栈弹出时执行且只执行一次。魔法链接（如 /proc/self/fd/N）
//! 直接返回目标 `Path`。

use alloc::boxed::Box;
use alloc::sync::Arc;
use core::fmt;
use core::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use crate::config::PATH_MAX;
use crate::errno::Errno;
use crate::fs::dentry::Dentry;
use crate::fs::inode::Inode;
use crate::fs::path::{LookupFlags, Path};
use crate::process::Task;

/// 保存链接文本的内存页
///
/// 对应 page cache 中的一页；`pins` 为当前被遍历栈钉住的次数。
pub struct LinkPage {
    data: spin::RwLock<Arc<[u8]>>,
    uptodate: AtomicBool,
    pins: AtomicUsize,
}

impl LinkPage {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            data: spin::RwLock::new(Arc::from(&b""[..])),
            uptodate: AtomicBool::new(false),
            pins: AtomicUsize::new(0),
        })
    }

    /// 页内容是否在内存中（RCU 模式只能使用已在内存中的页）
    pub fn is_uptodate(&self) -> bool {
        self.uptodate.load(Ordering::Acquire)
    }

    /// 模拟页被回收，下次读取需要阻塞
    pub fn evict(&self) {
        self.uptodate.store(false, Ordering::Release);
    }

    pub fn pins(&self) -> usize {
        self.pins.load(Ordering::Acquire)
    }

    fn pin(&self) {
        self.pins.fetch_add(1, Ordering::AcqRel);
    }

    fn unpin(&self) {
        self.pins.fetch_sub(1, Ordering::AcqRel);
    }

    fn contents(&self) -> Arc<[u8]> {
        self.data.read().clone()
    }

    fn fill(&self, body: &[u8]) {
        *self.data.write() = Arc::from(body);
        self.uptodate.store(true, Ordering::Release);
    }
}

enum DelayedAction {
    /// 解除页的钉住（page_put_link）
    PutPage(Arc<LinkPage>),
    Call(Box<dyn FnOnce() + Send>),
}

/// 延迟释放动作
///
/// 对应 Linux 的 struct delayed_call；析构时执行。
#[derive(Default)]
pub struct DelayedCall {
    action: Option<DelayedAction>,
}

impl DelayedCall {
    /// 没有需要释放的资源
    pub const fn none() -> Self {
        Self { action: None }
    }

    pub fn put_page(page: Arc<LinkPage>) -> Self {
        Self {
            action: Some(DelayedAction::PutPage(page)),
        }
    }

    /// 对应 set_delayed_call()
    pub fn call<F: FnOnce() + Send + 'static>(f: F) -> Self {
        Self {
            action: Some(DelayedAction::Call(Box::new(f))),
        }
    }

    pub fn is_set(&self) -> bool {
        self.action.is_some()
    }

    /// 对应 do_delayed_call() + clear_delayed_call()
    pub fn run(&mut self) {
        match self.action.take() {
            None => {}
            Some(DelayedAction::PutPage(page)) => page_put_link(&page),
            Some(DelayedAction::Call(f)) => f(),
        }
    }
}

impl Drop for DelayedCall {
    fn drop(&mut self) {
        self.run();
    }
}

impl fmt::Debug for DelayedCall {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.action {
            None => f.write_str("None"),
            Some(DelayedAction::PutPage(page)) => write!(f, "PutPage(pins={})", page.pins()),
            Some(DelayedAction::Call(_)) => f.write_str("Call"),
        }
    }
}

/// `get_link()` 的结果
pub enum LinkBody {
    /// 链接文本，遍历从这里继续
    Text { body: Arc<[u8]>, done: DelayedCall },
    /// 魔法链接：直接跳到目标（对应 nd_jump_link()）
    Jump(Path),
}

impl LinkBody {
    /// 不需要释放动作的文本
    pub fn text(body: &[u8]) -> Self {
        LinkBody::Text {
            body: Arc::from(body),
            done: DelayedCall::none(),
        }
    }
}

impl fmt::Debug for LinkBody {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LinkBody::Text { body, .. } => f
                .debug_tuple("Text")
                .field(&alloc::string::String::from_utf8_lossy(body))
                .finish(),
            LinkBody::Jump(path) => f.debug_tuple("Jump").field(path).finish(),
        }
    }
}

/// 传给 `get_link()` 的遍历上下文
///
/// 取代 Linux 中的 current->nameidata：驱动需要在取得链接内容时做
/// 嵌套查找，就通过这里进行，嵌套查找与外层共享符号链接计数。
pub struct LinkContext<'a> {
    pub(crate) task: &'a Task,
    pub(crate) total_link_count: &'a mut u32,
    pub(crate) flags: LookupFlags,
}

impl<'a> LinkContext<'a> {
    pub(crate) fn new(task: &'a Task, total_link_count: &'a mut u32, flags: LookupFlags) -> Self {
        Self {
            task,
            total_link_count,
            flags,
        }
    }

    pub fn task(&self) -> &Task {
        self.task
    }

    /// 外层遍历是否处于 RCU 模式
    pub fn is_rcu(&self) -> bool {
        self.flags.contains(LookupFlags::RCU)
    }

    /// 到目前为止展开过的符号链接数
    pub fn link_count(&self) -> u32 {
        *self.total_link_count
    }

    /// 嵌套查找
    ///
    /// `start` 为 `None` 时相对于当前目录（或根目录，若 `name` 为绝对路径）。
    /// RCU 模式下不能进行，返回 `Err(Errno::NoChild)` 让外层切换到引用模式。
    pub fn lookup(&mut self, start: Option<&Path>, name: &[u8], flags: LookupFlags) -> Result<Path, Errno> {
        if self.is_rcu() {
            return Err(Errno::NoChild);
        }
        crate::fs::namei::nested_lookup(self.task, start, name, flags, self.total_link_count)
    }
}

/// 对应 readlink_copy()：超出 `buf` 的部分被截断
pub fn readlink_copy(buf: &mut [u8], link: &[u8]) -> usize {
    let len = core::cmp::min(buf.len(), link.len());
    buf[..len].copy_from_slice(&link[..len]);
    len
}

/// 对应 vfs_readlink()
pub fn vfs_readlink(task: &Task, dentry: &Arc<Dentry>, buf: &mut [u8]) -> Result<usize, Errno> {
    let inode = dentry.inode().ok_or(Errno::NoSuchFileOrDirectory)?;
    if let Some(res) = inode.i_op.readlink(dentry, buf) {
        return res;
    }
    if !inode.mode().is_symlink() {
        return Err(Errno::InvalidArgument);
    }
    task.lsm(|h| h.inode_readlink(dentry))?;

    if let Some(link) = inode.cached_link() {
        return Ok(readlink_copy(buf, &link));
    }
    match vfs_get_link(task, dentry)? {
        // `done` 在复制完成后析构
        LinkBody::Text { body, done: _done } => Ok(readlink_copy(buf, &body)),
        LinkBody::Jump(_) => Err(Errno::InvalidArgument),
    }
}

/// 对应 vfs_get_link()：在遍历之外取得链接内容
pub fn vfs_get_link(task: &Task, dentry: &Arc<Dentry>) -> Result<LinkBody, Errno> {
    let inode = dentry.inode().ok_or(Errno::NoSuchFileOrDirectory)?;
    if !inode.mode().is_symlink() {
        return Err(Errno::InvalidArgument);
    }
    if let Some(link) = inode.cached_link() {
        return Ok(LinkBody::Text {
            body: link,
            done: DelayedCall::none(),
        });
    }
    let mut count = 0;
    let mut ctx = LinkContext::new(task, &mut count, LookupFlags::empty());
    inode.i_op.get_link(&mut ctx, Some(dentry), &inode)
}

/// 对应 page_get_link()
///
/// RCU 模式（`dentry` 为 `None`）下页不在内存中时返回 `Err(Errno::NoChild)`。
pub fn page_get_link(dentry: Option<&Arc<Dentry>>, inode: &Inode, page: &Arc<LinkPage>) -> Result<LinkBody, Errno> {
    if !page.is_uptodate() {
        if dentry.is_none() {
            return Err(Errno::NoChild);
        }
        // 阻塞模式下相当于从存储读回；这里页内容一直保留在内存中
        if inode.size() == 0 {
            return Err(Errno::IOError);
        }
        page.uptodate.store(true, Ordering::Release);
    }
    page.pin();
    Ok(LinkBody::Text {
        body: page.contents(),
        done: DelayedCall::put_page(page.clone()),
    })
}

/// 对应 page_put_link()
pub fn page_put_link(page: &LinkPage) {
    page.unpin();
}

/// 对应 page_symlink()：把链接文本写入页，设置 i_size
pub fn page_symlink(inode: &Inode, page: &LinkPage, target: &[u8]) -> Result<(), Errno> {
    // 包括结尾的 NUL
    if target.len() + 1 > PATH_MAX {
        return Err(Errno::NameTooLong);
    }
    page.fill(target);
    inode.set_size(target.len() as u64);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs::inode::InodeMode;
    use crate::fs::rootfs::RootFs;
    use crate::process::Cred;

    #[test]
    fn test_delayed_call_runs_once() {
        let page = LinkPage::new();
        page.pin();
        let mut done = DelayedCall::put_page(page.clone());
        done.run();
        assert_eq!(page.pins(), 0);
        drop(done);
        assert_eq!(page.pins(), 0);
    }

    #[test]
    fn test_page_link_needs_blocking_when_evicted() {
        let fs = RootFs::new();
        let inode = fs.new_inode(InodeMode::S_IFLNK | 0o777, 0, 0);
        let page = LinkPage::new();
        page_symlink(&inode, &page, b"target").unwrap();
        assert_eq!(inode.size(), 6);

        page.evict();
        assert!(matches!(page_get_link(None, &inode, &page), Err(Errno::NoChild)));

        let root = fs.root_dentry();
        let body = page_get_link(Some(&root), &inode, &page).unwrap();
        assert_eq!(page.pins(), 1);
        match body {
            LinkBody::Text { body, .. } => assert_eq!(&body[..], b"target"),
            LinkBody::Jump(_) => panic!("unexpected jump"),
        }
        assert_eq!(page.pins(), 0);
    }

    #[test]
    fn test_readlink_truncates() {
        let fs = RootFs::new();
        let root = fs.root_dentry();
        fs.symlink_raw(&root, b"l", b"0123456789");
        let task = fs.task(Cred::root());
        let link = crate::fs::dentry::d_lookup(&root, &crate::fs::dentry::QStr::for_parent(&root, b"l")).unwrap();

        let mut buf = [0u8; 4];
        assert_eq!(vfs_readlink(&task, &link, &mut buf), Ok(4));
        assert_eq!(&buf, b"0123");
        let mut buf = [0u8; 32];
        assert_eq!(vfs_readlink(&task, &link, &mut buf), Ok(10));
        assert_eq!(vfs_readlink(&task, &root, &mut buf), Err(Errno::InvalidArgument));
    }
}
