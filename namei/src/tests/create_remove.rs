//! MIT License
//!
//! Copyright (c) 2026 Fei Wang
//!
//! 创建与删除

use core::sync::atomic::{AtomicUsize, Ordering};

use super::*;
use crate::fs::inode::{Delegation, InodeMode, InodeState};
use crate::fs::link::vfs_readlink;
use crate::fs::namei::{
    do_linkat, do_mkdirat, do_mknodat, do_rmdir, do_symlinkat, do_unlinkat, do_unlinkat_flags, AT_EMPTY_PATH,
    AT_REMOVEDIR,
};
use crate::fs::open::{vfs_tmpfile, OpenFlags};
use crate::process::Capabilities;

#[test]
fn test_mkdir_and_rmdir() {
    let fs = RootFs::new();
    let task = fs.task(Cred::root());

    // 测试 1: 权限位经过 umask
    assert_eq!(do_mkdirat(&task, None, &pn("/d"), 0o777), Ok(()));
    let d = resolve(&task, "/d").unwrap();
    let inode = d.inode().unwrap();
    assert_eq!(inode.mode().bits(), InodeMode::S_IFDIR | 0o755);
    assert_eq!(fs.root_inode().nlink(), 3);

    // 测试 2: 已经存在
    assert_eq!(do_mkdirat(&task, None, &pn("/d"), 0o755), Err(Errno::FileExists));
    assert_eq!(do_mkdirat(&task, None, &pn("/"), 0o755), Err(Errno::FileExists));
    // 结尾的 `/` 对 mkdir 合法
    assert_eq!(do_mkdirat(&task, None, &pn("/d/e/"), 0o755), Ok(()));

    // 测试 3: rmdir 的各种失败
    assert_eq!(do_rmdir(&task, None, &pn("/d")), Err(Errno::DirectoryNotEmpty));
    assert_eq!(do_rmdir(&task, None, &pn("/d/.")), Err(Errno::InvalidArgument));
    assert_eq!(do_rmdir(&task, None, &pn("/d/e/..")), Err(Errno::DirectoryNotEmpty));
    assert_eq!(do_rmdir(&task, None, &pn("/d/missing")), Err(Errno::NoSuchFileOrDirectory));

    assert_eq!(do_rmdir(&task, None, &pn("/d/e")), Ok(()));
    assert_eq!(do_unlinkat_flags(&task, None, &pn("/d"), AT_REMOVEDIR), Ok(()));
    assert_eq!(resolve(&task, "/d").err(), Some(Errno::NoSuchFileOrDirectory));
    assert_eq!(fs.root_inode().nlink(), 2);
    assert!(inode.is_deaddir());
}

#[test]
fn test_mkdir_relative_to_dfd() {
    let fs = RootFs::new();
    let root = fs.root_dentry();
    let a = fs.mkdir_raw(&root, b"a", 0o755);
    let task = fs.task(Cred::root());
    let dfd = fs.path_of(&a);

    assert_eq!(do_mkdirat(&task, Some(&dfd), &pn("sub"), 0o700), Ok(()));
    let sub = child(&a, b"sub").unwrap();
    assert!(sub.is_dir());
    assert!(Arc::ptr_eq(&sub.parent().unwrap(), &a));
}

#[test]
fn test_mknod_and_unlink() {
    let fs = RootFs::new();
    let root = fs.root_dentry();
    fs.mkdir_raw(&root, b"dir", 0o755);
    fs.mkdir_raw(&root, b"pub", 0o777);
    let task = fs.task(Cred::root());

    assert_eq!(do_mknodat(&task, None, &pn("/fifo"), InodeMode::S_IFIFO | 0o644, 0), Ok(()));
    assert!(resolve(&task, "/fifo").unwrap().inode().unwrap().mode().is_fifo());
    // 类型为 0 即普通文件
    assert_eq!(do_mknodat(&task, None, &pn("/plain"), 0o644, 0), Ok(()));
    assert!(resolve(&task, "/plain").unwrap().dentry().is_reg());
    // mknod 不能建目录
    assert_eq!(
        do_mknodat(&task, None, &pn("/x"), InodeMode::S_IFDIR | 0o755, 0),
        Err(Errno::OperationNotPermitted)
    );
    assert_eq!(
        do_mknodat(&task, None, &pn("/x"), InodeMode::S_IFLNK | 0o777, 0),
        Err(Errno::InvalidArgument)
    );

    // 普通用户不能建设备
    let user = fs.task(Cred::user(1000, 1000));
    assert_eq!(
        do_mknodat(&user, None, &pn("/pub/tty"), InodeMode::S_IFCHR | 0o600, 0x0501),
        Err(Errno::OperationNotPermitted)
    );

    assert_eq!(do_unlinkat(&task, None, &pn("/dir")), Err(Errno::IsADirectory));
    assert_eq!(do_unlinkat(&task, None, &pn("/fifo/")), Err(Errno::NotADirectory));
    assert_eq!(do_rmdir(&task, None, &pn("/fifo")), Err(Errno::NotADirectory));
    assert_eq!(do_unlinkat(&task, None, &pn("/fifo")), Ok(()));
    assert_eq!(resolve(&task, "/fifo").err(), Some(Errno::NoSuchFileOrDirectory));
    assert_eq!(do_unlinkat(&task, None, &pn("/fifo")), Err(Errno::NoSuchFileOrDirectory));
}

#[test]
fn test_create_needs_write_on_parent() {
    let fs = RootFs::new();
    let root = fs.root_dentry();
    fs.mkdir_raw(&root, b"ro", 0o755);
    let user = fs.task(Cred::user(1000, 1000));

    assert_eq!(do_mkdirat(&user, None, &pn("/ro/x"), 0o755), Err(Errno::PermissionDenied));
    assert_eq!(do_mknodat(&user, None, &pn("/ro/x"), 0o644, 0), Err(Errno::PermissionDenied));
}

#[test]
fn test_symlink_and_readlink() {
    let fs = RootFs::new();
    let root = fs.root_dentry();
    let target = fs.create_raw(&root, b"target", 0o644);
    let task = fs.task(Cred::root());

    assert_eq!(do_symlinkat(&task, &pn("target"), None, &pn("/link")), Ok(()));
    let link = kern_path(&task, "/link", LookupFlags::empty()).unwrap();
    assert!(link.dentry().is_symlink());

    let mut buf = [0u8; 64];
    let len = vfs_readlink(&task, link.dentry(), &mut buf).unwrap();
    assert_eq!(&buf[..len], b"target");
    // 缓冲区不够时截断
    let mut short = [0u8; 3];
    assert_eq!(vfs_readlink(&task, link.dentry(), &mut short), Ok(3));
    assert_eq!(&short, b"tar");
    // 不是链接
    assert_eq!(
        vfs_readlink(&task, &target, &mut buf),
        Err(Errno::InvalidArgument)
    );

    let path = resolve(&task, "/link").unwrap();
    assert!(Arc::ptr_eq(path.dentry(), &target));
    assert_eq!(do_symlinkat(&task, &pn("x"), None, &pn("/link")), Err(Errno::FileExists));
}

#[test]
fn test_hard_links() {
    let fs = RootFs::new();
    let root = fs.root_dentry();
    let d = fs.mkdir_raw(&root, b"d", 0o755);
    let f = fs.create_raw(&d, b"f", 0o644).inode().unwrap();
    let task = fs.task(Cred::root());

    assert_eq!(do_linkat(&task, None, &pn("/d/f"), None, &pn("/g"), 0), Ok(()));
    assert_eq!(f.nlink(), 2);
    let g = resolve(&task, "/g").unwrap();
    assert!(Arc::ptr_eq(&g.inode().unwrap(), &f));

    // 目录不能链接
    assert_eq!(
        do_linkat(&task, None, &pn("/d"), None, &pn("/d2"), 0),
        Err(Errno::OperationNotPermitted)
    );
    assert_eq!(do_linkat(&task, None, &pn("/d/f"), None, &pn("/g"), 0), Err(Errno::FileExists));
    assert_eq!(do_linkat(&task, None, &pn("/d/f"), None, &pn("/g"), 0x1), Err(Errno::InvalidArgument));

    // 删除一个名字，另一个仍在
    assert_eq!(do_unlinkat(&task, None, &pn("/d/f")), Ok(()));
    assert_eq!(f.nlink(), 1);
    assert!(resolve(&task, "/g").is_ok());
}

#[test]
fn test_link_across_mounts() {
    let _mounts = lock_mount_table();
    let host = RootFs::new();
    let mnt_dir = host.mkdir_raw(&host.root_dentry(), b"mnt", 0o755);
    let guest = RootFs::new();
    guest.create_raw(&guest.root_dentry(), b"g", 0o644);
    mount_on(&host, &mnt_dir, &guest, MntFlags::empty());
    let task = host.task(Cred::root());

    assert_eq!(
        do_linkat(&task, None, &pn("/mnt/g"), None, &pn("/h"), 0),
        Err(Errno::CrossDeviceLink)
    );
}

#[test]
fn test_link_empty_path() {
    let fs = RootFs::new();
    let root = fs.root_dentry();
    let f = fs.create_raw(&root, b"f", 0o644);
    let dfd = fs.path_of(&f);

    // 没有 CAP_DAC_READ_SEARCH 的调用者看不到空路径
    let user = fs.task(Cred::user(1000, 1000));
    assert_eq!(
        do_linkat(&user, Some(&dfd), &empty(), None, &pn("/alias"), AT_EMPTY_PATH),
        Err(Errno::NoSuchFileOrDirectory)
    );

    let task = fs.task(Cred::root());
    assert_eq!(do_linkat(&task, Some(&dfd), &empty(), None, &pn("/alias"), AT_EMPTY_PATH), Ok(()));
    assert_eq!(f.inode().unwrap().nlink(), 2);
}

#[test]
fn test_tmpfile_linked_in_later() {
    let fs = RootFs::new();
    let root = fs.root_dentry();
    let d = fs.mkdir_raw(&root, b"d", 0o755);
    let task = fs.task(Cred::root());
    let dir = fs.path_of(&d);

    // 测试 1: 无名文件可以链接进目录树
    let opened = vfs_tmpfile(&task, &dir, 0o600, OpenFlags::O_RDWR).unwrap();
    let inode = opened.inode().unwrap();
    assert_eq!(inode.nlink(), 0);
    assert!(inode.mode().is_regular_file());
    assert!(inode.state().contains(InodeState::I_LINKABLE));

    assert_eq!(
        do_linkat(&task, Some(&opened.path), &empty(), None, &pn("/d/named"), AT_EMPTY_PATH),
        Ok(())
    );
    assert_eq!(inode.nlink(), 1);
    assert!(!inode.state().contains(InodeState::I_LINKABLE));
    let named = resolve(&task, "/d/named").unwrap();
    assert!(Arc::ptr_eq(&named.inode().unwrap(), &inode));

    // 测试 2: O_EXCL 的无名文件永远不能链接
    let opened = vfs_tmpfile(&task, &dir, 0o600, OpenFlags::O_RDWR | OpenFlags::O_EXCL).unwrap();
    assert_eq!(
        do_linkat(&task, Some(&opened.path), &empty(), None, &pn("/d/never"), AT_EMPTY_PATH),
        Err(Errno::NoSuchFileOrDirectory)
    );
}

#[test]
fn test_too_many_links() {
    let fs = RootFs::with_max_links(3);
    let task = fs.task(Cred::root());

    // 根目录已有两个链接，再多一个子目录就到上限
    assert_eq!(do_mkdirat(&task, None, &pn("/a"), 0o755), Ok(()));
    assert_eq!(do_mkdirat(&task, None, &pn("/b"), 0o755), Err(Errno::TooManyLinks));

    assert_eq!(do_mknodat(&task, None, &pn("/f"), 0o644, 0), Ok(()));
    assert_eq!(do_linkat(&task, None, &pn("/f"), None, &pn("/f2"), 0), Ok(()));
    assert_eq!(do_linkat(&task, None, &pn("/f"), None, &pn("/f3"), 0), Ok(()));
    assert_eq!(do_linkat(&task, None, &pn("/f"), None, &pn("/f4"), 0), Err(Errno::TooManyLinks));
}

#[test]
fn test_unlink_breaks_delegation() {
    let fs = RootFs::new();
    let root = fs.root_dentry();
    let f = fs.create_raw(&root, b"f", 0o644).inode().unwrap();
    let recalls = Arc::new(AtomicUsize::new(0));
    let counter = recalls.clone();
    f.set_delegation(Delegation::new(move || {
        counter.fetch_add(1, Ordering::AcqRel);
    }));
    let task = fs.task(Cred::root());

    assert_eq!(do_unlinkat(&task, None, &pn("/f")), Ok(()));
    assert_eq!(recalls.load(Ordering::Acquire), 1);
    assert!(!f.has_delegation());
    assert_eq!(f.nlink(), 0);
    assert_eq!(resolve(&task, "/f").err(), Some(Errno::NoSuchFileOrDirectory));
}

#[test]
fn test_umask_applies_to_new_files() {
    let fs = RootFs::new();
    let task = fs.task(Cred::root());
    task.fs.set_umask(0o077);

    assert_eq!(do_mknodat(&task, None, &pn("/f"), 0o666, 0), Ok(()));
    let inode = resolve(&task, "/f").unwrap().inode().unwrap();
    assert_eq!(inode.mode().bits(), InodeMode::S_IFREG | 0o600);
}

#[test]
fn test_remove_root_and_mountpoints_is_busy() {
    let _mounts = lock_mount_table();
    let host = RootFs::new();
    let root = host.root_dentry();
    let mnt_dir = host.mkdir_raw(&root, b"mnt", 0o755);
    let src = host.create_raw(&root, b"src", 0o644);
    let target = host.create_raw(&root, b"target", 0o644);
    let guest = RootFs::new();
    mount_on(&host, &mnt_dir, &guest, MntFlags::empty());
    let bind = VfsMount::bind(&host.path_of(&src), MntFlags::empty());
    do_add_mount(bind, &host.path_of(&target)).unwrap();
    let task = host.task(Cred::root());

    // 测试 1: 根目录
    assert_eq!(do_rmdir(&task, None, &pn("/")), Err(Errno::DeviceOrResourceBusy));
    assert!(resolve(&task, "/").is_ok());

    // 测试 2: 被挂载的空目录
    assert_eq!(do_rmdir(&task, None, &pn("/mnt")), Err(Errno::DeviceOrResourceBusy));
    let still = child(&root, b"mnt").unwrap();
    assert!(Arc::ptr_eq(&still, &mnt_dir));
    assert!(mnt_dir.is_mountpoint());
    assert!(!mnt_dir.inode().unwrap().is_deaddir());

    // 测试 3: 被绑定挂载覆盖的文件
    assert_eq!(do_unlinkat(&task, None, &pn("/target")), Err(Errno::DeviceOrResourceBusy));
    let still = child(&root, b"target").unwrap();
    assert!(Arc::ptr_eq(&still, &target));
    assert!(target.is_mountpoint());
    assert_eq!(target.inode().unwrap().nlink(), 1);
}

#[test]
fn test_link_empty_path_flag_needs_capability_from_dfd() {
    let fs = RootFs::new();
    let root = fs.root_dentry();
    let public = fs.mkdir_raw(&root, b"pub", 0o777);
    let mine = fs.create_raw(&public, b"mine", 0o644);
    mine.inode().unwrap().set_owner(1000, 1000);
    let dfd = fs.path_of(&public);
    let user = fs.task(Cred::user(1000, 1000));

    // 带 AT_EMPTY_PATH 时，即使名字不空也按 dfd 来源检查
    assert_eq!(
        do_linkat(&user, Some(&dfd), &pn("mine"), None, &pn("/pub/a"), AT_EMPTY_PATH),
        Err(Errno::NoSuchFileOrDirectory)
    );
    assert_eq!(do_linkat(&user, Some(&dfd), &pn("mine"), None, &pn("/pub/a"), 0), Ok(()));

    // 从当前目录或绝对路径出发不涉及 dfd
    assert_eq!(do_linkat(&user, None, &pn("/pub/mine"), None, &pn("/pub/b"), AT_EMPTY_PATH), Ok(()));

    let reader = fs.task(Cred::user(1000, 1000).with_caps(Capabilities::DAC_READ_SEARCH));
    assert_eq!(
        do_linkat(&reader, Some(&dfd), &pn("mine"), None, &pn("/pub/c"), AT_EMPTY_PATH),
        Ok(())
    );
    assert_eq!(mine.inode().unwrap().nlink(), 4);
}
