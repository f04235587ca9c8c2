//! MIT License
//!
//! Copyright (c) 2026 Fei Wang
//!
//! 按路径打开

use super::*;
use crate::fs::inode::{InodeMode, InodeState};
use crate::fs::open::{
    build_open_flags, do_file_open_root, do_sys_open, do_sys_openat2, filp_open, FMode, OpenFlags, OpenHow,
    OpenedFile, ResolveFlags,
};

fn open(task: &Task, name: &str, flags: OpenFlags, mode: u32) -> Result<OpenedFile, Errno> {
    filp_open(task, name, flags.bits(), mode)
}

/// openat2，受限遍历遇到并发的挂载或 rename 时重试
fn openat2(task: &Task, dfd: &Path, name: &[u8], how: &OpenHow) -> Result<OpenedFile, Errno> {
    loop {
        match do_sys_openat2(task, Some(dfd), name, how) {
            Err(Errno::TryAgain) if how.resolve & ResolveFlags::CACHED.bits() == 0 => continue,
            res => return res,
        }
    }
}

#[test]
fn test_open_create() {
    let fs = RootFs::new();
    let root = fs.root_dentry();
    fs.mkdir_raw(&root, b"dir", 0o755);
    let task = fs.task(Cred::root());
    let creat = OpenFlags::O_CREAT | OpenFlags::O_WRONLY;

    // 测试 1: 新建，权限位经过 umask
    let file = open(&task, "/new", creat, 0o666).unwrap();
    assert!(file.is_created());
    assert_eq!(file.inode().unwrap().mode().bits(), InodeMode::S_IFREG | 0o644);
    assert!(resolve(&task, "/new").is_ok());

    // 测试 2: 已经存在时只是打开
    let again = open(&task, "/new", creat, 0o666).unwrap();
    assert!(!again.is_created());
    assert!(Arc::ptr_eq(again.path.dentry(), file.path.dentry()));

    // 测试 3: O_EXCL
    assert_eq!(
        open(&task, "/new", creat | OpenFlags::O_EXCL, 0o666).err(),
        Some(Errno::FileExists)
    );
    let excl = open(&task, "/other", creat | OpenFlags::O_EXCL, 0o600).unwrap();
    assert!(excl.is_created());

    // 测试 4: 目录与结尾的 `/`
    assert_eq!(open(&task, "/dir", creat, 0o644).err(), Some(Errno::IsADirectory));
    assert_eq!(open(&task, "/fresh/", creat, 0o644).err(), Some(Errno::IsADirectory));
    assert_eq!(open(&task, "/missing/new", creat, 0o644).err(), Some(Errno::NoSuchFileOrDirectory));
}

#[test]
fn test_open_without_create() {
    let fs = RootFs::new();
    let root = fs.root_dentry();
    let f = fs.create_raw(&root, b"f", 0o644);
    let task = fs.task(Cred::root());

    let file = open(&task, "/f", OpenFlags::O_RDONLY, 0).unwrap();
    assert!(Arc::ptr_eq(file.path.dentry(), &f));
    assert!(file.mode.contains(FMode::OPENED));
    assert_eq!(open(&task, "/nothing", OpenFlags::O_RDONLY, 0).err(), Some(Errno::NoSuchFileOrDirectory));
}

#[test]
fn test_open_truncate() {
    let fs = RootFs::new();
    let root = fs.root_dentry();
    let inode = fs.create_raw(&root, b"f", 0o644).inode().unwrap();
    inode.set_size(100);
    let task = fs.task(Cred::root());

    open(&task, "/f", OpenFlags::O_RDONLY, 0).unwrap();
    assert_eq!(inode.size(), 100);
    open(&task, "/f", OpenFlags::O_WRONLY | OpenFlags::O_TRUNC, 0).unwrap();
    assert_eq!(inode.size(), 0);
}

#[test]
fn test_open_directory_checks() {
    let fs = RootFs::new();
    let root = fs.root_dentry();
    fs.create_raw(&root, b"f", 0o644);
    let d = fs.mkdir_raw(&root, b"d", 0o755);
    let task = fs.task(Cred::root());

    assert_eq!(open(&task, "/f", OpenFlags::O_DIRECTORY, 0).err(), Some(Errno::NotADirectory));
    assert_eq!(open(&task, "/f/", OpenFlags::O_RDONLY, 0).err(), Some(Errno::NotADirectory));
    assert_eq!(open(&task, "/d", OpenFlags::O_WRONLY, 0).err(), Some(Errno::IsADirectory));
    assert_eq!(open(&task, "/d", OpenFlags::O_RDWR, 0).err(), Some(Errno::IsADirectory));

    let dir = open(&task, "/d", OpenFlags::O_DIRECTORY, 0).unwrap();
    assert!(Arc::ptr_eq(dir.path.dentry(), &d));
    // `.` 与 `..` 作为最后一个分量
    let dir = open(&task, "/d/.", OpenFlags::O_RDONLY, 0).unwrap();
    assert!(Arc::ptr_eq(dir.path.dentry(), &d));
    let dir = open(&task, "/d/..", OpenFlags::O_RDONLY, 0).unwrap();
    assert!(Arc::ptr_eq(dir.path.dentry(), &root));
}

#[test]
fn test_open_symlinks() {
    let fs = RootFs::new();
    let root = fs.root_dentry();
    let target = fs.create_raw(&root, b"target", 0o644);
    let link = fs.symlink_raw(&root, b"link", b"target");
    fs.symlink_raw(&root, b"dangling", b"created");
    let task = fs.task(Cred::root());

    let file = open(&task, "/link", OpenFlags::O_RDONLY, 0).unwrap();
    assert!(Arc::ptr_eq(file.path.dentry(), &target));

    // O_NOFOLLOW 拒绝结尾的链接
    assert_eq!(
        open(&task, "/link", OpenFlags::O_NOFOLLOW, 0).err(),
        Some(Errno::TooManySymbolicLinks)
    );
    // O_PATH | O_NOFOLLOW 得到链接本身
    let file = open(&task, "/link", OpenFlags::O_PATH | OpenFlags::O_NOFOLLOW, 0).unwrap();
    assert!(Arc::ptr_eq(file.path.dentry(), &link));
    assert!(file.mode.contains(FMode::PATH));

    // O_CREAT 穿过悬空的链接创建目标，O_EXCL 不跟随
    let creat = OpenFlags::O_CREAT | OpenFlags::O_WRONLY;
    assert_eq!(
        open(&task, "/dangling", creat | OpenFlags::O_EXCL, 0o644).err(),
        Some(Errno::FileExists)
    );
    let file = open(&task, "/dangling", creat, 0o644).unwrap();
    assert!(file.is_created());
    let created = resolve(&task, "/created").unwrap();
    assert!(Arc::ptr_eq(created.dentry(), file.path.dentry()));
}

#[test]
fn test_open_on_readonly_mount() {
    let _mounts = lock_mount_table();
    let host = RootFs::new();
    let mnt_dir = host.mkdir_raw(&host.root_dentry(), b"mnt", 0o755);
    let guest = RootFs::new();
    guest.create_raw(&guest.root_dentry(), b"g", 0o644);
    mount_on(&host, &mnt_dir, &guest, MntFlags::READONLY);
    let task = host.task(Cred::root());
    let creat = OpenFlags::O_CREAT | OpenFlags::O_WRONLY;

    assert_eq!(open(&task, "/mnt/new", creat, 0o644).err(), Some(Errno::ReadOnlyFileSystem));
    // 已存在的文件不需要写挂载
    let file = open(&task, "/mnt/g", OpenFlags::O_CREAT, 0o644).unwrap();
    assert!(!file.is_created());
    assert!(open(&task, "/mnt/g", OpenFlags::O_RDONLY, 0).is_ok());
    assert_eq!(
        open(&task, "/mnt/g", OpenFlags::O_WRONLY | OpenFlags::O_TRUNC, 0).err(),
        Some(Errno::ReadOnlyFileSystem)
    );
    // 只读挂载上找不到的名字仍是 ENOENT
    assert_eq!(
        open(&task, "/mnt/none", OpenFlags::O_RDONLY, 0).err(),
        Some(Errno::NoSuchFileOrDirectory)
    );
}

#[test]
fn test_open_tmpfile() {
    let fs = RootFs::new();
    let root = fs.root_dentry();
    fs.mkdir_raw(&root, b"d", 0o755);
    fs.create_raw(&root, b"f", 0o644);
    let task = fs.task(Cred::root());

    let file = open(&task, "/d", OpenFlags::O_TMPFILE | OpenFlags::O_RDWR, 0o600).unwrap();
    let inode = file.inode().unwrap();
    assert_eq!(inode.nlink(), 0);
    assert!(inode.state().contains(InodeState::I_LINKABLE));
    assert!(Arc::ptr_eq(&file.path.dentry().parent().unwrap(), &child(&root, b"d").unwrap()));

    assert_eq!(
        open(&task, "/f", OpenFlags::O_TMPFILE | OpenFlags::O_RDWR, 0o600).err(),
        Some(Errno::NotADirectory)
    );
    // 只读的 O_TMPFILE 没有意义
    assert_eq!(
        open(&task, "/d", OpenFlags::O_TMPFILE, 0o600).err(),
        Some(Errno::InvalidArgument)
    );
}

#[test]
fn test_atomic_open_driver() {
    let fs = RootFs::new();
    fs.enable_atomic_open();
    let task = fs.task(Cred::root());

    let file = open(&task, "/a", OpenFlags::O_CREAT | OpenFlags::O_RDWR, 0o644).unwrap();
    assert!(file.is_created());
    assert!(file.path.dentry().is_reg());

    let again = open(&task, "/a", OpenFlags::O_RDONLY, 0).unwrap();
    assert!(!again.is_created());
    assert_eq!(open(&task, "/b", OpenFlags::O_RDONLY, 0).err(), Some(Errno::NoSuchFileOrDirectory));
}

#[test]
fn test_open_permissions() {
    let fs = RootFs::new();
    let root = fs.root_dentry();
    fs.create_raw(&root, b"secret", 0o600);
    fs.create_raw(&root, b"public", 0o644);
    let user = fs.task(Cred::user(1000, 1000));

    assert_eq!(open(&user, "/secret", OpenFlags::O_RDONLY, 0).err(), Some(Errno::PermissionDenied));
    // O_PATH 不检查文件本身的权限
    assert!(open(&user, "/secret", OpenFlags::O_PATH, 0).is_ok());
    assert!(open(&user, "/public", OpenFlags::O_RDONLY, 0).is_ok());
    assert_eq!(open(&user, "/public", OpenFlags::O_WRONLY, 0).err(), Some(Errno::PermissionDenied));
    // 不是属主不能 O_NOATIME
    assert_eq!(
        open(&user, "/public", OpenFlags::O_NOATIME, 0).err(),
        Some(Errno::OperationNotPermitted)
    );
}

#[test]
fn test_open_from_root() {
    let fs = RootFs::new();
    let root = fs.root_dentry();
    let jail = fs.mkdir_raw(&root, b"jail", 0o755);
    let inner = fs.create_raw(&jail, b"f", 0o644);
    fs.create_raw(&root, b"f", 0o644);
    let task = fs.task(Cred::root());
    let op = build_open_flags(&OpenHow::new(OpenFlags::O_RDONLY, 0)).unwrap();
    let jail_path = fs.path_of(&jail);

    // 绝对路径与 `..` 都不会离开给定的根
    for name in ["/f", "f", "/../f", "../../f"] {
        let file = do_file_open_root(&task, &jail_path, name, &op).unwrap();
        assert!(Arc::ptr_eq(file.path.dentry(), &inner), "{}", name);
    }
}

#[test]
fn test_openat2_resolve_flags() {
    let fs = RootFs::new();
    let root = fs.root_dentry();
    let jail = fs.mkdir_raw(&root, b"jail", 0o755);
    let inner = fs.create_raw(&jail, b"outside", 0o644);
    fs.create_raw(&root, b"outside", 0o644);
    let task = fs.task(Cred::root());
    let dfd = fs.path_of(&jail);
    let plain = OpenHow::new(OpenFlags::O_RDONLY, 0);

    let file = openat2(&task, &dfd, b"/outside", &plain.with_resolve(ResolveFlags::IN_ROOT)).unwrap();
    assert!(Arc::ptr_eq(file.path.dentry(), &inner));
    assert_eq!(
        openat2(&task, &dfd, b"../outside", &plain.with_resolve(ResolveFlags::BENEATH)).err(),
        Some(Errno::CrossDeviceLink)
    );

    // 标志校验
    assert_eq!(
        openat2(&task, &dfd, b"outside", &plain.with_resolve(ResolveFlags::BENEATH | ResolveFlags::IN_ROOT)).err(),
        Some(Errno::InvalidArgument)
    );
    let unknown = OpenHow {
        resolve: 0x100,
        ..plain
    };
    assert_eq!(openat2(&task, &dfd, b"outside", &unknown).err(), Some(Errno::InvalidArgument));
    let cached_create =
        OpenHow::new(OpenFlags::O_CREAT | OpenFlags::O_WRONLY, 0o644).with_resolve(ResolveFlags::CACHED);
    assert_eq!(openat2(&task, &dfd, b"new", &cached_create).err(), Some(Errno::TryAgain));
    // openat2 不忽略多余的 mode
    let stray_mode = OpenHow::new(OpenFlags::O_RDONLY, 0o644);
    assert_eq!(openat2(&task, &dfd, b"outside", &stray_mode).err(), Some(Errno::InvalidArgument));
    // 旧式 open 则忽略
    assert!(do_sys_open(&task, Some(&dfd), b"outside", OpenFlags::O_RDONLY.bits(), 0o644).is_ok());
}
