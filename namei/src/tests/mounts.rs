//! MIT License
//!
//! Copyright (c) 2026 Fei Wang
//!
//! 挂载穿越与受限遍历

use super::*;
use crate::fs::dentry::DentryFlags;
use crate::fs::mount::{umount, UmountFlags};

/// 受限遍历在并发的挂载或 rename 之后返回 EAGAIN，调用者重试
fn scoped(task: &Task, start: &Path, name: &str, flags: LookupFlags) -> Result<Path, Errno> {
    loop {
        match resolve_at(task, Some(start), name, flags) {
            Err(Errno::TryAgain) => continue,
            res => return res,
        }
    }
}

#[test]
fn test_cross_mount_down_and_up() {
    let _mounts = lock_mount_table();
    let host = RootFs::new();
    let root = host.root_dentry();
    let mnt_dir = host.mkdir_raw(&root, b"mnt", 0o755);
    let guest = RootFs::new();
    let g = guest.create_raw(&guest.root_dentry(), b"g", 0o644);
    let guest_mnt = mount_on(&host, &mnt_dir, &guest, MntFlags::empty());
    let task = host.task(Cred::root());

    // 测试 1: 向下进入挂载
    let path = resolve(&task, "/mnt/g").unwrap();
    assert!(Arc::ptr_eq(path.dentry(), &g));
    assert!(Arc::ptr_eq(path.mnt(), &guest_mnt));

    let path = resolve(&task, "/mnt").unwrap();
    assert!(Arc::ptr_eq(path.dentry(), guest_mnt.root()));

    // 测试 2: `..` 从挂载根回到挂载点的父目录
    let path = resolve(&task, "/mnt/..").unwrap();
    assert!(Arc::ptr_eq(path.dentry(), &root));
    assert!(Arc::ptr_eq(path.mnt(), host.root_mnt()));

    // 测试 3: 不允许穿越
    assert_eq!(
        resolve_at(&task, None, "/mnt/g", LookupFlags::NO_XDEV).err(),
        Some(Errno::CrossDeviceLink)
    );
    let start = Path::get(&guest_mnt, guest_mnt.root());
    assert_eq!(
        resolve_at(&task, Some(&start), "..", LookupFlags::NO_XDEV).err(),
        Some(Errno::CrossDeviceLink)
    );
}

#[test]
fn test_stacked_mounts_show_top() {
    let _mounts = lock_mount_table();
    let host = RootFs::new();
    let mnt_dir = host.mkdir_raw(&host.root_dentry(), b"mnt", 0o755);
    let lower = RootFs::new();
    lower.create_raw(&lower.root_dentry(), b"lower", 0o644);
    mount_on(&host, &mnt_dir, &lower, MntFlags::empty());

    let upper = RootFs::new();
    upper.create_raw(&upper.root_dentry(), b"upper", 0o644);
    let task = host.task(Cred::root());
    // 挂到已经是挂载点的位置上
    let under = resolve(&task, "/mnt").unwrap();
    let upper_mnt = VfsMount::new(upper.root_ref(), MntFlags::empty());
    let upper_arc = upper_mnt.as_arc().clone();
    do_add_mount(upper_mnt, &under).unwrap();
    drop(under);

    assert!(resolve(&task, "/mnt/upper").is_ok());
    assert_eq!(resolve(&task, "/mnt/lower").err(), Some(Errno::NoSuchFileOrDirectory));

    // 卸载之后露出下面的
    let top = Path::get(&upper_arc, upper_arc.root());
    umount(&top, UmountFlags::empty()).unwrap();
    drop(top);
    assert!(resolve(&task, "/mnt/lower").is_ok());
}

#[test]
fn test_mountpoint_lookup_ends_on_mounted_root() {
    let _mounts = lock_mount_table();
    let host = RootFs::new();
    let mnt_dir = host.mkdir_raw(&host.root_dentry(), b"mnt", 0o755);
    let guest = RootFs::new();
    mount_on(&host, &mnt_dir, &guest, MntFlags::empty());
    let task = host.task(Cred::root());

    // umount 使用的查找：结果是最上层挂载的根
    let path = resolve_at(&task, None, "/mnt", LookupFlags::MOUNTPOINT).unwrap();
    assert!(path.dentry().is_root());
    assert!(Arc::ptr_eq(path.mnt().root(), path.dentry()));
    assert!(!Arc::ptr_eq(path.mnt(), host.root_mnt()));
}

#[test]
fn test_automount_on_intent() {
    let _mounts = lock_mount_table();
    let host = RootFs::with_dentry_ops();
    let auto = host.mkdir_raw(&host.root_dentry(), b"auto", 0o755);
    let guest = RootFs::new();
    let g = guest.create_raw(&guest.root_dentry(), b"g", 0o644);
    let ops = host.dentry_ops().unwrap();
    ops.set_automount(&auto, VfsMount::new(guest.root_ref(), MntFlags::empty()));
    let task = host.task(Cred::root());

    // 只是查看目录本身时不触发
    let path = resolve(&task, "/auto").unwrap();
    assert!(Arc::ptr_eq(path.dentry(), &auto));
    assert!(!auto.is_mountpoint());

    // 穿过它继续遍历时触发
    let path = resolve(&task, "/auto/g").unwrap();
    assert!(Arc::ptr_eq(path.dentry(), &g));
    assert!(auto.is_mountpoint());

    // 之后就是普通的挂载点
    let path = resolve_at(&task, None, "/auto", LookupFlags::AUTOMOUNT).unwrap();
    assert!(Arc::ptr_eq(path.dentry(), &guest.root_dentry()));
}

#[test]
fn test_transit_guard_hides_mount() {
    let _mounts = lock_mount_table();
    let host = RootFs::with_dentry_ops();
    let mnt_dir = host.mkdir_raw(&host.root_dentry(), b"mnt", 0o755);
    let guest = RootFs::new();
    guest.create_raw(&guest.root_dentry(), b"g", 0o644);
    mount_on(&host, &mnt_dir, &guest, MntFlags::empty());
    mnt_dir.set_flags(DentryFlags::MANAGE_TRANSIT);
    let ops = host.dentry_ops().unwrap();
    let task = host.task(Cred::root());

    // 守卫要求把挂载点当作普通目录
    ops.set_transit_blocked(true);
    let path = resolve(&task, "/mnt").unwrap();
    assert!(Arc::ptr_eq(path.dentry(), &mnt_dir));
    assert_eq!(resolve(&task, "/mnt/g").err(), Some(Errno::NoSuchFileOrDirectory));

    ops.set_transit_blocked(false);
    assert!(resolve(&task, "/mnt/g").is_ok());
}

#[test]
fn test_beneath_rejects_escape() {
    let fs = RootFs::new();
    let root = fs.root_dentry();
    let jail = fs.mkdir_raw(&root, b"jail", 0o755);
    let sub = fs.mkdir_raw(&jail, b"sub", 0o755);
    fs.create_raw(&root, b"outside", 0o644);
    fs.symlink_raw(&jail, b"up", b"../outside");
    fs.symlink_raw(&jail, b"abs", b"/outside");
    fs.symlink_raw(&jail, b"down", b"sub/../sub");
    let task = fs.task(Cred::root());
    let start = fs.path_of(&jail);
    let beneath = LookupFlags::BENEATH | LookupFlags::FOLLOW;

    let path = scoped(&task, &start, "sub/..", beneath).unwrap();
    assert!(Arc::ptr_eq(path.dentry(), &jail));
    let path = scoped(&task, &start, "down", beneath).unwrap();
    assert!(Arc::ptr_eq(path.dentry(), &sub));

    for escape in ["..", "/outside", "up", "abs", "sub/../../outside"] {
        assert_eq!(
            scoped(&task, &start, escape, beneath).err(),
            Some(Errno::CrossDeviceLink),
            "{}",
            escape
        );
    }
}

#[test]
fn test_in_root_clamps_to_start() {
    let fs = RootFs::new();
    let root = fs.root_dentry();
    let jail = fs.mkdir_raw(&root, b"jail", 0o755);
    let inner = fs.create_raw(&jail, b"outside", 0o644);
    fs.create_raw(&root, b"outside", 0o644);
    fs.symlink_raw(&jail, b"abs", b"/outside");
    let task = fs.task(Cred::root());
    let start = fs.path_of(&jail);
    let in_root = LookupFlags::IN_ROOT | LookupFlags::FOLLOW;

    // `/` 与 `..` 都停在 dfd
    for name in ["/outside", "../../outside", "abs"] {
        let path = scoped(&task, &start, name, in_root).unwrap();
        assert!(Arc::ptr_eq(path.dentry(), &inner), "{}", name);
    }
}
