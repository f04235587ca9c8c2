//! MIT License
//!
//! Copyright (c) 2026 Fei Wang
//!
//! 权限检查点
//!
//! 对应 Linux fs/namei.c 中的权限部分：
//! - `generic_permission()` / `inode_permission()`：属主 / 属组 / 其他位与 ACL
//! - `may_follow_link()`：粘滞可写目录中的符号链接保护
//! - `may_linkat()`：硬链接保护
//! - `may_create_in_sticky()`：粘滞目录中 O_CREAT 打开已有文件的保护
//! - `may_delete()` / `may_create()`：目录修改前的检查

use alloc::sync::Arc;
use bitflags::bitflags;

use crate::errno::Errno;
use crate::fs::dentry::{Dentry, DentryFlags};
use crate::fs::inode::{Inode, InodeMode};
use crate::fs::mount::MntFlags;
use crate::fs::open::OpenFlags;
use crate::fs::path::Path;
use crate::fs::posix_acl::{posix_acl_permission, CachedAcl};
use crate::fs::superblock::SuperBlockFlags;
use crate::process::{Capabilities, Cred, Task};

bitflags! {
    /// 权限检查掩码
    ///
    /// 对应 Linux 的 MAY_* 宏 (include/linux/fs.h)
    #[derive(Debug, Copy, Clone, PartialEq, Eq)]
    pub struct MayFlags: u32 {
        const EXEC      = 0x0001;
        const WRITE     = 0x0002;
        const READ      = 0x0004;
        const APPEND    = 0x0008;
        const ACCESS    = 0x0010;
        const OPEN      = 0x0020;
        const CHDIR     = 0x0040;
        /// RCU 模式，不能阻塞
        const NOT_BLOCK = 0x0080;
    }
}

impl MayFlags {
    /// 只取 rwx 三位
    fn rwx(self) -> u32 {
        (self & (MayFlags::READ | MayFlags::WRITE | MayFlags::EXEC)).bits()
    }
}

/// 对应 check_acl()
///
/// 没有 ACL 时返回 `TryAgain`（EAGAIN），调用者继续做普通的属组 / 其他位检查。
fn check_acl(inode: &Arc<Inode>, cred: &Cred, mask: MayFlags) -> Result<(), Errno> {
    if mask.contains(MayFlags::NOT_BLOCK) {
        return match inode.cached_acl() {
            CachedAcl::None => Err(Errno::TryAgain),
            // RCU 模式不调用驱动
            CachedAcl::NotCached => Err(Errno::NoChild),
            CachedAcl::Some(acl) => posix_acl_permission(&acl, inode.uid(), inode.gid(), cred, mask),
        };
    }

    let acl = match inode.cached_acl() {
        CachedAcl::Some(acl) => Some(acl),
        CachedAcl::None => None,
        CachedAcl::NotCached => {
            let acl = inode.i_op.get_inode_acl(inode, false)?;
            inode.set_cached_acl(match &acl {
                Some(acl) => CachedAcl::Some(acl.clone()),
                None => CachedAcl::None,
            });
            acl
        }
    };
    match acl {
        Some(acl) => posix_acl_permission(&acl, inode.uid(), inode.gid(), cred, mask),
        None => Err(Errno::TryAgain),
    }
}

/// 对应 acl_permission_check()
fn acl_permission_check(inode: &Arc<Inode>, cred: &Cred, mask: MayFlags) -> Result<(), Errno> {
    let mut mode = inode.mode().bits();

    // 所有人都有请求的权限，且确认没有 ACL
    if (mask.rwx() * 0o111) & !mode == 0 {
        if matches!(inode.cached_acl(), CachedAcl::None) || !inode.i_sb.is_posixacl() {
            return Ok(());
        }
    }

    if inode.uid() == cred.fsuid {
        mode >>= 6;
        return if mask.rwx() & !mode != 0 {
            Err(Errno::PermissionDenied)
        } else {
            Ok(())
        };
    }

    if inode.i_sb.is_posixacl() && mode & InodeMode::S_IRWXG != 0 {
        match check_acl(inode, cred, mask) {
            Err(Errno::TryAgain) => {}
            other => return other,
        }
    }

    let want = mask.rwx();
    // 属组位与其他位在关心的位上不同才需要检查属组
    if want & (mode ^ (mode >> 3)) != 0 && cred.in_group_p(inode.gid()) {
        mode >>= 3;
    }
    if want & !mode != 0 {
        Err(Errno::PermissionDenied)
    } else {
        Ok(())
    }
}

/// 对应 generic_permission()
///
/// 在 RCU 模式下（`MayFlags::NOT_BLOCK`）需要阻塞时返回 `Err(Errno::NoChild)`。
pub fn generic_permission(inode: &Arc<Inode>, cred: &Cred, mask: MayFlags) -> Result<(), Errno> {
    match acl_permission_check(inode, cred, mask) {
        Err(Errno::PermissionDenied) => {}
        other => return other,
    }

    let (uid, gid) = (inode.uid(), inode.gid());
    if inode.mode().is_directory() {
        // 目录的 DAC 可以被覆盖
        if !mask.contains(MayFlags::WRITE) && cred.capable_wrt_inode_uidgid(uid, gid, Capabilities::DAC_READ_SEARCH) {
            return Ok(());
        }
        if cred.capable_wrt_inode_uidgid(uid, gid, Capabilities::DAC_OVERRIDE) {
            return Ok(());
        }
        return Err(Errno::PermissionDenied);
    }

    let rwx = mask & (MayFlags::READ | MayFlags::WRITE | MayFlags::EXEC);
    if rwx == MayFlags::READ && cred.capable_wrt_inode_uidgid(uid, gid, Capabilities::DAC_READ_SEARCH) {
        return Ok(());
    }
    // 执行权限只有在至少一个执行位存在时才能覆盖
    if (!rwx.contains(MayFlags::EXEC) || inode.mode().bits() & InodeMode::S_IXUGO != 0)
        && cred.capable_wrt_inode_uidgid(uid, gid, Capabilities::DAC_OVERRIDE)
    {
        return Ok(());
    }
    Err(Errno::PermissionDenied)
}

/// 对应 sb_permission()
fn sb_permission(inode: &Inode, mask: MayFlags) -> Result<(), Errno> {
    if mask.contains(MayFlags::WRITE) && inode.i_sb.flags().contains(SuperBlockFlags::SB_RDONLY) {
        let mode = inode.mode();
        if mode.is_regular_file() || mode.is_directory() || mode.is_symlink() {
            return Err(Errno::ReadOnlyFileSystem);
        }
    }
    Ok(())
}

/// 对应 inode_permission()
pub fn inode_permission(task: &Task, inode: &Arc<Inode>, mask: MayFlags) -> Result<(), Errno> {
    sb_permission(inode, mask)?;

    if mask.contains(MayFlags::WRITE) {
        if inode.is_immutable() {
            return Err(Errno::OperationNotPermitted);
        }
        if inode.has_unmapped_id() {
            return Err(Errno::PermissionDenied);
        }
    }

    inode.i_op.permission(inode, task.cred(), mask)?;
    task.lsm(|h| h.inode_permission(inode, mask))
}

/// 对应 inode_owner_or_capable()
pub fn inode_owner_or_capable(cred: &Cred, inode: &Inode) -> bool {
    inode.uid() == cred.fsuid || cred.capable_wrt_inode_uidgid(inode.uid(), inode.gid(), Capabilities::FOWNER)
}

/// 对应 may_follow_link()
///
/// 只对末尾分量调用。`dir_mode` / `dir_uid` 是链接所在目录的属性。
pub fn may_follow_link(task: &Task, dir_mode: u32, dir_uid: u32, link: &Inode, rcu: bool) -> Result<(), Errno> {
    if task.policy.protected_symlinks() == 0 {
        return Ok(());
    }
    let link_uid = link.uid();
    if link_uid == task.fsuid() {
        return Ok(());
    }
    let sticky_ww = InodeMode::S_ISVTX | InodeMode::S_IWOTH;
    if dir_mode & sticky_ww != sticky_ww {
        return Ok(());
    }
    if dir_uid != crate::process::INVALID_UID && dir_uid == link_uid {
        return Ok(());
    }
    if rcu {
        return Err(Errno::NoChild);
    }
    log::debug!("protected_symlinks: refusing to follow link owned by {}", link_uid);
    Err(Errno::PermissionDenied)
}

/// 对应 safe_hardlink_source()
fn safe_hardlink_source(task: &Task, inode: &Arc<Inode>) -> bool {
    let mode = inode.mode();
    if !mode.is_regular_file() {
        return false;
    }
    if mode.bits() & InodeMode::S_ISUID != 0 {
        return false;
    }
    let sgid_exec = InodeMode::S_ISGID | InodeMode::S_IXGRP;
    if mode.bits() & sgid_exec == sgid_exec {
        return false;
    }
    inode_permission(task, inode, MayFlags::READ | MayFlags::WRITE).is_ok()
}

/// 对应 may_linkat()
pub fn may_linkat(task: &Task, link: &Path) -> Result<(), Errno> {
    let inode = link.inode().ok_or(Errno::NoSuchFileOrDirectory)?;
    if inode.has_unmapped_id() {
        return Err(Errno::ValueTooLarge);
    }
    if task.policy.protected_hardlinks() == 0 {
        return Ok(());
    }
    if safe_hardlink_source(task, &inode) || inode_owner_or_capable(task.cred(), &inode) {
        return Ok(());
    }
    log::debug!("protected_hardlinks: refusing link to inode {}", inode.i_ino);
    Err(Errno::OperationNotPermitted)
}

/// 对应 may_create_in_sticky()
///
/// O_CREAT 打开一个已经存在的文件时调用。
pub fn may_create_in_sticky(task: &Task, dir_mode: u32, dir_uid: u32, inode: &Inode) -> Result<(), Errno> {
    if dir_mode & InodeMode::S_ISVTX == 0 {
        return Ok(());
    }
    let mode = inode.mode();
    let regular = task.policy.protected_regular();
    let fifos = task.policy.protected_fifos();
    if mode.is_regular_file() && regular == 0 {
        return Ok(());
    }
    if mode.is_fifo() && fifos == 0 {
        return Ok(());
    }

    let owner = inode.uid();
    if owner == dir_uid || owner == task.fsuid() {
        return Ok(());
    }

    if dir_mode & InodeMode::S_IWOTH != 0 {
        return Err(Errno::PermissionDenied);
    }
    if dir_mode & InodeMode::S_IWGRP != 0 {
        if fifos >= 2 && mode.is_fifo() {
            return Err(Errno::PermissionDenied);
        }
        if regular >= 2 && mode.is_regular_file() {
            return Err(Errno::PermissionDenied);
        }
    }
    Ok(())
}

/// 对应 check_sticky()
fn check_sticky(task: &Task, dir: &Inode, inode: &Inode) -> bool {
    if dir.mode().bits() & InodeMode::S_ISVTX == 0 {
        return false;
    }
    let fsuid = task.fsuid();
    if inode.uid() == fsuid || dir.uid() == fsuid {
        return false;
    }
    !task
        .cred()
        .capable_wrt_inode_uidgid(inode.uid(), inode.gid(), Capabilities::FOWNER)
}

/// 对应 may_delete()：能否从 `dir` 中删除 `victim`
pub fn may_delete(task: &Task, dir: &Arc<Inode>, victim: &Arc<Dentry>, isdir: bool) -> Result<(), Errno> {
    let inode = victim.inode().ok_or(Errno::NoSuchFileOrDirectory)?;

    if inode.has_unmapped_id() {
        return Err(Errno::ValueTooLarge);
    }

    inode_permission(task, dir, MayFlags::WRITE | MayFlags::EXEC)?;
    if dir.is_append() {
        return Err(Errno::OperationNotPermitted);
    }

    if check_sticky(task, dir, &inode) || inode.is_append() || inode.is_immutable() || inode.is_swapfile() {
        return Err(Errno::OperationNotPermitted);
    }
    if isdir {
        if !victim.is_dir() {
            return Err(Errno::NotADirectory);
        }
        if victim.is_root() {
            return Err(Errno::DeviceOrResourceBusy);
        }
    } else if victim.is_dir() {
        return Err(Errno::IsADirectory);
    }
    if dir.is_deaddir() {
        return Err(Errno::NoSuchFileOrDirectory);
    }
    if victim.flags().contains(DentryFlags::NFSFS_RENAMED) {
        return Err(Errno::DeviceOrResourceBusy);
    }
    Ok(())
}

/// 对应 may_create()：能否在 `dir` 中创建 `child`
pub fn may_create(task: &Task, dir: &Arc<Inode>, child: &Dentry) -> Result<(), Errno> {
    if child.is_positive() {
        return Err(Errno::FileExists);
    }
    if dir.is_deaddir() {
        return Err(Errno::NoSuchFileOrDirectory);
    }
    if task.fsuid() == crate::process::INVALID_UID || task.cred().fsgid == crate::process::INVALID_GID {
        return Err(Errno::ValueTooLarge);
    }
    inode_permission(task, dir, MayFlags::WRITE | MayFlags::EXEC)
}

fn may_open_dev(path: &Path) -> bool {
    !path.mnt().flags().contains(MntFlags::NODEV) && !path.mnt().mnt_sb.flags().contains(SuperBlockFlags::SB_NODEV)
}

fn path_noexec(path: &Path) -> bool {
    path.mnt().flags().contains(MntFlags::NOEXEC) || path.mnt().mnt_sb.flags().contains(SuperBlockFlags::SB_NOEXEC)
}

/// 对应 may_open()
pub fn may_open(task: &Task, path: &Path, acc_mode: MayFlags, flag: OpenFlags) -> Result<(), Errno> {
    let inode = path.inode().ok_or(Errno::NoSuchFileOrDirectory)?;
    let mode = inode.mode();
    let mut flag = flag;

    match mode.file_type() {
        InodeMode::S_IFLNK => return Err(Errno::TooManySymbolicLinks),
        InodeMode::S_IFDIR => {
            if acc_mode.contains(MayFlags::WRITE) {
                return Err(Errno::IsADirectory);
            }
            if acc_mode.contains(MayFlags::EXEC) {
                return Err(Errno::PermissionDenied);
            }
        }
        InodeMode::S_IFBLK | InodeMode::S_IFCHR | InodeMode::S_IFIFO | InodeMode::S_IFSOCK => {
            if (mode.is_block_device() || mode.is_char_device()) && !may_open_dev(path) {
                return Err(Errno::PermissionDenied);
            }
            if acc_mode.contains(MayFlags::EXEC) {
                return Err(Errno::PermissionDenied);
            }
            flag.remove(OpenFlags::O_TRUNC);
        }
        InodeMode::S_IFREG => {
            if acc_mode.contains(MayFlags::EXEC) && path_noexec(path) {
                return Err(Errno::PermissionDenied);
            }
        }
        _ => {}
    }

    inode_permission(task, &inode, MayFlags::OPEN | acc_mode)?;

    // 只追加文件必须以追加方式写打开
    if inode.is_append() {
        if flag.accmode() != 0 && !flag.contains(OpenFlags::O_APPEND) {
            return Err(Errno::OperationNotPermitted);
        }
        if flag.contains(OpenFlags::O_TRUNC) {
            return Err(Errno::OperationNotPermitted);
        }
    }

    if flag.contains(OpenFlags::O_NOATIME) && !inode_owner_or_capable(task.cred(), &inode) {
        return Err(Errno::OperationNotPermitted);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs::rootfs::RootFs;
    use crate::process::Cred;
    use crate::sysctl::{Protection, ProtectionPolicy};

    fn file(fs: &RootFs, mode: u32, uid: u32, gid: u32) -> Arc<Inode> {
        fs.new_inode(InodeMode::S_IFREG | mode, uid, gid)
    }

    #[test]
    fn test_owner_group_other() {
        let fs = RootFs::new();
        let inode = file(&fs, 0o640, 1000, 100);
        let owner = Cred::user(1000, 1000);
        let member = Cred::user(2000, 2000).with_groups(&[100]);
        let other = Cred::user(3000, 3000);

        assert!(generic_permission(&inode, &owner, MayFlags::WRITE).is_ok());
        assert!(generic_permission(&inode, &member, MayFlags::READ).is_ok());
        assert_eq!(generic_permission(&inode, &member, MayFlags::WRITE), Err(Errno::PermissionDenied));
        assert_eq!(generic_permission(&inode, &other, MayFlags::READ), Err(Errno::PermissionDenied));
    }

    #[test]
    fn test_capability_overrides() {
        let fs = RootFs::new();
        let inode = file(&fs, 0o600, 1000, 1000);
        let reader = Cred::user(3000, 3000).with_caps(Capabilities::DAC_READ_SEARCH);
        assert!(generic_permission(&inode, &reader, MayFlags::READ).is_ok());
        assert!(generic_permission(&inode, &reader, MayFlags::WRITE).is_err());

        // 没有任何执行位时 DAC_OVERRIDE 也不能执行
        let root = Cred::root();
        assert_eq!(generic_permission(&inode, &root, MayFlags::EXEC), Err(Errno::PermissionDenied));
        assert!(generic_permission(&inode, &root, MayFlags::WRITE).is_ok());
    }

    #[test]
    fn test_readonly_and_immutable() {
        let fs = RootFs::new();
        let task = fs.task(Cred::root());
        let inode = file(&fs, 0o666, 0, 0);
        inode.set_flags(crate::fs::inode::InodeFlags::S_IMMUTABLE);
        assert_eq!(
            inode_permission(&task, &inode, MayFlags::WRITE),
            Err(Errno::OperationNotPermitted)
        );
        fs.sb().set_flags(SuperBlockFlags::SB_RDONLY);
        assert_eq!(inode_permission(&task, &inode, MayFlags::WRITE), Err(Errno::ReadOnlyFileSystem));
        assert!(inode_permission(&task, &inode, MayFlags::READ).is_ok());
    }

    #[test]
    fn test_uncached_acl_needs_ref_walk() {
        let fs = RootFs::new();
        fs.sb().set_flags(SuperBlockFlags::SB_POSIXACL);
        let dir = fs.new_inode(InodeMode::S_IFDIR | 0o750, 1000, 100);
        let cred = Cred::user(3000, 3000);
        assert_eq!(
            generic_permission(&dir, &cred, MayFlags::EXEC | MayFlags::NOT_BLOCK),
            Err(Errno::NoChild)
        );
        // 阻塞模式读取 ACL（rootfs 没有 ACL）之后缓存为 None
        assert_eq!(generic_permission(&dir, &cred, MayFlags::EXEC), Err(Errno::PermissionDenied));
        assert!(matches!(dir.cached_acl(), CachedAcl::None));
    }

    #[test]
    fn test_sticky_create_levels() {
        let fs = RootFs::new();
        let policy = Arc::new(ProtectionPolicy::new());
        let task = fs.task(Cred::user(1000, 1000)).with_policy(policy.clone());
        let victim = file(&fs, 0o644, 2000, 2000);
        let ww_sticky = InodeMode::S_ISVTX | 0o777;
        let gw_sticky = InodeMode::S_ISVTX | 0o775;

        policy.set(Protection::Regular, 1).unwrap();
        assert_eq!(
            may_create_in_sticky(&task, ww_sticky, 0, &victim),
            Err(Errno::PermissionDenied)
        );
        assert!(may_create_in_sticky(&task, gw_sticky, 0, &victim).is_ok());
        // 目录属主就是文件属主
        assert!(may_create_in_sticky(&task, ww_sticky, 2000, &victim).is_ok());

        policy.set(Protection::Regular, 2).unwrap();
        assert_eq!(
            may_create_in_sticky(&task, gw_sticky, 0, &victim),
            Err(Errno::PermissionDenied)
        );

        policy.set(Protection::Regular, 0).unwrap();
        assert!(may_create_in_sticky(&task, ww_sticky, 0, &victim).is_ok());
    }

    #[test]
    fn test_follow_link_guard() {
        let fs = RootFs::new();
        let task = fs.task(Cred::user(1000, 1000)).with_policy(Arc::new(ProtectionPolicy::new()));
        let link = fs.new_inode(InodeMode::S_IFLNK | 0o777, 2000, 2000);
        let tmp = InodeMode::S_ISVTX | 0o777;

        assert_eq!(may_follow_link(&task, tmp, 0, &link, true), Err(Errno::NoChild));
        assert_eq!(may_follow_link(&task, tmp, 0, &link, false), Err(Errno::PermissionDenied));
        assert!(may_follow_link(&task, tmp, 2000, &link, false).is_ok());
        assert!(may_follow_link(&task, 0o777, 0, &link, false).is_ok());
    }
}
