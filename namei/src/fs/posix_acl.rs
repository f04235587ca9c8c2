//! MIT License
//!
//! Copyright (c) 2026 Fei Wang
//!
//! POSIX 访问控制列表
//!
//! 对应 Linux 的 fs/posix_acl.c：ACL 缓存状态与 posix_acl_permission()

use alloc::sync::Arc;
use alloc::vec::Vec;

use crate::errno::Errno;
use crate::fs::perm::MayFlags;
use crate::process::Cred;

/// ACL 条目标签
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum AclTag {
    UserObj,
    User(u32),
    GroupObj,
    Group(u32),
    Mask,
    Other,
}

/// ACL 条目，`perm` 为 rwx 三位
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct AclEntry {
    pub tag: AclTag,
    pub perm: u32,
}

impl AclEntry {
    pub const fn new(tag: AclTag, perm: u32) -> Self {
        Self { tag, perm }
    }
}

/// 访问 ACL（条目按标准顺序排列）
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PosixAcl {
    pub entries: Vec<AclEntry>,
}

impl PosixAcl {
    pub fn new(entries: Vec<AclEntry>) -> Self {
        Self { entries }
    }
}

/// inode 上缓存的 ACL 状态
#[derive(Debug, Clone, Default)]
pub enum CachedAcl {
    /// 还未从文件系统读取（ACL_NOT_CACHED）
    #[default]
    NotCached,
    /// 确认没有 ACL
    None,
    Some(Arc<PosixAcl>),
}

/// 对应 posix_acl_permission()
///
/// `inode_uid` / `inode_gid` 为属主与属组。
pub fn posix_acl_permission(
    acl: &PosixAcl,
    inode_uid: u32,
    inode_gid: u32,
    cred: &Cred,
    mask: MayFlags,
) -> Result<(), Errno> {
    let want = (mask & (MayFlags::READ | MayFlags::WRITE | MayFlags::EXEC)).bits();
    let mut found = false;

    // 先找到生效的条目；需要 MASK 限制的用 `masked` 标记
    let mut matched: Option<(usize, bool)> = None;
    for (idx, pa) in acl.entries.iter().enumerate() {
        match pa.tag {
            AclTag::UserObj => {
                if inode_uid == cred.fsuid {
                    matched = Some((idx, false));
                    break;
                }
            }
            AclTag::User(uid) => {
                if uid == cred.fsuid {
                    matched = Some((idx, true));
                    break;
                }
            }
            AclTag::GroupObj => {
                if cred.in_group_p(inode_gid) {
                    found = true;
                    if pa.perm & want == want {
                        matched = Some((idx, true));
                        break;
                    }
                }
            }
            AclTag::Group(gid) => {
                if cred.in_group_p(gid) {
                    found = true;
                    if pa.perm & want == want {
                        matched = Some((idx, true));
                        break;
                    }
                }
            }
            AclTag::Mask => {}
            AclTag::Other => {
                if found {
                    return Err(Errno::PermissionDenied);
                }
                matched = Some((idx, false));
                break;
            }
        }
    }

    let Some((idx, masked)) = matched else {
        return Err(Errno::IOError);
    };
    let pa = &acl.entries[idx];

    if masked {
        if let Some(mask_obj) = acl.entries[idx + 1..]
            .iter()
            .find(|e| e.tag == AclTag::Mask)
        {
            return if pa.perm & mask_obj.perm & want == want {
                Ok(())
            } else {
                Err(Errno::PermissionDenied)
            };
        }
    }

    if pa.perm & want == want {
        Ok(())
    } else {
        Err(Errno::PermissionDenied)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::vec;

    fn acl() -> PosixAcl {
        PosixAcl::new(vec![
            AclEntry::new(AclTag::UserObj, 0o7),
            AclEntry::new(AclTag::User(2000), 0o7),
            AclEntry::new(AclTag::GroupObj, 0o5),
            AclEntry::new(AclTag::Group(300), 0o6),
            AclEntry::new(AclTag::Mask, 0o5),
            AclEntry::new(AclTag::Other, 0o0),
        ])
    }

    #[test]
    fn test_named_user_limited_by_mask() {
        let cred = Cred::user(2000, 2000);
        assert!(posix_acl_permission(&acl(), 1000, 100, &cred, MayFlags::READ).is_ok());
        assert_eq!(
            posix_acl_permission(&acl(), 1000, 100, &cred, MayFlags::WRITE),
            Err(Errno::PermissionDenied)
        );
    }

    #[test]
    fn test_owner_ignores_mask() {
        let cred = Cred::user(1000, 1000);
        assert!(posix_acl_permission(&acl(), 1000, 100, &cred, MayFlags::WRITE).is_ok());
    }

    #[test]
    fn test_group_found_but_insufficient_denies() {
        // 属于组 100 但只要求写，GROUP_OBJ 只有 r-x，落到 OTHER 时 found 为真
        let cred = Cred::user(3000, 100);
        assert_eq!(
            posix_acl_permission(&acl(), 1000, 100, &cred, MayFlags::WRITE),
            Err(Errno::PermissionDenied)
        );
        assert!(posix_acl_permission(&acl(), 1000, 100, &cred, MayFlags::EXEC).is_ok());
    }

    #[test]
    fn test_other_entry() {
        let cred = Cred::user(4000, 4000);
        assert_eq!(
            posix_acl_permission(&acl(), 1000, 100, &cred, MayFlags::READ),
            Err(Errno::PermissionDenied)
        );
    }
}
