//! MIT License
//!
//! Copyright (c) 2026 Fei Wang
//!
//! 凭证 (Credentials)
//!
//! 对应 Linux 的 struct cred (include/linux/cred.h) 与 capability 检查
//! (kernel/capability.c)。路径解析只关心文件系统相关的部分：
//! fsuid/fsgid、附加组以及少量 capability。

use alloc::vec::Vec;
use bitflags::bitflags;

/// 无法通过身份映射表示的 uid/gid
pub const INVALID_UID: u32 = u32::MAX;
pub const INVALID_GID: u32 = u32::MAX;

bitflags! {
    /// CAP_* (include/uapi/linux/capability.h)，只保留路径解析用到的
    #[derive(Debug, Copy, Clone, PartialEq, Eq)]
    pub struct Capabilities: u64 {
        const CHOWN           = 1 << 0;
        const DAC_OVERRIDE    = 1 << 1;
        const DAC_READ_SEARCH = 1 << 2;
        const FOWNER          = 1 << 3;
        const FSETID          = 1 << 4;
        const LINUX_IMMUTABLE = 1 << 9;
        const SYS_ADMIN       = 1 << 21;
        const MKNOD           = 1 << 27;
    }
}

/// 进程凭证
#[derive(Debug, Clone)]
pub struct Cred {
    pub fsuid: u32,
    pub fsgid: u32,
    /// 附加组
    pub groups: Vec<u32>,
    /// 有效 capability 集合
    pub cap_effective: Capabilities,
}

impl Cred {
    /// root 凭证，拥有全部 capability
    pub fn root() -> Self {
        Self {
            fsuid: 0,
            fsgid: 0,
            groups: Vec::new(),
            cap_effective: Capabilities::all(),
        }
    }

    /// 普通用户凭证，没有任何 capability
    pub fn user(uid: u32, gid: u32) -> Self {
        Self {
            fsuid: uid,
            fsgid: gid,
            groups: Vec::new(),
            cap_effective: Capabilities::empty(),
        }
    }

    pub fn with_groups(mut self, groups: &[u32]) -> Self {
        self.groups = groups.to_vec();
        self
    }

    pub fn with_caps(mut self, caps: Capabilities) -> Self {
        self.cap_effective = caps;
        self
    }

    /// 对应 in_group_p()
    pub fn in_group_p(&self, gid: u32) -> bool {
        self.fsgid == gid || self.groups.contains(&gid)
    }

    /// 对应 capable()
    pub fn capable(&self, cap: Capabilities) -> bool {
        self.cap_effective.contains(cap)
    }

    /// 对应 capable_wrt_inode_uidgid()
    ///
    /// 只有 inode 的属主和属组都能被映射时，capability 才对它生效。
    pub fn capable_wrt_inode_uidgid(&self, uid: u32, gid: u32, cap: Capabilities) -> bool {
        uid != INVALID_UID && gid != INVALID_GID && self.capable(cap)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_in_group_p() {
        let cred = Cred::user(1000, 100).with_groups(&[10, 20]);
        assert!(cred.in_group_p(100));
        assert!(cred.in_group_p(20));
        assert!(!cred.in_group_p(30));
    }

    #[test]
    fn test_capable_wrt_unmapped_inode() {
        let root = Cred::root();
        assert!(root.capable_wrt_inode_uidgid(5, 5, Capabilities::FOWNER));
        assert!(!root.capable_wrt_inode_uidgid(INVALID_UID, 5, Capabilities::FOWNER));
        let user = Cred::user(5, 5);
        assert!(!user.capable_wrt_inode_uidgid(5, 5, Capabilities::FOWNER));
    }
}
