//! MIT License
//!
//! Copyright (c) 2026 Fei Wang
//!
//! fs.protected_* 策略
//!
//! 对应 Linux fs/namei.c 中的 namei_sysctls：
//! - `protected_symlinks` (0/1)
//! - `protected_hardlinks` (0/1)
//! - `protected_fifos` (0/1/2)
//! - `protected_regular` (0/1/2)
//!
//! 默认值来自 Namei.toml（见 `config.rs`）。

use alloc::sync::Arc;
use core::sync::atomic::{AtomicU32, Ordering};

use crate::config;
use crate::errno::Errno;

/// 路径解析的保护策略
#[derive(Debug)]
pub struct ProtectionPolicy {
    protected_symlinks: AtomicU32,
    protected_hardlinks: AtomicU32,
    protected_fifos: AtomicU32,
    protected_regular: AtomicU32,
}

/// 策略项
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Protection {
    Symlinks,
    Hardlinks,
    Fifos,
    Regular,
}

impl Protection {
    /// 允许的最大值
    pub const fn max(self) -> u32 {
        match self {
            Protection::Symlinks | Protection::Hardlinks => 1,
            Protection::Fifos | Protection::Regular => 2,
        }
    }

    pub const fn procname(self) -> &'static str {
        match self {
            Protection::Symlinks => "protected_symlinks",
            Protection::Hardlinks => "protected_hardlinks",
            Protection::Fifos => "protected_fifos",
            Protection::Regular => "protected_regular",
        }
    }
}

impl ProtectionPolicy {
    /// 使用编译期默认值
    pub const fn new() -> Self {
        Self::with_levels(
            config::DEFAULT_PROTECTED_SYMLINKS,
            config::DEFAULT_PROTECTED_HARDLINKS,
            config::DEFAULT_PROTECTED_FIFOS,
            config::DEFAULT_PROTECTED_REGULAR,
        )
    }

    /// 全部关闭
    pub const fn permissive() -> Self {
        Self::with_levels(0, 0, 0, 0)
    }

    const fn with_levels(symlinks: u32, hardlinks: u32, fifos: u32, regular: u32) -> Self {
        Self {
            protected_symlinks: AtomicU32::new(symlinks),
            protected_hardlinks: AtomicU32::new(hardlinks),
            protected_fifos: AtomicU32::new(fifos),
            protected_regular: AtomicU32::new(regular),
        }
    }

    fn slot(&self, which: Protection) -> &AtomicU32 {
        match which {
            Protection::Symlinks => &self.protected_symlinks,
            Protection::Hardlinks => &self.protected_hardlinks,
            Protection::Fifos => &self.protected_fifos,
            Protection::Regular => &self.protected_regular,
        }
    }

    pub fn get(&self, which: Protection) -> u32 {
        self.slot(which).load(Ordering::Relaxed)
    }

    /// 写入策略值，超出范围返回 EINVAL（proc_dointvec_minmax 的行为）
    pub fn set(&self, which: Protection, value: u32) -> Result<(), Errno> {
        if value > which.max() {
            return Err(Errno::InvalidArgument);
        }
        self.slot(which).store(value, Ordering::Relaxed);
        log::debug!("sysctl: fs.{} = {}", which.procname(), value);
        Ok(())
    }

    #[inline]
    pub fn protected_symlinks(&self) -> u32 {
        self.get(Protection::Symlinks)
    }

    #[inline]
    pub fn protected_hardlinks(&self) -> u32 {
        self.get(Protection::Hardlinks)
    }

    #[inline]
    pub fn protected_fifos(&self) -> u32 {
        self.get(Protection::Fifos)
    }

    #[inline]
    pub fn protected_regular(&self) -> u32 {
        self.get(Protection::Regular)
    }
}

impl Default for ProtectionPolicy {
    fn default() -> Self {
        Self::new()
    }
}

static DEFAULT_POLICY: spin::Once<Arc<ProtectionPolicy>> = spin::Once::new();

/// 全局默认策略（新建 `Task` 时使用）
pub fn default_policy() -> Arc<ProtectionPolicy> {
    DEFAULT_POLICY
        .call_once(|| Arc::new(ProtectionPolicy::new()))
        .clone()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_range_checked() {
        let policy = ProtectionPolicy::permissive();
        assert_eq!(policy.set(Protection::Symlinks, 2), Err(Errno::InvalidArgument));
        assert_eq!(policy.set(Protection::Fifos, 2), Ok(()));
        assert_eq!(policy.protected_fifos(), 2);
        assert_eq!(policy.protected_symlinks(), 0);
    }

    #[test]
    fn test_defaults_from_config() {
        let policy = ProtectionPolicy::new();
        assert_eq!(policy.protected_regular(), config::DEFAULT_PROTECTED_REGULAR);
        assert!(Arc::ptr_eq(&default_policy(), &default_policy()));
    }
}
