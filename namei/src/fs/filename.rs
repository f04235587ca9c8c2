//! MIT License
//!
//! Copyright (c) 2026 Fei Wang
//!
//! 路径名持有者
//!
//! 对应 Linux 的 struct filename 与 getname_flags() / getname_kernel() / putname()
//! (fs/namei.c)
//!
//! `PathName` 构造后不可变，通过 `Arc` 共享；最后一个持有者释放时销毁。

use alloc::string::String;
use alloc::sync::Arc;
use alloc::vec::Vec;
use core::fmt;

use crate::config::PATH_MAX;
use crate::errno::Errno;

struct FilenameInner {
    /// 路径文本（不含结尾 NUL）
    name: Arc<[u8]>,
    /// 调用者提供的原始文本标识（仅用于重试时重新取得原文，不拥有数据）
    uptr: Option<usize>,
    /// 审计名称槽位
    aname: spin::Mutex<Option<String>>,
}

/// 引用计数的路径名
#[derive(Clone)]
pub struct PathName {
    inner: Arc<FilenameInner>,
}

impl PathName {
    fn build(bytes: &[u8], uptr: Option<usize>, allow_empty: bool) -> Result<Self, Errno> {
        // 与 C 字符串一样，内嵌的 NUL 之后的内容被忽略
        let len = bytes.iter().position(|&b| b == 0).unwrap_or(bytes.len());
        let text = &bytes[..len];

        // PATH_MAX 包含结尾 NUL
        if text.len() >= PATH_MAX {
            return Err(Errno::NameTooLong);
        }
        if text.is_empty() && !allow_empty {
            return Err(Errno::NoSuchFileOrDirectory);
        }

        let mut owned = Vec::new();
        owned
            .try_reserve_exact(text.len())
            .map_err(|_| Errno::OutOfMemory)?;
        owned.extend_from_slice(text);

        Ok(Self {
            inner: Arc::new(FilenameInner {
                name: Arc::from(owned),
                uptr,
                aname: spin::Mutex::new(None),
            }),
        })
    }

    /// 路径文本
    pub fn as_bytes(&self) -> &[u8] {
        &self.inner.name
    }

    /// 共享的文本缓冲区，遍历游标直接引用它
    pub fn buffer(&self) -> Arc<[u8]> {
        self.inner.name.clone()
    }

    pub fn len(&self) -> usize {
        self.inner.name.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.name.is_empty()
    }

    pub fn is_absolute(&self) -> bool {
        self.inner.name.first() == Some(&b'/')
    }

    pub fn uptr(&self) -> Option<usize> {
        self.inner.uptr
    }

    /// 当前持有者数量
    pub fn refcount(&self) -> usize {
        Arc::strong_count(&self.inner)
    }

    pub fn set_audit_name(&self, name: String) {
        *self.inner.aname.lock() = Some(name);
    }

    pub fn audit_name(&self) -> Option<String> {
        self.inner.aname.lock().clone()
    }
}

impl fmt::Debug for PathName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("PathName")
            .field(&String::from_utf8_lossy(&self.inner.name))
            .finish()
    }
}

impl PartialEq for PathName {
    fn eq(&self, other: &Self) -> bool {
        self.as_bytes() == other.as_bytes()
    }
}

/// 从调用者缓冲区取得路径名
///
/// `allow_empty` 对应 LOOKUP_EMPTY：空路径只在调用者允许时合法。
/// `uptr` 是原始缓冲区的标识。
pub fn getname_flags(bytes: &[u8], uptr: Option<usize>, allow_empty: bool) -> Result<PathName, Errno> {
    PathName::build(bytes, uptr, allow_empty)
}

/// 取得路径名，空路径返回 ENOENT
pub fn getname(bytes: &[u8]) -> Result<PathName, Errno> {
    PathName::build(bytes, Some(bytes.as_ptr() as usize), false)
}

/// 对应 getname_uflags()：`AT_EMPTY_PATH` 允许空路径
pub fn getname_uflags(bytes: &[u8], at_empty_path: bool) -> Result<PathName, Errno> {
    PathName::build(bytes, Some(bytes.as_ptr() as usize), at_empty_path)
}

/// 内核内部调用使用的路径名，允许空路径
pub fn getname_kernel(name: &str) -> Result<PathName, Errno> {
    PathName::build(name.as_bytes(), None, true)
}

/// 释放一个持有者
pub fn putname(name: PathName) {
    drop(name);
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::vec;

    #[test]
    fn test_getname_rejects_empty() {
        assert_eq!(getname(b"").unwrap_err(), Errno::NoSuchFileOrDirectory);
        assert!(getname_uflags(b"", true).unwrap().is_empty());
        assert!(getname_kernel("").is_ok());
    }

    #[test]
    fn test_getname_length_limit() {
        let ok = vec![b'a'; PATH_MAX - 1];
        assert_eq!(getname(&ok).unwrap().len(), PATH_MAX - 1);

        let too_long = vec![b'a'; PATH_MAX];
        assert_eq!(getname(&too_long).unwrap_err(), Errno::NameTooLong);
    }

    #[test]
    fn test_getname_truncates_at_nul() {
        let name = getname(b"/etc\0/shadow").unwrap();
        assert_eq!(name.as_bytes(), b"/etc");
        assert!(name.is_absolute());
    }

    #[test]
    fn test_refcount_shared() {
        let name = getname_kernel("/a/b").unwrap();
        let other = name.clone();
        assert_eq!(name.refcount(), 2);
        putname(other);
        assert_eq!(name.refcount(), 1);
    }
}
