//! MIT License
//!
//! Copyright (c) 2026 Fei Wang
//!
//! 路径解析错误代码
//!
//! 编号与 include/uapi/asm-generic/errno.h 一致。
//! `NoChild` (ECHILD) 在 namei 中只作为 RCU 模式的内部重试信号，
//! 每个公开入口都会把它消化掉，不会返回给调用者。

/// 标准错误代码
///
/// 使用方法：
/// ```rust
/// use namei::errno::Errno;
///
/// fn check(exists: bool) -> Result<(), Errno> {
///     if exists {
///         return Err(Errno::FileExists);
///     }
///     Ok(())
/// }
/// assert_eq!(check(true).unwrap_err().as_neg_i32(), -17);
/// ```
#[repr(i32)]
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Errno {
    /// Operation not permitted (EPERM, 1)
    OperationNotPermitted = 1,

    /// No such file or directory (ENOENT, 2)
    NoSuchFileOrDirectory = 2,

    /// I/O error (EIO, 5)
    IOError = 5,

    /// Bad file number (EBADF, 9)
    BadFileNumber = 9,

    /// No child process (ECHILD, 10)
    ///
    /// RCU 遍历无法继续，需要以引用计数模式重新开始
    NoChild = 10,

    /// Try again (EAGAIN, 11)
    TryAgain = 11,

    /// Out of memory (ENOMEM, 12)
    OutOfMemory = 12,

    /// Permission denied (EACCES, 13)
    PermissionDenied = 13,

    /// Device or resource busy (EBUSY, 16)
    DeviceOrResourceBusy = 16,

    /// File exists (EEXIST, 17)
    FileExists = 17,

    /// Cross-device link (EXDEV, 18)
    CrossDeviceLink = 18,

    /// Not a directory (ENOTDIR, 20)
    NotADirectory = 20,

    /// Is a directory (EISDIR, 21)
    IsADirectory = 21,

    /// Invalid argument (EINVAL, 22)
    InvalidArgument = 22,

    /// Text file busy (ETXTBSY, 26)
    TextFileBusy = 26,

    /// Read-only file system (EROFS, 30)
    ReadOnlyFileSystem = 30,

    /// Too many links (EMLINK, 31)
    TooManyLinks = 31,

    /// File name too long (ENAMETOOLONG, 36)
    NameTooLong = 36,

    /// Function not implemented (ENOSYS, 38)
    FunctionNotImplemented = 38,

    /// Directory not empty (ENOTEMPTY, 39)
    DirectoryNotEmpty = 39,

    /// Too many symbolic links encountered (ELOOP, 40)
    TooManySymbolicLinks = 40,

    /// Object is remote (EREMOTE, 66)
    ///
    /// 需要自动挂载的 dentry 没有提供 d_automount
    RemoteObject = 66,

    /// Value too large for defined data type (EOVERFLOW, 75)
    ValueTooLarge = 75,

    /// Operation not supported (EOPNOTSUPP, 95)
    OperationNotSupported = 95,

    /// Stale file handle (ESTALE, 116)
    StaleFileHandle = 116,

    /// State not recoverable (ENOTRECOVERABLE, 131)
    NotRecoverable = 131,
}

impl Errno {
    /// 获取错误代码的正数值（用于比较）
    #[inline]
    pub const fn as_i32(self) -> i32 {
        self as i32
    }

    /// 获取错误代码的负数值（用于系统调用返回）
    #[inline]
    pub const fn as_neg_i32(self) -> i32 {
        -(self as i32)
    }

    /// 是否为 RCU 模式的重试信号
    #[inline]
    pub const fn is_retry(self) -> bool {
        matches!(self, Errno::NoChild)
    }

    /// 是否为需要强制 revalidate 重试的 ESTALE
    #[inline]
    pub const fn is_stale(self) -> bool {
        matches!(self, Errno::StaleFileHandle)
    }
}

/// 常用的错误代码常量
pub mod constants {
    pub const EPERM: i32 = 1;
    pub const ENOENT: i32 = 2;
    pub const EIO: i32 = 5;
    pub const EBADF: i32 = 9;
    pub const ECHILD: i32 = 10;
    pub const EAGAIN: i32 = 11;
    pub const ENOMEM: i32 = 12;
    pub const EACCES: i32 = 13;
    pub const EBUSY: i32 = 16;
    pub const EEXIST: i32 = 17;
    pub const EXDEV: i32 = 18;
    pub const ENOTDIR: i32 = 20;
    pub const EISDIR: i32 = 21;
    pub const EINVAL: i32 = 22;
    pub const ETXTBSY: i32 = 26;
    pub const EROFS: i32 = 30;
    pub const EMLINK: i32 = 31;
    pub const ENAMETOOLONG: i32 = 36;
    pub const ENOSYS: i32 = 38;
    pub const ENOTEMPTY: i32 = 39;
    pub const ELOOP: i32 = 40;
    pub const EREMOTE: i32 = 66;
    pub const EOVERFLOW: i32 = 75;
    pub const EOPNOTSUPP: i32 = 95;
    pub const ESTALE: i32 = 116;
    pub const ENOTRECOVERABLE: i32 = 131;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_errno_values() {
        assert_eq!(Errno::NoSuchFileOrDirectory.as_i32(), constants::ENOENT);
        assert_eq!(Errno::TooManySymbolicLinks.as_i32(), constants::ELOOP);
        assert_eq!(Errno::NameTooLong.as_i32(), constants::ENAMETOOLONG);
        assert_eq!(Errno::StaleFileHandle.as_i32(), constants::ESTALE);
        assert_eq!(Errno::CrossDeviceLink.as_i32(), constants::EXDEV);
    }

    #[test]
    fn test_errno_negative() {
        assert_eq!(Errno::NoSuchFileOrDirectory.as_neg_i32(), -2);
        assert_eq!(Errno::DeviceOrResourceBusy.as_neg_i32(), -16);
        assert_eq!(Errno::ValueTooLarge.as_neg_i32(), -75);
    }

    #[test]
    fn test_errno_retry_classes() {
        assert!(Errno::NoChild.is_retry());
        assert!(!Errno::TryAgain.is_retry());
        assert!(Errno::StaleFileHandle.is_stale());
        assert!(!Errno::NoChild.is_stale());
    }
}
