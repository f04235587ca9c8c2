//! MIT License
//!
//! Copyright (c) 2026 Fei Wang
//!
//! 虚拟文件系统 (VFS) 的路径解析部分
//!
//! 完全遵循 Linux 内核的 VFS 设计：
//! - `dentry`: 目录项缓存 (fs/dcache.c)
//! - `inode`: 索引节点与驱动操作表 (fs/inode.c)
//! - `mount`: 挂载表 (fs/namespace.c)
//! - `walk`: 路径遍历 (fs/namei.c 的 link_path_walk 一族)
//! - `namei`: 基于遍历的 vfs_* / do_*at 操作 (fs/namei.c)
//! - `open`: 打开路径 (fs/open.c + do_filp_open)
//! - `rename`: 重命名与目录锁 (fs/namei.c)
//! - `rootfs`: 内存文件系统 (fs/ramfs)

pub mod hash;
pub mod filename;
pub mod posix_acl;
pub mod perm;
pub mod superblock;
pub mod inode;
pub mod dentry;
pub mod mount;
pub mod path;
pub mod fs_struct;
pub mod link;
pub mod walk;
pub mod namei;
pub mod open;
pub mod rename;
pub mod rootfs;

pub use dentry::{Dentry, DentryOperations, DentryRef, QStr};
pub use filename::PathName;
pub use fs_struct::FsStruct;
pub use inode::{Inode, InodeMode, InodeOperations};
pub use mount::{MountRef, VfsMount};
pub use namei::{
    do_linkat, do_mkdirat, do_mknodat, do_rmdir, do_symlinkat, do_unlinkat, filename_create, filename_lookup,
    kern_path, lookup_one, user_path_at, vfs_create, vfs_link, vfs_mkdir, vfs_mknod, vfs_rmdir, vfs_symlink,
    vfs_unlink,
};
pub use open::{do_filp_open, do_sys_open, do_sys_openat2, filp_open, OpenFlags, OpenHow, OpenedFile};
pub use path::{LookupFlags, Path};
pub use rename::{do_renameat2, lock_rename, vfs_rename, RenameFlags};
pub use superblock::{FileSystemType, SuperBlock};
