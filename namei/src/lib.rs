//! MIT License
//!
//! Copyright (c) 2026 Fei Wang
//!
//! rux-namei: Linux 风格的路径名解析
//!
//! 把路径字符串解析为 (挂载, 目录项)，并在其上实现创建、删除、
//! 链接、重命名和打开。内核内使用 `no_std + alloc`，测试在宿主机上运行。

#![cfg_attr(not(test), no_std)]

extern crate alloc;
extern crate log;

pub mod config;
pub mod errno;
pub mod collection;
pub mod sync;
pub mod process;
pub mod sysctl;
pub mod security;
pub mod fs;

#[cfg(test)]
mod tests;

pub use errno::Errno;
