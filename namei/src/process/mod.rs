//! MIT License
//!
//! Copyright (c) 2026 Fei Wang
//!
//! 进程上下文
//!
//! 只保留路径解析需要的部分：凭证与 `Task`

pub mod cred;
pub mod task;

pub use cred::{Capabilities, Cred, INVALID_GID, INVALID_UID};
pub use task::Task;
