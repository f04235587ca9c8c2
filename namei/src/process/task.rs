//! MIT License
//!
//! Copyright (c) 2026 Fei Wang
//!
//! 路径解析的进程上下文
//!
//! Linux 通过 `current` 隐式取得凭证、fs_struct 和当前的 nameidata。
//! 这里把它们显式地放在 `Task` 里，由调用者传入每个入口函数。

use alloc::sync::Arc;

use crate::fs::fs_struct::FsStruct;
use crate::process::cred::Cred;
use crate::security::SecurityHooks;
use crate::sysctl::ProtectionPolicy;

/// 执行路径解析的任务
#[derive(Clone)]
pub struct Task {
    /// 凭证
    pub cred: Arc<Cred>,
    /// 根目录、当前目录与 umask
    pub fs: Arc<FsStruct>,
    /// fs.protected_* 策略
    pub policy: Arc<ProtectionPolicy>,
    /// 安全模块钩子
    pub security: Option<Arc<dyn SecurityHooks>>,
}

impl Task {
    /// 使用全局默认保护策略创建任务
    pub fn new(cred: Cred, fs: Arc<FsStruct>) -> Self {
        Self {
            cred: Arc::new(cred),
            fs,
            policy: crate::sysctl::default_policy(),
            security: None,
        }
    }

    pub fn with_policy(mut self, policy: Arc<ProtectionPolicy>) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_security(mut self, hooks: Arc<dyn SecurityHooks>) -> Self {
        self.security = Some(hooks);
        self
    }

    /// 以另一份凭证执行（共享 fs_struct）
    pub fn with_cred(&self, cred: Cred) -> Self {
        Self {
            cred: Arc::new(cred),
            ..self.clone()
        }
    }

    #[inline]
    pub fn cred(&self) -> &Cred {
        &self.cred
    }

    #[inline]
    pub fn fsuid(&self) -> u32 {
        self.cred.fsuid
    }
}

impl Task {
    /// 调用已注册的安全模块钩子；没有注册时直接放行
    pub(crate) fn lsm<F>(&self, hook: F) -> Result<(), crate::errno::Errno>
    where
        F: FnOnce(&dyn SecurityHooks) -> Result<(), crate::errno::Errno>,
    {
        match &self.security {
            Some(hooks) => hook(hooks.as_ref()),
            None => Ok(()),
        }
    }
}
