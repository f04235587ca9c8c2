//! rux-namei 配置（自动生成）
//!
//! 此文件由 build.rs 根据 Namei.toml 自动生成，请勿手动修改

// ============================================================
// 路径解析限制
// ============================================================

/// 单次解析（含嵌套解析）允许展开的符号链接总数
pub const MAXSYMLINKS: u32 = 40;

/// 路径最大长度（字节，含结尾 NUL）
pub const PATH_MAX: usize = 4096;

/// 单个路径分量最大长度
pub const NAME_MAX: usize = 255;

/// 符号链接栈内联层数
pub const EMBEDDED_LEVELS: usize = 2;

// ============================================================
// dcache 配置
// ============================================================

/// 每个超级块的 dentry 哈希桶数量
pub const DCACHE_HASH_BUCKETS: usize = 256;

// ============================================================
// 保护策略默认值 (fs.protected_*)
// ============================================================

/// fs.protected_symlinks 默认值 (0/1)
pub const DEFAULT_PROTECTED_SYMLINKS: u32 = 1;

/// fs.protected_hardlinks 默认值 (0/1)
pub const DEFAULT_PROTECTED_HARDLINKS: u32 = 1;

/// fs.protected_fifos 默认值 (0/1/2)
pub const DEFAULT_PROTECTED_FIFOS: u32 = 1;

/// fs.protected_regular 默认值 (0/1/2)
pub const DEFAULT_PROTECTED_REGULAR: u32 = 2;
