//! rux-namei 构建脚本
//!
//! 这个脚本在编译前运行，负责：
//! 1. 解析 Namei.toml 配置文件（或 build/.config）
//! 2. 生成 src/config.rs 常量

use std::collections::HashMap;
use std::env;
use std::fs;
use std::path::PathBuf;

/// 解析 build/.config 文件（`section_key=value` 格式）
fn parse_dot_config(content: &str) -> toml::Value {
    let mut sections: HashMap<String, toml::map::Map<String, toml::Value>> = HashMap::new();

    for line in content.lines() {
        let line = line.trim();

        // 跳过注释和空行
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let Some((key, value)) = line.split_once('=') else {
            continue;
        };
        let value = value.trim();

        // 分割 section_key（使用第一个下划线分割）
        if let Some((section, config_key)) = key.trim().split_once('_') {
            let parsed_value = if value == "true" {
                toml::Value::Boolean(true)
            } else if value == "false" {
                toml::Value::Boolean(false)
            } else if let Ok(int_val) = value.parse::<i64>() {
                toml::Value::Integer(int_val)
            } else {
                toml::Value::String(value.trim_matches('"').to_string())
            };

            sections
                .entry(section.to_string())
                .or_default()
                .insert(config_key.to_string(), parsed_value);
        }
    }

    let mut root_map = toml::map::Map::new();
    for (section_name, section_data) in sections {
        root_map.insert(section_name, toml::Value::Table(section_data));
    }
    toml::Value::Table(root_map)
}

fn int_or(config: &toml::Value, section: &str, key: &str, default: i64) -> i64 {
    config
        .get(section)
        .and_then(|s| s.get(key))
        .and_then(|v| v.as_integer())
        .unwrap_or(default)
}

fn level_or(config: &toml::Value, key: &str, default: i64, max: i64) -> i64 {
    let value = int_or(config, "protection", key, default);
    if !(0..=max).contains(&value) {
        println!(
            "cargo:warning=protection.{} = {} out of range 0..={}, using {}",
            key, value, max, default
        );
        return default;
    }
    value
}

fn main() {
    println!("cargo:rerun-if-changed=../Namei.toml");
    println!("cargo:rerun-if-changed=../build/.config");

    let config_content = fs::read_to_string("../build/.config")
        .or_else(|_| fs::read_to_string("../Namei.toml"))
        .unwrap_or_default();

    // 判断配置文件类型：检查是否有 TOML 的 [section] 格式
    let is_toml = config_content.lines().any(|line| {
        let trimmed = line.trim();
        trimmed.starts_with('[') && trimmed.ends_with(']')
    });

    let config = if is_toml {
        toml::from_str(&config_content).expect("Namei.toml 解析失败")
    } else {
        parse_dot_config(&config_content)
    };

    generate_config_code(&config);
}

fn generate_config_code(config: &toml::Value) {
    let manifest_dir = PathBuf::from(env::var("CARGO_MANIFEST_DIR").expect("CARGO_MANIFEST_DIR"));

    let max_symlinks = int_or(config, "limits", "max_symlinks", 40);
    let path_max = int_or(config, "limits", "path_max", 4096);
    let name_max = int_or(config, "limits", "name_max", 255);
    let embedded_levels = int_or(config, "limits", "embedded_levels", 2).max(1);
    let hash_buckets = (int_or(config, "dcache", "hash_buckets", 256).max(1) as u64).next_power_of_two();

    let config_code = format!(
        r#"//! rux-namei 配置（自动生成）
//!
//! 此文件由 build.rs 根据 Namei.toml 自动生成，请勿手动修改

// ============================================================
// 路径解析限制
// ============================================================

/// 单次解析（含嵌套解析）允许展开的符号链接总数
pub const MAXSYMLINKS: u32 = {};

/// 路径最大长度（字节，含结尾 NUL）
pub const PATH_MAX: usize = {};

/// 单个路径分量最大长度
pub const NAME_MAX: usize = {};

/// 符号链接栈内联层数
pub const EMBEDDED_LEVELS: usize = {};

// ============================================================
// dcache 配置
// ============================================================

/// 每个超级块的 dentry 哈希桶数量
pub const DCACHE_HASH_BUCKETS: usize = {};

// ============================================================
// 保护策略默认值 (fs.protected_*)
// ============================================================

/// fs.protected_symlinks 默认值 (0/1)
pub const DEFAULT_PROTECTED_SYMLINKS: u32 = {};

/// fs.protected_hardlinks 默认值 (0/1)
pub const DEFAULT_PROTECTED_HARDLINKS: u32 = {};

/// fs.protected_fifos 默认值 (0/1/2)
pub const DEFAULT_PROTECTED_FIFOS: u32 = {};

/// fs.protected_regular 默认值 (0/1/2)
pub const DEFAULT_PROTECTED_REGULAR: u32 = {};
"#,
        max_symlinks,
        path_max,
        name_max,
        embedded_levels,
        hash_buckets,
        level_or(config, "protected_symlinks", 1, 1),
        level_or(config, "protected_hardlinks", 1, 1),
        level_or(config, "protected_fifos", 1, 2),
        level_or(config, "protected_regular", 2, 2),
    );

    // 只在内容变化时写入，避免触发无谓的重新编译
    let config_path = manifest_dir.join("src/config.rs");
    let existing = fs::read_to_string(&config_path).unwrap_or_default();
    if existing != config_code {
        fs::write(&config_path, config_code).expect("无法写入 config.rs");
    }
}
