//! MIT License
//!
//! Copyright (c) 2026 Fei Wang
//!
//! 路径分量哈希
//!
//! 对应 Linux 的 fs/namei.c (hash_name / full_name_hash / hashlen_string)
//! 与 include/linux/stringhash.h
//!
//! 两条路径必须逐位一致：
//! - `hash_name()`：从路径文本中扫描一个分量，遇到 `/` 或文本结尾停止，同时得到长度
//! - `full_name_hash()`：对已知长度的缓冲区求哈希
//!
//! 默认实现按 8 字节一组处理（word-at-a-time）。读取越过缓冲区结尾的部分
//! 视为 0 填充，因此不会越界。启用 `bytewise_hash` 特性时改用逐字节实现。
//!
//! `salt` 取父目录 dentry 的标识，同名文件在不同目录下得到不同的哈希。

/// 2^64 / 黄金分割比
pub const GOLDEN_RATIO_64: u64 = 0x61C8_8646_80B5_83EB;

/// 哈希与长度打包在一个 u64 中：高 32 位为长度，低 32 位为哈希
#[inline]
pub const fn hashlen_create(hash: u32, len: u32) -> u64 {
    ((len as u64) << 32) | hash as u64
}

#[inline]
pub const fn hashlen_hash(hashlen: u64) -> u32 {
    hashlen as u32
}

#[inline]
pub const fn hashlen_len(hashlen: u64) -> u32 {
    (hashlen >> 32) as u32
}

/// word-at-a-time 实现
pub mod word {
    use super::{hashlen_create, GOLDEN_RATIO_64};

    #[inline]
    fn mix(x: &mut u64, y: &mut u64, a: u64) {
        *x ^= a;
        *y ^= *x;
        *x = x.rotate_left(12);
        *x = x.wrapping_add(*y);
        *y = y.rotate_left(45);
        *y = y.wrapping_mul(9);
    }

    #[inline]
    fn fold_hash(x: u64, y: u64) -> u32 {
        let y = (y ^ x.wrapping_mul(GOLDEN_RATIO_64)).wrapping_mul(GOLDEN_RATIO_64);
        (y >> 32) as u32
    }

    /// 低 `n` 个字节的掩码（小端序）
    #[inline]
    fn bytemask(n: usize) -> u64 {
        if n >= 8 {
            u64::MAX
        } else {
            (1u64 << (n * 8)) - 1
        }
    }

    /// 从 `off` 处读取一个字，不足 8 字节的部分以 0 填充
    #[inline]
    fn load_word(bytes: &[u8], off: usize) -> u64 {
        let mut buf = [0u8; 8];
        if off < bytes.len() {
            let end = core::cmp::min(off + 8, bytes.len());
            buf[..end - off].copy_from_slice(&bytes[off..end]);
        }
        u64::from_le_bytes(buf)
    }

    /// 一个字中第一个分隔符（`/` 或 0 填充）之前的字节数
    #[inline]
    fn bytes_before_delim(word: u64) -> usize {
        let bytes = word.to_le_bytes();
        bytes
            .iter()
            .position(|&b| b == 0 || b == b'/')
            .unwrap_or(8)
    }

    /// 对长度已知的名字求哈希
    pub fn full_name_hash(salt: u64, name: &[u8]) -> u32 {
        let (mut x, mut y) = (0u64, salt);
        let mut off = 0;
        let mut left = name.len();
        loop {
            if left == 0 {
                return fold_hash(x, y);
            }
            let a = load_word(name, off);
            if left < 8 {
                x ^= a & bytemask(left);
                return fold_hash(x, y);
            }
            mix(&mut x, &mut y, a);
            off += 8;
            left -= 8;
        }
    }

    /// 对以 0 结尾（这里即切片结尾）的字符串求哈希与长度
    pub fn hashlen_string(salt: u64, name: &[u8]) -> u64 {
        let len = name.iter().position(|&b| b == 0).unwrap_or(name.len());
        let hash = full_name_hash(salt, &name[..len]);
        hashlen_create(hash, len as u32)
    }

    /// 扫描路径中的下一个分量，返回打包的哈希与长度
    ///
    /// `path` 从分量起始处开始，分量在 `/` 或切片结尾处终止。
    pub fn hash_name(salt: u64, path: &[u8]) -> u64 {
        let (mut x, mut y) = (0u64, salt);
        let mut len = 0usize;
        loop {
            let a = load_word(path, len);
            let n = bytes_before_delim(a);
            if n < 8 {
                x ^= a & bytemask(n);
                len += n;
                break;
            }
            mix(&mut x, &mut y, a);
            len += 8;
        }
        hashlen_create(fold_hash(x, y), len as u32)
    }
}

/// 逐字节实现（慢，但总是正确）
pub mod bytewise {
    use super::{hashlen_create, GOLDEN_RATIO_64};

    #[inline]
    pub fn init_name_hash(salt: u64) -> u64 {
        salt
    }

    #[inline]
    pub fn partial_name_hash(c: u8, prevhash: u64) -> u64 {
        let c = c as u64;
        prevhash
            .wrapping_add(c << 4)
            .wrapping_add(c >> 4)
            .wrapping_mul(11)
    }

    #[inline]
    pub fn end_name_hash(hash: u64) -> u32 {
        (hash.wrapping_mul(GOLDEN_RATIO_64) >> 32) as u32
    }

    pub fn full_name_hash(salt: u64, name: &[u8]) -> u32 {
        let hash = name
            .iter()
            .fold(init_name_hash(salt), |h, &c| partial_name_hash(c, h));
        end_name_hash(hash)
    }

    pub fn hashlen_string(salt: u64, name: &[u8]) -> u64 {
        let len = name.iter().position(|&b| b == 0).unwrap_or(name.len());
        hashlen_create(full_name_hash(salt, &name[..len]), len as u32)
    }

    pub fn hash_name(salt: u64, path: &[u8]) -> u64 {
        let mut hash = init_name_hash(salt);
        let mut len = 0usize;
        while let Some(&c) = path.get(len) {
            if c == b'/' || c == 0 {
                break;
            }
            hash = partial_name_hash(c, hash);
            len += 1;
        }
        hashlen_create(end_name_hash(hash), len as u32)
    }
}

#[cfg(not(feature = "bytewise_hash"))]
pub use word::{full_name_hash, hash_name, hashlen_string};

#[cfg(feature = "bytewise_hash")]
pub use bytewise::{full_name_hash, hash_name, hashlen_string};

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLES: &[&[u8]] = &[
        b"",
        b"a",
        b"ab",
        b"abcdefg",
        b"abcdefgh",
        b"abcdefghi",
        b"lost+found",
        b"a-name-that-spans-several-words-of-eight",
    ];

    #[test]
    fn test_word_paths_agree() {
        for salt in [0u64, 1, 0xdead_beef, u64::MAX] {
            for name in SAMPLES {
                let hl = word::hash_name(salt, name);
                assert_eq!(hashlen_len(hl) as usize, name.len());
                assert_eq!(hashlen_hash(hl), word::full_name_hash(salt, name));
                assert_eq!(word::hashlen_string(salt, name), hl);
            }
        }
    }

    #[test]
    fn test_bytewise_paths_agree() {
        for salt in [0u64, 7, u64::MAX] {
            for name in SAMPLES {
                let hl = bytewise::hash_name(salt, name);
                assert_eq!(hashlen_len(hl) as usize, name.len());
                assert_eq!(hashlen_hash(hl), bytewise::full_name_hash(salt, name));
            }
        }
    }

    #[test]
    fn test_hash_name_stops_at_slash() {
        let hl = hash_name(3, b"usr/lib/x");
        assert_eq!(hashlen_len(hl), 3);
        assert_eq!(hashlen_hash(hl), full_name_hash(3, b"usr"));

        // 分隔符恰好落在字边界之后
        let hl = hash_name(3, b"12345678/tail");
        assert_eq!(hashlen_len(hl), 8);
        assert_eq!(hashlen_hash(hl), full_name_hash(3, b"12345678"));
    }

    #[test]
    fn test_salt_changes_hash() {
        assert_ne!(full_name_hash(1, b"passwd"), full_name_hash(2, b"passwd"));
    }

    #[test]
    fn test_hashlen_string_stops_at_nul() {
        let hl = hashlen_string(9, b"abc\0def");
        assert_eq!(hashlen_len(hl), 3);
        assert_eq!(hashlen_hash(hl), full_name_hash(9, b"abc"));
    }
}
