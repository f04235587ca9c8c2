//! MIT License
//!
//! Copyright (c) 2026 Fei Wang
//!
//! 小容量集合类型
//!
//! `InlineVec` 先使用固定大小的内联数组，超出后整体搬到堆上。
//! 对应 Linux nameidata 中 `internal[EMBEDDED_LEVELS]` + `nd_alloc_stack()`
//! 的做法，这里做成通用类型。

use alloc::vec::Vec;
use core::mem;

use crate::errno::Errno;

/// 内联优先、按需溢出到堆的向量
pub enum InlineVec<T, const N: usize> {
    /// 内联存储，`len` 之前的槽位都是 `Some`
    Inline { slots: [Option<T>; N], len: usize },
    /// 已溢出到堆
    Spilled(Vec<T>),
}

impl<T, const N: usize> InlineVec<T, N> {
    pub fn new() -> Self {
        InlineVec::Inline {
            slots: core::array::from_fn(|_| None),
            len: 0,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            InlineVec::Inline { len, .. } => *len,
            InlineVec::Spilled(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// 是否已经溢出到堆上
    pub fn is_spilled(&self) -> bool {
        matches!(self, InlineVec::Spilled(_))
    }

    /// 内联存储已满，下一次 push 需要分配
    pub fn needs_spill(&self) -> bool {
        matches!(self, InlineVec::Inline { len, .. } if *len == N)
    }

    /// 把内联内容搬到容量为 `capacity` 的堆数组
    ///
    /// 分配失败返回 ENOMEM，原有内容保持不变。
    pub fn spill(&mut self, capacity: usize) -> Result<(), Errno> {
        let InlineVec::Inline { slots, len } = self else {
            return Ok(());
        };
        let mut heap = Vec::new();
        heap.try_reserve_exact(capacity.max(*len + 1))
            .map_err(|_| Errno::OutOfMemory)?;
        for slot in slots.iter_mut().take(*len) {
            if let Some(item) = slot.take() {
                heap.push(item);
            }
        }
        *self = InlineVec::Spilled(heap);
        Ok(())
    }

    /// 压入元素
    ///
    /// 内联存储已满时先调用 [`spill`](Self::spill)。
    pub fn push(&mut self, item: T) -> Result<(), Errno> {
        if self.needs_spill() {
            self.spill(N * 2)?;
        }
        match self {
            InlineVec::Inline { slots, len } => {
                slots[*len] = Some(item);
                *len += 1;
                Ok(())
            }
            InlineVec::Spilled(v) => {
                v.try_reserve(1).map_err(|_| Errno::OutOfMemory)?;
                v.push(item);
                Ok(())
            }
        }
    }

    pub fn pop(&mut self) -> Option<T> {
        match self {
            InlineVec::Inline { slots, len } => {
                if *len == 0 {
                    return None;
                }
                *len -= 1;
                slots[*len].take()
            }
            InlineVec::Spilled(v) => v.pop(),
        }
    }

    pub fn get(&self, index: usize) -> Option<&T> {
        match self {
            InlineVec::Inline { slots, len } => {
                if index < *len {
                    slots[index].as_ref()
                } else {
                    None
                }
            }
            InlineVec::Spilled(v) => v.get(index),
        }
    }

    pub fn get_mut(&mut self, index: usize) -> Option<&mut T> {
        match self {
            InlineVec::Inline { slots, len } => {
                if index < *len {
                    slots[index].as_mut()
                } else {
                    None
                }
            }
            InlineVec::Spilled(v) => v.get_mut(index),
        }
    }

    pub fn last_mut(&mut self) -> Option<&mut T> {
        let len = self.len();
        if len == 0 {
            return None;
        }
        self.get_mut(len - 1)
    }

    /// 按压栈顺序遍历
    pub fn for_each_mut<F: FnMut(&mut T)>(&mut self, mut f: F) {
        match self {
            InlineVec::Inline { slots, len } => {
                for slot in slots.iter_mut().take(*len) {
                    if let Some(item) = slot.as_mut() {
                        f(item);
                    }
                }
            }
            InlineVec::Spilled(v) => v.iter_mut().for_each(f),
        }
    }

    /// 按压栈顺序遍历，遇到错误立即停止
    pub fn try_for_each_mut<E, F>(&mut self, mut f: F) -> Result<(), E>
    where
        F: FnMut(&mut T) -> Result<(), E>,
    {
        match self {
            InlineVec::Inline { slots, len } => {
                for slot in slots.iter_mut().take(*len) {
                    if let Some(item) = slot.as_mut() {
                        f(item)?;
                    }
                }
                Ok(())
            }
            InlineVec::Spilled(v) => v.iter_mut().try_for_each(f),
        }
    }

    /// 从栈顶开始逐个弹出并丢弃，回到内联存储
    pub fn clear(&mut self) {
        while self.pop().is_some() {}
        if self.is_spilled() {
            let _ = mem::replace(self, InlineVec::new());
        }
    }
}

impl<T, const N: usize> Default for InlineVec<T, N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T, const N: usize> Drop for InlineVec<T, N> {
    fn drop(&mut self) {
        // 保证按 LIFO 顺序释放，与 put_link 顺序一致
        while self.pop().is_some() {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::rc::Rc;
    use core::cell::RefCell;

    #[test]
    fn test_inline_then_spill() {
        let mut v: InlineVec<u32, 2> = InlineVec::new();
        v.push(1).unwrap();
        v.push(2).unwrap();
        assert!(!v.is_spilled());
        assert!(v.needs_spill());
        v.push(3).unwrap();
        assert!(v.is_spilled());
        assert_eq!(v.len(), 3);
        assert_eq!(v.get(0), Some(&1));
        assert_eq!(v.pop(), Some(3));
        assert_eq!(v.pop(), Some(2));
        assert_eq!(v.pop(), Some(1));
        assert_eq!(v.pop(), None);
    }

    #[test]
    fn test_drop_order_is_lifo() {
        struct Tracker(u32, Rc<RefCell<alloc::vec::Vec<u32>>>);
        impl Drop for Tracker {
            fn drop(&mut self) {
                self.1.borrow_mut().push(self.0);
            }
        }

        let log = Rc::new(RefCell::new(alloc::vec::Vec::new()));
        {
            let mut v: InlineVec<Tracker, 2> = InlineVec::new();
            for i in 0..4 {
                v.push(Tracker(i, log.clone())).unwrap();
            }
        }
        assert_eq!(*log.borrow(), [3, 2, 1, 0]);
    }

    #[test]
    fn test_clear_returns_to_inline() {
        let mut v: InlineVec<u8, 1> = InlineVec::new();
        v.push(1).unwrap();
        v.push(2).unwrap();
        assert!(v.is_spilled());
        v.clear();
        assert!(!v.is_spilled());
        assert!(v.is_empty());
    }
}
