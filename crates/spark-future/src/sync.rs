//! 同步原语垫片。
//!
//! 默认使用标准库原子类型；启用 `--cfg loom`（或 `--cfg spark_loom`）时切换到 Loom 提供的
//! 原子类型与 `UnsafeCell`，使单次共享单元的状态机可被穷举调度检查。
//! `Arc` 保持标准实现：引用计数不在模型检查范围内。

#[cfg(not(any(loom, spark_loom)))]
pub(crate) use std::sync::atomic::{AtomicU8, Ordering};

#[cfg(any(loom, spark_loom))]
pub(crate) use loom::sync::atomic::{AtomicU8, Ordering};

#[cfg(any(loom, spark_loom))]
pub(crate) use loom::cell::UnsafeCell;

/// 与 `loom::cell::UnsafeCell` 同形的包装，访问只能通过闭包拿到裸指针。
#[cfg(not(any(loom, spark_loom)))]
#[derive(Debug)]
pub(crate) struct UnsafeCell<T>(std::cell::UnsafeCell<T>);

#[cfg(not(any(loom, spark_loom)))]
impl<T> UnsafeCell<T> {
    pub(crate) const fn new(value: T) -> Self {
        Self(std::cell::UnsafeCell::new(value))
    }

    #[inline]
    pub(crate) fn with_mut<R>(&self, f: impl FnOnce(*mut T) -> R) -> R {
        f(self.0.get())
    }
}
