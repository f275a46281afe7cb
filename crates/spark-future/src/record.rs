//! 结果模型：把“声明的值类型列表”映射为兑现记录、完成记录与阻塞获取的值类型。
//!
//! # 模块定位（Why）
//! - 一个 Future 可以携带零到多个值，每个值槽都可能独立失败；
//! - 续延引擎需要在三种形态之间转换：生产者交付的**兑现记录**（纯值）、
//!   处理器接收的**完成记录**（每槽一个 [`Expected`]）、以及阻塞等待返回的**值类型**。
//!
//! # 形态对照（What）
//!
//! | 记录 `R`            | `R::Completion`                    | `R::Value`     |
//! |---------------------|------------------------------------|----------------|
//! | `()`                | `(Expected<()>,)`                  | `()`           |
//! | `(T,)`              | `(Expected<T>,)`                   | `T`            |
//! | `(T1, .., Tn)`, n≥2 | `(Expected<T1>, .., Expected<Tn>)` | `(T1, .., Tn)` |
//!
//! 空记录仍保留一个 `Expected<()>` 槽，使“无值”的 Future 也能承载失败。
//!
//! # 不变量
//! - `R::from_completion(r.into_completion()) == Ok(r)`；
//! - `from_completion` 自左向右返回第一个错误。

use crate::error::{CapturedError, Expected};

/// 值类型列表的抽象。
///
/// 由本模块为 `()` 以及 1 到 6 元元组实现；调用方无需手动实现。
pub trait Record: Sized + Send + 'static {
    /// 每个槽位一个 [`Expected`] 的完成记录。
    type Completion: Send + 'static;
    /// 阻塞获取时返回的值。
    type Value: Send + 'static;

    /// 把纯值提升为全部成功的完成记录。
    fn into_completion(self) -> Self::Completion;

    /// 硬失败：把同一个错误复制到每个槽位。
    fn failed(error: &CapturedError) -> Self::Completion;

    /// 全部成功时还原兑现记录，否则返回自左向右的第一个错误。
    fn from_completion(completion: Self::Completion) -> Result<Self, CapturedError>;

    /// 兑现记录转为阻塞获取的值。
    fn into_value(self) -> Self::Value;

    /// `from_completion` 与 `into_value` 的组合，`join`、阻塞桥接都依赖它。
    fn value_from_completion(completion: Self::Completion) -> Expected<Self::Value> {
        Self::from_completion(completion).map(Self::into_value)
    }
}

impl Record for () {
    type Completion = (Expected<()>,);
    type Value = ();

    fn into_completion(self) -> Self::Completion {
        (Ok(()),)
    }

    fn failed(error: &CapturedError) -> Self::Completion {
        (Err(error.clone()),)
    }

    fn from_completion((slot,): Self::Completion) -> Result<Self, CapturedError> {
        slot
    }

    fn into_value(self) -> Self::Value {}
}

impl<T: Send + 'static> Record for (T,) {
    type Completion = (Expected<T>,);
    type Value = T;

    fn into_completion(self) -> Self::Completion {
        (Ok(self.0),)
    }

    fn failed(error: &CapturedError) -> Self::Completion {
        (Err(error.clone()),)
    }

    fn from_completion((slot,): Self::Completion) -> Result<Self, CapturedError> {
        slot.map(|value| (value,))
    }

    fn into_value(self) -> Self::Value {
        self.0
    }
}

// 元组表达式自左向右求值，`?` 因而天然返回最左侧的错误。
macro_rules! impl_record_for_tuple {
    ($($ty:ident $var:ident),+) => {
        impl<$($ty: Send + 'static),+> Record for ($($ty,)+) {
            type Completion = ($(Expected<$ty>,)+);
            type Value = Self;

            fn into_completion(self) -> Self::Completion {
                let ($($var,)+) = self;
                ($(Ok($var),)+)
            }

            fn failed(error: &CapturedError) -> Self::Completion {
                ($(Err::<$ty, CapturedError>(error.clone()),)+)
            }

            fn from_completion(completion: Self::Completion) -> Result<Self, CapturedError> {
                let ($($var,)+) = completion;
                Ok(($($var?,)+))
            }

            fn into_value(self) -> Self::Value {
                self
            }
        }
    };
}

impl_record_for_tuple!(A a, B b);
impl_record_for_tuple!(A a, B b, C c);
impl_record_for_tuple!(A a, B b, C c, D d);
impl_record_for_tuple!(A a, B b, C c, D d, E e);
impl_record_for_tuple!(A a, B b, C c, D d, E e, F f);
