//! 回调返回值的解释规则。
//!
//! # 设计背景（Why）
//! `then` / `then_expect` 的回调可以返回多种形态，而下游单元的记录类型完全由返回类型决定：
//!
//! | 返回类型                   | 下游记录    | 下游如何完成                 |
//! |----------------------------|-------------|------------------------------|
//! | `()`                       | `()`        | 立即兑现                     |
//! | `Result<T, E>`             | `(T,)`      | `Ok` 兑现，`Err` 失败        |
//! | [`Completed<E>`]           | `()`        | `Ok(())` 兑现，`Err` 失败    |
//! | `Future<R, _>`             | `R`         | 吸收该 Future 的最终结果     |
//! | [`Segmented<R>`]           | `R`         | 多字段一次兑现               |
//! | 其它值类型 `T`             | `(T,)`      | 单字段兑现                   |
//!
//! `Result<(), E>` 按通用规则得到 `((),)`，后续 `then` 需要写成 `|_: ()| ..`；
//! 想要无值 Future 时用 [`completed`] 包一层。
//!
//! # 契约说明（What）
//! - [`Resolve`] 已为基础类型、`String`、常用容器与智能指针、2 到 4 元元组实现；
//! - 自定义类型通过 [`resolve_as_value!`](crate::resolve_as_value) 注册为单字段值。

use std::{
    collections::{BTreeMap, BTreeSet, HashMap, HashSet, VecDeque},
    fmt,
    sync::Arc,
};

use crate::{error::CapturedError, record::Record};

/// 回调返回值到下游记录的映射。
pub trait Resolve: Send + 'static {
    /// 下游单元的记录类型。
    type Record: Record;

    /// 解释返回值。
    fn into_resolution(self) -> Resolution<Self::Record>;
}

/// 返回值的解释结果。
pub enum Resolution<R: Record> {
    /// 以纯值兑现。
    Values(R),
    /// 以逐槽结果完成。
    Completion(R::Completion),
    /// 硬失败。
    Failed(CapturedError),
    /// 结果由另一个单元稍后给出。
    Deferred(Deferred<R>),
}

impl<R: Record> fmt::Debug for Resolution<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Values(_) => f.write_str("Resolution::Values(..)"),
            Self::Completion(_) => f.write_str("Resolution::Completion(..)"),
            Self::Failed(error) => f.debug_tuple("Resolution::Failed").field(error).finish(),
            Self::Deferred(_) => f.write_str("Resolution::Deferred(..)"),
        }
    }
}

type Sink<R> = Box<dyn FnOnce(<R as Record>::Completion) + Send>;

/// 延迟到达的完成记录：持有“把结果送往某处”的一次性注册动作。
pub struct Deferred<R: Record> {
    forward: Box<dyn FnOnce(Sink<R>) + Send>,
}

impl<R: Record> Deferred<R> {
    /// 以注册动作构造；`register` 必须最终以完成记录调用传入的回调恰好一次。
    pub fn new<F>(register: F) -> Self
    where
        F: FnOnce(Sink<R>) + Send + 'static,
    {
        Self {
            forward: Box::new(register),
        }
    }

    pub(crate) fn forward<S>(self, sink: S)
    where
        S: FnOnce(R::Completion) + Send + 'static,
    {
        (self.forward)(Box::new(sink));
    }
}

/// 多字段返回值的标记包装，见 [`segmented`]。
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Segmented<R: Record>(pub R);

/// 让回调一次返回多个字段：`segmented((12, "x"))` 使下游记录为 `(i32, &str)`。
pub fn segmented<R: Record>(values: R) -> Segmented<R> {
    Segmented(values)
}

impl<R: Record> Resolve for Segmented<R> {
    type Record = R;

    fn into_resolution(self) -> Resolution<R> {
        Resolution::Values(self.0)
    }
}

/// 无值结果的标记包装，见 [`completed`]。
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Completed<E>(pub Result<(), E>);

/// 让回调以 `Result<(), E>` 结束并得到无值 Future：`Ok(())` 兑现，`Err` 失败。
pub fn completed<E>(result: Result<(), E>) -> Completed<E> {
    Completed(result)
}

impl<E> Resolve for Completed<E>
where
    E: Into<CapturedError> + Send + 'static,
{
    type Record = ();

    fn into_resolution(self) -> Resolution<()> {
        match self.0 {
            Ok(()) => Resolution::Values(()),
            Err(error) => Resolution::Failed(error.into()),
        }
    }
}

impl Resolve for () {
    type Record = ();

    fn into_resolution(self) -> Resolution<()> {
        Resolution::Values(())
    }
}

impl<T, E> Resolve for Result<T, E>
where
    T: Send + 'static,
    E: Into<CapturedError> + Send + 'static,
{
    type Record = (T,);

    fn into_resolution(self) -> Resolution<(T,)> {
        match self {
            Ok(value) => Resolution::Values((value,)),
            Err(error) => Resolution::Failed(error.into()),
        }
    }
}

/// 把类型注册为“单字段值”返回类型。
///
/// ```
/// use spark_future::{Promise, resolve_as_value};
///
/// #[derive(Debug, PartialEq)]
/// struct Celsius(f64);
/// resolve_as_value!(Celsius);
///
/// let mut promise = Promise::<(f64,)>::new();
/// let future = promise.get_future().then(|raw: f64| Celsius(raw));
/// promise.set_value((21.5,));
/// assert_eq!(future.get().ok(), Some(Celsius(21.5)));
/// ```
#[macro_export]
macro_rules! resolve_as_value {
    ($($ty:ty),+ $(,)?) => {
        $(
            impl $crate::Resolve for $ty {
                type Record = ($ty,);

                fn into_resolution(self) -> $crate::Resolution<Self::Record> {
                    $crate::Resolution::Values((self,))
                }
            }
        )+
    };
}

resolve_as_value!(
    bool, char, u8, u16, u32, u64, u128, usize, i8, i16, i32, i64, i128, isize, f32, f64,
    String, &'static str, std::time::Duration,
);

macro_rules! resolve_generic_as_value {
    ($(<$($param:ident $(: $bound:path)?),+> $ty:ty;)+) => {
        $(
            impl<$($param: Send + 'static $(+ $bound)?),+> Resolve for $ty {
                type Record = ($ty,);

                fn into_resolution(self) -> Resolution<Self::Record> {
                    Resolution::Values((self,))
                }
            }
        )+
    };
}

resolve_generic_as_value! {
    <T> Vec<T>;
    <T> VecDeque<T>;
    <T> Option<T>;
    <T> Box<T>;
    <T: Sync> Arc<T>;
    <T> HashSet<T>;
    <T> BTreeSet<T>;
    <K, V> HashMap<K, V>;
    <K, V> BTreeMap<K, V>;
    <A, B> (A, B);
    <A, B, C> (A, B, C);
    <A, B, C, D> (A, B, C, D);
}
