//! # error 模块说明
//!
//! ## 角色定位（Why）
//! - 续延引擎需要在“生产者线程”与“消费者线程”之间搬运失败信息，且同一个失败可能被复制到
//!   多个槽位（硬失败扇出）或多个下游（`join` 的逐槽结果），因此错误载体必须可廉价克隆；
//! - 引擎自身只产生两类错误：承诺被丢弃而未兑现、回调 panic。二者集中定义在 [`FutureError`]。
//!
//! ## 设计要求（What）
//! - [`CapturedError`] 以 `Arc<anyhow::Error>` 擦除具体类型，任何 `std::error::Error + Send + Sync + 'static`
//!   均可通过 `From` 转入；
//! - [`Expected<T>`] 是每个值槽的“值或错误”表示；
//! - 契约违例（重复兑现、重复取 Future 等）不走错误通道，而是直接 panic。
//!
//! ## 扩展建议（How）
//! - 业务错误保持自身类型即可，消费者通过 [`CapturedError::downcast_ref`] 取回原始类型；
//! - 已持有 `anyhow::Error` 的调用方使用 [`CapturedError::from_anyhow`] 转换。

use std::{any::Any, fmt, sync::Arc};

use thiserror::Error;

/// 单个值槽的结果：要么是值，要么是被捕获的错误。
pub type Expected<T> = Result<T, CapturedError>;

/// 引擎自身产生的错误域。
///
/// # 教案式说明
/// - **意图 (Why)**：区分“生产者未交付”与“回调自身崩溃”，便于消费者决定是否重试；
/// - **契约 (What)**：变体均为 `Clone + Send + Sync + 'static`，可被包装进 [`CapturedError`] 后跨线程传播；
/// - **权衡 (Trade-offs)**：panic 载荷被字符串化保存，原始 `Box<dyn Any>` 不再可用。
#[derive(Clone, Debug, Eq, PartialEq, Error)]
pub enum FutureError {
    /// 承诺在兑现前被销毁。
    #[error("unfulfilled promise")]
    UnfulfilledPromise,
    /// `then` / `then_expect` / `for_each` 回调发生 panic，消息取自 panic 载荷。
    #[error("continuation callback panicked: {message}")]
    CallbackPanicked { message: String },
}

/// 类型擦除、可克隆的错误载体。
///
/// # 设计背景（Why）
/// - 硬失败需要复制到记录的每一个槽位，`join` 也需要把同一失败交给下游，故内部使用 `Arc` 共享；
/// - 选用 `anyhow::Error` 作为擦除层，保留 `downcast` 能力与错误链。
///
/// # 契约说明（What）
/// - 本类型刻意不实现 `std::error::Error`，以便为所有标准错误提供 `From` 转换；
/// - `Display` / `Debug` 直接委托给内部错误。
#[derive(Clone)]
pub struct CapturedError {
    inner: Arc<anyhow::Error>,
}

impl CapturedError {
    /// 包装任意标准错误。
    pub fn new<E>(error: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::from_anyhow(anyhow::Error::new(error))
    }

    /// 以可显示的消息构造错误，适合测试或无需结构化类型的场景。
    pub fn msg<M>(message: M) -> Self
    where
        M: fmt::Display + fmt::Debug + Send + Sync + 'static,
    {
        Self::from_anyhow(anyhow::Error::msg(message))
    }

    /// 接管已有的 `anyhow::Error`。
    pub fn from_anyhow(error: anyhow::Error) -> Self {
        Self {
            inner: Arc::new(error),
        }
    }

    /// 承诺未兑现时注入的标准错误。
    pub fn unfulfilled_promise() -> Self {
        Self::new(FutureError::UnfulfilledPromise)
    }

    /// 将 `catch_unwind` 捕获的 panic 载荷转为 [`FutureError::CallbackPanicked`]。
    ///
    /// 载荷为 `&str` 或 `String` 时保留原文，其余类型记为 `<non-string panic payload>`。
    pub fn from_panic(payload: Box<dyn Any + Send>) -> Self {
        let message = if let Some(text) = payload.downcast_ref::<&str>() {
            (*text).to_owned()
        } else if let Some(text) = payload.downcast_ref::<String>() {
            text.clone()
        } else {
            "<non-string panic payload>".to_owned()
        };
        Self::new(FutureError::CallbackPanicked { message })
    }

    /// 尝试取回原始错误类型的引用。
    pub fn downcast_ref<E>(&self) -> Option<&E>
    where
        E: fmt::Display + fmt::Debug + Send + Sync + 'static,
    {
        self.inner.downcast_ref::<E>()
    }

    /// 判断内部错误是否为类型 `E`。
    pub fn is<E>(&self) -> bool
    where
        E: fmt::Display + fmt::Debug + Send + Sync + 'static,
    {
        self.inner.is::<E>()
    }

    /// 是否为“承诺未兑现”。
    pub fn is_unfulfilled_promise(&self) -> bool {
        matches!(
            self.downcast_ref::<FutureError>(),
            Some(FutureError::UnfulfilledPromise)
        )
    }

    /// 是否由回调 panic 产生。
    pub fn is_callback_panic(&self) -> bool {
        matches!(
            self.downcast_ref::<FutureError>(),
            Some(FutureError::CallbackPanicked { .. })
        )
    }

    /// 借出内部的 `anyhow::Error`，用于遍历错误链。
    pub fn as_anyhow(&self) -> &anyhow::Error {
        &self.inner
    }

    /// 两个句柄是否指向同一个被捕获的错误实例。
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl<E> From<E> for CapturedError
where
    E: std::error::Error + Send + Sync + 'static,
{
    fn from(error: E) -> Self {
        Self::new(error)
    }
}

impl fmt::Display for CapturedError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&*self.inner, f)
    }
}

impl fmt::Debug for CapturedError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&*self.inner, f)
    }
}
