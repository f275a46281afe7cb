//! Future / Promise 外观。
//!
//! # 模块定位（Why）
//! - [`Promise`] 是生产者句柄，[`Future`] 是消费者句柄，二者共享一个单次交接单元；
//! - 两个句柄都只能移动、不能复制：生产者恰好交付一次，消费者恰好挂接一次，
//!   这是单元无锁协议成立的前提。
//!
//! # 使用指引（How）
//! ```
//! use spark_future::{Expected, Promise};
//!
//! let mut promise = Promise::<(i32,)>::new();
//! let doubled = promise
//!     .get_future()
//!     .then(|n: i32| n * 2)
//!     .then_expect(|slot: Expected<i32>| slot.map(|n| n + 1));
//! promise.set_value((20,));
//! assert_eq!(doubled.get().ok(), Some(41));
//! ```
//!
//! # 契约说明（What）
//! - 兑现类操作（`set_value` / `finish` / `set_exception`）重复调用会 panic；
//! - `get_future` 重复调用会 panic；
//! - 未兑现就被丢弃的 `Promise` 以 [`FutureError::UnfulfilledPromise`](crate::FutureError) 失败共享单元；
//! - 对默认构造（未初始化）的 `Future` 挂接续延会 panic。

use std::{
    fmt,
    future::{Future as StdFuture, IntoFuture},
    pin::Pin,
    sync::Arc,
    task::{Context, Poll},
};

use futures::{channel::oneshot, executor::block_on};
use tracing::{debug, trace};

use crate::{
    allocator::{CellAllocator, Global},
    apply::Apply,
    cell::{SharedState, StatePtr},
    error::{CapturedError, Expected},
    handler::{FinallyHandler, then_expect_pair, then_pair},
    queue::{ImmediateQueue, Queue},
    record::Record,
    resolve::{Deferred, Resolution, Resolve},
};

/// 生产者句柄。
///
/// # 教案式说明
/// - **意图 (Why)**：把“交付一次结果”的能力与“消费结果”的能力拆开，分别交给不同的参与方；
/// - **逻辑 (How)**：共享单元在第一次需要时才分配（取 Future 或先交付结果）；交付完成且 Future
///   已取出后立即释放自身引用，使单元的生命周期只受消费者一侧约束；
/// - **契约 (What)**：分配器实例在构造时注入，并传播到此后派生的每个单元与处理器；
/// - **权衡 (Trade-offs)**：兑现方法接收 `&mut self` 而非消耗 `self`，以便在 `Drop` 中区分
///   “已兑现”与“被遗弃”。
pub struct Promise<R: Record, A: CellAllocator = Global> {
    allocator: A,
    state: Option<StatePtr<R, A>>,
    future_created: bool,
    satisfied: bool,
}

impl<R: Record> Promise<R, Global> {
    /// 使用默认分配器创建。
    pub fn new() -> Self {
        Self::with_allocator(Global)
    }
}

impl<R: Record> Default for Promise<R, Global> {
    fn default() -> Self {
        Self::new()
    }
}

impl<R: Record, A: CellAllocator> Promise<R, A> {
    /// 使用指定分配器创建。
    pub fn with_allocator(allocator: A) -> Self {
        Self {
            allocator,
            state: None,
            future_created: false,
            satisfied: false,
        }
    }

    /// 取出对应的 Future；每个 Promise 只能调用一次。
    pub fn get_future(&mut self) -> Future<R, A> {
        assert!(
            !self.future_created,
            "get_future() called twice on the same promise"
        );
        self.future_created = true;
        let state = Arc::clone(self.ensure_state());
        if self.satisfied {
            self.state = None;
        }
        Future::from_state(state)
    }

    /// 以纯值兑现。
    pub fn set_value(&mut self, values: R) {
        self.begin_satisfy();
        self.ensure_state().fulfill(values);
        self.release_after_satisfy();
    }

    /// 以逐槽结果兑现，允许部分槽位失败。
    pub fn finish(&mut self, completion: R::Completion) {
        self.begin_satisfy();
        self.ensure_state().complete(completion);
        self.release_after_satisfy();
    }

    /// 以同一个错误使所有槽位失败。
    pub fn set_exception(&mut self, error: impl Into<CapturedError>) {
        let error = error.into();
        self.begin_satisfy();
        self.ensure_state().fail(&error);
        self.release_after_satisfy();
    }

    /// 尚未兑现。
    pub fn is_pending(&self) -> bool {
        !self.satisfied
    }

    /// 注入的分配器。
    pub fn allocator(&self) -> &A {
        &self.allocator
    }

    fn ensure_state(&mut self) -> &StatePtr<R, A> {
        let allocator = &self.allocator;
        self.state
            .get_or_insert_with(|| SharedState::allocate(allocator.clone()))
    }

    fn begin_satisfy(&mut self) {
        assert!(!self.satisfied, "promise already satisfied");
        self.satisfied = true;
    }

    fn release_after_satisfy(&mut self) {
        if self.future_created {
            self.state = None;
        }
    }
}

impl<R: Record, A: CellAllocator> Drop for Promise<R, A> {
    fn drop(&mut self) {
        if self.satisfied {
            return;
        }
        if let Some(state) = self.state.take() {
            debug!("promise dropped before being satisfied; failing its future");
            state.fail(&CapturedError::unfulfilled_promise());
        }
    }
}

impl<R: Record, A: CellAllocator> fmt::Debug for Promise<R, A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Promise")
            .field("future_created", &self.future_created)
            .field("satisfied", &self.satisfied)
            .finish()
    }
}

/// 消费者句柄。
///
/// 续延方法都消耗 `self` 并返回新的 Future；默认构造得到未初始化的句柄，
/// 只能用于占位，对其挂接续延会 panic。
pub struct Future<R: Record, A: CellAllocator = Global> {
    state: Option<StatePtr<R, A>>,
}

impl<R: Record, A: CellAllocator> Default for Future<R, A> {
    fn default() -> Self {
        Self { state: None }
    }
}

impl<R: Record> Future<R, Global> {
    /// 已兑现的 Future。
    pub fn ready(values: R) -> Self {
        Self::ready_in(values, Global)
    }

    /// 已失败的 Future。
    pub fn failed(error: impl Into<CapturedError>) -> Self {
        Self::failed_in(error, Global)
    }
}

impl<R: Record, A: CellAllocator> Future<R, A> {
    pub(crate) fn from_state(state: StatePtr<R, A>) -> Self {
        Self { state: Some(state) }
    }

    /// 使用指定分配器构造已兑现的 Future。
    pub fn ready_in(values: R, allocator: A) -> Self {
        let state = SharedState::allocate(allocator);
        state.fulfill(values);
        Self::from_state(state)
    }

    /// 使用指定分配器构造已失败的 Future。
    pub fn failed_in(error: impl Into<CapturedError>, allocator: A) -> Self {
        let state = SharedState::allocate(allocator);
        state.fail(&error.into());
        Self::from_state(state)
    }

    /// 是否持有共享单元。
    pub fn is_valid(&self) -> bool {
        self.state.is_some()
    }

    /// 结果是否已经到达。
    pub fn is_ready(&self) -> bool {
        self.state.as_ref().is_some_and(|state| state.is_ready())
    }

    /// 共享单元使用的分配器。
    ///
    /// # Panics
    /// 未初始化的 Future 上调用会 panic。
    pub fn allocator(&self) -> &A {
        match &self.state {
            Some(state) => state.allocator(),
            None => panic!("allocator() called on an uninitialized future"),
        }
    }

    /// 全部槽位成功时以其值调用回调，回调在结果到达的线程上执行。
    pub fn then<F>(self, callback: F) -> Future<<F::Output as Resolve>::Record, A>
    where
        F: Apply<R> + Send + 'static,
        F::Output: Resolve,
    {
        self.then_on(ImmediateQueue, callback)
    }

    /// 同 [`then`](Self::then)，回调投递到 `queue` 执行。
    ///
    /// 源结果含错误时，目标 Future 在触发线程上同步失败，不经过 `queue`，回调也不会被调用。
    pub fn then_on<Q, F>(self, queue: Q, callback: F) -> Future<<F::Output as Resolve>::Record, A>
    where
        Q: Queue,
        F: Apply<R> + Send + 'static,
        F::Output: Resolve,
    {
        let state = self.into_state("then");
        let (destination, handler) =
            then_pair::<R, F, Q, A>(state.allocator().clone(), queue, callback);
        state.attach(handler);
        Future::from_state(destination)
    }

    /// 以完整的完成记录调用回调（每个槽位一个 [`Expected`]）。
    pub fn then_expect<F>(self, callback: F) -> Future<<F::Output as Resolve>::Record, A>
    where
        F: Apply<R::Completion> + Send + 'static,
        F::Output: Resolve,
    {
        self.then_expect_on(ImmediateQueue, callback)
    }

    /// 同 [`then_expect`](Self::then_expect)，回调投递到 `queue` 执行。
    pub fn then_expect_on<Q, F>(
        self,
        queue: Q,
        callback: F,
    ) -> Future<<F::Output as Resolve>::Record, A>
    where
        Q: Queue,
        F: Apply<R::Completion> + Send + 'static,
        F::Output: Resolve,
    {
        let state = self.into_state("then_expect");
        let (destination, handler) =
            then_expect_pair::<R, F, Q, A>(state.allocator().clone(), queue, callback);
        state.attach(handler);
        Future::from_state(destination)
    }

    /// 终端续延：以完成记录的各槽位调用回调，不产生新的 Future。回调 panic 不会被捕获。
    pub fn finally<F>(self, callback: F)
    where
        F: Apply<R::Completion, Output = ()> + Send + 'static,
    {
        self.finally_on(ImmediateQueue, callback);
    }

    /// 同 [`finally`](Self::finally)，回调投递到 `queue` 执行。
    pub fn finally_on<Q, F>(self, queue: Q, callback: F)
    where
        Q: Queue,
        F: Apply<R::Completion, Output = ()> + Send + 'static,
    {
        let state = self.into_state("finally");
        let handler = FinallyHandler::<R, _, Q, A>::new(
            move |completion: R::Completion| callback.apply(completion),
            queue,
            state.allocator().clone(),
        );
        state.attach(Box::new(handler));
    }

    /// 在结果到达的线程上以完成记录调用 `sink`。
    pub(crate) fn on_completion<S>(self, sink: S)
    where
        S: FnOnce(R::Completion) + Send + 'static,
    {
        let state = self.into_state("on_completion");
        let handler =
            FinallyHandler::<R, S, _, A>::new(sink, ImmediateQueue, state.allocator().clone());
        state.attach(Box::new(handler));
    }

    /// 阻塞当前线程直到结果到达。
    pub fn get(self) -> Expected<R::Value> {
        block_on(self.into_future())
    }

    fn into_state(mut self, operation: &str) -> StatePtr<R, A> {
        match self.state.take() {
            Some(state) => state,
            None => panic!("{operation}() called on an uninitialized future"),
        }
    }
}

impl<R: Record, A: CellAllocator> fmt::Debug for Future<R, A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Future")
            .field("valid", &self.is_valid())
            .field("ready", &self.is_ready())
            .finish()
    }
}

impl<R: Record, A: CellAllocator> Resolve for Future<R, A> {
    type Record = R;

    fn into_resolution(self) -> Resolution<R> {
        if !self.is_valid() {
            return Resolution::Failed(CapturedError::unfulfilled_promise());
        }
        Resolution::Deferred(Deferred::new(move |sink| self.on_completion(sink)))
    }
}

impl<R: Record, A: CellAllocator> IntoFuture for Future<R, A> {
    type Output = Expected<R::Value>;
    type IntoFuture = FutureBridge<R::Value>;

    fn into_future(self) -> Self::IntoFuture {
        let (sender, receiver) = oneshot::channel();
        self.on_completion(move |completion| {
            if sender.send(R::value_from_completion(completion)).is_err() {
                trace!("bridge receiver dropped before the result arrived");
            }
        });
        FutureBridge { receiver }
    }
}

/// 把续延引擎的结果接入 `async` 世界的桥接 Future。
///
/// 由 `Future` 的 [`IntoFuture`] 实现产生，因而可以直接 `.await`。
#[must_use = "futures do nothing unless polled"]
pub struct FutureBridge<V> {
    receiver: oneshot::Receiver<Expected<V>>,
}

impl<V> StdFuture for FutureBridge<V> {
    type Output = Expected<V>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match Pin::new(&mut self.receiver).poll(cx) {
            Poll::Ready(Ok(outcome)) => Poll::Ready(outcome),
            Poll::Ready(Err(oneshot::Canceled)) => {
                Poll::Ready(Err(CapturedError::unfulfilled_promise()))
            }
            Poll::Pending => Poll::Pending,
        }
    }
}

impl<V> fmt::Debug for FutureBridge<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FutureBridge").finish_non_exhaustive()
    }
}

/// 把无参回调投递到 `queue`，返回其结果的 Future。
///
/// 回调的返回值遵循与 `then` 相同的解释规则。
pub fn schedule<Q, F>(queue: Q, callback: F) -> Future<<F::Output as Resolve>::Record, Global>
where
    Q: Queue,
    F: Apply<()> + Send + 'static,
    F::Output: Resolve,
{
    Future::ready(()).then_on(queue, callback)
}
