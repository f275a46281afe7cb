//! 续延处理器：`then` / `then_expect` / `finally` 挂在源单元上的那一半。
//!
//! # 模块定位（Why）
//! - 源单元只认识 [`Handler`] 这一个对象安全接口，结果到达时调用 `receive`；
//! - 各处理器负责三件事：决定是否调用回调、把调用投递到注册时给定的队列、把回调的返回值
//!   按 [`Resolve`] 规则落到目标单元。
//!
//! # 行为要点（What）
//! - `then`：完成记录含错误时，在触发线程上**同步**以最左侧错误失败目标单元，回调被直接丢弃、
//!   不经过队列；全部成功时才投递回调；
//! - `then_expect`：总是投递回调，回调拿到完整的完成记录；
//! - 两者都在处理器边界捕获 panic，并以 [`FutureError::CallbackPanicked`](crate::FutureError) 失败目标单元；
//! - `finally`：终端处理器，回调 panic 不被捕获，沿队列的执行线程向外传播。

use std::{
    marker::PhantomData,
    panic::{self, AssertUnwindSafe},
    sync::Arc,
};

use tracing::{debug, trace};

use crate::{
    allocator::{CellAllocator, Lease},
    apply::Apply,
    cell::{SharedState, StatePtr},
    error::CapturedError,
    queue::Queue,
    record::Record,
    resolve::{Resolution, Resolve},
};

/// 源单元持有的处理器接口。
pub(crate) trait Handler<R: Record>: Send {
    /// 以完成记录触发。
    fn receive(self: Box<Self>, completion: R::Completion);

    /// 以纯值触发；默认提升为完成记录。
    fn receive_values(self: Box<Self>, values: R) {
        self.receive(values.into_completion());
    }
}

type Destination<F, R, A> = StatePtr<<<F as Apply<R>>::Output as Resolve>::Record, A>;

/// 目标单元与挂在源单元上的处理器。
type Wiring<R, T, A> = (StatePtr<T, A>, Box<dyn Handler<R>>);

/// 调用回调并解释返回值；panic 被转换为硬失败。
fn invoke_guarded<O, F>(callback: F) -> Resolution<O::Record>
where
    O: Resolve,
    F: FnOnce() -> O,
{
    match panic::catch_unwind(AssertUnwindSafe(callback)) {
        Ok(output) => output.into_resolution(),
        Err(payload) => {
            let error = CapturedError::from_panic(payload);
            debug!(error = %error, "continuation callback panicked");
            Resolution::Failed(error)
        }
    }
}

/// 把解释结果落到目标单元。
pub(crate) fn settle<R: Record, A: CellAllocator>(
    destination: &StatePtr<R, A>,
    resolution: Resolution<R>,
) {
    match resolution {
        Resolution::Values(values) => destination.fulfill(values),
        Resolution::Completion(completion) => destination.complete(completion),
        Resolution::Failed(error) => destination.fail(&error),
        Resolution::Deferred(deferred) => {
            trace!("continuation returned a future; forwarding its outcome");
            let destination = Arc::clone(destination);
            deferred.forward(move |completion| destination.complete(completion));
        }
    }
}

/// `then` 处理器。
pub(crate) struct ThenHandler<R, F, Q, A>
where
    R: Record,
    F: Apply<R>,
    F::Output: Resolve,
    A: CellAllocator,
{
    callback: F,
    queue: Q,
    destination: Destination<F, R, A>,
    lease: Lease<A>,
    _record: PhantomData<fn(R)>,
}

impl<R, F, Q, A> ThenHandler<R, F, Q, A>
where
    R: Record,
    F: Apply<R> + Send + 'static,
    F::Output: Resolve,
    Q: Queue,
    A: CellAllocator,
{
    pub(crate) fn new(callback: F, queue: Q, destination: Destination<F, R, A>) -> Self {
        let lease = Lease::acquire::<Self>(destination.allocator().clone());
        Self {
            callback,
            queue,
            destination,
            lease,
            _record: PhantomData,
        }
    }
}

impl<R, F, Q, A> Handler<R> for ThenHandler<R, F, Q, A>
where
    R: Record,
    F: Apply<R> + Send + 'static,
    F::Output: Resolve,
    Q: Queue,
    A: CellAllocator,
{
    fn receive(self: Box<Self>, completion: R::Completion) {
        match R::from_completion(completion) {
            Ok(values) => self.receive_values(values),
            Err(error) => {
                trace!("source failed; short-circuiting then without invoking callback");
                self.destination.fail(&error);
            }
        }
    }

    fn receive_values(self: Box<Self>, values: R) {
        let Self {
            callback,
            queue,
            destination,
            lease,
            ..
        } = *self;
        queue.execute(move || {
            let _lease = lease;
            settle(&destination, invoke_guarded(move || callback.apply(values)));
        });
    }
}

/// `then_expect` 处理器。
pub(crate) struct ThenExpectHandler<R, F, Q, A>
where
    R: Record,
    F: Apply<R::Completion>,
    F::Output: Resolve,
    A: CellAllocator,
{
    callback: F,
    queue: Q,
    destination: StatePtr<<F::Output as Resolve>::Record, A>,
    lease: Lease<A>,
    _record: PhantomData<fn(R)>,
}

impl<R, F, Q, A> ThenExpectHandler<R, F, Q, A>
where
    R: Record,
    F: Apply<R::Completion> + Send + 'static,
    F::Output: Resolve,
    Q: Queue,
    A: CellAllocator,
{
    pub(crate) fn new(
        callback: F,
        queue: Q,
        destination: StatePtr<<F::Output as Resolve>::Record, A>,
    ) -> Self {
        let lease = Lease::acquire::<Self>(destination.allocator().clone());
        Self {
            callback,
            queue,
            destination,
            lease,
            _record: PhantomData,
        }
    }
}

impl<R, F, Q, A> Handler<R> for ThenExpectHandler<R, F, Q, A>
where
    R: Record,
    F: Apply<R::Completion> + Send + 'static,
    F::Output: Resolve,
    Q: Queue,
    A: CellAllocator,
{
    fn receive(self: Box<Self>, completion: R::Completion) {
        let Self {
            callback,
            queue,
            destination,
            lease,
            ..
        } = *self;
        queue.execute(move || {
            let _lease = lease;
            settle(
                &destination,
                invoke_guarded(move || callback.apply(completion)),
            );
        });
    }
}

/// 终端处理器：`finally` 与内部的结果转发共用。
pub(crate) struct FinallyHandler<R, F, Q, A>
where
    R: Record,
    A: CellAllocator,
{
    callback: F,
    queue: Q,
    lease: Lease<A>,
    _record: PhantomData<fn(R)>,
}

impl<R, F, Q, A> FinallyHandler<R, F, Q, A>
where
    R: Record,
    F: FnOnce(R::Completion) + Send + 'static,
    Q: Queue,
    A: CellAllocator,
{
    pub(crate) fn new(callback: F, queue: Q, allocator: A) -> Self {
        Self {
            callback,
            queue,
            lease: Lease::acquire::<Self>(allocator),
            _record: PhantomData,
        }
    }
}

impl<R, F, Q, A> Handler<R> for FinallyHandler<R, F, Q, A>
where
    R: Record,
    F: FnOnce(R::Completion) + Send + 'static,
    Q: Queue,
    A: CellAllocator,
{
    fn receive(self: Box<Self>, completion: R::Completion) {
        let Self {
            callback,
            queue,
            lease,
            ..
        } = *self;
        queue.execute(move || {
            let _lease = lease;
            callback(completion);
        });
    }
}

/// 为 `then` 建立目标单元与处理器，返回二者。
pub(crate) fn then_pair<R, F, Q, A>(
    allocator: A,
    queue: Q,
    callback: F,
) -> Wiring<R, <F::Output as Resolve>::Record, A>
where
    R: Record,
    F: Apply<R> + Send + 'static,
    F::Output: Resolve,
    Q: Queue,
    A: CellAllocator,
{
    let destination = SharedState::allocate(allocator);
    let handler = ThenHandler::<R, F, Q, A>::new(callback, queue, Arc::clone(&destination));
    (destination, Box::new(handler))
}

/// 为 `then_expect` 建立目标单元与处理器，返回二者。
pub(crate) fn then_expect_pair<R, F, Q, A>(
    allocator: A,
    queue: Q,
    callback: F,
) -> Wiring<R, <F::Output as Resolve>::Record, A>
where
    R: Record,
    F: Apply<R::Completion> + Send + 'static,
    F::Output: Resolve,
    Q: Queue,
    A: CellAllocator,
{
    let destination = SharedState::allocate(allocator);
    let handler = ThenExpectHandler::<R, F, Q, A>::new(callback, queue, Arc::clone(&destination));
    (destination, Box::new(handler))
}
