//! 流式变体：生产者可推送任意多条记录，再以完成或失败收尾；消费者以 `for_each` 逐条处理。
//!
//! # 设计背景（Why）
//! - 单次交接单元的无锁协议依赖“每侧只写一次”，而流需要反复推送，因此流单元改用互斥锁；
//! - 推送可能早于 `for_each` 挂接，挂接前的记录必须全部缓存并按推送顺序补发。
//!
//! # 逻辑解析（How）
//! - 锁内维护标志位（已挂接 / 已失败 / 已完成）、缓冲队列、失败错误与处理器；
//! - 已挂接时，推送在锁外把记录转交给处理器；未挂接时入缓冲；
//! - 挂接时在锁内按顺序排空缓冲，再转发已记录的终止事件。
//!
//! # 契约说明（What）
//! - 每条记录恰好被交付一次，顺序与推送顺序一致；
//! - 终止之后再推送或再终止属于契约违例，直接 panic；
//! - `for_each` 返回的 `Future<()>` 在流完成时兑现，在流失败时以该错误失败；
//! - `for_each` 回调 panic 后不再接收后续记录，流终止时 `Future<()>` 以该 panic 失败。

use std::{
    collections::VecDeque,
    fmt,
    marker::PhantomData,
    panic::{self, AssertUnwindSafe},
    sync::Arc,
};

use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::{
    allocator::{CellAllocator, Global, Lease},
    apply::ApplyMut,
    cell::{SharedState, StatePtr},
    error::CapturedError,
    future::Future,
    queue::{ImmediateQueue, Queue},
    record::Record,
};

const HANDLER_ATTACHED: u8 = 0b001;
const FAILED: u8 = 0b010;
const COMPLETED: u8 = 0b100;

/// 流单元持有的处理器接口；通过 `Arc` 共享，以便在锁外调用。
trait StreamHandler<R>: Send + Sync {
    fn receive(&self, values: R);
    fn complete(&self);
    fn fail(&self, error: CapturedError);
}

enum Terminal {
    Completed,
    Failed(CapturedError),
}

struct StreamInner<R> {
    flags: u8,
    buffer: VecDeque<R>,
    error: Option<CapturedError>,
    handler: Option<Arc<dyn StreamHandler<R>>>,
}

struct StreamState<R: Record, A: CellAllocator> {
    inner: Mutex<StreamInner<R>>,
    lease: Lease<A>,
}

impl<R: Record, A: CellAllocator> StreamState<R, A> {
    fn allocate(allocator: A) -> Arc<Self> {
        Arc::new(Self {
            inner: Mutex::new(StreamInner {
                flags: 0,
                buffer: VecDeque::new(),
                error: None,
                handler: None,
            }),
            lease: Lease::acquire::<Self>(allocator),
        })
    }

    fn push(&self, values: R) {
        let mut inner = self.inner.lock();
        assert!(
            inner.flags & (FAILED | COMPLETED) == 0,
            "push() called after the stream was terminated"
        );
        match inner.handler.clone() {
            Some(handler) => {
                drop(inner);
                handler.receive(values);
            }
            None => inner.buffer.push_back(values),
        }
    }

    fn complete(&self) {
        let mut inner = self.inner.lock();
        Self::mark_terminal(&mut inner, COMPLETED);
        if let Some(handler) = inner.handler.take() {
            drop(inner);
            handler.complete();
        }
    }

    fn fail(&self, error: CapturedError) {
        let mut inner = self.inner.lock();
        Self::mark_terminal(&mut inner, FAILED);
        match inner.handler.take() {
            Some(handler) => {
                drop(inner);
                handler.fail(error);
            }
            None => inner.error = Some(error),
        }
    }

    fn attach(&self, handler: Arc<dyn StreamHandler<R>>) {
        let mut inner = self.inner.lock();
        assert!(
            inner.flags & HANDLER_ATTACHED == 0,
            "for_each() already attached to this stream"
        );
        inner.flags |= HANDLER_ATTACHED;
        while let Some(values) = inner.buffer.pop_front() {
            handler.receive(values);
        }

        let terminal = if inner.flags & COMPLETED != 0 {
            Some(Terminal::Completed)
        } else if inner.flags & FAILED != 0 {
            Some(Terminal::Failed(
                inner
                    .error
                    .take()
                    .unwrap_or_else(CapturedError::unfulfilled_promise),
            ))
        } else {
            inner.handler = Some(Arc::clone(&handler));
            None
        };
        drop(inner);

        match terminal {
            Some(Terminal::Completed) => handler.complete(),
            Some(Terminal::Failed(error)) => handler.fail(error),
            None => {}
        }
    }

    fn mark_terminal(inner: &mut StreamInner<R>, flag: u8) {
        assert!(
            inner.flags & (FAILED | COMPLETED) == 0,
            "stream terminated twice"
        );
        inner.flags |= flag;
    }
}

struct ForEachState<F> {
    callback: F,
    failure: Option<CapturedError>,
}

/// `for_each` 处理器：每条记录与终止事件各自作为一个任务投递到队列。
struct ForEachHandler<R, F, Q, A: CellAllocator> {
    shared: Arc<Mutex<ForEachState<F>>>,
    queue: Q,
    done: StatePtr<(), A>,
    _lease: Lease<A>,
    _record: PhantomData<fn(R)>,
}

impl<R, F, Q, A> ForEachHandler<R, F, Q, A>
where
    R: Record,
    F: ApplyMut<R, Output = ()> + Send + 'static,
    Q: Queue,
    A: CellAllocator,
{
    fn new(callback: F, queue: Q, done: StatePtr<(), A>) -> Self {
        let lease = Lease::acquire::<Self>(done.allocator().clone());
        Self {
            shared: Arc::new(Mutex::new(ForEachState {
                callback,
                failure: None,
            })),
            queue,
            done,
            _lease: lease,
            _record: PhantomData,
        }
    }

    fn settle(&self, stream_error: Option<CapturedError>) {
        let shared = Arc::clone(&self.shared);
        let done = Arc::clone(&self.done);
        self.queue.execute(move || {
            let callback_failure = shared.lock().failure.take();
            match stream_error.or(callback_failure) {
                Some(error) => done.fail(&error),
                None => done.fulfill(()),
            }
        });
    }
}

impl<R, F, Q, A> StreamHandler<R> for ForEachHandler<R, F, Q, A>
where
    R: Record,
    F: ApplyMut<R, Output = ()> + Send + 'static,
    Q: Queue,
    A: CellAllocator,
{
    fn receive(&self, values: R) {
        let shared = Arc::clone(&self.shared);
        self.queue.execute(move || {
            let mut state = shared.lock();
            let ForEachState { callback, failure } = &mut *state;
            if failure.is_some() {
                return;
            }
            let outcome = panic::catch_unwind(AssertUnwindSafe(|| callback.apply_mut(values)));
            if let Err(payload) = outcome {
                let error = CapturedError::from_panic(payload);
                warn!(error = %error, "for_each callback panicked; remaining values are skipped");
                *failure = Some(error);
            }
        });
    }

    fn complete(&self) {
        debug!("stream completed");
        self.settle(None);
    }

    fn fail(&self, error: CapturedError) {
        debug!(error = %error, "stream failed");
        self.settle(Some(error));
    }
}

/// 流的生产者句柄。
pub struct StreamPromise<R: Record, A: CellAllocator = Global> {
    allocator: A,
    state: Option<Arc<StreamState<R, A>>>,
    future_created: bool,
    terminated: bool,
}

impl<R: Record> StreamPromise<R, Global> {
    /// 使用默认分配器创建。
    pub fn new() -> Self {
        Self::with_allocator(Global)
    }
}

impl<R: Record> Default for StreamPromise<R, Global> {
    fn default() -> Self {
        Self::new()
    }
}

impl<R: Record, A: CellAllocator> StreamPromise<R, A> {
    /// 使用指定分配器创建。
    pub fn with_allocator(allocator: A) -> Self {
        Self {
            allocator,
            state: None,
            future_created: false,
            terminated: false,
        }
    }

    /// 取出消费者句柄；只能调用一次。
    pub fn get_future(&mut self) -> StreamFuture<R, A> {
        assert!(
            !self.future_created,
            "get_future() called twice on the same stream promise"
        );
        self.future_created = true;
        let state = Arc::clone(self.ensure_state());
        if self.terminated {
            self.state = None;
        }
        StreamFuture { state: Some(state) }
    }

    /// 推送一条记录。
    ///
    /// # Panics
    /// 流已终止时 panic。
    pub fn push(&mut self, values: R) {
        assert!(
            !self.terminated,
            "push() called after the stream was terminated"
        );
        self.ensure_state().push(values);
    }

    /// 正常结束流。
    pub fn complete(&mut self) {
        self.begin_terminate();
        self.ensure_state().complete();
        self.release_after_terminate();
    }

    /// 以错误结束流。
    pub fn set_exception(&mut self, error: impl Into<CapturedError>) {
        let error = error.into();
        self.begin_terminate();
        self.ensure_state().fail(error);
        self.release_after_terminate();
    }

    /// 流尚未终止。
    pub fn is_open(&self) -> bool {
        !self.terminated
    }

    fn ensure_state(&mut self) -> &Arc<StreamState<R, A>> {
        let allocator = &self.allocator;
        self.state
            .get_or_insert_with(|| StreamState::allocate(allocator.clone()))
    }

    fn begin_terminate(&mut self) {
        assert!(!self.terminated, "stream terminated twice");
        self.terminated = true;
    }

    fn release_after_terminate(&mut self) {
        if self.future_created {
            self.state = None;
        }
    }
}

impl<R: Record, A: CellAllocator> Drop for StreamPromise<R, A> {
    fn drop(&mut self) {
        if self.terminated {
            return;
        }
        if let Some(state) = self.state.take() {
            debug!("stream promise dropped before termination; failing its stream");
            state.fail(CapturedError::unfulfilled_promise());
        }
    }
}

impl<R: Record, A: CellAllocator> fmt::Debug for StreamPromise<R, A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamPromise")
            .field("future_created", &self.future_created)
            .field("terminated", &self.terminated)
            .finish()
    }
}

/// 流的消费者句柄。
pub struct StreamFuture<R: Record, A: CellAllocator = Global> {
    state: Option<Arc<StreamState<R, A>>>,
}

impl<R: Record, A: CellAllocator> Default for StreamFuture<R, A> {
    fn default() -> Self {
        Self { state: None }
    }
}

impl<R: Record, A: CellAllocator> StreamFuture<R, A> {
    /// 是否持有流单元。
    pub fn is_valid(&self) -> bool {
        self.state.is_some()
    }

    /// 在推送线程上逐条调用回调。
    pub fn for_each<F>(self, callback: F) -> Future<(), A>
    where
        F: ApplyMut<R, Output = ()> + Send + 'static,
    {
        self.for_each_on(ImmediateQueue, callback)
    }

    /// 每条记录与终止事件各自作为一个任务投递到 `queue`。
    pub fn for_each_on<Q, F>(mut self, queue: Q, callback: F) -> Future<(), A>
    where
        Q: Queue,
        F: ApplyMut<R, Output = ()> + Send + 'static,
    {
        let state = match self.state.take() {
            Some(state) => state,
            None => panic!("for_each() called on an uninitialized stream future"),
        };
        let done = SharedState::<(), A>::allocate(state.lease.allocator().clone());
        let handler = ForEachHandler::<R, F, Q, A>::new(callback, queue, Arc::clone(&done));
        state.attach(Arc::new(handler));
        Future::from_state(done)
    }
}

impl<R: Record, A: CellAllocator> fmt::Debug for StreamFuture<R, A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamFuture")
            .field("valid", &self.is_valid())
            .finish()
    }
}
