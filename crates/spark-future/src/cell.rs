#![allow(unsafe_code)]
// SAFETY: 单次共享单元在“交付结果”与“挂接处理器”之间实现无锁交接，需要直接读写 `UnsafeCell` 槽位。
// ## 意图（Why）
// - 生产者与消费者各自只写一次、且互不等待，用互斥锁会把每次续延都变成一次加锁；
// - 以一个 8 位标志字协调两个槽位，谁后到谁负责调用处理器。
// ## 解析逻辑（How）
// 1. 结果槽只在 `RESULT_RECORDED` 发布之前由唯一的生产者写入；
// 2. 处理器槽只在 `HANDLER_ATTACHED` 发布之前由唯一的消费者写入；
// 3. 发布使用 `fetch_or(AcqRel)`：观察到对方标志的一方，经由 Acquire 看到对方槽位的写入，
//    并成为唯一取出两个槽位的执行者；
// 4. 快路径以 `load(Acquire)` 观察对方已发布的标志，此时对方已不会再触碰任何槽位。
// ## 契约（What）
// - 单生产者、单消费者由外层 `Promise` / `Future` 的所有权保证；
// - 任意交错下处理器恰好被调用一次，结果恰好被消费一次；
// - 未被消费的结果与未触发的处理器随最后一个 `Arc` 引用一并销毁。
// ## 风险与权衡（Trade-offs）
// - 若外层违反单写者约束（例如重复兑现），槽位可能被并发写入；`Promise` 以断言阻止这种用法。

use std::sync::Arc;

use tracing::trace;

use crate::{
    allocator::{CellAllocator, Lease},
    error::CapturedError,
    handler::Handler,
    record::Record,
    sync::{AtomicU8, Ordering, UnsafeCell},
};

const HANDLER_ATTACHED: u8 = 0b01;
const RESULT_RECORDED: u8 = 0b10;

pub(crate) type StatePtr<R, A> = Arc<SharedState<R, A>>;

/// 生产者与消费者之间的单次交接单元。
pub(crate) struct SharedState<R: Record, A: CellAllocator> {
    flags: AtomicU8,
    completion: UnsafeCell<Option<R::Completion>>,
    handler: UnsafeCell<Option<Box<dyn Handler<R>>>>,
    lease: Lease<A>,
}

// SAFETY: 两个 `UnsafeCell` 槽位的访问由 `flags` 上的发布/获取协议串行化，见文件头说明。
unsafe impl<R: Record, A: CellAllocator> Sync for SharedState<R, A> {}

impl<R: Record, A: CellAllocator> SharedState<R, A> {
    pub(crate) fn allocate(allocator: A) -> StatePtr<R, A> {
        Arc::new(Self {
            flags: AtomicU8::new(0),
            completion: UnsafeCell::new(None),
            handler: UnsafeCell::new(None),
            lease: Lease::acquire::<Self>(allocator),
        })
    }

    pub(crate) fn allocator(&self) -> &A {
        self.lease.allocator()
    }

    /// 结果是否已记录。
    pub(crate) fn is_ready(&self) -> bool {
        self.flags.load(Ordering::Acquire) & RESULT_RECORDED != 0
    }

    /// 交付纯值；处理器已挂接时直接走处理器的兑现快路径。
    pub(crate) fn fulfill(&self, values: R) {
        if self.flags.load(Ordering::Acquire) & HANDLER_ATTACHED != 0 {
            trace!("result arrived after handler; firing on producer side");
            self.take_handler().receive_values(values);
            return;
        }
        self.record(values.into_completion());
    }

    /// 交付完成记录。
    pub(crate) fn complete(&self, completion: R::Completion) {
        if self.flags.load(Ordering::Acquire) & HANDLER_ATTACHED != 0 {
            trace!("result arrived after handler; firing on producer side");
            self.take_handler().receive(completion);
            return;
        }
        self.record(completion);
    }

    /// 硬失败：同一错误写入每个槽位。
    pub(crate) fn fail(&self, error: &CapturedError) {
        self.complete(R::failed(error));
    }

    /// 挂接唯一的处理器。
    pub(crate) fn attach(&self, handler: Box<dyn Handler<R>>) {
        let current = self.flags.load(Ordering::Acquire);
        assert!(
            current & HANDLER_ATTACHED == 0,
            "a continuation is already attached to this future"
        );

        if current & RESULT_RECORDED != 0 {
            trace!("handler attached after result; firing on consumer side");
            let completion = self.take_completion();
            self.flags.fetch_or(HANDLER_ATTACHED, Ordering::Release);
            handler.receive(completion);
            return;
        }

        // SAFETY: `HANDLER_ATTACHED` 尚未发布，生产者不会读取处理器槽。
        self.handler
            .with_mut(|slot| unsafe { *slot = Some(handler) });
        let previous = self.flags.fetch_or(HANDLER_ATTACHED, Ordering::AcqRel);
        if previous & RESULT_RECORDED != 0 {
            trace!("result raced ahead of attach; consumer fires");
            self.fire();
        }
    }

    fn record(&self, completion: R::Completion) {
        // SAFETY: `RESULT_RECORDED` 尚未发布，消费者不会读取结果槽。
        self.completion
            .with_mut(|slot| unsafe { *slot = Some(completion) });
        let previous = self.flags.fetch_or(RESULT_RECORDED, Ordering::AcqRel);
        if previous & HANDLER_ATTACHED != 0 {
            trace!("handler raced ahead of result; producer fires");
            self.fire();
        }
    }

    fn fire(&self) {
        let handler = self.take_handler();
        let completion = self.take_completion();
        handler.receive(completion);
    }

    fn take_handler(&self) -> Box<dyn Handler<R>> {
        // SAFETY: 仅在观察到 `HANDLER_ATTACHED` 之后、且本线程是唯一执行者时调用。
        match self.handler.with_mut(|slot| unsafe { (*slot).take() }) {
            Some(handler) => handler,
            None => unreachable!("handler flag published without a stored handler"),
        }
    }

    fn take_completion(&self) -> R::Completion {
        // SAFETY: 仅在观察到 `RESULT_RECORDED` 之后、且本线程是唯一执行者时调用。
        match self.completion.with_mut(|slot| unsafe { (*slot).take() }) {
            Some(completion) => completion,
            None => unreachable!("result flag published without a stored completion"),
        }
    }
}
