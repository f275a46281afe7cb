//! 多 Future 组合子：`join`、`join_all`、`flatten`。
//!
//! # 设计背景（Why）
//! - `join` 需要等待多个异构输入全部给出结果，再一次性完成下游；每个输入的失败互不影响，
//!   失败按槽位原样带到下游；
//! - `flatten` 把“单字段里装着一整条记录”的 Future 展开为多字段 Future。
//!
//! # 逻辑解析（How）
//! - 每个输入挂一个终端转发处理器，把自身结果写入共享槽位，然后递减原子计数；
//! - 把计数减到零的那一个输入负责组装全部槽位并完成下游单元。
//!
//! # 契约说明（What）
//! - 下游记录为各输入的值类型按位置排列，例如
//!   `join((Future<(i32,)>, Future<(String, u8)>))` 得到 `Future<(i32, (String, u8))>`；
//! - 任一输入失败时只有对应槽位为错误，`then_expect` 可以逐槽检查；
//! - 所有输入必须使用同一种分配器类型，下游单元使用第一个输入的分配器实例。

use std::sync::{
    Arc,
    atomic::{AtomicUsize, Ordering},
};

use parking_lot::Mutex;
use tracing::trace;

use crate::{
    allocator::CellAllocator,
    cell::SharedState,
    error::{CapturedError, Expected},
    future::Future,
    record::Record,
};

/// 可被 [`join`] 的输入集合，由本模块为 1 到 6 元 Future 元组实现。
pub trait Join {
    /// 下游记录：各输入值类型按位置排列。
    type Output: Record;
    /// 共同的分配器类型。
    type Allocator: CellAllocator;

    /// 等待全部输入。
    fn join(self) -> Future<Self::Output, Self::Allocator>;
}

/// 等待全部输入给出结果，按位置汇总到一个 Future。
pub fn join<J: Join>(futures: J) -> Future<J::Output, J::Allocator> {
    futures.join()
}

struct Countdown<S> {
    slots: Mutex<S>,
    remaining: AtomicUsize,
}

impl<S> Countdown<S> {
    fn new(slots: S, remaining: usize) -> Arc<Self> {
        Arc::new(Self {
            slots: Mutex::new(slots),
            remaining: AtomicUsize::new(remaining),
        })
    }

    /// 记录一个输入已到达；返回 `true` 表示调用者是最后一个。
    fn arrive(&self) -> bool {
        self.remaining.fetch_sub(1, Ordering::AcqRel) == 1
    }
}

/// 槽位元组：`(Option<Expected<V1>>, ..)` 与对应完成记录之间的转换。
trait SlotTuple: Send + 'static {
    type Completion;

    fn empty() -> Self;

    fn assemble(&mut self) -> Self::Completion;
}

fn take_slot<V>(slot: &mut Option<Expected<V>>) -> Expected<V> {
    slot.take()
        .unwrap_or_else(|| Err(CapturedError::unfulfilled_promise()))
}

macro_rules! impl_join {
    ($count:expr; $($rec:ident $value:ident $idx:tt),+) => {
        impl<$($value: Send + 'static),+> SlotTuple for ($(Option<Expected<$value>>,)+) {
            type Completion = ($(Expected<$value>,)+);

            fn empty() -> Self {
                ($(None::<Expected<$value>>,)+)
            }

            fn assemble(&mut self) -> Self::Completion {
                ($(take_slot(&mut self.$idx),)+)
            }
        }

        impl<Alloc: CellAllocator, $($rec: Record),+> Join for ($(Future<$rec, Alloc>,)+) {
            type Output = ($(<$rec as Record>::Value,)+);
            type Allocator = Alloc;

            fn join(self) -> Future<Self::Output, Alloc> {
                let destination =
                    SharedState::<Self::Output, Alloc>::allocate(self.0.allocator().clone());
                let countdown = Countdown::new(
                    <($(Option<Expected<<$rec as Record>::Value>>,)+) as SlotTuple>::empty(),
                    $count,
                );
                $(
                    {
                        let countdown = Arc::clone(&countdown);
                        let destination = Arc::clone(&destination);
                        self.$idx.on_completion(move |completion| {
                            let outcome = <$rec as Record>::value_from_completion(completion);
                            countdown.slots.lock().$idx = Some(outcome);
                            if countdown.arrive() {
                                trace!(inputs = $count, "join complete");
                                let completion = countdown.slots.lock().assemble();
                                destination.complete(completion);
                            }
                        });
                    }
                )+
                Future::from_state(destination)
            }
        }
    };
}

impl_join!(1; R1 V1 0);
impl_join!(2; R1 V1 0, R2 V2 1);
impl_join!(3; R1 V1 0, R2 V2 1, R3 V3 2);
impl_join!(4; R1 V1 0, R2 V2 1, R3 V3 2, R4 V4 3);
impl_join!(5; R1 V1 0, R2 V2 1, R3 V3 2, R4 V4 3, R5 V5 4);
impl_join!(6; R1 V1 0, R2 V2 1, R3 V3 2, R4 V4 3, R5 V5 4, R6 V6 5);

/// 同构版本的 `join`：结果按输入顺序收集为一个 `Vec`，每个元素独立成功或失败。
///
/// 输入为空时立即兑现空列表，此时下游单元使用 `A::default()`。
pub fn join_all<R, A>(futures: Vec<Future<R, A>>) -> Future<(Vec<Expected<R::Value>>,), A>
where
    R: Record,
    A: CellAllocator + Default,
{
    let allocator = futures
        .first()
        .map(|future| future.allocator().clone())
        .unwrap_or_default();
    let destination = SharedState::<(Vec<Expected<R::Value>>,), A>::allocate(allocator);
    if futures.is_empty() {
        destination.fulfill((Vec::new(),));
        return Future::from_state(destination);
    }

    let slots: Vec<Option<Expected<R::Value>>> = futures.iter().map(|_| None).collect();
    let countdown = Countdown::new(slots, futures.len());
    for (index, future) in futures.into_iter().enumerate() {
        let countdown = Arc::clone(&countdown);
        let destination = Arc::clone(&destination);
        future.on_completion(move |completion| {
            countdown.slots.lock()[index] = Some(R::value_from_completion(completion));
            if countdown.arrive() {
                let outcomes = countdown
                    .slots
                    .lock()
                    .iter_mut()
                    .map(take_slot)
                    .collect::<Vec<_>>();
                trace!(inputs = outcomes.len(), "join_all complete");
                destination.fulfill((outcomes,));
            }
        });
    }
    Future::from_state(destination)
}

/// 把单字段中的整条记录展开为多字段 Future；外层失败原样传递到每个槽位。
pub fn flatten<R, A>(future: Future<(R,), A>) -> Future<R, A>
where
    R: Record,
    A: CellAllocator,
{
    let destination = SharedState::<R, A>::allocate(future.allocator().clone());
    let target = Arc::clone(&destination);
    future.on_completion(move |(slot,)| match slot {
        Ok(values) => target.fulfill(values),
        Err(error) => target.fail(&error),
    });
    Future::from_state(destination)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::future::Promise;

    #[test]
    fn single_input_join_wraps_the_value() {
        let joined = join((Future::ready((5_u8,)),));
        assert_eq!(joined.get().ok(), Some(5_u8), "单输入的下游记录为 `(V,)`");
    }

    #[test]
    fn join_all_of_nothing_is_immediately_ready() {
        let joined = join_all(Vec::<Future<(u8,)>>::new());
        assert!(joined.is_ready());
        assert_eq!(joined.get().map(|v| v.len()).ok(), Some(0));
    }

    #[test]
    fn join_waits_for_the_last_input() {
        let mut first = Promise::<(i32,)>::new();
        let mut second = Promise::<()>::new();
        let joined = join((first.get_future(), second.get_future()));
        first.set_value((1,));
        assert!(!joined.is_ready(), "仍有输入未到达");
        second.set_value(());
        assert!(joined.is_ready());
        assert_eq!(joined.get().ok(), Some((1, ())));
    }
}
