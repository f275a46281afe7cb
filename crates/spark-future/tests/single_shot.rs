//! 单次交接单元的行为测试。
//!
//! # 教案级导览
//!
//! - **Why**：`then` / `then_expect` / `finally` 的语义必须与挂接时机无关，
//!   失败传播、队列投递与资源回收也要在两种时序下保持一致；
//! - **How**：每个用例都以“先兑现后挂接”与“先挂接后兑现”各跑一遍，比较可观察结果；
//! - **What**：覆盖基础兑现、短路失败、完整记录、未兑现承诺、回调返回 Future / Result、
//!   回调 panic、队列投递顺序与分配器计数归零。

use std::sync::{
    Arc,
    atomic::{AtomicBool, AtomicUsize, Ordering},
};

use parking_lot::Mutex;
use spark_future::{
    CapturedError, CountingAllocator, Expected, Future, FutureError, Promise, TaskQueue,
    completed, schedule, segmented,
};
use thiserror::Error;

#[derive(Debug, Error, PartialEq)]
#[error("sensor offline: {0}")]
struct SensorError(u32);

/// 两种挂接时序。
#[derive(Clone, Copy, Debug)]
enum Timing {
    FulfillFirst,
    AttachFirst,
}

const TIMINGS: [Timing; 2] = [Timing::FulfillFirst, Timing::AttachFirst];

/// 按给定时序执行“兑现”与“挂接”，返回挂接产生的值。
fn run<R, T>(
    timing: Timing,
    fulfill: impl FnOnce(&mut Promise<R>),
    attach: impl FnOnce(Future<R>) -> T,
) -> T
where
    R: spark_future::Record,
{
    let mut promise = Promise::<R>::new();
    let future = promise.get_future();
    match timing {
        Timing::FulfillFirst => {
            fulfill(&mut promise);
            attach(future)
        }
        Timing::AttachFirst => {
            let attached = attach(future);
            fulfill(&mut promise);
            attached
        }
    }
}

/// ## 基础兑现
///
/// - **意图 (Why)**：`then` 的结果与挂接时机无关；
/// - **契约 (What)**：`set_value(3)` 后 `v + 4` 得到 `7`。
#[test]
fn then_resolves_regardless_of_attach_order() {
    for timing in TIMINGS {
        let result = run(
            timing,
            |promise| promise.set_value((3,)),
            |future: Future<(i32,)>| future.then(|v: i32| v + 4),
        );
        assert_eq!(result.get().ok(), Some(7), "时序 {timing:?} 下应得到 7");
    }
}

/// ## `then` 在失败时短路
///
/// - **意图 (Why)**：失败的源不应触发业务回调；
/// - **契约 (What)**：回调从未运行，下游以同一个错误失败。
#[test]
fn then_skips_callback_when_source_failed() {
    for timing in TIMINGS {
        let ran = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&ran);
        let result = run(
            timing,
            |promise| promise.set_exception(SensorError(7)),
            move |future: Future<(i32,)>| {
                future.then(move |v: i32| {
                    flag.store(true, Ordering::SeqCst);
                    v
                })
            },
        );
        let error = result.get().expect_err("下游应失败");
        assert_eq!(error.downcast_ref::<SensorError>(), Some(&SensorError(7)));
        assert!(!ran.load(Ordering::SeqCst), "时序 {timing:?} 下回调不应运行");
    }
}

/// ## `then_expect` 从不短路
///
/// - **契约 (What)**：回调必定运行，并在槽位中看到原始错误。
#[test]
fn then_expect_runs_and_sees_the_error() {
    for timing in TIMINGS {
        let result = run(
            timing,
            |promise| promise.set_exception(SensorError(9)),
            |future: Future<(i32,)>| {
                future.then_expect(|slot: Expected<i32>| match slot {
                    Ok(_) => "value".to_owned(),
                    Err(error) => format!("caught {error}"),
                })
            },
        );
        assert_eq!(
            result.get().ok().as_deref(),
            Some("caught sensor offline: 9")
        );
    }
}

/// ## 未兑现承诺
///
/// - **意图 (Why)**：生产者被遗弃时消费者不能永远等待；
/// - **契约 (What)**：`then_expect` 在槽位中收到 `UnfulfilledPromise`，`then` 链整体失败。
#[test]
fn dropped_promise_fails_with_unfulfilled_promise() {
    let mut promise = Promise::<(i32,)>::new();
    let observed = Arc::new(Mutex::new(None));
    let sink = Arc::clone(&observed);
    promise
        .get_future()
        .then_expect(move |slot: Expected<i32>| {
            *sink.lock() = Some(slot.err().map(|e| e.is_unfulfilled_promise()));
        })
        .finally(|_: Expected<()>| {});
    drop(promise);
    assert_eq!(*observed.lock(), Some(Some(true)));

    let mut abandoned = Promise::<(i32,)>::new();
    let chained = abandoned
        .get_future()
        .then(|v: i32| v * 2)
        .then(|v: i32| v + 1);
    drop(abandoned);
    let error = chained.get().expect_err("整条链应失败");
    assert_eq!(
        error.downcast_ref::<FutureError>(),
        Some(&FutureError::UnfulfilledPromise)
    );
}

/// ## 未兑现承诺：空记录与多字段记录
///
/// - **契约 (What)**：无值的 Future 同样以 `UnfulfilledPromise` 失败；
///   多字段记录的每一个槽位都携带该错误。
#[test]
fn dropped_promise_fails_every_record_shape() {
    let mut empty = Promise::<()>::new();
    let empty_future = empty.get_future();
    drop(empty);
    let error = empty_future.get().expect_err("空记录也应失败");
    assert!(error.is_unfulfilled_promise());

    let mut pair = Promise::<(i32, String)>::new();
    let slots = pair
        .get_future()
        .then_expect(|id: Expected<i32>, name: Expected<String>| {
            segmented((
                id.err().map(|e| e.is_unfulfilled_promise()),
                name.err().map(|e| e.is_unfulfilled_promise()),
            ))
        });
    drop(pair);
    assert_eq!(
        slots.get().ok(),
        Some((Some(true), Some(true))),
        "每个槽位都应收到未兑现错误"
    );
}

/// ## 逐槽失败与 `finish`
///
/// - **契约 (What)**：`then` 以最左侧错误失败，`then_expect` 看到每个槽位各自的结果。
#[test]
fn finish_carries_partial_failures() {
    let first = CapturedError::msg("first");
    let second = CapturedError::msg("second");

    let mut promise = Promise::<(i32, String, u8)>::new();
    let short = promise.get_future();
    promise.finish((Ok(1), Err(first.clone()), Err(second.clone())));
    let error = short
        .then(|_: i32, _: String, _: u8| ())
        .get()
        .expect_err("应短路");
    assert!(error.ptr_eq(&first), "应传播最左侧错误");

    let mut promise = Promise::<(i32, String, u8)>::new();
    let full = promise.get_future().then_expect(
        |a: Expected<i32>, b: Expected<String>, c: Expected<u8>| {
            (a.is_ok(), b.is_err(), c.is_err())
        },
    );
    promise.finish((Ok(1), Err(first), Err(second)));
    assert_eq!(full.get().ok(), Some((true, true, true)));
}

/// ## 回调返回 Future / Result / segmented
///
/// - **意图 (Why)**：下游的记录类型与完成方式由回调返回类型决定；
/// - **契约 (What)**：返回 Future 时下游吸收其结果；返回 `Err` 时下游失败；
///   返回 `segmented` 时下游为多字段记录；返回 `completed(..)` 时下游为无值记录。
#[test]
fn callback_return_shapes() {
    let mut inner = Promise::<(String,)>::new();
    let inner_future = inner.get_future();
    let chained = Future::ready((1_u8,)).then(move |_: u8| inner_future);
    assert!(!chained.is_ready(), "内层 Future 未完成时下游不应就绪");
    inner.set_value(("late".to_owned(),));
    assert_eq!(chained.get().ok().as_deref(), Some("late"));

    let failing = Future::ready((4_u32,))
        .then(|code: u32| -> Result<u32, SensorError> {
            Err(SensorError(code))
        });
    assert_eq!(
        failing.get().expect_err("应失败").downcast_ref::<SensorError>(),
        Some(&SensorError(4))
    );

    let pair = Future::ready(()).then(|| segmented((12, 12)));
    assert_eq!(pair.get().ok(), Some((12, 12)));

    let unit = Future::ready((5,)).then(|_: i32| ());
    assert!(unit.get().is_ok());

    let acknowledged = Future::ready((6_u32,))
        .then(|_: u32| completed(Ok::<(), SensorError>(())))
        .then(|| "acknowledged");
    assert_eq!(acknowledged.get().ok(), Some("acknowledged"));

    let rejected = Future::ready((7_u32,))
        .then(|code: u32| completed(Err(SensorError(code))))
        .then(|| "unreachable");
    assert_eq!(
        rejected.get().expect_err("应失败").downcast_ref::<SensorError>(),
        Some(&SensorError(7))
    );
}

/// ## 回调 panic
///
/// - **契约 (What)**：`then` / `then_expect` 捕获 panic 并以 `CallbackPanicked` 失败下游。
#[test]
fn panicking_callbacks_fail_the_destination() {
    for timing in TIMINGS {
        let result = run(
            timing,
            |promise| promise.set_value((1,)),
            |future: Future<(i32,)>| -> Future<(i32,)> {
                future.then(|_: i32| -> i32 { panic!("exploded in then") })
            },
        );
        let error = result.get().expect_err("panic 应转为失败");
        assert!(error.is_callback_panic());
        assert!(error.to_string().contains("exploded in then"));
    }

    let expect = Future::ready((1,)).then_expect(|_: Expected<i32>| -> u8 { panic!("again") });
    assert!(expect.get().expect_err("panic 应转为失败").is_callback_panic());
}

/// ## 队列投递
///
/// - **意图 (Why)**：指定队列时回调不应在兑现线程上运行；
/// - **契约 (What)**：兑现后只入队一个任务，驱动队列后才得到结果；
///   源失败时 `then_on` 不经过队列、下游同步失败。
#[test]
fn then_on_posts_to_the_queue() {
    let queue = Arc::new(TaskQueue::new());
    let mut promise = Promise::<(i32,)>::new();
    let posted = promise
        .get_future()
        .then_on(Arc::clone(&queue), |v: i32| v * 10);
    promise.set_value((2,));
    assert!(!posted.is_ready(), "回调应尚在队列中");
    assert_eq!(queue.len(), 1);
    assert_eq!(queue.run_all(), 1);
    assert_eq!(posted.get().ok(), Some(20));

    let mut failing = Promise::<(i32,)>::new();
    let short = failing
        .get_future()
        .then_on(Arc::clone(&queue), |v: i32| v * 10);
    failing.set_exception(SensorError(1));
    assert!(queue.is_empty(), "短路失败不经过队列");
    assert!(short.is_ready());
    assert!(short.get().is_err());
}

/// ## 队列被丢弃时的未执行任务
///
/// - **意图 (Why)**：任务闭包是目标单元的唯一持有者，队列释放任务即释放整段下游；
/// - **契约 (What)**：下游 `finally` 不会运行，单元与处理器全部归还分配器。
#[test]
fn dropping_a_queue_releases_pending_continuations() {
    let allocator = CountingAllocator::new();
    let queue = Arc::new(TaskQueue::new());
    let ran = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&ran);

    let mut promise = Promise::<(i32,), _>::with_allocator(allocator.clone());
    promise
        .get_future()
        .then_on(Arc::clone(&queue), |v: i32| v + 1)
        .finally(move |_: Expected<i32>| flag.store(true, Ordering::SeqCst));
    promise.set_value((1,));
    assert_eq!(queue.len(), 1, "回调应停留在队列中");

    drop(queue);
    drop(promise);
    assert!(!ran.load(Ordering::SeqCst), "未执行的任务不应触发下游续延");
    assert_eq!(allocator.live(), 0, "目标单元与处理器应随任务一并释放");
}

/// ## `finally` 与 `schedule`
#[test]
fn finally_and_schedule_use_the_queue() {
    let queue = Arc::new(TaskQueue::new());
    let hits = Arc::new(AtomicUsize::new(0));

    let counter = Arc::clone(&hits);
    Future::ready((3_usize,)).finally_on(Arc::clone(&queue), move |slot: Expected<usize>| {
        counter.fetch_add(slot.unwrap_or_default(), Ordering::SeqCst);
    });
    let scheduled = schedule(Arc::clone(&queue), || "scheduled");

    assert_eq!(hits.load(Ordering::SeqCst), 0);
    assert_eq!(queue.run_all(), 2);
    assert_eq!(hits.load(Ordering::SeqCst), 3);
    assert_eq!(scheduled.get().ok(), Some("scheduled"));
}

/// ## 分配器记账
///
/// - **意图 (Why)**：每个单元与处理器恰好销毁一次；
/// - **契约 (What)**：链路完成且所有句柄释放后，存活计数归零，且分配器沿链路传播。
#[test]
fn allocator_is_propagated_and_balanced() {
    let allocator = CountingAllocator::new();
    for timing in TIMINGS {
        let mut promise = Promise::<(u64,), _>::with_allocator(allocator.clone());
        let future = promise.get_future();
        let attach = |future: Future<(u64,), CountingAllocator>| {
            future
                .then(|v: u64| v + 1)
                .then_expect(|slot: Expected<u64>| slot.map(|v| v * 2))
        };
        let chained = match timing {
            Timing::FulfillFirst => {
                promise.set_value((1,));
                attach(future)
            }
            Timing::AttachFirst => {
                let chained = attach(future);
                promise.set_value((1,));
                chained
            }
        };
        assert!(allocator.live() > 0);
        assert_eq!(chained.get().ok(), Some(4));
        drop(promise);
    }
    assert_eq!(allocator.live(), 0, "所有单元与处理器都应被回收");
    assert!(allocator.total() >= 10, "每轮至少分配 3 个单元与 2 个处理器");
}

/// ## 未消费的结果
///
/// - **契约 (What)**：兑现后从未挂接的 Future 被丢弃时，结果随单元一起释放。
#[test]
fn unconsumed_results_are_released() {
    let allocator = CountingAllocator::new();
    let payload = Arc::new(());
    {
        let mut promise = Promise::<(Arc<()>,), _>::with_allocator(allocator.clone());
        let _future = promise.get_future();
        promise.set_value((Arc::clone(&payload),));
        assert_eq!(Arc::strong_count(&payload), 2);
    }
    assert_eq!(Arc::strong_count(&payload), 1, "结果应随单元销毁");
    assert_eq!(allocator.live(), 0);
}

/// ## 阻塞桥接
#[test]
fn get_blocks_until_another_thread_fulfils() {
    let mut promise = Promise::<(String,)>::new();
    let future = promise.get_future().then(|s: String| s.to_uppercase());
    let producer = std::thread::spawn(move || {
        std::thread::sleep(std::time::Duration::from_millis(10));
        promise.set_value(("threaded".to_owned(),));
    });
    assert_eq!(future.get().ok().as_deref(), Some("THREADED"));
    producer.join().expect("生产者线程不应 panic");
}
