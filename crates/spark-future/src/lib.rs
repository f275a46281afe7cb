#![deny(unsafe_code)]
//! spark-future：泛型、可注入分配器的 Future/Promise 续延引擎。
//!
//! # 模块定位（Why）
//! - 生产者稍后交付零到多个带类型的值（或一个失败），消费者预先挂接一段计算，
//!   在值到达后执行；引擎负责在两侧任意交错下把结果交给后到的一方；
//! - 每个共享单元恰好交付一次、恰好触发一次续延，单次路径不加锁；
//! - 值类型列表与分配器均为泛型参数，续延投递到哪个队列由调用方决定。
//!
//! # 组成（What）
//! - [`Promise`] / [`Future`]：单次交接的生产者与消费者句柄；
//! - `then` / `then_expect` / `finally`：三种续延，见 [`Future`]；
//! - [`join`] / [`join_all`] / [`flatten`] / [`segmented`]：多 Future 组合；
//! - [`StreamPromise`] / [`StreamFuture`]：可多次推送的流式变体；
//! - [`Queue`]：执行器契约，[`CellAllocator`]：分配器契约；
//! - [`CapturedError`] / [`Expected`]：逐槽错误模型。
//!
//! # 使用指引（How）
//! ```
//! use spark_future::{Promise, TaskQueue, join, segmented};
//! use std::sync::Arc;
//!
//! let queue = Arc::new(TaskQueue::new());
//! let mut left = Promise::<(i32,)>::new();
//! let mut right = Promise::<(String,)>::new();
//!
//! let summary = join((left.get_future(), right.get_future()))
//!     .then_on(Arc::clone(&queue), |n: i32, s: String| segmented((n * 2, s.len())));
//!
//! left.set_value((21,));
//! right.set_value(("spark".to_owned(),));
//! assert_eq!(queue.run_all(), 1, "续延被投递为一个任务");
//! assert_eq!(summary.get().ok(), Some((42, 5)));
//! ```
//!
//! # 可观测性
//! 引擎通过 `tracing` 输出事件：单元交接为 `trace`，承诺被遗弃与流终止为 `debug`，
//! `for_each` 回调 panic 为 `warn`。库本身不安装订阅者。
//!
//! # 模型检查
//! 以 `RUSTFLAGS="--cfg loom" cargo test --features loom-model --test loom_cell` 运行
//! Loom 对交接协议的穷举检查。

pub mod allocator;
pub mod apply;
mod cell;
pub mod combinators;
pub mod error;
pub mod future;
mod handler;
pub mod queue;
pub mod record;
pub mod resolve;
pub mod stream;
mod sync;

pub use allocator::{CellAllocator, CountingAllocator, Global, Lease};
pub use apply::{Apply, ApplyMut};
pub use combinators::{Join, flatten, join, join_all};
pub use error::{CapturedError, Expected, FutureError};
pub use future::{Future, FutureBridge, Promise, schedule};
pub use queue::{ImmediateQueue, Queue, Task, TaskQueue};
pub use record::Record;
pub use resolve::{Completed, Deferred, Resolution, Resolve, Segmented, completed, segmented};
pub use stream::{StreamFuture, StreamPromise};
