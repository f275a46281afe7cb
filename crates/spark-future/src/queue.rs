//! 队列契约：续延回调被投递到哪里执行。
//!
//! # 设计背景（Why）
//! - 引擎本身不拥有线程，也不关心执行器实现；它只需要“把一个一次性任务交出去”的能力；
//! - 最常见的队列是“就地执行”，此时任何装箱都是浪费，因此契约拆为两层：
//!   对象安全的 [`Queue::push`] 与可被具体类型覆盖的泛型快路径 [`Queue::execute`]。
//!
//! # 契约说明（What）
//! - 队列对每个任务恰好执行一次，并承担其生命周期；
//! - 任务可能在任意线程执行，因此必须 `Send + 'static`；
//! - 引擎只要求同一个处理器投递的任务按投递顺序执行（流式 `for_each` 依赖这一点），
//!   [`ImmediateQueue`] 与 [`TaskQueue`] 都满足该顺序。
//!
//! # 风险提示（Trade-offs）
//! - 队列若在任务执行前被丢弃，任务闭包随之释放：它持有的目标单元被销毁，
//!   挂在该单元上的下游续延（包括 `finally`）既不会运行，也不会收到失败通知；
//! - 需要“必达”语义的调用方应保证队列在所有投递的任务执行完之前存活。

use std::{collections::VecDeque, fmt, sync::Arc};

use parking_lot::Mutex;

/// 队列中的一次性任务。
pub type Task = Box<dyn FnOnce() + Send + 'static>;

/// 执行器接口。
///
/// 未执行就被丢弃的任务会静默释放其下游续延，见模块文档的风险提示。
pub trait Queue: Send + Sync + 'static {
    /// 投递一个已装箱的任务。
    fn push(&self, task: Task);

    /// 泛型投递入口，默认装箱后转交 [`Queue::push`]。
    ///
    /// 零尺寸或内联执行的队列应覆盖此方法以跳过装箱。
    fn execute<F>(&self, f: F)
    where
        F: FnOnce() + Send + 'static,
        Self: Sized,
    {
        self.push(Box::new(f));
    }
}

/// 在触发线程上立即执行任务的零尺寸队列，是未显式指定队列时的默认值。
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ImmediateQueue;

impl Queue for ImmediateQueue {
    fn push(&self, task: Task) {
        task();
    }

    fn execute<F>(&self, f: F)
    where
        F: FnOnce() + Send + 'static,
    {
        f();
    }
}

impl<Q: Queue + ?Sized> Queue for Arc<Q> {
    fn push(&self, task: Task) {
        (**self).push(task);
    }
}

impl<Q: Queue + ?Sized> Queue for &'static Q {
    fn push(&self, task: Task) {
        (**self).push(task);
    }
}

/// 先进先出的延迟队列，由调用方显式驱动。
///
/// # 教案式说明
/// - **意图 (Why)**：测试与单线程事件循环需要观察“投递”与“执行”之间的间隔，
///   例如确认流式回调的每个值都是独立任务；
/// - **逻辑 (How)**：`push` 只入队；`run_one` 在锁外执行出队任务，允许任务再次向同一队列投递；
/// - **契约 (What)**：任务严格按投递顺序执行；队列被丢弃时未执行的任务随之释放，
///   对应的下游续延不会运行；
/// - **权衡 (Trade-offs)**：使用 `parking_lot::Mutex` 保护 `VecDeque`，适合低竞争场景。
#[derive(Default)]
pub struct TaskQueue {
    tasks: Mutex<VecDeque<Task>>,
}

impl TaskQueue {
    /// 创建空队列。
    pub fn new() -> Self {
        Self::default()
    }

    /// 当前待执行任务数。
    pub fn len(&self) -> usize {
        self.tasks.lock().len()
    }

    /// 是否没有待执行任务。
    pub fn is_empty(&self) -> bool {
        self.tasks.lock().is_empty()
    }

    /// 执行队首任务；队列为空时返回 `false`。
    pub fn run_one(&self) -> bool {
        let task = self.tasks.lock().pop_front();
        match task {
            Some(task) => {
                task();
                true
            }
            None => false,
        }
    }

    /// 持续执行直到队列为空（包括执行过程中新投递的任务），返回执行的任务数。
    pub fn run_all(&self) -> usize {
        let mut executed = 0;
        while self.run_one() {
            executed += 1;
        }
        executed
    }
}

impl Queue for TaskQueue {
    fn push(&self, task: Task) {
        self.tasks.lock().push_back(task);
    }
}

impl fmt::Debug for TaskQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskQueue")
            .field("pending", &self.len())
            .finish()
    }
}
