//! 分配器契约：为共享状态与处理器提供可注入的内存记账钩子。
//!
//! # 设计背景（Why）
//! - 每个共享状态单元与每个续延处理器都是一次独立的堆对象，调用方需要知道它们何时诞生、何时回收，
//!   以便实施配额、统计泄漏或对接池化内存；
//! - 稳定版 Rust 尚未提供按分配器参数化的 `Arc`，因此存储本身始终来自全局堆，
//!   分配器收到的是与真实布局一致的 `reserve` / `reclaim` 通知。
//!
//! # 逻辑解析（How）
//! - 每个单元或处理器在构造时获取一个 [`Lease`]，`Lease` 创建即 `reserve`，`Drop` 即 `reclaim`；
//! - 分配器实例从 `Promise` 开始，沿 `then` 链复制到每一个派生的单元与处理器。
//!
//! # 契约说明（What）
//! - 对同一布局，`reclaim` 与 `reserve` 一一对应，且 `reclaim` 恰好在对象销毁时发生一次；
//! - 分配器必须可廉价克隆，并能跨线程共享。

use std::{
    alloc::Layout,
    fmt,
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
};

/// 共享状态与处理器所使用的分配器接口。
pub trait CellAllocator: Clone + Send + Sync + 'static {
    /// 一个对象即将以 `layout` 布局存活。
    fn reserve(&self, layout: Layout);

    /// 先前以 `layout` 预留的对象已销毁。
    fn reclaim(&self, layout: Layout);
}

/// 默认分配器：不做任何记账。
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Global;

impl CellAllocator for Global {
    #[inline]
    fn reserve(&self, _layout: Layout) {}

    #[inline]
    fn reclaim(&self, _layout: Layout) {}
}

/// 统计存活对象数量的分配器，克隆之间共享计数。
///
/// # 教案式说明
/// - **意图 (Why)**：验证“每个单元恰好销毁一次”，即任意执行结束后 `live() == 0`；
/// - **契约 (What)**：`total()` 为累计预留次数，`live()` 为当前存活数，`live_bytes()` 为存活对象的布局字节总和；
/// - **权衡 (Trade-offs)**：计数使用 `SeqCst`，便于跨线程断言，代价是热路径上的额外栅栏。
#[derive(Clone, Default)]
pub struct CountingAllocator {
    stats: Arc<CountingStats>,
}

#[derive(Default)]
struct CountingStats {
    live: AtomicUsize,
    total: AtomicUsize,
    live_bytes: AtomicUsize,
}

impl CountingAllocator {
    /// 创建计数归零的分配器。
    pub fn new() -> Self {
        Self::default()
    }

    /// 当前存活的对象数。
    pub fn live(&self) -> usize {
        self.stats.live.load(Ordering::SeqCst)
    }

    /// 累计预留次数。
    pub fn total(&self) -> usize {
        self.stats.total.load(Ordering::SeqCst)
    }

    /// 存活对象的布局字节总和。
    pub fn live_bytes(&self) -> usize {
        self.stats.live_bytes.load(Ordering::SeqCst)
    }
}

impl CellAllocator for CountingAllocator {
    fn reserve(&self, layout: Layout) {
        self.stats.live.fetch_add(1, Ordering::SeqCst);
        self.stats.total.fetch_add(1, Ordering::SeqCst);
        self.stats
            .live_bytes
            .fetch_add(layout.size(), Ordering::SeqCst);
    }

    fn reclaim(&self, layout: Layout) {
        self.stats.live.fetch_sub(1, Ordering::SeqCst);
        self.stats
            .live_bytes
            .fetch_sub(layout.size(), Ordering::SeqCst);
    }
}

impl fmt::Debug for CountingAllocator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CountingAllocator")
            .field("live", &self.live())
            .field("total", &self.total())
            .finish()
    }
}

/// 一次预留的所有权凭证，析构时归还给分配器。
pub struct Lease<A: CellAllocator> {
    allocator: A,
    layout: Layout,
}

impl<A: CellAllocator> Lease<A> {
    /// 以 `T` 的布局向 `allocator` 预留。
    pub fn acquire<T>(allocator: A) -> Self {
        let layout = Layout::new::<T>();
        allocator.reserve(layout);
        Self { allocator, layout }
    }

    /// 预留所用的分配器。
    pub fn allocator(&self) -> &A {
        &self.allocator
    }

    /// 预留的布局。
    pub fn layout(&self) -> Layout {
        self.layout
    }
}

impl<A: CellAllocator> Drop for Lease<A> {
    fn drop(&mut self) {
        self.allocator.reclaim(self.layout);
    }
}

impl<A: CellAllocator + fmt::Debug> fmt::Debug for Lease<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Lease")
            .field("allocator", &self.allocator)
            .field("layout", &self.layout)
            .finish()
    }
}
