//! 有界并发 Fan-Out - 基础设施层
//!
//! ## 职责
//!
//! 把一批相互独立的工作条目并发地派发给一个 worker 函数：
//!
//! 1. **并发上限**：Semaphore 限制同时在途的任务数
//! 2. **顺序保证**：结果按输入下标写回对应槽位，与完成顺序无关
//! 3. **故障隔离**：某个任务 panic 时只由 `fallback` 合成该槽位的结果，
//!    不会中断兄弟任务
//! 4. **完成回调**：`on_complete` 在每个任务完成时立即触发，与后续任务
//!    的执行并行推进，供进度日志与周期性落盘使用——中断时已完成的
//!    工作已经被回调消费过
//!
//! 调用方把它嵌套两层即可得到「文件夹 × 图片」的两级调度。

use std::future::Future;
use std::sync::Arc;

use futures::stream::{FuturesUnordered, StreamExt};
use tokio::sync::Semaphore;

/// 并发派发 `items`，返回与输入同序的结果向量
///
/// # 参数
/// - `items`: 有序的工作条目
/// - `max_concurrency`: 同时在途的任务上限
/// - `worker`: 处理单个条目，`(输入下标, 条目) -> 结果`
/// - `fallback`: 任务 panic 时为该槽位合成结果，`(输入下标, 错误信息) -> 结果`
/// - `on_complete`: 按完成顺序（非输入顺序）回调每个结果，完成即触发
pub async fn fan_out<T, R, F, Fut>(
    items: Vec<T>,
    max_concurrency: usize,
    worker: F,
    fallback: impl Fn(usize, String) -> R,
    mut on_complete: impl FnMut(usize, &R),
) -> Vec<R>
where
    T: Send + 'static,
    R: Send + 'static,
    F: Fn(usize, T) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = R> + Send + 'static,
{
    let total = items.len();
    let semaphore = Arc::new(Semaphore::new(max_concurrency.max(1)));
    let worker = Arc::new(worker);

    // 全部任务立即入队，permit 在任务内部获取——派发循环自身不等待，
    // 下面的收割循环因此能与执行并行消费完成事件
    let mut in_flight = FuturesUnordered::new();
    for (idx, item) in items.into_iter().enumerate() {
        let semaphore = semaphore.clone();
        let worker = worker.clone();

        let handle = tokio::spawn(async move {
            // 信号量在本函数生命周期内从不关闭，acquire 不会失败
            let _permit = semaphore.acquire_owned().await.ok();
            worker(idx, item).await
        });

        in_flight.push(async move { (idx, handle.await) });
    }

    // 按完成顺序收集，按输入下标写回槽位
    let mut slots: Vec<Option<R>> = Vec::with_capacity(total);
    slots.resize_with(total, || None);

    while let Some((idx, joined)) = in_flight.next().await {
        let result = match joined {
            Ok(result) => result,
            Err(join_err) => fallback(idx, join_err.to_string()),
        };
        on_complete(idx, &result);
        slots[idx] = Some(result);
    }

    // 每个槽位恰好被填充一次；空槽只剩理论可能，同样走 fallback
    slots
        .into_iter()
        .enumerate()
        .map(|(idx, slot)| slot.unwrap_or_else(|| fallback(idx, "result slot not filled".to_string())))
        .collect()
}
