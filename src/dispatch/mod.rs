//! 编码任务调度
//!
//! 一个常驻工作线程负责耗时的特征提取和编码，调用者通过 [`Dispatcher::submit`] 投递任务，
//! 工作线程的响应按任务 ID 匹配回调用者，与到达顺序无关。

mod pending;
mod worker;

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use log::{debug, info, warn};
pub use pending::*;
use tokio::sync::{mpsc, oneshot};
pub use worker::*;

use crate::error::{FvError, Result};
use crate::fisher::Descriptor;
use crate::metrics;

/// 任务输入
#[derive(Debug, Clone)]
pub enum EncodeInput {
    /// 编码后的图片数据，工作线程先提取特征再编码
    Image(Vec<u8>),
    /// 已提取好的特征向量
    Feature(Vec<f32>),
}

/// 调度器 -> 工作线程
#[derive(Debug)]
pub struct EncodeRequest {
    pub id: u64,
    pub input: EncodeInput,
}

/// 工作线程 -> 调度器
#[derive(Debug)]
pub enum WorkerEvent {
    /// 某个任务的结果
    Response { id: u64, result: Result<Descriptor> },
    /// 工作线程不可恢复的故障，发出后不会再有任何响应
    Fatal(String),
}

/// 与一个工作线程实例的连接
pub trait WorkerLink: Send {
    /// 投递任务，工作线程已退出时返回错误
    fn post(&self, request: EncodeRequest) -> Result<()>;

    /// 关闭工作线程并释放资源
    fn terminate(self: Box<Self>);
}

/// 创建工作线程
pub trait WorkerFactory: Send + Sync + 'static {
    /// 启动一个新的工作线程，它的响应和故障都通过 `events` 发送
    fn spawn(&self, events: mpsc::UnboundedSender<WorkerEvent>) -> Result<Box<dyn WorkerLink>>;
}

#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    /// 单个任务的超时时间
    pub timeout: Duration,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self { timeout: Duration::from_secs(30) }
    }
}

struct ActiveWorker {
    generation: u64,
    link: Box<dyn WorkerLink>,
}

struct Inner {
    config: DispatcherConfig,
    factory: Box<dyn WorkerFactory>,
    /// 任务 ID 从 1 开始递增，进程内不会重复
    next_id: AtomicU64,
    next_generation: AtomicU64,
    pending: PendingJobs,
    worker: Mutex<Option<ActiveWorker>>,
}

/// 编码任务调度器
///
/// 工作线程在第一次提交任务时才会创建；工作线程报告故障后，
/// 它上面所有等待中的任务都以同一个原因失败，下一次提交会创建新的工作线程。
pub struct Dispatcher {
    inner: Arc<Inner>,
}

impl Dispatcher {
    pub fn new(config: DispatcherConfig, factory: impl WorkerFactory) -> Self {
        Self {
            inner: Arc::new(Inner {
                config,
                factory: Box::new(factory),
                next_id: AtomicU64::new(1),
                next_generation: AtomicU64::new(1),
                pending: PendingJobs::default(),
                worker: Mutex::new(None),
            }),
        }
    }

    pub fn config(&self) -> &DispatcherConfig {
        &self.inner.config
    }

    /// 提交一个编码任务并等待结果
    ///
    /// 结果只会有一个：工作线程的响应、超时、工作线程故障，取先发生者。
    pub async fn submit(&self, input: EncodeInput) -> Result<Descriptor> {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, mut rx) = oneshot::channel();
        self.inner.dispatch(id, input, tx)?;

        let timeout = self.inner.config.timeout;
        let result = tokio::select! {
            biased;
            result = &mut rx => result.unwrap_or_else(|_| Err(closed())),
            _ = tokio::time::sleep(timeout) => {
                if self.inner.pending.remove(id) {
                    warn!("任务 {id} 超时 ({timeout:?})");
                    Err(FvError::Timeout { id, after: timeout })
                } else {
                    // 计时器触发的同时任务已经完成，结果已经在通道中
                    rx.await.unwrap_or_else(|_| Err(closed()))
                }
            }
        };

        metrics::inc_job_outcome(&result);
        result
    }

    /// 当前等待中的任务数量
    pub fn pending_count(&self) -> usize {
        self.inner.pending.len()
    }

    /// 当前工作线程的代数，尚未创建或已失效时为 None
    pub fn worker_generation(&self) -> Option<u64> {
        self.inner.slot().as_ref().map(|w| w.generation)
    }

    /// 关闭工作线程，所有等待中的任务以 WorkerFailure 失败
    pub fn shutdown(&self) {
        if let Some(worker) = self.inner.slot().take() {
            info!("关闭工作线程 #{}", worker.generation);
            worker.link.terminate();
        }
        let n = self.inner.pending.fail_all(&closed());
        if n > 0 {
            warn!("调度器关闭，{n} 个任务被取消");
        }
    }
}

impl Drop for Dispatcher {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn closed() -> FvError {
    FvError::WorkerFailure("调度器已关闭".into())
}

impl Inner {
    fn slot(&self) -> MutexGuard<'_, Option<ActiveWorker>> {
        self.worker.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// 确保工作线程存在，登记任务后投递
    ///
    /// 只有任务没有登记时才返回错误，登记后的失败都通过 completion 通知。
    fn dispatch(
        self: &Arc<Self>,
        id: u64,
        input: EncodeInput,
        completion: Completion,
    ) -> Result<()> {
        let mut slot = self.slot();
        let worker = match slot.take() {
            Some(worker) => worker,
            None => self.spawn_worker()?,
        };
        let generation = worker.generation;
        let worker = slot.insert(worker);

        // 先登记再投递，否则响应可能先于登记到达
        self.pending.insert(id, generation, completion);
        if let Err(e) = worker.link.post(EncodeRequest { id, input }) {
            warn!("工作线程 #{generation} 不可用: {e}");
            if let Some(worker) = slot.take() {
                worker.link.terminate();
            }
            drop(slot);
            self.pending.fail_generation(generation, &e);
        }
        Ok(())
    }

    fn spawn_worker(self: &Arc<Self>) -> Result<ActiveWorker> {
        let generation = self.next_generation.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::unbounded_channel();
        let link = self.factory.spawn(tx)?;
        info!("启动工作线程 #{generation}");
        metrics::inc_worker_spawn();
        tokio::spawn(pump_events(Arc::downgrade(self), generation, rx));
        Ok(ActiveWorker { generation, link })
    }

    fn on_worker_failure(&self, generation: u64, reason: String) {
        {
            let mut slot = self.slot();
            if slot.as_ref().is_some_and(|w| w.generation == generation) {
                if let Some(worker) = slot.take() {
                    worker.link.terminate();
                }
            }
        }
        let n = self.pending.fail_generation(generation, &FvError::WorkerFailure(reason.clone()));
        warn!("工作线程 #{generation} 故障: {reason}，{n} 个任务失败");
    }
}

/// 接收工作线程的事件并按 ID 完成任务
async fn pump_events(
    inner: Weak<Inner>,
    generation: u64,
    mut events: mpsc::UnboundedReceiver<WorkerEvent>,
) {
    while let Some(event) = events.recv().await {
        let Some(inner) = inner.upgrade() else {
            return;
        };
        match event {
            WorkerEvent::Response { id, result } => match inner.pending.settle(id, result) {
                Some(elapsed) => debug!("任务 {id} 完成，耗时 {:.2}ms", elapsed.as_secs_f64() * 1e3),
                None => debug!("丢弃未知任务 {id} 的响应"),
            },
            WorkerEvent::Fatal(reason) => {
                inner.on_worker_failure(generation, reason);
                return;
            }
        }
    }
    // 通道关闭但没有收到 Fatal，说明工作线程已经退出
    if let Some(inner) = inner.upgrade() {
        inner.on_worker_failure(generation, "工作线程已退出".into());
    }
}
