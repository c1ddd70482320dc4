use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Instant;

use crossbeam_channel::{Receiver, Sender};
use log::{debug, error, info};
use ndarray::ArrayView1;
use tokio::sync::mpsc;

use super::{EncodeInput, EncodeRequest, WorkerEvent, WorkerFactory, WorkerLink};
use crate::error::{FvError, Result};
use crate::extractor::{ExtractorFactory, FeatureExtractor};
use crate::fisher::{Descriptor, FisherEncoder};
use crate::gmm::{GmmModel, GmmStore};
use crate::metrics;

/// 在独立线程中运行编码任务
///
/// GMM 模型和特征提取器都在线程收到第一个任务时才初始化，初始化失败会报告 Fatal。
#[derive(Clone)]
pub struct ThreadWorkerFactory {
    store: Arc<GmmStore>,
    encoder: FisherEncoder,
    extractor: Option<ExtractorFactory>,
}

impl ThreadWorkerFactory {
    pub fn new(store: Arc<GmmStore>, encoder: FisherEncoder) -> Self {
        Self { store, encoder, extractor: None }
    }

    /// 设置特征提取器，没有设置时只能处理 [`EncodeInput::Feature`]
    pub fn with_extractor(mut self, extractor: ExtractorFactory) -> Self {
        self.extractor = Some(extractor);
        self
    }
}

impl WorkerFactory for ThreadWorkerFactory {
    fn spawn(&self, events: mpsc::UnboundedSender<WorkerEvent>) -> Result<Box<dyn WorkerLink>> {
        let (tx, rx) = crossbeam_channel::unbounded();
        let closed = Arc::new(AtomicBool::new(false));
        let factory = self.clone();
        let worker_closed = closed.clone();
        let handle = thread::Builder::new()
            .name("fv-encoder".into())
            .spawn(move || factory.run(rx, events, &worker_closed))
            .map_err(|e| FvError::WorkerFailure(format!("无法创建工作线程: {e}")))?;
        Ok(Box::new(ThreadWorkerLink { tx: Some(tx), closed, handle: Some(handle) }))
    }
}

struct WorkerState {
    model: Arc<GmmModel>,
    extractor: Option<Box<dyn FeatureExtractor>>,
}

impl ThreadWorkerFactory {
    fn init(&self) -> Result<WorkerState> {
        let model = self.store.load()?;
        let extractor = match &self.extractor {
            Some(factory) => {
                let extractor = factory()?;
                if extractor.dim() != model.dim() {
                    return Err(FvError::DimensionMismatch {
                        expected: model.dim(),
                        actual: extractor.dim(),
                    });
                }
                Some(extractor)
            }
            None => None,
        };
        info!("工作线程初始化完成，K = {}，D = {}", model.components(), model.dim());
        Ok(WorkerState { model, extractor })
    }

    fn run(
        self,
        rx: Receiver<EncodeRequest>,
        events: mpsc::UnboundedSender<WorkerEvent>,
        closed: &AtomicBool,
    ) {
        let mut state = None;
        for EncodeRequest { id, input } in rx {
            if closed.load(Ordering::Acquire) {
                // 队列中剩下的任务已经被调度器拒绝，不再处理
                debug!("工作线程已关闭，丢弃剩余任务");
                return;
            }
            if state.is_none() {
                match self.init() {
                    Ok(s) => state = Some(s),
                    Err(e) => {
                        error!("工作线程初始化失败: {e}");
                        let _ = events.send(WorkerEvent::Fatal(e.to_string()));
                        return;
                    }
                }
            }
            let Some(state) = state.as_mut() else { return };

            let start = Instant::now();
            let result = panic::catch_unwind(AssertUnwindSafe(|| self.process(state, input)));
            match result {
                Ok(result) => {
                    metrics::observe_encode(start.elapsed());
                    if events.send(WorkerEvent::Response { id, result }).is_err() {
                        // 调度器已经不在了
                        return;
                    }
                }
                Err(_) => {
                    error!("处理任务 {id} 时工作线程崩溃");
                    let _ = events.send(WorkerEvent::Fatal(format!("处理任务 {id} 时崩溃")));
                    return;
                }
            }
        }
        debug!("工作线程退出");
    }

    fn process(&self, state: &mut WorkerState, input: EncodeInput) -> Result<Descriptor> {
        let feature = match input {
            EncodeInput::Feature(feature) => feature,
            EncodeInput::Image(bytes) => match &mut state.extractor {
                Some(extractor) => extractor.extract(&bytes)?,
                None => return Err(FvError::Extraction("未配置特征提取器".into())),
            },
        };
        let fv = self.encoder.encode(ArrayView1::from(&feature), &state.model)?;
        Ok(fv.to_vec())
    }
}

/// 通过 crossbeam 通道与工作线程通信
pub struct ThreadWorkerLink {
    tx: Option<Sender<EncodeRequest>>,
    closed: Arc<AtomicBool>,
    handle: Option<thread::JoinHandle<()>>,
}

impl WorkerLink for ThreadWorkerLink {
    fn post(&self, request: EncodeRequest) -> Result<()> {
        let tx = self.tx.as_ref().ok_or_else(|| FvError::WorkerFailure("工作线程已关闭".into()))?;
        tx.send(request).map_err(|_| FvError::WorkerFailure("工作线程已退出".into()))
    }

    fn terminate(mut self: Box<Self>) {
        // 线程处理完手上的任务就会退出，不在这里等待
        self.closed.store(true, Ordering::Release);
        self.tx.take();
        if let Some(handle) = self.handle.take() {
            debug!("分离工作线程 {:?}", handle.thread().name());
        }
    }
}
