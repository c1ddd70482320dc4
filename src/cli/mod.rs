mod compare;
mod encode;
mod inspect;
mod scan;
pub mod server;

use std::sync::Arc;

pub use compare::*;
pub use encode::*;
pub use inspect::*;
pub use scan::*;
pub use server::*;

use crate::config::{DispatchOptions, ExtractorOptions, GmmOptions, Opts, ScoreOptions};
use crate::dispatch::{Dispatcher, ThreadWorkerFactory};
use crate::extractor::extractor_factory;
use crate::fisher::FisherEncoder;
use crate::gmm::GmmStore;
use crate::scan::Scanner;
use crate::similarity::Scorer;

pub trait SubCommandExtend {
    fn run(&self, opts: &Opts) -> impl std::future::Future<Output = anyhow::Result<()>> + Send;
}

/// 子命令共用的编码流水线：GMM 模型 + 工作线程
pub struct Pipeline {
    pub store: Arc<GmmStore>,
    pub dispatcher: Arc<Dispatcher>,
}

impl Pipeline {
    /// 在启动时加载 GMM 模型，参数文件有误时立刻返回错误
    ///
    /// `with_extractor` 为 false 时工作线程只能处理特征向量输入。
    pub fn open(
        opts: &Opts,
        gmm: &GmmOptions,
        extractor: &ExtractorOptions,
        dispatch: &DispatchOptions,
        with_extractor: bool,
    ) -> anyhow::Result<Self> {
        let path = gmm.path(&opts.conf_dir);
        let store = Arc::new(GmmStore::from_file(&path, gmm.config()));
        store.load()?;

        let mut factory = ThreadWorkerFactory::new(store.clone(), FisherEncoder::new(gmm.encoder_config()));
        if with_extractor {
            factory = factory.with_extractor(extractor_factory(extractor.config(&opts.conf_dir))?);
        }
        let dispatcher = Arc::new(Dispatcher::new(dispatch.into(), factory));
        Ok(Self { store, dispatcher })
    }

    pub fn scanner(&self, score: &ScoreOptions) -> Scanner {
        Scanner::new(self.dispatcher.clone(), Scorer::new(score.into()))
    }

    /// 关闭工作线程并释放模型
    pub fn close(self) {
        self.dispatcher.shutdown();
        self.store.release();
    }
}
