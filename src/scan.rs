//! 一次扫描：编码所有输入，两两比较，输出重复对

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use futures::{StreamExt, stream};
use log::{info, warn};
use rayon::prelude::*;
use serde::Serialize;

use crate::dispatch::{Dispatcher, EncodeInput};
use crate::error::{FvError, Result};
use crate::fisher::Descriptor;
use crate::metrics;
use crate::similarity::Scorer;

/// 扫描的一个输入，`reference` 只用于在结果中标识它
#[derive(Debug, Clone)]
pub struct ScanInput {
    pub reference: String,
    pub payload: EncodeInput,
}

impl ScanInput {
    pub fn image(reference: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self { reference: reference.into(), payload: EncodeInput::Image(bytes) }
    }

    pub fn feature(reference: impl Into<String>, feature: Vec<f32>) -> Self {
        Self { reference: reference.into(), payload: EncodeInput::Feature(feature) }
    }

    fn content_hash(&self) -> blake3::Hash {
        let mut hasher = blake3::Hasher::new();
        match &self.payload {
            EncodeInput::Image(bytes) => {
                hasher.update(b"image");
                hasher.update(bytes);
            }
            EncodeInput::Feature(feature) => {
                hasher.update(b"feature");
                for v in feature {
                    hasher.update(&v.to_le_bytes());
                }
            }
        }
        hasher.finalize()
    }
}

/// 一对重复的输入，`source` 在输入中排在 `target` 之前
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MatchRecord {
    pub source: String,
    pub target: String,
    /// 相似度，取值范围 (0, 1]
    pub score: f32,
    pub distance: f32,
}

/// 没能参与比较的输入
#[derive(Debug, Clone)]
pub struct ScanFailure {
    pub reference: String,
    pub error: FvError,
}

#[derive(Debug, Clone, Default)]
pub struct ScanReport {
    pub matches: Vec<MatchRecord>,
    pub failures: Vec<ScanFailure>,
    /// 成功编码的输入数量
    pub encoded: usize,
}

/// 同时提交给调度器的任务数量
///
/// 工作线程串行处理任务，超时从提交时开始计算，排队的任务越多越容易超时。
pub const DEFAULT_SCAN_CONCURRENCY: usize = 2;

pub struct Scanner {
    dispatcher: Arc<Dispatcher>,
    scorer: Scorer,
    concurrency: usize,
}

impl Scanner {
    pub fn new(dispatcher: Arc<Dispatcher>, scorer: Scorer) -> Self {
        Self { dispatcher, scorer, concurrency: DEFAULT_SCAN_CONCURRENCY }
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    pub fn scorer(&self) -> &Scorer {
        &self.scorer
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    /// 返回所有判定为重复的输入对
    pub async fn scan(&self, inputs: Vec<ScanInput>) -> Result<Vec<MatchRecord>> {
        Ok(self.scan_report(inputs).await?.matches)
    }

    /// 与 [`Scanner::scan`] 相同，但同时返回失败的输入
    ///
    /// 单个输入失败只会把它排除在比较之外；只有所有输入都因不可恢复的错误失败时才返回错误。
    pub async fn scan_report(&self, inputs: Vec<ScanInput>) -> Result<ScanReport> {
        self.scan_report_with(inputs, &self.scorer).await
    }

    /// 使用指定的评分器而不是默认的评分器
    pub async fn scan_report_with(
        &self,
        inputs: Vec<ScanInput>,
        scorer: &Scorer,
    ) -> Result<ScanReport> {
        let start = Instant::now();

        // 内容相同的输入只编码一次
        let mut slots = HashMap::new();
        let mut unique = vec![];
        let mut owners = Vec::with_capacity(inputs.len());
        let mut references = Vec::with_capacity(inputs.len());
        for input in inputs {
            let slot = *slots.entry(input.content_hash()).or_insert_with(|| {
                unique.push(input.payload.clone());
                unique.len() - 1
            });
            owners.push(slot);
            references.push(input.reference);
        }
        if unique.len() < references.len() {
            info!("{} 个输入中有 {} 个不同内容", references.len(), unique.len());
        }

        let results = stream::iter(unique)
            .map(|input| self.dispatcher.submit(input))
            .buffered(self.concurrency)
            .collect::<Vec<_>>()
            .await;

        let mut encoded = vec![];
        let mut failures = vec![];
        for (reference, slot) in references.into_iter().zip(owners) {
            match &results[slot] {
                Ok(descriptor) => encoded.push((reference, descriptor)),
                Err(e) => {
                    warn!("{reference}: {e}");
                    failures.push(ScanFailure { reference, error: e.clone() });
                }
            }
        }

        if encoded.is_empty()
            && !failures.is_empty()
            && failures.iter().all(|f| !f.error.is_recoverable())
        {
            return Err(failures[0].error.clone());
        }

        let matches = compare_all(scorer, &encoded);
        let pairs = encoded.len() * encoded.len().saturating_sub(1) / 2;
        metrics::inc_scan(encoded.len() + failures.len(), pairs, matches.len());
        info!(
            "扫描完成，{} 个输入，{} 个失败，{} 对重复，耗时 {:.2}s",
            encoded.len() + failures.len(),
            failures.len(),
            matches.len(),
            start.elapsed().as_secs_f32()
        );

        Ok(ScanReport { matches, failures, encoded: encoded.len() })
    }
}

/// 两两比较，按 (source, target) 的输入顺序输出
fn compare_all(scorer: &Scorer, encoded: &[(String, &Descriptor)]) -> Vec<MatchRecord> {
    let n = encoded.len();
    if n < 2 {
        return vec![];
    }
    (0..n)
        .into_par_iter()
        .flat_map_iter(|i| {
            (i + 1..n).filter_map(move |j| {
                let (source, a) = &encoded[i];
                let (target, b) = &encoded[j];
                match scorer.score(a, b) {
                    Ok(score) if score.is_duplicate => Some(MatchRecord {
                        source: source.clone(),
                        target: target.clone(),
                        score: score.similarity,
                        distance: score.distance,
                    }),
                    Ok(_) => None,
                    Err(e) => {
                        warn!("无法比较 {source} 和 {target}: {e}");
                        None
                    }
                }
            })
        })
        .collect()
}
