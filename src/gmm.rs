use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

use log::{debug, info};
use ndarray::prelude::*;
use serde::{Deserialize, Serialize};

use crate::error::{FvError, Result};

/// 当前支持的参数文件版本
pub const GMM_FORMAT_VERSION: u32 = 1;

fn default_version() -> u32 {
    GMM_FORMAT_VERSION
}

/// 序列化的 GMM 参数，即离线训练脚本导出的 JSON
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GmmParams {
    /// 训练脚本不会写入这个字段，缺省视为 1
    #[serde(default = "default_version")]
    pub version: u32,
    pub weights: Vec<f32>,
    pub means: Vec<Vec<f32>>,
    pub covariances: Vec<Vec<f32>>,
}

impl GmmParams {
    pub fn from_json(s: &str) -> Result<Self> {
        Ok(serde_json::from_str(s)?)
    }
}

#[derive(Debug, Clone)]
pub struct GmmConfig {
    /// 期望的高斯分量数量 K，为 None 时不检查
    pub components: Option<usize>,
    /// 期望的特征维数 D，为 None 时不检查
    pub feature_dim: Option<usize>,
    /// 权重之和与 1 的最大允许偏差
    pub weight_tolerance: f32,
}

impl Default for GmmConfig {
    fn default() -> Self {
        Self { components: None, feature_dim: None, weight_tolerance: 1e-3 }
    }
}

/// 对角协方差的高斯混合模型，加载后不可变
#[derive(Debug)]
pub struct GmmModel {
    weights: Array1<f32>,
    means: Array2<f32>,
    covariances: Array2<f32>,
    log_weights: Array1<f32>,
    /// 每个分量的 sum_d(log(sigma_kd))
    log_det: Array1<f32>,
}

impl GmmModel {
    /// 校验参数并构建模型
    pub fn from_params(params: GmmParams, config: &GmmConfig) -> Result<Self> {
        if params.version != GMM_FORMAT_VERSION {
            return Err(FvError::ModelFormat(format!("不支持的参数版本: {}", params.version)));
        }

        let k = params.weights.len();
        if k == 0 {
            return Err(FvError::ModelFormat("weights 为空".into()));
        }
        if params.means.len() != k || params.covariances.len() != k {
            return Err(FvError::ModelFormat(format!(
                "分量数量不一致: weights={}, means={}, covariances={}",
                k,
                params.means.len(),
                params.covariances.len()
            )));
        }
        if let Some(expected) = config.components {
            if expected != k {
                return Err(FvError::ModelFormat(format!("期望 {expected} 个分量，实际 {k} 个")));
            }
        }

        let d = params.means[0].len();
        if d == 0 {
            return Err(FvError::ModelFormat("means 维数为 0".into()));
        }
        if let Some(expected) = config.feature_dim {
            if expected != d {
                return Err(FvError::ModelFormat(format!("期望特征维数 {expected}，实际 {d}")));
            }
        }

        for (i, &w) in params.weights.iter().enumerate() {
            if !w.is_finite() || w <= 0.0 {
                return Err(FvError::ModelFormat(format!("weights[{i}] 必须为正数: {w}")));
            }
        }
        let sum = params.weights.iter().sum::<f32>();
        if (sum - 1.0).abs() > config.weight_tolerance {
            return Err(FvError::ModelFormat(format!("weights 之和为 {sum}，应为 1")));
        }

        let means = to_matrix("means", &params.means, d)?;
        let covariances = to_matrix("covariances", &params.covariances, d)?;
        if let Some(((row, col), v)) =
            covariances.indexed_iter().find(|(_, v)| !v.is_finite() || **v <= 0.0)
        {
            return Err(FvError::ModelFormat(format!(
                "covariances[{row}][{col}] 必须为正数: {v}"
            )));
        }
        if let Some(((row, col), _)) = means.indexed_iter().find(|(_, v)| !v.is_finite()) {
            return Err(FvError::ModelFormat(format!("means[{row}][{col}] 不是有限数")));
        }

        let weights = Array1::from(params.weights);
        let log_weights = weights.mapv(f32::ln);
        let log_det = covariances.map_axis(Axis(1), |row| row.iter().map(|v| v.ln()).sum::<f32>());

        Ok(Self { weights, means, covariances, log_weights, log_det })
    }

    /// 分量数量 K
    pub fn components(&self) -> usize {
        self.weights.len()
    }

    /// 特征维数 D
    pub fn dim(&self) -> usize {
        self.means.ncols()
    }

    pub fn weights(&self) -> ArrayView1<'_, f32> {
        self.weights.view()
    }

    pub fn means(&self) -> ArrayView2<'_, f32> {
        self.means.view()
    }

    pub fn covariances(&self) -> ArrayView2<'_, f32> {
        self.covariances.view()
    }

    pub fn log_weights(&self) -> ArrayView1<'_, f32> {
        self.log_weights.view()
    }

    pub fn log_det(&self) -> ArrayView1<'_, f32> {
        self.log_det.view()
    }
}

fn to_matrix(name: &str, rows: &[Vec<f32>], d: usize) -> Result<Array2<f32>> {
    let mut data = Vec::with_capacity(rows.len() * d);
    for (i, row) in rows.iter().enumerate() {
        if row.len() != d {
            return Err(FvError::ModelFormat(format!(
                "{name}[{i}] 维数为 {}，应为 {d}",
                row.len()
            )));
        }
        data.extend_from_slice(row);
    }
    Array2::from_shape_vec((rows.len(), d), data).map_err(|e| FvError::ModelFormat(e.to_string()))
}

#[derive(Debug, Clone)]
pub enum GmmSource {
    File(PathBuf),
    Params(GmmParams),
}

/// 持有 GMM 模型的生命周期
///
/// 首次 [`GmmStore::load`] 时读取并校验参数，之后的调用直接返回同一个模型；
/// [`GmmStore::release`] 释放已加载的模型。
#[derive(Debug)]
pub struct GmmStore {
    source: GmmSource,
    config: GmmConfig,
    model: Mutex<Option<Arc<GmmModel>>>,
}

impl GmmStore {
    pub fn new(source: GmmSource, config: GmmConfig) -> Self {
        Self { source, config, model: Mutex::new(None) }
    }

    pub fn from_file(path: impl AsRef<Path>, config: GmmConfig) -> Self {
        Self::new(GmmSource::File(path.as_ref().to_path_buf()), config)
    }

    pub fn from_params(params: GmmParams, config: GmmConfig) -> Self {
        Self::new(GmmSource::Params(params), config)
    }

    /// 加载模型，重复调用不会重新读取
    pub fn load(&self) -> Result<Arc<GmmModel>> {
        // NOTE: 整个首次加载过程都持有锁，并发的调用者会等待同一次加载完成
        let mut slot = self.model.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(model) = slot.as_ref() {
            return Ok(model.clone());
        }

        let params = match &self.source {
            GmmSource::File(path) => {
                info!("加载 GMM 参数: {}", path.display());
                let text = std::fs::read_to_string(path).map_err(|e| {
                    FvError::ModelFormat(format!("无法读取 {}: {e}", path.display()))
                })?;
                GmmParams::from_json(&text)?
            }
            GmmSource::Params(params) => params.clone(),
        };

        let model = Arc::new(GmmModel::from_params(params, &self.config)?);
        info!("GMM 加载完成: K = {}, D = {}", model.components(), model.dim());
        *slot = Some(model.clone());
        Ok(model)
    }

    pub fn is_loaded(&self) -> bool {
        self.model.lock().unwrap_or_else(PoisonError::into_inner).is_some()
    }

    /// 释放已加载的模型，下次 load 会重新读取
    pub fn release(&self) {
        if self.model.lock().unwrap_or_else(PoisonError::into_inner).take().is_some() {
            debug!("GMM 模型已释放");
        }
    }
}
