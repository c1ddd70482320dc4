use ndarray::prelude::*;
use ndarray::concatenate;

use crate::error::{FvError, Result};
use crate::gmm::GmmModel;

/// 归一化后的 Fisher Vector，跨线程传递时按值转移
pub type Descriptor = Vec<f32>;

#[derive(Debug, Clone)]
pub struct EncoderConfig {
    /// L2 归一化时加在范数上的 ε，避免全零向量除零
    pub epsilon: f32,
}

impl Default for EncoderConfig {
    fn default() -> Self {
        Self { epsilon: 1e-8 }
    }
}

/// Fisher Vector 编码器
///
/// 输出为 `[gMu, gSigma]`，两部分都先在分量维度上求和，所以描述符长度为 `2 * D`。
#[derive(Debug, Clone, Default)]
pub struct FisherEncoder {
    config: EncoderConfig,
}

impl FisherEncoder {
    pub fn new(config: EncoderConfig) -> Self {
        Self { config }
    }

    /// 给定模型的描述符长度
    pub fn descriptor_len(model: &GmmModel) -> usize {
        2 * model.dim()
    }

    /// 将一个特征向量编码为归一化后的 Fisher Vector
    ///
    /// 参数：
    /// - feature: 长度为 D 的特征向量
    /// - model: GMM 模型
    pub fn encode(&self, feature: ArrayView1<f32>, model: &GmmModel) -> Result<Array1<f32>> {
        let d = model.dim();
        if feature.len() != d {
            return Err(FvError::DimensionMismatch { expected: d, actual: feature.len() });
        }
        if feature.iter().any(|v| !v.is_finite()) {
            return Err(FvError::Numeric("特征向量包含非有限值".into()));
        }
        let sigma = model.covariances();
        // 加载时已经检查过，这里再检查一次
        if sigma.iter().any(|&v| v <= 0.0) {
            return Err(FvError::Numeric("方差必须为正数".into()));
        }

        let weights = model.weights();

        // diff[k, d] = x_d - mu_kd, r[k, d] = diff / sigma
        let diff = &feature.insert_axis(Axis(0)) - &model.means();
        let r = &diff / &sigma;

        // logProb_k = log(w_k) - 0.5 * (sum_d log(sigma_kd) + sum_d diff^2 / sigma)
        let mahalanobis = (&diff * &r).sum_axis(Axis(1));
        let log_prob = &model.log_weights() - &((&model.log_det() + &mahalanobis) * 0.5);
        let gamma = softmax(log_prob.view());

        // gMu_d = sum_k gamma_k * r_kd / sqrt(w_k)
        let coef_mu = (&gamma / &weights.mapv(f32::sqrt)).insert_axis(Axis(1));
        let g_mu = (&r * &coef_mu).sum_axis(Axis(0));

        // gSigma_d = sum_k gamma_k * 0.5 * (r_kd * diff_kd - 1) / sqrt(2 w_k)
        let coef_sigma =
            (&gamma * 0.5 / &weights.mapv(|w| (2.0 * w).sqrt())).insert_axis(Axis(1));
        let g_sigma = ((&r * &diff - 1.0) * &coef_sigma).sum_axis(Axis(0));

        let mut fv = concatenate![Axis(0), g_mu, g_sigma];
        power_normalize(&mut fv);
        l2_normalize(&mut fv, self.config.epsilon);
        Ok(fv)
    }
}

/// 减去最大值后再求指数，避免溢出
pub fn softmax(x: ArrayView1<f32>) -> Array1<f32> {
    let max = x.fold(f32::NEG_INFINITY, |acc, &v| acc.max(v));
    let exp = x.mapv(|v| (v - max).exp());
    let sum = exp.sum();
    exp / sum
}

/// sign(v) * sqrt(|v|)
pub fn power_normalize(v: &mut Array1<f32>) {
    v.mapv_inplace(|x| x.signum() * x.abs().sqrt());
}

/// v / (||v||_2 + ε)
pub fn l2_normalize(v: &mut Array1<f32>, epsilon: f32) {
    let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    *v /= norm + epsilon;
}
