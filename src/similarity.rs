use serde::Serialize;

use crate::error::{FvError, Result};

#[derive(Debug, Clone)]
pub struct ScorerConfig {
    /// 距离小于该值才可能判定为重复
    pub max_distance: f32,
    /// 设置后，相似度还必须大于该值
    pub min_similarity: Option<f32>,
    /// 卡方距离分母上的 ε
    pub epsilon: f32,
}

impl Default for ScorerConfig {
    fn default() -> Self {
        Self { max_distance: 1.5, min_similarity: None, epsilon: 1e-6 }
    }
}

/// 一次比较的结果
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Score {
    pub distance: f32,
    /// 1 / (1 + distance)，取值范围 (0, 1]
    pub similarity: f32,
    pub is_duplicate: bool,
}

/// 基于卡方距离的相似度评分
#[derive(Debug, Clone, Default)]
pub struct Scorer {
    config: ScorerConfig,
}

impl Scorer {
    pub fn new(config: ScorerConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ScorerConfig {
        &self.config
    }

    /// sum_i (a_i - b_i)^2 / (|a_i| + |b_i| + ε)
    ///
    /// 与标准卡方距离 `(a_i - b_i)^2 / (a_i + b_i + ε)` 只在负数分量上不同：
    /// Fisher Vector 含有负数分量，分母取绝对值保证距离非负。
    pub fn distance(&self, a: &[f32], b: &[f32]) -> Result<f32> {
        if a.len() != b.len() {
            return Err(FvError::LengthMismatch { left: a.len(), right: b.len() });
        }
        let eps = self.config.epsilon;
        Ok(a.iter()
            .zip(b)
            .map(|(x, y)| {
                let d = x - y;
                d * d / (x.abs() + y.abs() + eps)
            })
            .sum())
    }

    pub fn score(&self, a: &[f32], b: &[f32]) -> Result<Score> {
        let distance = self.distance(a, b)?;
        let similarity = 1.0 / (1.0 + distance);
        Ok(Score { distance, similarity, is_duplicate: self.is_duplicate(distance, similarity) })
    }

    /// 距离和相似度两个条件都满足才判定为重复
    pub fn is_duplicate(&self, distance: f32, similarity: f32) -> bool {
        distance < self.config.max_distance
            && self.config.min_similarity.is_none_or(|min| similarity > min)
    }
}
