// 该文件是 Dingsun （定损） 项目的一部分。
// src/engine.rs - 分类推理
//
// 本文件根据 Apache 许可证第 2.0 版（以下简称“许可证”）授权使用；
// 除非遵守该许可证条款，否则您不得使用本文件。
// 您可通过以下网址获取许可证副本：
// http://www.apache.org/licenses/LICENSE-2.0
// 除非适用法律要求或书面同意，根据本许可协议分发的软件均按“原样”提供，
// 不附带任何形式的明示或暗示的保证或条件。
// 有关许可权限与限制的具体条款，请参阅本许可协议。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, Wareless Group

use thiserror::Error;
use tracing::{debug, error};

use crate::{frame::ImageTensor, model::DamageLabel, model::DamageModel};

/// 概率和允许的误差
pub const PROBABILITY_SUM_TOLERANCE: f32 = 1e-3;

#[derive(Error, Debug)]
pub enum InferenceError {
  #[error("输出宽度不匹配: 期望 {expected}, 实际 {actual}")]
  OutputWidth { expected: usize, actual: usize },
  #[error("输出不是概率分布: 和为 {sum}")]
  NotNormalized { sum: f32 },
  #[error("推理后端错误: {0}")]
  Backend(#[from] candle_core::Error),
}

/// 模型输出的概率向量，长度等于类别数
#[derive(Debug, Clone, PartialEq)]
pub struct PredictionVector {
  probabilities: Box<[f32]>,
}

impl PredictionVector {
  pub fn new(probabilities: Vec<f32>) -> Self {
    Self {
      probabilities: probabilities.into_boxed_slice(),
    }
  }

  pub fn as_slice(&self) -> &[f32] {
    &self.probabilities
  }

  pub fn len(&self) -> usize {
    self.probabilities.len()
  }

  pub fn is_empty(&self) -> bool {
    self.probabilities.is_empty()
  }

  pub fn sum(&self) -> f32 {
    self.probabilities.iter().sum()
  }

  /// 最大概率的下标与取值，并列时取下标最小者
  pub fn argmax(&self) -> Option<(usize, f32)> {
    let mut best: Option<(usize, f32)> = None;
    for (index, &p) in self.probabilities.iter().enumerate() {
      match best {
        Some((_, max)) if p <= max => {}
        _ => best = Some((index, p)),
      }
    }
    best
  }

  fn validate(&self) -> Result<(), InferenceError> {
    if self.len() != DamageLabel::COUNT {
      return Err(InferenceError::OutputWidth {
        expected: DamageLabel::COUNT,
        actual: self.len(),
      });
    }

    let sum = self.sum();
    let in_range = self
      .probabilities
      .iter()
      .all(|p| p.is_finite() && (0.0..=1.0).contains(p));
    if !in_range || !sum.is_finite() || (sum - 1.0).abs() > PROBABILITY_SUM_TOLERANCE {
      return Err(InferenceError::NotNormalized { sum });
    }

    Ok(())
  }
}

/// 分类结果：类别下标与置信度
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Classification {
  pub index: usize,
  pub confidence: f32,
}

/// 对标准张量执行一次前向推理并校验输出
pub fn classify<M: DamageModel + ?Sized>(
  tensor: &ImageTensor,
  model: &M,
) -> Result<PredictionVector, InferenceError> {
  debug!("执行模型推理");
  let prediction = model.infer(tensor)?;

  if let Err(e) = prediction.validate() {
    error!("模型输出校验失败: {}", e);
    return Err(e);
  }

  debug!("模型推理结果：{:?}", prediction.as_slice());
  Ok(prediction)
}

/// 取出最可能的类别
pub fn top1(prediction: &PredictionVector) -> Result<Classification, InferenceError> {
  prediction
    .argmax()
    .map(|(index, confidence)| Classification { index, confidence })
    .ok_or(InferenceError::OutputWidth {
      expected: DamageLabel::COUNT,
      actual: 0,
    })
}
