// 该文件是 Dingsun （定损） 项目的一部分。
// src/model.rs - 模型
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

use std::{fmt, str::FromStr};

use crate::{engine::InferenceError, engine::PredictionVector, frame::ImageTensor};

/// 分类模型接口
///
/// 同一输入与同一组权重必须得到完全相同的输出。
pub trait Model {
  type Input;
  type Output;
  type Error;

  fn infer(&self, input: &Self::Input) -> Result<Self::Output, Self::Error>;

  /// 模型是否由训练好的权重加载
  fn mode(&self) -> ModelMode {
    ModelMode::Trained
  }
}

/// 损伤分类器：输入标准张量，输出各类别概率
pub trait DamageModel:
  Model<Input = ImageTensor, Output = PredictionVector, Error = InferenceError> + Send + Sync
{
}

impl<M> DamageModel for M where
  M: Model<Input = ImageTensor, Output = PredictionVector, Error = InferenceError> + Send + Sync
{
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ModelMode {
  /// 从训练产物加载
  Trained,
  /// 未找到训练产物，分类头为随机权重，预测结果无实际意义
  Fallback,
}

impl fmt::Display for ModelMode {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      ModelMode::Trained => write!(f, "trained"),
      ModelMode::Fallback => write!(f, "fallback"),
    }
  }
}

/// 损伤类别，顺序与模型输出层一致
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum DamageLabel {
  MinorScratch,
  ModerateDamage,
  SevereDamage,
  TotalLoss,
}

impl DamageLabel {
  pub const COUNT: usize = 4;

  pub const ALL: [DamageLabel; Self::COUNT] = [
    DamageLabel::MinorScratch,
    DamageLabel::ModerateDamage,
    DamageLabel::SevereDamage,
    DamageLabel::TotalLoss,
  ];

  pub const fn index(self) -> usize {
    match self {
      DamageLabel::MinorScratch => 0,
      DamageLabel::ModerateDamage => 1,
      DamageLabel::SevereDamage => 2,
      DamageLabel::TotalLoss => 3,
    }
  }

  pub fn from_index(index: usize) -> Option<Self> {
    Self::ALL.get(index).copied()
  }

  pub const fn name(self) -> &'static str {
    match self {
      DamageLabel::MinorScratch => "minor_scratch",
      DamageLabel::ModerateDamage => "moderate_damage",
      DamageLabel::SevereDamage => "severe_damage",
      DamageLabel::TotalLoss => "total_loss",
    }
  }
}

impl fmt::Display for DamageLabel {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.name())
  }
}

impl FromStr for DamageLabel {
  type Err = String;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    Self::ALL
      .into_iter()
      .find(|label| label.name() == s)
      .ok_or_else(|| format!("未知的损伤类别: {}", s))
  }
}

mod classifier;
pub mod registry;

pub use self::classifier::{Backbone, DamageClassifierNet, ModelHandle, parse_device};
pub use self::registry::{
  ArtifactSource, ModelLoadError, ModelRegistry, ModelSource, RegistryConfig, RegistryState,
};
