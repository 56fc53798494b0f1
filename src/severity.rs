// 该文件是 Dingsun （定损） 项目的一部分。
// src/severity.rs - 损伤等级到严重程度的映射
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

use std::{collections::BTreeMap, path::Path};

use thiserror::Error;
use tracing::info;

use crate::model::DamageLabel;

pub const MAX_SEVERITY: u8 = 100;

/// 默认策略，穷尽匹配保证每个类别都有取值
const fn default_severity(label: DamageLabel) -> u8 {
  match label {
    DamageLabel::MinorScratch => 15,
    DamageLabel::ModerateDamage => 40,
    DamageLabel::SevereDamage => 70,
    DamageLabel::TotalLoss => 90,
  }
}

#[derive(Error, Debug)]
pub enum SeverityTableError {
  #[error("类别 {0} 缺少严重程度")]
  Missing(DamageLabel),
  #[error("类别 {0} 重复定义")]
  Duplicate(DamageLabel),
  #[error("类别 {label} 的严重程度 {score} 超出 0-100")]
  OutOfRange { label: DamageLabel, score: u32 },
  #[error("{0}")]
  UnknownLabel(String),
  #[error("JSON 解析错误: {0}")]
  Json(#[from] serde_json::Error),
  #[error("I/O 错误: {0}")]
  Io(#[from] std::io::Error),
}

/// 类别 -> 严重程度（0-100），每个类别恰好一项
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SeverityTable {
  scores: [u8; DamageLabel::COUNT],
}

impl Default for SeverityTable {
  fn default() -> Self {
    Self {
      scores: DamageLabel::ALL.map(default_severity),
    }
  }
}

impl SeverityTable {
  /// 校验并构造，缺项、重复或越界都会失败
  pub fn from_entries(entries: &[(DamageLabel, u32)]) -> Result<Self, SeverityTableError> {
    let mut scores: [Option<u8>; DamageLabel::COUNT] = [None; DamageLabel::COUNT];

    for &(label, score) in entries {
      if score > MAX_SEVERITY as u32 {
        return Err(SeverityTableError::OutOfRange { label, score });
      }
      let slot = &mut scores[label.index()];
      if slot.is_some() {
        return Err(SeverityTableError::Duplicate(label));
      }
      *slot = Some(score as u8);
    }

    let mut table = [0u8; DamageLabel::COUNT];
    for label in DamageLabel::ALL {
      table[label.index()] = scores[label.index()].ok_or(SeverityTableError::Missing(label))?;
    }

    Ok(Self { scores: table })
  }

  /// 解析形如 `{"minor_scratch": 15, ...}` 的 JSON 策略
  pub fn from_json(json: &str) -> Result<Self, SeverityTableError> {
    let raw: BTreeMap<String, u32> = serde_json::from_str(json)?;
    let entries = raw
      .into_iter()
      .map(|(name, score)| {
        name
          .parse::<DamageLabel>()
          .map(|label| (label, score))
          .map_err(SeverityTableError::UnknownLabel)
      })
      .collect::<Result<Vec<_>, _>>()?;
    Self::from_entries(&entries)
  }

  pub fn load(path: &Path) -> Result<Self, SeverityTableError> {
    info!("加载严重程度策略: {}", path.display());
    let json = std::fs::read_to_string(path)?;
    Self::from_json(&json)
  }

  pub fn severity_of(&self, label: DamageLabel) -> u8 {
    self.scores[label.index()]
  }

  /// 按模型输出下标取严重程度，下标越界时由置信度推算
  pub fn severity_for_index(&self, index: usize, confidence: f32) -> u8 {
    match DamageLabel::from_index(index) {
      Some(label) => self.severity_of(label),
      None => (confidence.clamp(0.0, 1.0) * MAX_SEVERITY as f32).round() as u8,
    }
  }

  pub fn entries(&self) -> impl Iterator<Item = (DamageLabel, u8)> + '_ {
    DamageLabel::ALL
      .into_iter()
      .map(|label| (label, self.severity_of(label)))
  }
}
