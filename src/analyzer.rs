// 该文件是 Dingsun （定损） 项目的一部分。
// src/analyzer.rs - 损伤分析服务
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
use tracing::{debug, info};

use crate::{
  engine::{Classification, InferenceError, classify, top1},
  input::{InvalidImageError, preprocess},
  model::{ArtifactSource, Model, ModelLoadError, ModelMode, ModelRegistry, ModelSource, RegistryConfig},
  output::{AnalysisResult, assemble_index},
  severity::SeverityTable,
};

#[derive(Error, Debug)]
pub enum AnalyzeError {
  #[error("无效图像: {0}")]
  InvalidImage(#[from] InvalidImageError),
  #[error("模型加载失败: {0}")]
  ModelLoad(#[from] ModelLoadError),
  #[error("推理失败: {0}")]
  Inference(#[from] InferenceError),
}

impl AnalyzeError {
  /// 由调用方输入导致的错误，重试无意义
  pub fn is_client_fault(&self) -> bool {
    matches!(self, AnalyzeError::InvalidImage(_))
  }
}

/// 分析服务，持有模型注册表与严重程度策略
///
/// 可在多个请求线程间共享（`&Analyzer` 或 `Arc<Analyzer>`）。
pub struct Analyzer<S: ModelSource = ArtifactSource> {
  registry: ModelRegistry<S>,
  severity: SeverityTable,
}

impl Analyzer<ArtifactSource> {
  pub fn from_config(config: RegistryConfig) -> Self {
    Self::new(ModelRegistry::from_config(config), SeverityTable::default())
  }
}

impl<S: ModelSource> Analyzer<S> {
  pub fn new(registry: ModelRegistry<S>, severity: SeverityTable) -> Self {
    Self { registry, severity }
  }

  pub fn with_source(source: S) -> Self {
    Self::new(ModelRegistry::new(source), SeverityTable::default())
  }

  pub fn with_severity_table(mut self, severity: SeverityTable) -> Self {
    self.severity = severity;
    self
  }

  pub fn registry(&self) -> &ModelRegistry<S> {
    &self.registry
  }

  pub fn severity_table(&self) -> &SeverityTable {
    &self.severity
  }

  /// 提前初始化模型
  pub fn warm_up(&self) -> Result<ModelMode, AnalyzeError> {
    Ok(self.registry.get_model()?.mode())
  }

  pub fn analyze(&self, bytes: &[u8]) -> Result<AnalysisResult, AnalyzeError> {
    debug!("收到图像数据: {} 字节", bytes.len());
    let tensor = preprocess(bytes)?;

    let model = self.registry.get_model()?;
    let prediction = classify(&tensor, model.as_ref())?;
    let Classification { index, confidence } = top1(&prediction)?;

    let result = assemble_index(index, confidence, &self.severity);
    info!(
      "分析完成 - severity={}, parts={:?}, conf={:.2}, mode={}",
      result.severity,
      result.damage_parts,
      result.confidence,
      model.mode()
    );

    Ok(result)
  }
}
