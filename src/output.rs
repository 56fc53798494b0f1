// 该文件是 Dingsun （定损） 项目的一部分。
// src/output.rs - 分析结果与输出定义
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

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;

use crate::{FromUrl, FromUrlWithScheme, model::DamageLabel, severity::SeverityTable};

mod json_file;
pub use self::json_file::{JsonFileOutput, JsonFileOutputError};

/// 单张照片的分析结果
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisResult {
  /// 严重程度 0-100
  pub severity: u8,
  /// 预测的损伤类别，仅含一项
  pub damage_parts: Vec<String>,
  /// 预测类别的概率
  pub confidence: f32,
  /// 未做车辆检测，恒为 true
  pub is_vehicle: bool,
  pub description: String,
}

/// 由预测类别与置信度组装结果
pub fn assemble(label: DamageLabel, confidence: f32, table: &SeverityTable) -> AnalysisResult {
  compose(label.name().to_string(), table.severity_of(label), confidence)
}

/// 模型输出下标不在类别表内时使用，正常的输出层宽度下不会出现
pub fn assemble_index(index: usize, confidence: f32, table: &SeverityTable) -> AnalysisResult {
  match DamageLabel::from_index(index) {
    Some(label) => assemble(label, confidence, table),
    None => compose(
      format!("class_{}", index),
      table.severity_for_index(index, confidence),
      confidence,
    ),
  }
}

fn compose(label: String, severity: u8, confidence: f32) -> AnalysisResult {
  let description = format!(
    "Predicted damage level: {} (confidence {:.2}).",
    label, confidence
  );
  AnalysisResult {
    severity,
    damage_parts: vec![label],
    confidence,
    is_vehicle: true,
    description,
  }
}

/// 对外 JSON 报告，时间戳由调用方生成
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisReport {
  pub severity: u8,
  pub damage_parts: Vec<String>,
  pub confidence: f32,
  pub timestamp: DateTime<Utc>,
  pub is_vehicle: bool,
  pub description: String,
}

impl AnalysisReport {
  pub fn new(result: AnalysisResult, timestamp: DateTime<Utc>) -> Self {
    Self {
      severity: result.severity,
      damage_parts: result.damage_parts,
      confidence: result.confidence,
      timestamp,
      is_vehicle: result.is_vehicle,
      description: result.description,
    }
  }

  pub fn now(result: AnalysisResult) -> Self {
    Self::new(result, Utc::now())
  }
}

pub trait Render<Output>: Sized {
  type Error;
  fn render_result(&self, result: &Output) -> Result<(), Self::Error>;
}

/// 将报告打印到标准输出
pub struct StdoutOutput;

impl FromUrlWithScheme for StdoutOutput {
  const SCHEME: &'static str = "stdout";
}

impl FromUrl for StdoutOutput {
  type Error = OutputError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      return Err(OutputError::SchemeMismatch);
    }
    Ok(StdoutOutput)
  }
}

impl Render<AnalysisReport> for StdoutOutput {
  type Error = serde_json::Error;

  fn render_result(&self, report: &AnalysisReport) -> Result<(), Self::Error> {
    println!("{}", serde_json::to_string_pretty(report)?);
    Ok(())
  }
}

#[derive(Error, Debug)]
pub enum OutputError {
  #[error("JSON 文件输出错误: {0}")]
  JsonFileOutputError(#[from] JsonFileOutputError),
  #[error("标准输出错误: {0}")]
  StdoutError(#[from] serde_json::Error),
  #[error("URI 方案不匹配")]
  SchemeMismatch,
}

pub enum OutputWrapper {
  JsonFileOutput(JsonFileOutput),
  StdoutOutput(StdoutOutput),
}

impl FromUrl for OutputWrapper {
  type Error = OutputError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    match url.scheme() {
      JsonFileOutput::SCHEME => {
        let output = JsonFileOutput::from_url(url)?;
        Ok(OutputWrapper::JsonFileOutput(output))
      }
      StdoutOutput::SCHEME => {
        let output = StdoutOutput::from_url(url)?;
        Ok(OutputWrapper::StdoutOutput(output))
      }
      _ => Err(OutputError::SchemeMismatch),
    }
  }
}

impl Render<AnalysisReport> for OutputWrapper {
  type Error = OutputError;

  fn render_result(&self, report: &AnalysisReport) -> Result<(), Self::Error> {
    match self {
      OutputWrapper::JsonFileOutput(output) => output
        .render_result(report)
        .map_err(OutputError::from),
      OutputWrapper::StdoutOutput(output) => output
        .render_result(report)
        .map_err(OutputError::from),
    }
  }
}
