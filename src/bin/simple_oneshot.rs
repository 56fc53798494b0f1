// 该文件是 Dingsun （定损） 项目的一部分。
// src/bin/simple_oneshot.rs - 单张照片损伤评估
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

use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;
use url::Url;

use dingsun::{
  Analyzer, FromUrl,
  input::InputWrapper,
  model::{Backbone, RegistryConfig},
  model::registry::{BACKBONE_WEIGHTS_ENV, DEFAULT_DEVICE, DEFAULT_MODEL_PATH, MODEL_PATH_ENV},
  output::OutputWrapper,
  severity::SeverityTable,
  task::{OneShotTask, Task},
};
use tracing::info;

/// Dingsun 项目参数配置
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
  /// 训练好的模型文件（safetensors）
  #[arg(long, value_name = "MODEL", env = MODEL_PATH_ENV, default_value = DEFAULT_MODEL_PATH)]
  pub model_path: PathBuf,
  /// 骨干网络结构
  #[arg(long, value_name = "BACKBONE", default_value_t = Backbone::default())]
  pub backbone: Backbone,
  /// 降级模式下使用的骨干网络预训练权重
  #[arg(long, value_name = "WEIGHTS", env = BACKBONE_WEIGHTS_ENV)]
  pub backbone_weights: Option<PathBuf>,
  /// 推理设备，cpu / cuda / cuda:N / metal
  #[arg(long, value_name = "DEVICE", default_value = DEFAULT_DEVICE)]
  pub device: String,
  /// 严重程度策略 JSON 文件
  #[arg(long, value_name = "POLICY")]
  pub severity_table: Option<PathBuf>,
  /// 输入来源，image:///path/to/photo.jpg 或 stdin:
  #[arg(long, value_name = "SOURCE")]
  pub input: Url,
  /// 输出路径，stdout: 或 json:///path/to/report.json
  #[arg(long, value_name = "OUTPUT", default_value = "stdout:")]
  pub output: Url,
}

fn main() -> Result<()> {
  tracing_subscriber::fmt::init();

  let args = Args::parse();

  info!("模型文件路径: {}", args.model_path.display());
  info!("骨干网络: {}", args.backbone);
  info!("输入来源: {}", args.input);
  info!("输出路径: {}", args.output);

  let mut config = RegistryConfig::from_env()
    .with_model_path(args.model_path)
    .with_backbone(args.backbone)
    .with_device(args.device);
  if args.backbone_weights.is_some() {
    config = config.with_backbone_weights(args.backbone_weights);
  }

  let severity = match &args.severity_table {
    Some(path) => SeverityTable::load(path)?,
    None => SeverityTable::default(),
  };

  let input = InputWrapper::from_url(&args.input)?;
  let analyzer = Analyzer::from_config(config).with_severity_table(severity);
  let output = OutputWrapper::from_url(&args.output)?;

  OneShotTask.run_task(input, &analyzer, output)?;

  Ok(())
}
