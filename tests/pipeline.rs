// 该文件是 Dingsun （定损） 项目的一部分。
// tests/pipeline.rs - 端到端分析流程测试
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

use std::{io::Cursor, path::Path, thread};

use candle_core::{DType, Device};
use candle_nn::{VarBuilder, VarMap};
use image::{DynamicImage, ImageFormat, Rgb, RgbImage};

use dingsun::{
  AnalyzeError, Analyzer,
  model::{
    Backbone, DamageClassifierNet, DamageLabel, ModelLoadError, ModelMode, RegistryConfig,
    RegistryState,
  },
};

fn photo(format: ImageFormat) -> Vec<u8> {
  let image = RgbImage::from_fn(320, 240, |x, y| {
    Rgb([(x % 256) as u8, (y % 256) as u8, ((x * y) % 256) as u8])
  });
  let mut buffer = Cursor::new(Vec::new());
  DynamicImage::ImageRgb8(image)
    .write_to(&mut buffer, format)
    .unwrap();
  buffer.into_inner()
}

fn config(model_path: &Path) -> RegistryConfig {
  RegistryConfig::default()
    .with_model_path(model_path)
    .with_backbone(Backbone::ResNet18)
    .with_backbone_weights(None)
    .with_device("cpu")
}

fn write_artifact(path: &Path, backbone: Backbone) {
  let vars = VarMap::new();
  let vb = VarBuilder::from_varmap(&vars, DType::F32, &Device::Cpu);
  DamageClassifierNet::build(backbone, DamageLabel::COUNT, vb).unwrap();
  vars.save(path).unwrap();
}

fn assert_well_formed(result: &dingsun::AnalysisResult) {
  assert!(result.severity <= 100);
  assert_eq!(result.damage_parts.len(), 1);
  let label: DamageLabel = result.damage_parts[0].parse().unwrap();
  assert!((0.0..=1.0).contains(&result.confidence));
  assert!(result.confidence >= 1.0 / DamageLabel::COUNT as f32 - 1e-6);
  assert!(result.is_vehicle);
  assert!(result.description.contains(label.name()));
}

#[test]
fn missing_artifact_runs_degraded() {
  let dir = tempfile::tempdir().unwrap();
  let analyzer = Analyzer::from_config(config(&dir.path().join("absent.safetensors")));
  assert_eq!(analyzer.registry().state(), RegistryState::Unloaded);

  let result = analyzer.analyze(&photo(ImageFormat::Png)).unwrap();
  assert_well_formed(&result);

  assert_eq!(
    analyzer.registry().state(),
    RegistryState::Ready(ModelMode::Fallback)
  );
  assert!(analyzer.registry().is_degraded());
}

#[test]
fn corrupt_artifact_fails_every_request() {
  let dir = tempfile::tempdir().unwrap();
  let path = dir.path().join("model.safetensors");
  std::fs::write(&path, b"\x00\x01 corrupted weights").unwrap();

  let analyzer = Analyzer::from_config(config(&path));
  let bytes = photo(ImageFormat::Png);

  for _ in 0..2 {
    let err = analyzer.analyze(&bytes).unwrap_err();
    assert!(matches!(
      err,
      AnalyzeError::ModelLoad(ModelLoadError::Corrupt { .. })
    ));
    assert!(!err.is_client_fault());
  }
  assert_eq!(analyzer.registry().state(), RegistryState::Failed);
}

#[test]
fn trained_artifact_is_loaded() {
  let dir = tempfile::tempdir().unwrap();
  let path = dir.path().join("model.safetensors");
  write_artifact(&path, Backbone::ResNet18);

  let analyzer = Analyzer::from_config(config(&path));
  assert_eq!(analyzer.warm_up().unwrap(), ModelMode::Trained);

  let result = analyzer.analyze(&photo(ImageFormat::Jpeg)).unwrap();
  assert_well_formed(&result);
  assert!(!analyzer.registry().is_degraded());
}

#[test]
fn incompatible_artifact_is_rejected() {
  let dir = tempfile::tempdir().unwrap();
  let path = dir.path().join("model.safetensors");
  write_artifact(&path, Backbone::ResNet18);

  let analyzer = Analyzer::from_config(config(&path).with_backbone(Backbone::ResNet50));
  assert!(matches!(
    analyzer.warm_up(),
    Err(AnalyzeError::ModelLoad(ModelLoadError::Incompatible { .. }))
  ));
  assert_eq!(analyzer.registry().state(), RegistryState::Failed);
}

#[test]
fn identical_input_gives_identical_result() {
  let dir = tempfile::tempdir().unwrap();
  let path = dir.path().join("model.safetensors");
  write_artifact(&path, Backbone::ResNet18);

  let analyzer = Analyzer::from_config(config(&path));
  let bytes = photo(ImageFormat::Png);
  let first = analyzer.analyze(&bytes).unwrap();
  let second = analyzer.analyze(&bytes).unwrap();
  assert_eq!(first, second);
}

#[test]
fn invalid_image_never_touches_model() {
  let dir = tempfile::tempdir().unwrap();
  let analyzer = Analyzer::from_config(config(&dir.path().join("absent.safetensors")));

  let err = analyzer.analyze(b"GIF89a but not really").unwrap_err();
  assert!(matches!(err, AnalyzeError::InvalidImage(_)));
  assert!(err.is_client_fault());
  assert_eq!(analyzer.registry().state(), RegistryState::Unloaded);
}

#[test]
fn concurrent_requests_share_one_model() {
  let dir = tempfile::tempdir().unwrap();
  let path = dir.path().join("model.safetensors");
  write_artifact(&path, Backbone::ResNet18);

  let analyzer = Analyzer::from_config(config(&path));
  let bytes = photo(ImageFormat::Png);

  let results: Vec<_> = thread::scope(|s| {
    let handles: Vec<_> = (0..4)
      .map(|_| s.spawn(|| analyzer.analyze(&bytes)))
      .collect();
    handles
      .into_iter()
      .map(|h| h.join().unwrap().unwrap())
      .collect()
  });

  assert!(results.windows(2).all(|w| w[0] == w[1]));
  assert_eq!(
    analyzer.registry().state(),
    RegistryState::Ready(ModelMode::Trained)
  );
}
