// 该文件是 Dingsun （定损） 项目的一部分。
// src/model/registry.rs - 模型注册表
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

use std::{
  ffi::OsString,
  path::PathBuf,
  sync::{Arc, Mutex, OnceLock},
  time::Instant,
};

use thiserror::Error;
use tracing::{error, info, warn};

use super::{Backbone, DamageModel, Model, ModelHandle, ModelMode, parse_device};

/// 训练产物路径的环境变量
pub const MODEL_PATH_ENV: &str = "VEHICLE_DAMAGE_MODEL_PATH";
/// 骨干网络预训练权重路径的环境变量
pub const BACKBONE_WEIGHTS_ENV: &str = "VEHICLE_DAMAGE_BACKBONE_WEIGHTS";

pub const DEFAULT_MODEL_PATH: &str = "model/vehicle_damage_model.safetensors";
pub const DEFAULT_BACKBONE_WEIGHTS_PATH: &str = "model/backbone.safetensors";
pub const DEFAULT_DEVICE: &str = "cpu";

#[derive(Error, Debug, Clone)]
pub enum ModelLoadError {
  #[error("模型文件损坏: {path}: {message}")]
  Corrupt { path: PathBuf, message: String },
  #[error("模型结构不兼容: {path}: {message}")]
  Incompatible { path: PathBuf, message: String },
  #[error("无法访问模型路径: {path}: {message}")]
  Unreadable { path: PathBuf, message: String },
  #[error("骨干网络权重无效: {path}: {message}")]
  BackboneWeights { path: PathBuf, message: String },
  #[error("模型构建失败: {0}")]
  Build(String),
  #[error("设备错误: {0}")]
  Device(String),
}

/// 注册表配置
///
/// 优先级：显式设置 > 环境变量 > 默认值。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistryConfig {
  pub model_path: PathBuf,
  pub backbone: Backbone,
  /// 降级模式使用的 ImageNet 预训练骨干网络权重（safetensors）。
  ///
  /// 张量位于根命名空间，命名与 `candle_transformers::models::resnet` 一致，
  /// 例如 `conv1.weight`、`bn1.running_mean`、`layer1.0.conv1.weight`，
  /// 不含 `fc.*`。可由 torchvision `resnet50(weights="IMAGENET1K_V2")` 的
  /// `state_dict` 导出，结构须与 `backbone` 一致。文件不存在时骨干网络也随机初始化。
  pub backbone_weights: Option<PathBuf>,
  pub device: String,
}

impl Default for RegistryConfig {
  fn default() -> Self {
    Self {
      model_path: PathBuf::from(DEFAULT_MODEL_PATH),
      backbone: Backbone::default(),
      backbone_weights: Some(PathBuf::from(DEFAULT_BACKBONE_WEIGHTS_PATH)),
      device: DEFAULT_DEVICE.to_string(),
    }
  }
}

impl RegistryConfig {
  /// 默认配置叠加进程环境变量
  pub fn from_env() -> Self {
    Self::from_lookup(|key| std::env::var_os(key))
  }

  pub fn from_lookup<F>(lookup: F) -> Self
  where
    F: Fn(&str) -> Option<OsString>,
  {
    let mut config = Self::default();
    if let Some(path) = lookup(MODEL_PATH_ENV).filter(|v| !v.is_empty()) {
      config.model_path = PathBuf::from(path);
    }
    if let Some(path) = lookup(BACKBONE_WEIGHTS_ENV).filter(|v| !v.is_empty()) {
      config.backbone_weights = Some(PathBuf::from(path));
    }
    config
  }

  pub fn with_model_path(mut self, path: impl Into<PathBuf>) -> Self {
    self.model_path = path.into();
    self
  }

  pub fn with_backbone(mut self, backbone: Backbone) -> Self {
    self.backbone = backbone;
    self
  }

  pub fn with_backbone_weights(mut self, path: Option<PathBuf>) -> Self {
    self.backbone_weights = path;
    self
  }

  pub fn with_device(mut self, device: impl Into<String>) -> Self {
    self.device = device.into();
    self
  }
}

/// 模型的获取方式：加载或构建，只会被注册表调用一次
pub trait ModelSource {
  type Model: DamageModel;

  fn acquire(&self) -> Result<Self::Model, ModelLoadError>;
}

/// 从磁盘产物加载，产物不存在时构建未训练模型
#[derive(Debug, Clone)]
pub struct ArtifactSource {
  config: RegistryConfig,
}

impl ArtifactSource {
  pub fn new(config: RegistryConfig) -> Self {
    Self { config }
  }

  pub fn config(&self) -> &RegistryConfig {
    &self.config
  }
}

impl ModelSource for ArtifactSource {
  type Model = ModelHandle;

  fn acquire(&self) -> Result<Self::Model, ModelLoadError> {
    let config = &self.config;
    let device = parse_device(&config.device)?;

    let exists = config
      .model_path
      .try_exists()
      .map_err(|e| ModelLoadError::Unreadable {
        path: config.model_path.clone(),
        message: e.to_string(),
      })?;

    if exists {
      return ModelHandle::load(&config.model_path, config.backbone, &device);
    }

    warn!("未找到训练好的模型: {}", config.model_path.display());
    warn!("进入降级模式：构建随机分类头的新模型，预测结果不具参考意义");
    ModelHandle::fallback(config.backbone, config.backbone_weights.as_deref(), &device)
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegistryState {
  Unloaded,
  Loading,
  Ready(ModelMode),
  Failed,
}

/// 模型注册表
///
/// 首次调用 [`ModelRegistry::get_model`] 时获取模型，并发的首次调用只有一个线程执行加载，
/// 其余线程等待并复用结果。`Ready` 与 `Failed` 均为终态，失败不会重试。
pub struct ModelRegistry<S: ModelSource = ArtifactSource> {
  source: S,
  model: OnceLock<Result<Arc<S::Model>, ModelLoadError>>,
  state: Mutex<RegistryState>,
}

impl ModelRegistry<ArtifactSource> {
  pub fn from_config(config: RegistryConfig) -> Self {
    Self::new(ArtifactSource::new(config))
  }
}

impl<S: ModelSource> ModelRegistry<S> {
  pub fn new(source: S) -> Self {
    Self {
      source,
      model: OnceLock::new(),
      state: Mutex::new(RegistryState::Unloaded),
    }
  }

  pub fn get_model(&self) -> Result<Arc<S::Model>, ModelLoadError> {
    self.model.get_or_init(|| self.initialize()).clone()
  }

  pub fn state(&self) -> RegistryState {
    *self.state.lock().unwrap_or_else(|e| e.into_inner())
  }

  /// 是否运行在未训练模型上
  pub fn is_degraded(&self) -> bool {
    self.state() == RegistryState::Ready(ModelMode::Fallback)
  }

  pub fn source(&self) -> &S {
    &self.source
  }

  fn set_state(&self, state: RegistryState) {
    *self.state.lock().unwrap_or_else(|e| e.into_inner()) = state;
  }

  fn initialize(&self) -> Result<Arc<S::Model>, ModelLoadError> {
    self.set_state(RegistryState::Loading);
    let now = Instant::now();

    match self.source.acquire() {
      Ok(model) => {
        let mode = model.mode();
        match mode {
          ModelMode::Trained => info!("模型就绪，耗时: {:.2?}", now.elapsed()),
          ModelMode::Fallback => warn!("模型就绪（降级模式），耗时: {:.2?}", now.elapsed()),
        }
        self.set_state(RegistryState::Ready(mode));
        Ok(Arc::new(model))
      }
      Err(e) => {
        error!("模型初始化失败: {}", e);
        self.set_state(RegistryState::Failed);
        Err(e)
      }
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  use std::{
    collections::HashMap,
    sync::atomic::{AtomicUsize, Ordering},
    thread,
    time::Duration,
  };

  use crate::{
    engine::{InferenceError, PredictionVector},
    frame::ImageTensor,
    model::Model,
  };

  struct Uniform;

  impl Model for Uniform {
    type Input = ImageTensor;
    type Output = PredictionVector;
    type Error = InferenceError;

    fn infer(&self, _input: &ImageTensor) -> Result<PredictionVector, InferenceError> {
      Ok(PredictionVector::new(vec![0.25; 4]))
    }
  }

  struct CountingSource {
    calls: AtomicUsize,
    fail: bool,
  }

  impl ModelSource for CountingSource {
    type Model = Uniform;

    fn acquire(&self) -> Result<Uniform, ModelLoadError> {
      self.calls.fetch_add(1, Ordering::SeqCst);
      thread::sleep(Duration::from_millis(50));
      if self.fail {
        Err(ModelLoadError::Build("boom".to_string()))
      } else {
        Ok(Uniform)
      }
    }
  }

  #[test]
  fn concurrent_first_access_initializes_once() {
    let registry = ModelRegistry::new(CountingSource {
      calls: AtomicUsize::new(0),
      fail: false,
    });
    assert_eq!(registry.state(), RegistryState::Unloaded);

    let models: Vec<_> = thread::scope(|s| {
      let handles: Vec<_> = (0..8).map(|_| s.spawn(|| registry.get_model())).collect();
      handles.into_iter().map(|h| h.join().unwrap().unwrap()).collect()
    });

    assert_eq!(registry.source().calls.load(Ordering::SeqCst), 1);
    assert!(models.windows(2).all(|w| Arc::ptr_eq(&w[0], &w[1])));
    assert_eq!(registry.state(), RegistryState::Ready(ModelMode::Trained));
    assert!(!registry.is_degraded());
  }

  #[test]
  fn failure_is_terminal() {
    let registry = ModelRegistry::new(CountingSource {
      calls: AtomicUsize::new(0),
      fail: true,
    });

    assert!(registry.get_model().is_err());
    assert!(registry.get_model().is_err());
    assert_eq!(registry.source().calls.load(Ordering::SeqCst), 1);
    assert_eq!(registry.state(), RegistryState::Failed);
  }

  #[test]
  fn env_overrides_default_paths() {
    let env: HashMap<&str, OsString> = [
      (MODEL_PATH_ENV, OsString::from("/srv/model.safetensors")),
      (BACKBONE_WEIGHTS_ENV, OsString::from("")),
    ]
    .into_iter()
    .collect();

    let config = RegistryConfig::from_lookup(|key| env.get(key).cloned());
    assert_eq!(config.model_path, PathBuf::from("/srv/model.safetensors"));
    assert_eq!(
      config.backbone_weights,
      Some(PathBuf::from(DEFAULT_BACKBONE_WEIGHTS_PATH))
    );

    let explicit = config.with_model_path("/opt/explicit.safetensors");
    assert_eq!(explicit.model_path, PathBuf::from("/opt/explicit.safetensors"));

    let defaults = RegistryConfig::from_lookup(|_| None);
    assert_eq!(defaults, RegistryConfig::default());
    assert_eq!(defaults.model_path, PathBuf::from(DEFAULT_MODEL_PATH));
  }

  #[test]
  fn default_config_expects_backbone_weights_file() {
    let config = RegistryConfig::default();
    assert_eq!(config.backbone, Backbone::ResNet50);
    assert_eq!(
      config.backbone_weights.as_deref(),
      Some(std::path::Path::new(DEFAULT_BACKBONE_WEIGHTS_PATH))
    );
  }

  #[test]
  fn unknown_device_fails_before_loading() {
    let dir = tempfile::tempdir().unwrap();
    let registry = ModelRegistry::from_config(
      RegistryConfig::default()
        .with_model_path(dir.path().join("missing.safetensors"))
        .with_device("tpu"),
    );
    assert!(matches!(
      registry.get_model(),
      Err(ModelLoadError::Device(_))
    ));
    assert_eq!(registry.state(), RegistryState::Failed);
  }
}
