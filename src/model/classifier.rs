// 该文件是 Dingsun （定损） 项目的一部分。
// src/model/classifier.rs - ResNet 损伤分类网络
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

use std::{fmt, path::Path, str::FromStr};

use candle_core::{D, DType, Device, Module, Tensor};
use candle_nn::{Func, Linear, VarBuilder, VarMap};
use candle_transformers::models::resnet;
use tracing::{debug, info, warn};

use crate::{
  engine::{InferenceError, PredictionVector},
  frame::{AsNhwcFrame, ImageTensor},
  model::{DamageLabel, Model, ModelLoadError, ModelMode},
};

/// 分类头隐藏层宽度
pub const HEAD_HIDDEN_UNITS: usize = 256;

/// 特征提取骨干网络
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Backbone {
  ResNet18,
  ResNet34,
  #[default]
  ResNet50,
}

impl Backbone {
  /// 全局平均池化后的特征维度
  pub fn feature_dim(self) -> usize {
    match self {
      Backbone::ResNet18 | Backbone::ResNet34 => 512,
      Backbone::ResNet50 => 2048,
    }
  }

  fn build(self, vb: VarBuilder<'static>) -> candle_core::Result<Func<'static>> {
    match self {
      Backbone::ResNet18 => resnet::resnet18_no_final_layer(vb),
      Backbone::ResNet34 => resnet::resnet34_no_final_layer(vb),
      Backbone::ResNet50 => resnet::resnet50_no_final_layer(vb),
    }
  }
}

impl fmt::Display for Backbone {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Backbone::ResNet18 => write!(f, "resnet18"),
      Backbone::ResNet34 => write!(f, "resnet34"),
      Backbone::ResNet50 => write!(f, "resnet50"),
    }
  }
}

impl FromStr for Backbone {
  type Err = String;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s.to_lowercase().as_str() {
      "resnet18" => Ok(Backbone::ResNet18),
      "resnet34" => Ok(Backbone::ResNet34),
      "resnet50" => Ok(Backbone::ResNet50),
      _ => Err(format!(
        "未知的骨干网络: '{}'，可选 resnet18 / resnet34 / resnet50",
        s
      )),
    }
  }
}

/// 解析设备字符串：`cpu`、`cuda`/`gpu`、`cuda:N`、`metal`
pub fn parse_device(device: &str) -> Result<Device, ModelLoadError> {
  let device = device.to_lowercase();
  match device.as_str() {
    "cpu" => Ok(Device::Cpu),
    "cuda" | "gpu" => Device::new_cuda(0)
      .map_err(|e| ModelLoadError::Device(format!("无法创建 CUDA 设备: {}", e))),
    s if s.starts_with("cuda:") => {
      let ordinal: usize = s["cuda:".len()..]
        .parse()
        .map_err(|_| ModelLoadError::Device(format!("无效的 CUDA 设备编号: '{}'", s)))?;
      Device::new_cuda(ordinal)
        .map_err(|e| ModelLoadError::Device(format!("无法创建 CUDA 设备 {}: {}", ordinal, e)))
    }
    "metal" => {
      #[cfg(feature = "metal")]
      {
        Device::new_metal(0)
          .map_err(|e| ModelLoadError::Device(format!("无法创建 Metal 设备: {}", e)))
      }
      #[cfg(not(feature = "metal"))]
      {
        Err(ModelLoadError::Device(
          "未启用 Metal 支持，请使用 --features metal 编译".to_string(),
        ))
      }
    }
    _ => Err(ModelLoadError::Device(format!(
      "未知设备: '{}'，可选 cpu、cuda、cuda:N 或 metal",
      device
    ))),
  }
}

/// 骨干网络 + 分类头
///
/// 张量命名：骨干网络位于 `backbone.*`，分类头位于 `head.hidden.*` 与 `head.output.*`。
/// 训练端按 [`DamageClassifierNet::build`] 在 `VarMap` 上建网并保存，即得到注册表可加载的产物。
pub struct DamageClassifierNet {
  features: Func<'static>,
  hidden: Linear,
  output: Linear,
}

impl DamageClassifierNet {
  pub fn build(
    backbone: Backbone,
    num_labels: usize,
    vb: VarBuilder<'static>,
  ) -> candle_core::Result<Self> {
    Self::from_parts(backbone, num_labels, vb.pp("backbone"), vb.pp("head"))
  }

  pub fn from_parts(
    backbone: Backbone,
    num_labels: usize,
    backbone_vb: VarBuilder<'static>,
    head_vb: VarBuilder<'static>,
  ) -> candle_core::Result<Self> {
    let features = backbone.build(backbone_vb)?;
    let hidden = candle_nn::linear(backbone.feature_dim(), HEAD_HIDDEN_UNITS, head_vb.pp("hidden"))?;
    let output = candle_nn::linear(HEAD_HIDDEN_UNITS, num_labels, head_vb.pp("output"))?;
    Ok(Self {
      features,
      hidden,
      output,
    })
  }
}

impl Module for DamageClassifierNet {
  fn forward(&self, xs: &Tensor) -> candle_core::Result<Tensor> {
    let xs = xs.apply(&self.features)?.apply(&self.hidden)?.relu()?;
    let logits = xs.apply(&self.output)?;
    candle_nn::ops::softmax(&logits, D::Minus1)
  }
}

/// 进程内唯一的推理模型，创建后权重不再变化
pub struct ModelHandle {
  net: DamageClassifierNet,
  backbone: Backbone,
  mode: ModelMode,
  device: Device,
}

impl fmt::Debug for ModelHandle {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("ModelHandle")
      .field("backbone", &self.backbone)
      .field("mode", &self.mode)
      .field("device", &self.device)
      .finish_non_exhaustive()
  }
}

impl ModelHandle {
  /// 从训练产物加载完整模型
  pub fn load(path: &Path, backbone: Backbone, device: &Device) -> Result<Self, ModelLoadError> {
    info!("加载模型文件: {}", path.display());
    let tensors =
      candle_core::safetensors::load(path, device).map_err(|e| ModelLoadError::Corrupt {
        path: path.to_path_buf(),
        message: e.to_string(),
      })?;
    debug!("模型张量数量: {}", tensors.len());

    let vb = VarBuilder::from_tensors(tensors, DType::F32, device);
    let net = DamageClassifierNet::build(backbone, DamageLabel::COUNT, vb).map_err(|e| {
      ModelLoadError::Incompatible {
        path: path.to_path_buf(),
        message: e.to_string(),
      }
    })?;
    info!("模型加载完成: {}", backbone);

    Ok(Self {
      net,
      backbone,
      mode: ModelMode::Trained,
      device: device.clone(),
    })
  }

  /// 构建未训练模型：预训练骨干网络 + 随机初始化的分类头
  pub fn fallback(
    backbone: Backbone,
    backbone_weights: Option<&Path>,
    device: &Device,
  ) -> Result<Self, ModelLoadError> {
    let pretrained = match backbone_weights {
      Some(path) if path.exists() => {
        info!("加载骨干网络预训练权重: {}", path.display());
        let tensors = candle_core::safetensors::load(path, device).map_err(|e| {
          ModelLoadError::BackboneWeights {
            path: path.to_path_buf(),
            message: e.to_string(),
          }
        })?;
        Some((path, tensors))
      }
      Some(path) => {
        warn!(
          "骨干网络预训练权重不存在: {}，骨干网络同样使用随机权重",
          path.display()
        );
        None
      }
      None => {
        warn!("未配置骨干网络预训练权重，骨干网络同样使用随机权重");
        None
      }
    };

    let random_vars = VarMap::new();
    let random_vb = VarBuilder::from_varmap(&random_vars, DType::F32, device);

    let net = match pretrained {
      Some((path, tensors)) => {
        let backbone_vb = VarBuilder::from_tensors(tensors, DType::F32, device);
        DamageClassifierNet::from_parts(
          backbone,
          DamageLabel::COUNT,
          backbone_vb,
          random_vb.pp("head"),
        )
        .map_err(|e| ModelLoadError::BackboneWeights {
          path: path.to_path_buf(),
          message: e.to_string(),
        })?
      }
      None => DamageClassifierNet::build(backbone, DamageLabel::COUNT, random_vb)
        .map_err(|e| ModelLoadError::Build(e.to_string()))?,
    };
    warn!("已构建未训练模型 ({})，分类头为随机权重", backbone);

    Ok(Self {
      net,
      backbone,
      mode: ModelMode::Fallback,
      device: device.clone(),
    })
  }

  pub fn backbone(&self) -> Backbone {
    self.backbone
  }

  pub fn device(&self) -> &Device {
    &self.device
  }
}

impl Model for ModelHandle {
  type Input = ImageTensor;
  type Output = PredictionVector;
  type Error = InferenceError;

  fn infer(&self, input: &Self::Input) -> Result<Self::Output, Self::Error> {
    // NHWC -> NCHW
    let xs = Tensor::from_slice(input.as_nhwc(), input.shape(), &self.device)?
      .permute((0, 3, 1, 2))?
      .contiguous()?;
    let probabilities = self
      .net
      .forward(&xs)?
      .squeeze(0)?
      .to_dtype(DType::F32)?
      .to_vec1::<f32>()?;

    Ok(PredictionVector::new(probabilities))
  }

  fn mode(&self) -> ModelMode {
    self.mode
  }
}
