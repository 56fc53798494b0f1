// 该文件是 Dingsun （定损） 项目的一部分。
// src/frame.rs - 归一化 NHWC 张量定义
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

use image::RgbImage;

pub const RGB_CHANNELS: usize = 3;

/// 模型输入边长
pub const INPUT_SIZE: u32 = 224;

/// ImageNet 预训练均值（RGB）
pub const IMAGENET_MEAN: [f32; 3] = [0.485, 0.456, 0.406];
/// ImageNet 预训练标准差（RGB）
pub const IMAGENET_STD: [f32; 3] = [0.229, 0.224, 0.225];

/// 分类模型的标准输入，形状 (1, 224, 224, 3)
pub type ImageTensor = NormalizedNhwcFrame<INPUT_SIZE, INPUT_SIZE>;

pub trait AsNhwcFrame<const W: u32, const H: u32> {
  fn as_nhwc(&self) -> &[f32];
}

/// 单帧、按通道归一化后的 NHWC 浮点张量
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedNhwcFrame<const W: u32, const H: u32> {
  data: Box<[f32]>,
}

impl<const W: u32, const H: u32> NormalizedNhwcFrame<W, H> {
  pub const LEN: usize = RGB_CHANNELS * W as usize * H as usize;

  /// 从原始数据构造，长度不符时返回 `None`
  pub fn from_raw(data: Vec<f32>) -> Option<Self> {
    if data.len() != Self::LEN {
      return None;
    }
    Some(Self {
      data: data.into_boxed_slice(),
    })
  }

  /// 对 RGB 图像逐像素归一化，图像尺寸必须已经是 W x H
  pub fn from_rgb_image(image: &RgbImage) -> Option<Self> {
    if image.dimensions() != (W, H) {
      return None;
    }

    let mut data = Vec::with_capacity(Self::LEN);
    for pixel in image.pixels() {
      for c in 0..RGB_CHANNELS {
        let value = pixel[c] as f32 / 255.0;
        data.push((value - IMAGENET_MEAN[c]) / IMAGENET_STD[c]);
      }
    }

    Self::from_raw(data)
  }

  pub fn height(&self) -> usize {
    H as usize
  }

  pub fn width(&self) -> usize {
    W as usize
  }

  pub fn channels(&self) -> usize {
    RGB_CHANNELS
  }

  /// 批形状 (N, H, W, C)
  pub fn shape(&self) -> (usize, usize, usize, usize) {
    (1, self.height(), self.width(), self.channels())
  }
}

impl<const W: u32, const H: u32> AsNhwcFrame<W, H> for NormalizedNhwcFrame<W, H> {
  fn as_nhwc(&self) -> &[f32] {
    &self.data
  }
}

/// 通道 `c` 归一化后可能取到的最小值和最大值
pub fn normalized_range(c: usize) -> (f32, f32) {
  (
    (0.0 - IMAGENET_MEAN[c]) / IMAGENET_STD[c],
    (1.0 - IMAGENET_MEAN[c]) / IMAGENET_STD[c],
  )
}
