// 该文件是 Dingsun （定损） 项目的一部分。
// src/input.rs - 图像输入与预处理
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

use std::io::{Cursor, Read};

use image::{ImageReader, imageops::FilterType};
use thiserror::Error;
use tracing::debug;

use crate::{
  FromUrl, FromUrlWithScheme,
  frame::{INPUT_SIZE, ImageTensor},
};

mod read_image_file;
pub use self::read_image_file::{ImageFileInput, ImageFileInputError};

#[derive(Error, Debug)]
pub enum InvalidImageError {
  #[error("图像数据为空")]
  Empty,
  #[error("无法识别图像格式: {0}")]
  UnknownFormat(#[from] std::io::Error),
  #[error("图像解码失败: {0}")]
  Decode(#[from] image::ImageError),
  #[error("预处理后张量长度不匹配")]
  TensorLayout,
}

/// 将任意编码的图像字节转换为 (1, 224, 224, 3) 的归一化张量
pub fn preprocess(bytes: &[u8]) -> Result<ImageTensor, InvalidImageError> {
  if bytes.is_empty() {
    return Err(InvalidImageError::Empty);
  }

  let reader = ImageReader::new(Cursor::new(bytes)).with_guessed_format()?;
  debug!("图像格式: {:?}", reader.format());
  let image = reader.decode()?;
  debug!(
    "解码完成: {}x{} {:?}",
    image.width(),
    image.height(),
    image.color()
  );

  // 非三通道（灰度、带透明度、16 位等）统一转换为 RGB8
  let rgb = image.to_rgb8();
  let resized = image::imageops::resize(&rgb, INPUT_SIZE, INPUT_SIZE, FilterType::Triangle);

  ImageTensor::from_rgb_image(&resized).ok_or(InvalidImageError::TensorLayout)
}

#[derive(Error, Debug)]
pub enum InputError {
  #[error("图像文件输入错误: {0}")]
  ImageFileInputError(#[from] ImageFileInputError),
  #[error("标准输入读取错误: {0}")]
  StdinError(std::io::Error),
  #[error("URI 方案不匹配")]
  SchemeMismatch,
}

const STDIN_SCHEME: &str = "stdin";

/// 原始图像字节的来源
pub enum InputWrapper {
  ReadImageFile(ImageFileInput),
  Stdin(Option<Vec<u8>>),
}

impl FromUrl for InputWrapper {
  type Error = InputError;

  fn from_url(url: &url::Url) -> Result<Self, Self::Error> {
    if url.scheme() == ImageFileInput::SCHEME {
      let input = ImageFileInput::from_url(url)?;
      return Ok(InputWrapper::ReadImageFile(input));
    }
    if url.scheme() == STDIN_SCHEME {
      return Self::from_reader(std::io::stdin().lock());
    }
    Err(InputError::SchemeMismatch)
  }
}

impl InputWrapper {
  /// 一次性读完整个流，作为单张图像
  pub fn from_reader<R: Read>(mut reader: R) -> Result<Self, InputError> {
    let mut buffer = Vec::new();
    reader
      .read_to_end(&mut buffer)
      .map_err(InputError::StdinError)?;
    debug!("从标准输入读取 {} 字节", buffer.len());
    Ok(InputWrapper::Stdin(Some(buffer)))
  }
}

impl Iterator for InputWrapper {
  type Item = Vec<u8>;

  fn next(&mut self) -> Option<Self::Item> {
    match self {
      InputWrapper::ReadImageFile(input) => input.next(),
      InputWrapper::Stdin(buffer) => buffer.take(),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::frame::{AsNhwcFrame, normalized_range};
  use image::{DynamicImage, GrayImage, ImageFormat, Luma, Rgb, RgbImage, Rgba, RgbaImage};

  fn encode(image: DynamicImage, format: ImageFormat) -> Vec<u8> {
    let mut buffer = Cursor::new(Vec::new());
    image.write_to(&mut buffer, format).unwrap();
    buffer.into_inner()
  }

  #[test]
  fn empty_bytes_are_rejected() {
    assert!(matches!(preprocess(&[]), Err(InvalidImageError::Empty)));
  }

  #[test]
  fn garbage_bytes_are_rejected() {
    let err = preprocess(b"definitely not an image").unwrap_err();
    assert!(matches!(err, InvalidImageError::Decode(_)));
  }

  #[test]
  fn truncated_png_is_rejected() {
    let bytes = encode(
      DynamicImage::ImageRgb8(RgbImage::new(32, 32)),
      ImageFormat::Png,
    );
    assert!(preprocess(&bytes[..bytes.len() / 2]).is_err());
  }

  #[test]
  fn any_size_is_resized_to_input_shape() {
    for (w, h) in [(1, 1), (640, 480), (100, 300)] {
      let image = RgbImage::from_fn(w, h, |x, y| Rgb([(x % 256) as u8, (y % 256) as u8, 128]));
      let tensor = preprocess(&encode(DynamicImage::ImageRgb8(image), ImageFormat::Png)).unwrap();
      assert_eq!(tensor.shape(), (1, 224, 224, 3));
      assert_eq!(tensor.as_nhwc().len(), 224 * 224 * 3);
    }
  }

  #[test]
  fn values_stay_in_normalized_range() {
    let image = RgbImage::from_fn(97, 53, |x, y| {
      Rgb([(x * 7 % 256) as u8, (y * 13 % 256) as u8, ((x + y) % 256) as u8])
    });
    let tensor = preprocess(&encode(DynamicImage::ImageRgb8(image), ImageFormat::Jpeg)).unwrap();

    for (i, value) in tensor.as_nhwc().iter().enumerate() {
      let (min, max) = normalized_range(i % 3);
      assert!(
        *value >= min - 1e-5 && *value <= max + 1e-5,
        "value {value} at {i}"
      );
    }
  }

  #[test]
  fn grayscale_and_alpha_become_rgb() {
    let gray = GrayImage::from_pixel(50, 50, Luma([255]));
    let tensor = preprocess(&encode(DynamicImage::ImageLuma8(gray), ImageFormat::Png)).unwrap();
    let data = tensor.as_nhwc();
    for c in 0..3 {
      assert!((data[c] - normalized_range(c).1).abs() < 0.02);
    }

    let rgba = RgbaImage::from_pixel(50, 50, Rgba([0, 0, 0, 0]));
    let tensor = preprocess(&encode(DynamicImage::ImageRgba8(rgba), ImageFormat::Png)).unwrap();
    let data = tensor.as_nhwc();
    for c in 0..3 {
      assert!((data[c] - normalized_range(c).0).abs() < 0.02);
    }
  }

  #[test]
  fn stream_input_yields_one_image() {
    let bytes = encode(
      DynamicImage::ImageRgb8(RgbImage::new(8, 8)),
      ImageFormat::Png,
    );
    let mut input = InputWrapper::from_reader(Cursor::new(bytes.clone())).unwrap();
    assert_eq!(input.next(), Some(bytes));
    assert_eq!(input.next(), None);
  }

  #[test]
  fn input_rejects_unknown_scheme() {
    let url = url::Url::parse("rtsp://camera/stream").unwrap();
    assert!(matches!(
      InputWrapper::from_url(&url),
      Err(InputError::SchemeMismatch)
    ));
  }

  #[test]
  fn preprocessing_is_deterministic() {
    let image = RgbImage::from_fn(300, 200, |x, y| Rgb([(x % 256) as u8, (y % 256) as u8, 7]));
    let bytes = encode(DynamicImage::ImageRgb8(image), ImageFormat::Png);
    assert_eq!(preprocess(&bytes).unwrap(), preprocess(&bytes).unwrap());
  }
}
