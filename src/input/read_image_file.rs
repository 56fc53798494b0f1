// 该文件是 Dingsun （定损） 项目的一部分。
// src/input/read_image_file.rs - 图像文件输入
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
use tracing::{debug, error};
use url::Url;

use crate::{FromUrl, FromUrlWithScheme};

#[derive(Error, Debug)]
pub enum ImageFileInputError {
  #[error("URI schema mismatch")]
  SchemaMismatch,
  #[error("I/O error: {0}")]
  IoError(#[from] std::io::Error),
}

/// 读取图像文件的原始字节，解码交给预处理阶段
pub struct ImageFileInput {
  bytes: Option<Vec<u8>>,
}

impl FromUrlWithScheme for ImageFileInput {
  const SCHEME: &'static str = "image";
}

impl FromUrl for ImageFileInput {
  type Error = ImageFileInputError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      error!(
        "URI scheme mismatch: expected '{}', found '{}'",
        Self::SCHEME,
        url.scheme()
      );
      return Err(ImageFileInputError::SchemaMismatch);
    }

    let path = url.path();
    let bytes = std::fs::read(path)?;
    debug!("读取图像文件 {}: {} 字节", path, bytes.len());

    Ok(ImageFileInput { bytes: Some(bytes) })
  }
}

impl Iterator for ImageFileInput {
  type Item = Vec<u8>;

  fn next(&mut self) -> Option<Self::Item> {
    self.bytes.take()
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn reads_file_once() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("photo.bin");
    std::fs::write(&path, [1u8, 2, 3]).unwrap();

    let url = Url::from_file_path(&path).unwrap();
    let url = Url::parse(&format!("image://{}", url.path())).unwrap();
    let mut input = ImageFileInput::from_url(&url).unwrap();

    assert_eq!(input.next(), Some(vec![1, 2, 3]));
    assert_eq!(input.next(), None);
  }

  #[test]
  fn rejects_other_schemes() {
    let url = Url::parse("file:///tmp/photo.jpg").unwrap();
    assert!(matches!(
      ImageFileInput::from_url(&url),
      Err(ImageFileInputError::SchemaMismatch)
    ));
  }
}
