// 该文件是 Shanan （山南西风） 项目的一部分。
// src/input/read_image_file.rs - 单张图像输入
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

use image::{ImageReader, RgbImage};
use tracing::error;
use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme,
  frame::Frame,
  input::{FrameSource, SourceError, url_path},
};

/// 只有一帧的输入，`image:///path/to/picture.jpg`
pub struct ImageFileInput {
  image: RgbImage,
  consumed: bool,
}

impl FromUrlWithScheme for ImageFileInput {
  const SCHEME: &'static str = "image";
}

impl FromUrl for ImageFileInput {
  type Error = SourceError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      error!(
        "URI 方案不匹配: 期望 '{}', 实际 '{}'",
        Self::SCHEME,
        url.scheme()
      );
      return Err(SourceError::SchemeMismatch(url.scheme().to_string()));
    }

    let path = url_path(url)?;
    let image = ImageReader::open(&path)
      .map_err(|e| SourceError::open(url.as_str(), e))?
      .decode()
      .map_err(|e| SourceError::open(url.as_str(), e))?;

    Ok(ImageFileInput {
      image: image.into_rgb8(),
      consumed: false,
    })
  }
}

impl From<RgbImage> for ImageFileInput {
  fn from(image: RgbImage) -> Self {
    Self {
      image,
      consumed: false,
    }
  }
}

impl FrameSource for ImageFileInput {
  fn read(&mut self) -> Result<Option<Frame>, SourceError> {
    if self.consumed {
      return Ok(None);
    }
    self.consumed = true;
    Ok(Some(Frame::from(self.image.clone())))
  }

  fn seek(&mut self, index: u64) -> Result<(), SourceError> {
    if index != 0 {
      return Err(SourceError::seek(index, "单张图像只有第 0 帧"));
    }
    self.consumed = false;
    Ok(())
  }

  fn current_index(&self) -> u64 {
    0
  }

  fn frame_rate(&self) -> f64 {
    0.0
  }

  fn frame_count(&self) -> Option<u64> {
    Some(1)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn yields_one_frame_then_end() {
    let mut input = ImageFileInput::from(RgbImage::new(3, 3));
    assert!(input.read().unwrap().is_some());
    assert!(input.read().unwrap().is_none());
    input.seek(0).unwrap();
    assert!(input.read().unwrap().is_some());
    assert!(input.seek(1).is_err());
  }

  #[test]
  fn opens_png_from_url() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("still.png");
    RgbImage::from_pixel(5, 4, image::Rgb([1, 2, 3]))
      .save(&path)
      .unwrap();
    let url = Url::from_file_path(&path).unwrap();
    let url = Url::parse(&format!("image://{}", url.path())).unwrap();

    let mut input = ImageFileInput::from_url(&url).unwrap();
    let frame = input.read().unwrap().unwrap();
    assert_eq!(frame.dims(), (5, 4));
    assert_eq!(frame.image().get_pixel(4, 3), &image::Rgb([1, 2, 3]));
  }
}
