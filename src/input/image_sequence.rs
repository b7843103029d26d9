// 该文件是 Shanan （山南西风） 项目的一部分。
// src/input/image_sequence.rs - 图像序列输入
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

use std::path::{Path, PathBuf};

use image::ImageReader;
use tracing::{debug, error, info};
use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme,
  frame::Frame,
  input::{FrameSource, SourceError, is_image_file, query_fps, url_path},
};

/// 把目录中的图片按文件名排序后当作视频帧
///
/// `images:///path/to/frames?fps=25`
pub struct ImageSequenceInput {
  files: Vec<PathBuf>,
  next: usize,
  current: u64,
  fps: f64,
}

impl FromUrlWithScheme for ImageSequenceInput {
  const SCHEME: &'static str = "images";
}

impl FromUrl for ImageSequenceInput {
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

    let dir = url_path(url)?;
    let mut input = Self::open_dir(&dir).map_err(|e| SourceError::open(url.as_str(), e))?;
    input.fps = query_fps(url);
    Ok(input)
  }
}

impl ImageSequenceInput {
  pub fn open_dir(dir: &Path) -> std::io::Result<Self> {
    let mut files = Vec::new();
    for entry in std::fs::read_dir(dir)? {
      let path = entry?.path();
      if path.is_file() && is_image_file(&path) {
        files.push(path);
      }
    }
    files.sort();

    if files.is_empty() {
      return Err(std::io::Error::new(
        std::io::ErrorKind::NotFound,
        "目录中没有图片文件",
      ));
    }
    info!("图像序列共 {} 帧: {}", files.len(), dir.display());

    Ok(Self {
      files,
      next: 0,
      current: 0,
      fps: 0.0,
    })
  }
}

impl FrameSource for ImageSequenceInput {
  fn read(&mut self) -> Result<Option<Frame>, SourceError> {
    let Some(path) = self.files.get(self.next) else {
      return Ok(None);
    };

    debug!("读取图像: {}", path.display());
    let image = ImageReader::open(path)
      .map_err(|e| SourceError::Read(format!("{}: {}", path.display(), e)))?
      .decode()
      .map_err(|e| SourceError::Read(format!("{}: {}", path.display(), e)))?;

    self.current = self.next as u64;
    self.next += 1;
    Ok(Some(Frame::from(image.into_rgb8())))
  }

  fn seek(&mut self, index: u64) -> Result<(), SourceError> {
    if index >= self.files.len() as u64 {
      return Err(SourceError::seek(
        index,
        format!("超出序列长度 {}", self.files.len()),
      ));
    }
    self.next = index as usize;
    Ok(())
  }

  fn current_index(&self) -> u64 {
    self.current
  }

  fn frame_rate(&self) -> f64 {
    self.fps
  }

  fn frame_count(&self) -> Option<u64> {
    Some(self.files.len() as u64)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn write_frames(dir: &Path, count: u8) {
    for i in 0..count {
      let image = image::RgbImage::from_pixel(4, 2, image::Rgb([i, 0, 0]));
      image.save(dir.join(format!("{:03}.png", i))).unwrap();
    }
    std::fs::write(dir.join("readme.txt"), b"not a frame").unwrap();
  }

  fn open(dir: &Path, query: &str) -> ImageSequenceInput {
    let url = Url::from_directory_path(dir).unwrap();
    let url = Url::parse(&format!("images://{}{}", url.path(), query)).unwrap();
    ImageSequenceInput::from_url(&url).unwrap()
  }

  #[test]
  fn reads_frames_in_name_order_until_end() {
    let dir = tempfile::tempdir().unwrap();
    write_frames(dir.path(), 3);
    let mut input = open(dir.path(), "?fps=12.5");

    assert_eq!(input.frame_count(), Some(3));
    assert_eq!(input.frame_rate(), 12.5);
    for i in 0..3u8 {
      let frame = input.read().unwrap().unwrap();
      assert_eq!(input.current_index(), i as u64);
      assert_eq!(frame.image().get_pixel(0, 0)[0], i);
      assert_eq!(frame.dims(), (4, 2));
    }
    assert!(input.read().unwrap().is_none());
  }

  #[test]
  fn seek_repositions_next_read() {
    let dir = tempfile::tempdir().unwrap();
    write_frames(dir.path(), 5);
    let mut input = open(dir.path(), "");

    input.seek(3).unwrap();
    let frame = input.read().unwrap().unwrap();
    assert_eq!(input.current_index(), 3);
    assert_eq!(frame.image().get_pixel(0, 0)[0], 3);

    input.seek(0).unwrap();
    input.read().unwrap().unwrap();
    assert_eq!(input.current_index(), 0);
  }

  #[test]
  fn seek_past_end_is_error() {
    let dir = tempfile::tempdir().unwrap();
    write_frames(dir.path(), 2);
    let mut input = open(dir.path(), "");
    assert!(matches!(
      input.seek(2),
      Err(SourceError::Seek { index: 2, .. })
    ));
  }

  #[test]
  fn empty_directory_fails_to_open() {
    let dir = tempfile::tempdir().unwrap();
    let url = Url::parse(&format!("images://{}", dir.path().display())).unwrap();
    assert!(matches!(
      ImageSequenceInput::from_url(&url),
      Err(SourceError::Open { .. })
    ));
  }
}
