// 该文件是 Shanan （山南西风） 项目的一部分。
// src/input.rs - 可定位的视频/图像输入
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

use thiserror::Error;
use tracing::{error, info};
use url::Url;

use crate::{FromUrl, FromUrlWithScheme, frame::Frame};

pub const IMAGE_EXTENSIONS: [&str; 6] = ["jpg", "jpeg", "png", "bmp", "gif", "webp"];
pub const VIDEO_EXTENSIONS: [&str; 4] = ["mp4", "avi", "mkv", "mov"];

#[derive(Error, Debug)]
pub enum SourceError {
  #[error("无法打开输入源 {identifier}: {reason}")]
  Open { identifier: String, reason: String },
  #[error("读取帧失败: {0}")]
  Read(String),
  #[error("无法定位到第 {index} 帧: {reason}")]
  Seek { index: u64, reason: String },
  #[error("URI 方案不匹配: {0}")]
  SchemeMismatch(String),
}

impl SourceError {
  pub fn open(identifier: impl Into<String>, reason: impl std::fmt::Display) -> Self {
    SourceError::Open {
      identifier: identifier.into(),
      reason: reason.to_string(),
    }
  }

  pub fn seek(index: u64, reason: impl std::fmt::Display) -> Self {
    SourceError::Seek {
      index,
      reason: reason.to_string(),
    }
  }
}

/// 可定位的帧来源
pub trait FrameSource: Send {
  /// 读取下一帧，`Ok(None)` 表示流已结束
  fn read(&mut self) -> Result<Option<Frame>, SourceError>;

  /// 定位后，下一次 `read` 返回第 `index` 帧
  fn seek(&mut self, index: u64) -> Result<(), SourceError>;

  /// 最近一次 `read` 返回的帧序号
  fn current_index(&self) -> u64;

  /// 声明的帧率，未知时为 0
  fn frame_rate(&self) -> f64;

  fn frame_count(&self) -> Option<u64> {
    None
  }

  /// 释放底层资源，可重复调用
  fn close(&mut self) {}
}

impl<S: FrameSource + ?Sized> FrameSource for Box<S> {
  fn read(&mut self) -> Result<Option<Frame>, SourceError> {
    (**self).read()
  }

  fn seek(&mut self, index: u64) -> Result<(), SourceError> {
    (**self).seek(index)
  }

  fn current_index(&self) -> u64 {
    (**self).current_index()
  }

  fn frame_rate(&self) -> f64 {
    (**self).frame_rate()
  }

  fn frame_count(&self) -> Option<u64> {
    (**self).frame_count()
  }

  fn close(&mut self) {
    (**self).close()
  }
}

/// 打开帧来源
pub trait OpenSource {
  fn identifier(&self) -> String;
  fn open(&self) -> Result<Box<dyn FrameSource>, SourceError>;
}

impl OpenSource for Url {
  fn identifier(&self) -> String {
    self.to_string()
  }

  fn open(&self) -> Result<Box<dyn FrameSource>, SourceError> {
    let input = InputWrapper::from_url(self)?;
    info!("输入源已打开: {}", self);
    Ok(Box::new(input))
  }
}

mod image_sequence;
mod read_image_file;
pub use self::image_sequence::ImageSequenceInput;
pub use self::read_image_file::ImageFileInput;

#[cfg(feature = "gstreamer_input")]
mod gstreamer_input;
#[cfg(feature = "gstreamer_input")]
pub use self::gstreamer_input::{
  GStreamerInput, GStreamerInputError, GStreamerInputPipelineBuilder,
};

pub enum InputWrapper {
  ImageSequence(ImageSequenceInput),
  ReadImageFile(ImageFileInput),
  #[cfg(feature = "gstreamer_input")]
  GStreamerInput(GStreamerInput),
}

impl FromUrl for InputWrapper {
  type Error = SourceError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    match url.scheme() {
      ImageSequenceInput::SCHEME => Ok(InputWrapper::ImageSequence(
        ImageSequenceInput::from_url(url)?,
      )),
      ImageFileInput::SCHEME => Ok(InputWrapper::ReadImageFile(ImageFileInput::from_url(url)?)),
      #[cfg(feature = "gstreamer_input")]
      GStreamerInput::SCHEME => {
        let input =
          GStreamerInput::from_url(url).map_err(|e| SourceError::open(url.as_str(), e))?;
        Ok(InputWrapper::GStreamerInput(input))
      }
      other => {
        error!("不支持的输入方案: {}", other);
        Err(SourceError::SchemeMismatch(other.to_string()))
      }
    }
  }
}

impl InputWrapper {
  fn inner(&self) -> &dyn FrameSource {
    match self {
      InputWrapper::ImageSequence(input) => input,
      InputWrapper::ReadImageFile(input) => input,
      #[cfg(feature = "gstreamer_input")]
      InputWrapper::GStreamerInput(input) => input,
    }
  }

  fn inner_mut(&mut self) -> &mut dyn FrameSource {
    match self {
      InputWrapper::ImageSequence(input) => input,
      InputWrapper::ReadImageFile(input) => input,
      #[cfg(feature = "gstreamer_input")]
      InputWrapper::GStreamerInput(input) => input,
    }
  }
}

impl FrameSource for InputWrapper {
  fn read(&mut self) -> Result<Option<Frame>, SourceError> {
    self.inner_mut().read()
  }

  fn seek(&mut self, index: u64) -> Result<(), SourceError> {
    self.inner_mut().seek(index)
  }

  fn current_index(&self) -> u64 {
    self.inner().current_index()
  }

  fn frame_rate(&self) -> f64 {
    self.inner().frame_rate()
  }

  fn frame_count(&self) -> Option<u64> {
    self.inner().frame_count()
  }

  fn close(&mut self) {
    self.inner_mut().close()
  }
}

/// URL 路径解码为文件系统路径
pub(crate) fn url_path(url: &Url) -> Result<PathBuf, SourceError> {
  let decoded =
    urlencoding::decode(url.path()).map_err(|e| SourceError::open(url.as_str(), e))?;
  if decoded.is_empty() {
    return Err(SourceError::open(url.as_str(), "路径为空"));
  }
  Ok(PathBuf::from(decoded.into_owned()))
}

/// 从 URL 查询参数中读取帧率
pub(crate) fn query_fps(url: &Url) -> f64 {
  url
    .query_pairs()
    .find(|(k, _)| k == "fps")
    .and_then(|(_, v)| v.parse::<f64>().ok())
    .filter(|fps| fps.is_finite() && *fps > 0.0)
    .unwrap_or(0.0)
}

fn has_extension(path: &Path, extensions: &[&str]) -> bool {
  path
    .extension()
    .and_then(|ext| ext.to_str())
    .map(|ext| extensions.iter().any(|e| ext.eq_ignore_ascii_case(e)))
    .unwrap_or(false)
}

pub(crate) fn is_image_file(path: &Path) -> bool {
  has_extension(path, &IMAGE_EXTENSIONS)
}

/// 列出目录中的视频与图片文件，按文件名排序
pub fn discover_media(dir: &Path) -> std::io::Result<Vec<PathBuf>> {
  let mut files = Vec::new();
  for entry in std::fs::read_dir(dir)? {
    let path = entry?.path();
    if path.is_file() && (has_extension(&path, &VIDEO_EXTENSIONS) || is_image_file(&path)) {
      files.push(path);
    }
  }
  files.sort();
  Ok(files)
}

/// 媒体文件对应的输入 URL：图片用 `image://`，视频用 `gst://file`
pub fn media_url(path: &Path) -> Result<Url, SourceError> {
  let absolute =
    std::path::absolute(path).map_err(|e| SourceError::open(path.display().to_string(), e))?;
  let prefix = if is_image_file(&absolute) {
    "image://"
  } else {
    "gst://file"
  };
  let encoded = absolute
    .to_string_lossy()
    .split('/')
    .map(|segment| urlencoding::encode(segment).into_owned())
    .collect::<Vec<_>>()
    .join("/");
  Url::parse(&format!("{}{}", prefix, encoded))
    .map_err(|e| SourceError::open(absolute.display().to_string(), e))
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn url_path_is_percent_decoded() {
    let url = Url::parse("images:///tmp/my%20frames").unwrap();
    assert_eq!(url_path(&url).unwrap(), PathBuf::from("/tmp/my frames"));
  }

  #[test]
  fn fps_query_defaults_to_unknown() {
    assert_eq!(query_fps(&Url::parse("images:///a?fps=25").unwrap()), 25.0);
    assert_eq!(query_fps(&Url::parse("images:///a?fps=-1").unwrap()), 0.0);
    assert_eq!(query_fps(&Url::parse("images:///a").unwrap()), 0.0);
  }

  #[test]
  fn unknown_scheme_is_rejected() {
    let url = Url::parse("rtmp://example.com/live").unwrap();
    assert!(matches!(
      InputWrapper::from_url(&url),
      Err(SourceError::SchemeMismatch(_))
    ));
  }

  #[test]
  fn discover_media_filters_and_sorts() {
    let dir = tempfile::tempdir().unwrap();
    for name in ["b.mp4", "a.MKV", "notes.txt", "c.png"] {
      std::fs::write(dir.path().join(name), b"").unwrap();
    }
    let found: Vec<_> = discover_media(dir.path())
      .unwrap()
      .into_iter()
      .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
      .collect();
    assert_eq!(found, vec!["a.MKV", "b.mp4", "c.png"]);
  }

  #[test]
  fn media_url_picks_scheme_and_round_trips_path() {
    let image = media_url(Path::new("/data/my frames/a.PNG")).unwrap();
    assert_eq!(image.scheme(), "image");
    assert_eq!(url_path(&image).unwrap(), PathBuf::from("/data/my frames/a.PNG"));

    let video = media_url(Path::new("/data/street.mp4")).unwrap();
    assert_eq!(video.as_str(), "gst://file/data/street.mp4");
  }
}
