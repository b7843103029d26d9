// 该文件是 Shanan （山南西风） 项目的一部分。
// src/input/gstreamer_input.rs - GStreamer 输入
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

//! # GStreamer 视频输入
//!
//! 支持两种来源：
//! - `gst://file/path/to/video.mp4`：视频文件，可按帧定位
//! - `gst://camera/dev/video0?width=640&height=480&fps=30`：摄像头，不可定位
//!
//! 两者都可以附加 `rotate=90|180|270` 旋转画面。
//!
//! ## 系统依赖
//!
//! ```bash
//! sudo apt-get install libgstreamer1.0-dev libgstreamer-plugins-base1.0-dev
//! ```

use std::collections::HashMap;

use gstreamer::{self as gst, prelude::*};
use gstreamer_app as gst_app;
use gstreamer_video as gst_video;
use thiserror::Error;
use tracing::{debug, error, info, warn};
use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme,
  frame::{ChannelOrder, Frame, RGB_CHANNELS},
  input::{FrameSource, SourceError},
};

#[derive(Error, Debug)]
pub enum GStreamerInputError {
  #[error("URI 方案不匹配")]
  SchemeMismatch,
  #[error("GStreamer 错误: {0}")]
  GStreamerError(#[from] gst::glib::Error),
  #[error("GStreamer 操作失败: {0}")]
  GStreamerBoolError(#[from] gst::glib::BoolError),
  #[error("未找到 appsink 元素")]
  AppSinkNotFound,
  #[error("无法从 caps 获取视频信息")]
  VideoInfoError,
  #[error("不支持的视频格式: {0:?}")]
  UnsupportedFormat(gst_video::VideoFormat),
  #[error("管道错误: {0}")]
  PipelineError(String),
  #[error("缓冲区大小不匹配: 期望 {expected} 字节, 实际 {actual} 字节")]
  BufferSizeMismatch { expected: usize, actual: usize },
  #[error("状态切换失败: {0}")]
  StateChangeError(#[from] gst::StateChangeError),
}

const DEFAULT_CAMERA_WIDTH: u32 = 640;
const DEFAULT_CAMERA_HEIGHT: u32 = 480;
const DEFAULT_CAMERA_FPS: u32 = 15;
const PREROLL_TIMEOUT_SECONDS: u64 = 10;

pub enum GStreamerInputBuilderItem {
  FileSource(String),
  CameraSource {
    camera: String,
    io_mode: Option<u32>,
    format: String,
    width: u32,
    height: u32,
    fps: u32,
  },
  TargetFormat {
    format: String,
  },
  VideoFlip {
    method: u32,
  },
}

impl GStreamerInputBuilderItem {
  fn to_pipeline(&self) -> String {
    match self {
      GStreamerInputBuilderItem::FileSource(path) => {
        format!("filesrc location=\"{}\" ! decodebin", path)
      }
      GStreamerInputBuilderItem::CameraSource {
        camera,
        io_mode,
        format,
        width,
        height,
        fps,
      } => {
        let io_mode_str = io_mode
          .map(|mode| format!(" io-mode={}", mode))
          .unwrap_or_default();
        format!(
          "v4l2src device={}{} ! video/x-raw,format={},width={},height={},framerate={}/1",
          camera, io_mode_str, format, width, height, fps
        )
      }
      GStreamerInputBuilderItem::TargetFormat { format } => {
        format!("videoconvert ! video/x-raw,format={}", format)
      }
      GStreamerInputBuilderItem::VideoFlip { method } => {
        format!("videoflip method={}", method)
      }
    }
  }
}

/// GStreamer 输入管道构建器
///
/// ```no_run
/// use shanan_player::{FromUrl, input::GStreamerInputPipelineBuilder};
/// use url::Url;
///
/// # fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let url = Url::parse("gst://file/data/videos/street.mp4")?;
/// let input = GStreamerInputPipelineBuilder::from_url(&url)?.build()?;
/// # Ok(())
/// # }
/// ```
pub struct GStreamerInputPipelineBuilder {
  items: Vec<GStreamerInputBuilderItem>,
  seekable: bool,
}

impl GStreamerInputPipelineBuilder {
  fn build_camera_pipeline(path: &str, query: &HashMap<String, String>) -> Self {
    let parse = |key: &str, default: u32| {
      query
        .get(key)
        .and_then(|v| v.parse::<u32>().ok())
        .unwrap_or(default)
    };

    let mut items = vec![GStreamerInputBuilderItem::CameraSource {
      camera: path.to_string(),
      io_mode: query.get("io-mode").and_then(|v| v.parse::<u32>().ok()),
      format: query
        .get("format")
        .cloned()
        .unwrap_or_else(|| String::from("YUY2")),
      width: parse("width", DEFAULT_CAMERA_WIDTH),
      height: parse("height", DEFAULT_CAMERA_HEIGHT),
      fps: parse("fps", DEFAULT_CAMERA_FPS),
    }];
    items.extend(Self::video_flip(query.get("rotate").map(String::as_str)));

    GStreamerInputPipelineBuilder {
      items,
      seekable: false,
    }
  }

  fn build_file_pipeline(path: &str, query: &HashMap<String, String>) -> Self {
    let mut items = vec![GStreamerInputBuilderItem::FileSource(path.to_string())];
    items.extend(Self::video_flip(query.get("rotate").map(String::as_str)));

    GStreamerInputPipelineBuilder {
      items,
      seekable: true,
    }
  }

  fn video_flip(rotate: Option<&str>) -> Option<GStreamerInputBuilderItem> {
    let method = match rotate? {
      "90" => 1,
      "180" => 2,
      "270" => 3,
      _ => return None,
    };
    Some(GStreamerInputBuilderItem::VideoFlip { method })
  }

  pub fn description(&self) -> String {
    let basic_pipeline = self
      .items
      .iter()
      .map(GStreamerInputBuilderItem::to_pipeline)
      .collect::<Vec<String>>()
      .join(" ! ");

    // 文件由回放控制器控速，不能丢帧；摄像头只保留最新的帧
    let sink = if self.seekable {
      "appsink name=sink sync=false max-buffers=4"
    } else {
      "appsink name=sink max-buffers=2 drop=true"
    };
    format!("{} ! {}", basic_pipeline, sink)
  }

  pub fn build(self) -> Result<GStreamerInput, GStreamerInputError> {
    gst::init()?;

    let description = self.description();
    info!("GStreamer 管道: {}", description);

    let pipeline = gst::parse::launch(&description)?
      .downcast::<gst::Pipeline>()
      .map_err(|_| GStreamerInputError::PipelineError("无法创建管道".to_string()))?;

    let appsink = pipeline
      .by_name("sink")
      .ok_or(GStreamerInputError::AppSinkNotFound)?
      .downcast::<gst_app::AppSink>()
      .map_err(|_| GStreamerInputError::AppSinkNotFound)?;

    // 预卷后才能拿到协商好的 caps 与时长
    pipeline.set_state(gst::State::Paused)?;
    let (result, _, _) = pipeline.state(gst::ClockTime::from_seconds(PREROLL_TIMEOUT_SECONDS));
    result?;

    let (fps, frame_count) = probe_stream(&pipeline, &appsink);
    info!("视频帧率: {:.2}, 总帧数: {:?}", fps, frame_count);

    pipeline.set_state(gst::State::Playing)?;

    Ok(GStreamerInput {
      pipeline,
      appsink,
      seekable: self.seekable,
      fps,
      frame_count,
      current: 0,
      next: 0,
    })
  }
}

fn probe_stream(pipeline: &gst::Pipeline, appsink: &gst_app::AppSink) -> (f64, Option<u64>) {
  let fps = appsink
    .static_pad("sink")
    .and_then(|pad| pad.current_caps())
    .and_then(|caps| gst_video::VideoInfo::from_caps(&caps).ok())
    .map(|info| {
      let fps = info.fps();
      if fps.denom() == 0 {
        0.0
      } else {
        fps.numer() as f64 / fps.denom() as f64
      }
    })
    .unwrap_or(0.0);

  let frame_count = pipeline
    .query_duration::<gst::ClockTime>()
    .filter(|_| fps > 0.0)
    .map(|duration| (duration.nseconds() as f64 * fps / 1e9).round() as u64);

  (fps, frame_count)
}

impl FromUrlWithScheme for GStreamerInputPipelineBuilder {
  const SCHEME: &'static str = "gst";
}

impl FromUrl for GStreamerInputPipelineBuilder {
  type Error = GStreamerInputError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      return Err(GStreamerInputError::SchemeMismatch);
    }

    let query: HashMap<String, String> = url
      .query_pairs()
      .map(|(k, v)| (String::from(k), String::from(v)))
      .collect();
    let path = urlencoding::decode(url.path())
      .map_err(|e| GStreamerInputError::PipelineError(e.to_string()))?;

    let mut builder = match url.host_str() {
      Some("camera") => Self::build_camera_pipeline(&path, &query),
      Some("file") => Self::build_file_pipeline(&path, &query),
      _ => return Err(GStreamerInputError::SchemeMismatch),
    };

    builder.items.push(GStreamerInputBuilderItem::TargetFormat {
      format: "RGB".to_string(),
    });

    Ok(builder)
  }
}

/// GStreamer 视频输入
pub struct GStreamerInput {
  pipeline: gst::Pipeline,
  appsink: gst_app::AppSink,
  seekable: bool,
  fps: f64,
  frame_count: Option<u64>,
  current: u64,
  next: u64,
}

impl FromUrlWithScheme for GStreamerInput {
  const SCHEME: &'static str = "gst";
}

impl FromUrl for GStreamerInput {
  type Error = GStreamerInputError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    GStreamerInputPipelineBuilder::from_url(url)?.build()
  }
}

impl GStreamerInput {
  fn index_of(&self, buffer: &gst::BufferRef) -> u64 {
    match buffer.pts() {
      Some(pts) if self.fps > 0.0 => (pts.nseconds() as f64 * self.fps / 1e9).round() as u64,
      _ => self.next,
    }
  }
}

impl Drop for GStreamerInput {
  fn drop(&mut self) {
    self.close();
  }
}

impl FrameSource for GStreamerInput {
  fn read(&mut self) -> Result<Option<Frame>, SourceError> {
    let sample = match self.appsink.pull_sample() {
      Ok(sample) => sample,
      Err(_) if self.appsink.is_eos() => return Ok(None),
      Err(e) => return Err(SourceError::Read(e.to_string())),
    };

    let buffer = sample
      .buffer()
      .ok_or_else(|| SourceError::Read("样本中没有缓冲区".to_string()))?;
    let index = self.index_of(buffer);
    let frame = convert_sample(&sample).map_err(|e| {
      error!("转换帧失败: {}", e);
      SourceError::Read(e.to_string())
    })?;

    self.current = index;
    self.next = index + 1;
    Ok(Some(frame))
  }

  fn seek(&mut self, index: u64) -> Result<(), SourceError> {
    let position = seek_position(index, self.seekable, self.fps, self.frame_count)?;
    debug!("定位到第 {} 帧 ({})", index, position);
    self
      .pipeline
      .seek_simple(gst::SeekFlags::FLUSH | gst::SeekFlags::ACCURATE, position)
      .map_err(|e| SourceError::seek(index, e))?;

    self.next = index;
    Ok(())
  }

  fn current_index(&self) -> u64 {
    self.current
  }

  fn frame_rate(&self) -> f64 {
    self.fps
  }

  fn frame_count(&self) -> Option<u64> {
    self.frame_count
  }

  fn close(&mut self) {
    if let Err(e) = self.pipeline.set_state(gst::State::Null) {
      warn!("停止 GStreamer 管道失败: {}", e);
    }
  }
}

/// 第 `index` 帧对应的时间戳；越过时长的定位会把管道推到 EOS，必须提前拒绝
fn seek_position(
  index: u64,
  seekable: bool,
  fps: f64,
  frame_count: Option<u64>,
) -> Result<gst::ClockTime, SourceError> {
  if !seekable {
    return Err(SourceError::seek(index, "摄像头输入不支持定位"));
  }
  if fps <= 0.0 {
    return Err(SourceError::seek(index, "帧率未知"));
  }
  if let Some(count) = frame_count {
    if index >= count {
      return Err(SourceError::seek(index, format!("超出视频末尾 (共 {} 帧)", count)));
    }
  }
  Ok(gst::ClockTime::from_nseconds(
    (index as f64 * 1e9 / fps).round() as u64,
  ))
}

/// 按行拷贝，去掉行尾对齐填充
fn convert_sample(sample: &gst::Sample) -> Result<Frame, GStreamerInputError> {
  let buffer = sample
    .buffer()
    .ok_or_else(|| GStreamerInputError::PipelineError("样本中没有缓冲区".to_string()))?;
  let caps = sample
    .caps()
    .ok_or_else(|| GStreamerInputError::PipelineError("样本中没有 caps".to_string()))?;

  let video_info =
    gst_video::VideoInfo::from_caps(caps).map_err(|_| GStreamerInputError::VideoInfoError)?;

  let order = match video_info.format() {
    gst_video::VideoFormat::Rgb => ChannelOrder::Rgb,
    gst_video::VideoFormat::Bgr => ChannelOrder::Bgr,
    other => return Err(GStreamerInputError::UnsupportedFormat(other)),
  };

  let width = video_info.width() as usize;
  let height = video_info.height() as usize;
  let stride = video_info.stride()[0] as usize;
  let offset = video_info.offset()[0];
  let row_bytes = width * RGB_CHANNELS;

  let map = buffer
    .map_readable()
    .map_err(|e| GStreamerInputError::PipelineError(format!("无法映射缓冲区: {}", e)))?;
  let data = map.as_slice();

  let expected = offset + stride * height.saturating_sub(1) + row_bytes;
  if data.len() < expected {
    return Err(GStreamerInputError::BufferSizeMismatch {
      expected,
      actual: data.len(),
    });
  }

  let mut pixels = Vec::with_capacity(row_bytes * height);
  for row in 0..height {
    let start = offset + row * stride;
    pixels.extend_from_slice(&data[start..start + row_bytes]);
  }

  Frame::from_raw(width as u32, height as u32, pixels, order).ok_or(
    GStreamerInputError::BufferSizeMismatch {
      expected: row_bytes * height,
      actual: data.len(),
    },
  )
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn file_url_builds_seekable_pipeline() {
    let url = Url::parse("gst://file/data/street%20cam.mp4?rotate=90").unwrap();
    let builder = GStreamerInputPipelineBuilder::from_url(&url).unwrap();
    assert!(builder.seekable);
    assert_eq!(
      builder.description(),
      "filesrc location=\"/data/street cam.mp4\" ! decodebin ! videoflip method=1 \
       ! videoconvert ! video/x-raw,format=RGB ! appsink name=sink sync=false max-buffers=4"
    );
  }

  #[test]
  fn camera_url_uses_query_parameters() {
    let url = Url::parse("gst://camera/dev/video2?width=320&height=240&fps=30").unwrap();
    let builder = GStreamerInputPipelineBuilder::from_url(&url).unwrap();
    assert!(!builder.seekable);
    let description = builder.description();
    assert!(description.starts_with(
      "v4l2src device=/dev/video2 ! video/x-raw,format=YUY2,width=320,height=240,framerate=30/1"
    ));
    assert!(description.ends_with("drop=true"));
  }

  #[test]
  fn seek_position_is_bounded_by_frame_count() {
    let position = seek_position(50, true, 25.0, Some(100)).unwrap();
    assert_eq!(position, gst::ClockTime::from_seconds(2));

    assert!(matches!(
      seek_position(100, true, 25.0, Some(100)),
      Err(SourceError::Seek { index: 100, .. })
    ));
    assert!(seek_position(500, true, 25.0, None).is_ok());
  }

  #[test]
  fn cameras_and_unknown_rates_cannot_seek() {
    assert!(seek_position(0, false, 30.0, None).is_err());
    assert!(seek_position(0, true, 0.0, Some(10)).is_err());
  }

  #[test]
  fn unknown_host_is_rejected() {
    let url = Url::parse("gst://rtsp/stream").unwrap();
    assert!(matches!(
      GStreamerInputPipelineBuilder::from_url(&url),
      Err(GStreamerInputError::SchemeMismatch)
    ));
  }
}
