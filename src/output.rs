// 该文件是 Shanan （山南西风） 项目的一部分。
// src/output.rs - 结果输出定义
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

use std::sync::Arc;

use thiserror::Error;
use tracing::{error, warn};
use url::Url;

use crate::{FromUrl, FromUrlWithScheme, frame::Frame, model::Detection};

pub mod draw;
pub use self::draw::{ColorTable, Draw, DrawError, Render};

mod channel;
pub use self::channel::{ChannelSink, SinkEvent};

mod stats;
pub use self::stats::{LogSink, ObjectCounts, count_objects};

#[cfg(feature = "directory_record")]
mod directory_record;
#[cfg(feature = "directory_record")]
pub use self::directory_record::{DirectoryRecordError, DirectoryRecordSink, RecordFormat};

/// 帧结果的来源
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Emission {
  /// 正常回放
  Playback,
  /// 定位后立即发出的单帧
  Seek,
}

#[derive(Debug, Clone)]
pub struct FrameResult {
  pub index: u64,
  /// 已绘制、RGB 顺序
  pub frame: Frame,
  pub detections: Vec<Detection>,
  pub emission: Emission,
  pub from_cache: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
  SourceOpen,
  Read,
  Inference,
  Render,
  Seek,
}

/// 错误通道上的事件
#[derive(Debug, Clone, PartialEq)]
pub struct ErrorEvent {
  pub kind: ErrorKind,
  pub message: String,
  pub frame_index: Option<u64>,
  /// 为真时会话随之结束
  pub fatal: bool,
}

impl ErrorEvent {
  pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
    Self {
      kind,
      message: message.into(),
      frame_index: None,
      fatal: false,
    }
  }

  pub fn at_frame(mut self, index: u64) -> Self {
    self.frame_index = Some(index);
    self
  }

  pub fn fatal(mut self) -> Self {
    self.fatal = true;
    self
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEnd {
  EndOfStream,
  Stopped,
  Failed,
}

/// 回放结果的消费者
///
/// 回调在回放线程上执行，实现应尽快返回。
pub trait ResultSink: Send + Sync {
  fn on_frame(&self, result: FrameResult);

  fn on_error(&self, event: ErrorEvent) {
    if event.fatal {
      error!("{:?} 错误 (帧 {:?}): {}", event.kind, event.frame_index, event.message);
    } else {
      warn!("{:?} 错误 (帧 {:?}): {}", event.kind, event.frame_index, event.message);
    }
  }

  fn on_session_end(&self, _end: SessionEnd) {}
}

impl<S: ResultSink + ?Sized> ResultSink for Arc<S> {
  fn on_frame(&self, result: FrameResult) {
    (**self).on_frame(result)
  }

  fn on_error(&self, event: ErrorEvent) {
    (**self).on_error(event)
  }

  fn on_session_end(&self, end: SessionEnd) {
    (**self).on_session_end(end)
  }
}

impl<S: ResultSink + ?Sized> ResultSink for Box<S> {
  fn on_frame(&self, result: FrameResult) {
    (**self).on_frame(result)
  }

  fn on_error(&self, event: ErrorEvent) {
    (**self).on_error(event)
  }

  fn on_session_end(&self, end: SessionEnd) {
    (**self).on_session_end(end)
  }
}

/// 依次转发给每个输出
impl ResultSink for Vec<Box<dyn ResultSink>> {
  fn on_frame(&self, result: FrameResult) {
    if let Some((last, rest)) = self.split_last() {
      for sink in rest {
        sink.on_frame(result.clone());
      }
      last.on_frame(result);
    }
  }

  fn on_error(&self, event: ErrorEvent) {
    for sink in self {
      sink.on_error(event.clone());
    }
  }

  fn on_session_end(&self, end: SessionEnd) {
    for sink in self {
      sink.on_session_end(end);
    }
  }
}

#[derive(Error, Debug)]
pub enum OutputError {
  #[cfg(feature = "directory_record")]
  #[error("目录记录输出错误: {0}")]
  DirectoryRecord(#[from] DirectoryRecordError),
  #[error("URI 方案不匹配: {0}")]
  SchemeMismatch(String),
}

/// 按 URL 方案创建的输出
pub enum OutputWrapper {
  Log(LogSink),
  #[cfg(feature = "directory_record")]
  DirectoryRecord(DirectoryRecordSink),
}

impl FromUrl for OutputWrapper {
  type Error = OutputError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    match url.scheme() {
      LogSink::SCHEME => Ok(OutputWrapper::Log(LogSink::from_url(url)?)),
      #[cfg(feature = "directory_record")]
      DirectoryRecordSink::SCHEME => Ok(OutputWrapper::DirectoryRecord(
        DirectoryRecordSink::from_url(url)?,
      )),
      other => Err(OutputError::SchemeMismatch(other.to_string())),
    }
  }
}

impl OutputWrapper {
  fn inner(&self) -> &dyn ResultSink {
    match self {
      OutputWrapper::Log(sink) => sink,
      #[cfg(feature = "directory_record")]
      OutputWrapper::DirectoryRecord(sink) => sink,
    }
  }
}

impl ResultSink for OutputWrapper {
  fn on_frame(&self, result: FrameResult) {
    self.inner().on_frame(result)
  }

  fn on_error(&self, event: ErrorEvent) {
    self.inner().on_error(event)
  }

  fn on_session_end(&self, end: SessionEnd) {
    self.inner().on_session_end(end)
  }
}

#[cfg(test)]
mod tests {
  use std::sync::Mutex;

  use super::*;

  #[derive(Default)]
  struct Recorder {
    frames: Mutex<Vec<u64>>,
    ends: Mutex<Vec<SessionEnd>>,
  }

  impl ResultSink for Recorder {
    fn on_frame(&self, result: FrameResult) {
      self.frames.lock().unwrap().push(result.index);
    }

    fn on_session_end(&self, end: SessionEnd) {
      self.ends.lock().unwrap().push(end);
    }
  }

  fn result(index: u64) -> FrameResult {
    FrameResult {
      index,
      frame: Frame::from(image::RgbImage::new(1, 1)),
      detections: Vec::new(),
      emission: Emission::Playback,
      from_cache: false,
    }
  }

  #[test]
  fn fan_out_reaches_every_sink() {
    let a = Arc::new(Recorder::default());
    let b = Arc::new(Recorder::default());
    let sinks: Vec<Box<dyn ResultSink>> = vec![Box::new(a.clone()), Box::new(b.clone())];

    sinks.on_frame(result(3));
    sinks.on_frame(result(4));
    sinks.on_session_end(SessionEnd::EndOfStream);

    for recorder in [&a, &b] {
      assert_eq!(*recorder.frames.lock().unwrap(), vec![3, 4]);
      assert_eq!(*recorder.ends.lock().unwrap(), vec![SessionEnd::EndOfStream]);
    }
  }

  #[test]
  fn error_event_builder() {
    let event = ErrorEvent::new(ErrorKind::Read, "坏帧").at_frame(9).fatal();
    assert_eq!(event.frame_index, Some(9));
    assert!(event.fatal);
  }

  #[test]
  fn unknown_output_scheme() {
    let url = Url::parse("rtsp://localhost/live").unwrap();
    assert!(matches!(
      OutputWrapper::from_url(&url),
      Err(OutputError::SchemeMismatch(_))
    ));
  }
}
