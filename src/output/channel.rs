// 该文件是 Shanan （山南西风） 项目的一部分。
// src/output/channel.rs - 基于通道的结果输出
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
  sync::atomic::{AtomicU64, Ordering},
  time::Duration,
};

use crossbeam_channel::{Receiver, SendTimeoutError, Sender, TrySendError};
use tracing::{debug, warn};

use crate::output::{ErrorEvent, FrameResult, ResultSink, SessionEnd};

const DELIVERY_TIMEOUT: Duration = Duration::from_secs(1);

#[derive(Debug, Clone)]
pub enum SinkEvent {
  Frame(FrameResult),
  Error(ErrorEvent),
  End(SessionEnd),
}

/// 把回放事件转发到 crossbeam 通道
///
/// 有界通道满时直接丢弃新帧；错误与结束事件最多等待
/// `DELIVERY_TIMEOUT`，超时后丢弃。
pub struct ChannelSink {
  sender: Sender<SinkEvent>,
  dropped: AtomicU64,
}

impl ChannelSink {
  pub fn bounded(capacity: usize) -> (Self, Receiver<SinkEvent>) {
    let (sender, receiver) = crossbeam_channel::bounded(capacity.max(1));
    (Self::from_sender(sender), receiver)
  }

  pub fn unbounded() -> (Self, Receiver<SinkEvent>) {
    let (sender, receiver) = crossbeam_channel::unbounded();
    (Self::from_sender(sender), receiver)
  }

  fn from_sender(sender: Sender<SinkEvent>) -> Self {
    Self {
      sender,
      dropped: AtomicU64::new(0),
    }
  }

  /// 因队列满而丢弃的帧数
  pub fn dropped(&self) -> u64 {
    self.dropped.load(Ordering::Relaxed)
  }

  fn deliver(&self, event: SinkEvent) {
    match self.sender.send_timeout(event, DELIVERY_TIMEOUT) {
      Ok(()) => {}
      Err(SendTimeoutError::Timeout(event)) => warn!("结果队列已满，丢弃事件: {:?}", event),
      Err(SendTimeoutError::Disconnected(_)) => debug!("结果接收端已关闭"),
    }
  }
}

impl ResultSink for ChannelSink {
  fn on_frame(&self, result: FrameResult) {
    match self.sender.try_send(SinkEvent::Frame(result)) {
      Ok(()) => {}
      Err(TrySendError::Full(SinkEvent::Frame(result))) => {
        self.dropped.fetch_add(1, Ordering::Relaxed);
        warn!("结果队列已满，丢弃第 {} 帧", result.index);
      }
      Err(TrySendError::Full(_)) => {}
      Err(TrySendError::Disconnected(_)) => debug!("结果接收端已关闭"),
    }
  }

  fn on_error(&self, event: ErrorEvent) {
    self.deliver(SinkEvent::Error(event));
  }

  fn on_session_end(&self, end: SessionEnd) {
    self.deliver(SinkEvent::End(end));
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::{frame::Frame, output::Emission};

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
  fn full_queue_drops_frames_but_not_end() {
    let (sink, receiver) = ChannelSink::bounded(1);
    sink.on_frame(result(0));
    sink.on_frame(result(1));
    assert_eq!(sink.dropped(), 1);

    match receiver.recv().unwrap() {
      SinkEvent::Frame(frame) => assert_eq!(frame.index, 0),
      other => panic!("意外事件: {:?}", other),
    }
    sink.on_session_end(SessionEnd::Stopped);
    assert!(matches!(
      receiver.recv().unwrap(),
      SinkEvent::End(SessionEnd::Stopped)
    ));
  }

  #[test]
  fn closed_receiver_is_ignored() {
    let (sink, receiver) = ChannelSink::unbounded();
    drop(receiver);
    sink.on_frame(result(0));
    sink.on_session_end(SessionEnd::EndOfStream);
    assert_eq!(sink.dropped(), 0);
  }
}
