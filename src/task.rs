// 该文件是 Shanan （山南西风） 项目的一部分。
// src/task.rs - 命令行任务
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
  sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
  },
  thread,
  time::{Duration, Instant},
};

use crossbeam_channel::{Receiver, RecvTimeoutError};
use tracing::{debug, info, warn};

use crate::{
  input::{FrameSource, OpenSource},
  model::{Detect, TargetClasses},
  output::{ColorTable, Emission, Render, SessionEnd, SinkEvent},
  playback::PlaybackController,
};

/// 轮询中断标志的间隔
const POLL_INTERVAL: Duration = Duration::from_millis(100);
/// 停止后等待结束事件的时长
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

pub trait Task<I, M, O>: Sized {
  type Error;
  fn run_task(self, input: I, model: M, output: O) -> Result<SessionEnd, Self::Error>;
}

/// 持续回放直到输入结束、达到帧数或收到 Ctrl-C
#[derive(Default, Debug)]
pub struct ContinuousTask {
  frame_number: Option<usize>,
  seeks: Vec<u64>,
  targets: TargetClasses,
  handle_interrupt: bool,
}

impl ContinuousTask {
  /// 回放发出这么多帧后停止，定位发出的帧不计入
  pub fn with_frame_number(mut self, frame_number: Option<usize>) -> Self {
    self.frame_number = frame_number;
    self
  }

  /// 启动后依次定位到这些帧
  pub fn with_seeks(mut self, seeks: Vec<u64>) -> Self {
    self.seeks = seeks;
    self
  }

  pub fn with_targets(mut self, targets: TargetClasses) -> Self {
    self.targets = targets;
    self
  }

  /// 安装 Ctrl-C 处理器，每个进程只能安装一次
  pub fn with_interrupt_handler(mut self) -> Self {
    self.handle_interrupt = true;
    self
  }
}

fn install_interrupt_handler() -> anyhow::Result<Arc<AtomicBool>> {
  let interrupted = Arc::new(AtomicBool::new(false));
  let flag = Arc::clone(&interrupted);
  ctrlc::set_handler(move || {
    info!("收到中断信号，准备退出...");
    if !flag.swap(true, Ordering::SeqCst) {
      thread::spawn(|| {
        thread::sleep(Duration::from_secs(30));
        warn!("强制退出程序");
        std::process::exit(1);
      });
    }
  })?;
  Ok(interrupted)
}

impl<'a, D, R> Task<&'a dyn OpenSource, &'a PlaybackController<D, R>, Receiver<SinkEvent>>
  for ContinuousTask
where
  D: Detect + 'static,
  R: Render + 'static,
{
  type Error = anyhow::Error;

  fn run_task(
    self,
    input: &'a dyn OpenSource,
    player: &'a PlaybackController<D, R>,
    events: Receiver<SinkEvent>,
  ) -> Result<SessionEnd, Self::Error> {
    info!("开始任务...");
    let interrupted = if self.handle_interrupt {
      install_interrupt_handler()?
    } else {
      Arc::new(AtomicBool::new(false))
    };

    player.start(input, self.targets)?;

    for index in self.seeks {
      info!("定位到第 {} 帧", index);
      if let Err(e) = player.seek(index) {
        warn!("定位到第 {} 帧失败: {}", index, e);
      }
    }

    let mut frames = 0usize;
    let mut stop_requested_at: Option<Instant> = None;
    let end = loop {
      match events.recv_timeout(POLL_INTERVAL) {
        Ok(SinkEvent::Frame(result)) => {
          // 定位发出的帧不计入帧数
          if result.emission == Emission::Playback {
            frames += 1;
          }
          debug!(
            "收到第 {} 帧 ({:?}), {} 个目标",
            result.index,
            result.emission,
            result.detections.len()
          );
        }
        Ok(SinkEvent::Error(event)) => {
          debug!("错误事件: {:?}", event);
        }
        Ok(SinkEvent::End(end)) => break end,
        Err(RecvTimeoutError::Timeout) => {}
        Err(RecvTimeoutError::Disconnected) => {
          warn!("结果通道已断开");
          break SessionEnd::Stopped;
        }
      }

      if stop_requested_at.is_none() {
        let reached = self.frame_number.is_some_and(|n| frames >= n);
        if reached {
          info!("达到指定帧数 {}, 停止回放", frames);
        }
        if interrupted.load(Ordering::SeqCst) {
          warn!("中断信号接收，停止回放");
        }
        if reached || interrupted.load(Ordering::SeqCst) {
          stop_requested_at = Some(Instant::now());
          player.stop();
        }
      } else if stop_requested_at.is_some_and(|at| at.elapsed() > SHUTDOWN_TIMEOUT) {
        warn!("等待回放结束超时");
        break SessionEnd::Stopped;
      }
    };

    player.stop();
    info!("任务完成，共 {} 帧，结束原因 {:?}", frames, end);
    Ok(end)
  }
}

/// 对同一帧重复检测与绘制，统计平均耗时
#[derive(Debug)]
pub struct RepeatShotTask {
  repeat: usize,
  targets: TargetClasses,
  colors: ColorTable,
}

impl RepeatShotTask {
  pub const DEFAULT_REPEAT: usize = 1000;
  /// 统计时忽略的预热次数
  const WARMUP: usize = 2;

  pub fn new(targets: TargetClasses, colors: ColorTable) -> Self {
    Self {
      repeat: Self::DEFAULT_REPEAT,
      targets,
      colors,
    }
  }

  pub fn with_repeat(mut self, repeat: usize) -> Self {
    self.repeat = repeat.max(1);
    self
  }
}

impl<I, M, O> Task<I, &M, &O> for RepeatShotTask
where
  I: FrameSource,
  M: Detect,
  O: Render,
{
  type Error = anyhow::Error;

  fn run_task(self, mut input: I, model: &M, output: &O) -> Result<SessionEnd, Self::Error> {
    info!("开始任务...");
    let frame = input.read()?.ok_or_else(|| anyhow::anyhow!("没有输入帧"))?;
    input.close();
    info!("输入帧获取成功，开始推理...");

    let mut times = Vec::with_capacity(self.repeat);
    for i in 0..self.repeat {
      let now = Instant::now();
      let detections = model.detect(&frame, &self.targets)?;
      let inferred = now.elapsed();
      output.render(&frame, &detections, &self.colors)?;
      let rendered = now.elapsed();
      info!(
        "({}) 检测到 {} 个目标，推理 {:.2?} / 含绘制 {:.2?}",
        i,
        detections.len(),
        inferred,
        rendered
      );
      times.push(inferred);
    }

    let measured = if times.len() > Self::WARMUP {
      &times[Self::WARMUP..]
    } else {
      &times[..]
    };
    warn!(
      "平均推理时间: {:.2?}",
      measured.iter().sum::<Duration>() / measured.len() as u32
    );

    Ok(SessionEnd::EndOfStream)
  }
}
