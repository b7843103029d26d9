// 该文件是 Shanan （山南西风） 项目的一部分。
// src/playback.rs - 回放控制器
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

//! # 回放控制器
//!
//! 后台线程按帧率读取输入源，对每帧做检测与绘制后交给 [`ResultSink`]。
//! 控制方法都只需要 `&self`，可以从任意线程调用：
//!
//! ```text
//! Idle ──start──▶ Running ⇄ Paused ──stop / 流结束 / 读取失败──▶ Stopped
//! ```
//!
//! 输入源与帧缓存在同一把锁下，一次“查缓存 → 检测 → 写缓存”是一个整体，
//! 定位 (`seek`) 与主循环不会重复推理同一帧，同一时刻最多只有一次推理。

use std::{
  sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError},
  thread::{self, JoinHandle, ThreadId},
  time::{Duration, Instant},
};

use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::{
  cache::{CacheEntry, DEFAULT_CACHE_CAPACITY, FrameCache},
  frame::Frame,
  input::{FrameSource, OpenSource, SourceError},
  model::{Detect, Detection, TargetClasses},
  output::{ColorTable, Emission, ErrorEvent, ErrorKind, FrameResult, Render, ResultSink, SessionEnd},
};

/// 输入源未声明帧率时使用
pub const DEFAULT_FRAME_RATE: f64 = 30.0;

/// 暂停状态下的最长等待时间
const PAUSE_POLL: Duration = Duration::from_millis(100);

const WORKER_NAME: &str = "shanan-playback";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaybackState {
  Idle,
  Running,
  Paused,
  Stopped,
}

impl PlaybackState {
  pub fn is_active(self) -> bool {
    matches!(self, PlaybackState::Running | PlaybackState::Paused)
  }
}

#[derive(Error, Debug)]
pub enum PlaybackError {
  #[error("已有正在进行的回放会话")]
  SessionActive,
  #[error("没有活动的回放会话")]
  NoSession,
  #[error("输入源错误: {0}")]
  Source(#[from] SourceError),
  #[error("无法启动回放线程: {0}")]
  Spawn(std::io::Error),
}

struct Session {
  source: Box<dyn FrameSource>,
  cache: FrameCache,
  targets: TargetClasses,
  /// 下一次 `read` 将返回的帧序号
  next_index: u64,
}

impl Session {
  fn read(&mut self) -> Result<Option<Frame>, SourceError> {
    let frame = self.source.read()?;
    if frame.is_some() {
      self.next_index = self.source.current_index() + 1;
    }
    Ok(frame)
  }
}

struct Control {
  state: PlaybackState,
  /// 每次 start 加一，旧线程据此判断自己是否已过期
  generation: u64,
  worker_thread: Option<ThreadId>,
}

struct Shared<D, R> {
  detector: D,
  renderer: R,
  colors: ColorTable,
  sink: Box<dyn ResultSink>,
  control: Mutex<Control>,
  wakeup: Condvar,
  session: Mutex<Option<Session>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
  mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// 一帧的处理结果
enum Produced {
  Ready {
    frame: Frame,
    detections: Vec<Detection>,
    from_cache: bool,
  },
  Failed(ErrorEvent),
}

enum Step {
  Emit(FrameResult),
  Skipped,
  EndOfStream,
  Failed,
  Stopped,
}

impl<D: Detect, R: Render> Shared<D, R> {
  fn is_current(&self, generation: u64) -> bool {
    let control = lock(&self.control);
    control.generation == generation && control.state.is_active()
  }

  /// 查缓存，未命中则检测、绘制并写入缓存
  fn produce(&self, session: &mut Session, index: u64, frame: Frame) -> Produced {
    if let Some(entry) = session.cache.get(index) {
      debug!("第 {} 帧命中缓存", index);
      return Produced::Ready {
        frame: entry.frame.clone(),
        detections: entry.detections.clone(),
        from_cache: true,
      };
    }

    let detections = match self.detector.detect(&frame, &session.targets) {
      Ok(detections) => detections,
      Err(e) => {
        warn!("第 {} 帧检测失败: {}", index, e);
        return Produced::Failed(ErrorEvent::new(ErrorKind::Inference, e.to_string()).at_frame(index));
      }
    };

    let rendered = match self.renderer.render(&frame, &detections, &self.colors) {
      Ok(rendered) => rendered.into_rgb(),
      Err(e) => {
        warn!("第 {} 帧绘制失败: {}", index, e);
        return Produced::Failed(ErrorEvent::new(ErrorKind::Render, e.to_string()).at_frame(index));
      }
    };

    session.cache.put(CacheEntry {
      frame_index: index,
      frame: rendered.clone(),
      detections: detections.clone(),
    });

    Produced::Ready {
      frame: rendered,
      detections,
      from_cache: false,
    }
  }

  /// 主循环的一次迭代：读取下一帧并处理
  fn advance(&self) -> Step {
    let mut guard = lock(&self.session);
    let Some(session) = guard.as_mut() else {
      return Step::Stopped;
    };

    let frame = match session.read() {
      Ok(Some(frame)) => frame,
      Ok(None) => return Step::EndOfStream,
      Err(e) => {
        let index = session.next_index;
        drop(guard);
        error!("读取输入源失败: {}", e);
        self
          .sink
          .on_error(ErrorEvent::new(ErrorKind::Read, e.to_string()).at_frame(index).fatal());
        return Step::Failed;
      }
    };

    let index = session.source.current_index();
    let produced = self.produce(session, index, frame);
    drop(guard);

    match produced {
      Produced::Ready {
        frame,
        detections,
        from_cache,
      } => Step::Emit(FrameResult {
        index,
        frame,
        detections,
        emission: Emission::Playback,
        from_cache,
      }),
      Produced::Failed(event) => {
        self.sink.on_error(event);
        Step::Skipped
      }
    }
  }

  /// 暂停期间阻塞；返回 false 表示会话已停止
  fn wait_while_paused(&self, generation: u64) -> bool {
    let mut control = lock(&self.control);
    loop {
      if control.generation != generation || control.state == PlaybackState::Stopped {
        return false;
      }
      if control.state != PlaybackState::Paused {
        return true;
      }
      control = self
        .wakeup
        .wait_timeout(control, PAUSE_POLL)
        .unwrap_or_else(PoisonError::into_inner)
        .0;
    }
  }

  /// 等到 `deadline`，可被 stop 打断；返回 false 表示会话已停止
  fn wait_until(&self, deadline: Instant, generation: u64) -> bool {
    let mut control = lock(&self.control);
    loop {
      if control.generation != generation || control.state == PlaybackState::Stopped {
        return false;
      }
      let now = Instant::now();
      if now >= deadline {
        return true;
      }
      control = self
        .wakeup
        .wait_timeout(control, deadline - now)
        .unwrap_or_else(PoisonError::into_inner)
        .0;
    }
  }

  fn run(&self, generation: u64, interval: Duration) {
    info!("回放线程启动，帧间隔 {:.2?}", interval);

    let end = loop {
      if !self.wait_while_paused(generation) {
        break SessionEnd::Stopped;
      }

      let cycle_start = Instant::now();
      match self.advance() {
        Step::Emit(result) => {
          if self.is_current(generation) {
            self.sink.on_frame(result);
          } else {
            debug!("会话已停止，丢弃第 {} 帧", result.index);
          }
        }
        Step::Skipped => {}
        Step::EndOfStream => {
          info!("输入源已结束");
          break SessionEnd::EndOfStream;
        }
        Step::Failed => break SessionEnd::Failed,
        Step::Stopped => break SessionEnd::Stopped,
      }

      if !self.wait_until(cycle_start + interval, generation) {
        break SessionEnd::Stopped;
      }
    };

    self.finish(generation, end);
  }

  fn finish(&self, generation: u64, end: SessionEnd) {
    {
      let mut control = lock(&self.control);
      // 过期的线程不能关闭新会话的输入源
      if control.generation == generation {
        control.state = PlaybackState::Stopped;
        if let Some(mut session) = lock(&self.session).take() {
          session.source.close();
        }
      }
    }
    self.wakeup.notify_all();

    info!("回放会话结束: {:?}", end);
    self.sink.on_session_end(end);
  }
}

/// 定位并读取目标帧；失败时附带输入源位置是否已被移动
fn reposition(session: &mut Session, index: u64) -> Result<Frame, (SourceError, bool)> {
  if let Some(count) = session.source.frame_count() {
    if index >= count {
      let e = SourceError::seek(index, format!("超出输入源末尾 (共 {} 帧)", count));
      return Err((e, false));
    }
  }
  session.source.seek(index).map_err(|e| (e, false))?;

  match session.read() {
    Ok(Some(frame)) => Ok(frame),
    Ok(None) => Err((SourceError::seek(index, "超出输入源末尾"), true)),
    Err(e) => Err((SourceError::seek(index, e), true)),
  }
}

/// 回放控制器
pub struct PlaybackController<D: Detect + 'static, R: Render + 'static> {
  shared: Arc<Shared<D, R>>,
  worker: Mutex<Option<JoinHandle<()>>>,
  cache_capacity: usize,
}

impl<D: Detect + 'static, R: Render + 'static> PlaybackController<D, R> {
  pub fn new<S: ResultSink + 'static>(detector: D, renderer: R, colors: ColorTable, sink: S) -> Self {
    Self {
      shared: Arc::new(Shared {
        detector,
        renderer,
        colors,
        sink: Box::new(sink),
        control: Mutex::new(Control {
          state: PlaybackState::Idle,
          generation: 0,
          worker_thread: None,
        }),
        wakeup: Condvar::new(),
        session: Mutex::new(None),
      }),
      worker: Mutex::new(None),
      cache_capacity: DEFAULT_CACHE_CAPACITY,
    }
  }

  pub fn with_cache_capacity(mut self, capacity: usize) -> Self {
    self.cache_capacity = capacity;
    self
  }

  pub fn state(&self) -> PlaybackState {
    lock(&self.shared.control).state
  }

  /// 打开输入源并启动后台回放
  pub fn start(&self, source: &dyn OpenSource, targets: TargetClasses) -> Result<(), PlaybackError> {
    let mut worker = lock(&self.worker);

    if lock(&self.shared.control).state.is_active() {
      return Err(PlaybackError::SessionActive);
    }

    // 上一个会话的线程已经或即将退出；在该线程内（结束回调中）重新启动时不能等待自己
    if let Some(handle) = worker.take() {
      if handle.thread().id() == thread::current().id() {
        debug!("在回放线程内启动新会话，旧线程将自行退出");
      } else if handle.join().is_err() {
        error!("上一个回放线程异常退出");
      }
    }

    let identifier = source.identifier();
    info!("开始回放: {}", identifier);
    let opened = match source.open() {
      Ok(opened) => opened,
      Err(e) => {
        drop(worker);
        error!("无法打开输入源 {}: {}", identifier, e);
        self
          .shared
          .sink
          .on_error(ErrorEvent::new(ErrorKind::SourceOpen, e.to_string()).fatal());
        return Err(PlaybackError::Source(e));
      }
    };

    let fps = opened.frame_rate();
    let fps = if fps.is_finite() && fps > 0.0 {
      fps
    } else {
      debug!("输入源未声明帧率，使用 {} fps", DEFAULT_FRAME_RATE);
      DEFAULT_FRAME_RATE
    };
    let interval = Duration::from_secs_f64(1.0 / fps);

    // 持有控制锁直到记下线程 ID，线程的第一步就需要这把锁
    let mut control = lock(&self.shared.control);
    control.generation += 1;
    control.state = PlaybackState::Running;
    let generation = control.generation;

    let previous = lock(&self.shared.session).replace(Session {
      source: opened,
      cache: FrameCache::new(self.cache_capacity),
      targets,
      next_index: 0,
    });
    if let Some(mut previous) = previous {
      previous.source.close();
    }

    let shared = Arc::clone(&self.shared);
    let spawned = thread::Builder::new()
      .name(WORKER_NAME.to_string())
      .spawn(move || shared.run(generation, interval));

    match spawned {
      Ok(handle) => {
        control.worker_thread = Some(handle.thread().id());
        *worker = Some(handle);
        Ok(())
      }
      Err(e) => {
        control.state = PlaybackState::Idle;
        if let Some(mut session) = lock(&self.shared.session).take() {
          session.source.close();
        }
        error!("无法启动回放线程: {}", e);
        Err(PlaybackError::Spawn(e))
      }
    }
  }

  /// 暂停回放，已暂停时无操作
  pub fn pause(&self) -> Result<(), PlaybackError> {
    let mut control = lock(&self.shared.control);
    match control.state {
      PlaybackState::Running => {
        control.state = PlaybackState::Paused;
        info!("回放已暂停");
      }
      PlaybackState::Paused => {}
      _ => return Err(PlaybackError::NoSession),
    }
    drop(control);
    self.shared.wakeup.notify_all();
    Ok(())
  }

  /// 恢复回放，运行中时无操作
  pub fn resume(&self) -> Result<(), PlaybackError> {
    let mut control = lock(&self.shared.control);
    match control.state {
      PlaybackState::Paused => {
        control.state = PlaybackState::Running;
        info!("回放已恢复");
      }
      PlaybackState::Running => {}
      _ => return Err(PlaybackError::NoSession),
    }
    drop(control);
    self.shared.wakeup.notify_all();
    Ok(())
  }

  /// 定位到第 `index` 帧并立即发出该帧，不受暂停与帧率限制
  ///
  /// 成功后主循环从 `index + 1` 继续。定位或读取失败会报告到错误通道，
  /// 输入源退回原来的位置，会话继续。
  pub fn seek(&self, index: u64) -> Result<(), PlaybackError> {
    let generation = {
      let control = lock(&self.shared.control);
      if !control.state.is_active() {
        return Err(PlaybackError::NoSession);
      }
      control.generation
    };

    let shared = &self.shared;
    let mut guard = lock(&shared.session);
    let Some(session) = guard.as_mut() else {
      return Err(PlaybackError::NoSession);
    };

    let prior = session.next_index;
    let frame = match reposition(session, index) {
      Ok(frame) => frame,
      Err((e, moved)) => {
        let restored = if moved {
          session.source.seek(prior)
        } else {
          Ok(())
        };
        drop(guard);

        warn!("定位失败: {}", e);
        shared.sink.on_error(ErrorEvent::new(ErrorKind::Seek, e.to_string()).at_frame(index));
        if let Err(restore) = restored {
          error!("无法退回第 {} 帧: {}", prior, restore);
          shared
            .sink
            .on_error(ErrorEvent::new(ErrorKind::Seek, restore.to_string()).at_frame(prior));
        }
        return Err(PlaybackError::Source(e));
      }
    };

    let current = session.source.current_index();
    let produced = shared.produce(session, current, frame);
    drop(guard);

    match produced {
      Produced::Ready {
        frame,
        detections,
        from_cache,
      } => {
        if shared.is_current(generation) {
          shared.sink.on_frame(FrameResult {
            index: current,
            frame,
            detections,
            emission: Emission::Seek,
            from_cache,
          });
        }
      }
      Produced::Failed(event) => shared.sink.on_error(event),
    }
    Ok(())
  }

  /// 替换目标类别并清空缓存
  pub fn set_target_classes(&self, targets: TargetClasses) -> Result<(), PlaybackError> {
    let mut guard = lock(&self.shared.session);
    let session = guard.as_mut().ok_or(PlaybackError::NoSession)?;
    info!(
      "目标类别更新为 {:?}，清空 {} 个缓存帧",
      targets.iter().collect::<Vec<_>>(),
      session.cache.len()
    );
    session.targets = targets;
    session.cache.clear();
    Ok(())
  }

  /// 升序排列的已缓存帧序号
  pub fn cached_indices(&self) -> Vec<u64> {
    lock(&self.shared.session)
      .as_ref()
      .map(|session| session.cache.indices())
      .unwrap_or_default()
  }

  /// 停止回放并等待后台线程退出
  ///
  /// 在回放线程内（例如输出回调中）调用时只做标记，不等待。
  pub fn stop(&self) {
    let worker_thread = {
      let mut control = lock(&self.shared.control);
      if control.state != PlaybackState::Stopped {
        info!("停止回放 (当前状态 {:?})", control.state);
        control.state = PlaybackState::Stopped;
      }
      control.worker_thread
    };
    self.shared.wakeup.notify_all();

    if worker_thread == Some(thread::current().id()) {
      return;
    }

    let handle = lock(&self.worker).take();
    if let Some(handle) = handle {
      if handle.join().is_err() {
        error!("回放线程异常退出");
      }
    }
  }
}

impl<D: Detect + 'static, R: Render + 'static> Drop for PlaybackController<D, R> {
  fn drop(&mut self) {
    self.stop();
  }
}
