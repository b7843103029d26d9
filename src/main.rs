// 该文件是 Shanan （山南西风） 项目的一部分。
// src/main.rs - 检测回放主程序
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

mod args;

use std::path::PathBuf;

use anyhow::{Result, bail};
use clap::Parser;
use tracing::{info, warn};

use shanan_player::{
  FromUrl,
  config::AppConfig,
  input::{OpenSource, discover_media, media_url},
  model::{Detector, Model, TargetClasses},
  output::{ChannelSink, ColorTable, Draw, OutputWrapper, ResultSink, SessionEnd},
  playback::PlaybackController,
  task::{ContinuousTask, Task},
};

fn main() -> Result<()> {
  tracing_subscriber::fmt::init();

  let args = args::Args::parse();

  let config = match &args.config {
    Some(path) => AppConfig::load(path)?,
    None => AppConfig::default(),
  };

  let media_dir = args
    .media_dir
    .clone()
    .or_else(|| config.media_dir.clone())
    .unwrap_or_else(|| PathBuf::from("videos"));

  if args.list_media {
    for path in discover_media(&media_dir)? {
      println!("{}", path.display());
    }
    return Ok(());
  }

  let input = match args.input {
    Some(url) => url,
    None => {
      let files = discover_media(&media_dir)?;
      info!("媒体目录 {} 中有 {} 个文件", media_dir.display(), files.len());
      match files.first() {
        Some(first) => media_url(first)?,
        None => bail!("没有指定输入，媒体目录 {} 中也没有文件", media_dir.display()),
      }
    }
  };

  let model_name = args.model.as_deref().unwrap_or(&config.default_model);
  let mut detector_config = config.model(model_name)?.clone();
  if let Some(confidence) = args.confidence {
    detector_config.conf_threshold = confidence;
  }
  if let Some(nms_threshold) = args.nms_threshold {
    detector_config.nms_threshold = nms_threshold;
  }

  info!("模型: {}", model_name);
  info!("输入来源: {}", input);
  info!(
    "置信度阈值: {}, NMS 阈值: {}",
    detector_config.conf_threshold, detector_config.nms_threshold
  );

  let detector = Detector::<Box<dyn Model>>::load(&detector_config)?;
  let colors = ColorTable::new(detector.labels());

  let targets: TargetClasses = if args.classes.is_empty() {
    config.classes.iter().collect()
  } else {
    args.classes.iter().collect()
  };
  for target in targets.iter() {
    if !detector.labels().iter().any(|l| l.eq_ignore_ascii_case(target)) {
      warn!("模型中没有类别 {}", target);
    }
  }

  let draw = match &args.font {
    Some(path) => Draw::with_font_file(path)?,
    None => Draw::default(),
  };

  let (channel, events) = ChannelSink::bounded(args.queue);
  let mut sinks: Vec<Box<dyn ResultSink>> = vec![Box::new(channel)];
  for url in &args.output {
    info!("输出: {}", url);
    sinks.push(Box::new(OutputWrapper::from_url(url)?));
  }

  let player =
    PlaybackController::new(detector, draw, colors, sinks).with_cache_capacity(args.cache_capacity);

  let end = ContinuousTask::default()
    .with_frame_number(args.frame_number)
    .with_seeks(args.seek)
    .with_targets(targets)
    .with_interrupt_handler()
    .run_task(&input as &dyn OpenSource, &player, events)?;

  if end == SessionEnd::Failed {
    bail!("回放因读取错误终止");
  }
  Ok(())
}
