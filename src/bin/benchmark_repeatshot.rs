// 该文件是 Shanan （山南西风） 项目的一部分。
// src/bin/benchmark_repeatshot.rs - 单帧重复推理测速
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

use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;
use url::Url;

use shanan_player::{
  config::AppConfig,
  input::OpenSource,
  model::{Detector, Model, TargetClasses},
  output::{ColorTable, Draw},
  task::{RepeatShotTask, Task},
};
use tracing::info;

/// 对单帧重复检测，统计平均推理时间
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
  /// 配置文件（TOML）
  #[arg(long, value_name = "FILE")]
  pub config: Option<PathBuf>,
  /// 模型预设名
  #[arg(long, value_name = "NAME")]
  pub model: Option<String>,
  /// 输入来源，只读取第一帧
  #[arg(long, value_name = "SOURCE")]
  pub input: Url,
  /// 重复次数
  #[arg(long, default_value_t = RepeatShotTask::DEFAULT_REPEAT)]
  pub repeat: usize,
}

fn main() -> Result<()> {
  tracing_subscriber::fmt::init();

  let args = Args::parse();

  let config = match &args.config {
    Some(path) => AppConfig::load(path)?,
    None => AppConfig::default(),
  };
  let model_name = args.model.as_deref().unwrap_or(&config.default_model);

  info!("模型: {}", model_name);
  info!("输入来源: {}", args.input);
  info!("重复次数: {}", args.repeat);

  let detector = Detector::<Box<dyn Model>>::load(config.model(model_name)?)?;
  let colors = ColorTable::new(detector.labels());
  let targets: TargetClasses = config.classes.iter().collect();
  let input = args.input.open()?;

  RepeatShotTask::new(targets, colors)
    .with_repeat(args.repeat)
    .run_task(input, &detector, &Draw::default())?;

  Ok(())
}
