// 该文件是 Shanan （山南西风） 项目的一部分。
// src/args.rs - 命令行参数
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

use clap::Parser;
use url::Url;

/// Shanan 检测回放
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
  /// 配置文件（TOML），缺省使用内置的 YOLOv2/3/4 预设
  #[arg(long, value_name = "FILE")]
  pub config: Option<PathBuf>,

  /// 模型预设名，缺省为配置中的 default_model
  #[arg(long, value_name = "NAME")]
  pub model: Option<String>,

  /// 覆盖预设的置信度阈值 (0.0 - 1.0)
  #[arg(long, value_name = "THRESHOLD")]
  pub confidence: Option<f32>,

  /// 覆盖预设的 NMS 阈值 (0.0 - 1.0)
  #[arg(long, value_name = "THRESHOLD")]
  pub nms_threshold: Option<f32>,

  /// 输入来源
  /// - 图像序列: images:///path/to/dir?fps=25
  /// - 单张图片: image:///path/to/file.jpg
  /// - 视频文件: gst://file/path/to/video.mp4
  /// - 摄像头: gst://camera/dev/video0?width=640&height=480&fps=30
  ///
  /// 缺省时播放媒体目录中的第一个文件
  #[arg(long, value_name = "SOURCE")]
  pub input: Option<Url>,

  /// 媒体目录，缺省为配置中的 media_dir 或 ./videos
  #[arg(long, value_name = "DIR")]
  pub media_dir: Option<PathBuf>,

  /// 列出媒体目录中的文件后退出
  #[arg(long)]
  pub list_media: bool,

  /// 额外输出，可重复
  /// - 日志计数: log://console?classes=car,person
  /// - 目录记录: folder:///path/to/dir?record=txt|json&always
  #[arg(long, value_name = "OUTPUT")]
  pub output: Vec<Url>,

  /// 目标类别，逗号分隔，缺省为配置中的全部类别
  #[arg(long, value_name = "CLASSES", value_delimiter = ',')]
  pub classes: Vec<String>,

  /// 启动后定位到的帧，可重复
  #[arg(long, value_name = "INDEX")]
  pub seek: Vec<u64>,

  /// 回放的最大帧数，定位发出的帧不计入
  #[arg(long, value_name = "FRAME_NUMBER")]
  pub frame_number: Option<usize>,

  /// 标签字体文件（TTF/OTF），缺省只绘制标签背景
  #[arg(long, value_name = "FILE")]
  pub font: Option<PathBuf>,

  /// 帧缓存容量
  #[arg(long, default_value_t = shanan_player::cache::DEFAULT_CACHE_CAPACITY)]
  pub cache_capacity: usize,

  /// 结果队列长度，满时丢帧
  #[arg(long, default_value_t = 32)]
  pub queue: usize,
}
