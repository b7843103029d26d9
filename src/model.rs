// 该文件是 Shanan （山南西风） 项目的一部分。
// src/model.rs - 模型
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

use image::imageops::{self, FilterType};
use serde::Serialize;
use thiserror::Error;

use crate::frame::Frame;

/// 每个锚点行前 5 个值: cx, cy, w, h, objectness
pub const ANCHOR_HEADER_LEN: usize = 5;

#[derive(Error, Debug)]
pub enum ModelError {
  #[error("模型加载错误: {0}")]
  Load(String),
  #[error("张量形状错误: {0}")]
  Shape(String),
  #[error("推理错误: {0}")]
  Inference(String),
}

/// 推理后端
///
/// 后端把预处理好的输入张量映射为逐锚点的原始输出，不保留调用间状态。
pub trait Model: Send + Sync {
  fn infer(&self, input: &Blob) -> Result<RawOutput, ModelError>;
}

impl<M: Model + ?Sized> Model for Box<M> {
  fn infer(&self, input: &Blob) -> Result<RawOutput, ModelError> {
    (**self).infer(input)
  }
}

/// 模型输入张量，布局为 1×3×H×W，RGB，数值缩放到 [0, 1]
#[derive(Debug, Clone)]
pub struct Blob {
  data: Vec<f32>,
  width: u32,
  height: u32,
}

impl Blob {
  /// 把帧直接拉伸到模型输入尺寸（不做 letterbox）并归一化
  pub fn from_frame(frame: &Frame, width: u32, height: u32) -> Self {
    let rgb = frame.to_rgb();
    let resized = imageops::resize(rgb.image(), width, height, FilterType::Triangle);

    let plane = (width as usize) * (height as usize);
    let mut data = vec![0f32; plane * 3];
    for (idx, pixel) in resized.pixels().enumerate() {
      for c in 0..3 {
        data[c * plane + idx] = pixel[c] as f32 / 255.0;
      }
    }

    Self {
      data,
      width,
      height,
    }
  }

  pub fn width(&self) -> u32 {
    self.width
  }

  pub fn height(&self) -> u32 {
    self.height
  }

  /// [N, C, H, W]
  pub fn shape(&self) -> [usize; 4] {
    [1, 3, self.height as usize, self.width as usize]
  }

  pub fn as_slice(&self) -> &[f32] {
    &self.data
  }
}

/// 一个输出层：行优先矩阵，每行是一个锚点
#[derive(Debug, Clone)]
pub struct RawLayer {
  data: Vec<f32>,
  row_len: usize,
}

impl RawLayer {
  pub fn new(data: Vec<f32>, row_len: usize) -> Result<Self, ModelError> {
    if row_len <= ANCHOR_HEADER_LEN {
      return Err(ModelError::Shape(format!(
        "每个锚点至少需要 {} 个值, 实际为 {}",
        ANCHOR_HEADER_LEN + 1,
        row_len
      )));
    }
    if data.len() % row_len != 0 {
      return Err(ModelError::Shape(format!(
        "输出长度 {} 不是行长度 {} 的整数倍",
        data.len(),
        row_len
      )));
    }
    Ok(Self { data, row_len })
  }

  pub fn row_len(&self) -> usize {
    self.row_len
  }

  pub fn anchors(&self) -> impl Iterator<Item = &[f32]> + '_ {
    self.data.chunks_exact(self.row_len)
  }
}

/// 模型的原始输出，可能包含多个检测头
#[derive(Debug, Clone, Default)]
pub struct RawOutput {
  layers: Vec<RawLayer>,
}

impl From<RawLayer> for RawOutput {
  fn from(layer: RawLayer) -> Self {
    Self {
      layers: vec![layer],
    }
  }
}

impl RawOutput {
  pub fn new(layers: Vec<RawLayer>) -> Self {
    Self { layers }
  }

  pub fn layers(&self) -> &[RawLayer] {
    &self.layers
  }

  /// 按层顺序遍历所有锚点
  pub fn anchors(&self) -> impl Iterator<Item = &[f32]> + '_ {
    self.layers.iter().flat_map(RawLayer::anchors)
  }
}

/// 像素坐标下的边界框，(x, y) 为左上角
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct BoundingBox {
  pub x: i32,
  pub y: i32,
  pub w: i32,
  pub h: i32,
}

impl BoundingBox {
  pub fn new(x: i32, y: i32, w: i32, h: i32) -> Self {
    Self { x, y, w, h }
  }

  pub fn area(&self) -> f32 {
    (self.w.max(0) as f32) * (self.h.max(0) as f32)
  }

  pub fn iou(&self, other: &BoundingBox) -> f32 {
    let x1 = self.x.max(other.x);
    let y1 = self.y.max(other.y);
    let x2 = (self.x + self.w).min(other.x + other.w);
    let y2 = (self.y + self.h).min(other.y + other.h);

    let intersection = ((x2 - x1).max(0) as f32) * ((y2 - y1).max(0) as f32);
    let union = self.area() + other.area() - intersection;

    if union > 0.0 {
      intersection / union
    } else {
      0.0
    }
  }
}

/// 检测结果
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Detection {
  pub class_label: String,
  /// 置信度，范围 [0, 1]
  pub confidence: f32,
  #[serde(rename = "box")]
  pub bbox: BoundingBox,
}

/// 用户选择的目标类别集合，比较时忽略大小写，保持选择的顺序
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TargetClasses {
  labels: Vec<String>,
}

impl<S: AsRef<str>> FromIterator<S> for TargetClasses {
  fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
    let mut labels: Vec<String> = Vec::new();
    for label in iter {
      let label = label.as_ref().trim().to_lowercase();
      if !label.is_empty() && !labels.contains(&label) {
        labels.push(label);
      }
    }
    Self { labels }
  }
}

impl TargetClasses {
  pub fn contains(&self, label: &str) -> bool {
    self.labels.contains(&label.to_lowercase())
  }

  pub fn iter(&self) -> impl Iterator<Item = &str> + '_ {
    self.labels.iter().map(String::as_str)
  }

  pub fn len(&self) -> usize {
    self.labels.len()
  }

  pub fn is_empty(&self) -> bool {
    self.labels.is_empty()
  }
}

mod detector;
mod postprocess;
#[cfg(feature = "model_tract")]
mod tract;

pub use self::detector::{
  DEFAULT_INPUT_SIZE, Detect, Detector, DetectorConfig, DetectorError, ModelSpec,
};
pub use self::postprocess::{Postprocessor, non_max_suppression};
#[cfg(feature = "model_tract")]
pub use self::tract::TractModel;
