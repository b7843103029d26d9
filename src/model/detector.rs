// 该文件是 Shanan （山南西风） 项目的一部分。
// src/model/detector.rs - 目标检测器
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

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};

use crate::{
  frame::Frame,
  model::{Blob, Detection, Model, ModelError, Postprocessor, TargetClasses},
};

/// 模型默认输入边长
pub const DEFAULT_INPUT_SIZE: u32 = 416;

#[derive(Error, Debug)]
pub enum DetectorError {
  #[error("模型加载失败: {0}")]
  ModelLoad(String),
  #[error("推理失败: {0}")]
  Inference(#[from] ModelError),
}

impl DetectorError {
  fn load(path: &Path, reason: impl std::fmt::Display) -> Self {
    DetectorError::ModelLoad(format!("{}: {}", path.display(), reason))
  }
}

/// 检测接口
///
/// 回放控制器只依赖这个接口，测试中可以用桩实现替换真实模型。
pub trait Detect: Send + Sync {
  fn detect(
    &self,
    frame: &Frame,
    target_classes: &TargetClasses,
  ) -> Result<Vec<Detection>, DetectorError>;
}

/// 检测器构造参数
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectorConfig {
  /// 权重文件路径
  pub weights: PathBuf,
  /// 模型配置文件路径（TOML）
  pub config: PathBuf,
  #[serde(default = "default_conf_threshold")]
  pub conf_threshold: f32,
  #[serde(default = "default_nms_threshold")]
  pub nms_threshold: f32,
}

fn default_conf_threshold() -> f32 {
  0.5
}

fn default_nms_threshold() -> f32 {
  0.4
}

/// 模型配置文件内容
///
/// ```toml
/// input_width = 416
/// input_height = 416
/// labels_file = "coco.names"
/// ```
#[derive(Debug, Clone, Deserialize)]
pub struct ModelSpec {
  #[serde(default = "default_input_size")]
  pub input_width: u32,
  #[serde(default = "default_input_size")]
  pub input_height: u32,
  #[serde(default)]
  pub labels: Vec<String>,
  /// 每行一个类别名的标签文件，相对路径以配置文件所在目录为基准
  pub labels_file: Option<PathBuf>,
}

fn default_input_size() -> u32 {
  DEFAULT_INPUT_SIZE
}

impl ModelSpec {
  pub fn load(path: &Path) -> Result<Self, DetectorError> {
    let text = std::fs::read_to_string(path).map_err(|e| DetectorError::load(path, e))?;
    let mut spec: ModelSpec = toml::from_str(&text).map_err(|e| DetectorError::load(path, e))?;

    if let Some(labels_file) = spec.labels_file.take() {
      let labels_path = match path.parent() {
        Some(dir) if labels_file.is_relative() => dir.join(&labels_file),
        _ => labels_file,
      };
      let names =
        std::fs::read_to_string(&labels_path).map_err(|e| DetectorError::load(&labels_path, e))?;
      spec.labels.extend(parse_names(&names));
    }

    if spec.labels.is_empty() {
      return Err(DetectorError::load(path, "未定义任何类别标签"));
    }
    if spec.input_width == 0 || spec.input_height == 0 {
      return Err(DetectorError::load(path, "模型输入尺寸必须大于 0"));
    }

    Ok(spec)
  }
}

fn parse_names(text: &str) -> impl Iterator<Item = String> + '_ {
  text
    .lines()
    .map(str::trim)
    .filter(|line| !line.is_empty())
    .map(String::from)
}

/// 目标检测器
///
/// 持有加载好的模型与后处理器，调用之间不保存状态。
pub struct Detector<M> {
  model: M,
  postprocessor: Postprocessor,
  input_width: u32,
  input_height: u32,
  conf_threshold: f32,
  nms_threshold: f32,
}

impl<M: Model> Detector<M> {
  pub fn with_model(model: M, labels: Vec<String>, conf_threshold: f32, nms_threshold: f32) -> Self {
    Self {
      model,
      postprocessor: Postprocessor::new(labels),
      input_width: DEFAULT_INPUT_SIZE,
      input_height: DEFAULT_INPUT_SIZE,
      conf_threshold,
      nms_threshold,
    }
  }

  pub fn input_size(mut self, width: u32, height: u32) -> Self {
    self.input_width = width;
    self.input_height = height;
    self
  }

  pub fn labels(&self) -> &[String] {
    self.postprocessor.labels()
  }

  pub fn conf_threshold(&self) -> f32 {
    self.conf_threshold
  }

  pub fn nms_threshold(&self) -> f32 {
    self.nms_threshold
  }
}

impl Detector<Box<dyn Model>> {
  /// 按配置加载模型
  pub fn load(config: &DetectorConfig) -> Result<Self, DetectorError> {
    for (name, value) in [
      ("conf_threshold", config.conf_threshold),
      ("nms_threshold", config.nms_threshold),
    ] {
      if !(0.0..=1.0).contains(&value) {
        return Err(DetectorError::ModelLoad(format!(
          "{} 必须在 0 到 1 之间, 实际为 {}",
          name, value
        )));
      }
    }

    info!("加载模型配置: {}", config.config.display());
    let spec = ModelSpec::load(&config.config)?;
    debug!(
      "模型输入 {}x{}, 类别数 {}",
      spec.input_width,
      spec.input_height,
      spec.labels.len()
    );

    info!("加载模型权重: {}", config.weights.display());
    let metadata =
      std::fs::metadata(&config.weights).map_err(|e| DetectorError::load(&config.weights, e))?;
    if !metadata.is_file() {
      return Err(DetectorError::load(&config.weights, "不是普通文件"));
    }
    debug!(
      "权重文件大小: {:.2} MB",
      metadata.len() as f64 / (1024.0 * 1024.0)
    );

    let model = load_backend(&config.weights, &spec)?;
    info!("模型加载完成");

    Ok(
      Detector::with_model(model, spec.labels, config.conf_threshold, config.nms_threshold)
        .input_size(spec.input_width, spec.input_height),
    )
  }
}

#[cfg(feature = "model_tract")]
fn load_backend(weights: &Path, spec: &ModelSpec) -> Result<Box<dyn Model>, DetectorError> {
  let model = crate::model::TractModel::load(weights, spec.input_width, spec.input_height)
    .map_err(|e| DetectorError::load(weights, e))?;
  Ok(Box::new(model))
}

#[cfg(not(feature = "model_tract"))]
fn load_backend(weights: &Path, _spec: &ModelSpec) -> Result<Box<dyn Model>, DetectorError> {
  Err(DetectorError::load(
    weights,
    "未启用推理后端，请使用 model_tract 特性编译",
  ))
}

impl<M: Model> Detect for Detector<M> {
  fn detect(
    &self,
    frame: &Frame,
    target_classes: &TargetClasses,
  ) -> Result<Vec<Detection>, DetectorError> {
    let blob = Blob::from_frame(frame, self.input_width, self.input_height);

    let now = std::time::Instant::now();
    let raw = self.model.infer(&blob)?;
    debug!("推理完成，耗时: {:.2?}", now.elapsed());

    Ok(self.postprocessor.process(
      &raw,
      frame.dims(),
      target_classes,
      self.conf_threshold,
      self.nms_threshold,
    ))
  }
}

#[cfg(test)]
mod tests {
  use std::sync::atomic::{AtomicUsize, Ordering};

  use super::*;
  use crate::model::{RawLayer, RawOutput};

  struct FixedModel {
    row: Vec<f32>,
    calls: AtomicUsize,
  }

  impl Model for FixedModel {
    fn infer(&self, input: &Blob) -> Result<RawOutput, ModelError> {
      assert_eq!(input.shape(), [1, 3, 416, 416]);
      self.calls.fetch_add(1, Ordering::SeqCst);
      Ok(RawLayer::new(self.row.clone(), self.row.len())?.into())
    }
  }

  struct FailingModel;

  impl Model for FailingModel {
    fn infer(&self, _input: &Blob) -> Result<RawOutput, ModelError> {
      Err(ModelError::Inference("设备丢失".to_string()))
    }
  }

  fn frame() -> Frame {
    Frame::from(image::RgbImage::new(64, 32))
  }

  #[test]
  fn detect_scales_boxes_to_frame() {
    let model = FixedModel {
      row: vec![0.5, 0.5, 0.5, 0.5, 1.0, 0.2, 0.8],
      calls: AtomicUsize::new(0),
    };
    let detector = Detector::with_model(model, vec!["person".into(), "car".into()], 0.5, 0.4);
    let targets: TargetClasses = ["car"].into_iter().collect();

    let detections = detector.detect(&frame(), &targets).unwrap();
    assert_eq!(detections.len(), 1);
    assert_eq!(detections[0].bbox, crate::model::BoundingBox::new(16, 8, 32, 16));
    assert_eq!(detector.model.calls.load(Ordering::SeqCst), 1);
  }

  #[test]
  fn inference_failure_propagates() {
    let detector = Detector::with_model(FailingModel, vec!["car".into()], 0.5, 0.4);
    let targets: TargetClasses = ["car"].into_iter().collect();
    let err = detector.detect(&frame(), &targets).unwrap_err();
    assert!(matches!(err, DetectorError::Inference(_)));
  }

  #[test]
  fn load_rejects_missing_config() {
    let dir = tempfile::tempdir().unwrap();
    let config = DetectorConfig {
      weights: dir.path().join("model.onnx"),
      config: dir.path().join("missing.toml"),
      conf_threshold: 0.5,
      nms_threshold: 0.4,
    };
    assert!(matches!(
      Detector::load(&config),
      Err(DetectorError::ModelLoad(_))
    ));
  }

  #[test]
  fn load_rejects_out_of_range_threshold() {
    let dir = tempfile::tempdir().unwrap();
    let config = DetectorConfig {
      weights: dir.path().join("model.onnx"),
      config: dir.path().join("model.toml"),
      conf_threshold: 1.5,
      nms_threshold: 0.4,
    };
    assert!(matches!(
      Detector::load(&config),
      Err(DetectorError::ModelLoad(_))
    ));
  }

  #[test]
  fn load_rejects_missing_weights() {
    let dir = tempfile::tempdir().unwrap();
    let config_path = dir.path().join("model.toml");
    std::fs::write(&config_path, "labels = [\"person\"]\n").unwrap();
    let config = DetectorConfig {
      weights: dir.path().join("missing.onnx"),
      config: config_path,
      conf_threshold: 0.5,
      nms_threshold: 0.4,
    };
    assert!(matches!(
      Detector::load(&config),
      Err(DetectorError::ModelLoad(_))
    ));
  }

  #[test]
  fn model_spec_reads_labels_file() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("coco.names"), "person\n\n bicycle \ncar\n").unwrap();
    let config_path = dir.path().join("model.toml");
    std::fs::write(
      &config_path,
      "input_width = 320\nlabels_file = \"coco.names\"\n",
    )
    .unwrap();

    let spec = ModelSpec::load(&config_path).unwrap();
    assert_eq!(spec.input_width, 320);
    assert_eq!(spec.input_height, DEFAULT_INPUT_SIZE);
    assert_eq!(spec.labels, vec!["person", "bicycle", "car"]);
  }

  #[test]
  fn model_spec_rejects_malformed_toml() {
    let dir = tempfile::tempdir().unwrap();
    let config_path = dir.path().join("model.toml");
    std::fs::write(&config_path, "labels = [\"person\"\n").unwrap();
    assert!(ModelSpec::load(&config_path).is_err());
  }
}
