// 该文件是 Shanan （山南西风） 项目的一部分。
// src/config.rs - 模型预设与可选类别
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
  collections::BTreeMap,
  path::{Path, PathBuf},
};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};

use crate::model::DetectorConfig;

pub const DEFAULT_MODEL: &str = "YOLOv4";

/// 界面中可选的类别
pub const CLASSES: [&str; 16] = [
  "person",
  "bicycle",
  "car",
  "motorcycle",
  "motorbike",
  "bus",
  "train",
  "truck",
  "traffic light",
  "stop sign",
  "parking meter",
  "tv",
  "laptop",
  "mouse",
  "keyboard",
  "cell phone",
];

#[derive(Error, Debug)]
pub enum ConfigError {
  #[error("无法读取配置文件 {path}: {source}")]
  Io {
    path: PathBuf,
    source: std::io::Error,
  },
  #[error("配置文件格式错误: {0}")]
  Parse(#[from] toml::de::Error),
  #[error("未知模型: {0}")]
  UnknownModel(String),
}

/// 应用配置
///
/// ```toml
/// default_model = "YOLOv3"
/// classes = ["person", "car"]
///
/// [models.YOLOv3]
/// weights = "models/yolov3.onnx"
/// config = "models/yolov3.toml"
/// conf_threshold = 0.5
/// nms_threshold = 0.4
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppConfig {
  #[serde(default = "default_model_name")]
  pub default_model: String,
  #[serde(default = "default_models")]
  pub models: BTreeMap<String, DetectorConfig>,
  #[serde(default = "default_classes")]
  pub classes: Vec<String>,
  /// 启动时扫描的媒体目录
  #[serde(default)]
  pub media_dir: Option<PathBuf>,
}

fn default_model_name() -> String {
  DEFAULT_MODEL.to_string()
}

fn preset(version: &str) -> DetectorConfig {
  let dir = PathBuf::from("YOLO_MODEL").join(format!("YOLO_V{}", version));
  DetectorConfig {
    weights: dir.join(format!("yolov{}.onnx", version)),
    config: dir.join(format!("yolov{}.toml", version)),
    conf_threshold: 0.5,
    nms_threshold: 0.4,
  }
}

fn default_models() -> BTreeMap<String, DetectorConfig> {
  ["2", "3", "4"]
    .into_iter()
    .map(|version| (format!("YOLOv{}", version), preset(version)))
    .collect()
}

fn default_classes() -> Vec<String> {
  CLASSES.iter().map(|s| s.to_string()).collect()
}

impl Default for AppConfig {
  fn default() -> Self {
    Self {
      default_model: default_model_name(),
      models: default_models(),
      classes: default_classes(),
      media_dir: None,
    }
  }
}

impl AppConfig {
  /// 读取配置，相对路径以配置文件所在目录为基准
  pub fn load(path: &Path) -> Result<Self, ConfigError> {
    info!("加载配置文件: {}", path.display());
    let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
      path: path.to_path_buf(),
      source,
    })?;
    let mut config: AppConfig = toml::from_str(&text)?;

    if let Some(base) = path.parent() {
      config.resolve_paths(base);
    }
    debug!("可用模型: {:?}", config.models.keys().collect::<Vec<_>>());
    Ok(config)
  }

  fn resolve_paths(&mut self, base: &Path) {
    let resolve = |p: &mut PathBuf| {
      if p.is_relative() {
        *p = base.join(&*p);
      }
    };
    for model in self.models.values_mut() {
      resolve(&mut model.weights);
      resolve(&mut model.config);
    }
    if let Some(dir) = self.media_dir.as_mut() {
      resolve(dir);
    }
  }

  /// 模型名不区分大小写
  pub fn model(&self, name: &str) -> Result<&DetectorConfig, ConfigError> {
    self
      .models
      .get(name)
      .or_else(|| {
        self
          .models
          .iter()
          .find(|(key, _)| key.eq_ignore_ascii_case(name))
          .map(|(_, config)| config)
      })
      .ok_or_else(|| ConfigError::UnknownModel(name.to_string()))
  }

  pub fn default_detector(&self) -> Result<&DetectorConfig, ConfigError> {
    self.model(&self.default_model)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn builtin_presets() {
    let config = AppConfig::default();
    assert_eq!(
      config.models.keys().collect::<Vec<_>>(),
      vec!["YOLOv2", "YOLOv3", "YOLOv4"]
    );
    for model in config.models.values() {
      assert_eq!(model.conf_threshold, 0.5);
      assert_eq!(model.nms_threshold, 0.4);
    }
    assert_eq!(config.classes.len(), 16);
    assert_eq!(
      config.default_detector().unwrap().weights,
      PathBuf::from("YOLO_MODEL/YOLO_V4/yolov4.onnx")
    );
  }

  #[test]
  fn model_lookup_ignores_case() {
    let config = AppConfig::default();
    assert!(config.model("yolov3").is_ok());
    assert!(matches!(
      config.model("YOLOv9"),
      Err(ConfigError::UnknownModel(name)) if name == "YOLOv9"
    ));
  }

  #[test]
  fn load_resolves_relative_paths() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("shanan.toml");
    std::fs::write(
      &path,
      r#"
default_model = "tiny"
media_dir = "videos"

[models.tiny]
weights = "models/tiny.onnx"
config = "/etc/shanan/tiny.toml"
nms_threshold = 0.3
"#,
    )
    .unwrap();

    let config = AppConfig::load(&path).unwrap();
    let tiny = config.default_detector().unwrap();
    assert_eq!(tiny.weights, dir.path().join("models/tiny.onnx"));
    assert_eq!(tiny.config, PathBuf::from("/etc/shanan/tiny.toml"));
    assert_eq!(tiny.conf_threshold, 0.5);
    assert_eq!(tiny.nms_threshold, 0.3);
    assert_eq!(config.media_dir, Some(dir.path().join("videos")));
    // 未配置时使用内置类别
    assert_eq!(config.classes, default_classes());
  }

  #[test]
  fn load_reports_missing_file_and_bad_toml() {
    let dir = tempfile::tempdir().unwrap();
    assert!(matches!(
      AppConfig::load(&dir.path().join("missing.toml")),
      Err(ConfigError::Io { .. })
    ));

    let path = dir.path().join("bad.toml");
    std::fs::write(&path, "models = 3").unwrap();
    assert!(matches!(AppConfig::load(&path), Err(ConfigError::Parse(_))));
  }
}
