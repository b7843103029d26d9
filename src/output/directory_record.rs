// 该文件是 Shanan （山南西风） 项目的一部分。
// src/output/directory_record.rs - 目录记录输出
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

use chrono::{DateTime, Datelike, Utc};
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, error, info};
use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme,
  model::Detection,
  output::{FrameResult, ResultSink, SessionEnd},
};

#[derive(Error, Debug)]
pub enum DirectoryRecordError {
  #[error("URI 方案不匹配")]
  SchemeMismatch,
  #[error("无效的记录格式: {0}")]
  InvalidFormat(String),
  #[error("图像错误: {0}")]
  ImageError(#[from] image::ImageError),
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
  #[error("JSON 错误: {0}")]
  JsonError(#[from] serde_json::Error),
}

/// 与图片同名的检测记录
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordFormat {
  /// 每行 `label, confidence, x, y, w, h`
  Text,
  Json,
}

impl RecordFormat {
  fn extension(self) -> &'static str {
    match self {
      RecordFormat::Text => "txt",
      RecordFormat::Json => "json",
    }
  }
}

#[derive(Serialize)]
struct RecordFile<'a> {
  frame_index: u64,
  detections: &'a [Detection],
}

/// 把发出的帧保存为 PNG
///
/// `folder:///data/records?record=json&always`，文件位于 `YYYY/MM/DD/` 子目录，
/// 以会话开始时间与帧序号命名。默认只保存有检测结果的帧。
pub struct DirectoryRecordSink {
  directory: PathBuf,
  format: Option<RecordFormat>,
  always: bool,
  started: DateTime<Utc>,
}

impl FromUrlWithScheme for DirectoryRecordSink {
  const SCHEME: &'static str = "folder";
}

impl FromUrl for DirectoryRecordSink {
  type Error = DirectoryRecordError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      return Err(DirectoryRecordError::SchemeMismatch);
    }

    let mut format = None;
    for (k, v) in url.query_pairs() {
      if k == "record" {
        format = Some(match v.as_ref() {
          "txt" | "text" | "name" => RecordFormat::Text,
          "json" => RecordFormat::Json,
          other => return Err(DirectoryRecordError::InvalidFormat(other.to_string())),
        });
      }
    }
    let always = url.query_pairs().any(|(k, _)| k == "always");

    let directory = urlencoding::decode(url.path())
      .map_err(|e| DirectoryRecordError::InvalidFormat(e.to_string()))?
      .into_owned();

    Ok(Self::new(directory, format, always))
  }
}

impl DirectoryRecordSink {
  pub fn new(directory: impl Into<PathBuf>, format: Option<RecordFormat>, always: bool) -> Self {
    Self {
      directory: directory.into(),
      format,
      always,
      started: Utc::now(),
    }
  }

  pub fn directory(&self) -> &Path {
    &self.directory
  }

  fn frame_path(&self, index: u64) -> Result<PathBuf, DirectoryRecordError> {
    let now = Utc::now();
    let directory = self
      .directory
      .join(now.year().to_string())
      .join(format!("{:02}", now.month()))
      .join(format!("{:02}", now.day()));
    std::fs::create_dir_all(&directory)?;

    Ok(directory.join(format!(
      "{}-{:06}.png",
      self.started.format("%H-%M-%S"),
      index
    )))
  }

  /// 保存一帧，返回图片路径；被跳过时返回 `None`
  pub fn record(&self, result: &FrameResult) -> Result<Option<PathBuf>, DirectoryRecordError> {
    if !self.always && result.detections.is_empty() {
      return Ok(None);
    }

    let path = self.frame_path(result.index)?;
    result.frame.to_rgb().image().save(&path)?;

    if let Some(format) = self.format {
      let record_path = path.with_extension(format.extension());
      let content = match format {
        RecordFormat::Text => text_record(&result.detections),
        RecordFormat::Json => serde_json::to_string_pretty(&RecordFile {
          frame_index: result.index,
          detections: &result.detections,
        })?,
      };
      std::fs::write(record_path, content)?;
    }

    debug!("已保存第 {} 帧: {}", result.index, path.display());
    Ok(Some(path))
  }
}

fn text_record(detections: &[Detection]) -> String {
  detections
    .iter()
    .map(|d| {
      format!(
        "{}, {:.4}, {}, {}, {}, {}",
        d.class_label, d.confidence, d.bbox.x, d.bbox.y, d.bbox.w, d.bbox.h
      )
    })
    .collect::<Vec<_>>()
    .join("\n")
}

impl ResultSink for DirectoryRecordSink {
  fn on_frame(&self, result: FrameResult) {
    if let Err(e) = self.record(&result) {
      error!("保存第 {} 帧失败: {}", result.index, e);
    }
  }

  fn on_session_end(&self, end: SessionEnd) {
    info!("记录结束 ({:?}): {}", end, self.directory.display());
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::model::BoundingBox;

  #[test]
  fn text_record_lines() {
    let detections = vec![
      Detection {
        class_label: "car".to_string(),
        confidence: 0.5,
        bbox: BoundingBox::new(1, 2, 3, 4),
      },
      Detection {
        class_label: "person".to_string(),
        confidence: 0.25,
        bbox: BoundingBox::new(-1, 0, 10, 20),
      },
    ];
    assert_eq!(
      text_record(&detections),
      "car, 0.5000, 1, 2, 3, 4\nperson, 0.2500, -1, 0, 10, 20"
    );
  }

  #[test]
  fn url_options() {
    let url = Url::parse("folder:///tmp/rec%20ords?record=json&always").unwrap();
    let sink = DirectoryRecordSink::from_url(&url).unwrap();
    assert_eq!(sink.directory(), Path::new("/tmp/rec ords"));
    assert_eq!(sink.format, Some(RecordFormat::Json));
    assert!(sink.always);

    let url = Url::parse("folder:///tmp/records?record=xml").unwrap();
    assert!(matches!(
      DirectoryRecordSink::from_url(&url),
      Err(DirectoryRecordError::InvalidFormat(_))
    ));
  }
}
