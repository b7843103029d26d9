// 该文件是 Shanan （山南西风） 项目的一部分。
// src/output/stats.rs - 目标计数与日志输出
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

use std::fmt;

use serde::Serialize;
use tracing::{debug, info};
use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme,
  model::{Detection, TargetClasses},
  output::{FrameResult, OutputError, ResultSink, SessionEnd},
};

/// 每个选中类别在一帧中的数量，按选择顺序排列
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ObjectCounts {
  counts: Vec<(String, usize)>,
}

impl ObjectCounts {
  /// 未选中的类别返回 0
  pub fn get(&self, label: &str) -> usize {
    let label = label.to_lowercase();
    self
      .counts
      .iter()
      .find(|(name, _)| *name == label)
      .map_or(0, |(_, count)| *count)
  }

  pub fn iter(&self) -> impl Iterator<Item = (&str, usize)> {
    self.counts.iter().map(|(name, count)| (name.as_str(), *count))
  }

  pub fn total(&self) -> usize {
    self.counts.iter().map(|(_, count)| count).sum()
  }
}

impl fmt::Display for ObjectCounts {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    for (i, (name, count)) in self.iter().enumerate() {
      if i > 0 {
        write!(f, ", ")?;
      }
      write!(f, "{}: {}", name, count)?;
    }
    Ok(())
  }
}

pub fn count_objects(detections: &[Detection], targets: &TargetClasses) -> ObjectCounts {
  let counts = targets
    .iter()
    .map(|target| {
      let count = detections
        .iter()
        .filter(|d| d.class_label.eq_ignore_ascii_case(target))
        .count();
      (target.to_string(), count)
    })
    .collect();
  ObjectCounts { counts }
}

/// 把每帧的目标数量写到日志，`log://console?classes=car,person`
pub struct LogSink {
  targets: TargetClasses,
}

impl LogSink {
  pub fn new(targets: TargetClasses) -> Self {
    Self { targets }
  }
}

impl FromUrlWithScheme for LogSink {
  const SCHEME: &'static str = "log";
}

impl FromUrl for LogSink {
  type Error = OutputError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      return Err(OutputError::SchemeMismatch(url.scheme().to_string()));
    }

    let targets = url
      .query_pairs()
      .filter(|(k, _)| k == "classes")
      .flat_map(|(_, v)| {
        v.split(',')
          .map(str::trim)
          .filter(|s| !s.is_empty())
          .map(String::from)
          .collect::<Vec<_>>()
      })
      .collect();
    Ok(Self::new(targets))
  }
}

impl ResultSink for LogSink {
  fn on_frame(&self, result: FrameResult) {
    debug!(
      "第 {} 帧 ({:?}, 缓存: {})",
      result.index, result.emission, result.from_cache
    );
    if self.targets.is_empty() {
      info!("第 {} 帧: 检测到 {} 个目标", result.index, result.detections.len());
    } else {
      let counts = count_objects(&result.detections, &self.targets);
      info!("第 {} 帧: {}", result.index, counts);
    }
  }

  fn on_session_end(&self, end: SessionEnd) {
    info!("回放结束: {:?}", end);
  }
}
