// 该文件是 Shanan （山南西风） 项目的一部分。
// src/model/postprocess.rs - 检测结果后处理
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

use std::sync::Arc;

use tracing::debug;

use crate::model::{ANCHOR_HEADER_LEN, BoundingBox, Detection, RawOutput, TargetClasses};

/// 把逐锚点的原始输出转换为带标签的检测框
#[derive(Debug, Clone)]
pub struct Postprocessor {
  labels: Arc<[String]>,
}

impl Postprocessor {
  pub fn new(labels: Vec<String>) -> Self {
    Self {
      labels: labels.into(),
    }
  }

  pub fn labels(&self) -> &[String] {
    &self.labels
  }

  pub fn process(
    &self,
    raw: &RawOutput,
    frame_dims: (u32, u32),
    target_classes: &TargetClasses,
    conf_threshold: f32,
    nms_threshold: f32,
  ) -> Vec<Detection> {
    let mut candidates = Vec::new();

    for anchor in raw.anchors() {
      let scores = &anchor[ANCHOR_HEADER_LEN..];

      // 与 argmax 一致：取第一个最大值
      let (class_id, score) = {
        let mut best = 0usize;
        for (idx, &s) in scores.iter().enumerate() {
          if s > scores[best] {
            best = idx;
          }
        }
        (best, scores[best])
      };

      if !(score > conf_threshold) {
        continue;
      }

      let Some(label) = self.labels.get(class_id) else {
        continue;
      };
      if !target_classes.contains(label) {
        continue;
      }

      candidates.push(Detection {
        class_label: label.clone(),
        confidence: score,
        bbox: decode_box(anchor, frame_dims),
      });
    }

    debug!("置信度过滤后剩余 {} 个候选框", candidates.len());

    if candidates.is_empty() {
      return candidates;
    }

    let detections = non_max_suppression(candidates, nms_threshold);
    debug!("NMS 后剩余 {} 个检测框", detections.len());
    detections
  }
}

/// 归一化的中心点格式 → 像素坐标左上角格式，逐步截断为整数
fn decode_box(anchor: &[f32], (width, height): (u32, u32)) -> BoundingBox {
  let (width, height) = (width as f32, height as f32);

  let center_x = (anchor[0] * width) as i32;
  let center_y = (anchor[1] * height) as i32;
  let w = (anchor[2] * width) as i32;
  let h = (anchor[3] * height) as i32;

  let x = (center_x as f32 - w as f32 / 2.0) as i32;
  let y = (center_y as f32 - h as f32 / 2.0) as i32;

  BoundingBox::new(x, y, w, h)
}

/// 与类别无关的贪心非极大值抑制
///
/// 按置信度降序（相同置信度保持输入顺序）依次选取，
/// 抑制与已选框 IoU 大于 `nms_threshold` 的框。输出保持选取顺序。
pub fn non_max_suppression(mut candidates: Vec<Detection>, nms_threshold: f32) -> Vec<Detection> {
  candidates.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));

  let mut suppressed = vec![false; candidates.len()];
  let mut kept = Vec::new();

  for i in 0..candidates.len() {
    if suppressed[i] {
      continue;
    }
    for j in (i + 1)..candidates.len() {
      if !suppressed[j] && candidates[i].bbox.iou(&candidates[j].bbox) > nms_threshold {
        suppressed[j] = true;
      }
    }
    kept.push(i);
  }

  let mut slots: Vec<Option<Detection>> = candidates.into_iter().map(Some).collect();
  kept
    .into_iter()
    .filter_map(|i| slots[i].take())
    .collect()
}
