// 该文件是 Shanan （山南西风） 项目的一部分。
// src/output/draw.rs - 目标检测结果可视化
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

use std::{collections::HashMap, path::Path};

use ab_glyph::{FontArc, PxScale};
use image::{Rgb, RgbImage};
use imageproc::{
  drawing::{draw_filled_rect_mut, draw_hollow_rect_mut, draw_text_mut, text_size},
  rect::Rect,
};
use thiserror::Error;
use tracing::info;

use crate::{
  frame::{ChannelOrder, Frame},
  model::Detection,
};

// 文本渲染常量
const LABEL_FONT_SIZE: f32 = 28.0;
const LABEL_TEXT_HEIGHT: u32 = 20;
const LABEL_CHAR_WIDTH: f32 = 14.0; // 没有字体时按字符数估算宽度
const LABEL_PADDING: i32 = 5;
const BORDER_THICKNESS: i32 = 3;
const OVERLAY_ALPHA: f32 = 0.3;
const TEXT_COLOR: Rgb<u8> = Rgb([255, 255, 255]);
const FALLBACK_COLOR: Rgb<u8> = Rgb([0, 0, 0]);

#[derive(Error, Debug)]
pub enum DrawError {
  #[error("无法读取字体文件: {0}")]
  Io(#[from] std::io::Error),
  #[error("无法解析字体: {0}")]
  InvalidFont(String),
  #[error("帧尺寸为 0")]
  EmptyFrame,
}

/// 渲染接口：输入帧不变，返回绘制后的新帧
pub trait Render: Send + Sync {
  type Error: std::error::Error + Send + Sync + 'static;

  fn render(
    &self,
    frame: &Frame,
    detections: &[Detection],
    colors: &ColorTable,
  ) -> Result<Frame, Self::Error>;
}

/// 类别名（小写）到 RGB 颜色的映射
#[derive(Debug, Clone, Default)]
pub struct ColorTable {
  colors: HashMap<String, Rgb<u8>>,
}

impl ColorTable {
  /// 在色环上均匀取色
  pub fn new<I, S>(classes: I) -> Self
  where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
  {
    let names: Vec<String> = classes
      .into_iter()
      .map(|name| name.as_ref().trim().to_lowercase())
      .collect();
    let count = names.len().max(1) as f32;

    let colors = names
      .into_iter()
      .enumerate()
      .map(|(i, name)| {
        let hue = (i as f32 / count) * 360.0;
        (name, hsv_to_rgb(hue, 0.8, 0.9))
      })
      .collect();

    Self { colors }
  }

  /// 未知类别返回黑色
  pub fn get(&self, label: &str) -> Rgb<u8> {
    self
      .colors
      .get(&label.to_lowercase())
      .copied()
      .unwrap_or(FALLBACK_COLOR)
  }

  pub fn hex(&self, label: &str) -> String {
    let Rgb([r, g, b]) = self.get(label);
    format!("#{:02x}{:02x}{:02x}", r, g, b)
  }

  pub fn len(&self) -> usize {
    self.colors.len()
  }

  pub fn is_empty(&self) -> bool {
    self.colors.is_empty()
  }
}

fn hsv_to_rgb(h: f32, s: f32, v: f32) -> Rgb<u8> {
  let c = v * s;
  let x = c * (1.0 - ((h / 60.0) % 2.0 - 1.0).abs());
  let m = v - c;

  let (r, g, b) = if h < 60.0 {
    (c, x, 0.0)
  } else if h < 120.0 {
    (x, c, 0.0)
  } else if h < 180.0 {
    (0.0, c, x)
  } else if h < 240.0 {
    (0.0, x, c)
  } else if h < 300.0 {
    (x, 0.0, c)
  } else {
    (c, 0.0, x)
  };

  Rgb([
    ((r + m) * 255.0) as u8,
    ((g + m) * 255.0) as u8,
    ((b + m) * 255.0) as u8,
  ])
}

/// 半透明填充 + 实线边框 + 标签
pub struct Draw {
  font: Option<FontArc>,
  font_size: f32,
  alpha: f32,
}

impl Default for Draw {
  fn default() -> Self {
    Self {
      font: None,
      font_size: LABEL_FONT_SIZE,
      alpha: OVERLAY_ALPHA,
    }
  }
}

impl Draw {
  pub fn with_font_file(path: &Path) -> Result<Self, DrawError> {
    let data = std::fs::read(path)?;
    let font = FontArc::try_from_vec(data).map_err(|e| DrawError::InvalidFont(e.to_string()))?;
    info!("已加载标签字体: {}", path.display());
    Ok(Self {
      font: Some(font),
      ..Self::default()
    })
  }

  pub fn font_size(mut self, size: f32) -> Self {
    self.font_size = size;
    self
  }

  fn text_size(&self, label: &str) -> (u32, u32) {
    match &self.font {
      Some(font) => text_size(PxScale::from(self.font_size), font, label),
      None => (
        (label.chars().count() as f32 * LABEL_CHAR_WIDTH) as u32,
        LABEL_TEXT_HEIGHT,
      ),
    }
  }

  fn draw_detection(
    &self,
    image: &mut RgbImage,
    overlay: &mut RgbImage,
    detection: &Detection,
    color: Rgb<u8>,
  ) {
    let bbox = &detection.bbox;
    if bbox.w <= 0 || bbox.h <= 0 {
      return;
    }

    draw_filled_rect_mut(
      overlay,
      Rect::at(bbox.x, bbox.y).of_size(bbox.w as u32, bbox.h as u32),
      color,
    );

    // 边框以轮廓线为中心向内外各扩展一个像素
    for t in 0..BORDER_THICKNESS {
      let offset = t - BORDER_THICKNESS / 2;
      let (w, h) = (bbox.w - 2 * offset, bbox.h - 2 * offset);
      if w > 0 && h > 0 {
        draw_hollow_rect_mut(
          image,
          Rect::at(bbox.x + offset, bbox.y + offset).of_size(w as u32, h as u32),
          color,
        );
      }
    }

    let label = format!("{}: {:.2}", detection.class_label, detection.confidence);
    let (label_w, label_h) = self.text_size(&label);
    let strip_w = label_w + 2 * LABEL_PADDING as u32;
    let strip_h = label_h + 2 * LABEL_PADDING as u32;
    draw_filled_rect_mut(
      image,
      Rect::at(bbox.x, bbox.y - strip_h as i32).of_size(strip_w, strip_h),
      color,
    );

    if let Some(font) = &self.font {
      draw_text_mut(
        image,
        TEXT_COLOR,
        bbox.x + LABEL_PADDING,
        bbox.y - LABEL_PADDING - label_h as i32,
        PxScale::from(self.font_size),
        font,
        &label,
      );
    }
  }
}

fn in_order(color: Rgb<u8>, order: ChannelOrder) -> Rgb<u8> {
  match order {
    ChannelOrder::Rgb => color,
    ChannelOrder::Bgr => Rgb([color[2], color[1], color[0]]),
  }
}

/// `dst = overlay * alpha + dst * (1 - alpha)`
fn blend(dst: &mut RgbImage, overlay: &RgbImage, alpha: f32) {
  for (d, o) in dst.iter_mut().zip(overlay.iter()) {
    let value = *o as f32 * alpha + *d as f32 * (1.0 - alpha);
    *d = value.round().clamp(0.0, 255.0) as u8;
  }
}

impl Render for Draw {
  type Error = DrawError;

  fn render(
    &self,
    frame: &Frame,
    detections: &[Detection],
    colors: &ColorTable,
  ) -> Result<Frame, Self::Error> {
    if frame.width() == 0 || frame.height() == 0 {
      return Err(DrawError::EmptyFrame);
    }

    let mut image = frame.image().clone();
    let mut overlay = image.clone();

    for detection in detections {
      let color = in_order(colors.get(&detection.class_label), frame.order());
      self.draw_detection(&mut image, &mut overlay, detection, color);
    }
    blend(&mut image, &overlay, self.alpha);

    Ok(Frame::new(image, frame.order()))
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::model::BoundingBox;

  fn car(x: i32, y: i32, w: i32, h: i32) -> Detection {
    Detection {
      class_label: "Car".to_string(),
      confidence: 0.87,
      bbox: BoundingBox::new(x, y, w, h),
    }
  }

  #[test]
  fn color_table_is_case_insensitive_with_black_fallback() {
    let colors = ColorTable::new(["person", "Car", "bus"]);
    assert_eq!(colors.len(), 3);
    assert_eq!(colors.get("CAR"), colors.get("car"));
    assert_ne!(colors.get("car"), colors.get("bus"));
    assert_eq!(colors.get("zebra"), Rgb([0, 0, 0]));
    assert_eq!(colors.hex("zebra"), "#000000");
  }

  #[test]
  fn color_table_is_deterministic() {
    let a = ColorTable::new(["person", "car"]);
    let b = ColorTable::new(["person", "car"]);
    assert_eq!(a.get("person"), b.get("person"));
    assert_eq!(a.hex("car"), b.hex("car"));
  }

  #[test]
  fn no_detections_leaves_pixels_untouched() {
    let image = RgbImage::from_fn(8, 8, |x, y| Rgb([x as u8 * 10, y as u8 * 10, 77]));
    let frame = Frame::from(image.clone());
    let out = Draw::default()
      .render(&frame, &[], &ColorTable::new(["car"]))
      .unwrap();
    assert_eq!(out.image(), &image);
  }

  #[test]
  fn box_is_blended_and_input_is_not_mutated() {
    let frame = Frame::from(RgbImage::new(64, 64));
    let colors = ColorTable::new(["car"]);
    let color = colors.get("car");

    let out = Draw::default()
      .render(&frame, &[car(20, 40, 20, 20)], &colors)
      .unwrap();

    // 输入保持全黑
    assert!(frame.as_raw().iter().all(|&v| v == 0));
    // 边框像素在两层都有颜色
    assert_eq!(out.image().get_pixel(20, 40), &color);
    // 框内只有 30% 的填充色
    let inner = out.image().get_pixel(30, 50);
    for c in 0..3 {
      let expected = (color[c] as f32 * OVERLAY_ALPHA).round() as u8;
      assert_eq!(inner[c], expected);
    }
    // 框外不变
    assert_eq!(out.image().get_pixel(2, 62), &Rgb([0, 0, 0]));
  }

  #[test]
  fn bgr_frames_get_swapped_colors() {
    let frame = Frame::new(RgbImage::new(32, 32), ChannelOrder::Bgr);
    let colors = ColorTable::new(["car"]);
    let color = colors.get("car");

    let out = Draw::default()
      .render(&frame, &[car(10, 20, 10, 10)], &colors)
      .unwrap();
    assert_eq!(out.order(), ChannelOrder::Bgr);
    assert_eq!(
      out.image().get_pixel(10, 20),
      &Rgb([color[2], color[1], color[0]])
    );
  }

  #[test]
  fn degenerate_boxes_are_skipped() {
    let frame = Frame::from(RgbImage::new(16, 16));
    let out = Draw::default()
      .render(&frame, &[car(4, 4, 0, 5)], &ColorTable::new(["car"]))
      .unwrap();
    assert!(out.as_raw().iter().all(|&v| v == 0));
  }

  #[test]
  fn empty_frame_is_an_error() {
    let frame = Frame::from(RgbImage::new(0, 0));
    assert!(matches!(
      Draw::default().render(&frame, &[], &ColorTable::default()),
      Err(DrawError::EmptyFrame)
    ));
  }
}
