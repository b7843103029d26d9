// 该文件是 Shanan （山南西风） 项目的一部分。
// src/frame.rs - 视频帧定义
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

use image::RgbImage;

pub const RGB_CHANNELS: usize = 3;

/// 像素通道顺序
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelOrder {
  Rgb,
  Bgr,
}

/// 一帧图像
///
/// 像素以交错的 3 通道 8 位格式保存，`order` 记录通道顺序。
/// 底层缓冲区借用 `RgbImage` 的存储，BGR 帧同样存放其中，
/// 只有 `order` 决定如何解释每个像素。
#[derive(Debug, Clone)]
pub struct Frame {
  image: RgbImage,
  order: ChannelOrder,
}

impl From<RgbImage> for Frame {
  fn from(image: RgbImage) -> Self {
    Frame::new(image, ChannelOrder::Rgb)
  }
}

impl Frame {
  pub fn new(image: RgbImage, order: ChannelOrder) -> Self {
    Self { image, order }
  }

  /// 从原始交错数据构建帧，长度不匹配时返回 `None`
  pub fn from_raw(width: u32, height: u32, data: Vec<u8>, order: ChannelOrder) -> Option<Self> {
    RgbImage::from_raw(width, height, data).map(|image| Self { image, order })
  }

  pub fn width(&self) -> u32 {
    self.image.width()
  }

  pub fn height(&self) -> u32 {
    self.image.height()
  }

  /// (宽, 高)
  pub fn dims(&self) -> (u32, u32) {
    self.image.dimensions()
  }

  pub fn order(&self) -> ChannelOrder {
    self.order
  }

  pub fn image(&self) -> &RgbImage {
    &self.image
  }

  pub fn as_raw(&self) -> &[u8] {
    self.image.as_raw()
  }

  pub fn to_rgb(&self) -> Frame {
    self.clone().into_rgb()
  }

  /// 转为 RGB 顺序，已经是 RGB 时不做拷贝
  pub fn into_rgb(self) -> Frame {
    match self.order {
      ChannelOrder::Rgb => self,
      ChannelOrder::Bgr => {
        let mut image = self.image;
        for pixel in image.pixels_mut() {
          pixel.0.swap(0, 2);
        }
        Frame {
          image,
          order: ChannelOrder::Rgb,
        }
      }
    }
  }
}
