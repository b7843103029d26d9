// 该文件是 Shanan （山南西风） 项目的一部分。
// src/cache.rs - 帧结果缓存
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

use std::collections::BTreeMap;

use tracing::debug;

use crate::{frame::Frame, model::Detection};

pub const DEFAULT_CACHE_CAPACITY: usize = 30;

/// 一帧的处理结果，`frame` 是已绘制、RGB 顺序的拷贝
#[derive(Debug, Clone)]
pub struct CacheEntry {
  pub frame_index: u64,
  pub frame: Frame,
  pub detections: Vec<Detection>,
}

/// 以帧序号为键的有界缓存
///
/// 超出容量时淘汰序号最小的条目。正常回放总是向前推进，
/// 序号最小的条目也就是最早写入的条目。
#[derive(Debug)]
pub struct FrameCache {
  entries: BTreeMap<u64, CacheEntry>,
  capacity: usize,
}

impl Default for FrameCache {
  fn default() -> Self {
    Self::new(DEFAULT_CACHE_CAPACITY)
  }
}

impl FrameCache {
  /// 容量至少为 1
  pub fn new(capacity: usize) -> Self {
    Self {
      entries: BTreeMap::new(),
      capacity: capacity.max(1),
    }
  }

  pub fn capacity(&self) -> usize {
    self.capacity
  }

  pub fn len(&self) -> usize {
    self.entries.len()
  }

  pub fn is_empty(&self) -> bool {
    self.entries.is_empty()
  }

  pub fn get(&self, index: u64) -> Option<&CacheEntry> {
    self.entries.get(&index)
  }

  pub fn contains(&self, index: u64) -> bool {
    self.entries.contains_key(&index)
  }

  /// 插入或覆盖条目，返回被淘汰的条目
  pub fn put(&mut self, entry: CacheEntry) -> Option<CacheEntry> {
    self.entries.insert(entry.frame_index, entry);

    if self.entries.len() > self.capacity {
      let (index, evicted) = self.entries.pop_first()?;
      debug!("缓存已满，淘汰第 {} 帧", index);
      return Some(evicted);
    }
    None
  }

  pub fn clear(&mut self) {
    self.entries.clear();
  }

  /// 升序排列的已缓存帧序号
  pub fn indices(&self) -> Vec<u64> {
    self.entries.keys().copied().collect()
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::model::BoundingBox;

  fn entry(index: u64) -> CacheEntry {
    CacheEntry {
      frame_index: index,
      frame: Frame::from(image::RgbImage::new(2, 2)),
      detections: vec![Detection {
        class_label: "car".to_string(),
        confidence: 0.9,
        bbox: BoundingBox::new(index as i32, 0, 1, 1),
      }],
    }
  }

  #[test]
  fn get_after_put_returns_entry() {
    let mut cache = FrameCache::default();
    for index in [0, 7, 29, 1_000_000] {
      cache.put(entry(index));
      let got = cache.get(index).unwrap();
      assert_eq!(got.frame_index, index);
      assert_eq!(got.detections, entry(index).detections);
    }
  }

  #[test]
  fn missing_index_is_none() {
    let cache = FrameCache::default();
    assert!(cache.get(3).is_none());
  }

  #[test]
  fn put_overwrites_same_index() {
    let mut cache = FrameCache::new(2);
    cache.put(entry(5));
    let mut replacement = entry(5);
    replacement.detections.clear();
    assert!(cache.put(replacement).is_none());
    assert_eq!(cache.len(), 1);
    assert!(cache.get(5).unwrap().detections.is_empty());
  }

  #[test]
  fn evicts_smallest_index_not_oldest_insert() {
    let mut cache = FrameCache::new(3);
    cache.put(entry(10));
    cache.put(entry(2));
    cache.put(entry(30));
    let evicted = cache.put(entry(20)).unwrap();
    assert_eq!(evicted.frame_index, 2);
    assert_eq!(cache.indices(), vec![10, 20, 30]);
  }

  #[test]
  fn never_exceeds_capacity() {
    let mut cache = FrameCache::new(DEFAULT_CACHE_CAPACITY);
    let mut index = 17u64;
    for _ in 0..200 {
      // 伪随机的插入顺序
      index = (index * 31 + 7) % 97;
      let smallest_before = cache.indices().first().copied();
      let was_present = cache.contains(index);
      let evicted = cache.put(entry(index));
      assert!(cache.len() <= cache.capacity());

      if let Some(evicted) = evicted {
        assert!(!was_present);
        let expected = smallest_before.map_or(index, |s| s.min(index));
        assert_eq!(evicted.frame_index, expected);
      }
    }
    assert_eq!(cache.len(), DEFAULT_CACHE_CAPACITY);
  }

  #[test]
  fn zero_capacity_is_clamped() {
    let mut cache = FrameCache::new(0);
    assert_eq!(cache.capacity(), 1);
    cache.put(entry(1));
    cache.put(entry(2));
    assert_eq!(cache.indices(), vec![2]);
  }

  #[test]
  fn clear_drops_everything() {
    let mut cache = FrameCache::new(4);
    cache.put(entry(1));
    cache.put(entry(2));
    cache.clear();
    assert!(cache.is_empty());
  }
}
