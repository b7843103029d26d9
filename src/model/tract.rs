// 该文件是 Shanan （山南西风） 项目的一部分。
// src/model/tract.rs - 基于 tract 的 ONNX 推理后端
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

use std::path::Path;

use tracing::{debug, info};
use tract_onnx::prelude::*;

use crate::model::{Blob, Model, ModelError, RawLayer, RawOutput};

/// ONNX 模型
///
/// 每个输出张量的最后一维是锚点行长度，其余维度展平为锚点数。
pub struct TractModel {
  plan: TypedSimplePlan<TypedModel>,
  width: u32,
  height: u32,
}

impl TractModel {
  pub fn load(path: &Path, width: u32, height: u32) -> Result<Self, ModelError> {
    info!("加载 ONNX 模型: {}", path.display());
    let plan = tract_onnx::onnx()
      .model_for_path(path)
      .and_then(|model| {
        model.with_input_fact(
          0,
          InferenceFact::dt_shape(
            f32::datum_type(),
            tvec!(1, 3, height as usize, width as usize),
          ),
        )
      })
      .and_then(|model| model.into_optimized())
      .and_then(|model| model.into_runnable())
      .map_err(|e| ModelError::Load(format!("{:?}", e)))?;

    debug!("ONNX 模型已优化，输入 1x3x{}x{}", height, width);
    Ok(Self {
      plan,
      width,
      height,
    })
  }
}

impl Model for TractModel {
  fn infer(&self, input: &Blob) -> Result<RawOutput, ModelError> {
    if input.width() != self.width || input.height() != self.height {
      return Err(ModelError::Shape(format!(
        "输入尺寸 {}x{} 与模型 {}x{} 不一致",
        input.width(),
        input.height(),
        self.width,
        self.height
      )));
    }

    let [n, c, h, w] = input.shape();
    let tensor = tract_ndarray::Array4::from_shape_vec((n, c, h, w), input.as_slice().to_vec())
      .map_err(|e| ModelError::Shape(e.to_string()))?
      .into_tensor();

    let outputs = self
      .plan
      .run(tvec!(tensor.into()))
      .map_err(|e| ModelError::Inference(format!("{:?}", e)))?;

    let mut layers = Vec::with_capacity(outputs.len());
    for output in outputs.iter() {
      let view = output
        .to_array_view::<f32>()
        .map_err(|e| ModelError::Shape(format!("{:?}", e)))?;
      let row_len = view.shape().last().copied().unwrap_or(0);
      layers.push(RawLayer::new(view.iter().copied().collect(), row_len)?);
    }

    Ok(RawOutput::new(layers))
  }
}
