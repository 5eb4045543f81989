// 该文件是 Jianwei （鉴违） 项目的一部分。
// src/model/yolo.rs - YOLOv8 ONNX 目标检测器
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

use std::sync::{Mutex, PoisonError};

use image::RgbImage;
use ort::{session::Session, value::Tensor};
use tracing::{debug, info};
use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme,
  frame::Frame,
  model::{Detection, Detector, DetectorError, Thresholds, coco_label},
};

const YOLO_INPUT_SIZE: u32 = 640;

/// YOLOv8 目标检测器
///
/// ONNX 会话不可重入，推理在互斥锁内串行执行。
pub struct YoloDetector {
  /// ONNX 推理会话
  session: Mutex<Session>,
  /// 模型输入宽度
  input_width: u32,
  /// 模型输入高度
  input_height: u32,
  /// 置信度阈值
  confidence_threshold: f32,
  /// NMS IOU 阈值
  nms_threshold: f32,
}

impl FromUrlWithScheme for YoloDetector {
  const SCHEME: &'static str = "onnx";
}

impl FromUrl for YoloDetector {
  type Error = DetectorError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      return Err(DetectorError::ModelLoad(format!(
        "模型路径必须使用 {} 方案",
        Self::SCHEME
      )));
    }
    let thresholds = Thresholds::default();
    Self::new(url.path(), thresholds.confidence, thresholds.nms)
  }
}

impl YoloDetector {
  /// 加载 ONNX 模型
  pub fn new(
    model_path: &str,
    confidence_threshold: f32,
    nms_threshold: f32,
  ) -> Result<Self, DetectorError> {
    info!("加载模型文件: {}", model_path);
    let session = Session::builder()
      .map_err(|e| DetectorError::ModelLoad(e.to_string()))?
      .commit_from_file(model_path)
      .map_err(|e| DetectorError::ModelLoad(format!("无法加载模型 {}: {}", model_path, e)))?;
    info!("模型加载完成");

    Ok(Self {
      session: Mutex::new(session),
      input_width: YOLO_INPUT_SIZE,
      input_height: YOLO_INPUT_SIZE,
      confidence_threshold,
      nms_threshold,
    })
  }

  /// 预处理图像：缩放到模型输入尺寸，转为归一化的 NCHW 浮点张量
  fn preprocess(&self, image: &RgbImage) -> Vec<f32> {
    let resized = image::imageops::resize(
      image,
      self.input_width,
      self.input_height,
      image::imageops::FilterType::Triangle,
    );

    let plane = (self.input_width * self.input_height) as usize;
    let mut data = vec![0f32; plane * 3];
    for (idx, pixel) in resized.pixels().enumerate() {
      for c in 0..3 {
        data[c * plane + idx] = pixel[c] as f32 / 255.0;
      }
    }
    data
  }
}

impl Detector for YoloDetector {
  fn detect(&self, frame: &Frame) -> Result<Vec<Detection>, DetectorError> {
    let (original_width, original_height) = frame.dimensions();
    let input_data = self.preprocess(frame.as_image());

    let shape = [
      1usize,
      3,
      self.input_height as usize,
      self.input_width as usize,
    ];
    let input = Tensor::from_array((shape, input_data))
      .map_err(|e| DetectorError::Inference(e.to_string()))?;

    let mut session = self.session.lock().unwrap_or_else(PoisonError::into_inner);
    let outputs = session
      .run(ort::inputs![input])
      .map_err(|e| DetectorError::Inference(e.to_string()))?;
    let (shape, data) = outputs[0]
      .try_extract_tensor::<f32>()
      .map_err(|e| DetectorError::Inference(e.to_string()))?;
    let dims: Vec<i64> = shape.iter().copied().collect();

    let candidates = decode_output(&dims, data, self.confidence_threshold)?;
    debug!("候选框数量: {}", candidates.len());

    let scale_x = original_width as f32 / self.input_width as f32;
    let scale_y = original_height as f32 / self.input_height as f32;
    let detections = nms(candidates, self.nms_threshold)
      .into_iter()
      .map(|c| {
        Detection::new(
          [
            c.bbox[0] * scale_x,
            c.bbox[1] * scale_y,
            c.bbox[2] * scale_x,
            c.bbox[3] * scale_y,
          ],
          c.class_id,
          c.confidence,
          coco_label(c.class_id),
        )
      })
      .collect();

    Ok(detections)
  }
}

#[derive(Debug, Clone, PartialEq)]
struct Candidate {
  bbox: [f32; 4],
  class_id: u32,
  confidence: f32,
}

/// 解码 YOLOv8 输出，支持 [1, 4 + C, N] 与 [1, N, 4 + C] 两种排列
fn decode_output(dims: &[i64], data: &[f32], threshold: f32) -> Result<Vec<Candidate>, DetectorError> {
  if dims.len() != 3 || dims.iter().any(|&d| d <= 0) {
    return Err(DetectorError::Inference(format!("输出形状无效: {:?}", dims)));
  }
  let (a, b) = (dims[1] as usize, dims[2] as usize);
  // 特征维度总是较小的一维
  let (features, anchors, transposed) = if a < b { (a, b, false) } else { (b, a, true) };
  if features < 5 || data.len() < features * anchors {
    return Err(DetectorError::Inference(format!("输出形状无效: {:?}", dims)));
  }
  let at = |feature: usize, anchor: usize| {
    if transposed {
      data[anchor * features + feature]
    } else {
      data[feature * anchors + anchor]
    }
  };

  let mut candidates = Vec::new();
  for anchor in 0..anchors {
    let (class_id, score) = (4..features)
      .map(|f| (f - 4, at(f, anchor)))
      .fold((0usize, f32::NEG_INFINITY), |best, cur| {
        if cur.1 > best.1 { cur } else { best }
      });

    if !score.is_finite() || score < threshold {
      continue;
    }

    let (cx, cy, w, h) = (at(0, anchor), at(1, anchor), at(2, anchor), at(3, anchor));
    if w <= 0.0 || h <= 0.0 {
      continue;
    }

    candidates.push(Candidate {
      bbox: [cx - w / 2.0, cy - h / 2.0, cx + w / 2.0, cy + h / 2.0],
      class_id: class_id as u32,
      confidence: score,
    });
  }
  Ok(candidates)
}

/// 按类别的非极大值抑制
fn nms(mut candidates: Vec<Candidate>, threshold: f32) -> Vec<Candidate> {
  // 按置信度降序排序
  candidates.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));

  let mut result: Vec<Candidate> = Vec::new();
  for candidate in candidates {
    let suppressed = result
      .iter()
      .any(|kept| kept.class_id == candidate.class_id && iou(kept, &candidate) >= threshold);
    if !suppressed {
      result.push(candidate);
    }
  }
  result
}

/// 计算两个边界框的 IoU
fn iou(a: &Candidate, b: &Candidate) -> f32 {
  let x1 = a.bbox[0].max(b.bbox[0]);
  let y1 = a.bbox[1].max(b.bbox[1]);
  let x2 = a.bbox[2].min(b.bbox[2]);
  let y2 = a.bbox[3].min(b.bbox[3]);

  let intersection = (x2 - x1).max(0.0) * (y2 - y1).max(0.0);
  let area_a = (a.bbox[2] - a.bbox[0]) * (a.bbox[3] - a.bbox[1]);
  let area_b = (b.bbox[2] - b.bbox[0]) * (b.bbox[3] - b.bbox[1]);
  let union = area_a + area_b - intersection;

  if union > 0.0 { intersection / union } else { 0.0 }
}
