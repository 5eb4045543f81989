// 该文件是 Jianwei （鉴违） 项目的一部分。
// src/model.rs - 检测结果与检测器适配
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

use thiserror::Error;
use tracing::debug;
use url::Url;

use crate::{AnalysisError, capability::Capability, frame::Frame};

mod coco;
pub use self::coco::{COCO_CLASSES, coco_label};

#[cfg(feature = "onnx")]
mod yolo;
#[cfg(feature = "onnx")]
pub use self::yolo::YoloDetector;

/// 单个检测结果
#[derive(Debug, Clone, PartialEq)]
pub struct Detection {
  pub bbox: [f32; 4], // [x_min, y_min, x_max, y_max]，像素坐标
  pub class_id: u32,
  pub confidence: f32,
  pub label: String,
}

impl Detection {
  pub fn new(bbox: [f32; 4], class_id: u32, confidence: f32, label: impl Into<String>) -> Self {
    Self {
      bbox,
      class_id,
      confidence,
      label: label.into(),
    }
  }

  /// 将边界框裁剪到帧范围内，裁剪后退化（面积为零）的框返回 `None`
  pub fn clamped(mut self, width: u32, height: u32) -> Option<Self> {
    if self.bbox.iter().any(|v| !v.is_finite()) {
      return None;
    }
    let (w, h) = (width as f32, height as f32);
    let [x1, y1, x2, y2] = self.bbox;
    self.bbox = [x1.clamp(0.0, w), y1.clamp(0.0, h), x2.clamp(0.0, w), y2.clamp(0.0, h)];
    self.confidence = self.confidence.clamp(0.0, 1.0);

    let [x1, y1, x2, y2] = self.bbox;
    (x1 < x2 && y1 < y2).then_some(self)
  }

  /// 标签文本：类别名与两位小数的置信度
  pub fn tag(&self) -> String {
    format!("{} {:.2}", self.label, self.confidence)
  }
}

/// 一帧的检测结果，保持检测器输出顺序
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DetectionSet {
  items: Vec<Detection>,
}

impl DetectionSet {
  pub fn new(items: Vec<Detection>) -> Self {
    Self { items }
  }

  pub fn is_empty(&self) -> bool {
    self.items.is_empty()
  }

  pub fn len(&self) -> usize {
    self.items.len()
  }

  pub fn iter(&self) -> std::slice::Iter<'_, Detection> {
    self.items.iter()
  }
}

impl FromIterator<Detection> for DetectionSet {
  fn from_iter<I: IntoIterator<Item = Detection>>(iter: I) -> Self {
    Self {
      items: iter.into_iter().collect(),
    }
  }
}

impl<'a> IntoIterator for &'a DetectionSet {
  type Item = &'a Detection;
  type IntoIter = std::slice::Iter<'a, Detection>;

  fn into_iter(self) -> Self::IntoIter {
    self.items.iter()
  }
}

#[derive(Error, Debug)]
pub enum DetectorError {
  #[error("检测器未初始化")]
  NotInitialized,
  #[error("模型加载错误: {0}")]
  ModelLoad(String),
  #[error("推理错误: {0}")]
  Inference(String),
}

impl From<DetectorError> for AnalysisError {
  fn from(err: DetectorError) -> Self {
    match err {
      DetectorError::NotInitialized | DetectorError::ModelLoad(_) => {
        AnalysisError::UnavailableCapability(err.to_string())
      }
      DetectorError::Inference(_) => AnalysisError::UpstreamService(err.to_string()),
    }
  }
}

/// 目标检测能力
///
/// 置信度阈值由实现自行处理，调用方不再额外过滤。
/// 不可重入的实现需要在内部加锁。
pub trait Detector: Send + Sync {
  fn detect(&self, frame: &Frame) -> Result<Vec<Detection>, DetectorError>;
}

impl<D: Detector + ?Sized> Detector for Box<D> {
  fn detect(&self, frame: &Frame) -> Result<Vec<Detection>, DetectorError> {
    (**self).detect(frame)
  }
}

pub type SharedDetector = Arc<Box<dyn Detector>>;

/// 检测器适配层：延迟初始化检测器，并把结果规范到帧范围内
pub struct DetectorAdapter {
  capability: Capability<Box<dyn Detector>>,
}

impl DetectorAdapter {
  pub fn new(capability: Capability<Box<dyn Detector>>) -> Self {
    Self { capability }
  }

  pub fn with_detector<D: Detector + 'static>(detector: D) -> Self {
    let detector: Box<dyn Detector> = Box::new(detector);
    Self::new(Capability::ready("detector", detector))
  }

  pub fn is_ready(&self) -> bool {
    self.capability.is_ready()
  }

  pub fn ensure_ready(&self) -> Result<SharedDetector, AnalysisError> {
    self.capability.ensure_ready()
  }

  /// 对单帧执行检测
  pub fn detect(&self, frame: &Frame) -> Result<DetectionSet, AnalysisError> {
    let detector = self.ensure_ready()?;
    Self::detect_with(&**detector, frame)
  }

  pub fn detect_with(detector: &dyn Detector, frame: &Frame) -> Result<DetectionSet, AnalysisError> {
    let (width, height) = frame.dimensions();
    let raw = detector.detect(frame)?;
    let total = raw.len();
    let set: DetectionSet = raw
      .into_iter()
      .filter_map(|det| det.clamped(width, height))
      .collect();
    if set.len() != total {
      debug!("丢弃 {} 个退化的边界框", total - set.len());
    }
    Ok(set)
  }
}

/// 检测阈值
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Thresholds {
  pub confidence: f32,
  pub nms: f32,
}

impl Default for Thresholds {
  fn default() -> Self {
    Self {
      confidence: 0.25,
      nms: 0.45,
    }
  }
}

/// 根据 URL 构建检测器
#[cfg_attr(not(feature = "onnx"), allow(unused_variables))]
pub fn detector_from_url(url: &Url, thresholds: Thresholds) -> anyhow::Result<Box<dyn Detector>> {
  match url.scheme() {
    #[cfg(feature = "onnx")]
    <YoloDetector as crate::FromUrlWithScheme>::SCHEME => {
      let detector = YoloDetector::new(url.path(), thresholds.confidence, thresholds.nms)?;
      Ok(Box::new(detector))
    }
    scheme => {
      anyhow::bail!("不支持的检测器方案 '{}'（未启用对应的检测后端）", scheme)
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  struct Fixed(Vec<Detection>);

  impl Detector for Fixed {
    fn detect(&self, _frame: &Frame) -> Result<Vec<Detection>, DetectorError> {
      Ok(self.0.clone())
    }
  }

  #[test]
  fn clamps_boxes_to_frame_bounds() {
    let det = Detection::new([-5.0, -3.0, 150.0, 40.0], 0, 0.9, "person")
      .clamped(100, 50)
      .unwrap();
    assert_eq!(det.bbox, [0.0, 0.0, 100.0, 40.0]);
  }

  #[test]
  fn rejects_degenerate_boxes() {
    assert!(Detection::new([10.0, 10.0, 10.0, 20.0], 0, 0.5, "x").clamped(100, 100).is_none());
    assert!(Detection::new([120.0, 10.0, 130.0, 20.0], 0, 0.5, "x").clamped(100, 100).is_none());
    assert!(Detection::new([f32::NAN, 0.0, 1.0, 1.0], 0, 0.5, "x").clamped(100, 100).is_none());
  }

  #[test]
  fn tag_uses_two_decimals() {
    let det = Detection::new([0.0, 0.0, 1.0, 1.0], 2, 0.876, "car");
    assert_eq!(det.tag(), "car 0.88");
  }

  #[test]
  fn adapter_keeps_emission_order() {
    let adapter = DetectorAdapter::with_detector(Fixed(vec![
      Detection::new([50.0, 50.0, 60.0, 60.0], 1, 0.4, "b"),
      Detection::new([0.0, 0.0, 0.0, 5.0], 9, 0.9, "degenerate"),
      Detection::new([1.0, 1.0, 20.0, 20.0], 0, 0.8, "a"),
    ]));
    let frame = Frame::filled(64, 64, [0, 0, 0]);
    let set = adapter.detect(&frame).unwrap();
    let labels: Vec<_> = set.iter().map(|d| d.label.as_str()).collect();
    assert_eq!(labels, ["b", "a"]);
  }

  #[test]
  fn adapter_passes_low_confidence_through() {
    let adapter = DetectorAdapter::with_detector(Fixed(vec![Detection::new(
      [1.0, 1.0, 2.0, 2.0],
      0,
      0.01,
      "faint",
    )]));
    let set = adapter.detect(&Frame::filled(4, 4, [0, 0, 0])).unwrap();
    assert_eq!(set.len(), 1);
  }

  #[test]
  fn uninitializable_detector_is_unavailable() {
    let adapter = DetectorAdapter::new(Capability::new("detector", || {
      anyhow::bail!("权重文件缺失")
    }));
    let err = adapter.detect(&Frame::filled(4, 4, [0, 0, 0])).unwrap_err();
    assert!(matches!(err, AnalysisError::UnavailableCapability(_)));
  }

  #[test]
  fn unknown_detector_scheme_is_rejected() {
    let url = Url::parse("rknn:///model.rknn").unwrap();
    assert!(detector_from_url(&url, Thresholds::default()).is_err());
  }

  #[cfg(feature = "onnx")]
  #[test]
  fn default_model_scheme_reaches_the_onnx_backend() {
    let url = Url::parse("onnx:/nonexistent/yolov8n.onnx").unwrap();
    let err = detector_from_url(&url, Thresholds::default()).unwrap_err();
    assert!(matches!(
      err.downcast_ref::<DetectorError>(),
      Some(DetectorError::ModelLoad(_))
    ));
  }
}
