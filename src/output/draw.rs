// 该文件是 Jianwei （鉴违） 项目的一部分。
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

use ab_glyph::{FontArc, PxScale};
use image::{Rgb, RgbImage};
use imageproc::{
  drawing::{draw_filled_rect_mut, draw_hollow_rect_mut, draw_text_mut, text_size},
  rect::Rect,
};

use crate::{
  AnalysisError,
  frame::Frame,
  model::{Detection, DetectionSet},
};

// 文本渲染常量
const LABEL_FONT_SIZE: f32 = 16.0;
const LABEL_PADDING: u32 = 2;
const BOX_THICKNESS: u32 = 2;
const BOX_COLOR: [u8; 3] = [255, 0, 0]; // 红色
const TEXT_COLOR: [u8; 3] = [255, 255, 255]; // 白色

/// 标注器：在帧上绘制检测框与标签
///
/// 无内部状态，可以在多个请求之间共享。
#[derive(Clone)]
pub struct Annotator {
  font: FontArc,
  scale: PxScale,
  box_color: Rgb<u8>,
  text_color: Rgb<u8>,
}

impl Annotator {
  pub fn new() -> Result<Self, AnalysisError> {
    let font_data: &'static [u8] = include_bytes!("../../assets/DejaVuSans.ttf");
    let font = FontArc::try_from_slice(font_data)
      .map_err(|e| AnalysisError::UnavailableCapability(format!("无法加载嵌入的字体: {}", e)))?;

    Ok(Self {
      font,
      scale: PxScale::from(LABEL_FONT_SIZE),
      box_color: Rgb(BOX_COLOR),
      text_color: Rgb(TEXT_COLOR),
    })
  }

  /// 标注一帧
  ///
  /// 检测集为空时不做任何绘制，返回与输入逐像素一致的帧。
  /// 检测框按给定顺序绘制，后绘制的可以覆盖先绘制的。
  pub fn annotate(&self, frame: &Frame, detections: &DetectionSet) -> Frame {
    let mut output = frame.clone();
    if detections.is_empty() {
      return output;
    }

    let image = output.as_image_mut();
    for detection in detections {
      self.draw_detection(image, detection);
    }
    output
  }

  fn draw_detection(&self, image: &mut RgbImage, detection: &Detection) {
    let (width, height) = image.dimensions();
    if width == 0 || height == 0 {
      return;
    }
    let Some((x_min, y_min, x_max, y_max)) = pixel_bounds(&detection.bbox, width, height) else {
      return;
    };

    // 绘制边框（加粗为2像素）
    for t in 0..BOX_THICKNESS {
      let (left, top) = (x_min + t, y_min + t);
      let (right, bottom) = (x_max.saturating_sub(t), y_max.saturating_sub(t));
      if left > right || top > bottom {
        break;
      }
      let rect = Rect::at(left as i32, top as i32).of_size(right - left + 1, bottom - top + 1);
      draw_hollow_rect_mut(image, rect, self.box_color);
    }

    self.draw_tag(image, &detection.tag(), x_min, y_min);
  }

  /// 在框左上角上方绘制填充标签，位置被限制在帧内
  fn draw_tag(&self, image: &mut RgbImage, label: &str, x_min: u32, y_min: u32) {
    let (width, height) = image.dimensions();
    let (text_width, text_height) = text_size(self.scale, &self.font, label);

    let tag_width = (text_width + 2 * LABEL_PADDING).min(width);
    let tag_height = (text_height + 2 * LABEL_PADDING).min(height);
    if tag_width == 0 || tag_height == 0 {
      return;
    }

    let tag_x = x_min.min(width - tag_width);
    let tag_y = y_min.saturating_sub(tag_height);

    let rect = Rect::at(tag_x as i32, tag_y as i32).of_size(tag_width, tag_height);
    draw_filled_rect_mut(image, rect, self.box_color);
    draw_text_mut(
      image,
      self.text_color,
      (tag_x + LABEL_PADDING) as i32,
      (tag_y + LABEL_PADDING) as i32,
      self.scale,
      &self.font,
      label,
    );
  }
}

/// 将像素坐标的边界框转换为包含式的整数像素范围
fn pixel_bounds(bbox: &[f32; 4], width: u32, height: u32) -> Option<(u32, u32, u32, u32)> {
  if bbox.iter().any(|v| !v.is_finite()) {
    return None;
  }
  let (max_x, max_y) = ((width - 1) as f32, (height - 1) as f32);

  let x_min = bbox[0].floor().clamp(0.0, max_x) as u32;
  let y_min = bbox[1].floor().clamp(0.0, max_y) as u32;
  let x_max = (bbox[2].ceil() - 1.0).clamp(0.0, max_x) as u32;
  let y_max = (bbox[3].ceil() - 1.0).clamp(0.0, max_y) as u32;

  (x_min <= x_max && y_min <= y_max).then_some((x_min, y_min, x_max, y_max))
}
