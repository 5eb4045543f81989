// 该文件是 Jianwei （鉴违） 项目的一部分。
// src/frame.rs - RGB 帧定义与静态图编码
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

use std::io::Cursor;

use base64::{Engine as _, engine::general_purpose};
use image::{ImageFormat, RgbImage, codecs::jpeg::JpegEncoder};

use crate::AnalysisError;

const DEFAULT_JPEG_QUALITY: u8 = 90;

/// 解码后的 RGB 帧（HWC 排列，每通道 8 位，单一缓冲区）
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
  image: RgbImage,
}

impl From<RgbImage> for Frame {
  fn from(image: RgbImage) -> Self {
    Self { image }
  }
}

impl Frame {
  /// 从压缩图片字节解码
  pub fn decode(bytes: &[u8]) -> Result<Self, AnalysisError> {
    let image = image::load_from_memory(bytes)
      .map_err(|e| AnalysisError::Decode(format!("无法解码图片: {}", e)))?
      .to_rgb8();
    Ok(Self { image })
  }

  /// 从 rgb24 原始数据构造，长度不匹配时返回 `None`
  pub fn from_rgb24(width: u32, height: u32, data: Vec<u8>) -> Option<Self> {
    RgbImage::from_raw(width, height, data).map(Self::from)
  }

  /// 纯色帧
  pub fn filled(width: u32, height: u32, rgb: [u8; 3]) -> Self {
    Self {
      image: RgbImage::from_pixel(width, height, image::Rgb(rgb)),
    }
  }

  pub fn width(&self) -> u32 {
    self.image.width()
  }

  pub fn height(&self) -> u32 {
    self.image.height()
  }

  pub fn dimensions(&self) -> (u32, u32) {
    self.image.dimensions()
  }

  pub fn as_raw(&self) -> &[u8] {
    self.image.as_raw()
  }

  pub fn as_image(&self) -> &RgbImage {
    &self.image
  }

  pub(crate) fn as_image_mut(&mut self) -> &mut RgbImage {
    &mut self.image
  }
}

/// 静态图编码方式，内联预览与持久化文件使用同一种编码
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ImageEncoding {
  /// 无损编码，未标注的结果与输入逐像素一致
  #[default]
  Png,
  Jpeg {
    quality: u8,
  },
}

impl ImageEncoding {
  pub fn jpeg() -> Self {
    ImageEncoding::Jpeg {
      quality: DEFAULT_JPEG_QUALITY,
    }
  }

  pub fn extension(&self) -> &'static str {
    match self {
      ImageEncoding::Png => "png",
      ImageEncoding::Jpeg { .. } => "jpg",
    }
  }

  pub fn content_type(&self) -> &'static str {
    match self {
      ImageEncoding::Png => "image/png",
      ImageEncoding::Jpeg { .. } => "image/jpeg",
    }
  }

  pub fn encode(&self, frame: &Frame) -> Result<Vec<u8>, AnalysisError> {
    let mut buffer = Vec::new();
    match self {
      ImageEncoding::Png => frame
        .image
        .write_to(&mut Cursor::new(&mut buffer), ImageFormat::Png),
      ImageEncoding::Jpeg { quality } => {
        JpegEncoder::new_with_quality(&mut buffer, *quality).encode_image(&frame.image)
      }
    }
    .map_err(|e| AnalysisError::Encode(format!("无法编码图片: {}", e)))?;
    Ok(buffer)
  }

  /// 编码一次，同时得到文件内容与其 base64 预览
  pub fn encode_with_preview(&self, frame: &Frame) -> Result<(Vec<u8>, String), AnalysisError> {
    let bytes = self.encode(frame)?;
    let preview = general_purpose::STANDARD.encode(&bytes);
    Ok((bytes, preview))
  }
}
