// 该文件是 Jianwei （鉴违） 项目的一部分。
// src/pipeline/image.rs - 图片分析流程
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

use std::io::Write;

use tracing::{debug, info};

use super::{Analyzer, PendingArtifact};
use crate::{
  AnalysisError,
  frame::Frame,
  model::DetectionSet,
  report::{DocumentId, Verdict},
};

/// 图片分析结果
#[derive(Debug)]
pub struct ImageAnalysis {
  pub verdict: Verdict,
  pub detections: DetectionSet,
  /// 输出帧：无检测结果时即为解码后的原始帧
  pub frame: Frame,
  /// 与结果文件相同编码的 base64 预览
  pub preview_base64: String,
  pub artifact: PendingArtifact,
}

impl Analyzer {
  /// 分析一张图片：解码、检测、标注、编码
  ///
  /// 解码失败时返回 `Decode`，不会创建任何文件。
  pub fn analyze_image(&self, bytes: &[u8], id: &DocumentId) -> Result<ImageAnalysis, AnalysisError> {
    let frame = Frame::decode(bytes)?;
    debug!("[{}] 图片已解码: {}x{}", id, frame.width(), frame.height());

    let detections = self.detector.detect(&frame)?;
    let verdict = Verdict::from_detections(&detections);
    info!("[{}] 检测到 {} 个目标", id, detections.len());

    let frame = if detections.is_empty() {
      frame
    } else {
      self.annotator.annotate(&frame, &detections)
    };

    let (encoded, preview_base64) = self.encoding.encode_with_preview(&frame)?;

    let extension = self.encoding.extension();
    let mut file = tempfile::Builder::new()
      .prefix(&format!("{}_", id))
      .suffix(&format!(".{}", extension))
      .tempfile_in(self.results.scratch_dir())?;
    file.write_all(&encoded)?;
    file.flush()?;

    let artifact = PendingArtifact::new(
      file.into_temp_path(),
      id.artifact_file_name(extension),
      extension,
      self.encoding.content_type(),
    );

    Ok(ImageAnalysis {
      verdict,
      detections,
      frame,
      preview_base64,
      artifact,
    })
  }
}
