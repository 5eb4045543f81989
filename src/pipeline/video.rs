// 该文件是 Jianwei （鉴违） 项目的一部分。
// src/pipeline/video.rs - 视频分析流程
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

use super::{Analyzer, PendingArtifact, sanitize_filename};
use crate::{
  AnalysisError,
  model::DetectorAdapter,
  report::{DocumentId, Verdict},
  stream::{StreamHandle, StreamProperties},
};

/// 视频分析结果（视频不生成内联预览）
#[derive(Debug)]
pub struct VideoAnalysis {
  pub verdict: Verdict,
  /// 输出帧数，与输入帧数一致
  pub frames: u64,
  pub properties: StreamProperties,
  pub artifact: PendingArtifact,
}

impl Analyzer {
  /// 分析一段视频
  ///
  /// 上传内容先写入以文档标识命名的临时文件，再逐帧检测、标注并写入输出，
  /// 第 N 个输出帧对应第 N 个输入帧。任一帧失败即终止整个请求；
  /// 流句柄与两个临时文件在所有退出路径上都会被释放。
  pub fn analyze_video(
    &self,
    bytes: &[u8],
    filename: &str,
    id: &DocumentId,
  ) -> Result<VideoAnalysis, AnalysisError> {
    let detector = self.detector.ensure_ready()?;
    let scratch = self.results.scratch_dir();

    let mut input = tempfile::Builder::new()
      .prefix(&format!("{}_", id))
      .suffix(&format!("_{}", sanitize_filename(filename)))
      .tempfile_in(&scratch)?;
    input.write_all(bytes)?;
    input.flush()?;

    let extension = self.codec.container_extension();
    let output = tempfile::Builder::new()
      .prefix(&format!("{}_", id))
      .suffix(&format!(".{}", extension))
      .tempfile_in(&scratch)?
      .into_temp_path();

    let mut stream = StreamHandle::open(self.codec.as_ref(), input.path(), &output)?;
    let properties = *stream.properties();
    info!(
      "[{}] 开始处理视频 {} ({}x{} @ {} fps)",
      id, filename, properties.width, properties.height, properties.fps
    );

    let mut verdict = Verdict::default();
    let mut index = 0u64;
    while let Some(frame) = stream.read_frame()? {
      let detections = DetectorAdapter::detect_with(&**detector, &frame)?;
      verdict.accumulate(&detections);

      if detections.is_empty() {
        stream.write_frame(&frame)?;
      } else {
        debug!("[{}] 第 {} 帧检测到 {} 个目标", id, index, detections.len());
        stream.write_frame(&self.annotator.annotate(&frame, &detections))?;
      }
      index += 1;
    }

    let frames = stream.close()?;
    info!(
      "[{}] 视频处理完成: {} 帧，{}",
      id,
      frames,
      verdict.label()
    );

    Ok(VideoAnalysis {
      verdict,
      frames,
      properties,
      artifact: PendingArtifact::new(
        output,
        id.artifact_file_name(extension),
        extension,
        self.codec.content_type(),
      ),
    })
  }
}
