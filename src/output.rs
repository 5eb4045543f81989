// 该文件是 Jianwei （鉴违） 项目的一部分。
// src/output.rs - 输出定义
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

use crate::{AnalysisError, frame::Frame};

pub mod draw;
pub use self::draw::Annotator;

#[cfg(feature = "ffmpeg")]
mod ffmpeg;
#[cfg(feature = "ffmpeg")]
pub use self::ffmpeg::FfmpegVideoSink;

#[cfg(feature = "gstreamer")]
mod gstreamer;
#[cfg(feature = "gstreamer")]
pub use self::gstreamer::GStreamerVideoSink;

/// 视频帧写入端
///
/// 帧按写入顺序编码；`finish` 之后不应再写入。
/// 未调用 `finish` 就被销毁的实现必须释放其持有的进程或管道。
pub trait FrameSink {
  /// 写入一帧
  fn write_frame(&mut self, frame: &Frame) -> Result<(), AnalysisError>;

  /// 完成写入，生成完整的容器文件
  fn finish(&mut self) -> Result<(), AnalysisError>;

  /// 已写入的帧数
  fn frames_written(&self) -> u64;
}

impl<S: FrameSink + ?Sized> FrameSink for Box<S> {
  fn write_frame(&mut self, frame: &Frame) -> Result<(), AnalysisError> {
    (**self).write_frame(frame)
  }

  fn finish(&mut self) -> Result<(), AnalysisError> {
    (**self).finish()
  }

  fn frames_written(&self) -> u64 {
    (**self).frames_written()
  }
}
