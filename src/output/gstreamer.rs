// 该文件是 Jianwei （鉴违） 项目的一部分。
// src/output/gstreamer.rs - GStreamer 视频文件输出
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

//! # GStreamer 视频文件输出
//!
//! 管道为 `appsrc ! videoconvert ! x264enc ! h264parse ! mp4mux ! filesink`。
//! 结束时发送 EOS，并在总线上等待 EOS 消息后再停止管道，保证文件尾被写入。

use std::path::{Path, PathBuf};

use gstreamer::{self as gst, prelude::*};
use gstreamer_app as gst_app;
use gstreamer_video as gst_video;
use tracing::{info, warn};

use super::FrameSink;
use crate::{AnalysisError, frame::Frame, stream::StreamProperties};

const EOS_TIMEOUT_SECONDS: u64 = 60;

fn pipeline_error(message: impl std::fmt::Display) -> AnalysisError {
  AnalysisError::Encode(format!("GStreamer 管道错误: {}", message))
}

/// GStreamer 视频文件输出
pub struct GStreamerVideoSink {
  path: PathBuf,
  pipeline: gst::Pipeline,
  appsrc: gst_app::AppSrc,
  info: gst_video::VideoInfo,
  frame_duration: gst::ClockTime,
  frames: u64,
  finished: bool,
}

impl GStreamerVideoSink {
  /// 创建视频输出
  pub fn create(path: &Path, properties: &StreamProperties) -> Result<Self, AnalysisError> {
    gst::init().map_err(|e| AnalysisError::UnavailableCapability(format!("GStreamer: {}", e)))?;

    let StreamProperties { width, height, fps } = *properties;
    let framerate = gst::Fraction::new((fps * 1000.0).round() as i32, 1000);

    let location = path.to_string_lossy().replace('"', "\\\"");
    let description = format!(
      "appsrc name=src ! videoconvert ! video/x-raw,format=I420 ! x264enc speed-preset=fast ! h264parse ! mp4mux ! filesink location=\"{}\"",
      location
    );
    info!("GStreamer 输出管道: {}", description);

    let pipeline = gst::parse::launch(&description)
      .map_err(pipeline_error)?
      .downcast::<gst::Pipeline>()
      .map_err(|_| pipeline_error("无法创建管道"))?;
    let appsrc = pipeline
      .by_name("src")
      .ok_or_else(|| pipeline_error("找不到 appsrc"))?
      .downcast::<gst_app::AppSrc>()
      .map_err(|_| pipeline_error("无法转换为 appsrc"))?;

    let info = gst_video::VideoInfo::builder(gst_video::VideoFormat::Rgb, width, height)
      .fps(framerate)
      .build()
      .map_err(pipeline_error)?;
    let caps = info.to_caps().map_err(pipeline_error)?;
    appsrc.set_caps(Some(&caps));
    appsrc.set_format(gst::Format::Time);

    pipeline.set_state(gst::State::Playing).map_err(pipeline_error)?;

    Ok(Self {
      path: path.to_path_buf(),
      pipeline,
      appsrc,
      info,
      frame_duration: gst::ClockTime::from_nseconds((1_000_000_000f64 / fps).round() as u64),
      frames: 0,
      finished: false,
    })
  }

  /// 按 VideoInfo 的行对齐要求拷贝像素
  fn pack(&self, frame: &Frame) -> Vec<u8> {
    let stride = self.info.stride()[0] as usize;
    let row = frame.width() as usize * 3;
    let mut data = vec![0u8; self.info.size()];
    for (y, src) in frame.as_raw().chunks_exact(row).enumerate() {
      data[y * stride..y * stride + row].copy_from_slice(src);
    }
    data
  }

  fn wait_for_eos(&self) -> Result<(), AnalysisError> {
    let bus = self.pipeline.bus().ok_or_else(|| pipeline_error("管道没有总线"))?;
    let message = bus
      .timed_pop_filtered(
        gst::ClockTime::from_seconds(EOS_TIMEOUT_SECONDS),
        &[gst::MessageType::Eos, gst::MessageType::Error],
      )
      .ok_or_else(|| pipeline_error("等待 EOS 超时"))?;

    match message.view() {
      gst::MessageView::Eos(..) => Ok(()),
      gst::MessageView::Error(err) => Err(pipeline_error(format!(
        "{} ({:?})",
        err.error(),
        err.debug()
      ))),
      _ => Ok(()),
    }
  }
}

impl FrameSink for GStreamerVideoSink {
  fn write_frame(&mut self, frame: &Frame) -> Result<(), AnalysisError> {
    if self.finished {
      return Err(AnalysisError::Encode("视频输出已关闭".to_string()));
    }
    if frame.dimensions() != (self.info.width(), self.info.height()) {
      return Err(AnalysisError::Encode(format!(
        "帧尺寸 {:?} 与输出尺寸 {}x{} 不一致",
        frame.dimensions(),
        self.info.width(),
        self.info.height()
      )));
    }

    let mut buffer = gst::Buffer::from_mut_slice(self.pack(frame));
    {
      let buffer = buffer
        .get_mut()
        .ok_or_else(|| pipeline_error("无法写入缓冲区"))?;
      buffer.set_pts(gst::ClockTime::from_nseconds(
        self.frame_duration.nseconds() * self.frames,
      ));
      buffer.set_duration(self.frame_duration);
    }

    self
      .appsrc
      .push_buffer(buffer)
      .map_err(|e| pipeline_error(format!("无法推送缓冲区: {:?}", e)))?;
    self.frames += 1;
    Ok(())
  }

  fn finish(&mut self) -> Result<(), AnalysisError> {
    if self.finished {
      return Ok(());
    }
    self.finished = true;

    self
      .appsrc
      .end_of_stream()
      .map_err(|e| pipeline_error(format!("无法发送 EOS: {:?}", e)))?;
    let result = self.wait_for_eos();
    self.pipeline.set_state(gst::State::Null).map_err(pipeline_error)?;
    result?;

    info!("视频已保存: {} ({} 帧)", self.path.display(), self.frames);
    Ok(())
  }

  fn frames_written(&self) -> u64 {
    self.frames
  }
}

impl Drop for GStreamerVideoSink {
  fn drop(&mut self) {
    if !self.finished {
      warn!("视频输出未完成，停止管道: {}", self.path.display());
    }
    if let Err(e) = self.pipeline.set_state(gst::State::Null) {
      warn!("无法停止 GStreamer 输出管道: {}", e);
    }
  }
}
