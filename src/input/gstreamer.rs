// 该文件是 Jianwei （鉴违） 项目的一部分。
// src/input/gstreamer.rs - GStreamer 视频解码
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

//! # GStreamer 视频输入
//!
//! 管道为 `filesrc ! decodebin ! videoconvert ! video/x-raw,format=RGB ! appsink`。
//! 打开时先进入 PAUSED 状态完成预滚，从预滚样本的 caps 中读出尺寸与帧率。
//!
//! ## 系统依赖
//!
//! **Ubuntu/Debian:**
//! ```bash
//! sudo apt-get install libgstreamer1.0-dev libgstreamer-plugins-base1.0-dev
//! ```

use std::path::Path;

use gstreamer::{self as gst, prelude::*};
use gstreamer_app as gst_app;
use gstreamer_video as gst_video;
use tracing::{info, warn};

use super::FrameSource;
use crate::{AnalysisError, frame::Frame};

const PREROLL_TIMEOUT_SECONDS: u64 = 30;

fn pipeline_error(message: impl std::fmt::Display) -> AnalysisError {
  AnalysisError::Decode(format!("GStreamer 管道错误: {}", message))
}

/// GStreamer 视频输入源
pub struct GStreamerVideoSource {
  pipeline: gst::Pipeline,
  appsink: gst_app::AppSink,
  width: u32,
  height: u32,
  fps: Option<f64>,
  finished: bool,
}

impl GStreamerVideoSource {
  /// 打开视频文件
  pub fn open(path: &Path) -> Result<Self, AnalysisError> {
    gst::init().map_err(|e| AnalysisError::UnavailableCapability(format!("GStreamer: {}", e)))?;

    let location = path.to_string_lossy().replace('"', "\\\"");
    let description = format!(
      "filesrc location=\"{}\" ! decodebin ! videoconvert ! video/x-raw,format=RGB ! appsink name=sink sync=false",
      location
    );
    info!("GStreamer 输入管道: {}", description);

    let pipeline = gst::parse::launch(&description)
      .map_err(pipeline_error)?
      .downcast::<gst::Pipeline>()
      .map_err(|_| pipeline_error("无法创建管道"))?;
    let appsink = pipeline
      .by_name("sink")
      .ok_or_else(|| pipeline_error("找不到 appsink"))?
      .downcast::<gst_app::AppSink>()
      .map_err(|_| pipeline_error("无法转换为 appsink"))?;

    // 从这里开始，管道在 Drop 中被置为 Null
    let mut source = Self {
      pipeline,
      appsink,
      width: 0,
      height: 0,
      fps: None,
      finished: false,
    };
    source.preroll()?;
    source.pipeline.set_state(gst::State::Playing).map_err(pipeline_error)?;
    Ok(source)
  }

  fn preroll(&mut self) -> Result<(), AnalysisError> {
    self.pipeline.set_state(gst::State::Paused).map_err(pipeline_error)?;
    let (result, _, _) = self
      .pipeline
      .state(gst::ClockTime::from_seconds(PREROLL_TIMEOUT_SECONDS));
    result.map_err(|_| pipeline_error("无法读取视频容器"))?;

    // 预滚样本也会作为第一个样本被 pull_sample 返回
    let caps = match self.appsink.pull_preroll() {
      Ok(sample) => sample.caps_owned(),
      Err(_) => {
        // 没有任何帧的视频：尝试使用已协商的 caps
        self.finished = true;
        self
          .appsink
          .static_pad("sink")
          .and_then(|pad| pad.current_caps())
      }
    }
    .ok_or_else(|| pipeline_error("无法获取视频格式"))?;

    let info = gst_video::VideoInfo::from_caps(&caps).map_err(pipeline_error)?;
    let fps = info.fps();
    self.width = info.width();
    self.height = info.height();
    self.fps = (fps.numer() > 0 && fps.denom() > 0).then(|| fps.numer() as f64 / fps.denom() as f64);
    Ok(())
  }

  fn convert(sample: &gst::Sample) -> Result<Frame, AnalysisError> {
    let buffer = sample.buffer().ok_or_else(|| pipeline_error("样本中没有缓冲区"))?;
    let caps = sample.caps().ok_or_else(|| pipeline_error("样本中没有 caps"))?;
    let info = gst_video::VideoInfo::from_caps(caps).map_err(pipeline_error)?;

    let width = info.width() as usize;
    let height = info.height() as usize;
    let stride = info.stride()[0] as usize;
    let row = width * 3;

    let map = buffer.map_readable().map_err(pipeline_error)?;
    let data = map.as_slice();
    if stride < row || data.len() < stride * (height.max(1) - 1) + row {
      return Err(AnalysisError::Decode(format!(
        "缓冲区大小不匹配: {} 字节",
        data.len()
      )));
    }

    // 去掉行尾对齐填充
    let mut pixels = Vec::with_capacity(row * height);
    for y in 0..height {
      pixels.extend_from_slice(&data[y * stride..y * stride + row]);
    }
    Frame::from_rgb24(info.width(), info.height(), pixels)
      .ok_or_else(|| AnalysisError::Decode("无法创建 RGB 帧".to_string()))
  }

  fn bus_error(&self) -> Option<AnalysisError> {
    let bus = self.pipeline.bus()?;
    let message = bus.pop_filtered(&[gst::MessageType::Error])?;
    match message.view() {
      gst::MessageView::Error(err) => Some(pipeline_error(format!(
        "{} ({:?})",
        err.error(),
        err.debug()
      ))),
      _ => None,
    }
  }
}

impl Iterator for GStreamerVideoSource {
  type Item = Result<Frame, AnalysisError>;

  fn next(&mut self) -> Option<Self::Item> {
    if self.finished {
      return None;
    }

    match self.appsink.pull_sample() {
      Ok(sample) => Some(Self::convert(&sample)),
      Err(_) => {
        // EOS 或管道出错
        self.finished = true;
        self.bus_error().map(Err)
      }
    }
  }
}

impl FrameSource for GStreamerVideoSource {
  fn width(&self) -> u32 {
    self.width
  }

  fn height(&self) -> u32 {
    self.height
  }

  fn fps(&self) -> Option<f64> {
    self.fps
  }
}

impl Drop for GStreamerVideoSource {
  fn drop(&mut self) {
    if let Err(e) = self.pipeline.set_state(gst::State::Null) {
      warn!("无法停止 GStreamer 输入管道: {}", e);
    }
  }
}
