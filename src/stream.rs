// 该文件是 Jianwei （鉴违） 项目的一部分。
// src/stream.rs - 视频流句柄与编解码后端
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

//! 视频的读写两端由 [`StreamHandle`] 独占持有。
//!
//! 输出的尺寸与帧率在打开时由输入确定，之后不再变化；
//! 句柄在任何退出路径上都会释放两端（正常关闭走 [`StreamHandle::close`]，
//! 其余情况由 `Drop` 负责）。

use std::{path::Path, sync::Arc};

use clap::ValueEnum;
use tracing::{debug, info, warn};

use crate::{AnalysisError, frame::Frame, input::FrameSource, output::FrameSink};

/// 输入未提供帧率时使用的帧率
pub const DEFAULT_FPS: f64 = 24.0;

/// 输出流属性，打开时从输入确定
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StreamProperties {
  pub width: u32,
  pub height: u32,
  pub fps: f64,
}

impl StreamProperties {
  /// 由输入源的属性得到输出属性，帧率缺失或非正时使用 [`DEFAULT_FPS`]
  pub fn from_source(source: &dyn FrameSource) -> Self {
    let fps = source
      .fps()
      .filter(|fps| fps.is_finite() && *fps > 0.0)
      .unwrap_or(DEFAULT_FPS);
    Self {
      width: source.width(),
      height: source.height(),
      fps,
    }
  }
}

/// 视频编解码后端
pub trait VideoCodec: Send + Sync {
  /// 后端名称
  fn name(&self) -> &'static str;

  /// 打开输入文件
  fn open_source(&self, path: &Path) -> Result<Box<dyn FrameSource>, AnalysisError>;

  /// 创建输出文件
  fn open_sink(
    &self,
    path: &Path,
    properties: &StreamProperties,
  ) -> Result<Box<dyn FrameSink>, AnalysisError>;

  /// 输出容器的扩展名
  fn container_extension(&self) -> &'static str {
    "mp4"
  }

  /// 输出容器的 MIME 类型
  fn content_type(&self) -> &'static str {
    "video/mp4"
  }
}

/// 可选的视频后端
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum VideoBackend {
  Ffmpeg,
  Gstreamer,
}

impl VideoBackend {
  /// 构建对应的后端；未编译进来的后端不可用
  pub fn codec(self) -> Result<Arc<dyn VideoCodec>, AnalysisError> {
    match self {
      #[cfg(feature = "ffmpeg")]
      VideoBackend::Ffmpeg => Ok(Arc::new(FfmpegCodec::default())),
      #[cfg(feature = "gstreamer")]
      VideoBackend::Gstreamer => Ok(Arc::new(GStreamerCodec)),
      #[allow(unreachable_patterns)]
      backend => Err(AnalysisError::UnavailableCapability(format!(
        "视频后端 {:?} 未启用",
        backend
      ))),
    }
  }
}

/// 基于 ffmpeg/ffprobe 命令行的后端
#[cfg(feature = "ffmpeg")]
#[derive(Debug, Clone)]
pub struct FfmpegCodec {
  pub ffmpeg: std::path::PathBuf,
  pub ffprobe: std::path::PathBuf,
}

#[cfg(feature = "ffmpeg")]
impl Default for FfmpegCodec {
  fn default() -> Self {
    Self {
      ffmpeg: "ffmpeg".into(),
      ffprobe: "ffprobe".into(),
    }
  }
}

#[cfg(feature = "ffmpeg")]
impl VideoCodec for FfmpegCodec {
  fn name(&self) -> &'static str {
    "ffmpeg"
  }

  fn open_source(&self, path: &Path) -> Result<Box<dyn FrameSource>, AnalysisError> {
    let source = crate::input::FfmpegVideoSource::open(&self.ffmpeg, &self.ffprobe, path)?;
    Ok(Box::new(source))
  }

  fn open_sink(
    &self,
    path: &Path,
    properties: &StreamProperties,
  ) -> Result<Box<dyn FrameSink>, AnalysisError> {
    let sink = crate::output::FfmpegVideoSink::create(&self.ffmpeg, path, properties)?;
    Ok(Box::new(sink))
  }
}

/// 基于 GStreamer 的后端
#[cfg(feature = "gstreamer")]
#[derive(Debug, Clone, Copy, Default)]
pub struct GStreamerCodec;

#[cfg(feature = "gstreamer")]
impl VideoCodec for GStreamerCodec {
  fn name(&self) -> &'static str {
    "gstreamer"
  }

  fn open_source(&self, path: &Path) -> Result<Box<dyn FrameSource>, AnalysisError> {
    Ok(Box::new(crate::input::GStreamerVideoSource::open(path)?))
  }

  fn open_sink(
    &self,
    path: &Path,
    properties: &StreamProperties,
  ) -> Result<Box<dyn FrameSink>, AnalysisError> {
    Ok(Box::new(crate::output::GStreamerVideoSink::create(
      path, properties,
    )?))
  }
}

/// 外部命令启动失败：找不到可执行文件视为能力不可用
#[cfg(feature = "ffmpeg")]
pub(crate) fn command_failure(program: &Path, err: std::io::Error) -> AnalysisError {
  if err.kind() == std::io::ErrorKind::NotFound {
    AnalysisError::UnavailableCapability(format!("找不到可执行文件 {}", program.display()))
  } else {
    AnalysisError::Io(err)
  }
}

/// 读取子进程写入临时文件的日志
#[cfg(feature = "ffmpeg")]
pub(crate) fn read_log(mut log: &std::fs::File) -> String {
  use std::io::{Read, Seek};

  let mut text = String::new();
  if log.rewind().is_ok() {
    let _ = log.read_to_string(&mut text);
  }
  text.trim().to_string()
}

/// 视频流句柄：独占一个输入源与一个输出端
pub struct StreamHandle {
  source: Option<Box<dyn FrameSource>>,
  sink: Option<Box<dyn FrameSink>>,
  properties: StreamProperties,
  frames_read: u64,
}

impl std::fmt::Debug for StreamHandle {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("StreamHandle")
      .field("properties", &self.properties)
      .field("frames_read", &self.frames_read)
      .field("open", &self.sink.is_some())
      .finish()
  }
}

impl StreamHandle {
  /// 打开输入并按输入属性创建输出
  ///
  /// 输入无法打开或尺寸无效时返回 `Decode`，此时不会创建输出；
  /// 输出创建失败时已打开的输入随之释放。
  pub fn open(codec: &dyn VideoCodec, input: &Path, output: &Path) -> Result<Self, AnalysisError> {
    let source = codec.open_source(input)?;
    let properties = StreamProperties::from_source(source.as_ref());
    if properties.width == 0 || properties.height == 0 {
      return Err(AnalysisError::Decode(format!(
        "视频尺寸无效: {}x{}",
        properties.width, properties.height
      )));
    }
    if source.fps().is_none_or(|fps| fps <= 0.0) {
      debug!("输入未提供帧率，使用默认帧率 {}", DEFAULT_FPS);
    }

    let sink = codec.open_sink(output, &properties)?;
    info!(
      "视频流已打开 ({}): {}x{} @ {} fps",
      codec.name(),
      properties.width,
      properties.height,
      properties.fps
    );

    Ok(Self {
      source: Some(source),
      sink: Some(sink),
      properties,
      frames_read: 0,
    })
  }

  pub fn properties(&self) -> &StreamProperties {
    &self.properties
  }

  /// 读取下一帧，流结束时返回 `None`
  ///
  /// 尺寸与打开时不同的帧会被拒绝。
  pub fn read_frame(&mut self) -> Result<Option<Frame>, AnalysisError> {
    let Some(source) = self.source.as_mut() else {
      return Ok(None);
    };
    let Some(frame) = source.next().transpose()? else {
      return Ok(None);
    };

    let expected = (self.properties.width, self.properties.height);
    if frame.dimensions() != expected {
      return Err(AnalysisError::Decode(format!(
        "第 {} 帧尺寸 {:?} 与视频尺寸 {:?} 不一致",
        self.frames_read,
        frame.dimensions(),
        expected
      )));
    }

    self.frames_read += 1;
    Ok(Some(frame))
  }

  /// 写入一帧
  pub fn write_frame(&mut self, frame: &Frame) -> Result<(), AnalysisError> {
    match self.sink.as_mut() {
      Some(sink) => sink.write_frame(frame),
      None => Err(AnalysisError::Encode("视频输出已关闭".to_string())),
    }
  }

  /// 正常结束：完成输出并释放输入，返回写入的帧数
  pub fn close(mut self) -> Result<u64, AnalysisError> {
    drop(self.source.take());
    let Some(mut sink) = self.sink.take() else {
      return Ok(0);
    };
    sink.finish()?;
    let frames = sink.frames_written();
    debug!("视频流已关闭: 读取 {} 帧，写入 {} 帧", self.frames_read, frames);
    Ok(frames)
  }
}

impl Drop for StreamHandle {
  fn drop(&mut self) {
    if self.sink.is_some() {
      warn!("视频流未正常关闭，释放输入与输出 (已读取 {} 帧)", self.frames_read);
    }
    // 先释放输入，再释放输出
    drop(self.source.take());
    drop(self.sink.take());
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::{
    collections::VecDeque,
    sync::{
      Mutex,
      atomic::{AtomicUsize, Ordering},
    },
  };

  #[derive(Default)]
  struct Counters {
    sources_dropped: AtomicUsize,
    sinks_dropped: AtomicUsize,
    finished: AtomicUsize,
  }

  struct ScriptedSource {
    frames: VecDeque<Result<Frame, AnalysisError>>,
    size: (u32, u32),
    fps: Option<f64>,
    counters: Arc<Counters>,
  }

  impl Iterator for ScriptedSource {
    type Item = Result<Frame, AnalysisError>;

    fn next(&mut self) -> Option<Self::Item> {
      self.frames.pop_front()
    }
  }

  impl FrameSource for ScriptedSource {
    fn width(&self) -> u32 {
      self.size.0
    }

    fn height(&self) -> u32 {
      self.size.1
    }

    fn fps(&self) -> Option<f64> {
      self.fps
    }
  }

  impl Drop for ScriptedSource {
    fn drop(&mut self) {
      self.counters.sources_dropped.fetch_add(1, Ordering::SeqCst);
    }
  }

  struct CountingSink {
    frames: u64,
    counters: Arc<Counters>,
  }

  impl FrameSink for CountingSink {
    fn write_frame(&mut self, _frame: &Frame) -> Result<(), AnalysisError> {
      self.frames += 1;
      Ok(())
    }

    fn finish(&mut self) -> Result<(), AnalysisError> {
      self.counters.finished.fetch_add(1, Ordering::SeqCst);
      Ok(())
    }

    fn frames_written(&self) -> u64 {
      self.frames
    }
  }

  impl Drop for CountingSink {
    fn drop(&mut self) {
      self.counters.sinks_dropped.fetch_add(1, Ordering::SeqCst);
    }
  }

  struct ScriptedCodec {
    script: Mutex<Option<ScriptedSource>>,
    counters: Arc<Counters>,
    properties: Mutex<Option<StreamProperties>>,
  }

  impl ScriptedCodec {
    fn new(frames: Vec<Result<Frame, AnalysisError>>, size: (u32, u32), fps: Option<f64>) -> Self {
      let counters = Arc::new(Counters::default());
      Self {
        script: Mutex::new(Some(ScriptedSource {
          frames: frames.into(),
          size,
          fps,
          counters: Arc::clone(&counters),
        })),
        counters,
        properties: Mutex::new(None),
      }
    }
  }

  impl VideoCodec for ScriptedCodec {
    fn name(&self) -> &'static str {
      "scripted"
    }

    fn open_source(&self, _path: &Path) -> Result<Box<dyn FrameSource>, AnalysisError> {
      let source = self.script.lock().unwrap().take().unwrap();
      Ok(Box::new(source))
    }

    fn open_sink(
      &self,
      _path: &Path,
      properties: &StreamProperties,
    ) -> Result<Box<dyn FrameSink>, AnalysisError> {
      *self.properties.lock().unwrap() = Some(*properties);
      Ok(Box::new(CountingSink {
        frames: 0,
        counters: Arc::clone(&self.counters),
      }))
    }
  }

  fn black(w: u32, h: u32) -> Frame {
    Frame::filled(w, h, [0, 0, 0])
  }

  #[test]
  fn missing_frame_rate_falls_back_to_default() {
    let codec = ScriptedCodec::new(vec![], (8, 8), None);
    let handle = StreamHandle::open(&codec, Path::new("in"), Path::new("out")).unwrap();
    assert_eq!(handle.properties().fps, DEFAULT_FPS);
    assert_eq!(handle.close().unwrap(), 0);
    assert_eq!(codec.properties.lock().unwrap().unwrap().fps, DEFAULT_FPS);
  }

  #[test]
  fn zero_frame_rate_falls_back_to_default() {
    let codec = ScriptedCodec::new(vec![], (8, 8), Some(0.0));
    let handle = StreamHandle::open(&codec, Path::new("in"), Path::new("out")).unwrap();
    assert_eq!(handle.properties().fps, DEFAULT_FPS);
  }

  #[test]
  fn reported_frame_rate_is_kept() {
    let codec = ScriptedCodec::new(vec![], (8, 8), Some(29.97));
    let handle = StreamHandle::open(&codec, Path::new("in"), Path::new("out")).unwrap();
    assert_eq!(handle.properties().fps, 29.97);
  }

  #[test]
  fn frames_with_changed_geometry_are_rejected() {
    let codec = ScriptedCodec::new(vec![Ok(black(8, 8)), Ok(black(16, 8))], (8, 8), Some(25.0));
    let mut handle = StreamHandle::open(&codec, Path::new("in"), Path::new("out")).unwrap();
    assert!(handle.read_frame().unwrap().is_some());
    let err = handle.read_frame().unwrap_err();
    assert!(matches!(err, AnalysisError::Decode(_)));
  }

  #[test]
  fn close_finishes_sink_and_releases_both_sides() {
    let codec = ScriptedCodec::new(vec![Ok(black(4, 4)), Ok(black(4, 4))], (4, 4), Some(10.0));
    let mut handle = StreamHandle::open(&codec, Path::new("in"), Path::new("out")).unwrap();
    while let Some(frame) = handle.read_frame().unwrap() {
      handle.write_frame(&frame).unwrap();
    }
    assert_eq!(handle.close().unwrap(), 2);
    assert_eq!(codec.counters.finished.load(Ordering::SeqCst), 1);
    assert_eq!(codec.counters.sources_dropped.load(Ordering::SeqCst), 1);
    assert_eq!(codec.counters.sinks_dropped.load(Ordering::SeqCst), 1);
  }

  #[test]
  fn early_drop_releases_without_finishing() {
    let codec = ScriptedCodec::new(
      vec![Ok(black(4, 4)), Err(AnalysisError::Decode("损坏的数据包".into()))],
      (4, 4),
      Some(10.0),
    );
    {
      let mut handle = StreamHandle::open(&codec, Path::new("in"), Path::new("out")).unwrap();
      let frame = handle.read_frame().unwrap().unwrap();
      handle.write_frame(&frame).unwrap();
      assert!(handle.read_frame().is_err());
    }
    assert_eq!(codec.counters.finished.load(Ordering::SeqCst), 0);
    assert_eq!(codec.counters.sources_dropped.load(Ordering::SeqCst), 1);
    assert_eq!(codec.counters.sinks_dropped.load(Ordering::SeqCst), 1);
  }

  #[test]
  fn empty_geometry_is_a_decode_error() {
    let codec = ScriptedCodec::new(vec![], (0, 0), Some(25.0));
    let err = StreamHandle::open(&codec, Path::new("in"), Path::new("out")).unwrap_err();
    assert!(matches!(err, AnalysisError::Decode(_)));
    assert_eq!(codec.counters.sources_dropped.load(Ordering::SeqCst), 1);
    assert!(codec.properties.lock().unwrap().is_none());
  }
}
