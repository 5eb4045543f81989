// 该文件是 Jianwei （鉴违） 项目的一部分。
// src/input/ffmpeg.rs - 基于 ffmpeg 命令行的视频解码
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

//! 视频解码模块
//!
//! 先用 `ffprobe` 读取第一个视频流的尺寸与帧率，
//! 再由 `ffmpeg` 把视频解码为 rgb24 原始帧写到标准输出，逐帧读取。
//!
//! # 依赖
//!
//! 此模块需要系统安装 ffmpeg 与 ffprobe 命令行工具。

use std::{
  ffi::OsString,
  fs::File,
  io::{self, Read},
  path::Path,
  process::{Child, ChildStdout, Command, Stdio},
};

use serde::Deserialize;
use tracing::{debug, info, warn};

use super::{FrameSource, parse_frame_rate};
use crate::{
  AnalysisError,
  frame::Frame,
  stream::{command_failure, read_log},
};

#[derive(Debug, Deserialize)]
struct ProbeOutput {
  #[serde(default)]
  streams: Vec<ProbeStream>,
}

#[derive(Debug, Deserialize)]
struct ProbeStream {
  width: Option<u32>,
  height: Option<u32>,
  avg_frame_rate: Option<String>,
  r_frame_rate: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct VideoProbe {
  width: u32,
  height: u32,
  fps: Option<f64>,
}

fn probe(ffprobe: &Path, path: &Path) -> Result<VideoProbe, AnalysisError> {
  let output = Command::new(ffprobe)
    .args([
      "-v",
      "error",
      "-select_streams",
      "v:0",
      "-show_entries",
      "stream=width,height,avg_frame_rate,r_frame_rate",
      "-print_format",
      "json",
    ])
    .arg(path)
    .stdin(Stdio::null())
    .output()
    .map_err(|e| command_failure(ffprobe, e))?;

  if !output.status.success() {
    let stderr = String::from_utf8_lossy(&output.stderr);
    return Err(AnalysisError::Decode(format!(
      "无法读取视频容器: {}",
      stderr.trim()
    )));
  }

  parse_probe_output(&output.stdout)
}

fn parse_probe_output(json: &[u8]) -> Result<VideoProbe, AnalysisError> {
  let output: ProbeOutput = serde_json::from_slice(json)
    .map_err(|e| AnalysisError::Decode(format!("无法解析 ffprobe 输出: {}", e)))?;

  let stream = output
    .streams
    .into_iter()
    .next()
    .ok_or_else(|| AnalysisError::Decode("找不到视频流".to_string()))?;

  let (width, height) = match (stream.width, stream.height) {
    (Some(w), Some(h)) if w > 0 && h > 0 => (w, h),
    _ => return Err(AnalysisError::Decode("视频流缺少有效的尺寸".to_string())),
  };

  // 平均帧率优先，缺失时退回到基础帧率
  let fps = stream
    .avg_frame_rate
    .as_deref()
    .and_then(parse_frame_rate)
    .or_else(|| stream.r_frame_rate.as_deref().and_then(parse_frame_rate));

  Ok(VideoProbe { width, height, fps })
}

/// 解码参数
///
/// `-fps_mode passthrough` 保证每个解码出的帧恰好输出一次，
/// 可变帧率的输入不会被补帧或丢帧。
fn decode_args(path: &Path) -> Vec<OsString> {
  let mut args: Vec<OsString> = ["-nostdin", "-v", "error", "-noautorotate", "-i"]
    .into_iter()
    .map(OsString::from)
    .collect();
  args.push(path.as_os_str().to_owned());
  args.extend(
    [
      "-map", "0:v:0", "-fps_mode", "passthrough", "-f", "rawvideo", "-pix_fmt", "rgb24", "-",
    ]
    .into_iter()
    .map(OsString::from),
  );
  args
}

/// 读满缓冲区，返回实际读到的字节数（遇到流结束时可能不足）
fn read_full<R: Read>(reader: &mut R, buf: &mut [u8]) -> io::Result<usize> {
  let mut filled = 0;
  while filled < buf.len() {
    match reader.read(&mut buf[filled..]) {
      Ok(0) => break,
      Ok(n) => filled += n,
      Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
      Err(e) => return Err(e),
    }
  }
  Ok(filled)
}

/// ffmpeg 视频输入源
pub struct FfmpegVideoSource {
  child: Child,
  stdout: ChildStdout,
  /// ffmpeg 的错误输出写入匿名临时文件，避免管道写满阻塞
  log: File,
  width: u32,
  height: u32,
  fps: Option<f64>,
  frame_size: usize,
  frame_index: u64,
  finished: bool,
}

impl FfmpegVideoSource {
  /// 打开视频文件
  pub fn open(ffmpeg: &Path, ffprobe: &Path, path: &Path) -> Result<Self, AnalysisError> {
    let VideoProbe { width, height, fps } = probe(ffprobe, path)?;
    info!(
      "打开视频: {} ({}x{}, 帧率 {:?})",
      path.display(),
      width,
      height,
      fps
    );

    let log = tempfile::tempfile()?;
    let mut child = Command::new(ffmpeg)
      .args(decode_args(path))
      .stdin(Stdio::null())
      .stdout(Stdio::piped())
      .stderr(Stdio::from(log.try_clone()?))
      .spawn()
      .map_err(|e| command_failure(ffmpeg, e))?;

    let Some(stdout) = child.stdout.take() else {
      let _ = child.kill();
      let _ = child.wait();
      return Err(AnalysisError::UnavailableCapability(
        "无法获取 ffmpeg 标准输出".to_string(),
      ));
    };

    Ok(Self {
      child,
      stdout,
      log,
      width,
      height,
      fps,
      frame_size: width as usize * height as usize * 3,
      frame_index: 0,
      finished: false,
    })
  }

  fn end_of_stream(&mut self) -> Option<Result<Frame, AnalysisError>> {
    self.finished = true;
    match self.child.wait() {
      Ok(status) if status.success() => {
        debug!("视频解码结束，共 {} 帧", self.frame_index);
        None
      }
      Ok(status) => Some(Err(AnalysisError::Decode(format!(
        "ffmpeg 解码失败 ({}): {}",
        status,
        read_log(&self.log)
      )))),
      Err(e) => Some(Err(AnalysisError::Io(e))),
    }
  }
}

impl Iterator for FfmpegVideoSource {
  type Item = Result<Frame, AnalysisError>;

  fn next(&mut self) -> Option<Self::Item> {
    if self.finished {
      return None;
    }

    let mut data = vec![0u8; self.frame_size];
    match read_full(&mut self.stdout, &mut data) {
      Ok(0) => self.end_of_stream(),
      Ok(n) if n == self.frame_size => {
        self.frame_index += 1;
        Some(
          Frame::from_rgb24(self.width, self.height, data)
            .ok_or_else(|| AnalysisError::Decode("无法创建 RGB 帧".to_string())),
        )
      }
      Ok(n) => {
        self.finished = true;
        Some(Err(AnalysisError::Decode(format!(
          "第 {} 帧数据不完整: 期望 {} 字节，实际 {} 字节",
          self.frame_index, self.frame_size, n
        ))))
      }
      Err(e) => {
        self.finished = true;
        Some(Err(AnalysisError::Io(e)))
      }
    }
  }
}

impl FrameSource for FfmpegVideoSource {
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

impl Drop for FfmpegVideoSource {
  fn drop(&mut self) {
    if let Ok(None) = self.child.try_wait() {
      warn!("视频解码未读完，终止 ffmpeg 进程");
      let _ = self.child.kill();
      let _ = self.child.wait();
    }
  }
}
