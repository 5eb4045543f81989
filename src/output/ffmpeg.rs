// 该文件是 Jianwei （鉴违） 项目的一部分。
// src/output/ffmpeg.rs - 基于 ffmpeg 命令行的视频编码
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

//! 视频文件输出模块
//!
//! rgb24 原始帧通过标准输入送给 `ffmpeg`，编码为 MPEG-4 Part 2 的 MP4 文件。
//! 帧不在磁盘上缓存，写入顺序即输出顺序。

use std::{
  fs::File,
  io::{self, Write},
  path::{Path, PathBuf},
  process::{Child, ChildStdin, Command, Stdio},
};

use tracing::{error, info, warn};

use super::FrameSink;
use crate::{
  AnalysisError,
  frame::Frame,
  stream::{StreamProperties, command_failure, read_log},
};

/// ffmpeg 视频输出
pub struct FfmpegVideoSink {
  path: PathBuf,
  child: Option<Child>,
  stdin: Option<ChildStdin>,
  log: File,
  width: u32,
  height: u32,
  frames: u64,
}

impl FfmpegVideoSink {
  /// 创建视频输出，写入 `path`（已存在的文件会被覆盖）
  pub fn create(
    ffmpeg: &Path,
    path: &Path,
    properties: &StreamProperties,
  ) -> Result<Self, AnalysisError> {
    let StreamProperties { width, height, fps } = *properties;

    let log = tempfile::tempfile()?;
    let mut child = Command::new(ffmpeg)
      .args(["-y", "-v", "error", "-f", "rawvideo", "-pix_fmt", "rgb24"])
      .arg("-s")
      .arg(format!("{}x{}", width, height))
      .arg("-r")
      .arg(fps.to_string())
      .args(["-i", "-", "-an", "-fps_mode", "passthrough"])
      .args(["-c:v", "mpeg4", "-q:v", "3", "-f", "mp4"])
      .arg(path)
      .stdin(Stdio::piped())
      .stdout(Stdio::null())
      .stderr(Stdio::from(log.try_clone()?))
      .spawn()
      .map_err(|e| command_failure(ffmpeg, e))?;

    let Some(stdin) = child.stdin.take() else {
      let _ = child.kill();
      let _ = child.wait();
      return Err(AnalysisError::UnavailableCapability(
        "无法获取 ffmpeg 标准输入".to_string(),
      ));
    };

    info!(
      "视频输出: {}x{} @ {} fps -> {}",
      width,
      height,
      fps,
      path.display()
    );

    Ok(Self {
      path: path.to_path_buf(),
      child: Some(child),
      stdin: Some(stdin),
      log,
      width,
      height,
      frames: 0,
    })
  }

  fn encoder_error(&self, context: &str) -> AnalysisError {
    let log = read_log(&self.log);
    error!("ffmpeg 错误: {}", log);
    AnalysisError::Encode(format!("{}: {}", context, log))
  }
}

impl FrameSink for FfmpegVideoSink {
  fn write_frame(&mut self, frame: &Frame) -> Result<(), AnalysisError> {
    if frame.dimensions() != (self.width, self.height) {
      return Err(AnalysisError::Encode(format!(
        "帧尺寸 {:?} 与输出尺寸 {}x{} 不一致",
        frame.dimensions(),
        self.width,
        self.height
      )));
    }

    let Some(stdin) = self.stdin.as_mut() else {
      return Err(AnalysisError::Encode("视频输出已关闭".to_string()));
    };

    match stdin.write_all(frame.as_raw()) {
      Ok(()) => {
        self.frames += 1;
        Ok(())
      }
      Err(e) if e.kind() == io::ErrorKind::BrokenPipe => {
        Err(self.encoder_error("ffmpeg 提前退出"))
      }
      Err(e) => Err(AnalysisError::Io(e)),
    }
  }

  fn finish(&mut self) -> Result<(), AnalysisError> {
    // 关闭标准输入，ffmpeg 收到 EOF 后写入文件尾
    drop(self.stdin.take());

    let Some(mut child) = self.child.take() else {
      return Ok(());
    };
    let status = child.wait()?;
    if !status.success() {
      return Err(self.encoder_error(&format!("ffmpeg 编码失败 ({})", status)));
    }

    info!("视频已保存: {} ({} 帧)", self.path.display(), self.frames);
    Ok(())
  }

  fn frames_written(&self) -> u64 {
    self.frames
  }
}

impl Drop for FfmpegVideoSink {
  fn drop(&mut self) {
    drop(self.stdin.take());
    if let Some(mut child) = self.child.take() {
      warn!("视频输出未完成，终止 ffmpeg 进程: {}", self.path.display());
      let _ = child.kill();
      let _ = child.wait();
    }
  }
}
