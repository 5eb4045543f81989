// 该文件是 Jianwei （鉴违） 项目的一部分。
// src/input.rs - 视频输入
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

#[cfg(feature = "ffmpeg")]
mod ffmpeg;
#[cfg(feature = "ffmpeg")]
pub use self::ffmpeg::FfmpegVideoSource;

#[cfg(feature = "gstreamer")]
mod gstreamer;
#[cfg(feature = "gstreamer")]
pub use self::gstreamer::GStreamerVideoSource;

/// 顺序读取的视频帧来源
///
/// 迭代器按输入顺序产出帧，结束后返回 `None`；
/// 读取失败时产出一个错误，之后不再产出任何帧。
pub trait FrameSource: Iterator<Item = Result<Frame, AnalysisError>> {
  /// 帧宽度
  fn width(&self) -> u32;

  /// 帧高度
  fn height(&self) -> u32;

  /// 帧率（来源未提供时为 `None`）
  fn fps(&self) -> Option<f64>;
}

/// 解析 "30000/1001" 或 "25" 形式的帧率，非正值视为缺失
pub(crate) fn parse_frame_rate(text: &str) -> Option<f64> {
  let fps = match text.split_once('/') {
    Some((num, den)) => {
      let num: f64 = num.trim().parse().ok()?;
      let den: f64 = den.trim().parse().ok()?;
      if den == 0.0 {
        return None;
      }
      num / den
    }
    None => text.trim().parse().ok()?,
  };
  (fps.is_finite() && fps > 0.0).then_some(fps)
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn parses_rational_frame_rates() {
    assert_eq!(parse_frame_rate("30/1"), Some(30.0));
    assert_eq!(parse_frame_rate("25"), Some(25.0));
    let ntsc = parse_frame_rate("30000/1001").unwrap();
    assert!((ntsc - 29.97).abs() < 0.01);
  }

  #[test]
  fn missing_frame_rates_are_none() {
    assert_eq!(parse_frame_rate("0/0"), None);
    assert_eq!(parse_frame_rate("0/1"), None);
    assert_eq!(parse_frame_rate(""), None);
    assert_eq!(parse_frame_rate("N/A"), None);
  }
}
