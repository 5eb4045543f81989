// 该文件是 Jianwei （鉴违） 项目的一部分。
// src/report.rs - 分析结果打包
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

use std::fmt;

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Serialize, Serializer};
use uuid::Uuid;

use crate::model::DetectionSet;

pub const VIOLATION_DETECTED: &str = "Violation Detected";
pub const NO_VIOLATION: &str = "No Violation";
/// 本地结果文件名中紧随文档标识的标记
pub const ARTIFACT_MARKER: &str = "_annotated";

/// 单次分析的唯一标识，用于命名临时文件与持久化文件
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DocumentId(Uuid);

impl DocumentId {
  pub fn new() -> Self {
    Self(Uuid::new_v4())
  }

  pub fn as_uuid(&self) -> &Uuid {
    &self.0
  }

  /// 本地结果目录中的文件名: `<id>_annotated.<ext>`
  pub fn artifact_file_name(&self, extension: &str) -> String {
    format!("{}{}.{}", self, ARTIFACT_MARKER, extension)
  }

  /// 对象存储中的目标路径: `images/<id>.<ext>` 或 `videos/<id>.<ext>`
  pub fn destination(&self, media_type: MediaType, extension: &str) -> String {
    format!("{}/{}.{}", media_type.folder(), self, extension)
  }
}

impl Default for DocumentId {
  fn default() -> Self {
    Self::new()
  }
}

impl fmt::Display for DocumentId {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}", self.0.simple())
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaType {
  Image,
  Video,
}

impl MediaType {
  pub fn folder(&self) -> &'static str {
    match self {
      MediaType::Image => "images",
      MediaType::Video => "videos",
    }
  }
}

impl fmt::Display for MediaType {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      MediaType::Image => f.write_str("image"),
      MediaType::Video => f.write_str("video"),
    }
  }
}

/// 违规判定：文档内任意一帧存在检测结果即为违规
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Verdict {
  violation: bool,
}

impl Verdict {
  pub fn new(violation: bool) -> Self {
    Self { violation }
  }

  pub fn from_detections(detections: &DetectionSet) -> Self {
    Self::new(!detections.is_empty())
  }

  /// 累积一帧的检测结果（逻辑或）
  pub fn accumulate(&mut self, detections: &DetectionSet) {
    self.violation |= !detections.is_empty();
  }

  pub fn is_violation(&self) -> bool {
    self.violation
  }

  pub fn label(&self) -> &'static str {
    if self.violation {
      VIOLATION_DETECTED
    } else {
      NO_VIOLATION
    }
  }
}

/// 单次请求的分析结果，创建后不再修改
#[derive(Debug, Clone, PartialEq)]
pub struct AnalysisResult {
  pub media_type: MediaType,
  pub verdict: Verdict,
  pub timestamp: DateTime<Utc>,
  pub file_url: String,
  pub preview_base64: Option<String>,
}

/// UTC 时间戳，RFC 3339 格式（微秒精度，`+00:00` 偏移）
pub fn format_timestamp(timestamp: &DateTime<Utc>) -> String {
  timestamp.to_rfc3339_opts(SecondsFormat::Micros, false)
}

#[derive(Serialize)]
struct OutwardResult<'a> {
  #[serde(rename = "type")]
  media_type: MediaType,
  violation: bool,
  violation_type: &'static str,
  timestamp: String,
  file_url: &'a str,
  #[serde(skip_serializing_if = "Option::is_none")]
  image_base64: Option<&'a str>,
}

impl Serialize for AnalysisResult {
  fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
    OutwardResult {
      media_type: self.media_type,
      violation: self.verdict.is_violation(),
      violation_type: self.verdict.label(),
      timestamp: format_timestamp(&self.timestamp),
      file_url: &self.file_url,
      image_base64: self.preview_base64.as_deref(),
    }
    .serialize(serializer)
  }
}

impl AnalysisResult {
  pub fn violation_type(&self) -> &'static str {
    self.verdict.label()
  }

  pub fn timestamp_string(&self) -> String {
    format_timestamp(&self.timestamp)
  }
}

/// 结果打包器：分配文档标识并组装对外结果，不包含检测逻辑
#[derive(Debug, Clone, Copy, Default)]
pub struct ResultPackager;

impl ResultPackager {
  /// 为一次请求分配新的文档标识
  pub fn document_id(&self) -> DocumentId {
    DocumentId::new()
  }

  /// 组装对外结果，视频不带内联预览
  pub fn package(
    &self,
    media_type: MediaType,
    verdict: Verdict,
    timestamp: DateTime<Utc>,
    file_url: String,
    preview_base64: Option<String>,
  ) -> AnalysisResult {
    let preview_base64 = match media_type {
      MediaType::Image => preview_base64,
      MediaType::Video => None,
    };
    AnalysisResult {
      media_type,
      verdict,
      timestamp,
      file_url,
      preview_base64,
    }
  }
}
