// 该文件是 Jianwei （鉴违） 项目的一部分。
// src/service.rs - 请求边界：分类上传、调用流程、上传结果并写入记录
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

use std::path::PathBuf;

use chrono::Utc;
use serde::Serialize;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::{
  AnalysisError,
  capability::Capability,
  pipeline::{Analyzer, PendingArtifact},
  report::{AnalysisResult, DocumentId, MediaType, ResultPackager, Verdict, format_timestamp},
  storage::{ObjectStore, RecordStore, ViolationRecord},
};

pub const DEFAULT_BUCKET: &str = "violations";
pub const DEFAULT_TABLE: &str = "violations";
const UNSUPPORTED: &str = "Unsupported file type";

/// 一次上传
#[derive(Debug, Clone, Default)]
pub struct Upload {
  pub filename: Option<String>,
  pub content_type: Option<String>,
  pub bytes: Vec<u8>,
}

impl Upload {
  pub fn new(filename: Option<String>, content_type: Option<String>, bytes: Vec<u8>) -> Self {
    Self {
      filename,
      content_type,
      bytes,
    }
  }
}

/// 根据声明的内容类型选择流程
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaKind {
  Image,
  Video,
}

impl MediaKind {
  /// `image/*` 为图片，`video/*` 为视频，其余一律拒绝
  pub fn classify(content_type: Option<&str>) -> Result<Self, AnalysisError> {
    let essence = content_type
      .and_then(|ct| ct.split(';').next())
      .map(|ct| ct.trim().to_ascii_lowercase())
      .unwrap_or_default();
    if essence.starts_with("image/") {
      Ok(MediaKind::Image)
    } else if essence.starts_with("video/") {
      Ok(MediaKind::Video)
    } else {
      Err(AnalysisError::InputType(UNSUPPORTED.to_string()))
    }
  }

  pub fn media_type(&self) -> MediaType {
    match self {
      MediaKind::Image => MediaType::Image,
      MediaKind::Video => MediaType::Video,
    }
  }
}

/// 服务健康状态
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct HealthReport {
  pub status: &'static str,
  pub model_loaded: bool,
  pub model_type: Option<&'static str>,
  pub results_dir: String,
}

/// 违规分析服务
///
/// 每次请求的顺序固定：分类、确认协作方就绪、分析、上传、写记录、发布本地结果、打包。
/// 任一步失败即终止请求，本地结果不会被发布。
pub struct ViolationService {
  analyzer: Analyzer,
  storage: Capability<Box<dyn ObjectStore>>,
  records: Capability<Box<dyn RecordStore>>,
  bucket: String,
  table: String,
  packager: ResultPackager,
}

impl ViolationService {
  pub fn new(
    analyzer: Analyzer,
    storage: Capability<Box<dyn ObjectStore>>,
    records: Capability<Box<dyn RecordStore>>,
  ) -> Self {
    Self {
      analyzer,
      storage,
      records,
      bucket: DEFAULT_BUCKET.to_string(),
      table: DEFAULT_TABLE.to_string(),
      packager: ResultPackager,
    }
  }

  pub fn with_bucket(mut self, bucket: impl Into<String>) -> Self {
    self.bucket = bucket.into();
    self
  }

  pub fn with_table(mut self, table: impl Into<String>) -> Self {
    self.table = table.into();
    self
  }

  pub fn analyzer(&self) -> &Analyzer {
    &self.analyzer
  }

  /// 分析一次上传
  pub fn analyze(&self, upload: Upload) -> Result<AnalysisResult, AnalysisError> {
    let kind = MediaKind::classify(upload.content_type.as_deref())?;
    let result = self.run(kind, upload);
    if let Err(e) = &result {
      if e.is_client_error() {
        info!("请求被拒绝: {}", e);
      } else {
        error!("分析失败: {}", e);
      }
    }
    result
  }

  fn run(&self, kind: MediaKind, upload: Upload) -> Result<AnalysisResult, AnalysisError> {
    let storage = self.storage.ensure_ready()?;
    let records = self.records.ensure_ready()?;

    let id = self.packager.document_id();
    let filename = upload
      .filename
      .filter(|name| !name.is_empty())
      .unwrap_or_else(|| format!("upload_{}", Uuid::new_v4().simple()));
    let media_type = kind.media_type();
    info!("[{}] 收到 {} 上传: {} ({} 字节)", id, media_type, filename, upload.bytes.len());

    let (verdict, artifact, preview) = match kind {
      MediaKind::Image => {
        let analysis = self.analyzer.analyze_image(&upload.bytes, &id)?;
        (analysis.verdict, analysis.artifact, Some(analysis.preview_base64))
      }
      MediaKind::Video => {
        let analysis = self.analyzer.analyze_video(&upload.bytes, &filename, &id)?;
        (analysis.verdict, analysis.artifact, None)
      }
    };

    let (destination, file_url) = self.store(&**storage, &id, media_type, &artifact)?;

    let timestamp = Utc::now();
    let record = ViolationRecord {
      filename,
      violation_type: verdict.label().to_string(),
      timestamp: format_timestamp(&timestamp),
      file_url: file_url.clone(),
    };
    if let Err(e) = records.insert(&self.table, &record) {
      // 记录写入失败时撤回已上传的对象
      if let Err(remove) = storage.remove(&self.bucket, &destination) {
        warn!("[{}] 撤回 {}/{} 失败: {}", id, self.bucket, destination, remove);
      }
      return Err(e.into());
    }

    let published = artifact.publish(self.analyzer.results())?;
    info!("[{}] {}，结果: {}", id, verdict.label(), published.display());

    Ok(self.package(media_type, verdict, timestamp, file_url, preview))
  }

  fn store(
    &self,
    storage: &dyn ObjectStore,
    id: &DocumentId,
    media_type: MediaType,
    artifact: &PendingArtifact,
  ) -> Result<(String, String), AnalysisError> {
    let destination = id.destination(media_type, artifact.extension());
    let url = storage.upload(
      &self.bucket,
      artifact.path(),
      &destination,
      artifact.content_type(),
    )?;
    info!("[{}] 已上传到 {}/{}", id, self.bucket, destination);
    Ok((destination, url))
  }

  fn package(
    &self,
    media_type: MediaType,
    verdict: Verdict,
    timestamp: chrono::DateTime<Utc>,
    file_url: String,
    preview: Option<String>,
  ) -> AnalysisResult {
    self
      .packager
      .package(media_type, verdict, timestamp, file_url, preview)
  }

  /// 查找已发布的结果文件
  pub fn result_path(&self, name: &str) -> Result<PathBuf, AnalysisError> {
    self.analyzer.results().resolve(name)
  }

  /// 健康检查不触发任何初始化
  pub fn health(&self) -> HealthReport {
    let model_loaded = self.analyzer.detector().is_ready();
    HealthReport {
      status: "ok",
      model_loaded,
      model_type: model_loaded.then_some("YOLOv8"),
      results_dir: self.analyzer.results().root().display().to_string(),
    }
  }
}
