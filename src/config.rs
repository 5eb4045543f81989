// 该文件是 Jianwei （鉴违） 项目的一部分。
// src/config.rs - 服务配置
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

use std::{path::PathBuf, sync::Arc};

use anyhow::{Context, Result};
use clap::{Args, ValueEnum};
use tracing::info;
use url::Url;

use crate::{
  AnalysisError,
  capability::Capability,
  frame::ImageEncoding,
  model::{DetectorAdapter, Thresholds, detector_from_url},
  output::Annotator,
  pipeline::{Analyzer, ResultsDirectory},
  service::ViolationService,
  storage::{object_store_from_url, record_store_from_url},
  stream::{VideoBackend, VideoCodec},
};

/// 静态图输出编码
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum EncodingKind {
  Png,
  Jpeg,
}

/// Jianwei 服务配置，所有选项都可以由环境变量提供
#[derive(Args, Debug, Clone)]
pub struct Config {
  /// 本地结果目录，启动时创建
  #[arg(long, env = "JIANWEI_RESULTS_DIR", default_value = "results", value_name = "DIR")]
  pub results_dir: PathBuf,

  /// 对象存储（file:///... 或 supabase://<host>），默认 <results-dir>/storage
  #[arg(long, env = "JIANWEI_STORAGE_URL", value_name = "URL")]
  pub storage: Option<Url>,

  /// 记录存储（jsonl:<path> 或 supabase://<host>），默认 <results-dir>/violations.jsonl
  #[arg(long, env = "JIANWEI_RECORDS_URL", value_name = "URL")]
  pub records: Option<Url>,

  /// 存储桶名称
  #[arg(long, env = "SUPABASE_BUCKET", default_value = "violations")]
  pub bucket: String,

  /// 记录表名称
  #[arg(long, env = "JIANWEI_TABLE", default_value = "violations")]
  pub table: String,

  /// 检测模型
  #[arg(long, env = "YOLO_WEIGHTS", default_value = "onnx:yolov8n.onnx", value_name = "MODEL")]
  pub model: Url,

  /// 置信度阈值 (0.0 - 1.0)
  #[arg(long, default_value_t = 0.25, value_name = "THRESHOLD")]
  pub confidence: f32,

  /// NMS IOU 阈值 (0.0 - 1.0)
  #[arg(long, default_value_t = 0.45, value_name = "THRESHOLD")]
  pub nms_threshold: f32,

  /// 视频编解码后端
  #[arg(long, value_enum, default_value_t = VideoBackend::Ffmpeg)]
  pub video_backend: VideoBackend,

  /// ffmpeg 可执行文件
  #[arg(long, env = "JIANWEI_FFMPEG", default_value = "ffmpeg", value_name = "PROGRAM")]
  pub ffmpeg: PathBuf,

  /// ffprobe 可执行文件
  #[arg(long, env = "JIANWEI_FFPROBE", default_value = "ffprobe", value_name = "PROGRAM")]
  pub ffprobe: PathBuf,

  /// 静态图输出编码
  #[arg(long, value_enum, default_value_t = EncodingKind::Png)]
  pub encoding: EncodingKind,

  /// JPEG 质量 (1 - 100)
  #[arg(long, default_value_t = 90, value_parser = clap::value_parser!(u8).range(1..=100))]
  pub jpeg_quality: u8,
}

impl Config {
  pub fn thresholds(&self) -> Thresholds {
    Thresholds {
      confidence: self.confidence,
      nms: self.nms_threshold,
    }
  }

  pub fn image_encoding(&self) -> ImageEncoding {
    match self.encoding {
      EncodingKind::Png => ImageEncoding::Png,
      EncodingKind::Jpeg => ImageEncoding::Jpeg {
        quality: self.jpeg_quality,
      },
    }
  }

  pub fn codec(&self) -> Result<Arc<dyn VideoCodec>, AnalysisError> {
    match self.video_backend {
      #[cfg(feature = "ffmpeg")]
      VideoBackend::Ffmpeg => Ok(Arc::new(crate::stream::FfmpegCodec {
        ffmpeg: self.ffmpeg.clone(),
        ffprobe: self.ffprobe.clone(),
      })),
      backend => backend.codec(),
    }
  }

  /// 对象存储 URL，未配置时指向结果目录下的 `storage`
  pub fn storage_url(&self) -> Result<Url> {
    if let Some(url) = &self.storage {
      return Ok(url.clone());
    }
    let root = std::path::absolute(self.results_dir.join("storage"))?;
    Url::from_directory_path(&root)
      .map_err(|_| anyhow::anyhow!("无法转换为 URL: {}", root.display()))
  }

  /// 记录存储 URL，未配置时指向结果目录下的 `violations.jsonl`
  pub fn records_url(&self) -> Result<Url> {
    if let Some(url) = &self.records {
      return Ok(url.clone());
    }
    let path = std::path::absolute(self.results_dir.join("violations.jsonl"))?;
    Url::parse(&format!("jsonl:{}", path.display())).context("无法构建记录存储 URL")
  }

  /// 构建分析器，检测器延迟到第一次使用时加载
  pub fn analyzer(&self) -> Result<Analyzer> {
    let results = ResultsDirectory::create(&self.results_dir)?;
    let model = self.model.clone();
    let thresholds = self.thresholds();
    let detector = DetectorAdapter::new(Capability::new("detector", move || {
      detector_from_url(&model, thresholds)
    }));

    Ok(Analyzer::new(
      detector,
      Annotator::new()?,
      self.codec()?,
      self.image_encoding(),
      results,
    ))
  }

  /// 构建完整的服务；存储与记录协作方同样延迟初始化
  pub fn service(&self) -> Result<ViolationService> {
    let analyzer = self.analyzer()?;

    let storage_url = self.storage_url()?;
    let records_url = self.records_url()?;
    info!("结果目录: {}", self.results_dir.display());
    info!("对象存储: {}", storage_url);
    info!("记录存储: {}", records_url);

    let storage = Capability::new("storage", move || object_store_from_url(&storage_url));
    let records = Capability::new("records", move || record_store_from_url(&records_url));

    Ok(
      ViolationService::new(analyzer, storage, records)
        .with_bucket(self.bucket.clone())
        .with_table(self.table.clone()),
    )
  }
}
