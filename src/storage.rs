// 该文件是 Jianwei （鉴违） 项目的一部分。
// src/storage.rs - 结果文件存储与违规记录
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

use std::path::Path;

use serde::Serialize;
use thiserror::Error;
use url::Url;

use crate::{AnalysisError, FromUrl};

mod local;
#[cfg(feature = "supabase")]
mod supabase;

pub use self::local::{JsonLinesRecordStore, LocalObjectStore};
#[cfg(feature = "supabase")]
pub use self::supabase::{SupabaseRecords, SupabaseStorage};

#[derive(Error, Debug)]
pub enum StorageError {
  #[error("I/O 错误: {0}")]
  Io(#[from] std::io::Error),
  #[error("URI 方案不匹配: {0}")]
  SchemeMismatch(String),
  #[error("缺少凭据: {0}")]
  MissingCredential(String),
  #[error("无效的目标路径: {0}")]
  InvalidDestination(String),
  #[error("请求失败: {0}")]
  Transport(String),
  #[error("服务端拒绝请求 ({status}): {body}")]
  Rejected { status: u16, body: String },
  #[error("序列化错误: {0}")]
  Serialize(#[from] serde_json::Error),
}

impl From<StorageError> for AnalysisError {
  fn from(err: StorageError) -> Self {
    match err {
      StorageError::SchemeMismatch(_) | StorageError::MissingCredential(_) => {
        AnalysisError::UnavailableCapability(err.to_string())
      }
      _ => AnalysisError::UpstreamService(err.to_string()),
    }
  }
}

/// 对象存储：按目标路径上传文件（覆盖已有对象），返回可公开访问的 URL
pub trait ObjectStore: Send + Sync {
  fn upload(
    &self,
    bucket: &str,
    local: &Path,
    destination: &str,
    content_type: &str,
  ) -> Result<String, StorageError>;

  /// 删除已上传的对象，对象不存在时视为成功
  fn remove(&self, bucket: &str, destination: &str) -> Result<(), StorageError>;
}

/// 违规记录存储
pub trait RecordStore: Send + Sync {
  fn insert(&self, table: &str, record: &ViolationRecord) -> Result<(), StorageError>;
}

/// 每次分析写入一条的违规记录
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ViolationRecord {
  pub filename: String,
  pub violation_type: String,
  pub timestamp: String,
  pub file_url: String,
}

/// 检查目标路径：只允许由普通片段组成的相对路径
pub(crate) fn check_destination(destination: &str) -> Result<(), StorageError> {
  let valid = !destination.is_empty()
    && destination
      .split('/')
      .all(|part| !part.is_empty() && part != "." && part != ".." && !part.contains('\\'));
  if valid {
    Ok(())
  } else {
    Err(StorageError::InvalidDestination(destination.to_string()))
  }
}

/// 根据 URL 构建对象存储
pub fn object_store_from_url(url: &Url) -> anyhow::Result<Box<dyn ObjectStore>> {
  match url.scheme() {
    "file" => Ok(Box::new(LocalObjectStore::from_url(url)?)),
    #[cfg(feature = "supabase")]
    "supabase" => Ok(Box::new(SupabaseStorage::from_url(url)?)),
    scheme => anyhow::bail!("不支持的对象存储方案 '{}'", scheme),
  }
}

/// 根据 URL 构建记录存储
pub fn record_store_from_url(url: &Url) -> anyhow::Result<Box<dyn RecordStore>> {
  match url.scheme() {
    "jsonl" => Ok(Box::new(JsonLinesRecordStore::from_url(url)?)),
    #[cfg(feature = "supabase")]
    "supabase" => Ok(Box::new(SupabaseRecords::from_url(url)?)),
    scheme => anyhow::bail!("不支持的记录存储方案 '{}'", scheme),
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn destinations_must_be_plain_relative_paths() {
    assert!(check_destination("images/abc.png").is_ok());
    assert!(check_destination("videos/abc.mp4").is_ok());
    for bad in ["", "/abs.png", "images/../x", "images//x", "./x", "a\\b"] {
      assert!(check_destination(bad).is_err(), "{}", bad);
    }
  }

  #[test]
  fn credential_errors_mean_unavailable() {
    let err: AnalysisError = StorageError::MissingCredential("SUPABASE_SERVICE_ROLE_KEY".into()).into();
    assert_eq!(err.status_code(), 503);
    let err: AnalysisError = StorageError::Rejected {
      status: 409,
      body: "conflict".into(),
    }
    .into();
    assert_eq!(err.status_code(), 502);
  }

  #[test]
  fn unknown_schemes_are_rejected() {
    let url = Url::parse("s3://bucket").unwrap();
    assert!(object_store_from_url(&url).is_err());
    assert!(record_store_from_url(&url).is_err());
  }
}
