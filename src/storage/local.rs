// 该文件是 Jianwei （鉴违） 项目的一部分。
// src/storage/local.rs - 本地目录对象存储与 JSON Lines 记录
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

use std::{
  fs::{self, OpenOptions},
  io::Write,
  path::{Path, PathBuf},
  sync::{Mutex, PoisonError},
};

use serde::Serialize;
use tracing::debug;
use url::Url;

use super::{ObjectStore, RecordStore, StorageError, ViolationRecord, check_destination};
use crate::{FromUrl, FromUrlWithScheme};

/// 以本地目录模拟的对象存储：`<root>/<bucket>/<destination>`
#[derive(Debug, Clone)]
pub struct LocalObjectStore {
  root: PathBuf,
}

impl LocalObjectStore {
  pub fn new(root: impl Into<PathBuf>) -> Self {
    Self { root: root.into() }
  }

  pub fn root(&self) -> &Path {
    &self.root
  }
}

impl FromUrlWithScheme for LocalObjectStore {
  const SCHEME: &'static str = "file";
}

impl FromUrl for LocalObjectStore {
  type Error = StorageError;

  fn from_url(uri: &Url) -> Result<Self, Self::Error> {
    if uri.scheme() != Self::SCHEME {
      return Err(StorageError::SchemeMismatch(format!(
        "期望存储方式 '{}', 实际存储方式 '{}'",
        Self::SCHEME,
        uri.scheme()
      )));
    }
    let root = uri
      .to_file_path()
      .map_err(|_| StorageError::SchemeMismatch(format!("无法解析本地路径: {}", uri)))?;
    Ok(Self::new(root))
  }
}

impl ObjectStore for LocalObjectStore {
  fn upload(
    &self,
    bucket: &str,
    local: &Path,
    destination: &str,
    _content_type: &str,
  ) -> Result<String, StorageError> {
    check_destination(bucket)?;
    check_destination(destination)?;

    let target = self.root.join(bucket).join(destination);
    if let Some(parent) = target.parent() {
      fs::create_dir_all(parent)?;
    }
    fs::copy(local, &target)?;

    let target = std::path::absolute(&target)?;
    let url = Url::from_file_path(&target)
      .map_err(|_| StorageError::InvalidDestination(target.display().to_string()))?;
    debug!("已写入本地存储: {}", url);
    Ok(url.to_string())
  }

  fn remove(&self, bucket: &str, destination: &str) -> Result<(), StorageError> {
    check_destination(bucket)?;
    check_destination(destination)?;

    match fs::remove_file(self.root.join(bucket).join(destination)) {
      Ok(()) => Ok(()),
      Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
      Err(e) => Err(e.into()),
    }
  }
}

/// 以 JSON Lines 文件保存违规记录，每行一条，附带表名
#[derive(Debug)]
pub struct JsonLinesRecordStore {
  path: PathBuf,
  lock: Mutex<()>,
}

#[derive(Serialize)]
struct TableRow<'a> {
  table: &'a str,
  #[serde(flatten)]
  record: &'a ViolationRecord,
}

impl JsonLinesRecordStore {
  pub fn new(path: impl Into<PathBuf>) -> Self {
    Self {
      path: path.into(),
      lock: Mutex::new(()),
    }
  }

  pub fn path(&self) -> &Path {
    &self.path
  }
}

impl FromUrlWithScheme for JsonLinesRecordStore {
  const SCHEME: &'static str = "jsonl";
}

impl FromUrl for JsonLinesRecordStore {
  type Error = StorageError;

  fn from_url(uri: &Url) -> Result<Self, Self::Error> {
    if uri.scheme() != Self::SCHEME {
      return Err(StorageError::SchemeMismatch(format!(
        "期望记录方式 '{}', 实际记录方式 '{}'",
        Self::SCHEME,
        uri.scheme()
      )));
    }
    let path = urlencoding::decode(uri.path())
      .map_err(|e| StorageError::SchemeMismatch(format!("无法解析记录路径: {}", e)))?;
    if path.is_empty() {
      return Err(StorageError::SchemeMismatch(format!("缺少记录路径: {}", uri)));
    }
    Ok(Self::new(path.into_owned()))
  }
}

impl RecordStore for JsonLinesRecordStore {
  fn insert(&self, table: &str, record: &ViolationRecord) -> Result<(), StorageError> {
    let mut line = serde_json::to_vec(&TableRow { table, record })?;
    line.push(b'\n');

    let _guard = self.lock.lock().unwrap_or_else(PoisonError::into_inner);
    if let Some(parent) = self.path.parent()
      && !parent.as_os_str().is_empty()
    {
      fs::create_dir_all(parent)?;
    }
    let mut file = OpenOptions::new()
      .create(true)
      .append(true)
      .open(&self.path)?;
    file.write_all(&line)?;
    Ok(())
  }
}
