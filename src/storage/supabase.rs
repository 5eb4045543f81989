// 该文件是 Jianwei （鉴违） 项目的一部分。
// src/storage/supabase.rs - Supabase 对象存储与 REST 记录
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

use std::{path::Path, time::Duration};

use tracing::debug;
use url::Url;

use super::{ObjectStore, RecordStore, StorageError, ViolationRecord, check_destination};
use crate::{FromUrl, FromUrlWithScheme};

pub const SERVICE_ROLE_KEY_ENV: &str = "SUPABASE_SERVICE_ROLE_KEY";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

/// 共享的 HTTP 客户端与凭据
struct SupabaseClient {
  agent: ureq::Agent,
  base: String,
  key: String,
}

impl SupabaseClient {
  fn from_url(uri: &Url) -> Result<Self, StorageError> {
    if uri.scheme() != SupabaseStorage::SCHEME {
      return Err(StorageError::SchemeMismatch(format!(
        "期望存储方式 '{}', 实际存储方式 '{}'",
        SupabaseStorage::SCHEME,
        uri.scheme()
      )));
    }
    let host = uri
      .host_str()
      .ok_or_else(|| StorageError::SchemeMismatch(format!("缺少 Supabase 主机: {}", uri)))?;
    let base = match uri.port() {
      Some(port) => format!("https://{}:{}", host, port),
      None => format!("https://{}", host),
    };

    let key = std::env::var(SERVICE_ROLE_KEY_ENV)
      .ok()
      .filter(|key| !key.is_empty())
      .ok_or_else(|| StorageError::MissingCredential(SERVICE_ROLE_KEY_ENV.to_string()))?;

    let config = ureq::Agent::config_builder()
      .timeout_global(Some(REQUEST_TIMEOUT))
      .http_status_as_error(false)
      .build();
    let agent: ureq::Agent = config.into();

    Ok(Self { agent, base, key })
  }

  fn check(mut response: ureq::http::Response<ureq::Body>) -> Result<(), StorageError> {
    let status = response.status().as_u16();
    if (200..300).contains(&status) {
      return Ok(());
    }
    let body = response
      .body_mut()
      .read_to_string()
      .unwrap_or_else(|e| e.to_string());
    Err(StorageError::Rejected { status, body })
  }
}

/// Supabase Storage：`POST /storage/v1/object/<bucket>/<path>`
pub struct SupabaseStorage {
  client: SupabaseClient,
}

impl FromUrlWithScheme for SupabaseStorage {
  const SCHEME: &'static str = "supabase";
}

impl FromUrl for SupabaseStorage {
  type Error = StorageError;

  fn from_url(uri: &Url) -> Result<Self, Self::Error> {
    Ok(Self {
      client: SupabaseClient::from_url(uri)?,
    })
  }
}

impl SupabaseStorage {
  fn public_url(&self, bucket: &str, destination: &str) -> String {
    format!(
      "{}/storage/v1/object/public/{}/{}",
      self.client.base, bucket, destination
    )
  }
}

impl ObjectStore for SupabaseStorage {
  fn upload(
    &self,
    bucket: &str,
    local: &Path,
    destination: &str,
    content_type: &str,
  ) -> Result<String, StorageError> {
    check_destination(bucket)?;
    check_destination(destination)?;

    let bytes = std::fs::read(local)?;
    let url = format!(
      "{}/storage/v1/object/{}/{}",
      self.client.base, bucket, destination
    );
    debug!("上传 {} 字节到 {}", bytes.len(), url);

    let response = self
      .client
      .agent
      .post(&url)
      .header("Authorization", &format!("Bearer {}", self.client.key))
      .header("apikey", &self.client.key)
      .header("Content-Type", content_type)
      .header("x-upsert", "true")
      .send(&bytes[..])
      .map_err(|e| StorageError::Transport(e.to_string()))?;
    SupabaseClient::check(response)?;

    Ok(self.public_url(bucket, destination))
  }

  fn remove(&self, bucket: &str, destination: &str) -> Result<(), StorageError> {
    check_destination(bucket)?;
    check_destination(destination)?;

    let url = format!(
      "{}/storage/v1/object/{}/{}",
      self.client.base, bucket, destination
    );
    debug!("删除对象 {}", url);

    let response = self
      .client
      .agent
      .delete(&url)
      .header("Authorization", &format!("Bearer {}", self.client.key))
      .header("apikey", &self.client.key)
      .call()
      .map_err(|e| StorageError::Transport(e.to_string()))?;
    if response.status().as_u16() == 404 {
      return Ok(());
    }
    SupabaseClient::check(response)
  }
}

/// Supabase REST：`POST /rest/v1/<table>`
pub struct SupabaseRecords {
  client: SupabaseClient,
}

impl FromUrlWithScheme for SupabaseRecords {
  const SCHEME: &'static str = "supabase";
}

impl FromUrl for SupabaseRecords {
  type Error = StorageError;

  fn from_url(uri: &Url) -> Result<Self, Self::Error> {
    Ok(Self {
      client: SupabaseClient::from_url(uri)?,
    })
  }
}

impl RecordStore for SupabaseRecords {
  fn insert(&self, table: &str, record: &ViolationRecord) -> Result<(), StorageError> {
    check_destination(table)?;
    let url = format!("{}/rest/v1/{}", self.client.base, table);

    let response = self
      .client
      .agent
      .post(&url)
      .header("Authorization", &format!("Bearer {}", self.client.key))
      .header("apikey", &self.client.key)
      .header("Prefer", "return=minimal")
      .send_json(record)
      .map_err(|e| StorageError::Transport(e.to_string()))?;
    SupabaseClient::check(response)
  }
}
