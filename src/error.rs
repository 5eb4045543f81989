// 该文件是 Jianwei （鉴违） 项目的一部分。
// src/error.rs - 错误分类
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

use serde::Serialize;
use thiserror::Error;

/// 分析请求的错误分类
///
/// 每个错误都在请求边界被转换为客户端可见的 [`ErrorResponse`]，
/// 不会自动重试，也不会影响后续请求。
#[derive(Error, Debug)]
pub enum AnalysisError {
  /// 上传缺失或内容类型不受支持
  #[error("{0}")]
  InputType(String),
  /// 图片无法解码，或视频容器无法读取
  #[error("解码失败: {0}")]
  Decode(String),
  /// 检测器、编解码器或存储协作方尚未就绪
  #[error("服务不可用: {0}")]
  UnavailableCapability(String),
  /// 上传或记录写入失败
  #[error("上游服务错误: {0}")]
  UpstreamService(String),
  /// 输出编码失败
  #[error("编码失败: {0}")]
  Encode(String),
  /// 请求的结果文件不存在
  #[error("未找到: {0}")]
  NotFound(String),
  #[error("I/O 错误: {0}")]
  Io(#[from] std::io::Error),
}

impl AnalysisError {
  pub fn status_code(&self) -> u16 {
    match self {
      AnalysisError::InputType(_) | AnalysisError::Decode(_) => 400,
      AnalysisError::NotFound(_) => 404,
      AnalysisError::UpstreamService(_) => 502,
      AnalysisError::UnavailableCapability(_) => 503,
      AnalysisError::Encode(_) | AnalysisError::Io(_) => 500,
    }
  }

  pub fn kind(&self) -> &'static str {
    match self {
      AnalysisError::InputType(_) => "input_type",
      AnalysisError::Decode(_) => "decode",
      AnalysisError::UnavailableCapability(_) => "unavailable_capability",
      AnalysisError::UpstreamService(_) => "upstream_service",
      AnalysisError::Encode(_) => "encode",
      AnalysisError::NotFound(_) => "not_found",
      AnalysisError::Io(_) => "io",
    }
  }

  pub fn is_client_error(&self) -> bool {
    (400..500).contains(&self.status_code())
  }

  pub fn to_response(&self) -> ErrorResponse {
    ErrorResponse {
      error: self.to_string(),
      kind: self.kind(),
      status: self.status_code(),
    }
  }
}

/// 客户端可见的错误响应
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct ErrorResponse {
  pub error: String,
  pub kind: &'static str,
  pub status: u16,
}

impl From<&AnalysisError> for ErrorResponse {
  fn from(err: &AnalysisError) -> Self {
    err.to_response()
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn input_type_is_a_client_error() {
    let err = AnalysisError::InputType("Unsupported file type".to_string());
    assert!(err.is_client_error());
    assert_eq!(err.status_code(), 400);
    assert_eq!(err.to_string(), "Unsupported file type");
  }

  #[test]
  fn collaborator_failures_are_server_side() {
    assert!(!AnalysisError::UpstreamService("x".into()).is_client_error());
    assert!(!AnalysisError::UnavailableCapability("x".into()).is_client_error());
    assert_eq!(
      AnalysisError::UnavailableCapability("detector".into()).status_code(),
      503
    );
  }

  #[test]
  fn response_serializes_kind_and_status() {
    let response = AnalysisError::Decode("bad header".into()).to_response();
    let json = serde_json::to_value(&response).unwrap();
    assert_eq!(json["kind"], "decode");
    assert_eq!(json["status"], 400);
    assert_eq!(json["error"], "解码失败: bad header");
  }
}
