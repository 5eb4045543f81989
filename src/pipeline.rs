// 该文件是 Jianwei （鉴违） 项目的一部分。
// src/pipeline.rs - 图片与视频分析流程
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
  fs,
  path::{Path, PathBuf},
  sync::Arc,
};

use tempfile::TempPath;
use tracing::debug;

use crate::{
  AnalysisError, frame::ImageEncoding, model::DetectorAdapter, output::Annotator,
  report::ARTIFACT_MARKER, stream::VideoCodec,
};

mod image;
mod video;

pub use self::image::ImageAnalysis;
pub use self::video::VideoAnalysis;

const SCRATCH_DIR: &str = ".tmp";
const MAX_FILENAME_LEN: usize = 64;

/// 本地结果目录
///
/// 已发布的结果文件直接位于根目录下；处理中的临时文件位于隐藏的子目录，
/// 与结果文件在同一文件系统上，发布时只需重命名。
#[derive(Debug, Clone)]
pub struct ResultsDirectory {
  root: PathBuf,
}

impl ResultsDirectory {
  /// 打开结果目录，不存在时创建
  pub fn create(root: impl Into<PathBuf>) -> Result<Self, AnalysisError> {
    let root = root.into();
    fs::create_dir_all(root.join(SCRATCH_DIR))?;
    Ok(Self { root })
  }

  pub fn root(&self) -> &Path {
    &self.root
  }

  pub fn scratch_dir(&self) -> PathBuf {
    self.root.join(SCRATCH_DIR)
  }

  /// 按文件名查找已发布的结果文件
  ///
  /// 文件名先做百分号解码；包含路径分隔符、以 `.` 开头或不是 `<id>_annotated.<ext>`
  /// 形式的名字一律视为不存在，同目录下的记录文件因此不会被读出。
  pub fn resolve(&self, name: &str) -> Result<PathBuf, AnalysisError> {
    let not_found = || AnalysisError::NotFound(name.to_string());

    let decoded = urlencoding::decode(name).map_err(|_| not_found())?;
    if decoded.is_empty()
      || decoded.starts_with('.')
      || decoded.contains(['/', '\\', '\0'])
      || !is_artifact_name(&decoded)
    {
      return Err(not_found());
    }

    let path = self.root.join(&*decoded);
    if path.is_file() {
      Ok(path)
    } else {
      Err(not_found())
    }
  }
}

fn is_artifact_name(name: &str) -> bool {
  name
    .rsplit_once('.')
    .is_some_and(|(stem, extension)| !extension.is_empty() && stem.ends_with(ARTIFACT_MARKER))
}

/// 把上传的文件名整理为可安全用于本地路径的形式
pub fn sanitize_filename(name: &str) -> String {
  let cleaned: String = name
    .rsplit(['/', '\\'])
    .next()
    .unwrap_or_default()
    .chars()
    .map(|c| {
      if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') {
        c
      } else {
        '_'
      }
    })
    .collect();
  let cleaned = cleaned.trim_start_matches('.');

  let start = cleaned.len().saturating_sub(MAX_FILENAME_LEN);
  match &cleaned[start..] {
    "" => "upload".to_string(),
    tail => tail.to_string(),
  }
}

/// 尚未发布的结果文件
///
/// 在被 [`PendingArtifact::publish`] 之前，丢弃即删除；
/// 请求失败时不会留下看似成功的结果。
#[derive(Debug)]
pub struct PendingArtifact {
  path: TempPath,
  file_name: String,
  extension: &'static str,
  content_type: &'static str,
}

impl PendingArtifact {
  pub(crate) fn new(
    path: TempPath,
    file_name: String,
    extension: &'static str,
    content_type: &'static str,
  ) -> Self {
    Self {
      path,
      file_name,
      extension,
      content_type,
    }
  }

  /// 临时文件路径
  pub fn path(&self) -> &Path {
    &self.path
  }

  /// 发布后的文件名
  pub fn file_name(&self) -> &str {
    &self.file_name
  }

  pub fn extension(&self) -> &'static str {
    self.extension
  }

  pub fn content_type(&self) -> &'static str {
    self.content_type
  }

  /// 把结果文件移动到结果目录，返回发布后的路径
  pub fn publish(self, results: &ResultsDirectory) -> Result<PathBuf, AnalysisError> {
    let target = results.root().join(&self.file_name);
    self
      .path
      .persist(&target)
      .map_err(|e| AnalysisError::Io(e.error))?;
    debug!("结果已发布: {}", target.display());
    Ok(target)
  }
}

/// 分析器：把检测、标注与编码串联为图片与视频两条流程
///
/// 除延迟初始化的检测器之外不持有跨请求的可变状态，可被多个请求并发使用。
pub struct Analyzer {
  detector: DetectorAdapter,
  annotator: Annotator,
  codec: Arc<dyn VideoCodec>,
  encoding: ImageEncoding,
  results: ResultsDirectory,
}

impl Analyzer {
  pub fn new(
    detector: DetectorAdapter,
    annotator: Annotator,
    codec: Arc<dyn VideoCodec>,
    encoding: ImageEncoding,
    results: ResultsDirectory,
  ) -> Self {
    Self {
      detector,
      annotator,
      codec,
      encoding,
      results,
    }
  }

  pub fn detector(&self) -> &DetectorAdapter {
    &self.detector
  }

  pub fn codec(&self) -> &dyn VideoCodec {
    self.codec.as_ref()
  }

  pub fn encoding(&self) -> ImageEncoding {
    self.encoding
  }

  pub fn results(&self) -> &ResultsDirectory {
    &self.results
  }
}
