// 该文件是 Jianwei （鉴违） 项目的一部分。
// src/main.rs - 命令行入口
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

use std::{path::PathBuf, process::ExitCode};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::{Level, info};

use jianwei::{
  AnalysisError,
  config::Config,
  service::{Upload, ViolationService},
};

/// Jianwei 违规检测服务
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
  #[command(flatten)]
  pub config: Config,

  /// 日志详细程度（-v 为 debug，-vv 为 trace）
  #[arg(short, long, action = clap::ArgAction::Count, global = true)]
  pub verbose: u8,

  #[command(subcommand)]
  pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
  /// 分析一个图片或视频文件
  Analyze {
    /// 待分析的文件
    #[arg(long, value_name = "PATH")]
    file: PathBuf,
    /// 内容类型，缺省时由扩展名推断
    #[arg(long, value_name = "MIME")]
    content_type: Option<String>,
    /// 记录中使用的文件名，缺省为文件本身的名字
    #[arg(long, value_name = "NAME")]
    filename: Option<String>,
  },
  /// 输出服务健康状态
  Health,
  /// 输出已发布结果文件的路径
  Result {
    /// 结果文件名（可百分号编码）
    name: String,
  },
}

/// 按扩展名推断内容类型
fn guess_content_type(path: &std::path::Path) -> Option<&'static str> {
  let ext = path.extension()?.to_str()?.to_ascii_lowercase();
  let mime = match ext.as_str() {
    "jpg" | "jpeg" => "image/jpeg",
    "png" => "image/png",
    "bmp" => "image/bmp",
    "gif" => "image/gif",
    "webp" => "image/webp",
    "mp4" | "m4v" => "video/mp4",
    "mov" => "video/quicktime",
    "avi" => "video/x-msvideo",
    "mkv" => "video/x-matroska",
    "webm" => "video/webm",
    _ => return None,
  };
  Some(mime)
}

fn print_error(err: &AnalysisError) -> Result<ExitCode> {
  println!("{}", serde_json::to_string_pretty(&err.to_response())?);
  Ok(ExitCode::FAILURE)
}

fn analyze(
  service: &ViolationService,
  file: PathBuf,
  content_type: Option<String>,
  filename: Option<String>,
) -> Result<ExitCode> {
  let bytes = std::fs::read(&file).with_context(|| format!("无法读取文件 {}", file.display()))?;
  let content_type = content_type.or_else(|| guess_content_type(&file).map(str::to_string));
  let filename = filename.or_else(|| {
    file
      .file_name()
      .map(|name| name.to_string_lossy().into_owned())
  });

  match service.analyze(Upload::new(filename, content_type, bytes)) {
    Ok(result) => {
      println!("{}", serde_json::to_string_pretty(&result)?);
      Ok(ExitCode::SUCCESS)
    }
    Err(e) => print_error(&e),
  }
}

fn main() -> Result<ExitCode> {
  let cli = Cli::parse();

  let level = match cli.verbose {
    0 => Level::INFO,
    1 => Level::DEBUG,
    _ => Level::TRACE,
  };
  tracing_subscriber::fmt()
    .with_max_level(level)
    .with_writer(std::io::stderr)
    .init();

  info!("Jianwei {}", env!("CARGO_PKG_VERSION"));
  let service = cli.config.service()?;

  match cli.command {
    Command::Analyze {
      file,
      content_type,
      filename,
    } => analyze(&service, file, content_type, filename),
    Command::Health => {
      println!("{}", serde_json::to_string_pretty(&service.health())?);
      Ok(ExitCode::SUCCESS)
    }
    Command::Result { name } => match service.result_path(&name) {
      Ok(path) => {
        println!("{}", std::path::absolute(path)?.display());
        Ok(ExitCode::SUCCESS)
      }
      Err(e) => print_error(&e),
    },
  }
}
