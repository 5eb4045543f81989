// 该文件是 Jianwei （鉴违） 项目的一部分。
// tests/common/mod.rs - 集成测试共用的检测器、视频后端与存储
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

#![allow(dead_code)]

use std::{
  collections::HashMap,
  fs,
  io::{BufRead, BufReader, Read, Write},
  path::{Path, PathBuf},
  sync::{
    Arc, Mutex,
    atomic::{AtomicUsize, Ordering},
  },
};

use serde::{Deserialize, Serialize};

use jianwei::{
  AnalysisError,
  capability::Capability,
  frame::{Frame, ImageEncoding},
  input::FrameSource,
  model::{Detection, Detector, DetectorAdapter, DetectorError},
  output::{Annotator, FrameSink},
  pipeline::{Analyzer, ResultsDirectory},
  service::ViolationService,
  storage::{ObjectStore, RecordStore, StorageError, ViolationRecord},
  stream::{StreamProperties, VideoCodec},
};

/// 按调用顺序返回预设结果的检测器，超出脚本的调用返回空结果
#[derive(Clone, Default)]
pub struct ScriptedDetector {
  script: HashMap<usize, Vec<Detection>>,
  fail_at: Option<usize>,
  calls: Arc<AtomicUsize>,
}

impl ScriptedDetector {
  pub fn empty() -> Self {
    Self::default()
  }

  /// 第 `call` 次调用（从 0 开始）返回 `detections`
  pub fn on_call(mut self, call: usize, detections: Vec<Detection>) -> Self {
    self.script.insert(call, detections);
    self
  }

  /// 第 `call` 次调用返回推理错误
  pub fn fail_on(mut self, call: usize) -> Self {
    self.fail_at = Some(call);
    self
  }

  pub fn calls(&self) -> Arc<AtomicUsize> {
    Arc::clone(&self.calls)
  }
}

impl Detector for ScriptedDetector {
  fn detect(&self, _frame: &Frame) -> Result<Vec<Detection>, DetectorError> {
    let call = self.calls.fetch_add(1, Ordering::SeqCst);
    if self.fail_at == Some(call) {
      return Err(DetectorError::Inference(format!("第 {} 次推理失败", call)));
    }
    Ok(self.script.get(&call).cloned().unwrap_or_default())
  }
}

pub fn person(bbox: [f32; 4]) -> Detection {
  Detection::new(bbox, 0, 0.88, "person")
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ClipHeader {
  pub width: u32,
  pub height: u32,
  pub fps: Option<f64>,
}

/// 写出测试用的简单视频容器：一行 JSON 头部，之后是连续的 rgb24 帧
pub fn write_clip(path: &Path, width: u32, height: u32, fps: Option<f64>, frames: &[Frame]) {
  let mut bytes = serde_json::to_vec(&ClipHeader { width, height, fps }).unwrap();
  bytes.push(b'\n');
  for frame in frames {
    bytes.extend_from_slice(frame.as_raw());
  }
  fs::write(path, bytes).unwrap();
}

pub fn clip_bytes(width: u32, height: u32, fps: Option<f64>, frames: &[Frame]) -> Vec<u8> {
  let dir = tempfile::tempdir().unwrap();
  let path = dir.path().join("clip.raw");
  write_clip(&path, width, height, fps, frames);
  fs::read(path).unwrap()
}

pub fn read_clip(path: &Path) -> (ClipHeader, Vec<Frame>) {
  let mut reader = BufReader::new(fs::File::open(path).unwrap());
  let mut line = String::new();
  reader.read_line(&mut line).unwrap();
  let header: ClipHeader = serde_json::from_str(&line).unwrap();
  let mut data = Vec::new();
  reader.read_to_end(&mut data).unwrap();

  let frame_len = (header.width * header.height * 3) as usize;
  let frames = data
    .chunks(frame_len)
    .map(|chunk| Frame::from_rgb24(header.width, header.height, chunk.to_vec()).unwrap())
    .collect();
  (header, frames)
}

struct ClipSource {
  header: ClipHeader,
  reader: BufReader<fs::File>,
  index: usize,
  resize_at: Option<usize>,
}

impl Iterator for ClipSource {
  type Item = Result<Frame, AnalysisError>;

  fn next(&mut self) -> Option<Self::Item> {
    let mut data = vec![0u8; (self.header.width * self.header.height * 3) as usize];
    self.reader.read_exact(&mut data).ok()?;
    let index = self.index;
    self.index += 1;
    if self.resize_at == Some(index) {
      return Some(Ok(Frame::filled(self.header.width + 2, self.header.height, [0, 0, 0])));
    }
    Frame::from_rgb24(self.header.width, self.header.height, data).map(Ok)
  }
}

impl FrameSource for ClipSource {
  fn width(&self) -> u32 {
    self.header.width
  }

  fn height(&self) -> u32 {
    self.header.height
  }

  fn fps(&self) -> Option<f64> {
    self.header.fps
  }
}

struct ClipSink {
  file: fs::File,
  properties: StreamProperties,
  frames: u64,
  finished: Arc<AtomicUsize>,
}

impl FrameSink for ClipSink {
  fn write_frame(&mut self, frame: &Frame) -> Result<(), AnalysisError> {
    if frame.dimensions() != (self.properties.width, self.properties.height) {
      return Err(AnalysisError::Encode("尺寸不一致".to_string()));
    }
    self.file.write_all(frame.as_raw())?;
    self.frames += 1;
    Ok(())
  }

  fn finish(&mut self) -> Result<(), AnalysisError> {
    self.file.flush()?;
    self.finished.fetch_add(1, Ordering::SeqCst);
    Ok(())
  }

  fn frames_written(&self) -> u64 {
    self.frames
  }
}

/// 读写 [`write_clip`] 格式的视频后端
#[derive(Clone, Default)]
pub struct ClipCodec {
  pub finished: Arc<AtomicUsize>,
  /// 读到该序号的帧时改为输出尺寸不同的帧
  pub resize_at: Option<usize>,
}

impl ClipCodec {
  pub fn resizing_at(index: usize) -> Self {
    Self {
      resize_at: Some(index),
      ..Self::default()
    }
  }
}

impl VideoCodec for ClipCodec {
  fn name(&self) -> &'static str {
    "clip"
  }

  fn open_source(&self, path: &Path) -> Result<Box<dyn FrameSource>, AnalysisError> {
    let mut reader = BufReader::new(fs::File::open(path)?);
    let mut line = String::new();
    reader.read_line(&mut line)?;
    let header: ClipHeader = serde_json::from_str(&line)
      .map_err(|e| AnalysisError::Decode(format!("无法读取视频: {}", e)))?;
    Ok(Box::new(ClipSource {
      header,
      reader,
      index: 0,
      resize_at: self.resize_at,
    }))
  }

  fn open_sink(
    &self,
    path: &Path,
    properties: &StreamProperties,
  ) -> Result<Box<dyn FrameSink>, AnalysisError> {
    let mut file = fs::File::create(path)?;
    let header = ClipHeader {
      width: properties.width,
      height: properties.height,
      fps: Some(properties.fps),
    };
    let mut line = serde_json::to_vec(&header).map_err(|e| AnalysisError::Encode(e.to_string()))?;
    line.push(b'\n');
    file.write_all(&line)?;
    Ok(Box::new(ClipSink {
      file,
      properties: *properties,
      frames: 0,
      finished: Arc::clone(&self.finished),
    }))
  }
}

#[derive(Debug, Clone)]
pub struct StoredObject {
  pub bucket: String,
  pub destination: String,
  pub content_type: String,
  pub bytes: Vec<u8>,
}

/// 记录所有上传的对象存储
#[derive(Clone, Default)]
pub struct RecordingStore {
  pub objects: Arc<Mutex<Vec<StoredObject>>>,
  pub fail: bool,
}

impl RecordingStore {
  pub fn failing() -> Self {
    Self {
      fail: true,
      ..Self::default()
    }
  }

  pub fn objects(&self) -> Vec<StoredObject> {
    self.objects.lock().unwrap().clone()
  }
}

impl ObjectStore for RecordingStore {
  fn upload(
    &self,
    bucket: &str,
    local: &Path,
    destination: &str,
    content_type: &str,
  ) -> Result<String, StorageError> {
    if self.fail {
      return Err(StorageError::Rejected {
        status: 500,
        body: "storage offline".to_string(),
      });
    }
    self.objects.lock().unwrap().push(StoredObject {
      bucket: bucket.to_string(),
      destination: destination.to_string(),
      content_type: content_type.to_string(),
      bytes: fs::read(local)?,
    });
    Ok(format!("memory://{}/{}", bucket, destination))
  }

  fn remove(&self, bucket: &str, destination: &str) -> Result<(), StorageError> {
    self
      .objects
      .lock()
      .unwrap()
      .retain(|object| object.bucket != bucket || object.destination != destination);
    Ok(())
  }
}

/// 记录所有插入的违规记录
#[derive(Clone, Default)]
pub struct RecordingRecords {
  pub rows: Arc<Mutex<Vec<(String, ViolationRecord)>>>,
  pub fail: bool,
}

impl RecordingRecords {
  pub fn failing() -> Self {
    Self {
      fail: true,
      ..Self::default()
    }
  }

  pub fn rows(&self) -> Vec<(String, ViolationRecord)> {
    self.rows.lock().unwrap().clone()
  }
}

impl RecordStore for RecordingRecords {
  fn insert(&self, table: &str, record: &ViolationRecord) -> Result<(), StorageError> {
    if self.fail {
      return Err(StorageError::Rejected {
        status: 503,
        body: "records offline".to_string(),
      });
    }
    self
      .rows
      .lock()
      .unwrap()
      .push((table.to_string(), record.clone()));
    Ok(())
  }
}

pub fn analyzer(results: &Path, detector: ScriptedDetector, codec: ClipCodec) -> Analyzer {
  Analyzer::new(
    DetectorAdapter::with_detector(detector),
    Annotator::new().unwrap(),
    Arc::new(codec),
    ImageEncoding::Png,
    ResultsDirectory::create(results).unwrap(),
  )
}

/// 使用记录型协作方的完整服务
pub struct Harness {
  pub dir: tempfile::TempDir,
  pub service: ViolationService,
  pub store: RecordingStore,
  pub records: RecordingRecords,
  pub detector_calls: Arc<AtomicUsize>,
  pub storage_inits: Arc<AtomicUsize>,
}

impl Harness {
  pub fn new(detector: ScriptedDetector) -> Self {
    Self::with_store(detector, RecordingStore::default())
  }

  pub fn with_store(detector: ScriptedDetector, store: RecordingStore) -> Self {
    Self::with_collaborators(detector, store, RecordingRecords::default())
  }

  pub fn with_collaborators(
    detector: ScriptedDetector,
    store: RecordingStore,
    records: RecordingRecords,
  ) -> Self {
    let dir = tempfile::tempdir().unwrap();
    let detector_calls = detector.calls();
    let storage_inits = Arc::new(AtomicUsize::new(0));

    let storage = {
      let store = store.clone();
      let inits = Arc::clone(&storage_inits);
      Capability::new("storage", move || {
        inits.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(store.clone()) as Box<dyn ObjectStore>)
      })
    };
    let record_store: Box<dyn RecordStore> = Box::new(records.clone());

    let service = ViolationService::new(
      analyzer(&dir.path().join("results"), detector, ClipCodec::default()),
      storage,
      Capability::ready("records", record_store),
    );

    Self {
      dir,
      service,
      store,
      records,
      detector_calls,
      storage_inits,
    }
  }

  pub fn results_dir(&self) -> PathBuf {
    self.dir.path().join("results")
  }

  /// 结果目录中已发布的文件（不含临时目录）
  pub fn published(&self) -> Vec<PathBuf> {
    let mut files: Vec<PathBuf> = fs::read_dir(self.results_dir())
      .unwrap()
      .map(|entry| entry.unwrap().path())
      .filter(|path| path.is_file())
      .collect();
    files.sort();
    files
  }

  /// 临时目录中残留的文件
  pub fn scratch(&self) -> Vec<PathBuf> {
    fs::read_dir(self.results_dir().join(".tmp"))
      .unwrap()
      .map(|entry| entry.unwrap().path())
      .collect()
  }
}

pub fn gradient_png(width: u32, height: u32) -> (Frame, Vec<u8>) {
  let frame = Frame::from(image::RgbImage::from_fn(width, height, |x, y| {
    image::Rgb([(x * 3 % 256) as u8, (y * 5 % 256) as u8, ((x * y) % 256) as u8])
  }));
  let bytes = ImageEncoding::Png.encode(&frame).unwrap();
  (frame, bytes)
}
