// 该文件是 Jianwei （鉴违） 项目的一部分。
// src/capability.rs - 延迟初始化的共享能力
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

//! 检测器与存储客户端都是跨请求共享的能力：只初始化一次，之后只读使用。
//!
//! 初始化在互斥锁内执行，同一时刻最多一个调用者在初始化；
//! 初始化失败不会缓存，下一次 [`Capability::ensure_ready`] 会重新尝试。

use std::sync::{Arc, Mutex, PoisonError};

use tracing::{error, info};

use crate::AnalysisError;

type Initializer<T> = Box<dyn Fn() -> anyhow::Result<T> + Send + Sync>;

pub struct Capability<T> {
  name: &'static str,
  init: Initializer<T>,
  slot: Mutex<Option<Arc<T>>>,
}

impl<T> Capability<T> {
  /// 创建一个延迟初始化的能力
  pub fn new<F>(name: &'static str, init: F) -> Self
  where
    F: Fn() -> anyhow::Result<T> + Send + Sync + 'static,
  {
    Self {
      name,
      init: Box::new(init),
      slot: Mutex::new(None),
    }
  }

  /// 使用已经构造好的值创建能力
  pub fn ready(name: &'static str, value: T) -> Self
  where
    T: Send + Sync + 'static,
  {
    Self {
      name,
      init: Box::new(move || Err(anyhow::anyhow!("{} 已预先初始化", name))),
      slot: Mutex::new(Some(Arc::new(value))),
    }
  }

  pub fn name(&self) -> &'static str {
    self.name
  }

  pub fn is_ready(&self) -> bool {
    self
      .slot
      .lock()
      .unwrap_or_else(PoisonError::into_inner)
      .is_some()
  }

  /// 确保能力可用，必要时执行初始化
  pub fn ensure_ready(&self) -> Result<Arc<T>, AnalysisError> {
    let mut slot = self.slot.lock().unwrap_or_else(PoisonError::into_inner);
    if let Some(value) = slot.as_ref() {
      return Ok(Arc::clone(value));
    }

    info!("初始化 {}", self.name);
    match (self.init)() {
      Ok(value) => {
        let value = Arc::new(value);
        *slot = Some(Arc::clone(&value));
        info!("{} 初始化完成", self.name);
        Ok(value)
      }
      Err(e) => {
        error!("{} 初始化失败: {:#}", self.name, e);
        Err(AnalysisError::UnavailableCapability(format!(
          "{}: {:#}",
          self.name, e
        )))
      }
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::sync::atomic::{AtomicUsize, Ordering};

  #[test]
  fn initializes_at_most_once() {
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&calls);
    let capability = Capability::new("counter", move || {
      counter.fetch_add(1, Ordering::SeqCst);
      Ok(42u32)
    });

    assert!(!capability.is_ready());
    assert_eq!(*capability.ensure_ready().unwrap(), 42);
    assert_eq!(*capability.ensure_ready().unwrap(), 42);
    assert!(capability.is_ready());
    assert_eq!(calls.load(Ordering::SeqCst), 1);
  }

  #[test]
  fn failed_initialization_is_retried() {
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&calls);
    let capability = Capability::new("flaky", move || {
      if counter.fetch_add(1, Ordering::SeqCst) == 0 {
        anyhow::bail!("模型文件不存在");
      }
      Ok("ready")
    });

    let err = capability.ensure_ready().unwrap_err();
    assert!(matches!(err, AnalysisError::UnavailableCapability(_)));
    assert!(!capability.is_ready());

    assert_eq!(*capability.ensure_ready().unwrap(), "ready");
    assert_eq!(calls.load(Ordering::SeqCst), 2);
  }

  #[test]
  fn concurrent_callers_share_one_instance() {
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&calls);
    let capability = Arc::new(Capability::new("shared", move || {
      counter.fetch_add(1, Ordering::SeqCst);
      Ok(vec![1u8, 2, 3])
    }));

    let handles: Vec<_> = (0..8)
      .map(|_| {
        let capability = Arc::clone(&capability);
        std::thread::spawn(move || capability.ensure_ready().unwrap())
      })
      .collect();
    let values: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();

    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert!(values.windows(2).all(|w| Arc::ptr_eq(&w[0], &w[1])));
  }

  #[test]
  fn preinitialized_capability_is_ready() {
    let capability = Capability::ready("fixed", 7u8);
    assert!(capability.is_ready());
    assert_eq!(*capability.ensure_ready().unwrap(), 7);
  }
}
