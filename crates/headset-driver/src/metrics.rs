//! 运行指标（原子计数器）
//!
//! 所有计数器只增不减，`snapshot()` 返回某一时刻的近似一致视图。

use std::sync::atomic::{AtomicU64, Ordering};

/// 注册表运行指标
#[derive(Debug, Default)]
pub struct RegistryMetrics {
    pub events_published: AtomicU64,
    pub events_delivered: AtomicU64,
    /// 监听者队列溢出丢弃的事件数
    pub events_dropped: AtomicU64,
    pub listener_panics: AtomicU64,
    pub fetches_started: AtomicU64,
    /// 合并到已有请求上的获取次数
    pub fetches_collapsed: AtomicU64,
    pub fetches_failed: AtomicU64,
    /// 因设备已被他人锁定而失败的 acquire 次数
    pub lock_contention: AtomicU64,
    pub devices_attached: AtomicU64,
    pub devices_detached: AtomicU64,
    pub operations_started: AtomicU64,
    pub operations_cancelled: AtomicU64,
}

impl RegistryMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub(crate) fn incr(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            events_published: self.events_published.load(Ordering::Relaxed),
            events_delivered: self.events_delivered.load(Ordering::Relaxed),
            events_dropped: self.events_dropped.load(Ordering::Relaxed),
            listener_panics: self.listener_panics.load(Ordering::Relaxed),
            fetches_started: self.fetches_started.load(Ordering::Relaxed),
            fetches_collapsed: self.fetches_collapsed.load(Ordering::Relaxed),
            fetches_failed: self.fetches_failed.load(Ordering::Relaxed),
            lock_contention: self.lock_contention.load(Ordering::Relaxed),
            devices_attached: self.devices_attached.load(Ordering::Relaxed),
            devices_detached: self.devices_detached.load(Ordering::Relaxed),
            operations_started: self.operations_started.load(Ordering::Relaxed),
            operations_cancelled: self.operations_cancelled.load(Ordering::Relaxed),
        }
    }
}

/// 指标快照
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub events_published: u64,
    pub events_delivered: u64,
    pub events_dropped: u64,
    pub listener_panics: u64,
    pub fetches_started: u64,
    pub fetches_collapsed: u64,
    pub fetches_failed: u64,
    pub lock_contention: u64,
    pub devices_attached: u64,
    pub devices_detached: u64,
    pub operations_started: u64,
    pub operations_cancelled: u64,
}

impl MetricsSnapshot {
    /// 当前在线设备数
    pub fn devices_online(&self) -> u64 {
        self.devices_attached.saturating_sub(self.devices_detached)
    }
}
