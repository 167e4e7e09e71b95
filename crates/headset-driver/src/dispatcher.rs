//! 事件分发
//!
//! 事件源（传输层 I/O 线程、API 调用线程、操作线程）只负责入队，
//! 监听者在独立的分发线程上被调用，慢监听者不会拖住事件源。
//!
//! # 投递模型
//!
//! - 每个订阅有自己的有界队列；满了丢弃最旧的事件并计数（`events_dropped`），发布方从不阻塞
//! - 订阅有事件待投递时，通过 `scheduled` 标志保证它同一时刻只在一个分发线程上被处理，
//!   因此同一监听者收到的事件顺序与发布顺序一致
//! - 订阅列表放在 `ArcSwap` 中，发布时无锁读取
//! - 监听者 panic 会被捕获并计数，分发线程继续运行
//!
//! # 单槽位回调
//!
//! [`SlotKey`] 标识的订阅同一时刻只有一个，重新注册会原子地替换旧的。
//! 全局槽位按事件类型区分，设备槽位按 `(DeviceId, EventKind)` 区分。

use crate::error::DriverError;
use crate::metrics::RegistryMetrics;
use arc_swap::ArcSwap;
use crossbeam_channel::{Receiver, Sender, unbounded};
use headset_protocol::{DeviceEvent, DeviceId, EventKind, EventMask, EventPayload};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use tracing::{debug, error, warn};

/// 单个订阅一次连续投递的最大事件数（之后让出分发线程）
const DELIVERY_BATCH: usize = 64;

/// 关闭时检查队列是否排空的间隔
const DRAIN_POLL: Duration = Duration::from_millis(2);

const DISPATCH_THREAD_PREFIX: &str = "headset-dispatch-";

/// 事件监听者
///
/// 在分发线程上调用；实现可以阻塞，但会推迟同一监听者后续事件的投递。
pub trait EventListener: Send + Sync {
    fn on_event(&self, event: &DeviceEvent);
}

impl<F> EventListener for F
where
    F: Fn(&DeviceEvent) + Send + Sync,
{
    fn on_event(&self, event: &DeviceEvent) {
        self(event)
    }
}

/// 订阅句柄
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionHandle(u64);

/// 单槽位回调的键
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SlotKey {
    Global(EventKind),
    Device(DeviceId, EventKind),
}

struct Subscription {
    handle: SubscriptionHandle,
    kinds: EventMask,
    device: Option<DeviceId>,
    slot: Option<SlotKey>,
    listener: Arc<dyn EventListener>,
    queue: Mutex<VecDeque<Arc<DeviceEvent>>>,
    scheduled: AtomicBool,
    active: AtomicBool,
    dropped: AtomicU64,
}

impl Subscription {
    fn matches(&self, event: &DeviceEvent) -> bool {
        self.kinds.contains(event.kind())
            && match self.device {
                None => true,
                Some(id) => event.device_id == Some(id),
            }
    }

    fn deactivate(&self) {
        self.active.store(false, Ordering::Release);
        self.queue.lock().clear();
    }

    /// 还有事件待投递或正在投递
    fn is_busy(&self) -> bool {
        self.active.load(Ordering::Acquire)
            && (self.scheduled.load(Ordering::Acquire) || !self.queue.lock().is_empty())
    }
}

enum WorkerMessage {
    Ready(Arc<Subscription>),
    Stop,
}

struct Shared {
    subscriptions: ArcSwap<Vec<Arc<Subscription>>>,
    /// 已随设备移除、仍有事件待投递的订阅
    draining: Mutex<Vec<Arc<Subscription>>>,
    /// 订阅列表的写者互斥
    writer: Mutex<()>,
    ready_tx: Sender<WorkerMessage>,
    accepting: AtomicBool,
    sequence: AtomicU64,
    next_handle: AtomicU64,
    capacity: usize,
    metrics: Arc<RegistryMetrics>,
}

/// 事件分发器
pub struct Dispatcher {
    shared: Arc<Shared>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl Dispatcher {
    /// 创建分发器并启动 `workers` 个分发线程
    pub fn new(
        capacity: usize,
        workers: usize,
        metrics: Arc<RegistryMetrics>,
    ) -> Result<Self, DriverError> {
        if capacity == 0 || workers == 0 {
            return Err(DriverError::Config(
                "dispatcher capacity and workers must be > 0".to_string(),
            ));
        }
        let (ready_tx, ready_rx) = unbounded();
        let shared = Arc::new(Shared {
            subscriptions: ArcSwap::from_pointee(Vec::new()),
            draining: Mutex::new(Vec::new()),
            writer: Mutex::new(()),
            ready_tx,
            accepting: AtomicBool::new(true),
            sequence: AtomicU64::new(1),
            next_handle: AtomicU64::new(1),
            capacity,
            metrics,
        });

        let mut handles = Vec::with_capacity(workers);
        for index in 0..workers {
            let shared = shared.clone();
            let rx: Receiver<WorkerMessage> = ready_rx.clone();
            let handle = std::thread::Builder::new()
                .name(format!("{}{}", DISPATCH_THREAD_PREFIX, index))
                .spawn(move || worker_loop(shared, rx))
                .map_err(|e| DriverError::Thread(e.to_string()))?;
            handles.push(handle);
        }

        Ok(Self {
            shared,
            workers: Mutex::new(handles),
        })
    }

    /// 订阅一组事件类型；`device` 为 `None` 时接收所有设备的事件
    pub fn subscribe(
        &self,
        kinds: EventMask,
        device: Option<DeviceId>,
        listener: Arc<dyn EventListener>,
    ) -> SubscriptionHandle {
        self.insert(kinds, device, None, listener)
    }

    /// 注册单槽位回调，替换同一槽位上已有的回调
    pub fn set_slot(&self, slot: SlotKey, listener: Arc<dyn EventListener>) -> SubscriptionHandle {
        let (kind, device) = match slot {
            SlotKey::Global(kind) => (kind, None),
            SlotKey::Device(id, kind) => (kind, Some(id)),
        };
        self.insert(EventMask::empty().with(kind), device, Some(slot), listener)
    }

    fn insert(
        &self,
        kinds: EventMask,
        device: Option<DeviceId>,
        slot: Option<SlotKey>,
        listener: Arc<dyn EventListener>,
    ) -> SubscriptionHandle {
        let handle = SubscriptionHandle(self.shared.next_handle.fetch_add(1, Ordering::Relaxed));
        let subscription = Arc::new(Subscription {
            handle,
            kinds,
            device,
            slot,
            listener,
            queue: Mutex::new(VecDeque::new()),
            scheduled: AtomicBool::new(false),
            active: AtomicBool::new(true),
            dropped: AtomicU64::new(0),
        });

        let _writer = self.shared.writer.lock();
        let current = self.shared.subscriptions.load_full();
        let mut next = Vec::with_capacity(current.len() + 1);
        for existing in current.iter() {
            if slot.is_some() && existing.slot == slot {
                existing.deactivate();
                debug!("Replacing listener in slot {:?}", slot);
            } else {
                next.push(existing.clone());
            }
        }
        next.push(subscription);
        self.shared.subscriptions.store(Arc::new(next));
        handle
    }

    /// 取消订阅；正在进行的回调会正常结束，之后不再调用
    pub fn unsubscribe(&self, handle: SubscriptionHandle) -> bool {
        self.remove_where(|s| s.handle == handle) > 0
    }

    /// 清空单槽位
    pub fn clear_slot(&self, slot: SlotKey) -> bool {
        self.remove_where(|s| s.slot == Some(slot)) > 0
    }

    fn remove_where(&self, predicate: impl Fn(&Subscription) -> bool) -> usize {
        let _writer = self.shared.writer.lock();
        let current = self.shared.subscriptions.load_full();
        let (removed, kept): (Vec<_>, Vec<_>) =
            current.iter().cloned().partition(|s| predicate(s.as_ref()));
        for subscription in &removed {
            subscription.deactivate();
        }
        if !removed.is_empty() {
            self.shared.subscriptions.store(Arc::new(kept));
        }
        removed.len()
    }

    /// 发布事件；返回事件序号，已关闭时返回 `None`
    pub fn publish(&self, device_id: Option<DeviceId>, payload: EventPayload) -> Option<u64> {
        let shared = &self.shared;
        if !shared.accepting.load(Ordering::Acquire) {
            return None;
        }
        let sequence = shared.sequence.fetch_add(1, Ordering::Relaxed);
        let event = Arc::new(DeviceEvent {
            device_id,
            sequence,
            payload,
        });
        RegistryMetrics::incr(&shared.metrics.events_published);

        for subscription in shared.subscriptions.load().iter() {
            if !subscription.active.load(Ordering::Acquire) || !subscription.matches(&event) {
                continue;
            }
            {
                let mut queue = subscription.queue.lock();
                if queue.len() >= shared.capacity {
                    queue.pop_front();
                    subscription.dropped.fetch_add(1, Ordering::Relaxed);
                    RegistryMetrics::incr(&shared.metrics.events_dropped);
                    warn!(
                        "Listener queue full (capacity {}), dropped oldest event",
                        shared.capacity
                    );
                }
                queue.push_back(event.clone());
            }
            schedule(shared, subscription);
        }
        Some(sequence)
    }

    /// 丢弃某设备尚未投递的事件（`DeviceRemoved` 除外）
    pub fn purge_device(&self, device: DeviceId) {
        for subscription in self.shared.subscriptions.load().iter() {
            subscription.queue.lock().retain(|e| {
                e.device_id != Some(device) || e.kind() == EventKind::DeviceRemoved
            });
        }
    }

    /// 移除只针对该设备的订阅与单槽位回调（在 `DeviceRemoved` 入队之后调用）
    ///
    /// 已入队的事件照常投递，之后不再匹配新事件。
    pub fn retire_device(&self, device: DeviceId) -> usize {
        let _writer = self.shared.writer.lock();
        let current = self.shared.subscriptions.load_full();
        let (retired, kept): (Vec<_>, Vec<_>) = current
            .iter()
            .cloned()
            .partition(|s| s.device == Some(device));
        if retired.is_empty() {
            return 0;
        }
        self.shared.subscriptions.store(Arc::new(kept));
        let mut draining = self.shared.draining.lock();
        draining.retain(|s| s.is_busy());
        let count = retired.len();
        draining.extend(retired.into_iter().filter(|s| s.is_busy()));
        debug!("Retired {} subscription(s) of device {}", count, device);
        count
    }

    /// 某个订阅因队列溢出丢弃的事件数
    pub fn dropped_events(&self, handle: SubscriptionHandle) -> Option<u64> {
        self.shared
            .subscriptions
            .load()
            .iter()
            .find(|s| s.handle == handle)
            .map(|s| s.dropped.load(Ordering::Relaxed))
    }

    pub fn subscription_count(&self) -> usize {
        self.shared.subscriptions.load().len()
    }

    pub fn is_accepting(&self) -> bool {
        self.shared.accepting.load(Ordering::Acquire)
    }

    /// 关闭：拒绝新事件，在 `timeout` 内投递已入队的事件，之后丢弃剩余事件并等待分发线程退出
    ///
    /// 返回之后不会再有任何回调被调用（超时的线程除外，会记录错误日志）。
    /// 在分发线程上调用时不等待排空。
    pub fn shutdown(&self, timeout: Duration) {
        if !self.shared.accepting.swap(false, Ordering::AcqRel) {
            return;
        }
        if !on_dispatch_thread() {
            let deadline = Instant::now().checked_add(timeout);
            while self.has_pending() && deadline.is_none_or(|d| Instant::now() < d) {
                std::thread::sleep(DRAIN_POLL);
            }
        }
        if self.has_pending() {
            warn!("Dispatcher shutting down with undelivered events, discarding");
        }
        {
            let _writer = self.shared.writer.lock();
            for subscription in self.shared.subscriptions.load().iter() {
                subscription.deactivate();
            }
            self.shared.subscriptions.store(Arc::new(Vec::new()));
            for subscription in self.shared.draining.lock().drain(..) {
                subscription.deactivate();
            }
        }

        let handles: Vec<_> = self.workers.lock().drain(..).collect();
        for _ in 0..handles.len() {
            let _ = self.shared.ready_tx.send(WorkerMessage::Stop);
        }
        for handle in handles {
            if let Err(_e) = handle.join_timeout(timeout) {
                error!(
                    "Dispatch thread panicked or failed to shut down within {:?}",
                    timeout
                );
            }
        }
        debug!("Dispatcher shut down");
    }

    /// 是否还有订阅在排队或正在被投递
    fn has_pending(&self) -> bool {
        self.shared.subscriptions.load().iter().any(|s| s.is_busy())
            || self.shared.draining.lock().iter().any(|s| s.is_busy())
    }
}

fn on_dispatch_thread() -> bool {
    std::thread::current()
        .name()
        .is_some_and(|name| name.starts_with(DISPATCH_THREAD_PREFIX))
}

impl Drop for Dispatcher {
    fn drop(&mut self) {
        self.shutdown(Duration::from_secs(2));
    }
}

fn schedule(shared: &Shared, subscription: &Arc<Subscription>) {
    if !subscription.scheduled.swap(true, Ordering::AcqRel) {
        let _ = shared
            .ready_tx
            .send(WorkerMessage::Ready(subscription.clone()));
    }
}

fn worker_loop(shared: Arc<Shared>, rx: Receiver<WorkerMessage>) {
    while let Ok(message) = rx.recv() {
        match message {
            WorkerMessage::Ready(subscription) => deliver(&shared, &subscription),
            WorkerMessage::Stop => break,
        }
    }
}

/// 投递一个订阅的待处理事件（同一时刻只有一个线程执行）
fn deliver(shared: &Shared, subscription: &Arc<Subscription>) {
    for _ in 0..DELIVERY_BATCH {
        let next = subscription.queue.lock().pop_front();
        let Some(event) = next else {
            subscription.scheduled.store(false, Ordering::Release);
            // 清除标志与入队之间的竞争：有新事件且没人接手时自己重新调度
            if !subscription.queue.lock().is_empty() {
                schedule(shared, subscription);
            }
            return;
        };
        // 关闭排空期间 accepting 已为 false，已入队的事件仍然投递
        if !subscription.active.load(Ordering::Acquire) {
            continue;
        }
        let listener = subscription.listener.clone();
        let result = catch_unwind(AssertUnwindSafe(|| listener.on_event(&event)));
        match result {
            Ok(()) => RegistryMetrics::incr(&shared.metrics.events_delivered),
            Err(_) => {
                RegistryMetrics::incr(&shared.metrics.listener_panics);
                error!(
                    "Listener panicked while handling {:?} (seq {})",
                    event.kind(),
                    event.sequence
                );
            },
        }
    }
    // 批次用完，让出线程；scheduled 仍为 true，直接重新入队
    let _ = shared
        .ready_tx
        .send(WorkerMessage::Ready(subscription.clone()));
}

/// 带超时的线程 join
pub(crate) trait JoinTimeout {
    fn join_timeout(self, timeout: Duration) -> std::thread::Result<()>;
}

impl<T: Send + 'static> JoinTimeout for JoinHandle<T> {
    fn join_timeout(self, timeout: Duration) -> std::thread::Result<()> {
        let (tx, rx) = crossbeam_channel::bounded(1);
        // 看门狗线程负责真正的 join，超时后继续留在后台
        std::thread::spawn(move || {
            let result = self.join();
            let _ = tx.send(result);
        });
        match rx.recv_timeout(timeout) {
            Ok(join_result) => join_result.map(|_| ()),
            Err(crossbeam_channel::RecvTimeoutError::Timeout) => Err(Box::new(
                std::io::Error::new(std::io::ErrorKind::TimedOut, "Thread join timeout"),
            )),
            Err(crossbeam_channel::RecvTimeoutError::Disconnected) => {
                Err(Box::new(std::io::Error::new(
                    std::io::ErrorKind::ConnectionReset,
                    "Thread panicked during join",
                )))
            },
        }
    }
}
