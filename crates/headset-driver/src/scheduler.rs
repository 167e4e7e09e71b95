//! 延迟任务调度
//!
//! 单个后台线程维护一个按到期时间排序的堆，用 `recv_timeout` 等待下一个到期时间或新命令。
//! 主要用于设备接入后延迟 `delay_before_refresh` 再刷新目录数据。
//! 任务可以按设备取消（detach 时），关闭时未到期的任务直接丢弃。

use crate::dispatcher::JoinTimeout;
use crate::error::DriverError;
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, unbounded};
use headset_protocol::DeviceId;
use parking_lot::Mutex;
use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use tracing::{debug, error, warn};

type Task = Box<dyn FnOnce() + Send>;

enum Command {
    Schedule {
        due: Instant,
        device: Option<DeviceId>,
        task: Task,
    },
    Cancel(DeviceId),
    Stop,
}

struct Entry {
    due: Instant,
    seq: u64,
    device: Option<DeviceId>,
    task: Task,
}

impl PartialEq for Entry {
    fn eq(&self, other: &Self) -> bool {
        self.due == other.due && self.seq == other.seq
    }
}

impl Eq for Entry {}

impl PartialOrd for Entry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Entry {
    // BinaryHeap 是大顶堆，反转后最早到期的在堆顶
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .due
            .cmp(&self.due)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

/// 延迟任务调度器
pub(crate) struct Scheduler {
    tx: Sender<Command>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl Scheduler {
    pub fn new() -> Result<Self, DriverError> {
        let (tx, rx) = unbounded();
        let handle = std::thread::Builder::new()
            .name("headset-scheduler".to_string())
            .spawn(move || scheduler_loop(rx))
            .map_err(|e| DriverError::Thread(e.to_string()))?;
        Ok(Self {
            tx,
            handle: Mutex::new(Some(handle)),
        })
    }

    /// `delay` 之后在调度线程上执行 `task`；调度器已关闭时返回 `false`
    ///
    /// 到期时间超出 `Instant` 可表示范围的任务永不到期，直接丢弃。
    pub fn schedule(
        &self,
        delay: Duration,
        device: Option<DeviceId>,
        task: impl FnOnce() + Send + 'static,
    ) -> bool {
        let Some(due) = Instant::now().checked_add(delay) else {
            warn!("Delay {:?} for {:?} is out of range, task never runs", delay, device);
            return self.handle.lock().is_some();
        };
        self.tx
            .send(Command::Schedule {
                due,
                device,
                task: Box::new(task),
            })
            .is_ok()
    }

    /// 取消设备尚未执行的任务
    pub fn cancel_device(&self, device: DeviceId) {
        let _ = self.tx.send(Command::Cancel(device));
    }

    /// 幂等
    pub fn shutdown(&self, timeout: Duration) {
        let Some(handle) = self.handle.lock().take() else {
            return;
        };
        let _ = self.tx.send(Command::Stop);
        if handle.join_timeout(timeout).is_err() {
            warn!("Scheduler thread did not stop within {:?}", timeout);
        }
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        self.shutdown(Duration::from_secs(2));
    }
}

fn scheduler_loop(rx: Receiver<Command>) {
    let mut heap: BinaryHeap<Entry> = BinaryHeap::new();
    let mut seq = 0u64;

    loop {
        let command = match heap.peek() {
            Some(next) => {
                let wait = next.due.saturating_duration_since(Instant::now());
                match rx.recv_timeout(wait) {
                    Ok(command) => Some(command),
                    Err(RecvTimeoutError::Timeout) => None,
                    Err(RecvTimeoutError::Disconnected) => break,
                }
            },
            None => match rx.recv() {
                Ok(command) => Some(command),
                Err(_) => break,
            },
        };

        match command {
            Some(Command::Schedule { due, device, task }) => {
                seq += 1;
                heap.push(Entry {
                    due,
                    seq,
                    device,
                    task,
                });
            },
            Some(Command::Cancel(device)) => {
                let before = heap.len();
                heap.retain(|e| e.device != Some(device));
                debug!("Cancelled {} pending task(s) of device {}", before - heap.len(), device);
            },
            Some(Command::Stop) => break,
            None => {},
        }

        let now = Instant::now();
        while heap.peek().is_some_and(|e| e.due <= now) {
            if let Some(entry) = heap.pop()
                && catch_unwind(AssertUnwindSafe(entry.task)).is_err()
            {
                error!("Scheduled task for {:?} panicked", entry.device);
            }
        }
    }
    debug!("Scheduler stopped with {} pending task(s)", heap.len());
}
