//! 设备记录存储
//!
//! - 映射表保存在 `ArcSwap` 中：读者（lookup / enumerate）无锁地拿到一致快照
//! - 写者（register / remove）通过一个互斥锁串行化，复制后整体替换映射表
//! - 每条记录的可变部分由记录自己的互斥锁保护，不同设备之间互不阻塞
//!
//! 记录被移除后仍由 `Arc` 持有它的回调 / 线程可以继续安全读取（只会看到 Detached）。

use crate::error::DriverError;
use crate::lock::CallerId;
use crate::session::{DetachOutcome, Session, SessionState};
use arc_swap::ArcSwap;
use headset_protocol::{
    BatteryStatus, DeviceId, DeviceIdentity, DeviceInfo, DeviceKey, ErrorStatus, EventMask,
};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use tracing::debug;

/// 记录中的可变部分
#[derive(Debug)]
pub(crate) struct RecordInner {
    pub session: Session,
    /// 父设备（非拥有的回指）
    pub parent: Option<DeviceId>,
    /// 已订阅的设备事件类型
    pub subscriptions: EventMask,
    /// 最近一次上报的电池状态
    pub battery: Option<BatteryStatus>,
    pub err_status: ErrorStatus,
}

/// 设备记录
#[derive(Debug)]
pub struct DeviceRecord {
    id: DeviceId,
    identity: DeviceIdentity,
    key: DeviceKey,
    attached_at: Instant,
    inner: Mutex<RecordInner>,
}

impl DeviceRecord {
    fn new(id: DeviceId, identity: DeviceIdentity) -> Self {
        Self {
            id,
            key: identity.key(),
            identity,
            attached_at: Instant::now(),
            inner: Mutex::new(RecordInner {
                session: Session::new(),
                parent: None,
                subscriptions: EventMask::all(),
                battery: None,
                err_status: ErrorStatus::NoError,
            }),
        }
    }

    pub fn id(&self) -> DeviceId {
        self.id
    }

    pub fn identity(&self) -> &DeviceIdentity {
        &self.identity
    }

    pub fn attached_at(&self) -> Instant {
        self.attached_at
    }

    pub fn info(&self) -> DeviceInfo {
        let inner = self.inner.lock();
        DeviceInfo {
            device_id: self.id,
            identity: self.identity.clone(),
            parent_device_id: inner.parent,
            err_status: inner.err_status,
        }
    }

    pub fn session_state(&self) -> SessionState {
        self.inner.lock().session.state()
    }

    pub fn is_detached(&self) -> bool {
        self.inner.lock().session.is_detached()
    }

    pub fn lock_holder(&self) -> Option<CallerId> {
        self.inner.lock().session.lock_holder()
    }

    pub fn parent(&self) -> Option<DeviceId> {
        self.inner.lock().parent
    }

    pub fn subscriptions(&self) -> EventMask {
        self.inner.lock().subscriptions
    }

    /// 在记录锁内执行
    pub(crate) fn with<R>(&self, f: impl FnOnce(&mut RecordInner) -> R) -> R {
        f(&mut self.inner.lock())
    }
}

type DeviceMap = HashMap<DeviceId, Arc<DeviceRecord>>;

/// 设备记录存储
pub struct DeviceStore {
    map: ArcSwap<DeviceMap>,
    /// 写者互斥 + 下一个候选 ID
    writer: Mutex<DeviceId>,
}

impl Default for DeviceStore {
    fn default() -> Self {
        Self::new()
    }
}

impl DeviceStore {
    pub fn new() -> Self {
        Self {
            map: ArcSwap::from_pointee(HashMap::new()),
            writer: Mutex::new(1),
        }
    }

    /// 注册新设备，分配一个当前未被占用的 ID
    pub fn register(&self, identity: DeviceIdentity) -> Result<Arc<DeviceRecord>, DriverError> {
        let mut cursor = self.writer.lock();
        let current = self.map.load_full();

        let key = identity.key();
        if current.values().any(|r| r.key == key) {
            return Err(DriverError::DuplicateDevice(format!(
                "{:04x}:{:04x} at '{}'",
                identity.vendor_id, identity.product_id, identity.usb_device_path
            )));
        }

        let id = Self::allocate_id(&current, &mut cursor)?;
        let record = Arc::new(DeviceRecord::new(id, identity));

        // 父设备：已在线、路径等于本设备 parent_instance_id 的设备
        let parent = record
            .identity
            .parent_instance_id
            .as_deref()
            .filter(|p| !p.is_empty())
            .and_then(|p| current.values().find(|r| r.identity.usb_device_path == p))
            .map(|r| r.id);
        record.with(|inner| inner.parent = parent);

        let mut next = DeviceMap::clone(&current);
        next.insert(id, record.clone());

        // 先于父设备出现的子设备在这里补上回指
        if !record.identity.usb_device_path.is_empty() {
            for child in current.values() {
                if child.identity.parent_instance_id.as_deref()
                    != Some(record.identity.usb_device_path.as_str())
                {
                    continue;
                }
                if child.parent().is_some() || Self::is_ancestor(&next, child.id, id) {
                    continue;
                }
                child.with(|inner| inner.parent = Some(id));
            }
        }

        self.map.store(Arc::new(next));
        debug!("Registered device {} (parent {:?})", id, parent);
        Ok(record)
    }

    /// `candidate` 是否是 `start` 本身或其祖先
    fn is_ancestor(map: &DeviceMap, candidate: DeviceId, start: DeviceId) -> bool {
        let mut current = Some(start);
        // 深度上限防止已有数据异常时死循环
        for _ in 0..=map.len() {
            match current {
                Some(id) if id == candidate => return true,
                Some(id) => current = map.get(&id).and_then(|r| r.parent()),
                None => return false,
            }
        }
        true
    }

    fn allocate_id(map: &DeviceMap, cursor: &mut DeviceId) -> Result<DeviceId, DriverError> {
        for _ in 0..DeviceId::MAX {
            let candidate = *cursor;
            *cursor = match cursor.checked_add(1) {
                Some(next) => next,
                None => 1,
            };
            if candidate != 0 && !map.contains_key(&candidate) {
                return Ok(candidate);
            }
        }
        Err(DriverError::IdsExhausted)
    }

    pub fn lookup(&self, id: DeviceId) -> Result<Arc<DeviceRecord>, DriverError> {
        self.map
            .load()
            .get(&id)
            .cloned()
            .ok_or(DriverError::DeviceUnknown(id))
    }

    /// 移除设备：先从映射表中摘除，再把记录标记为 Detached
    ///
    /// 仍持有旧快照的读者看到的是完整的（Detached 之前的）记录。
    pub(crate) fn remove(
        &self,
        id: DeviceId,
    ) -> Result<(Arc<DeviceRecord>, DetachOutcome), DriverError> {
        let _writer = self.writer.lock();
        let current = self.map.load_full();
        let record = current.get(&id).cloned().ok_or(DriverError::DeviceUnknown(id))?;

        let mut next = DeviceMap::clone(&current);
        next.remove(&id);
        for child in next.values() {
            child.with(|inner| {
                if inner.parent == Some(id) {
                    inner.parent = None;
                }
            });
        }
        self.map.store(Arc::new(next));

        let outcome = record
            .with(|inner| inner.session.detach())
            .ok_or(DriverError::DeviceUnknown(id))?;
        Ok((record, outcome))
    }

    /// 一致的时间点快照（按 ID 排序）
    pub fn enumerate(&self) -> Vec<Arc<DeviceRecord>> {
        let snapshot = self.map.load();
        let mut records: Vec<_> = snapshot.values().cloned().collect();
        records.sort_by_key(|r| r.id);
        records
    }

    pub fn len(&self) -> usize {
        self.map.load().len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.load().is_empty()
    }
}
