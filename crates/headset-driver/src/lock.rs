//! 设备锁
//!
//! 每个设备同一时刻最多一个持有者：`Unlocked -> Locked(holder) -> Unlocked`。
//! 锁状态保存在设备记录内（随记录的互斥锁一起串行化），没有超时，
//! 只会被显式释放或在 detach 时被强制释放。

use crate::error::DriverError;
use crate::metrics::RegistryMetrics;
use crate::store::DeviceStore;
use headset_protocol::{DeviceCommand, DeviceId};
use std::sync::Arc;
use tracing::{debug, info};

/// 调用方上下文标识（不透明）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CallerId(u64);

impl CallerId {
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    /// 当前进程作为调用方
    pub fn process() -> Self {
        Self(u64::from(std::process::id()))
    }

    pub const fn raw(self) -> u64 {
        self.0
    }
}

/// 设备锁管理
pub struct LockManager {
    store: Arc<DeviceStore>,
    metrics: Arc<RegistryMetrics>,
}

impl LockManager {
    pub fn new(store: Arc<DeviceStore>, metrics: Arc<RegistryMetrics>) -> Self {
        Self { store, metrics }
    }

    pub fn acquire(&self, device: DeviceId, caller: CallerId) -> Result<(), DriverError> {
        let record = self.store.lookup(device)?;
        match record.with(|inner| inner.session.acquire(device, caller)) {
            Ok(true) => {
                info!("Device {} locked by caller {}", device, caller.raw());
                Ok(())
            },
            Ok(false) => Ok(()),
            Err(e) => {
                if matches!(e, DriverError::AlreadyLocked(_)) {
                    RegistryMetrics::incr(&self.metrics.lock_contention);
                    debug!("Device {} lock contention (caller {})", device, caller.raw());
                }
                Err(e)
            },
        }
    }

    pub fn release(&self, device: DeviceId, caller: CallerId) -> Result<(), DriverError> {
        let record = self.store.lookup(device)?;
        record.with(|inner| inner.session.release(device, caller))?;
        info!("Device {} unlocked by caller {}", device, caller.raw());
        Ok(())
    }

    /// 设备不存在时返回 `false`
    pub fn is_locked(&self, device: DeviceId) -> bool {
        self.store
            .lookup(device)
            .map(|r| r.lock_holder().is_some())
            .unwrap_or(false)
    }

    /// 通话控制命令：设备被锁定时只有持有者可以发送
    pub fn check_command(
        &self,
        device: DeviceId,
        caller: CallerId,
        command: &DeviceCommand,
    ) -> Result<(), DriverError> {
        let record = self.store.lookup(device)?;
        if !command.requires_lock() {
            return Ok(());
        }
        match record.lock_holder() {
            Some(holder) if holder != caller => Err(DriverError::AlreadyLocked(device)),
            _ => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use headset_protocol::DeviceIdentity;

    fn setup() -> (Arc<DeviceStore>, LockManager, Arc<RegistryMetrics>, DeviceId) {
        let store = Arc::new(DeviceStore::new());
        let metrics = Arc::new(RegistryMetrics::new());
        let locks = LockManager::new(store.clone(), metrics.clone());
        let id = store
            .register(DeviceIdentity::new(1, 2, "Speak 750").with_path("usb-1"))
            .unwrap()
            .id();
        (store, locks, metrics, id)
    }

    #[test]
    fn test_mutual_exclusion() {
        let (_store, locks, metrics, id) = setup();
        let (a, b) = (CallerId::new(1), CallerId::new(2));

        locks.acquire(id, a).unwrap();
        assert!(locks.is_locked(id));
        assert!(matches!(locks.acquire(id, b), Err(DriverError::AlreadyLocked(_))));
        locks.release(id, a).unwrap();
        assert!(!locks.is_locked(id));
        locks.acquire(id, b).unwrap();
        assert_eq!(metrics.snapshot().lock_contention, 1);
    }

    #[test]
    fn test_unknown_device() {
        let (_store, locks, _metrics, _id) = setup();
        assert!(matches!(
            locks.acquire(99, CallerId::new(1)),
            Err(DriverError::DeviceUnknown(99))
        ));
        assert!(matches!(
            locks.release(99, CallerId::new(1)),
            Err(DriverError::DeviceUnknown(99))
        ));
        assert!(!locks.is_locked(99));
    }

    #[test]
    fn test_release_without_lock() {
        let (_store, locks, _metrics, id) = setup();
        assert!(matches!(
            locks.release(id, CallerId::new(5)),
            Err(DriverError::NotLockedByCaller(_))
        ));
    }

    #[test]
    fn test_detach_force_releases() {
        let (store, locks, _metrics, id) = setup();
        let a = CallerId::new(1);
        locks.acquire(id, a).unwrap();
        let (_record, outcome) = store.remove(id).unwrap();
        assert_eq!(outcome.lock_holder, Some(a));
        assert!(matches!(locks.acquire(id, a), Err(DriverError::DeviceUnknown(_))));
    }

    #[test]
    fn test_telephony_command_requires_holder() {
        let (_store, locks, _metrics, id) = setup();
        let (a, b) = (CallerId::new(1), CallerId::new(2));

        // 未锁定时任何人都可以
        locks.check_command(id, b, &DeviceCommand::SetOffHook(true)).unwrap();

        locks.acquire(id, a).unwrap();
        locks.check_command(id, a, &DeviceCommand::SetMute(true)).unwrap();
        assert!(matches!(
            locks.check_command(id, b, &DeviceCommand::SetMute(true)),
            Err(DriverError::AlreadyLocked(_))
        ));
        // 非通话命令不受影响
        locks.check_command(id, b, &DeviceCommand::SetBusylight(true)).unwrap();
    }
}
