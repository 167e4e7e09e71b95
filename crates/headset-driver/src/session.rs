//! 会话 / 连接状态机
//!
//! 每个设备记录内嵌一个 [`Session`]，由记录自身的互斥锁保护（按设备细粒度加锁）。
//!
//! ```text
//! Attached ──(能力数据就绪)──▶ Ready ──(上传/固件/重启)──▶ Busy ──(完成)──▶ Ready
//!     │                          │                           │
//!     └──────────────────────────┴───────(detach)────────────┴──▶ Detached（终态）
//! ```
//!
//! 锁不是一个独立阶段，而是叠加在 Attached / Ready / Busy 之上的标志，
//! Busy 结束后锁状态保持不变。

use crate::error::DriverError;
use crate::lock::CallerId;
use crate::operations::RunningOperation;
use headset_protocol::DeviceId;
use std::sync::Arc;

/// 对外报告的会话状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionState {
    /// 已接入，能力数据尚未确认
    Attached,
    Ready,
    /// Ready（或 Attached）且被某个调用方锁定
    Locked,
    /// 正在执行长时间独占操作（锁状态被保留）
    Busy,
    Detached,
}

#[derive(Debug, Clone)]
enum Phase {
    Attached,
    Ready,
    Busy(Arc<RunningOperation>),
    Detached,
}

/// detach 时需要善后的内容
#[derive(Debug)]
pub(crate) struct DetachOutcome {
    /// 被中断的长时间操作
    pub operation: Option<Arc<RunningOperation>>,
    /// 被强制释放的锁持有者
    pub lock_holder: Option<CallerId>,
}

#[derive(Debug)]
pub(crate) struct Session {
    phase: Phase,
    lock_holder: Option<CallerId>,
}

impl Session {
    pub fn new() -> Self {
        Self {
            phase: Phase::Attached,
            lock_holder: None,
        }
    }

    pub fn state(&self) -> SessionState {
        match &self.phase {
            Phase::Detached => SessionState::Detached,
            Phase::Busy(_) => SessionState::Busy,
            _ if self.lock_holder.is_some() => SessionState::Locked,
            Phase::Ready => SessionState::Ready,
            Phase::Attached => SessionState::Attached,
        }
    }

    pub fn is_detached(&self) -> bool {
        matches!(self.phase, Phase::Detached)
    }

    /// 能力数据是否已确认（Busy 必然来自 Ready）
    pub fn is_ready(&self) -> bool {
        matches!(self.phase, Phase::Ready | Phase::Busy(_))
    }

    /// Attached → Ready；其他阶段不变。返回是否发生了转换
    pub fn mark_ready(&mut self) -> bool {
        if matches!(self.phase, Phase::Attached) {
            self.phase = Phase::Ready;
            true
        } else {
            false
        }
    }

    /// Ready → Busy
    pub fn begin_busy(
        &mut self,
        device: DeviceId,
        operation: Arc<RunningOperation>,
    ) -> Result<(), DriverError> {
        match &self.phase {
            Phase::Ready => {
                self.phase = Phase::Busy(operation);
                Ok(())
            },
            Phase::Busy(current) => Err(DriverError::Busy {
                device,
                operation: current.kind(),
            }),
            Phase::Attached => Err(DriverError::BadState {
                device,
                reason: "device data not ready".to_string(),
            }),
            Phase::Detached => Err(DriverError::DeviceUnknown(device)),
        }
    }

    /// Busy → Ready（只结束同一个操作；detach 之后无效果）
    pub fn end_busy(&mut self, operation: &Arc<RunningOperation>) -> bool {
        match &self.phase {
            Phase::Busy(current) if Arc::ptr_eq(current, operation) => {
                self.phase = Phase::Ready;
                true
            },
            _ => false,
        }
    }

    pub fn running_operation(&self) -> Option<&Arc<RunningOperation>> {
        match &self.phase {
            Phase::Busy(op) => Some(op),
            _ => None,
        }
    }

    pub fn lock_holder(&self) -> Option<CallerId> {
        self.lock_holder
    }

    /// 获取锁；同一调用方重复获取是幂等的。返回是否新获得
    pub fn acquire(&mut self, device: DeviceId, caller: CallerId) -> Result<bool, DriverError> {
        if self.is_detached() {
            return Err(DriverError::DeviceUnknown(device));
        }
        match self.lock_holder {
            None => {
                self.lock_holder = Some(caller);
                Ok(true)
            },
            Some(holder) if holder == caller => Ok(false),
            Some(_) => Err(DriverError::AlreadyLocked(device)),
        }
    }

    pub fn release(&mut self, device: DeviceId, caller: CallerId) -> Result<(), DriverError> {
        if self.is_detached() {
            return Err(DriverError::DeviceUnknown(device));
        }
        match self.lock_holder {
            Some(holder) if holder == caller => {
                self.lock_holder = None;
                Ok(())
            },
            _ => Err(DriverError::NotLockedByCaller(device)),
        }
    }

    /// 任意阶段 → Detached，只发生一次
    pub fn detach(&mut self) -> Option<DetachOutcome> {
        let previous = std::mem::replace(&mut self.phase, Phase::Detached);
        let operation = match previous {
            Phase::Detached => return None,
            Phase::Busy(op) => Some(op),
            Phase::Attached | Phase::Ready => None,
        };
        Some(DetachOutcome {
            operation,
            lock_holder: self.lock_holder.take(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::operations::OperationKind;

    fn op(kind: OperationKind) -> Arc<RunningOperation> {
        Arc::new(RunningOperation::new(kind))
    }

    #[test]
    fn test_attached_to_ready() {
        let mut s = Session::new();
        assert_eq!(s.state(), SessionState::Attached);
        assert!(!s.is_ready());
        assert!(s.mark_ready());
        assert!(!s.mark_ready());
        assert_eq!(s.state(), SessionState::Ready);
    }

    #[test]
    fn test_lock_is_orthogonal_overlay() {
        let a = CallerId::new(1);
        let mut s = Session::new();
        s.mark_ready();
        assert!(s.acquire(7, a).unwrap());
        assert_eq!(s.state(), SessionState::Locked);

        let upload = op(OperationKind::RingtoneUpload);
        s.begin_busy(7, upload.clone()).unwrap();
        assert_eq!(s.state(), SessionState::Busy);
        assert_eq!(s.lock_holder(), Some(a));

        assert!(s.end_busy(&upload));
        assert_eq!(s.state(), SessionState::Locked);
        s.release(7, a).unwrap();
        assert_eq!(s.state(), SessionState::Ready);
    }

    #[test]
    fn test_second_busy_rejected() {
        let mut s = Session::new();
        s.mark_ready();
        s.begin_busy(2, op(OperationKind::ImageUpload)).unwrap();
        let err = s.begin_busy(2, op(OperationKind::RingtoneUpload)).unwrap_err();
        assert!(matches!(
            err,
            DriverError::Busy {
                device: 2,
                operation: OperationKind::ImageUpload
            }
        ));
    }

    #[test]
    fn test_busy_requires_ready() {
        let mut s = Session::new();
        let err = s.begin_busy(1, op(OperationKind::Reboot)).unwrap_err();
        assert!(matches!(err, DriverError::BadState { .. }));
    }

    #[test]
    fn test_end_busy_ignores_foreign_operation() {
        let mut s = Session::new();
        s.mark_ready();
        let first = op(OperationKind::FirmwareUpdate);
        s.begin_busy(1, first).unwrap();
        assert!(!s.end_busy(&op(OperationKind::FirmwareUpdate)));
        assert_eq!(s.state(), SessionState::Busy);
    }

    #[test]
    fn test_idempotent_acquire_and_contention() {
        let (a, b) = (CallerId::new(1), CallerId::new(2));
        let mut s = Session::new();
        assert!(s.acquire(1, a).unwrap());
        assert!(!s.acquire(1, a).unwrap());
        assert!(matches!(s.acquire(1, b), Err(DriverError::AlreadyLocked(1))));
        assert!(matches!(s.release(1, b), Err(DriverError::NotLockedByCaller(1))));
        // 一次 release 即完全解锁
        s.release(1, a).unwrap();
        assert!(s.acquire(1, b).unwrap());
    }

    #[test]
    fn test_detach_exactly_once() {
        let a = CallerId::new(9);
        let mut s = Session::new();
        s.mark_ready();
        s.acquire(3, a).unwrap();
        let upload = op(OperationKind::RingtoneUpload);
        s.begin_busy(3, upload.clone()).unwrap();

        let outcome = s.detach().unwrap();
        assert_eq!(outcome.lock_holder, Some(a));
        assert!(Arc::ptr_eq(outcome.operation.as_ref().unwrap(), &upload));
        assert_eq!(s.state(), SessionState::Detached);
        assert!(s.lock_holder().is_none());

        assert!(s.detach().is_none());
        assert!(matches!(s.acquire(3, a), Err(DriverError::DeviceUnknown(3))));
        assert!(!s.end_busy(&upload));
    }
}
