//! 设备枚举、设备锁与通话控制

use crate::instance::{instance, status_of, with_registry};
use headset_protocol::{DeviceCommand, DeviceId, DeviceInfo, EventMask, ReturnCode};

/// 当前在线的设备（按 ID 升序）；未初始化时为空
pub fn get_attached_devices() -> Vec<DeviceInfo> {
    with_registry(|r| Ok(r.devices())).unwrap_or_default()
}

pub fn get_device_info(id: DeviceId) -> Option<DeviceInfo> {
    with_registry(|r| r.device_info(id)).ok()
}

pub fn is_device_attached(id: DeviceId) -> bool {
    get_device_info(id).is_some()
}

/// 获取设备锁（本应用初始化时的 instance 作为持有者）
///
/// 已被其他应用持有时返回 `DeviceLock`。
pub fn get_lock(id: DeviceId) -> ReturnCode {
    let Ok(instance) = instance() else {
        return ReturnCode::SystemError;
    };
    match instance.registry.acquire_lock(id, instance.caller) {
        Ok(()) => ReturnCode::ReturnOk,
        Err(e) => e.return_code(),
    }
}

/// 释放设备锁；未持有时返回 `DeviceNotLock`
pub fn release_lock(id: DeviceId) -> ReturnCode {
    let Ok(instance) = instance() else {
        return ReturnCode::SystemError;
    };
    match instance.registry.release_lock(id, instance.caller) {
        Ok(()) => ReturnCode::ReturnOk,
        Err(e) => e.return_code(),
    }
}

/// 设备是否被任意应用锁定
pub fn is_locked(id: DeviceId) -> bool {
    with_registry(|r| Ok(r.is_locked(id))).unwrap_or(false)
}

/// 设置设备上报哪些状态 / 输入事件
pub fn set_subscribed_device_events(id: DeviceId, mask: EventMask) -> ReturnCode {
    status_of(|r| r.set_subscribed_events(id, mask))
}

pub fn get_subscribed_device_events(id: DeviceId) -> Result<EventMask, ReturnCode> {
    with_registry(|r| r.subscribed_events(id))
}

fn send(id: DeviceId, command: DeviceCommand) -> ReturnCode {
    let Ok(instance) = instance() else {
        return ReturnCode::SystemError;
    };
    match instance.registry.send_command(id, instance.caller, &command) {
        Ok(()) => ReturnCode::ReturnOk,
        Err(e) => e.return_code(),
    }
}

/// 摘机 / 挂机
pub fn set_offhook(id: DeviceId, offhook: bool) -> ReturnCode {
    send(id, DeviceCommand::SetOffHook(offhook))
}

pub fn set_ringer(id: DeviceId, ringing: bool) -> ReturnCode {
    send(id, DeviceCommand::SetRinger(ringing))
}

pub fn set_mute(id: DeviceId, mute: bool) -> ReturnCode {
    send(id, DeviceCommand::SetMute(mute))
}

pub fn set_hold(id: DeviceId, hold: bool) -> ReturnCode {
    send(id, DeviceCommand::SetHold(hold))
}
