//! 事件回调注册
//!
//! 全局回调每种事件只有一个槽位，重复注册替换旧回调；
//! 按设备的回调以 (设备, 事件类型) 为键，设备移除时自动失效。
//! 回调在分发线程上执行，可以在回调内再调用 SDK。

use crate::instance::{instance, with_registry};
use headset_driver::{EventListener, SubscriptionHandle};
use headset_protocol::{
    BatteryStatus, DeviceEvent, DeviceId, EventKind, EventMask, EventPayload,
    FirmwareEventStatus, FirmwareEventType, HeadDetectionStatus, JackStatus, LinkConnectStatus,
    ReturnCode, UploadEventStatus,
};
use std::sync::Arc;

fn install_global(kind: EventKind, listener: Arc<dyn EventListener>) -> ReturnCode {
    match instance() {
        Ok(instance) => {
            instance.registry.set_global_listener(kind, listener);
            ReturnCode::ReturnOk
        },
        Err(code) => code,
    }
}

fn install_device(id: DeviceId, kind: EventKind, listener: Arc<dyn EventListener>) -> ReturnCode {
    match with_registry(|r| r.set_device_listener(id, kind, listener)) {
        Ok(_) => ReturnCode::ReturnOk,
        Err(code) => code,
    }
}

/// 电池状态更新
pub fn register_battery_status_callback(
    f: impl Fn(DeviceId, &BatteryStatus) + Send + Sync + 'static,
) -> ReturnCode {
    install_global(
        EventKind::Battery,
        Arc::new(move |e: &DeviceEvent| {
            if let (Some(id), EventPayload::Battery(status)) = (e.device_id, &e.payload) {
                f(id, status);
            }
        }),
    )
}

/// 忙碌灯状态变化
pub fn register_busylight_callback(
    f: impl Fn(DeviceId, bool) + Send + Sync + 'static,
) -> ReturnCode {
    install_global(
        EventKind::Busylight,
        Arc::new(move |e: &DeviceEvent| {
            if let (Some(id), EventPayload::Busylight(on)) = (e.device_id, &e.payload) {
                f(id, *on);
            }
        }),
    )
}

/// 固件下载 / 更新进度
pub fn register_firmware_progress_callback(
    f: impl Fn(DeviceId, FirmwareEventType, FirmwareEventStatus, u16) + Send + Sync + 'static,
) -> ReturnCode {
    install_global(
        EventKind::FirmwareProgress,
        Arc::new(move |e: &DeviceEvent| {
            if let (
                Some(id),
                EventPayload::FirmwareProgress {
                    event_type,
                    status,
                    percentage,
                },
            ) = (e.device_id, &e.payload)
            {
                f(id, *event_type, *status, *percentage);
            }
        }),
    )
}

/// 铃声 / 图片上传进度
pub fn register_upload_progress_callback(
    f: impl Fn(DeviceId, UploadEventStatus, u16) + Send + Sync + 'static,
) -> ReturnCode {
    install_global(
        EventKind::UploadProgress,
        Arc::new(move |e: &DeviceEvent| {
            if let (Some(id), EventPayload::UploadProgress { status, percentage }) =
                (e.device_id, &e.payload)
            {
                f(id, *status, *percentage);
            }
        }),
    )
}

/// 后台能力数据获取完成
pub fn register_device_data_updated_callback(
    f: impl Fn(DeviceId) + Send + Sync + 'static,
) -> ReturnCode {
    install_global(
        EventKind::DeviceDataUpdated,
        Arc::new(move |e: &DeviceEvent| {
            if let Some(id) = e.device_id {
                f(id);
            }
        }),
    )
}

pub fn register_device_log_callback(
    f: impl Fn(DeviceId, &str) + Send + Sync + 'static,
) -> ReturnCode {
    install_global(
        EventKind::DeviceLog,
        Arc::new(move |e: &DeviceEvent| {
            if let (Some(id), EventPayload::DeviceLog(line)) = (e.device_id, &e.payload) {
                f(id, line);
            }
        }),
    )
}

/// 注销全局回调；槽位为空时返回 `NoInformation`
pub fn unregister_global_callback(kind: EventKind) -> ReturnCode {
    match with_registry(|r| Ok(r.clear_global_listener(kind))) {
        Ok(true) => ReturnCode::ReturnOk,
        Ok(false) => ReturnCode::NoInformation,
        Err(code) => code,
    }
}

/// 耳机插孔状态
pub fn set_jack_connector_listener(
    id: DeviceId,
    f: impl Fn(DeviceId, JackStatus) + Send + Sync + 'static,
) -> ReturnCode {
    install_device(
        id,
        EventKind::Jack,
        Arc::new(move |e: &DeviceEvent| {
            if let (Some(id), EventPayload::Jack(status)) = (e.device_id, &e.payload) {
                f(id, *status);
            }
        }),
    )
}

/// 佩戴检测
pub fn set_head_detection_listener(
    id: DeviceId,
    f: impl Fn(DeviceId, HeadDetectionStatus) + Send + Sync + 'static,
) -> ReturnCode {
    install_device(
        id,
        EventKind::HeadDetection,
        Arc::new(move |e: &DeviceEvent| {
            if let (Some(id), EventPayload::HeadDetection(status)) = (e.device_id, &e.payload) {
                f(id, *status);
            }
        }),
    )
}

pub fn set_link_connection_status_listener(
    id: DeviceId,
    f: impl Fn(DeviceId, LinkConnectStatus) + Send + Sync + 'static,
) -> ReturnCode {
    install_device(
        id,
        EventKind::LinkStatus,
        Arc::new(move |e: &DeviceEvent| {
            if let (Some(id), EventPayload::LinkStatus(status)) = (e.device_id, &e.payload) {
                f(id, *status);
            }
        }),
    )
}

/// 手动忙碌灯变化（设备上的按键或其他应用）
pub fn set_manual_busylight_listener(
    id: DeviceId,
    f: impl Fn(DeviceId, bool) + Send + Sync + 'static,
) -> ReturnCode {
    install_device(
        id,
        EventKind::ManualBusylight,
        Arc::new(move |e: &DeviceEvent| {
            if let (Some(id), EventPayload::ManualBusylight(on)) = (e.device_id, &e.payload) {
                f(id, *on);
            }
        }),
    )
}

/// 注销按设备注册的回调
pub fn unregister_device_listener(id: DeviceId, kind: EventKind) -> ReturnCode {
    match with_registry(|r| Ok(r.clear_device_listener(id, kind))) {
        Ok(true) => ReturnCode::ReturnOk,
        Ok(false) => ReturnCode::NoInformation,
        Err(code) => code,
    }
}

/// 多事件订阅（`device` 为 `None` 时接收所有设备的事件）
pub fn subscribe(
    kinds: EventMask,
    device: Option<DeviceId>,
    listener: Arc<dyn EventListener>,
) -> Result<SubscriptionHandle, ReturnCode> {
    with_registry(|r| r.subscribe(kinds, device, listener))
}

pub fn unsubscribe(handle: SubscriptionHandle) -> bool {
    with_registry(|r| Ok(r.unsubscribe(handle))).unwrap_or(false)
}

/// 订阅因队列已满被丢弃的事件数
pub fn dropped_events(handle: SubscriptionHandle) -> Option<u64> {
    with_registry(|r| Ok(r.dropped_events(handle))).ok().flatten()
}
