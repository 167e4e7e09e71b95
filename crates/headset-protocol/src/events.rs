//! 事件类型与事件负载
//!
//! 事件来源有两类：
//! - 传输层上报（attach / detach / 输入 / 状态变化）
//! - SDK 自身产生（固件 / 上传进度、设备数据更新）

use crate::device::{DeviceId, DeviceInfo};
use crate::firmware::{FirmwareEventStatus, FirmwareEventType, UploadEventStatus};
use crate::status::{BatteryStatus, HeadDetectionStatus, JackStatus, LinkConnectStatus};
use serde::{Deserialize, Serialize};

/// 翻译后的 HID 输入
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum HidInput {
    Undefined,
    OffHook,
    Mute,
    Flash,
    Redial,
    Key0,
    Key1,
    Key2,
    Key3,
    Key4,
    Key5,
    Key6,
    Key7,
    Key8,
    Key9,
    KeyStar,
    KeyPound,
    KeyClear,
    Online,
    SpeedDial,
    VoiceMail,
    LineBusy,
    RejectCall,
    OutOfRange,
    PseudoOffHook,
    Button1,
    Button2,
    Button3,
    VolumeUp,
    VolumeDown,
    FireAlarm,
    JackConnection,
    QdConnection,
    HeadsetConnection,
}

/// 事件类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum EventKind {
    DeviceAttached = 0,
    DeviceRemoved = 1,
    FirstScanDone = 2,
    RawHidInput = 3,
    TranslatedInput = 4,
    Busylight = 5,
    ManualBusylight = 6,
    Battery = 7,
    Jack = 8,
    HeadDetection = 9,
    LinkStatus = 10,
    FirmwareProgress = 11,
    UploadProgress = 12,
    DeviceDataUpdated = 13,
    DeviceLog = 14,
}

impl EventKind {
    pub const ALL: [EventKind; 15] = [
        EventKind::DeviceAttached,
        EventKind::DeviceRemoved,
        EventKind::FirstScanDone,
        EventKind::RawHidInput,
        EventKind::TranslatedInput,
        EventKind::Busylight,
        EventKind::ManualBusylight,
        EventKind::Battery,
        EventKind::Jack,
        EventKind::HeadDetection,
        EventKind::LinkStatus,
        EventKind::FirmwareProgress,
        EventKind::UploadProgress,
        EventKind::DeviceDataUpdated,
        EventKind::DeviceLog,
    ];

    /// 在 [`EventMask`] 中对应的位
    pub const fn bit(self) -> u32 {
        1 << (self as u8)
    }

    /// 是否由设备本身产生（可以按设备订阅）
    pub fn is_device_event(self) -> bool {
        !matches!(self, EventKind::FirstScanDone)
    }
}

/// 事件类型位掩码
///
/// 用于记录设备的订阅集合（一个设备可以同时订阅多种事件，各自独立）。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Hash, Serialize, Deserialize)]
pub struct EventMask(u32);

impl EventMask {
    pub const fn empty() -> Self {
        Self(0)
    }

    pub fn all() -> Self {
        EventKind::ALL.iter().fold(Self::empty(), |mask, kind| mask.with(*kind))
    }

    pub const fn from_bits(bits: u32) -> Self {
        Self(bits)
    }

    pub const fn bits(self) -> u32 {
        self.0
    }

    pub const fn with(self, kind: EventKind) -> Self {
        Self(self.0 | kind.bit())
    }

    pub fn insert(&mut self, kind: EventKind) {
        self.0 |= kind.bit();
    }

    pub fn remove(&mut self, kind: EventKind) {
        self.0 &= !kind.bit();
    }

    pub const fn contains(self, kind: EventKind) -> bool {
        self.0 & kind.bit() != 0
    }

    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    pub fn iter(self) -> impl Iterator<Item = EventKind> {
        EventKind::ALL.into_iter().filter(move |kind| self.contains(*kind))
    }
}

impl FromIterator<EventKind> for EventMask {
    fn from_iter<I: IntoIterator<Item = EventKind>>(iter: I) -> Self {
        iter.into_iter().fold(Self::empty(), |mask, kind| mask.with(kind))
    }
}

/// 传输层上报的设备状态变化
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum DeviceStatus {
    Battery(BatteryStatus),
    Busylight(bool),
    ManualBusylight(bool),
    Jack(JackStatus),
    HeadDetection(HeadDetectionStatus),
    LinkStatus(LinkConnectStatus),
    TranslatedInput { input: HidInput, value: bool },
    Log(String),
}

impl DeviceStatus {
    pub fn kind(&self) -> EventKind {
        match self {
            DeviceStatus::Battery(_) => EventKind::Battery,
            DeviceStatus::Busylight(_) => EventKind::Busylight,
            DeviceStatus::ManualBusylight(_) => EventKind::ManualBusylight,
            DeviceStatus::Jack(_) => EventKind::Jack,
            DeviceStatus::HeadDetection(_) => EventKind::HeadDetection,
            DeviceStatus::LinkStatus(_) => EventKind::LinkStatus,
            DeviceStatus::TranslatedInput { .. } => EventKind::TranslatedInput,
            DeviceStatus::Log(_) => EventKind::DeviceLog,
        }
    }
}

impl From<DeviceStatus> for EventPayload {
    fn from(status: DeviceStatus) -> Self {
        match status {
            DeviceStatus::Battery(s) => EventPayload::Battery(s),
            DeviceStatus::Busylight(on) => EventPayload::Busylight(on),
            DeviceStatus::ManualBusylight(on) => EventPayload::ManualBusylight(on),
            DeviceStatus::Jack(s) => EventPayload::Jack(s),
            DeviceStatus::HeadDetection(s) => EventPayload::HeadDetection(s),
            DeviceStatus::LinkStatus(s) => EventPayload::LinkStatus(s),
            DeviceStatus::TranslatedInput { input, value } => {
                EventPayload::TranslatedInput { input, value }
            },
            DeviceStatus::Log(line) => EventPayload::DeviceLog(line),
        }
    }
}

/// 事件负载
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum EventPayload {
    DeviceAttached(DeviceInfo),
    DeviceRemoved,
    FirstScanDone,
    RawHidInput(Vec<u8>),
    TranslatedInput {
        input: HidInput,
        value: bool,
    },
    Busylight(bool),
    ManualBusylight(bool),
    Battery(BatteryStatus),
    Jack(JackStatus),
    HeadDetection(HeadDetectionStatus),
    LinkStatus(LinkConnectStatus),
    FirmwareProgress {
        event_type: FirmwareEventType,
        status: FirmwareEventStatus,
        percentage: u16,
    },
    UploadProgress {
        status: UploadEventStatus,
        percentage: u16,
    },
    DeviceDataUpdated,
    DeviceLog(String),
}

impl EventPayload {
    pub fn kind(&self) -> EventKind {
        match self {
            EventPayload::DeviceAttached(_) => EventKind::DeviceAttached,
            EventPayload::DeviceRemoved => EventKind::DeviceRemoved,
            EventPayload::FirstScanDone => EventKind::FirstScanDone,
            EventPayload::RawHidInput(_) => EventKind::RawHidInput,
            EventPayload::TranslatedInput { .. } => EventKind::TranslatedInput,
            EventPayload::Busylight(_) => EventKind::Busylight,
            EventPayload::ManualBusylight(_) => EventKind::ManualBusylight,
            EventPayload::Battery(_) => EventKind::Battery,
            EventPayload::Jack(_) => EventKind::Jack,
            EventPayload::HeadDetection(_) => EventKind::HeadDetection,
            EventPayload::LinkStatus(_) => EventKind::LinkStatus,
            EventPayload::FirmwareProgress { .. } => EventKind::FirmwareProgress,
            EventPayload::UploadProgress { .. } => EventKind::UploadProgress,
            EventPayload::DeviceDataUpdated => EventKind::DeviceDataUpdated,
            EventPayload::DeviceLog(_) => EventKind::DeviceLog,
        }
    }
}

/// 分发给监听者的事件
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceEvent {
    /// 事件所属设备（`FirstScanDone` 等全局事件为 `None`）
    pub device_id: Option<DeviceId>,
    /// 发布序号（全局单调递增）
    pub sequence: u64,
    pub payload: EventPayload,
}

impl DeviceEvent {
    pub fn kind(&self) -> EventKind {
        self.payload.kind()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_mask_insert_remove() {
        let mut mask = EventMask::empty();
        assert!(mask.is_empty());
        mask.insert(EventKind::Battery);
        mask.insert(EventKind::Jack);
        assert!(mask.contains(EventKind::Battery));
        assert!(mask.contains(EventKind::Jack));
        assert!(!mask.contains(EventKind::HeadDetection));

        mask.remove(EventKind::Battery);
        assert!(!mask.contains(EventKind::Battery));
        assert_eq!(mask.iter().collect::<Vec<_>>(), vec![EventKind::Jack]);
    }

    #[test]
    fn test_event_mask_all_covers_every_kind() {
        let mask = EventMask::all();
        for kind in EventKind::ALL {
            assert!(mask.contains(kind), "{:?} missing", kind);
        }
        assert_eq!(mask.bits().count_ones() as usize, EventKind::ALL.len());
    }

    #[test]
    fn test_status_kind_matches_payload_kind() {
        let statuses = vec![
            DeviceStatus::Battery(BatteryStatus::new(50, false, false)),
            DeviceStatus::Busylight(true),
            DeviceStatus::Jack(JackStatus { inserted: true }),
            DeviceStatus::TranslatedInput {
                input: HidInput::Mute,
                value: true,
            },
            DeviceStatus::Log("x".to_string()),
        ];
        for status in statuses {
            let kind = status.kind();
            let payload: EventPayload = status.into();
            assert_eq!(payload.kind(), kind);
        }
    }
}
