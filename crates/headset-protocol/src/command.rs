//! 发往传输层的语义命令
//!
//! 这里只描述 "做什么"，字节编码由具体的传输实现负责。

use crate::equalizer::EqualizerBand;
use crate::status::BatteryStatus;
use serde::{Deserialize, Serialize};

/// 写命令
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum DeviceCommand {
    SetBusylight(bool),
    SetManualBusylight(bool),
    /// 摘机 / 挂机
    SetOffHook(bool),
    SetRinger(bool),
    SetMute(bool),
    SetHold(bool),
    EnableEqualizer(bool),
    /// 各频段目标增益（dB），长度等于设备频段数
    SetEqualizerGains(Vec<f32>),
    EnableFirmwareLock(bool),
    Reboot,
}

impl DeviceCommand {
    /// 是否为通话控制命令
    ///
    /// 设备被锁定时，只有锁的持有者可以发送这类命令。
    pub fn requires_lock(&self) -> bool {
        matches!(
            self,
            DeviceCommand::SetOffHook(_)
                | DeviceCommand::SetRinger(_)
                | DeviceCommand::SetMute(_)
                | DeviceCommand::SetHold(_)
        )
    }

    /// 日志中使用的简短名称
    pub fn name(&self) -> &'static str {
        match self {
            DeviceCommand::SetBusylight(_) => "set_busylight",
            DeviceCommand::SetManualBusylight(_) => "set_manual_busylight",
            DeviceCommand::SetOffHook(_) => "set_offhook",
            DeviceCommand::SetRinger(_) => "set_ringer",
            DeviceCommand::SetMute(_) => "set_mute",
            DeviceCommand::SetHold(_) => "set_hold",
            DeviceCommand::EnableEqualizer(_) => "enable_equalizer",
            DeviceCommand::SetEqualizerGains(_) => "set_equalizer_gains",
            DeviceCommand::EnableFirmwareLock(_) => "enable_firmware_lock",
            DeviceCommand::Reboot => "reboot",
        }
    }
}

/// 读请求
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DeviceQuery {
    Busylight,
    ManualBusylight,
    Battery,
    EqualizerEnabled,
    EqualizerBands,
    FirmwareLock,
    FirmwareVersion,
}

/// 读请求的应答
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum DeviceReading {
    Flag(bool),
    Battery(BatteryStatus),
    EqualizerBands(Vec<EqualizerBand>),
    Version(String),
}

impl DeviceReading {
    pub fn as_flag(&self) -> Option<bool> {
        match self {
            DeviceReading::Flag(v) => Some(*v),
            _ => None,
        }
    }

    pub fn into_battery(self) -> Option<BatteryStatus> {
        match self {
            DeviceReading::Battery(s) => Some(s),
            _ => None,
        }
    }

    pub fn into_bands(self) -> Option<Vec<EqualizerBand>> {
        match self {
            DeviceReading::EqualizerBands(b) => Some(b),
            _ => None,
        }
    }

    pub fn into_version(self) -> Option<String> {
        match self {
            DeviceReading::Version(v) => Some(v),
            _ => None,
        }
    }
}
