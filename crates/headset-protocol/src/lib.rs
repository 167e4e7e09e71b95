//! # Headset Protocol
//!
//! 耳机设备管理的数据模型定义（无硬件依赖、无线程）
//!
//! ## 模块
//!
//! - `return_code`: 对外返回码（与文档化的返回码表一一对应）
//! - `device`: 设备身份、设备信息、连接类型
//! - `features`: 设备功能枚举
//! - `status`: 电池 / 耳机插孔 / 佩戴检测 / 链路状态
//! - `events`: 事件类型、事件负载、事件掩码
//! - `firmware`: 固件元数据与进度状态
//! - `equalizer`: 均衡器频段
//! - `constants`: 设备常量（arena 结构）
//! - `command`: 发往传输层的语义命令（不含任何字节编码）
//! - `config`: SDK 配置（TOML）

pub mod command;
pub mod config;
pub mod constants;
pub mod device;
pub mod equalizer;
pub mod events;
pub mod features;
pub mod firmware;
pub mod return_code;
pub mod status;

// 重新导出常用类型
pub use command::{DeviceCommand, DeviceQuery, DeviceReading};
pub use config::{CatalogueConfig, CloudConfig, DispatcherConfig, SdkConfig};
pub use constants::{Const, ConstRoot};
pub use device::{
    ConnectionType, DeviceId, DeviceIdentity, DeviceInfo, DeviceKey, ErrorStatus, SystemComponent,
};
pub use equalizer::{EqualizerBand, EqualizerReading};
pub use events::{DeviceEvent, DeviceStatus, EventKind, EventMask, EventPayload, HidInput};
pub use features::DeviceFeature;
pub use firmware::{
    FirmwareEventStatus, FirmwareEventType, FirmwareInfo, FirmwareVersion, UploadEventStatus,
};
pub use return_code::ReturnCode;
pub use status::{
    BatteryComponent, BatteryStatus, BatteryUnit, BusyLightValue, HeadDetectionStatus, JackStatus,
    LinkConnectStatus, LinkStatusComponent,
};

use thiserror::Error;

/// 协议层错误类型
#[derive(Error, Debug)]
pub enum ProtocolError {
    /// 枚举取值超出定义范围
    #[error("Invalid value for {field}: {value}")]
    InvalidValue { field: String, value: u32 },

    /// 配置项非法（如容量为 0）
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// TOML 解析失败
    #[error("Config parse error: {0}")]
    ConfigParse(#[from] toml::de::Error),

    /// 配置文件读取失败
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// 常量数据结构非法
    #[error("Invalid constants document: {0}")]
    InvalidConstants(String),

    /// 固件版本号无法解析
    #[error("Invalid firmware version: {0}")]
    InvalidVersion(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_protocol_error_display() {
        let err = ProtocolError::InvalidValue {
            field: "BatteryComponent".to_string(),
            value: 42,
        };
        assert_eq!(format!("{}", err), "Invalid value for BatteryComponent: 42");

        let err = ProtocolError::InvalidConfig("queue_capacity must be > 0".to_string());
        assert!(format!("{}", err).contains("queue_capacity"));
    }
}
