//! 设备身份与设备信息

use num_enum::{IntoPrimitive, TryFromPrimitive};
use serde::{Deserialize, Serialize};

/// 设备句柄
///
/// 由注册表在 attach 时分配，调用方从不自行指定。
/// 在同时在线的设备之间唯一，只有完整的 detach + attach 之后才可能被复用。
pub type DeviceId = u16;

/// 设备连接类型
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize, IntoPrimitive, TryFromPrimitive,
)]
#[repr(u8)]
pub enum ConnectionType {
    #[default]
    Usb = 0,
    Bt = 1,
    Dect = 2,
}

/// 设备错误状态（随设备信息一并上报）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ErrorStatus {
    #[default]
    NoError,
    SslError,
    CertificateError,
    NetworkError,
    DownloadError,
    ParseError,
    OtherError,
    DeviceInfoError,
    FileNotAccessible,
    FileNotCompatible,
    ChangeNotificationFailed,
    NotSupported,
}

/// 系统组件（复合设备的子设备）
///
/// DECT 底座 + 耳机这类设备对外只有一个 `DeviceId`，
/// 子设备通过 `(DeviceId, SystemComponent)` 复合键查询。
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize,
)]
pub enum SystemComponent {
    #[default]
    PrimaryHeadset,
    SecondaryHeadset,
    Cradle,
    Other,
}

/// 传输层上报的设备身份
///
/// 在 attach 之后不再变化；会话状态等可变数据保存在注册表的记录中。
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct DeviceIdentity {
    pub vendor_id: u16,
    pub product_id: u16,
    pub device_name: String,
    /// 传输层路径（USB 设备路径 / BT 地址 / DECT 端口）
    pub usb_device_path: String,
    /// 父设备（dongle / 底座）的实例路径
    pub parent_instance_id: Option<String>,
    pub is_dongle: bool,
    pub dongle_name: Option<String>,
    pub variant: Option<String>,
    pub serial_number: Option<String>,
    pub is_in_firmware_update_mode: bool,
    pub connection: ConnectionType,
    /// 设备当前固件版本（由传输层读取）
    pub firmware_version: Option<String>,
}

impl DeviceIdentity {
    /// 创建最小身份（其余字段为默认值）
    pub fn new(vendor_id: u16, product_id: u16, device_name: impl Into<String>) -> Self {
        Self {
            vendor_id,
            product_id,
            device_name: device_name.into(),
            ..Default::default()
        }
    }

    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.usb_device_path = path.into();
        self
    }

    pub fn with_serial(mut self, serial: impl Into<String>) -> Self {
        self.serial_number = Some(serial.into());
        self
    }

    pub fn with_connection(mut self, connection: ConnectionType) -> Self {
        self.connection = connection;
        self
    }

    pub fn with_parent(mut self, parent_instance_id: impl Into<String>) -> Self {
        self.parent_instance_id = Some(parent_instance_id.into());
        self
    }

    pub fn with_firmware_version(mut self, version: impl Into<String>) -> Self {
        self.firmware_version = Some(version.into());
        self
    }

    /// 物理设备键（用于重复注册检测）
    pub fn key(&self) -> DeviceKey {
        DeviceKey {
            vendor_id: self.vendor_id,
            product_id: self.product_id,
            serial_number: self.serial_number.clone().unwrap_or_default(),
            connection: self.connection,
            path: self.usb_device_path.clone(),
        }
    }

    /// 产品键（设备目录按产品缓存描述性数据）
    pub fn product_key(&self) -> (u16, u16, Option<String>) {
        (self.vendor_id, self.product_id, self.variant.clone())
    }
}

/// 物理设备键：同一传输路径上 vendor/product/serial 完全相同即视为同一设备
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DeviceKey {
    pub vendor_id: u16,
    pub product_id: u16,
    pub serial_number: String,
    pub connection: ConnectionType,
    pub path: String,
}

/// 设备信息快照（对外返回）
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceInfo {
    pub device_id: DeviceId,
    pub identity: DeviceIdentity,
    /// 父设备 ID（非拥有的回指引用，父设备离线后清空）
    pub parent_device_id: Option<DeviceId>,
    pub err_status: ErrorStatus,
}

impl DeviceInfo {
    pub fn vendor_id(&self) -> u16 {
        self.identity.vendor_id
    }

    pub fn product_id(&self) -> u16 {
        self.identity.product_id
    }

    pub fn device_name(&self) -> &str {
        &self.identity.device_name
    }

    pub fn serial_number(&self) -> Option<&str> {
        self.identity.serial_number.as_deref()
    }

    pub fn connection(&self) -> ConnectionType {
        self.identity.connection
    }
}
