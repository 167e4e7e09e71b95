//! # Headset Transport Layer
//!
//! 传输层（USB / BT / DECT）与核心之间的窄接口：
//!
//! - [`Transport`]：核心代表 API 调用向设备发送命令、读取状态
//! - [`DeviceEventSink`]：传输层把 attach / detach / 输入 / 状态变化上报给核心
//!
//! 具体的帧格式和厂商命令编码不属于这一层。启用 `mock` feature 后提供
//! 一个内存实现 [`mock::MockTransport`]，用于无硬件测试。

use bytes::Bytes;
use headset_protocol::{
    DeviceCommand, DeviceId, DeviceIdentity, DeviceQuery, DeviceReading, DeviceStatus,
};
use std::sync::Arc;
use thiserror::Error;

#[cfg(feature = "mock")]
pub mod mock;

#[cfg(feature = "mock")]
pub use mock::{MockDevice, MockTransport};

/// 传输层统一错误类型
#[derive(Error, Debug)]
pub enum TransportError {
    #[error("IO Error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Device Error: {0}")]
    Device(#[from] TransportDeviceError),
    #[error("Request timeout")]
    Timeout,
    #[error("Transport not started")]
    NotStarted,
    /// 设备不支持该命令 / 查询
    #[error("Not supported by device: {0}")]
    Unsupported(String),
}

/// 设备/后端错误的结构化分类
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportDeviceErrorKind {
    Unknown,
    NotFound,
    NoDevice,
    AccessDenied,
    Busy,
    /// 设备拒绝了命令
    Nack,
    InvalidResponse,
    Backend,
}

/// 结构化设备错误
#[derive(Error, Debug, Clone)]
#[error("{kind:?}: {message}")]
pub struct TransportDeviceError {
    pub kind: TransportDeviceErrorKind,
    pub message: String,
}

impl TransportDeviceError {
    pub fn new(kind: TransportDeviceErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    /// 设备已不可用（继续重试没有意义）
    pub fn is_fatal(&self) -> bool {
        matches!(
            self.kind,
            TransportDeviceErrorKind::NoDevice
                | TransportDeviceErrorKind::AccessDenied
                | TransportDeviceErrorKind::NotFound
        )
    }
}

impl From<String> for TransportDeviceError {
    fn from(message: String) -> Self {
        Self::new(TransportDeviceErrorKind::Unknown, message)
    }
}

impl From<&str> for TransportDeviceError {
    fn from(message: &str) -> Self {
        Self::new(TransportDeviceErrorKind::Unknown, message)
    }
}

/// 传输层上报通道（由核心实现）
///
/// 所有方法都必须快速返回，不能阻塞传输层的 I/O 线程。
pub trait DeviceEventSink: Send + Sync {
    /// 新设备接入
    ///
    /// 返回注册表分配的设备 ID；同一物理设备重复上报时返回 `None`。
    fn attached(&self, identity: DeviceIdentity) -> Option<DeviceId>;

    /// 设备移除
    fn detached(&self, device_id: DeviceId);

    /// 原始 HID 输入报告
    fn input(&self, device_id: DeviceId, raw: Bytes);

    /// 设备状态变化（电池、插孔、佩戴检测等）
    fn status(&self, device_id: DeviceId, status: DeviceStatus);

    /// 启动后的首次设备扫描完成
    fn first_scan_done(&self);
}

/// 传输层（由 USB / BT / DECT 后端实现）
pub trait Transport: Send + Sync {
    /// 开始向 `sink` 上报事件
    fn start(&self, sink: Arc<dyn DeviceEventSink>) -> Result<(), TransportError>;

    /// 停止上报（之后不再调用 sink）
    fn stop(&self);

    /// 发送写命令
    fn write_command(&self, device_id: DeviceId, command: &DeviceCommand)
    -> Result<(), TransportError>;

    /// 读取设备状态
    fn read(&self, device_id: DeviceId, query: DeviceQuery) -> Result<DeviceReading, TransportError>;
}
