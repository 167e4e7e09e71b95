//! 驱动层错误类型定义

use crate::operations::OperationKind;
use headset_protocol::{DeviceId, ProtocolError, ReturnCode};
use headset_transport::{TransportDeviceErrorKind, TransportError};
use std::path::PathBuf;
use thiserror::Error;

/// 驱动层错误类型
///
/// 每个变体对应唯一的 [`ReturnCode`]（见 [`DriverError::return_code`]）。
#[derive(Error, Debug)]
pub enum DriverError {
    /// 设备不在注册表中（从未出现或已移除）
    #[error("Device {0} unknown")]
    DeviceUnknown(DeviceId),

    /// 设备句柄或身份非法
    #[error("Invalid device: {0}")]
    DeviceInvalid(String),

    /// 同一物理设备重复注册
    #[error("Device already registered: {0}")]
    DuplicateDevice(String),

    /// 设备 ID 空间耗尽
    #[error("No free device id")]
    IdsExhausted,

    /// 设备不支持该功能
    #[error("Not supported: {0}")]
    NotSupported(String),

    /// 参数非法（在访问任何外部协作方之前检查）
    #[error("Invalid parameter: {0}")]
    Parameter(String),

    /// 设备被其他调用方锁定
    #[error("Device {0} is locked by another caller")]
    AlreadyLocked(DeviceId),

    /// 调用方没有持有设备锁
    #[error("Device {0} is not locked by caller")]
    NotLockedByCaller(DeviceId),

    /// 设备正在执行长时间操作
    #[error("Device {device} busy: {operation:?} in progress")]
    Busy {
        device: DeviceId,
        operation: OperationKind,
    },

    /// 设备状态不允许该操作
    #[error("Device {device} in bad state: {reason}")]
    BadState { device: DeviceId, reason: String },

    /// 没有正在执行、可以取消的操作
    #[error("No operation in progress on device {0}")]
    NoOperation(DeviceId),

    /// 写命令失败
    #[error("Device write failed: {0}")]
    WriteFail(TransportError),

    /// 读请求失败
    #[error("Device read failed: {0}")]
    ReadFail(TransportError),

    /// 没有可用信息（如云端没有固件记录）
    #[error("No information: {0}")]
    NoInformation(String),

    /// 网络请求失败（含禁止联网）
    #[error("Network request failed: {0}")]
    Network(String),

    /// 鉴权失败
    #[error("Invalid authorization")]
    InvalidAuthorization,

    /// 文件不存在或不可读
    #[error("File not accessible: {}", .0.display())]
    FileNotAccessible(PathBuf),

    /// 设备数据仍在后台获取中，结果稍后通过 DeviceDataUpdated 事件通知
    #[error("Device {0} data pending")]
    DataPending(DeviceId),

    /// 操作超时
    #[error("Operation timeout")]
    Timeout,

    /// 注册表已关闭
    #[error("Registry shut down")]
    ShutDown,

    /// 线程创建失败
    #[error("Thread error: {0}")]
    Thread(String),

    /// 配置错误
    #[error("Configuration error: {0}")]
    Config(String),

    /// 协议层错误
    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),
}

impl DriverError {
    /// 把写命令失败翻译为驱动错误
    pub(crate) fn write(err: TransportError) -> Self {
        match err {
            TransportError::Unsupported(what) => DriverError::NotSupported(what),
            TransportError::Timeout => DriverError::Timeout,
            other => DriverError::WriteFail(other),
        }
    }

    /// 把读请求失败翻译为驱动错误
    pub(crate) fn read(err: TransportError) -> Self {
        match err {
            TransportError::Unsupported(what) => DriverError::NotSupported(what),
            TransportError::Timeout => DriverError::Timeout,
            other => DriverError::ReadFail(other),
        }
    }

    /// 对外返回码
    pub fn return_code(&self) -> ReturnCode {
        match self {
            DriverError::DeviceUnknown(_) => ReturnCode::DeviceUnknown,
            DriverError::DeviceInvalid(_) => ReturnCode::DeviceInvalid,
            DriverError::DuplicateDevice(_) => ReturnCode::DeviceAlreadyConnected,
            DriverError::IdsExhausted => ReturnCode::SystemError,
            DriverError::NotSupported(_) => ReturnCode::NotSupported,
            DriverError::Parameter(_) => ReturnCode::ParameterFail,
            DriverError::AlreadyLocked(_) => ReturnCode::DeviceLock,
            DriverError::NotLockedByCaller(_) => ReturnCode::DeviceNotLock,
            DriverError::Busy { operation, .. } => match operation {
                OperationKind::RingtoneUpload | OperationKind::ImageUpload => {
                    ReturnCode::UploadAlreadyInProgress
                },
                OperationKind::FirmwareDownload => ReturnCode::DownloadAlreadyInProgress,
                OperationKind::FirmwareUpdate | OperationKind::Reboot => ReturnCode::DeviceBadState,
            },
            DriverError::BadState { .. } => ReturnCode::DeviceBadState,
            DriverError::NoOperation(_) => ReturnCode::DeviceBadState,
            DriverError::WriteFail(TransportError::Device(e))
                if e.kind == TransportDeviceErrorKind::Nack =>
            {
                ReturnCode::DeviceNack
            },
            DriverError::WriteFail(_) => ReturnCode::DeviceWriteFail,
            DriverError::ReadFail(TransportError::Device(e))
                if e.kind == TransportDeviceErrorKind::Nack =>
            {
                ReturnCode::DeviceNack
            },
            DriverError::ReadFail(_) => ReturnCode::DeviceReadFails,
            DriverError::NoInformation(_) => ReturnCode::NoInformation,
            DriverError::Network(_) => ReturnCode::NetworkRequestFail,
            DriverError::InvalidAuthorization => ReturnCode::InvalidAuthorization,
            DriverError::FileNotAccessible(_) => ReturnCode::FileNotAccessible,
            DriverError::DataPending(_) => ReturnCode::ReturnAsync,
            DriverError::Timeout => ReturnCode::ReturnTimeout,
            DriverError::ShutDown => ReturnCode::SystemError,
            DriverError::Thread(_) => ReturnCode::SystemError,
            DriverError::Config(_) => ReturnCode::ParameterFail,
            DriverError::Protocol(_) => ReturnCode::ParameterFail,
        }
    }
}
