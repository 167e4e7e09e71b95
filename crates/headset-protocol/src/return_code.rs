//! 返回码定义
//!
//! 对外 API 的每一次调用都返回一个 [`ReturnCode`]，数值在各版本间保持稳定。

use num_enum::{IntoPrimitive, TryFromPrimitive};

/// API 返回码
///
/// 按错误类别划分：
/// - 身份错误：`DeviceUnknown`、`DeviceInvalid`
/// - 竞争错误：`DeviceLock`、`DeviceNotLock`、`UploadAlreadyInProgress`、`DownloadAlreadyInProgress`
/// - IO 错误：`DeviceReadFails`、`DeviceWriteFail`、`DeviceNack`
/// - 能力错误：`NotSupported`
/// - 参数错误：`ParameterFail`
/// - 网络错误：`NetworkRequestFail`、`ReturnTimeout`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, IntoPrimitive, TryFromPrimitive)]
#[repr(u32)]
pub enum ReturnCode {
    ReturnOk = 0,
    DeviceUnknown = 1,
    DeviceInvalid = 2,
    NotSupported = 3,
    ParameterFail = 4,
    ProtectedSettingWrite = 5,
    NoInformation = 6,
    NetworkRequestFail = 7,
    DeviceWriteFail = 8,
    DeviceReadFails = 9,
    NoFactorySupported = 10,
    SystemError = 11,
    DeviceBadState = 12,
    FileWriteFail = 13,
    FileAlreadyExists = 14,
    FileNotAccessible = 15,
    FirmwareUpToDate = 16,
    FirmwareAvailable = 17,
    ReturnAsync = 18,
    InvalidAuthorization = 19,
    FwuApplicationNotAvailable = 20,
    DeviceAlreadyConnected = 21,
    DeviceNotConnected = 22,
    CannotClearDeviceConnected = 23,
    DeviceRebooted = 24,
    UploadAlreadyInProgress = 25,
    DownloadAlreadyInProgress = 26,
    ParameterNotSupported = 27,
    DeviceNotLock = 28,
    DeviceLock = 29,
    DeviceNack = 30,
    ReturnTimeout = 31,
}

impl ReturnCode {
    /// 是否表示成功（`ReturnOk` 或异步受理 `ReturnAsync`）
    pub fn is_ok(self) -> bool {
        matches!(self, ReturnCode::ReturnOk | ReturnCode::ReturnAsync)
    }

    /// 返回码的描述文本
    pub fn description(self) -> &'static str {
        match self {
            ReturnCode::ReturnOk => "Call was successful",
            ReturnCode::DeviceUnknown => "Device is unknown",
            ReturnCode::DeviceInvalid => "Device is invalid",
            ReturnCode::NotSupported => "Functionality is not supported on this device",
            ReturnCode::ParameterFail => "Parameter is invalid",
            ReturnCode::ProtectedSettingWrite => "Setting is protected and cannot be written",
            ReturnCode::NoInformation => "No information available",
            ReturnCode::NetworkRequestFail => "Network request failed",
            ReturnCode::DeviceWriteFail => "Failed writing to device",
            ReturnCode::DeviceReadFails => "Failed reading from device",
            ReturnCode::NoFactorySupported => "Factory reset is not supported",
            ReturnCode::SystemError => "System error",
            ReturnCode::DeviceBadState => "Device is in a bad state",
            ReturnCode::FileWriteFail => "Failed writing file",
            ReturnCode::FileAlreadyExists => "File already exists",
            ReturnCode::FileNotAccessible => "File is not accessible",
            ReturnCode::FirmwareUpToDate => "Firmware is up to date",
            ReturnCode::FirmwareAvailable => "Firmware update is available",
            ReturnCode::ReturnAsync => "Request accepted, result is delivered asynchronously",
            ReturnCode::InvalidAuthorization => "Authorization is invalid",
            ReturnCode::FwuApplicationNotAvailable => "Firmware updater application not available",
            ReturnCode::DeviceAlreadyConnected => "Device is already connected",
            ReturnCode::DeviceNotConnected => "Device is not connected",
            ReturnCode::CannotClearDeviceConnected => "Cannot clear a connected device",
            ReturnCode::DeviceRebooted => "Device rebooted",
            ReturnCode::UploadAlreadyInProgress => "Upload already in progress",
            ReturnCode::DownloadAlreadyInProgress => "Download already in progress",
            ReturnCode::ParameterNotSupported => "Parameter is not supported",
            ReturnCode::DeviceNotLock => "Device is not locked by caller",
            ReturnCode::DeviceLock => "Device is locked by another caller",
            ReturnCode::DeviceNack => "Device rejected the request",
            ReturnCode::ReturnTimeout => "Operation timed out",
        }
    }
}

impl std::fmt::Display for ReturnCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.description())
    }
}
