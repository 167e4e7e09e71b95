//! 固件、文件上传与重启
//!
//! 下载、更新与上传在后台执行：受理时返回 `ReturnAsync`，
//! 进度与结果通过已注册的进度回调上报。

use crate::instance::{status_of, with_registry};
use headset_driver::FirmwareCheck;
use headset_protocol::{DeviceId, FirmwareInfo, ReturnCode};
use std::path::Path;

fn accepted(result: Result<(), ReturnCode>) -> ReturnCode {
    match result {
        Ok(()) => ReturnCode::ReturnAsync,
        Err(code) => code,
    }
}

/// 检查是否有新固件：`FirmwareAvailable` / `FirmwareUpToDate` / 错误码
pub fn check_for_firmware_update(id: DeviceId) -> ReturnCode {
    match with_registry(|r| r.check_firmware_update(id)) {
        Ok(FirmwareCheck::Available(_)) => ReturnCode::FirmwareAvailable,
        Ok(FirmwareCheck::UpToDate) => ReturnCode::FirmwareUpToDate,
        Err(code) => code,
    }
}

pub fn get_latest_firmware_information(id: DeviceId) -> Result<FirmwareInfo, ReturnCode> {
    with_registry(|r| r.latest_firmware(id))
}

pub fn download_firmware(id: DeviceId, version: &str) -> ReturnCode {
    accepted(with_registry(|r| r.download_firmware(id, version)))
}

pub fn update_firmware(id: DeviceId, file: impl AsRef<Path>) -> ReturnCode {
    accepted(with_registry(|r| r.update_firmware(id, file.as_ref())))
}

pub fn cancel_firmware_download(id: DeviceId) -> ReturnCode {
    status_of(|r| r.cancel_firmware_download(id))
}

/// 取消设备上正在执行的下载或上传
pub fn cancel_operation(id: DeviceId) -> ReturnCode {
    status_of(|r| r.cancel_operation(id))
}

pub fn is_firmware_lock_enabled(id: DeviceId) -> bool {
    with_registry(|r| r.firmware_lock_enabled(id)).unwrap_or(false)
}

pub fn enable_firmware_lock(id: DeviceId, enable: bool) -> ReturnCode {
    status_of(|r| r.enable_firmware_lock(id, enable))
}

pub fn upload_ringtone(id: DeviceId, file: impl AsRef<Path>) -> ReturnCode {
    accepted(with_registry(|r| r.upload_ringtone(id, file.as_ref())))
}

pub fn upload_image(id: DeviceId, file: impl AsRef<Path>) -> ReturnCode {
    accepted(with_registry(|r| r.upload_image(id, file.as_ref())))
}

/// 同步重启；成功时返回 `DeviceRebooted`
pub fn reboot_device(id: DeviceId) -> ReturnCode {
    match with_registry(|r| r.reboot(id)) {
        Ok(()) => ReturnCode::DeviceRebooted,
        Err(code) => code,
    }
}

