//! 固件元数据与进度状态

use crate::ProtocolError;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;

/// 固件进度事件类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FirmwareEventType {
    Download,
    Update,
}

/// 固件进度事件状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FirmwareEventStatus {
    Initiating,
    InProgress,
    Completed,
    Cancelled,
    FileNotAvailable,
    FileNotAccessible,
    FileAlreadyPresent,
    NetworkError,
    SslError,
    DownloadError,
    UpdateError,
    InvalidAuthentication,
    FileUnderDownload,
    NotAllowed,
    SdkTooOldForUpdate,
}

impl FirmwareEventStatus {
    /// 是否为终止状态（之后不会再有进度事件）
    pub fn is_terminal(self) -> bool {
        !matches!(
            self,
            FirmwareEventStatus::Initiating | FirmwareEventStatus::InProgress
        )
    }
}

/// 上传（铃声 / 图片）进度状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum UploadEventStatus {
    InProgress,
    Completed,
    Error,
    Cancelled,
}

impl UploadEventStatus {
    pub fn is_terminal(self) -> bool {
        !matches!(self, UploadEventStatus::InProgress)
    }
}

/// 云端固件描述
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct FirmwareInfo {
    pub version: String,
    pub file_id: String,
    pub release_date: String,
    pub stage: String,
    pub release_notes: String,
}

/// 固件版本号
///
/// 设备上报的版本号不一定是严格的 semver（如 `"1.9"`、`"3.7.0b12"`），
/// 解析时宽松处理：数字段不足三段补 0，剩余部分作为预发布标识。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FirmwareVersion(semver::Version);

impl FirmwareVersion {
    pub fn parse(text: &str) -> Result<Self, ProtocolError> {
        let trimmed = text.trim();
        if let Ok(version) = semver::Version::parse(trimmed) {
            return Ok(Self(version));
        }

        let mut numbers = [0u64; 3];
        let mut count = 0;
        let mut rest = trimmed;
        while count < 3 {
            let digits = rest.chars().take_while(|c| c.is_ascii_digit()).count();
            if digits == 0 {
                break;
            }
            numbers[count] = rest[..digits]
                .parse()
                .map_err(|_| ProtocolError::InvalidVersion(text.to_string()))?;
            count += 1;
            rest = &rest[digits..];
            match rest.strip_prefix('.') {
                Some(next) if next.starts_with(|c: char| c.is_ascii_digit()) => rest = next,
                _ => break,
            }
        }
        if count == 0 {
            return Err(ProtocolError::InvalidVersion(text.to_string()));
        }

        let mut version = semver::Version::new(numbers[0], numbers[1], numbers[2]);
        let suffix: String = rest
            .trim_start_matches(['-', '.', '+'])
            .chars()
            .filter(|c| c.is_ascii_alphanumeric() || *c == '.')
            .collect();
        if !suffix.is_empty() {
            version.pre = semver::Prerelease::new(&suffix)
                .map_err(|_| ProtocolError::InvalidVersion(text.to_string()))?;
        }
        Ok(Self(version))
    }

    pub fn as_semver(&self) -> &semver::Version {
        &self.0
    }
}

impl PartialOrd for FirmwareVersion {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for FirmwareVersion {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0.cmp(&other.0)
    }
}

impl fmt::Display for FirmwareVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
