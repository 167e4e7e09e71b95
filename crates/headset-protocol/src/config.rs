//! SDK 配置
//!
//! 所有字段都有默认值，TOML 中缺省的字段使用默认值：
//!
//! ```toml
//! fetch_timeout_ms = 5000
//!
//! [catalogue]
//! refresh_at_connect = true
//! delay_before_refresh_secs = 30
//!
//! [cloud]
//! block_all_network_access = false
//!
//! [dispatcher]
//! queue_capacity = 256
//! workers = 2
//! ```

use crate::ProtocolError;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// 设备目录配置
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CatalogueConfig {
    /// 预置的设备数据包（启动时导入目录）
    pub preload_zip_file: Option<String>,
    /// attach 之后延迟多久开始后台刷新（秒）
    pub delay_before_refresh_secs: u64,
    /// 已知设备 attach 时是否刷新
    pub refresh_at_connect: bool,
    /// 启动时是否刷新目录中已有的设备
    pub refresh_at_startup: bool,
    /// 1 = 刷新所有已知设备，0 = 禁止刷新
    pub refresh_scope: u8,
    /// 未知设备的数据是否在后台获取（否则首次调用时同步获取）
    pub fetch_data_for_unknown_devices_in_background: bool,
    /// 目录数据的最小刷新间隔（秒），更新鲜的数据不会重新获取
    pub minimum_age_before_update_secs: u64,
}

impl Default for CatalogueConfig {
    fn default() -> Self {
        Self {
            preload_zip_file: None,
            delay_before_refresh_secs: 30,
            refresh_at_connect: true,
            refresh_at_startup: true,
            refresh_scope: 1,
            fetch_data_for_unknown_devices_in_background: false,
            minimum_age_before_update_secs: 24 * 60 * 60,
        }
    }
}

impl CatalogueConfig {
    pub fn delay_before_refresh(&self) -> Duration {
        Duration::from_secs(self.delay_before_refresh_secs)
    }

    pub fn minimum_age_before_update(&self) -> Duration {
        Duration::from_secs(self.minimum_age_before_update_secs)
    }

    /// 是否允许任何刷新
    pub fn refresh_enabled(&self) -> bool {
        self.refresh_scope != 0
    }
}

/// 云端访问配置
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CloudConfig {
    /// 禁止一切网络访问（需要联网的获取直接失败）
    pub block_all_network_access: bool,
    pub base_url_capabilities: String,
    pub base_url_fw: String,
    /// 代理地址，空字符串表示不使用代理
    pub proxy: String,
}

impl CloudConfig {
    pub fn proxy(&self) -> Option<&str> {
        if self.proxy.is_empty() {
            None
        } else {
            Some(self.proxy.as_str())
        }
    }
}

/// 事件分发配置
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatcherConfig {
    /// 每个监听者的队列容量，溢出时丢弃最旧事件
    pub queue_capacity: usize,
    /// 分发线程数
    pub workers: usize,
    /// 关闭时等待分发线程退出的时间（毫秒）
    pub shutdown_timeout_ms: u64,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 256,
            workers: 2,
            shutdown_timeout_ms: 2000,
        }
    }
}

impl DispatcherConfig {
    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_millis(self.shutdown_timeout_ms)
    }
}

/// SDK 顶层配置
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SdkConfig {
    /// 同步获取能力数据的超时（毫秒）
    pub fetch_timeout_ms: u64,
    pub catalogue: CatalogueConfig,
    pub cloud: CloudConfig,
    pub dispatcher: DispatcherConfig,
}

impl Default for SdkConfig {
    fn default() -> Self {
        Self {
            fetch_timeout_ms: 5000,
            catalogue: CatalogueConfig::default(),
            cloud: CloudConfig::default(),
            dispatcher: DispatcherConfig::default(),
        }
    }
}

impl SdkConfig {
    pub fn from_toml_str(text: &str) -> Result<Self, ProtocolError> {
        let config: SdkConfig = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// 从文件加载
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ProtocolError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_millis(self.fetch_timeout_ms)
    }

    pub fn validate(&self) -> Result<(), ProtocolError> {
        if self.dispatcher.queue_capacity == 0 {
            return Err(ProtocolError::InvalidConfig(
                "dispatcher.queue_capacity must be > 0".to_string(),
            ));
        }
        if self.dispatcher.workers == 0 {
            return Err(ProtocolError::InvalidConfig(
                "dispatcher.workers must be > 0".to_string(),
            ));
        }
        if self.fetch_timeout_ms == 0 {
            return Err(ProtocolError::InvalidConfig(
                "fetch_timeout_ms must be > 0".to_string(),
            ));
        }
        if self.catalogue.refresh_scope > 1 {
            return Err(ProtocolError::InvalidConfig(format!(
                "catalogue.refresh_scope must be 0 or 1, got {}",
                self.catalogue.refresh_scope
            )));
        }
        Ok(())
    }
}
