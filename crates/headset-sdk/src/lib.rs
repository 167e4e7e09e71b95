//! Headset SDK - 耳机设备管理 SDK
//!
//! 面向应用的进程级接口：初始化一次，之后所有调用都以 [`ReturnCode`] 报告结果。
//!
//! # 架构设计
//!
//! 本 SDK 采用分层架构，从底层到高层：
//!
//! - **协议层** (`headset-protocol`): 返回码、设备身份、事件与状态的数据结构
//! - **传输层** (`headset-transport`): USB / BT / DECT 传输的窄接口
//! - **核心层** (`headset-driver`): 设备存储、事件分发、设备锁、会话状态、能力缓存
//! - **接口层** (本 crate): 进程级实例与返回码风格的入口函数
//!
//! # 快速开始
//!
//! ```rust,ignore
//! use headset_sdk::prelude::*;
//!
//! let collaborators = Collaborators::new(transport);
//! let callbacks = InitCallbacks::new()
//!     .on_device_attached(|info| println!("attached: {}", info.device_name()));
//! assert!(initialize_v2(collaborators, callbacks, 1, SdkConfig::default()));
//! // ...
//! uninitialize();
//! ```
//!
//! 返回 `bool` / `Option` 的便捷函数把所有失败合并为 `false` / `None`，
//! 需要区分失败原因时使用对应的返回码版本。

mod callbacks;
mod device;
mod firmware;
mod instance;
pub mod logging;
mod settings;

pub mod prelude;

pub use callbacks::*;
pub use device::*;
pub use firmware::*;
pub use instance::{
    Collaborators, InitCallbacks, SDK_VERSION, app_id, initialize, initialize_v2, is_initialized,
    metrics, return_code_string, sdk_version, set_app_id, uninitialize,
};
pub use settings::*;

// 常用的下层类型
pub use headset_driver::{
    CallerId, CapabilityKind, CapabilityProvider, CapabilityValue, EngineError, EventListener,
    FetchError, FirmwareEngine, MetricsSnapshot, OperationContext, OperationKind,
    SubscriptionHandle,
};
pub use headset_protocol::{
    BatteryStatus, BusyLightValue, Const, ConstRoot, DeviceEvent, DeviceFeature, DeviceId,
    DeviceIdentity, DeviceInfo, EqualizerBand, EqualizerReading, EventKind, EventMask,
    EventPayload, FirmwareEventStatus, FirmwareEventType, FirmwareInfo, HeadDetectionStatus,
    HidInput, JackStatus, LinkConnectStatus, ReturnCode, SdkConfig, SystemComponent,
    UploadEventStatus,
};
pub use headset_transport::Transport;

/// 下层 crate，需要直接使用核心层时通过这里访问
pub use headset_driver as driver;
pub use headset_protocol as protocol;
pub use headset_transport as transport;
