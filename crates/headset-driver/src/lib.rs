//! 设备注册表核心
//!
//! 本 crate 提供耳机设备管理的核心功能，包括：
//! - 设备记录存储（ArcSwap 快照读取，按设备加锁）
//! - 事件分发（独立分发线程，每个监听者一个有界队列）
//! - 设备锁与会话状态机
//! - 能力数据缓存（single-flight）与设备目录
//! - 长时间操作（固件 / 上传 / 重启）的执行与取消
//!
//! # 使用场景
//!
//! 传输层实现 [`headset_transport::Transport`]，通过 [`RegistryBuilder`] 构造 [`Registry`]。
//! 面向应用的返回码风格接口见 `headset-sdk`。

mod builder;
pub mod cache;
pub mod dispatcher;
mod error;
pub mod lock;
pub mod metrics;
pub mod operations;
mod registry;
mod scheduler;
pub mod session;
pub mod store;

pub use builder::RegistryBuilder;
pub use cache::{
    CacheKey, CapabilityCache, CapabilityKind, CapabilityProvider, CapabilityValue,
    DeviceCatalogue, FetchCallback, FetchError,
};
pub use dispatcher::{Dispatcher, EventListener, SlotKey, SubscriptionHandle};
pub use error::DriverError;
pub use lock::{CallerId, LockManager};
pub use metrics::{MetricsSnapshot, RegistryMetrics};
pub use operations::{
    EngineError, FirmwareEngine, NullEngine, OperationContext, OperationKind, OperationStatus,
};
pub use registry::{FirmwareCheck, Registry};
pub use session::SessionState;
pub use store::{DeviceRecord, DeviceStore};
