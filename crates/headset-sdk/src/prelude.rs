//! Prelude - 常用类型的便捷导入
//!
//! ```rust
//! use headset_sdk::prelude::*;
//! ```

pub use crate::{
    BatteryStatus, Collaborators, DeviceFeature, DeviceId, DeviceInfo, EventKind, EventMask,
    InitCallbacks, ReturnCode, SdkConfig, Transport, initialize_v2, is_initialized, uninitialize,
};
