//! 功能查询与设备设置：忙碌灯、电池、均衡器、设备常量

use crate::instance::{status_of, with_registry};
use headset_protocol::{
    BatteryStatus, BusyLightValue, Const, ConstRoot, DeviceFeature, DeviceId, EqualizerReading,
    ReturnCode, SystemComponent,
};
use std::sync::Arc;

// ==================== 功能 ====================

pub fn is_feature_supported(id: DeviceId, feature: DeviceFeature) -> bool {
    with_registry(|r| r.is_feature_supported(id, feature)).unwrap_or(false)
}

/// 设备支持的功能列表；后台获取尚未完成时返回 `Err(ReturnAsync)`
pub fn get_supported_features(id: DeviceId) -> Result<Vec<DeviceFeature>, ReturnCode> {
    with_registry(|r| r.supported_features(id))
}

// ==================== 忙碌灯 ====================

pub fn is_busylight_supported(id: DeviceId) -> bool {
    with_registry(|r| r.busylight_supported(id)).unwrap_or(false)
}

pub fn get_busylight_status(id: DeviceId) -> bool {
    with_registry(|r| r.busylight(id)).unwrap_or(false)
}

pub fn set_busylight_status(id: DeviceId, on: bool) -> ReturnCode {
    status_of(|r| r.set_busylight(id, on))
}

pub fn get_manual_busylight_status(id: DeviceId) -> Result<bool, ReturnCode> {
    with_registry(|r| r.manual_busylight(id))
}

pub fn set_manual_busylight_status(id: DeviceId, value: BusyLightValue) -> ReturnCode {
    status_of(|r| r.set_manual_busylight(id, value).map(|_| ()))
}

// ==================== 电池 ====================

/// 电池状态（含附加电池单元）
pub fn get_battery_status(id: DeviceId) -> Result<BatteryStatus, ReturnCode> {
    with_registry(|r| r.battery(id))
}

/// 旧版接口：`(level_in_percent, charging, battery_low)`
pub fn get_battery_status_legacy(id: DeviceId) -> Result<(u8, bool, bool), ReturnCode> {
    get_battery_status(id).map(|status| status.as_legacy())
}

// ==================== 均衡器 ====================

pub fn is_equalizer_supported(id: DeviceId) -> bool {
    with_registry(|r| r.equalizer_supported(id)).unwrap_or(false)
}

pub fn is_equalizer_enabled(id: DeviceId) -> bool {
    with_registry(|r| r.equalizer_enabled(id)).unwrap_or(false)
}

pub fn enable_equalizer(id: DeviceId, enable: bool) -> ReturnCode {
    status_of(|r| r.enable_equalizer(id, enable))
}

/// 读取最多 `capacity` 个频段；频段更多时 `truncated` 为真
pub fn get_equalizer_parameters(
    id: DeviceId,
    capacity: usize,
) -> Result<EqualizerReading, ReturnCode> {
    with_registry(|r| r.equalizer_parameters(id, capacity))
}

pub fn set_equalizer_parameters(id: DeviceId, gains: &[f32]) -> ReturnCode {
    status_of(|r| r.set_equalizer_parameters(id, gains))
}

// ==================== 设备常量 ====================

/// 设备常量树；释放根即释放所有节点
pub fn get_constants(id: DeviceId) -> Option<Arc<ConstRoot>> {
    get_component_constants(id, SystemComponent::PrimaryHeadset).ok()
}

pub fn get_component_constants(
    id: DeviceId,
    component: SystemComponent,
) -> Result<Arc<ConstRoot>, ReturnCode> {
    with_registry(|r| r.constants(id, component))
}

/// 按名称批量读取的常量
///
/// 找不到的名称对应 `None`，其余照常返回。
#[derive(Debug, Clone)]
pub struct NamedConstants {
    root: Arc<ConstRoot>,
    keys: Vec<String>,
}

impl NamedConstants {
    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// 第 `index` 个请求名称对应的常量
    pub fn get(&self, index: usize) -> Option<Const<'_>> {
        self.keys.get(index).and_then(|key| self.root.get(key))
    }

    pub fn by_name(&self, key: &str) -> Option<Const<'_>> {
        if self.keys.iter().any(|k| k == key) {
            self.root.get(key)
        } else {
            None
        }
    }

    /// 与请求顺序一致
    pub fn values(&self) -> Vec<Option<Const<'_>>> {
        self.root.named(&self.keys)
    }

    pub fn found(&self) -> usize {
        self.values().iter().filter(|v| v.is_some()).count()
    }
}

/// 读取一组具名常量
///
/// `keys` 为空时返回 `ParameterFail`；一个都找不到时返回 `NotSupported`。
pub fn get_named_constants<S: AsRef<str>>(
    id: DeviceId,
    keys: &[S],
) -> Result<NamedConstants, ReturnCode> {
    if keys.is_empty() {
        return Err(ReturnCode::ParameterFail);
    }
    let root = get_component_constants(id, SystemComponent::PrimaryHeadset)?;
    let named = NamedConstants {
        root,
        keys: keys.iter().map(|k| k.as_ref().to_string()).collect(),
    };
    if named.found() == 0 {
        return Err(ReturnCode::NotSupported);
    }
    Ok(named)
}
