//! 设备状态上报的数据结构

use serde::{Deserialize, Serialize};

/// 电池所属组件
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum BatteryComponent {
    /// 无法确定组件
    #[default]
    Unknown,
    /// 头戴式耳机的单电池
    Main,
    /// 多电池但只上报合并状态
    Combined,
    Right,
    Left,
    CradleBattery,
    RemoteControl,
}

/// 附加电池单元
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatteryUnit {
    pub level_in_percent: u8,
    pub component: BatteryComponent,
}

/// 电池状态（V2）
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct BatteryStatus {
    /// 电量百分比（0-100）
    pub level_in_percent: u8,
    pub charging: bool,
    /// 是否低电量（判定逻辑由设备决定）
    pub battery_low: bool,
    pub component: BatteryComponent,
    /// 其他电池单元（如左右耳塞、充电盒）
    pub extra_units: Vec<BatteryUnit>,
}

impl BatteryStatus {
    pub fn new(level_in_percent: u8, charging: bool, battery_low: bool) -> Self {
        Self {
            level_in_percent: level_in_percent.min(100),
            charging,
            battery_low,
            component: BatteryComponent::Main,
            extra_units: Vec::new(),
        }
    }

    /// 旧版三元组 `(level, charging, battery_low)`
    pub fn as_legacy(&self) -> (u8, bool, bool) {
        (self.level_in_percent, self.charging, self.battery_low)
    }
}

/// 耳机插孔状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct JackStatus {
    pub inserted: bool,
}

/// 佩戴检测状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct HeadDetectionStatus {
    pub left_on: bool,
    pub right_on: bool,
}

/// 链路组件
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum LinkStatusComponent {
    #[default]
    RightEarbud,
    LeftEarbud,
}

/// 链路连接状态（如左耳塞是否连接）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct LinkConnectStatus {
    pub open: bool,
    pub component: LinkStatusComponent,
}

/// 手动忙碌灯的设定值
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BusyLightValue {
    On,
    Off,
    /// 在当前状态基础上取反
    Toggle,
}

impl BusyLightValue {
    /// 结合当前状态计算目标状态
    pub fn resolve(self, current: bool) -> bool {
        match self {
            BusyLightValue::On => true,
            BusyLightValue::Off => false,
            BusyLightValue::Toggle => !current,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_battery_level_clamped() {
        let status = BatteryStatus::new(150, true, false);
        assert_eq!(status.level_in_percent, 100);
        assert_eq!(status.as_legacy(), (100, true, false));
    }

    #[test]
    fn test_busylight_toggle() {
        assert!(BusyLightValue::Toggle.resolve(false));
        assert!(!BusyLightValue::Toggle.resolve(true));
        assert!(BusyLightValue::On.resolve(true));
        assert!(!BusyLightValue::Off.resolve(true));
    }
}
