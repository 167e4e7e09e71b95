//! 均衡器

use serde::{Deserialize, Serialize};

/// 均衡器频段（只读描述 + 当前增益）
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EqualizerBand {
    /// 设备可承受的增益范围（dB），衰减上限为其相反数
    pub max_gain: f32,
    /// 中心频率（Hz）
    pub center_frequency: i32,
    /// 当前增益（dB），满足 `|current_gain| <= max_gain`
    pub current_gain: f32,
}

impl EqualizerBand {
    /// 增益是否在该频段允许的范围内
    pub fn accepts(&self, gain: f32) -> bool {
        gain.is_finite() && gain.abs() <= self.max_gain
    }
}

/// 读取均衡器参数的结果
///
/// 调用方给出容量上限；设备频段数超过容量时返回前 `capacity` 个并置 `truncated`，
/// 与 "不支持" 是两种不同的结果。
#[derive(Debug, Clone, PartialEq)]
pub struct EqualizerReading {
    pub bands: Vec<EqualizerBand>,
    /// 设备实际频段数
    pub total_bands: usize,
    pub truncated: bool,
}

impl EqualizerReading {
    pub fn bounded(mut bands: Vec<EqualizerBand>, capacity: usize) -> Self {
        let total_bands = bands.len();
        let truncated = total_bands > capacity;
        bands.truncate(capacity);
        Self {
            bands,
            total_bands,
            truncated,
        }
    }
}
