//! 设备功能枚举
//!
//! 数值与公开文档保持一致（从 1000 开始）。

use num_enum::{IntoPrimitive, TryFromPrimitive};
use serde::{Deserialize, Serialize};

/// 设备可能支持的功能
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    Serialize,
    Deserialize,
    IntoPrimitive,
    TryFromPrimitive,
)]
#[repr(u16)]
pub enum DeviceFeature {
    BusyLight = 1000,
    FactoryReset = 1001,
    PairingList = 1002,
    RemoteMmi = 1003,
    MusicEqualizer = 1004,
    EarbudInterconnectionStatus = 1005,
    StepRate = 1006,
    HeartRate = 1007,
    RrInterval = 1008,
    RingtoneUpload = 1009,
    ImageUpload = 1010,
    NeedsExplicitRebootAfterOta = 1011,
    NeedsToBePutInCradleToCompleteFwu = 1012,
    RemoteMmiV2 = 1013,
    Logging = 1014,
    PreferredSoftphoneListInDevice = 1015,
    VoiceAssistant = 1016,
    PlayRingtone = 1017,
    SetDateTime = 1018,
    FullWizardMode = 1019,
    LimitedWizardMode = 1020,
    OnHeadDetection = 1021,
    SettingsChangeNotification = 1022,
    AudioStreaming = 1023,
    CustomerSupport = 1024,
    MySound = 1025,
    UiConfigurableButtons = 1026,
    ManualBusyLight = 1027,
    Whiteboard = 1028,
    Video = 1029,
    AmbienceModes = 1030,
    SealingTest = 1031,
    AmaSupport = 1032,
    AmbienceModesLoop = 1033,
    Ffanc = 1034,
    GoogleBisto = 1035,
    VirtualDirector = 1036,
    PictureInPicture = 1037,
    DateTimeIsUtc = 1038,
    RemoteControl = 1039,
    UserConfigurableHdr = 1040,
    DectBasicPairing = 1041,
    DectSecurePairing = 1042,
    DectOtaFwuSupported = 1043,
    XpressUrl = 1044,
    PasswordProvisioning = 1045,
    Ethernet = 1046,
    Wlan = 1047,
    EthernetAuthenticationCertificate = 1048,
    EthernetAuthenticationMsChapV2 = 1049,
    WlanAuthenticationCertificate = 1050,
    WlanAuthenticationMsChapV2 = 1051,
}

impl DeviceFeature {
    /// 从能力文档中的数值列表解析功能集合，未知数值被忽略
    pub fn from_codes(codes: impl IntoIterator<Item = u16>) -> Vec<DeviceFeature> {
        let mut features: Vec<DeviceFeature> =
            codes.into_iter().filter_map(|c| DeviceFeature::try_from(c).ok()).collect();
        features.sort();
        features.dedup();
        features
    }
}
