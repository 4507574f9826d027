//! IEC 60870-5-104 vocabulary: type identifications, causes of transmission,
//! quality descriptors and command outcomes

use std::fmt;

use serde::{Deserialize, Serialize};

pub use voltage_tasks::{MIN_PERIODIC_INTERVAL_MS, TASK_DELAY_THRESHOLD_MS};

/// Common address addressing every station of the server
pub const GLOBAL_COMMON_ADDRESS: u16 = 65535;

/// Highest information object address (3 octets)
pub const MAX_INFORMATION_OBJECT_ADDRESS: u32 = 16_777_215;

/// Maximum ASDU length in octets
pub const MAX_ASDU_SIZE: usize = 249;

/// Data unit identifier: type (1) + VSQ (1) + COT (2) + CA (2)
pub const ASDU_HEADER_SIZE: usize = 6;

/// Encoded size of an information object address
pub const IOA_SIZE: usize = 3;

/// Qualifier of interrogation: station interrogation (global)
pub const QOI_STATION: u8 = 20;

/// Qualifier of counter interrogation: general request counter
pub const QCC_GENERAL: u8 = 5;

/// Default lifetime of a selection without renewal
pub const DEFAULT_SELECT_TIMEOUT_MS: u64 = 10_000;

/// Delay before a consumed selection is released after execution
pub const SELECTION_RELEASE_DELAY_MS: i64 = 100;

/// Type identification
///
/// Only types valid in IEC 60870-5-104 are represented; CP24 time tagged
/// variants (e.g. `M_SP_TA_1`) are rejected as unknown.
#[allow(non_camel_case_types)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[repr(u8)]
pub enum TypeId {
    // Process information in monitor direction
    M_SP_NA_1 = 1,
    M_DP_NA_1 = 3,
    M_ST_NA_1 = 5,
    M_BO_NA_1 = 7,
    M_ME_NA_1 = 9,
    M_ME_NB_1 = 11,
    M_ME_NC_1 = 13,
    M_IT_NA_1 = 15,
    M_PS_NA_1 = 20,
    M_ME_ND_1 = 21,
    M_SP_TB_1 = 30,
    M_DP_TB_1 = 31,
    M_ST_TB_1 = 32,
    M_BO_TB_1 = 33,
    M_ME_TD_1 = 34,
    M_ME_TE_1 = 35,
    M_ME_TF_1 = 36,
    M_IT_TB_1 = 37,
    M_EP_TD_1 = 38,
    M_EP_TE_1 = 39,
    M_EP_TF_1 = 40,

    // Process information in control direction
    C_SC_NA_1 = 45,
    C_DC_NA_1 = 46,
    C_RC_NA_1 = 47,
    C_SE_NA_1 = 48,
    C_SE_NB_1 = 49,
    C_SE_NC_1 = 50,
    C_BO_NA_1 = 51,
    C_SC_TA_1 = 58,
    C_DC_TA_1 = 59,
    C_RC_TA_1 = 60,
    C_SE_TA_1 = 61,
    C_SE_TB_1 = 62,
    C_SE_TC_1 = 63,
    C_BO_TA_1 = 64,

    // System information
    M_EI_NA_1 = 70,
    C_IC_NA_1 = 100,
    C_CI_NA_1 = 101,
    C_RD_NA_1 = 102,
    C_CS_NA_1 = 103,
    C_TS_TA_1 = 107,
}

impl TypeId {
    pub fn from_u8(value: u8) -> Option<Self> {
        use TypeId::*;
        let type_id = match value {
            1 => M_SP_NA_1,
            3 => M_DP_NA_1,
            5 => M_ST_NA_1,
            7 => M_BO_NA_1,
            9 => M_ME_NA_1,
            11 => M_ME_NB_1,
            13 => M_ME_NC_1,
            15 => M_IT_NA_1,
            20 => M_PS_NA_1,
            21 => M_ME_ND_1,
            30 => M_SP_TB_1,
            31 => M_DP_TB_1,
            32 => M_ST_TB_1,
            33 => M_BO_TB_1,
            34 => M_ME_TD_1,
            35 => M_ME_TE_1,
            36 => M_ME_TF_1,
            37 => M_IT_TB_1,
            38 => M_EP_TD_1,
            39 => M_EP_TE_1,
            40 => M_EP_TF_1,
            45 => C_SC_NA_1,
            46 => C_DC_NA_1,
            47 => C_RC_NA_1,
            48 => C_SE_NA_1,
            49 => C_SE_NB_1,
            50 => C_SE_NC_1,
            51 => C_BO_NA_1,
            58 => C_SC_TA_1,
            59 => C_DC_TA_1,
            60 => C_RC_TA_1,
            61 => C_SE_TA_1,
            62 => C_SE_TB_1,
            63 => C_SE_TC_1,
            64 => C_BO_TA_1,
            70 => M_EI_NA_1,
            100 => C_IC_NA_1,
            101 => C_CI_NA_1,
            102 => C_RD_NA_1,
            103 => C_CS_NA_1,
            107 => C_TS_TA_1,
            _ => return None,
        };
        Some(type_id)
    }

    pub fn code(self) -> u8 {
        self as u8
    }

    /// Process information in monitor direction (codes up to 41)
    pub fn is_monitoring(self) -> bool {
        self.code() <= 41
    }

    /// Process information in control direction (codes 45..=64)
    pub fn is_command(self) -> bool {
        (45..=64).contains(&self.code())
    }

    /// Commands eligible for select-and-execute; bitstring commands are not
    pub fn is_selectable(self) -> bool {
        self.is_command() && !matches!(self, TypeId::C_BO_NA_1 | TypeId::C_BO_TA_1)
    }

    /// Integrated totals
    pub fn is_counter(self) -> bool {
        matches!(self, TypeId::M_IT_NA_1 | TypeId::M_IT_TB_1)
    }

    /// Protection equipment events
    pub fn is_protection_event(self) -> bool {
        matches!(
            self,
            TypeId::M_EP_TD_1 | TypeId::M_EP_TE_1 | TypeId::M_EP_TF_1
        )
    }

    /// Monitoring points answered by read commands and station interrogation
    pub fn is_readable(self) -> bool {
        self.is_monitoring() && !self.is_counter() && !self.is_protection_event()
    }

    /// Carries a CP56Time2a time tag
    pub fn has_timestamp(self) -> bool {
        use TypeId::*;
        matches!(
            self,
            M_SP_TB_1
                | M_DP_TB_1
                | M_ST_TB_1
                | M_BO_TB_1
                | M_ME_TD_1
                | M_ME_TE_1
                | M_ME_TF_1
                | M_IT_TB_1
                | M_EP_TD_1
                | M_EP_TE_1
                | M_EP_TF_1
                | C_SC_TA_1
                | C_DC_TA_1
                | C_RC_TA_1
                | C_SE_TA_1
                | C_SE_TB_1
                | C_SE_TC_1
                | C_BO_TA_1
                | C_CS_NA_1
                | C_TS_TA_1
        )
    }

    /// Encoded information element length, excluding the object address
    pub fn element_size(self) -> usize {
        use TypeId::*;
        let base = match self {
            M_SP_NA_1 | M_SP_TB_1 | M_DP_NA_1 | M_DP_TB_1 => 1,
            M_ST_NA_1 | M_ST_TB_1 => 2,
            M_BO_NA_1 | M_BO_TB_1 => 5,
            M_ME_NA_1 | M_ME_TD_1 | M_ME_NB_1 | M_ME_TE_1 => 3,
            M_ME_NC_1 | M_ME_TF_1 => 5,
            M_ME_ND_1 => 2,
            M_IT_NA_1 | M_IT_TB_1 => 5,
            M_PS_NA_1 => 5,
            M_EP_TD_1 => 3,
            M_EP_TE_1 | M_EP_TF_1 => 4,
            C_SC_NA_1 | C_SC_TA_1 | C_DC_NA_1 | C_DC_TA_1 | C_RC_NA_1 | C_RC_TA_1 => 1,
            C_SE_NA_1 | C_SE_TA_1 | C_SE_NB_1 | C_SE_TB_1 => 3,
            C_SE_NC_1 | C_SE_TC_1 => 5,
            C_BO_NA_1 | C_BO_TA_1 => 4,
            M_EI_NA_1 | C_IC_NA_1 | C_CI_NA_1 => 1,
            C_RD_NA_1 | C_CS_NA_1 => 0,
            C_TS_TA_1 => 2,
        };
        if self.has_timestamp() {
            base + 7
        } else {
            base
        }
    }
}

impl fmt::Display for TypeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Cause of transmission (COT)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum CauseOfTransmission {
    Periodic = 1,
    Background = 2,
    Spontaneous = 3,
    Initialized = 4,
    Request = 5,
    Activation = 6,
    ActivationConfirmation = 7,
    Deactivation = 8,
    DeactivationConfirmation = 9,
    ActivationTermination = 10,
    /// Return information caused by a remote command
    ReturnInfoRemote = 11,
    /// Return information caused by a local command
    ReturnInfoLocal = 12,
    FileTransfer = 13,
    /// Interrogated by station interrogation
    InterrogatedByStation = 20,
    /// Requested by general counter request
    RequestedByGeneralCounter = 37,
    UnknownTypeId = 44,
    UnknownCauseOfTransmission = 45,
    UnknownCommonAddress = 46,
    UnknownInformationObjectAddress = 47,
}

impl CauseOfTransmission {
    pub fn from_byte(value: u8) -> Option<Self> {
        use CauseOfTransmission::*;
        let cot = match value {
            1 => Periodic,
            2 => Background,
            3 => Spontaneous,
            4 => Initialized,
            5 => Request,
            6 => Activation,
            7 => ActivationConfirmation,
            8 => Deactivation,
            9 => DeactivationConfirmation,
            10 => ActivationTermination,
            11 => ReturnInfoRemote,
            12 => ReturnInfoLocal,
            13 => FileTransfer,
            20 => InterrogatedByStation,
            37 => RequestedByGeneralCounter,
            44 => UnknownTypeId,
            45 => UnknownCauseOfTransmission,
            46 => UnknownCommonAddress,
            47 => UnknownInformationObjectAddress,
            _ => return None,
        };
        Some(cot)
    }

    pub fn to_byte(self) -> u8 {
        self as u8
    }

    /// Low priority causes are queued for broadcast instead of sent directly
    pub fn is_low_priority(self) -> bool {
        matches!(
            self,
            CauseOfTransmission::Periodic | CauseOfTransmission::Spontaneous
        )
    }
}

impl fmt::Display for CauseOfTransmission {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}({})", self, self.to_byte())
    }
}

/// Quality descriptor flags
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Quality {
    /// Overflow: value beyond the predefined range
    pub overflow: bool,
    /// Blocked for transmission by a local lock
    pub blocked: bool,
    /// Provided by an operator or automatic source
    pub substituted: bool,
    /// Not updated successfully during the last period
    pub not_topical: bool,
    pub invalid: bool,
}

impl Quality {
    pub fn from_byte(value: u8) -> Self {
        Self {
            overflow: (value & 0x01) != 0,
            blocked: (value & 0x10) != 0,
            substituted: (value & 0x20) != 0,
            not_topical: (value & 0x40) != 0,
            invalid: (value & 0x80) != 0,
        }
    }

    pub fn to_byte(&self) -> u8 {
        let mut value = 0u8;
        if self.overflow {
            value |= 0x01;
        }
        if self.blocked {
            value |= 0x10;
        }
        if self.substituted {
            value |= 0x20;
        }
        if self.not_topical {
            value |= 0x40;
        }
        if self.invalid {
            value |= 0x80;
        }
        value
    }

    pub fn is_good(&self) -> bool {
        self.to_byte() == 0
    }
}

/// How a control point accepts commands
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommandMode {
    /// Execute without prior selection
    #[default]
    Direct,
    /// Execute only while holding a selection
    SelectAndExecute,
}

/// Outcome of a command handler
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseState {
    /// Negative confirmation
    Failure,
    /// Positive confirmation
    Success,
    /// Handler answers on its own; no confirmation is sent
    None,
}

/// Reason an inbound message was rejected
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UnexpectedMessageCause {
    InvalidTypeId,
    MismatchedTypeId,
    UnknownTypeId,
    InvalidCot,
    UnknownCot,
    UnknownCa,
    UnknownIoa,
    UnimplementedGroup,
}

impl UnexpectedMessageCause {
    /// COT of the mirrored negative reply; `None` when no reply is sent
    pub fn negative_cot(self) -> Option<CauseOfTransmission> {
        use UnexpectedMessageCause::*;
        match self {
            InvalidTypeId | MismatchedTypeId | UnknownTypeId => {
                Some(CauseOfTransmission::UnknownTypeId)
            },
            InvalidCot | UnknownCot => Some(CauseOfTransmission::UnknownCauseOfTransmission),
            UnknownCa => Some(CauseOfTransmission::UnknownCommonAddress),
            UnknownIoa => Some(CauseOfTransmission::UnknownInformationObjectAddress),
            UnimplementedGroup => None,
        }
    }
}

impl fmt::Display for UnexpectedMessageCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            Self::InvalidTypeId => "invalid type id",
            Self::MismatchedTypeId => "mismatched type id",
            Self::UnknownTypeId => "unknown type id",
            Self::InvalidCot => "invalid cause of transmission",
            Self::UnknownCot => "unknown cause of transmission",
            Self::UnknownCa => "unknown common address",
            Self::UnknownIoa => "unknown information object address",
            Self::UnimplementedGroup => "unimplemented group",
        };
        f.write_str(text)
    }
}

/// Milliseconds since the Unix epoch
pub fn now_ms() -> u64 {
    chrono::Utc::now().timestamp_millis().max(0) as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_type_classification() {
        assert!(TypeId::M_ME_NC_1.is_monitoring());
        assert!(!TypeId::M_ME_NC_1.is_command());
        assert!(TypeId::C_SC_NA_1.is_selectable());
        assert!(TypeId::C_SE_TC_1.is_selectable());
        assert!(TypeId::C_BO_NA_1.is_command());
        assert!(!TypeId::C_BO_NA_1.is_selectable());
        assert!(!TypeId::C_BO_TA_1.is_selectable());
        assert!(!TypeId::C_IC_NA_1.is_command());
        assert!(!TypeId::M_EI_NA_1.is_monitoring());
        assert!(!TypeId::M_IT_NA_1.is_readable());
        assert!(!TypeId::M_EP_TE_1.is_readable());
        assert!(TypeId::M_SP_TB_1.is_readable());
    }

    #[test]
    fn test_type_codes() {
        for code in 0..=u8::MAX {
            if let Some(type_id) = TypeId::from_u8(code) {
                assert_eq!(type_id.code(), code);
            }
        }
        assert_eq!(TypeId::from_u8(2), None);
        assert_eq!(TypeId::from_u8(104), None);
    }

    #[test]
    fn test_element_sizes() {
        assert_eq!(TypeId::M_SP_NA_1.element_size(), 1);
        assert_eq!(TypeId::M_SP_TB_1.element_size(), 8);
        assert_eq!(TypeId::M_ME_NC_1.element_size(), 5);
        assert_eq!(TypeId::M_ME_TF_1.element_size(), 12);
        assert_eq!(TypeId::C_CS_NA_1.element_size(), 7);
    }

    #[test]
    fn test_quality_byte() {
        let quality = Quality::from_byte(0x90);
        assert!(quality.invalid);
        assert!(quality.blocked);
        assert!(!quality.overflow);
        assert_eq!(quality.to_byte(), 0x90);
        assert!(Quality::default().is_good());
    }

    #[test]
    fn test_negative_cot_mapping() {
        use UnexpectedMessageCause::*;
        assert_eq!(
            MismatchedTypeId.negative_cot(),
            Some(CauseOfTransmission::UnknownTypeId)
        );
        assert_eq!(
            InvalidCot.negative_cot().map(|c| c.to_byte()),
            Some(45)
        );
        assert_eq!(UnknownCa.negative_cot().map(|c| c.to_byte()), Some(46));
        assert_eq!(UnknownIoa.negative_cot().map(|c| c.to_byte()), Some(47));
        assert_eq!(UnimplementedGroup.negative_cot(), None);
    }

    #[test]
    fn test_cot_priority() {
        assert!(CauseOfTransmission::Periodic.is_low_priority());
        assert!(!CauseOfTransmission::Request.is_low_priority());
        assert_eq!(CauseOfTransmission::from_byte(20), Some(CauseOfTransmission::InterrogatedByStation));
        assert_eq!(CauseOfTransmission::from_byte(14), None);
    }
}
