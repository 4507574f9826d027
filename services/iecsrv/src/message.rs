//! Application service data units
//!
//! [`Asdu`] is the outgoing frame model with size accounting against the
//! 249 octet limit. [`RawAsdu`] is an inbound frame as delivered by the
//! transport, before validation; [`IncomingMessage`] is its validated view.

use chrono::{DateTime, Utc};

use crate::types::{
    CauseOfTransmission, Quality, TypeId, UnexpectedMessageCause, ASDU_HEADER_SIZE, IOA_SIZE,
    MAX_ASDU_SIZE,
};

/// One information object: address plus information element
#[derive(Debug, Clone, PartialEq)]
pub struct InformationObject {
    pub ioa: u32,
    pub value: f64,
    pub quality: Quality,
    /// Select (S/E) bit of a command qualifier
    pub select: bool,
    /// Qualifier octet (QOI, QCC, QU, QL, ...) without the S/E bit
    pub qualifier: u8,
    /// CP56Time2a time tag
    pub timestamp: Option<DateTime<Utc>>,
}

impl InformationObject {
    pub fn new(ioa: u32, value: f64) -> Self {
        Self {
            ioa,
            value,
            quality: Quality::default(),
            select: false,
            qualifier: 0,
            timestamp: None,
        }
    }

    pub fn with_quality(mut self, quality: Quality) -> Self {
        self.quality = quality;
        self
    }

    pub fn with_select(mut self, select: bool) -> Self {
        self.select = select;
        self
    }

    pub fn with_qualifier(mut self, qualifier: u8) -> Self {
        self.qualifier = qualifier;
        self
    }

    pub fn with_timestamp(mut self, timestamp: Option<DateTime<Utc>>) -> Self {
        self.timestamp = timestamp;
        self
    }
}

/// Outgoing ASDU
#[derive(Debug, Clone, PartialEq)]
pub struct Asdu {
    pub type_id: TypeId,
    pub cot: CauseOfTransmission,
    pub originator_address: u8,
    pub common_address: u16,
    pub test: bool,
    pub negative: bool,
    pub sequence: bool,
    objects: Vec<InformationObject>,
}

impl Asdu {
    pub fn new(type_id: TypeId, cot: CauseOfTransmission, common_address: u16) -> Self {
        Self {
            type_id,
            cot,
            originator_address: 0,
            common_address,
            test: false,
            negative: false,
            sequence: false,
            objects: Vec::new(),
        }
    }

    pub fn with_originator(mut self, originator_address: u8) -> Self {
        self.originator_address = originator_address;
        self
    }

    pub fn with_test(mut self, test: bool) -> Self {
        self.test = test;
        self
    }

    pub fn with_negative(mut self, negative: bool) -> Self {
        self.negative = negative;
        self
    }

    pub fn with_sequence(mut self, sequence: bool) -> Self {
        self.sequence = sequence;
        self
    }

    pub fn objects(&self) -> &[InformationObject] {
        &self.objects
    }

    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    /// Encoded length in octets for `count` objects
    fn encoded_len_for(&self, count: usize) -> usize {
        let element = self.type_id.element_size();
        if count == 0 {
            ASDU_HEADER_SIZE
        } else if self.sequence {
            ASDU_HEADER_SIZE + IOA_SIZE + count * element
        } else {
            ASDU_HEADER_SIZE + count * (IOA_SIZE + element)
        }
    }

    pub fn encoded_len(&self) -> usize {
        self.encoded_len_for(self.objects.len())
    }

    /// Append an object if it fits into the frame
    ///
    /// Returns `false` when the frame would exceed [`MAX_ASDU_SIZE`], when the
    /// 7 bit object counter is exhausted, or when a sequence frame would lose
    /// address contiguity.
    pub fn try_add_object(&mut self, object: InformationObject) -> bool {
        let count = self.objects.len() + 1;
        if count > 127 || self.encoded_len_for(count) > MAX_ASDU_SIZE {
            return false;
        }
        if self.sequence {
            if let Some(last) = self.objects.last() {
                if object.ioa != last.ioa + 1 {
                    return false;
                }
            }
        }
        self.objects.push(object);
        true
    }
}

/// Inbound ASDU as received from the transport
///
/// Codes are kept raw so that unknown type identifications and causes can be
/// mirrored back to the sender unchanged.
#[derive(Debug, Clone, PartialEq)]
pub struct RawAsdu {
    pub type_code: u8,
    pub cot_code: u8,
    pub originator_address: u8,
    pub common_address: u16,
    pub test: bool,
    pub negative: bool,
    pub sequence: bool,
    pub objects: Vec<InformationObject>,
}

impl RawAsdu {
    pub fn new(type_code: u8, cot_code: u8, common_address: u16) -> Self {
        Self {
            type_code,
            cot_code,
            originator_address: 0,
            common_address,
            test: false,
            negative: false,
            sequence: false,
            objects: Vec::new(),
        }
    }

    /// Convenience for a typed single-object frame
    pub fn single(
        type_id: TypeId,
        cot: CauseOfTransmission,
        common_address: u16,
        object: InformationObject,
    ) -> Self {
        let mut raw = Self::new(type_id.code(), cot.to_byte(), common_address);
        raw.objects.push(object);
        raw
    }

    pub fn with_originator(mut self, originator_address: u8) -> Self {
        self.originator_address = originator_address;
        self
    }

    /// Copy of this frame answered with `cot` and the negative flag set
    pub fn mirror(&self, cot: CauseOfTransmission) -> RawAsdu {
        let mut reply = self.clone();
        reply.cot_code = cot.to_byte();
        reply.negative = true;
        reply
    }
}

/// Inbound frame whose type identification or cause is unknown
#[derive(Debug, Clone, PartialEq)]
pub struct RejectedAsdu {
    pub asdu: RawAsdu,
    pub cause: UnexpectedMessageCause,
}

/// Validated inbound message
#[derive(Debug, Clone, PartialEq)]
pub struct IncomingMessage {
    raw: RawAsdu,
    type_id: TypeId,
    cot: CauseOfTransmission,
}

impl IncomingMessage {
    /// Decode type identification and cause of transmission
    pub fn parse(raw: RawAsdu) -> Result<Self, RejectedAsdu> {
        let Some(type_id) = TypeId::from_u8(raw.type_code) else {
            return Err(RejectedAsdu {
                asdu: raw,
                cause: UnexpectedMessageCause::UnknownTypeId,
            });
        };
        let Some(cot) = CauseOfTransmission::from_byte(raw.cot_code) else {
            return Err(RejectedAsdu {
                asdu: raw,
                cause: UnexpectedMessageCause::UnknownCot,
            });
        };
        Ok(Self { raw, type_id, cot })
    }

    pub fn raw(&self) -> &RawAsdu {
        &self.raw
    }

    pub fn type_id(&self) -> TypeId {
        self.type_id
    }

    pub fn cot(&self) -> CauseOfTransmission {
        self.cot
    }

    pub fn common_address(&self) -> u16 {
        self.raw.common_address
    }

    pub fn originator_address(&self) -> u8 {
        self.raw.originator_address
    }

    fn first(&self) -> Option<&InformationObject> {
        self.raw.objects.first()
    }

    /// Address of the first information object, 0 when there is none
    pub fn ioa(&self) -> u32 {
        self.first().map_or(0, |o| o.ioa)
    }

    pub fn value(&self) -> f64 {
        self.first().map_or(0.0, |o| o.value)
    }

    pub fn qualifier(&self) -> u8 {
        self.first().map_or(0, |o| o.qualifier)
    }

    pub fn timestamp(&self) -> Option<DateTime<Utc>> {
        self.first().and_then(|o| o.timestamp)
    }

    pub fn is_select_command(&self) -> bool {
        self.type_id.is_selectable() && self.first().is_some_and(|o| o.select)
    }

    /// Activation and deactivation requests are confirmed
    pub fn requires_confirmation(&self) -> bool {
        matches!(
            self.cot,
            CauseOfTransmission::Activation | CauseOfTransmission::Deactivation
        )
    }

    /// Whether the cause of transmission is allowed for this type in control
    /// direction
    pub fn is_valid_cause(&self) -> bool {
        use CauseOfTransmission::*;
        match self.type_id {
            t if t.is_command() => matches!(self.cot, Activation | Deactivation),
            TypeId::C_IC_NA_1 => matches!(self.cot, Activation | Deactivation),
            TypeId::C_CI_NA_1 | TypeId::C_CS_NA_1 | TypeId::C_TS_TA_1 => self.cot == Activation,
            TypeId::C_RD_NA_1 => self.cot == Request,
            _ => false,
        }
    }

    /// Activation confirmation; deactivation requests get a deactivation
    /// confirmation
    pub fn confirmation(&self, negative: bool) -> RawAsdu {
        let cot = if self.cot == CauseOfTransmission::Deactivation {
            CauseOfTransmission::DeactivationConfirmation
        } else {
            CauseOfTransmission::ActivationConfirmation
        };
        let mut reply = self.raw.clone();
        reply.cot_code = cot.to_byte();
        reply.negative = negative;
        reply
    }

    pub fn termination(&self) -> RawAsdu {
        let mut reply = self.raw.clone();
        reply.cot_code = CauseOfTransmission::ActivationTermination.to_byte();
        reply.negative = false;
        reply
    }
}
