/// OpenLCB Message Type Indicator (the 16-bit MTI carried by the
/// reassembled message, as opposed to the 12-bit CAN-MTI on the wire).
///
/// Only the subset of MTIs the protocol engine (§4 of the spec) needs to
/// recognize by name is given variants; everything else round-trips
/// through [`Mti::Other`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Mti {
    InitializationCompleteFull,
    InitializationCompleteSimple,
    VerifyNodeIdGlobal,
    VerifyNodeIdAddressed,
    VerifiedNodeId,
    OptionalInteractionRejected,
    TerminateDueToError,
    ProtocolSupportInquiry,
    ProtocolSupportReply,
    IdentifyConsumers,
    ConsumerRangeIdentified,
    ConsumerIdentifiedUnknown,
    ConsumerIdentifiedSet,
    ConsumerIdentifiedClear,
    IdentifyProducers,
    ProducerRangeIdentified,
    ProducerIdentifiedUnknown,
    ProducerIdentifiedSet,
    ProducerIdentifiedClear,
    IdentifyEventsAddressed,
    IdentifyEventsGlobal,
    LearnEvent,
    PcEventReport,
    PcEventReportWithPayload,
    DatagramReceivedOk,
    DatagramRejected,
    Datagram,
    Other(u16),
}

impl Mti {
    pub const fn value(self) -> u16 {
        match self {
            Mti::InitializationCompleteFull => 0x0100,
            Mti::InitializationCompleteSimple => 0x0101,
            Mti::VerifyNodeIdAddressed => 0x0488,
            Mti::VerifyNodeIdGlobal => 0x0490,
            Mti::VerifiedNodeId => 0x0170,
            Mti::OptionalInteractionRejected => 0x0068,
            Mti::TerminateDueToError => 0x00A8,
            Mti::ProtocolSupportInquiry => 0x0828,
            Mti::ProtocolSupportReply => 0x0668,
            Mti::IdentifyConsumers => 0x08F4,
            Mti::ConsumerRangeIdentified => 0x04A4,
            Mti::ConsumerIdentifiedUnknown => 0x04A7,
            Mti::ConsumerIdentifiedSet => 0x04C7,
            Mti::ConsumerIdentifiedClear => 0x04C4,
            Mti::IdentifyProducers => 0x0914,
            Mti::ProducerRangeIdentified => 0x0524,
            Mti::ProducerIdentifiedUnknown => 0x0527,
            Mti::ProducerIdentifiedSet => 0x0547,
            Mti::ProducerIdentifiedClear => 0x0544,
            Mti::IdentifyEventsAddressed => 0x0968,
            Mti::IdentifyEventsGlobal => 0x0970,
            Mti::LearnEvent => 0x0594,
            Mti::PcEventReport => 0x05B4,
            Mti::PcEventReportWithPayload => 0x0F15,
            Mti::DatagramReceivedOk => 0x0A28,
            Mti::DatagramRejected => 0x0A48,
            Mti::Datagram => 0x1C48,
            Mti::Other(v) => v,
        }
    }

    pub const fn from_value(v: u16) -> Self {
        match v {
            0x0100 => Mti::InitializationCompleteFull,
            0x0101 => Mti::InitializationCompleteSimple,
            0x0488 => Mti::VerifyNodeIdAddressed,
            0x0490 => Mti::VerifyNodeIdGlobal,
            0x0170 => Mti::VerifiedNodeId,
            0x0068 => Mti::OptionalInteractionRejected,
            0x00A8 => Mti::TerminateDueToError,
            0x0828 => Mti::ProtocolSupportInquiry,
            0x0668 => Mti::ProtocolSupportReply,
            0x08F4 => Mti::IdentifyConsumers,
            0x04A4 => Mti::ConsumerRangeIdentified,
            0x04A7 => Mti::ConsumerIdentifiedUnknown,
            0x04C7 => Mti::ConsumerIdentifiedSet,
            0x04C4 => Mti::ConsumerIdentifiedClear,
            0x0914 => Mti::IdentifyProducers,
            0x0524 => Mti::ProducerRangeIdentified,
            0x0527 => Mti::ProducerIdentifiedUnknown,
            0x0547 => Mti::ProducerIdentifiedSet,
            0x0544 => Mti::ProducerIdentifiedClear,
            0x0968 => Mti::IdentifyEventsAddressed,
            0x0970 => Mti::IdentifyEventsGlobal,
            0x0594 => Mti::LearnEvent,
            0x05B4 => Mti::PcEventReport,
            0x0F15 => Mti::PcEventReportWithPayload,
            0x0A28 => Mti::DatagramReceivedOk,
            0x0A48 => Mti::DatagramRejected,
            0x1C48 => Mti::Datagram,
            other => Mti::Other(other),
        }
    }

    /// Whether this MTI addresses a specific destination node (bit 0x0008
    /// of the MTI, per the OpenLCB standard's "destination-bit").
    pub const fn is_addressed(self) -> bool {
        self.value() & 0x0008 != 0
    }

    /// The 12-bit CAN-MTI carried in identifier bits `[23:12]` for a
    /// payload frame of this message type.
    pub const fn can_mti(self) -> u16 {
        self.value() & 0x0FFF
    }
}

bitflags::bitflags! {
    /// Protocol Support Indicator bits (§4.11), declaring which
    /// protocols a node implements.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    #[cfg_attr(feature = "defmt", derive(defmt::Format))]
    pub struct Psi: u32 {
        const SIMPLE_PROTOCOL_SUBSET   = 1 << 23;
        const DATAGRAM                 = 1 << 22;
        const STREAM                   = 1 << 21;
        const MEMORY_CONFIGURATION     = 1 << 20;
        const RESERVATION              = 1 << 19;
        const EVENT_EXCHANGE           = 1 << 18;
        const IDENTIFICATION           = 1 << 17;
        const TEACHING_LEARNING        = 1 << 16;
        const REMOTE_BUTTON            = 1 << 15;
        const ABBREVIATED_CDI          = 1 << 14;
        const DISPLAY                  = 1 << 13;
        const SNIP                     = 1 << 12;
        const CDI                      = 1 << 11;
        const TRACTION_CONTROL         = 1 << 10;
        const FUNCTION_DESCRIPTION     = 1 << 9;
        const DCC_COMMAND_STATION      = 1 << 8;
        const SIMPLE_NODE_INFORMATION  = 1 << 7;
        const CONFIGURATION_DESCRIPTION_INFO = 1 << 6;
        const TRAIN_CONTROL            = 1 << 5;
        const FUNCTION_CONFIGURATION   = 1 << 4;
        const FIRMWARE_UPGRADE         = 1 << 3;
        const FIRMWARE_UPGRADE_ACTIVE  = 1 << 2;
    }
}
