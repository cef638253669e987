//! Coded sub-fields: single-byte enumerations and flag bitmasks.
//!
//! The lookup tables are `match` expressions over constants. A byte with no
//! mapping is rejected with [`ParseError::UnrecognizedCode`]; raw values are
//! never passed through.
use serde::Serialize;

use crate::error::ParseError;

fn unrecognized(field: &'static str, code: u8) -> ParseError {
    ParseError::UnrecognizedCode { field, code }
}

/// Generates a closed enum with a checked `from_code` constructor and a
/// `code` accessor back to the wire byte.
macro_rules! coded_enum {
    (
        $(#[$meta:meta])*
        $name:ident, $field:literal {
            $( $(#[$vmeta:meta])* $variant:ident = $code:literal ),+ $(,)?
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
        #[serde(rename_all = "snake_case")]
        pub enum $name {
            $( $(#[$vmeta])* $variant ),+
        }

        impl $name {
            pub const FIELD: &'static str = $field;

            pub fn from_code(code: u8) -> Result<Self, ParseError> {
                match code {
                    $( $code => Ok(Self::$variant), )+
                    other => Err(unrecognized(Self::FIELD, other)),
                }
            }

            pub fn code(self) -> u8 {
                match self {
                    $( Self::$variant => $code, )+
                }
            }
        }
    };
}

coded_enum! {
    /// System-wide event in a [`SystemEvent`](crate::message::SystemEvent) message.
    SystemEventKind, "system_event" {
        StartOfMessages = b'O',
        StartOfSystemHours = b'S',
        StartOfRegularHours = b'R',
        EndOfMessages = b'C',
        EndOfSystemHours = b'E',
        EndOfRegularHours = b'M',
    }
}

coded_enum! {
    /// Limit Up-Limit Down price band tier.
    LuldTier, "luld_tier" {
        NotApplicable = 0x00,
        #[serde(rename = "tier_1_nms_stock")]
        Tier1NmsStock = 0x01,
        #[serde(rename = "tier_2_nms_stock")]
        Tier2NmsStock = 0x02,
    }
}

coded_enum! {
    TradingStatusKind, "trading_status" {
        AllHalted = b'H',
        IexReleased = b'O',
        IexPaused = b'P',
        IexTrading = b'T',
    }
}

coded_enum! {
    OperationalHaltStatus, "operational_halt_status" {
        Halted = b'O',
        NotHalted = b'N',
    }
}

coded_enum! {
    ShortSaleTestDetail, "short_sale_price_test_detail" {
        NoPriceTest = b' ',
        Activated = b'A',
        Continued = b'C',
        Deactivated = b'D',
        NotAvailable = b'N',
    }
}

coded_enum! {
    OfficialPriceType, "official_price_type" {
        Open = b'Q',
        Close = b'M',
    }
}

coded_enum! {
    AuctionType, "auction_type" {
        Opening = b'O',
        Closing = b'C',
        Ipo = b'I',
        Halt = b'H',
        Volatility = b'V',
    }
}

coded_enum! {
    ImbalanceSide, "imbalance_side" {
        Buy = b'B',
        Sell = b'S',
        NoImbalance = b'N',
    }
}

coded_enum! {
    SecurityEventKind, "security_event" {
        Opening = b'O',
        Closing = b'C',
    }
}

coded_enum! {
    /// Retail order interest resting on the book (TOPS only).
    RetailInterest, "retail_liquidity_indicator" {
        NotApplicable = b' ',
        BuyInterest = b'A',
        SellInterest = b'B',
        BuyAndSellInterest = b'C',
    }
}

/// Decode the short sale price test status byte: `0x01` means a test is in
/// effect, `0x00` means it is not.
pub fn short_sale_test_in_effect(code: u8) -> Result<bool, ParseError> {
    match code {
        0x00 => Ok(false),
        0x01 => Ok(true),
        other => Err(unrecognized("short_sale_price_test_status", other)),
    }
}

/// Book side of a price level update; fixed by the message tag, not a byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Side {
    Buy,
    Sell,
}

/// Event processing state carried by a price level update.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum UpdateStatus {
    /// The order book is consistent after this update.
    Complete,
    /// More updates for the same event follow.
    Processing,
}

impl UpdateStatus {
    pub fn from_flags(flags: u8) -> Self {
        if flags == 0x01 { UpdateStatus::Complete } else { UpdateStatus::Processing }
    }
}

bitflags::bitflags! {
    /// Security directory flags.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
    pub struct SecurityFlags: u8 {
        const TEST = 0x80;
        const WHEN_ISSUED = 0x40;
        const ETP = 0x20;
    }
}

bitflags::bitflags! {
    /// Sale condition flags shared by trade reports and trade breaks.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
    pub struct SaleConditions: u8 {
        /// Intermarket sweep order.
        const ISO = 0x80;
        const EXTENDED_HOURS = 0x40;
        const ODD_LOT = 0x20;
        const TRADE_THROUGH_EXEMPT = 0x10;
        const SINGLE_PRICE_CROSS = 0x08;
    }
}

impl SaleConditions {
    /// Whether the trade updates the consolidated last sale price.
    pub fn is_last_sale_eligible(self) -> bool {
        !self.intersects(Self::EXTENDED_HOURS | Self::ODD_LOT)
    }

    /// Whether the trade may set the session high or low.
    pub fn is_high_low_price_eligible(self) -> bool {
        !self.intersects(Self::EXTENDED_HOURS | Self::ODD_LOT)
    }

    /// Every trade counts toward volume.
    pub fn is_volume_eligible(self) -> bool {
        true
    }
}

bitflags::bitflags! {
    /// Quote update flags.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
    pub struct QuoteFlags: u8 {
        /// Symbol is halted, paused or otherwise not available for trading.
        const SYMBOL_HALTED = 0x80;
        /// Quote was published outside the regular market session.
        const PRE_POST_MARKET_SESSION = 0x40;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn security_flags_map_named_bits() {
        assert_eq!(SecurityFlags::from_bits_truncate(0x80), SecurityFlags::TEST);
        assert!(SecurityFlags::from_bits_truncate(0x00).is_empty());
        assert_eq!(
            SecurityFlags::from_bits_truncate(0xE0),
            SecurityFlags::TEST | SecurityFlags::WHEN_ISSUED | SecurityFlags::ETP
        );
        let names: Vec<_> = SecurityFlags::from_bits_truncate(0xE0).iter_names().map(|(n, _)| n).collect();
        assert_eq!(names, ["TEST", "WHEN_ISSUED", "ETP"]);
    }

    #[test]
    fn sale_condition_eligibility() {
        assert!(SaleConditions::ISO.is_last_sale_eligible());
        assert!(!SaleConditions::ODD_LOT.is_last_sale_eligible());
        assert!(!SaleConditions::EXTENDED_HOURS.is_high_low_price_eligible());
        assert!(SaleConditions::all().is_volume_eligible());
    }

    #[test]
    fn status_codes_map_to_names() {
        assert_eq!(TradingStatusKind::from_code(b'H').unwrap(), TradingStatusKind::AllHalted);
        assert_eq!(SystemEventKind::from_code(0x4F).unwrap(), SystemEventKind::StartOfMessages);
        assert_eq!(LuldTier::from_code(2).unwrap(), LuldTier::Tier2NmsStock);
        assert_eq!(OfficialPriceType::Close.code(), b'M');
    }

    #[test]
    fn unmapped_codes_are_rejected() {
        match TradingStatusKind::from_code(b'Z') {
            Err(ParseError::UnrecognizedCode { field, code }) => {
                assert_eq!(field, "trading_status");
                assert_eq!(code, b'Z');
            }
            other => panic!("unexpected {other:?}"),
        }
        assert!(LuldTier::from_code(3).is_err());
        assert!(SecurityEventKind::from_code(b'X').is_err());
        assert!(short_sale_test_in_effect(0x02).is_err());
        assert!(short_sale_test_in_effect(0x01).unwrap());
    }

    #[test]
    fn update_status_from_flags() {
        assert_eq!(UpdateStatus::from_flags(1), UpdateStatus::Complete);
        assert_eq!(UpdateStatus::from_flags(0), UpdateStatus::Processing);
    }

    #[test]
    fn enum_names_serialize_snake_case() {
        assert_eq!(serde_json::to_string(&LuldTier::Tier1NmsStock).unwrap(), "\"tier_1_nms_stock\"");
        assert_eq!(serde_json::to_string(&SystemEventKind::EndOfRegularHours).unwrap(), "\"end_of_regular_hours\"");
    }
}
