//! Typed DEEP/TOPS message records and the tag dispatch.
//!
//! Each message kind decodes into its own struct; [`Message`] is the closed
//! union consumers match on. Records own every field, so they outlive the
//! datagram buffer they were decoded from.
use std::fmt;
use std::str::FromStr;

use rust_decimal::Decimal;
use serde::Serialize;
use thiserror::Error;
use time::OffsetDateTime;

use crate::codes::{
    short_sale_test_in_effect, AuctionType, ImbalanceSide, LuldTier, OfficialPriceType,
    OperationalHaltStatus, QuoteFlags, SaleConditions, SecurityEventKind, SecurityFlags,
    RetailInterest, ShortSaleTestDetail, Side, SystemEventKind, TradingStatusKind, UpdateStatus,
};
use crate::convert::{decode_event_time, decode_symbol, ByteReader};
use crate::error::ParseError;
use crate::segment::Frame;

/// Feed protocol version; selects the dispatch table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Protocol {
    Deep1_0,
    Tops1_5,
    Tops1_6,
}

impl Protocol {
    pub fn as_str(self) -> &'static str {
        match self {
            Protocol::Deep1_0 => "DEEPv1.0",
            Protocol::Tops1_5 => "TOPSv1.5",
            Protocol::Tops1_6 => "TOPSv1.6",
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("unknown protocol {0:?}: expected DEEPv1.0, TOPSv1.5 or TOPSv1.6")]
pub struct UnknownProtocol(pub String);

impl FromStr for Protocol {
    type Err = UnknownProtocol;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "DEEPv1.0" => Ok(Protocol::Deep1_0),
            "TOPSv1.5" => Ok(Protocol::Tops1_5),
            "TOPSv1.6" => Ok(Protocol::Tops1_6),
            other => Err(UnknownProtocol(other.to_owned())),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SystemEvent {
    pub event: SystemEventKind,
    #[serde(with = "time::serde::rfc3339")]
    pub timestamp: OffsetDateTime,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SecurityDirectory {
    pub flags: SecurityFlags,
    #[serde(with = "time::serde::rfc3339")]
    pub timestamp: OffsetDateTime,
    pub symbol: String,
    pub round_lot_size: u32,
    pub adjusted_poc_close: Decimal,
    pub luld_tier: LuldTier,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TradingStatus {
    pub status: TradingStatusKind,
    #[serde(with = "time::serde::rfc3339")]
    pub timestamp: OffsetDateTime,
    pub symbol: String,
    /// Halt or pause reason code, e.g. `T1`, `IPO1`, `NA`.
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OperationalHalt {
    pub halt_status: OperationalHaltStatus,
    #[serde(with = "time::serde::rfc3339")]
    pub timestamp: OffsetDateTime,
    pub symbol: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ShortSalePriceTestStatus {
    /// Whether a short sale price test is in effect.
    pub in_effect: bool,
    #[serde(with = "time::serde::rfc3339")]
    pub timestamp: OffsetDateTime,
    pub symbol: String,
    pub detail: ShortSaleTestDetail,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct QuoteUpdate {
    pub flags: QuoteFlags,
    #[serde(with = "time::serde::rfc3339")]
    pub timestamp: OffsetDateTime,
    pub symbol: String,
    pub bid_size: u32,
    pub bid_price: Decimal,
    pub ask_price: Decimal,
    pub ask_size: u32,
}

/// Layout shared by trade reports and trade breaks.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Trade {
    pub flags: SaleConditions,
    #[serde(with = "time::serde::rfc3339")]
    pub timestamp: OffsetDateTime,
    pub symbol: String,
    pub size: u32,
    pub price: Decimal,
    pub trade_id: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OfficialPrice {
    pub price_type: OfficialPriceType,
    #[serde(with = "time::serde::rfc3339")]
    pub timestamp: OffsetDateTime,
    pub symbol: String,
    pub price: Decimal,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AuctionInformation {
    pub auction_type: AuctionType,
    #[serde(with = "time::serde::rfc3339")]
    pub timestamp: OffsetDateTime,
    pub symbol: String,
    pub paired_shares: u32,
    pub reference_price: Decimal,
    pub indicative_clearing_price: Decimal,
    pub imbalance_shares: u32,
    pub imbalance_side: ImbalanceSide,
    pub extension_number: u8,
    #[serde(with = "time::serde::rfc3339")]
    pub scheduled_auction_time: OffsetDateTime,
    pub auction_book_clearing_price: Decimal,
    pub collar_reference_price: Decimal,
    pub lower_auction_collar_price: Decimal,
    pub upper_auction_collar_price: Decimal,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PriceLevelUpdate {
    pub side: Side,
    pub status: UpdateStatus,
    #[serde(with = "time::serde::rfc3339")]
    pub timestamp: OffsetDateTime,
    pub symbol: String,
    pub size: u32,
    pub price: Decimal,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SecurityEvent {
    pub event: SecurityEventKind,
    #[serde(with = "time::serde::rfc3339")]
    pub timestamp: OffsetDateTime,
    pub symbol: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RetailLiquidityIndicator {
    pub indicator: RetailInterest,
    #[serde(with = "time::serde::rfc3339")]
    pub timestamp: OffsetDateTime,
    pub symbol: String,
}

/// A decoded DEEP/TOPS message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Message {
    SystemEvent(SystemEvent),
    SecurityDirectory(SecurityDirectory),
    TradingStatus(TradingStatus),
    OperationalHalt(OperationalHalt),
    ShortSalePriceTestStatus(ShortSalePriceTestStatus),
    QuoteUpdate(QuoteUpdate),
    TradeReport(Trade),
    OfficialPrice(OfficialPrice),
    TradeBreak(Trade),
    AuctionInformation(AuctionInformation),
    PriceLevelUpdate(PriceLevelUpdate),
    SecurityEvent(SecurityEvent),
    RetailLiquidityIndicator(RetailLiquidityIndicator),
}

pub mod tag {
    pub const SYSTEM_EVENT: u8 = 0x53;
    pub const SECURITY_DIRECTORY: u8 = 0x44;
    pub const TRADING_STATUS: u8 = 0x48;
    pub const OPERATIONAL_HALT: u8 = 0x4f;
    pub const SHORT_SALE_PRICE_TEST_STATUS: u8 = 0x50;
    pub const QUOTE_UPDATE: u8 = 0x51;
    pub const TRADE_REPORT: u8 = 0x54;
    pub const OFFICIAL_PRICE: u8 = 0x58;
    pub const TRADE_BREAK: u8 = 0x42;
    pub const AUCTION_INFORMATION: u8 = 0x41;
    pub const PRICE_LEVEL_UPDATE_BUY: u8 = 0x38;
    pub const PRICE_LEVEL_UPDATE_SELL: u8 = 0x35;
    pub const SECURITY_EVENT: u8 = 0x45;
    pub const RETAIL_LIQUIDITY_INDICATOR: u8 = 0x49;
}

/// Decode one message body according to its type tag.
///
/// DEEP 1.0 and TOPS share one table; the retail liquidity indicator only
/// exists on TOPS and is an unknown tag on DEEP.
pub fn decode_message(protocol: Protocol, tag: u8, body: &[u8]) -> Result<Message, ParseError> {
    match (protocol, tag) {
        (Protocol::Tops1_5 | Protocol::Tops1_6, tag::RETAIL_LIQUIDITY_INDICATOR) => {
            Ok(Message::RetailLiquidityIndicator(retail_liquidity_indicator(body)?))
        }
        _ => decode_v1(tag, body),
    }
}

fn decode_v1(tag: u8, body: &[u8]) -> Result<Message, ParseError> {
    use self::tag::*;
    let msg = match tag {
        SYSTEM_EVENT => Message::SystemEvent(system_event(body)?),
        SECURITY_DIRECTORY => Message::SecurityDirectory(security_directory(body)?),
        TRADING_STATUS => Message::TradingStatus(trading_status(body)?),
        OPERATIONAL_HALT => Message::OperationalHalt(operational_halt(body)?),
        SHORT_SALE_PRICE_TEST_STATUS => Message::ShortSalePriceTestStatus(short_sale_price_test_status(body)?),
        QUOTE_UPDATE => Message::QuoteUpdate(quote_update(body)?),
        TRADE_REPORT => Message::TradeReport(trade(body, "trade_report")?),
        OFFICIAL_PRICE => Message::OfficialPrice(official_price(body)?),
        TRADE_BREAK => Message::TradeBreak(trade(body, "trade_break")?),
        AUCTION_INFORMATION => Message::AuctionInformation(auction_information(body)?),
        PRICE_LEVEL_UPDATE_BUY => Message::PriceLevelUpdate(price_level_update(Side::Buy, body)?),
        PRICE_LEVEL_UPDATE_SELL => Message::PriceLevelUpdate(price_level_update(Side::Sell, body)?),
        SECURITY_EVENT => Message::SecurityEvent(security_event(body)?),
        other => return Err(ParseError::UnknownMessageType { tag: other }),
    };
    Ok(msg)
}

/// Reject bodies that differ from the fixed layout before reading any field.
fn reader<'a>(kind: &'static str, expected: usize, body: &'a [u8]) -> Result<ByteReader<'a>, ParseError> {
    if body.len() != expected {
        return Err(ParseError::MessageLength { kind, expected, actual: body.len() });
    }
    Ok(ByteReader::new(body))
}

fn system_event(body: &[u8]) -> Result<SystemEvent, ParseError> {
    let mut r = reader("system_event", 9, body)?;
    Ok(SystemEvent {
        event: SystemEventKind::from_code(r.u8()?)?,
        timestamp: r.timestamp()?,
    })
}

fn security_directory(body: &[u8]) -> Result<SecurityDirectory, ParseError> {
    let mut r = reader("security_directory", 30, body)?;
    Ok(SecurityDirectory {
        flags: SecurityFlags::from_bits_truncate(r.u8()?),
        timestamp: r.timestamp()?,
        symbol: r.symbol()?,
        round_lot_size: r.u32()?,
        adjusted_poc_close: r.price()?,
        luld_tier: LuldTier::from_code(r.u8()?)?,
    })
}

fn trading_status(body: &[u8]) -> Result<TradingStatus, ParseError> {
    let mut r = reader("trading_status", 21, body)?;
    Ok(TradingStatus {
        status: TradingStatusKind::from_code(r.u8()?)?,
        timestamp: r.timestamp()?,
        symbol: r.symbol()?,
        reason: decode_symbol(r.take(4)?),
    })
}

fn operational_halt(body: &[u8]) -> Result<OperationalHalt, ParseError> {
    let mut r = reader("operational_halt", 17, body)?;
    Ok(OperationalHalt {
        halt_status: OperationalHaltStatus::from_code(r.u8()?)?,
        timestamp: r.timestamp()?,
        symbol: r.symbol()?,
    })
}

fn short_sale_price_test_status(body: &[u8]) -> Result<ShortSalePriceTestStatus, ParseError> {
    let mut r = reader("short_sale_price_test_status", 18, body)?;
    Ok(ShortSalePriceTestStatus {
        in_effect: short_sale_test_in_effect(r.u8()?)?,
        timestamp: r.timestamp()?,
        symbol: r.symbol()?,
        detail: ShortSaleTestDetail::from_code(r.u8()?)?,
    })
}

fn quote_update(body: &[u8]) -> Result<QuoteUpdate, ParseError> {
    let mut r = reader("quote_update", 41, body)?;
    Ok(QuoteUpdate {
        flags: QuoteFlags::from_bits_truncate(r.u8()?),
        timestamp: r.timestamp()?,
        symbol: r.symbol()?,
        bid_size: r.u32()?,
        bid_price: r.price()?,
        ask_price: r.price()?,
        ask_size: r.u32()?,
    })
}

fn trade(body: &[u8], kind: &'static str) -> Result<Trade, ParseError> {
    let mut r = reader(kind, 37, body)?;
    Ok(Trade {
        flags: SaleConditions::from_bits_truncate(r.u8()?),
        timestamp: r.timestamp()?,
        symbol: r.symbol()?,
        size: r.u32()?,
        price: r.price()?,
        trade_id: r.i64()?,
    })
}

fn official_price(body: &[u8]) -> Result<OfficialPrice, ParseError> {
    let mut r = reader("official_price", 25, body)?;
    Ok(OfficialPrice {
        price_type: OfficialPriceType::from_code(r.u8()?)?,
        timestamp: r.timestamp()?,
        symbol: r.symbol()?,
        price: r.price()?,
    })
}

fn auction_information(body: &[u8]) -> Result<AuctionInformation, ParseError> {
    let mut r = reader("auction_information", 79, body)?;
    Ok(AuctionInformation {
        auction_type: AuctionType::from_code(r.u8()?)?,
        timestamp: r.timestamp()?,
        symbol: r.symbol()?,
        paired_shares: r.u32()?,
        reference_price: r.price()?,
        indicative_clearing_price: r.price()?,
        imbalance_shares: r.u32()?,
        imbalance_side: ImbalanceSide::from_code(r.u8()?)?,
        extension_number: r.u8()?,
        scheduled_auction_time: decode_event_time(r.u32()?),
        auction_book_clearing_price: r.price()?,
        collar_reference_price: r.price()?,
        lower_auction_collar_price: r.price()?,
        upper_auction_collar_price: r.price()?,
    })
}

fn price_level_update(side: Side, body: &[u8]) -> Result<PriceLevelUpdate, ParseError> {
    let mut r = reader("price_level_update", 29, body)?;
    Ok(PriceLevelUpdate {
        side,
        status: UpdateStatus::from_flags(r.u8()?),
        timestamp: r.timestamp()?,
        symbol: r.symbol()?,
        size: r.u32()?,
        price: r.price()?,
    })
}

fn security_event(body: &[u8]) -> Result<SecurityEvent, ParseError> {
    let mut r = reader("security_event", 17, body)?;
    Ok(SecurityEvent {
        event: SecurityEventKind::from_code(r.u8()?)?,
        timestamp: r.timestamp()?,
        symbol: r.symbol()?,
    })
}

fn retail_liquidity_indicator(body: &[u8]) -> Result<RetailLiquidityIndicator, ParseError> {
    let mut r = reader("retail_liquidity_indicator", 17, body)?;
    Ok(RetailLiquidityIndicator {
        indicator: RetailInterest::from_code(r.u8()?)?,
        timestamp: r.timestamp()?,
        symbol: r.symbol()?,
    })
}

impl Message {
    pub fn decode_frame(protocol: Protocol, frame: &Frame<'_>) -> Result<Self, ParseError> {
        decode_message(protocol, frame.tag(), frame.body())
    }

    /// Name used for the `type` field when serialized.
    pub fn type_name(&self) -> &'static str {
        match self {
            Message::SystemEvent(_) => "system_event",
            Message::SecurityDirectory(_) => "security_directory",
            Message::TradingStatus(_) => "trading_status",
            Message::OperationalHalt(_) => "operational_halt",
            Message::ShortSalePriceTestStatus(_) => "short_sale_price_test_status",
            Message::QuoteUpdate(_) => "quote_update",
            Message::TradeReport(_) => "trade_report",
            Message::OfficialPrice(_) => "official_price",
            Message::TradeBreak(_) => "trade_break",
            Message::AuctionInformation(_) => "auction_information",
            Message::PriceLevelUpdate(_) => "price_level_update",
            Message::SecurityEvent(_) => "security_event",
            Message::RetailLiquidityIndicator(_) => "retail_liquidity_indicator",
        }
    }

    pub fn timestamp(&self) -> OffsetDateTime {
        match self {
            Message::SystemEvent(m) => m.timestamp,
            Message::SecurityDirectory(m) => m.timestamp,
            Message::TradingStatus(m) => m.timestamp,
            Message::OperationalHalt(m) => m.timestamp,
            Message::ShortSalePriceTestStatus(m) => m.timestamp,
            Message::QuoteUpdate(m) => m.timestamp,
            Message::TradeReport(m) | Message::TradeBreak(m) => m.timestamp,
            Message::OfficialPrice(m) => m.timestamp,
            Message::AuctionInformation(m) => m.timestamp,
            Message::PriceLevelUpdate(m) => m.timestamp,
            Message::SecurityEvent(m) => m.timestamp,
            Message::RetailLiquidityIndicator(m) => m.timestamp,
        }
    }

    /// Symbol the message refers to; `None` for system-wide events.
    pub fn symbol(&self) -> Option<&str> {
        let symbol = match self {
            Message::SystemEvent(_) => return None,
            Message::SecurityDirectory(m) => &m.symbol,
            Message::TradingStatus(m) => &m.symbol,
            Message::OperationalHalt(m) => &m.symbol,
            Message::ShortSalePriceTestStatus(m) => &m.symbol,
            Message::QuoteUpdate(m) => &m.symbol,
            Message::TradeReport(m) | Message::TradeBreak(m) => &m.symbol,
            Message::OfficialPrice(m) => &m.symbol,
            Message::AuctionInformation(m) => &m.symbol,
            Message::PriceLevelUpdate(m) => &m.symbol,
            Message::SecurityEvent(m) => &m.symbol,
            Message::RetailLiquidityIndicator(m) => &m.symbol,
        };
        Some(symbol)
    }
}
