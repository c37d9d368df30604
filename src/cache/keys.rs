//! Canonical key encoding for query parameters.
//!
//! Every parameter handed to a query is reduced to a [`KeyToken`] before it is
//! used as a trie level. Tokens compare by content, so two distinct `Vec`s or
//! two distinct hook objects that describe the same value land on the same
//! cache entry.

use std::fmt;
use std::sync::Arc;

use bytes::Bytes;
use chrono::{Datelike, Offset, Timelike};
use chrono_tz::Tz;
use serde::Serialize;
use serde_json::Value;
use time::{OffsetDateTime, UtcOffset};

use super::error::CacheError;
use crate::util::timezone::localized_datetime;

/// How date/time parameters are rendered into key tokens.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DateMode {
    #[default]
    Utc,
    /// Wall-clock time in the given zone, with that zone's offset.
    Local(Tz),
}

/// Element type of a [`NumericView`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NumericKind {
    U8,
    I8,
    U16,
    I16,
    U32,
    I32,
    F32,
    U64,
    I64,
    F64,
}

impl NumericKind {
    /// Size of one element in bytes.
    pub fn width(self) -> usize {
        match self {
            Self::U8 | Self::I8 => 1,
            Self::U16 | Self::I16 => 2,
            Self::U32 | Self::I32 | Self::F32 => 4,
            Self::U64 | Self::I64 | Self::F64 => 8,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::U8 => "u8",
            Self::I8 => "i8",
            Self::U16 => "u16",
            Self::I16 => "i16",
            Self::U32 => "u32",
            Self::I32 => "i32",
            Self::F32 => "f32",
            Self::U64 => "u64",
            Self::I64 => "i64",
            Self::F64 => "f64",
        }
    }
}

/// A fixed-width numeric array viewing a window of a shared byte buffer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NumericView {
    kind: NumericKind,
    buffer: Bytes,
    byte_offset: usize,
    len: usize,
}

impl NumericView {
    /// View `len` elements of `kind` starting at `byte_offset` inside `buffer`.
    pub fn new(
        kind: NumericKind,
        buffer: Bytes,
        byte_offset: usize,
        len: usize,
    ) -> Result<Self, CacheError> {
        let invalid = || CacheError::InvalidView {
            kind: kind.name(),
            byte_offset,
            len,
            buffer_len: buffer.len(),
        };
        if byte_offset % kind.width() != 0 {
            return Err(invalid());
        }
        let end = len
            .checked_mul(kind.width())
            .and_then(|span| span.checked_add(byte_offset))
            .ok_or_else(invalid)?;
        if end > buffer.len() {
            return Err(invalid());
        }
        Ok(Self {
            kind,
            buffer,
            byte_offset,
            len,
        })
    }

    /// View the entire buffer as elements of `kind`.
    pub fn whole(kind: NumericKind, buffer: Bytes) -> Result<Self, CacheError> {
        if buffer.len() % kind.width() != 0 {
            return Err(CacheError::InvalidView {
                kind: kind.name(),
                byte_offset: 0,
                len: buffer.len() / kind.width(),
                buffer_len: buffer.len(),
            });
        }
        let len = buffer.len() / kind.width();
        Self::new(kind, buffer, 0, len)
    }

    pub fn kind(&self) -> NumericKind {
        self.kind
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn byte_len(&self) -> usize {
        self.len * self.kind.width()
    }

    /// The bytes covered by this view.
    ///
    /// A view spanning its whole buffer shares it; a partial view is copied so
    /// the result never carries bytes outside the described span.
    pub fn to_bytes(&self) -> Bytes {
        if self.byte_offset == 0 && self.byte_len() == self.buffer.len() {
            return self.buffer.clone();
        }
        let end = self.byte_offset + self.byte_len();
        Bytes::copy_from_slice(&self.buffer[self.byte_offset..end])
    }
}

/// Custom serialization hook for structured parameters.
///
/// The encoder is handed to the hook so it can canonicalize nested values
/// itself; whatever the hook returns is canonicalized again.
pub trait ParamHook: fmt::Debug + Send + Sync {
    fn to_param(&self, encoder: &mut KeyEncoder) -> Result<Param, CacheError>;

    /// Text used in circular-reference errors.
    fn describe(&self) -> String {
        format!("{self:?}")
    }
}

/// A dynamically-typed query parameter.
#[derive(Debug, Clone)]
pub enum Param {
    Null,
    Bool(bool),
    Int(i64),
    /// Integers above `i64::MAX`.
    UInt(u64),
    Float(f64),
    Text(String),
    Bytes(Bytes),
    View(NumericView),
    DateTime(OffsetDateTime),
    Array(Vec<Param>),
    /// Plain structured value without a hook.
    Object(Value),
    Custom(Arc<dyn ParamHook>),
}

impl Param {
    /// Build a parameter from anything `serde_json` can serialize.
    pub fn from_serialize<T: Serialize>(value: &T) -> Result<Self, serde_json::Error> {
        serde_json::to_value(value).map(Self::from)
    }

    pub fn custom(hook: impl ParamHook + 'static) -> Self {
        Self::Custom(Arc::new(hook))
    }

    pub fn kind_name(&self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Bool(_) => "bool",
            Self::Int(_) | Self::UInt(_) => "integer",
            Self::Float(_) => "float",
            Self::Text(_) => "text",
            Self::Bytes(_) => "bytes",
            Self::View(_) => "numeric view",
            Self::DateTime(_) => "datetime",
            Self::Array(_) => "array",
            Self::Object(_) => "object",
            Self::Custom(_) => "custom",
        }
    }
}

impl From<Value> for Param {
    fn from(value: Value) -> Self {
        match value {
            Value::Null => Self::Null,
            Value::Bool(flag) => Self::Bool(flag),
            Value::Number(number) => {
                if let Some(int) = number.as_i64() {
                    Self::Int(int)
                } else if let Some(int) = number.as_u64() {
                    Self::UInt(int)
                } else {
                    number.as_f64().map_or(Self::Null, Self::Float)
                }
            }
            Value::String(text) => Self::Text(text),
            Value::Array(items) => Self::Array(items.into_iter().map(Self::from).collect()),
            object @ Value::Object(_) => Self::Object(object),
        }
    }
}

impl From<bool> for Param {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<i32> for Param {
    fn from(value: i32) -> Self {
        Self::Int(value.into())
    }
}

impl From<i64> for Param {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl From<u32> for Param {
    fn from(value: u32) -> Self {
        Self::Int(value.into())
    }
}

impl From<u64> for Param {
    fn from(value: u64) -> Self {
        i64::try_from(value).map_or(Self::UInt(value), Self::Int)
    }
}

impl From<f64> for Param {
    fn from(value: f64) -> Self {
        Self::Float(value)
    }
}

impl From<&str> for Param {
    fn from(value: &str) -> Self {
        Self::Text(value.to_owned())
    }
}

impl From<String> for Param {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl From<Bytes> for Param {
    fn from(value: Bytes) -> Self {
        Self::Bytes(value)
    }
}

impl From<Vec<u8>> for Param {
    fn from(value: Vec<u8>) -> Self {
        Self::Bytes(Bytes::from(value))
    }
}

impl From<NumericView> for Param {
    fn from(value: NumericView) -> Self {
        Self::View(value)
    }
}

impl From<OffsetDateTime> for Param {
    fn from(value: OffsetDateTime) -> Self {
        Self::DateTime(value)
    }
}

impl From<Vec<Param>> for Param {
    fn from(value: Vec<Param>) -> Self {
        Self::Array(value)
    }
}

impl<T: Into<Param>> From<Option<T>> for Param {
    fn from(value: Option<T>) -> Self {
        value.map_or(Self::Null, Into::into)
    }
}

/// Canonical, content-comparable form of one parameter.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum KeyToken {
    Null,
    Bytes(Bytes),
    Text(String),
}

/// Reduces parameters to [`KeyToken`]s, tracking hook objects currently being
/// encoded so self-referencing hooks fail instead of recursing forever.
#[derive(Debug)]
pub struct KeyEncoder {
    date_mode: DateMode,
    seen: Vec<usize>,
}

impl KeyEncoder {
    pub fn new(date_mode: DateMode) -> Self {
        Self {
            date_mode,
            seen: Vec::new(),
        }
    }

    pub fn date_mode(&self) -> DateMode {
        self.date_mode
    }

    pub fn encode(&mut self, value: &Param) -> Result<KeyToken, CacheError> {
        match value {
            Param::Null => Ok(KeyToken::Null),
            Param::Bytes(bytes) => Ok(KeyToken::Bytes(bytes.clone())),
            Param::View(view) => Ok(KeyToken::Bytes(view.to_bytes())),
            Param::DateTime(instant) => Ok(KeyToken::Text(self.date_string(*instant))),
            Param::Array(items) => self.array_literal(items).map(KeyToken::Text),
            Param::Custom(hook) => self.encode_custom(hook),
            Param::Object(object) => {
                let mut out = String::new();
                write_canonical_json(object, &mut out);
                Ok(KeyToken::Text(out))
            }
            Param::Bool(flag) => Ok(KeyToken::Text(flag.to_string())),
            Param::Int(int) => Ok(KeyToken::Text(int.to_string())),
            Param::UInt(int) => Ok(KeyToken::Text(int.to_string())),
            Param::Float(float) => Ok(KeyToken::Text(float_string(*float))),
            Param::Text(text) => Ok(KeyToken::Text(text.clone())),
        }
    }

    fn encode_custom(&mut self, hook: &Arc<dyn ParamHook>) -> Result<KeyToken, CacheError> {
        let identity = Arc::as_ptr(hook) as *const () as usize;
        if self.seen.contains(&identity) {
            return Err(CacheError::circular(hook.describe()));
        }

        // Stays on the stack until the hook output is fully canonicalized.
        self.seen.push(identity);
        let result = hook
            .to_param(self)
            .and_then(|output| self.encode(&output));
        self.seen.pop();
        result
    }

    fn array_literal(&mut self, items: &[Param]) -> Result<String, CacheError> {
        let mut out = String::from("{");
        for (index, item) in items.iter().enumerate() {
            if index > 0 {
                out.push(',');
            }
            match item {
                Param::Null => out.push_str("NULL"),
                Param::Array(inner) => {
                    let nested = self.array_literal(inner)?;
                    out.push_str(&nested);
                }
                Param::Bytes(bytes) => push_hex_element(&mut out, bytes),
                Param::View(view) => push_hex_element(&mut out, &view.to_bytes()),
                other => match self.encode(other)? {
                    KeyToken::Null => out.push_str("NULL"),
                    KeyToken::Bytes(bytes) => push_hex_element(&mut out, &bytes),
                    KeyToken::Text(text) => push_quoted_element(&mut out, &text),
                },
            }
        }
        out.push('}');
        Ok(out)
    }

    fn date_string(&self, instant: OffsetDateTime) -> String {
        match self.date_mode {
            DateMode::Utc => utc_parts(instant).format(),
            DateMode::Local(tz) => match localized_datetime(instant, tz) {
                Some(local) => DateParts {
                    year: local.year(),
                    month: local.month(),
                    day: local.day(),
                    hour: local.hour(),
                    minute: local.minute(),
                    second: local.second(),
                    millis: local.timestamp_subsec_millis().min(999),
                    offset_minutes: local.offset().fix().local_minus_utc() / 60,
                }
                .format(),
                None => utc_parts(instant).format(),
            },
        }
    }
}

struct DateParts {
    year: i32,
    month: u32,
    day: u32,
    hour: u32,
    minute: u32,
    second: u32,
    millis: u32,
    offset_minutes: i32,
}

impl DateParts {
    fn format(&self) -> String {
        let before_common_era = self.year < 1;
        let year = if before_common_era {
            self.year.unsigned_abs() + 1
        } else {
            self.year.unsigned_abs()
        };
        let sign = if self.offset_minutes < 0 { '-' } else { '+' };
        let offset = self.offset_minutes.unsigned_abs();

        let mut out = format!(
            "{year:04}-{:02}-{:02}T{:02}:{:02}:{:02}.{:03}{sign}{:02}:{:02}",
            self.month,
            self.day,
            self.hour,
            self.minute,
            self.second,
            self.millis,
            offset / 60,
            offset % 60,
        );
        if before_common_era {
            out.push_str(" BC");
        }
        out
    }
}

fn utc_parts(instant: OffsetDateTime) -> DateParts {
    let utc = instant.to_offset(UtcOffset::UTC);
    DateParts {
        year: utc.year(),
        month: u8::from(utc.month()).into(),
        day: utc.day().into(),
        hour: utc.hour().into(),
        minute: utc.minute().into(),
        second: utc.second().into(),
        millis: utc.millisecond().into(),
        offset_minutes: 0,
    }
}

fn push_hex_element(out: &mut String, bytes: &[u8]) {
    out.push_str("\\\\x");
    out.push_str(&hex::encode(bytes));
}

fn push_quoted_element(out: &mut String, text: &str) {
    out.push('"');
    for ch in text.chars() {
        if ch == '\\' || ch == '"' {
            out.push('\\');
        }
        out.push(ch);
    }
    out.push('"');
}

fn float_string(value: f64) -> String {
    if value.is_nan() {
        return "NaN".to_owned();
    }
    if value.is_infinite() {
        return if value > 0.0 { "Infinity" } else { "-Infinity" }.to_owned();
    }
    if value == 0.0 {
        return "0".to_owned();
    }
    let magnitude = value.abs();
    if !(1e-6..1e21).contains(&magnitude) {
        return exponent_string(value);
    }
    if value.fract() == 0.0 {
        return format!("{value:.0}");
    }
    value.to_string()
}

/// Shortest round-trip digits as `d.ddde+N` / `d.ddde-N`.
fn exponent_string(value: f64) -> String {
    let formatted = format!("{value:e}");
    match formatted.split_once('e') {
        Some((mantissa, exponent)) if !exponent.starts_with('-') => {
            format!("{mantissa}e+{exponent}")
        }
        _ => formatted,
    }
}

/// Compact JSON with object keys in sorted order at every depth.
fn write_canonical_json(value: &Value, out: &mut String) {
    match value {
        Value::Array(items) => {
            out.push('[');
            for (index, item) in items.iter().enumerate() {
                if index > 0 {
                    out.push(',');
                }
                write_canonical_json(item, out);
            }
            out.push(']');
        }
        Value::Object(map) => {
            let mut entries: Vec<_> = map.iter().collect();
            entries.sort_by(|(left, _), (right, _)| left.cmp(right));
            out.push('{');
            for (index, (key, item)) in entries.into_iter().enumerate() {
                if index > 0 {
                    out.push(',');
                }
                out.push_str(&Value::String(key.clone()).to_string());
                out.push(':');
                write_canonical_json(item, out);
            }
            out.push('}');
        }
        scalar => out.push_str(&scalar.to_string()),
    }
}
