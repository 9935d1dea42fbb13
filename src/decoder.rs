use std::{fmt, time::SystemTime};

use evdev::{EventType, InputEvent};

use crate::symbols::{EvdevSymbols, SymbolTable};

/// One event record as delivered by a device handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RawEvent {
    pub event_type: u16,
    pub code: u16,
    pub value: i32,
    pub timestamp: SystemTime,
}

impl RawEvent {
    #[cfg(test)]
    pub fn new(event_type: u16, code: u16, value: i32) -> Self {
        Self {
            event_type,
            code,
            value,
            timestamp: SystemTime::now(),
        }
    }
}

impl From<InputEvent> for RawEvent {
    fn from(ev: InputEvent) -> Self {
        Self {
            event_type: ev.event_type().0,
            code: ev.code(),
            value: ev.value(),
            timestamp: ev.timestamp(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyState {
    Pressed,
    Released,
    Repeat,
}

impl KeyState {
    /// 0 is a release, 1 a press; the kernel sends 2 for autorepeat, anything else is treated
    /// the same way.
    pub fn from_value(value: i32) -> Self {
        match value {
            0 => Self::Released,
            1 => Self::Pressed,
            _ => Self::Repeat,
        }
    }
}

impl fmt::Display for KeyState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(match self {
            Self::Pressed => "PRESSED",
            Self::Released => "RELEASED",
            Self::Repeat => "REPEAT",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventKind {
    Key,
    Absolute,
    Relative,
    /// Any type without a dedicated decoding. Carries the untranslated type number and its
    /// rendered name.
    Other { event_type: u16, type_name: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SemanticValue {
    Key(KeyState),
    Raw(i32),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedEvent {
    pub device_name: String,
    pub kind: EventKind,
    pub symbolic_code: String,
    pub value: SemanticValue,
}

impl fmt::Display for DecodedEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Device: {} - ", self.device_name)?;
        match &self.kind {
            EventKind::Key => write!(f, "Key Event: {} {}", self.symbolic_code, self.value),
            EventKind::Absolute => write!(
                f,
                "Absolute Event: {} value={}",
                self.symbolic_code, self.value
            ),
            EventKind::Relative => write!(
                f,
                "Relative Event: {} value={}",
                self.symbolic_code, self.value
            ),
            EventKind::Other { type_name, .. } => write!(
                f,
                "Other Event: type={type_name} code={} value={}",
                self.symbolic_code, self.value
            ),
        }
    }
}

impl fmt::Display for SemanticValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Key(state) => fmt::Display::fmt(state, f),
            Self::Raw(value) => fmt::Display::fmt(value, f),
        }
    }
}

/// Turns raw records into typed events. Pure; unknown codes never fail the decode.
pub struct Decoder {
    symbols: Box<dyn SymbolTable>,
}

impl Default for Decoder {
    fn default() -> Self {
        Self::new(Box::new(EvdevSymbols))
    }
}

impl Decoder {
    pub fn new(symbols: Box<dyn SymbolTable>) -> Self {
        Self { symbols }
    }

    pub fn decode(&self, device_name: &str, event: &RawEvent) -> DecodedEvent {
        let (kind, symbolic_code, value) = match EventType(event.event_type) {
            EventType::KEY => (
                EventKind::Key,
                or_unknown(self.symbols.key_name(event.code), event.code),
                SemanticValue::Key(KeyState::from_value(event.value)),
            ),
            EventType::ABSOLUTE => (
                EventKind::Absolute,
                or_unknown(self.symbols.abs_axis_name(event.code), event.code),
                SemanticValue::Raw(event.value),
            ),
            EventType::RELATIVE => (
                EventKind::Relative,
                or_unknown(self.symbols.rel_axis_name(event.code), event.code),
                SemanticValue::Raw(event.value),
            ),
            _ => (
                EventKind::Other {
                    event_type: event.event_type,
                    type_name: or_unknown(
                        self.symbols.event_type_name(event.event_type),
                        event.event_type,
                    ),
                },
                event.code.to_string(),
                SemanticValue::Raw(event.value),
            ),
        };

        DecodedEvent {
            device_name: device_name.to_owned(),
            kind,
            symbolic_code,
            value,
        }
    }
}

fn or_unknown(name: Option<String>, code: u16) -> String {
    name.unwrap_or_else(|| format!("UNKNOWN({code})"))
}
