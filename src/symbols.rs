//! Numeric code to symbolic name lookup.

use evdev::{AbsoluteAxisType, EventType, Key, RelativeAxisType};

/// Lookup tables for kernel input codes. `None` means the code has no known name.
pub trait SymbolTable: Send + Sync {
    fn key_name(&self, code: u16) -> Option<String>;
    fn rel_axis_name(&self, code: u16) -> Option<String>;
    fn abs_axis_name(&self, code: u16) -> Option<String>;
    fn event_type_name(&self, event_type: u16) -> Option<String>;
}

/// Names taken from the evdev crate's code tables.
#[derive(Debug, Default, Clone, Copy)]
pub struct EvdevSymbols;

impl SymbolTable for EvdevSymbols {
    fn key_name(&self, code: u16) -> Option<String> {
        symbolic(format!("{:?}", Key::new(code)))
    }

    fn rel_axis_name(&self, code: u16) -> Option<String> {
        symbolic(format!("{:?}", RelativeAxisType(code)))
    }

    fn abs_axis_name(&self, code: u16) -> Option<String> {
        symbolic(format!("{:?}", AbsoluteAxisType(code)))
    }

    fn event_type_name(&self, event_type: u16) -> Option<String> {
        let name = match EventType(event_type) {
            EventType::SYNCHRONIZATION => "EV_SYN",
            EventType::KEY => "EV_KEY",
            EventType::RELATIVE => "EV_REL",
            EventType::ABSOLUTE => "EV_ABS",
            EventType::MISC => "EV_MSC",
            EventType::SWITCH => "EV_SW",
            EventType::LED => "EV_LED",
            EventType::SOUND => "EV_SND",
            EventType::REPEAT => "EV_REP",
            EventType::FORCEFEEDBACK => "EV_FF",
            EventType::POWER => "EV_PWR",
            EventType::FORCEFEEDBACKSTATUS => "EV_FF_STATUS",
            _ => return None,
        };
        Some(name.to_owned())
    }
}

/// evdev renders unnamed codes as "unknown ...: <n>"; only plain identifiers are real names.
fn symbolic(rendered: String) -> Option<String> {
    let is_identifier = !rendered.is_empty()
        && rendered
            .chars()
            .all(|c| c.is_ascii_uppercase() || c.is_ascii_digit() || c == '_');
    is_identifier.then_some(rendered)
}
