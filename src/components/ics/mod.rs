//! Adapter over the `ical` and `rrule` crates: turns feed bytes into the
//! occurrences that touch a day window.

mod parser;
mod values;

pub use parser::{parse_events_for_day, ParseOptions};
