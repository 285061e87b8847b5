use std::io::{self, Write};

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::domain::{Libraries, Library};
use crate::error::PrepError;

#[derive(Debug, Clone, Serialize)]
pub struct StatusReport {
    pub prefetch: Vec<String>,
    pub cache_lifetime_secs: u64,
    pub last_prefetch_success: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
}

pub struct JsonOutput;

impl JsonOutput {
    pub fn print_libraries(libraries: &Libraries) -> Result<(), PrepError> {
        Self::print_json(libraries)
    }

    pub fn print_library(library: &Library) -> Result<(), PrepError> {
        Self::print_json(library)
    }

    pub fn print_status(report: &StatusReport) -> Result<(), PrepError> {
        Self::print_json(report)
    }

    fn print_json<T: Serialize>(value: &T) -> Result<(), PrepError> {
        let json =
            serde_json::to_string_pretty(value).map_err(|err| PrepError::Output(err.to_string()))?;
        write_line(&mut io::stdout(), &json).map_err(|err| PrepError::Output(err.to_string()))
    }
}

fn write_line(out: &mut impl Write, text: &str) -> io::Result<()> {
    out.write_all(text.as_bytes())?;
    out.write_all(b"\n")?;
    out.flush()
}
