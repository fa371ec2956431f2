//! Pipe-delimited sample lines: `|<timestamp>|name=value|...|IMPORTANTLINE=0|`.

use kwp2000::{FieldDescriptor, Reading};
use std::fmt::Write as _;
use std::io::{self, Write};
use time::macros::format_description;
use time::OffsetDateTime;

/// Fixed last column of every line.
pub const TRAILER: &str = "IMPORTANTLINE=0";

/// Rendered in place of a value that failed to decode on this tick.
pub const FAILED_MARKER: &str = "ERR";

/// `DD-MM-YYYY HH:MM:SS.mmm`
pub fn format_timestamp(ts: OffsetDateTime) -> String {
    let format = format_description!(
        "[day]-[month]-[year] [hour]:[minute]:[second].[subsecond digits:3]"
    );
    ts.format(&format).unwrap_or_else(|_| ts.to_string())
}

/// Current local time, falling back to UTC when the offset is unknown.
pub fn now() -> OffsetDateTime {
    OffsetDateTime::now_local().unwrap_or_else(|_| OffsetDateTime::now_utc())
}

/// Render one complete line, terminator included.
pub fn format_line(ts: OffsetDateTime, fields: &[FieldDescriptor], readings: &[Reading]) -> String {
    let mut line = String::with_capacity(32 + fields.len() * 16);
    line.push('|');
    line.push_str(&format_timestamp(ts));
    line.push('|');
    for (i, field) in fields.iter().enumerate() {
        match readings.get(i).and_then(Reading::scalar) {
            Some(value) => {
                let _ = write!(line, "{}={}|", field.name, value);
            }
            None => {
                let _ = write!(line, "{}={}|", field.name, FAILED_MARKER);
            }
        }
    }
    line.push_str(TRAILER);
    line.push_str("|\n");
    line
}

/// Appends sample lines to a sink, one `write_all` per line.
pub struct LogWriter<W> {
    sink: W,
    lines: u64,
}

impl<W: Write> LogWriter<W> {
    pub fn new(sink: W) -> Self {
        Self { sink, lines: 0 }
    }

    pub fn write(
        &mut self,
        ts: OffsetDateTime,
        fields: &[FieldDescriptor],
        readings: &[Reading],
    ) -> io::Result<()> {
        let line = format_line(ts, fields, readings);
        self.sink.write_all(line.as_bytes())?;
        self.sink.flush()?;
        self.lines += 1;
        Ok(())
    }

    pub fn lines_written(&self) -> u64 {
        self.lines
    }

    pub fn get_ref(&self) -> &W {
        &self.sink
    }

    pub fn into_inner(self) -> W {
        self.sink
    }
}
