use super::LoggingError;
use chrono::Local;
use std::fmt;
use tracing::{Event, Subscriber};
use tracing_subscriber::{
    fmt::{format::Writer, FmtContext, FormatEvent, FormatFields},
    registry::LookupSpan,
};

pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S,%3f";

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Timestamp,
    Name,
    Level,
    Message,
}

/// Line layout compiled from a `{placeholder}` template.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PatternFormat {
    segments: Vec<Segment>,
}

impl PatternFormat {
    pub fn parse(template: &str) -> Result<Self, LoggingError> {
        let invalid = |reason: &str| LoggingError::InvalidFormat {
            template: template.to_string(),
            reason: reason.to_string(),
        };

        let mut segments = Vec::new();
        let mut literal = String::new();
        let mut chars = template.chars().peekable();

        while let Some(c) = chars.next() {
            match c {
                '{' if chars.peek() == Some(&'{') => {
                    chars.next();
                    literal.push('{');
                }
                '}' if chars.peek() == Some(&'}') => {
                    chars.next();
                    literal.push('}');
                }
                '{' => {
                    let mut name = String::new();
                    loop {
                        match chars.next() {
                            Some('}') => break,
                            Some(c) => name.push(c),
                            None => return Err(invalid("unterminated placeholder")),
                        }
                    }

                    let segment = match name.as_str() {
                        "timestamp" => Segment::Timestamp,
                        "name" => Segment::Name,
                        "level" => Segment::Level,
                        "message" => Segment::Message,
                        other => return Err(invalid(&format!("unknown placeholder {{{other}}}"))),
                    };

                    if !literal.is_empty() {
                        segments.push(Segment::Literal(std::mem::take(&mut literal)));
                    }
                    segments.push(segment);
                }
                '}' => return Err(invalid("unmatched '}'")),
                c => literal.push(c),
            }
        }

        if !literal.is_empty() {
            segments.push(Segment::Literal(literal));
        }

        Ok(Self { segments })
    }
}

impl<S, N> FormatEvent<S, N> for PatternFormat
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    N: for<'a> FormatFields<'a> + 'static,
{
    fn format_event(
        &self,
        ctx: &FmtContext<'_, S, N>,
        mut writer: Writer<'_>,
        event: &Event<'_>,
    ) -> fmt::Result {
        let metadata = event.metadata();

        for segment in &self.segments {
            match segment {
                Segment::Literal(text) => writer.write_str(text)?,
                Segment::Timestamp => write!(writer, "{}", Local::now().format(TIMESTAMP_FORMAT))?,
                Segment::Name => writer.write_str(metadata.target())?,
                Segment::Level => write!(writer, "{}", metadata.level())?,
                Segment::Message => ctx.format_fields(writer.by_ref(), event)?,
            }
        }

        writeln!(writer)
    }
}
