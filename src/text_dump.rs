//! Line-oriented text dump shared by the chance and strategy trees.
//!
//! Every line is `Tag value`. Doubles are written as the 16 hex digits of
//! their IEEE-754 bits so a dump round-trips exactly. The reader accepts
//! tags strictly in the expected order; anything else is an error that
//! carries the line number.

use std::fmt::Display;
use std::io::{BufRead, Lines, Write};
use std::str::FromStr;

use crate::error::{TreeError, TreeResult};
use crate::flat_tree::VersionTag;

/// Version of the text layout.
pub const TXT_FORMAT: u32 = 1;

pub fn encode_f64(v: f64) -> String {
    format!("{:016X}", v.to_bits())
}

pub fn decode_f64(s: &str) -> Option<f64> {
    if s.len() != 16 {
        return None;
    }
    u64::from_str_radix(s, 16).ok().map(f64::from_bits)
}

pub struct TxtWriter<W: Write> {
    w: W,
}

impl<W: Write> TxtWriter<W> {
    pub fn new(w: W) -> Self {
        TxtWriter { w }
    }

    pub fn field(&mut self, tag: &str, value: impl Display) -> TreeResult<()> {
        writeln!(self.w, "{} {}", tag, value)?;
        Ok(())
    }

    pub fn double(&mut self, tag: &str, value: f64) -> TreeResult<()> {
        self.field(tag, encode_f64(value))
    }

    /// Common header: layout version, tree version and node count.
    pub fn header(&mut self, version: &VersionTag, nodes: u64) -> TreeResult<()> {
        if version.description.contains(['\n', '\r']) {
            return Err(TreeError::InvalidArgument(format!(
                "version description {:?} spans lines",
                version.description
            )));
        }
        self.field("SerializationFormat", TXT_FORMAT)?;
        self.field("Version", version)?;
        self.field("NodesCount", nodes)
    }

    pub fn into_inner(self) -> W {
        self.w
    }
}

pub struct TxtReader<R: BufRead> {
    lines: Lines<R>,
    line: usize,
    peeked: Option<(usize, String, String)>,
}

impl<R: BufRead> TxtReader<R> {
    pub fn new(r: R) -> Self {
        TxtReader {
            lines: r.lines(),
            line: 0,
            peeked: None,
        }
    }

    /// Line number of the last line handed out.
    pub fn line(&self) -> usize {
        self.line
    }

    pub fn error(&self, message: impl Into<String>) -> TreeError {
        TreeError::Parse {
            line: self.line,
            message: message.into(),
        }
    }

    fn fetch(&mut self) -> TreeResult<Option<(usize, String, String)>> {
        if let Some(entry) = self.peeked.take() {
            return Ok(Some(entry));
        }
        let mut number = self.line;
        for line in self.lines.by_ref() {
            let line = line?;
            number += 1;
            if line.trim().is_empty() {
                continue;
            }
            // the value after the first space is kept verbatim
            let line = line.strip_suffix('\r').unwrap_or(line.as_str()).trim_start();
            let (tag, value) = match line.split_once(' ') {
                Some((tag, value)) => (tag.to_string(), value.to_string()),
                None => (line.to_string(), String::new()),
            };
            return Ok(Some((number, tag, value)));
        }
        self.line = number;
        Ok(None)
    }

    /// Tag of the next line without consuming it.
    pub fn peek_tag(&mut self) -> TreeResult<Option<&str>> {
        if self.peeked.is_none() {
            self.peeked = self.fetch()?;
        }
        Ok(self.peeked.as_ref().map(|(_, tag, _)| tag.as_str()))
    }

    /// Consume the next line, which must carry `tag`; returns its value.
    pub fn expect(&mut self, tag: &str) -> TreeResult<String> {
        match self.fetch()? {
            Some((number, found, value)) => {
                self.line = number;
                if found != tag {
                    return Err(self.error(format!(
                        "unexpected tag '{}', expected '{}'",
                        found, tag
                    )));
                }
                Ok(value)
            }
            None => Err(self.error(format!("unexpected end of input, expected '{}'", tag))),
        }
    }

    pub fn expect_parse<T: FromStr>(&mut self, tag: &str) -> TreeResult<T> {
        let value = self.expect(tag)?;
        value
            .trim()
            .parse()
            .map_err(|_| self.error(format!("bad value '{}' for '{}'", value, tag)))
    }

    pub fn expect_f64(&mut self, tag: &str) -> TreeResult<f64> {
        let value = self.expect(tag)?;
        decode_f64(&value).ok_or_else(|| self.error(format!("bad double '{}' for '{}'", value, tag)))
    }

    /// Consume the next line only if it carries `tag`.
    pub fn optional(&mut self, tag: &str) -> TreeResult<Option<String>> {
        if self.peek_tag()? == Some(tag) {
            return self.expect(tag).map(Some);
        }
        Ok(None)
    }

    /// Read the common header; returns the version tag and node count.
    pub fn header(&mut self) -> TreeResult<(VersionTag, u64)> {
        let format: u32 = self.expect_parse("SerializationFormat")?;
        if format > TXT_FORMAT {
            return Err(self.error(format!("unsupported text format {}", format)));
        }
        let version = self.expect("Version")?;
        let version = parse_version(&version)
            .ok_or_else(|| self.error(format!("bad version '{}'", version)))?;
        let nodes: u64 = self.expect_parse("NodesCount")?;
        if nodes == 0 {
            return Err(self.error("tree has no nodes"));
        }
        Ok((version, nodes))
    }

    pub fn expect_end(&mut self) -> TreeResult<()> {
        if let Some((number, tag, _)) = self.fetch()? {
            self.line = number;
            return Err(self.error(format!("unexpected tag '{}' after the last node", tag)));
        }
        Ok(())
    }
}

fn parse_version(s: &str) -> Option<VersionTag> {
    let (numbers, description) = match s.split_once(' ') {
        Some((n, d)) => (n, d.to_string()),
        None => (s, String::new()),
    };
    let mut parts = numbers.split('.').map(|p| p.parse::<u16>());
    let (major, minor, revision) = match (parts.next(), parts.next(), parts.next(), parts.next()) {
        (Some(Ok(a)), Some(Ok(b)), Some(Ok(c)), None) => (a, b, c),
        _ => return None,
    };
    Some(VersionTag {
        major,
        minor,
        revision,
        description,
    })
}
