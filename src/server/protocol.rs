//! Wire protocols: one human-readable, one structured.
//!
//! Both are line-oriented over a stream socket and implement the same
//! [`ClientInterface`], chosen once at server start. Human mode prompts,
//! reads a query with optional trailing `file:` / `tree:` tokens, and
//! prints matches as `tree:version:path:lno:text`. Structured mode speaks
//! one JSON object per line in both directions and terminates each query's
//! results with a `{"done": true, "stats": {...}}` object.

use crate::search::{MatchRecord, MatchStats};
use serde::{Deserialize, Serialize};
use std::io::{self, BufRead, Write};

/// A structured-mode query message
#[derive(Debug, Clone, Deserialize)]
pub struct QueryMessage {
    pub body: String,
    #[serde(default)]
    pub file: Option<String>,
    #[serde(default)]
    pub repo: Option<String>,
    #[serde(default)]
    pub fold_case: bool,
}

/// One structured-mode match
#[derive(Debug, Clone, Serialize)]
pub struct MatchMessage {
    pub tree: String,
    pub version: String,
    pub path: String,
    pub lno: u32,
    pub context_before: Vec<String>,
    pub line: String,
    pub context_after: Vec<String>,
    pub bounds: [usize; 2],
}

#[derive(Debug, Clone, Serialize)]
pub struct StatsMessage {
    pub candidates: u64,
    pub regex_invocations: u64,
    pub matches: u64,
    pub bytes_scanned: u64,
    pub elapsed_ms: f64,
}

#[derive(Serialize)]
struct DoneMessage {
    done: bool,
    stats: StatsMessage,
}

#[derive(Serialize)]
struct ErrorMessage<'a> {
    error: &'a str,
}

impl From<&MatchStats> for StatsMessage {
    fn from(stats: &MatchStats) -> Self {
        Self {
            candidates: stats.candidates,
            regex_invocations: stats.regex_invocations,
            matches: stats.matches,
            bytes_scanned: stats.bytes_scanned,
            elapsed_ms: stats.elapsed.as_secs_f64() * 1000.0,
        }
    }
}

impl From<&MatchRecord> for MatchMessage {
    fn from(record: &MatchRecord) -> Self {
        Self {
            tree: record.tree.clone(),
            version: record.revision.clone(),
            path: record.path.clone(),
            lno: record.line_number,
            context_before: record
                .context_before
                .iter()
                .map(|l| String::from_utf8_lossy(l).into_owned())
                .collect(),
            line: String::from_utf8_lossy(&record.line).into_owned(),
            context_after: record
                .context_after
                .iter()
                .map(|l| String::from_utf8_lossy(l).into_owned())
                .collect(),
            bounds: [record.bounds.0, record.bounds.1],
        }
    }
}

/// A query as the session loop consumes it, whichever mode produced it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedQuery {
    pub body: String,
    pub file: Option<String>,
    pub tree: Option<String>,
    pub fold_case: bool,
}

/// What reading one query line yielded
pub enum ReadOutcome {
    /// Client closed the connection
    Eof,
    Query(ParsedQuery),
    /// The line was unusable; the message is client-safe
    Malformed(String),
}

/// One framing mode over one client connection
pub trait ClientInterface {
    fn prompt(&mut self) -> io::Result<()>;
    fn read_query(&mut self) -> io::Result<ReadOutcome>;
    fn write_match(&mut self, record: &MatchRecord) -> io::Result<()>;
    fn write_error(&mut self, message: &str) -> io::Result<()>;
    fn write_stats(&mut self, stats: &MatchStats) -> io::Result<()>;
}

pub fn make_interface(
    json: bool,
    reader: Box<dyn BufRead + Send>,
    writer: Box<dyn Write + Send>,
) -> Box<dyn ClientInterface + Send> {
    if json {
        Box::new(JsonInterface { reader, writer })
    } else {
        Box::new(HumanInterface { reader, writer })
    }
}

pub struct HumanInterface<R, W> {
    pub reader: R,
    pub writer: W,
}

impl<R: BufRead, W: Write> ClientInterface for HumanInterface<R, W> {
    fn prompt(&mut self) -> io::Result<()> {
        write!(self.writer, "regex> ")?;
        self.writer.flush()
    }

    fn read_query(&mut self) -> io::Result<ReadOutcome> {
        let mut line = String::new();
        if self.reader.read_line(&mut line)? == 0 {
            return Ok(ReadOutcome::Eof);
        }
        Ok(parse_human_query(&line))
    }

    fn write_match(&mut self, record: &MatchRecord) -> io::Result<()> {
        let text = String::from_utf8_lossy(&record.line);
        if record.tree.is_empty() {
            writeln!(self.writer, "{}:{}:{}", record.path, record.line_number, text)?;
        } else {
            writeln!(
                self.writer,
                "{}:{}:{}:{}:{}",
                record.tree, record.revision, record.path, record.line_number, text
            )?;
        }
        self.writer.flush()
    }

    fn write_error(&mut self, message: &str) -> io::Result<()> {
        writeln!(self.writer, "FATAL: {}", message)?;
        self.writer.flush()
    }

    fn write_stats(&mut self, stats: &MatchStats) -> io::Result<()> {
        writeln!(self.writer)?;
        writeln!(
            self.writer,
            "{} matches / {} candidates in {:.3}ms",
            stats.matches,
            stats.candidates,
            stats.elapsed.as_secs_f64() * 1000.0
        )?;
        self.writer.flush()
    }
}

pub struct JsonInterface<R, W> {
    pub reader: R,
    pub writer: W,
}

impl<R: BufRead, W: Write> ClientInterface for JsonInterface<R, W> {
    fn prompt(&mut self) -> io::Result<()> {
        Ok(())
    }

    fn read_query(&mut self) -> io::Result<ReadOutcome> {
        let mut line = String::new();
        if self.reader.read_line(&mut line)? == 0 {
            return Ok(ReadOutcome::Eof);
        }
        if line.trim().is_empty() {
            return Ok(ReadOutcome::Malformed("empty query".to_string()));
        }
        match serde_json::from_str::<QueryMessage>(&line) {
            Ok(msg) if msg.body.is_empty() => {
                Ok(ReadOutcome::Malformed("empty query".to_string()))
            }
            Ok(msg) => Ok(ReadOutcome::Query(ParsedQuery {
                body: msg.body,
                file: msg.file.filter(|f| !f.is_empty()),
                tree: msg.repo.filter(|t| !t.is_empty()),
                fold_case: msg.fold_case,
            })),
            Err(e) => Ok(ReadOutcome::Malformed(format!("could not parse query: {}", e))),
        }
    }

    fn write_match(&mut self, record: &MatchRecord) -> io::Result<()> {
        let msg = MatchMessage::from(record);
        serde_json::to_writer(&mut self.writer, &msg)?;
        self.writer.write_all(b"\n")?;
        self.writer.flush()
    }

    fn write_error(&mut self, message: &str) -> io::Result<()> {
        serde_json::to_writer(&mut self.writer, &ErrorMessage { error: message })?;
        self.writer.write_all(b"\n")?;
        self.writer.flush()
    }

    fn write_stats(&mut self, stats: &MatchStats) -> io::Result<()> {
        let msg = DoneMessage {
            done: true,
            stats: StatsMessage::from(stats),
        };
        serde_json::to_writer(&mut self.writer, &msg)?;
        self.writer.write_all(b"\n")?;
        self.writer.flush()
    }
}

/// Split a human query line into body and trailing `file:` / `tree:`
/// tokens. Tokens are consumed from the end so the body may contain
/// spaces; the first non-token word from the right ends the scan.
fn parse_human_query(line: &str) -> ReadOutcome {
    let mut rest = line.trim();
    let mut file: Option<String> = None;
    let mut tree: Option<String> = None;

    loop {
        let Some(idx) = rest.rfind(char::is_whitespace) else {
            break;
        };
        let token = &rest[idx + 1..];
        if let Some(pattern) = token.strip_prefix("file:") {
            if file.is_none() && !pattern.is_empty() {
                file = Some(pattern.to_string());
                rest = rest[..idx].trim_end();
                continue;
            }
        }
        if let Some(pattern) = token.strip_prefix("tree:") {
            if tree.is_none() && !pattern.is_empty() {
                tree = Some(pattern.to_string());
                rest = rest[..idx].trim_end();
                continue;
            }
        }
        break;
    }

    if rest.is_empty() {
        return ReadOutcome::Malformed("empty query".to_string());
    }
    ReadOutcome::Query(ParsedQuery {
        body: rest.to_string(),
        file,
        tree,
        fold_case: false,
    })
}
