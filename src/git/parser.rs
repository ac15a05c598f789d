//! State-machine parser for `git log` output
//!
//! Consumes the line stream produced by
//! `git log --reverse --topo-order --raw --numstat --pretty=fuller
//! --decorate=full --parents -M -C -c` and reconstructs structured commits.
//!
//! The parser walks five states: `Init -> Commit -> Header -> Message ->
//! File`, looping back to `Commit` at each file-section boundary. A commit
//! line encountered directly in the `File` state means the previous commit
//! had no file section; it is emitted with `empty_commit = true` and parsing
//! resumes from that line.

use std::collections::VecDeque;
use std::io::BufRead;
use std::sync::OnceLock;

use regex::Regex;
use rustc_hash::FxHashMap;
use thiserror::Error;
use tracing::warn;

use crate::trailers;

/// Lines of context kept for parser errors.
const RECENT_LINES: usize = 30;
/// Upper bound on header properties stored per commit; excess is dropped.
const MAX_COMMIT_PROPERTIES: usize = 1000;

fn commit_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"^commit[ \t](?P<commit>[a-f0-9]{40})(?:[ \t](?P<parents>[a-f0-9][a-f0-9 \t]+))?(?:[ \t]\((?P<refs>.+)\))?$",
        )
        .expect("valid regex")
    })
}

fn header_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^(?P<name>[A-Za-z0-9\-]+):[ \t]+(?P<value>.+)$").expect("valid regex")
    })
}

fn message_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^\s{4}(?P<msg>.*)$").expect("valid regex"))
}

fn action_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"^(?P<sc>:+)(?P<modes>(?:\d{6}[ \t])+)(?P<indexes>(?:[a-f0-9]+\.{0,3}[ \t])+)(?P<action>[^\t]+)\t+(?P<file>[^\t]+)(?:\t+(?P<newfile>.+))?$",
        )
        .expect("valid regex")
    })
}

fn stats_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^(?P<added>\d+|-)[ \t]+(?P<removed>\d+|-)[ \t]+(?P<file>.+)$")
            .expect("valid regex")
    })
}

/// Files matching this pattern mark the commit as a documentation commit.
pub fn doc_file_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"(?i)(\.md$|\.rst$|\.docx?$|\.txt$|\.pdf$|\.jpe?g$|\.png$|\.svg$|\.img$|^docs/|^documentation/|^readme)",
        )
        .expect("valid regex")
    })
}

/// A header or trailer attribute on a commit.
///
/// Headers are single-valued; trailers accumulate. When a trailer's
/// canonical name collides with an existing header the trailer is stored
/// under `<Name>-Trailer` instead, so both survive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TrailerValue {
    Single(String),
    Many(Vec<String>),
}

/// One file entry of a commit, merged across raw action and numstat lines.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FileDelta {
    pub path: String,
    pub action: Option<String>,
    pub added: Option<i64>,
    pub removed: Option<i64>,
    pub modes: Vec<String>,
    pub indexes: Vec<String>,
    pub new_path: Option<String>,
}

/// A structured commit reconstructed from the log stream.
#[derive(Debug, Clone, Default)]
pub struct RawCommit {
    pub sha: String,
    pub parents: Vec<String>,
    pub refs: Vec<String>,
    pub branch: String,
    pub attrs: FxHashMap<String, TrailerValue>,
    pub message: Option<String>,
    pub files: Vec<FileDelta>,
    pub doc_commit: bool,
    pub empty_commit: bool,
}

impl RawCommit {
    /// Single-valued header, e.g. `Author` or `CommitDate`.
    pub fn header(&self, name: &str) -> Option<&str> {
        match self.attrs.get(name) {
            Some(TrailerValue::Single(v)) => Some(v.as_str()),
            _ => None,
        }
    }

    /// Accumulated trailer values under a canonical trailer name.
    pub fn trailer_values(&self, name: &str) -> &[String] {
        match self.attrs.get(name) {
            Some(TrailerValue::Many(v)) => v.as_slice(),
            _ => &[],
        }
    }
}

#[derive(Debug, Error)]
pub enum ParseError {
    #[error("expecting commit on line {line_no}: '{line}'")]
    ExpectedCommit {
        line_no: usize,
        line: String,
        context: Vec<String>,
    },
    #[error("invalid header format, line {line_no}: '{line}'")]
    InvalidHeader { line_no: usize, line: String },
    #[error("reading git log at line {line_no}: {source}")]
    Io {
        line_no: usize,
        #[source]
        source: std::io::Error,
    },
}

impl ParseError {
    /// Recent input lines preceding the error, oldest first.
    pub fn context(&self) -> &[String] {
        match self {
            ParseError::ExpectedCommit { context, .. } => context,
            _ => &[],
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Init,
    Commit,
    Header,
    Message,
    File,
}

#[derive(Debug, Default)]
struct Partial {
    sha: String,
    parents: Vec<String>,
    refs: Vec<String>,
    branch: String,
    attrs: FxHashMap<String, TrailerValue>,
    message: Option<String>,
    files: FxHashMap<String, FileDelta>,
    file_order: Vec<String>,
}

/// Streaming parser over `git log` lines.
///
/// Yields commits lazily in the order the log emits them; the stream is
/// expected to come from `--reverse --topo-order`, i.e. oldest first.
pub struct LogParser<R> {
    input: R,
    state: State,
    current: Option<Partial>,
    default_branch: String,
    line_no: usize,
    recent: VecDeque<String>,
    done: bool,
}

impl<R: BufRead> LogParser<R> {
    pub fn new(input: R, default_branch: impl Into<String>) -> Self {
        Self {
            input,
            state: State::Init,
            current: None,
            default_branch: default_branch.into(),
            line_no: 0,
            recent: VecDeque::with_capacity(RECENT_LINES),
            done: false,
        }
    }

    fn remember(&mut self, line: &str) {
        if self.recent.len() == RECENT_LINES {
            self.recent.pop_front();
        }
        self.recent.push_back(line.to_string());
    }

    /// Read one line, tolerating non-UTF-8 bytes in commit messages.
    fn read_line(&mut self) -> Result<Option<String>, ParseError> {
        let mut buf = Vec::new();
        let n = self
            .input
            .read_until(b'\n', &mut buf)
            .map_err(|source| ParseError::Io {
                line_no: self.line_no,
                source,
            })?;
        if n == 0 {
            return Ok(None);
        }
        self.line_no += 1;
        let mut line = String::from_utf8_lossy(&buf).into_owned();
        while line.ends_with('\n') || line.ends_with('\r') {
            line.pop();
        }
        Ok(Some(line))
    }

    fn parse_commit_line(&mut self, line: &str) -> Result<bool, ParseError> {
        let caps = match commit_re().captures(line) {
            Some(c) => c,
            None => {
                return Err(ParseError::ExpectedCommit {
                    line_no: self.line_no,
                    line: line.to_string(),
                    context: self.recent.iter().cloned().collect(),
                })
            }
        };
        let mut partial = Partial {
            sha: caps["commit"].to_string(),
            ..Default::default()
        };
        if let Some(parents) = caps.name("parents") {
            partial.parents = parents
                .as_str()
                .split_whitespace()
                .map(str::to_string)
                .collect();
        }
        if let Some(refs) = caps.name("refs") {
            partial.refs = refs
                .as_str()
                .split(',')
                .map(str::trim)
                .filter(|r| !r.is_empty())
                .map(str::to_string)
                .collect();
        }
        partial.branch = if partial.refs.is_empty() {
            self.default_branch.clone()
        } else {
            commit_branch(&partial.refs, &self.default_branch)
        };
        self.current = Some(partial);
        self.state = State::Header;
        Ok(true)
    }

    fn parse_header_line(&mut self, line: &str) -> Result<bool, ParseError> {
        if line.is_empty() {
            self.state = State::Message;
            return Ok(true);
        }
        let caps = match header_re().captures(line) {
            Some(c) => c,
            None => {
                return Err(ParseError::InvalidHeader {
                    line_no: self.line_no,
                    line: line.to_string(),
                })
            }
        };
        let partial = self.current.as_mut().expect("commit open in header state");
        if partial.attrs.len() < MAX_COMMIT_PROPERTIES {
            partial
                .attrs
                .insert(caps["name"].to_string(), TrailerValue::Single(caps["value"].to_string()));
        }
        Ok(true)
    }

    fn parse_message_line(&mut self, line: &str) -> bool {
        if line.is_empty() {
            self.state = State::File;
            return true;
        }
        let caps = match message_re().captures(line) {
            Some(c) => c,
            None => {
                self.state = State::File;
                return false;
            }
        };
        let msg = caps["msg"].to_string();
        let partial = self.current.as_mut().expect("commit open in message state");
        match &mut partial.message {
            Some(m) => {
                m.push('\n');
                m.push_str(&msg);
            }
            None => partial.message = Some(msg.clone()),
        }
        self.parse_trailer(&msg);
        true
    }

    fn parse_trailer(&mut self, msg: &str) {
        let caps = match header_re().captures(msg) {
            Some(c) => c,
            None => return,
        };
        let canonicals = match trailers::lookup(&caps["name"]) {
            Some(c) => c,
            None => return,
        };
        let value = caps["value"].to_string();
        let partial = self.current.as_mut().expect("commit open in message state");
        for canonical in canonicals {
            let mut key = canonical.as_str().to_string();
            if matches!(partial.attrs.get(&key), Some(TrailerValue::Single(_))) {
                // A header of the same name exists; keep the trailer too,
                // under a distinguishable key.
                key.push_str("-Trailer");
            }
            match partial
                .attrs
                .entry(key)
                .or_insert_with(|| TrailerValue::Many(Vec::new()))
            {
                TrailerValue::Many(values) => {
                    if !values.contains(&value) {
                        values.push(value.clone());
                    }
                }
                TrailerValue::Single(_) => {}
            }
        }
    }

    /// File state: raw action line, numstat line, blank, or next commit.
    /// Returns `(parsed, empty)`.
    fn parse_file_line(&mut self, line: &str) -> (bool, bool) {
        if line.is_empty() {
            self.state = State::Commit;
            return (true, false);
        }
        if let Some(caps) = action_re().captures(line) {
            self.parse_action(&caps);
            return (true, false);
        }
        if let Some(caps) = stats_re().captures(line) {
            self.parse_stats(&caps);
            return (true, false);
        }
        let empty = commit_re().is_match(line);
        if !empty {
            warn!("invalid file section format, line {}: '{}'", self.line_no, line);
        }
        self.state = State::Commit;
        (false, empty)
    }

    fn parse_action(&mut self, caps: &regex::Captures<'_>) {
        let raw_path = caps["file"].to_string();
        let path = previous_file_name(&raw_path);
        let new_path = caps.name("newfile").map(|m| m.as_str().to_string());
        // Renames and copies collapse onto the old path as modifications.
        let action = if path != raw_path || new_path.is_some() {
            "M".to_string()
        } else {
            caps["action"].to_string()
        };
        let partial = self.current.as_mut().expect("commit open in file state");
        let entry = file_entry(partial, &path);
        entry.modes = caps["modes"].split_whitespace().map(str::to_string).collect();
        entry.indexes = caps["indexes"]
            .split_whitespace()
            .map(str::to_string)
            .collect();
        entry.action = Some(action);
        entry.new_path = new_path;
    }

    fn parse_stats(&mut self, caps: &regex::Captures<'_>) {
        let path = previous_file_name(&caps["file"]);
        let added: i64 = caps["added"].parse().unwrap_or(0);
        let removed: i64 = caps["removed"].parse().unwrap_or(0);
        let partial = self.current.as_mut().expect("commit open in file state");
        let entry = file_entry(partial, &path);
        entry.added = Some(entry.added.unwrap_or(0) + added);
        entry.removed = Some(entry.removed.unwrap_or(0) + removed);
    }

    fn build_commit(&mut self, empty: bool) -> RawCommit {
        let partial = self.current.take().expect("commit open");
        let mut files: Vec<FileDelta> = Vec::with_capacity(partial.file_order.len());
        let mut paths = partial.file_order;
        paths.sort();
        let mut index = partial.files;
        let mut doc = false;
        for path in paths {
            if let Some(delta) = index.remove(&path) {
                if doc_file_re().is_match(&delta.path) {
                    doc = true;
                }
                files.push(delta);
            }
        }
        RawCommit {
            sha: partial.sha,
            parents: partial.parents,
            refs: partial.refs,
            branch: partial.branch,
            attrs: partial.attrs,
            message: partial.message,
            files,
            doc_commit: doc,
            empty_commit: empty,
        }
    }
}

fn file_entry<'a>(partial: &'a mut Partial, path: &str) -> &'a mut FileDelta {
    if !partial.files.contains_key(path) {
        partial.file_order.push(path.to_string());
        partial.files.insert(
            path.to_string(),
            FileDelta {
                path: path.to_string(),
                ..Default::default()
            },
        );
    }
    partial.files.get_mut(path).expect("just inserted")
}

/// Rewrite a renamed path to its pre-rename form.
///
/// `a/{old => new}/b` becomes `a/old/b`, and `old => new` becomes `old`, so
/// action and stat lines for the same rename land on one record.
pub fn previous_file_name(path: &str) -> String {
    if let (Some(open), Some(close)) = (path.find('{'), path.find('}')) {
        if let Some(arrow) = path[open..].find(" => ").map(|i| i + open) {
            if arrow < close {
                let mut out = String::with_capacity(path.len());
                out.push_str(&path[..open]);
                out.push_str(&path[open + 1..arrow]);
                out.push_str(&path[close + 1..]);
                return out;
            }
        }
    }
    if let Some((old, _new)) = path.split_once(" => ") {
        return old.to_string();
    }
    path.to_string()
}

/// Resolve the branch of a commit from its decorated refs.
///
/// `origin/` and `refs/heads/` prefixes are stripped; the last
/// non-default-branch head wins, then the last tag, then the default branch.
pub fn commit_branch(refs: &[String], default_branch: &str) -> String {
    let mut branch = String::new();
    let mut tag = String::new();
    for r in refs {
        let mut r = r.as_str();
        let is_tag = if let Some(rest) = r.strip_prefix("tag: ") {
            r = rest;
            true
        } else {
            false
        };
        if let Some((_, last)) = r.rsplit_once(" -> ") {
            r = last;
        }
        let r = r.replacen("origin/", "", 1).replacen("refs/heads/", "", 1);
        if is_tag {
            tag = r;
            continue;
        }
        if r == default_branch {
            continue;
        }
        branch = r;
    }
    if branch.is_empty() && !tag.is_empty() {
        branch = tag;
    }
    if branch.is_empty() {
        branch = default_branch.to_string();
    }
    branch
}

impl<R: BufRead> Iterator for LogParser<R> {
    type Item = Result<RawCommit, ParseError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        loop {
            let line = match self.read_line() {
                Ok(Some(line)) => line,
                Ok(None) => {
                    self.done = true;
                    return self.current.is_some().then(|| Ok(self.build_commit(false)));
                }
                Err(e) => {
                    self.done = true;
                    return Some(Err(e));
                }
            };
            self.remember(&line);

            loop {
                let (parsed, empty) = match self.state {
                    State::Init => {
                        self.state = State::Commit;
                        (line.is_empty(), false)
                    }
                    State::Commit => match self.parse_commit_line(&line) {
                        Ok(parsed) => (parsed, false),
                        Err(e) => {
                            self.done = true;
                            return Some(Err(e));
                        }
                    },
                    State::Header => match self.parse_header_line(&line) {
                        Ok(parsed) => (parsed, false),
                        Err(e) => {
                            self.done = true;
                            return Some(Err(e));
                        }
                    },
                    State::Message => (self.parse_message_line(&line), false),
                    State::File => self.parse_file_line(&line),
                };

                if self.state == State::Commit && self.current.is_some() {
                    let commit = self.build_commit(empty);
                    if empty {
                        // The line that closed the previous commit opens the
                        // next one; consume it before yielding.
                        if let Err(e) = self.parse_commit_line(&line) {
                            self.done = true;
                            return Some(Err(e));
                        }
                    }
                    return Some(Ok(commit));
                }
                if parsed {
                    break;
                }
            }
        }
    }
}
