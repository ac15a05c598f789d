//! Git plumbing: subprocess invocation, log parsing, author parsing
//!
//! The engine never links a git library; history is read by spawning the
//! `git` binary (pinned to `LANG=C, PAGER=""`) and parsing its output with
//! the state-machine parser in [`parser`].

pub mod authors;
pub mod parser;
pub mod repo;

pub use authors::{author_set, parse_author, AuthorIdent};
pub use parser::{FileDelta, LogParser, ParseError, RawCommit, TrailerValue};
pub use repo::GitRepo;
