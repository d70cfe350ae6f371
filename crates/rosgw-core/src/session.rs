//! Device capability boundary
//!
//! The gateway does not speak the device wire protocol itself. A transport
//! implementation provides a [`Dialer`] that performs connect + login and
//! yields a [`DeviceSession`], which can run synchronous commands and open
//! continuous subscriptions ([`Listener`]).
//!
//! `run` and `listen` must be callable concurrently on the same session:
//! the connection layer serializes commands itself but never routes
//! subscriptions through that serialization.

use std::collections::HashMap;
use std::fmt;
use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use futures::Stream;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

// =============================================================================
// Commands and replies
// =============================================================================

/// A device command: a path plus ordered argument words
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    path: String,
    words: Vec<String>,
}

impl Command {
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            words: Vec::new(),
        }
    }

    /// Append an attribute word `=key=value`
    pub fn attr(mut self, key: &str, value: impl AsRef<str>) -> Self {
        self.words.push(format!("={}={}", key, value.as_ref()));
        self
    }

    /// Append a query word `?key=value`
    pub fn query(mut self, key: &str, value: impl AsRef<str>) -> Self {
        self.words.push(format!("?{}={}", key, value.as_ref()));
        self
    }

    /// Restrict the returned properties
    pub fn proplist(self, props: &[&str]) -> Self {
        self.attr(".proplist", props.join(","))
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn words(&self) -> &[String] {
        &self.words
    }

    /// Value of attribute word `=key=...`, if present
    pub fn attr_value(&self, key: &str) -> Option<&str> {
        let prefix = format!("={}=", key);
        self.words
            .iter()
            .find_map(|w| w.strip_prefix(prefix.as_str()))
    }

    /// Value of query word `?key=...`, if present
    pub fn query_value(&self, key: &str) -> Option<&str> {
        let prefix = format!("?{}=", key);
        self.words
            .iter()
            .find_map(|w| w.strip_prefix(prefix.as_str()))
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.path)?;
        for word in &self.words {
            write!(f, " {}", word)?;
        }
        Ok(())
    }
}

/// Reply sentence type
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SentenceKind {
    /// Data record
    Re,
    /// Command finished
    Done,
    /// Device-reported error; the session stays usable
    Trap,
    /// Session-terminating error
    Fatal,
    /// Any other reply word
    Other(String),
}

/// One reply record from the device
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sentence {
    pub kind: SentenceKind,
    pub attrs: HashMap<String, String>,
}

impl Sentence {
    pub fn new(kind: SentenceKind) -> Self {
        Self {
            kind,
            attrs: HashMap::new(),
        }
    }

    pub fn re<K, V>(attrs: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            kind: SentenceKind::Re,
            attrs: attrs
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }

    pub fn done() -> Self {
        Self::new(SentenceKind::Done)
    }

    pub fn trap(message: impl Into<String>) -> Self {
        let mut sentence = Self::new(SentenceKind::Trap);
        sentence.attrs.insert("message".into(), message.into());
        sentence
    }

    pub fn fatal(message: impl Into<String>) -> Self {
        let mut sentence = Self::new(SentenceKind::Fatal);
        sentence.attrs.insert("message".into(), message.into());
        sentence
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.attrs.get(key).map(String::as_str)
    }

    pub fn message(&self) -> &str {
        self.get("message").unwrap_or("")
    }
}

/// Sentences produced by a synchronous command
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Reply {
    pub sentences: Vec<Sentence>,
}

impl Reply {
    pub fn new(sentences: Vec<Sentence>) -> Self {
        Self { sentences }
    }

    /// Data records in device order
    pub fn records(&self) -> impl Iterator<Item = &HashMap<String, String>> {
        self.sentences
            .iter()
            .filter(|s| s.kind == SentenceKind::Re)
            .map(|s| &s.attrs)
    }

    /// Message of the first trap, if the command failed on the device
    pub fn trap(&self) -> Option<&str> {
        self.sentences
            .iter()
            .find(|s| s.kind == SentenceKind::Trap)
            .map(Sentence::message)
    }
}

// =============================================================================
// Subscriptions
// =============================================================================

/// Boxed sequence of sentences produced by a continuous command
pub type SentenceStream = Pin<Box<dyn Stream<Item = Sentence> + Send>>;

/// A continuous subscription: a lazy sequence of sentences plus the token
/// that stops it
///
/// Cancelling the token ends the stream; implementations also stop the
/// device-side command.
pub struct Listener {
    pub sentences: SentenceStream,
    cancel: CancellationToken,
}

impl Listener {
    pub fn new(sentences: SentenceStream, cancel: CancellationToken) -> Self {
        Self { sentences, cancel }
    }

    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }
}

impl fmt::Debug for Listener {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Listener")
            .field("cancelled", &self.cancel.is_cancelled())
            .finish()
    }
}

// =============================================================================
// Session capability
// =============================================================================

/// Errors raised by a device transport
#[derive(Debug, Clone, Error)]
pub enum SessionError {
    /// Connect or I/O failure
    #[error("transport error: {0}")]
    Transport(String),

    /// Login rejected
    #[error("authentication failed: {0}")]
    Auth(String),

    /// Device reported an error for the command
    #[error("{message}")]
    Trap { message: String },

    /// Session was closed
    #[error("session closed")]
    Closed,
}

/// Where and how to dial a device
#[derive(Clone)]
pub struct DialTarget {
    /// `host:port`
    pub address: String,
    pub username: String,
    pub password: String,
}

impl fmt::Debug for DialTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DialTarget")
            .field("address", &self.address)
            .field("username", &self.username)
            .finish_non_exhaustive()
    }
}

/// One authenticated channel to a device
#[async_trait]
pub trait DeviceSession: Send + Sync {
    /// Run a command to completion
    ///
    /// A device-side failure is returned as [`SessionError::Trap`].
    async fn run(&self, command: &Command) -> Result<Reply, SessionError>;

    /// Open a continuous subscription
    ///
    /// Fails with [`SessionError::Trap`] if the device rejects the command
    /// up front.
    async fn listen(&self, command: &Command) -> Result<Listener, SessionError>;

    /// Close the channel; outstanding listeners end
    async fn close(&self);
}

/// Establishes authenticated sessions
#[async_trait]
pub trait Dialer: Send + Sync {
    /// Connect and log in
    async fn dial(&self, target: &DialTarget) -> Result<Arc<dyn DeviceSession>, SessionError>;
}
