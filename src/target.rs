//! Work descriptors handed to the orchestrator.
//!
//! A [`Target`] names one thread, one catalog, or a whole board. Targets are
//! immutable once built; the API client and the path planner only read them.
//! [`parse_target`] turns a board URL into a target and is the only place
//! that looks at URL syntax.

use std::fmt;

use thiserror::Error;
use tracing::debug;
use url::Url;

/// Hostnames (and their subdomains) that serve board pages.
const BOARD_HOSTS: &[&str] = &["4chan.org", "4channel.org"];

/// Kind of unit of work.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TargetKind {
    /// A single thread, identified by board and thread number.
    Thread,
    /// The catalog page of a board.
    Catalog,
    /// A board front page; processed like a catalog with a smaller thread limit.
    Board,
}

impl fmt::Display for TargetKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Thread => write!(f, "thread"),
            Self::Catalog => write!(f, "catalog"),
            Self::Board => write!(f, "board"),
        }
    }
}

/// One unit of work submitted to the orchestrator.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Target {
    kind: TargetKind,
    board: String,
    id: Option<u64>,
}

impl Target {
    /// Creates a thread target.
    #[must_use]
    pub fn thread(board: impl Into<String>, id: u64) -> Self {
        Self {
            kind: TargetKind::Thread,
            board: board.into(),
            id: Some(id),
        }
    }

    /// Creates a catalog target.
    #[must_use]
    pub fn catalog(board: impl Into<String>) -> Self {
        Self {
            kind: TargetKind::Catalog,
            board: board.into(),
            id: None,
        }
    }

    /// Creates a board target.
    #[must_use]
    pub fn board(board: impl Into<String>) -> Self {
        Self {
            kind: TargetKind::Board,
            board: board.into(),
            id: None,
        }
    }

    #[must_use]
    pub fn kind(&self) -> TargetKind {
        self.kind
    }

    /// Board code, e.g. `g`.
    #[must_use]
    pub fn board_code(&self) -> &str {
        &self.board
    }

    /// Thread number for thread targets.
    #[must_use]
    pub fn id(&self) -> Option<u64> {
        self.id
    }

    /// Unsanitized output folder name: `<board>-<id>`, `<board>-catalog` or `<board>`.
    #[must_use]
    pub fn folder_name(&self) -> String {
        match (self.kind, self.id) {
            (TargetKind::Thread, Some(id)) => format!("{}-{id}", self.board),
            (TargetKind::Catalog, _) => format!("{}-catalog", self.board),
            _ => self.board.clone(),
        }
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.kind, self.id) {
            (TargetKind::Thread, Some(id)) => write!(f, "/{}/thread/{id}", self.board),
            (TargetKind::Catalog, _) => write!(f, "/{}/catalog", self.board),
            _ => write!(f, "/{}/", self.board),
        }
    }
}

/// Errors produced while turning user input into a [`Target`].
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TargetParseError {
    /// The input is not a parseable URL.
    #[error("invalid URL: {input}")]
    InvalidUrl {
        /// The rejected input.
        input: String,
    },

    /// The URL does not point at a supported board host.
    #[error("unsupported host '{host}' in {input}")]
    UnsupportedHost {
        /// The rejected host.
        host: String,
        /// The rejected input.
        input: String,
    },

    /// The URL path has no board segment.
    #[error("no board found in {input}")]
    MissingBoard {
        /// The rejected input.
        input: String,
    },
}

/// Parses a board URL into a [`Target`].
///
/// Accepts thread URLs (`/g/thread/123`), catalog URLs (`/g/catalog`) and
/// board URLs (`/g/`). The scheme may be omitted. Hosts that merely contain
/// a board host as a substring are rejected.
///
/// # Errors
///
/// Returns [`TargetParseError`] when the input is not a URL, is not on a
/// board host, or has no board segment.
///
/// # Examples
///
/// ```
/// use chanfetch_core::{TargetKind, parse_target};
///
/// let target = parse_target("https://boards.4chan.org/g/thread/12345678#p1").unwrap();
/// assert_eq!(target.kind(), TargetKind::Thread);
/// assert_eq!(target.id(), Some(12345678));
/// ```
pub fn parse_target(input: &str) -> Result<Target, TargetParseError> {
    let trimmed = input.trim();
    let with_scheme = if trimmed.starts_with("http://") || trimmed.starts_with("https://") {
        trimmed.to_string()
    } else {
        format!("https://{trimmed}")
    };

    let url = Url::parse(&with_scheme).map_err(|_| TargetParseError::InvalidUrl {
        input: trimmed.to_string(),
    })?;
    let host = url.host_str().unwrap_or_default().to_ascii_lowercase();
    let supported = BOARD_HOSTS
        .iter()
        .any(|board_host| host == *board_host || host.ends_with(&format!(".{board_host}")));
    if !supported {
        return Err(TargetParseError::UnsupportedHost {
            host,
            input: trimmed.to_string(),
        });
    }

    let segments: Vec<&str> = url
        .path_segments()
        .map(|segments| segments.filter(|s| !s.is_empty()).collect())
        .unwrap_or_default();
    let Some(board) = segments.first() else {
        return Err(TargetParseError::MissingBoard {
            input: trimmed.to_string(),
        });
    };

    let target = match segments.get(1..) {
        Some(["thread", id, ..]) => match id.parse::<u64>() {
            Ok(id) => Target::thread(*board, id),
            Err(_) => Target::board(*board),
        },
        Some(["catalog", ..]) => Target::catalog(*board),
        _ => Target::board(*board),
    };
    debug!(%target, "parsed target");
    Ok(target)
}
