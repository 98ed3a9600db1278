//! Extraction of Perforce changelist numbers from imported commit messages.
//!
//! Import tools append an annotation to every commit they create:
//!
//! ```text
//! [git-p4: depot-paths = "//depot/main/": change = 83725]
//! [p4-fusion: depot-paths = "//depot/main/": change = 83725]
//! ```
//!
//! The annotation is searched for anywhere in the message, so it parses the
//! same whether or not a blank line separates it from the subject.

use regex::Regex;
use std::sync::LazyLock;

use crate::error::{AppError, Result};

static P4_ANNOTATION: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r#"\[(?:git-p4|p4-fusion): (?:depot-paths = "(?P<paths>[^"]*)": )?change = (?P<change>\d+)(?:: [^\]]*)?\]"#,
    )
    .expect("annotation pattern is valid")
});

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct P4Annotation {
    pub depot_paths: Option<String>,
    pub change: i64,
}

/// Parse the import annotation of `commit`'s message.
pub fn parse_annotation(commit: &str, message: &str) -> Result<P4Annotation> {
    let caps = P4_ANNOTATION.captures(message).ok_or_else(|| {
        AppError::changelist_parse(commit, format!("no changelist annotation in {:?}", message))
    })?;

    let change = caps["change"].parse::<i64>().map_err(|e| {
        AppError::changelist_parse(commit, format!("change {:?}: {}", &caps["change"], e))
    })?;

    Ok(P4Annotation {
        depot_paths: caps.name("paths").map(|m| m.as_str().to_string()),
        change,
    })
}

/// Changelist number of `commit`, see [`parse_annotation`].
pub fn parse_changelist_id(commit: &str, message: &str) -> Result<i64> {
    parse_annotation(commit, message).map(|a| a.change)
}
