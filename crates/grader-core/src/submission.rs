//! Submission identity records
//!
//! Submissions are created by the import collaborator (LMS exports, version
//! control hosting) and are read-only from the grading core's perspective.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A single code submission
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Submission {
    /// Unique key derived from a normalized file or user name
    pub key: String,

    /// Storage location of the submitted source tree
    pub local_path: PathBuf,

    /// Arbitrary identity attributes (student name, id, groups...)
    #[serde(default)]
    pub info: Map<String, Value>,
}

impl Submission {
    /// Create a new submission
    pub fn new(key: impl Into<String>, local_path: impl Into<PathBuf>) -> Self {
        Self {
            key: key.into(),
            local_path: local_path.into(),
            info: Map::new(),
        }
    }

    /// Attach an identity attribute
    pub fn with_info(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.info.insert(key.into(), value.into());
        self
    }

    /// Source tree location
    pub fn path(&self) -> &Path {
        &self.local_path
    }

    /// String attribute lookup
    pub fn info_str(&self, key: &str) -> Option<&str> {
        self.info.get(key).and_then(Value::as_str)
    }

    pub fn student_name(&self) -> Option<&str> {
        self.info_str("student_name")
    }

    pub fn student_surname(&self) -> Option<&str> {
        self.info_str("student_surname")
    }

    /// Student id, accepting both string and numeric attributes
    pub fn student_id(&self) -> Option<String> {
        match self.info.get("student_id")? {
            Value::String(id) => Some(id.clone()),
            Value::Number(id) => Some(id.to_string()),
            _ => None,
        }
    }

    /// Group memberships (`student_groups`, falling back to `groups`)
    pub fn groups(&self) -> Vec<String> {
        self.info
            .get("student_groups")
            .or_else(|| self.info.get("groups"))
            .and_then(Value::as_array)
            .map(|groups| {
                groups
                    .iter()
                    .filter_map(Value::as_str)
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Build a submission key from a raw file name.
    ///
    /// Archive exports often store accented capitals decomposed (base letter
    /// followed by a combining mark); those are composed back and apostrophes
    /// are dropped.
    pub fn normalize_key(name: &str) -> String {
        let mut key = String::with_capacity(name.len());
        let mut chars = name.chars().peekable();
        while let Some(c) = chars.next() {
            if c == '\'' {
                continue;
            }
            match chars.peek().and_then(|&mark| compose(c, mark)) {
                Some(composed) => {
                    key.push(composed);
                    chars.next();
                }
                None => key.push(c),
            }
        }
        key
    }
}

fn compose(base: char, mark: char) -> Option<char> {
    let composed = match (base, mark) {
        ('A', '\u{300}') => 'À',
        ('E', '\u{300}') => 'È',
        ('I', '\u{300}') => 'Ì',
        ('O', '\u{300}') => 'Ò',
        ('U', '\u{300}') => 'Ù',
        ('A', '\u{301}') => 'Á',
        ('E', '\u{301}') => 'É',
        ('I', '\u{301}') => 'Í',
        ('O', '\u{301}') => 'Ó',
        ('U', '\u{301}') => 'Ú',
        ('A', '\u{308}') => 'Ä',
        ('E', '\u{308}') => 'Ë',
        ('I', '\u{308}') => 'Ï',
        ('O', '\u{308}') => 'Ö',
        ('U', '\u{308}') => 'Ü',
        ('N', '\u{303}') => 'Ñ',
        _ => return None,
    };
    Some(composed)
}
