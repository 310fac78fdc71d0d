//! Equality-based label selectors (`k=v`, `k==v`, `k!=v`, `k`, `!k`).

use std::collections::BTreeMap;

use crate::error::{StoreError, StoreResult};

#[derive(Debug, Clone, PartialEq, Eq)]
enum Requirement {
    Equals(String, String),
    NotEquals(String, String),
    Exists(String),
    NotExists(String),
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LabelSelector {
    reqs: Vec<Requirement>,
}

impl LabelSelector {
    pub fn parse(s: &str) -> StoreResult<Self> {
        let mut reqs = Vec::new();
        for raw in s.split(',') {
            let part = raw.trim();
            if part.is_empty() {
                continue;
            }
            let req = if let Some((k, v)) = part.split_once("!=") {
                Requirement::NotEquals(key(k, s)?, v.trim().to_string())
            } else if let Some((k, v)) = part.split_once("==") {
                Requirement::Equals(key(k, s)?, v.trim().to_string())
            } else if let Some((k, v)) = part.split_once('=') {
                Requirement::Equals(key(k, s)?, v.trim().to_string())
            } else if let Some(k) = part.strip_prefix('!') {
                Requirement::NotExists(key(k, s)?)
            } else {
                Requirement::Exists(key(part, s)?)
            };
            reqs.push(req);
        }
        Ok(Self { reqs })
    }

    /// Parse an optional selector; `None` selects everything.
    pub fn from_option(s: Option<&str>) -> StoreResult<Self> {
        match s {
            Some(s) => Self::parse(s),
            None => Ok(Self::default()),
        }
    }

    pub fn is_empty(&self) -> bool { self.reqs.is_empty() }

    pub fn matches(&self, labels: &BTreeMap<String, String>) -> bool {
        self.reqs.iter().all(|r| match r {
            Requirement::Equals(k, v) => labels.get(k) == Some(v),
            Requirement::NotEquals(k, v) => labels.get(k) != Some(v),
            Requirement::Exists(k) => labels.contains_key(k),
            Requirement::NotExists(k) => !labels.contains_key(k),
        })
    }
}

fn key(k: &str, whole: &str) -> StoreResult<String> {
    let k = k.trim();
    if k.is_empty() || k.contains(char::is_whitespace) {
        return Err(StoreError::Invalid(format!("invalid label selector {:?}", whole)));
    }
    Ok(k.to_string())
}
