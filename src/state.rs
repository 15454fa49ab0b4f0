use std::collections::BTreeMap;

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::MirrorError;
use crate::store::{Storage, read_bytes, write_bytes};

/// Per-dataset record of mirrored files: variable -> filename -> ISO-8601
/// time of the successful transfer. A listed file is never fetched again.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct IncrementalState {
    variables: BTreeMap<String, BTreeMap<String, String>>,
}

impl IncrementalState {
    /// Missing document => empty state. A document that exists but cannot be
    /// read or parsed is an error: saving over it would forget every entry.
    pub fn load(storage: &dyn Storage, key: &str) -> Result<Self, MirrorError> {
        if !storage.exists(key)? {
            debug!(%key, "no incremental state yet");
            return Ok(Self::default());
        }
        let raw = read_bytes(storage, key)?;
        serde_json::from_slice(&raw).map_err(|err| MirrorError::StateParse {
            key: key.to_string(),
            message: err.to_string(),
        })
    }

    /// Overwrites the whole document; single writer per dataset is assumed.
    pub fn save(&self, storage: &dyn Storage, key: &str) -> Result<(), MirrorError> {
        let payload =
            serde_json::to_vec_pretty(self).map_err(|err| MirrorError::Storage(err.to_string()))?;
        write_bytes(storage, key, &payload)?;
        debug!(%key, files = self.len(), "saved incremental state");
        Ok(())
    }

    pub fn already_done(&self, variable: &str, filename: &str) -> bool {
        self.variables
            .get(variable)
            .is_some_and(|files| files.contains_key(filename))
    }

    pub fn mark_done(&mut self, variable: &str, filename: &str, at: DateTime<Utc>) {
        self.variables
            .entry(variable.to_string())
            .or_default()
            .insert(
                filename.to_string(),
                at.to_rfc3339_opts(SecondsFormat::Micros, false),
            );
    }

    /// Records that `variable` was visited, so it shows up (possibly empty)
    /// in the persisted document.
    pub fn touch_variable(&mut self, variable: &str) {
        self.variables.entry(variable.to_string()).or_default();
    }

    pub fn completed_at(&self, variable: &str, filename: &str) -> Option<&str> {
        self.variables
            .get(variable)
            .and_then(|files| files.get(filename))
            .map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.variables.values().map(BTreeMap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mark_and_query() {
        let mut state = IncrementalState::default();
        state.touch_variable("clct");
        assert!(state.is_empty());
        let at = DateTime::parse_from_rfc3339("2024-01-01T03:00:00Z")
            .unwrap()
            .with_timezone(&Utc);
        state.mark_done("t_2m", "a.grib2.bz2", at);
        assert!(state.already_done("t_2m", "a.grib2.bz2"));
        assert!(!state.already_done("clct", "a.grib2.bz2"));
        assert_eq!(
            state.completed_at("t_2m", "a.grib2.bz2"),
            Some("2024-01-01T03:00:00.000000+00:00")
        );
    }

    #[test]
    fn serializes_as_nested_map() {
        let mut state = IncrementalState::default();
        state.touch_variable("clct");
        let json = serde_json::to_value(&state).unwrap();
        assert_eq!(json, serde_json::json!({ "clct": {} }));
    }
}
