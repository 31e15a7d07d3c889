//! Listing of recorded resources for `jumpbox status`.

use std::fmt;

use crate::state::{ResourceKind, StateError, StateStore};

/// One row of the status listing.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct StatusLine {
    /// Record kind.
    pub kind: ResourceKind,
    /// Record name.
    pub name: String,
    /// Extracted identifier, or why extraction failed.
    pub identifier: Result<String, String>,
}

impl fmt::Display for StatusLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let id = match &self.identifier {
            Ok(id) => id.clone(),
            Err(reason) => format!("<unreadable: {reason}>"),
        };
        write!(f, "{:<28} {:<18} {id}", self.kind.as_str(), self.name)
    }
}

/// Builds one line per record, sorted by kind then name.
///
/// # Errors
///
/// Returns [`StateError`] when the store cannot be read.
pub fn status_lines(store: &StateStore) -> Result<Vec<StatusLine>, StateError> {
    Ok(store
        .records()?
        .into_iter()
        .map(|record| StatusLine {
            identifier: record.identifier().map_err(|err| err.to_string()),
            kind: record.kind,
            name: record.name,
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::{ResourceKey, ResourceRecord};
    use crate::tag::InstallationTag;
    use camino::Utf8PathBuf;
    use serde_json::json;
    use tempfile::TempDir;

    #[test]
    fn lists_identifiers_and_unreadable_records() {
        let tmp = TempDir::new().expect("tempdir");
        let path = Utf8PathBuf::from_path_buf(tmp.path().join("demo")).expect("utf8 path");
        let tag = InstallationTag::new("demo").expect("tag");
        let store = StateStore::open(&path, &tag).expect("store");
        store
            .save(&ResourceRecord::new(
                &ResourceKey::new(ResourceKind::Vpc, "main"),
                json!({"Vpc": {"VpcId": "vpc-1"}}),
            ))
            .expect("save");
        store
            .save(&ResourceRecord::new(
                &ResourceKey::new(ResourceKind::Subnet, "public-1"),
                json!({"Subnet": {}}),
            ))
            .expect("save");

        let lines = status_lines(&store).expect("status");

        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0].kind, ResourceKind::Vpc);
        assert_eq!(lines[0].identifier.as_deref(), Ok("vpc-1"));
        assert!(lines[1].identifier.is_err());
        assert!(lines[0].to_string().ends_with("vpc-1"));
        assert!(lines[1].to_string().contains("<unreadable:"));
    }
}
