use serde::{Deserialize, Serialize};

/// A shared note. The title is the identity key everywhere: primary key in
/// the local store and resource path segment on the remote service.
///
/// For a fixed title, two notes are comparable only by `version`; equal
/// versions mean "no newer information", not necessarily identical content.
/// All three fields are required on the wire — a payload missing any of them
/// is malformed, never a silently-defaulted note.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Note {
    pub title: String,
    pub content: String,
    /// Logical clock for this title. Defaults to 0 for a newly created,
    /// never-synced note so an existing remote copy always wins the first
    /// merge against it.
    pub version: u64,
}

impl Note {
    /// A fresh, never-synced note at version 0.
    pub fn new(title: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            content: content.into(),
            version: 0,
        }
    }

    /// Reconstruct a note at a known version (from storage or the network).
    pub fn with_version(
        title: impl Into<String>,
        content: impl Into<String>,
        version: u64,
    ) -> Self {
        Self {
            title: title.into(),
            content: content.into(),
            version,
        }
    }

    pub fn from_json(json: &str) -> serde_json::Result<Self> {
        serde_json::from_str(json)
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_note_starts_at_version_zero() {
        let note = Note::new("Groceries", "Milk");
        assert_eq!(note.version, 0);
    }

    #[test]
    fn test_json_round_trip() {
        let note = Note::with_version("Groceries", "Milk\nEggs", 7);
        let json = note.to_json().expect("Failed to encode note");
        let decoded = Note::from_json(&json).expect("Failed to decode note");
        assert_eq!(decoded, note);
    }

    #[test]
    fn test_round_trip_empty_content_and_spaced_title() {
        let note = Note::with_version("My Shopping List", "", 3);
        let json = note.to_json().expect("Failed to encode note");
        assert_eq!(Note::from_json(&json).expect("Failed to decode note"), note);
    }

    #[test]
    fn test_version_serialized_as_number() {
        let note = Note::with_version("A", "b", 12);
        let value: serde_json::Value =
            serde_json::from_str(&note.to_json().unwrap()).unwrap();
        assert!(value["version"].is_u64());
        assert_eq!(value["version"], 12);
    }

    #[test]
    fn test_missing_field_is_malformed() {
        // No field is defaulted: dropping any of them must fail the decode.
        assert!(Note::from_json(r#"{"title":"A","content":"b"}"#).is_err());
        assert!(Note::from_json(r#"{"title":"A","version":1}"#).is_err());
        assert!(Note::from_json(r#"{"content":"b","version":1}"#).is_err());
    }

    #[test]
    fn test_version_as_string_is_malformed() {
        assert!(Note::from_json(r#"{"title":"A","content":"b","version":"1"}"#).is_err());
    }
}
