#![forbid(unsafe_code)]

use crate::hierarchy;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Previous and current value lists of one attribute.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttributeChange {
    #[serde(default, alias = "backup_values")]
    pub previous: Vec<String>,
    #[serde(default, alias = "ldap_values")]
    pub current: Vec<String>,
}

/// One change-record of a directory object.
///
/// `depth` is derived from `name` when the record is decoded and takes no part
/// in equality.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Record {
    pub name: String,
    pub object_type: String,
    pub change_type: String,
    #[serde(default)]
    pub depth: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attributes: Option<BTreeMap<String, AttributeChange>>,
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub changed_attributes: BTreeSet<String>,
}

impl PartialEq for Record {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
            && self.object_type == other.object_type
            && self.change_type == other.change_type
            && self.attributes == other.attributes
            && self.changed_attributes == other.changed_attributes
    }
}

impl Eq for Record {}

#[derive(Debug, thiserror::Error)]
pub enum RecordError {
    #[error("invalid record json: {0}")]
    Json(#[from] serde_json::Error),
    #[error("record name must not be empty")]
    EmptyName,
}

/// Wire shape of a record element. Accepts the generator's field names.
#[derive(Deserialize)]
struct RecordPayload {
    #[serde(alias = "obj_name")]
    name: String,
    #[serde(alias = "obj_type")]
    object_type: String,
    change_type: String,
    #[serde(default, alias = "all_attributes")]
    attributes: Option<BTreeMap<String, AttributeChange>>,
    #[serde(default)]
    changed_attributes: Option<ChangedAttributes>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum ChangedAttributes {
    Names(Vec<String>),
    Flags(BTreeMap<String, serde_json::Value>),
}

impl ChangedAttributes {
    fn into_names(self) -> BTreeSet<String> {
        match self {
            Self::Names(names) => names.into_iter().collect(),
            Self::Flags(flags) => flags.into_keys().collect(),
        }
    }
}

impl Record {
    pub fn new(
        name: impl Into<String>,
        object_type: impl Into<String>,
        change_type: impl Into<String>,
    ) -> Self {
        let name = name.into();
        let depth = hierarchy::depth_of(&name);
        Self {
            name,
            object_type: object_type.into(),
            change_type: change_type.into(),
            depth,
            attributes: None,
            changed_attributes: BTreeSet::new(),
        }
    }

    /// Decodes one array element of the bulk payload.
    pub fn decode(bytes: &[u8]) -> Result<Self, RecordError> {
        let payload: RecordPayload = serde_json::from_slice(bytes)?;
        if payload.name.trim().is_empty() {
            return Err(RecordError::EmptyName);
        }
        let depth = hierarchy::depth_of(&payload.name);
        Ok(Self {
            name: payload.name,
            object_type: payload.object_type,
            change_type: payload.change_type,
            depth,
            attributes: payload.attributes,
            changed_attributes: payload
                .changed_attributes
                .map(ChangedAttributes::into_names)
                .unwrap_or_default(),
        })
    }

    pub fn ancestors(&self) -> Vec<String> {
        hierarchy::ancestors(&self.name)
    }

    /// Copy without the attribute payload, as served by window scans.
    pub fn summary(&self) -> Self {
        Self {
            name: self.name.clone(),
            object_type: self.object_type.clone(),
            change_type: self.change_type.clone(),
            depth: self.depth,
            attributes: None,
            changed_attributes: BTreeSet::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decode_accepts_generator_field_names() {
        let raw = br#"{
            "obj_name": "uid=u1,cn=users,cn=accounts,dc=granulex,dc=test",
            "change_type": "changed",
            "obj_type": "person",
            "all_attributes": {"l": {"backup_values": ["A"], "ldap_values": ["B"]}},
            "changed_attributes": {"l": "0"}
        }"#;
        let record = Record::decode(raw).expect("decode");
        assert_eq!(record.object_type, "person");
        assert_eq!(record.depth, 3);
        let attributes = record.attributes.as_ref().expect("attributes");
        assert_eq!(attributes["l"].previous, vec!["A".to_string()]);
        assert_eq!(attributes["l"].current, vec!["B".to_string()]);
        assert!(record.changed_attributes.contains("l"));
    }

    #[test]
    fn decode_rejects_missing_fields_and_blank_names() {
        assert!(matches!(
            Record::decode(br#"{"name":"a","change_type":"moved"}"#),
            Err(RecordError::Json(_))
        ));
        assert!(matches!(
            Record::decode(br#"{"name":"  ","object_type":"group","change_type":"moved"}"#),
            Err(RecordError::EmptyName)
        ));
    }

    #[test]
    fn equality_ignores_depth() {
        let mut left = Record::new("cn=a,cn=b", "group", "moved");
        let right = left.clone();
        left.depth = 99;
        assert_eq!(left, right);
    }
}
