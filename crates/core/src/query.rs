#![forbid(unsafe_code)]

use crate::record::Record;
use serde::{Deserialize, Serialize};

pub const DEFAULT_WINDOW_LIMIT: usize = 10;
pub const MAX_WINDOW_LIMIT: usize = 1000;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortColumn {
    #[default]
    #[serde(alias = "obj_name")]
    Name,
    #[serde(alias = "obj_type")]
    ObjectType,
    ChangeType,
}

impl SortColumn {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Name => "name",
            Self::ObjectType => "object_type",
            Self::ChangeType => "change_type",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim() {
            "name" | "obj_name" => Some(Self::Name),
            "object_type" | "obj_type" => Some(Self::ObjectType),
            "change_type" => Some(Self::ChangeType),
            _ => None,
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScanDirection {
    #[default]
    #[serde(alias = "next")]
    Forward,
    #[serde(alias = "prev")]
    Backward,
}

impl ScanDirection {
    pub fn flip(self) -> Self {
        match self {
            Self::Forward => Self::Backward,
            Self::Backward => Self::Forward,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Forward => "forward",
            Self::Backward => "backward",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim() {
            "forward" | "next" => Some(Self::Forward),
            "backward" | "prev" => Some(Self::Backward),
            _ => None,
        }
    }
}

/// Columns that carry a composite `(column, name)` index and may be filtered on.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FilterField {
    #[serde(alias = "obj_type")]
    ObjectType,
    ChangeType,
}

impl FilterField {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::ObjectType => "object_type",
            Self::ChangeType => "change_type",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim() {
            "object_type" | "obj_type" => Some(Self::ObjectType),
            "change_type" => Some(Self::ChangeType),
            _ => None,
        }
    }

    pub fn value_of(self, record: &Record) -> &str {
        match self {
            Self::ObjectType => &record.object_type,
            Self::ChangeType => &record.change_type,
        }
    }
}

/// Single equality predicate over an indexed column.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Filter {
    pub field: FilterField,
    pub value: String,
}

impl Filter {
    pub fn new(field: FilterField, value: impl Into<String>) -> Self {
        Self {
            field,
            value: value.into(),
        }
    }

    pub fn matches(&self, record: &Record) -> bool {
        self.field.value_of(record) == self.value
    }
}

fn default_limit() -> usize {
    DEFAULT_WINDOW_LIMIT
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WindowRequest {
    #[serde(default)]
    pub sort_by: SortColumn,
    #[serde(default)]
    pub direction: ScanDirection,
    #[serde(default = "default_limit")]
    pub limit: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filter: Option<Filter>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub previous_window: Option<Vec<Record>>,
    #[serde(default)]
    pub invert: bool,
}

impl Default for WindowRequest {
    fn default() -> Self {
        Self {
            sort_by: SortColumn::Name,
            direction: ScanDirection::Forward,
            limit: DEFAULT_WINDOW_LIMIT,
            filter: None,
            previous_window: None,
            invert: false,
        }
    }
}

impl WindowRequest {
    pub fn effective_limit(&self) -> usize {
        self.limit.clamp(1, MAX_WINDOW_LIMIT)
    }

    pub fn effective_direction(&self) -> ScanDirection {
        if self.invert {
            self.direction.flip()
        } else {
            self.direction
        }
    }

    /// Follow-up request continuing from `window`.
    pub fn continue_from(&self, window: &[Record], invert: bool) -> Self {
        Self {
            previous_window: Some(window.to_vec()),
            invert,
            ..self.clone()
        }
    }

    pub fn echo(&self) -> WindowEcho {
        WindowEcho {
            sort_by: self.sort_by,
            direction: self.direction,
            limit: self.effective_limit(),
            filter: self.filter.clone(),
            invert: self.invert,
        }
    }
}

/// Request configuration as echoed back to the caller, minus the pivot rows.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WindowEcho {
    pub sort_by: SortColumn,
    pub direction: ScanDirection,
    pub limit: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filter: Option<Filter>,
    pub invert: bool,
}

/// Names of the first and last row of a window.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct WindowCursor {
    pub head: String,
    pub tail: String,
}

impl WindowCursor {
    pub fn of(records: &[Record]) -> Option<Self> {
        let head = records.first()?;
        let tail = records.last()?;
        Some(Self {
            head: head.name.clone(),
            tail: tail.name.clone(),
        })
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WindowResponse {
    pub records: Vec<Record>,
    pub total_count: u64,
    pub filtered_count: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cursor: Option<WindowCursor>,
    /// Set when the scan ran past the first or last row and the previous
    /// window was re-presented.
    #[serde(default)]
    pub at_edge: bool,
    pub echoed_config: WindowEcho,
}
