//! The student profile: an accumulating record of what is known about the
//! student, filled by pattern extraction, model extraction, and feedback.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Marker rendered for any field that was never supplied.
pub const NOT_SPECIFIED: &str = "not specified";

// ---------------------------------------------------------------------------
// ProfileField
// ---------------------------------------------------------------------------

/// Recognized profile fields, in display order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProfileField {
    StudentName,
    AcademicLevel,
    CurrentDegree,
    GraduationYear,
    Cgpa,
    Board,
    Class12Score,
    CompetitiveExams,
    CareerGoal,
    PreferredLocations,
    Budget,
    Specialization,
    IntendedDegreeLevel,
}

impl ProfileField {
    pub const ALL: [ProfileField; 13] = [
        Self::StudentName,
        Self::AcademicLevel,
        Self::CurrentDegree,
        Self::GraduationYear,
        Self::Cgpa,
        Self::Board,
        Self::Class12Score,
        Self::CompetitiveExams,
        Self::CareerGoal,
        Self::PreferredLocations,
        Self::Budget,
        Self::Specialization,
        Self::IntendedDegreeLevel,
    ];

    /// Wire/storage key.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::StudentName => "student_name",
            Self::AcademicLevel => "academic_level",
            Self::CurrentDegree => "current_degree",
            Self::GraduationYear => "graduation_year",
            Self::Cgpa => "cgpa",
            Self::Board => "board",
            Self::Class12Score => "class12_score",
            Self::CompetitiveExams => "competitive_exams",
            Self::CareerGoal => "career_goal",
            Self::PreferredLocations => "preferred_locations",
            Self::Budget => "budget",
            Self::Specialization => "specialization",
            Self::IntendedDegreeLevel => "intended_degree_level",
        }
    }

    /// Human-readable label for reports.
    pub fn label(&self) -> &'static str {
        match self {
            Self::StudentName => "Name",
            Self::AcademicLevel => "Academic level",
            Self::CurrentDegree => "Current degree",
            Self::GraduationYear => "Graduation year",
            Self::Cgpa => "CGPA",
            Self::Board => "Board",
            Self::Class12Score => "Class 12 score",
            Self::CompetitiveExams => "Competitive exams",
            Self::CareerGoal => "Career goal",
            Self::PreferredLocations => "Preferred locations",
            Self::Budget => "Budget",
            Self::Specialization => "Specialization",
            Self::IntendedDegreeLevel => "Intended degree level",
        }
    }
}

impl fmt::Display for ProfileField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProfileField {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|f| f.as_str() == s)
            .ok_or_else(|| format!("unknown profile field '{s}'"))
    }
}

// ---------------------------------------------------------------------------
// AcademicLevel
// ---------------------------------------------------------------------------

/// The closed set of academic levels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AcademicLevel {
    HighSchool,
    Undergraduate,
    Postgraduate,
    WorkingProfessional,
    Other,
}

impl AcademicLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::HighSchool => "high_school",
            Self::Undergraduate => "undergraduate",
            Self::Postgraduate => "postgraduate",
            Self::WorkingProfessional => "working_professional",
            Self::Other => "other",
        }
    }

    /// Parse a level written as `high_school`, `high school` or `High-School`.
    /// Anything outside the enumeration is `None`.
    pub fn parse(s: &str) -> Option<Self> {
        let key = s.trim().to_ascii_lowercase().replace([' ', '-'], "_");
        match key.as_str() {
            "high_school" => Some(Self::HighSchool),
            "undergraduate" => Some(Self::Undergraduate),
            "postgraduate" => Some(Self::Postgraduate),
            "working_professional" => Some(Self::WorkingProfessional),
            "other" => Some(Self::Other),
            _ => None,
        }
    }
}

impl fmt::Display for AcademicLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// FieldValue
// ---------------------------------------------------------------------------

/// One competitive exam mention, kept as free text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExamEntry {
    pub exam_name: String,
    #[serde(default)]
    pub details: String,
}

/// A profile value. Numbers are kept as text and never coerced.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldValue {
    Text(String),
    List(Vec<String>),
    Exams(Vec<ExamEntry>),
}

impl FieldValue {
    /// Null-like values never overwrite anything.
    pub fn is_empty(&self) -> bool {
        match self {
            Self::Text(s) => s.trim().is_empty(),
            Self::List(items) => items.iter().all(|s| s.trim().is_empty()),
            Self::Exams(items) => items.iter().all(|e| e.exam_name.trim().is_empty()),
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(s) => Some(s),
            _ => None,
        }
    }
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Text(s) => f.write_str(s),
            Self::List(items) => f.write_str(&items.join(", ")),
            Self::Exams(items) => {
                let rendered: Vec<String> = items
                    .iter()
                    .map(|e| {
                        if e.details.trim().is_empty() {
                            e.exam_name.clone()
                        } else {
                            format!("{} ({})", e.exam_name, e.details)
                        }
                    })
                    .collect();
                f.write_str(&rendered.join("; "))
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Profile
// ---------------------------------------------------------------------------

/// Student profile. `raw_input_text` is always kept verbatim.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Profile {
    #[serde(default)]
    pub fields: BTreeMap<ProfileField, FieldValue>,
    #[serde(default)]
    pub raw_input_text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lor_text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_feedback: Option<String>,
}

impl Profile {
    /// An empty profile carrying the student's original narrative.
    pub fn new(raw_input_text: impl Into<String>) -> Self {
        Self {
            raw_input_text: raw_input_text.into(),
            ..Default::default()
        }
    }

    pub fn get(&self, field: ProfileField) -> Option<&FieldValue> {
        self.fields.get(&field).filter(|v| !v.is_empty())
    }

    /// Store a value. Empty values are ignored so a field is never blanked.
    pub fn set(&mut self, field: ProfileField, value: FieldValue) {
        if !value.is_empty() {
            self.fields.insert(field, value);
        }
    }

    pub fn set_text(&mut self, field: ProfileField, value: impl Into<String>) {
        self.set(field, FieldValue::Text(value.into()));
    }

    pub fn has(&self, field: ProfileField) -> bool {
        self.get(field).is_some()
    }

    /// Display value, or [`NOT_SPECIFIED`] when absent.
    pub fn display(&self, field: ProfileField) -> String {
        self.get(field)
            .map(ToString::to_string)
            .unwrap_or_else(|| NOT_SPECIFIED.to_string())
    }

    pub fn academic_level(&self) -> Option<AcademicLevel> {
        self.get(ProfileField::AcademicLevel)
            .and_then(FieldValue::as_text)
            .and_then(AcademicLevel::parse)
    }

    /// Recognized fields with no value.
    pub fn missing_fields(&self) -> Vec<ProfileField> {
        ProfileField::ALL
            .into_iter()
            .filter(|f| !self.has(*f))
            .collect()
    }

    /// JSON view handed to model prompts: every recognized field is present,
    /// absent ones carry the explicit marker.
    pub fn to_prompt_json(&self) -> serde_json::Value {
        let mut structured = serde_json::Map::new();
        for field in ProfileField::ALL {
            let value = match self.get(field) {
                Some(v) => serde_json::to_value(v).unwrap_or(serde_json::Value::Null),
                None => serde_json::Value::String(NOT_SPECIFIED.into()),
            };
            structured.insert(field.as_str().to_string(), value);
        }

        let mut root = serde_json::Map::new();
        root.insert("structured_profile".into(), structured.into());
        root.insert("raw_user_text".into(), self.raw_input_text.clone().into());
        if let Some(lor) = &self.lor_text {
            root.insert("recommendation_letter".into(), lor.clone().into());
        }
        if let Some(feedback) = &self.user_feedback {
            root.insert("user_feedback".into(), feedback.clone().into());
        }
        serde_json::Value::Object(root)
    }
}
