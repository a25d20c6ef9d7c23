//! Profile intake: pattern extraction, optional recommendation letter, and
//! model-based extraction merged without fabrication.
//!
//! Document and model failures degrade to warnings; intake itself never
//! fails and always keeps the student's original text.

use std::path::Path;
use std::sync::Arc;

use tracing::{info, instrument, warn};

use smartadmit_shared::{
    AcademicLevel, DocumentTextExtractor, ExamEntry, ExtractionMethod, FieldValue, Profile,
    ProfileField, ReasoningClient, ReasoningRequest, Reconciled, SmartAdmitError,
};

use crate::extract::TextExtractor;
use crate::merge::{merge_profiles, profile_from_record, split_locations};
use crate::reconcile::reconcile;

const EXTRACTOR_SYSTEM: &str = "You are a profile information extractor for a university \
admissions advisor. You read a student's description of themselves and return only the facts \
they stated, as JSON. You never guess.";

/// What intake produced, plus anything that degraded along the way.
#[derive(Debug, Clone)]
pub struct IntakeOutcome {
    pub profile: Profile,
    /// How the letter text was obtained, when one was supplied and read.
    pub document_method: Option<ExtractionMethod>,
    /// Fields the model extraction added or replaced.
    pub model_fields: Vec<ProfileField>,
    pub warnings: Vec<String>,
}

/// Intake pipeline. Document reader and extraction model are optional.
pub struct Intake {
    patterns: TextExtractor,
    documents: Option<Arc<dyn DocumentTextExtractor>>,
    model: Option<Arc<dyn ReasoningClient>>,
}

impl Intake {
    pub fn new() -> Self {
        Self {
            patterns: TextExtractor::new(),
            documents: None,
            model: None,
        }
    }

    pub fn with_documents(mut self, documents: Arc<dyn DocumentTextExtractor>) -> Self {
        self.documents = Some(documents);
        self
    }

    pub fn with_model(mut self, model: Arc<dyn ReasoningClient>) -> Self {
        self.model = Some(model);
        self
    }

    /// Build a profile from the student's text and an optional letter.
    #[instrument(skip_all, fields(chars = text.len(), document = document.is_some()))]
    pub async fn run(&self, text: &str, document: Option<&Path>) -> IntakeOutcome {
        let mut outcome = IntakeOutcome {
            profile: self.patterns.extract(text),
            document_method: None,
            model_fields: Vec::new(),
            warnings: Vec::new(),
        };
        info!(fields = outcome.profile.fields.len(), "pattern extraction done");

        if let Some(path) = document {
            match self.read_document(path).await {
                Ok((letter, method)) => {
                    info!(?method, chars = letter.len(), "recommendation letter read");
                    outcome.profile.lor_text = Some(letter);
                    outcome.document_method = Some(method);
                }
                Err(e) => {
                    warn!(error = %e, "could not read recommendation letter, continuing without it");
                    outcome.warnings.push(format!("recommendation letter skipped: {e}"));
                }
            }
        }

        if let Some(model) = &self.model {
            match extract_with_model(model.as_ref(), text).await {
                Ok(found) => {
                    outcome.model_fields = merge_profiles(&mut outcome.profile, &found);
                    info!(changed = outcome.model_fields.len(), "model extraction merged");
                }
                Err(e) => {
                    warn!(error = %e, "model extraction failed, keeping pattern results");
                    outcome.warnings.push(format!("model extraction skipped: {e}"));
                }
            }
        }

        // Merging never touches side fields, but keep the contract explicit
        outcome.profile.raw_input_text = text.to_string();
        outcome
    }

    async fn read_document(
        &self,
        path: &Path,
    ) -> smartadmit_shared::Result<(String, ExtractionMethod)> {
        let Some(documents) = self.documents.clone() else {
            return Err(SmartAdmitError::Extraction(
                "no document reader configured".into(),
            ));
        };
        let owned = path.to_path_buf();
        let doc = tokio::task::spawn_blocking(move || documents.extract(&owned))
            .await
            .map_err(|e| SmartAdmitError::Extraction(format!("extraction task failed: {e}")))??;
        Ok((doc.text, doc.method))
    }
}

impl Default for Intake {
    fn default() -> Self {
        Self::new()
    }
}

/// Ask the model for a JSON record of stated facts and convert it.
///
/// A reply that does not reconcile to a record yields an empty profile.
pub async fn extract_with_model(
    model: &dyn ReasoningClient,
    text: &str,
) -> smartadmit_shared::Result<Profile> {
    let request = ReasoningRequest::new(EXTRACTOR_SYSTEM, extraction_prompt(text));
    let reply = model.complete(&request).await?;

    let record = match reconcile(&reply) {
        Reconciled::Record(map) => Some(map),
        Reconciled::Records(mut items) if items.len() == 1 => items.pop(),
        other => {
            warn!(shape = other.shape(), "extraction reply was not a single record");
            None
        }
    };

    Ok(record.map(|r| profile_from_record(&r)).unwrap_or_default())
}

fn extraction_prompt(text: &str) -> String {
    format!(
        "Extract the student's details from the text below.\n\n\
         TEXT:\n{text}\n\n\
         Return one JSON object with these keys, using null for anything not stated:\n\
         - student_name: full name\n\
         - academic_level: one of \"high_school\", \"undergraduate\", \"postgraduate\", \"working_professional\", \"other\"\n\
         - current_degree: current or most recent degree\n\
         - graduation_year: year of (expected) graduation, as text\n\
         - board: school board for high-school students (CBSE, ICSE, State Board, ...)\n\
         - class12_score: class 12 score as written (\"92%\", \"480/500\")\n\
         - cgpa: CGPA/GPA with scale if given (\"8.3/10\", \"3.5/4\")\n\
         - competitive_exams: array of {{\"exam_name\": ..., \"details\": ...}}\n\
         - career_goal: main career aspiration\n\
         - preferred_locations: array of countries or regions\n\
         - budget: budget with currency as written (\"20 lakhs\", \"$30,000\")\n\
         - specialization: intended field or major\n\
         - intended_degree_level: \"undergraduate\" or \"postgraduate\"\n\n\
         Do not infer or normalize values. Return only the JSON object."
    )
}

// ---------------------------------------------------------------------------
// Follow-up questions
// ---------------------------------------------------------------------------

/// Questions for the fields an advisor needs but the profile lacks, tailored
/// to the student's academic level.
pub fn follow_up_questions(profile: &Profile) -> Vec<(ProfileField, &'static str)> {
    let school = profile.academic_level() == Some(AcademicLevel::HighSchool);

    let wanted: &[(ProfileField, &'static str)] = if school {
        &[
            (ProfileField::StudentName, "What's your full name?"),
            (ProfileField::Board, "Which board are you studying under (CBSE, ICSE, State Board, ...)?"),
            (ProfileField::Class12Score, "What is your class 12 score (or expected score)?"),
            (ProfileField::CareerGoal, "What's your main career goal?"),
            (ProfileField::PreferredLocations, "Which countries are you interested in studying in?"),
            (ProfileField::Budget, "What is your approximate budget for the program?"),
        ]
    } else {
        &[
            (ProfileField::StudentName, "What's your full name?"),
            (ProfileField::CurrentDegree, "What degree are you currently pursuing or have completed?"),
            (ProfileField::GraduationYear, "When do you (or did you) graduate?"),
            (ProfileField::Cgpa, "What's your CGPA, with its scale?"),
            (ProfileField::CareerGoal, "What's your main career goal?"),
            (ProfileField::PreferredLocations, "Which countries are you interested in studying in?"),
            (ProfileField::Budget, "What is your approximate budget for the program?"),
        ]
    };

    wanted
        .iter()
        .copied()
        .filter(|(field, _)| !profile.has(*field))
        .collect()
}

/// Record the student's answer to a follow-up question. Blank answers leave
/// the field absent.
pub fn apply_answer(profile: &mut Profile, field: ProfileField, answer: &str) {
    let answer = answer.trim();
    if answer.is_empty() {
        return;
    }
    let value = match field {
        ProfileField::PreferredLocations => FieldValue::List(split_locations(answer)),
        ProfileField::CompetitiveExams => FieldValue::Exams(vec![ExamEntry {
            exam_name: answer.to_string(),
            details: String::new(),
        }]),
        ProfileField::AcademicLevel | ProfileField::IntendedDegreeLevel => {
            match AcademicLevel::parse(answer) {
                Some(level) => FieldValue::Text(level.as_str().to_string()),
                None => return,
            }
        }
        _ => FieldValue::Text(answer.to_string()),
    };
    profile.set(field, value);
}
