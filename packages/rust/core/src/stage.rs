//! Stage definitions: persona, instruction template, dependencies, and the
//! collaborators a stage is bound to.

use std::sync::Arc;

use smartadmit_shared::{
    FetchCapability, Profile, ProfileField, ReasoningClient, Reconciled, Result,
    SearchCapability, SmartAdmitError, StageResult,
};

/// Pipeline input holding the whole profile as JSON.
pub const PROFILE_INPUT: &str = "profile";
/// Pipeline input holding the current calendar year.
pub const CURRENT_YEAR_INPUT: &str = "current_year";
const PROFILE_FIELD_PREFIX: &str = "profile.";

// ---------------------------------------------------------------------------
// PromptTemplate
// ---------------------------------------------------------------------------

/// Text with `{{name}}` placeholders.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PromptTemplate {
    source: String,
}

impl PromptTemplate {
    pub fn new(source: impl Into<String>) -> Self {
        Self {
            source: source.into(),
        }
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    /// Placeholder names in order of appearance (may repeat).
    pub fn placeholders(&self) -> Vec<&str> {
        let mut names = Vec::new();
        let mut rest = self.source.as_str();
        while let Some(start) = rest.find("{{") {
            let after = &rest[start + 2..];
            let Some(end) = after.find("}}") else { break };
            names.push(after[..end].trim());
            rest = &after[end + 2..];
        }
        names
    }

    /// Substitute every placeholder. An unresolvable name is an error.
    pub fn render(&self, lookup: impl Fn(&str) -> Option<String>) -> Result<String> {
        let mut out = String::with_capacity(self.source.len());
        let mut rest = self.source.as_str();
        while let Some(start) = rest.find("{{") {
            let after = &rest[start + 2..];
            let Some(end) = after.find("}}") else { break };
            let name = after[..end].trim();
            let value = lookup(name).ok_or_else(|| {
                SmartAdmitError::validation(format!("no value for placeholder '{{{{{name}}}}}'"))
            })?;
            out.push_str(&rest[..start]);
            out.push_str(&value);
            rest = &after[end + 2..];
        }
        out.push_str(rest);
        Ok(out)
    }
}

// ---------------------------------------------------------------------------
// Research
// ---------------------------------------------------------------------------

/// Search (and optionally fetch) run before a stage's reasoning call.
#[derive(Clone)]
pub struct ResearchPlan {
    pub query: PromptTemplate,
    pub max_results: usize,
    /// How many of the top hits to fetch in full.
    pub fetch_top: usize,
    pub search: Arc<dyn SearchCapability>,
    pub fetch: Option<Arc<dyn FetchCapability>>,
}

// ---------------------------------------------------------------------------
// StageDefinition
// ---------------------------------------------------------------------------

/// One unit of delegated reasoning work. Immutable once handed to an
/// orchestrator.
#[derive(Clone)]
pub struct StageDefinition {
    pub name: String,
    pub role: String,
    pub goal: String,
    pub backstory: String,
    pub expected_output: String,
    pub instruction: PromptTemplate,
    pub dependencies: Vec<String>,
    pub reasoning: Arc<dyn ReasoningClient>,
    pub research: Option<ResearchPlan>,
}

impl StageDefinition {
    pub fn new(
        name: impl Into<String>,
        instruction: impl Into<String>,
        reasoning: Arc<dyn ReasoningClient>,
    ) -> Self {
        Self {
            name: name.into(),
            role: String::new(),
            goal: String::new(),
            backstory: String::new(),
            expected_output: String::new(),
            instruction: PromptTemplate::new(instruction),
            dependencies: Vec::new(),
            reasoning,
            research: None,
        }
    }

    pub fn persona(
        mut self,
        role: impl Into<String>,
        goal: impl Into<String>,
        backstory: impl Into<String>,
    ) -> Self {
        self.role = role.into();
        self.goal = goal.into();
        self.backstory = backstory.into();
        self
    }

    pub fn expecting(mut self, expected_output: impl Into<String>) -> Self {
        self.expected_output = expected_output.into();
        self
    }

    pub fn depends_on(mut self, stages: &[&str]) -> Self {
        self.dependencies = stages.iter().map(|s| s.to_string()).collect();
        self
    }

    pub fn with_research(mut self, plan: ResearchPlan) -> Self {
        self.research = Some(plan);
        self
    }

    /// Every placeholder used by the instruction and research query.
    pub fn placeholders(&self) -> Vec<&str> {
        let mut names = self.instruction.placeholders();
        if let Some(plan) = &self.research {
            names.extend(plan.query.placeholders());
        }
        names
    }

    /// Whether `name` may appear as a placeholder in this stage.
    pub fn accepts_placeholder(&self, name: &str) -> bool {
        is_pipeline_input(name) || self.dependencies.iter().any(|d| d == name)
    }

    /// Persona text sent as the system message.
    pub fn system_prompt(&self) -> String {
        let mut parts = Vec::new();
        if !self.role.is_empty() {
            parts.push(format!("You are the {}.", self.role));
        }
        if !self.backstory.is_empty() {
            parts.push(self.backstory.clone());
        }
        if !self.goal.is_empty() {
            parts.push(format!("Your goal: {}", self.goal));
        }
        parts.join("\n\n")
    }

    /// Task text sent as the user message.
    pub fn compose_prompt(&self, instruction: &str, research_notes: Option<&str>) -> String {
        let mut prompt = instruction.trim_end().to_string();
        if !self.expected_output.is_empty() {
            prompt.push_str("\n\nExpected output:\n");
            prompt.push_str(&self.expected_output);
        }
        if let Some(notes) = research_notes.filter(|n| !n.trim().is_empty()) {
            prompt.push_str("\n\nResearch notes:\n");
            prompt.push_str(notes);
        }
        prompt
    }
}

impl std::fmt::Debug for StageDefinition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StageDefinition")
            .field("name", &self.name)
            .field("dependencies", &self.dependencies)
            .field("model", &self.reasoning.model_id())
            .field("research", &self.research.is_some())
            .finish()
    }
}

fn is_pipeline_input(name: &str) -> bool {
    match name.strip_prefix(PROFILE_FIELD_PREFIX) {
        Some(field) => field.parse::<ProfileField>().is_ok(),
        None => name == PROFILE_INPUT || name == CURRENT_YEAR_INPUT,
    }
}

// ---------------------------------------------------------------------------
// Placeholder values
// ---------------------------------------------------------------------------

/// Values available to a stage's templates.
pub struct StageInputs<'a> {
    pub profile: &'a Profile,
    pub results: &'a [StageResult],
    pub current_year: i32,
}

impl StageInputs<'_> {
    pub fn lookup(&self, name: &str) -> Option<String> {
        if name == PROFILE_INPUT {
            return serde_json::to_string_pretty(&self.profile.to_prompt_json()).ok();
        }
        if name == CURRENT_YEAR_INPUT {
            return Some(self.current_year.to_string());
        }
        if let Some(field) = name.strip_prefix(PROFILE_FIELD_PREFIX) {
            let field = field.parse::<ProfileField>().ok()?;
            return Some(self.profile.display(field));
        }
        self.results
            .iter()
            .find(|r| r.stage == name)
            .map(|r| result_text(&r.reconciled))
    }
}

/// How a stored result is handed to a dependent stage.
pub fn result_text(reconciled: &Reconciled) -> String {
    match reconciled {
        Reconciled::Records(records) => {
            serde_json::to_string_pretty(records).unwrap_or_default()
        }
        Reconciled::Record(record) => serde_json::to_string_pretty(record).unwrap_or_default(),
        Reconciled::Narrative(text) | Reconciled::NoResults(text) => text.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::ScriptedReasoning;
    use chrono::Utc;

    fn client() -> Arc<dyn ReasoningClient> {
        Arc::new(ScriptedReasoning::ok(&[]))
    }

    #[test]
    fn placeholders_are_listed_in_order() {
        let t = PromptTemplate::new("Use {{ profile }} and {{ranked_programs}} for {{current_year}}.");
        assert_eq!(t.placeholders(), vec!["profile", "ranked_programs", "current_year"]);
        assert!(PromptTemplate::new("no {{ end").placeholders().is_empty());
    }

    #[test]
    fn render_substitutes_and_rejects_unknowns() {
        let t = PromptTemplate::new("A={{a}}, B={{ b }}, again {{a}}");
        let out = t
            .render(|name| match name {
                "a" => Some("1".into()),
                "b" => Some("2".into()),
                _ => None,
            })
            .expect("render");
        assert_eq!(out, "A=1, B=2, again 1");

        let err = PromptTemplate::new("{{missing}}").render(|_| None).unwrap_err();
        assert!(err.to_string().contains("missing"));
    }

    #[test]
    fn stage_accepts_inputs_and_dependencies_only() {
        let stage = StageDefinition::new("rank", "{{match}}", client()).depends_on(&["match"]);
        assert!(stage.accepts_placeholder("match"));
        assert!(stage.accepts_placeholder("profile"));
        assert!(stage.accepts_placeholder("profile.budget"));
        assert!(stage.accepts_placeholder("current_year"));
        assert!(!stage.accepts_placeholder("profile.favourite_color"));
        assert!(!stage.accepts_placeholder("reviews"));
    }

    #[test]
    fn inputs_resolve_profile_fields_and_results() {
        let mut profile = Profile::new("raw");
        profile.set_text(ProfileField::Budget, "20 lakhs");
        let results = vec![StageResult {
            stage: "matched_programs".into(),
            raw: "junk [{\"university\":\"U1\"}]".into(),
            reconciled: Reconciled::Records(vec![
                serde_json::json!({"university": "U1"})
                    .as_object()
                    .cloned()
                    .unwrap(),
            ]),
            model: "m".into(),
            sources: vec![],
            completed_at: Utc::now(),
        }];
        let inputs = StageInputs {
            profile: &profile,
            results: &results,
            current_year: 2026,
        };

        assert_eq!(inputs.lookup("profile.budget").as_deref(), Some("20 lakhs"));
        assert_eq!(inputs.lookup("profile.cgpa").as_deref(), Some("not specified"));
        assert_eq!(inputs.lookup("current_year").as_deref(), Some("2026"));
        assert!(inputs.lookup("profile").unwrap().contains("\"raw_user_text\": \"raw\""));
        let matched = inputs.lookup("matched_programs").unwrap();
        assert!(matched.contains("\"university\": \"U1\""));
        assert!(!matched.contains("junk"));
        assert!(inputs.lookup("reviews").is_none());
    }

    #[test]
    fn prompt_composition() {
        let stage = StageDefinition::new("s", "Do the thing.", client())
            .persona("Scholarship Finder", "find funding", "You know every grant.")
            .expecting("A JSON array.");
        let system = stage.system_prompt();
        assert!(system.starts_with("You are the Scholarship Finder."));
        assert!(system.contains("Your goal: find funding"));

        let prompt = stage.compose_prompt("Do the thing.", Some("- hit"));
        assert!(prompt.contains("Expected output:\nA JSON array."));
        assert!(prompt.ends_with("Research notes:\n- hit"));
        assert!(!stage.compose_prompt("x", Some("  ")).contains("Research notes"));
    }
}
