//! The admissions pipeline: five stages from profile normalization to
//! student reviews.
//!
//! Dependencies: matching and scholarships read the normalized profile,
//! ranking reads the matches, reviews read the ranking.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use smartadmit_shared::{
    FetchCapability, ReasoningClient, Result, SearchCapability, SerperConfig,
};

use crate::orchestrator::Orchestrator;
use crate::stage::{PromptTemplate, ResearchPlan, StageDefinition};

/// Stages of the admissions pipeline, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AdmissionStage {
    NormalizedProfile,
    MatchedPrograms,
    RankedPrograms,
    Scholarships,
    Reviews,
}

impl AdmissionStage {
    pub const ALL: [AdmissionStage; 5] = [
        Self::NormalizedProfile,
        Self::MatchedPrograms,
        Self::RankedPrograms,
        Self::Scholarships,
        Self::Reviews,
    ];

    /// Result key.
    pub fn key(&self) -> &'static str {
        match self {
            Self::NormalizedProfile => "normalized_profile",
            Self::MatchedPrograms => "matched_programs",
            Self::RankedPrograms => "ranked_programs",
            Self::Scholarships => "scholarships",
            Self::Reviews => "reviews",
        }
    }

    /// Section title for reports.
    pub fn title(&self) -> &'static str {
        match self {
            Self::NormalizedProfile => "Profile Summary",
            Self::MatchedPrograms => "Matched Programs",
            Self::RankedPrograms => "Top Programs",
            Self::Scholarships => "Scholarships",
            Self::Reviews => "Student Reviews",
        }
    }

    /// What the session is doing while this stage runs.
    pub fn activity(&self) -> &'static str {
        match self {
            Self::NormalizedProfile => "Normalizing profile",
            Self::MatchedPrograms => "Matching programs",
            Self::RankedPrograms => "Ranking programs",
            Self::Scholarships => "Finding scholarships",
            Self::Reviews => "Collecting reviews",
        }
    }

    pub fn from_key(key: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|s| s.key() == key)
    }
}

impl std::fmt::Display for AdmissionStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.key())
    }
}

/// How much each research step searches and fetches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResearchSettings {
    pub results_per_query: usize,
    pub fetch_top: usize,
}

impl From<&SerperConfig> for ResearchSettings {
    fn from(config: &SerperConfig) -> Self {
        Self {
            results_per_query: config.results_per_query,
            fetch_top: config.fetch_top,
        }
    }
}

impl Default for ResearchSettings {
    fn default() -> Self {
        Self {
            results_per_query: 8,
            fetch_top: 2,
        }
    }
}

/// Collaborators bound into the admissions stages.
#[derive(Clone)]
pub struct PipelineClients {
    pub reasoning: Arc<dyn ReasoningClient>,
    pub search: Arc<dyn SearchCapability>,
    pub fetch: Option<Arc<dyn FetchCapability>>,
}

impl PipelineClients {
    fn research(&self, query: &str, settings: ResearchSettings) -> ResearchPlan {
        ResearchPlan {
            query: PromptTemplate::new(query),
            max_results: settings.results_per_query,
            fetch_top: settings.fetch_top,
            search: self.search.clone(),
            fetch: self.fetch.clone(),
        }
    }
}

/// Build and validate the admissions orchestrator.
pub fn admissions_orchestrator(
    clients: &PipelineClients,
    settings: ResearchSettings,
) -> Result<Orchestrator> {
    Orchestrator::new(admissions_stages(clients, settings))
}

/// The five stage definitions, in [`AdmissionStage::ALL`] order.
pub fn admissions_stages(
    clients: &PipelineClients,
    settings: ResearchSettings,
) -> Vec<StageDefinition> {
    let llm = clients.reasoning.clone();

    let normalize = StageDefinition::new(
        AdmissionStage::NormalizedProfile.key(),
        NORMALIZE_INSTRUCTION,
        llm.clone(),
    )
    .persona(
        "Data Normalizer",
        "Clean and standardize a student profile at any academic level without adding facts.",
        "You prepare student records for admissions counsellors. You are meticulous about \
         keeping exactly what the student said and marking gaps instead of filling them.",
    )
    .expecting(
        "A readable summary with the sections Personal, Academic Background, Test Scores, \
         Goals & Preferences, Budget, and Recommendation Highlights (only if a letter was given).",
    );

    let matched = StageDefinition::new(
        AdmissionStage::MatchedPrograms.key(),
        MATCH_INSTRUCTION,
        llm.clone(),
    )
    .persona(
        "University Matcher",
        "Recommend programs at the right degree level that fit the student's profile, budget and locations.",
        "You have placed thousands of students in universities worldwide and know how \
         eligibility, fees and outcomes differ by country.",
    )
    .expecting(MATCH_OUTPUT)
    .depends_on(&[AdmissionStage::NormalizedProfile.key()])
    .with_research(clients.research(
        "{{profile.intended_degree_level}} {{profile.specialization}} programs in \
         {{profile.preferred_locations}} tuition fees {{current_year}}",
        settings,
    ));

    let ranked = StageDefinition::new(
        AdmissionStage::RankedPrograms.key(),
        RANK_INSTRUCTION,
        llm.clone(),
    )
    .persona(
        "University Program Specialist",
        "Pick and justify the five best programs for this student.",
        "You compare curricula, costs and career outcomes and explain trade-offs plainly.",
    )
    .expecting(RANK_OUTPUT)
    .depends_on(&[AdmissionStage::MatchedPrograms.key()]);

    let scholarships = StageDefinition::new(
        AdmissionStage::Scholarships.key(),
        SCHOLARSHIP_INSTRUCTION,
        llm.clone(),
    )
    .persona(
        "Scholarship Finder",
        "Find scholarships the student is actually eligible for.",
        "You track government, university and private funding and check eligibility rules carefully.",
    )
    .expecting(SCHOLARSHIP_OUTPUT)
    .depends_on(&[AdmissionStage::NormalizedProfile.key()])
    .with_research(clients.research(
        "scholarships for {{profile.academic_level}} students in {{profile.specialization}} \
         {{profile.preferred_locations}} {{current_year}}",
        settings,
    ));

    let reviews = StageDefinition::new(AdmissionStage::Reviews.key(), REVIEWS_INSTRUCTION, llm)
        .persona(
            "Reviews Collector",
            "Gather authentic student opinions of the top-ranked programs.",
            "You read forums, review sites and alumni posts and summarize them fairly.",
        )
        .expecting(REVIEWS_OUTPUT)
        .depends_on(&[AdmissionStage::RankedPrograms.key()])
        .with_research(clients.research(
            "student reviews {{profile.specialization}} universities {{profile.preferred_locations}} \
             reddit quora",
            settings,
        ));

    vec![normalize, matched, ranked, scholarships, reviews]
}

// ---------------------------------------------------------------------------
// Instructions
// ---------------------------------------------------------------------------

const NORMALIZE_INSTRUCTION: &str = "\
The student's profile is below as JSON. `structured_profile` holds extracted fields, \
`raw_user_text` is what the student wrote, and `recommendation_letter` / `user_feedback` \
appear when supplied.

{{profile}}

Standardize it:
- keep every stated fact, including scores exactly as written
- fill gaps from `raw_user_text` only when the text states the fact directly
- write \"not specified\" for anything still unknown; never estimate
- if `user_feedback` is present, restate it under Goals & Preferences";

const MATCH_INSTRUCTION: &str = "\
Normalized profile:

{{normalized_profile}}

Academic level: {{profile.academic_level}}. Intended degree level: {{profile.intended_degree_level}}.
Recommend undergraduate programs for high-school students and postgraduate programs otherwise.
Respect the preferred locations ({{profile.preferred_locations}}) and the budget ({{profile.budget}}).

Weigh the criteria as follows:
1. Academic fit (scores against typical admits): 30%
2. Career-goal alignment: 25%
3. Cost within budget: 20%
4. Location preference: 15%
5. Program reputation: 10%

Give annual tuition in the university's own currency and converted to INR. \
Recommend 8 to 10 programs. Use the research notes where they apply.";

const MATCH_OUTPUT: &str = "\
A JSON array. Each element: {\"university\", \"program\", \"country\", \"degree_level\", \
\"annual_tuition\" (original currency), \"annual_tuition_inr\", \"eligibility\", \
\"fit_reason\", \"match_score\" (0-100)}.";

const RANK_INSTRUCTION: &str = "\
Candidate programs:

{{matched_programs}}

Student: {{profile.student_name}}, career goal {{profile.career_goal}}, budget {{profile.budget}}.

Rank the five best programs for this student. For each, explain the career alignment, \
summarize total cost, and list honest pros and cons. Keep fee figures as given.";

const RANK_OUTPUT: &str = "\
A JSON array of exactly five elements, best first. Each element: {\"rank\", \"university\", \
\"program\", \"country\", \"annual_tuition\", \"rating\" (0-5, one decimal), \"why\", \
\"pros\", \"cons\"}.";

const SCHOLARSHIP_INSTRUCTION: &str = "\
Normalized profile:

{{normalized_profile}}

Find scholarships open to this student for study in {{profile.preferred_locations}} \
at the {{profile.intended_degree_level}} level. Include government, university and private \
awards with deadlines in {{current_year}} or later. Only list awards the student plausibly \
qualifies for.

If none qualify, reply with exactly: No matching scholarships found";

const SCHOLARSHIP_OUTPUT: &str = "\
A JSON array. Each element: {\"name\", \"amount\", \"eligibility\", \"deadline\", \"link\"}.";

const REVIEWS_INSTRUCTION: &str = "\
Top-ranked programs:

{{ranked_programs}}

For each university, summarize what students say about teaching, campus life, career \
support and value for money. Use three distinct sources per university where possible, \
and cite each one.";

const REVIEWS_OUTPUT: &str = "\
A JSON array. Each element: {\"university\", \"source\", \"rating\" (0-5), \"summary\", \"link\"}.";

#[cfg(test)]
mod tests {
    use super::*;
    use crate::orchestrator::{RunState, SilentProgress};
    use crate::testing::{FakeSearch, ScriptedReasoning, hit};
    use smartadmit_shared::{Profile, ProfileField, Reconciled};

    fn clients(llm: &Arc<ScriptedReasoning>, search: &Arc<FakeSearch>) -> PipelineClients {
        PipelineClients {
            reasoning: llm.clone(),
            search: search.clone(),
            fetch: None,
        }
    }

    #[test]
    fn stage_keys_roundtrip_in_order() {
        for stage in AdmissionStage::ALL {
            assert_eq!(AdmissionStage::from_key(stage.key()), Some(stage));
        }
        assert_eq!(AdmissionStage::from_key("ranking"), None);
    }

    #[test]
    fn dag_matches_declared_dependencies() {
        let llm = Arc::new(ScriptedReasoning::ok(&[]));
        let search = Arc::new(FakeSearch::new(vec![]));
        let orch = admissions_orchestrator(&clients(&llm, &search), ResearchSettings::default())
            .expect("admissions pipeline validates");

        let names: Vec<&str> = AdmissionStage::ALL.iter().map(|s| s.key()).collect();
        assert_eq!(orch.stage_names(), names);

        let deps: Vec<Vec<String>> = orch.stages().iter().map(|s| s.dependencies.clone()).collect();
        assert_eq!(
            deps,
            vec![
                vec![],
                vec!["normalized_profile".to_string()],
                vec!["matched_programs".to_string()],
                vec!["normalized_profile".to_string()],
                vec!["ranked_programs".to_string()],
            ]
        );
        let researched: Vec<bool> = orch.stages().iter().map(|s| s.research.is_some()).collect();
        assert_eq!(researched, vec![false, true, false, true, true]);
    }

    #[tokio::test]
    async fn full_run_over_undergraduate_profile() {
        let llm = Arc::new(ScriptedReasoning::ok(&[
            "Personal: John Smith\nAcademic Background: B.Tech in Computer Science (2025), CGPA 8.5",
            r#"[{"university": "U Toronto", "program": "MSc Computer Science", "annual_tuition": "CAD 45,000"}]"#,
            r#"```json
[{"rank": 1, "university": "U Toronto", "program": "MSc Computer Science", "rating": 4.5}]
```"#,
            "No matching scholarships found",
            r#"[{"university": "U Toronto", "source": "Reddit", "rating": 4, "summary": "Rigorous"}]"#,
        ]));
        let search = Arc::new(FakeSearch::new(vec![hit(
            "MS in CS, Canada",
            "https://example.edu/ms",
            "Tuition CAD 45,000",
        )]));
        let orch = admissions_orchestrator(&clients(&llm, &search), ResearchSettings::default())
            .unwrap()
            .with_current_year(2026);

        let mut profile = Profile::new("I'm John Smith, currently pursuing B.Tech in Computer Science.");
        profile.set_text(ProfileField::AcademicLevel, "undergraduate");
        profile.set_text(ProfileField::Specialization, "machine learning");
        profile.set_text(ProfileField::IntendedDegreeLevel, "postgraduate");

        let mut state = RunState::new();
        orch.run_all(&mut state, &profile, &SilentProgress).await.unwrap();

        assert!(orch.is_complete(&state));
        let shapes: Vec<&str> = state.results().iter().map(|r| r.reconciled.shape()).collect();
        assert_eq!(shapes, vec!["narrative", "records", "records", "no_results", "records"]);
        assert_eq!(
            state.result("scholarships").unwrap().reconciled,
            Reconciled::NoResults("No matching scholarships found".into())
        );

        let queries = search.queries();
        assert_eq!(queries.len(), 3);
        assert!(queries[0].starts_with("postgraduate machine learning programs"));
        assert!(queries[0].ends_with("2026"));

        let match_prompt = &llm.requests()[1].prompt;
        assert!(match_prompt.contains("Academic level: undergraduate."));
        assert!(match_prompt.contains("Research notes:"));
        assert!(match_prompt.contains("Tuition CAD 45,000"));
    }
}
