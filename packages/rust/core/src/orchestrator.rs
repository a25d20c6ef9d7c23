//! Stage orchestration: validated DAG, one-stage-at-a-time advancement,
//! per-stage failure isolation.
//!
//! The orchestrator owns its stage definitions; the caller owns the
//! [`RunState`] and hands it to [`Orchestrator::advance`]. A stored result
//! is never recomputed, so a run can be resumed from any persisted state.

use std::collections::HashSet;
use std::fmt::Write as _;
use std::time::Instant;

use chrono::{Datelike, Utc};
use serde::{Deserialize, Serialize};
use tracing::{Instrument, debug, info, info_span, instrument, warn};
use url::Url;

use smartadmit_shared::{
    Profile, ReasoningRequest, Result, RunId, SmartAdmitError, StageFailure, StageResult,
};

use crate::reconcile::reconcile;
use crate::stage::{ResearchPlan, StageDefinition, StageInputs};

// ---------------------------------------------------------------------------
// Progress
// ---------------------------------------------------------------------------

/// Progress callback for stage lifecycle events.
pub trait StageProgress: Send + Sync {
    /// A stage is about to run. `position` is zero-based.
    fn stage_started(&self, stage: &str, position: usize, total: usize);
    /// The stage's research search is running.
    fn research(&self, stage: &str, query: &str);
    fn stage_completed(&self, result: &StageResult);
    fn stage_failed(&self, stage: &str, error: &SmartAdmitError);
}

/// No-op progress reporter for headless/test usage.
pub struct SilentProgress;

impl StageProgress for SilentProgress {
    fn stage_started(&self, _stage: &str, _position: usize, _total: usize) {}
    fn research(&self, _stage: &str, _query: &str) {}
    fn stage_completed(&self, _result: &StageResult) {}
    fn stage_failed(&self, _stage: &str, _error: &SmartAdmitError) {}
}

// ---------------------------------------------------------------------------
// RunState
// ---------------------------------------------------------------------------

/// Results of one pipeline run, in completion order, plus the most recent
/// failure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunState {
    pub run_id: RunId,
    results: Vec<StageResult>,
    last_failure: Option<StageFailure>,
}

impl RunState {
    pub fn new() -> Self {
        Self::with_id(RunId::new())
    }

    pub fn with_id(run_id: RunId) -> Self {
        Self {
            run_id,
            results: Vec::new(),
            last_failure: None,
        }
    }

    /// Rebuild a state loaded from storage.
    pub fn from_parts(
        run_id: RunId,
        results: Vec<StageResult>,
        last_failure: Option<StageFailure>,
    ) -> Self {
        Self {
            run_id,
            results,
            last_failure,
        }
    }

    pub fn results(&self) -> &[StageResult] {
        &self.results
    }

    pub fn result(&self, stage: &str) -> Option<&StageResult> {
        self.results.iter().find(|r| r.stage == stage)
    }

    pub fn is_completed(&self, stage: &str) -> bool {
        self.result(stage).is_some()
    }

    pub fn last_failure(&self) -> Option<&StageFailure> {
        self.last_failure.as_ref()
    }

    /// Drop every stage result and the failure record; the run id is kept.
    pub fn reset_for_refinement(&mut self) {
        self.results.clear();
        self.last_failure = None;
    }
}

impl Default for RunState {
    fn default() -> Self {
        Self::new()
    }
}

/// Outcome of one [`Orchestrator::advance`] call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Advance {
    /// The named stage ran and its result was stored.
    Executed(String),
    /// Nothing left to run.
    Complete,
}

// ---------------------------------------------------------------------------
// Orchestrator
// ---------------------------------------------------------------------------

/// Ordered, validated stage definitions.
#[derive(Debug)]
pub struct Orchestrator {
    stages: Vec<StageDefinition>,
    current_year: Option<i32>,
}

impl Orchestrator {
    /// Validate the DAG and templates once.
    pub fn new(stages: Vec<StageDefinition>) -> Result<Self> {
        if stages.is_empty() {
            return Err(SmartAdmitError::validation("pipeline has no stages"));
        }

        let mut seen: HashSet<&str> = HashSet::new();
        for stage in &stages {
            if !seen.insert(stage.name.as_str()) {
                return Err(SmartAdmitError::validation(format!(
                    "duplicate stage name '{}'",
                    stage.name
                )));
            }
        }

        for (position, stage) in stages.iter().enumerate() {
            for dep in &stage.dependencies {
                match stages.iter().position(|s| &s.name == dep) {
                    None => {
                        return Err(SmartAdmitError::validation(format!(
                            "stage '{}' depends on unknown stage '{dep}'",
                            stage.name
                        )));
                    }
                    Some(dep_position) if dep_position >= position => {
                        return Err(SmartAdmitError::validation(format!(
                            "stage '{}' depends on '{dep}', which does not precede it",
                            stage.name
                        )));
                    }
                    Some(_) => {}
                }
            }
            if let Some(name) = stage
                .placeholders()
                .into_iter()
                .find(|p| !stage.accepts_placeholder(p))
            {
                return Err(SmartAdmitError::validation(format!(
                    "stage '{}' uses placeholder '{name}' that is neither a dependency nor a pipeline input",
                    stage.name
                )));
            }
        }

        debug!(stages = stages.len(), "pipeline validated");
        Ok(Self {
            stages,
            current_year: None,
        })
    }

    /// Pin `{{current_year}}` instead of reading the clock.
    pub fn with_current_year(mut self, year: i32) -> Self {
        self.current_year = Some(year);
        self
    }

    pub fn stages(&self) -> &[StageDefinition] {
        &self.stages
    }

    pub fn stage_names(&self) -> Vec<&str> {
        self.stages.iter().map(|s| s.name.as_str()).collect()
    }

    /// First stage without a stored result whose dependencies all have one.
    pub fn next_stage(&self, state: &RunState) -> Option<(usize, &StageDefinition)> {
        self.stages.iter().enumerate().find(|(_, stage)| {
            !state.is_completed(&stage.name)
                && stage.dependencies.iter().all(|d| state.is_completed(d))
        })
    }

    pub fn is_complete(&self, state: &RunState) -> bool {
        self.stages.iter().all(|s| state.is_completed(&s.name))
    }

    /// Execute exactly the next runnable stage, or do nothing when complete.
    ///
    /// On failure, earlier results are untouched, the failure is recorded on
    /// the state, and the error names the stage. Calling again retries it.
    #[instrument(skip_all, fields(run_id = %state.run_id))]
    pub async fn advance(
        &self,
        state: &mut RunState,
        profile: &Profile,
        progress: &dyn StageProgress,
    ) -> Result<Advance> {
        let Some((position, stage)) = self.next_stage(state) else {
            debug!("all stages complete");
            return Ok(Advance::Complete);
        };

        progress.stage_started(&stage.name, position, self.stages.len());
        let span = info_span!("stage", stage = %stage.name, run_id = %state.run_id);
        let started = Instant::now();

        let outcome = self
            .execute(stage, state.results(), profile, progress)
            .instrument(span)
            .await;

        match outcome {
            Ok(result) => {
                info!(
                    stage = %stage.name,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    shape = result.reconciled.shape(),
                    "stage complete"
                );
                progress.stage_completed(&result);
                state.last_failure = None;
                state.results.push(result);
                Ok(Advance::Executed(stage.name.clone()))
            }
            Err(cause) => {
                warn!(stage = %stage.name, error = %cause, "stage failed");
                progress.stage_failed(&stage.name, &cause);
                state.last_failure = Some(StageFailure {
                    stage: stage.name.clone(),
                    cause: cause.to_string(),
                    failed_at: Utc::now(),
                });
                Err(SmartAdmitError::in_stage(stage.name.clone(), cause))
            }
        }
    }

    /// Advance until every stage is complete or one fails.
    pub async fn run_all(
        &self,
        state: &mut RunState,
        profile: &Profile,
        progress: &dyn StageProgress,
    ) -> Result<()> {
        while let Advance::Executed(_) = self.advance(state, profile, progress).await? {}
        Ok(())
    }

    async fn execute(
        &self,
        stage: &StageDefinition,
        results: &[StageResult],
        profile: &Profile,
        progress: &dyn StageProgress,
    ) -> Result<StageResult> {
        let inputs = StageInputs {
            profile,
            results,
            current_year: self.current_year.unwrap_or_else(|| Utc::now().year()),
        };
        let instruction = stage.instruction.render(|name| inputs.lookup(name))?;

        let (notes, sources) = match &stage.research {
            Some(plan) => research(&stage.name, plan, &inputs, progress).await?,
            None => (None, Vec::new()),
        };

        let request = ReasoningRequest::new(
            stage.system_prompt(),
            stage.compose_prompt(&instruction, notes.as_deref()),
        );
        let raw = stage.reasoning.complete(&request).await?;

        Ok(StageResult {
            stage: stage.name.clone(),
            reconciled: reconcile(&raw),
            raw,
            model: stage.reasoning.model_id().to_string(),
            sources,
            completed_at: Utc::now(),
        })
    }
}

/// Search, then fetch the top hits. A search failure fails the stage; a
/// page that cannot be fetched is skipped.
async fn research(
    stage: &str,
    plan: &ResearchPlan,
    inputs: &StageInputs<'_>,
    progress: &dyn StageProgress,
) -> Result<(Option<String>, Vec<String>)> {
    let query = plan.query.render(|name| inputs.lookup(name))?;
    progress.research(stage, &query);

    let hits = plan.search.search(&query, plan.max_results).await?;
    debug!(query = %query, hits = hits.len(), "research search done");

    let mut notes = String::new();
    for hit in &hits {
        let _ = writeln!(notes, "- {} ({}): {}", hit.title, hit.link, hit.snippet);
    }

    let mut sources = Vec::new();
    if let Some(fetch) = &plan.fetch {
        for hit in hits.iter().take(plan.fetch_top) {
            let url = match Url::parse(&hit.link) {
                Ok(url) => url,
                Err(e) => {
                    warn!(link = %hit.link, error = %e, "skipping unparseable link");
                    continue;
                }
            };
            match fetch.fetch(&url).await {
                Ok(page) => {
                    let title = page.title.as_deref().unwrap_or(&hit.title);
                    let _ = write!(notes, "\n### {title}\nSource: {}\n\n{}\n", page.url, page.text);
                    sources.push(page.url);
                }
                Err(e) => warn!(url = %url, error = %e, "page fetch failed, skipping"),
            }
        }
    }

    Ok((Some(notes).filter(|n| !n.trim().is_empty()), sources))
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::Arc;

    use super::*;
    use crate::stage::PromptTemplate;
    use crate::testing::{FakeFetch, FakeSearch, ScriptedReasoning, hit};
    use smartadmit_shared::{ProfileField, ReasoningClient, Reconciled};

    fn three_stages(llm: &Arc<ScriptedReasoning>) -> Vec<StageDefinition> {
        let client: Arc<dyn ReasoningClient> = llm.clone();
        vec![
            StageDefinition::new("normalize", "Normalize: {{profile}}", client.clone()),
            StageDefinition::new("match", "Match using {{normalize}}", client.clone())
                .depends_on(&["normalize"]),
            StageDefinition::new("rank", "Rank {{match}} in {{current_year}}", client)
                .depends_on(&["match"]),
        ]
    }

    fn profile() -> Profile {
        let mut p = Profile::new("I'm Asha.");
        p.set_text(ProfileField::StudentName, "Asha");
        p
    }

    fn assert_validation(stages: Vec<StageDefinition>, needle: &str) {
        match Orchestrator::new(stages) {
            Err(SmartAdmitError::Validation { message }) => {
                assert!(message.contains(needle), "{message}")
            }
            other => panic!("expected validation error, got {other:?}"),
        }
    }

    #[test]
    fn construction_rejects_bad_dags() {
        let llm = Arc::new(ScriptedReasoning::ok(&[]));
        let client: Arc<dyn ReasoningClient> = llm.clone();

        assert_validation(vec![], "no stages");
        assert_validation(
            vec![
                StageDefinition::new("a", "x", client.clone()),
                StageDefinition::new("a", "y", client.clone()),
            ],
            "duplicate stage name 'a'",
        );
        assert_validation(
            vec![StageDefinition::new("a", "x", client.clone()).depends_on(&["ghost"])],
            "unknown stage 'ghost'",
        );
        assert_validation(
            vec![
                StageDefinition::new("a", "{{b}}", client.clone()).depends_on(&["b"]),
                StageDefinition::new("b", "x", client.clone()),
            ],
            "does not precede",
        );
        assert_validation(
            vec![StageDefinition::new("a", "x", client.clone()).depends_on(&["a"])],
            "does not precede",
        );
        assert_validation(
            vec![
                StageDefinition::new("a", "x", client.clone()),
                StageDefinition::new("b", "{{a}}", client.clone()),
            ],
            "placeholder 'a'",
        );

        let search = Arc::new(FakeSearch::new(vec![]));
        let with_bad_query = StageDefinition::new("a", "x", client).with_research(ResearchPlan {
            query: PromptTemplate::new("{{profile.shoe_size}}"),
            max_results: 3,
            fetch_top: 0,
            search,
            fetch: None,
        });
        assert_validation(vec![with_bad_query], "profile.shoe_size");
    }

    #[tokio::test]
    async fn advance_runs_one_stage_per_call_and_is_idempotent_when_done() {
        let llm = Arc::new(ScriptedReasoning::ok(&[
            r#"{"student_name": "Asha"}"#,
            r#"[{"university": "U1"}, {"university": "U2"}]"#,
            "U2 first, then U1.",
        ]));
        let orch = Orchestrator::new(three_stages(&llm)).unwrap().with_current_year(2026);
        let mut state = RunState::new();
        let p = profile();

        assert_eq!(
            orch.advance(&mut state, &p, &SilentProgress).await.unwrap(),
            Advance::Executed("normalize".into())
        );
        assert_eq!(state.results().len(), 1);
        assert!(matches!(state.results()[0].reconciled, Reconciled::Record(_)));
        assert_eq!(llm.calls(), 1);

        orch.advance(&mut state, &p, &SilentProgress).await.unwrap();
        orch.advance(&mut state, &p, &SilentProgress).await.unwrap();
        assert!(orch.is_complete(&state));
        assert_eq!(state.results()[2].reconciled, Reconciled::Narrative("U2 first, then U1.".into()));

        let before = state.clone();
        assert_eq!(
            orch.advance(&mut state, &p, &SilentProgress).await.unwrap(),
            Advance::Complete
        );
        assert_eq!(state, before);
        assert_eq!(llm.calls(), 3);
    }

    #[tokio::test]
    async fn dependency_output_and_inputs_reach_the_prompt() {
        let llm = Arc::new(ScriptedReasoning::ok(&[
            "normalized text",
            r#"Here: [{"university": "U1"}]"#,
            "ranked",
        ]));
        let orch = Orchestrator::new(three_stages(&llm)).unwrap().with_current_year(2031);
        let mut state = RunState::new();
        orch.run_all(&mut state, &profile(), &SilentProgress).await.unwrap();

        let requests = llm.requests();
        assert!(requests[0].prompt.contains("\"student_name\": \"Asha\""));
        assert!(requests[1].prompt.starts_with("Match using normalized text"));
        assert!(requests[2].prompt.contains("\"university\": \"U1\""));
        assert!(!requests[2].prompt.contains("Here:"));
        assert!(requests[2].prompt.ends_with("in 2031"));
    }

    #[tokio::test]
    async fn failure_halts_and_keeps_earlier_results() {
        let llm = Arc::new(ScriptedReasoning::new(vec![
            Ok("normalized".into()),
            Err(SmartAdmitError::Reasoning("HTTP 401: invalid key".into())),
        ]));
        let orch = Orchestrator::new(three_stages(&llm)).unwrap();
        let mut state = RunState::new();
        let p = profile();

        let err = orch.run_all(&mut state, &p, &SilentProgress).await.unwrap_err();
        match &err {
            SmartAdmitError::Stage { stage, source } => {
                assert_eq!(stage, "match");
                assert!(source.to_string().contains("HTTP 401"));
            }
            other => panic!("expected stage error, got {other:?}"),
        }
        assert_eq!(state.results().len(), 1);
        let failure = state.last_failure().expect("failure recorded");
        assert_eq!(failure.stage, "match");
        assert!(failure.cause.contains("invalid key"));

        // Retrying re-runs only the failed stage
        llm.push(Ok("[]".into()));
        llm.push(Ok("ranked".into()));
        orch.run_all(&mut state, &p, &SilentProgress).await.unwrap();
        assert!(orch.is_complete(&state));
        assert!(state.last_failure().is_none());
        assert_eq!(llm.calls(), 4);
        assert_eq!(state.result("match").unwrap().reconciled, Reconciled::Records(vec![]));
    }

    #[tokio::test]
    async fn resumes_from_stored_results() {
        let llm = Arc::new(ScriptedReasoning::ok(&["matched", "ranked"]));
        let orch = Orchestrator::new(three_stages(&llm)).unwrap();
        let stored = StageResult {
            stage: "normalize".into(),
            raw: "stored".into(),
            reconciled: Reconciled::Narrative("stored".into()),
            model: "earlier-model".into(),
            sources: vec![],
            completed_at: Utc::now(),
        };
        let mut state = RunState::from_parts(RunId::new(), vec![stored], None);

        let step = orch.advance(&mut state, &profile(), &SilentProgress).await.unwrap();
        assert_eq!(step, Advance::Executed("match".into()));
        assert_eq!(llm.requests()[0].prompt, "Match using stored");
    }

    #[tokio::test]
    async fn research_notes_and_sources() {
        let llm = Arc::new(ScriptedReasoning::ok(&["No matching scholarships found."]));
        let client: Arc<dyn ReasoningClient> = llm.clone();
        let search = Arc::new(FakeSearch::new(vec![
            hit("Grant A", "https://a.example.org/grant", "Up to $5,000"),
            hit("Grant B", "https://b.example.org/grant", "Full tuition"),
            hit("Grant C", "https://c.example.org/grant", "Travel"),
        ]));
        let fetch = Arc::new(FakeFetch {
            pages: HashMap::from([(
                "https://a.example.org/grant".to_string(),
                "Eligibility: GPA above 3.5".to_string(),
            )]),
        });
        let stage = StageDefinition::new("scholarships", "Find grants for {{profile.student_name}}.", client)
            .with_research(ResearchPlan {
                query: PromptTemplate::new("scholarships for {{profile.specialization}} {{current_year}}"),
                max_results: 5,
                fetch_top: 2,
                search: search.clone(),
                fetch: Some(fetch),
            });
        let orch = Orchestrator::new(vec![stage]).unwrap().with_current_year(2026);
        let mut state = RunState::new();
        orch.run_all(&mut state, &profile(), &SilentProgress).await.unwrap();

        assert_eq!(search.queries(), vec!["scholarships for not specified 2026"]);
        let prompt = &llm.requests()[0].prompt;
        assert!(prompt.starts_with("Find grants for Asha."));
        assert!(prompt.contains("- Grant C (https://c.example.org/grant): Travel"));
        assert!(prompt.contains("Eligibility: GPA above 3.5"));

        let result = state.result("scholarships").unwrap();
        assert_eq!(result.sources, vec!["https://a.example.org/grant"]);
        assert!(matches!(result.reconciled, Reconciled::NoResults(_)));
        assert_eq!(result.model, "scripted-model");
    }

    #[tokio::test]
    async fn search_failure_is_a_stage_failure() {
        let llm = Arc::new(ScriptedReasoning::ok(&["unused"]));
        let client: Arc<dyn ReasoningClient> = llm.clone();
        let stage = StageDefinition::new("reviews", "Collect reviews.", client).with_research(ResearchPlan {
            query: PromptTemplate::new("reviews"),
            max_results: 3,
            fetch_top: 0,
            search: Arc::new(FakeSearch::failing()),
            fetch: None,
        });
        let orch = Orchestrator::new(vec![stage]).unwrap();
        let mut state = RunState::new();

        let err = orch.advance(&mut state, &profile(), &SilentProgress).await.unwrap_err();
        assert!(err.to_string().contains("stage 'reviews' failed"));
        assert!(state.results().is_empty());
        assert_eq!(llm.calls(), 0);
    }

    #[test]
    fn reset_clears_results_and_failure() {
        let mut state = RunState::from_parts(
            RunId::new(),
            vec![StageResult {
                stage: "normalize".into(),
                raw: "x".into(),
                reconciled: Reconciled::Narrative("x".into()),
                model: "m".into(),
                sources: vec![],
                completed_at: Utc::now(),
            }],
            Some(StageFailure {
                stage: "match".into(),
                cause: "boom".into(),
                failed_at: Utc::now(),
            }),
        );
        let id = state.run_id;
        state.reset_for_refinement();
        assert!(state.results().is_empty());
        assert!(state.last_failure().is_none());
        assert_eq!(state.run_id, id);
    }
}
