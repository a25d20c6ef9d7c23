//! The advising session state machine.
//!
//! `AwaitingCredentials → AwaitingProfile → Processing(stage)… → ResultsReady`,
//! strictly forward, except `refine` (back to the first stage with the
//! profile kept) and `new_search` (back to `AwaitingProfile`). The phase is
//! derived from what the session holds, never stored separately.

use std::fmt;
use std::sync::Arc;

use tracing::{info, instrument};

use smartadmit_shared::{Credentials, Profile, QaExchange, Result, SmartAdmitError};

use crate::orchestrator::{Advance, Orchestrator, RunState, StageProgress};
use crate::pipeline::{AdmissionStage, PipelineClients, ResearchSettings, admissions_orchestrator};
use crate::qa::answer_question;

/// Builds provider clients once credentials are known.
pub trait ClientFactory: Send + Sync {
    fn connect(&self, credentials: &Credentials) -> Result<PipelineClients>;
}

/// Where the session is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    AwaitingCredentials,
    AwaitingProfile,
    Processing(AdmissionStage),
    ResultsReady,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AwaitingCredentials => f.write_str("awaiting credentials"),
            Self::AwaitingProfile => f.write_str("awaiting profile"),
            Self::Processing(stage) => f.write_str(stage.activity()),
            Self::ResultsReady => f.write_str("results ready"),
        }
    }
}

struct Connected {
    clients: PipelineClients,
    orchestrator: Orchestrator,
}

pub struct Session {
    factory: Arc<dyn ClientFactory>,
    settings: ResearchSettings,
    current_year: Option<i32>,
    connected: Option<Connected>,
    profile: Option<Profile>,
    state: RunState,
    qa_history: Vec<QaExchange>,
}

impl Session {
    pub fn new(factory: Arc<dyn ClientFactory>, settings: ResearchSettings) -> Self {
        Self {
            factory,
            settings,
            current_year: None,
            connected: None,
            profile: None,
            state: RunState::new(),
            qa_history: Vec::new(),
        }
    }

    /// Pin `{{current_year}}` for every orchestrator this session builds.
    pub fn with_current_year(mut self, year: i32) -> Self {
        self.current_year = Some(year);
        self
    }

    pub fn phase(&self) -> Phase {
        let Some(connected) = &self.connected else {
            return Phase::AwaitingCredentials;
        };
        if self.profile.is_none() {
            return Phase::AwaitingProfile;
        }
        match connected.orchestrator.next_stage(&self.state) {
            Some((_, stage)) => AdmissionStage::from_key(&stage.name)
                .map(Phase::Processing)
                .unwrap_or(Phase::ResultsReady),
            None => Phase::ResultsReady,
        }
    }

    pub fn profile(&self) -> Option<&Profile> {
        self.profile.as_ref()
    }

    pub fn state(&self) -> &RunState {
        &self.state
    }

    pub fn qa_history(&self) -> &[QaExchange] {
        &self.qa_history
    }

    /// Connect providers and build the pipeline. Allowed in any phase so a
    /// restored session can reconnect.
    #[instrument(skip_all)]
    pub fn set_credentials(&mut self, credentials: &Credentials) -> Result<()> {
        let clients = self.factory.connect(credentials)?;
        let mut orchestrator = admissions_orchestrator(&clients, self.settings)?;
        if let Some(year) = self.current_year {
            orchestrator = orchestrator.with_current_year(year);
        }

        let expected: Vec<&str> = AdmissionStage::ALL.iter().map(|s| s.key()).collect();
        if orchestrator.stage_names() != expected {
            return Err(SmartAdmitError::validation(
                "pipeline stages do not match the session's processing states",
            ));
        }

        self.connected = Some(Connected {
            clients,
            orchestrator,
        });
        info!("session connected");
        Ok(())
    }

    /// Start a run for `profile`.
    pub fn submit_profile(&mut self, profile: Profile) -> Result<()> {
        self.require(Phase::AwaitingProfile, "submit a profile")?;
        self.profile = Some(profile);
        self.state = RunState::new();
        self.qa_history.clear();
        info!(run_id = %self.state.run_id, "profile submitted");
        Ok(())
    }

    /// Reattach a persisted run.
    pub fn restore(&mut self, profile: Profile, state: RunState, qa_history: Vec<QaExchange>) -> Result<()> {
        if self.connected.is_none() {
            return Err(SmartAdmitError::validation(
                "cannot restore a run before credentials are set",
            ));
        }
        self.profile = Some(profile);
        self.state = state;
        self.qa_history = qa_history;
        Ok(())
    }

    /// Run the next stage. A no-op once results are ready.
    pub async fn advance(&mut self, progress: &dyn StageProgress) -> Result<Advance> {
        let (Some(connected), Some(profile)) = (&self.connected, &self.profile) else {
            return Err(self.not_running("advance"));
        };
        connected
            .orchestrator
            .advance(&mut self.state, profile, progress)
            .await
    }

    /// Run every remaining stage, stopping at the first failure.
    pub async fn run_all(&mut self, progress: &dyn StageProgress) -> Result<()> {
        let (Some(connected), Some(profile)) = (&self.connected, &self.profile) else {
            return Err(self.not_running("run the pipeline"));
        };
        connected
            .orchestrator
            .run_all(&mut self.state, profile, progress)
            .await
    }

    /// Record feedback, clear every stage result, and go back to the first
    /// stage.
    pub fn refine(&mut self, feedback: &str) -> Result<()> {
        self.require(Phase::ResultsReady, "refine")?;
        let feedback = feedback.trim();
        if feedback.is_empty() {
            return Err(SmartAdmitError::validation("refinement feedback is empty"));
        }
        if let Some(profile) = self.profile.as_mut() {
            profile.user_feedback = Some(feedback.to_string());
        }
        self.state.reset_for_refinement();
        info!(run_id = %self.state.run_id, "refinement requested");
        Ok(())
    }

    /// Drop the profile and every result.
    pub fn new_search(&mut self) -> Result<()> {
        self.require(Phase::ResultsReady, "start a new search")?;
        self.profile = None;
        self.state = RunState::new();
        self.qa_history.clear();
        Ok(())
    }

    /// Answer a follow-up question and keep it in the history.
    pub async fn ask(&mut self, question: &str) -> Result<QaExchange> {
        self.require(Phase::ResultsReady, "ask questions")?;
        let (Some(connected), Some(profile)) = (&self.connected, &self.profile) else {
            return Err(self.not_running("ask questions"));
        };
        let exchange = answer_question(
            connected.clients.reasoning.as_ref(),
            Some(connected.clients.search.as_ref()),
            profile,
            self.state.results(),
            question,
        )
        .await?;
        self.qa_history.push(exchange.clone());
        Ok(exchange)
    }

    fn require(&self, wanted: Phase, action: &str) -> Result<()> {
        let phase = self.phase();
        if phase == wanted {
            Ok(())
        } else {
            Err(SmartAdmitError::validation(format!(
                "cannot {action} while {phase}"
            )))
        }
    }

    fn not_running(&self, action: &str) -> SmartAdmitError {
        SmartAdmitError::validation(format!("cannot {action} while {}", self.phase()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::orchestrator::SilentProgress;
    use crate::testing::{FakeSearch, ScriptedReasoning};
    use smartadmit_shared::ProfileField;

    struct Factory {
        llm: Arc<ScriptedReasoning>,
    }

    impl ClientFactory for Factory {
        fn connect(&self, _credentials: &Credentials) -> Result<PipelineClients> {
            Ok(PipelineClients {
                reasoning: self.llm.clone(),
                search: Arc::new(FakeSearch::new(vec![])),
                fetch: None,
            })
        }
    }

    const REPLIES: [&str; 5] = [
        "normalized",
        r#"[{"university": "U1"}]"#,
        r#"[{"rank": 1, "university": "U1"}]"#,
        "No matching scholarships found",
        r#"[{"university": "U1", "rating": 4}]"#,
    ];

    fn session(llm: &Arc<ScriptedReasoning>) -> Session {
        Session::new(Arc::new(Factory { llm: llm.clone() }), ResearchSettings::default())
    }

    fn creds() -> Credentials {
        Credentials::new("or-key", "serper-key").unwrap()
    }

    fn profile() -> Profile {
        let mut p = Profile::new("I'm John Smith");
        p.set_text(ProfileField::StudentName, "John Smith");
        p
    }

    #[tokio::test]
    async fn walks_forward_through_every_stage() {
        let llm = Arc::new(ScriptedReasoning::ok(&REPLIES));
        let mut s = session(&llm);
        assert_eq!(s.phase(), Phase::AwaitingCredentials);

        s.set_credentials(&creds()).unwrap();
        assert_eq!(s.phase(), Phase::AwaitingProfile);

        s.submit_profile(profile()).unwrap();
        let mut seen = Vec::new();
        while let Phase::Processing(stage) = s.phase() {
            seen.push(stage);
            s.advance(&SilentProgress).await.unwrap();
        }
        assert_eq!(seen, AdmissionStage::ALL.to_vec());
        assert_eq!(s.phase(), Phase::ResultsReady);
        assert_eq!(s.advance(&SilentProgress).await.unwrap(), Advance::Complete);
    }

    #[tokio::test]
    async fn failed_stage_keeps_phase_until_success() {
        let llm = Arc::new(ScriptedReasoning::new(vec![
            Ok("normalized".into()),
            Err(SmartAdmitError::Network("timeout".into())),
        ]));
        let mut s = session(&llm);
        s.set_credentials(&creds()).unwrap();
        s.submit_profile(profile()).unwrap();

        assert!(s.run_all(&SilentProgress).await.is_err());
        assert_eq!(s.phase(), Phase::Processing(AdmissionStage::MatchedPrograms));
        assert_eq!(s.state().results().len(), 1);
        assert_eq!(s.state().last_failure().unwrap().stage, "matched_programs");
    }

    #[tokio::test]
    async fn refine_resets_results_and_keeps_profile() {
        let llm = Arc::new(ScriptedReasoning::ok(&REPLIES));
        let mut s = session(&llm);
        s.set_credentials(&creds()).unwrap();
        s.submit_profile(profile()).unwrap();
        s.run_all(&SilentProgress).await.unwrap();

        assert!(s.refine("   ").is_err());
        s.refine("Prefer cheaper universities").unwrap();
        assert_eq!(s.phase(), Phase::Processing(AdmissionStage::NormalizedProfile));
        assert!(s.state().results().is_empty());
        let p = s.profile().unwrap();
        assert_eq!(p.display(ProfileField::StudentName), "John Smith");
        assert_eq!(p.user_feedback.as_deref(), Some("Prefer cheaper universities"));

        for reply in REPLIES {
            llm.push(Ok(reply.into()));
        }
        s.run_all(&SilentProgress).await.unwrap();
        assert!(llm.requests()[5].prompt.contains("Prefer cheaper universities"));
    }

    #[tokio::test]
    async fn illegal_transitions_are_rejected() {
        let llm = Arc::new(ScriptedReasoning::ok(&REPLIES));
        let mut s = session(&llm);

        assert!(s.submit_profile(profile()).is_err());
        assert!(s.advance(&SilentProgress).await.is_err());
        assert!(s.ask("anything?").await.is_err());

        s.set_credentials(&creds()).unwrap();
        s.submit_profile(profile()).unwrap();
        let err = s.refine("cheaper").unwrap_err();
        assert!(err.to_string().contains("cannot refine while Normalizing profile"));
        assert!(s.new_search().is_err());
        assert!(s.submit_profile(profile()).is_err());
    }

    #[tokio::test]
    async fn questions_and_new_search() {
        let llm = Arc::new(ScriptedReasoning::ok(&REPLIES));
        llm.push(Ok("U1 requires IELTS 6.5.".into()));
        let mut s = session(&llm);
        s.set_credentials(&creds()).unwrap();
        s.submit_profile(profile()).unwrap();
        s.run_all(&SilentProgress).await.unwrap();

        let exchange = s.ask("What English test does U1 need?").await.unwrap();
        assert_eq!(exchange.answer, "U1 requires IELTS 6.5.");
        assert_eq!(s.qa_history().len(), 1);

        s.new_search().unwrap();
        assert_eq!(s.phase(), Phase::AwaitingProfile);
        assert!(s.profile().is_none());
        assert!(s.qa_history().is_empty());
    }

    #[tokio::test]
    async fn restore_resumes_mid_run() {
        let llm = Arc::new(ScriptedReasoning::ok(&REPLIES));
        let mut first = session(&llm);
        first.set_credentials(&creds()).unwrap();
        first.submit_profile(profile()).unwrap();
        first.advance(&SilentProgress).await.unwrap();
        first.advance(&SilentProgress).await.unwrap();
        let saved = first.state().clone();

        let mut second = session(&llm);
        assert!(second.restore(profile(), saved.clone(), vec![]).is_err());
        second.set_credentials(&creds()).unwrap();
        second.restore(profile(), saved, vec![]).unwrap();
        assert_eq!(second.phase(), Phase::Processing(AdmissionStage::RankedPrograms));
        second.run_all(&SilentProgress).await.unwrap();
        assert_eq!(second.phase(), Phase::ResultsReady);
        assert_eq!(llm.calls(), 5);
    }
}
