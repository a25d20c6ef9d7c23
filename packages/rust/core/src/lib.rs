//! Pipeline orchestration and domain logic for SmartAdmit.
//!
//! This crate turns a student's free-text profile into admissions advice:
//! pattern and model extraction into a [`Profile`](smartadmit_shared::Profile),
//! a validated stage DAG run one stage at a time, reconciliation of model
//! output, the session state machine, follow-up Q&A, and the Markdown report.

pub mod extract;
pub mod intake;
pub mod merge;
pub mod orchestrator;
pub mod pipeline;
pub mod qa;
pub mod reconcile;
pub mod report;
pub mod session;
pub mod stage;

#[cfg(test)]
mod testing;

pub use extract::TextExtractor;
pub use intake::{Intake, IntakeOutcome, apply_answer, follow_up_questions};
pub use merge::{merge_profiles, profile_from_record};
pub use orchestrator::{Advance, Orchestrator, RunState, SilentProgress, StageProgress};
pub use pipeline::{AdmissionStage, PipelineClients, ResearchSettings, admissions_orchestrator};
pub use qa::answer_question;
pub use reconcile::reconcile;
pub use report::{rating_to_stars, render_report};
pub use session::{ClientFactory, Phase, Session};
pub use stage::{PromptTemplate, ResearchPlan, StageDefinition};
