//! Follow-up questions answered from the run's research context.

use chrono::Utc;
use tracing::{debug, instrument, warn};

use smartadmit_shared::{
    Profile, ProfileField, QaExchange, ReasoningClient, ReasoningRequest, Result,
    SearchCapability, SmartAdmitError, StageResult, truncate_chars,
};

use crate::pipeline::AdmissionStage;
use crate::stage::result_text;

/// Per-stage cap on context handed to the model.
const CONTEXT_CHARS_PER_STAGE: usize = 3000;
const SEARCH_RESULTS: usize = 5;

const QA_SYSTEM: &str = "You are the Application Guide & Consultant. You help a student \
with questions about universities, programs, scholarships and applications, grounded in the \
research already done for them.";

/// Answer `question` using the stored stage results and, when available,
/// fresh search snippets. A failed search only narrows the context.
#[instrument(skip_all, fields(results = results.len()))]
pub async fn answer_question(
    reasoning: &dyn ReasoningClient,
    search: Option<&dyn SearchCapability>,
    profile: &Profile,
    results: &[StageResult],
    question: &str,
) -> Result<QaExchange> {
    let question = question.trim();
    if question.is_empty() {
        return Err(SmartAdmitError::validation("question is empty"));
    }

    let snippets = match search {
        Some(search) => match search.search(question, SEARCH_RESULTS).await {
            Ok(hits) => hits
                .iter()
                .map(|h| format!("- {} ({}): {}", h.title, h.link, h.snippet))
                .collect::<Vec<_>>(),
            Err(e) => {
                warn!(error = %e, "search for question failed, answering from stored research");
                Vec::new()
            }
        },
        None => Vec::new(),
    };
    debug!(snippets = snippets.len(), "question context ready");

    let prompt = qa_prompt(profile, results, question, &snippets);
    let answer = reasoning
        .complete(&ReasoningRequest::new(QA_SYSTEM, prompt))
        .await?;

    Ok(QaExchange {
        question: question.to_string(),
        answer: answer.trim().to_string(),
        asked_at: Utc::now(),
    })
}

fn qa_prompt(profile: &Profile, results: &[StageResult], question: &str, snippets: &[String]) -> String {
    let mut prompt = format!("Student question: {question}\n\nStudent:\n");
    for field in [
        ProfileField::StudentName,
        ProfileField::AcademicLevel,
        ProfileField::Specialization,
        ProfileField::PreferredLocations,
        ProfileField::Budget,
    ] {
        prompt.push_str(&format!("- {}: {}\n", field.label(), profile.display(field)));
    }

    prompt.push_str("\nResearch so far:\n");
    for result in results {
        let title = AdmissionStage::from_key(&result.stage)
            .map(|s| s.title())
            .unwrap_or(result.stage.as_str());
        let text = truncate_chars(&result_text(&result.reconciled), CONTEXT_CHARS_PER_STAGE);
        prompt.push_str(&format!("\n## {title}\n{text}\n"));
    }

    if !snippets.is_empty() {
        prompt.push_str("\nFresh search results:\n");
        prompt.push_str(&snippets.join("\n"));
        prompt.push('\n');
    }

    prompt.push_str(
        "\nAnswer practically and concisely. Use the research and search results above; \
         if the answer is not there, say what is unknown and where the student can check. \
         Do not invent deadlines, fees or requirements.",
    );
    prompt
}
