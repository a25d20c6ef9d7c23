//! Pattern-based profile extraction from the student's own words.
//!
//! Every rule anchors on an explicit cue ("my budget is", "CGPA of",
//! "pursuing B.Tech"); a field with no cue stays absent.

use std::sync::LazyLock;

use regex::Regex;
use tracing::debug;

use smartadmit_shared::{AcademicLevel, ExamEntry, FieldValue, Profile, ProfileField};

/// Capitalized words that follow "I'm" without being a name.
const NAME_STOPWORDS: &[&str] = &[
    "A", "An", "The", "Also", "Currently", "Interested", "Looking", "Planning", "Pursuing",
    "Studying", "Working", "From", "In", "Indian", "Very", "Really", "Not",
];

/// Words that open a "interested in ..." phrase about places, not fields.
const SPECIALIZATION_STOPWORDS: &[&str] = &[
    "studying", "study", "colleges", "college", "universities", "university", "programs",
    "programmes", "pursuing", "doing", "going", "applying", "getting", "the", "a", "an", "top",
    "options", "scholarships",
];

macro_rules! pattern {
    ($name:ident, $re:expr) => {
        static $name: LazyLock<Regex> = LazyLock::new(|| Regex::new($re).expect("valid regex"));
    };
}

pattern!(NAME, r"\b(?i:i[’']?m|i am|my name is|this is)\s+([A-Z][a-z]+(?:\s+[A-Z][a-z]+){0,2})");

pattern!(
    LEVEL_POSTGRADUATE,
    r"(?i)\b(?:pursuing|doing|enrolled in|studying)\s+(?:my\s+|an?\s+|the\s+)?(?:m\.?\s?tech|msc|m\.sc|mba|master'?s|ph\.?d)\b"
);
pattern!(
    LEVEL_UNDERGRADUATE,
    r"(?i)\b(?:(?:pursuing|doing|enrolled in|studying|student of)\s+(?:my\s+|an?\s+|the\s+)?(?:b\.?\s?tech|b\.?e|b\.?sc|bca|bba|b\.?com|mbbs|bachelor'?s?)\b|undergraduate student|college student)"
);
pattern!(
    LEVEL_WORKING,
    r"(?i)\b(?:working as|working at|i work (?:at|as)|employed (?:at|as)|years? of (?:work\s+)?experience)\b"
);
pattern!(
    LEVEL_HIGH_SCHOOL,
    r"(?i)\b(?:12th|class\s*(?:12|xii)|grade\s*12|high\s*school|higher secondary)\b"
);

pattern!(
    CURRENT_DEGREE,
    r"\b(?i:pursuing|doing|completed|finished|have|hold|studying|graduated with|did)\s+(?:(?i:an?|my|the)\s+)?((?i:b\.?\s?tech|m\.?\s?tech|b\.?e|b\.?sc|m\.?sc|bca|mca|bba|mba|b\.?com|b\.?a|bachelor'?s|master'?s|mbbs|ms)\b(?:\s+(?:(?i:degree)\s+)?(?i:in)\s+[A-Z][A-Za-z&]*(?:\s+[A-Z][A-Za-z&]*)*)?)"
);

pattern!(
    GRADUATION_YEAR,
    r"(?i)\b(?:graduat\w*|pass(?:ing)?\s+out|complet\w*|finish\w*|class of|batch of)\b\D{0,25}?((?:19|20)\d{2})\b"
);

pattern!(
    CGPA_AFTER,
    r"(?i)\b(?:c?gpa|cpi|sgpa)\b\s*(?:of|is|:|=|-)?\s*(?:around|about|approximately|approx\.?|~)?\s*(\d{1,2}(?:\.\d{1,2})?(?:\s*/\s*\d{1,2}(?:\.\d{1,2})?)?)"
);
pattern!(
    CGPA_BEFORE,
    r"(?i)\b(\d{1,2}\.\d{1,2}(?:\s*/\s*\d{1,2})?)\s*(?:c?gpa|cpi)\b"
);

pattern!(BOARD, r"\b(CBSE|ICSE|ISC|IGCSE|IB|(?i:state board))\b");

pattern!(
    CLASS12_AFTER,
    r"(?i)\b(?:12th|class\s*(?:12|xii)|xii|hsc|higher secondary|board exams?)\b[^.%\n]{0,40}?(\d{2,3}(?:\.\d{1,2})?\s*%|\d{3}\s*/\s*\d{3})"
);
pattern!(
    CLASS12_BEFORE,
    r"(?i)(\d{2,3}(?:\.\d{1,2})?\s*%)\s+(?:in|at)\s+(?:the\s+)?(?:class\s*(?:12|xii)|12th|xii|hsc|board exams?|boards)\b"
);

pattern!(
    EXAM,
    r"\b(JEE Mains|JEE Main|JEE Advanced|JEE|NEET-UG|NEET|SAT|ACT|GRE|GMAT|IELTS|TOEFL|PTE|CAT|GATE|CUET|BITSAT)\b"
);
pattern!(
    EXAM_SCORE,
    r"(?i)\b((?:AIR|rank)\s*\d[\d,]*|\d[\d,]*(?:\.\d+)?\s*(?:percentile|%ile|%|marks|points|bands?|/\s*\d+)?)"
);
pattern!(SENTENCE_END, r"[.;!?](?:\s|$)|\n");

pattern!(
    CAREER_GOAL,
    r"(?i)\b(?:become|becoming|be|work as|career as)\s+(?:an?\s+)?((?:[\w/&+-]+\s+){0,3}?(?:engineer|scientist|developer|researcher|analyst|doctor|physician|surgeon|manager|designer|consultant|architect|entrepreneur|professor|lawyer|teacher|banker|accountant))s?\b"
);

pattern!(
    BUDGET,
    r"(?i)\b(?:budget|afford|spend)\b[^.\n]{0,30}?((?:[$₹£€]|\brs\.?|\binr|\busd|\beur|\bgbp)\s?\d[\d,]*(?:\.\d+)?(?:\s?-\s?\d[\d,]*(?:\.\d+)?)?(?:\s?(?:k|lakhs?|lacs?|crores?)\b)?|\d[\d,]*(?:\.\d+)?(?:\s?-\s?\d[\d,]*(?:\.\d+)?)?\s?(?:k|lakhs?|lacs?|crores?|usd|inr|eur|euros|gbp|dollars|rupees|pounds)\b)(\s+(?:per|a|/)\s*(?:year|annum|yr)\b)?"
);

pattern!(
    LOCATION,
    r"\b(United States|United Kingdom|New Zealand|Hong Kong|South Korea|USA|UAE|UK|US|Canada|Germany|Australia|France|Singapore|Netherlands|Ireland|India|Japan|Sweden|Switzerland|Italy|Spain|Dubai|Europe|Finland|Denmark|Norway|Austria|Belgium|Poland|China)\b"
);

pattern!(
    SPECIALIZATION_INTEREST,
    r"\b(?i:interested in|speciali[sz](?:e|ing|ation) in|focus(?:ing)? on|major(?:ing)? in|passionate about)\s+([A-Za-z][A-Za-z/&+ -]{1,40}?)(?:\s+(?i:speciali[sz]ation)|\s+(?i:and|for|at|in|with)\b|[.,;!]|$)"
);
pattern!(
    SPECIALIZATION_PLAN,
    r"\b(?i:want to|planning to|plan to|hope to|wish to|aspire to)\s+(?i:do|pursue|study)\s+(?:(?i:an?|my)\s+)?[A-Za-z.']+(?:\s+[A-Za-z.']+)?\s+(?i:in)\s+([A-Z][A-Za-z&]*(?:\s+[A-Z][A-Za-z&]*)*)"
);

pattern!(
    INTENDED_POSTGRADUATE,
    r"(?i)\b(?:for|pursue|do|apply(?:ing)? for|get|into|study)\s+(?:an?\s+|my\s+)?(?:master'?s\b|ms\b|m\.s\.|mba\b|m\.?\s?tech\b|phd\b|ph\.d|postgraduate\b|pg\b)"
);
pattern!(
    INTENDED_UNDERGRADUATE,
    r"(?i)\b(?:for|pursue|do|apply(?:ing)? for|get|into|study)\s+(?:an?\s+|my\s+)?(?:b\.?\s?tech\b|bachelor'?s\b|b\.?sc\b|bba\b|bca\b|b\.?e\b|mbbs\b|undergraduate\b|ug\b)"
);

/// Best-effort partial profile from free text.
#[derive(Debug, Default, Clone, Copy)]
pub struct TextExtractor;

impl TextExtractor {
    pub fn new() -> Self {
        Self
    }

    /// Extract what the text states explicitly. `raw_input_text` is set to
    /// the full input.
    pub fn extract(&self, text: &str) -> Profile {
        let mut profile = Profile::new(text);

        if let Some(name) = student_name(text) {
            profile.set_text(ProfileField::StudentName, name);
        }
        if let Some(level) = academic_level(text) {
            profile.set_text(ProfileField::AcademicLevel, level.as_str());
        }
        if let Some(degree) = first_capture(&CURRENT_DEGREE, text) {
            profile.set_text(ProfileField::CurrentDegree, degree);
        }
        if let Some(year) = first_capture(&GRADUATION_YEAR, text) {
            profile.set_text(ProfileField::GraduationYear, year);
        }
        if let Some(cgpa) = first_capture(&CGPA_AFTER, text).or_else(|| first_capture(&CGPA_BEFORE, text)) {
            profile.set_text(ProfileField::Cgpa, cgpa);
        }
        if let Some(board) = first_capture(&BOARD, text) {
            profile.set_text(ProfileField::Board, board);
        }
        if let Some(score) =
            first_capture(&CLASS12_AFTER, text).or_else(|| first_capture(&CLASS12_BEFORE, text))
        {
            profile.set_text(ProfileField::Class12Score, score);
        }

        let exams = competitive_exams(text);
        if !exams.is_empty() {
            profile.set(ProfileField::CompetitiveExams, FieldValue::Exams(exams));
        }

        if let Some(goal) = first_capture(&CAREER_GOAL, text) {
            profile.set_text(ProfileField::CareerGoal, goal);
        }
        if let Some(budget) = budget(text) {
            profile.set_text(ProfileField::Budget, budget);
        }

        let locations = preferred_locations(text);
        if !locations.is_empty() {
            profile.set(ProfileField::PreferredLocations, FieldValue::List(locations));
        }

        if let Some(field) = specialization(text) {
            profile.set_text(ProfileField::Specialization, field);
        }
        if let Some(level) = intended_degree_level(text) {
            profile.set_text(ProfileField::IntendedDegreeLevel, level.as_str());
        }

        debug!(fields = profile.fields.len(), "pattern extraction complete");
        profile
    }
}

fn first_capture(re: &Regex, text: &str) -> Option<String> {
    re.captures(text)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().trim().to_string())
        .filter(|s| !s.is_empty())
}

fn student_name(text: &str) -> Option<String> {
    NAME.captures_iter(text)
        .filter_map(|c| c.get(1).map(|m| m.as_str().to_string()))
        .find(|name| {
            let first = name.split_whitespace().next().unwrap_or_default();
            !NAME_STOPWORDS.contains(&first)
        })
        .map(|name| {
            // Trailing capitalized words after a stopword are not part of the name
            name.split_whitespace()
                .take_while(|w| !NAME_STOPWORDS.contains(w))
                .collect::<Vec<_>>()
                .join(" ")
        })
}

fn academic_level(text: &str) -> Option<AcademicLevel> {
    [
        (&*LEVEL_POSTGRADUATE, AcademicLevel::Postgraduate),
        (&*LEVEL_UNDERGRADUATE, AcademicLevel::Undergraduate),
        (&*LEVEL_WORKING, AcademicLevel::WorkingProfessional),
        (&*LEVEL_HIGH_SCHOOL, AcademicLevel::HighSchool),
    ]
    .into_iter()
    .find(|(re, _)| re.is_match(text))
    .map(|(_, level)| level)
}

fn competitive_exams(text: &str) -> Vec<ExamEntry> {
    let matches: Vec<_> = EXAM.find_iter(text).collect();
    let mut exams: Vec<ExamEntry> = Vec::new();

    for (i, m) in matches.iter().enumerate() {
        let name = m.as_str().to_string();
        if exams.iter().any(|e| e.exam_name == name) {
            continue;
        }

        // Score must appear after this exam and before the next one or the sentence end
        let window_end = matches.get(i + 1).map_or(text.len(), |next| next.start());
        let window = &text[m.end()..window_end];
        let window = match SENTENCE_END.find(window) {
            Some(end) => &window[..end.start()],
            None => window,
        };
        let details = first_capture(&EXAM_SCORE, window).unwrap_or_default();

        exams.push(ExamEntry {
            exam_name: name,
            details,
        });
    }

    exams
}

fn budget(text: &str) -> Option<String> {
    let caps = BUDGET.captures(text)?;
    let amount = caps.get(1)?.as_str().trim();
    let period = caps.get(2).map(|m| m.as_str().trim()).unwrap_or_default();
    Some(if period.is_empty() {
        amount.to_string()
    } else {
        format!("{amount} {period}")
    })
}

fn preferred_locations(text: &str) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    for m in LOCATION.find_iter(text) {
        let before = text[..m.start()].trim_end().to_ascii_lowercase();
        let is_origin = ["from", "based in", "live in", "living in", "citizen of"]
            .iter()
            .any(|cue| before.ends_with(cue));
        let place = m.as_str().to_string();
        if !is_origin && !out.contains(&place) {
            out.push(place);
        }
    }
    out
}

fn specialization(text: &str) -> Option<String> {
    let from_interest = SPECIALIZATION_INTEREST
        .captures_iter(text)
        .filter_map(|c| c.get(1).map(|m| m.as_str().trim().to_string()))
        .find(|s| {
            let first = s.split_whitespace().next().unwrap_or_default().to_ascii_lowercase();
            !SPECIALIZATION_STOPWORDS.contains(&first.as_str()) && !LOCATION.is_match(s)
        });

    from_interest.or_else(|| {
        SPECIALIZATION_PLAN
            .captures_iter(text)
            .filter_map(|c| c.get(1).map(|m| m.as_str().trim().to_string()))
            .find(|s| !LOCATION.is_match(s))
    })
}

fn intended_degree_level(text: &str) -> Option<AcademicLevel> {
    if INTENDED_POSTGRADUATE.is_match(text) {
        Some(AcademicLevel::Postgraduate)
    } else if INTENDED_UNDERGRADUATE.is_match(text) {
        Some(AcademicLevel::Undergraduate)
    } else {
        None
    }
}
