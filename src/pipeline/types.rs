//! Shared types for the thread analysis pipeline.

use std::fmt;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

// ── Input thread ────────────────────────────────────────────────────

/// A conversation handed to the pipeline by the mail fetching layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmailThread {
    /// Conversation identifier from the mail provider.
    pub id: String,
    #[serde(default)]
    pub subject: String,
    #[serde(default)]
    pub sender: String,
    /// Message bodies, oldest first.
    #[serde(default)]
    pub body: Vec<String>,
}

impl EmailThread {
    pub fn new(
        id: impl Into<String>,
        subject: impl Into<String>,
        sender: impl Into<String>,
        body: Vec<String>,
    ) -> Self {
        Self {
            id: id.into(),
            subject: subject.into(),
            sender: sender.into(),
            body,
        }
    }

    /// Join the messages into one text block, each preceded by a
    /// `--- MESSAGE N ---` separator.
    pub fn render(&self) -> String {
        let mut text = String::new();
        for (i, message) in self.body.iter().enumerate() {
            if i > 0 {
                text.push_str("\n\n");
            }
            text.push_str(&message_separator(i + 1));
            text.push_str("\n\n");
            text.push_str(message);
        }
        text
    }
}

/// Separator line placed before the `n`th message (1-based).
pub fn message_separator(n: usize) -> String {
    format!("--- MESSAGE {n} ---")
}

/// True if `line` is a separator produced by [`EmailThread::render`].
pub fn is_message_separator(line: &str) -> bool {
    let trimmed = line.trim();
    trimmed
        .strip_prefix("--- MESSAGE ")
        .and_then(|rest| rest.strip_suffix(" ---"))
        .is_some_and(|n| !n.is_empty() && n.chars().all(|c| c.is_ascii_digit()))
}

// ── Category ────────────────────────────────────────────────────────

/// The closed set of thread categories.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum Category {
    #[serde(rename = "Urgent / Action Required")]
    UrgentActionRequired,
    #[serde(rename = "University Notice")]
    UniversityNotice,
    #[serde(rename = "Personal / Social")]
    PersonalSocial,
    #[serde(rename = "Spam / Promotion")]
    SpamPromotion,
    #[default]
    #[serde(rename = "Uncategorized")]
    Uncategorized,
}

impl Category {
    pub const ALL: [Category; 5] = [
        Category::UrgentActionRequired,
        Category::UniversityNotice,
        Category::PersonalSocial,
        Category::SpamPromotion,
        Category::Uncategorized,
    ];

    /// Used whenever the model's choice is missing or not in the set.
    pub const FALLBACK: Category = Category::Uncategorized;

    pub fn label(&self) -> &'static str {
        match self {
            Self::UrgentActionRequired => "Urgent / Action Required",
            Self::UniversityNotice => "University Notice",
            Self::PersonalSocial => "Personal / Social",
            Self::SpamPromotion => "Spam / Promotion",
            Self::Uncategorized => "Uncategorized",
        }
    }

    /// Exact label match, ignoring case and surrounding whitespace.
    pub fn from_label(label: &str) -> Option<Self> {
        let wanted = label.trim();
        Self::ALL
            .into_iter()
            .find(|c| c.label().eq_ignore_ascii_case(wanted))
    }

    /// Like [`Category::from_label`], falling back to [`Category::FALLBACK`].
    pub fn coerce(label: &str) -> Self {
        Self::from_label(label).unwrap_or(Self::FALLBACK)
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

// ── Agent outputs ───────────────────────────────────────────────────

/// Output of the summarizer agent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SummaryResult {
    /// Non-empty after validation.
    #[serde(alias = "thread_summary")]
    pub summary: String,
    /// The single most important next step, if the thread has one.
    #[serde(default, alias = "latest_action_item")]
    pub action_item: Option<String>,
}

/// Output of the classifier agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ClassificationResult {
    pub category: Category,
    pub is_urgent: bool,
}

// ── Single-email insight ────────────────────────────────────────────

/// How soon a single email needs attention.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum Priority {
    High,
    #[default]
    Medium,
    Low,
}

impl Priority {
    pub const ALL: [Priority; 3] = [Priority::High, Priority::Medium, Priority::Low];

    pub fn label(&self) -> &'static str {
        match self {
            Self::High => "High",
            Self::Medium => "Medium",
            Self::Low => "Low",
        }
    }

    pub fn from_label(label: &str) -> Option<Self> {
        let wanted = label.trim();
        Self::ALL
            .into_iter()
            .find(|p| p.label().eq_ignore_ascii_case(wanted))
    }
}

/// Topic of a single email. Separate from the thread [`Category`] set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum EmailTopic {
    Finance,
    Work,
    Personal,
    Purchases,
    Promotions,
    Travel,
    #[default]
    Other,
}

impl EmailTopic {
    pub const ALL: [EmailTopic; 7] = [
        EmailTopic::Finance,
        EmailTopic::Work,
        EmailTopic::Personal,
        EmailTopic::Purchases,
        EmailTopic::Promotions,
        EmailTopic::Travel,
        EmailTopic::Other,
    ];

    pub fn label(&self) -> &'static str {
        match self {
            Self::Finance => "Finance",
            Self::Work => "Work",
            Self::Personal => "Personal",
            Self::Purchases => "Purchases",
            Self::Promotions => "Promotions",
            Self::Travel => "Travel",
            Self::Other => "Other",
        }
    }

    pub fn from_label(label: &str) -> Option<Self> {
        let wanted = label.trim();
        Self::ALL
            .into_iter()
            .find(|t| t.label().eq_ignore_ascii_case(wanted))
    }
}

/// Bill, receipt and shipping details pulled out of one email.
///
/// Detail fields are only set when their flag is true.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionableData {
    pub is_bill: bool,
    pub amount_due: Option<String>,
    pub due_date: Option<NaiveDate>,
    pub is_transaction: bool,
    pub amount: Option<String>,
    pub vendor: Option<String>,
    pub is_shipping: bool,
    pub tracking_number: Option<String>,
}

impl ActionableData {
    /// True if any of the bill, transaction or shipping flags is set.
    pub fn is_actionable(&self) -> bool {
        self.is_bill || self.is_transaction || self.is_shipping
    }
}

/// Priority, summary, topic and extracted details for one email.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmailInsight {
    pub priority: Priority,
    pub summary: String,
    pub category: EmailTopic,
    pub actionable_data: Option<ActionableData>,
}

// ── Analysis result ─────────────────────────────────────────────────

/// Terminal state of one analysis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnalysisStatus {
    /// Summary and classification both produced.
    Done,
    /// Summary produced; classification replaced by the default.
    Degraded,
    /// No summary; nothing usable was produced.
    Failed,
}

/// Everything the pipeline produced for one thread.
///
/// Always well-formed: `classification` holds the default when the
/// classifier did not run or failed.
#[derive(Debug, Clone, PartialEq)]
pub struct AnalysisResult {
    pub thread_id: String,
    pub status: AnalysisStatus,
    pub summary: Option<SummaryResult>,
    pub classification: ClassificationResult,
    /// Set only when `status` is `Failed`.
    pub error: Option<String>,
    /// Non-fatal remark, set when `status` is `Degraded`.
    pub note: Option<String>,
    pub analyzed_at: DateTime<Utc>,
}

impl AnalysisResult {
    pub fn done(
        thread_id: impl Into<String>,
        summary: SummaryResult,
        classification: ClassificationResult,
    ) -> Self {
        Self {
            thread_id: thread_id.into(),
            status: AnalysisStatus::Done,
            summary: Some(summary),
            classification,
            error: None,
            note: None,
            analyzed_at: Utc::now(),
        }
    }

    pub fn degraded(
        thread_id: impl Into<String>,
        summary: SummaryResult,
        note: impl Into<String>,
    ) -> Self {
        Self {
            thread_id: thread_id.into(),
            status: AnalysisStatus::Degraded,
            summary: Some(summary),
            classification: ClassificationResult::default(),
            error: None,
            note: Some(note.into()),
            analyzed_at: Utc::now(),
        }
    }

    pub fn failed(thread_id: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            thread_id: thread_id.into(),
            status: AnalysisStatus::Failed,
            summary: None,
            classification: ClassificationResult::default(),
            error: Some(error.into()),
            note: None,
            analyzed_at: Utc::now(),
        }
    }

    pub fn is_failed(&self) -> bool {
        self.status == AnalysisStatus::Failed
    }

    pub fn is_degraded(&self) -> bool {
        self.status == AnalysisStatus::Degraded
    }
}

// ── Caller-facing response ──────────────────────────────────────────

/// The JSON shape returned to the HTTP/UI layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThreadAnalysis {
    pub thread_id: String,
    pub thread_summary: String,
    pub latest_action_item: Option<String>,
    pub classification: ClassificationResult,
    /// Present only on total failure.
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub degraded: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

impl From<&AnalysisResult> for ThreadAnalysis {
    fn from(result: &AnalysisResult) -> Self {
        let (thread_summary, latest_action_item) = match &result.summary {
            Some(s) => (s.summary.clone(), s.action_item.clone()),
            None => (String::new(), None),
        };
        Self {
            thread_id: result.thread_id.clone(),
            thread_summary,
            latest_action_item,
            classification: result.classification,
            error: result.error.clone(),
            degraded: result.is_degraded(),
            note: result.note.clone(),
        }
    }
}

impl From<AnalysisResult> for ThreadAnalysis {
    fn from(result: AnalysisResult) -> Self {
        Self::from(&result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn render_numbers_messages_oldest_first() {
        let thread = EmailThread::new(
            "t-1",
            "Tuition",
            "bursar@uni.edu",
            vec!["First notice".into(), "Final reminder".into()],
        );
        let text = thread.render();
        assert_eq!(
            text,
            "--- MESSAGE 1 ---\n\nFirst notice\n\n--- MESSAGE 2 ---\n\nFinal reminder"
        );
    }

    #[test]
    fn render_empty_thread_is_empty() {
        let thread = EmailThread::new("t-2", "", "", vec![]);
        assert!(thread.render().is_empty());
    }

    #[test]
    fn separator_detection() {
        assert!(is_message_separator("--- MESSAGE 12 ---"));
        assert!(is_message_separator("  --- MESSAGE 1 ---  "));
        assert!(!is_message_separator("--- MESSAGE ---"));
        assert!(!is_message_separator("--- Original Message ---"));
    }

    #[test]
    fn category_labels_round_trip() {
        for category in Category::ALL {
            assert_eq!(Category::from_label(category.label()), Some(category));
        }
    }

    #[test]
    fn category_coerce_is_lenient_on_case_only() {
        assert_eq!(Category::coerce("university notice"), Category::UniversityNotice);
        assert_eq!(Category::coerce("Other"), Category::Uncategorized);
        assert_eq!(Category::coerce("Finance"), Category::Uncategorized);
        assert_eq!(Category::coerce(""), Category::Uncategorized);
    }

    #[test]
    fn category_serializes_as_label() {
        let json = serde_json::to_value(Category::SpamPromotion).unwrap();
        assert_eq!(json, "Spam / Promotion");
    }

    #[test]
    fn summary_accepts_legacy_field_names() {
        let s: SummaryResult = serde_json::from_str(
            r#"{"thread_summary": "Meeting moved", "latest_action_item": "Reply"}"#,
        )
        .unwrap();
        assert_eq!(s.summary, "Meeting moved");
        assert_eq!(s.action_item.as_deref(), Some("Reply"));
    }

    #[test]
    fn failed_result_has_default_classification() {
        let result = AnalysisResult::failed("t-3", "boom");
        assert!(result.is_failed());
        assert_eq!(result.classification, ClassificationResult::default());
        assert_eq!(result.classification.category, Category::Uncategorized);
        assert!(!result.classification.is_urgent);
    }

    #[test]
    fn response_omits_degraded_marker_when_clean() {
        let result = AnalysisResult::done(
            "t-4",
            SummaryResult {
                summary: "All good".into(),
                action_item: None,
            },
            ClassificationResult {
                category: Category::PersonalSocial,
                is_urgent: false,
            },
        );
        let json = serde_json::to_value(ThreadAnalysis::from(&result)).unwrap();
        assert!(json.get("degraded").is_none());
        assert!(json.get("note").is_none());
        assert_eq!(json["error"], serde_json::Value::Null);
        assert_eq!(json["latest_action_item"], serde_json::Value::Null);
        assert_eq!(json["classification"]["category"], "Personal / Social");
    }

    #[test]
    fn response_marks_degraded_results() {
        let result = AnalysisResult::degraded(
            "t-5",
            SummaryResult {
                summary: "Lunch plans".into(),
                action_item: None,
            },
            "classification unavailable",
        );
        let json = serde_json::to_value(ThreadAnalysis::from(result)).unwrap();
        assert_eq!(json["degraded"], true);
        assert_eq!(json["note"], "classification unavailable");
        assert_eq!(json["classification"]["category"], "Uncategorized");
        assert_eq!(json["classification"]["is_urgent"], false);
    }
}
