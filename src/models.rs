use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;
use serde_json::Value;
use tracing::warn;

use crate::store::Record;

/// Roster entry, owned by the roster-management collaborator. Read-only to
/// the aggregation engines.
#[derive(Debug, Clone)]
pub struct Student {
    pub id: String,
    pub display_name: String,
    pub class_id: Option<String>,
}

impl Student {
    pub fn from_record(record: &Record) -> Option<Self> {
        let id = read_str(record, "id")?;
        Some(Student {
            display_name: read_str(record, "displayName").unwrap_or_else(|| id.clone()),
            class_id: read_str(record, "classId"),
            id,
        })
    }
}

#[derive(Debug, Clone)]
pub struct Assignment {
    pub id: String,
    pub class_id: String,
    pub status: String,
    pub subject: Option<Subject>,
    pub due_date: Option<NaiveDate>,
}

impl Assignment {
    pub fn from_record(record: &Record) -> Option<Self> {
        let id = read_str(record, "id")?;
        let class_id = read_str(record, "classId")?;
        Some(Assignment {
            id,
            class_id,
            status: read_str(record, "status").unwrap_or_default(),
            subject: read_str(record, "subject").as_deref().and_then(Subject::parse),
            due_date: read_date(record, "dueDate"),
        })
    }

    pub fn is_active(&self) -> bool {
        self.status == "active"
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubmissionStatus {
    Approved,
    Submitted,
    Pending,
    NeedsRevision,
    Other(String),
}

impl SubmissionStatus {
    pub fn parse(raw: &str) -> Self {
        match raw {
            "approved" => SubmissionStatus::Approved,
            "submitted" => SubmissionStatus::Submitted,
            "pending" => SubmissionStatus::Pending,
            "needsRevision" => SubmissionStatus::NeedsRevision,
            other => SubmissionStatus::Other(other.to_string()),
        }
    }

    /// A submission outside the accepted set (`needsRevision` included) is
    /// "submitted but not completed".
    pub fn counts_as_completed(&self) -> bool {
        matches!(
            self,
            SubmissionStatus::Approved | SubmissionStatus::Submitted | SubmissionStatus::Pending
        )
    }
}

#[derive(Debug, Clone)]
pub struct Submission {
    pub id: String,
    pub assignment_id: String,
    pub student_id: String,
    pub status: SubmissionStatus,
    pub subject: Option<Subject>,
    pub score: Option<f64>,
    pub submitted_at: Option<DateTime<Utc>>,
}

impl Submission {
    pub fn from_record(record: &Record) -> Option<Self> {
        let id = read_str(record, "id")?;
        let assignment_id = read_str(record, "assignmentId");
        let student_id = read_str(record, "studentId");
        let (Some(assignment_id), Some(student_id)) = (assignment_id, student_id) else {
            warn!(%id, "submission record missing identity fields, skipped");
            return None;
        };
        Some(Submission {
            id,
            assignment_id,
            student_id,
            status: read_str(record, "status")
                .map(|s| SubmissionStatus::parse(&s))
                .unwrap_or(SubmissionStatus::Other(String::new())),
            subject: read_str(record, "subject").as_deref().and_then(Subject::parse),
            score: read_f64(record, "score"),
            submitted_at: read_datetime(record, "submittedAt"),
        })
    }
}

/// The portal's fixed subject enumeration. Every subject is always present
/// in per-student average output, even with no records behind it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum Subject {
    Literacy,
    Numeracy,
    Science,
    Art,
    Music,
}

impl Subject {
    pub const ALL: [Subject; 5] = [
        Subject::Literacy,
        Subject::Numeracy,
        Subject::Science,
        Subject::Art,
        Subject::Music,
    ];

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.to_ascii_lowercase().as_str() {
            "literacy" => Some(Subject::Literacy),
            "numeracy" => Some(Subject::Numeracy),
            "science" => Some(Subject::Science),
            "art" => Some(Subject::Art),
            "music" => Some(Subject::Music),
            _ => None,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Subject::Literacy => "Literacy",
            Subject::Numeracy => "Numeracy",
            Subject::Science => "Science",
            Subject::Art => "Art",
            Subject::Music => "Music",
        }
    }
}

/// Derived per pass, never persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StudentProgress {
    pub student_id: String,
    pub total: usize,
    pub completed: usize,
}

impl StudentProgress {
    pub fn empty(student_id: &str) -> Self {
        StudentProgress {
            student_id: student_id.to_string(),
            total: 0,
            completed: 0,
        }
    }

    /// Unrounded completion percentage; a student with no assignments sits
    /// at zero.
    pub fn pct(&self) -> f64 {
        if self.total == 0 {
            0.0
        } else {
            100.0 * self.completed as f64 / self.total as f64
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ClassStatistics {
    pub student_count: usize,
    pub average_growth: i64,
    pub blooming_count: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct SubjectPerf {
    pub subject: Subject,
    pub child_avg: f64,
    pub class_avg: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct ClassRankingRow {
    pub subject: Subject,
    pub student_id: String,
    pub average: f64,
    pub rank: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct LeaderboardEntry {
    pub id: String,
    pub display_name: String,
    pub total_points: i64,
    pub badge_count: usize,
    pub last_activity: Option<DateTime<Utc>>,
    pub rank: usize,
}

impl LeaderboardEntry {
    pub fn from_record(record: &Record) -> Option<Self> {
        let id = read_str(record, "id")?;
        Some(LeaderboardEntry {
            display_name: read_str(record, "familyName")
                .or_else(|| read_str(record, "displayName"))
                .unwrap_or_else(|| id.clone()),
            total_points: read_f64(record, "totalPoints")
                .map(|p| p.round() as i64)
                .unwrap_or(0),
            badge_count: record
                .get("badges")
                .and_then(Value::as_array)
                .map(Vec::len)
                .unwrap_or(0),
            last_activity: read_datetime(record, "lastActivity"),
            rank: 0,
            id,
        })
    }
}

/// Engagement record from the `study_time` collection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StudySession {
    pub student_id: String,
    pub minutes: i64,
    pub date: NaiveDate,
}

impl StudySession {
    pub fn from_record(record: &Record) -> Option<Self> {
        Some(StudySession {
            student_id: read_str(record, "studentId")?,
            minutes: read_f64(record, "minutes")? as i64,
            date: read_date(record, "date")?,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StudyWeekRow {
    pub student_id: String,
    pub minutes: i64,
}

fn read_str(record: &Record, key: &str) -> Option<String> {
    record.get(key).and_then(Value::as_str).map(str::to_string)
}

/// Only JSON numbers qualify; a string or otherwise malformed score leaves
/// the field `None` so the record drops out of averages instead of skewing
/// them toward zero.
fn read_f64(record: &Record, key: &str) -> Option<f64> {
    record.get(key).and_then(Value::as_f64)
}

fn read_date(record: &Record, key: &str) -> Option<NaiveDate> {
    record
        .get(key)
        .and_then(Value::as_str)
        .and_then(|raw| NaiveDate::parse_from_str(raw, "%Y-%m-%d").ok())
}

/// Timestamps arrive either as RFC 3339 strings or epoch milliseconds,
/// depending on which portal client wrote the record.
fn read_datetime(record: &Record, key: &str) -> Option<DateTime<Utc>> {
    match record.get(key)? {
        Value::String(raw) => DateTime::parse_from_rfc3339(raw)
            .ok()
            .map(|dt| dt.with_timezone(&Utc)),
        Value::Number(n) => n.as_i64().and_then(DateTime::from_timestamp_millis),
        _ => None,
    }
}
