use std::collections::HashMap;

use chrono::{Duration, NaiveDate};

use crate::models::{ClassStatistics, StudentProgress, StudySession, StudyWeekRow};

/// Rounded completion percentage used for class-level aggregation. A student
/// with no assignments contributes 0, not an exclusion.
pub fn completion_pct(row: &StudentProgress) -> f64 {
    row.pct().round()
}

/// Combines already-fetched progress rows into class-level aggregates.
/// Synchronous on purpose: no further store access happens here.
pub fn class_statistics(rows: &[StudentProgress]) -> ClassStatistics {
    if rows.is_empty() {
        return ClassStatistics {
            student_count: 0,
            average_growth: 0,
            blooming_count: 0,
        };
    }
    let pcts: Vec<f64> = rows.iter().map(completion_pct).collect();
    let sum: f64 = pcts.iter().sum();
    ClassStatistics {
        student_count: rows.len(),
        average_growth: (sum / pcts.len() as f64).round() as i64,
        blooming_count: pcts.iter().filter(|pct| **pct >= 90.0).count(),
    }
}

/// Total study minutes per student inside the 7-day window starting at
/// `week_start`, most minutes first. Students keep first-appearance order
/// on ties.
pub fn study_week_summary(sessions: &[StudySession], week_start: NaiveDate) -> Vec<StudyWeekRow> {
    let week_end = week_start + Duration::days(7);
    let mut order: Vec<String> = Vec::new();
    let mut totals: HashMap<String, i64> = HashMap::new();

    for session in sessions {
        if session.date < week_start || session.date >= week_end {
            continue;
        }
        if !totals.contains_key(&session.student_id) {
            order.push(session.student_id.clone());
        }
        *totals.entry(session.student_id.clone()).or_insert(0) += session.minutes;
    }

    let mut rows: Vec<StudyWeekRow> = order
        .into_iter()
        .map(|student_id| StudyWeekRow {
            minutes: totals[&student_id],
            student_id,
        })
        .collect();
    rows.sort_by(|a, b| b.minutes.cmp(&a.minutes));
    rows
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(student_id: &str, total: usize, completed: usize) -> StudentProgress {
        StudentProgress {
            student_id: student_id.to_string(),
            total,
            completed,
        }
    }

    fn session(student_id: &str, minutes: i64, date: &str) -> StudySession {
        StudySession {
            student_id: student_id.to_string(),
            minutes,
            date: NaiveDate::parse_from_str(date, "%Y-%m-%d").unwrap(),
        }
    }

    #[test]
    fn empty_roster_averages_to_zero() {
        let stats = class_statistics(&[]);
        assert_eq!(stats.average_growth, 0);
        assert_eq!(stats.blooming_count, 0);
        assert_eq!(stats.student_count, 0);
    }

    #[test]
    fn students_without_assignments_pull_the_mean_down() {
        let rows = vec![row("a", 2, 2), row("b", 0, 0)];
        let stats = class_statistics(&rows);
        // (100 + 0) / 2
        assert_eq!(stats.average_growth, 50);
        assert_eq!(stats.blooming_count, 1);
    }

    #[test]
    fn blooming_counts_at_ninety_or_above() {
        let rows = vec![row("a", 10, 9), row("b", 10, 8), row("c", 1, 1)];
        let stats = class_statistics(&rows);
        assert_eq!(stats.blooming_count, 2);
        assert_eq!(stats.average_growth, 90);
    }

    #[test]
    fn week_summary_windows_and_accumulates() {
        let week_start = NaiveDate::from_ymd_opt(2026, 8, 17).unwrap();
        let sessions = vec![
            session("stu-a", 20, "2026-08-17"),
            session("stu-b", 45, "2026-08-19"),
            session("stu-a", 15, "2026-08-23"),
            session("stu-a", 60, "2026-08-24"), // next week
            session("stu-c", 10, "2026-08-10"), // previous week
        ];
        let rows = study_week_summary(&sessions, week_start);
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0], StudyWeekRow { student_id: "stu-b".to_string(), minutes: 45 });
        assert_eq!(rows[1], StudyWeekRow { student_id: "stu-a".to_string(), minutes: 35 });
    }

    #[test]
    fn week_summary_ties_keep_first_appearance_order() {
        let week_start = NaiveDate::from_ymd_opt(2026, 8, 17).unwrap();
        let sessions = vec![
            session("stu-b", 30, "2026-08-18"),
            session("stu-a", 30, "2026-08-18"),
        ];
        let rows = study_week_summary(&sessions, week_start);
        assert_eq!(rows[0].student_id, "stu-b");
        assert_eq!(rows[1].student_id, "stu-a");
    }
}
