use std::fmt::Write;

use chrono::NaiveDate;

use crate::models::{
    Assignment, ClassRankingRow, LeaderboardEntry, Student, StudentProgress, StudyWeekRow,
};
use crate::stages::GrowthStage;
use crate::stats;

fn display_name<'a>(students: &'a [Student], student_id: &'a str) -> &'a str {
    students
        .iter()
        .find(|s| s.id == student_id)
        .map(|s| s.display_name.as_str())
        .unwrap_or(student_id)
}

/// Builds the markdown class garden report from already-computed rows.
/// Pure assembly; every input was fetched by the caller in one pass.
pub fn build_report(
    class_id: &str,
    week_start: NaiveDate,
    students: &[Student],
    assignments: &[Assignment],
    progress: &[StudentProgress],
    rankings: &[ClassRankingRow],
    study_week: &[StudyWeekRow],
    leaderboard: &[LeaderboardEntry],
) -> String {
    let class_stats = stats::class_statistics(progress);
    let mut output = String::new();

    let _ = writeln!(output, "# Class Garden Report");
    let _ = writeln!(output, "Class {} (week of {})", class_id, week_start);
    let _ = writeln!(output);
    let _ = writeln!(output, "## Garden View");

    if progress.is_empty() {
        let _ = writeln!(output, "No students on the roster.");
    } else {
        for row in progress {
            let pct = stats::completion_pct(row);
            let stage = GrowthStage::classify(pct);
            let _ = writeln!(
                output,
                "- {}: {}/{} assignments ({:.0}%) — {}",
                display_name(students, &row.student_id),
                row.completed,
                row.total,
                pct,
                stage.label()
            );
        }
    }

    let _ = writeln!(output);
    let _ = writeln!(output, "## Class Statistics");
    let _ = writeln!(output, "- Students: {}", class_stats.student_count);
    let _ = writeln!(output, "- Average growth: {}%", class_stats.average_growth);
    let _ = writeln!(output, "- Blooming: {}", class_stats.blooming_count);

    let _ = writeln!(output);
    let _ = writeln!(output, "## Active Assignments");

    if assignments.is_empty() {
        let _ = writeln!(output, "No active assignments.");
    } else {
        for assignment in assignments {
            let subject = assignment.subject.map_or("General", |s| s.label());
            match assignment.due_date {
                Some(due) => {
                    let _ = writeln!(output, "- {} ({}), due {}", assignment.id, subject, due);
                }
                None => {
                    let _ = writeln!(output, "- {} ({})", assignment.id, subject);
                }
            }
        }
    }

    let _ = writeln!(output);
    let _ = writeln!(output, "## Subject Rankings");

    if rankings.is_empty() {
        let _ = writeln!(output, "No scored submissions yet.");
    } else {
        for row in rankings {
            let _ = writeln!(
                output,
                "- {} #{}: {} (avg {:.1})",
                row.subject.label(),
                row.rank,
                display_name(students, &row.student_id),
                row.average
            );
        }
    }

    let _ = writeln!(output);
    let _ = writeln!(output, "## Study Time This Week");

    if study_week.is_empty() {
        let _ = writeln!(output, "No study sessions recorded this week.");
    } else {
        for row in study_week {
            let _ = writeln!(
                output,
                "- {}: {} minutes",
                display_name(students, &row.student_id),
                row.minutes
            );
        }
    }

    let _ = writeln!(output);
    let _ = writeln!(output, "## Family Leaderboard");

    if leaderboard.is_empty() {
        let _ = writeln!(output, "No families on the board yet.");
    } else {
        for entry in leaderboard.iter().take(10) {
            let _ = writeln!(
                output,
                "- #{} {} — {} points, {} badges",
                entry.rank, entry.display_name, entry.total_points, entry.badge_count
            );
        }
    }

    output
}
