use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use chrono::{Datelike, Duration, Utc};
use clap::{ArgGroup, Parser, Subcommand};
use serde_json::json;
use tracing_subscriber::EnvFilter;

mod leaderboard;
mod models;
mod progress;
mod rankings;
mod report;
mod stages;
mod stats;
mod store;

use models::{Student, StudySession};
use progress::CancelToken;
use stages::GrowthStage;
use store::{collections, record, Filter, MemoryStore, RecordStore};

#[derive(Parser)]
#[command(name = "kindergarten-progress")]
#[command(about = "Progress and leaderboard aggregation for the kindergarten portal", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Write a realistic sample dataset to the snapshot
    Seed,
    /// Import submission records from a CSV file
    Import {
        #[arg(long)]
        csv: PathBuf,
    },
    /// Completion progress and growth stages
    #[command(group(
        ArgGroup::new("scope")
            .args(["class", "student"])
            .required(true)
            .multiple(false)
    ))]
    Progress {
        #[arg(long)]
        class: Option<String>,
        #[arg(long)]
        student: Option<String>,
    },
    /// Per-subject child vs class averages for one student
    Subjects {
        #[arg(long)]
        student: String,
        #[arg(long)]
        class: Option<String>,
    },
    /// Per-subject class rankings
    Rankings {
        #[arg(long)]
        class: String,
    },
    /// Family leaderboard, optionally following live updates
    Leaderboard {
        #[arg(long, default_value_t = 10)]
        limit: usize,
        #[arg(long)]
        watch: bool,
    },
    /// Generate the markdown class garden report
    Report {
        #[arg(long)]
        class: String,
        #[arg(long, default_value = "report.md")]
        out: PathBuf,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let snapshot = std::env::var("STORE_SNAPSHOT")
        .context("STORE_SNAPSHOT must point to the JSON snapshot backing the record store")?;
    let snapshot = PathBuf::from(snapshot);
    let store = MemoryStore::from_snapshot(&snapshot)
        .with_context(|| format!("failed to load snapshot {}", snapshot.display()))?;

    match cli.command {
        Commands::Seed => {
            let store = MemoryStore::new();
            seed(&store)?;
            store.save_snapshot(&snapshot)?;
            println!("Seed data written to {}.", snapshot.display());
        }
        Commands::Import { csv } => {
            let inserted = import_csv(&store, &csv).await?;
            store.save_snapshot(&snapshot)?;
            println!("Inserted {inserted} submissions from {}.", csv.display());
        }
        Commands::Progress { class, student } => {
            if let Some(class_id) = class {
                print_class_progress(&store, &class_id).await?;
            } else if let Some(student_id) = student {
                print_student_progress(&store, &student_id).await?;
            }
        }
        Commands::Subjects { student, class } => {
            let perfs =
                rankings::subject_averages_for_student(&store, &student, class.as_deref()).await?;
            println!("Subject averages for {student}:");
            for perf in perfs {
                println!(
                    "- {}: child {:.1} / class {:.1}",
                    perf.subject.label(),
                    perf.child_avg,
                    perf.class_avg
                );
            }
        }
        Commands::Rankings { class } => {
            let rows = rankings::subject_rankings_for_class(&store, &class).await?;
            if rows.is_empty() {
                println!("No scored submissions for class {class}.");
            } else {
                println!("Rankings for class {class}:");
                for row in rows {
                    println!(
                        "- {} #{}: {} (avg {:.1})",
                        row.subject.label(),
                        row.rank,
                        row.student_id,
                        row.average
                    );
                }
            }
        }
        Commands::Leaderboard { limit, watch } => {
            if watch {
                let mut sub = leaderboard::subscribe_leaderboard(
                    &store,
                    limit,
                    Arc::new(print_leaderboard),
                )
                .await?;
                println!("Watching leaderboard updates, Ctrl-C to stop.");
                tokio::signal::ctrl_c().await?;
                sub.dispose();
            } else {
                let board = leaderboard::get_leaderboard(&store, limit).await?;
                print_leaderboard(board);
            }
        }
        Commands::Report { class, out } => {
            let report = build_class_report(&store, &class).await?;
            std::fs::write(&out, report)?;
            println!("Report written to {}.", out.display());
        }
    }

    Ok(())
}

async fn print_class_progress(store: &MemoryStore, class_id: &str) -> anyhow::Result<()> {
    let students = progress::class_roster(store, class_id).await?;
    let rows =
        progress::compute_class_progress(store, class_id, &students, &CancelToken::new()).await?;
    let class_stats = stats::class_statistics(&rows);

    println!("Progress for class {class_id}:");
    for row in &rows {
        let pct = stats::completion_pct(row);
        let name = students
            .iter()
            .find(|s| s.id == row.student_id)
            .map(|s| s.display_name.as_str())
            .unwrap_or(row.student_id.as_str());
        println!(
            "- {}: {}/{} ({:.0}%) — {}",
            name,
            row.completed,
            row.total,
            pct,
            GrowthStage::classify(pct).label()
        );
    }
    println!(
        "Average growth {}%, {} blooming of {} students.",
        class_stats.average_growth, class_stats.blooming_count, class_stats.student_count
    );
    Ok(())
}

async fn print_student_progress(store: &MemoryStore, student_id: &str) -> anyhow::Result<()> {
    let records = store
        .query(collections::STUDENTS, &[Filter::eq("id", student_id)])
        .await?;
    let student = records
        .iter()
        .filter_map(Student::from_record)
        .next()
        .with_context(|| format!("no student {student_id} on the roster"))?;

    let row = progress::compute_progress(store, &student.id, student.class_id.as_deref()).await;
    let pct = stats::completion_pct(&row);
    println!(
        "{}: {}/{} ({:.0}%) — {}",
        student.display_name,
        row.completed,
        row.total,
        pct,
        GrowthStage::classify(pct).label()
    );
    Ok(())
}

fn print_leaderboard(board: Vec<models::LeaderboardEntry>) {
    if board.is_empty() {
        println!("No families on the board yet.");
        return;
    }
    for entry in board {
        println!(
            "#{} {} — {} points, {} badges",
            entry.rank, entry.display_name, entry.total_points, entry.badge_count
        );
    }
}

async fn build_class_report(store: &MemoryStore, class_id: &str) -> anyhow::Result<String> {
    let students = progress::class_roster(store, class_id).await?;
    let assignments = progress::active_assignments(store, class_id).await?;
    let rows =
        progress::compute_class_progress(store, class_id, &students, &CancelToken::new()).await?;
    let ranking_rows = rankings::subject_rankings_for_class(store, class_id).await?;
    let board = leaderboard::get_leaderboard(store, 10).await?;

    let sessions: Vec<StudySession> = store
        .query(collections::STUDY_TIME, &[])
        .await?
        .iter()
        .filter_map(StudySession::from_record)
        .filter(|s| students.iter().any(|stu| stu.id == s.student_id))
        .collect();
    let today = Utc::now().date_naive();
    let week_start = today - Duration::days(i64::from(today.weekday().num_days_from_monday()));
    let study_week = stats::study_week_summary(&sessions, week_start);

    Ok(report::build_report(
        class_id,
        week_start,
        &students,
        &assignments,
        &rows,
        &ranking_rows,
        &study_week,
        &board,
    ))
}

async fn import_csv(store: &MemoryStore, csv_path: &Path) -> anyhow::Result<usize> {
    #[derive(serde::Deserialize)]
    struct CsvRow {
        student_id: String,
        assignment_id: String,
        class_id: String,
        status: String,
        subject: Option<String>,
        score: Option<f64>,
        submitted_at: Option<String>,
        source_key: Option<String>,
    }

    let mut reader = csv::Reader::from_path(csv_path)?;
    let mut inserted = 0usize;

    for result in reader.deserialize::<CsvRow>() {
        let row = result?;
        let source_key = row
            .source_key
            .unwrap_or_else(|| format!("import-{}", uuid::Uuid::new_v4()));

        let existing = store
            .query(
                collections::SUBMISSIONS,
                &[Filter::eq("sourceKey", source_key.as_str())],
            )
            .await?;
        if !existing.is_empty() {
            continue;
        }

        let mut submission = record(json!({
            "id": format!("sub-{}", uuid::Uuid::new_v4()),
            "studentId": row.student_id,
            "assignmentId": row.assignment_id,
            "classId": row.class_id,
            "status": row.status,
            "sourceKey": source_key,
        }));
        if let Some(subject) = row.subject {
            submission.insert("subject".to_string(), json!(subject));
        }
        if let Some(score) = row.score {
            submission.insert("score".to_string(), json!(score));
        }
        if let Some(submitted_at) = row.submitted_at {
            submission.insert("submittedAt".to_string(), json!(submitted_at));
        }
        store.insert(collections::SUBMISSIONS, submission)?;
        inserted += 1;
    }

    Ok(inserted)
}

fn seed(store: &MemoryStore) -> anyhow::Result<()> {
    let class_id = "class-sunflowers";

    for (id, name) in [("stu-mia", "Mia"), ("stu-leo", "Leo"), ("stu-ana", "Ana")] {
        store.insert(
            collections::STUDENTS,
            record(json!({"id": id, "displayName": name, "classId": class_id})),
        )?;
    }

    let assignments = [
        ("asg-letters", "literacy", "active", "2026-09-04"),
        ("asg-counting", "numeracy", "active", "2026-09-06"),
        ("asg-shapes", "science", "active", "2026-09-08"),
        ("asg-colors", "art", "archived", "2026-08-15"),
    ];
    for (id, subject, status, due) in assignments {
        store.insert(
            collections::ASSIGNMENTS,
            record(json!({
                "id": id,
                "classId": class_id,
                "subject": subject,
                "status": status,
                "dueDate": due,
            })),
        )?;
    }

    let submissions = [
        ("sub-001", "asg-letters", "stu-mia", "approved", Some(92.0), "literacy", "2026-08-24T09:15:00Z"),
        ("sub-002", "asg-counting", "stu-mia", "submitted", Some(88.0), "numeracy", "2026-08-25T10:40:00Z"),
        ("sub-003", "asg-shapes", "stu-mia", "needsRevision", None, "science", "2026-08-26T08:05:00Z"),
        ("sub-004", "asg-letters", "stu-leo", "approved", Some(75.0), "literacy", "2026-08-24T11:30:00Z"),
        ("sub-005", "asg-counting", "stu-leo", "pending", Some(81.0), "numeracy", "2026-08-26T09:55:00Z"),
        ("sub-006", "asg-letters", "stu-ana", "submitted", Some(68.0), "literacy", "2026-08-25T14:20:00Z"),
    ];
    for (id, assignment, student, status, score, subject, at) in submissions {
        let mut rec = record(json!({
            "id": id,
            "assignmentId": assignment,
            "studentId": student,
            "classId": class_id,
            "status": status,
            "subject": subject,
            "submittedAt": at,
        }));
        if let Some(score) = score {
            rec.insert("score".to_string(), json!(score));
        }
        store.insert(collections::SUBMISSIONS, rec)?;
    }

    let sessions = [
        ("stu-mia", 25, "2026-08-24"),
        ("stu-mia", 20, "2026-08-26"),
        ("stu-leo", 40, "2026-08-25"),
        ("stu-ana", 15, "2026-08-26"),
    ];
    for (idx, (student, minutes, date)) in sessions.iter().enumerate() {
        store.insert(
            collections::STUDY_TIME,
            record(json!({
                "id": format!("study-{:03}", idx + 1),
                "studentId": student,
                "minutes": minutes,
                "date": date,
            })),
        )?;
    }

    let families = [
        ("fam-sparrows", "The Sparrows", 120, vec!["early-bird", "bookworm"], "2026-08-26T18:00:00Z"),
        ("fam-otters", "The Otters", 200, vec!["early-bird", "bookworm", "streak-week"], "2026-08-26T19:30:00Z"),
        ("fam-bees", "The Bees", 40, vec!["starter"], "2026-08-23T16:45:00Z"),
    ];
    for (id, name, points, badges, last_activity) in families {
        store.insert(
            collections::FAMILIES,
            record(json!({
                "id": id,
                "familyName": name,
                "totalPoints": points,
                "badges": badges,
                "lastActivity": last_activity,
            })),
        )?;
    }

    Ok(())
}
