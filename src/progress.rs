use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use futures_util::future::join_all;
use tracing::{debug, warn};

use crate::models::{Assignment, Student, StudentProgress, Submission};
use crate::store::{collections, Filter, RecordStore, StoreError};

/// Cancellation flag shared between a batch caller and the aggregation
/// pass. In-flight queries are never aborted; the flag is checked before
/// batch results are committed, so a stale batch is discarded on arrival.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    cancelled: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        CancelToken::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

/// Active assignments for one class, malformed records dropped.
pub async fn active_assignments(
    store: &dyn RecordStore,
    class_id: &str,
) -> Result<Vec<Assignment>, StoreError> {
    let records = store
        .query(
            collections::ASSIGNMENTS,
            &[Filter::eq("classId", class_id), Filter::eq("status", "active")],
        )
        .await?;
    Ok(records
        .iter()
        .filter_map(Assignment::from_record)
        .filter(Assignment::is_active)
        .collect())
}

/// Class roster, read from the roster collaborator's collection.
pub async fn class_roster(
    store: &dyn RecordStore,
    class_id: &str,
) -> Result<Vec<Student>, StoreError> {
    let records = store
        .query(collections::STUDENTS, &[Filter::eq("classId", class_id)])
        .await?;
    Ok(records.iter().filter_map(Student::from_record).collect())
}

/// Completion counts for one student. A student without a class has no
/// progress and triggers no queries; any store failure degrades this one
/// student to `{0, 0}` so the rest of the batch survives.
pub async fn compute_progress(
    store: &dyn RecordStore,
    student_id: &str,
    class_id: Option<&str>,
) -> StudentProgress {
    let Some(class_id) = class_id else {
        return StudentProgress::empty(student_id);
    };
    match progress_pass(store, student_id, class_id).await {
        Ok(progress) => progress,
        Err(err) => {
            warn!(student_id, error = %err, "progress pass degraded to zero");
            StudentProgress::empty(student_id)
        }
    }
}

async fn progress_pass(
    store: &dyn RecordStore,
    student_id: &str,
    class_id: &str,
) -> Result<StudentProgress, StoreError> {
    let assignments = active_assignments(store, class_id).await?;
    let mut total = 0;
    let mut completed = 0;

    // Internally sequential: assignments first, then one submission lookup
    // per assignment.
    for assignment in &assignments {
        total += 1;
        let records = store
            .query(
                collections::SUBMISSIONS,
                &[
                    Filter::eq("assignmentId", assignment.id.as_str()),
                    Filter::eq("studentId", student_id),
                ],
            )
            .await?;
        let submissions: Vec<Submission> =
            records.iter().filter_map(Submission::from_record).collect();
        if let Some(submission) = latest_submission(&submissions) {
            if submissions.len() > 1 {
                debug!(
                    submission = %submission.id,
                    assignment = %assignment.id,
                    "duplicate submissions resolved to latest"
                );
            }
            if submission.status.counts_as_completed() {
                completed += 1;
            }
        }
    }

    Ok(StudentProgress {
        student_id: student_id.to_string(),
        total,
        completed,
    })
}

/// When a student has several submissions for one assignment, the latest
/// `submittedAt` wins; untimestamped submissions sort earliest, and equal
/// timestamps keep the first record returned by the store.
fn latest_submission(submissions: &[Submission]) -> Option<&Submission> {
    let mut best: Option<&Submission> = None;
    for submission in submissions {
        match best {
            Some(current) if submission.submitted_at <= current.submitted_at => {}
            _ => best = Some(submission),
        }
    }
    best
}

/// One aggregation pass over a class roster. Per-student computations are
/// issued concurrently so wall-clock latency stays near one round trip; the
/// map is committed only once every invocation resolved.
///
/// The class assignment query runs once up front as a reachability probe:
/// an unreachable store surfaces as an error here, so callers can tell "no
/// data" from "no store", while later per-student failures degrade that
/// student only.
pub async fn compute_class_progress(
    store: &dyn RecordStore,
    class_id: &str,
    students: &[Student],
    cancel: &CancelToken,
) -> Result<Vec<StudentProgress>, StoreError> {
    active_assignments(store, class_id).await?;

    let passes = students
        .iter()
        .map(|student| compute_progress(store, &student.id, student.class_id.as_deref()));
    let rows = join_all(passes).await;

    if cancel.is_cancelled() {
        return Err(StoreError::Cancelled);
    }
    Ok(rows)
}
