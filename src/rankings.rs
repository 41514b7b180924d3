use std::collections::HashMap;

use crate::models::{ClassRankingRow, Subject, SubjectPerf, Submission};
use crate::store::{collections, Filter, RecordStore, StoreError};

fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        0.0
    } else {
        values.iter().sum::<f64>() / values.len() as f64
    }
}

async fn scored_submissions(
    store: &dyn RecordStore,
    class_id: &str,
) -> Result<Vec<Submission>, StoreError> {
    let records = store
        .query(collections::SUBMISSIONS, &[Filter::eq("classId", class_id)])
        .await?;
    Ok(records
        .iter()
        .filter_map(Submission::from_record)
        .filter(|s| s.score.is_some() && s.subject.is_some())
        .collect())
}

/// Child-vs-class averages per subject. Every enumerated subject appears in
/// the output; without a class there is nothing to average and every row is
/// zero. Scoreless records are excluded from numerator and denominator.
pub async fn subject_averages_for_student(
    store: &dyn RecordStore,
    student_id: &str,
    class_id: Option<&str>,
) -> Result<Vec<SubjectPerf>, StoreError> {
    let Some(class_id) = class_id else {
        return Ok(zeroed_perfs());
    };
    let submissions = scored_submissions(store, class_id).await?;

    Ok(Subject::ALL
        .iter()
        .map(|subject| {
            let class_scores: Vec<f64> = submissions
                .iter()
                .filter(|s| s.subject == Some(*subject))
                .filter_map(|s| s.score)
                .collect();
            let child_scores: Vec<f64> = submissions
                .iter()
                .filter(|s| s.subject == Some(*subject) && s.student_id == student_id)
                .filter_map(|s| s.score)
                .collect();
            SubjectPerf {
                subject: *subject,
                child_avg: mean(&child_scores),
                class_avg: mean(&class_scores),
            }
        })
        .collect())
}

fn zeroed_perfs() -> Vec<SubjectPerf> {
    Subject::ALL
        .iter()
        .map(|subject| SubjectPerf {
            subject: *subject,
            child_avg: 0.0,
            class_avg: 0.0,
        })
        .collect()
}

/// Per-subject class rankings: scored records grouped by subject then
/// student, averaged, sorted descending, ranks 1..=N with no gaps. Equal
/// averages keep the order students first appeared in the result set, so
/// two runs over unchanged data assign identical ranks.
pub async fn subject_rankings_for_class(
    store: &dyn RecordStore,
    class_id: &str,
) -> Result<Vec<ClassRankingRow>, StoreError> {
    let submissions = scored_submissions(store, class_id).await?;
    let mut rows = Vec::new();

    for subject in Subject::ALL {
        // First-appearance order captured explicitly; sorting on a HashMap's
        // iteration order would make ties nondeterministic.
        let mut order: Vec<String> = Vec::new();
        let mut scores: HashMap<String, Vec<f64>> = HashMap::new();
        for submission in submissions.iter().filter(|s| s.subject == Some(subject)) {
            let score = match submission.score {
                Some(score) => score,
                None => continue,
            };
            if !scores.contains_key(&submission.student_id) {
                order.push(submission.student_id.clone());
            }
            scores.entry(submission.student_id.clone()).or_default().push(score);
        }

        let mut ranked: Vec<(String, f64)> = order
            .into_iter()
            .map(|student_id| {
                let average = mean(&scores[&student_id]);
                (student_id, average)
            })
            .collect();
        ranked.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));

        rows.extend(
            ranked
                .into_iter()
                .enumerate()
                .map(|(idx, (student_id, average))| ClassRankingRow {
                    subject,
                    student_id,
                    average,
                    rank: idx + 1,
                }),
        );
    }

    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{record, MemoryStore};
    use serde_json::json;

    fn scored(store: &MemoryStore, id: &str, student: &str, subject: &str, score: f64) {
        store.insert(
            collections::SUBMISSIONS,
            record(json!({
                "id": id,
                "assignmentId": format!("a-{id}"),
                "studentId": student,
                "classId": "c1",
                "subject": subject,
                "status": "approved",
                "score": score,
            })),
        ).unwrap();
    }

    fn sample_class() -> MemoryStore {
        let store = MemoryStore::new();
        scored(&store, "s1", "stu-a", "literacy", 80.0);
        scored(&store, "s2", "stu-a", "literacy", 90.0);
        scored(&store, "s3", "stu-b", "literacy", 70.0);
        scored(&store, "s4", "stu-b", "numeracy", 95.0);
        // Scoreless record must not drag averages toward zero.
        store.insert(
            collections::SUBMISSIONS,
            record(json!({
                "id": "s5",
                "assignmentId": "a-s5",
                "studentId": "stu-a",
                "classId": "c1",
                "subject": "literacy",
                "status": "submitted",
            })),
        ).unwrap();
        store
    }

    #[tokio::test]
    async fn averages_cover_every_subject() {
        let store = sample_class();
        let perfs = subject_averages_for_student(&store, "stu-a", Some("c1"))
            .await
            .unwrap();
        assert_eq!(perfs.len(), Subject::ALL.len());

        let literacy = perfs.iter().find(|p| p.subject == Subject::Literacy).unwrap();
        assert!((literacy.child_avg - 85.0).abs() < 1e-9);
        assert!((literacy.class_avg - 80.0).abs() < 1e-9);

        let science = perfs.iter().find(|p| p.subject == Subject::Science).unwrap();
        assert_eq!(science.child_avg, 0.0);
        assert_eq!(science.class_avg, 0.0);
    }

    #[tokio::test]
    async fn no_class_yields_all_zeros_without_failing() {
        let store = sample_class();
        let perfs = subject_averages_for_student(&store, "stu-a", None)
            .await
            .unwrap();
        assert_eq!(perfs.len(), Subject::ALL.len());
        assert!(perfs.iter().all(|p| p.child_avg == 0.0 && p.class_avg == 0.0));
    }

    #[tokio::test]
    async fn rankings_are_dense_per_subject() {
        let store = sample_class();
        let rows = subject_rankings_for_class(&store, "c1").await.unwrap();

        let literacy: Vec<_> = rows.iter().filter(|r| r.subject == Subject::Literacy).collect();
        assert_eq!(literacy.len(), 2);
        assert_eq!(literacy[0].student_id, "stu-a");
        assert_eq!(literacy[0].rank, 1);
        assert_eq!(literacy[1].student_id, "stu-b");
        assert_eq!(literacy[1].rank, 2);

        let numeracy: Vec<_> = rows.iter().filter(|r| r.subject == Subject::Numeracy).collect();
        assert_eq!(numeracy.len(), 1);
        assert_eq!(numeracy[0].rank, 1);
    }

    #[tokio::test]
    async fn equal_averages_get_distinct_stable_ranks() {
        let store = MemoryStore::new();
        scored(&store, "s1", "stu-b", "art", 88.0);
        scored(&store, "s2", "stu-a", "art", 88.0);

        let first = subject_rankings_for_class(&store, "c1").await.unwrap();
        let second = subject_rankings_for_class(&store, "c1").await.unwrap();

        assert_eq!(first.len(), 2);
        assert_eq!(first[0].student_id, "stu-b");
        assert_eq!(first[0].rank, 1);
        assert_eq!(first[1].student_id, "stu-a");
        assert_eq!(first[1].rank, 2);

        // Re-running over unchanged data resolves the tie identically.
        for (a, b) in first.iter().zip(second.iter()) {
            assert_eq!(a.student_id, b.student_id);
            assert_eq!(a.rank, b.rank);
        }
    }

    #[tokio::test]
    async fn reruns_assign_identical_ranks() {
        let store = sample_class();
        let first = subject_rankings_for_class(&store, "c1").await.unwrap();
        let second = subject_rankings_for_class(&store, "c1").await.unwrap();
        assert_eq!(first.len(), second.len());
        for (a, b) in first.iter().zip(second.iter()) {
            assert_eq!(a.subject, b.subject);
            assert_eq!(a.student_id, b.student_id);
            assert_eq!(a.rank, b.rank);
        }
    }
}
