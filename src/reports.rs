//! Read-side derivations over a ledger snapshot.
//!
//! Everything here is a pure function over a slice of activities (plus the
//! teacher directory for ordering). Views are recomputed from the one source
//! of truth instead of keeping separately-mutated counters that could drift.

use chrono::{DateTime, NaiveDate, Utc};
use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet};

use crate::ledger::{Activity, ActivityStatus, Teacher};

pub fn activities_by_date(activities: &[Activity], date: NaiveDate) -> Vec<&Activity> {
    activities.iter().filter(|a| a.date == date).collect()
}

pub fn activities_by_teacher<'a>(
    activities: &'a [Activity],
    teacher_id: &str,
) -> Vec<&'a Activity> {
    activities
        .iter()
        .filter(|a| a.teacher_id == teacher_id)
        .collect()
}

pub fn pending_approvals(activities: &[Activity]) -> Vec<&Activity> {
    activities
        .iter()
        .filter(|a| a.status == ActivityStatus::Pending)
        .collect()
}

/// Distinct dates carrying at least one record, any status. Used to highlight
/// calendar days with data.
pub fn active_dates(activities: &[Activity]) -> BTreeSet<NaiveDate> {
    activities.iter().map(|a| a.date).collect()
}

pub fn teacher_pending_count(activities: &[Activity], teacher_id: &str) -> usize {
    activities
        .iter()
        .filter(|a| a.teacher_id == teacher_id && a.status == ActivityStatus::Pending)
        .count()
}

#[derive(Debug, Clone)]
pub struct TeacherStanding {
    pub teacher: Teacher,
    pub pending_count: usize,
    pub latest_pending_at: Option<DateTime<Utc>>,
}

/// Teachers ordered for the principal's review queue: most pending work
/// first, ties broken by the most recently created pending activity, then by
/// name. Teachers with no pending work trail the list, alphabetically.
pub fn teacher_ordering(teachers: &[Teacher], activities: &[Activity]) -> Vec<TeacherStanding> {
    let mut standings: Vec<TeacherStanding> = teachers
        .iter()
        .map(|t| {
            let mut pending_count = 0usize;
            let mut latest_pending_at: Option<DateTime<Utc>> = None;
            for a in activities {
                if a.teacher_id == t.id && a.status == ActivityStatus::Pending {
                    pending_count += 1;
                    if latest_pending_at.map(|ts| a.created_at > ts).unwrap_or(true) {
                        latest_pending_at = Some(a.created_at);
                    }
                }
            }
            TeacherStanding {
                teacher: t.clone(),
                pending_count,
                latest_pending_at,
            }
        })
        .collect();

    standings.sort_by(|a, b| {
        b.pending_count
            .cmp(&a.pending_count)
            .then_with(|| match (b.latest_pending_at, a.latest_pending_at) {
                (Some(x), Some(y)) => x.cmp(&y),
                (None, None) => Ordering::Equal,
                // Unreachable while counts tie, but keep the order total.
                (Some(_), None) => Ordering::Greater,
                (None, Some(_)) => Ordering::Less,
            })
            .then_with(|| a.teacher.name.cmp(&b.teacher.name))
    });
    standings
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HomeworkReportRow {
    pub teacher_id: String,
    pub teacher_name: String,
    pub homework_count: usize,
    pub subjects: BTreeSet<String>,
}

/// Group homework-bearing activities of the input slice by teacher. Teachers
/// without homework do not appear; rows come out sorted by teacher name.
pub fn homework_report(activities: &[Activity]) -> Vec<HomeworkReportRow> {
    let mut by_teacher: BTreeMap<(String, String), (usize, BTreeSet<String>)> = BTreeMap::new();
    for a in activities {
        if !a.has_homework {
            continue;
        }
        let entry = by_teacher
            .entry((a.teacher_name.clone(), a.teacher_id.clone()))
            .or_default();
        entry.0 += 1;
        entry.1.insert(a.subject_name.clone());
    }
    by_teacher
        .into_iter()
        .map(
            |((teacher_name, teacher_id), (homework_count, subjects))| HomeworkReportRow {
                teacher_id,
                teacher_name,
                homework_count,
                subjects,
            },
        )
        .collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ApprovalStats {
    pub total: usize,
    pub approved: usize,
    pub pending: usize,
    pub rejected: usize,
}

pub fn approval_stats(activities: &[Activity]) -> ApprovalStats {
    let mut stats = ApprovalStats::default();
    for a in activities {
        stats.total += 1;
        match a.status {
            ActivityStatus::Approved => stats.approved += 1,
            ActivityStatus::Pending => stats.pending += 1,
            ActivityStatus::Rejected => stats.rejected += 1,
        }
    }
    stats
}
