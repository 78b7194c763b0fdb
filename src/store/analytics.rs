//! Read-side aggregations shared by every backend.
//!
//! All windows are UTC calendar windows keyed on the entry's `start_time`.
//! Weeks start on Monday. Resuming moves `start_time` to the resume instant,
//! so an entry's whole accumulated duration lands in the window of its
//! latest session; entries keep no per-session history to split it.

use std::collections::HashMap;

use chrono::{DateTime, Datelike, Days, NaiveDate, NaiveTime, Utc};

use crate::models::{DailyTotal, DashboardStats, Task, TaskItem, TaskWithStats, TimeByTask, TimeEntry};

const NEARING_LIMIT_LOW: f64 = 0.70;
const NEARING_LIMIT_HIGH: f64 = 0.85;

fn start_of_day(date: NaiveDate) -> DateTime<Utc> {
    date.and_time(NaiveTime::MIN).and_utc()
}

fn start_of_week(now: DateTime<Utc>) -> DateTime<Utc> {
    let today = now.date_naive();
    let back = u64::from(today.weekday().num_days_from_monday());
    start_of_day(today - Days::new(back))
}

fn start_of_month(now: DateTime<Utc>) -> DateTime<Utc> {
    let today = now.date_naive();
    start_of_day(today.with_day(1).unwrap_or(today))
}

fn tracked_since(entries: &[TimeEntry], since: DateTime<Utc>, now: DateTime<Utc>) -> i64 {
    entries
        .iter()
        .filter(|e| e.start_time >= since)
        .map(|e| e.effective_seconds(now))
        .sum()
}

pub fn task_with_stats(
    task: Task,
    entries: &[TimeEntry],
    items: &[TaskItem],
    now: DateTime<Utc>,
) -> TaskWithStats {
    let own = entries.iter().filter(|e| e.task_id == task.id);
    let total_time = own.clone().map(|e| e.effective_seconds(now)).sum();
    let is_running = own.clone().any(|e| e.is_running);
    TaskWithStats {
        task,
        total_time,
        is_running,
        items_total: items.len(),
        items_completed: items.iter().filter(|i| i.completed).count(),
    }
}

pub fn dashboard_stats(tasks: &[Task], entries: &[TimeEntry], now: DateTime<Utc>) -> DashboardStats {
    let today = now.date_naive();
    let tomorrow = today.succ_opt();

    let mut tracked: HashMap<i64, i64> = HashMap::new();
    for entry in entries {
        *tracked.entry(entry.task_id).or_default() += entry.effective_seconds(now);
    }

    let mut stats = DashboardStats {
        today_time: tracked_since(entries, start_of_day(today), now),
        week_time: tracked_since(entries, start_of_week(now), now),
        month_time: tracked_since(entries, start_of_month(now), now),
        running_entries: entries.iter().filter(|e| e.is_running).count(),
        ..Default::default()
    };

    for task in tasks {
        if task.is_completed {
            stats.completed_tasks += 1;
        }
        if let Some(deadline) = task.deadline.filter(|_| !task.is_completed) {
            let day = deadline.date_naive();
            if day == today {
                stats.due_today += 1;
            } else if Some(day) == tomorrow {
                stats.due_tomorrow += 1;
            }
        }
        if !task.is_open() {
            continue;
        }
        stats.active_tasks += 1;
        if task.deadline.is_some_and(|d| d < now) {
            stats.overdue_tasks += 1;
        }
        if let Some(budget) = task.estimated_seconds() {
            let spent = tracked.get(&task.id).copied().unwrap_or(0);
            let ratio = spent as f64 / budget as f64;
            if spent > budget {
                stats.over_budget_tasks += 1;
            } else if (NEARING_LIMIT_LOW..=NEARING_LIMIT_HIGH).contains(&ratio) {
                stats.nearing_limit_tasks += 1;
            }
        }
    }
    stats
}

/// Per-task totals over `entries`, largest first. Entries whose task no
/// longer exists are skipped.
pub fn time_by_task(tasks: &[Task], entries: &[TimeEntry], now: DateTime<Utc>) -> Vec<TimeByTask> {
    let mut totals: HashMap<i64, (i64, usize)> = HashMap::new();
    for entry in entries {
        let slot = totals.entry(entry.task_id).or_default();
        slot.0 += entry.effective_seconds(now);
        slot.1 += 1;
    }

    let mut rows: Vec<TimeByTask> = tasks
        .iter()
        .filter_map(|task| {
            let (total_time, entry_count) = totals.get(&task.id).copied()?;
            Some(TimeByTask {
                task_id: task.id,
                task_name: task.name.clone(),
                color: task.color.clone(),
                total_time,
                entry_count,
            })
        })
        .collect();
    rows.sort_by(|a, b| b.total_time.cmp(&a.total_time).then(a.task_id.cmp(&b.task_id)));
    rows
}

/// One row per day for the last `days` days ending today, oldest first.
pub fn daily_totals(entries: &[TimeEntry], days: u32, now: DateTime<Utc>) -> Vec<DailyTotal> {
    let today = now.date_naive();
    let days = days.max(1);
    let first = today - Days::new(u64::from(days - 1));

    let mut totals: HashMap<NaiveDate, i64> = HashMap::new();
    for entry in entries {
        let day = entry.start_time.date_naive();
        if day >= first && day <= today {
            *totals.entry(day).or_default() += entry.effective_seconds(now);
        }
    }

    first
        .iter_days()
        .take(days as usize)
        .map(|date| DailyTotal {
            date,
            total_time: totals.get(&date).copied().unwrap_or(0),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{DEFAULT_TASK_COLOR, EntryState};
    use chrono::{Duration, TimeZone};

    // Wednesday
    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 7, 16, 15, 0, 0).unwrap()
    }

    fn task(id: i64, estimated_hours: Option<f64>) -> Task {
        Task {
            id,
            name: format!("Task {}", id),
            description: None,
            color: DEFAULT_TASK_COLOR.to_string(),
            estimated_hours,
            deadline: None,
            is_active: true,
            is_completed: false,
            completed_at: None,
            user_id: None,
            created_at: now() - Duration::days(60),
        }
    }

    fn finished(id: i64, task_id: i64, start: DateTime<Utc>, secs: i64) -> TimeEntry {
        TimeEntry {
            id,
            task_id,
            start_time: start,
            end_time: Some(start + Duration::seconds(secs)),
            duration: Some(secs),
            is_running: false,
            state: EntryState::Finished,
            notes: None,
            user_id: None,
            created_at: start,
        }
    }

    #[test]
    fn windows_split_today_week_and_month() {
        let n = now();
        let entries = vec![
            finished(1, 1, n - Duration::hours(2), 600),
            // Monday of the same week
            finished(2, 1, Utc.with_ymd_and_hms(2025, 7, 14, 9, 0, 0).unwrap(), 1200),
            // Previous week, same month
            finished(3, 1, Utc.with_ymd_and_hms(2025, 7, 2, 9, 0, 0).unwrap(), 1800),
            // Previous month
            finished(4, 1, Utc.with_ymd_and_hms(2025, 6, 30, 9, 0, 0).unwrap(), 3600),
        ];
        let stats = dashboard_stats(&[task(1, None)], &entries, n);
        assert_eq!(stats.today_time, 600);
        assert_eq!(stats.week_time, 1800);
        assert_eq!(stats.month_time, 3600);
    }

    #[test]
    fn running_entry_counts_open_session() {
        let n = now();
        let mut running = finished(1, 1, n - Duration::seconds(90), 0);
        running.duration = Some(40);
        running.end_time = None;
        running.is_running = true;
        running.state = EntryState::Running;
        let stats = dashboard_stats(&[task(1, None)], &[running], n);
        assert_eq!(stats.today_time, 130);
        assert_eq!(stats.running_entries, 1);
    }

    #[test]
    fn resumed_entry_counts_in_latest_session_window() {
        let n = now();
        // 30 min tracked yesterday, resumed an hour ago.
        let mut resumed = finished(1, 1, n - Duration::hours(1), 0);
        resumed.duration = Some(1800);
        resumed.end_time = None;
        resumed.is_running = true;
        resumed.state = EntryState::Running;
        let stats = dashboard_stats(&[task(1, None)], &[resumed], n);
        assert_eq!(stats.today_time, 1800 + 3600);
        assert_eq!(stats.week_time, stats.today_time);
    }

    #[test]
    fn budget_thresholds_are_inclusive() {
        let n = now();
        // 1h budgets: 70%, 85%, 86%, 101%
        let tasks: Vec<Task> = (1..=4).map(|id| task(id, Some(1.0))).collect();
        let entries = vec![
            finished(1, 1, n - Duration::days(3), 2520),
            finished(2, 2, n - Duration::days(3), 3060),
            finished(3, 3, n - Duration::days(3), 3096),
            finished(4, 4, n - Duration::days(3), 3636),
        ];
        let stats = dashboard_stats(&tasks, &entries, n);
        assert_eq!(stats.nearing_limit_tasks, 2);
        assert_eq!(stats.over_budget_tasks, 1);
    }

    #[test]
    fn deadlines_feed_overdue_and_due_counts() {
        let n = now();
        let mut overdue = task(1, None);
        overdue.deadline = Some(n - Duration::days(1));
        let mut due_today = task(2, None);
        due_today.deadline = Some(n + Duration::hours(2));
        let mut due_tomorrow = task(3, None);
        due_tomorrow.deadline = Some(n + Duration::days(1));
        let mut done = task(4, None);
        done.deadline = Some(n + Duration::hours(1));
        done.is_completed = true;

        let stats = dashboard_stats(&[overdue, due_today, due_tomorrow, done], &[], n);
        assert_eq!(stats.overdue_tasks, 1);
        assert_eq!(stats.due_today, 1);
        assert_eq!(stats.due_tomorrow, 1);
        assert_eq!(stats.active_tasks, 3);
        assert_eq!(stats.completed_tasks, 1);
    }

    #[test]
    fn time_by_task_sorts_descending() {
        let n = now();
        let tasks = vec![task(1, None), task(2, None), task(3, None)];
        let entries = vec![
            finished(1, 1, n - Duration::hours(5), 300),
            finished(2, 2, n - Duration::hours(4), 900),
            finished(3, 1, n - Duration::hours(3), 100),
        ];
        let rows = time_by_task(&tasks, &entries, n);
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].task_id, 2);
        assert_eq!(rows[1].total_time, 400);
        assert_eq!(rows[1].entry_count, 2);
    }

    #[test]
    fn daily_totals_are_zero_filled_oldest_first() {
        let n = now();
        let entries = vec![
            finished(1, 1, n - Duration::hours(1), 60),
            finished(2, 1, n - Duration::days(2), 120),
            finished(3, 1, n - Duration::days(10), 999),
        ];
        let days = daily_totals(&entries, 3, n);
        assert_eq!(days.len(), 3);
        assert_eq!(days[0].date, NaiveDate::from_ymd_opt(2025, 7, 14).unwrap());
        assert_eq!(days[0].total_time, 120);
        assert_eq!(days[1].total_time, 0);
        assert_eq!(days[2].total_time, 60);
    }

    #[test]
    fn task_stats_include_items() {
        let n = now();
        let t = task(1, None);
        let items = vec![
            TaskItem {
                id: 1,
                task_id: 1,
                title: "a".into(),
                completed: true,
                created_at: n,
            },
            TaskItem {
                id: 2,
                task_id: 1,
                title: "b".into(),
                completed: false,
                created_at: n,
            },
        ];
        let stats = task_with_stats(t, &[finished(1, 1, n, 75)], &items, n);
        assert_eq!(stats.total_time, 75);
        assert!(!stats.is_running);
        assert_eq!(stats.items_total, 2);
        assert_eq!(stats.items_completed, 1);
    }
}
