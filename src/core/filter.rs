use chrono::{DateTime, NaiveDate, TimeZone};
use std::cmp::Ordering;

use super::task::{Category, Task};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum StatusFilter {
    #[default]
    All,
    Active,
    Completed,
}

impl StatusFilter {
    pub fn matches(&self, task: &Task) -> bool {
        match self {
            Self::All => true,
            Self::Active => !task.completed,
            Self::Completed => task.completed,
        }
    }

    pub fn from_keyword(s: &str) -> Option<Self> {
        match s {
            "all" => Some(Self::All),
            "active" => Some(Self::Active),
            "completed" | "done" => Some(Self::Completed),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DateRange {
    Today,
    Tomorrow,
    ThisWeek,
    Overdue,
    Upcoming,
}

impl DateRange {
    /// Whether an active task falls in this range. Completed tasks never do.
    pub fn contains<Tz: TimeZone>(&self, task: &Task, now: &DateTime<Tz>) -> bool {
        if task.completed {
            return false;
        }
        let Some(due) = task.due else {
            return false;
        };
        let tz = now.timezone();
        let today = now.date_naive();
        let due_day = due.with_timezone(&tz).date_naive();

        match self {
            Self::Today => due_day == today,
            Self::Tomorrow => today.succ_opt().is_some_and(|t| due_day == t),
            Self::ThisWeek => {
                let week_end = today + chrono::Duration::days(7);
                due_day >= today && due_day < week_end
            }
            Self::Overdue => due < now.to_utc(),
            Self::Upcoming => true,
        }
    }
}

/// A combined status, category and date view over the task list.
#[derive(Debug, Clone, Copy, Default)]
pub struct TaskQuery {
    pub status: StatusFilter,
    pub category: Option<Category>,
    pub range: Option<DateRange>,
}

impl TaskQuery {
    pub fn matches<Tz: TimeZone>(&self, task: &Task, now: &DateTime<Tz>) -> bool {
        if !self.status.matches(task) {
            return false;
        }
        if self.category.is_some_and(|c| c != task.category) {
            return false;
        }
        match self.range {
            Some(range) => range.contains(task, now),
            None => true,
        }
    }

    pub fn apply<'a, Tz: TimeZone>(&self, tasks: &'a [Task], now: &DateTime<Tz>) -> Vec<&'a Task> {
        let mut matched: Vec<&Task> = tasks.iter().filter(|t| self.matches(t, now)).collect();
        if self.range == Some(DateRange::Upcoming) {
            matched.sort_by_key(|t| t.due);
        } else {
            matched.sort_by(|a, b| display_order(a, b));
        }
        matched
    }
}

/// Active first, then higher priority, then earliest due. Undated tasks sort last.
fn display_order(a: &Task, b: &Task) -> Ordering {
    a.completed
        .cmp(&b.completed)
        .then_with(|| b.priority.cmp(&a.priority))
        .then_with(|| match (a.due, b.due) {
            (Some(x), Some(y)) => x.cmp(&y),
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (None, None) => Ordering::Equal,
        })
}

/// Tasks due on a given calendar day in `tz`, completed ones included.
pub fn tasks_on<'a, Tz: TimeZone>(tasks: &'a [Task], day: NaiveDate, tz: &Tz) -> Vec<&'a Task> {
    tasks
        .iter()
        .filter(|t| t.due.is_some_and(|due| due.with_timezone(tz).date_naive() == day))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::task::Priority;
    use chrono::{Duration, Utc};

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 10, 9, 0, 0).unwrap()
    }

    fn due_in(title: &str, hours: i64) -> Task {
        Task::new(title).with_due(now() + Duration::hours(hours))
    }

    #[test]
    fn status_filter() {
        let mut done = Task::new("Done");
        done.toggle();
        let open = Task::new("Open");

        assert!(StatusFilter::All.matches(&done));
        assert!(StatusFilter::Active.matches(&open));
        assert!(!StatusFilter::Active.matches(&done));
        assert!(StatusFilter::Completed.matches(&done));
        assert_eq!(StatusFilter::from_keyword("done"), Some(StatusFilter::Completed));
    }

    #[test]
    fn date_ranges() {
        let now = now();
        let today = due_in("Today", 3);
        let tomorrow = due_in("Tomorrow", 24);
        let next_month = due_in("Later", 24 * 30);
        let late = due_in("Late", -2);

        assert!(DateRange::Today.contains(&today, &now));
        assert!(!DateRange::Today.contains(&tomorrow, &now));
        assert!(DateRange::Tomorrow.contains(&tomorrow, &now));
        assert!(DateRange::ThisWeek.contains(&tomorrow, &now));
        assert!(!DateRange::ThisWeek.contains(&next_month, &now));
        assert!(DateRange::Overdue.contains(&late, &now));
        assert!(!DateRange::Overdue.contains(&today, &now));
        assert!(!DateRange::Upcoming.contains(&Task::new("Undated"), &now));
    }

    #[test]
    fn completed_tasks_are_outside_every_range() {
        let mut task = due_in("Today", 1);
        task.toggle();
        assert!(!DateRange::Today.contains(&task, &now()));
        assert!(!DateRange::Upcoming.contains(&task, &now()));
    }

    #[test]
    fn query_combines_category_and_orders_by_priority() {
        let tasks = vec![
            due_in("Low work", 5).with_category(Category::Work).with_priority(Priority::Low),
            due_in("High work", 6).with_category(Category::Work).with_priority(Priority::High),
            due_in("Gym", 2).with_category(Category::Health),
            Task::new("Undated work").with_category(Category::Work),
        ];

        let query = TaskQuery {
            category: Some(Category::Work),
            ..TaskQuery::default()
        };
        let titles: Vec<&str> = query.apply(&tasks, &now()).into_iter().map(|t| t.title.as_str()).collect();
        assert_eq!(titles, vec!["High work", "Undated work", "Low work"]);
    }

    #[test]
    fn upcoming_sorts_by_due() {
        let tasks = vec![due_in("Second", 10), due_in("First", 1), Task::new("Undated")];
        let query = TaskQuery {
            range: Some(DateRange::Upcoming),
            ..TaskQuery::default()
        };
        let titles: Vec<&str> = query.apply(&tasks, &now()).into_iter().map(|t| t.title.as_str()).collect();
        assert_eq!(titles, vec!["First", "Second"]);
    }

    #[test]
    fn tasks_on_day() {
        let tasks = vec![due_in("Today", 2), due_in("Tomorrow", 24), Task::new("Undated")];
        let day = now().date_naive();
        let found = tasks_on(&tasks, day, &Utc);
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].title, "Today");
    }
}
