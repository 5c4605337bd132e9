use std::{cmp::Ordering, str::FromStr};

use shared::domain::{Item, ItemId};
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Filter {
    #[default]
    All,
    Active,
    Completed,
}

impl Filter {
    pub fn matches(self, item: &Item) -> bool {
        match self {
            Filter::All => true,
            Filter::Active => item.is_active(),
            Filter::Completed => item.completed,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortOrder {
    /// Newest first.
    #[default]
    CreatedDesc,
    /// High, medium, low.
    PriorityDesc,
    /// Soonest first; items without a due date last.
    DueDateAsc,
}

impl SortOrder {
    fn compare(self, a: &Item, b: &Item) -> Ordering {
        match self {
            SortOrder::CreatedDesc => b.created_at.cmp(&a.created_at),
            SortOrder::PriorityDesc => b.priority.rank().cmp(&a.priority.rank()),
            SortOrder::DueDateAsc => match (a.due_date, b.due_date) {
                (Some(a), Some(b)) => a.cmp(&b),
                (Some(_), None) => Ordering::Less,
                (None, Some(_)) => Ordering::Greater,
                (None, None) => Ordering::Equal,
            },
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ViewQuery {
    pub filter: Filter,
    pub sort: SortOrder,
}

impl ViewQuery {
    pub fn new(filter: Filter, sort: SortOrder) -> Self {
        Self { filter, sort }
    }
}

/// Builds a fresh, sorted view. `is_hidden` marks entries that must not be
/// shown (pending deletes). Ties keep mirror order.
pub fn project<'a>(
    items: impl IntoIterator<Item = &'a Item>,
    is_hidden: impl Fn(&ItemId) -> bool,
    query: &ViewQuery,
) -> Vec<Item> {
    let mut view: Vec<Item> = items
        .into_iter()
        .filter(|item| !is_hidden(&item.id) && query.filter.matches(item))
        .cloned()
        .collect();
    view.sort_by(|a, b| query.sort.compare(a, b));
    view
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown {kind} '{value}'")]
pub struct ParseViewError {
    kind: &'static str,
    value: String,
}

impl FromStr for Filter {
    type Err = ParseViewError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "all" => Ok(Filter::All),
            "active" => Ok(Filter::Active),
            "completed" | "done" => Ok(Filter::Completed),
            _ => Err(ParseViewError {
                kind: "filter",
                value: s.to_string(),
            }),
        }
    }
}

impl FromStr for SortOrder {
    type Err = ParseViewError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "created" | "newest" => Ok(SortOrder::CreatedDesc),
            "priority" => Ok(SortOrder::PriorityDesc),
            "due" | "due-date" => Ok(SortOrder::DueDateAsc),
            _ => Err(ParseViewError {
                kind: "sort order",
                value: s.to_string(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, NaiveDate, TimeZone, Utc};
    use shared::domain::Priority;

    use super::*;

    fn item(id: i64, completed: bool, priority: Priority, due: Option<(i32, u32, u32)>) -> Item {
        let created = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).single().expect("timestamp")
            + Duration::minutes(id);
        Item {
            id: ItemId::from(id),
            title: format!("item {id}"),
            description: None,
            completed,
            priority,
            due_date: due.and_then(|(y, m, d)| NaiveDate::from_ymd_opt(y, m, d)),
            created_at: created,
            updated_at: created,
        }
    }

    fn ids(view: &[Item]) -> Vec<&str> {
        view.iter().map(|item| item.id.as_str()).collect()
    }

    fn sample() -> Vec<Item> {
        vec![
            item(1, false, Priority::Low, Some((2024, 3, 1))),
            item(2, true, Priority::High, None),
            item(3, false, Priority::High, Some((2024, 2, 1))),
            item(4, false, Priority::Medium, None),
        ]
    }

    #[test]
    fn default_view_is_newest_first() {
        let items = sample();
        let view = project(&items, |_| false, &ViewQuery::default());
        assert_eq!(ids(&view), vec!["4", "3", "2", "1"]);
    }

    #[test]
    fn filters_by_completion_and_hides_pending_deletes() {
        let items = sample();
        let hidden = ItemId::new("3");
        let active = project(
            &items,
            |id| id == &hidden,
            &ViewQuery::new(Filter::Active, SortOrder::CreatedDesc),
        );
        assert_eq!(ids(&active), vec!["4", "1"]);

        let completed = project(
            &items,
            |_| false,
            &ViewQuery::new(Filter::Completed, SortOrder::CreatedDesc),
        );
        assert_eq!(ids(&completed), vec!["2"]);
    }

    #[test]
    fn priority_sort_is_stable_for_ties() {
        let items = sample();
        let view = project(
            &items,
            |_| false,
            &ViewQuery::new(Filter::All, SortOrder::PriorityDesc),
        );
        assert_eq!(ids(&view), vec!["2", "3", "4", "1"]);
    }

    #[test]
    fn due_date_sort_puts_undated_items_last() {
        let items = sample();
        let view = project(
            &items,
            |_| false,
            &ViewQuery::new(Filter::All, SortOrder::DueDateAsc),
        );
        assert_eq!(ids(&view), vec!["3", "1", "2", "4"]);
    }

    #[test]
    fn parses_filter_and_sort_names() {
        assert_eq!("Active".parse::<Filter>(), Ok(Filter::Active));
        assert_eq!("due".parse::<SortOrder>(), Ok(SortOrder::DueDateAsc));
        assert!("soon".parse::<SortOrder>().is_err());
    }
}
