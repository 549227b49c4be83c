// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Filtering, ordering and paging shared by all store backends.
//!
//! SQL backends narrow rows by table and exact index matches in the
//! database. When a query has no other filters and sorts only on stored
//! timestamps, [`sql_paging`] lets the database order and page as well;
//! otherwise the remaining steps run here. Both paths use the same tie
//! breakers, so every backend lists documents in the same order.

use std::cmp::Ordering;

use super::{Document, Page, Query, SortOption, SortOrder};

/// Whether a document satisfies every filter of the query.
pub fn matches(document: &Document, query: &Query) -> bool {
    let index_ok = query
        .index
        .iter()
        .all(|(key, value)| document.index.get(key) == Some(value));
    if !index_ok {
        return false;
    }

    let in_ok = query.filter.in_queries.iter().all(|option| {
        document
            .index
            .get(&option.key)
            .is_some_and(|value| option.values.contains(value))
    });
    if !in_ok {
        return false;
    }

    let fuzzy_ok = query.filter.queries.iter().all(|option| {
        document
            .index
            .get(&option.key)
            .is_some_and(|value| value.contains(&option.query))
    });
    if !fuzzy_ok {
        return false;
    }

    query
        .filter
        .is_not_exist
        .iter()
        .all(|key| !document.index.contains_key(key))
}

fn compare_on(a: &Document, b: &Document, option: &SortOption) -> Ordering {
    let ordering = match option.key.as_str() {
        "createTime" => a.create_time.cmp(&b.create_time),
        "updateTime" => a.update_time.cmp(&b.update_time),
        key => {
            let left = a.index.get(key).map(String::as_str).unwrap_or_default();
            let right = b.index.get(key).map(String::as_str).unwrap_or_default();
            left.cmp(right)
        }
    };
    match option.order {
        SortOrder::Ascending => ordering,
        SortOrder::Descending => ordering.reverse(),
    }
}

/// Order documents by the sort options, falling back to create time and
/// primary key so results are stable across backends.
pub fn sort(documents: &mut [Document], sort_by: &[SortOption]) {
    documents.sort_by(|a, b| {
        sort_by
            .iter()
            .map(|option| compare_on(a, b, option))
            .find(|ordering| ordering.is_ne())
            .unwrap_or_else(|| {
                a.create_time
                    .cmp(&b.create_time)
                    .then_with(|| a.primary_key.cmp(&b.primary_key))
            })
    });
}

/// Cut one page out of the documents. Page numbers start at 1; page 0 is
/// treated as 1 and a zero page size returns everything.
pub fn paginate(documents: Vec<Document>, page: Option<Page>) -> Vec<Document> {
    match page {
        Some(Page { page, page_size }) if page_size > 0 => {
            let skip = page.saturating_sub(1).saturating_mul(page_size);
            documents.into_iter().skip(skip).take(page_size).collect()
        }
        _ => documents,
    }
}

/// Ordering and paging a SQL backend can run in the database.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SqlPaging {
    /// Body of the `ORDER BY` clause, over stored columns only.
    pub order_by: String,
    /// `LIMIT` and `OFFSET` when a page is selected.
    pub limit_offset: Option<(i64, i64)>,
}

/// SQL ordering and paging for a query, or `None` when the rows have to be
/// filtered, ordered and paged in memory.
pub fn sql_paging(q: &Query) -> Option<SqlPaging> {
    let filter = &q.filter;
    if !filter.queries.is_empty() || !filter.in_queries.is_empty() || !filter.is_not_exist.is_empty()
    {
        return None;
    }

    let mut order_by = Vec::with_capacity(q.sort_by.len() + 2);
    for option in &q.sort_by {
        let column = match option.key.as_str() {
            "createTime" => "create_time",
            "updateTime" => "update_time",
            _ => return None,
        };
        let direction = match option.order {
            SortOrder::Ascending => "ASC",
            SortOrder::Descending => "DESC",
        };
        order_by.push(format!("{} {}", column, direction));
    }
    order_by.push("create_time ASC".to_string());
    order_by.push("primary_key ASC".to_string());

    let limit_offset = match q.page {
        Some(Page { page, page_size }) if page_size > 0 => {
            let offset = page.saturating_sub(1).saturating_mul(page_size);
            Some((
                i64::try_from(page_size).unwrap_or(i64::MAX),
                i64::try_from(offset).unwrap_or(i64::MAX),
            ))
        }
        _ => None,
    };

    Some(SqlPaging {
        order_by: order_by.join(", "),
        limit_offset,
    })
}

/// Filter, sort and page in one pass.
pub fn apply(documents: impl IntoIterator<Item = Document>, query: &Query) -> Vec<Document> {
    let mut selected: Vec<Document> = documents
        .into_iter()
        .filter(|document| matches(document, query))
        .collect();
    sort(&mut selected, &query.sort_by);
    paginate(selected, query.page)
}

/// Number of matching documents, ignoring paging.
pub fn count<'a>(documents: impl IntoIterator<Item = &'a Document>, query: &Query) -> i64 {
    documents
        .into_iter()
        .filter(|document| matches(document, query))
        .count() as i64
}
