//! Listing parameters and paged results.

use crate::access::CallerId;
use serde::{Deserialize, Serialize};

/// Default page size when none is requested.
pub const DEFAULT_LIST_LIMIT: usize = 100;

/// Hard cap on a single page.
pub const MAX_LIST_LIMIT: usize = 1000;

/// Filters applied to asset listings.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListMatcher {
    /// Substring of the full path; a trailing `*` turns it into a prefix match.
    #[serde(default)]
    pub key: Option<String>,
    /// Substring of the description.
    #[serde(default)]
    pub description: Option<String>,
}

impl ListMatcher {
    pub fn matches(&self, full_path: &str, description: Option<&str>) -> bool {
        let key_ok = match self.key.as_deref() {
            None => true,
            Some(pattern) => match pattern.strip_suffix('*') {
                Some(prefix) => full_path.starts_with(prefix),
                None => full_path.contains(pattern),
            },
        };
        let description_ok = match self.description.as_deref() {
            None => true,
            Some(needle) => description.is_some_and(|d| d.contains(needle)),
        };
        key_ok && description_ok
    }
}

/// Field a listing is ordered by.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ListOrderField {
    #[default]
    Keys,
    CreatedAt,
    UpdatedAt,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListOrder {
    #[serde(default)]
    pub desc: bool,
    #[serde(default)]
    pub field: ListOrderField,
}

/// Cursor based pagination.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListPaginate {
    /// Key of the last item of the previous page.
    #[serde(default)]
    pub start_after: Option<String>,
    #[serde(default)]
    pub limit: Option<usize>,
}

impl ListPaginate {
    /// The page size to use, defaulted and capped.
    pub fn effective_limit(&self) -> usize {
        self.limit
            .unwrap_or(DEFAULT_LIST_LIMIT)
            .clamp(1, MAX_LIST_LIMIT)
    }
}

/// Parameters of a listing call.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListParams {
    #[serde(default)]
    pub matcher: ListMatcher,
    #[serde(default)]
    pub order: ListOrder,
    #[serde(default)]
    pub paginate: ListPaginate,
    /// Only include items owned by this caller.
    #[serde(default)]
    pub owner: Option<CallerId>,
}

/// One page of a listing.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListResults<T> {
    pub items: Vec<T>,
    /// Number of items in this page.
    pub items_length: usize,
    /// Index of this page among all matching pages.
    pub items_page: usize,
    /// Number of items matching the filters, across all pages.
    pub matches_length: usize,
    pub matches_pages: usize,
}

impl<T> ListResults<T> {
    /// Cut one page out of the fully ordered matches.
    ///
    /// `key` extracts the cursor key compared against `start_after`. When
    /// the cursor item is gone, key order resumes at the first key past it;
    /// time orders cannot place a missing cursor and restart from the top.
    pub fn paginate<F>(matches: Vec<T>, paginate: &ListPaginate, order: &ListOrder, key: F) -> Self
    where
        F: Fn(&T) -> String,
    {
        let limit = paginate.effective_limit();
        let matches_length = matches.len();
        let start = match paginate.start_after.as_deref() {
            Some(after) => match matches.iter().position(|item| key(item) == after) {
                Some(i) => i + 1,
                None if order.field == ListOrderField::Keys => matches
                    .iter()
                    .position(|item| {
                        let k = key(item);
                        if order.desc {
                            k.as_str() < after
                        } else {
                            k.as_str() > after
                        }
                    })
                    .unwrap_or(matches_length),
                None => 0,
            },
            None => 0,
        };

        let items: Vec<T> = matches.into_iter().skip(start).take(limit).collect();
        Self {
            items_length: items.len(),
            items_page: start / limit,
            matches_length,
            matches_pages: matches_length.div_ceil(limit),
            items,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_matcher_key_modes() {
        let contains = ListMatcher {
            key: Some("img".to_string()),
            description: None,
        };
        assert!(contains.matches("/assets/img/logo.png", None));
        assert!(!contains.matches("/index.html", None));

        let prefix = ListMatcher {
            key: Some("/assets/*".to_string()),
            description: None,
        };
        assert!(prefix.matches("/assets/app.js", None));
        assert!(!prefix.matches("/x/assets/app.js", None));
    }

    #[test]
    fn test_matcher_description_requires_value() {
        let matcher = ListMatcher {
            key: None,
            description: Some("logo".to_string()),
        };
        assert!(matcher.matches("/a", Some("company logo")));
        assert!(!matcher.matches("/a", None));
    }

    #[test]
    fn test_paginate_with_cursor() {
        let items: Vec<String> = (0..5).map(|i| format!("/{i}")).collect();
        let first = ListResults::paginate(
            items.clone(),
            &ListPaginate {
                start_after: None,
                limit: Some(2),
            },
            &ListOrder::default(),
            |s| s.clone(),
        );
        assert_eq!(first.items, vec!["/0", "/1"]);
        assert_eq!(first.matches_length, 5);
        assert_eq!(first.matches_pages, 3);
        assert_eq!(first.items_page, 0);

        let second = ListResults::paginate(
            items,
            &ListPaginate {
                start_after: Some("/1".to_string()),
                limit: Some(2),
            },
            &ListOrder::default(),
            |s| s.clone(),
        );
        assert_eq!(second.items, vec!["/2", "/3"]);
        assert_eq!(second.items_page, 1);
    }

    #[test]
    fn test_cursor_survives_deleted_item() {
        let remaining: Vec<String> = ["/a", "/c", "/d"].iter().map(|s| s.to_string()).collect();
        let paginate = ListPaginate {
            start_after: Some("/b".to_string()),
            limit: Some(2),
        };

        let page = ListResults::paginate(remaining.clone(), &paginate, &ListOrder::default(), |s| {
            s.clone()
        });
        assert_eq!(page.items, vec!["/c", "/d"]);
        assert_eq!(page.matches_length, 3);

        let mut descending = remaining;
        descending.reverse();
        let desc = ListOrder {
            desc: true,
            field: ListOrderField::Keys,
        };
        let page = ListResults::paginate(descending, &paginate, &desc, |s| s.clone());
        assert_eq!(page.items, vec!["/a"]);
    }

    #[test]
    fn test_time_order_restarts_when_cursor_is_gone() {
        let items: Vec<String> = ["/x", "/y"].iter().map(|s| s.to_string()).collect();
        let order = ListOrder {
            desc: false,
            field: ListOrderField::UpdatedAt,
        };
        let page = ListResults::paginate(
            items,
            &ListPaginate {
                start_after: Some("/gone".to_string()),
                limit: None,
            },
            &order,
            |s| s.clone(),
        );
        assert_eq!(page.items, vec!["/x", "/y"]);
    }

    #[test]
    fn test_limit_is_capped() {
        let paginate = ListPaginate {
            start_after: None,
            limit: Some(1_000_000),
        };
        assert_eq!(paginate.effective_limit(), MAX_LIST_LIMIT);
        assert_eq!(ListPaginate::default().effective_limit(), DEFAULT_LIST_LIMIT);
    }
}
