//! Filtering, sorting and paging for per-user session listings.

use serde::{Deserialize, Serialize};

use crate::models::session::Session;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionSortField {
    #[default]
    CreatedAt,
    LastActivityAt,
    ExpiresAt,
}

impl SessionSortField {
    pub fn column(&self) -> &'static str {
        match self {
            SessionSortField::CreatedAt => "created_at",
            SessionSortField::LastActivityAt => "last_activity_at",
            SessionSortField::ExpiresAt => "expires_at",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortOrder {
    Asc,
    #[default]
    Desc,
}

impl SortOrder {
    pub fn keyword(&self) -> &'static str {
        match self {
            SortOrder::Asc => "ASC",
            SortOrder::Desc => "DESC",
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionFilter {
    /// Match on the revocation flag only when set.
    pub is_valid: Option<bool>,
    /// When false, sessions past `expires_at` are left out.
    #[serde(default)]
    pub include_expired: bool,
    /// Case-insensitive substring of the ip address.
    pub ip_address: Option<String>,
    /// Case-insensitive substring of the device label.
    pub device: Option<String>,
    #[serde(default)]
    pub sort_by: SessionSortField,
    #[serde(default)]
    pub sort_order: SortOrder,
    #[serde(skip)]
    pub limit: Option<i64>,
    #[serde(skip)]
    pub offset: Option<i64>,
}

impl SessionFilter {
    /// Every session of the user, newest first.
    pub fn all() -> Self {
        Self {
            include_expired: true,
            ..Default::default()
        }
    }

    /// Sessions that satisfy the active invariant.
    pub fn active() -> Self {
        Self {
            is_valid: Some(true),
            include_expired: false,
            ..Default::default()
        }
    }

    pub fn with_page(mut self, pagination: &Pagination) -> Self {
        self.limit = Some(pagination.limit());
        self.offset = Some(pagination.offset());
        self
    }

    /// Same predicate the SQL repository applies, for in-process stores.
    pub fn matches(&self, session: &Session, now: chrono::DateTime<chrono::Utc>) -> bool {
        if let Some(is_valid) = self.is_valid {
            if session.is_valid != is_valid {
                return false;
            }
        }
        if !self.include_expired && session.expires_at <= now {
            return false;
        }
        if let Some(needle) = self.ip_address.as_deref().filter(|s| !s.is_empty()) {
            if !contains_ignore_case(session.ip_address.as_deref(), needle) {
                return false;
            }
        }
        if let Some(needle) = self.device.as_deref().filter(|s| !s.is_empty()) {
            if !contains_ignore_case(session.device.as_deref(), needle) {
                return false;
            }
        }
        true
    }

    pub fn sort(&self, sessions: &mut [Session]) {
        sessions.sort_by(|a, b| {
            let ordering = match self.sort_by {
                SessionSortField::CreatedAt => a.created_at.cmp(&b.created_at),
                SessionSortField::LastActivityAt => a.last_activity_at.cmp(&b.last_activity_at),
                SessionSortField::ExpiresAt => a.expires_at.cmp(&b.expires_at),
            }
            .then_with(|| a.id.cmp(&b.id));
            match self.sort_order {
                SortOrder::Asc => ordering,
                SortOrder::Desc => ordering.reverse(),
            }
        });
    }
}

fn contains_ignore_case(haystack: Option<&str>, needle: &str) -> bool {
    haystack
        .map(|value| value.to_lowercase().contains(&needle.to_lowercase()))
        .unwrap_or(false)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pagination {
    /// 1-based page number.
    pub page: u32,
    pub per_page: u32,
}

pub const DEFAULT_PER_PAGE: u32 = 20;
pub const MAX_PER_PAGE: u32 = 100;

impl Default for Pagination {
    fn default() -> Self {
        Self {
            page: 1,
            per_page: DEFAULT_PER_PAGE,
        }
    }
}

impl Pagination {
    pub fn new(page: u32, per_page: u32) -> Self {
        Self {
            page: page.max(1),
            per_page: per_page.clamp(1, MAX_PER_PAGE),
        }
    }

    pub fn limit(&self) -> i64 {
        i64::from(self.per_page)
    }

    pub fn offset(&self) -> i64 {
        i64::from(self.page.saturating_sub(1)) * i64::from(self.per_page)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub total: i64,
    pub page: u32,
    pub per_page: u32,
    pub total_pages: u32,
    pub has_next: bool,
    pub has_prev: bool,
}

impl<T> Page<T> {
    pub fn new(items: Vec<T>, total: i64, pagination: &Pagination) -> Self {
        let per_page = i64::from(pagination.per_page.max(1));
        let total_pages = ((total.max(0) + per_page - 1) / per_page) as u32;
        Self {
            items,
            total,
            page: pagination.page,
            per_page: pagination.per_page,
            total_pages,
            has_next: pagination.page < total_pages,
            has_prev: pagination.page > 1,
        }
    }
}
