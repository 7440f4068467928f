use rocket::{
    http::Status,
    request::{self, FromRequest, Request},
};
use serde::Serialize;

pub const DEFAULT_PAGE_SIZE: usize = 50;
pub const MAX_PAGE_SIZE: usize = 500;

/// A 1-based page request, read from the `page_num` and `page_size` query
/// parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pagination {
    page_num: usize,
    page_size: usize,
}

impl Pagination {
    /// Create a page request, clamping the page size to `1..=MAX_PAGE_SIZE`.
    /// Returns `None` if `page_num` is zero.
    pub fn new(page_num: usize, page_size: usize) -> Option<Self> {
        if page_num < 1 {
            return None;
        }
        Some(Self {
            page_num,
            page_size: page_size.clamp(1, MAX_PAGE_SIZE),
        })
    }

    pub fn page_size(&self) -> usize {
        self.page_size
    }

    /// Offset for a database query. Capped at `i64::MAX`, the largest skip
    /// MongoDB accepts.
    pub fn skip(&self) -> u64 {
        u64::try_from(self.offset()).map_or(i64::MAX as u64, |offset| offset.min(i64::MAX as u64))
    }

    /// Items before this page. Saturates, so absurd page numbers just yield
    /// an empty page.
    fn offset(&self) -> usize {
        (self.page_num - 1).saturating_mul(self.page_size)
    }

    /// Slice one page out of an already-ordered iterator.
    pub fn apply<I: Iterator>(&self, items: I) -> impl Iterator<Item = I::Item> {
        items
            .skip(self.offset())
            .take(self.page_size)
    }

    pub fn result(self, total: u64) -> PaginationResult {
        PaginationResult {
            page_num: self.page_num,
            page_size: self.page_size,
            total,
        }
    }
}

impl Default for Pagination {
    fn default() -> Self {
        Self {
            page_num: 1,
            page_size: DEFAULT_PAGE_SIZE,
        }
    }
}

#[rocket::async_trait]
impl<'r> FromRequest<'r> for Pagination {
    type Error = ();

    async fn from_request(req: &'r Request<'_>) -> request::Outcome<Self, Self::Error> {
        let page_num = match req.query_value::<usize>("page_num").unwrap_or(Ok(1)) {
            Ok(page_num) => page_num,
            Err(_) => return request::Outcome::Failure((Status::BadRequest, ())),
        };
        let page_size = match req
            .query_value::<usize>("page_size")
            .unwrap_or(Ok(DEFAULT_PAGE_SIZE))
        {
            Ok(page_size) => page_size,
            Err(_) => return request::Outcome::Failure((Status::BadRequest, ())),
        };
        match Self::new(page_num, page_size) {
            Some(pagination) => request::Outcome::Success(pagination),
            None => request::Outcome::Failure((Status::BadRequest, ())),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct PaginationResult {
    page_num: usize,
    page_size: usize,
    total: u64,
}
