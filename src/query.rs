use mongodb::bson::{doc, Document};
use serde::Serialize;

pub const DEFAULT_LIMIT: u64 = 20;
pub const MAX_LIMIT: u64 = 100;

/// Carries the unpaged total for list endpoints whose body is a bare array.
pub const TOTAL_COUNT_HEADER: &str = "X-Total-Count";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Paging {
    pub page: u64,
    pub limit: u64,
}

impl Paging {
    pub fn new(page: Option<u64>, limit: Option<u64>) -> Self {
        Self {
            page: page.unwrap_or(1).max(1),
            limit: limit.unwrap_or(DEFAULT_LIMIT).clamp(1, MAX_LIMIT),
        }
    }

    pub fn skip(&self) -> u64 {
        (self.page - 1) * self.limit
    }

    pub fn pagination(&self, total: u64) -> Pagination {
        Pagination {
            page: self.page,
            limit: self.limit,
            total,
            pages: total.div_ceil(self.limit),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Pagination {
    pub page: u64,
    pub limit: u64,
    pub total: u64,
    pub pages: u64,
}

/// Case-insensitive substring match with the user's text taken literally.
pub fn contains_ci(term: &str) -> Document {
    doc! { "$regex": regex::escape(term.trim()), "$options": "i" }
}

/// Adds an `$or` clause matching `term` against any of `fields`. Blank terms add
/// nothing.
pub fn apply_search(filter: &mut Document, term: Option<&str>, fields: &[&str]) {
    let Some(term) = term.map(str::trim).filter(|t| !t.is_empty()) else {
        return;
    };
    let alternatives: Vec<Document> = fields
        .iter()
        .map(|field| {
            let mut clause = Document::new();
            clause.insert(*field, contains_ci(term));
            clause
        })
        .collect();
    filter.insert("$or", alternatives);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn paging_defaults_and_bounds() {
        let p = Paging::new(None, None);
        assert_eq!((p.page, p.limit, p.skip()), (1, 20, 0));
        let p = Paging::new(Some(0), Some(1000));
        assert_eq!((p.page, p.limit), (1, 100));
        let p = Paging::new(Some(3), Some(5));
        assert_eq!(p.skip(), 10);
        assert_eq!(p.pagination(11).pages, 3);
        assert_eq!(p.pagination(0).pages, 0);
    }

    #[test]
    fn search_escapes_regex_metacharacters() {
        let mut filter = doc! { "company_id": "c1" };
        apply_search(&mut filter, Some(" a.b+ "), &["name", "email"]);
        assert_eq!(filter.get_str("company_id").unwrap(), "c1");
        let alternatives = filter.get_array("$or").unwrap();
        assert_eq!(alternatives.len(), 2);
        let first = alternatives[0].as_document().unwrap();
        let regex = first.get_document("name").unwrap();
        assert_eq!(regex.get_str("$regex").unwrap(), r"a\.b\+");
        assert_eq!(regex.get_str("$options").unwrap(), "i");
    }

    #[test]
    fn blank_search_adds_nothing() {
        let mut filter = Document::new();
        apply_search(&mut filter, Some("   "), &["name"]);
        apply_search(&mut filter, None, &["name"]);
        assert!(filter.is_empty());
    }
}
