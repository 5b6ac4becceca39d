use serde::{Deserialize, Serialize};

pub const DEFAULT_PER_PAGE: i64 = 20;
pub const MAX_PER_PAGE: i64 = 100;

#[derive(Deserialize, Debug, Default, Clone, Copy)]
pub struct PageParams {
    pub page: Option<i64>,
    pub per_page: Option<i64>,
}

impl PageParams {
    /// Returns `(page, per_page, offset)` with page >= 1 and per_page clamped to 1..=100.
    pub fn resolve(&self) -> (i64, i64, i64) {
        let page = self.page.unwrap_or(1).max(1);
        let per_page = self.per_page.unwrap_or(DEFAULT_PER_PAGE).clamp(1, MAX_PER_PAGE);
        (page, per_page, (page - 1) * per_page)
    }
}

#[derive(Serialize, Debug)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub total: i64,
    pub page: i64,
    pub per_page: i64,
    pub pages: i64,
}

impl<T> Page<T> {
    pub fn new(items: Vec<T>, total: i64, page: i64, per_page: i64) -> Self {
        let pages = if total <= 0 { 0 } else { (total + per_page - 1) / per_page };
        Page {
            items,
            total,
            page,
            per_page,
            pages,
        }
    }

    pub fn map<U, F: FnMut(T) -> U>(self, f: F) -> Page<U> {
        Page {
            items: self.items.into_iter().map(f).collect(),
            total: self.total,
            page: self.page,
            per_page: self.per_page,
            pages: self.pages,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(None, None, (1, 20, 0))]
    #[case(Some(3), Some(10), (3, 10, 20))]
    #[case(Some(0), Some(0), (1, 1, 0))]
    #[case(Some(-4), Some(500), (1, 100, 0))]
    fn resolves_and_clamps(#[case] page: Option<i64>, #[case] per_page: Option<i64>, #[case] expected: (i64, i64, i64)) {
        assert_eq!(PageParams { page, per_page }.resolve(), expected);
    }

    #[test]
    fn computes_page_count() {
        assert_eq!(Page::new(vec![1, 2], 41, 1, 20).pages, 3);
        assert_eq!(Page::new(Vec::<i32>::new(), 0, 1, 20).pages, 0);
        assert_eq!(Page::new(vec![1], 20, 1, 20).pages, 1);
    }

    #[test]
    fn serializes_expected_shape() {
        let page = Page::new(vec!["a"], 1, 1, 20);
        let json = serde_json::to_value(&page).unwrap();
        assert_eq!(json["items"][0], "a");
        assert_eq!(json["total"], 1);
        assert_eq!(json["page"], 1);
        assert_eq!(json["per_page"], 20);
        assert_eq!(json["pages"], 1);
    }
}
