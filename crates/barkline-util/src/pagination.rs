use serde::Deserialize;

#[derive(Debug, Deserialize)]
pub struct PaginationParams {
    pub before: Option<i64>,
    pub limit: Option<i64>,
}

impl PaginationParams {
    pub fn limit(&self) -> i64 {
        self.limit.unwrap_or(50).min(100).max(1)
    }
}

impl Default for PaginationParams {
    fn default() -> Self {
        Self {
            before: None,
            limit: Some(50),
        }
    }
}
