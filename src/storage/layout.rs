//! Date-partitioned object keys

use chrono::{Local, NaiveDate};

/// Object key layout for one export date
///
/// ```text
/// <prefix>/<YYYY>/<MM>/<DD>/data/<table>.csv.gz
/// <prefix>/<YYYY>/<MM>/<DD>/schemas/<table>.json
/// <prefix>/<YYYY>/<MM>/<DD>/paths/<table>paths.json
/// ```
///
/// # Example
/// ```
/// use chrono::NaiveDate;
/// use skrape::storage::S3Layout;
///
/// let date = NaiveDate::from_ymd_opt(2024, 3, 7).unwrap();
/// let layout = S3Layout::for_date("exports", date);
/// assert_eq!(layout.data_key("users"), "exports/2024/03/07/data/users.csv.gz");
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct S3Layout {
    prefix: String,
    date: NaiveDate,
}

impl S3Layout {
    /// Layout for the current local date
    pub fn today(prefix: impl Into<String>) -> Self {
        Self::for_date(prefix, Local::now().date_naive())
    }

    pub fn for_date(prefix: impl Into<String>, date: NaiveDate) -> Self {
        Self {
            prefix: prefix.into(),
            date,
        }
    }

    fn partition(&self) -> String {
        let date = self.date.format("%Y/%m/%d");
        let prefix = self.prefix.trim_matches('/');
        if prefix.is_empty() {
            date.to_string()
        } else {
            format!("{}/{}", prefix, date)
        }
    }

    pub fn data_key(&self, table: &str) -> String {
        format!("{}/data/{}.csv.gz", self.partition(), table)
    }

    pub fn schema_key(&self, table: &str) -> String {
        format!("{}/schemas/{}.json", self.partition(), table)
    }

    pub fn paths_key(&self, table: &str) -> String {
        format!("{}/paths/{}paths.json", self.partition(), table)
    }
}
