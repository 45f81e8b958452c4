use serde::Serialize;
use url::form_urlencoded;

#[derive(Debug, Default, PartialEq, Eq)]
pub struct ScrapeParams {
    pub url: Option<String>,
}

impl ScrapeParams {
    /// Read `url` from a raw query string. Repeated keys are allowed; the
    /// first non-empty value wins.
    pub fn from_query(raw: Option<&str>) -> Self {
        let url = raw.and_then(|q| {
            form_urlencoded::parse(q.as_bytes())
                .find(|(key, value)| key == "url" && !value.is_empty())
                .map(|(_, value)| value.into_owned())
        });
        Self { url }
    }
}

/// One post pulled out of a rendered page.
#[derive(Debug, Serialize, Clone, PartialEq, Eq)]
pub struct Record {
    pub id: String,
    pub content: String,
}
