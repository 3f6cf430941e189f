use serde::Deserialize;
use serde_json::Value;

#[derive(Debug, Deserialize)]
pub struct SearchResponse {
    #[serde(default)]
    pub took: u64,
    pub hits: SearchHits,
}

#[derive(Debug, Default, Deserialize)]
pub struct SearchHits {
    #[serde(default)]
    pub total: TotalHits,
    #[serde(default)]
    pub hits: Vec<SearchHit>,
}

#[derive(Debug, Default, Deserialize)]
pub struct TotalHits {
    #[serde(default)]
    pub value: u64,
}

#[derive(Debug, Deserialize)]
pub struct SearchHit {
    #[serde(rename = "_index")]
    pub index: String,
    #[serde(rename = "_id")]
    pub id: String,
    #[serde(rename = "_source", default)]
    pub source: Value,
}

#[derive(Debug, Deserialize)]
pub struct GetResponse {
    #[serde(rename = "_id")]
    pub id: String,
    #[serde(default)]
    pub found: bool,
    #[serde(rename = "_source", default)]
    pub source: Value,
    #[serde(rename = "_version", default)]
    pub version: Option<i64>,
}
