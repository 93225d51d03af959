//! Search sink endpoint URL builders

/// Build bulk write URL
pub fn bulk_url(base_url: &str) -> String {
    format!("{}/_bulk", base_url)
}

/// Build cluster health URL
pub fn cluster_health_url(base_url: &str) -> String {
    format!("{}/_cluster/health", base_url)
}

/// Build index listing URL (tabular text with a header row)
pub fn cat_indices_url(base_url: &str) -> String {
    format!("{}/_cat/indices?v", base_url)
}

/// Build index URL, used for create and delete
pub fn index_url(base_url: &str, index: &str) -> String {
    format!("{}/{}", base_url, index)
}

/// Build live mapping URL
pub fn mapping_url(base_url: &str, index: &str) -> String {
    format!("{}/{}/_mapping", base_url, index)
}

/// Build SQL query URL
pub fn sql_url(base_url: &str) -> String {
    format!("{}/_sql?format=json", base_url)
}

/// Build document count URL
pub fn count_url(base_url: &str, index: &str) -> String {
    format!("{}/{}/_count", base_url, index)
}

/// Build search URL
pub fn search_url(base_url: &str, index: &str) -> String {
    format!("{}/{}/_search", base_url, index)
}
