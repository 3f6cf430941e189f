use semver::Version as Semver;
use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ServerInfo {
    #[serde(rename = "name")]
    hostname: String,
    #[serde(rename = "cluster_name")]
    cluster: String,
    #[serde(rename = "cluster_uuid")]
    uuid: Option<String>,
    version: Version,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Version {
    number: String,
}

impl ServerInfo {
    pub fn get_hostname(&self) -> &String {
        &self.hostname
    }
    pub fn get_cluster(&self) -> &String {
        &self.cluster
    }
    pub fn get_uuid(&self) -> &Option<String> {
        &self.uuid
    }
    pub fn get_version(&self) -> &String {
        &self.version.number
    }

    pub fn get_version_major(&self) -> Option<u64> {
        Semver::parse(&self.version.number).ok().map(|v| v.major)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_a_root_response() {
        let raw = r#"{
            "name": "node-1",
            "cluster_name": "telemetry",
            "cluster_uuid": "u-123",
            "version": {"number": "7.10.2", "lucene_version": "8.7.0"}
        }"#;
        let info: ServerInfo = serde_json::from_str(raw).unwrap();
        assert_eq!(info.get_cluster(), "telemetry");
        assert_eq!(info.get_version(), "7.10.2");
        assert_eq!(info.get_version_major(), Some(7));
    }
}
