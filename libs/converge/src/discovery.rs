//! Management-controller discovery for imported hardware.
//!
//! The controller publishes an unauthenticated XML summary at
//! `/xmldata?item=all`. Its NIC entries give the management MAC address and
//! the MAC addresses of the host's network ports, which are reported as
//! facts after an import.

use std::sync::LazyLock;
use std::time::Duration;

use async_trait::async_trait;
use hwm_client::RemoteRecord;
use regex::Regex;
use serde::Serialize;
use tracing::debug;

use crate::error::ConvergeError;

pub const XMLDATA_PATH: &str = "/xmldata?item=all";

static NIC: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)<NIC>(.*?)</NIC>").expect("NIC pattern should be valid"));
static MACADDR: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)<MACADDR>\s*(.*?)\s*</MACADDR>").expect("MACADDR pattern should be valid")
});
static DESCRIPTION: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)<DESCRIPTION>\s*(.*?)\s*</DESCRIPTION>")
        .expect("DESCRIPTION pattern should be valid")
});

/// What discovery learned about one controller.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DiscoveryRecord {
    /// MAC address of the management controller itself.
    pub management_mac: Option<String>,

    /// MAC addresses of the host's network ports, in report order.
    pub host_macs: Vec<String>,
}

#[async_trait]
pub trait HardwareDiscovery: Send + Sync {
    async fn discover(&self, address: &str) -> Result<DiscoveryRecord, ConvergeError>;
}

/// Reads the controller's XML summary over HTTPS.
pub struct XmlDataDiscovery {
    client: reqwest::Client,
}

impl XmlDataDiscovery {
    pub fn new(timeout: Duration, accept_invalid_certs: bool) -> Result<Self, ConvergeError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .danger_accept_invalid_certs(accept_invalid_certs)
            .build()
            .map_err(|e| ConvergeError::Discovery(e.to_string()))?;
        Ok(Self { client })
    }

    fn url(address: &str) -> String {
        if address.contains("://") {
            format!("{}{}", address.trim_end_matches('/'), XMLDATA_PATH)
        } else {
            format!("https://{address}{XMLDATA_PATH}")
        }
    }
}

#[async_trait]
impl HardwareDiscovery for XmlDataDiscovery {
    async fn discover(&self, address: &str) -> Result<DiscoveryRecord, ConvergeError> {
        let url = Self::url(address);
        debug!(%url, "Reading controller summary");

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| ConvergeError::Discovery(format!("{url}: {e}")))?;
        if !response.status().is_success() {
            return Err(ConvergeError::Discovery(format!(
                "{url}: status {}",
                response.status()
            )));
        }
        let body = response
            .text()
            .await
            .map_err(|e| ConvergeError::Discovery(format!("{url}: {e}")))?;

        parse_xmldata(&body)
    }
}

/// Fixed discovery result, for callers that already know the answer.
#[derive(Debug, Clone, Default)]
pub struct StaticDiscovery(pub DiscoveryRecord);

#[async_trait]
impl HardwareDiscovery for StaticDiscovery {
    async fn discover(&self, _address: &str) -> Result<DiscoveryRecord, ConvergeError> {
        Ok(self.0.clone())
    }
}

/// Extract NIC MAC addresses from an XML summary. The entry describing
/// the controller itself is the management MAC; the rest are host ports.
pub fn parse_xmldata(xml: &str) -> Result<DiscoveryRecord, ConvergeError> {
    let mut record = DiscoveryRecord::default();
    for entry in NIC.captures_iter(xml) {
        let body = &entry[1];
        let Some(address) = MACADDR.captures(body).map(|c| c[1].to_lowercase()) else {
            continue;
        };
        let is_controller = DESCRIPTION
            .captures(body)
            .is_some_and(|c| c[1].starts_with("iLO"));

        if is_controller && record.management_mac.is_none() {
            record.management_mac = Some(address);
        } else {
            record.host_macs.push(address);
        }
    }

    if record.management_mac.is_none() && record.host_macs.is_empty() {
        return Err(ConvergeError::Discovery(
            "controller summary lists no NIC addresses".to_string(),
        ));
    }
    Ok(record)
}

/// Facts reported for imported hardware.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ServerHardwareFacts {
    pub uri: Option<String>,
    pub serial_number: Option<String>,
    pub uuid: Option<String>,
    pub model: Option<String>,
    pub management_mac: Option<String>,
    pub nics: Vec<String>,
}

impl ServerHardwareFacts {
    pub fn from_record(record: &RemoteRecord, discovered: Option<&DiscoveryRecord>) -> Self {
        let field = |name: &str| record.str_field(name).map(str::to_string);
        Self {
            uri: field("uri"),
            serial_number: field("serialNumber"),
            uuid: field("uuid"),
            model: field("model"),
            management_mac: discovered.and_then(|d| d.management_mac.clone()),
            nics: discovered.map(|d| d.host_macs.clone()).unwrap_or_default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const SUMMARY: &str = r#"<?xml version="1.0"?>
<RIMP>
  <HSI><SBSN>CZ1234</SBSN></HSI>
  <MP><PN>Integrated Lights-Out 4 (iLO 4)</PN></MP>
  <NICS>
    <NIC><PORT>1</PORT><DESCRIPTION>iLO 4</DESCRIPTION><MACADDR>9C:B6:54:00:00:01</MACADDR></NIC>
    <NIC><PORT>1</PORT><DESCRIPTION>N/A</DESCRIPTION><MACADDR>
      9c:b6:54:00:00:10
    </MACADDR></NIC>
    <NIC><PORT>2</PORT><DESCRIPTION>N/A</DESCRIPTION><MACADDR>9c:b6:54:00:00:11</MACADDR></NIC>
  </NICS>
</RIMP>"#;

    #[test]
    fn test_parse_xmldata() {
        let record = parse_xmldata(SUMMARY).unwrap();
        assert_eq!(record.management_mac.as_deref(), Some("9c:b6:54:00:00:01"));
        assert_eq!(record.host_macs, vec!["9c:b6:54:00:00:10", "9c:b6:54:00:00:11"]);
    }

    #[test]
    fn test_parse_without_nics_fails() {
        let err = parse_xmldata("<RIMP><HSI/></RIMP>").unwrap_err();
        assert!(matches!(err, ConvergeError::Discovery(_)));
    }

    #[test]
    fn test_facts_from_record() {
        let record = RemoteRecord::from_value(json!({
            "uri": "/rest/server-hardware/1",
            "serialNumber": "CZ1234",
            "model": "ProLiant DL360 Gen9"
        }))
        .unwrap();
        let discovered = parse_xmldata(SUMMARY).unwrap();

        let facts = ServerHardwareFacts::from_record(&record, Some(&discovered));
        assert_eq!(facts.serial_number.as_deref(), Some("CZ1234"));
        assert_eq!(facts.uuid, None);
        assert_eq!(facts.nics.len(), 2);

        let bare = ServerHardwareFacts::from_record(&record, None);
        assert!(bare.nics.is_empty());
        assert_eq!(bare.management_mac, None);
    }

    #[tokio::test]
    async fn test_xmldata_discovery_over_http() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/xmldata"))
            .and(query_param("item", "all"))
            .respond_with(ResponseTemplate::new(200).set_body_string(SUMMARY))
            .mount(&server)
            .await;

        let discovery = XmlDataDiscovery::new(Duration::from_secs(5), true).unwrap();
        let record = discovery.discover(&server.uri()).await.unwrap();
        assert_eq!(record.host_macs.len(), 2);
    }

    #[tokio::test]
    async fn test_xmldata_discovery_error_status() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let discovery = XmlDataDiscovery::new(Duration::from_secs(5), true).unwrap();
        let err = discovery.discover(&server.uri()).await.unwrap_err();
        assert!(err.to_string().contains("status 404"));
    }
}
