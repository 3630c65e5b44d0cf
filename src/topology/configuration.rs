use crate::{Error, Result};
use serde::Deserialize;
use std::collections::HashMap;

/// Data center assigned to nodes whose IP is not in the configuration
pub const DEFAULT_DATA_CENTER: &str = "DefaultDataCenter";

/// Rack assigned to nodes whose IP is not in the configuration
pub const DEFAULT_RACK: &str = "DefaultRack";

#[derive(Debug, Deserialize)]
struct RackConf {
    #[serde(rename = "@name")]
    name: String,

    #[serde(rename = "Ip", default)]
    ips: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct DataCenterConf {
    #[serde(rename = "@name")]
    name: String,

    #[serde(rename = "Rack", default)]
    racks: Vec<RackConf>,
}

#[derive(Debug, Deserialize)]
struct TopologyConf {
    #[serde(rename = "DataCenter", default)]
    data_centers: Vec<DataCenterConf>,
}

#[derive(Debug, Deserialize)]
struct ConfigurationFile {
    #[serde(rename = "Topology")]
    topology: TopologyConf,
}

#[derive(Clone, Debug)]
struct Location {
    data_center: String,
    rack: String,
}

/// Static cluster layout: which data center and rack each IP sits in
///
/// Loaded from an XML file of the form
///
/// ```xml
/// <Configuration>
///   <Topology>
///     <DataCenter name="dc1">
///       <Rack name="rack1"><Ip>10.0.0.1</Ip></Rack>
///     </DataCenter>
///   </Topology>
/// </Configuration>
/// ```
pub struct Configuration {
    ip_to_location: HashMap<String, Location>,
}

impl Configuration {
    /// Parses the XML document and builds the reverse IP map.
    ///
    /// # Errors
    ///
    /// Will return [`Error::InvalidArgument`] on malformed XML.
    pub fn new(xml: &str) -> Result<Self> {
        let parsed: ConfigurationFile = quick_xml::de::from_str(xml)
            .map_err(|e| Error::InvalidArgument(format!("bad topology configuration: {e}")))?;

        let mut ip_to_location = HashMap::new();
        for dc in &parsed.topology.data_centers {
            for rack in &dc.racks {
                for ip in &rack.ips {
                    ip_to_location.insert(
                        ip.clone(),
                        Location {
                            data_center: dc.name.clone(),
                            rack: rack.name.clone(),
                        },
                    );
                }
            }
        }
        Ok(Self { ip_to_location })
    }

    /// Resolves a node's actual `(data_center, rack)`.
    ///
    /// A configured IP wins; otherwise the values the node declared are
    /// kept, and empty declarations fall back to the defaults.
    #[must_use]
    pub fn locate(&self, ip: &str, dc_name: &str, rack_name: &str) -> (String, String) {
        if let Some(location) = self.ip_to_location.get(ip) {
            return (location.data_center.clone(), location.rack.clone());
        }
        fallback_location(dc_name, rack_name)
    }
}

/// [`Configuration::locate`] for a possibly absent configuration.
pub(crate) fn locate(
    configuration: Option<&Configuration>,
    ip: &str,
    dc_name: &str,
    rack_name: &str,
) -> (String, String) {
    configuration.map_or_else(
        || fallback_location(dc_name, rack_name),
        |c| c.locate(ip, dc_name, rack_name),
    )
}

fn fallback_location(dc_name: &str, rack_name: &str) -> (String, String) {
    let dc = if dc_name.is_empty() {
        DEFAULT_DATA_CENTER
    } else {
        dc_name
    };
    let rack = if rack_name.is_empty() {
        DEFAULT_RACK
    } else {
        rack_name
    };
    (dc.to_string(), rack.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_log::test;

    const SAMPLE: &str = r#"
<Configuration>
  <Topology>
    <DataCenter name="dc1">
      <Rack name="rack1">
        <Ip>192.168.1.1</Ip>
      </Rack>
    </DataCenter>
    <DataCenter name="dc2">
      <Rack name="rack1">
        <Ip>192.168.1.2</Ip>
      </Rack>
      <Rack name="rack2">
        <Ip>192.168.1.3</Ip>
        <Ip>192.168.1.4</Ip>
      </Rack>
    </DataCenter>
  </Topology>
</Configuration>
"#;

    #[test]
    fn configured_ips_resolve() -> crate::Result<()> {
        let c = Configuration::new(SAMPLE)?;
        assert_eq!(
            ("dc1".to_string(), "rack1".to_string()),
            c.locate("192.168.1.1", "", "")
        );
        assert_eq!(
            ("dc2".to_string(), "rack2".to_string()),
            c.locate("192.168.1.4", "dc9", "rack9")
        );
        Ok(())
    }

    #[test]
    fn unknown_ips_keep_declared_location() -> crate::Result<()> {
        let c = Configuration::new(SAMPLE)?;
        assert_eq!(
            ("dc3".to_string(), "rack3".to_string()),
            c.locate("10.0.0.1", "dc3", "rack3")
        );
        Ok(())
    }

    #[test]
    fn unknown_ips_fall_back_to_defaults() -> crate::Result<()> {
        let c = Configuration::new(SAMPLE)?;
        assert_eq!(
            (DEFAULT_DATA_CENTER.to_string(), DEFAULT_RACK.to_string()),
            c.locate("10.0.0.1", "", "")
        );
        Ok(())
    }

    #[test]
    fn malformed_xml_is_rejected() {
        assert!(Configuration::new("<Configuration><oops>").is_err());
    }
}
