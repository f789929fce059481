/// UPnP device description parsing for receiver identity
use avr_core::ReceiverError;
use quick_xml::events::Event;
use quick_xml::Reader;

/// Identity fields of the root device of a `description.xml`.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct DeviceDescription {
    pub device_type: Option<String>,
    pub friendly_name: Option<String>,
    pub manufacturer: Option<String>,
    pub model_name: Option<String>,
    pub serial_number: Option<String>,
    pub presentation_url: Option<String>,
}

impl DeviceDescription {
    /// Denon and Marantz receivers, including the AIOS based models
    pub fn is_supported(&self) -> bool {
        self.manufacturer
            .as_deref()
            .map(|m| {
                let m = m.to_ascii_lowercase();
                m.contains("denon") || m.contains("marantz")
            })
            .unwrap_or(false)
    }
}

/// Parse the root `<device>` of a UPnP description. Embedded devices are ignored.
pub fn parse_description(xml: &str) -> Result<DeviceDescription, ReceiverError> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut description = DeviceDescription::default();
    let mut path: Vec<String> = Vec::new();
    let mut current_text = String::new();

    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) => {
                path.push(String::from_utf8_lossy(e.local_name().as_ref()).to_string());
                current_text.clear();
            }
            Ok(Event::Text(e)) => {
                current_text.push_str(&e.unescape().unwrap_or_default());
            }
            Ok(Event::End(_)) => {
                // root > device > field
                if path.len() == 3 && path[1] == "device" {
                    let value = Some(current_text.trim().to_string()).filter(|v| !v.is_empty());
                    match path[2].as_str() {
                        "deviceType" => description.device_type = value,
                        "friendlyName" => description.friendly_name = value,
                        "manufacturer" => description.manufacturer = value,
                        "modelName" => description.model_name = value,
                        "serialNumber" => description.serial_number = value,
                        "presentationURL" => description.presentation_url = value,
                        _ => {}
                    }
                }
                path.pop();
                current_text.clear();
            }
            Ok(Event::Eof) => break,
            Err(e) => {
                return Err(ReceiverError::Protocol(format!(
                    "Invalid device description at position {}: {}",
                    reader.buffer_position(),
                    e
                )));
            }
            _ => {}
        }
    }

    Ok(description)
}

#[cfg(test)]
mod tests {
    use super::*;

    const DESCRIPTION: &str = r#"<?xml version="1.0"?>
<root xmlns="urn:schemas-upnp-org:device-1-0">
  <specVersion><major>1</major><minor>0</minor></specVersion>
  <device>
    <deviceType>urn:schemas-upnp-org:device:MediaRenderer:1</deviceType>
    <friendlyName>Living Room &amp; Bar</friendlyName>
    <manufacturer>Denon</manufacturer>
    <modelName>*AVR-X2700H</modelName>
    <serialNumber>BBW36200123456</serialNumber>
    <presentationURL>http://192.168.1.20/</presentationURL>
    <deviceList>
      <device>
        <deviceType>urn:schemas-denon-com:device:ACT-Denon:1</deviceType>
        <friendlyName>ACT</friendlyName>
        <serialNumber>embedded</serialNumber>
      </device>
    </deviceList>
  </device>
</root>"#;

    #[test]
    fn test_parse_description() {
        let description = parse_description(DESCRIPTION).unwrap();
        assert_eq!(description.friendly_name.as_deref(), Some("Living Room & Bar"));
        assert_eq!(description.manufacturer.as_deref(), Some("Denon"));
        assert_eq!(description.model_name.as_deref(), Some("*AVR-X2700H"));
        assert_eq!(description.serial_number.as_deref(), Some("BBW36200123456"));
        assert_eq!(description.presentation_url.as_deref(), Some("http://192.168.1.20/"));
        assert!(description.is_supported());
    }

    #[test]
    fn test_unsupported_manufacturer() {
        let xml = r#"<root><device><manufacturer>ACME</manufacturer></device></root>"#;
        let description = parse_description(xml).unwrap();
        assert!(!description.is_supported());
        assert_eq!(description.serial_number, None);

        let xml = r#"<root><device><manufacturer>Marantz</manufacturer></device></root>"#;
        assert!(parse_description(xml).unwrap().is_supported());
    }

    #[test]
    fn test_invalid_xml() {
        assert!(parse_description("<root><device></root>").is_err());
    }
}
