//! Process XML helpers for the Server connector.

use once_cell::sync::Lazy;
use regex::Regex;

/// Content type of process documents in the Server repository.
pub const PROCESS_CONTENT_TYPE: &str = "application/vnd.rapidminer.rmp+xml";

/// Process behind the repository-access web service.
pub const WEBSERVICE_PROCESS_XML: &str = r#"<?xml version="1.0" encoding="UTF-8"?><process version="9.3.000">
  <context>
    <input/>
    <output/>
    <macros/>
  </context>
  <operator activated="true" class="process" compatibility="9.3.000" expanded="true" name="Process">
    <process expanded="true">
      <operator activated="true" class="python_scripting:repository_service" compatibility="9.3.000" expanded="true" height="68" name="Repository Access" width="90" x="179" y="34"/>
      <connect from_port="input 1" to_op="Repository Access" to_port="file"/>
      <connect from_op="Repository Access" from_port="output" to_port="result 1"/>
      <portSpacing port="source_input 1" spacing="0"/>
      <portSpacing port="source_input 2" spacing="0"/>
      <portSpacing port="sink_result 1" spacing="0"/>
      <portSpacing port="sink_result 2" spacing="0"/>
    </process>
  </operator>
</process>
"#;

const WEBSERVICE_DESCRIPTOR_TEMPLATE: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<exported-process>
    <mime-type>application/json</mime-type>
    <output-format>JSON</output-format>
    <process-entry>{process_path}</process-entry>
    <xslt-entry/>
    <parameter-mappings/>
    <properties>
        <name>service:{service_name}</name>
    </properties>
    <data-source-input>
        <name>service:{service_name}</name>
    </data-source-input>
</exported-process>
"#;

/// Descriptor publishing the process at `process_path` as the web service `service_name`.
pub fn webservice_descriptor(service_name: &str, process_path: &str) -> String {
    WEBSERVICE_DESCRIPTOR_TEMPLATE
        .replace("{process_path}", &escape_xml(process_path))
        .replace("{service_name}", &escape_xml(service_name))
}

fn escape_xml(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

static CONNECT_TAG: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"<connect\b[^>]*>").expect("valid regex"));
static TO_PORT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"\bto_port\s*=\s*"([^"]*)""#).expect("valid regex"));

/// Number of wires ending in a process result port (`to_port="result N"`) at the top level of
/// the main process.
///
/// Only wires without a `to_op` count: those connect to the process' own result ports rather
/// than to an operator.
pub fn count_result_ports(process_xml: &str) -> usize {
    CONNECT_TAG
        .find_iter(process_xml)
        .map(|m| m.as_str())
        .filter(|tag| !tag.contains("to_op="))
        .filter(|tag| {
            TO_PORT
                .captures(tag)
                .and_then(|c| c.get(1))
                .is_some_and(|port| port.as_str().starts_with("result "))
        })
        .count()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counts_result_wires() {
        let xml = r#"<process><operator name="Process"><process>
            <operator name="Read"/>
            <connect from_port="input 1" to_op="Read" to_port="file"/>
            <connect from_op="Read" from_port="output" to_port="result 1"/>
            <connect from_op="Read" from_port="model" to_port="result 2"/>
            <connect from_op="Read" from_port="x" to_op="Other" to_port="result 3"/>
        </process></operator></process>"#;
        assert_eq!(count_result_ports(xml), 2);
    }

    #[test]
    fn webservice_process_has_one_result() {
        assert_eq!(count_result_ports(WEBSERVICE_PROCESS_XML), 1);
    }

    #[test]
    fn descriptor_names_process_and_service() {
        let xml = webservice_descriptor("Repository Service", "/home/ada/Repository Service");
        assert!(xml.contains("<process-entry>/home/ada/Repository Service</process-entry>"));
        assert!(xml.contains("<name>service:Repository Service</name>"));
    }
}
