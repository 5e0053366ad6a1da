//! Element-text editing for backend XML documents.
//!
//! Rewrites the text of named elements while streaming every other event
//! through untouched, so attributes, comments and unknown plugin sections
//! survive the round trip.

use std::collections::HashSet;

use quick_xml::events::{BytesText, Event};
use quick_xml::{Reader, Writer};

use crate::error::{BackendError, BackendResult};

/// Replace the text of every element whose local name appears in
/// `values`. Each named element must occur at least once.
pub fn replace_elements(xml: &str, values: &[(&str, &str)]) -> BackendResult<String> {
    let mut reader = Reader::from_str(xml);
    let mut writer = Writer::new(Vec::new());
    let mut replaced: HashSet<&str> = HashSet::new();
    // Depth inside an element whose original content is being dropped.
    let mut skip_depth = 0usize;

    loop {
        let event = reader.read_event().map_err(xml_err)?;

        if skip_depth > 0 {
            match event {
                Event::Start(_) => skip_depth += 1,
                Event::End(_) => {
                    skip_depth -= 1;
                    if skip_depth == 0 {
                        writer.write_event(event).map_err(xml_err)?;
                    }
                }
                Event::Eof => return Err(BackendError::Xml("unterminated element".into())),
                _ => {}
            }
            continue;
        }

        match event {
            Event::Eof => break,
            Event::Start(ref start) => {
                let target = lookup(values, start.local_name().as_ref());
                writer.write_event(event.borrow()).map_err(xml_err)?;
                if let Some((name, value)) = target {
                    writer.write_event(Event::Text(BytesText::new(value))).map_err(xml_err)?;
                    replaced.insert(name);
                    skip_depth = 1;
                }
            }
            Event::Empty(ref start) => match lookup(values, start.local_name().as_ref()) {
                Some((name, value)) => {
                    writer.write_event(Event::Start(start.borrow())).map_err(xml_err)?;
                    writer.write_event(Event::Text(BytesText::new(value))).map_err(xml_err)?;
                    writer.write_event(Event::End(start.to_end())).map_err(xml_err)?;
                    replaced.insert(name);
                }
                None => writer.write_event(event.borrow()).map_err(xml_err)?,
            },
            other => writer.write_event(other).map_err(xml_err)?,
        }
    }

    let missing: Vec<&str> = values
        .iter()
        .map(|(name, _)| *name)
        .filter(|name| !replaced.contains(name))
        .collect();
    if !missing.is_empty() {
        return Err(BackendError::Xml(format!("missing elements: {}", missing.join(", "))));
    }

    String::from_utf8(writer.into_inner()).map_err(xml_err)
}

/// Text of the first element named `name`, if any.
pub fn element_text(xml: &str, name: &str) -> BackendResult<Option<String>> {
    let mut reader = Reader::from_str(xml);
    let mut inside = false;
    let mut text = String::new();
    loop {
        match reader.read_event().map_err(xml_err)? {
            Event::Start(e) if e.local_name().as_ref() == name.as_bytes() => inside = true,
            Event::Empty(e) if e.local_name().as_ref() == name.as_bytes() => return Ok(Some(String::new())),
            Event::Text(t) if inside => {
                text.push_str(&String::from_utf8_lossy(&t));
            }
            Event::End(e) if inside && e.local_name().as_ref() == name.as_bytes() => {
                return Ok(Some(text.trim().to_string()));
            }
            Event::Eof => return Ok(None),
            _ => {}
        }
    }
}

fn lookup<'v>(values: &[(&'v str, &'v str)], local: &[u8]) -> Option<(&'v str, &'v str)> {
    values.iter().find(|(name, _)| name.as_bytes() == local).copied()
}

fn xml_err(e: impl std::fmt::Display) -> BackendError {
    BackendError::Xml(e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    const SLAVE: &str = r#"<?xml version='1.1' encoding='UTF-8'?>
<com.cloudbees.opscenter.server.model.SharedSlave plugin="operations-center-server@2.3">
  <disabled>false</disabled>
  <launcher class="hudson.plugins.sshslaves.SSHLauncher">
    <host>PLACEHOLDER</host>
    <credentialsId/>
  </launcher>
  <labelString></labelString>
  <uid>old</uid>
</com.cloudbees.opscenter.server.model.SharedSlave>"#;

    #[test]
    fn replaces_text_and_keeps_structure() {
        let out = replace_elements(
            SLAVE,
            &[("host", "10.0.0.9"), ("credentialsId", "ssh-root"), ("labelString", "linux small"), ("uid", "abc")],
        )
        .unwrap();
        assert!(out.contains("<host>10.0.0.9</host>"));
        assert!(out.contains("<credentialsId>ssh-root</credentialsId>"));
        assert!(out.contains("<labelString>linux small</labelString>"));
        assert!(out.contains("<uid>abc</uid>"));
        assert!(out.contains(r#"plugin="operations-center-server@2.3""#));
        assert!(out.contains("<disabled>false</disabled>"));
    }

    #[test]
    fn values_are_escaped() {
        let out = replace_elements(SLAVE, &[("labelString", "a&b")]).unwrap();
        assert!(out.contains("<labelString>a&amp;b</labelString>"));
    }

    #[test]
    fn missing_element_is_an_error() {
        let err = replace_elements(SLAVE, &[("nodeProperties", "x")]).unwrap_err();
        assert!(matches!(err, BackendError::Xml(_)));
    }

    #[test]
    fn reads_element_text() {
        assert_eq!(element_text(SLAVE, "disabled").unwrap().as_deref(), Some("false"));
        assert_eq!(element_text(SLAVE, "credentialsId").unwrap().as_deref(), Some(""));
        assert_eq!(element_text(SLAVE, "absent").unwrap(), None);
    }
}
