use std::fs;
use std::path::Path;

use quick_xml::Reader;
use quick_xml::events::Event;

use crate::plugin::error::{IoContext, PluginError, Result};

/// Well-known entry marking an archive as a plugin package.
pub const DESCRIPTOR_FILE: &str = "plugin.xml";

/// Entries ending in this name (case-insensitive) are never extracted.
pub const MANIFEST_SUFFIX: &str = "manifest.mf";

/// The parts of `plugin.xml` the monitor cares about.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PluginDescriptor {
    pub name: Option<String>,
    pub version: Option<String>,
    #[allow(dead_code)] // Host-facing metadata.
    pub description: Option<String>,
    #[allow(dead_code)] // Host-facing metadata.
    pub author: Option<String>,
    /// Canonical name of the plugin this one extends.
    pub parent: Option<String>,
    pub dependencies: Vec<String>,
}

impl PluginDescriptor {
    pub fn read(dir: &Path) -> Result<Self> {
        let path = dir.join(DESCRIPTOR_FILE);
        let raw = fs::read_to_string(&path).at(&path)?;
        Self::parse(&raw).map_err(|reason| PluginError::Descriptor { path, reason })
    }

    pub fn parse(xml: &str) -> std::result::Result<Self, String> {
        let mut reader = Reader::from_str(xml);
        reader.config_mut().trim_text(true);

        let mut descriptor = Self::default();
        let mut stack: Vec<String> = Vec::new();
        let mut saw_root = false;
        let mut buf = Vec::new();

        loop {
            match reader.read_event_into(&mut buf) {
                Ok(Event::Start(ref e)) => {
                    let name = String::from_utf8_lossy(e.local_name().as_ref()).into_owned();
                    if stack.is_empty() {
                        check_root(&name)?;
                        saw_root = true;
                    }
                    stack.push(name);
                }
                Ok(Event::Empty(ref e)) => {
                    if stack.is_empty() {
                        let name = String::from_utf8_lossy(e.local_name().as_ref()).into_owned();
                        check_root(&name)?;
                        saw_root = true;
                    }
                }
                Ok(Event::End(_)) => {
                    stack.pop();
                }
                Ok(Event::Text(ref e)) => {
                    let text = e.unescape().map_err(|err| err.to_string())?;
                    descriptor.assign(&stack, text.trim());
                }
                Ok(Event::CData(ref e)) => {
                    let text = String::from_utf8_lossy(e);
                    descriptor.assign(&stack, text.trim());
                }
                Ok(Event::Eof) => break,
                Ok(_) => {}
                Err(err) => {
                    return Err(format!(
                        "error at position {}: {err}",
                        reader.buffer_position()
                    ));
                }
            }
            buf.clear();
        }

        if !saw_root {
            return Err("missing <plugin> root element".to_string());
        }

        Ok(descriptor)
    }

    /// Every plugin that must load before this one.
    pub fn requirements(&self) -> impl Iterator<Item = &str> {
        self.parent
            .iter()
            .chain(self.dependencies.iter())
            .map(String::as_str)
    }

    fn assign(&mut self, path: &[String], text: &str) {
        if text.is_empty() {
            return;
        }

        let path: Vec<&str> = path.iter().map(String::as_str).collect();
        match path.as_slice() {
            ["plugin", "name"] => self.name = Some(text.to_string()),
            ["plugin", "version"] => self.version = Some(text.to_string()),
            ["plugin", "description"] => self.description = Some(text.to_string()),
            ["plugin", "author"] => self.author = Some(text.to_string()),
            ["plugin", "parentPlugin"] => self.parent = Some(text.to_lowercase()),
            ["plugin", "dependencies", "dependency"] => {
                self.dependencies.push(text.to_lowercase());
            }
            _ => {}
        }
    }
}

fn check_root(name: &str) -> std::result::Result<(), String> {
    if name == "plugin" {
        Ok(())
    } else {
        Err(format!("unexpected root element <{name}>"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn parses_metadata_and_requirements() {
        let xml = r#"<?xml version="1.0" encoding="UTF-8"?>
            <plugin>
                <class>org.example.Search</class>
                <name>Search &amp; Index</name>
                <version>1.4.0</version>
                <author>Jungle Story</author>
                <parentPlugin>Admin</parentPlugin>
                <dependencies>
                    <dependency>storage</dependency>
                    <dependency><![CDATA[Cache]]></dependency>
                </dependencies>
            </plugin>"#;

        let descriptor = PluginDescriptor::parse(xml).unwrap();
        assert_eq!(descriptor.name.as_deref(), Some("Search & Index"));
        assert_eq!(descriptor.version.as_deref(), Some("1.4.0"));
        assert_eq!(descriptor.author.as_deref(), Some("Jungle Story"));
        assert_eq!(descriptor.parent.as_deref(), Some("admin"));
        assert_eq!(descriptor.dependencies, vec!["storage", "cache"]);
        assert_eq!(
            descriptor.requirements().collect::<Vec<_>>(),
            vec!["admin", "storage", "cache"]
        );
    }

    #[test]
    fn empty_root_is_valid() {
        let descriptor = PluginDescriptor::parse("<plugin/>").unwrap();
        assert_eq!(descriptor, PluginDescriptor::default());
    }

    #[test]
    fn rejects_foreign_root_and_empty_document() {
        assert!(PluginDescriptor::parse("<web-app></web-app>").is_err());
        assert!(PluginDescriptor::parse("").is_err());
    }

    #[test]
    fn read_reports_path_on_malformed_xml() {
        let temp = TempDir::new().unwrap();
        fs::write(temp.path().join(DESCRIPTOR_FILE), "<plugin><name>x</plugin>").unwrap();

        let err = PluginDescriptor::read(temp.path()).unwrap_err();
        assert!(matches!(err, PluginError::Descriptor { .. }));
    }
}
