use std::collections::HashMap;
use thiserror::Error;

/// The parsed header section of a core-metadata (`METADATA` / `PKG-INFO`)
/// file: a multimap of lowercased field names to values, plus the optional
/// free-form body that follows the first blank line.
#[derive(Debug)]
pub struct MetadataFields {
    fields: HashMap<String, Vec<String>>,
    /// Everything after the first blank line. Modern metadata stores the
    /// project description here; we keep it but never interpret it.
    pub body: Option<String>,
}

/// Error produced when a metadata document cannot be parsed or a field does
/// not have the expected multiplicity.
#[derive(Debug, Error)]
#[allow(missing_docs)]
pub enum MetadataFieldsError {
    #[error("invalid metadata document: {0}")]
    Syntax(String),

    #[error("field {0} occurs more than once")]
    Repeated(String),

    #[error("missing required field {0}")]
    Missing(String),
}

impl MetadataFields {
    /// Parses a metadata document.
    ///
    /// METADATA claims to be an RFC 822 message but is really "whatever
    /// Python's email.parser accepts", which is far more lenient: any of
    /// `\r\n`, `\r` or `\n` ends a line, a line starting with a space or tab
    /// continues the previous field (keeping its leading whitespace, joined
    /// with `\n`), and everything after the first blank line is an
    /// uninterpreted body. This scanner walks the document line by line with
    /// exactly those rules, rejecting only what no real producer emits:
    /// a continuation before any field, and header lines without a colon.
    pub fn parse(input: &str) -> Result<MetadataFields, MetadataFieldsError> {
        let mut fields: HashMap<String, Vec<String>> = HashMap::new();
        let mut current: Option<(String, String)> = None;
        let mut body = None;
        let mut rest = input;

        while !rest.is_empty() {
            let (line, remainder) = next_line(rest);
            rest = remainder;

            if line.is_empty() {
                // Blank line: the header is over and the rest is the body,
                // kept verbatim.
                body = Some(rest.to_owned());
                break;
            }

            if line.starts_with(' ') || line.starts_with('\t') {
                let Some((_, value)) = current.as_mut() else {
                    return Err(MetadataFieldsError::Syntax(String::from(
                        "continuation line before any field",
                    )));
                };
                value.push('\n');
                value.push_str(line);
                continue;
            }

            if let Some((name, value)) = current.take() {
                fields.entry(name).or_default().push(value);
            }

            let Some((name, value)) = line.split_once(':') else {
                return Err(MetadataFieldsError::Syntax(format!(
                    "header line without a field separator: {line:?}"
                )));
            };
            if name.is_empty() || !name.bytes().all(|b| (b'!'..=b'~').contains(&b)) {
                return Err(MetadataFieldsError::Syntax(format!(
                    "invalid field name: {name:?}"
                )));
            }
            // email.parser strips spaces and tabs directly after the colon
            // but keeps any further whitespace as part of the value.
            let value = value.trim_start_matches([' ', '\t']);
            current = Some((name.to_ascii_lowercase(), value.to_owned()));
        }

        if let Some((name, value)) = current.take() {
            fields.entry(name).or_default().push(value);
        }

        Ok(MetadataFields { fields, body })
    }

    /// Removes and returns every value recorded for `key`.
    pub fn take_all(&mut self, key: &str) -> Vec<String> {
        self.fields
            .remove(&key.to_ascii_lowercase())
            .unwrap_or_default()
    }

    /// Removes and returns the value of `key`, or `None` when absent. Errors
    /// when the field occurs more than once.
    pub fn maybe_take(&mut self, key: &str) -> Result<Option<String>, MetadataFieldsError> {
        let mut values = self.take_all(key);
        match values.len() {
            0 => Ok(None),
            1 => Ok(values.pop()),
            _ => Err(MetadataFieldsError::Repeated(key.to_owned())),
        }
    }

    /// Removes and returns the value of `key`, requiring exactly one
    /// occurrence.
    pub fn take(&mut self, key: &str) -> Result<String, MetadataFieldsError> {
        self.maybe_take(key)?
            .ok_or_else(|| MetadataFieldsError::Missing(key.to_owned()))
    }
}

/// Splits the first line off `input`, consuming its `\r\n`, `\r` or `\n`
/// terminator. Input without a terminator is a single line.
fn next_line(input: &str) -> (&str, &str) {
    let Some(at) = input.find(['\r', '\n']) else {
        return (input, "");
    };
    let line = &input[..at];
    let rest = &input[at..];
    let rest = rest
        .strip_prefix("\r\n")
        .or_else(|| rest.strip_prefix('\n'))
        .or_else(|| rest.strip_prefix('\r'))
        .expect("the split position is a line terminator");
    (line, rest)
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn header_and_body() {
        let mut parsed = MetadataFields::parse(
            "Metadata-Version: 2.1\nName: trio\nRequires-Dist: attrs >= 19.2.0\nRequires-Dist: sortedcontainers\n\nA friendly async library\n",
        )
        .unwrap();
        assert_eq!(parsed.take("Name").unwrap(), "trio");
        assert_eq!(
            parsed.take_all("Requires-Dist"),
            vec!["attrs >= 19.2.0", "sortedcontainers"]
        );
        assert_eq!(parsed.body.as_deref(), Some("A friendly async library\n"));
    }

    #[test]
    fn no_body() {
        let mut parsed = MetadataFields::parse("Name: trio\nVersion: 0.22.0").unwrap();
        assert_eq!(parsed.take("Version").unwrap(), "0.22.0");
        assert!(parsed.body.is_none());
    }

    #[test]
    fn crlf_line_endings() {
        let mut parsed = MetadataFields::parse("Name: trio\r\nVersion: 0.22.0\r\n").unwrap();
        assert_eq!(parsed.take("Name").unwrap(), "trio");
        assert_eq!(parsed.take("Version").unwrap(), "0.22.0");
    }

    #[test]
    fn continuation_lines_keep_newlines() {
        let mut parsed = MetadataFields::parse("Summary: first\n\tsecond\nName: x\n").unwrap();
        assert_eq!(parsed.take("Summary").unwrap(), "first\n\tsecond");
    }

    #[test]
    fn repeated_singleton_field_errors() {
        let mut parsed = MetadataFields::parse("Version: 1\nVersion: 2\n").unwrap();
        assert!(matches!(
            parsed.maybe_take("Version"),
            Err(MetadataFieldsError::Repeated(_))
        ));
    }

    #[test]
    fn field_names_are_case_insensitive() {
        let mut parsed = MetadataFields::parse("NAME: spam\n").unwrap();
        assert_eq!(parsed.take("Name").unwrap(), "spam");
    }

    #[test]
    fn leading_continuation_is_rejected() {
        assert!(matches!(
            MetadataFields::parse("  dangling\nName: x\n"),
            Err(MetadataFieldsError::Syntax(_))
        ));
    }

    #[test]
    fn line_without_separator_is_rejected() {
        assert!(matches!(
            MetadataFields::parse("Name: x\nnot a header\n"),
            Err(MetadataFieldsError::Syntax(_))
        ));
    }
}
