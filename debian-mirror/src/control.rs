// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Control file paragraphs.

`control` files inside `.deb` archives, `Packages` indices and `Release`
manifests all share the deb822 paragraph syntax described at
<https://www.debian.org/doc/debian-policy/ch-controlfields.html>.
*/

use {
    crate::error::{MirrorError, Result},
    std::io::{BufRead, Write},
};

/// A field in a control paragraph.
///
/// Multiline values are stored with their continuation lines' leading space
/// intact, so writing a parsed field reproduces its original text.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ControlField {
    name: String,
    value: String,
}

impl ControlField {
    pub fn new(name: impl ToString, value: impl ToString) -> Self {
        Self {
            name: name.to_string(),
            value: value.to_string(),
        }
    }

    /// Construct a multiline field whose first line is empty.
    ///
    /// This is the shape of the checksum sections in `Release` files.
    pub fn multiline_from_lines(name: impl ToString, lines: impl Iterator<Item = String>) -> Self {
        let mut value = String::new();
        for line in lines {
            value.push_str("\n ");
            value.push_str(&line);
        }

        Self {
            name: name.to_string(),
            value,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// The raw value, including newlines and continuation whitespace.
    pub fn value_str(&self) -> &str {
        &self.value
    }

    /// Lines of the value with continuation whitespace removed.
    pub fn iter_lines(&self) -> impl Iterator<Item = &str> {
        self.value.lines().map(|x| x.trim_start())
    }

    pub fn write<W: Write>(&self, writer: &mut W) -> std::io::Result<()> {
        writer.write_all(self.name.as_bytes())?;
        if self.value.starts_with('\n') {
            writer.write_all(b":")?;
        } else {
            writer.write_all(b": ")?;
        }
        writer.write_all(self.value.as_bytes())?;
        writer.write_all(b"\n")
    }
}

/// An ordered series of control fields.
///
/// Field names are case insensitive on read and case preserving on set. A
/// paragraph holds at most one field of a given name.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct ControlParagraph {
    fields: Vec<ControlField>,
}

impl ControlParagraph {
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Set a field, replacing an existing field of the same name in place.
    pub fn set_field(&mut self, field: ControlField) {
        if let Some(existing) = self
            .fields
            .iter_mut()
            .find(|f| f.name.eq_ignore_ascii_case(&field.name))
        {
            *existing = field;
        } else {
            self.fields.push(field);
        }
    }

    pub fn set_field_from_string(&mut self, name: impl ToString, value: impl ToString) {
        self.set_field(ControlField::new(name, value));
    }

    /// Remove the named field, returning it if present.
    pub fn remove_field(&mut self, name: &str) -> Option<ControlField> {
        let pos = self
            .fields
            .iter()
            .position(|f| f.name.eq_ignore_ascii_case(name))?;

        Some(self.fields.remove(pos))
    }

    pub fn field(&self, name: &str) -> Option<&ControlField> {
        self.fields
            .iter()
            .find(|f| f.name.eq_ignore_ascii_case(name))
    }

    pub fn field_str(&self, name: &str) -> Option<&str> {
        self.field(name).map(|f| f.value_str())
    }

    /// Obtain the value of a field that must be present.
    pub fn required_field_str(&self, name: &'static str) -> Result<&str> {
        self.field_str(name)
            .ok_or(MirrorError::ControlRequiredFieldMissing(name))
    }

    /// Serialize the paragraph, without a terminating blank line.
    pub fn write<W: Write>(&self, writer: &mut W) -> std::io::Result<()> {
        for field in &self.fields {
            field.write(writer)?;
        }

        Ok(())
    }
}

impl std::fmt::Display for ControlParagraph {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for field in &self.fields {
            if field.value.starts_with('\n') {
                writeln!(f, "{}:{}", field.name, field.value)?;
            } else {
                writeln!(f, "{}: {}", field.name, field.value)?;
            }
        }

        Ok(())
    }
}

/// Incremental parser fed one line at a time.
#[derive(Clone, Debug, Default)]
struct ControlFileParser {
    paragraph: ControlParagraph,
    field: Option<String>,
}

impl ControlFileParser {
    fn write_line(&mut self, line: &str) -> Result<Option<ControlParagraph>> {
        let line = line.trim_end_matches(|c: char| c == '\r' || c == '\n');

        if line.trim().is_empty() {
            if let Some(field) = self.field.take() {
                self.flush_field(field)?;
            }

            return Ok(if self.paragraph.is_empty() {
                None
            } else {
                Some(std::mem::take(&mut self.paragraph))
            });
        }

        // Comment lines are legal in source control files.
        if line.starts_with('#') {
            return Ok(None);
        }

        let is_continuation = line.starts_with(' ') || line.starts_with('\t');

        match (self.field.take(), is_continuation) {
            (Some(mut current), true) => {
                current.push('\n');
                current.push_str(line);
                self.field = Some(current);
            }
            (Some(current), false) => {
                self.flush_field(current)?;
                self.field = Some(line.to_string());
            }
            (None, true) => {
                return Err(MirrorError::ControlParse(format!(
                    "continuation line without a field: {}",
                    line
                )));
            }
            (None, false) => {
                self.field = Some(line.to_string());
            }
        }

        Ok(None)
    }

    fn finish(mut self) -> Result<Option<ControlParagraph>> {
        if let Some(field) = self.field.take() {
            self.flush_field(field)?;
        }

        Ok(if self.paragraph.is_empty() {
            None
        } else {
            Some(self.paragraph)
        })
    }

    fn flush_field(&mut self, v: String) -> Result<()> {
        let (name, value) = v.split_once(':').ok_or_else(|| {
            MirrorError::ControlParse(format!("line does not define a field: {}", v))
        })?;

        let name = name.trim();
        if name.is_empty() || name.contains(char::is_whitespace) {
            return Err(MirrorError::ControlParse(format!(
                "invalid field name: {:?}",
                name
            )));
        }

        let value = if value.starts_with('\n') {
            value
        } else {
            value.trim_start()
        };

        self.paragraph.set_field(ControlField::new(name, value));

        Ok(())
    }
}

/// Parse every paragraph from a reader.
pub fn parse_paragraphs<R: BufRead>(reader: R) -> Result<Vec<ControlParagraph>> {
    let mut parser = ControlFileParser::default();
    let mut paragraphs = vec![];

    for line in reader.lines() {
        if let Some(paragraph) = parser.write_line(&line?)? {
            paragraphs.push(paragraph);
        }
    }

    if let Some(paragraph) = parser.finish()? {
        paragraphs.push(paragraph);
    }

    Ok(paragraphs)
}

/// Parse a reader expected to hold exactly one paragraph.
pub fn parse_single_paragraph<R: BufRead>(reader: R) -> Result<ControlParagraph> {
    let mut paragraphs = parse_paragraphs(reader)?;

    match paragraphs.len() {
        1 => Ok(paragraphs.remove(0)),
        count => Err(MirrorError::ControlParse(format!(
            "expected 1 paragraph; got {}",
            count
        ))),
    }
}
