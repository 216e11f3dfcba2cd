//! This library parses the sectioned key-value text format that container manifests are written
//! in.
//! A section is a run of `Key: Value` lines, and sections are separated by an extra newline.
//! A line starting with a single space continues the value of the line before it, and a line
//! starting with `#` is a comment.
//! Keys may repeat within a section (a class has many `Field`s), so the entries of each section
//! are kept in the order they were written.
//! Values are essentially strings until whoever reads the section actually parses them.

// TODO: It wouldn't be that hard to make a writer for this, if we needed that.

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Section {
    entries: Vec<(String, String)>,
}
impl Section {
    /// The first value for the key
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// Every value for the key, in order
    pub fn get_all<'a>(&'a self, key: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        self.entries
            .iter()
            .filter(move |(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    pub fn entries(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[derive(Debug, Clone, Default)]
pub struct KeyValueData {
    sections: Vec<Section>,
}
impl KeyValueData {
    /// The first value for the key in the section at `index`
    #[must_use]
    pub fn get(&self, index: usize, id: &str) -> Option<&str> {
        self.sections.get(index).and_then(|section| section.get(id))
    }

    pub fn get_all<'a>(&'a self, index: usize, id: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        self.sections
            .get(index)
            .into_iter()
            .flat_map(move |section| section.get_all(id))
    }

    #[must_use]
    pub fn section(&self, index: usize) -> Option<&Section> {
        self.sections.get(index)
    }

    #[must_use]
    pub fn sections(&self) -> &[Section] {
        &self.sections
    }

    /// The number of sections
    #[must_use]
    pub fn len(&self) -> usize {
        self.sections.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.sections.is_empty()
    }
}

#[derive(Debug, Clone, Eq, PartialEq)]
pub enum KeyValueParseError {
    /// The value on this line never ended with a newline
    ExpectedNewline { line: usize },
    /// We expected the starting character for a name but got nothing
    ExpectedInitialNameCharacterGotEof { line: usize },
    /// We expected the starting character for a name to be alphanumeric
    ExpectedInitialNameCharacterAlphanumeric { line: usize, found: char },
    /// We expected this character to come next
    Expected { line: usize, expected: char },
    ValueContainedNull { line: usize },
}
impl KeyValueParseError {
    /// The line, counting from one, that the error was found on
    #[must_use]
    pub fn line(&self) -> usize {
        match self {
            KeyValueParseError::ExpectedNewline { line }
            | KeyValueParseError::ExpectedInitialNameCharacterGotEof { line }
            | KeyValueParseError::ExpectedInitialNameCharacterAlphanumeric { line, .. }
            | KeyValueParseError::Expected { line, .. }
            | KeyValueParseError::ValueContainedNull { line } => *line,
        }
    }
}
impl std::fmt::Display for KeyValueParseError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            KeyValueParseError::ExpectedNewline { line } => {
                write!(f, "line {}: expected a newline", line)
            }
            KeyValueParseError::ExpectedInitialNameCharacterGotEof { line } => {
                write!(f, "line {}: expected a key", line)
            }
            KeyValueParseError::ExpectedInitialNameCharacterAlphanumeric { line, found } => {
                write!(f, "line {}: keys start with a letter or digit, not '{}'", line, found)
            }
            KeyValueParseError::Expected { line, expected } => {
                write!(f, "line {}: expected '{}'", line, expected)
            }
            KeyValueParseError::ValueContainedNull { line } => {
                write!(f, "line {}: values can't contain null", line)
            }
        }
    }
}
impl std::error::Error for KeyValueParseError {}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeyValueWarning {
    /// More than one blank line in a row. The empty section is skipped.
    EmptySection { line: usize },
}

/// Error kinds found while parsing a single line, before the line number is attached
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ErrorKind {
    ExpectedNewline,
    ExpectedInitialNameCharacterGotEof,
    ExpectedInitialNameCharacterAlphanumeric(char),
    Expected(char),
    ValueContainedNull,
}
impl ErrorKind {
    fn at(self, line: usize) -> KeyValueParseError {
        match self {
            ErrorKind::ExpectedNewline => KeyValueParseError::ExpectedNewline { line },
            ErrorKind::ExpectedInitialNameCharacterGotEof => {
                KeyValueParseError::ExpectedInitialNameCharacterGotEof { line }
            }
            ErrorKind::ExpectedInitialNameCharacterAlphanumeric(found) => {
                KeyValueParseError::ExpectedInitialNameCharacterAlphanumeric { line, found }
            }
            ErrorKind::Expected(expected) => KeyValueParseError::Expected { line, expected },
            ErrorKind::ValueContainedNull => KeyValueParseError::ValueContainedNull { line },
        }
    }
}

pub fn parse_keyvalue_data(
    mut input_data: &str,
    mut warning_output: impl FnMut(KeyValueWarning),
) -> Result<KeyValueData, KeyValueParseError> {
    let mut result = KeyValueData::default();
    let mut line = 1;

    while !input_data.is_empty() {
        let mut section = Section::default();
        let section_line = line;

        loop {
            if let Ok(d) = expect_newline(input_data) {
                // A blank line, which ends the section
                input_data = d;
                line += 1;
                break;
            }

            if let Some(d) = skip_comment(input_data) {
                input_data = d;
                line += 1;
                if input_data.is_empty() {
                    break;
                }
                continue;
            }

            // alphanum *(alphanum | - | _)
            let (d, name) = parse_name(input_data).map_err(|e| e.at(line))?;
            let d = expect(d, ':').map_err(|e| e.at(line))?;
            // SPACE
            let d = expect(d, ' ').map_err(|e| e.at(line))?;
            let (d, value, lines) = parse_value(d).map_err(|(e, offset)| e.at(line + offset))?;

            section.entries.push((name.to_owned(), value));
            input_data = d;
            line += lines;

            if input_data.is_empty() {
                break;
            }
        }

        if section.is_empty() {
            warning_output(KeyValueWarning::EmptySection { line: section_line });
        } else {
            result.sections.push(section);
        }
    }

    Ok(result)
}

/// Skip a comment line, returning the data after it
fn skip_comment(data: &str) -> Option<&str> {
    let data = data.strip_prefix('#')?;
    for (i, _) in data.char_indices() {
        if let Ok(after) = expect_newline(&data[i..]) {
            return Some(after);
        }
    }

    // A comment on the last line doesn't need a newline
    Some("")
}

/// Returns (data after the newline, the text before it)
fn parse_otherchars(data: &str) -> Result<(&str, &str), ErrorKind> {
    for (i, c) in data.char_indices() {
        if c == '\0' {
            return Err(ErrorKind::ValueContainedNull);
        }

        if let Ok(after_data) = expect_newline(&data[i..]) {
            return Ok((after_data, &data[..i]));
        }
    }

    Err(ErrorKind::ExpectedNewline)
}

/// The beginning space should already be parsed.
/// Returns (data, value, lines consumed), or the error with how many lines past the first it
/// was found on.
fn parse_value(data: &str) -> Result<(&str, String, usize), (ErrorKind, usize)> {
    let (mut data, initial_data) = parse_otherchars(data).map_err(|e| (e, 0))?;
    let mut content = initial_data.to_owned();
    let mut lines = 1;

    // Each line starting with a space is a continuation
    while let Some(rest) = data.strip_prefix(' ') {
        let (rest, continuation) = parse_otherchars(rest).map_err(|e| (e, lines))?;
        content.push_str(continuation);
        data = rest;
        lines += 1;
    }

    Ok((data, content, lines))
}

// TODO: This parsing is purely ascii, so we could skip any utf8 validation
/// Returns (data, name)
fn parse_name(data: &str) -> Result<(&str, &str), ErrorKind> {
    let first = data
        .chars()
        .next()
        .ok_or(ErrorKind::ExpectedInitialNameCharacterGotEof)?;
    if !first.is_ascii_alphanumeric() {
        return Err(ErrorKind::ExpectedInitialNameCharacterAlphanumeric(first));
    }

    let mut end = 1;
    for (i, x) in data.char_indices().skip(1) {
        if x.is_ascii_alphanumeric() || x == '-' || x == '_' {
            end = i + x.len_utf8();
        } else {
            // It was not a valid character, we'll let the thing which is parsing us
            // handle it
            break;
        }
    }

    Ok((&data[end..], &data[..end]))
}

fn expect_newline(data: &str) -> Result<&str, ErrorKind> {
    if let Some(data) = data.strip_prefix("\r\n") {
        Ok(data)
    } else if let Some(data) = data.strip_prefix('\n') {
        Ok(data)
    } else if let Some(data) = data.strip_prefix('\r') {
        Ok(data)
    } else {
        Err(ErrorKind::ExpectedNewline)
    }
}

fn expect(data: &str, c: char) -> Result<&str, ErrorKind> {
    if let Some(data) = data.strip_prefix(c) {
        Ok(data)
    } else {
        Err(ErrorKind::Expected(c))
    }
}

#[cfg(test)]
mod tests {
    use crate::{
        parse_keyvalue_data, parse_name, ErrorKind, KeyValueParseError, KeyValueWarning,
    };

    #[test]
    fn test_name_parsing() {
        assert_eq!(parse_name("ABCde"), Ok(("", "ABCde")));
        assert_eq!(
            parse_name(""),
            Err(ErrorKind::ExpectedInitialNameCharacterGotEof)
        );
        assert_eq!(parse_name("AB3C-e"), Ok(("", "AB3C-e")));
        assert_eq!(
            parse_name("-asdf"),
            Err(ErrorKind::ExpectedInitialNameCharacterAlphanumeric('-'))
        );
        assert_eq!(parse_name("a"), Ok(("", "a")));
        assert_eq!(parse_name("a: asdf"), Ok((": asdf", "a")));
    }

    #[test]
    fn test_repeated_keys() {
        let file = "Class: LPkg/Widget;\nField: private I size\nMethod: public draw()V\nField: public static J count\n\n";

        let result = parse_keyvalue_data(file, |_| {}).unwrap();
        assert_eq!(result.len(), 1);
        assert_eq!(result.get(0, "Class"), Some("LPkg/Widget;"));
        assert_eq!(result.get(0, "Field"), Some("private I size"));
        assert_eq!(
            result.get_all(0, "Field").collect::<Vec<_>>(),
            vec!["private I size", "public static J count"]
        );
        assert_eq!(result.get_all(0, "Interface").count(), 0);
        assert_eq!(result.get_all(3, "Field").count(), 0);

        let keys: Vec<_> = result.sections()[0].entries().map(|(k, _)| k).collect();
        assert_eq!(keys, vec!["Class", "Field", "Method", "Field"]);
    }

    #[test]
    fn test_sections_and_continuations() {
        let file = "Class: LPkg/A;\nSuper: Ljava/lang/\n Object;\n\nClass: LPkg/B;\nSuper: LPkg/\n A\n ;\n";

        let result = parse_keyvalue_data(file, |_| {}).unwrap();
        assert_eq!(result.len(), 2);
        assert_eq!(result.get(0, "Super"), Some("Ljava/lang/Object;"));
        assert_eq!(result.get(1, "Class"), Some("LPkg/B;"));
        assert_eq!(result.get(1, "Super"), Some("LPkg/A;"));
        assert_eq!(result.section(1).map(|s| s.len()), Some(2));
    }

    #[test]
    fn test_comments() {
        let file = "# Widgets\nClass: LPkg/Widget;\n# the size\nField: private I size\r\n\n# trailing";

        let mut warnings = Vec::new();
        let result = parse_keyvalue_data(file, |w| warnings.push(w)).unwrap();
        assert_eq!(result.len(), 1);
        assert_eq!(result.get(0, "Field"), Some("private I size"));
        // The comment after the last section is a section of its own, with nothing in it
        assert_eq!(warnings, vec![KeyValueWarning::EmptySection { line: 6 }]);
    }

    #[test]
    fn test_empty_sections() {
        let file = "A: 1\n\n\nB: 2\n";

        let mut warnings = Vec::new();
        let result = parse_keyvalue_data(file, |w| warnings.push(w)).unwrap();
        assert_eq!(result.len(), 2);
        assert_eq!(result.get(1, "B"), Some("2"));
        assert_eq!(warnings, vec![KeyValueWarning::EmptySection { line: 3 }]);
    }

    #[test]
    fn test_errors() {
        assert_eq!(
            parse_keyvalue_data("A: 1\nB 2\n", |_| {}).unwrap_err(),
            KeyValueParseError::Expected {
                line: 2,
                expected: ':'
            }
        );
        assert_eq!(
            parse_keyvalue_data("A: 1\n-B: 2\n", |_| {}).unwrap_err(),
            KeyValueParseError::ExpectedInitialNameCharacterAlphanumeric {
                line: 2,
                found: '-'
            }
        );
        let err = parse_keyvalue_data("A: 1\n x\n y", |_| {}).unwrap_err();
        assert_eq!(err, KeyValueParseError::ExpectedNewline { line: 3 });
        assert_eq!(err.line(), 3);
        assert_eq!(
            parse_keyvalue_data("A: a\0b\n", |_| {}).unwrap_err(),
            KeyValueParseError::ValueContainedNull { line: 1 }
        );
    }
}
