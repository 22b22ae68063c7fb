//! JSON template expansion.
//!
//! Templates are JSON documents with embedded replacement rules:
//!
//! - `${name}`: the first value of attribute `name`, empty if absent.
//!   Escaped for JSON string context by default; `${|name}` emits the raw
//!   value. A global flag flips which of the two escapes.
//! - `${switch name case "lit": "body" case /re/: "body" default: "body"}`:
//!   first matching branch wins; literal equality or full regex match
//!   against the first value of `name`.
//! - `${for $v in attr} ... ${$v} ... ${end}`: repeats the body once per
//!   value of `attr`. Parallel iterators (`${for $a $b in attrA attrB}`)
//!   advance in lockstep up to the longest list; shorter lists read as
//!   empty strings past their end.
//!
//! Everything else is copied through verbatim. After expansion, trailing
//! commas immediately before `]` or `}` are collapsed (the `for` construct
//! leaves one behind on its final iteration); commas inside string literals
//! are preserved.

use crate::error::TemplateError;
use crate::filter::full_match_regex;
use crate::model::LoadedObject;
use std::collections::BTreeMap;

/// Upper bound on parallel iteration variables; more of them in one `for` is
/// a runaway template, not a real configuration.
const MAX_ITERATION_VARIABLES: usize = 100;

/// Expand `template` against `object`.
///
/// `escape_by_default` selects what bare `${name}` does; `${|name}` always
/// does the opposite.
pub fn expand(
    template: &str,
    object: &LoadedObject,
    escape_by_default: bool,
) -> Result<String, TemplateError> {
    let mut expander = Expander {
        chars: template.chars().collect(),
        pos: 0,
        line: 1,
        column: 1,
        object,
        escape_by_default,
        output: String::with_capacity(template.len()),
        iterations: Vec::new(),
    };
    expander.run()?;
    Ok(collapse_trailing_commas(&expander.output))
}

struct IterationFrame {
    values: BTreeMap<String, Vec<String>>,
    index: usize,
    longest: usize,
    reset: (usize, usize, usize),
}

struct Expander<'a> {
    chars: Vec<char>,
    pos: usize,
    line: usize,
    column: usize,
    object: &'a LoadedObject,
    escape_by_default: bool,
    output: String,
    iterations: Vec<IterationFrame>,
}

impl Expander<'_> {
    fn run(&mut self) -> Result<(), TemplateError> {
        while self.pos < self.chars.len() {
            if self.peek() == Some('$') && self.peek_at(1) == Some('{') {
                self.replacement()?;
            } else {
                let c = self.chars[self.pos];
                self.output.push(c);
                self.advance();
            }
        }

        if !self.iterations.is_empty() {
            return Err(self.error("unmatched iteration statement"));
        }
        Ok(())
    }

    fn replacement(&mut self) -> Result<(), TemplateError> {
        self.advance();
        self.advance();
        self.skip_whitespace();

        let raw = self.peek() == Some('|');
        if raw {
            self.advance();
            self.skip_whitespace();
        }

        let id = self.identifier()?;

        if !raw {
            match id.as_str() {
                "switch" => {
                    self.switch()?;
                    return self.expect_closing_brace();
                }
                "for" => return self.iteration_start(),
                "end" => return self.iteration_end(),
                _ => {}
            }
        }

        let value = self.value_of(&id)?;
        let escape = self.escape_by_default != raw;
        if escape {
            escape_json_string(&value, &mut self.output);
        } else {
            self.output.push_str(&value);
        }
        self.expect_closing_brace()
    }

    fn switch(&mut self) -> Result<(), TemplateError> {
        self.skip_whitespace();
        let id = self.identifier()?;
        let value = self.value_of(&id)?;
        self.skip_whitespace();

        let mut matched = false;
        loop {
            let word = self.identifier()?;
            match word.as_str() {
                "case" => {
                    self.skip_whitespace();
                    let arm_matches = if self.peek() == Some('/') {
                        let pattern = self.regex_literal()?;
                        let regex = full_match_regex(&pattern)
                            .map_err(|error| self.error(format!("bad case regex: {error}")))?;
                        regex.is_match(&value)
                    } else {
                        self.string_literal()? == value
                    };
                    self.skip_whitespace();
                    self.expect(':')?;
                    self.skip_whitespace();
                    let body = self.string_literal()?;
                    if !matched && arm_matches {
                        self.output.push_str(&body);
                        matched = true;
                    }
                }
                "default" => {
                    self.skip_whitespace();
                    self.expect(':')?;
                    self.skip_whitespace();
                    let body = self.string_literal()?;
                    if !matched {
                        self.output.push_str(&body);
                    }
                    return Ok(());
                }
                _ => return Err(self.error("expected 'case' or 'default'")),
            }
            self.skip_whitespace();
        }
    }

    fn iteration_start(&mut self) -> Result<(), TemplateError> {
        self.skip_whitespace();
        if self.peek() != Some('$') {
            return Err(self.error("expected iteration variable"));
        }

        let mut variables = Vec::new();
        loop {
            let id = self.identifier()?;
            if id == "in" {
                break;
            }
            if !id.starts_with('$') {
                return Err(self.error("expected iteration variable or 'in'"));
            }
            variables.push(id[1..].to_string());
            self.skip_whitespace();

            if variables.len() > MAX_ITERATION_VARIABLES {
                return Err(self.error("expected 'in'"));
            }
        }

        self.skip_whitespace();
        let mut attributes = Vec::new();
        while self.peek() != Some('}') {
            let id = self.identifier()?;
            if id.starts_with('$') {
                return Err(self.error("expected attribute name"));
            }
            attributes.push(id);
            self.skip_whitespace();
        }

        if attributes.is_empty() || attributes.len() != variables.len() {
            return Err(self.error("number of iteration variables and attributes must match"));
        }
        self.expect('}')?;

        let mut values = BTreeMap::new();
        let mut longest = 0;
        for (variable, attribute) in variables.into_iter().zip(attributes) {
            let attribute_values = self.object.values(&attribute).to_vec();
            longest = longest.max(attribute_values.len());
            values.insert(variable, attribute_values);
        }

        if longest == 0 {
            return self.skip_to_matching_end();
        }

        self.iterations.push(IterationFrame {
            values,
            index: 0,
            longest,
            reset: (self.pos, self.line, self.column),
        });
        Ok(())
    }

    fn iteration_end(&mut self) -> Result<(), TemplateError> {
        self.expect_closing_brace()?;

        let frame = match self.iterations.last_mut() {
            Some(frame) => frame,
            None => return Err(self.error("end statement without matching for statement")),
        };

        frame.index += 1;
        if frame.index < frame.longest {
            let (pos, line, column) = frame.reset;
            self.pos = pos;
            self.line = line;
            self.column = column;
        } else {
            self.iterations.pop();
        }
        Ok(())
    }

    /// Consume the body of a zero-iteration `for` without emitting anything,
    /// honouring nested for/end pairs.
    fn skip_to_matching_end(&mut self) -> Result<(), TemplateError> {
        let mut depth = 1usize;
        while self.pos < self.chars.len() {
            if self.peek() == Some('$') && self.peek_at(1) == Some('{') {
                self.advance();
                self.advance();
                self.skip_whitespace();
                if self.peek() == Some('|') {
                    self.advance();
                }
                if let Ok(id) = self.identifier() {
                    match id.as_str() {
                        "for" => depth += 1,
                        "end" => {
                            depth -= 1;
                            if depth == 0 {
                                return self.expect_closing_brace();
                            }
                        }
                        _ => {}
                    }
                }
            } else {
                self.advance();
            }
        }
        Err(self.error("unmatched iteration statement"))
    }

    /// First value of an attribute, or the current value of an iteration
    /// variable (`$`-prefixed). Absent attributes read as the empty string;
    /// an exhausted parallel iterator pads with empty strings.
    fn value_of(&self, name: &str) -> Result<String, TemplateError> {
        if let Some(variable) = name.strip_prefix('$') {
            for frame in self.iterations.iter().rev() {
                if let Some(values) = frame.values.get(variable) {
                    return Ok(values.get(frame.index).cloned().unwrap_or_default());
                }
            }
            return Err(self.error(format!("iteration variable \"{variable}\" does not exist")));
        }
        Ok(self
            .object
            .first_value(name)
            .unwrap_or_default()
            .to_string())
    }

    fn identifier(&mut self) -> Result<String, TemplateError> {
        let mut id = String::new();
        if self.peek() == Some('$') {
            id.push('$');
            self.advance();
        }
        if !self.peek().is_some_and(is_identifier_char) {
            return Err(self.error("expected variable name or keyword"));
        }
        while let Some(c) = self.peek() {
            if !is_identifier_char(c) {
                break;
            }
            id.push(c);
            self.advance();
        }
        Ok(id)
    }

    fn string_literal(&mut self) -> Result<String, TemplateError> {
        let quote = match self.peek() {
            Some(q @ ('\'' | '"')) => q,
            _ => return Err(self.error("expected single or double quote")),
        };
        self.advance();

        let mut literal = String::new();
        loop {
            match self.peek() {
                Some(c) if c == quote => {
                    self.advance();
                    return Ok(literal);
                }
                Some(c) => {
                    literal.push(c);
                    self.advance();
                }
                None => return Err(self.error("unexpected end-of-string")),
            }
        }
    }

    fn regex_literal(&mut self) -> Result<String, TemplateError> {
        self.expect('/')?;
        let mut pattern = String::new();
        loop {
            match self.peek() {
                Some('/') => {
                    self.advance();
                    return Ok(pattern);
                }
                Some(c) => {
                    pattern.push(c);
                    self.advance();
                }
                None => return Err(self.error("unterminated regex literal")),
            }
        }
    }

    fn expect_closing_brace(&mut self) -> Result<(), TemplateError> {
        self.skip_whitespace();
        self.expect('}')
    }

    fn expect(&mut self, expected: char) -> Result<(), TemplateError> {
        if self.peek() == Some(expected) {
            self.advance();
            Ok(())
        } else {
            match self.peek() {
                Some(found) => Err(self.error(format!("expected '{expected}', found '{found}'"))),
                None => Err(self.error(format!("expected '{expected}', found end of template"))),
            }
        }
    }

    fn skip_whitespace(&mut self) {
        while self.peek().is_some_and(char::is_whitespace) {
            self.advance();
        }
    }

    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn peek_at(&self, offset: usize) -> Option<char> {
        self.chars.get(self.pos + offset).copied()
    }

    fn advance(&mut self) {
        if self.peek() == Some('\n') {
            self.line += 1;
            self.column = 1;
        } else {
            self.column += 1;
        }
        self.pos += 1;
    }

    fn error(&self, message: impl Into<String>) -> TemplateError {
        TemplateError {
            line: self.line,
            column: self.column,
            message: message.into(),
        }
    }
}

fn is_identifier_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.'
}

/// Escape a value for inclusion inside a JSON string literal.
fn escape_json_string(value: &str, output: &mut String) {
    for c in value.chars() {
        match c {
            '"' => output.push_str("\\\""),
            '\\' => output.push_str("\\\\"),
            '\n' => output.push_str("\\n"),
            '\r' => output.push_str("\\r"),
            '\t' => output.push_str("\\t"),
            c if (c as u32) < 0x20 => {
                output.push_str(&format!("\\u{:04x}", c as u32));
            }
            c => output.push(c),
        }
    }
}

/// Drop commas whose next non-whitespace character closes an array or
/// object. Commas inside string literals are untouched.
fn collapse_trailing_commas(expanded: &str) -> String {
    let chars: Vec<char> = expanded.chars().collect();
    let mut output = String::with_capacity(expanded.len());
    let mut inside_string = false;
    let mut escaped = false;

    for (i, &c) in chars.iter().enumerate() {
        if inside_string {
            output.push(c);
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == '"' {
                inside_string = false;
            }
            continue;
        }

        match c {
            '"' => {
                inside_string = true;
                output.push(c);
            }
            ',' => {
                let mut next = i + 1;
                while next < chars.len() && chars[next].is_whitespace() {
                    next += 1;
                }
                let closes_block = matches!(chars.get(next), Some(']') | Some('}'));
                if !closes_block {
                    output.push(c);
                }
            }
            _ => output.push(c),
        }
    }
    output
}

#[cfg(test)]
mod tests {
    use super::*;

    fn student() -> LoadedObject {
        let mut object = LoadedObject::new("Student");
        object.set_attribute("GUID", vec!["u1".to_string()]);
        object.set_attribute("userName", vec!["anna.andersson".to_string()]);
        object.set_attribute("displayName", vec!["Anna \"Anka\" Andersson".to_string()]);
        object.set_attribute(
            "email",
            vec!["anna@example.com".to_string(), "aa@example.com".to_string()],
        );
        object.set_attribute("emailType", vec!["home".to_string()]);
        object.set_attribute("role", vec!["student".to_string()]);
        object
    }

    fn expand_default(template: &str) -> String {
        expand(template, &student(), true).unwrap()
    }

    #[test]
    fn test_simple_replacement() {
        assert_eq!(
            expand_default(r#"{"userName": "${userName}"}"#),
            r#"{"userName": "anna.andersson"}"#
        );
    }

    #[test]
    fn test_absent_attribute_is_empty() {
        assert_eq!(expand_default(r#"["${nothing}"]"#), r#"[""]"#);
    }

    #[test]
    fn test_escaping_by_default() {
        assert_eq!(
            expand_default(r#"{"d": "${displayName}"}"#),
            r#"{"d": "Anna \"Anka\" Andersson"}"#
        );
    }

    #[test]
    fn test_raw_marker_disables_escaping() {
        assert_eq!(
            expand_default(r#"{"d": "${|displayName}"}"#),
            r#"{"d": "Anna "Anka" Andersson"}"#
        );
    }

    #[test]
    fn test_inverted_escape_default() {
        let object = student();
        assert_eq!(
            expand(r#"${displayName}"#, &object, false).unwrap(),
            r#"Anna "Anka" Andersson"#
        );
        assert_eq!(
            expand(r#"${|displayName}"#, &object, false).unwrap(),
            r#"Anna \"Anka\" Andersson"#
        );
    }

    #[test]
    fn test_switch_literal_case() {
        let expanded = expand_default(
            r#"${switch role case "teacher": "Teachers" case "student": "Students" default: "Other"}"#,
        );
        assert_eq!(expanded, "Students");
    }

    #[test]
    fn test_switch_regex_case() {
        let expanded = expand_default(
            r#"${switch userName case /.*\.andersson/: "match" default: "no match"}"#,
        );
        assert_eq!(expanded, "match");
    }

    #[test]
    fn test_switch_default_branch() {
        let expanded = expand_default(
            r#"${switch role case "teacher": "Teachers" default: "Other"}"#,
        );
        assert_eq!(expanded, "Other");
    }

    #[test]
    fn test_switch_first_match_wins() {
        let expanded = expand_default(
            r#"${switch role case /s.*/: "first" case "student": "second" default: "none"}"#,
        );
        assert_eq!(expanded, "first");
    }

    #[test]
    fn test_for_loop_with_trailing_comma_collapse() {
        let expanded = expand_default(
            r#"{"emails": [${for $e in email}{"value": "${$e}"},${end}]}"#,
        );
        assert_eq!(
            expanded,
            r#"{"emails": [{"value": "anna@example.com"},{"value": "aa@example.com"}]}"#
        );
    }

    #[test]
    fn test_parallel_iteration_pads_short_list() {
        let expanded = expand_default(
            r#"[${for $e $t in email emailType}("${$e}" "${$t}"),${end}]"#,
        );
        assert_eq!(
            expanded,
            r#"[("anna@example.com" "home"),("aa@example.com" "")]"#
        );
    }

    #[test]
    fn test_empty_attribute_iterates_zero_times() {
        let expanded = expand_default(r#"["start",${for $x in nothing}"${$x}",${end}"end"]"#);
        assert_eq!(expanded, r#"["start","end"]"#);
    }

    #[test]
    fn test_nested_iteration() {
        let mut object = LoadedObject::new("StudentGroup");
        object.set_attribute("outer", vec!["1".to_string(), "2".to_string()]);
        object.set_attribute("inner", vec!["a".to_string(), "b".to_string()]);
        let expanded = expand(
            "${for $o in outer}${for $i in inner}${$o}${$i} ${end}${end}",
            &object,
            true,
        )
        .unwrap();
        assert_eq!(expanded, "1a 1b 2a 2b ");
    }

    #[test]
    fn test_commas_inside_strings_survive_collapse() {
        assert_eq!(
            expand_default(r#"{"v": "a, b ,"}"#),
            r#"{"v": "a, b ,"}"#
        );
    }

    #[test]
    fn test_unmatched_for_is_an_error() {
        let error = expand("${for $x in email} body", &student(), true).unwrap_err();
        assert!(error.message.contains("unmatched"));
    }

    #[test]
    fn test_end_without_for_is_an_error() {
        let error = expand("${end}", &student(), true).unwrap_err();
        assert!(error.message.contains("without matching for"));
    }

    #[test]
    fn test_unknown_iteration_variable_is_an_error() {
        let error = expand("${for $x in email}${$y}${end}", &student(), true).unwrap_err();
        assert!(error.message.contains("does not exist"));
    }

    #[test]
    fn test_verbatim_text_is_preserved() {
        assert_eq!(
            expand_default(r#"{"schemas": ["urn:x"], "active": true}"#),
            r#"{"schemas": ["urn:x"], "active": true}"#
        );
    }

    #[test]
    fn test_control_characters_escaped() {
        let mut object = LoadedObject::new("Student");
        object.set_attribute("note", vec!["line1\nline2\u{1}".to_string()]);
        assert_eq!(
            expand(r#"${note}"#, &object, true).unwrap(),
            r#"line1\nline2"#
        );
    }
}
