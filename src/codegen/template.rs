use std::fmt;

use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use serde::Serialize;

/// Everything but RFC 3986 unreserved characters.
const COMPONENT: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'.')
    .remove(b'_')
    .remove(b'~');

/// Delimiters around a value: `name=value` lists such as a query string or a
/// cookie header, or whole URL path segments.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PairSyntax {
    /// Characters that may precede `name=`
    leading: &'static [char],
    /// Characters that may follow the value
    trailing: &'static [char],
}

impl PairSyntax {
    pub const QUERY: PairSyntax = PairSyntax {
        leading: &['?', '&', ';'],
        trailing: &['&', ';', '#'],
    };

    pub const COOKIE: PairSyntax = PairSyntax {
        leading: &[';', ' '],
        trailing: &[';'],
    };

    pub const PATH: PairSyntax = PairSyntax {
        leading: &['/'],
        trailing: &['/', '?', '#', ';'],
    };
}

/// One piece of a parameterized request field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum Segment {
    Literal(String),
    /// Caller-supplied input variable
    Input(String),
    /// Value extracted from an earlier call's response, by slot name
    Extracted(String),
    /// Cookie from the caller's jar
    Cookie(String),
}

/// A request field as a sequence of literal and parameterized segments.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
#[serde(transparent)]
pub struct Template(Vec<Segment>);

impl Template {
    pub fn literal(text: impl Into<String>) -> Self {
        let text = text.into();
        if text.is_empty() {
            Self(Vec::new())
        } else {
            Self(vec![Segment::Literal(text)])
        }
    }

    pub fn segments(&self) -> &[Segment] {
        &self.0
    }

    pub fn is_literal(&self) -> bool {
        self.0.iter().all(|s| matches!(s, Segment::Literal(_)))
    }

    /// Replace every occurrence of `needle` inside literal segments with
    /// `replacement`. Returns whether anything was replaced.
    pub fn substitute(&mut self, needle: &str, replacement: &[Segment]) -> bool {
        if needle.is_empty() {
            return false;
        }
        let mut replaced = false;
        let mut out = Vec::with_capacity(self.0.len());
        for segment in self.0.drain(..) {
            let text = match segment {
                Segment::Literal(text) => text,
                other => {
                    out.push(other);
                    continue;
                }
            };
            let mut rest = text.as_str();
            while let Some(pos) = rest.find(needle) {
                replaced = true;
                if pos > 0 {
                    out.push(Segment::Literal(rest[..pos].to_string()));
                }
                out.extend(replacement.iter().cloned());
                rest = &rest[pos + needle.len()..];
            }
            if !rest.is_empty() {
                out.push(Segment::Literal(rest.to_string()));
            }
        }
        self.0 = out;
        self.merge_literals();
        replaced
    }

    /// Try `value` and its URL-encoded spellings, in that order.
    pub fn substitute_value(&mut self, value: &str, replacement: &[Segment]) -> bool {
        spellings(value)
            .iter()
            .any(|spelling| self.substitute(spelling, replacement))
    }

    /// Replace only the value of the `name=value` pairs of a delimited list,
    /// leaving the same text elsewhere in the field untouched.
    pub fn substitute_pair(
        &mut self,
        syntax: PairSyntax,
        name: &str,
        value: &str,
        replacement: &[Segment],
    ) -> bool {
        if name.is_empty() || value.is_empty() {
            return false;
        }
        let mut names = vec![name.to_string()];
        let encoded = form_encode(name);
        if encoded != name {
            names.push(encoded);
        }
        names.iter().any(|name| {
            let prefix = format!("{name}=");
            spellings(value)
                .iter()
                .any(|spelling| self.replace_delimited(syntax, &prefix, spelling, replacement))
        })
    }

    /// Replace `value` where it forms a whole path segment.
    pub fn substitute_segment(&mut self, value: &str, replacement: &[Segment]) -> bool {
        !value.is_empty()
            && spellings(value)
                .iter()
                .any(|spelling| self.replace_delimited(PairSyntax::PATH, "", spelling, replacement))
    }

    /// Replace each `value` that follows `prefix` and sits between the
    /// delimiters of `syntax`; `prefix` itself stays literal.
    fn replace_delimited(
        &mut self,
        syntax: PairSyntax,
        prefix: &str,
        value: &str,
        replacement: &[Segment],
    ) -> bool {
        let needle = format!("{prefix}{value}");
        let Some(first) = needle.chars().next() else {
            return false;
        };
        let mut replaced = false;
        let mut out = Vec::with_capacity(self.0.len());
        for segment in self.0.drain(..) {
            let text = match segment {
                Segment::Literal(text) => text,
                other => {
                    out.push(other);
                    continue;
                }
            };
            let mut copied = 0;
            let mut from = 0;
            while let Some(found) = text[from..].find(&needle) {
                let pos = from + found;
                let end = pos + needle.len();
                let leads = text[..pos]
                    .chars()
                    .next_back()
                    .map_or(true, |c| syntax.leading.contains(&c));
                let trails = text[end..]
                    .chars()
                    .next()
                    .map_or(true, |c| syntax.trailing.contains(&c));
                if !leads || !trails {
                    from = pos + first.len_utf8();
                    continue;
                }
                replaced = true;
                out.push(Segment::Literal(text[copied..pos + prefix.len()].to_string()));
                out.extend(replacement.iter().cloned());
                copied = end;
                from = end;
            }
            out.push(Segment::Literal(text[copied..].to_string()));
        }
        self.0 = out;
        self.merge_literals();
        replaced
    }

    fn merge_literals(&mut self) {
        let mut merged: Vec<Segment> = Vec::with_capacity(self.0.len());
        for segment in self.0.drain(..) {
            if let Segment::Literal(next) = &segment {
                if next.is_empty() {
                    continue;
                }
                if let Some(Segment::Literal(prev)) = merged.last_mut() {
                    prev.push_str(next);
                    continue;
                }
            }
            merged.push(segment);
        }
        self.0 = merged;
    }
}

impl fmt::Display for Template {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for segment in &self.0 {
            match segment {
                Segment::Literal(text) => f.write_str(text)?,
                Segment::Input(name) => write!(f, "{{{{input.{name}}}}}")?,
                Segment::Extracted(slot) => write!(f, "{{{{{slot}}}}}")?,
                Segment::Cookie(name) => write!(f, "{{{{cookie.{name}}}}}")?,
            }
        }
        Ok(())
    }
}

/// Percent-encode everything but RFC 3986 unreserved characters.
pub fn percent_encode(value: &str) -> String {
    utf8_percent_encode(value, COMPONENT).to_string()
}

/// `application/x-www-form-urlencoded` spelling (spaces as `+`).
pub fn form_encode(value: &str) -> String {
    url::form_urlencoded::byte_serialize(value.as_bytes()).collect()
}

/// `value` as written, then its percent-encoded and form-encoded forms.
fn spellings(value: &str) -> Vec<String> {
    let mut out = vec![value.to_string()];
    for spelling in [percent_encode(value), form_encode(value)] {
        if !out.contains(&spelling) {
            out.push(spelling);
        }
    }
    out
}
