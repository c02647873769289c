//! A small CSS selector subset: type, `.class`, `[attr]`, `[attr="value"]`
//! and the descendant combinator. Enough for the extraction profiles.

use std::fmt;
use std::str::FromStr;

use chatwire_core::Error;

#[derive(Debug, Clone, PartialEq, Eq)]
enum AttrTest {
    Present(String),
    Equals(String, String),
}

/// One compound selector, e.g. `button.primary[data-testid="stop"]`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Compound {
    tag: Option<String>,
    classes: Vec<String>,
    attrs: Vec<AttrTest>,
}

impl Compound {
    /// Test against an element given its tag and attribute lookup.
    pub fn matches<F>(&self, tag: &str, attr: F) -> bool
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(t) = &self.tag {
            if !t.eq_ignore_ascii_case(tag) {
                return false;
            }
        }
        if !self.classes.is_empty() {
            let class_list = attr("class").unwrap_or_default();
            if !self
                .classes
                .iter()
                .all(|c| class_list.split_ascii_whitespace().any(|have| have == c))
            {
                return false;
            }
        }
        self.attrs.iter().all(|test| match test {
            AttrTest::Present(name) => attr(name).is_some(),
            AttrTest::Equals(name, value) => attr(name).as_deref() == Some(value.as_str()),
        })
    }
}

/// Descendant chain of compounds; the last one is the subject.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Selector {
    source: String,
    chain: Vec<Compound>,
}

impl Selector {
    pub fn parse(source: &str) -> Result<Self, Error> {
        let mut chain = Vec::new();
        for part in split_compounds(source)? {
            chain.push(parse_compound(&part)?);
        }
        if chain.is_empty() {
            return Err(Error::Parse(format!("empty selector: {:?}", source)));
        }
        Ok(Self {
            source: source.trim().to_string(),
            chain,
        })
    }

    pub fn chain(&self) -> &[Compound] {
        &self.chain
    }

    pub fn subject(&self) -> &Compound {
        &self.chain[self.chain.len() - 1]
    }

    pub fn as_str(&self) -> &str {
        &self.source
    }
}

impl FromStr for Selector {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Error> {
        Self::parse(s)
    }
}

impl fmt::Display for Selector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}

/// Split on whitespace outside of `[...]`.
fn split_compounds(source: &str) -> Result<Vec<String>, Error> {
    let mut parts = Vec::new();
    let mut current = String::new();
    let mut depth = 0usize;
    let mut quote: Option<char> = None;

    for ch in source.chars() {
        match (quote, ch) {
            (Some(q), c) if c == q => {
                quote = None;
                current.push(c);
            }
            (Some(_), c) => current.push(c),
            (None, '"') | (None, '\'') => {
                quote = Some(ch);
                current.push(ch);
            }
            (None, '[') => {
                depth += 1;
                current.push(ch);
            }
            (None, ']') => {
                depth = depth
                    .checked_sub(1)
                    .ok_or_else(|| Error::Parse(format!("unbalanced ']' in {:?}", source)))?;
                current.push(ch);
            }
            (None, c) if c.is_whitespace() && depth == 0 => {
                if !current.is_empty() {
                    parts.push(std::mem::take(&mut current));
                }
            }
            (None, '>') | (None, '+') | (None, '~') | (None, ',') if depth == 0 => {
                return Err(Error::Parse(format!(
                    "unsupported combinator {:?} in {:?}",
                    ch, source
                )));
            }
            (None, c) => current.push(c),
        }
    }
    if depth != 0 || quote.is_some() {
        return Err(Error::Parse(format!("unterminated attribute in {:?}", source)));
    }
    if !current.is_empty() {
        parts.push(current);
    }
    Ok(parts)
}

fn is_ident_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '-' || c == '_'
}

fn parse_compound(part: &str) -> Result<Compound, Error> {
    let mut compound = Compound::default();
    let chars: Vec<char> = part.chars().collect();
    let mut i = 0;

    let take_ident = |i: &mut usize| -> String {
        let start = *i;
        while *i < chars.len() && is_ident_char(chars[*i]) {
            *i += 1;
        }
        chars[start..*i].iter().collect()
    };

    if i < chars.len() && chars[i] == '*' {
        i += 1;
    } else if i < chars.len() && is_ident_char(chars[i]) {
        compound.tag = Some(take_ident(&mut i).to_ascii_lowercase());
    }

    while i < chars.len() {
        match chars[i] {
            '.' => {
                i += 1;
                let class = take_ident(&mut i);
                if class.is_empty() {
                    return Err(Error::Parse(format!("empty class in {:?}", part)));
                }
                compound.classes.push(class);
            }
            '[' => {
                let close = chars[i..]
                    .iter()
                    .position(|c| *c == ']')
                    .map(|p| p + i)
                    .ok_or_else(|| Error::Parse(format!("unterminated '[' in {:?}", part)))?;
                let inner: String = chars[i + 1..close].iter().collect();
                compound.attrs.push(parse_attr(&inner, part)?);
                i = close + 1;
            }
            c => {
                return Err(Error::Parse(format!(
                    "unexpected {:?} in selector {:?}",
                    c, part
                )))
            }
        }
    }
    Ok(compound)
}

fn parse_attr(inner: &str, part: &str) -> Result<AttrTest, Error> {
    match inner.split_once('=') {
        None => {
            let name = inner.trim();
            if name.is_empty() || !name.chars().all(is_ident_char) {
                return Err(Error::Parse(format!("bad attribute name in {:?}", part)));
            }
            Ok(AttrTest::Present(name.to_string()))
        }
        Some((name, value)) => {
            let name = name.trim();
            if name.is_empty() || !name.chars().all(is_ident_char) {
                return Err(Error::Parse(format!("bad attribute name in {:?}", part)));
            }
            let value = value.trim();
            let unquoted = value
                .strip_prefix('"')
                .and_then(|v| v.strip_suffix('"'))
                .or_else(|| value.strip_prefix('\'').and_then(|v| v.strip_suffix('\'')))
                .unwrap_or(value);
            Ok(AttrTest::Equals(name.to_string(), unquoted.to_string()))
        }
    }
}
