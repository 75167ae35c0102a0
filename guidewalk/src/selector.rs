use crate::element::PageElement;
use crate::errors::GuideError;

/// Comparison applied by an attribute test such as `[href^="/connections"]`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AttributeOperator {
    /// `[name]`
    Exists,
    /// `[name=value]`
    Equals,
    /// `[name*=value]`
    Contains,
    /// `[name^=value]`
    StartsWith,
    /// `[name$=value]`
    EndsWith,
    /// `[name~=value]`, whitespace separated word match
    Word,
}

impl AttributeOperator {
    fn test(&self, actual: &str, expected: &str) -> bool {
        match self {
            AttributeOperator::Exists => true,
            AttributeOperator::Equals => actual == expected,
            AttributeOperator::Contains => actual.contains(expected),
            AttributeOperator::StartsWith => actual.starts_with(expected),
            AttributeOperator::EndsWith => actual.ends_with(expected),
            AttributeOperator::Word => actual.split_whitespace().any(|w| w == expected),
        }
    }
}

/// Represents ways to locate an element on the page
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Selector {
    /// `*`
    Any,
    /// Select by tag name (case-insensitive)
    Tag(String),
    /// Select by `id` attribute
    Id(String),
    /// Select by class name
    Class(String),
    /// Select by attribute test
    Attribute {
        name: String,
        op: AttributeOperator,
        value: String,
    },
    /// Element whose full descendant text contains the given text (case-insensitive)
    Contains(String),
    /// Element with at least one descendant matching the inner selector
    Has(Box<Selector>),
    /// Element not matching the inner selector
    Not(Box<Selector>),
    /// All parts must match the same element
    Compound(Vec<Selector>),
    /// `ancestor subject`
    Descendant {
        ancestor: Box<Selector>,
        subject: Box<Selector>,
    },
    /// `parent > subject`
    Child {
        parent: Box<Selector>,
        subject: Box<Selector>,
    },
    /// `a, b`
    Or(Vec<Selector>),
    /// Represents an invalid selector string, with a reason.
    Invalid(String),
}

impl std::fmt::Display for Selector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{self:?}")
    }
}

impl From<&str> for Selector {
    fn from(s: &str) -> Self {
        match parse_selector_list(s) {
            Ok(selector) => selector,
            Err(reason) => Selector::Invalid(format!("{reason} in selector \"{s}\"")),
        }
    }
}

impl From<String> for Selector {
    fn from(s: String) -> Self {
        Selector::from(s.as_str())
    }
}

impl From<&String> for Selector {
    fn from(s: &String) -> Self {
        Selector::from(s.as_str())
    }
}

impl Selector {
    /// Parse a selector, turning malformed input into an error instead of `Selector::Invalid`.
    pub fn parse(s: &str) -> Result<Selector, GuideError> {
        match Selector::from(s) {
            Selector::Invalid(reason) => Err(GuideError::InvalidSelector(reason)),
            selector if !selector.is_valid() => Err(GuideError::InvalidSelector(format!(
                "selector \"{s}\" contains an invalid part"
            ))),
            selector => Ok(selector),
        }
    }

    /// True when no part of this selector is `Invalid`.
    pub fn is_valid(&self) -> bool {
        match self {
            Selector::Invalid(_) => false,
            Selector::Has(inner) | Selector::Not(inner) => inner.is_valid(),
            Selector::Compound(parts) | Selector::Or(parts) => parts.iter().all(Selector::is_valid),
            Selector::Descendant { ancestor, subject } => ancestor.is_valid() && subject.is_valid(),
            Selector::Child { parent, subject } => parent.is_valid() && subject.is_valid(),
            _ => true,
        }
    }

    pub fn matches(&self, element: &PageElement) -> bool {
        match self {
            Selector::Any => true,
            Selector::Tag(tag) => element.tag_name().eq_ignore_ascii_case(tag),
            Selector::Id(id) => element.attribute("id").as_deref() == Some(id.as_str()),
            Selector::Class(class) => element.has_class(class),
            Selector::Attribute { name, op, value } => element
                .attribute(name)
                .is_some_and(|actual| op.test(&actual, value)),
            Selector::Contains(text) => element
                .text_content()
                .to_lowercase()
                .contains(&text.to_lowercase()),
            Selector::Has(inner) => element.descendants().iter().any(|d| inner.matches(d)),
            Selector::Not(inner) => !inner.matches(element),
            Selector::Compound(parts) => parts.iter().all(|p| p.matches(element)),
            Selector::Descendant { ancestor, subject } => {
                subject.matches(element) && element.ancestors().iter().any(|a| ancestor.matches(a))
            }
            Selector::Child { parent, subject } => {
                subject.matches(element)
                    && element.parent().is_some_and(|p| parent.matches(&p))
            }
            Selector::Or(alternatives) => alternatives.iter().any(|s| s.matches(element)),
            Selector::Invalid(_) => false,
        }
    }

    /// Value of an `[name="value"]` test on the rightmost element of this selector.
    ///
    /// Used to recover declared identifiers such as `data-testid` or `href`
    /// from a target selector.
    pub fn attribute_value(&self, name: &str) -> Option<&str> {
        match self {
            Selector::Attribute {
                name: attr,
                op: AttributeOperator::Equals,
                value,
            } if attr == name => Some(value.as_str()),
            Selector::Compound(parts) => parts.iter().find_map(|p| p.attribute_value(name)),
            Selector::Descendant { subject, .. } | Selector::Child { subject, .. } => {
                subject.attribute_value(name)
            }
            Selector::Or(alternatives) if alternatives.len() == 1 => {
                alternatives[0].attribute_value(name)
            }
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Combinator {
    Descendant,
    Child,
}

fn parse_selector_list(input: &str) -> Result<Selector, String> {
    let input = input.trim();
    if input.is_empty() {
        return Err("empty selector".to_string());
    }

    let alternatives = split_top_level(input, ',')?;
    if alternatives.len() == 1 {
        return parse_complex(alternatives[0]);
    }

    let parsed = alternatives
        .into_iter()
        .map(parse_complex)
        .collect::<Result<Vec<_>, _>>()?;
    Ok(Selector::Or(parsed))
}

/// Split on `separator` outside of quotes, brackets and parentheses.
fn split_top_level(input: &str, separator: char) -> Result<Vec<&str>, String> {
    let mut parts = Vec::new();
    let mut depth = 0i32;
    let mut quote: Option<char> = None;
    let mut start = 0;

    for (i, c) in input.char_indices() {
        if let Some(q) = quote {
            if c == q {
                quote = None;
            }
            continue;
        }
        match c {
            '"' | '\'' => quote = Some(c),
            '(' | '[' => depth += 1,
            ')' | ']' => {
                depth -= 1;
                if depth < 0 {
                    return Err(format!("unbalanced '{c}'"));
                }
            }
            c if c == separator && depth == 0 => {
                let part = input[start..i].trim();
                if part.is_empty() {
                    return Err("empty selector in list".to_string());
                }
                parts.push(part);
                start = i + c.len_utf8();
            }
            _ => {}
        }
    }

    if quote.is_some() {
        return Err("unterminated string".to_string());
    }
    if depth != 0 {
        return Err("unbalanced brackets".to_string());
    }

    let last = input[start..].trim();
    if last.is_empty() {
        return Err("empty selector in list".to_string());
    }
    parts.push(last);
    Ok(parts)
}

fn parse_complex(input: &str) -> Result<Selector, String> {
    let mut parts: Vec<(Combinator, String)> = Vec::new();
    let mut current = String::new();
    let mut pending = Combinator::Descendant;
    let mut depth = 0i32;
    let mut quote: Option<char> = None;

    for c in input.chars() {
        if let Some(q) = quote {
            current.push(c);
            if c == q {
                quote = None;
            }
            continue;
        }
        match c {
            '"' | '\'' => {
                quote = Some(c);
                current.push(c);
            }
            '(' | '[' => {
                depth += 1;
                current.push(c);
            }
            ')' | ']' => {
                depth -= 1;
                current.push(c);
            }
            c if depth == 0 && (c.is_whitespace() || c == '>') => {
                if !current.is_empty() {
                    parts.push((pending, std::mem::take(&mut current)));
                    pending = Combinator::Descendant;
                }
                if c == '>' {
                    if parts.is_empty() || pending == Combinator::Child {
                        return Err("misplaced '>' combinator".to_string());
                    }
                    pending = Combinator::Child;
                }
            }
            _ => current.push(c),
        }
    }

    if !current.is_empty() {
        parts.push((pending, current));
    } else if pending == Combinator::Child {
        return Err("dangling '>' combinator".to_string());
    }

    let mut iter = parts.into_iter();
    let (_, first) = iter.next().ok_or_else(|| "empty selector".to_string())?;
    let mut selector = parse_compound(&first)?;

    for (combinator, raw) in iter {
        let subject = Box::new(parse_compound(&raw)?);
        selector = match combinator {
            Combinator::Descendant => Selector::Descendant {
                ancestor: Box::new(selector),
                subject,
            },
            Combinator::Child => Selector::Child {
                parent: Box::new(selector),
                subject,
            },
        };
    }

    Ok(selector)
}

fn is_ident_char(c: char) -> bool {
    c.is_alphanumeric() || c == '-' || c == '_'
}

fn read_ident(chars: &[char], pos: &mut usize) -> String {
    let start = *pos;
    while *pos < chars.len() && is_ident_char(chars[*pos]) {
        *pos += 1;
    }
    chars[start..*pos].iter().collect()
}

/// Read from an opening bracket up to its matching close, returning the inner text.
fn read_balanced(chars: &[char], pos: &mut usize, open: char, close: char) -> Result<String, String> {
    debug_assert_eq!(chars.get(*pos), Some(&open));
    *pos += 1;
    let start = *pos;
    let mut depth = 1;
    let mut quote: Option<char> = None;

    while *pos < chars.len() {
        let c = chars[*pos];
        if let Some(q) = quote {
            if c == q {
                quote = None;
            }
        } else if c == '"' || c == '\'' {
            quote = Some(c);
        } else if c == open {
            depth += 1;
        } else if c == close {
            depth -= 1;
            if depth == 0 {
                let inner = chars[start..*pos].iter().collect();
                *pos += 1;
                return Ok(inner);
            }
        }
        *pos += 1;
    }

    Err(format!("missing '{close}'"))
}

fn unquote(s: &str) -> String {
    let s = s.trim();
    let bytes = s.as_bytes();
    if bytes.len() >= 2 {
        let first = bytes[0];
        let last = bytes[bytes.len() - 1];
        if (first == b'"' || first == b'\'') && first == last {
            return s[1..s.len() - 1].to_string();
        }
    }
    s.to_string()
}

fn parse_compound(input: &str) -> Result<Selector, String> {
    let chars: Vec<char> = input.chars().collect();
    let mut pos = 0;
    let mut items = Vec::new();

    while pos < chars.len() {
        match chars[pos] {
            '*' => {
                pos += 1;
                items.push(Selector::Any);
            }
            '#' => {
                pos += 1;
                let id = read_ident(&chars, &mut pos);
                if id.is_empty() {
                    return Err("empty id".to_string());
                }
                items.push(Selector::Id(id));
            }
            '.' => {
                pos += 1;
                let class = read_ident(&chars, &mut pos);
                if class.is_empty() {
                    return Err("empty class name".to_string());
                }
                items.push(Selector::Class(class));
            }
            '[' => {
                let inner = read_balanced(&chars, &mut pos, '[', ']')?;
                items.push(parse_attribute(&inner)?);
            }
            ':' => {
                pos += 1;
                let name = read_ident(&chars, &mut pos).to_lowercase();
                if chars.get(pos) != Some(&'(') {
                    return Err(format!("unsupported pseudo-class ':{name}'"));
                }
                let argument = read_balanced(&chars, &mut pos, '(', ')')?;
                let pseudo = match name.as_str() {
                    "contains" => Selector::Contains(unquote(&argument)),
                    "has" => Selector::Has(Box::new(parse_selector_list(&argument)?)),
                    "not" => Selector::Not(Box::new(parse_selector_list(&argument)?)),
                    other => return Err(format!("unsupported pseudo-class ':{other}'")),
                };
                items.push(pseudo);
            }
            c if is_ident_char(c) && items.is_empty() => {
                let tag = read_ident(&chars, &mut pos);
                items.push(Selector::Tag(tag.to_lowercase()));
            }
            c => return Err(format!("unexpected character '{c}'")),
        }
    }

    match items.len() {
        0 => Err("empty compound selector".to_string()),
        1 => Ok(items.remove(0)),
        _ => Ok(Selector::Compound(items)),
    }
}

fn parse_attribute(inner: &str) -> Result<Selector, String> {
    let inner = inner.trim();
    let Some(eq) = inner.find('=') else {
        if inner.is_empty() || !inner.chars().all(is_ident_char) {
            return Err(format!("invalid attribute test '[{inner}]'"));
        }
        return Ok(Selector::Attribute {
            name: inner.to_string(),
            op: AttributeOperator::Exists,
            value: String::new(),
        });
    };

    let (name_end, op) = match inner[..eq].chars().last() {
        Some('*') => (eq - 1, AttributeOperator::Contains),
        Some('^') => (eq - 1, AttributeOperator::StartsWith),
        Some('$') => (eq - 1, AttributeOperator::EndsWith),
        Some('~') => (eq - 1, AttributeOperator::Word),
        _ => (eq, AttributeOperator::Equals),
    };

    let name = inner[..name_end].trim();
    if name.is_empty() || !name.chars().all(is_ident_char) {
        return Err(format!("invalid attribute name in '[{inner}]'"));
    }

    Ok(Selector::Attribute {
        name: name.to_string(),
        op,
        value: unquote(&inner[eq + 1..]),
    })
}
