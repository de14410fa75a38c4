use std::fmt::Display;
use std::ops::Bound;

use headers::Header;
use http::header::{HeaderName, HeaderValue};

use crate::ls::LockTimeout;

lazy_static! {
    static ref DEPTH: HeaderName = HeaderName::from_static("depth");
    static ref TIMEOUT: HeaderName = HeaderName::from_static("timeout");
    static ref OVERWRITE: HeaderName = HeaderName::from_static("overwrite");
    static ref LOCK_TOKEN: HeaderName = HeaderName::from_static("lock-token");
    static ref IF: HeaderName = HeaderName::from_static("if");
}

fn invalid() -> headers::Error {
    headers::Error::invalid()
}

fn one<'i, I>(values: &mut I) -> Result<&'i HeaderValue, headers::Error>
where
    I: Iterator<Item = &'i HeaderValue>,
{
    let v = values.next().ok_or_else(invalid)?;
    if values.next().is_some() {
        return Err(invalid());
    }
    Ok(v)
}

fn map_invalid(_e: impl std::error::Error) -> headers::Error {
    headers::Error::invalid()
}

fn encode_str<E: Extend<HeaderValue>>(values: &mut E, s: impl Display) {
    if let Ok(value) = HeaderValue::from_str(&s.to_string()) {
        values.extend(std::iter::once(value));
    }
}

macro_rules! header {
    ($tname:ident, $hname:ident, $sname:expr) => {
        lazy_static! {
            pub static ref $hname: HeaderName = HeaderName::from_static($sname);
        }

        #[derive(Debug, Clone, PartialEq, Eq)]
        pub struct $tname(pub String);

        impl Header for $tname {
            fn name() -> &'static HeaderName {
                &$hname
            }

            fn decode<'i, I>(values: &mut I) -> Result<Self, headers::Error>
            where
                I: Iterator<Item = &'i HeaderValue>,
            {
                one(values)?
                    .to_str()
                    .map(|x| $tname(x.to_owned()))
                    .map_err(map_invalid)
            }

            fn encode<E>(&self, values: &mut E)
            where
                E: Extend<HeaderValue>,
            {
                encode_str(values, &self.0);
            }
        }
    };
}

header!(ContentType, CONTENT_TYPE, "content-type");
header!(ContentLanguage, CONTENT_LANGUAGE, "content-language");
header!(Destination, DESTINATION, "destination");
header!(XLitmus, X_LITMUS, "x-litmus");

/// Depth: header.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Depth {
    Zero,
    One,
    Infinity,
}

impl Header for Depth {
    fn name() -> &'static HeaderName {
        &DEPTH
    }

    fn decode<'i, I>(values: &mut I) -> Result<Self, headers::Error>
    where
        I: Iterator<Item = &'i HeaderValue>,
    {
        let value = one(values)?;
        match value.as_bytes() {
            b"0" => Ok(Depth::Zero),
            b"1" => Ok(Depth::One),
            v if v.eq_ignore_ascii_case(b"infinity") => Ok(Depth::Infinity),
            _ => Err(invalid()),
        }
    }

    fn encode<E>(&self, values: &mut E)
    where
        E: Extend<HeaderValue>,
    {
        let value = match *self {
            Depth::Zero => "0",
            Depth::One => "1",
            Depth::Infinity => "infinity",
        };
        values.extend(std::iter::once(HeaderValue::from_static(value)));
    }
}

/// Timeout: header. All listed values, in order of preference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Timeout(pub Vec<LockTimeout>);

impl Header for Timeout {
    fn name() -> &'static HeaderName {
        &TIMEOUT
    }

    fn decode<'i, I>(values: &mut I) -> Result<Self, headers::Error>
    where
        I: Iterator<Item = &'i HeaderValue>,
    {
        let value = one(values)?.to_str().map_err(map_invalid)?;
        let mut v = Vec::new();
        for word in value.split(',').map(|w| w.trim()) {
            if word.eq_ignore_ascii_case("infinite") {
                v.push(LockTimeout::Infinite);
            } else if let Some(num) = word
                .strip_prefix("Second-")
                .or_else(|| word.strip_prefix("second-"))
            {
                // unparsable values are skipped, not fatal.
                if let Ok(secs) = num.parse::<u64>() {
                    v.push(LockTimeout::Seconds(secs));
                }
            }
        }
        if v.is_empty() {
            return Err(invalid());
        }
        Ok(Timeout(v))
    }

    fn encode<E>(&self, values: &mut E)
    where
        E: Extend<HeaderValue>,
    {
        let value = self
            .0
            .iter()
            .map(|t| t.to_header_value())
            .collect::<Vec<_>>()
            .join(", ");
        encode_str(values, value);
    }
}

/// Overwrite: header.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct Overwrite(pub bool);

impl Header for Overwrite {
    fn name() -> &'static HeaderName {
        &OVERWRITE
    }

    fn decode<'i, I>(values: &mut I) -> Result<Self, headers::Error>
    where
        I: Iterator<Item = &'i HeaderValue>,
    {
        match one(values)?.as_bytes() {
            b"T" | b"t" => Ok(Overwrite(true)),
            b"F" | b"f" => Ok(Overwrite(false)),
            _ => Err(invalid()),
        }
    }

    fn encode<E>(&self, values: &mut E)
    where
        E: Extend<HeaderValue>,
    {
        let value = if self.0 { "T" } else { "F" };
        values.extend(std::iter::once(HeaderValue::from_static(value)));
    }
}

/// Lock-Token: header. The token without the angle brackets.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockToken(pub String);

impl Header for LockToken {
    fn name() -> &'static HeaderName {
        &LOCK_TOKEN
    }

    fn decode<'i, I>(values: &mut I) -> Result<Self, headers::Error>
    where
        I: Iterator<Item = &'i HeaderValue>,
    {
        let s = one(values)?.to_str().map_err(map_invalid)?.trim();
        match s.strip_prefix('<').and_then(|s| s.strip_suffix('>')) {
            Some(t) if !t.is_empty() => Ok(LockToken(t.to_string())),
            _ => Err(invalid()),
        }
    }

    fn encode<E>(&self, values: &mut E)
    where
        E: Extend<HeaderValue>,
    {
        encode_str(values, format!("<{}>", self.0));
    }
}

/// One condition of an `If:` header list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IfCondition {
    StateToken(String),
    ETag(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IfItem {
    pub not: bool,
    pub condition: IfCondition,
}

/// One parenthesized list, optionally tagged with a resource.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IfList {
    pub resource_tag: Option<String>,
    pub conditions: Vec<IfItem>,
}

/// If: header (RFC4918 10.4).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct If(pub Vec<IfList>);

impl If {
    /// The state tokens that are asserted (not negated) anywhere in the header.
    pub fn tokens(&self) -> Vec<String> {
        self.0
            .iter()
            .flat_map(|l| l.conditions.iter())
            .filter(|c| !c.not)
            .filter_map(|c| match &c.condition {
                IfCondition::StateToken(t) => Some(t.clone()),
                IfCondition::ETag(_) => None,
            })
            .collect()
    }
}

// read up to the closing delimiter, return the contents.
fn read_until(chars: &mut std::iter::Peekable<std::str::Chars>, end: char) -> Option<String> {
    let mut s = String::new();
    for c in chars.by_ref() {
        if c == end {
            return Some(s);
        }
        s.push(c);
    }
    None
}

fn skip_ws(chars: &mut std::iter::Peekable<std::str::Chars>) {
    while matches!(chars.peek(), Some(c) if c.is_whitespace()) {
        chars.next();
    }
}

fn parse_if(s: &str) -> Option<If> {
    let mut lists = Vec::new();
    let mut chars = s.chars().peekable();
    let mut tag = None;
    loop {
        skip_ws(&mut chars);
        match chars.next() {
            None => break,
            Some('<') => tag = Some(read_until(&mut chars, '>')?),
            Some('(') => {
                let mut conditions = Vec::new();
                let mut not = false;
                loop {
                    skip_ws(&mut chars);
                    match chars.next()? {
                        ')' => break,
                        '<' => {
                            let token = read_until(&mut chars, '>')?;
                            conditions.push(IfItem {
                                not,
                                condition: IfCondition::StateToken(token),
                            });
                            not = false;
                        }
                        '[' => {
                            let etag = read_until(&mut chars, ']')?;
                            conditions.push(IfItem {
                                not,
                                condition: IfCondition::ETag(etag),
                            });
                            not = false;
                        }
                        'N' | 'n' => {
                            let rest: String = chars.by_ref().take(2).collect();
                            if !rest.eq_ignore_ascii_case("ot") {
                                return None;
                            }
                            not = true;
                        }
                        _ => return None,
                    }
                }
                if conditions.is_empty() {
                    return None;
                }
                lists.push(IfList {
                    resource_tag: tag.clone(),
                    conditions,
                });
            }
            Some(_) => return None,
        }
    }
    if lists.is_empty() {
        return None;
    }
    Some(If(lists))
}

impl Header for If {
    fn name() -> &'static HeaderName {
        &IF
    }

    fn decode<'i, I>(values: &mut I) -> Result<Self, headers::Error>
    where
        I: Iterator<Item = &'i HeaderValue>,
    {
        let mut lists = Vec::new();
        for value in values {
            let s = value.to_str().map_err(map_invalid)?;
            let mut parsed = parse_if(s).ok_or_else(invalid)?;
            lists.append(&mut parsed.0);
        }
        if lists.is_empty() {
            return Err(invalid());
        }
        Ok(If(lists))
    }

    fn encode<E>(&self, values: &mut E)
    where
        E: Extend<HeaderValue>,
    {
        let mut s = String::new();
        for list in &self.0 {
            if let Some(tag) = &list.resource_tag {
                s.push_str(&format!("<{tag}> "));
            }
            s.push('(');
            let conds: Vec<String> = list
                .conditions
                .iter()
                .map(|c| {
                    let not = if c.not { "Not " } else { "" };
                    match &c.condition {
                        IfCondition::StateToken(t) => format!("{not}<{t}>"),
                        IfCondition::ETag(e) => format!("{not}[{e}]"),
                    }
                })
                .collect();
            s.push_str(&conds.join(" "));
            s.push_str(") ");
        }
        encode_str(values, s.trim_end());
    }
}

/// One byte range from a `Range: bytes=...` header.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ByteRange {
    /// `first-last`, inclusive.
    FromTo(u64, u64),
    /// `first-`
    From(u64),
    /// `-suffix`: the last N bytes.
    Last(u64),
}

impl ByteRange {
    /// One `(start, end)` pair of a `headers::Range`. A missing start
    /// only comes from the suffix form `-N`.
    pub fn from_bounds((start, end): (Bound<u64>, Bound<u64>)) -> Option<ByteRange> {
        match (start, end) {
            (Bound::Included(first), Bound::Included(last)) if last >= first => {
                Some(ByteRange::FromTo(first, last))
            }
            (Bound::Included(first), Bound::Unbounded) => Some(ByteRange::From(first)),
            (Bound::Unbounded, Bound::Included(n)) => Some(ByteRange::Last(n)),
            _ => None,
        }
    }

    /// The inclusive (first, last) byte positions of this range in content
    /// of length `len`, or `None` if it cannot be satisfied.
    pub fn bounds(&self, len: u64) -> Option<(u64, u64)> {
        if len == 0 {
            return None;
        }
        let last = len - 1;
        match *self {
            ByteRange::FromTo(first, _) | ByteRange::From(first) if first > last => None,
            ByteRange::FromTo(first, end) => Some((first, end.min(last))),
            ByteRange::From(first) => Some((first, last)),
            ByteRange::Last(0) => None,
            // a suffix longer than the content selects all of it.
            ByteRange::Last(n) => Some((len.saturating_sub(n), last)),
        }
    }
}

/// The byte ranges of a `Range:` header, `None` if one of them is malformed.
pub fn byte_ranges(range: &headers::Range) -> Option<Vec<ByteRange>> {
    range.iter().map(ByteRange::from_bounds).collect()
}
