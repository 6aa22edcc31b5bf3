//! Media types, media ranges and content-negotiation scoring
//!
//! A handler declares what it consumes and produces as `MediaType`s; a
//! request carries a `Content-Type` (a type) and `Accept` entries (ranges
//! with a q-value). `score` computes how well a handler type serves a
//! request range, and the dispatcher picks the best-scoring handler.

use std::fmt;

quick_error! {
    #[derive(Debug, Clone, PartialEq)]
    pub enum MediaTypeError {
        Syntax(msg: &'static str) {
            description("media type syntax error")
            display("media type syntax error: {}", msg)
        }
        BadQValue {
            description("q-value outside 0.0..=1.0")
        }
    }
}

/// A parsed `type/subtype (; name=value)*`.
///
/// Type, subtype and parameter names are lowercased; parameter values keep
/// their case except `charset` of a `text` type.
#[derive(Debug, Clone, PartialEq)]
pub struct MediaType {
    ttype: String,
    subtype: String,
    params: Vec<(String, String)>,
}

/// A media type plus the q-value it carried in an `Accept` entry.
#[derive(Debug, Clone, PartialEq)]
pub struct MediaRange {
    media: MediaType,
    q: f32,
}

/// How compatible a handler's media type is with a requested range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Score {
    Nope,
    Works,
    Perfect,
}

impl MediaType {
    pub fn new(ttype: &str, subtype: &str) -> MediaType {
        MediaType {
            ttype: ttype.to_ascii_lowercase(),
            subtype: subtype.to_ascii_lowercase(),
            params: Vec::new(),
        }
    }

    pub fn with_param(mut self, name: &str, value: &str) -> MediaType {
        let name = name.to_ascii_lowercase();
        let value = if self.ttype == "text" && name == "charset" {
            value.to_ascii_lowercase()
        } else {
            value.to_string()
        };
        self.params.push((name, value));
        self
    }

    /// Parse a media type; a trailing q parameter, if any, is dropped.
    pub fn parse(s: &str) -> Result<MediaType, MediaTypeError> {
        parse_inner(s).map(|(media, _)| media)
    }

    pub fn ttype(&self) -> &str {
        &self.ttype
    }

    pub fn subtype(&self) -> &str {
        &self.subtype
    }

    pub fn params(&self) -> &[(String, String)] {
        &self.params
    }

    pub fn param(&self, name: &str) -> Option<&str> {
        let name = name.to_ascii_lowercase();
        self.params.iter()
            .find(|&&(ref n, _)| *n == name)
            .map(|&(_, ref v)| &v[..])
    }

    pub fn has_wildcard(&self) -> bool {
        self.ttype == "*" || self.subtype == "*"
    }
}

impl fmt::Display for MediaType {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}/{}", self.ttype, self.subtype)?;
        for &(ref n, ref v) in &self.params {
            write!(f, "; {}={}", n, v)?;
        }
        Ok(())
    }
}

impl MediaRange {
    /// Parse an `Accept` entry; q defaults to 1.0.
    pub fn parse(s: &str) -> Result<MediaRange, MediaTypeError> {
        let (media, q) = parse_inner(s)?;
        Ok(MediaRange { media, q: q.unwrap_or(1.0) })
    }

    pub fn from_type(media: MediaType) -> MediaRange {
        MediaRange { media, q: 1.0 }
    }

    pub fn media(&self) -> &MediaType {
        &self.media
    }

    pub fn q(&self) -> f32 {
        self.q
    }
}

fn parse_inner(s: &str)
    -> Result<(MediaType, Option<f32>), MediaTypeError>
{
    let s = s.trim();
    let (type_part, rest) = match s.find(';') {
        Some(pos) => (&s[..pos], &s[pos + 1..]),
        None => (s, ""),
    };
    let type_part = type_part.trim();
    let slash = type_part.find('/')
        .ok_or(MediaTypeError::Syntax("expected type/subtype"))?;
    let (t, sub) = (&type_part[..slash], &type_part[slash + 1..]);
    if sub.contains('/') {
        return Err(MediaTypeError::Syntax("more than one '/'"));
    }
    if t.is_empty() || sub.is_empty() {
        return Err(MediaTypeError::Syntax("empty type or subtype"));
    }
    if t == "*" && sub != "*" {
        return Err(MediaTypeError::Syntax(
            "wildcard type requires wildcard subtype"));
    }
    if t.contains('*') && t != "*" || sub.contains('*') && sub != "*" {
        return Err(MediaTypeError::Syntax(
            "'*' is only allowed as a whole type or subtype"));
    }
    let mut media = MediaType::new(t, sub);
    let mut q = None;

    for param in split_params(rest) {
        let param = param.trim();
        if param.is_empty() {
            continue;
        }
        let eq = param.find('=')
            .ok_or(MediaTypeError::Syntax("parameter without '='"))?;
        let name = param[..eq].trim().to_ascii_lowercase();
        let value = unquote(param[eq + 1..].trim())?;
        if name == "q" {
            let parsed = value.parse::<f32>()
                .map_err(|_| MediaTypeError::BadQValue)?;
            if !(0.0..=1.0).contains(&parsed) {
                return Err(MediaTypeError::BadQValue);
            }
            q = Some(parsed);
            // everything after q is an ignored extension parameter
            break;
        }
        media = media.with_param(&name, &value);
    }
    Ok((media, q))
}

/// Parse a comma-separated `Accept` header value into ranges.
pub fn parse_accept(value: &str)
    -> Result<Vec<MediaRange>, MediaTypeError>
{
    let mut out = Vec::new();
    for entry in split_on(value, ',') {
        let entry = entry.trim();
        if entry.is_empty() {
            continue;
        }
        out.push(MediaRange::parse(entry)?);
    }
    Ok(out)
}

/// Split a parameter list on `;`, not looking inside quoted strings.
fn split_params(s: &str) -> Vec<&str> {
    split_on(s, ';')
}

fn split_on(s: &str, sep: char) -> Vec<&str> {
    let mut out = Vec::new();
    let mut start = 0;
    let mut quoted = false;
    let mut escaped = false;
    for (idx, ch) in s.char_indices() {
        match ch {
            _ if escaped => escaped = false,
            '\\' if quoted => escaped = true,
            '"' => quoted = !quoted,
            ch if ch == sep && !quoted => {
                out.push(&s[start..idx]);
                start = idx + 1;
            }
            _ => {}
        }
    }
    out.push(&s[start..]);
    out
}

fn unquote(s: &str) -> Result<String, MediaTypeError> {
    if !s.starts_with('"') {
        return Ok(s.to_string());
    }
    if s.len() < 2 || !s.ends_with('"') {
        return Err(MediaTypeError::Syntax("unterminated quoted string"));
    }
    let inner = &s[1..s.len() - 1];
    let mut out = String::with_capacity(inner.len());
    let mut escaped = false;
    for ch in inner.chars() {
        if escaped {
            out.push(ch);
            escaped = false;
        } else if ch == '\\' {
            escaped = true;
        } else {
            out.push(ch);
        }
    }
    if escaped {
        return Err(MediaTypeError::Syntax("dangling escape"));
    }
    Ok(out)
}

fn params_equal(a: &[(String, String)], b: &[(String, String)]) -> bool {
    a.len() == b.len() &&
        a.iter().all(|&(ref n, ref v)| {
            b.iter().any(|&(ref n2, ref v2)| n == n2 && v == v2)
        })
}

/// Compatibility of handler type `h` with requested range `r`.
pub fn score(h: &MediaType, r: &MediaRange) -> Score {
    let rm = r.media();
    let type_wild = h.ttype == "*" || rm.ttype == "*";
    let subtype_wild = h.subtype == "*" || rm.subtype == "*";
    if !type_wild && h.ttype != rm.ttype {
        return Score::Nope;
    }
    if !subtype_wild && h.subtype != rm.subtype {
        return Score::Nope;
    }
    if r.q() <= 0.0 {
        return Score::Nope;
    }
    if !h.params.is_empty() && !params_equal(&h.params, &rm.params) {
        return Score::Nope;
    }
    let all_equal = !type_wild && !subtype_wild
        && params_equal(&h.params, &rm.params);
    if all_equal && r.q() >= 1.0 {
        Score::Perfect
    } else {
        Score::Works
    }
}

/// Best score of `h` against any of the ranges, with the winning q-value
/// for tie-breaking. No ranges at all counts as `*/*`.
pub fn best_score(h: &MediaType, ranges: &[MediaRange]) -> (Score, f32) {
    if ranges.is_empty() {
        return (score(h, &MediaRange::from_type(MediaType::new("*", "*"))),
                1.0);
    }
    let mut best = (Score::Nope, 0.0);
    for r in ranges {
        let s = score(h, r);
        if s > best.0 || (s == best.0 && r.q() > best.1) {
            best = (s, r.q());
        }
    }
    best
}
