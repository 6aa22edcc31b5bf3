//! Header storage and header-value helpers
//!
//! Header names compare case-insensitively, values are kept as the raw byte
//! sequences they arrived as (casing preserved), and a name may map to any
//! number of values in input order.

/// An ordered, case-insensitive multimap of header fields.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Headers {
    entries: Vec<(String, Vec<u8>)>,
}

impl Headers {
    pub fn new() -> Headers {
        Headers { entries: Vec::new() }
    }

    /// Append a field, keeping input order.
    pub fn add<N, V>(&mut self, name: N, value: V)
        where N: Into<String>, V: Into<Vec<u8>>,
    {
        self.entries.push((name.into(), value.into()));
    }

    /// First value of the field, if any.
    pub fn get(&self, name: &str) -> Option<&[u8]> {
        self.entries.iter()
            .find(|&&(ref n, _)| n.eq_ignore_ascii_case(name))
            .map(|&(_, ref v)| &v[..])
    }

    /// First value of the field as UTF-8, if any.
    pub fn get_str(&self, name: &str) -> Option<&str> {
        self.get(name).and_then(|v| ::std::str::from_utf8(v).ok())
    }

    /// All values of the field, in input order.
    pub fn all<'x>(&'x self, name: &'x str) -> impl Iterator<Item=&'x [u8]> + 'x {
        self.entries.iter()
            .filter(move |&&(ref n, _)| n.eq_ignore_ascii_case(name))
            .map(|&(_, ref v)| &v[..])
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    pub fn count(&self, name: &str) -> usize {
        self.all(name).count()
    }

    /// Number of fields (not distinct names).
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item=(&str, &[u8])> {
        self.entries.iter().map(|&(ref n, ref v)| (&n[..], &v[..]))
    }
}

fn is_ws(ch: u8) -> bool {
    matches!(ch, b'\r' | b'\n' | b' ' | b'\t')
}

/// Strip surrounding whitespace off a header value.
pub fn trimmed(val: &[u8]) -> &[u8] {
    let start = val.iter().position(|&ch| !is_ws(ch)).unwrap_or(val.len());
    let end = val.iter().rposition(|&ch| !is_ws(ch)).map(|p| p + 1)
        .unwrap_or(start);
    &val[start..end]
}

/// Case-insensitive comparison of a whole (trimmed) header value.
pub fn eq_token(val: &[u8], token: &str) -> bool {
    let val = trimmed(val);
    val.len() == token.len() &&
        val.iter().zip(token.as_bytes())
            .all(|(a, b)| a.eq_ignore_ascii_case(b))
}

/// Look for a token in a comma-separated header value.
pub fn has_token(val: &[u8], token: &str) -> bool {
    val.split(|&ch| ch == b',').any(|part| eq_token(part, token))
}

/// Last coding of a (possibly comma-separated) `Transfer-Encoding` value.
pub fn last_coding(val: &[u8]) -> &[u8] {
    val.split(|&ch| ch == b',').last().map(trimmed).unwrap_or(b"")
}

pub fn is_close(val: &[u8]) -> bool {
    has_token(val, "close")
}

pub fn is_chunked(val: &[u8]) -> bool {
    eq_token(val, "chunked")
}

pub fn is_continue(val: &[u8]) -> bool {
    eq_token(val, "100-continue")
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn multimap_order_and_case() {
        let mut h = Headers::new();
        h.add("Foo", &b""[..]);
        h.add("foo", &b"world"[..]);
        h.add("FOO", &b"again"[..]);
        h.add("Bar", &b"1"[..]);
        assert_eq!(h.get("foo"), Some(&b""[..]));
        assert_eq!(h.count("Foo"), 3);
        assert_eq!(h.all("fOo").collect::<Vec<_>>(),
                   vec![&b""[..], &b"world"[..], &b"again"[..]]);
        assert_eq!(h.len(), 4);
        assert!(h.contains("bar"));
        assert!(!h.contains("baz"));
    }

    #[test]
    fn test_chunked() {
        assert!(is_chunked(b"chunked"));
        assert!(is_chunked(b"Chunked"));
        assert!(is_chunked(b"chuNKED"));
        assert!(is_chunked(b"   CHUNKED  "));
        assert!(!is_chunked(b"   CHUNKED 1 "));
        assert!(!is_chunked(b"gzip, chunked"));
    }

    #[test]
    fn test_close() {
        assert!(is_close(b"close"));
        assert!(is_close(b" CLOSE"));
        assert!(is_close(b"keep-alive, close"));
        assert!(!is_close(b"Close  1 "));
        assert!(!is_close(b" xclose   "));
    }

    #[test]
    fn test_continue() {
        assert!(is_continue(b"100-continue"));
        assert!(is_continue(b"  100-CONTINUE"));
        assert!(!is_continue(b"100-continue y  "));
        assert!(!is_continue(b"100-coztinue   "));
    }

    #[test]
    fn test_last_coding() {
        assert_eq!(last_coding(b"chunked"), b"chunked");
        assert_eq!(last_coding(b"gzip, chunked"), b"chunked");
        assert_eq!(last_coding(b"chunked, gzip"), b"gzip");
    }
}
