//! Utility module to handle the path part of an URL as a filesystem path.
//!
use std::error::Error;
use std::fmt;
use std::path::{Path, PathBuf};

use percent_encoding as pct;

use crate::DavError;

// Encode all non-unreserved characters, except '/'.
// See RFC3986, and https://en.wikipedia.org/wiki/Percent-encoding .
const PATH_ENCODE_SET: &pct::AsciiSet = &pct::NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'~')
    .remove(b'/');

/// URL path, with hidden prefix.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct DavPath {
    fullpath: Vec<u8>,
    pfxlen: Option<usize>,
}

/// Error returned by some of the DavPath methods.
#[derive(Debug)]
pub enum ParseError {
    /// cannot parse
    InvalidPath,
    /// outside of prefix
    PrefixMismatch,
    /// too many dotdots
    ForbiddenPath,
}

impl Error for ParseError {
    fn description(&self) -> &str {
        "DavPath parse error"
    }
    fn cause(&self) -> Option<&dyn Error> {
        None
    }
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{self:?}")
    }
}

impl From<ParseError> for DavError {
    fn from(e: ParseError) -> Self {
        match e {
            ParseError::InvalidPath => DavError::InvalidPath,
            ParseError::PrefixMismatch => DavError::IllegalPath,
            ParseError::ForbiddenPath => DavError::ForbiddenPath,
        }
    }
}

impl fmt::Display for DavPath {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.as_url_string_with_prefix_debug())
    }
}

impl fmt::Debug for DavPath {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{:?}", self.as_url_string_with_prefix_debug())
    }
}

// a decoded segment can contain any value except '/' or '\0'
fn valid_segment(src: &[u8]) -> Result<(), ParseError> {
    let mut p = pct::percent_decode(src);
    if p.any(|x| x == 0 || x == b'/') {
        return Err(ParseError::InvalidPath);
    }
    Ok(())
}

// encode path segment with user-defined ENCODE_SET
fn encode_path(src: &[u8]) -> Vec<u8> {
    pct::percent_encode(src, PATH_ENCODE_SET)
        .to_string()
        .into_bytes()
}

// make path safe:
// - raw path before decoding can contain only printable ascii
// - make sure path is absolute
// - remove query part (everything after ?)
// - merge consecutive slashes
// - process . and ..
// - decode percent encoded bytes, fail on invalid encodings.
// - do not allow NUL or '/' in segments.
fn normalize_path(rp: &[u8]) -> Result<Vec<u8>, ParseError> {
    // must consist of printable ASCII
    if rp.iter().any(|&x| !(32..=126).contains(&x)) {
        Err(ParseError::InvalidPath)?;
    }

    // don't allow fragments. query part gets deleted.
    let mut rawpath = rp;
    if let Some(pos) = rawpath.iter().position(|&x| x == b'?' || x == b'#') {
        if rawpath[pos] == b'#' {
            Err(ParseError::InvalidPath)?;
        }
        rawpath = &rawpath[..pos];
    }

    // must start with "/"
    if rawpath.is_empty() || rawpath[0] != b'/' {
        Err(ParseError::InvalidPath)?;
    }

    // split up in segments
    let isdir = matches!(rawpath.last(), Some(x) if *x == b'/');
    let segments = rawpath.split(|c| *c == b'/');
    let mut v: Vec<&[u8]> = Vec::new();
    for segment in segments {
        match segment {
            b"." | b"" => {}
            b".." => {
                if v.len() < 2 {
                    return Err(ParseError::ForbiddenPath);
                }
                v.pop();
                v.pop();
            }
            s => {
                valid_segment(s)?;
                v.push(b"/");
                v.push(s);
            }
        }
    }
    if isdir || v.is_empty() {
        v.push(b"/");
    }
    Ok(v.iter().flat_map(|s| pct::percent_decode(s)).collect())
}

impl DavPath {
    /// from URL encoded path
    pub fn new(src: &str) -> Result<DavPath, ParseError> {
        let path = normalize_path(src.as_bytes())?;
        Ok(DavPath {
            fullpath: path,
            pfxlen: None,
        })
    }

    /// from URL encoded path and prefix.
    pub fn from_str_and_prefix(src: &str, prefix: &str) -> Result<DavPath, ParseError> {
        let path = normalize_path(src.as_bytes())?;
        let mut davpath = DavPath {
            fullpath: path,
            pfxlen: None,
        };
        davpath.set_prefix(prefix)?;
        Ok(davpath)
    }

    /// from request.uri
    pub(crate) fn from_uri_and_prefix(uri: &http::uri::Uri, prefix: &str) -> Result<Self, ParseError> {
        match uri.path() {
            "*" => Ok(DavPath {
                fullpath: b"*".to_vec(),
                pfxlen: None,
            }),
            path if path.starts_with('/') => DavPath::from_str_and_prefix(path, prefix),
            _ => Err(ParseError::InvalidPath),
        }
    }

    /// Set prefix.
    pub fn set_prefix(&mut self, prefix: &str) -> Result<(), ParseError> {
        let path = &mut self.fullpath;
        let prefix = prefix.trim_end_matches('/');
        let prefix = normalize_path(prefix.as_bytes()).unwrap_or_default();
        let prefix = prefix.strip_suffix(b"/").unwrap_or(&prefix);
        let plen = prefix.len();
        if !path.starts_with(prefix) {
            return Err(ParseError::PrefixMismatch);
        }
        if path.len() > plen && path[plen] != b'/' {
            return Err(ParseError::PrefixMismatch);
        }
        if path.len() == plen {
            path.push(b'/');
        }
        self.pfxlen = Some(plen);
        Ok(())
    }

    // the prefix, as raw bytes.
    fn get_prefix(&self) -> &[u8] {
        &self.fullpath[..self.pfxlen.unwrap_or(0)]
    }

    // the path without the prefix, as raw bytes.
    fn get_path(&self) -> &[u8] {
        &self.fullpath[self.pfxlen.unwrap_or(0)..]
    }

    /// as URL encoded string, without the prefix.
    pub fn as_url_string(&self) -> String {
        let p = encode_path(self.get_path());
        String::from_utf8(p).unwrap_or_default()
    }

    /// as URL encoded string, with prefix.
    pub fn as_url_string_with_prefix(&self) -> String {
        let mut p = encode_path(self.get_path());
        let mut pfx = encode_path(self.get_prefix());
        pfx.append(&mut p);
        String::from_utf8(pfx).unwrap_or_default()
    }

    fn as_url_string_with_prefix_debug(&self) -> String {
        let mut p = self.get_path().to_vec();
        let mut pfx = self.get_prefix().to_vec();
        pfx.append(&mut p);
        String::from_utf8_lossy(&pfx).into_owned()
    }

    /// as raw bytes, not encoded, no prefix.
    pub fn as_bytes(&self) -> &[u8] {
        self.get_path()
    }

    /// Is this a collection, i.e. does the original URL path end in "/".
    pub fn is_collection(&self) -> bool {
        self.get_path().ends_with(b"/")
    }

    /// Is this the root of the served tree.
    pub fn is_root(&self) -> bool {
        self.get_path() == b"/"
    }

    /// Add a slash to the end of the path (if not already present).
    pub(crate) fn add_slash(&mut self) {
        if !self.is_collection() {
            self.fullpath.push(b'/');
        }
    }

    /// Remove a trailing slash, unless this is the root.
    pub(crate) fn remove_slash(&mut self) {
        let len = self.fullpath.len();
        if len > 1 && self.fullpath[len - 1] == b'/' && len - 1 > self.pfxlen.unwrap_or(0) {
            self.fullpath.truncate(len - 1);
        }
    }

    /// Append a (decoded) segment, optionally marking it as a collection.
    pub fn push_segment(&self, name: &str, collection: bool) -> DavPath {
        let mut p = self.clone();
        p.add_slash();
        p.fullpath.extend_from_slice(name.as_bytes());
        if collection {
            p.fullpath.push(b'/');
        }
        p
    }

    /// Parent directory, including a trailing slash.
    pub fn parent(&self) -> DavPath {
        let path = self.get_path();
        let mut end = path.len();
        while end > 0 && path[end - 1] == b'/' {
            end -= 1;
        }
        let end = match path[..end].iter().rposition(|&c| c == b'/') {
            Some(pos) => pos + 1,
            None => 1,
        };
        let pfxlen = self.pfxlen.unwrap_or(0);
        DavPath {
            fullpath: self.fullpath[..pfxlen + end].to_vec(),
            pfxlen: self.pfxlen,
        }
    }

    /// The last segment of the path, decoded. Empty for the root.
    pub fn file_name(&self) -> String {
        let path = self.get_path();
        let path = path.strip_suffix(b"/").unwrap_or(path);
        let start = path.iter().rposition(|&c| c == b'/').map(|p| p + 1).unwrap_or(0);
        String::from_utf8_lossy(&path[start..]).into_owned()
    }

    /// The path split into decoded segments, without the prefix.
    pub fn segments(&self) -> Vec<String> {
        self.get_path()
            .split(|&c| c == b'/')
            .filter(|s| !s.is_empty())
            .map(|s| String::from_utf8_lossy(s).into_owned())
            .collect()
    }

    /// Relative path for use on the local filesystem.
    pub fn as_rel_ospath(&self) -> PathBuf {
        let mut path = PathBuf::new();
        for segment in self.segments() {
            path.push(Path::new(&segment));
        }
        path
    }

    /// Compare two paths, ignoring a trailing slash.
    pub fn same_resource(&self, other: &DavPath) -> bool {
        let a = self.fullpath.strip_suffix(b"/").unwrap_or(&self.fullpath);
        let b = other.fullpath.strip_suffix(b"/").unwrap_or(&other.fullpath);
        a == b
    }

    /// Is `other` this path itself or a descendant of it.
    pub fn contains(&self, other: &DavPath) -> bool {
        let mut me = self.fullpath.clone();
        if me.last() != Some(&b'/') {
            me.push(b'/');
        }
        let mut them = other.fullpath.clone();
        if them.last() != Some(&b'/') {
            them.push(b'/');
        }
        them.starts_with(&me)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalizes_and_decodes() {
        let p = DavPath::new("/a//b/./c%20d/").unwrap();
        assert_eq!(p.as_bytes(), b"/a/b/c d/");
        assert!(p.is_collection());
        assert_eq!(p.as_url_string(), "/a/b/c%20d/");
    }

    #[test]
    fn rejects_escapes() {
        assert!(matches!(
            DavPath::new("/../etc"),
            Err(ParseError::ForbiddenPath)
        ));
        assert!(matches!(DavPath::new("/a%00b"), Err(ParseError::InvalidPath)));
        assert!(matches!(DavPath::new("a/b"), Err(ParseError::InvalidPath)));
    }

    #[test]
    fn prefix_handling() {
        let p = DavPath::from_str_and_prefix("/dav/dir/file.txt", "/dav").unwrap();
        assert_eq!(p.as_url_string(), "/dir/file.txt");
        assert_eq!(p.as_url_string_with_prefix(), "/dav/dir/file.txt");
        assert!(matches!(
            DavPath::from_str_and_prefix("/davx/file", "/dav"),
            Err(ParseError::PrefixMismatch)
        ));
        let root = DavPath::from_str_and_prefix("/dav", "/dav").unwrap();
        assert!(root.is_root());
    }

    #[test]
    fn parent_and_name() {
        let p = DavPath::from_str_and_prefix("/dav/dir/sub/", "/dav").unwrap();
        assert_eq!(p.file_name(), "sub");
        let parent = p.parent();
        assert_eq!(parent.as_url_string_with_prefix(), "/dav/dir/");
        assert_eq!(parent.parent().as_url_string(), "/");
        assert!(parent.parent().is_root());
        let child = parent.push_segment("x y", false);
        assert_eq!(child.as_url_string_with_prefix(), "/dav/dir/x%20y");
    }

    #[test]
    fn containment() {
        let a = DavPath::new("/a/").unwrap();
        let b = DavPath::new("/a/b").unwrap();
        let c = DavPath::new("/ab").unwrap();
        assert!(a.contains(&b));
        assert!(!a.contains(&c));
        assert!(a.same_resource(&DavPath::new("/a").unwrap()));
    }
}
