//! Servers, shares and paths inside shares
//!
//! Paths are accepted as `smb://host/share/dir/file` URLs or as UNC paths
//! (`\\host\share\dir\file`). Inside a share the wire uses backslash
//! separated names relative to the share root.

use crate::error::{Error, Result};
use percent_encoding::percent_decode_str;
use std::fmt;
use std::net::{IpAddr, SocketAddr};
use url::Url;

/// A host offering SMB shares
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SmbServer {
    pub hostname: String,
    /// Known address, if already resolved
    pub address: Option<IpAddr>,
}

impl SmbServer {
    pub fn new(hostname: impl Into<String>) -> Self {
        let hostname = hostname.into();
        let address = hostname.parse().ok();
        Self { hostname, address }
    }

    pub fn with_address(mut self, address: IpAddr) -> Self {
        self.address = Some(address);
        self
    }

    pub fn socket_addr(&self, port: u16) -> Option<SocketAddr> {
        self.address.map(|ip| SocketAddr::new(ip, port))
    }
}

/// A share on a server
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Share {
    pub server: SmbServer,
    pub name: String,
}

impl Share {
    pub fn new(server: SmbServer, name: impl Into<String>) -> Self {
        Self {
            server,
            name: name.into(),
        }
    }

    /// Administrative shares end with `$`
    pub fn is_hidden(&self) -> bool {
        self.name.ends_with('$')
    }

    /// `\\host\share`, as sent in TREE_CONNECT
    pub fn unc(&self) -> String {
        format!("\\\\{}\\{}", self.server.hostname, self.name)
    }

    pub fn root(&self) -> SmbPath {
        SmbPath {
            share: self.clone(),
            components: Vec::new(),
        }
    }
}

/// A location inside a share
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SmbPath {
    share: Share,
    components: Vec<String>,
}

impl SmbPath {
    /// Parse an `smb://` URL or a UNC path
    pub fn parse(input: &str) -> Result<Self> {
        if input.len() >= 6 && input[..6].eq_ignore_ascii_case("smb://") {
            let url = Url::parse(input)
                .map_err(|e| Error::InvalidParameter(format!("{}: {}", input, e)))?;
            Self::from_url(&url)
        } else if input.starts_with("\\\\") || input.starts_with("//") {
            Self::from_unc(input)
        } else {
            Err(Error::InvalidParameter(format!(
                "'{}' is neither an smb:// URL nor a UNC path",
                input
            )))
        }
    }

    pub fn from_url(url: &Url) -> Result<Self> {
        if url.scheme() != "smb" {
            return Err(Error::InvalidParameter(format!("unsupported scheme '{}'", url.scheme())));
        }
        let host = url
            .host_str()
            .filter(|host| !host.is_empty())
            .ok_or_else(|| Error::InvalidParameter(format!("{}: missing host", url)))?;
        let host = host.trim_start_matches('[').trim_end_matches(']');

        let mut segments = Vec::new();
        for segment in url.path_segments().into_iter().flatten() {
            let decoded = percent_decode_str(segment)
                .decode_utf8()
                .map_err(|e| Error::InvalidParameter(format!("{}: {}", url, e)))?;
            segments.push(decoded.into_owned());
        }
        Self::from_parts(host, segments)
    }

    fn from_unc(input: &str) -> Result<Self> {
        let mut parts = input.split(['\\', '/']).filter(|part| !part.is_empty());
        let host = parts
            .next()
            .ok_or_else(|| Error::InvalidParameter(format!("{}: missing host", input)))?;
        let rest: Vec<String> = parts.map(str::to_string).collect();
        Self::from_parts(host, rest)
    }

    fn from_parts(host: &str, segments: Vec<String>) -> Result<Self> {
        let mut segments = segments.into_iter().filter(|segment| !segment.is_empty());
        let share_name = segments
            .next()
            .ok_or_else(|| Error::InvalidParameter(format!("no share named for host {}", host)))?;

        let mut path = Share::new(SmbServer::new(host), share_name).root();
        for segment in segments {
            path.push(&segment);
        }
        Ok(path)
    }

    pub fn share(&self) -> &Share {
        &self.share
    }

    pub fn server(&self) -> &SmbServer {
        &self.share.server
    }

    pub fn components(&self) -> &[String] {
        &self.components
    }

    pub fn is_root(&self) -> bool {
        self.components.is_empty()
    }

    /// Last component, or the share name at the root
    pub fn file_name(&self) -> &str {
        self.components
            .last()
            .map(String::as_str)
            .unwrap_or(&self.share.name)
    }

    /// Append one name; `.` is ignored and `..` goes up one level
    pub fn push(&mut self, name: &str) {
        match name {
            "." | "" => {}
            ".." => {
                self.components.pop();
            }
            other => self.components.push(other.to_string()),
        }
    }

    pub fn join(&self, name: &str) -> Self {
        let mut joined = self.clone();
        for part in name.split(['\\', '/']) {
            joined.push(part);
        }
        joined
    }

    pub fn parent(&self) -> Option<Self> {
        if self.components.is_empty() {
            return None;
        }
        let mut parent = self.clone();
        parent.components.pop();
        Some(parent)
    }

    /// `\share\dir\file`
    pub fn routable_path(&self) -> String {
        let mut out = format!("\\{}", self.share.name);
        for component in &self.components {
            out.push('\\');
            out.push_str(component);
        }
        out
    }

    /// `dir\file`, the name CREATE takes
    pub fn relative_path(&self) -> String {
        self.components.join("\\")
    }

    /// Wildcard matching every entry of this directory
    pub fn search_pattern(&self) -> String {
        if self.components.is_empty() {
            "*".to_string()
        } else {
            format!("\\{}\\*", self.relative_path())
        }
    }

    pub fn to_url(&self) -> Result<Url> {
        let mut url = Url::parse(&format!("smb://{}/", self.share.server.hostname))
            .map_err(|e| Error::InvalidParameter(e.to_string()))?;
        {
            let mut segments = url
                .path_segments_mut()
                .map_err(|_| Error::InvalidParameter("url cannot have a path".into()))?;
            segments.clear();
            segments.push(&self.share.name);
            for component in &self.components {
                segments.push(component);
            }
        }
        Ok(url)
    }
}

impl fmt::Display for SmbPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "\\\\{}{}", self.share.server.hostname, self.routable_path())
    }
}

/// Normalise a caller supplied path to share-relative wire form
///
/// Both separators are accepted, `.` is dropped and `..` climbs without
/// escaping the share root.
pub fn share_relative(path: &str) -> String {
    let mut components: Vec<&str> = Vec::new();
    for part in path.split(['\\', '/']) {
        match part {
            "" | "." => {}
            ".." => {
                components.pop();
            }
            other => components.push(other),
        }
    }
    components.join("\\")
}
