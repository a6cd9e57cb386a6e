use crate::errors::PackErr;
use anyhow::Result;
use std::fmt;
use std::str::FromStr;

/// Storage protocols a package URI can carry.
///
/// Both protocols address the same blob store; they differ only in
/// lifecycle: `gcs` packages belong to the system and may be garbage
/// collected, `pingcs` packages are pinned by users.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Protocol {
    Gcs,
    PinGcs,
}

impl Protocol {
    pub fn as_str(self) -> &'static str {
        match self {
            Protocol::Gcs => "gcs",
            Protocol::PinGcs => "pingcs",
        }
    }
}

impl FromStr for Protocol {
    type Err = PackErr;

    fn from_str(scheme: &str) -> Result<Self, PackErr> {
        match scheme {
            "gcs" => Ok(Protocol::Gcs),
            "pingcs" => Ok(Protocol::PinGcs),
            other => Err(PackErr::UnknownScheme(other.to_owned())),
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Splits a `<scheme>://<name>` package URI into protocol and package name.
pub fn parse_uri(pkg_uri: &str) -> Result<(Protocol, String)> {
    let (scheme, pkg_name) = match pkg_uri.find("://") {
        Some(pos) => (&pkg_uri[..pos], &pkg_uri[pos + 3..]),
        None => return Err(PackErr::UnknownScheme(pkg_uri.to_owned()).into()),
    };
    Ok((scheme.parse()?, pkg_name.to_owned()))
}

/// Formats a package URI from its parts.
pub fn make_uri(protocol: Protocol, pkg_name: &str) -> String {
    format!("{}://{}", protocol, pkg_name)
}
