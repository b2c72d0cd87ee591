use std::io::{self, Write};
use std::path::Path;

use tempfile::NamedTempFile;

const COOKIE_DOMAIN: &str = ".youtube.com";

/// Convert a raw browser `Cookie:` header ("a=1; b=2") into the Netscape
/// cookie-jar format yt-dlp reads.
pub fn header_to_netscape(header: &str) -> String {
    let header = header
        .trim()
        .strip_prefix("Cookie:")
        .or_else(|| header.trim().strip_prefix("cookie:"))
        .unwrap_or(header.trim());

    let mut jar = String::from("# Netscape HTTP Cookie File\n");
    for pair in header.split(';') {
        let Some((name, value)) = pair.trim().split_once('=') else {
            continue;
        };
        let name = name.trim();
        if name.is_empty() {
            continue;
        }
        jar.push_str(&format!(
            "{COOKIE_DOMAIN}\tTRUE\t/\tTRUE\t0\t{name}\t{}\n",
            value.trim()
        ));
    }
    jar
}

/// Read a stored cookie header and write it out as a temporary Netscape jar.
///
/// The jar is deleted when the returned handle is dropped.
pub fn netscape_jar_from_header_file(header_file: &Path) -> io::Result<NamedTempFile> {
    let header = std::fs::read_to_string(header_file)?;
    if header.trim().is_empty() {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("{} is empty", header_file.display()),
        ));
    }
    // Already in jar format, e.g. exported by a browser extension.
    let contents = if header.trim_start().starts_with("# Netscape HTTP Cookie File")
        || header.trim_start().starts_with("# HTTP Cookie File")
    {
        header
    } else {
        header_to_netscape(&header)
    };

    let mut jar = tempfile::Builder::new()
        .prefix("music-fetch-cookies-")
        .suffix(".txt")
        .tempfile()?;
    jar.write_all(contents.as_bytes())?;
    jar.flush()?;
    Ok(jar)
}
