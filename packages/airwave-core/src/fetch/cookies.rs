//! Netscape cookie-file materialization for the external fetcher.
//!
//! The subprocess fetcher can only read cookies from a file. When the
//! operator configures a raw cookie header instead, it is written once to a
//! per-process temp file whose path is cached for the process lifetime.
//! The file is intentionally not deleted between tracks.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

/// Expiry written for materialized cookies (far future; the fetcher only
/// checks that cookies are not expired).
const COOKIE_EXPIRY: u64 = 2_147_483_647;

static COOKIE_FILE: OnceLock<Option<PathBuf>> = OnceLock::new();

/// Renders a raw `key=value; key2=value2` cookie header as a Netscape
/// cookie file for the `.youtube.com` domain.
fn render_netscape(cookie_header: &str) -> String {
    let mut out = String::from("# Netscape HTTP Cookie File\n");
    for pair in cookie_header.split(';') {
        let pair = pair.trim();
        let Some((name, value)) = pair.split_once('=') else {
            continue;
        };
        if name.is_empty() {
            continue;
        }
        out.push_str(&format!(
            ".youtube.com\tTRUE\t/\tTRUE\t{COOKIE_EXPIRY}\t{}\t{}\n",
            name.trim(),
            value.trim()
        ));
    }
    out
}

fn write_cookie_file(cookie_header: &str) -> std::io::Result<PathBuf> {
    let path = std::env::temp_dir().join(format!("airwave-cookies-{}.txt", std::process::id()));
    let mut file = std::fs::File::create(&path)?;
    file.write_all(render_netscape(cookie_header).as_bytes())?;
    Ok(path)
}

/// Returns the cookie file path for the external fetcher, if any.
///
/// An explicitly configured file wins; otherwise a raw cookie header is
/// materialized once and the path cached.
pub fn cookie_file_path(
    configured_file: Option<&Path>,
    raw_cookie: Option<&str>,
) -> Option<PathBuf> {
    if let Some(path) = configured_file {
        return Some(path.to_path_buf());
    }
    let raw = raw_cookie?;
    COOKIE_FILE
        .get_or_init(|| match write_cookie_file(raw) {
            Ok(path) => {
                log::info!("[Fetch] Materialized cookie file at {}", path.display());
                Some(path)
            }
            Err(e) => {
                log::warn!("[Fetch] Failed to write cookie file: {e}");
                None
            }
        })
        .clone()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn renders_header_and_one_line_per_cookie() {
        let rendered = render_netscape("SID=abc123; HSID=def456");
        let lines: Vec<&str> = rendered.lines().collect();
        assert_eq!(lines[0], "# Netscape HTTP Cookie File");
        assert_eq!(
            lines[1],
            format!(".youtube.com\tTRUE\t/\tTRUE\t{COOKIE_EXPIRY}\tSID\tabc123")
        );
        assert_eq!(
            lines[2],
            format!(".youtube.com\tTRUE\t/\tTRUE\t{COOKIE_EXPIRY}\tHSID\tdef456")
        );
    }

    #[test]
    fn skips_malformed_pairs() {
        let rendered = render_netscape("novalue; =orphan; OK=1");
        let lines: Vec<&str> = rendered.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[1].ends_with("OK\t1"));
    }

    #[test]
    fn configured_file_takes_precedence() {
        let dir = tempfile::tempdir().unwrap();
        let explicit = dir.path().join("cookies.txt");
        std::fs::write(&explicit, "# Netscape HTTP Cookie File\n").unwrap();

        let path = cookie_file_path(Some(&explicit), Some("SID=abc"));
        assert_eq!(path, Some(explicit));
    }
}
