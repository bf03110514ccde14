//! Minimal HTML pages for the index and per-torrent views.

use crate::engine::SessionSummary;
use crate::infohash::InfoHash;

fn escape(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

pub fn index_page(sessions: &[SessionSummary]) -> String {
    let mut rows = String::new();
    for session in sessions {
        rows.push_str(&format!(
            "\t\t\t<tr><td>{}</td><td><a href=\"/torrent/{}\">info</a></td></tr>\n",
            escape(&session.name),
            session.info_hash,
        ));
    }
    format!(
        "<!DOCTYPE html>\n<html>\n\t<head><title>Torrents</title></head>\n\t<body>\n\t\t<h1>Torrents</h1>\n\t\t<table border=\"1\">\n\t\t\t<tr><th>Name</th><th>Link</th></tr>\n{rows}\t\t</table>\n\t\t<a href=\"/\">Refresh</a>\n\t</body>\n</html>\n"
    )
}

pub fn torrent_page(name: &str, hash: InfoHash) -> String {
    let name = escape(name);
    format!(
        "<!DOCTYPE html>\n<html>\n\t<head><title>{name}</title></head>\n\t<body>\n\t\t<h1>{name}</h1>\n\t\t<a href=\"/torrent/{hash}\">Refresh</a>\n\t\t<a href=\"/\">Back</a>\n\t</body>\n</html>\n"
    )
}
