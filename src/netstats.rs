//! Kernel network counters from `/proc/net/netstat`. The file comes in
//! paired lines sharing a `Prefix:` tag, titles first, values second:
//!
//! ```text
//! TcpExt: SyncookiesSent SyncookiesRecv
//! TcpExt: 0 4
//! ```

use std::fs;
use std::io;

const PROC_NET_NETSTAT: &str = "/proc/net/netstat";

/// Reads and parses the live kernel counters.
pub fn from_proc() -> io::Result<Vec<(String, u64)>> {
    Ok(parse(&fs::read_to_string(PROC_NET_NETSTAT)?))
}

/// Zips each title line with its value line into ordered `(name, value)`
/// pairs. Malformed blocks are skipped with a warning rather than failing
/// the whole read; the format is at the kernel's mercy.
#[must_use]
pub fn parse(text: &str) -> Vec<(String, u64)> {
    let lines: Vec<&str> = text.lines().collect();
    let mut counters = Vec::new();
    let mut index = 0;
    while index + 1 < lines.len() {
        let (tag, titles, values) =
            match (lines[index].split_once(':'), lines[index + 1].split_once(':')) {
                (Some((tag, titles)), Some((value_tag, values))) if tag == value_tag => {
                    (tag, titles, values)
                }
                _ => {
                    tracing::warn!(line = lines[index], "unpaired statistics line, skipping");
                    index += 1;
                    continue;
                }
            };

        let titles: Vec<&str> = titles.split_whitespace().collect();
        let values: Vec<&str> = values.split_whitespace().collect();
        if titles.len() == values.len() {
            for (&title, &value) in titles.iter().zip(&values) {
                match value.parse::<u64>() {
                    Ok(parsed) => counters.push((title.to_string(), parsed)),
                    Err(_) => {
                        tracing::warn!(tag, title, value, "unparsable counter, skipping");
                    }
                }
            }
        } else {
            tracing::warn!(
                tag,
                titles = titles.len(),
                values = values.len(),
                "title/value count mismatch, skipping block"
            );
        }
        index += 2;
    }
    if index < lines.len() && !lines[index].trim().is_empty() {
        tracing::warn!(line = lines[index], "trailing unpaired statistics line, skipping");
    }
    counters
}
