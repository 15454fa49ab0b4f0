use std::collections::BTreeSet;
use std::io::Read;
use std::sync::LazyLock;

use regex::Regex;
use tracing::{debug, warn};

use crate::client::ArchiveClient;
use crate::domain::partition_url;
use crate::error::MirrorError;

// `href` must start an attribute, so `data-href=` and the like are skipped.
static HREF: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)<a\s(?:[^>]*?\s)?href\s*=\s*(?:"([^"]*)"|'([^']*)'|([^\s>]+))"#)
        .unwrap()
});

/// Filenames currently published in one `{base_url}/{run}/{variable}/`
/// directory index. Any failure yields an empty set: "no information".
pub fn list_available(
    client: &dyn ArchiveClient,
    base_url: &str,
    run: &str,
    variable: &str,
    date_marker: &str,
    suffix: &str,
) -> BTreeSet<String> {
    let folder_url = partition_url(base_url, run, variable);
    match fetch_index(client, &folder_url) {
        Ok(html) => {
            let files = parse_index(&html, suffix, date_marker);
            debug!(url = %folder_url, count = files.len(), "scraped directory index");
            files
        }
        Err(err) => {
            warn!(url = %folder_url, "failed to fetch directory index: {err}");
            BTreeSet::new()
        }
    }
}

fn fetch_index(client: &dyn ArchiveClient, url: &str) -> Result<String, MirrorError> {
    let mut response = client.get(url)?;
    if !response.is_ok() {
        return Err(MirrorError::HttpStatus {
            status: response.status,
            url: url.to_string(),
        });
    }
    let mut raw = Vec::new();
    response
        .body
        .read_to_end(&mut raw)
        .map_err(|err| MirrorError::Http(format!("{url}: {err}")))?;
    Ok(String::from_utf8_lossy(&raw).into_owned())
}

/// Extracts anchor targets ending in `suffix` and containing `date_marker`.
/// Only the last path segment of each href is kept.
pub fn parse_index(html: &str, suffix: &str, date_marker: &str) -> BTreeSet<String> {
    HREF.captures_iter(html)
        .filter_map(|caps| caps.get(1).or_else(|| caps.get(2)).or_else(|| caps.get(3)))
        .map(|value| value.as_str())
        .map(|value| value.rsplit('/').next().unwrap_or(value))
        .filter(|name| name.ends_with(suffix) && name.contains(date_marker))
        .map(|name| name.to_string())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    const INDEX: &str = r#"<html><body><pre>
<a href="../">../</a>
<a href="icon_20240101_00_000_t_2m.grib2.bz2">step 000</a>  01-Jan-2024 02:10  1234
<a href='icon_20240101_00_001_t_2m.grib2.bz2'>icon_20240101_00_001_t_2m.grib2.bz2</a>
<A HREF="/data/icon_20231231_00_000_t_2m.grib2.bz2">old</A>
<a class="x" href="README.txt">README.txt</a>
</pre></body></html>"#;

    #[test]
    fn keeps_matching_suffix_and_date() {
        let files = parse_index(INDEX, ".grib2.bz2", "20240101");
        let expected: BTreeSet<String> = [
            "icon_20240101_00_000_t_2m.grib2.bz2",
            "icon_20240101_00_001_t_2m.grib2.bz2",
        ]
        .into_iter()
        .map(String::from)
        .collect();
        assert_eq!(files, expected);
    }

    #[test]
    fn strips_directory_prefix() {
        let files = parse_index(INDEX, ".grib2.bz2", "20231231");
        assert!(files.contains("icon_20231231_00_000_t_2m.grib2.bz2"));
    }

    #[test]
    fn ignores_attributes_ending_in_href() {
        let html = r#"<a data-href="x_20240101.grib2.bz2" href="real_20240101.grib2.bz2">real</a>"#;
        let files = parse_index(html, ".grib2.bz2", "20240101");
        let expected: BTreeSet<String> = ["real_20240101.grib2.bz2".to_string()].into();
        assert_eq!(files, expected);
    }
}
