//! Slow-query log ingestion: extracts the bracketed fields of each line,
//! reorders by timestamp, and rewrites absolute times into the relative
//! delays a loadspec carries.

use std::sync::OnceLock;
use std::time::Duration;

use chrono::NaiveDateTime;
use regex::Regex;

use crate::anon::Anonymizer;
use crate::entry::Entry;
use crate::error::{Error, Result};

/// Only query records are replayable; everything else is filtered out.
pub const QUERY_LOG_TYPE: &str = "index.search.slowlog.query";

const TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.f";

/// One parsed log line. `types`, `search_type`, and `host` may be empty;
/// the timestamp and log type may not.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlowlogEntry {
    pub timestamp: String,
    pub timestamp_nanos: i64,
    pub log_type: String,
    pub host: String,
    pub index: String,
    pub types: String,
    pub search_type: String,
    pub source: String,
}

fn matcher() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"^\[(?P<ts>[^\]]+)\]\s*\[[^\]]*\]\s*\[(?P<log_type>[^\]]+)\]\s*\[(?P<host>[^\]]*)\]\s*\[(?P<index>[^\]]*)\]\s*\[[^\]]*\].*?types\[(?P<types>[^\]]*)\].*?search_type\[(?P<search_type>[^\]]*)\].*?source\[(?P<source>.*)\], extra_source",
        )
        .expect("slowlog pattern is valid")
    })
}

/// Decodes one line, tagging failures with the 1-based line number.
pub fn decode_line(line: &str, line_no: usize) -> Result<SlowlogEntry> {
    let caps = matcher()
        .captures(line)
        .ok_or(Error::MalformedLog { line_no })?;
    let field = |name: &str| {
        caps.name(name)
            .map(|m| m.as_str().to_string())
            .unwrap_or_default()
    };

    let timestamp = field("ts");
    // The log writes fractional seconds with a comma.
    let parsed = NaiveDateTime::parse_from_str(&timestamp.replacen(',', ".", 1), TIME_FORMAT)
        .map_err(|_| Error::MalformedLog { line_no })?;
    let timestamp_nanos = parsed
        .and_utc()
        .timestamp_nanos_opt()
        .ok_or(Error::MalformedLog { line_no })?;

    Ok(SlowlogEntry {
        timestamp,
        timestamp_nanos,
        log_type: field("log_type"),
        host: field("host"),
        index: field("index"),
        types: field("types"),
        search_type: field("search_type"),
        source: field("source"),
    })
}

/// Keeps only the scheme-and-authority portion of a URL: everything up to
/// the first `/` after `scheme://`.
pub fn strip_to_authority(url: &str) -> String {
    let (prefix, rest) = if let Some(r) = url.strip_prefix("http://") {
        ("http://", r)
    } else if let Some(r) = url.strip_prefix("https://") {
        ("https://", r)
    } else {
        ("", url)
    };
    let authority = rest.split('/').next().unwrap_or(rest);
    format!("{prefix}{authority}")
}

/// Reconstructs the search endpoint for an entry. Empty path segments are
/// emitted as-is; the search type is appended only when present.
pub fn search_url(host: &str, index: &str, types: &str, search_type: &str) -> String {
    let mut url = [host, index, types, "_search"].join("/");
    if !search_type.is_empty() {
        url.push_str("?search_type=");
        url.push_str(&search_type.to_lowercase());
    }
    url
}

/// Options steering slowlog-to-loadspec conversion.
#[derive(Debug, Default)]
pub struct ParseOptions {
    /// Replaces the logged host with this URL's scheme and authority.
    pub url_override: Option<String>,
    /// Round-robin replacement for the logged index names.
    pub index_overrides: Vec<String>,
    /// Caps the total duration of the emitted loadspec.
    pub max_duration: Option<Duration>,
}

/// Converts decoded log lines into a replayable loadspec: filters query
/// records, rebuilds URLs, sorts by absolute timestamp, and rewrites
/// timestamps into delay-since-last. Entries in the log are not guaranteed
/// to be ordered.
pub fn build_loadspec<I>(
    lines: I,
    opts: &ParseOptions,
    mut anonymizer: Option<&mut Anonymizer>,
) -> Result<Vec<Entry>>
where
    I: IntoIterator<Item = (usize, String)>,
{
    let authority = opts.url_override.as_deref().map(strip_to_authority);

    let mut timestamped: Vec<(i64, Entry)> = Vec::new();
    for (line_no, line) in lines {
        let log = decode_line(&line, line_no)?;
        if log.log_type != QUERY_LOG_TYPE {
            continue;
        }

        let host = authority.as_deref().unwrap_or(&log.host);
        let index = if opts.index_overrides.is_empty() {
            log.index.as_str()
        } else {
            &opts.index_overrides[timestamped.len() % opts.index_overrides.len()]
        };
        let source = match anonymizer.as_deref_mut() {
            Some(anon) => {
                let mut doc: serde_json::Value = serde_json::from_str(&log.source)?;
                anon.anonymize_value(&mut doc);
                // Map keys come out sorted, giving a canonical form.
                doc.to_string()
            }
            None => log.source.clone(),
        };

        timestamped.push((
            log.timestamp_nanos,
            Entry {
                id: 0,
                delay_since_last_nanos: 0,
                url: search_url(host, index, &log.types, &log.search_type),
                source,
            },
        ));
    }

    timestamped.sort_by_key(|(ts, _)| *ts);

    let mut entries = Vec::with_capacity(timestamped.len());
    let mut prev = 0i64;
    let mut elapsed = 0i64;
    for (i, (ts, mut entry)) in timestamped.into_iter().enumerate() {
        entry.id = i as u64;
        entry.delay_since_last_nanos = if i == 0 { 0 } else { ts - prev };
        prev = ts;
        elapsed += entry.delay_since_last_nanos;
        entries.push(entry);
        if let Some(max) = opts.max_duration {
            if elapsed >= max.as_nanos() as i64 {
                break;
            }
        }
    }
    Ok(entries)
}

/// Total duration covered by a loadspec.
pub fn total_delay(entries: &[Entry]) -> Duration {
    let nanos: i64 = entries.iter().map(|e| e.delay_since_last_nanos).sum();
    Duration::from_nanos(nanos.max(0) as u64)
}

#[cfg(test)]
mod tests {
    use super::*;

    const QUERY_LINE: &str = r#"[2017-07-10 13:04:23,667][TRACE][index.search.slowlog.query] [host01] [index01][11] took[2.3ms], took_millis[2], types[typesfoo], stats[], search_type[QUERY_THEN_FETCH], total_shards[126], source[{"size":50,"query":{"term":{"status":"AVAILABLE"}}}], extra_source[]"#;

    fn numbered(lines: &[&str]) -> Vec<(usize, String)> {
        lines
            .iter()
            .enumerate()
            .map(|(i, l)| (i + 1, l.to_string()))
            .collect()
    }

    #[test]
    fn decode_extracts_all_fields() {
        let entry = decode_line(QUERY_LINE, 1).unwrap();
        assert_eq!(entry.timestamp, "2017-07-10 13:04:23,667");
        assert_eq!(entry.log_type, "index.search.slowlog.query");
        assert_eq!(entry.host, "host01");
        assert_eq!(entry.index, "index01");
        assert_eq!(entry.types, "typesfoo");
        assert_eq!(entry.search_type, "QUERY_THEN_FETCH");
        assert_eq!(
            entry.source,
            r#"{"size":50,"query":{"term":{"status":"AVAILABLE"}}}"#
        );
    }

    #[test]
    fn decode_allows_empty_host_and_types() {
        let line = r#"[2018-11-15 10:57:43,659][WARN ][index.search.slowlog.query] [] [test][0] took[23.3ms], took_millis[23], types[], stats[], search_type[QUERY_THEN_FETCH], total_shards[5], source[{"query":{"match":{"test":"test"}}}], extra_source[]"#;
        let entry = decode_line(line, 1).unwrap();
        assert_eq!(entry.host, "");
        assert_eq!(entry.index, "test");
        assert_eq!(entry.types, "");
        assert_eq!(entry.search_type, "QUERY_THEN_FETCH");
        assert_eq!(entry.source, r#"{"query":{"match":{"test":"test"}}}"#);
    }

    #[test]
    fn decode_rejects_garbage() {
        let err = decode_line("nothing to see here", 7).unwrap_err();
        assert!(matches!(err, Error::MalformedLog { line_no: 7 }));
    }

    #[test]
    fn url_strips_to_authority() {
        assert_eq!(
            strip_to_authority("http://localhost:9200/some/path"),
            "http://localhost:9200"
        );
        assert_eq!(strip_to_authority("https://es.internal"), "https://es.internal");
    }

    #[test]
    fn url_reconstruction() {
        assert_eq!(
            search_url("http://h:9200", "idx", "doc", "QUERY_THEN_FETCH"),
            "http://h:9200/idx/doc/_search?search_type=query_then_fetch"
        );
        // Empty segments stay in the path; the query string is dropped.
        assert_eq!(search_url("http://h:9200", "idx", "", ""), "http://h:9200/idx//_search");
    }

    fn line_at(ts: &str) -> String {
        format!(
            r#"[{ts}][TRACE][index.search.slowlog.query] [host01] [index01][11] took[2.3ms], took_millis[2], types[t], stats[], search_type[QUERY_THEN_FETCH], total_shards[126], source[{{"q":1}}], extra_source[]"#
        )
    }

    #[test]
    fn out_of_order_lines_are_sorted_and_made_relative() {
        let lines = vec![
            line_at("2017-07-10 13:04:23,667"),
            line_at("2017-07-10 13:04:23,500"),
        ];
        let entries = build_loadspec(numbered(&lines.iter().map(|s| s.as_str()).collect::<Vec<_>>()), &ParseOptions::default(), None).unwrap();

        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].id, 0);
        assert_eq!(entries[0].delay_since_last_nanos, 0);
        assert_eq!(entries[1].id, 1);
        assert_eq!(entries[1].delay_since_last_nanos, 167_000_000);
    }

    #[test]
    fn reordered_input_produces_identical_output() {
        let a = line_at("2017-07-10 13:04:23,500");
        let b = line_at("2017-07-10 13:04:24,000");
        let c = line_at("2017-07-10 13:04:25,250");

        let sorted = build_loadspec(
            numbered(&[a.as_str(), b.as_str(), c.as_str()]),
            &ParseOptions::default(),
            None,
        )
        .unwrap();
        let shuffled = build_loadspec(
            numbered(&[c.as_str(), a.as_str(), b.as_str()]),
            &ParseOptions::default(),
            None,
        )
        .unwrap();
        assert_eq!(sorted, shuffled);

        // Cumulative delays reproduce the original spacing.
        assert_eq!(sorted[1].delay_since_last_nanos, 500_000_000);
        assert_eq!(sorted[2].delay_since_last_nanos, 1_250_000_000);
    }

    #[test]
    fn non_query_records_are_filtered() {
        let fetch = r#"[2017-07-10 13:04:23,667][TRACE][index.search.slowlog.fetch] [host01] [index01][11] took[2.3ms], took_millis[2], types[t], stats[], search_type[QUERY_THEN_FETCH], total_shards[126], source[{"q":1}], extra_source[]"#;
        let entries = build_loadspec(
            numbered(&[fetch, QUERY_LINE]),
            &ParseOptions::default(),
            None,
        )
        .unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].url, "host01/index01/typesfoo/_search?search_type=query_then_fetch");
    }

    #[test]
    fn overrides_replace_host_and_round_robin_indexes() {
        let lines = vec![
            line_at("2017-07-10 13:04:23,100"),
            line_at("2017-07-10 13:04:23,200"),
            line_at("2017-07-10 13:04:23,300"),
        ];
        let opts = ParseOptions {
            url_override: Some("http://replacement:9200/ignored/path".to_string()),
            index_overrides: vec!["a".to_string(), "b".to_string()],
            max_duration: None,
        };
        let entries = build_loadspec(
            numbered(&lines.iter().map(|s| s.as_str()).collect::<Vec<_>>()),
            &opts,
            None,
        )
        .unwrap();
        assert_eq!(entries[0].url, "http://replacement:9200/a/t/_search?search_type=query_then_fetch");
        assert_eq!(entries[1].url, "http://replacement:9200/b/t/_search?search_type=query_then_fetch");
        assert_eq!(entries[2].url, "http://replacement:9200/a/t/_search?search_type=query_then_fetch");
    }

    #[test]
    fn max_duration_truncates_after_the_crossing_entry() {
        let lines = vec![
            line_at("2017-07-10 13:04:23,000"),
            line_at("2017-07-10 13:04:24,000"),
            line_at("2017-07-10 13:04:25,000"),
        ];
        let opts = ParseOptions {
            max_duration: Some(Duration::from_millis(500)),
            ..Default::default()
        };
        let entries = build_loadspec(
            numbered(&lines.iter().map(|s| s.as_str()).collect::<Vec<_>>()),
            &opts,
            None,
        )
        .unwrap();
        // The entry that crosses the bound is still emitted.
        assert_eq!(entries.len(), 2);
        assert_eq!(total_delay(&entries), Duration::from_secs(1));
    }

    #[test]
    fn anonymization_rewrites_and_canonicalizes_source() {
        use crate::anon::{Anonymizer, FieldRegexps, FieldsMap};

        let line = r#"[2017-07-10 13:04:23,667][TRACE][index.search.slowlog.query] [host01] [index01][11] took[2.3ms], took_millis[2], types[t], stats[], search_type[], total_shards[126], source[{"user":"alice@example.com","size":50}], extra_source[]"#;
        let regexps = FieldRegexps::parse(&["user::([^@]+)@".to_string()]).unwrap();
        let mut anon = Anonymizer::new(FieldsMap::new(), regexps);

        let entries =
            build_loadspec(numbered(&[line]), &ParseOptions::default(), Some(&mut anon)).unwrap();
        assert_eq!(entries[0].source, r#"{"size":50,"user":"0@example.com"}"#);
    }
}
