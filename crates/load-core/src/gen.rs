//! Loadspec synthesis: walks a virtual clock from zero to the requested
//! duration, emitting one entry per inter-arrival draw.

use std::io::Write;
use std::time::Duration;

use rand::Rng;

use crate::entry::{write_jsonl, Entry};
use crate::error::{Error, Result};
use crate::interarrival::InterArrival;

/// Placeholder replaced with a random dictionary term in each query body.
pub const RDICT_TOKEN: &str = "$RDICT";

/// Emits entries covering `duration` and returns how many were written.
/// The first entry carries delay 0; each subsequent one carries the
/// previous draw, so the cumulative delay tracks the virtual clock.
pub fn generate<W, R>(
    template: &str,
    terms: &[String],
    url: &str,
    duration: Duration,
    gen: &mut InterArrival,
    rng: &mut R,
    out: &mut W,
) -> Result<u64>
where
    W: Write,
    R: Rng,
{
    let needs_dict = template.contains(RDICT_TOKEN);
    if needs_dict && terms.is_empty() {
        return Err(Error::Config(
            "query template uses $RDICT, which requires a non-empty dictionary".to_string(),
        ));
    }

    let total = duration.as_nanos() as i64;
    let mut t = 0i64;
    let mut delay = 0i64;
    let mut id = 0u64;
    while t <= total {
        let source = if needs_dict {
            let term = &terms[rng.gen_range(0..terms.len())];
            template.replacen(RDICT_TOKEN, term, 1)
        } else {
            template.to_string()
        };
        write_jsonl(
            out,
            &Entry {
                id,
                delay_since_last_nanos: delay,
                url: url.to_string(),
                source,
            },
        )?;
        id += 1;
        delay = gen.next_nanos();
        t += delay;
    }
    Ok(id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interarrival::ArrivalSpec;
    use rand::rngs::SmallRng;
    use rand::SeedableRng;

    fn generated(template: &str, terms: &[&str], duration_ms: u64) -> Vec<Entry> {
        let terms: Vec<String> = terms.iter().map(|t| t.to_string()).collect();
        let mut gen = InterArrival::new(ArrivalSpec::Const { qps: 10.0 });
        let mut rng = SmallRng::seed_from_u64(7);
        let mut buf = Vec::new();
        generate(
            template,
            &terms,
            "http://localhost:9200/idx//_search",
            Duration::from_millis(duration_ms),
            &mut gen,
            &mut rng,
            &mut buf,
        )
        .unwrap();
        String::from_utf8(buf)
            .unwrap()
            .lines()
            .enumerate()
            .map(|(i, l)| Entry::from_json_line(l, i + 1).unwrap())
            .collect()
    }

    #[test]
    fn ids_are_dense_and_delays_follow_the_draws() {
        // 10 qps over 1s: entries at t = 0, 100ms, ..., 1000ms.
        let entries = generated(r#"{"query":{"term":{"text":"$RDICT"}}}"#, &["a", "b"], 1000);
        assert_eq!(entries.len(), 11);
        for (i, e) in entries.iter().enumerate() {
            assert_eq!(e.id, i as u64);
            let expected = if i == 0 { 0 } else { 100_000_000 };
            assert_eq!(e.delay_since_last_nanos, expected);
        }
    }

    #[test]
    fn rdict_is_replaced_with_dictionary_terms() {
        let entries = generated(r#"{"term":"$RDICT","again":"$RDICT"}"#, &["alpha"], 200);
        for e in &entries {
            // Only the first occurrence is substituted.
            assert_eq!(e.source, r#"{"term":"alpha","again":"$RDICT"}"#);
        }
    }

    #[test]
    fn template_without_rdict_needs_no_dictionary() {
        let entries = generated(r#"{"match_all":{}}"#, &[], 200);
        assert!(!entries.is_empty());
        assert!(entries.iter().all(|e| e.source == r#"{"match_all":{}}"#));
    }

    #[test]
    fn rdict_without_dictionary_is_a_config_error() {
        let mut gen = InterArrival::new(ArrivalSpec::Const { qps: 10.0 });
        let mut rng = SmallRng::seed_from_u64(7);
        let mut buf = Vec::new();
        let err = generate(
            r#"{"term":"$RDICT"}"#,
            &[],
            "http://h/i//_search",
            Duration::from_secs(1),
            &mut gen,
            &mut rng,
            &mut buf,
        )
        .unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }
}
