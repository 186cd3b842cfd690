//! `--congress` value parsing: `110`, `110-118`, `93,95,100-102`.

use harvest_core::job::{congress_in_range, MAX_CONGRESS, MIN_CONGRESS};

/// Sorted, de-duplicated congress numbers from one `--congress` value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CongressList(pub Vec<u32>);

fn parse_one(s: &str) -> Result<u32, String> {
    let n: u32 = s
        .trim()
        .parse()
        .map_err(|_| format!("'{}' is not a congress number", s.trim()))?;
    if !congress_in_range(n) {
        return Err(format!(
            "congress {} is outside {}-{}",
            n, MIN_CONGRESS, MAX_CONGRESS
        ));
    }
    Ok(n)
}

pub fn parse_congresses(s: &str) -> Result<CongressList, String> {
    let mut out = Vec::new();
    for part in s.split(',').map(str::trim).filter(|p| !p.is_empty()) {
        match part.split_once('-') {
            Some((lo, hi)) => {
                let (lo, hi) = (parse_one(lo)?, parse_one(hi)?);
                if lo > hi {
                    return Err(format!("range {}-{} is reversed", lo, hi));
                }
                out.extend(lo..=hi);
            }
            None => out.push(parse_one(part)?),
        }
    }
    if out.is_empty() {
        return Err("no congress given".to_string());
    }
    out.sort_unstable();
    out.dedup();
    Ok(CongressList(out))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_range_and_list() {
        assert_eq!(parse_congresses("110").unwrap().0, vec![110]);
        assert_eq!(parse_congresses("116-118").unwrap().0, vec![116, 117, 118]);
        assert_eq!(
            parse_congresses("100-102, 93,101").unwrap().0,
            vec![93, 100, 101, 102]
        );
    }

    #[test]
    fn rejects_out_of_range_and_garbage() {
        assert!(parse_congresses("92").is_err());
        assert!(parse_congresses("110-119").is_err());
        assert!(parse_congresses("118-110").is_err());
        assert!(parse_congresses("abc").is_err());
        assert!(parse_congresses(",").is_err());
    }
}
