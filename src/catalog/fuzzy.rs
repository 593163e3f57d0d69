//! Similarity matching for module and port names.
//!
//! The score is the classic longest-matching-block ratio `2*M / T`, where `M`
//! counts characters in matching blocks found by recursively taking the
//! longest common substring and `T` is the combined length.

/// Lowercase and drop everything outside `[a-z0-9]`.
pub fn normalize(s: &str) -> String {
    s.to_lowercase()
        .chars()
        .filter(|c| c.is_ascii_lowercase() || c.is_ascii_digit())
        .collect()
}

/// Similarity of two strings in `[0, 1]`. Two empty strings score 1.
pub fn ratio(a: &str, b: &str) -> f64 {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    let total = a.len() + b.len();
    if total == 0 {
        return 1.0;
    }
    let matched = matching_chars(&a, &b);
    2.0 * matched as f64 / total as f64
}

/// Best candidate with `ratio >= cutoff`. Equal scores go to the
/// lexicographically greater candidate so the choice never depends on
/// candidate order.
pub fn best_match<'a, I>(name: &str, candidates: I, cutoff: f64) -> Option<&'a str>
where
    I: IntoIterator<Item = &'a str>,
{
    let mut best: Option<(f64, &'a str)> = None;
    for cand in candidates {
        let score = ratio(name, cand);
        if score < cutoff {
            continue;
        }
        let better = match best {
            None => true,
            Some((s, c)) => score > s || (score == s && cand > c),
        };
        if better {
            best = Some((score, cand));
        }
    }
    best.map(|(_, c)| c)
}

/// Total size of the matching blocks between `a` and `b`.
fn matching_chars(a: &[char], b: &[char]) -> usize {
    let mut total = 0;
    let mut stack = vec![(0, a.len(), 0, b.len())];
    while let Some((alo, ahi, blo, bhi)) = stack.pop() {
        let (i, j, k) = longest_match(a, b, alo, ahi, blo, bhi);
        if k == 0 {
            continue;
        }
        total += k;
        if alo < i && blo < j {
            stack.push((alo, i, blo, j));
        }
        if i + k < ahi && j + k < bhi {
            stack.push((i + k, ahi, j + k, bhi));
        }
    }
    total
}

/// Longest common block of `a[alo..ahi]` and `b[blo..bhi]`, returned as
/// `(i, j, len)`. Ties prefer the earliest block in `a`, then in `b`.
fn longest_match(
    a: &[char],
    b: &[char],
    alo: usize,
    ahi: usize,
    blo: usize,
    bhi: usize,
) -> (usize, usize, usize) {
    let (mut best_i, mut best_j, mut best_k) = (alo, blo, 0);
    // prev[j] = length of the common suffix ending at a[i-1], b[j-1]
    let width = bhi.saturating_sub(blo) + 1;
    let mut prev = vec![0usize; width];
    let mut cur = vec![0usize; width];
    for i in alo..ahi {
        let Some(ca) = a.get(i) else { break };
        for j in blo..bhi {
            let slot = j - blo + 1;
            let same = b.get(j) == Some(ca);
            let k = if same {
                prev.get(slot - 1).copied().unwrap_or(0) + 1
            } else {
                0
            };
            if let Some(c) = cur.get_mut(slot) {
                *c = k;
            }
            if k > best_k {
                best_i = i + 1 - k;
                best_j = j + 1 - k;
                best_k = k;
            }
        }
        std::mem::swap(&mut prev, &mut cur);
        cur.iter_mut().for_each(|c| *c = 0);
    }
    (best_i, best_j, best_k)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_strips_punctuation() {
        assert_eq!(normalize("GREATER THAN"), "greaterthan");
        assert_eq!(normalize("Arrays.Get_2"), "arraysget2");
    }

    #[test]
    fn ratio_matches_reference_values() {
        assert!((ratio("abcd", "bcde") - 0.75).abs() < 1e-9);
        assert!((ratio("add", "add") - 1.0).abs() < 1e-9);
        assert!(ratio("qqqq", "add").abs() < 1e-9);
        assert!((ratio("", "") - 1.0).abs() < 1e-9);
    }

    #[test]
    fn best_match_respects_cutoff() {
        let cands = ["add", "subtract", "multiply"];
        assert_eq!(best_match("ad", cands, 0.4), Some("add"));
        assert_eq!(best_match("qqqq", cands, 0.1), None);
    }

    #[test]
    fn ties_prefer_greater_candidate_regardless_of_order() {
        assert_eq!(best_match("ab", ["ax", "bx"], 0.1), Some("bx"));
        assert_eq!(best_match("ab", ["bx", "ax"], 0.1), Some("bx"));
    }
}
