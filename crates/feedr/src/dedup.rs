use crate::tables::HistoryRecord;

/// Minimum matching ratio for two titles to be considered the same update.
pub const TITLE_SIMILARITY_THRESHOLD: f64 = 0.75;

/// Whether `cur_title` is a republish or small edit of the last published
/// update.
///
/// Either check is sufficient:
/// 1. the previous title is contained in the current one (e.g. a suffix like
///    "(updated)" was appended),
/// 2. the [`similarity_ratio`] of the two titles reaches
///    [`TITLE_SIMILARITY_THRESHOLD`].
///
/// An empty history never produces a duplicate. A previous update with an
/// empty title is contained in every title, so anything replaces it.
pub fn is_duplicate_update(prev: Option<&HistoryRecord>, cur_title: &str) -> bool {
    let Some(prev) = prev else {
        return false;
    };

    if cur_title.contains(prev.title.as_str()) {
        return true;
    }

    TITLE_SIMILARITY_THRESHOLD <= similarity_ratio(cur_title, &prev.title)
}

/// Ratcliff/Obershelp "gestalt" matching ratio in `[0, 1]`.
///
/// `2 * M / (len(a) + len(b))` where `M` is the number of characters in the
/// matching blocks found by recursively taking the longest common substring
/// and repeating on both sides of it. No characters are treated as junk.
/// Two empty strings are identical (`1.0`).
pub fn similarity_ratio(a: &str, b: &str) -> f64 {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();

    let total = a.len() + b.len();
    if total == 0 {
        return 1.0;
    }

    let matches = matching_chars(&a, &b);
    (2 * matches) as f64 / total as f64
}

/// Sum of the sizes of all matching blocks between `a` and `b`.
fn matching_chars(a: &[char], b: &[char]) -> usize {
    let mut total = 0;
    // Explicit stack of (alo, ahi, blo, bhi) ranges still to be matched
    let mut pending = vec![(0, a.len(), 0, b.len())];

    while let Some((alo, ahi, blo, bhi)) = pending.pop() {
        let (i, j, size) = longest_match(a, b, alo, ahi, blo, bhi);
        if size == 0 {
            continue;
        }
        total += size;
        if alo < i && blo < j {
            pending.push((alo, i, blo, j));
        }
        if i + size < ahi && j + size < bhi {
            pending.push((i + size, ahi, j + size, bhi));
        }
    }

    total
}

/// Longest common substring of `a[alo..ahi]` and `b[blo..bhi]`.
///
/// Returns `(i, j, size)`. Among equally long blocks the one that ends
/// first in `a` wins, then the one that starts first in `b`.
fn longest_match(
    a: &[char],
    b: &[char],
    alo: usize,
    ahi: usize,
    blo: usize,
    bhi: usize,
) -> (usize, usize, usize) {
    let (mut best_i, mut best_j, mut best_size) = (alo, blo, 0);

    // `prev[k]` is the length of the common suffix ending at a[i - 1], b[blo + k - 1]
    let width = bhi - blo;
    let mut prev = vec![0usize; width + 1];
    let mut cur = vec![0usize; width + 1];

    for i in alo..ahi {
        for j in blo..bhi {
            let k = j - blo + 1;
            if a[i] == b[j] {
                let len = prev[k - 1] + 1;
                cur[k] = len;
                if best_size < len {
                    best_i = i + 1 - len;
                    best_j = j + 1 - len;
                    best_size = len;
                }
            } else {
                cur[k] = 0;
            }
        }
        std::mem::swap(&mut prev, &mut cur);
    }

    (best_i, best_j, best_size)
}
