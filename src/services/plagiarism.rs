use std::collections::HashMap;
use std::sync::Arc;

use crate::services::cache::{history_key, CacheError, CheckCache};

const MAX_COMPARED_CHARS: usize = 2000;

/// Scores how unique a submission is against the same user's recent
/// submissions, then records it in that history.
///
/// The history is a most-recent-first list in the shared cache. Reads look at
/// the newest `history_limit` entries; writes trim the list to
/// `history_capacity`. Concurrent submissions from one user may interleave
/// their prepends; the list is not locked.
pub struct PlagiarismDetector {
    cache: Arc<dyn CheckCache>,
    history_limit: usize,
    history_capacity: usize,
}

impl PlagiarismDetector {
    pub fn new(cache: Arc<dyn CheckCache>, history_limit: usize, history_capacity: usize) -> Self {
        let history_limit = history_limit.max(1);
        Self { cache, history_limit, history_capacity: history_capacity.max(history_limit) }
    }

    /// Returns uniqueness in percent: 100 minus the highest similarity found.
    ///
    /// Only the cache round trips run on the caller's task. The comparison
    /// itself is CPU-bound and runs on the blocking pool.
    pub async fn check(&self, text: &str, user_id: &str) -> f64 {
        let normalized = normalize(text);
        if normalized.is_empty() {
            return 100.0;
        }

        let key = history_key(user_id);
        let history =
            match self.cache.list_range(&key, 0, self.history_limit as isize - 1).await {
                Ok(entries) => entries,
                Err(err) => {
                    tracing::warn!(user_id, error = %err, "Failed to read submission history");
                    Vec::new()
                }
            };
        let compared = history.len();

        let max_similarity =
            match tokio::task::spawn_blocking(move || highest_similarity(&normalized, &history))
                .await
            {
                Ok(similarity) => similarity,
                Err(err) => {
                    tracing::warn!(user_id, error = %err, "Similarity comparison aborted");
                    0.0
                }
            };

        if let Err(err) = self.record(&key, text).await {
            tracing::warn!(user_id, error = %err, "Failed to append submission history");
        }

        let uniqueness = (100.0 - max_similarity * 100.0).clamp(0.0, 100.0);
        tracing::debug!(user_id, compared, uniqueness, "Plagiarism check done");
        (uniqueness * 10.0).round() / 10.0
    }

    async fn record(&self, key: &str, text: &str) -> Result<(), CacheError> {
        self.cache.list_prepend(key, text).await?;
        self.cache.list_trim(key, 0, self.history_capacity as isize - 1).await
    }
}

fn normalize(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ").to_lowercase()
}

fn truncated(text: &str) -> Vec<char> {
    text.chars().take(MAX_COMPARED_CHARS).collect()
}

/// Highest ratio between `text` and any history entry. Entries whose
/// character-count bound cannot beat the current best are skipped.
fn highest_similarity(text: &str, history: &[String]) -> f64 {
    let a = truncated(text);
    let mut best = 0.0_f64;

    for entry in history {
        let b = truncated(&normalize(entry));
        if quick_ratio(&a, &b) <= best {
            continue;
        }
        best = best.max(ratio(&a, &b));
        if best >= 1.0 {
            break;
        }
    }

    best
}

/// Ratcliff/Obershelp similarity: twice the number of matching characters
/// divided by the total length of both strings. Matching characters are found
/// by taking the longest common substring and recursing on both sides of it.
pub fn similarity_ratio(a: &str, b: &str) -> f64 {
    ratio(&truncated(a), &truncated(b))
}

fn ratio(a: &[char], b: &[char]) -> f64 {
    let total = a.len() + b.len();
    if total == 0 {
        return 1.0;
    }
    2.0 * matching_chars(a, b) as f64 / total as f64
}

/// Upper bound on `ratio`: matches cannot exceed the shared character counts.
fn quick_ratio(a: &[char], b: &[char]) -> f64 {
    let total = a.len() + b.len();
    if total == 0 {
        return 1.0;
    }

    let mut available: HashMap<char, usize> = HashMap::new();
    for &ch in b {
        *available.entry(ch).or_default() += 1;
    }

    let mut shared = 0;
    for ch in a {
        if let Some(count) = available.get_mut(ch) {
            if *count > 0 {
                *count -= 1;
                shared += 1;
            }
        }
    }

    2.0 * shared as f64 / total as f64
}

fn matching_chars(a: &[char], b: &[char]) -> usize {
    let mut positions: HashMap<char, Vec<usize>> = HashMap::new();
    for (j, &ch) in b.iter().enumerate() {
        positions.entry(ch).or_default().push(j);
    }

    let mut matched = 0;
    let mut pending = vec![(0, a.len(), 0, b.len())];

    while let Some((a_lo, a_hi, b_lo, b_hi)) = pending.pop() {
        let (i, j, size) = longest_match(a, &positions, a_lo, a_hi, b_lo, b_hi);
        if size == 0 {
            continue;
        }

        matched += size;
        if a_lo < i && b_lo < j {
            pending.push((a_lo, i, b_lo, j));
        }
        if i + size < a_hi && j + size < b_hi {
            pending.push((i + size, a_hi, j + size, b_hi));
        }
    }

    matched
}

/// Longest common block of `a[a_lo..a_hi]` and `b[b_lo..b_hi]`, earliest in
/// `a` then in `b` on ties. `positions` maps each char of `b` to its sorted
/// indices, so each row only visits the places where that char occurs.
fn longest_match(
    a: &[char],
    positions: &HashMap<char, Vec<usize>>,
    a_lo: usize,
    a_hi: usize,
    b_lo: usize,
    b_hi: usize,
) -> (usize, usize, usize) {
    let mut best = (a_lo, b_lo, 0);
    let mut run_ending_at: HashMap<usize, usize> = HashMap::new();

    for i in a_lo..a_hi {
        let mut next: HashMap<usize, usize> = HashMap::new();
        if let Some(indices) = positions.get(&a[i]) {
            let start = indices.partition_point(|&j| j < b_lo);
            for &j in indices[start..].iter().take_while(|&&j| j < b_hi) {
                let previous = j
                    .checked_sub(1)
                    .and_then(|prev| run_ending_at.get(&prev))
                    .copied()
                    .unwrap_or(0);
                let size = previous + 1;
                next.insert(j, size);
                if size > best.2 {
                    best = (i + 1 - size, j + 1 - size, size);
                }
            }
        }
        run_ending_at = next;
    }

    best
}
