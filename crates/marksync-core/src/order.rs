//! Fractional order keys.
//!
//! An order key is a dot separated list of non-negative integers such as
//! `1.7.4`. Keys compare segment by segment as integers, and a key that is a
//! strict prefix of another sorts first, so `1 < 1.1 < 1.2 < 2 < 11`. A new
//! key can always be minted between two neighbours by descending one level,
//! which lets devices insert siblings without renumbering or coordinating.
//!
//! Keys arrive from peers and are never trusted: anything that does not parse
//! is treated as unordered and sorts after every valid key.

use std::cmp::Ordering;

use thiserror::Error;

/// A malformed order key
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum OrderKeyError {
    /// A segment is not a non-negative integer
    #[error("invalid order key segment `{0}`")]
    InvalidSegment(String),
}

/// Parse an order key into its integer segments.
///
/// Empty segments are skipped, so `""` and `".."` are empty keys and `".5."`
/// is `[5]`.
///
/// # Examples
///
/// ```
/// use marksync_core::order;
///
/// assert_eq!(order::parse("1.7.4").unwrap(), vec![1, 7, 4]);
/// assert_eq!(order::parse(".5.").unwrap(), vec![5]);
/// assert!(order::parse("1.-2").is_err());
/// ```
pub fn parse(key: &str) -> Result<Vec<u64>, OrderKeyError> {
    key.split('.')
        .filter(|segment| !segment.is_empty())
        .map(|segment| {
            if !segment.bytes().all(|byte| byte.is_ascii_digit()) {
                return Err(OrderKeyError::InvalidSegment(segment.to_string()));
            }
            segment
                .parse::<u64>()
                .map_err(|_| OrderKeyError::InvalidSegment(segment.to_string()))
        })
        .collect()
}

/// Join segments with `.`. Returns an empty string if any segment is negative.
pub fn format(segments: &[i64]) -> String {
    if segments.iter().any(|segment| *segment < 0) {
        return String::new();
    }
    join(segments.iter())
}

fn join<T: ToString>(segments: impl Iterator<Item = T>) -> String {
    segments
        .map(|segment| segment.to_string())
        .collect::<Vec<_>>()
        .join(".")
}

fn format_segments(segments: &[u64]) -> String {
    join(segments.iter())
}

/// Compare two keys as integer sequences.
///
/// Unparseable keys sort after valid ones and are equal to each other.
pub fn compare(a: &str, b: &str) -> Ordering {
    match (parse(a), parse(b)) {
        (Ok(a), Ok(b)) => a.cmp(&b),
        (Ok(_), Err(_)) => Ordering::Less,
        (Err(_), Ok(_)) => Ordering::Greater,
        (Err(_), Err(_)) => Ordering::Equal,
    }
}

/// Total order used for siblings: key first, object id breaks ties between
/// identical keys minted concurrently on different devices.
pub fn compare_siblings(a_order: &str, a_object_id: &str, b_order: &str, b_object_id: &str) -> Ordering {
    compare(a_order, b_order).then_with(|| a_object_id.cmp(b_object_id))
}

/// True iff `keys` is sorted according to [`compare`].
pub fn is_ordered<S: AsRef<str>>(keys: &[S]) -> bool {
    keys.windows(2)
        .all(|pair| compare(pair[0].as_ref(), pair[1].as_ref()) != Ordering::Greater)
}

/// Lower-bound position of `key` in `sorted`.
pub fn insertion_index<S: AsRef<str>>(sorted: &[S], key: &str) -> usize {
    sorted.partition_point(|existing| compare(existing.as_ref(), key) == Ordering::Less)
}

/// First segment of a key, if it parses.
pub fn first_segment(key: &str) -> Option<u64> {
    parse(key).ok().and_then(|segments| segments.first().copied())
}

/// Whether the key parses and is non-empty.
pub fn is_valid(key: &str) -> bool {
    parse(key).is_ok_and(|segments| !segments.is_empty())
}

/// Mint a key strictly between `prev` and `next`, rooted at `parent`.
///
/// Either neighbour may be absent. When there is no `prev` and `next` already
/// sorts at or below `parent`, the key is rooted at `next`'s prefix instead,
/// e.g. `1.3.1.0.1` in front of `1.3.1.1`. Malformed neighbours are ignored. The
/// result never ends in a zero segment, so there is always room to insert
/// before it later. Returns `None` when no key exists between the two, e.g.
/// `1` and `1.0`.
///
/// # Examples
///
/// ```
/// use marksync_core::order;
///
/// assert_eq!(order::between(None, None, "1.1").as_deref(), Some("1.1.1"));
/// assert_eq!(order::between(Some("1.1.3"), None, "1.1").as_deref(), Some("1.1.4"));
/// assert_eq!(order::between(None, Some("1.1.1"), "1.1").as_deref(), Some("1.1.0.1"));
/// assert_eq!(order::between(Some("1.1.1"), Some("1.1.2"), "1.1").as_deref(), Some("1.1.1.1"));
/// ```
pub fn between(prev: Option<&str>, next: Option<&str>, parent: &str) -> Option<String> {
    let parent = parse(parent).unwrap_or_default();
    let prev = prev.and_then(|key| parse(key).ok()).filter(|key| !key.is_empty());
    let next = next.and_then(|key| parse(key).ok()).filter(|key| !key.is_empty());

    let (lower, fill) = match (prev, next.as_deref()) {
        (Some(prev), _) => (prev, parent),
        // The first sibling sorts below this parent (another device minted
        // it), so mint just below it from its own prefix.
        (None, Some(upper)) if parent.as_slice() >= upper => {
            (Vec::new(), upper[..upper.len() - 1].to_vec())
        }
        (None, _) => (parent.clone(), parent),
    };
    if let Some(upper) = next.as_deref() {
        if lower.as_slice() >= upper {
            return None;
        }
    }

    key_between(&lower, next.as_deref(), &fill).map(|segments| format_segments(&segments))
}

/// Walks both bounds segment by segment. `lo_tight`/`hi_tight` track whether
/// the prefix built so far still equals the corresponding bound.
fn key_between(lo: &[u64], hi: Option<&[u64]>, fill: &[u64]) -> Option<Vec<u64>> {
    let min_len = fill.len() + 1;
    let max_steps = lo.len().max(hi.map_or(0, <[u64]>::len)).max(min_len) + 2;

    let mut out = Vec::with_capacity(min_len);
    let mut lo_tight = true;
    let mut hi_tight = hi.is_some();

    for i in 0..max_steps {
        let lo_val = if lo_tight { lo.get(i).copied() } else { None };
        if lo_val.is_none() {
            // out == lo, any extension is already greater
            lo_tight = false;
        }

        let hi_val = if hi_tight {
            match hi.and_then(|upper| upper.get(i).copied()) {
                Some(value) => Some(value),
                // out == hi, every extension is greater than hi
                None => return None,
            }
        } else {
            None
        };

        if let (Some(low), Some(high)) = (lo_val, hi_val) {
            if low > high {
                return None;
            }
        }

        let may_stop = i + 1 >= min_len;
        if may_stop {
            let candidate = match lo_val {
                Some(low) => low.checked_add(1),
                None => Some(1),
            };
            if let Some(candidate) = candidate {
                if hi_val.map_or(true, |high| candidate < high) {
                    out.push(candidate);
                    return Some(out);
                }
            }
        }

        let pick = match (lo_val, hi_val) {
            (Some(low), _) => low,
            (None, Some(high)) => {
                if may_stop {
                    0
                } else {
                    fill.get(i).copied().unwrap_or(0).min(high)
                }
            }
            (None, None) => fill.get(i).copied().unwrap_or(0),
        };
        if hi_val.is_some_and(|high| pick < high) {
            hi_tight = false;
        }
        out.push(pick);
    }

    None
}

/// Key for a node placed at `index` under a parent keyed `parent`.
///
/// Uses `parent.(index + 1)` when that still fits between the neighbours and
/// falls back to [`between`] otherwise.
pub fn for_position(parent: &str, index: usize, prev: Option<&str>, next: Option<&str>) -> String {
    let mut segments = parse(parent).unwrap_or_default();
    segments.push(index as u64 + 1);
    let simple = format_segments(&segments);

    let after_prev = prev.map_or(true, |prev| compare(prev, &simple) == Ordering::Less);
    let before_next = next.map_or(true, |next| compare(&simple, next) == Ordering::Less);
    if after_prev && before_next {
        return simple;
    }

    between(prev, next, parent)
        .or_else(|| between(prev, None, parent))
        .unwrap_or(simple)
}
