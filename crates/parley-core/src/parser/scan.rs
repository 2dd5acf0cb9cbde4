//! Marker search helpers over a growing buffer

/// Largest char boundary in `s` that is `<= index`
pub(super) fn floor_boundary(s: &str, index: usize) -> usize {
    if index >= s.len() {
        return s.len();
    }
    let mut i = index;
    while !s.is_char_boundary(i) {
        i -= 1;
    }
    i
}

/// Smallest char boundary in `s` that is `>= index`
pub(super) fn ceil_boundary(s: &str, index: usize) -> usize {
    if index >= s.len() {
        return s.len();
    }
    let mut i = index;
    while !s.is_char_boundary(i) {
        i += 1;
    }
    i
}

/// Where to resume searching after `scanned` bytes were already searched.
/// Steps back far enough that a marker straddling the old end is still found.
pub(super) fn resume_from(buffer: &str, scanned: usize, marker_len: usize) -> usize {
    floor_boundary(buffer, scanned.saturating_sub(marker_len.saturating_sub(1)))
}

/// Byte offset of the first `marker` at or after `from`
pub(super) fn find_from(buffer: &str, marker: &str, from: usize) -> Option<usize> {
    buffer.get(from..)?.find(marker).map(|i| i + from)
}

/// Length of the longest proper prefix of `marker` that `buffer` ends with
pub(super) fn partial_marker_suffix(buffer: &str, marker: &str) -> usize {
    (1..marker.len())
        .rev()
        .filter(|&k| marker.is_char_boundary(k))
        .find(|&k| buffer.ends_with(&marker[..k]))
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resume_from_steps_back() {
        let buffer = "abc---NORM";
        assert_eq!(resume_from(buffer, 10, 5), 6);
        assert_eq!(resume_from(buffer, 2, 5), 0);
    }

    #[test]
    fn test_find_from() {
        let buffer = "xx##yy##";
        assert_eq!(find_from(buffer, "##", 0), Some(2));
        assert_eq!(find_from(buffer, "##", 3), Some(6));
        assert_eq!(find_from(buffer, "##", 7), None);
        assert_eq!(find_from(buffer, "##", 100), None);
    }

    #[test]
    fn test_partial_marker_suffix() {
        assert_eq!(partial_marker_suffix("hello---MA", "---MACHINE---"), 5);
        assert_eq!(partial_marker_suffix("hello-", "---MACHINE---"), 1);
        assert_eq!(partial_marker_suffix("hello", "---MACHINE---"), 0);
        // A complete marker is not a partial one
        assert_eq!(partial_marker_suffix("##", "##"), 1);
    }

    #[test]
    fn test_boundaries_respect_multibyte_chars() {
        let s = "aé"; // 'é' occupies bytes 1..3
        assert_eq!(floor_boundary(s, 2), 1);
        assert_eq!(ceil_boundary(s, 2), 3);
        assert_eq!(floor_boundary(s, 10), 3);
    }
}
