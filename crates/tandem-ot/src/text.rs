//! OT on a linear character sequence.
//!
//! Positions count Unicode scalar values, not bytes. Deletes record the
//! removed text so an op can be inverted without access to the document it
//! applied to.

use serde::{Deserialize, Serialize};
use tandem_common::{OtError, OtResult};

/// A single edit of a text property: an insertion or a deletion at an offset.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum TextOp {
    Insert {
        pos: usize,
        #[serde(rename = "str")]
        text: String,
    },
    Delete {
        pos: usize,
        #[serde(rename = "str")]
        text: String,
    },
}

fn char_count(s: &str) -> usize {
    s.chars().count()
}

fn byte_offset(s: &str, chars: usize) -> usize {
    s.char_indices()
        .nth(chars)
        .map(|(i, _)| i)
        .unwrap_or(s.len())
}

fn remove_chars(s: &mut String, from: usize, to: usize) {
    let start = byte_offset(s, from);
    let end = byte_offset(s, to);
    s.replace_range(start..end, "");
}

impl TextOp {
    pub fn insert(pos: usize, text: impl Into<String>) -> Self {
        TextOp::Insert {
            pos,
            text: text.into(),
        }
    }

    pub fn delete(pos: usize, text: impl Into<String>) -> Self {
        TextOp::Delete {
            pos,
            text: text.into(),
        }
    }

    #[inline]
    pub fn pos(&self) -> usize {
        match self {
            TextOp::Insert { pos, .. } | TextOp::Delete { pos, .. } => *pos,
        }
    }

    #[inline]
    pub fn text(&self) -> &str {
        match self {
            TextOp::Insert { text, .. } | TextOp::Delete { text, .. } => text,
        }
    }

    /// An op with empty text changes nothing.
    #[inline]
    pub fn is_nop(&self) -> bool {
        self.text().is_empty()
    }

    pub fn apply(&self, value: &str) -> OtResult<String> {
        // A transformed-away op may carry a stale position; it changes
        // nothing either way.
        if self.is_nop() {
            return Ok(value.to_owned());
        }
        let len = char_count(value);
        match self {
            TextOp::Insert { pos, text } => {
                if *pos > len {
                    return Err(OtError::OutOfBound { pos: *pos, len });
                }
                let at = byte_offset(value, *pos);
                let mut out = String::with_capacity(value.len() + text.len());
                out.push_str(&value[..at]);
                out.push_str(text);
                out.push_str(&value[at..]);
                Ok(out)
            }
            TextOp::Delete { pos, text } => {
                let del_len = char_count(text);
                if *pos + del_len > len {
                    return Err(OtError::OutOfBound {
                        pos: *pos + del_len,
                        len,
                    });
                }
                let start = byte_offset(value, *pos);
                let end = byte_offset(value, *pos + del_len);
                if value[start..end] != *text {
                    return Err(OtError::StateMismatch {
                        expected: text.as_str().into(),
                        found: value[start..end].into(),
                    });
                }
                let mut out = String::with_capacity(value.len() - text.len());
                out.push_str(&value[..start]);
                out.push_str(&value[end..]);
                Ok(out)
            }
        }
    }

    pub fn invert(&self) -> TextOp {
        match self {
            TextOp::Insert { pos, text } => TextOp::delete(*pos, text.clone()),
            TextOp::Delete { pos, text } => TextOp::insert(*pos, text.clone()),
        }
    }

    /// Merge `other` (applied after `self`) into a single op, when the two
    /// edits form one contiguous run. Returns `None` otherwise.
    pub fn compose(&self, other: &TextOp) -> Option<TextOp> {
        match (self, other) {
            (TextOp::Insert { pos: p1, text: s1 }, TextOp::Insert { pos: p2, text: s2 })
                if *p2 >= *p1 && *p2 <= *p1 + char_count(s1) =>
            {
                let mut merged = s1.clone();
                merged.insert_str(byte_offset(s1, *p2 - *p1), s2);
                Some(TextOp::insert(*p1, merged))
            }
            (TextOp::Delete { pos: p1, text: s1 }, TextOp::Delete { pos: p2, text: s2 }) => {
                if *p2 == *p1 {
                    Some(TextOp::delete(*p1, format!("{s1}{s2}")))
                } else if *p2 + char_count(s2) == *p1 {
                    Some(TextOp::delete(*p2, format!("{s2}{s1}")))
                } else {
                    None
                }
            }
            (TextOp::Insert { pos: p1, text: s1 }, TextOp::Delete { pos: p2, text: s2 }) => {
                // The deletion must fall entirely within the inserted run.
                let (len1, len2) = (char_count(s1), char_count(s2));
                if *p2 < *p1 || *p2 + len2 > *p1 + len1 {
                    return None;
                }
                let start = byte_offset(s1, *p2 - *p1);
                let end = byte_offset(s1, *p2 - *p1 + len2);
                if s1[start..end] != *s2 {
                    return None;
                }
                let mut remaining = s1.clone();
                remaining.replace_range(start..end, "");
                Some(TextOp::insert(*p1, remaining))
            }
            _ => None,
        }
    }

    /// Transform concurrent `a` and `b`, both produced against the same base
    /// text, so that applying them in either order converges (TP1).
    ///
    /// Positional ties between two inserts resolve in favor of `a`: `a` keeps
    /// its position and `b` shifts right.
    pub fn transform(a: &mut TextOp, b: &mut TextOp) {
        if a.is_nop() || b.is_nop() {
            return;
        }
        match (&mut *a, &mut *b) {
            (TextOp::Insert { pos: ap, text: at }, TextOp::Insert { pos: bp, text: bt }) => {
                if *ap <= *bp {
                    *bp += char_count(at);
                } else {
                    *ap += char_count(bt);
                }
            }
            (TextOp::Insert { pos: ap, text: at }, TextOp::Delete { pos: bp, text: bt }) => {
                transform_insert_delete(ap, at, bp, bt);
            }
            (TextOp::Delete { pos: ap, text: at }, TextOp::Insert { pos: bp, text: bt }) => {
                transform_insert_delete(bp, bt, ap, at);
            }
            (TextOp::Delete { pos: ap, text: at }, TextOp::Delete { pos: bp, text: bt }) => {
                let alen = char_count(at);
                let blen = char_count(bt);
                if *ap + alen <= *bp {
                    *bp -= alen;
                } else if *bp + blen <= *ap {
                    *ap -= blen;
                } else {
                    // Overlapping ranges: the common region is deleted by
                    // whichever op applies first, so trim it from both.
                    let start = (*ap).max(*bp);
                    let end = (*ap + alen).min(*bp + blen);
                    remove_chars(at, start - *ap, end - *ap);
                    remove_chars(bt, start - *bp, end - *bp);
                    let new_ap = (*ap).min(*bp);
                    if *bp < *ap {
                        *ap = new_ap;
                    } else {
                        *bp = new_ap;
                    }
                }
            }
        }
    }
}

/// Shared insert-vs-delete case. `ip`/`it` is the insert, `dp`/`dt` the delete.
fn transform_insert_delete(ip: &mut usize, it: &mut String, dp: &mut usize, dt: &mut String) {
    let ilen = char_count(it);
    let dlen = char_count(dt);
    if *ip <= *dp {
        *dp += ilen;
    } else if *ip >= *dp + dlen {
        *ip -= dlen;
    } else {
        // The insert lands strictly inside the deleted range: the delete
        // swallows the inserted text and the insert degenerates to a NOP.
        let at = byte_offset(dt, *ip - *dp);
        dt.insert_str(at, it);
        *ip = *dp;
        it.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn tp1(base: &str, a: TextOp, b: TextOp) {
        let mut a2 = a.clone();
        let mut b2 = b.clone();
        TextOp::transform(&mut a2, &mut b2);
        let left = a2.apply(&b.apply(base).unwrap()).unwrap();
        let right = b2.apply(&a.apply(base).unwrap()).unwrap();
        assert_eq!(left, right, "a={a:?} b={b:?} a'={a2:?} b'={b2:?}");
    }

    #[test]
    fn apply_insert_and_delete() {
        assert_eq!(TextOp::insert(5, "!").apply("Hello").unwrap(), "Hello!");
        assert_eq!(TextOp::insert(0, ">").apply("Hello").unwrap(), ">Hello");
        assert_eq!(TextOp::delete(1, "el").apply("Hello").unwrap(), "Hlo");
    }

    #[test]
    fn apply_is_char_based() {
        assert_eq!(TextOp::insert(1, "ß").apply("äö").unwrap(), "äßö");
        assert_eq!(TextOp::delete(0, "ä").apply("äö").unwrap(), "ö");
    }

    #[test]
    fn apply_out_of_bound() {
        assert_eq!(
            TextOp::insert(6, "!").apply("Hello"),
            Err(OtError::OutOfBound { pos: 6, len: 5 })
        );
        assert!(matches!(
            TextOp::delete(3, "lo!").apply("Hello"),
            Err(OtError::OutOfBound { .. })
        ));
    }

    #[test]
    fn apply_checks_deleted_text() {
        assert!(matches!(
            TextOp::delete(0, "xy").apply("Hello"),
            Err(OtError::StateMismatch { .. })
        ));
    }

    #[test]
    fn invert_round_trip() {
        let base = "Hello";
        for op in [TextOp::insert(2, "xy"), TextOp::delete(1, "ell")] {
            let applied = op.apply(base).unwrap();
            assert_eq!(op.invert().apply(&applied).unwrap(), base);
            assert_eq!(op.invert().invert(), op);
        }
    }

    #[test]
    fn transform_concurrent_inserts() {
        let mut a = TextOp::insert(5, "!");
        let mut b = TextOp::insert(0, ">");
        TextOp::transform(&mut a, &mut b);
        assert_eq!(a, TextOp::insert(6, "!"));
        assert_eq!(b, TextOp::insert(0, ">"));
        tp1("Hello", TextOp::insert(5, "!"), TextOp::insert(0, ">"));
    }

    #[test]
    fn transform_insert_tie_favors_left() {
        let mut a = TextOp::insert(2, "x");
        let mut b = TextOp::insert(2, "y");
        TextOp::transform(&mut a, &mut b);
        assert_eq!(a, TextOp::insert(2, "x"));
        assert_eq!(b, TextOp::insert(3, "y"));
        tp1("abcd", TextOp::insert(2, "x"), TextOp::insert(2, "y"));
    }

    #[test]
    fn transform_insert_inside_delete_is_swallowed() {
        let mut a = TextOp::insert(3, "X");
        let mut b = TextOp::delete(1, "bcde");
        TextOp::transform(&mut a, &mut b);
        assert!(a.is_nop());
        assert_eq!(b, TextOp::delete(1, "bcXde"));
        tp1("abcdef", TextOp::insert(3, "X"), TextOp::delete(1, "bcde"));
    }

    #[test]
    fn transform_insert_at_delete_boundaries() {
        tp1("abc", TextOp::insert(0, "X"), TextOp::delete(0, "ab"));
        tp1("abc", TextOp::insert(2, "X"), TextOp::delete(0, "ab"));
        tp1("abc", TextOp::delete(1, "bc"), TextOp::insert(3, "X"));
    }

    #[test]
    fn transform_overlapping_deletes() {
        let mut a = TextOp::delete(1, "bcd");
        let mut b = TextOp::delete(2, "cdef");
        TextOp::transform(&mut a, &mut b);
        assert_eq!(a, TextOp::delete(1, "b"));
        assert_eq!(b, TextOp::delete(1, "ef"));
        tp1("abcdefg", TextOp::delete(1, "bcd"), TextOp::delete(2, "cdef"));
    }

    #[test]
    fn transform_identical_deletes_cancel() {
        let mut a = TextOp::delete(1, "bc");
        let mut b = TextOp::delete(1, "bc");
        TextOp::transform(&mut a, &mut b);
        assert!(a.is_nop());
        assert!(b.is_nop());
    }

    #[test]
    fn transform_contained_delete() {
        tp1(
            "0123456789",
            TextOp::delete(0, "0123456789"),
            TextOp::delete(2, "23"),
        );
    }

    #[test]
    fn compose_adjacent_runs() {
        let a = TextOp::insert(2, "ab");
        let b = TextOp::insert(4, "c");
        assert_eq!(a.compose(&b), Some(TextOp::insert(2, "abc")));

        let a = TextOp::delete(3, "de");
        let b = TextOp::delete(3, "fg");
        assert_eq!(a.compose(&b), Some(TextOp::delete(3, "defg")));

        let a = TextOp::delete(3, "de");
        let b = TextOp::delete(1, "bc");
        assert_eq!(a.compose(&b), Some(TextOp::delete(1, "bcde")));

        let a = TextOp::insert(2, "abc");
        let b = TextOp::delete(3, "b");
        assert_eq!(a.compose(&b), Some(TextOp::insert(2, "ac")));

        assert_eq!(TextOp::insert(0, "a").compose(&TextOp::insert(5, "b")), None);
    }

    #[test]
    fn json_round_trip() {
        let op = TextOp::insert(5, "!");
        let json = serde_json::to_value(&op).unwrap();
        assert_eq!(
            json,
            serde_json::json!({ "type": "insert", "pos": 5, "str": "!" })
        );
        assert_eq!(serde_json::from_value::<TextOp>(json).unwrap(), op);
    }
}
