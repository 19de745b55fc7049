//! OT on an ordered sequence of JSON values.
//!
//! Each op inserts or removes a single element. Deletes record the removed
//! value so the op can be inverted without access to the array.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tandem_common::{OtError, OtResult};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ArrayOp {
    /// Produced by transformation only; clients never generate it.
    Nop,
    Insert { pos: usize, val: Value },
    Delete { pos: usize, val: Value },
}

impl ArrayOp {
    pub fn insert(pos: usize, val: impl Into<Value>) -> Self {
        ArrayOp::Insert {
            pos,
            val: val.into(),
        }
    }

    pub fn delete(pos: usize, val: impl Into<Value>) -> Self {
        ArrayOp::Delete {
            pos,
            val: val.into(),
        }
    }

    #[inline]
    pub fn is_nop(&self) -> bool {
        matches!(self, ArrayOp::Nop)
    }

    pub fn apply(&self, value: &Value) -> OtResult<Value> {
        let arr = value
            .as_array()
            .ok_or_else(|| OtError::Adapter("array op applied to a non-array value".into()))?;
        match self {
            ArrayOp::Nop => Ok(value.clone()),
            ArrayOp::Insert { pos, val } => {
                if *pos > arr.len() {
                    return Err(OtError::OutOfBound {
                        pos: *pos,
                        len: arr.len(),
                    });
                }
                let mut out = arr.clone();
                out.insert(*pos, val.clone());
                Ok(Value::Array(out))
            }
            ArrayOp::Delete { pos, val } => {
                if *pos >= arr.len() {
                    return Err(OtError::OutOfBound {
                        pos: *pos,
                        len: arr.len(),
                    });
                }
                if arr[*pos] != *val {
                    return Err(OtError::StateMismatch {
                        expected: val.to_string().into(),
                        found: arr[*pos].to_string().into(),
                    });
                }
                let mut out = arr.clone();
                out.remove(*pos);
                Ok(Value::Array(out))
            }
        }
    }

    pub fn invert(&self) -> ArrayOp {
        match self {
            ArrayOp::Nop => ArrayOp::Nop,
            ArrayOp::Insert { pos, val } => ArrayOp::delete(*pos, val.clone()),
            ArrayOp::Delete { pos, val } => ArrayOp::insert(*pos, val.clone()),
        }
    }

    /// Merge `other` (applied after `self`) into one op. Only an insert
    /// cancelled by a delete of the same element composes; everything else
    /// is `None`.
    pub fn compose(&self, other: &ArrayOp) -> Option<ArrayOp> {
        match (self, other) {
            (ArrayOp::Nop, _) => Some(other.clone()),
            (_, ArrayOp::Nop) => Some(self.clone()),
            (ArrayOp::Insert { pos: p1, val: v1 }, ArrayOp::Delete { pos: p2, val: v2 })
                if p1 == p2 && v1 == v2 =>
            {
                Some(ArrayOp::Nop)
            }
            _ => None,
        }
    }

    /// Transform concurrent `a` and `b` against the same base array (TP1).
    /// Positional ties between two inserts resolve in favor of `a`.
    pub fn transform(a: &mut ArrayOp, b: &mut ArrayOp) {
        match (&mut *a, &mut *b) {
            (ArrayOp::Nop, _) | (_, ArrayOp::Nop) => {}
            (ArrayOp::Insert { pos: ap, .. }, ArrayOp::Insert { pos: bp, .. }) => {
                if *ap <= *bp {
                    *bp += 1;
                } else {
                    *ap += 1;
                }
            }
            (ArrayOp::Insert { pos: ap, .. }, ArrayOp::Delete { pos: bp, .. }) => {
                if *ap <= *bp {
                    *bp += 1;
                } else {
                    *ap -= 1;
                }
            }
            (ArrayOp::Delete { pos: ap, .. }, ArrayOp::Insert { pos: bp, .. }) => {
                if *bp <= *ap {
                    *ap += 1;
                } else {
                    *bp -= 1;
                }
            }
            (ArrayOp::Delete { pos: ap, .. }, ArrayOp::Delete { pos: bp, .. }) => {
                // Same base state, same index: the same element, deleted twice.
                if *ap == *bp {
                    *a = ArrayOp::Nop;
                    *b = ArrayOp::Nop;
                } else if *ap < *bp {
                    *bp -= 1;
                } else {
                    *ap -= 1;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn tp1(base: Value, a: ArrayOp, b: ArrayOp) {
        let mut a2 = a.clone();
        let mut b2 = b.clone();
        ArrayOp::transform(&mut a2, &mut b2);
        let left = a2.apply(&b.apply(&base).unwrap()).unwrap();
        let right = b2.apply(&a.apply(&base).unwrap()).unwrap();
        assert_eq!(left, right, "a={a:?} b={b:?} a'={a2:?} b'={b2:?}");
    }

    #[test]
    fn apply_insert_and_delete() {
        let base = json!(["a", "b"]);
        assert_eq!(
            ArrayOp::insert(1, "x").apply(&base).unwrap(),
            json!(["a", "x", "b"])
        );
        assert_eq!(ArrayOp::delete(0, "a").apply(&base).unwrap(), json!(["b"]));
    }

    #[test]
    fn apply_rejects_bad_targets() {
        assert!(matches!(
            ArrayOp::insert(0, 1).apply(&json!("text")),
            Err(OtError::Adapter(_))
        ));
        assert!(matches!(
            ArrayOp::delete(2, "x").apply(&json!(["a"])),
            Err(OtError::OutOfBound { .. })
        ));
        assert!(matches!(
            ArrayOp::delete(0, "x").apply(&json!(["a"])),
            Err(OtError::StateMismatch { .. })
        ));
    }

    #[test]
    fn invert_round_trip() {
        let base = json!([1, 2, 3]);
        for op in [ArrayOp::insert(1, "x"), ArrayOp::delete(2, 3)] {
            let applied = op.apply(&base).unwrap();
            assert_eq!(op.invert().apply(&applied).unwrap(), base);
            assert_eq!(op.invert().invert(), op);
        }
    }

    #[test]
    fn transform_inserts() {
        tp1(json!([1, 2]), ArrayOp::insert(0, "a"), ArrayOp::insert(2, "b"));
        tp1(json!([1, 2]), ArrayOp::insert(1, "a"), ArrayOp::insert(1, "b"));
    }

    #[test]
    fn transform_insert_delete() {
        tp1(json!([1, 2]), ArrayOp::insert(1, "a"), ArrayOp::delete(1, 2));
        tp1(json!([1, 2]), ArrayOp::insert(2, "a"), ArrayOp::delete(1, 2));
        tp1(json!([1, 2]), ArrayOp::delete(0, 1), ArrayOp::insert(1, "a"));
    }

    #[test]
    fn transform_same_delete_cancels() {
        let mut a = ArrayOp::delete(1, 2);
        let mut b = ArrayOp::delete(1, 2);
        ArrayOp::transform(&mut a, &mut b);
        assert!(a.is_nop() && b.is_nop());
        tp1(json!([1, 2, 3]), ArrayOp::delete(1, 2), ArrayOp::delete(1, 2));
    }

    #[test]
    fn transform_distinct_deletes() {
        tp1(json!([1, 2, 3]), ArrayOp::delete(0, 1), ArrayOp::delete(2, 3));
        tp1(json!([1, 2, 3]), ArrayOp::delete(2, 3), ArrayOp::delete(0, 1));
    }

    #[test]
    fn compose_insert_then_delete_cancels() {
        let a = ArrayOp::insert(1, "x");
        assert_eq!(a.compose(&ArrayOp::delete(1, "x")), Some(ArrayOp::Nop));
        assert_eq!(a.compose(&ArrayOp::delete(0, "y")), None);
    }

    #[test]
    fn json_round_trip() {
        let op = ArrayOp::insert(2, json!({"k": 1}));
        let json = serde_json::to_value(&op).unwrap();
        assert_eq!(
            json,
            json!({ "type": "insert", "pos": 2, "val": {"k": 1} })
        );
        assert_eq!(serde_json::from_value::<ArrayOp>(json).unwrap(), op);
        assert_eq!(
            serde_json::to_value(ArrayOp::Nop).unwrap(),
            json!({ "type": "nop" })
        );
    }
}
