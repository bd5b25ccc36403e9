use crate::schema::DrawSchema;
use crate::value::Value;
use crate::TileCode;

/// Offset added inside the chosen bucket so the scaled value cannot land on
/// the boundary shared with the previous entry.
pub const NUDGE: f64 = 1e-5;

/// Read-only copy of a pool's identifiers, per-entry counts and total,
/// taken through a recovered schema. Synthesis works on this copy so the
/// live pool is never touched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BagSnapshot {
    pub codes: Vec<TileCode>,
    pub counts: Vec<i64>,
    pub total: i64,
}

impl BagSnapshot {
    /// Reads a snapshot from a live pool. `None` when the schema carries no
    /// total field or the pool does not have the expected shape; a missing
    /// or mistyped count reads as zero, the coercion the host itself uses.
    pub fn read(bag: &Value, schema: &DrawSchema) -> Option<BagSnapshot> {
        let total_field = schema.total_field.as_deref()?;
        let total = bag.get(total_field)?.int()?;
        let entries = bag.get(&schema.array_field)?;
        let len = entries.arr_len()?;
        let mut codes = Vec::with_capacity(len);
        let mut counts = Vec::with_capacity(len);
        for i in 0..len {
            let entry = entries.arr_get(i)?;
            codes.push(entry.get(&schema.value_field)?.code()?);
            counts.push(entry.get(&schema.count_field).and_then(|v| v.int()).unwrap_or(0));
        }
        Some(BagSnapshot { codes, counts, total })
    }
}

/// Synthesizes the entropy values that make a cumulative-weight-inversion
/// draw produce `desired`, in order, against `snapshot`.
///
/// Each emitted value is (prefix + NUDGE) / total for the first entry that
/// matches the target and still has simulated supply; the simulated count
/// and total are then decremented so later values account for earlier
/// draws. Targets that are absent or exhausted at their turn are skipped
/// without emitting anything, and those draw positions fall back to true
/// randomness. The guarantee only holds while the live pool still matches
/// the snapshot when the values are consumed.
pub fn synthesize(snapshot: &BagSnapshot, desired: &[TileCode], max_draws: Option<usize>) -> Vec<f64> {
    let mut counts = snapshot.counts.clone();
    let mut total = snapshot.total;
    let mut out = Vec::new();
    for &code in desired {
        if let Some(max) = max_draws {
            if out.len() >= max {
                break;
            }
        }
        if total <= 0 {
            continue;
        }
        let found = snapshot
            .codes
            .iter()
            .zip(counts.iter())
            .position(|(&c, &n)| c == code && n > 0);
        let idx = match found {
            Some(i) => i,
            None => continue,
        };
        let prefix: i64 = counts[..idx].iter().sum();
        out.push((prefix as f64 + NUDGE) / total as f64);
        counts[idx] -= 1;
        total -= 1;
    }
    out
}

/// Snapshot read plus synthesis in one call, the shape the interception
/// wrappers use. No schema or an unreadable pool yields the empty sequence.
pub fn compute_fractions(
    bag: &Value,
    desired: &[TileCode],
    schema: Option<&DrawSchema>,
    max_draws: Option<usize>,
) -> Vec<f64> {
    let schema = match schema {
        Some(s) => s,
        None => return Vec::new(),
    };
    match BagSnapshot::read(bag, schema) {
        Some(snapshot) => synthesize(&snapshot, desired, max_draws),
        None => Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot(entries: &[(char, i64)]) -> BagSnapshot {
        BagSnapshot {
            codes: entries.iter().map(|&(c, _)| c as TileCode).collect(),
            counts: entries.iter().map(|&(_, n)| n).collect(),
            total: entries.iter().map(|&(_, n)| n).sum(),
        }
    }

    /// The inversion loop the host runs, replayed over the snapshot.
    fn reference_draw(counts: &mut [i64], total: &mut i64, fraction: f64) -> usize {
        let mut k = (fraction * *total as f64).floor() as i64;
        for (i, count) in counts.iter_mut().enumerate() {
            if k < *count {
                *count -= 1;
                *total -= 1;
                return i;
            }
            k -= *count;
        }
        unreachable!("fraction out of range for the pool");
    }

    #[test]
    fn two_targets_get_interval_midpoints() {
        let snap = snapshot(&[('A', 5), ('B', 3), ('C', 2)]);
        let desired = [b'B' as TileCode, b'C' as TileCode];
        let fractions = synthesize(&snap, &desired, None);
        assert_eq!(fractions, vec![(5.0 + NUDGE) / 10.0, (7.0 + NUDGE) / 9.0]);
    }

    #[test]
    fn reference_inversion_consumes_the_sequence_as_intended() {
        let snap = snapshot(&[('A', 5), ('B', 3), ('C', 2)]);
        let desired = [b'B' as TileCode, b'C' as TileCode];
        let fractions = synthesize(&snap, &desired, None);

        let mut counts = snap.counts.clone();
        let mut total = snap.total;
        let picked: Vec<usize> = fractions
            .iter()
            .map(|&f| reference_draw(&mut counts, &mut total, f))
            .collect();
        assert_eq!(picked, vec![1, 2]);
        assert_eq!(counts, vec![5, 2, 1]);
        assert_eq!(total, 8);
    }

    #[test]
    fn absent_targets_are_skipped_silently() {
        let snap = snapshot(&[('A', 2), ('B', 1)]);
        let desired = [b'Z' as TileCode, b'B' as TileCode];
        let fractions = synthesize(&snap, &desired, None);
        assert_eq!(fractions.len(), 1);
        assert_eq!(fractions[0], (2.0 + NUDGE) / 3.0);
    }

    #[test]
    fn exhausted_targets_stop_emitting() {
        let snap = snapshot(&[('A', 1), ('B', 2)]);
        let desired = [b'A' as TileCode, b'A' as TileCode, b'B' as TileCode];
        let fractions = synthesize(&snap, &desired, None);
        // Second A is skipped; B accounts for the one simulated draw.
        assert_eq!(fractions, vec![NUDGE / 3.0, (0.0 + NUDGE) / 2.0]);
    }

    #[test]
    fn repeated_target_walks_its_shrinking_interval() {
        let snap = snapshot(&[('A', 2), ('B', 2)]);
        let desired = [b'B' as TileCode, b'B' as TileCode];
        let fractions = synthesize(&snap, &desired, None);
        assert_eq!(fractions, vec![(2.0 + NUDGE) / 4.0, (2.0 + NUDGE) / 3.0]);

        let mut counts = snap.counts.clone();
        let mut total = snap.total;
        for &f in &fractions {
            assert_eq!(reference_draw(&mut counts, &mut total, f), 1);
        }
        assert_eq!(counts, vec![2, 0]);
    }

    #[test]
    fn max_draws_caps_the_sequence() {
        let snap = snapshot(&[('A', 5)]);
        let desired = [b'A' as TileCode; 4];
        assert_eq!(synthesize(&snap, &desired, Some(2)).len(), 2);
        assert_eq!(synthesize(&snap, &desired, Some(0)).len(), 0);
        assert_eq!(synthesize(&snap, &desired, None).len(), 4);
    }

    #[test]
    fn empty_pool_emits_nothing() {
        let snap = snapshot(&[('A', 0)]);
        let desired = [b'A' as TileCode];
        assert!(synthesize(&snap, &desired, None).is_empty());
    }

    #[test]
    fn zero_count_entry_is_passed_over_for_a_later_match() {
        // Two entries carry the same identifier; the first is exhausted.
        let snap = BagSnapshot {
            codes: vec![b'A' as TileCode, b'A' as TileCode],
            counts: vec![0, 3],
            total: 3,
        };
        let fractions = synthesize(&snap, &[b'A' as TileCode], None);
        assert_eq!(fractions, vec![NUDGE / 3.0]);
    }

    mod snapshot_reads {
        use super::*;
        use crate::schema::DrawSchema;

        fn test_schema() -> DrawSchema {
            DrawSchema {
                wrapper: Some("W".to_string()),
                array_field: "xb".to_string(),
                value_field: "Hb".to_string(),
                count_field: "v".to_string(),
                total_field: Some("fc".to_string()),
            }
        }

        fn pool(entries: &[(char, f64)], total: f64) -> Value {
            let items: Vec<Value> = entries
                .iter()
                .map(|&(c, n)| {
                    let e = Value::object();
                    e.set("Hb", Value::Num(c as u32 as f64));
                    e.set("v", Value::Num(n));
                    e
                })
                .collect();
            let bag = Value::object();
            bag.set("xb", Value::array(items));
            bag.set("fc", Value::Num(total));
            bag
        }

        #[test]
        fn reads_codes_counts_and_total() {
            let bag = pool(&[('A', 5.0), ('B', 3.0)], 8.0);
            let snap = BagSnapshot::read(&bag, &test_schema()).unwrap();
            assert_eq!(snap.codes, vec![65, 66]);
            assert_eq!(snap.counts, vec![5, 3]);
            assert_eq!(snap.total, 8);
        }

        #[test]
        fn missing_count_reads_as_zero() {
            let bag = pool(&[('A', 5.0)], 5.0);
            let entry = bag.get("xb").unwrap().arr_get(0).unwrap();
            entry.set("v", Value::Null);
            let snap = BagSnapshot::read(&bag, &test_schema()).unwrap();
            assert_eq!(snap.counts, vec![0]);
        }

        #[test]
        fn schema_without_total_cannot_snapshot() {
            let bag = pool(&[('A', 5.0)], 5.0);
            let mut schema = test_schema();
            schema.total_field = None;
            assert_eq!(BagSnapshot::read(&bag, &schema), None);
        }

        #[test]
        fn malformed_pool_cannot_snapshot() {
            let bag = Value::object();
            bag.set("fc", Value::Num(3.0));
            assert_eq!(BagSnapshot::read(&bag, &test_schema()), None);

            bag.set("xb", Value::str("not an array"));
            assert_eq!(BagSnapshot::read(&bag, &test_schema()), None);
        }

        #[test]
        fn compute_fractions_degrades_to_empty() {
            let bag = pool(&[('B', 3.0)], 3.0);
            let desired = [b'B' as TileCode];
            assert!(compute_fractions(&bag, &desired, None, None).is_empty());
            let got = compute_fractions(&bag, &desired, Some(&test_schema()), None);
            assert_eq!(got, vec![NUDGE / 3.0]);
        }
    }
}
