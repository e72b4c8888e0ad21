//! Combine operators for collective reductions.
//!
//! The kernels here are plain slice functions so every backend applies the
//! exact same arithmetic: [`LocalComm`](crate::algs::communicator::LocalComm)
//! folds contributions with them directly and the MPI backend registers them
//! as user operations.

use crate::assembly_error::AssemblyError;

/// Reduction semantics of one split-phase slot.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum CombineOp {
    Sum,
    Max,
    Min,
}

impl CombineOp {
    /// Tag word stored next to a partial in a mixed-operator reduction.
    #[inline]
    pub const fn tag(self) -> f64 {
        match self {
            CombineOp::Sum => 0.0,
            CombineOp::Max => 1.0,
            CombineOp::Min => 2.0,
        }
    }

    /// Decode a tag word; `None` for anything that is not an operator tag.
    #[inline]
    pub fn from_tag(tag: f64) -> Option<Self> {
        if tag == 0.0 {
            Some(CombineOp::Sum)
        } else if tag == 1.0 {
            Some(CombineOp::Max)
        } else if tag == 2.0 {
            Some(CombineOp::Min)
        } else {
            None
        }
    }

    /// Combine `x` into the running value `acc`.
    #[inline]
    pub fn apply(self, acc: f64, x: f64) -> f64 {
        match self {
            CombineOp::Sum => acc + x,
            CombineOp::Max => acc.max(x),
            CombineOp::Min => acc.min(x),
        }
    }
}

/// Integer collectives used by the stash protocol.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum CountOp {
    Sum,
    /// First half combined with max, second half with sum.
    MaxSum,
    BitOr,
}

/// Floating-point collective selector.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ScalarReduce {
    /// One operator for every element.
    Native(CombineOp),
    /// Buffer of `2n` words: `n` partials followed by `n` operator tags.
    Tagged,
}

/// `inout[i] = inout[i] (op) input[i]`.
pub fn combine_u64(op: CountOp, input: &[u64], inout: &mut [u64]) {
    debug_assert_eq!(input.len(), inout.len());
    match op {
        CountOp::Sum => {
            for (o, &i) in inout.iter_mut().zip(input) {
                *o += i;
            }
        }
        CountOp::MaxSum => {
            let half = inout.len() / 2;
            let (max_out, sum_out) = inout.split_at_mut(half);
            let (max_in, sum_in) = input.split_at(half);
            for (o, &i) in max_out.iter_mut().zip(max_in) {
                *o = (*o).max(i);
            }
            for (o, &i) in sum_out.iter_mut().zip(sum_in) {
                *o += i;
            }
        }
        CountOp::BitOr => {
            for (o, &i) in inout.iter_mut().zip(input) {
                *o |= i;
            }
        }
    }
}

/// `inout[i] = op(inout[i], input[i])` for a single operator.
pub fn combine_f64(op: CombineOp, input: &[f64], inout: &mut [f64]) {
    debug_assert_eq!(input.len(), inout.len());
    for (o, &i) in inout.iter_mut().zip(input) {
        *o = op.apply(*o, i);
    }
}

/// Mixed-operator kernel over tag-annotated buffers.
///
/// Both buffers hold `n` partials followed by `n` tags; each slot is
/// combined with the operator named by its tag. Tags are left untouched.
pub fn combine_tagged(input: &[f64], inout: &mut [f64]) -> Result<(), AssemblyError> {
    debug_assert_eq!(input.len(), inout.len());
    let n = inout.len() / 2;
    let (vals_in, tags) = input.split_at(n);
    for (slot, (&x, &tag)) in vals_in.iter().zip(tags).enumerate() {
        let op = CombineOp::from_tag(tag).ok_or(AssemblyError::CorruptReduction(tag))?;
        inout[slot] = op.apply(inout[slot], x);
    }
    Ok(())
}

/// Lay out partials and their operator tags for [`ScalarReduce::Tagged`].
pub fn pack_tagged(partials: &[f64], ops: &[CombineOp]) -> Vec<f64> {
    debug_assert_eq!(partials.len(), ops.len());
    let mut buf = Vec::with_capacity(2 * partials.len());
    buf.extend_from_slice(partials);
    buf.extend(ops.iter().map(|op| op.tag()));
    buf
}

/// Apply a [`ScalarReduce`] to two buffers.
pub fn combine_scalar(
    op: ScalarReduce,
    input: &[f64],
    inout: &mut [f64],
) -> Result<(), AssemblyError> {
    match op {
        ScalarReduce::Native(op) => {
            combine_f64(op, input, inout);
            Ok(())
        }
        ScalarReduce::Tagged => combine_tagged(input, inout),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tag_roundtrip() {
        for op in [CombineOp::Sum, CombineOp::Max, CombineOp::Min] {
            assert_eq!(CombineOp::from_tag(op.tag()), Some(op));
        }
        assert_eq!(CombineOp::from_tag(3.0), None);
        assert_eq!(CombineOp::from_tag(0.5), None);
    }

    #[test]
    fn max_sum_halves() {
        let mut acc = vec![3, 0, 1, 0];
        combine_u64(CountOp::MaxSum, &[1, 5, 1, 1], &mut acc);
        assert_eq!(acc, vec![3, 5, 2, 1]);
    }

    #[test]
    fn bit_or_detects_both_modes() {
        let mut acc = vec![0b01];
        combine_u64(CountOp::BitOr, &[0b10], &mut acc);
        assert_eq!(acc, vec![0b11]);
    }

    #[test]
    fn tagged_applies_per_slot_operator() {
        let ops = [CombineOp::Sum, CombineOp::Max, CombineOp::Min];
        let a = pack_tagged(&[1.0, 7.0, 7.0], &ops);
        let mut b = pack_tagged(&[2.0, 4.0, 4.0], &ops);
        combine_tagged(&a, &mut b).unwrap();
        assert_eq!(&b[..3], &[3.0, 7.0, 4.0]);
        assert_eq!(&b[3..], &[0.0, 1.0, 2.0]);
    }

    #[test]
    fn tagged_rejects_unknown_tag() {
        let a = vec![1.0, 9.0];
        let mut b = vec![1.0, 9.0];
        let err = combine_tagged(&a, &mut b).unwrap_err();
        assert!(matches!(err, AssemblyError::CorruptReduction(t) if t == 9.0));
    }
}
