//! Split-phase dot products and norms of distributed vectors.
//!
//! Each `*_begin` computes the local partial and opens registry slots;
//! the matching `*_end` closes them in order. Several vector reductions
//! opened back to back share one collective.

use crate::algs::combine::CombineOp;
use crate::algs::communicator::Communicator;
use crate::algs::split_reduction::{SplitReductionHandle, Ticket};
use crate::assembly_error::AssemblyError;
use crate::data::dist_vec::DistVec;

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum NormType {
    One,
    Two,
    Max,
    /// 1-norm and 2-norm together, in two slots.
    OneAndTwo,
}

impl NormType {
    /// Operator of the norm's (first) slot.
    pub fn op(self) -> CombineOp {
        match self {
            NormType::Max => CombineOp::Max,
            NormType::One | NormType::Two | NormType::OneAndTwo => CombineOp::Sum,
        }
    }
}

/// Slots opened by [`norm_begin`].
#[derive(Copy, Clone, Debug)]
pub struct NormTicket {
    first: Ticket,
    second: Option<Ticket>,
}

/// Result of [`norm_end`].
#[derive(Copy, Clone, Debug, PartialEq)]
pub enum NormValue {
    Single(f64),
    OneAndTwo { one: f64, two: f64 },
}

impl NormValue {
    /// The norm, or the 1-norm of a pair.
    pub fn value(self) -> f64 {
        match self {
            NormValue::Single(v) => v,
            NormValue::OneAndTwo { one, .. } => one,
        }
    }
}

/// Open the global dot product of `x` and `y`.
pub fn dot_begin<C: Communicator + Clone>(
    reg: &SplitReductionHandle<'_, C>,
    x: &DistVec<C>,
    y: &DistVec<C>,
) -> Result<Ticket, AssemblyError> {
    if x.local().len() != y.local().len() {
        return Err(AssemblyError::PayloadLength {
            expected: x.local().len(),
            got: y.local().len(),
        });
    }
    let partial = x.local().iter().zip(y.local()).map(|(a, b)| a * b).sum();
    reg.begin(CombineOp::Sum, partial)
}

pub fn dot_end<C: Communicator>(
    reg: &SplitReductionHandle<'_, C>,
    ticket: Ticket,
) -> Result<f64, AssemblyError> {
    reg.end_as(ticket, CombineOp::Sum)
}

/// Open a norm of `x`.
pub fn norm_begin<C: Communicator + Clone>(
    reg: &SplitReductionHandle<'_, C>,
    x: &DistVec<C>,
    kind: NormType,
) -> Result<NormTicket, AssemblyError> {
    let v = x.local();
    let one = || v.iter().map(|a| a.abs()).sum::<f64>();
    let two_sq = || v.iter().map(|a| a * a).sum::<f64>();
    let ticket = match kind {
        NormType::One => NormTicket {
            first: reg.begin(CombineOp::Sum, one())?,
            second: None,
        },
        NormType::Two => NormTicket {
            first: reg.begin(CombineOp::Sum, two_sq())?,
            second: None,
        },
        NormType::Max => NormTicket {
            first: reg.begin(CombineOp::Max, v.iter().fold(0.0, |m, a| a.abs().max(m)))?,
            second: None,
        },
        NormType::OneAndTwo => NormTicket {
            first: reg.begin(CombineOp::Sum, one())?,
            second: Some(reg.begin(CombineOp::Sum, two_sq())?),
        },
    };
    Ok(ticket)
}

/// Close a norm opened with [`norm_begin`].
///
/// `kind` must match the slots: finishing a `Max` norm as a sum-based norm
/// (or the reverse) is an [`AssemblyError::OperatorMismatch`].
pub fn norm_end<C: Communicator>(
    reg: &SplitReductionHandle<'_, C>,
    ticket: NormTicket,
    kind: NormType,
) -> Result<NormValue, AssemblyError> {
    let first = reg.end_as(ticket.first, kind.op())?;
    Ok(match kind {
        NormType::One | NormType::Max => NormValue::Single(first),
        NormType::Two => NormValue::Single(first.sqrt()),
        NormType::OneAndTwo => {
            let second = ticket.second.ok_or(AssemblyError::EndWithoutBegin)?;
            let two = reg.end_as(second, CombineOp::Sum)?;
            NormValue::OneAndTwo {
                one: first,
                two: two.sqrt(),
            }
        }
    })
}
