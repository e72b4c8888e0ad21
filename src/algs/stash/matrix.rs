//! Matrix-entry puts: one row of a dense input at a time.
//!
//! Block puts store each `bs x bs` block column-oriented so that several
//! blocks of one block-row can be inserted with a single call.

use super::Stash;
use crate::algs::communicator::Communicator;
use crate::assembly_error::AssemblyError;
use crate::data::stash_index::{InsertMode, MatIndex};

impl<C: Communicator> Stash<MatIndex, C> {
    /// Stash `values[i]` at `(row, cols[i])`; `values` is row-oriented.
    pub fn put_row(
        &mut self,
        row: i64,
        cols: &[i64],
        values: &[f64],
        mode: InsertMode,
    ) -> Result<(), AssemblyError> {
        self.put_strided(row, cols, values, 1, mode)
    }

    /// Stash `values[i * stepval]` at `(row, cols[i])`, for column-oriented
    /// input whose consecutive columns are `stepval` apart.
    pub fn put_col(
        &mut self,
        row: i64,
        cols: &[i64],
        values: &[f64],
        stepval: usize,
        mode: InsertMode,
    ) -> Result<(), AssemblyError> {
        self.put_strided(row, cols, values, stepval.max(1), mode)
    }

    fn put_strided(
        &mut self,
        row: i64,
        cols: &[i64],
        values: &[f64],
        step: usize,
        mode: InsertMode,
    ) -> Result<(), AssemblyError> {
        if self.bs() != 1 {
            return Err(AssemblyError::PayloadLength {
                expected: self.bs(),
                got: 1,
            });
        }
        let needed = cols.len().saturating_sub(1) * step + usize::from(!cols.is_empty());
        if values.len() < needed {
            return Err(AssemblyError::PayloadLength {
                expected: needed,
                got: values.len(),
            });
        }
        self.check_put(mode)?;
        self.entries.reserve_entries(cols.len())?;
        for (i, &col) in cols.iter().enumerate() {
            let index = MatIndex::new(row, col);
            if self.admit(index)? {
                self.entries.push_with(index, std::iter::once(values[i * step]));
            }
        }
        Ok(())
    }

    /// Stash block-row `idx` of a row-oriented input of `rmax x cmax` blocks.
    ///
    /// `row` is the global block-row, `cols[i]` the global block-column of
    /// the `i`-th block.
    pub fn put_row_blocked(
        &mut self,
        row: i64,
        cols: &[i64],
        values: &[f64],
        rmax: usize,
        cmax: usize,
        idx: usize,
        mode: InsertMode,
    ) -> Result<(), AssemblyError> {
        let bs = self.check_block_input(cols, values, rmax, cmax, idx)?;
        let base = idx * bs * bs * cmax;
        let ld = cmax * bs;
        self.put_blocks(row, cols, mode, |i, r, c| values[base + bs * i + r * ld + c])
    }

    /// Stash block-row `idx` of a column-oriented input of `rmax x cmax` blocks.
    pub fn put_col_blocked(
        &mut self,
        row: i64,
        cols: &[i64],
        values: &[f64],
        rmax: usize,
        cmax: usize,
        idx: usize,
        mode: InsertMode,
    ) -> Result<(), AssemblyError> {
        let bs = self.check_block_input(cols, values, rmax, cmax, idx)?;
        let base = idx * bs;
        let ld = rmax * bs;
        self.put_blocks(row, cols, mode, |i, r, c| {
            values[base + i * bs * ld + c * ld + r]
        })
    }

    /// Push one column-oriented block per column; `at(i, r, c)` reads
    /// element `(r, c)` of the `i`-th block.
    fn put_blocks(
        &mut self,
        row: i64,
        cols: &[i64],
        mode: InsertMode,
        at: impl Fn(usize, usize, usize) -> f64,
    ) -> Result<(), AssemblyError> {
        let bs = block_dim(self.bs())?;
        self.check_put(mode)?;
        self.entries.reserve_entries(cols.len())?;
        for (i, &col) in cols.iter().enumerate() {
            let index = MatIndex::new(row, col);
            if self.admit(index)? {
                let block = (0..bs).flat_map(|c| (0..bs).map(move |r| (r, c)));
                self.entries
                    .push_with(index, block.map(|(r, c)| at(i, r, c)));
            }
        }
        Ok(())
    }

    fn check_block_input(
        &self,
        cols: &[i64],
        values: &[f64],
        rmax: usize,
        cmax: usize,
        idx: usize,
    ) -> Result<usize, AssemblyError> {
        let bs = block_dim(self.bs())?;
        let needed = rmax * cmax * bs * bs;
        if values.len() < needed {
            return Err(AssemblyError::PayloadLength {
                expected: needed,
                got: values.len(),
            });
        }
        if idx >= rmax || cols.len() > cmax {
            return Err(AssemblyError::PayloadLength {
                expected: cmax,
                got: cols.len(),
            });
        }
        Ok(bs)
    }
}

/// Side of a square block holding `bs2` scalars.
fn block_dim(bs2: usize) -> Result<usize, AssemblyError> {
    let bs = (bs2 as f64).sqrt().round() as usize;
    if bs * bs != bs2 {
        return Err(AssemblyError::PayloadLength {
            expected: bs * bs,
            got: bs2,
        });
    }
    Ok(bs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::algs::communicator::NoComm;
    use crate::data::sizing::SizingPolicy;
    use crate::topology::ownership::OwnershipMap;

    fn mat_stash(bs2: usize) -> Stash<MatIndex, NoComm> {
        let owners = OwnershipMap::new(vec![0, 8]).unwrap();
        Stash::with_policy(NoComm, owners, SizingPolicy::matrix(bs2, None)).unwrap()
    }

    fn drain(stash: &mut Stash<MatIndex, NoComm>) -> Vec<(MatIndex, Vec<f64>)> {
        stash.scatter_begin().unwrap();
        let mut out = Vec::new();
        while let Some(msg) = stash.scatter_get_message().unwrap() {
            out.extend(msg.iter().map(|(i, v)| (i, v.to_vec())));
        }
        stash.scatter_end().unwrap();
        out
    }

    #[test]
    fn row_and_strided_col_puts() {
        let mut s = mat_stash(1);
        s.put_row(2, &[0, -1, 5], &[1.0, 2.0, 3.0], InsertMode::Insert)
            .unwrap();
        // column-oriented 2x2 input, second row starts at offset 1
        s.put_col(3, &[1, 4], &[9.0, 7.0, 8.0, 6.0][1..], 2, InsertMode::Insert)
            .unwrap();
        let got = drain(&mut s);
        assert_eq!(
            got,
            vec![
                (MatIndex::new(2, 0), vec![1.0]),
                (MatIndex::new(2, 5), vec![3.0]),
                (MatIndex::new(3, 1), vec![7.0]),
                (MatIndex::new(3, 4), vec![6.0]),
            ]
        );
    }

    #[test]
    fn row_blocked_stores_blocks_column_oriented() {
        // 1 x 2 blocks of 2x2, row-oriented:
        // [ 1 2 | 5 6 ]
        // [ 3 4 | 7 8 ]
        let values = [1.0, 2.0, 5.0, 6.0, 3.0, 4.0, 7.0, 8.0];
        let mut s = mat_stash(4);
        s.put_row_blocked(1, &[0, 3], &values, 1, 2, 0, InsertMode::Accumulate)
            .unwrap();
        let got = drain(&mut s);
        assert_eq!(got[0], (MatIndex::new(1, 0), vec![1.0, 3.0, 2.0, 4.0]));
        assert_eq!(got[1], (MatIndex::new(1, 3), vec![5.0, 7.0, 6.0, 8.0]));
    }

    #[test]
    fn col_blocked_matches_row_blocked() {
        // same matrix as above, column-oriented with leading dimension 2
        let values = [1.0, 3.0, 2.0, 4.0, 5.0, 7.0, 6.0, 8.0];
        let mut s = mat_stash(4);
        s.put_col_blocked(1, &[0, 3], &values, 1, 2, 0, InsertMode::Insert)
            .unwrap();
        let got = drain(&mut s);
        assert_eq!(got[0].1, vec![1.0, 3.0, 2.0, 4.0]);
        assert_eq!(got[1].1, vec![5.0, 7.0, 6.0, 8.0]);
    }

    #[test]
    fn blocked_requires_square_blocks() {
        let mut s = mat_stash(3);
        let err = s
            .put_row_blocked(0, &[0], &[0.0; 3], 1, 1, 0, InsertMode::Insert)
            .unwrap_err();
        assert!(matches!(err, AssemblyError::PayloadLength { .. }));
    }
}
