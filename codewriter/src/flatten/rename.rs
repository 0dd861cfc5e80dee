/**
 * Copyright 2022 - Jahred Love
 *
 * Redistribution and use in source and binary forms, with or without modification,
 * are permitted provided that the following conditions are met:
 *
 * 1. Redistributions of source code must retain the above copyright notice, this
 * list of conditions and the following disclaimer.
 *
 * 2. Redistributions in binary form must reproduce the above copyright notice, this
 * list of conditions and the following disclaimer in the documentation and/or other
 * materials provided with the distribution.
 *
 * 3. Neither the name of the copyright holder nor the names of its contributors may
 * be used to endorse or promote products derived from this software without specific
 * prior written permission.
 *
 * THIS SOFTWARE IS PROVIDED BY THE COPYRIGHT HOLDERS AND CONTRIBUTORS “AS IS” AND
 * ANY EXPRESS OR IMPLIED WARRANTIES, INCLUDING, BUT NOT LIMITED TO, THE IMPLIED
 * WARRANTIES OF MERCHANTABILITY AND FITNESS FOR A PARTICULAR PURPOSE ARE DISCLAIMED.
 * IN NO EVENT SHALL THE COPYRIGHT HOLDER OR CONTRIBUTORS BE LIABLE FOR ANY DIRECT,
 * INDIRECT, INCIDENTAL, SPECIAL, EXEMPLARY, OR CONSEQUENTIAL DAMAGES (INCLUDING, BUT
 * NOT LIMITED TO, PROCUREMENT OF SUBSTITUTE GOODS OR SERVICES; LOSS OF USE, DATA, OR
 * PROFITS; OR BUSINESS INTERRUPTION) HOWEVER CAUSED AND ON ANY THEORY OF LIABILITY,
 * WHETHER IN CONTRACT, STRICT LIABILITY, OR TORT (INCLUDING NEGLIGENCE OR OTHERWISE)
 * ARISING IN ANY WAY OUT OF THE USE OF THIS SOFTWARE, EVEN IF ADVISED OF THE
 * POSSIBILITY OF SUCH DAMAGE.
 */

/// One step of a sequentialized parallel rename.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RenameStep<T> {
    Copy { src: T, dst: T },
    /// Put `src` aside (push) to break a cycle.
    Save(T),
    /// Write the value put aside last into `dst` (pop).
    Restore(T),
}

/// Orders the parallel assignment `to[i] <- frm[i]` so that no source is
/// overwritten before it is read.
///
/// A copy is emitted as soon as its destination is no longer read by any
/// pending move. When every pending move is blocked, the sources form cycles;
/// the first pending source is saved and its move becomes a restore once its
/// destination is free.
pub fn reorder_renaming_list<T: Clone + PartialEq>(frm: &[T], to: &[T]) -> Vec<RenameStep<T>> {
    assert_eq!(frm.len(), to.len(), "rename lists must pair up");
    let mut frm: Vec<Option<T>> = frm.iter().cloned().map(Some).collect();
    let mut result = Vec::new();
    let mut pending: Vec<usize> = (0..to.len()).collect();

    while !pending.is_empty() {
        let still_read: Vec<T> = pending.iter().filter_map(|&i| frm[i].clone()).collect();
        let mut blocked = Vec::new();
        for &i in &pending {
            if still_read.contains(&to[i]) {
                blocked.push(i);
                continue;
            }
            match frm[i].take() {
                Some(src) => result.push(RenameStep::Copy {
                    src,
                    dst: to[i].clone(),
                }),
                None => result.push(RenameStep::Restore(to[i].clone())),
            }
        }
        if blocked.len() == pending.len() {
            // Only cycles are left. A saved source is never read again, so
            // the move writing over it unblocks on the next round.
            let i = pending[0];
            let src = frm[i].take().expect("a blocked cycle always has its source");
            result.push(RenameStep::Save(src));
        } else {
            pending = blocked;
        }
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Runs the steps on a register file and returns it.
    fn simulate(regs: &mut Vec<i32>, steps: &[RenameStep<usize>]) {
        let mut stack = Vec::new();
        for s in steps {
            match s {
                RenameStep::Copy { src, dst } => regs[*dst] = regs[*src],
                RenameStep::Save(src) => stack.push(regs[*src]),
                RenameStep::Restore(dst) => regs[*dst] = stack.pop().unwrap(),
            }
        }
        assert!(stack.is_empty());
    }

    #[test]
    fn independent_moves_keep_their_order() {
        let steps = reorder_renaming_list(&[0, 1], &[2, 3]);
        assert_eq!(
            steps,
            vec![
                RenameStep::Copy { src: 0, dst: 2 },
                RenameStep::Copy { src: 1, dst: 3 },
            ]
        );
    }

    #[test]
    fn chains_copy_the_free_end_first() {
        // 1 <- 0, 2 <- 1: writing 1 first would lose its old value.
        let steps = reorder_renaming_list(&[0, 1], &[1, 2]);
        assert_eq!(
            steps,
            vec![
                RenameStep::Copy { src: 1, dst: 2 },
                RenameStep::Copy { src: 0, dst: 1 },
            ]
        );
    }

    #[test]
    fn swap_uses_one_save_and_one_restore() {
        let steps = reorder_renaming_list(&[0, 1], &[1, 0]);
        assert_eq!(
            steps,
            vec![
                RenameStep::Save(0),
                RenameStep::Copy { src: 1, dst: 0 },
                RenameStep::Restore(1),
            ]
        );
        let mut regs = vec![10, 20];
        simulate(&mut regs, &steps);
        assert_eq!(regs, vec![20, 10]);
    }

    #[test]
    fn rotations_and_disjoint_cycles_are_correct() {
        let frm = [0, 1, 2, 3, 4, 5, 6];
        let to = [1, 2, 0, 4, 3, 6, 5];
        let steps = reorder_renaming_list(&frm, &to);
        let mut regs: Vec<i32> = (0..7).map(|r| r * 100).collect();
        let before = regs.clone();
        simulate(&mut regs, &steps);
        for (s, d) in frm.iter().zip(to.iter()) {
            assert_eq!(regs[*d], before[*s]);
        }
        let saves = steps.iter().filter(|s| matches!(s, RenameStep::Save(_))).count();
        assert_eq!(saves, 3);
    }

    #[test]
    fn one_source_fanning_out() {
        let steps = reorder_renaming_list(&[0, 0, 1], &[1, 2, 0]);
        let mut regs = vec![7, 8, 9];
        simulate(&mut regs, &steps);
        assert_eq!(regs, vec![8, 7, 7]);
    }
}
