// src/services/evaluator.rs

//! Decides whether a submitted selection answers a question correctly.
//!
//! Questions carry two answer representations: the legacy single
//! `correct_index` and the multi-select `correct_indices`. The latter is
//! authoritative whenever it is non-empty.

use std::collections::BTreeSet;

use crate::models::attempt::Selection;

/// Borrowed view of a question's answer key.
#[derive(Debug, Clone, Copy)]
pub struct AnswerKey<'a> {
    pub index: Option<i32>,
    pub indices: &'a [i32],
}

/// Returns `true` if `selection` is a correct answer for `key`.
///
/// Total for every input: out-of-range or negative indices never match, and a
/// key with no correct option at all rejects everything.
pub fn is_correct(key: AnswerKey<'_>, selection: &Selection) -> bool {
    if !key.indices.is_empty() {
        let expected: BTreeSet<i32> = key.indices.iter().copied().collect();
        return match selection {
            Selection::Multiple(submitted) => {
                let submitted: BTreeSet<i32> = submitted.iter().copied().collect();
                submitted == expected
            }
            // A single pick can only satisfy a key with exactly one member.
            Selection::Single(index) => expected.len() == 1 && expected.contains(index),
        };
    }

    let Some(expected) = key.index else {
        return false;
    };

    match selection {
        Selection::Single(index) => *index == expected,
        Selection::Multiple(submitted) => {
            let submitted: BTreeSet<i32> = submitted.iter().copied().collect();
            submitted.len() == 1 && submitted.contains(&expected)
        }
    }
}
