//! The operator trait
//!
//! Operators are immutable descriptions built by the planner. They own
//! their inputs and compile into cursors on demand; building a cursor never
//! touches rows.

use std::fmt;
use std::sync::Arc;

use super::context::QueryContext;
use super::error::ExecutorResult;
use super::explain::Explain;
use super::row_type::RowType;
use super::{BindingsCursor, Cursor};

/// Whether a lookup or if-empty operator re-emits its input rows
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputPreservation {
    KeepInput,
    DiscardInput,
}

/// Which unmatched rows an ordered join keeps
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinType {
    Inner,
    Left,
    Right,
    Full,
}

impl JoinType {
    pub fn keeps_left(self) -> bool {
        matches!(self, JoinType::Left | JoinType::Full)
    }

    pub fn keeps_right(self) -> bool {
        matches!(self, JoinType::Right | JoinType::Full)
    }
}

impl fmt::Display for JoinType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            JoinType::Inner => "INNER",
            JoinType::Left => "LEFT",
            JoinType::Right => "RIGHT",
            JoinType::Full => "FULL",
        })
    }
}

/// A physical operator
pub trait Operator: fmt::Debug {
    /// Build a cursor reading scopes from `bindings`
    fn cursor(
        &self,
        context: &Arc<QueryContext>,
        bindings: Box<dyn BindingsCursor>,
    ) -> ExecutorResult<Box<dyn Cursor>>;

    /// Type of the rows this operator creates, if it creates any
    fn row_type(&self) -> Option<Arc<RowType>> {
        None
    }

    fn input_operators(&self) -> Vec<&dyn Operator> {
        Vec::new()
    }

    /// Collect row types introduced by this operator and its inputs
    fn find_derived_types(&self, types: &mut Vec<Arc<RowType>>) {
        for input in self.input_operators() {
            input.find_derived_types(types);
        }
    }

    fn name(&self) -> &'static str;

    fn explain(&self) -> Explain;
}

/// Explain node for an operator with its inputs already attached
pub(crate) fn explain_with_inputs(op: &dyn Operator) -> Explain {
    op.input_operators()
        .into_iter()
        .fold(Explain::new(op.name()), |e, input| e.input(input.explain()))
}

/// Record `row_type` once, by identity
pub(crate) fn add_derived_type(types: &mut Vec<Arc<RowType>>, row_type: &Arc<RowType>) {
    if !types.iter().any(|t| Arc::ptr_eq(t, row_type)) {
        types.push(row_type.clone());
    }
}
