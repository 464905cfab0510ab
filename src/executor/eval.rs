//! Expression evaluation
//!
//! Operators carry `Expression` trees for projections, predicates, sort
//! keys, index bounds and literal rows. An expression is evaluated against
//! an optional input row and the current bindings scope.

use std::fmt;

use crate::catalog::DataType;

use super::bindings::QueryBindings;
use super::context::QueryContext;
use super::datum::Datum;
use super::error::{ExecutorError, ExecutorResult};
use super::row::Row;
use super::row_type::RowType;

/// Binary operators
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Eq,
    NotEq,
    Lt,
    LtEq,
    Gt,
    GtEq,
    And,
    Or,
}

impl BinaryOp {
    fn is_comparison(self) -> bool {
        matches!(
            self,
            BinaryOp::Eq
                | BinaryOp::NotEq
                | BinaryOp::Lt
                | BinaryOp::LtEq
                | BinaryOp::Gt
                | BinaryOp::GtEq
        )
    }

    fn symbol(self) -> &'static str {
        match self {
            BinaryOp::Add => "+",
            BinaryOp::Sub => "-",
            BinaryOp::Mul => "*",
            BinaryOp::Div => "/",
            BinaryOp::Mod => "%",
            BinaryOp::Eq => "=",
            BinaryOp::NotEq => "<>",
            BinaryOp::Lt => "<",
            BinaryOp::LtEq => "<=",
            BinaryOp::Gt => ">",
            BinaryOp::GtEq => ">=",
            BinaryOp::And => "AND",
            BinaryOp::Or => "OR",
        }
    }
}

/// Scalar expression
#[derive(Debug, Clone, PartialEq)]
pub enum Expression {
    /// Field of the input row
    Field(usize),
    Literal(Datum),
    /// Value bound at a binding position
    Parameter { position: usize, data_type: DataType },
    /// Field of a row bound at a binding position
    BoundField {
        position: usize,
        field: usize,
        data_type: DataType,
    },
    Binary {
        op: BinaryOp,
        left: Box<Expression>,
        right: Box<Expression>,
    },
    Not(Box<Expression>),
    Neg(Box<Expression>),
    IsNull {
        expr: Box<Expression>,
        negated: bool,
    },
    /// Advance a sequence and return its new value
    NextSequenceValue(String),
    /// Current value of a sequence
    CurrentSequenceValue(String),
}

impl Expression {
    pub fn field(index: usize) -> Self {
        Expression::Field(index)
    }

    pub fn literal(value: impl Into<Datum>) -> Self {
        Expression::Literal(value.into())
    }

    pub fn null() -> Self {
        Expression::Literal(Datum::Null)
    }

    pub fn parameter(position: usize, data_type: DataType) -> Self {
        Expression::Parameter {
            position,
            data_type,
        }
    }

    pub fn bound_field(position: usize, field: usize, data_type: DataType) -> Self {
        Expression::BoundField {
            position,
            field,
            data_type,
        }
    }

    pub fn binary(op: BinaryOp, left: Expression, right: Expression) -> Self {
        Expression::Binary {
            op,
            left: Box::new(left),
            right: Box::new(right),
        }
    }

    pub fn eq(left: Expression, right: Expression) -> Self {
        Self::binary(BinaryOp::Eq, left, right)
    }

    pub fn lt(left: Expression, right: Expression) -> Self {
        Self::binary(BinaryOp::Lt, left, right)
    }

    pub fn gt(left: Expression, right: Expression) -> Self {
        Self::binary(BinaryOp::Gt, left, right)
    }

    pub fn and(left: Expression, right: Expression) -> Self {
        Self::binary(BinaryOp::And, left, right)
    }

    pub fn add(left: Expression, right: Expression) -> Self {
        Self::binary(BinaryOp::Add, left, right)
    }

    pub fn is_null(expr: Expression) -> Self {
        Expression::IsNull {
            expr: Box::new(expr),
            negated: false,
        }
    }

    pub fn next_sequence_value(sequence: impl Into<String>) -> Self {
        Expression::NextSequenceValue(sequence.into())
    }

    pub fn current_sequence_value(sequence: impl Into<String>) -> Self {
        Expression::CurrentSequenceValue(sequence.into())
    }

    /// Evaluate against `row` (if any) within `bindings`
    pub fn evaluate(
        &self,
        row: Option<&Row>,
        bindings: &QueryBindings,
        context: &QueryContext,
    ) -> ExecutorResult<Datum> {
        match self {
            Expression::Field(index) => {
                let row = row.ok_or_else(|| {
                    ExecutorError::internal(format!("field ${} evaluated without a row", index))
                })?;
                Ok(row.get(*index)?.clone())
            }

            Expression::Literal(value) => Ok(value.clone()),

            Expression::Parameter { position, .. } => bindings.get_value(*position),

            Expression::BoundField {
                position, field, ..
            } => {
                let bound = bindings.get_row(*position)?;
                Ok(bound.get(*field)?.clone())
            }

            Expression::Binary { op, left, right } => {
                let lval = left.evaluate(row, bindings, context)?;
                let rval = right.evaluate(row, bindings, context)?;
                eval_binary_op(*op, &lval, &rval)
            }

            Expression::Not(expr) => {
                let val = expr.evaluate(row, bindings, context)?;
                val.not()
                    .ok_or_else(|| ExecutorError::InvalidOperation("NOT requires boolean".to_string()))
            }

            Expression::Neg(expr) => {
                let val = expr.evaluate(row, bindings, context)?;
                val.negate().ok_or_else(|| {
                    ExecutorError::InvalidOperation("negation requires number".to_string())
                })
            }

            Expression::IsNull { expr, negated } => {
                let is_null = expr.evaluate(row, bindings, context)?.is_null();
                Ok(Datum::Bool(is_null != *negated))
            }

            Expression::NextSequenceValue(name) => {
                Ok(Datum::Int(context.adapter().sequence_next_value(name)?))
            }

            Expression::CurrentSequenceValue(name) => {
                Ok(Datum::Int(context.adapter().sequence_current_value(name)?))
            }
        }
    }

    /// Result type given the type of the input row
    pub fn data_type(&self, input: Option<&RowType>) -> DataType {
        match self {
            Expression::Field(index) => input
                .and_then(|t| t.field_type(*index))
                .unwrap_or(DataType::Unknown),
            Expression::Literal(value) => value.data_type().unwrap_or(DataType::Unknown),
            Expression::Parameter { data_type, .. } | Expression::BoundField { data_type, .. } => {
                *data_type
            }
            Expression::Binary { op, left, right } => {
                if op.is_comparison() || matches!(op, BinaryOp::And | BinaryOp::Or) {
                    return DataType::Boolean;
                }
                match (left.data_type(input), right.data_type(input)) {
                    (DataType::Double, _) | (_, DataType::Double) => DataType::Double,
                    (DataType::Unknown, t) => t,
                    (t, _) => t,
                }
            }
            Expression::Not(_) | Expression::IsNull { .. } => DataType::Boolean,
            Expression::Neg(expr) => expr.data_type(input),
            Expression::NextSequenceValue(_) | Expression::CurrentSequenceValue(_) => {
                DataType::BigInt
            }
        }
    }
}

impl fmt::Display for Expression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expression::Field(i) => write!(f, "${}", i),
            Expression::Literal(v) => write!(f, "{}", v),
            Expression::Parameter { position, .. } => write!(f, "?{}", position),
            Expression::BoundField {
                position, field, ..
            } => write!(f, "?{}.${}", position, field),
            Expression::Binary { op, left, right } => {
                write!(f, "({} {} {})", left, op.symbol(), right)
            }
            Expression::Not(e) => write!(f, "NOT {}", e),
            Expression::Neg(e) => write!(f, "-{}", e),
            Expression::IsNull { expr, negated } => {
                write!(f, "{} IS {}NULL", expr, if *negated { "NOT " } else { "" })
            }
            Expression::NextSequenceValue(s) => write!(f, "NEXTVAL({})", s),
            Expression::CurrentSequenceValue(s) => write!(f, "CURRVAL({})", s),
        }
    }
}

/// True only for a boolean true; NULL and false both reject
pub fn is_true(value: &Datum) -> bool {
    matches!(value, Datum::Bool(true))
}

/// Evaluate a list of expressions into row values
pub fn evaluate_all(
    exprs: &[Expression],
    row: Option<&Row>,
    bindings: &QueryBindings,
    context: &QueryContext,
) -> ExecutorResult<Vec<Datum>> {
    exprs
        .iter()
        .map(|e| e.evaluate(row, bindings, context))
        .collect()
}

fn eval_binary_op(op: BinaryOp, left: &Datum, right: &Datum) -> ExecutorResult<Datum> {
    // AND/OR have their own NULL handling
    if !matches!(op, BinaryOp::And | BinaryOp::Or) && (left.is_null() || right.is_null()) {
        return Ok(Datum::Null);
    }

    match op {
        BinaryOp::Add | BinaryOp::Sub | BinaryOp::Mul | BinaryOp::Div | BinaryOp::Mod => {
            arithmetic(op, left, right)
        }

        BinaryOp::Eq => Ok(Datum::Bool(left == right)),
        BinaryOp::NotEq => Ok(Datum::Bool(left != right)),
        BinaryOp::Lt => Ok(Datum::Bool(left < right)),
        BinaryOp::LtEq => Ok(Datum::Bool(left <= right)),
        BinaryOp::Gt => Ok(Datum::Bool(left > right)),
        BinaryOp::GtEq => Ok(Datum::Bool(left >= right)),

        BinaryOp::And => eval_and(left, right),
        BinaryOp::Or => eval_or(left, right),
    }
}

/// Integer arithmetic stays integral and fails on overflow; any float
/// operand makes the result a float. Strings concatenate under `+`.
fn arithmetic(op: BinaryOp, left: &Datum, right: &Datum) -> ExecutorResult<Datum> {
    let zero_divisor = matches!(op, BinaryOp::Div | BinaryOp::Mod)
        && right.as_float().is_some_and(|d| d == 0.0);
    if zero_divisor {
        return Err(ExecutorError::InvalidOperation(format!(
            "{} by zero",
            if op == BinaryOp::Div { "division" } else { "modulo" }
        )));
    }
    let result = match (left, right) {
        (Datum::Int(a), Datum::Int(b)) => {
            let (value, what) = match op {
                BinaryOp::Add => (a.checked_add(*b), "addition"),
                BinaryOp::Sub => (a.checked_sub(*b), "subtraction"),
                BinaryOp::Mul => (a.checked_mul(*b), "multiplication"),
                BinaryOp::Div => (a.checked_div(*b), "division"),
                _ => (a.checked_rem(*b), "modulo"),
            };
            return value.map(Datum::Int).ok_or(ExecutorError::Overflow(what));
        }
        (Datum::String(a), Datum::String(b)) if op == BinaryOp::Add => {
            return Ok(Datum::String(format!("{}{}", a, b)));
        }
        _ => match (left.as_float(), right.as_float(), op) {
            (Some(a), Some(b), BinaryOp::Add) => Some(a + b),
            (Some(a), Some(b), BinaryOp::Sub) => Some(a - b),
            (Some(a), Some(b), BinaryOp::Mul) => Some(a * b),
            (Some(a), Some(b), BinaryOp::Div) => Some(a / b),
            _ => None,
        },
    };
    result.map(Datum::Float).ok_or_else(|| {
        ExecutorError::InvalidOperation(format!(
            "cannot apply {} to {} and {}",
            op.symbol(),
            left,
            right
        ))
    })
}

/// SQL AND with three-valued logic
fn eval_and(left: &Datum, right: &Datum) -> ExecutorResult<Datum> {
    match (left.as_bool(), right.as_bool()) {
        (Some(false), _) | (_, Some(false)) => Ok(Datum::Bool(false)),
        (Some(true), Some(true)) => Ok(Datum::Bool(true)),
        _ => Ok(Datum::Null),
    }
}

/// SQL OR with three-valued logic
fn eval_or(left: &Datum, right: &Datum) -> ExecutorResult<Datum> {
    match (left.as_bool(), right.as_bool()) {
        (Some(true), _) | (_, Some(true)) => Ok(Datum::Bool(true)),
        (Some(false), Some(false)) => Ok(Datum::Bool(false)),
        _ => Ok(Datum::Null),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::test_util::{int_type, test_context};
    use crate::executor::Schema;
    use crate::storage::MemoryStore;
    use std::sync::Arc;

    fn make_row(schema: &Schema) -> Row {
        Row::new(int_type(schema, 3), vec![Datum::Int(10), Datum::Int(20), Datum::Null])
    }

    fn eval(expr: &Expression, row: &Row) -> ExecutorResult<Datum> {
        let ctx = test_context();
        expr.evaluate(Some(row), &QueryBindings::new(), &ctx)
    }

    #[test]
    fn test_eval_field_and_literal() {
        let schema = Schema::new();
        let row = make_row(&schema);
        assert_eq!(eval(&Expression::field(1), &row).unwrap(), Datum::Int(20));
        assert_eq!(eval(&Expression::literal(7i64), &row).unwrap(), Datum::Int(7));
        assert!(eval(&Expression::field(9), &row).is_err());
    }

    #[test]
    fn test_eval_arithmetic_and_comparison() {
        let schema = Schema::new();
        let row = make_row(&schema);
        let sum = Expression::add(Expression::field(0), Expression::field(1));
        assert_eq!(eval(&sum, &row).unwrap(), Datum::Int(30));
        let lt = Expression::lt(Expression::field(0), Expression::field(1));
        assert_eq!(eval(&lt, &row).unwrap(), Datum::Bool(true));
        let overflow = Expression::add(Expression::literal(i64::MAX), Expression::literal(1i64));
        assert!(matches!(eval(&overflow, &row), Err(ExecutorError::Overflow(_))));
        let div = Expression::binary(BinaryOp::Div, Expression::field(0), Expression::literal(0i64));
        assert!(matches!(eval(&div, &row), Err(ExecutorError::InvalidOperation(_))));
    }

    #[test]
    fn test_eval_null_semantics() {
        let schema = Schema::new();
        let row = make_row(&schema);
        let eq = Expression::eq(Expression::field(2), Expression::literal(1i64));
        assert_eq!(eval(&eq, &row).unwrap(), Datum::Null);
        assert!(!is_true(&Datum::Null));
        let and = Expression::and(eq.clone(), Expression::literal(false));
        assert_eq!(eval(&and, &row).unwrap(), Datum::Bool(false));
        let and = Expression::and(eq, Expression::literal(true));
        assert_eq!(eval(&and, &row).unwrap(), Datum::Null);
        assert_eq!(
            eval(&Expression::is_null(Expression::field(2)), &row).unwrap(),
            Datum::Bool(true)
        );
    }

    #[test]
    fn test_eval_bindings() {
        let schema = Schema::new();
        let ctx = test_context();
        let row = make_row(&schema);
        let bindings = QueryBindings::new();
        bindings.set_value(0, Datum::Int(5));
        bindings.set_row(1, row);
        let child = bindings.create_bindings();
        let param = Expression::parameter(0, DataType::BigInt);
        assert_eq!(param.evaluate(None, &child, &ctx).unwrap(), Datum::Int(5));
        let bound = Expression::bound_field(1, 1, DataType::BigInt);
        assert_eq!(bound.evaluate(None, &child, &ctx).unwrap(), Datum::Int(20));
        assert!(matches!(
            Expression::field(0).evaluate(None, &child, &ctx),
            Err(ExecutorError::Internal(_))
        ));
    }

    #[test]
    fn test_eval_sequences() {
        let store = Arc::new(MemoryStore::new());
        store.create_sequence("s", 1, 1);
        let ctx = crate::executor::test_util::context_with(
            &Arc::new(Schema::new()),
            &store,
            Default::default(),
        );
        let b = QueryBindings::new();
        let next = Expression::next_sequence_value("s");
        assert_eq!(next.evaluate(None, &b, &ctx).unwrap(), Datum::Int(1));
        assert_eq!(next.evaluate(None, &b, &ctx).unwrap(), Datum::Int(2));
        let current = Expression::current_sequence_value("s");
        assert_eq!(current.evaluate(None, &b, &ctx).unwrap(), Datum::Int(2));
        assert!(Expression::next_sequence_value("missing")
            .evaluate(None, &b, &ctx)
            .is_err());
    }

    #[test]
    fn test_data_type_and_display() {
        let schema = Schema::new();
        let t = int_type(&schema, 2);
        let e = Expression::add(Expression::field(0), Expression::literal(1.5));
        assert_eq!(e.data_type(Some(&t)), DataType::Double);
        assert_eq!(Expression::eq(Expression::field(0), Expression::field(1)).data_type(None), DataType::Boolean);
        assert_eq!(e.to_string(), "($0 + 1.5)");
    }
}
