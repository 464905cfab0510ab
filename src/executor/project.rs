//! Project_Default
//!
//! Rows of the projected type are replaced by rows computed from a list of
//! expressions; rows of other types pass through.

use std::sync::Arc;

use super::chained::ChainedCursor;
use super::context::QueryContext;
use super::error::{check_argument, ExecutorResult};
use super::eval::{evaluate_all, Expression};
use super::explain::Explain;
use super::lifecycle::CursorState;
use super::operator::{add_derived_type, explain_with_inputs, Operator};
use super::row::Row;
use super::row_type::{RowType, Schema};
use super::{delegate_bindings, BindingsCursor, Cursor};

/// Project_Default
#[derive(Debug)]
pub struct Project {
    input: Box<dyn Operator>,
    input_type: Arc<RowType>,
    projections: Vec<Expression>,
    output_type: Arc<RowType>,
}

impl Project {
    pub fn new(
        schema: &Schema,
        input: Box<dyn Operator>,
        input_type: Arc<RowType>,
        projections: Vec<Expression>,
    ) -> ExecutorResult<Self> {
        check_argument(!projections.is_empty(), || {
            "projection needs at least one expression".to_string()
        })?;
        let fields = projections
            .iter()
            .map(|e| e.data_type(Some(&input_type)))
            .collect();
        let output_type = schema.new_project_type(fields);
        Ok(Self {
            input,
            input_type,
            projections,
            output_type,
        })
    }
}

impl Operator for Project {
    fn cursor(
        &self,
        context: &Arc<QueryContext>,
        bindings: Box<dyn BindingsCursor>,
    ) -> ExecutorResult<Box<dyn Cursor>> {
        let input = self.input.cursor(context, bindings)?;
        Ok(Box::new(ProjectCursor {
            base: ChainedCursor::new(context, input),
            input_type: self.input_type.clone(),
            projections: self.projections.clone(),
            output_type: self.output_type.clone(),
        }))
    }

    fn row_type(&self) -> Option<Arc<RowType>> {
        Some(self.output_type.clone())
    }

    fn input_operators(&self) -> Vec<&dyn Operator> {
        vec![self.input.as_ref()]
    }

    fn find_derived_types(&self, types: &mut Vec<Arc<RowType>>) {
        add_derived_type(types, &self.output_type);
        self.input.find_derived_types(types);
    }

    fn name(&self) -> &'static str {
        "Project_Default"
    }

    fn explain(&self) -> Explain {
        let projections: Vec<String> = self.projections.iter().map(|e| e.to_string()).collect();
        explain_with_inputs(self)
            .attr("input_type", &self.input_type)
            .attr("projections", projections.join(", "))
    }
}

struct ProjectCursor {
    base: ChainedCursor,
    input_type: Arc<RowType>,
    projections: Vec<Expression>,
    output_type: Arc<RowType>,
}

impl Cursor for ProjectCursor {
    fn open(&mut self) -> ExecutorResult<()> {
        self.base.open()
    }

    fn next(&mut self) -> ExecutorResult<Option<Row>> {
        if !self.base.begin_next()? {
            return Ok(None);
        }
        let row = match self.base.input.next()? {
            Some(row) if row.is_type(&self.input_type) => {
                let bindings = self.base.current_bindings()?;
                let values = evaluate_all(&self.projections, Some(&row), bindings, &self.base.context)?;
                Some(Row::new(self.output_type.clone(), values))
            }
            Some(row) => Some(row),
            None => {
                self.base.exhaust();
                None
            }
        };
        self.base.log_yield("Project_Default", &row);
        Ok(row)
    }

    fn close(&mut self) -> ExecutorResult<()> {
        self.base.close()
    }

    fn state(&self) -> CursorState {
        self.base.state()
    }
}

delegate_bindings!(ProjectCursor, base);

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::DataType;
    use crate::executor::eval::BinaryOp;
    use crate::executor::scan::GroupScan;
    use crate::executor::test_util::{int_type, ints, run, test_context, values, Coi};
    use crate::executor::ExecutionConfig;

    #[test]
    fn test_project_computes_new_rows() {
        let ctx = test_context();
        let t = int_type(ctx.schema(), 2);
        let project = Project::new(
            ctx.schema(),
            values(&t, &[&[1, 2], &[3, 4]]),
            t.clone(),
            vec![
                Expression::add(Expression::field(0), Expression::field(1)),
                Expression::binary(BinaryOp::Mul, Expression::field(1), Expression::literal(10i64)),
            ],
        )
        .unwrap();
        let rows = run(&ctx, &project).unwrap();
        assert_eq!(ints(&rows), vec![vec![3, 20], vec![7, 40]]);
        assert!(rows.iter().all(|r| r.is_type(&project.row_type().unwrap())));
        assert_eq!(
            project.row_type().unwrap().fields(),
            &[DataType::BigInt, DataType::BigInt]
        );
    }

    #[test]
    fn test_project_passes_other_types() {
        let coi = Coi::new();
        let ctx = coi.context(ExecutionConfig::default());
        let project = Project::new(
            &coi.schema,
            Box::new(GroupScan::new(coi.group.clone())),
            coi.customer_type(),
            vec![Expression::field(1)],
        )
        .unwrap();
        let rows = run(&ctx, &project).unwrap();
        assert_eq!(rows.len(), 11);
        let names: Vec<String> = rows
            .iter()
            .filter(|r| r.is_type(&project.row_type().unwrap()))
            .map(|r| r.values()[0].to_string())
            .collect();
        assert_eq!(names.len(), 3);
        assert!(names[0].contains("alice"));
    }

    #[test]
    fn test_derived_types_include_projection() {
        let ctx = test_context();
        let t = int_type(ctx.schema(), 1);
        let project = Project::new(ctx.schema(), values(&t, &[]), t.clone(), vec![Expression::field(0)]).unwrap();
        let mut types = Vec::new();
        project.find_derived_types(&mut types);
        assert_eq!(types.len(), 2);
        assert!(Arc::ptr_eq(&types[0], &project.row_type().unwrap()));
        assert!(Project::new(ctx.schema(), values(&t, &[]), t, vec![]).is_err());
    }
}
