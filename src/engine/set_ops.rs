use crate::engine::backend::{Backend, SetOperationMaker};
use crate::error::{QueryError, QueryResult};
use crate::query::{QueryExpr, SetOp, Shape, TerminalOp};

/// Default set-operation maker
#[derive(Debug, Default, Clone, Copy)]
pub struct SetOperationBuilder;

impl SetOperationBuilder {
    fn sequence(backend: &dyn Backend, source: QueryExpr, operation: &str) -> QueryResult<QueryExpr> {
        if backend.element_shape(&source) == Shape::Scalar {
            return Err(QueryError::structural(format!(
                "{} needs a sequence, the source is already a scalar result",
                operation
            )));
        }
        Ok(source)
    }

    /// Both operands must produce elements of the same shape
    fn compatible(
        backend: &dyn Backend,
        source: QueryExpr,
        other: &QueryExpr,
        operation: &str,
    ) -> QueryResult<QueryExpr> {
        let source = Self::sequence(backend, source, operation)?;
        let left = backend.element_shape(&source);
        let right = backend.element_shape(other);
        if left != right {
            return Err(QueryError::structural(format!(
                "{} combines {} with {}; both sides must produce the same element type",
                operation, left, right
            )));
        }
        Ok(source)
    }
}

impl SetOperationMaker for SetOperationBuilder {
    fn distinct(&self, backend: &dyn Backend, source: QueryExpr) -> QueryResult<QueryExpr> {
        Ok(Self::sequence(backend, source, "distinct")?.with_set(SetOp::Distinct))
    }

    fn skip(&self, backend: &dyn Backend, source: QueryExpr, count: usize) -> QueryResult<QueryExpr> {
        Ok(Self::sequence(backend, source, "skip")?.with_set(SetOp::Skip(count)))
    }

    fn take(&self, backend: &dyn Backend, source: QueryExpr, count: usize) -> QueryResult<QueryExpr> {
        Ok(Self::sequence(backend, source, "take")?.with_set(SetOp::Take(count)))
    }

    fn union(
        &self,
        backend: &dyn Backend,
        source: QueryExpr,
        other: QueryExpr,
    ) -> QueryResult<QueryExpr> {
        let source = Self::compatible(backend, source, &other, "union")?;
        Ok(source.with_set(SetOp::Union(Box::new(other))))
    }

    fn except(
        &self,
        backend: &dyn Backend,
        source: QueryExpr,
        other: QueryExpr,
    ) -> QueryResult<QueryExpr> {
        let source = Self::compatible(backend, source, &other, "except")?;
        Ok(source.with_set(SetOp::Except(Box::new(other))))
    }

    fn count(&self, backend: &dyn Backend, source: QueryExpr) -> QueryResult<QueryExpr> {
        Ok(Self::sequence(backend, source, "count")?.terminal(TerminalOp::Count))
    }

    fn any(&self, backend: &dyn Backend, source: QueryExpr) -> QueryResult<QueryExpr> {
        Ok(Self::sequence(backend, source, "any")?.terminal(TerminalOp::Any))
    }

    fn first(&self, backend: &dyn Backend, source: QueryExpr) -> QueryResult<QueryExpr> {
        Ok(Self::sequence(backend, source, "first")?.terminal(TerminalOp::First))
    }

    fn first_or_default(&self, backend: &dyn Backend, source: QueryExpr) -> QueryResult<QueryExpr> {
        Ok(Self::sequence(backend, source, "first_or_default")?
            .terminal(TerminalOp::FirstOrDefault))
    }
}
