//! Reference evaluator for composed expressions
//!
//! Runs a [`QueryExpr`] directly against in-memory tables: nested-loop
//! joins, stable sorts, set semantics by row equality.

use crate::engine::{Backend, Outcome, Row};
use crate::error::{QueryError, QueryResult};
use crate::memory::MemoryBackend;
use crate::query::{
    AggregateFunction, BinaryOp, CollectionSource, Direction, Lambda, Param, QueryExpr, ScalarExpr,
    SetOp, TerminalOp, TextMethod,
};
use crate::schema::{EntityType, MemberKind, Record, Relation, Value};
use log::trace;
use std::cmp::Ordering;
use std::collections::HashSet;
use std::rc::Rc;

#[derive(Debug, Clone, Copy)]
enum Bound<'a> {
    Record(Option<&'a Record>),
    Group(&'a [Rc<Record>]),
}

/// Lambda parameters in scope, innermost last
#[derive(Debug, Clone, Default)]
struct Env<'a> {
    bindings: Vec<(&'a str, Bound<'a>)>,
}

impl<'a> Env<'a> {
    fn bind(&mut self, name: &'a str, bound: Bound<'a>) {
        self.bindings.push((name, bound));
    }

    fn lookup(&self, param: &Param) -> QueryResult<Bound<'a>> {
        self.bindings
            .iter()
            .rev()
            .find(|(name, _)| *name == param.name)
            .map(|(_, bound)| *bound)
            .ok_or_else(|| QueryError::execution(format!("parameter '{}' is not bound", param)))
    }

    fn record(&self, param: &Param) -> QueryResult<Option<&'a Record>> {
        match self.lookup(param)? {
            Bound::Record(record) => Ok(record),
            Bound::Group(_) => Err(QueryError::execution(format!(
                "parameter '{}' is a group, not a row",
                param
            ))),
        }
    }

    /// Binds a lambda's parameters to the parts of a row
    fn for_row(lambda: &'a Lambda, row: &'a Row) -> QueryResult<Self> {
        let parts = match row {
            Row::Entity(record) => vec![Bound::Record(Some(&**record))],
            Row::Pair(outer, inner) => vec![
                Bound::Record(Some(&**outer)),
                Bound::Record(inner.as_deref()),
            ],
            Row::Group(outer, items) => vec![
                Bound::Record(Some(&**outer)),
                Bound::Group(items.as_slice()),
            ],
        };
        if parts.len() != lambda.params.len() {
            return Err(QueryError::execution(format!(
                "lambda {} takes {} parameter(s) but the row has {} part(s)",
                lambda,
                lambda.params.len(),
                parts.len()
            )));
        }
        let mut env = Env::default();
        for (param, bound) in lambda.params.iter().zip(parts) {
            env.bind(&param.name, bound);
        }
        Ok(env)
    }
}

pub(crate) struct Evaluator<'b> {
    backend: &'b MemoryBackend,
}

impl<'b> Evaluator<'b> {
    pub(crate) fn new(backend: &'b MemoryBackend) -> Self {
        Self { backend }
    }

    pub(crate) fn run(&self, expr: &QueryExpr) -> QueryResult<Outcome> {
        match expr {
            QueryExpr::Terminal { source, op } => {
                let rows = self.rows(source)?;
                trace!("{:?} over {} row(s)", op, rows.len());
                Ok(match op {
                    TerminalOp::Count => Outcome::Count(rows.len()),
                    TerminalOp::Any => Outcome::Flag(!rows.is_empty()),
                    TerminalOp::First => {
                        let first = rows.into_iter().next().ok_or_else(|| {
                            QueryError::execution("first() on a sequence with no elements")
                        })?;
                        Outcome::Single(Some(first))
                    }
                    TerminalOp::FirstOrDefault => Outcome::Single(rows.into_iter().next()),
                })
            }
            other => Ok(Outcome::Rows(self.rows(other)?)),
        }
    }

    fn rows(&self, expr: &QueryExpr) -> QueryResult<Vec<Row>> {
        match expr {
            QueryExpr::Source { entity } => Ok(self
                .backend
                .rows_of(entity)
                .iter()
                .map(|record| Row::Entity(Rc::clone(record)))
                .collect()),
            QueryExpr::Filter { source, predicate } => {
                let mut kept = Vec::new();
                for row in self.rows(source)? {
                    if self.apply(predicate, &row)?.is_truthy() {
                        kept.push(row);
                    }
                }
                Ok(kept)
            }
            QueryExpr::Join {
                outer,
                inner,
                outer_key,
                inner_key,
            } => {
                let inner_rows = self.keyed(inner, inner_key)?;
                let mut joined = Vec::new();
                for (key, row) in self.keyed(outer, outer_key)? {
                    for (inner_key, inner_row) in &inner_rows {
                        if matches_key(&key, inner_key) {
                            joined.push(Row::Pair(
                                Rc::clone(row.primary()),
                                Some(Rc::clone(inner_row.primary())),
                            ));
                        }
                    }
                }
                Ok(joined)
            }
            QueryExpr::GroupJoin {
                outer,
                inner,
                outer_key,
                inner_key,
            } => {
                let inner_rows = self.keyed(inner, inner_key)?;
                Ok(self
                    .keyed(outer, outer_key)?
                    .into_iter()
                    .map(|(key, row)| {
                        let group = inner_rows
                            .iter()
                            .filter(|(inner_key, _)| matches_key(&key, inner_key))
                            .map(|(_, inner_row)| Rc::clone(inner_row.primary()))
                            .collect();
                        Row::Group(Rc::clone(row.primary()), group)
                    })
                    .collect())
            }
            QueryExpr::FilterGroups { source, predicate } => {
                let mut restricted = Vec::new();
                for row in self.rows(source)? {
                    let Row::Group(outer, items) = row else {
                        return Err(QueryError::execution("filter_groups expects grouped rows"));
                    };
                    let mut kept = Vec::new();
                    for item in items {
                        let pair = Row::Pair(Rc::clone(&outer), Some(Rc::clone(&item)));
                        if self.apply(predicate, &pair)?.is_truthy() {
                            kept.push(item);
                        }
                    }
                    restricted.push(Row::Group(outer, kept));
                }
                Ok(restricted)
            }
            QueryExpr::Flatten {
                source,
                default_if_empty,
            } => {
                let mut flat = Vec::new();
                for row in self.rows(source)? {
                    let Row::Group(outer, items) = row else {
                        return Err(QueryError::execution("flatten expects grouped rows"));
                    };
                    if items.is_empty() {
                        if *default_if_empty {
                            flat.push(Row::Pair(outer, None));
                        }
                        continue;
                    }
                    flat.extend(
                        items
                            .into_iter()
                            .map(|item| Row::Pair(Rc::clone(&outer), Some(item))),
                    );
                }
                Ok(flat)
            }
            QueryExpr::Project { source, .. } => Ok(self
                .rows(source)?
                .into_iter()
                .map(|row| Row::Entity(Rc::clone(row.primary())))
                .collect()),
            QueryExpr::Sort { .. } => self.sorted(expr),
            QueryExpr::Set { source, op } => {
                let rows = self.rows(source)?;
                match op {
                    SetOp::Distinct => Ok(distinct(rows)),
                    SetOp::Skip(count) => Ok(rows.into_iter().skip(*count).collect()),
                    SetOp::Take(count) => Ok(rows.into_iter().take(*count).collect()),
                    SetOp::Union(other) => {
                        let mut all = rows;
                        all.extend(self.rows(other)?);
                        Ok(distinct(all))
                    }
                    SetOp::Except(other) => {
                        let excluded: HashSet<Row> = self.rows(other)?.into_iter().collect();
                        Ok(distinct(rows)
                            .into_iter()
                            .filter(|row| !excluded.contains(row))
                            .collect())
                    }
                }
            }
            QueryExpr::Terminal { .. } => Err(QueryError::execution(format!(
                "'{}' yields a scalar and cannot be enumerated",
                expr
            ))),
        }
    }

    fn keyed(&self, expr: &QueryExpr, key: &Lambda) -> QueryResult<Vec<(Value, Row)>> {
        self.rows(expr)?
            .into_iter()
            .map(|row| Ok((self.apply(key, &row)?, row)))
            .collect()
    }

    /// A run of then-by sorts is one stable multi-key sort
    fn sorted(&self, expr: &QueryExpr) -> QueryResult<Vec<Row>> {
        let mut keys: Vec<(&Lambda, Direction)> = Vec::new();
        let mut current = expr;
        while let QueryExpr::Sort {
            source,
            key,
            direction,
            then_by,
        } = current
        {
            keys.push((key, *direction));
            current = &**source;
            if !*then_by {
                break;
            }
        }
        keys.reverse();

        let mut decorated = Vec::new();
        for row in self.rows(current)? {
            let values = keys
                .iter()
                .map(|(key, _)| self.apply(key, &row))
                .collect::<QueryResult<Vec<_>>>()?;
            decorated.push((values, row));
        }
        decorated.sort_by(|(left, _), (right, _)| {
            keys.iter()
                .zip(left.iter().zip(right))
                .map(|((_, direction), (a, b))| match direction {
                    Direction::Ascending => a.sort_cmp(b),
                    Direction::Descending => b.sort_cmp(a),
                })
                .find(|ordering| *ordering != Ordering::Equal)
                .unwrap_or(Ordering::Equal)
        });
        Ok(decorated.into_iter().map(|(_, row)| row).collect())
    }

    fn apply(&self, lambda: &Lambda, row: &Row) -> QueryResult<Value> {
        let env = Env::for_row(lambda, row)?;
        self.eval(&lambda.body, &env)
    }

    fn eval(&self, expr: &ScalarExpr, env: &Env<'_>) -> QueryResult<Value> {
        match expr {
            ScalarExpr::Literal(value) => Ok(value.clone()),
            ScalarExpr::Member { param, path } => self.member(param, path, env),
            ScalarExpr::Convert { expr, to } => {
                Ok(self.eval(expr, env)?.convert(*to).unwrap_or(Value::Null))
            }
            ScalarExpr::Compare { op, left, right } => {
                let left = self.eval(left, env)?;
                let right = self.eval(right, env)?;
                Ok(Value::Bool(compare(*op, &left, &right)))
            }
            ScalarExpr::Text {
                method,
                target,
                argument,
            } => {
                let target = self.eval(target, env)?;
                let argument = self.eval(argument, env)?;
                let matched = match (target.as_text(), argument.as_text()) {
                    (Some(text), Some(pattern)) => match method {
                        TextMethod::StartsWith => text.starts_with(pattern),
                        TextMethod::Contains => text.contains(pattern),
                        TextMethod::EndsWith => text.ends_with(pattern),
                    },
                    _ => false,
                };
                Ok(Value::Bool(matched))
            }
            ScalarExpr::And(left, right) => Ok(Value::Bool(
                self.eval(left, env)?.is_truthy() && self.eval(right, env)?.is_truthy(),
            )),
            ScalarExpr::Or(left, right) => Ok(Value::Bool(
                self.eval(left, env)?.is_truthy() || self.eval(right, env)?.is_truthy(),
            )),
            ScalarExpr::Aggregate {
                function,
                source,
                element,
                filter,
                selector,
            } => {
                let items = self.collection(source, env)?;
                let mut matched: Vec<&Record> = Vec::new();
                for item in items.iter().map(|item| &**item) {
                    let mut scope = env.clone();
                    scope.bind(&element.name, Bound::Record(Some(item)));
                    let keep = match filter {
                        Some(filter) => self.eval(filter, &scope)?.is_truthy(),
                        None => true,
                    };
                    if keep {
                        matched.push(item);
                    }
                }

                let mut selected = Vec::new();
                if let Some(selector) = selector {
                    for &item in &matched {
                        let mut scope = env.clone();
                        scope.bind(&element.name, Bound::Record(Some(item)));
                        let value = self.eval(selector, &scope)?;
                        if !value.is_null() {
                            selected.push(value);
                        }
                    }
                }
                Ok(aggregate(*function, items.len(), matched.len(), selected))
            }
        }
    }

    fn member(&self, param: &Param, path: &[String], env: &Env<'_>) -> QueryResult<Value> {
        let Some((last, steps)) = path.split_last() else {
            return Err(QueryError::execution(format!(
                "'{}' is a whole row, not a value",
                param
            )));
        };
        let Some(start) = env.record(param)? else {
            return Ok(Value::Null);
        };
        match self.follow(&param.entity, start, steps)? {
            Some((_, record)) => Ok(record.get(last).clone()),
            None => Ok(Value::Null),
        }
    }

    /// Walks reference navigations; `None` when a reference is dangling
    fn follow<'r>(
        &'r self,
        entity: &EntityType,
        start: &'r Record,
        steps: &[String],
    ) -> QueryResult<Option<(EntityType, &'r Record)>> {
        let schema = self.backend.schema();
        let mut entity = entity.clone();
        let mut record = start;
        for segment in steps {
            let member = schema.member_info(&entity, segment)?;
            let MemberKind::Reference(relation) = &member.kind else {
                return Err(QueryError::execution(format!(
                    "'{}' on '{}' is not a reference navigation",
                    segment, entity
                )));
            };
            match self.related(record, relation).into_iter().next() {
                Some(next) => {
                    record = &**next;
                    entity = relation.target.clone();
                }
                None => return Ok(None),
            }
        }
        Ok(Some((entity, record)))
    }

    fn related(&self, record: &Record, relation: &Relation) -> Vec<&Rc<Record>> {
        let key = record.get(&relation.this_key);
        if key.is_null() {
            return Vec::new();
        }
        self.backend
            .rows_of(&relation.target)
            .iter()
            .filter(|candidate| candidate.get(&relation.other_key).loose_eq(key))
            .collect()
    }

    fn collection(&self, source: &CollectionSource, env: &Env<'_>) -> QueryResult<Vec<Rc<Record>>> {
        match source {
            CollectionSource::Param(param) => match env.lookup(param)? {
                Bound::Group(items) => Ok(items.to_vec()),
                Bound::Record(_) => Err(QueryError::execution(format!(
                    "parameter '{}' is a row, not a group",
                    param
                ))),
            },
            CollectionSource::Navigation { param, path } => {
                let Some((last, steps)) = path.split_last() else {
                    return Err(QueryError::execution("collection navigation without a path"));
                };
                let Some(start) = env.record(param)? else {
                    return Ok(Vec::new());
                };
                let Some((entity, record)) = self.follow(&param.entity, start, steps)? else {
                    return Ok(Vec::new());
                };
                let member = self.backend.schema().member_info(&entity, last)?;
                match &member.kind {
                    MemberKind::Collection(relation) => Ok(self
                        .related(record, relation)
                        .into_iter()
                        .cloned()
                        .collect()),
                    _ => Err(QueryError::execution(format!(
                        "'{}' on '{}' is not a collection navigation",
                        last, entity
                    ))),
                }
            }
        }
    }
}

fn matches_key(left: &Value, right: &Value) -> bool {
    !left.is_null() && left.loose_eq(right)
}

fn compare(op: BinaryOp, left: &Value, right: &Value) -> bool {
    match op {
        BinaryOp::Eq => left.loose_eq(right),
        BinaryOp::Ne => !left.loose_eq(right),
        BinaryOp::Lt => left.compare(right) == Some(Ordering::Less),
        BinaryOp::Le => matches!(left.compare(right), Some(Ordering::Less | Ordering::Equal)),
        BinaryOp::Gt => left.compare(right) == Some(Ordering::Greater),
        BinaryOp::Ge => matches!(
            left.compare(right),
            Some(Ordering::Greater | Ordering::Equal)
        ),
    }
}

fn aggregate(function: AggregateFunction, total: usize, matched: usize, selected: Vec<Value>) -> Value {
    match function {
        AggregateFunction::Any => Value::Bool(matched > 0),
        AggregateFunction::All => Value::Bool(matched == total),
        AggregateFunction::Count | AggregateFunction::LongCount => Value::Int(matched as i64),
        AggregateFunction::Sum => {
            if selected.iter().all(|v| matches!(v, Value::Int(_))) {
                Value::Int(selected.iter().filter_map(|v| match v {
                    Value::Int(i) => Some(*i),
                    _ => None,
                }).sum())
            } else {
                Value::Float(selected.iter().filter_map(Value::as_f64).sum())
            }
        }
        AggregateFunction::Min => selected
            .into_iter()
            .min_by(|a, b| a.sort_cmp(b))
            .unwrap_or(Value::Null),
        AggregateFunction::Max => selected
            .into_iter()
            .max_by(|a, b| a.sort_cmp(b))
            .unwrap_or(Value::Null),
        AggregateFunction::Average => {
            let numbers: Vec<f64> = selected.iter().filter_map(Value::as_f64).collect();
            if numbers.is_empty() {
                Value::Null
            } else {
                Value::Float(numbers.iter().sum::<f64>() / numbers.len() as f64)
            }
        }
    }
}

/// Order-preserving de-duplication
fn distinct(rows: Vec<Row>) -> Vec<Row> {
    let mut seen = HashSet::new();
    rows.into_iter()
        .filter(|row| seen.insert(row.clone()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_compare_nulls() {
        assert!(compare(BinaryOp::Eq, &Value::Null, &Value::Null));
        assert!(!compare(BinaryOp::Lt, &Value::Null, &Value::Int(1)));
        assert!(compare(BinaryOp::Ne, &Value::Int(1), &Value::Null));
        assert!(compare(BinaryOp::Ge, &Value::Float(2.0), &Value::Int(2)));
    }

    #[test]
    fn test_null_keys_never_match() {
        assert!(!matches_key(&Value::Null, &Value::Null));
        assert!(matches_key(&Value::Int(3), &Value::Float(3.0)));
    }

    #[test]
    fn test_aggregate_results() {
        let values = vec![Value::Int(2), Value::Int(5)];
        assert_eq!(aggregate(AggregateFunction::Sum, 2, 2, values.clone()), Value::Int(7));
        assert_eq!(aggregate(AggregateFunction::Max, 2, 2, values.clone()), Value::Int(5));
        assert_eq!(aggregate(AggregateFunction::Average, 2, 2, values), Value::Float(3.5));
        assert_eq!(aggregate(AggregateFunction::Min, 0, 0, Vec::new()), Value::Null);
        assert_eq!(aggregate(AggregateFunction::All, 3, 2, Vec::new()), Value::Bool(false));
        assert_eq!(aggregate(AggregateFunction::Count, 3, 2, Vec::new()), Value::Int(2));
    }

    #[test]
    fn test_distinct_keeps_first_occurrence() {
        let a = Rc::new(Record::new().with("Id", 1));
        let b = Rc::new(Record::new().with("Id", 2));
        let rows = vec![
            Row::Entity(Rc::clone(&a)),
            Row::Entity(Rc::clone(&b)),
            Row::Entity(Rc::new(Record::new().with("Id", 1))),
        ];
        assert_eq!(distinct(rows), vec![Row::Entity(a), Row::Entity(b)]);
    }
}
