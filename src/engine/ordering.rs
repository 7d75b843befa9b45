use crate::engine::backend::{Backend, OrderingMaker, ParamRole};
use crate::engine::split_path;
use crate::error::{QueryError, QueryResult};
use crate::query::{Lambda, OrderingList, Param, QueryExpr, ScalarExpr, Shape};
use crate::schema::{MemberKind, Schema};
use log::debug;

/// Default ordering maker
///
/// The first ordering starts a sort, every following one refines it.
#[derive(Debug, Default, Clone, Copy)]
pub struct OrderingExpressionBuilder;

impl OrderingMaker for OrderingExpressionBuilder {
    fn make(
        &self,
        backend: &dyn Backend,
        orderings: &OrderingList,
        source: QueryExpr,
    ) -> QueryResult<QueryExpr> {
        if orderings.is_empty() {
            return Ok(source);
        }
        let shape = backend.element_shape(&source);
        let Shape::Entity(entity) = shape else {
            return Err(QueryError::unsupported(format!(
                "orderings apply to entity sequences, not {}",
                shape
            )));
        };
        let schema = backend.schema();
        let param = backend.parameters().param(&entity, ParamRole::Source);

        let mut expr = source;
        let mut then_by = false;
        for ordering in orderings {
            if ordering.column.trim().is_empty() {
                return Err(QueryError::Resolution {
                    message: format!("ordering on '{}' names no column", entity),
                    entity: Some(entity.name().to_string()),
                    member: None,
                });
            }

            let mut path = match &ordering.entity {
                Some(owner) if !schema.applies_to(&entity, owner) => {
                    let member = schema.relation_to(&entity, owner).ok_or_else(|| {
                        QueryError::Resolution {
                            message: format!(
                                "ordering on '{}' is not reachable from '{}'",
                                owner, entity
                            ),
                            entity: Some(owner.name().to_string()),
                            member: Some(ordering.column.clone()),
                        }
                    })?;
                    vec![member.name.clone()]
                }
                _ => Vec::new(),
            };
            path.extend(split_path(&ordering.column));

            match sort_key(schema, &param, &path)? {
                Some(body) => {
                    expr = expr.sorted(
                        Lambda::single(param.clone(), body),
                        ordering.direction,
                        then_by,
                    );
                    then_by = true;
                }
                None => debug!("skipping ordering {} through a collection", ordering),
            }
        }
        Ok(expr)
    }
}

/// Member expression for a sort path; `None` when the path crosses a
/// collection and has no single value per element
fn sort_key(schema: &Schema, param: &Param, path: &[String]) -> QueryResult<Option<ScalarExpr>> {
    let mut entity = param.entity.clone();
    for (index, segment) in path.iter().enumerate() {
        let last = index + 1 == path.len();
        let member = schema.member_info(&entity, segment)?;
        match &member.kind {
            MemberKind::Scalar { .. } if last => {
                return Ok(Some(ScalarExpr::member(param, path.to_vec())));
            }
            MemberKind::Collection(_) => return Ok(None),
            MemberKind::Reference(relation) if !last => entity = relation.target.clone(),
            _ => {
                return Err(QueryError::Resolution {
                    message: format!(
                        "cannot order by '{}': '{}' on '{}' is not a sortable member",
                        path.join("."),
                        segment,
                        entity
                    ),
                    entity: Some(entity.name().to_string()),
                    member: Some(segment.clone()),
                });
            }
        }
    }
    Ok(None)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryBackend;
    use crate::query::{Direction, Ordering};
    use crate::schema::{EntityDef, ValueType};

    fn backend() -> MemoryBackend {
        MemoryBackend::new(
            Schema::new()
                .with_entity(
                    EntityDef::new("Person")
                        .scalar("Name", ValueType::Text)
                        .scalar("Age", ValueType::Int)
                        .scalar("TeamId", ValueType::Int)
                        .reference("Team", "Team", "TeamId", "TeamId"),
                )
                .with_entity(
                    EntityDef::new("Team")
                        .scalar("TeamId", ValueType::Int)
                        .scalar("Title", ValueType::Text)
                        .collection("Members", "Person", "TeamId", "TeamId"),
                ),
        )
    }

    #[test]
    fn test_first_sorts_then_refines() {
        let backend = backend();
        let orderings = OrderingList::parse("Name, Age DESC");
        let expr = OrderingExpressionBuilder
            .make(&backend, &orderings, QueryExpr::source("Person"))
            .unwrap();
        assert_eq!(
            expr.to_string(),
            "Person.order_by(|person| person.Name).then_by_desc(|person| person.Age)"
        );
    }

    #[test]
    fn test_scoped_ordering_navigates() {
        let backend = backend();
        let orderings = OrderingList::new().with(Ordering::asc("Title").on("Team"));
        let expr = OrderingExpressionBuilder
            .make(&backend, &orderings, QueryExpr::source("Person"))
            .unwrap();
        assert_eq!(expr.to_string(), "Person.order_by(|person| person.Team.Title)");
    }

    #[test]
    fn test_collection_ordering_is_skipped() {
        let backend = backend();
        let orderings = OrderingList::new()
            .with(Ordering::asc("Members.Name"))
            .with(Ordering::desc("Title"));
        let expr = OrderingExpressionBuilder
            .make(&backend, &orderings, QueryExpr::source("Team"))
            .unwrap();
        match expr {
            QueryExpr::Sort {
                direction, then_by, ..
            } => {
                assert_eq!(direction, Direction::Descending);
                assert!(!then_by);
            }
            other => panic!("expected a sort, got {}", other),
        }
    }

    #[test]
    fn test_blank_column_is_resolution_error() {
        let backend = backend();
        let orderings = OrderingList::new().with(Ordering::asc(""));
        let err = OrderingExpressionBuilder
            .make(&backend, &orderings, QueryExpr::source("Person"))
            .unwrap_err();
        assert!(err.is_resolution());
    }

    #[test]
    fn test_unknown_column() {
        let backend = backend();
        let orderings = OrderingList::parse("Nmae");
        let err = OrderingExpressionBuilder
            .make(&backend, &orderings, QueryExpr::source("Person"))
            .unwrap_err();
        assert!(err.is_resolution());
    }

    #[test]
    fn test_pair_shape_rejected() {
        let backend = backend();
        let pair = QueryExpr::GroupJoin {
            outer: Box::new(QueryExpr::source("Team")),
            inner: Box::new(QueryExpr::source("Person")),
            outer_key: Lambda::single(
                Param::new("team", "Team"),
                ScalarExpr::member(&Param::new("team", "Team"), vec!["TeamId".into()]),
            ),
            inner_key: Lambda::single(
                Param::new("person", "Person"),
                ScalarExpr::member(&Param::new("person", "Person"), vec!["TeamId".into()]),
            ),
        };
        let err = OrderingExpressionBuilder
            .make(&backend, &OrderingList::parse("Title"), pair)
            .unwrap_err();
        assert!(err.is_unsupported());
    }
}
