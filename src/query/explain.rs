use crate::query::expr::{QueryExpr, SetOp, TerminalOp};
use crate::query::ordering::Direction;

/// Renders a composed expression as an indented operator tree
///
/// # Examples
/// ```rust
/// use query_designer::query::{QueryExpr, explain};
///
/// let plan = explain(&QueryExpr::source("Order"));
/// assert_eq!(plan, "Source Order\n");
/// ```
pub fn explain(expr: &QueryExpr) -> String {
    let mut writer = PlanWriter::new();
    writer.write_expr(expr);
    writer.buffer
}

#[derive(Debug)]
struct PlanWriter {
    indent_level: usize,
    buffer: String,
}

impl PlanWriter {
    fn new() -> Self {
        Self {
            indent_level: 0,
            buffer: String::new(),
        }
    }

    fn write_expr(&mut self, expr: &QueryExpr) {
        match expr {
            QueryExpr::Source { entity } => self.add_line(&format!("Source {}", entity)),
            QueryExpr::Filter { source, predicate } => {
                self.add_line(&format!("Filter {}", predicate));
                self.write_child(source);
            }
            QueryExpr::Join {
                outer,
                inner,
                outer_key,
                inner_key,
            } => {
                self.add_line(&format!("Join on {} = {}", outer_key, inner_key));
                self.write_children(&[&**outer, &**inner]);
            }
            QueryExpr::GroupJoin {
                outer,
                inner,
                outer_key,
                inner_key,
            } => {
                self.add_line(&format!("GroupJoin on {} = {}", outer_key, inner_key));
                self.write_children(&[&**outer, &**inner]);
            }
            QueryExpr::FilterGroups { source, predicate } => {
                self.add_line(&format!("FilterGroups {}", predicate));
                self.write_child(source);
            }
            QueryExpr::Flatten {
                source,
                default_if_empty,
            } => {
                let label = if *default_if_empty {
                    "Flatten (default if empty)"
                } else {
                    "Flatten"
                };
                self.add_line(label);
                self.write_child(source);
            }
            QueryExpr::Project { source, to } => {
                self.add_line(&format!("Project -> {}", to));
                self.write_child(source);
            }
            QueryExpr::Sort {
                source,
                key,
                direction,
                then_by,
            } => {
                let verb = if *then_by { "ThenBy" } else { "Sort" };
                let dir = match direction {
                    Direction::Ascending => "asc",
                    Direction::Descending => "desc",
                };
                self.add_line(&format!("{} {} {}", verb, key, dir));
                self.write_child(source);
            }
            QueryExpr::Set { source, op } => match op {
                SetOp::Distinct => {
                    self.add_line("Distinct");
                    self.write_child(source);
                }
                SetOp::Skip(n) => {
                    self.add_line(&format!("Skip {}", n));
                    self.write_child(source);
                }
                SetOp::Take(n) => {
                    self.add_line(&format!("Take {}", n));
                    self.write_child(source);
                }
                SetOp::Union(other) => {
                    self.add_line("Union");
                    self.write_children(&[&**source, &**other]);
                }
                SetOp::Except(other) => {
                    self.add_line("Except");
                    self.write_children(&[&**source, &**other]);
                }
            },
            QueryExpr::Terminal { source, op } => {
                let label = match op {
                    TerminalOp::Count => "Count",
                    TerminalOp::Any => "Any",
                    TerminalOp::First => "First",
                    TerminalOp::FirstOrDefault => "FirstOrDefault",
                };
                self.add_line(label);
                self.write_child(source);
            }
        }
    }

    fn write_child(&mut self, child: &QueryExpr) {
        self.indent();
        self.write_expr(child);
        self.unindent();
    }

    fn write_children(&mut self, children: &[&QueryExpr]) {
        self.indent();
        for child in children {
            self.write_expr(child);
        }
        self.unindent();
    }

    fn add_line(&mut self, content: &str) {
        self.buffer.push_str(&self.get_indent());
        self.buffer.push_str(content);
        self.buffer.push('\n');
    }

    fn indent(&mut self) {
        self.indent_level += 1;
    }

    fn unindent(&mut self) {
        if self.indent_level > 0 {
            self.indent_level -= 1;
        }
    }

    fn get_indent(&self) -> String {
        "  ".repeat(self.indent_level)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::expr::{Lambda, Param, ScalarExpr};

    #[test]
    fn test_explain_nests_operators() {
        let order = Param::new("order", "Order");
        let key = Lambda::single(
            order.clone(),
            ScalarExpr::member(&order, vec!["Freight".to_string()]),
        );
        let expr = QueryExpr::source("Order")
            .sorted(key, Direction::Ascending, false)
            .with_set(SetOp::Take(3));
        assert_eq!(
            explain(&expr),
            "Take 3\n  Sort |order| order.Freight asc\n    Source Order\n"
        );
    }

    #[test]
    fn test_explain_group_restriction() {
        let customer = Param::new("customer", "Customer");
        let order = Param::new("order_inner", "Order");
        let key = |param: &Param| {
            Lambda::single(
                param.clone(),
                ScalarExpr::member(param, vec!["CustomerId".to_string()]),
            )
        };
        let predicate = Lambda::new(
            vec![customer.clone(), order.clone()],
            ScalarExpr::member(&order, vec!["Shipped".to_string()]),
        );
        let expr = QueryExpr::GroupJoin {
            outer: Box::new(QueryExpr::source("Customer")),
            inner: Box::new(QueryExpr::source("Order")),
            outer_key: key(&customer),
            inner_key: key(&order),
        }
        .groups_filtered(predicate)
        .flattened(true);
        assert_eq!(
            explain(&expr),
            "Flatten (default if empty)\n  FilterGroups |customer, order_inner| order_inner.Shipped\n    \
             GroupJoin on |customer| customer.CustomerId = |order_inner| order_inner.CustomerId\n      \
             Source Customer\n      Source Order\n"
        );
    }
}
