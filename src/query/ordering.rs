//! Sort rules and the "column [ASC|DESC], ..." string grammar

use crate::schema::EntityType;
use serde::{Deserialize, Serialize};
use std::convert::Infallible;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::str::FromStr;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    #[default]
    Ascending,
    Descending,
}

impl Direction {
    fn from_token(token: &str) -> Self {
        if token.eq_ignore_ascii_case("desc") || token.eq_ignore_ascii_case("descending") {
            Direction::Descending
        } else {
            Direction::Ascending
        }
    }
}

/// A sort rule, optionally owned by a specific entity type.
///
/// Equality only considers the column and direction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Ordering {
    pub column: String,
    #[serde(default)]
    pub direction: Direction,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entity: Option<EntityType>,
}

impl Ordering {
    pub fn new(column: impl Into<String>, direction: Direction) -> Self {
        Self {
            column: column.into(),
            direction,
            entity: None,
        }
    }

    pub fn asc(column: impl Into<String>) -> Self {
        Self::new(column, Direction::Ascending)
    }

    pub fn desc(column: impl Into<String>) -> Self {
        Self::new(column, Direction::Descending)
    }

    pub fn on(mut self, entity: impl Into<EntityType>) -> Self {
        self.entity = Some(entity.into());
        self
    }
}

impl PartialEq for Ordering {
    fn eq(&self, other: &Self) -> bool {
        self.column == other.column && self.direction == other.direction
    }
}

impl Eq for Ordering {}

impl Hash for Ordering {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.column.hash(state);
        self.direction.hash(state);
    }
}

impl fmt::Display for Ordering {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(entity) = &self.entity {
            write!(f, "{}.", entity)?;
        }
        match self.direction {
            Direction::Ascending => write!(f, "{}", self.column),
            Direction::Descending => write!(f, "{} DESC", self.column),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OrderingList(Vec<Ordering>);

impl OrderingList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn parse(expression: &str) -> Self {
        Self::parse_with_default(expression, None)
    }

    /// Parses comma-separated "column [ASC|DESC]" clauses.
    ///
    /// Unknown direction tokens mean ascending. A blank expression yields a
    /// single ascending ordering on `default_column`, or on the empty column
    /// name when there is none.
    pub fn parse_with_default(expression: &str, default_column: Option<&str>) -> Self {
        if expression.trim().is_empty() {
            return Self(vec![Ordering::asc(default_column.unwrap_or_default())]);
        }

        let orderings = expression
            .split(',')
            .filter_map(|clause| {
                let mut tokens = clause.split_whitespace();
                let column = tokens.next()?;
                let direction = tokens
                    .next()
                    .map(Direction::from_token)
                    .unwrap_or_default();
                Some(Ordering::new(column, direction))
            })
            .collect();
        Self(orderings)
    }

    pub fn push(&mut self, ordering: Ordering) {
        self.0.push(ordering);
    }

    pub fn with(mut self, ordering: Ordering) -> Self {
        self.push(ordering);
        self
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Ordering> {
        self.0.iter()
    }

    /// Removes later duplicates by (column, direction)
    pub fn remove_duplicates(&mut self) {
        let mut index = self.0.len();
        while index > 0 {
            index -= 1;
            if self.0[..index].contains(&self.0[index]) {
                self.0.remove(index);
            }
        }
    }

    pub fn deduplicated(&self) -> Self {
        let mut copy = self.clone();
        copy.remove_duplicates();
        copy
    }
}

impl FromStr for OrderingList {
    type Err = Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self::parse(s))
    }
}

impl fmt::Display for OrderingList {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let clauses: Vec<String> = self.0.iter().map(|o| o.to_string()).collect();
        f.write_str(&clauses.join(", "))
    }
}

impl FromIterator<Ordering> for OrderingList {
    fn from_iter<I: IntoIterator<Item = Ordering>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl IntoIterator for OrderingList {
    type Item = Ordering;
    type IntoIter = std::vec::IntoIter<Ordering>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

impl<'a> IntoIterator for &'a OrderingList {
    type Item = &'a Ordering;
    type IntoIter = std::slice::Iter<'a, Ordering>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

impl From<Vec<Ordering>> for OrderingList {
    fn from(orderings: Vec<Ordering>) -> Self {
        Self(orderings)
    }
}
