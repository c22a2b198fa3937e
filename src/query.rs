//! Structured multi-field boolean queries.
//!
//! A [`QueryRequest`] maps each occurrence kind to per-field keyword
//! strings. [`compose`] turns it into a [`QueryNode`] tree with a fixed,
//! reproducible shape, which is then lowered to engine queries.
//! [`compose_terms`] and [`compose_range`] build exact-term and
//! keyword-range lookups.

use std::{collections::BTreeMap, fmt, ops::Bound};

use serde::{Deserialize, Serialize};
use tantivy::{
    Term,
    query::{BooleanQuery, Occur, Query, RangeQuery, RegexQuery, TermQuery},
    schema::IndexRecordOption,
};

use crate::{
    error::{Error, Result},
    schema::{self, FULL_TEXT_FIELD, FieldKind, IndexSchema, fields},
};

/// Boolean combination semantics of a clause.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Serialize,
    Deserialize,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Occurrence {
    Must,
    Should,
    MustNot,
}

impl From<Occurrence> for Occur {
    fn from(value: Occurrence) -> Self {
        match value {
            Occurrence::Must => Occur::Must,
            Occurrence::Should => Occur::Should,
            Occurrence::MustNot => Occur::MustNot,
        }
    }
}

/// Occurrence kind -> (field -> raw keyword string).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryRequest {
    clauses: BTreeMap<Occurrence, BTreeMap<String, String>>,
}

impl QueryRequest {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn must(self, field: &str, keywords: &str) -> Self {
        self.with(Occurrence::Must, field, keywords)
    }

    pub fn should(self, field: &str, keywords: &str) -> Self {
        self.with(Occurrence::Should, field, keywords)
    }

    pub fn must_not(self, field: &str, keywords: &str) -> Self {
        self.with(Occurrence::MustNot, field, keywords)
    }

    pub fn with(
        mut self,
        occurrence: Occurrence,
        field: &str,
        keywords: &str,
    ) -> Self {
        self.insert(occurrence, field, keywords);
        self
    }

    /// Set the keywords of `field` for `occurrence`, replacing earlier ones.
    pub fn insert(
        &mut self,
        occurrence: Occurrence,
        field: &str,
        keywords: &str,
    ) {
        self.clauses
            .entry(occurrence)
            .or_default()
            .insert(field.to_string(), keywords.to_string());
    }

    pub fn fields(
        &self,
        occurrence: Occurrence,
    ) -> Option<&BTreeMap<String, String>> {
        self.clauses.get(&occurrence).filter(|f| !f.is_empty())
    }

    pub fn is_empty(&self) -> bool {
        self.clauses.values().all(BTreeMap::is_empty)
    }
}

/// A composed query, before lowering to the engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueryNode {
    /// Whole-term pattern on one field: `*` matches any run, `?` one char.
    Wildcard { field: String, pattern: String },
    /// One exact indexed term.
    Term { field: String, value: String },
    /// Terms between `lower` and `upper`, both included, in byte order.
    Range {
        field: String,
        lower: String,
        upper: String,
    },
    Boolean(Vec<(Occurrence, QueryNode)>),
}

impl QueryNode {
    fn wildcard(field: &str, pattern: String) -> Self {
        QueryNode::Wildcard {
            field: field.to_string(),
            pattern,
        }
    }

    /// Lower the tree to an engine query over `schema`.
    pub fn to_query(&self, schema: &IndexSchema) -> Result<Box<dyn Query>> {
        match self {
            QueryNode::Wildcard { field, pattern } => {
                let field = schema.field(field)?;
                let regex = wildcard_to_regex(pattern);
                let query =
                    RegexQuery::from_pattern(&regex, field).map_err(|e| {
                        Error::Validation(format!(
                            "unusable pattern '{pattern}': {e}"
                        ))
                    })?;
                Ok(Box::new(query))
            }
            QueryNode::Term { field, value } => {
                let option = match schema::kind_of(field) {
                    Some(FieldKind::Text) => IndexRecordOption::WithFreqs,
                    _ => IndexRecordOption::Basic,
                };
                let term = Term::from_field_text(schema.field(field)?, value);
                Ok(Box::new(TermQuery::new(term, option)))
            }
            QueryNode::Range {
                field,
                lower,
                upper,
            } => {
                let field = schema.field(field)?;
                Ok(Box::new(RangeQuery::new(
                    Bound::Included(Term::from_field_text(field, lower)),
                    Bound::Included(Term::from_field_text(field, upper)),
                )))
            }
            QueryNode::Boolean(clauses) => {
                let lowered = clauses
                    .iter()
                    .map(|(occurrence, node)| {
                        Ok(((*occurrence).into(), node.to_query(schema)?))
                    })
                    .collect::<Result<Vec<(Occur, Box<dyn Query>)>>>()?;
                Ok(Box::new(BooleanQuery::new(lowered)))
            }
        }
    }
}

impl fmt::Display for QueryNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QueryNode::Wildcard { field, pattern } => {
                write!(f, "{field}:{pattern}")
            }
            QueryNode::Term { field, value } => write!(f, "{field}:{value}"),
            QueryNode::Range {
                field,
                lower,
                upper,
            } => write!(f, "{field}:[{lower} TO {upper}]"),
            QueryNode::Boolean(clauses) => {
                for (i, (occurrence, node)) in clauses.iter().enumerate() {
                    if i > 0 {
                        write!(f, " ")?;
                    }
                    let prefix = match occurrence {
                        Occurrence::Must => "+",
                        Occurrence::Should => "",
                        Occurrence::MustNot => "-",
                    };
                    match node {
                        QueryNode::Boolean(_) => write!(f, "{prefix}({node})")?,
                        _ => write!(f, "{prefix}{node}")?,
                    }
                }
                Ok(())
            }
        }
    }
}

/// Translate a wildcard pattern to the engine's whole-term regex syntax.
fn wildcard_to_regex(pattern: &str) -> String {
    let mut regex = String::with_capacity(pattern.len() * 2);
    for c in pattern.chars() {
        match c {
            '*' => regex.push_str(".*"),
            '?' => regex.push('.'),
            c => regex.push_str(&regex::escape(c.encode_utf8(&mut [0; 4]))),
        }
    }
    regex
}

/// Keyword fields match lower-cased values; the full-text field keeps the
/// caller's case.
fn normalize(field: &str, keyword: &str) -> String {
    if field == FULL_TEXT_FIELD {
        keyword.to_string()
    } else {
        keyword.to_lowercase()
    }
}

fn check_field(field: &str) -> Result<()> {
    match schema::kind_of(field) {
        Some(_) => Ok(()),
        None => Err(Error::Validation(format!("unknown field '{field}'"))),
    }
}

/// Build the boolean query for a structured request.
///
/// Clauses are produced in a fixed order:
/// 1. every MUST_NOT token becomes a `MustNot` pattern on the outer query;
/// 2. every SHOULD token becomes a `*token*` alternative in a nested group;
/// 3. MUST fields each contribute a `*value*` sub-query. Alongside SHOULD
///    they join the nested group as further alternatives; on their own each
///    is attached to the outer query as a `Should` clause;
/// 4. the nested group is attached to the outer query as `Must`.
///
/// Rule 3 widens rather than restricts results when SHOULD is present.
/// This is the long-standing behaviour callers depend on; revisit it only
/// together with them.
pub fn compose(request: &QueryRequest) -> Result<QueryNode> {
    let mut outer = Vec::new();

    if let Some(fields) = request.fields(Occurrence::MustNot) {
        for (field, keywords) in fields {
            check_field(field)?;
            for token in keywords.split_whitespace() {
                outer.push((
                    Occurrence::MustNot,
                    QueryNode::wildcard(field, normalize(field, token)),
                ));
            }
        }
    }

    let mut should_group = None;
    if let Some(fields) = request.fields(Occurrence::Should) {
        let mut group = Vec::new();
        for (field, keywords) in fields {
            check_field(field)?;
            for token in keywords.split_whitespace() {
                let pattern = format!("*{}*", normalize(field, token));
                group.push((
                    Occurrence::Should,
                    QueryNode::wildcard(field, pattern),
                ));
            }
        }
        should_group = Some(group);
    }

    if let Some(fields) = request.fields(Occurrence::Must) {
        for (field, value) in fields {
            check_field(field)?;
            let value = value.trim();
            if value.is_empty() {
                continue;
            }
            let pattern = format!("*{}*", normalize(field, value));
            let single = QueryNode::Boolean(vec![(
                Occurrence::Must,
                QueryNode::wildcard(field, pattern),
            )]);
            match should_group.as_mut() {
                Some(group) => group.push((Occurrence::Should, single)),
                None => outer.push((Occurrence::Should, single)),
            }
        }
    }

    if let Some(group) = should_group
        && !group.is_empty()
    {
        outer.push((Occurrence::Must, QueryNode::Boolean(group)));
    }

    if outer.is_empty() {
        return Err(Error::EmptyQuery);
    }
    Ok(QueryNode::Boolean(outer))
}

/// Build an exact-term lookup from `(field, value)` pairs.
///
/// Suffix clauses are required; every other clause is an alternative that
/// only contributes to scoring once a suffix is given. Values on the
/// full-text field are matched as single lower-cased tokens.
pub fn compose_terms(terms: &[(String, String)]) -> Result<QueryNode> {
    let mut clauses = Vec::with_capacity(terms.len());
    for (field, value) in terms {
        check_field(field)?;
        let value = value.trim();
        if value.is_empty() {
            continue;
        }
        let occurrence = if field == fields::SUFFIX {
            Occurrence::Must
        } else {
            Occurrence::Should
        };
        clauses.push((
            occurrence,
            QueryNode::Term {
                field: field.clone(),
                value: term_value(field, value),
            },
        ));
    }

    if clauses.is_empty() {
        return Err(Error::EmptyQuery);
    }
    Ok(QueryNode::Boolean(clauses))
}

/// Build an inclusive range over the indexed terms of `field`.
pub fn compose_range(
    field: &str,
    lower: &str,
    upper: &str,
) -> Result<QueryNode> {
    check_field(field)?;
    if lower.is_empty() || upper.is_empty() {
        return Err(Error::Validation(format!(
            "range on '{field}' needs both bounds"
        )));
    }
    Ok(QueryNode::Range {
        field: field.to_string(),
        lower: term_value(field, lower),
        upper: term_value(field, upper),
    })
}

/// Keyword terms are indexed verbatim; full-text terms are lower-cased by
/// the analyzer.
fn term_value(field: &str, value: &str) -> String {
    if field == FULL_TEXT_FIELD {
        value.to_lowercase()
    } else {
        value.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn wildcard(field: &str, pattern: &str) -> QueryNode {
        QueryNode::wildcard(field, pattern.to_string())
    }

    fn must_single(field: &str, pattern: &str) -> QueryNode {
        QueryNode::Boolean(vec![(Occurrence::Must, wildcard(field, pattern))])
    }

    #[test]
    fn must_folds_into_should_group() {
        let request = QueryRequest::new()
            .must_not(fields::NAME, "x")
            .should(fields::NAME, "y z")
            .must(fields::SUFFIX, "html");

        let node = compose(&request).unwrap();
        assert_eq!(
            node,
            QueryNode::Boolean(vec![
                (Occurrence::MustNot, wildcard("name", "x")),
                (
                    Occurrence::Must,
                    QueryNode::Boolean(vec![
                        (Occurrence::Should, wildcard("name", "*y*")),
                        (Occurrence::Should, wildcard("name", "*z*")),
                        (Occurrence::Should, must_single("suffix", "*html*")),
                    ])
                ),
            ])
        );
        assert_eq!(
            node.to_string(),
            "-name:x +(name:*y* name:*z* (+suffix:*html*))"
        );
    }

    #[test]
    fn must_alone_yields_one_should_clause_per_field() {
        let request = QueryRequest::new()
            .must(fields::NAME, " Report ")
            .must(fields::SUFFIX, "JS");

        assert_eq!(
            compose(&request).unwrap(),
            QueryNode::Boolean(vec![
                (Occurrence::Should, must_single("name", "*report*")),
                (Occurrence::Should, must_single("suffix", "*js*")),
            ])
        );
    }

    #[test]
    fn full_text_field_keeps_case() {
        let request = QueryRequest::new()
            .must_not(fields::CONTENT, "Draft")
            .should(fields::NAME, "Plane");

        let node = compose(&request).unwrap();
        assert_eq!(node.to_string(), "-content:Draft +(name:*plane*)");
    }

    #[test]
    fn blank_tokens_are_skipped() {
        let request = QueryRequest::new()
            .should(fields::NAME, "   a    b  ")
            .must(fields::SUFFIX, "   ");

        let node = compose(&request).unwrap();
        assert_eq!(node.to_string(), "+(name:*a* name:*b*)");
    }

    #[test]
    fn empty_request_is_an_error() {
        assert!(matches!(
            compose(&QueryRequest::new()),
            Err(Error::EmptyQuery)
        ));

        let blank = QueryRequest::new().should(fields::NAME, "  ");
        assert!(matches!(compose(&blank), Err(Error::EmptyQuery)));
    }

    #[test]
    fn must_not_only_is_valid() {
        let request = QueryRequest::new().must_not(fields::NAME, "a b");
        assert_eq!(compose(&request).unwrap().to_string(), "-name:a -name:b");
    }

    #[test]
    fn unknown_field_is_rejected() {
        let request = QueryRequest::new().should("title", "x");
        assert!(matches!(compose(&request), Err(Error::Validation(_))));
    }

    #[test]
    fn wildcards_translate_and_literals_escape() {
        assert_eq!(wildcard_to_regex("*a?b*"), ".*a.b.*");
        assert_eq!(wildcard_to_regex("v1.2"), "v1\\.2");
        assert_eq!(wildcard_to_regex("(x)"), "\\(x\\)");
    }

    #[test]
    fn lowers_to_engine_query() {
        let schema = IndexSchema::build();
        let node = compose(
            &QueryRequest::new()
                .should(fields::NAME, "a")
                .must(fields::SUFFIX, "html"),
        )
        .unwrap();
        assert!(node.to_query(&schema).is_ok());
    }

    #[test]
    fn oversized_pattern_is_a_validation_error() {
        let schema = IndexSchema::build();
        // Far more automaton states than the engine allows.
        let huge = "ab".repeat(1_000);
        let node = compose(&QueryRequest::new().should(fields::NAME, &huge))
            .unwrap();
        assert!(matches!(
            node.to_query(&schema),
            Err(Error::Validation(_))
        ));
    }

    fn pairs(items: &[(&str, &str)]) -> Vec<(String, String)> {
        items
            .iter()
            .map(|(f, v)| (f.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn suffix_terms_are_required() {
        let node = compose_terms(&pairs(&[
            (fields::NAME, "Index"),
            (fields::SUFFIX, "html"),
            (fields::CONTENT, "Welcome"),
        ]))
        .unwrap();

        assert_eq!(node.to_string(), "name:Index +suffix:html content:welcome");
        assert!(node.to_query(&IndexSchema::build()).is_ok());
    }

    #[test]
    fn blank_terms_compose_to_nothing() {
        assert!(matches!(
            compose_terms(&pairs(&[(fields::NAME, "  ")])),
            Err(Error::EmptyQuery)
        ));
        assert!(matches!(
            compose_terms(&pairs(&[("title", "x")])),
            Err(Error::Validation(_))
        ));
    }

    #[test]
    fn range_needs_both_bounds() {
        let node = compose_range(fields::NAME, "b", "d").unwrap();
        assert_eq!(node.to_string(), "name:[b TO d]");
        assert!(node.to_query(&IndexSchema::build()).is_ok());

        assert!(matches!(
            compose_range(fields::NAME, "", "d"),
            Err(Error::Validation(_))
        ));
    }
}
