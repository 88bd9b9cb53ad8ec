//! The selection mini-language.
//!
//! A selection string is a comma-separated list of clauses. A clause without a comparison
//! operator is a keyword; otherwise it is `key OP value` with `OP` one of
//! `!=, <=, >=, <, >, =`. A clause with two `<` (`1<age<=5`) is a double-bounded range.
//!
//! Keys are normalized after splitting: `age` becomes a `timestamp` comparison against a
//! duration, chemical symbols become atomic-number counts, and other values are read as
//! floats where possible (strings only support `=`).

use super::duration;
use super::error::{DbError, Result};
use super::record::{Record, Scalar};
use crate::core::elements;
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operator {
    Ne,
    Le,
    Ge,
    Lt,
    Gt,
    Eq,
}

/// The order in which operators are searched for, so that `<=` is never split as `<`.
const SEARCH_ORDER: [Operator; 6] = [
    Operator::Ne,
    Operator::Le,
    Operator::Ge,
    Operator::Lt,
    Operator::Gt,
    Operator::Eq,
];

impl Operator {
    pub fn as_str(self) -> &'static str {
        match self {
            Operator::Ne => "!=",
            Operator::Le => "<=",
            Operator::Ge => ">=",
            Operator::Lt => "<",
            Operator::Gt => ">",
            Operator::Eq => "=",
        }
    }

    /// The operator that keeps a comparison true when both sides move in opposite directions.
    pub fn flipped(self) -> Self {
        match self {
            Operator::Lt => Operator::Gt,
            Operator::Le => Operator::Ge,
            Operator::Ge => Operator::Le,
            Operator::Gt => Operator::Lt,
            other => other,
        }
    }

    pub fn evaluate<T: PartialOrd + ?Sized>(self, lhs: &T, rhs: &T) -> bool {
        match self {
            Operator::Ne => lhs != rhs,
            Operator::Le => lhs <= rhs,
            Operator::Ge => lhs >= rhs,
            Operator::Lt => lhs < rhs,
            Operator::Gt => lhs > rhs,
            Operator::Eq => lhs == rhs,
        }
    }
}

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Operator {
    type Err = DbError;

    fn from_str(s: &str) -> Result<Self> {
        SEARCH_ORDER
            .into_iter()
            .find(|op| op.as_str() == s)
            .ok_or_else(|| DbError::InvalidExpression {
                clause: s.to_string(),
                reason: "unknown comparison operator".to_string(),
            })
    }
}

/// Left-hand side of a comparison.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Key {
    /// A record column or key-value pair name.
    Name(String),
    /// Count of atoms with this atomic number.
    Element(u8),
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Key::Name(name) => f.write_str(name),
            Key::Element(z) => f.write_str(elements::chemical_symbol(*z).unwrap_or("X")),
        }
    }
}

/// Right-hand side of a comparison after normalization.
#[derive(Debug, Clone, PartialEq)]
pub enum Operand {
    Number(f64),
    Integer(i64),
    Text(String),
}

impl fmt::Display for Operand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operand::Number(x) => write!(f, "{x}"),
            Operand::Integer(i) => write!(f, "{i}"),
            Operand::Text(s) => f.write_str(s),
        }
    }
}

/// A normalized `(key, op, value)` triple.
#[derive(Debug, Clone, PartialEq)]
pub struct Comparison {
    pub key: Key,
    pub op: Operator,
    pub value: Operand,
}

impl Comparison {
    pub fn new(key: Key, op: Operator, value: Operand) -> Self {
        Self { key, op, value }
    }
}

/// Renders the comparison as a clause that parses back to itself.
impl fmt::Display for Comparison {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}{}", self.key, self.op, self.value)
    }
}

/// A pre-formed, not yet normalized triple.
#[derive(Debug, Clone, PartialEq)]
pub struct Term {
    pub key: String,
    pub op: Operator,
    pub value: String,
}

impl Term {
    pub fn new(key: impl Into<String>, op: Operator, value: impl ToString) -> Self {
        Self {
            key: key.into(),
            op,
            value: value.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub enum Selection {
    #[default]
    All,
    Id(u64),
    Terms(Vec<Term>),
    Expression(String),
}

impl fmt::Display for Selection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Selection::All => f.write_str("<all>"),
            Selection::Id(id) => write!(f, "id={id}"),
            Selection::Terms(terms) => {
                let rendered: Vec<String> = terms
                    .iter()
                    .map(|t| format!("{}{}{}", t.key, t.op, t.value))
                    .collect();
                f.write_str(&rendered.join(","))
            }
            Selection::Expression(s) => f.write_str(s),
        }
    }
}

impl From<&str> for Selection {
    fn from(s: &str) -> Self {
        Selection::Expression(s.to_string())
    }
}

impl From<String> for Selection {
    fn from(s: String) -> Self {
        Selection::Expression(s)
    }
}

impl From<u64> for Selection {
    fn from(id: u64) -> Self {
        Selection::Id(id)
    }
}

impl From<Vec<Term>> for Selection {
    fn from(terms: Vec<Term>) -> Self {
        Selection::Terms(terms)
    }
}

impl From<Option<&str>> for Selection {
    fn from(s: Option<&str>) -> Self {
        s.map_or(Selection::All, Selection::from)
    }
}

/// The parser output handed to a backend.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ParsedQuery {
    pub keywords: BTreeSet<String>,
    pub comparisons: Vec<Comparison>,
}

pub type RecordPredicate = Box<dyn Fn(&Record) -> bool + Send + Sync>;

/// A selection plus equality filters, an optional client-side predicate, and backend hints.
#[derive(Default)]
pub struct Query {
    pub selection: Selection,
    pub filters: Vec<(String, Scalar)>,
    predicate: Option<RecordPredicate>,
    pub explain: bool,
    pub verbosity: u8,
}

impl Query {
    pub fn new(selection: impl Into<Selection>) -> Self {
        Self {
            selection: selection.into(),
            verbosity: 1,
            ..Self::default()
        }
    }

    pub fn all() -> Self {
        Self::new(Selection::All)
    }

    /// Adds an equality filter, applied after the selection's own comparisons.
    pub fn filter_eq(mut self, key: impl Into<String>, value: impl Into<Scalar>) -> Self {
        self.filters.push((key.into(), value.into()));
        self
    }

    /// Keeps only records for which `predicate` returns `true`, evaluated after the backend scan.
    pub fn predicate<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&Record) -> bool + Send + Sync + 'static,
    {
        self.predicate = Some(Box::new(predicate));
        self
    }

    pub fn explain(mut self, explain: bool) -> Self {
        self.explain = explain;
        self
    }

    pub fn verbosity(mut self, verbosity: u8) -> Self {
        self.verbosity = verbosity;
        self
    }

    pub fn accepts(&self, record: &Record) -> bool {
        self.predicate.as_ref().is_none_or(|p| p(record))
    }

    pub fn parse(&self) -> Result<ParsedQuery> {
        parse(&self.selection, &self.filters, duration::now())
    }
}

impl fmt::Debug for Query {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Query")
            .field("selection", &self.selection)
            .field("filters", &self.filters)
            .field("predicate", &self.predicate.as_ref().map(|_| "<fn>"))
            .field("explain", &self.explain)
            .field("verbosity", &self.verbosity)
            .finish()
    }
}

impl fmt::Display for Query {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.selection)?;
        for (key, value) in &self.filters {
            write!(f, ",{key}={value}")?;
        }
        Ok(())
    }
}

impl From<Selection> for Query {
    fn from(selection: Selection) -> Self {
        Query::new(selection)
    }
}

impl From<&str> for Query {
    fn from(s: &str) -> Self {
        Query::new(s)
    }
}

impl From<String> for Query {
    fn from(s: String) -> Self {
        Query::new(s)
    }
}

impl From<u64> for Query {
    fn from(id: u64) -> Self {
        Query::new(id)
    }
}

enum RawValue<'a> {
    Text(&'a str),
    Scalar(&'a Scalar),
}

/// Parses a selection and filters into keywords and normalized comparisons.
///
/// `now` is the current time in years since [`duration::T0`]; `age` clauses are measured
/// back from it.
pub fn parse(selection: &Selection, filters: &[(String, Scalar)], now: f64) -> Result<ParsedQuery> {
    let mut parsed = ParsedQuery::default();
    let mut terms: Vec<(String, Operator, String, String)> = Vec::new();

    match selection {
        Selection::All => {}
        Selection::Id(id) => terms.push(("id".into(), Operator::Eq, id.to_string(), format!("id={id}"))),
        Selection::Terms(list) => {
            for t in list {
                let clause = format!("{}{}{}", t.key, t.op, t.value);
                terms.push((t.key.clone(), t.op, t.value.clone(), clause));
            }
        }
        Selection::Expression(text) => {
            for clause in text.split(',') {
                split_clause(clause, &mut parsed.keywords, &mut terms)?;
            }
        }
    }

    for (key, op, value, clause) in &terms {
        parsed
            .comparisons
            .push(normalize(key, *op, RawValue::Text(value), clause, now)?);
    }
    for (key, value) in filters {
        let clause = format!("{key}={value}");
        parsed
            .comparisons
            .push(normalize(key, Operator::Eq, RawValue::Scalar(value), &clause, now)?);
    }
    Ok(parsed)
}

/// An integer-valued scalar: integers, whole floats and integer text.
fn integral(scalar: &Scalar) -> Option<i64> {
    match scalar {
        Scalar::Int(i) => Some(*i),
        Scalar::Float(x) if x.is_finite() && x.fract() == 0.0 => Some(*x as i64),
        Scalar::Text(s) => s.trim().parse().ok(),
        Scalar::Float(_) | Scalar::Bool(_) => None,
    }
}

fn invalid(clause: &str, reason: impl Into<String>) -> DbError {
    DbError::InvalidExpression {
        clause: clause.to_string(),
        reason: reason.into(),
    }
}

fn split_clause(
    raw: &str,
    keywords: &mut BTreeSet<String>,
    terms: &mut Vec<(String, Operator, String, String)>,
) -> Result<()> {
    let clause = raw.trim();
    if clause.is_empty() {
        return Ok(());
    }

    let mut rest = clause;
    if clause.matches('<').count() == 2 {
        let (low, tail) = clause
            .split_once('<')
            .ok_or_else(|| invalid(clause, "malformed range"))?;
        let (op, tail) = match tail.strip_prefix('=') {
            Some(stripped) => (Operator::Ge, stripped),
            None => (Operator::Gt, tail),
        };
        let key = tail.split('<').next().unwrap_or_default().trim();
        if key.is_empty() || low.trim().is_empty() {
            return Err(invalid(clause, "range needs a lower bound and a key"));
        }
        terms.push((key.to_string(), op, low.trim().to_string(), clause.to_string()));
        rest = tail;
    }

    let Some(op) = SEARCH_ORDER
        .into_iter()
        .find(|op| rest.contains(op.as_str()))
    else {
        keywords.insert(clause.to_string());
        return Ok(());
    };

    let parts: Vec<&str> = rest.split(op.as_str()).collect();
    if parts.len() != 2 {
        return Err(invalid(clause, format!("expected one '{op}'")));
    }
    let (key, value) = (parts[0].trim(), parts[1].trim());
    if key.is_empty() || value.is_empty() {
        return Err(invalid(clause, "missing key or value"));
    }
    terms.push((key.to_string(), op, value.to_string(), clause.to_string()));
    Ok(())
}

fn normalize(key: &str, op: Operator, value: RawValue<'_>, clause: &str, now: f64) -> Result<Comparison> {
    if key == "age" {
        let age = match value {
            RawValue::Text(s) => duration::time_string_to_float(s)?,
            RawValue::Scalar(Scalar::Text(s)) => duration::time_string_to_float(s)?,
            RawValue::Scalar(scalar) => scalar
                .as_f64()
                .ok_or_else(|| invalid(clause, "age must be a duration"))?,
        };
        return Ok(Comparison::new(
            Key::Name("timestamp".into()),
            op.flipped(),
            Operand::Number(now - age),
        ));
    }

    if let Some(z) = elements::atomic_number(key) {
        let count = match value {
            RawValue::Text(s) => s
                .trim()
                .parse::<i64>()
                .map_err(|_| invalid(clause, "element counts must be integers"))?,
            RawValue::Scalar(scalar) => integral(scalar)
                .ok_or_else(|| invalid(clause, "element counts must be integers"))?,
        };
        return Ok(Comparison::new(Key::Element(z), op, Operand::Integer(count)));
    }

    let operand = match value {
        RawValue::Text(s) => match s.parse::<f64>() {
            Ok(x) if x.is_finite() => Operand::Number(x),
            _ => Operand::Text(s.to_string()),
        },
        RawValue::Scalar(Scalar::Text(s)) => Operand::Text(s.clone()),
        RawValue::Scalar(scalar) => Operand::Number(scalar.as_f64().unwrap_or_default()),
    };
    if matches!(operand, Operand::Text(_)) && op != Operator::Eq {
        return Err(invalid(clause, format!("'{op}' needs a numeric value")));
    }
    Ok(Comparison::new(Key::Name(key.to_string()), op, operand))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::duration::YEAR;

    const NOW: f64 = 25.0;

    fn parse_str(s: &str) -> ParsedQuery {
        parse(&Selection::from(s), &[], NOW).unwrap()
    }

    fn num(key: &str, op: Operator, x: f64) -> Comparison {
        Comparison::new(Key::Name(key.into()), op, Operand::Number(x))
    }

    #[test]
    fn bare_words_are_keywords() {
        let parsed = parse_str("relaxed, converged");
        assert_eq!(
            parsed.keywords,
            BTreeSet::from(["relaxed".to_string(), "converged".to_string()])
        );
        assert!(parsed.comparisons.is_empty());
    }

    #[test]
    fn multi_character_operators_take_precedence() {
        let parsed = parse_str("a<=1,b>=2,c!=3,d<4,e>5,f=6");
        assert_eq!(
            parsed.comparisons,
            vec![
                num("a", Operator::Le, 1.0),
                num("b", Operator::Ge, 2.0),
                num("c", Operator::Ne, 3.0),
                num("d", Operator::Lt, 4.0),
                num("e", Operator::Gt, 5.0),
                num("f", Operator::Eq, 6.0),
            ]
        );
    }

    #[test]
    fn string_values_only_allow_equality() {
        let parsed = parse_str("phase=gas");
        assert_eq!(
            parsed.comparisons,
            vec![Comparison::new(
                Key::Name("phase".into()),
                Operator::Eq,
                Operand::Text("gas".into())
            )]
        );

        let err = parse(&Selection::from("phase>gas"), &[], NOW).unwrap_err();
        assert!(matches!(err, DbError::InvalidExpression { .. }));
        let err = parse(&Selection::from("username!=alice"), &[], NOW).unwrap_err();
        assert!(matches!(err, DbError::InvalidExpression { .. }));
    }

    #[test]
    fn element_symbols_become_atomic_number_counts() {
        let parsed = parse_str("H>1,Fe=2");
        assert_eq!(
            parsed.comparisons,
            vec![
                Comparison::new(Key::Element(1), Operator::Gt, Operand::Integer(1)),
                Comparison::new(Key::Element(26), Operator::Eq, Operand::Integer(2)),
            ]
        );
        assert!(parse(&Selection::from("H=1.5"), &[], NOW).is_err());
    }

    #[test]
    fn element_filters_accept_whole_numbers_in_any_form() {
        let filters = vec![
            ("O".to_string(), Scalar::Float(2.0)),
            ("C".to_string(), Scalar::Text("1".into())),
            ("H".to_string(), Scalar::Int(4)),
        ];
        let parsed = parse(&Selection::All, &filters, NOW).unwrap();
        assert_eq!(
            parsed.comparisons,
            vec![
                Comparison::new(Key::Element(8), Operator::Eq, Operand::Integer(2)),
                Comparison::new(Key::Element(6), Operator::Eq, Operand::Integer(1)),
                Comparison::new(Key::Element(1), Operator::Eq, Operand::Integer(4)),
            ]
        );

        for bad in [Scalar::Float(2.5), Scalar::Text("two".into()), Scalar::Bool(true)] {
            let filters = vec![("O".to_string(), bad)];
            assert!(matches!(
                parse(&Selection::All, &filters, NOW),
                Err(DbError::InvalidExpression { .. })
            ));
        }
    }

    #[test]
    fn double_bounded_age_flips_to_timestamp() {
        let parsed = parse_str("1d<age<=5d");
        let day = 86400.0 / YEAR;
        assert_eq!(
            parsed.comparisons,
            vec![
                num("timestamp", Operator::Lt, NOW - day),
                num("timestamp", Operator::Ge, NOW - 5.0 * 86400.0 / YEAR),
            ]
        );
    }

    #[test]
    fn double_bound_with_inclusive_lower_bound() {
        let parsed = parse_str("1<=energy<5");
        assert_eq!(
            parsed.comparisons,
            vec![num("energy", Operator::Ge, 1.0), num("energy", Operator::Lt, 5.0)]
        );

        let unitless = parse_str("1<age<=5");
        assert_eq!(
            unitless.comparisons,
            vec![
                num("timestamp", Operator::Lt, NOW - 1.0),
                num("timestamp", Operator::Ge, NOW - 5.0),
            ]
        );
    }

    #[test]
    fn filters_are_appended_and_translated() {
        let parsed = parse(&Selection::All, &[("H".into(), Scalar::Int(2))], NOW).unwrap();
        assert_eq!(
            parsed.comparisons,
            vec![Comparison::new(Key::Element(1), Operator::Eq, Operand::Integer(2))]
        );

        let parsed = parse(
            &Selection::from("energy<0"),
            &[("phase".into(), Scalar::from("gas")), ("T".into(), Scalar::Int(300))],
            NOW,
        )
        .unwrap();
        assert_eq!(parsed.comparisons[0], num("energy", Operator::Lt, 0.0));
        assert_eq!(
            parsed.comparisons[1],
            Comparison::new(Key::Name("phase".into()), Operator::Eq, Operand::Text("gas".into()))
        );
        assert_eq!(parsed.comparisons[2], num("T", Operator::Eq, 300.0));
    }

    #[test]
    fn ids_and_preformed_terms_are_normalized() {
        let parsed = parse(&Selection::Id(7), &[], NOW).unwrap();
        assert_eq!(parsed.comparisons, vec![num("id", Operator::Eq, 7.0)]);

        let terms = vec![Term::new("O", Operator::Ge, 1), Term::new("age", Operator::Lt, "2w")];
        let parsed = parse(&Selection::Terms(terms), &[], NOW).unwrap();
        assert_eq!(
            parsed.comparisons[0],
            Comparison::new(Key::Element(8), Operator::Ge, Operand::Integer(1))
        );
        assert_eq!(parsed.comparisons[1].key, Key::Name("timestamp".into()));
        assert_eq!(parsed.comparisons[1].op, Operator::Gt);
    }

    #[test]
    fn malformed_clauses_are_rejected() {
        for bad in ["a=b=c", "=3", "x<", "a<b<c<d"] {
            assert!(
                matches!(
                    parse(&Selection::from(bad), &[], NOW),
                    Err(DbError::InvalidExpression { .. })
                ),
                "'{bad}' should be rejected"
            );
        }
        assert!(matches!(
            parse(&Selection::from("age<3q"), &[], NOW),
            Err(DbError::MalformedDuration(_))
        ));
    }

    #[test]
    fn rendering_and_reparsing_is_idempotent() {
        for text in [
            "H>1,O=2,energy<-1.25",
            "phase=gas,T>=300",
            "1<age<=5,natoms!=3",
            "0.5<charge<1e-3,Cu<=4",
        ] {
            let first = parse_str(text);
            let rendered: Vec<String> = first.comparisons.iter().map(|c| c.to_string()).collect();
            let second = parse_str(&rendered.join(","));
            assert_eq!(second.comparisons, first.comparisons, "for '{text}'");
        }
    }

    #[test]
    fn empty_clauses_are_skipped() {
        let parsed = parse_str("relaxed,,H=1,");
        assert_eq!(parsed.keywords.len(), 1);
        assert_eq!(parsed.comparisons.len(), 1);
    }

    #[test]
    fn operators_flip_and_evaluate() {
        assert_eq!(Operator::Lt.flipped(), Operator::Gt);
        assert_eq!(Operator::Ge.flipped(), Operator::Le);
        assert_eq!(Operator::Eq.flipped(), Operator::Eq);
        assert!(Operator::Le.evaluate(&1.0, &1.0));
        assert!(!Operator::Ne.evaluate("a", "a"));
        assert_eq!("!=".parse::<Operator>().unwrap(), Operator::Ne);
    }

    #[test]
    fn predicate_defaults_to_accepting_everything() {
        let query = Query::all();
        assert!(format!("{query:?}").contains("predicate: None"));
    }
}
