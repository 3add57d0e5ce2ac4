//! Query feature pipeline.
//!
//! Turns the raw key/value pairs of a listing request into a [`QuerySpec`]:
//! filter, then sort, then field projection, then pagination. Building a spec
//! never touches a store; adapters translate or evaluate it.

use std::cmp::Ordering;
use std::fmt;

use serde_json::Map;
use serde_json::Value;

use crate::domain::resource::errors::QueryError;

/// Raw key/value pairs of a request query string, in arrival order.
pub type QueryDescriptor = Vec<(String, String)>;

/// Keys consumed by the pipeline itself and never treated as filters.
pub const RESERVED_KEYS: [&str; 5] = ["page", "sort", "limit", "fields", "search"];

/// Versioning fields hidden unless explicitly requested.
const INTERNAL_FIELDS: [&str; 1] = ["__v"];

pub const DEFAULT_PAGE: u32 = 1;
pub const DEFAULT_PAGE_SIZE: u32 = 100;

/// Per-listing knobs supplied by the caller.
#[derive(Debug, Clone, Copy, Default)]
pub struct QueryOptions {
    /// Sort applied when the descriptor carries none, e.g. `-createdAt`
    pub default_sort: Option<&'static str>,
    /// Upper bound on the page size; `None` leaves it unbounded
    pub max_page_size: Option<u32>,
}

/// Dotted path to a (possibly nested) document field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldPath {
    raw: String,
    segments: Vec<String>,
}

impl FieldPath {
    /// Parse a field path such as `price` or `address.city`.
    ///
    /// # Errors
    /// * `InvalidField` - A segment is empty or not an identifier
    pub fn parse(raw: &str) -> Result<Self, QueryError> {
        let raw = raw.trim();
        let segments: Vec<String> = raw.split('.').map(str::to_string).collect();

        if raw.is_empty() || !segments.iter().all(|segment| is_identifier(segment)) {
            return Err(QueryError::InvalidField(raw.to_string()));
        }

        Ok(Self {
            raw: raw.to_string(),
            segments,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    pub fn segments(&self) -> &[String] {
        &self.segments
    }

    pub fn is_top_level(&self, name: &str) -> bool {
        self.segments.len() == 1 && self.segments[0] == name
    }

    /// Look the path up inside a rendered document.
    pub fn resolve<'a>(&self, document: &'a Value) -> Option<&'a Value> {
        self.segments
            .iter()
            .try_fold(document, |current, segment| current.get(segment))
    }
}

impl fmt::Display for FieldPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

fn is_identifier(segment: &str) -> bool {
    let mut chars = segment.chars();
    match chars.next() {
        Some(first) if first.is_ascii_alphabetic() || first == '_' => {
            chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
        }
        _ => false,
    }
}

/// Comparison operator of a filter constraint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Comparison {
    Eq,
    Gt,
    Gte,
    Lt,
    Lte,
}

impl Comparison {
    fn from_suffix(suffix: &str) -> Option<Self> {
        match suffix {
            "gt" => Some(Comparison::Gt),
            "gte" => Some(Comparison::Gte),
            "lt" => Some(Comparison::Lt),
            "lte" => Some(Comparison::Lte),
            _ => None,
        }
    }

    pub fn as_sql(&self) -> &'static str {
        match self {
            Comparison::Eq => "=",
            Comparison::Gt => ">",
            Comparison::Gte => ">=",
            Comparison::Lt => "<",
            Comparison::Lte => "<=",
        }
    }

    fn accepts(&self, ordering: Ordering) -> bool {
        match self {
            Comparison::Eq => ordering == Ordering::Equal,
            Comparison::Gt => ordering == Ordering::Greater,
            Comparison::Gte => ordering != Ordering::Less,
            Comparison::Lt => ordering == Ordering::Less,
            Comparison::Lte => ordering != Ordering::Greater,
        }
    }
}

/// Typed reading of a raw query value.
#[derive(Debug, Clone, PartialEq)]
pub enum FilterValue {
    Number(f64),
    Bool(bool),
    Text(String),
}

impl FilterValue {
    /// Numbers and booleans are recognised; everything else stays text.
    pub fn from_raw(raw: &str) -> Self {
        match raw {
            "true" => return FilterValue::Bool(true),
            "false" => return FilterValue::Bool(false),
            _ => {}
        }

        match raw.parse::<f64>() {
            Ok(number) if number.is_finite() => FilterValue::Number(number),
            _ => FilterValue::Text(raw.to_string()),
        }
    }
}

/// One filter constraint: `field <comparison> value`.
#[derive(Debug, Clone, PartialEq)]
pub struct Constraint {
    pub field: FieldPath,
    pub comparison: Comparison,
    pub value: FilterValue,
    /// Value exactly as received, used for text comparisons
    pub raw: String,
}

impl Constraint {
    pub fn new(field: FieldPath, comparison: Comparison, raw: impl Into<String>) -> Self {
        let raw = raw.into();
        Self {
            field,
            comparison,
            value: FilterValue::from_raw(&raw),
            raw,
        }
    }

    /// Equality constraint on a field.
    pub fn equals(field: FieldPath, raw: impl Into<String>) -> Self {
        Self::new(field, Comparison::Eq, raw)
    }

    /// Evaluate against a rendered document.
    ///
    /// Equality against an array matches when any element matches; ordering
    /// comparisons only apply between numbers or between strings.
    pub fn matches(&self, document: &Value) -> bool {
        let Some(candidate) = self.field.resolve(document) else {
            return false;
        };

        match (self.comparison, candidate) {
            (Comparison::Eq, Value::Array(items)) => {
                items.iter().any(|item| self.equals_scalar(item))
            }
            (Comparison::Eq, scalar) => self.equals_scalar(scalar),
            (comparison, scalar) => self
                .order_against(scalar)
                .is_some_and(|ordering| comparison.accepts(ordering)),
        }
    }

    fn equals_scalar(&self, candidate: &Value) -> bool {
        match (candidate, &self.value) {
            (Value::Number(n), FilterValue::Number(expected)) => {
                n.as_f64().is_some_and(|n| n == *expected)
            }
            (Value::Bool(b), FilterValue::Bool(expected)) => b == expected,
            (Value::String(s), _) => *s == self.raw,
            _ => false,
        }
    }

    fn order_against(&self, candidate: &Value) -> Option<Ordering> {
        match (candidate, &self.value) {
            (Value::Number(n), FilterValue::Number(expected)) => n.as_f64()?.partial_cmp(expected),
            (Value::String(s), FilterValue::Text(_)) => Some(s.as_str().cmp(self.raw.as_str())),
            _ => None,
        }
    }
}

/// Sort direction of one sort key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Ascending,
    Descending,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SortKey {
    pub field: FieldPath,
    pub direction: Direction,
}

/// Which fields a response carries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Projection {
    /// Everything except internal versioning fields
    All,
    /// Only the listed fields, plus `id`
    Include(Vec<FieldPath>),
    /// Everything except the listed fields
    Exclude(Vec<FieldPath>),
}

impl Projection {
    pub fn apply(&self, document: Value) -> Value {
        let Value::Object(mut fields) = document else {
            return document;
        };

        match self {
            Projection::All => {
                strip_internal(&mut fields);
                Value::Object(fields)
            }
            Projection::Include(paths) => {
                let mut projected = Map::new();
                if let Some(id) = fields.remove("id") {
                    projected.insert("id".to_string(), id);
                }
                let source = Value::Object(fields);
                for path in paths {
                    if let Some(value) = path.resolve(&source) {
                        insert_path(&mut projected, path.segments(), value.clone());
                    }
                }
                Value::Object(projected)
            }
            Projection::Exclude(paths) => {
                strip_internal(&mut fields);
                for path in paths {
                    remove_path(&mut fields, path.segments());
                }
                Value::Object(fields)
            }
        }
    }
}

fn strip_internal(fields: &mut Map<String, Value>) {
    for name in INTERNAL_FIELDS {
        fields.remove(name);
    }
}

fn insert_path(target: &mut Map<String, Value>, segments: &[String], value: Value) {
    match segments {
        [] => {}
        [last] => {
            target.insert(last.clone(), value);
        }
        [head, rest @ ..] => {
            let entry = target
                .entry(head.clone())
                .or_insert_with(|| Value::Object(Map::new()));
            if let Value::Object(nested) = entry {
                insert_path(nested, rest, value);
            }
        }
    }
}

fn remove_path(target: &mut Map<String, Value>, segments: &[String]) {
    match segments {
        [] => {}
        [last] => {
            target.remove(last);
        }
        [head, rest @ ..] => {
            if let Some(Value::Object(nested)) = target.get_mut(head) {
                remove_path(nested, rest);
            }
        }
    }
}

/// Page window over the sorted candidate set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pagination {
    pub page: u32,
    pub limit: u32,
}

impl Pagination {
    /// Number of records skipped before the window starts.
    pub fn skip(&self) -> u64 {
        u64::from(self.page - 1) * u64::from(self.limit)
    }
}

impl Default for Pagination {
    fn default() -> Self {
        Self {
            page: DEFAULT_PAGE,
            limit: DEFAULT_PAGE_SIZE,
        }
    }
}

/// Fully composed, storage-agnostic query.
#[derive(Debug, Clone, PartialEq)]
pub struct QuerySpec {
    pub filter: Vec<Constraint>,
    pub search: Option<String>,
    pub sort: Vec<SortKey>,
    pub projection: Projection,
    pub pagination: Pagination,
}

impl QuerySpec {
    /// Run every pipeline stage over a descriptor.
    ///
    /// # Errors
    /// * `InvalidField` - A filter, sort or projection field is not a valid path
    /// * `UnknownOperator` - A bracketed comparison suffix is not recognised
    /// * `MixedProjection` - Inclusions and exclusions in one `fields` value
    pub fn from_descriptor(
        descriptor: &[(String, String)],
        options: &QueryOptions,
    ) -> Result<Self, QueryError> {
        Ok(Self {
            filter: filter(descriptor)?,
            search: search(descriptor),
            sort: sort(descriptor, options.default_sort)?,
            projection: project(descriptor)?,
            pagination: paginate(descriptor, options.max_page_size),
        })
    }

    /// Spec matching everything, first page, default size.
    pub fn unfiltered() -> Self {
        Self {
            filter: Vec::new(),
            search: None,
            sort: Vec::new(),
            projection: Projection::All,
            pagination: Pagination::default(),
        }
    }

    pub fn with_constraint(mut self, constraint: Constraint) -> Self {
        self.filter.push(constraint);
        self
    }

    /// Whether a rendered document passes the filter and search stages.
    pub fn matches(&self, document: &Value) -> bool {
        self.filter
            .iter()
            .all(|constraint| constraint.matches(document))
            && self
                .search
                .as_deref()
                .map_or(true, |term| matches_search(document, term))
    }

    /// Order two rendered documents by the sort stage.
    pub fn compare(&self, left: &Value, right: &Value) -> Ordering {
        self.sort
            .iter()
            .map(|key| {
                let ordering = compare_values(key.field.resolve(left), key.field.resolve(right));
                match key.direction {
                    Direction::Ascending => ordering,
                    Direction::Descending => ordering.reverse(),
                }
            })
            .find(|ordering| *ordering != Ordering::Equal)
            .unwrap_or(Ordering::Equal)
    }

    /// Filter, sort and paginate in-memory items by their rendered form.
    ///
    /// Projection is left to the caller.
    pub fn select<T>(&self, candidates: impl IntoIterator<Item = (T, Value)>) -> Vec<T> {
        let mut matched: Vec<(T, Value)> = candidates
            .into_iter()
            .filter(|(_, document)| self.matches(document))
            .collect();
        matched.sort_by(|(_, left), (_, right)| self.compare(left, right));

        let skip = usize::try_from(self.pagination.skip()).unwrap_or(usize::MAX);
        matched
            .into_iter()
            .skip(skip)
            .take(self.pagination.limit as usize)
            .map(|(item, _)| item)
            .collect()
    }

    /// Evaluate the whole spec over in-memory documents.
    pub fn evaluate(&self, documents: impl IntoIterator<Item = Value>) -> Vec<Value> {
        self.select(documents.into_iter().map(|document| (document.clone(), document)))
            .into_iter()
            .map(|document| self.projection.apply(document))
            .collect()
    }
}

/// Filter stage: every non-reserved pair becomes a constraint.
///
/// `price[gte]=10` becomes `price >= 10`; a plain `category=shoes` is an
/// equality constraint.
pub fn filter(descriptor: &[(String, String)]) -> Result<Vec<Constraint>, QueryError> {
    descriptor
        .iter()
        .filter(|(key, _)| !RESERVED_KEYS.contains(&key.as_str()))
        .map(|(key, value)| {
            let (field, comparison) = split_operator(key)?;
            Ok(Constraint::new(FieldPath::parse(field)?, comparison, value.clone()))
        })
        .collect()
}

fn split_operator(key: &str) -> Result<(&str, Comparison), QueryError> {
    let Some(stripped) = key.strip_suffix(']') else {
        return Ok((key, Comparison::Eq));
    };

    let (field, suffix) = stripped
        .split_once('[')
        .ok_or_else(|| QueryError::InvalidField(key.to_string()))?;

    let comparison =
        Comparison::from_suffix(suffix).ok_or_else(|| QueryError::UnknownOperator {
            field: field.to_string(),
            operator: suffix.to_string(),
        })?;

    Ok((field, comparison))
}

fn search(descriptor: &[(String, String)]) -> Option<String> {
    last_value(descriptor, "search")
        .map(str::trim)
        .filter(|term| !term.is_empty())
        .map(str::to_string)
}

/// Sort stage: `-price,name` sorts by price descending, then name.
pub fn sort(
    descriptor: &[(String, String)],
    default_sort: Option<&str>,
) -> Result<Vec<SortKey>, QueryError> {
    let Some(raw) = last_value(descriptor, "sort").or(default_sort) else {
        return Ok(Vec::new());
    };

    split_list(raw)
        .map(|item| {
            let (direction, name) = match item.strip_prefix('-') {
                Some(name) => (Direction::Descending, name),
                None => (Direction::Ascending, item),
            };
            Ok(SortKey {
                field: FieldPath::parse(name)?,
                direction,
            })
        })
        .collect()
}

/// Projection stage: `name,price` keeps those fields, `-description` drops one.
pub fn project(descriptor: &[(String, String)]) -> Result<Projection, QueryError> {
    let Some(raw) = last_value(descriptor, "fields") else {
        return Ok(Projection::All);
    };

    let mut included = Vec::new();
    let mut excluded = Vec::new();
    for item in split_list(raw) {
        match item.strip_prefix('-') {
            Some(name) => excluded.push(FieldPath::parse(name)?),
            None => included.push(FieldPath::parse(item)?),
        }
    }

    match (included.is_empty(), excluded.is_empty()) {
        (true, true) => Ok(Projection::All),
        (false, true) => Ok(Projection::Include(included)),
        (true, false) => Ok(Projection::Exclude(excluded)),
        (false, false) => Err(QueryError::MixedProjection),
    }
}

/// Pagination stage.
///
/// Missing, malformed or non-positive values fall back to the defaults; the
/// page size is clamped to `max_page_size` when one is set.
pub fn paginate(descriptor: &[(String, String)], max_page_size: Option<u32>) -> Pagination {
    let page = last_value(descriptor, "page")
        .and_then(parse_positive)
        .unwrap_or(DEFAULT_PAGE);
    let limit = last_value(descriptor, "limit")
        .and_then(parse_positive)
        .unwrap_or(DEFAULT_PAGE_SIZE);
    let limit = max_page_size.map_or(limit, |max| limit.min(max.max(1)));

    Pagination { page, limit }
}

fn parse_positive(raw: &str) -> Option<u32> {
    raw.trim().parse::<u32>().ok().filter(|n| *n > 0)
}

fn last_value<'a>(descriptor: &'a [(String, String)], key: &str) -> Option<&'a str> {
    descriptor
        .iter()
        .rev()
        .find(|(candidate, _)| candidate == key)
        .map(|(_, value)| value.as_str())
}

fn split_list(raw: &str) -> impl Iterator<Item = &str> {
    raw.split(|c: char| c == ',' || c.is_whitespace())
        .filter(|item| !item.is_empty())
}

fn matches_search(document: &Value, term: &str) -> bool {
    let needle = term.to_lowercase();
    let contains = |value: &Value| {
        value
            .as_str()
            .is_some_and(|s| s.to_lowercase().contains(&needle))
    };

    match document {
        Value::Object(fields) => fields.values().any(|value| match value {
            Value::Array(items) => items.iter().any(contains),
            other => contains(other),
        }),
        _ => false,
    }
}

/// Total order over optional JSON values: missing, null, bool, number,
/// string, then anything else.
fn compare_values(left: Option<&Value>, right: Option<&Value>) -> Ordering {
    fn rank(value: Option<&Value>) -> u8 {
        match value {
            None | Some(Value::Null) => 0,
            Some(Value::Bool(_)) => 1,
            Some(Value::Number(_)) => 2,
            Some(Value::String(_)) => 3,
            Some(Value::Array(_)) => 4,
            Some(Value::Object(_)) => 5,
        }
    }

    match (left, right) {
        (Some(Value::Bool(l)), Some(Value::Bool(r))) => l.cmp(r),
        (Some(Value::Number(l)), Some(Value::Number(r))) => {
            let l = l.as_f64().unwrap_or(f64::NAN);
            let r = r.as_f64().unwrap_or(f64::NAN);
            l.partial_cmp(&r).unwrap_or(Ordering::Equal)
        }
        (Some(Value::String(l)), Some(Value::String(r))) => l.cmp(r),
        _ => rank(left).cmp(&rank(right)),
    }
}
