//! Per-layer feature filter expressions.
//!
//! The JSON grammar is an array whose first element names the operator,
//! e.g. `["all", ["has", "name"], [">=", "pop", 10000]]`. Expressions are
//! parsed once into a tagged AST and evaluated per feature; the original
//! string-dispatch tree walk is gone.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};

use log::warn;
use serde_json::Value;

use crate::error::{CoreError, CoreResult};
use crate::feature::{AttrValue, FeatureType};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CmpOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

#[derive(Debug, Clone)]
pub enum Filter {
    Has(String),
    NotHas(String),
    Compare(CmpOp, String, Value),
    In(String, Vec<Value>),
    NotIn(String, Vec<Value>),
    All(Vec<Filter>),
    Any(Vec<Filter>),
    None(Vec<Filter>),
    /// Does not drop the feature; schedules the named attribute for
    /// exclusion when the inner expression is false.
    AttributeFilter(String, Box<Filter>),
}

/// Filters keyed by layer name; `*` applies to every layer. When both a
/// specific and a `*` filter exist, both must pass.
#[derive(Debug, Clone, Default)]
pub struct FilterSet {
    by_layer: HashMap<String, Filter>,
}

static TYPE_MISMATCH_WARNED: AtomicBool = AtomicBool::new(false);

fn warn_type_mismatch(key: &str) {
    if !TYPE_MISMATCH_WARNED.swap(true, Ordering::Relaxed) {
        warn!("Comparison of mismatched types for attribute \"{key}\" (warning given only once)");
    }
}

impl Filter {
    /// Parse one expression array.
    pub fn parse(value: &Value) -> CoreResult<Self> {
        let arr = value
            .as_array()
            .ok_or_else(|| CoreError::FilterParse(format!("expected array, got {value}")))?;
        let op = arr
            .first()
            .and_then(Value::as_str)
            .ok_or_else(|| CoreError::FilterParse("expression without operator".to_string()))?;

        let key = |i: usize| -> CoreResult<String> {
            arr.get(i)
                .and_then(Value::as_str)
                .map(ToString::to_string)
                .ok_or_else(|| CoreError::FilterParse(format!("operator {op} needs a key")))
        };
        let rest = |from: usize| -> CoreResult<Vec<Self>> {
            arr[from..].iter().map(Self::parse).collect()
        };

        let filter = match op {
            "has" => Self::Has(key(1)?),
            "!has" => Self::NotHas(key(1)?),
            "==" => Self::Compare(CmpOp::Eq, key(1)?, literal(arr, op)?),
            "!=" => Self::Compare(CmpOp::Ne, key(1)?, literal(arr, op)?),
            "<" => Self::Compare(CmpOp::Lt, key(1)?, literal(arr, op)?),
            "<=" => Self::Compare(CmpOp::Le, key(1)?, literal(arr, op)?),
            ">" => Self::Compare(CmpOp::Gt, key(1)?, literal(arr, op)?),
            ">=" => Self::Compare(CmpOp::Ge, key(1)?, literal(arr, op)?),
            "in" => Self::In(key(1)?, arr[2..].to_vec()),
            "!in" => Self::NotIn(key(1)?, arr[2..].to_vec()),
            "all" => Self::All(rest(1)?),
            "any" => Self::Any(rest(1)?),
            "none" => Self::None(rest(1)?),
            "attribute-filter" => {
                let inner = arr.get(2).ok_or_else(|| {
                    CoreError::FilterParse("attribute-filter needs an expression".to_string())
                })?;
                Self::AttributeFilter(key(1)?, Box::new(Self::parse(inner)?))
            }
            other => {
                return Err(CoreError::FilterParse(format!("unknown operator {other}")));
            }
        };
        Ok(filter)
    }

    /// Whether any comparison in this expression reads `key`.
    #[must_use]
    pub fn references(&self, key: &str) -> bool {
        match self {
            Self::Has(k) | Self::NotHas(k) => k == key,
            Self::Compare(_, k, _) | Self::In(k, _) | Self::NotIn(k, _) => k == key,
            Self::All(fs) | Self::Any(fs) | Self::None(fs) => {
                fs.iter().any(|f| f.references(key))
            }
            Self::AttributeFilter(k, inner) => k == key || inner.references(key),
        }
    }

    /// Evaluate against a feature. `exclusions` collects attributes that
    /// `attribute-filter` decided to strip.
    pub fn eval(&self, feature: &FilterFeature<'_>, exclusions: &mut Vec<String>) -> bool {
        match self {
            Self::Has(k) => feature.get(k).is_some(),
            Self::NotHas(k) => feature.get(k).is_none(),
            Self::Compare(op, k, literal) => {
                let Some(actual) = feature.get(k) else {
                    // missing attributes satisfy only the negated compare
                    return *op == CmpOp::Ne;
                };
                match compare(&actual, literal) {
                    Some(ord) => match op {
                        CmpOp::Eq => ord == std::cmp::Ordering::Equal,
                        CmpOp::Ne => ord != std::cmp::Ordering::Equal,
                        CmpOp::Lt => ord == std::cmp::Ordering::Less,
                        CmpOp::Le => ord != std::cmp::Ordering::Greater,
                        CmpOp::Gt => ord == std::cmp::Ordering::Greater,
                        CmpOp::Ge => ord != std::cmp::Ordering::Less,
                    },
                    Option::None => {
                        warn_type_mismatch(k);
                        *op == CmpOp::Ne
                    }
                }
            }
            Self::In(k, set) => {
                let Some(actual) = feature.get(k) else {
                    return false;
                };
                in_set(&actual, set, k)
            }
            Self::NotIn(k, set) => {
                let Some(actual) = feature.get(k) else {
                    return true;
                };
                !in_set(&actual, set, k)
            }
            Self::All(fs) => fs.iter().all(|f| f.eval(feature, exclusions)),
            Self::Any(fs) => fs.iter().any(|f| f.eval(feature, exclusions)),
            Self::None(fs) => !fs.iter().any(|f| f.eval(feature, exclusions)),
            Self::AttributeFilter(k, inner) => {
                if !inner.eval(feature, exclusions) {
                    exclusions.push(k.clone());
                }
                true
            }
        }
    }
}

fn literal(arr: &[Value], op: &str) -> CoreResult<Value> {
    arr.get(2)
        .cloned()
        .ok_or_else(|| CoreError::FilterParse(format!("operator {op} needs a value")))
}

fn in_set(actual: &AttrValue, set: &[Value], key: &str) -> bool {
    let mut mismatched = false;
    let found = set.iter().any(|v| match compare(actual, v) {
        Some(ord) => ord == std::cmp::Ordering::Equal,
        None => {
            mismatched = true;
            false
        }
    });
    if !found && mismatched {
        warn_type_mismatch(key);
    }
    found
}

/// Coercion rules: numbers compare with numbers, strings with strings,
/// booleans with booleans. Anything else is a type mismatch.
fn compare(actual: &AttrValue, literal: &Value) -> Option<std::cmp::Ordering> {
    match (actual, literal) {
        (a, Value::Number(n)) => {
            let a = a.as_f64()?;
            a.partial_cmp(&n.as_f64()?)
        }
        (AttrValue::String(a), Value::String(b)) => Some(a.as_str().cmp(b.as_str())),
        (AttrValue::Bool(a), Value::Bool(b)) => Some(a.cmp(b)),
        (AttrValue::Null, Value::Null) => Some(std::cmp::Ordering::Equal),
        _ => None,
    }
}

/// The attribute view a filter evaluates against, including the
/// `$id` / `$type` / `$zoom` pseudo-attributes.
pub struct FilterFeature<'a> {
    pub attrs: &'a [(String, AttrValue)],
    pub id: Option<u64>,
    pub geom_type: FeatureType,
    pub zoom: Option<u8>,
}

impl FilterFeature<'_> {
    fn get(&self, key: &str) -> Option<AttrValue> {
        match key {
            "$id" => self.id.map(AttrValue::Uint),
            "$type" => Some(AttrValue::String(self.geom_type.name().to_string())),
            "$zoom" => self.zoom.map(|z| AttrValue::Uint(u64::from(z))),
            _ => self
                .attrs
                .iter()
                .find(|(k, _)| k == key)
                .map(|(_, v)| v.clone()),
        }
    }
}

impl FilterSet {
    /// Parse the top-level `{layer: expression}` hash.
    pub fn parse(value: &Value) -> CoreResult<Self> {
        let obj = value.as_object().ok_or_else(|| {
            CoreError::FilterParse("top-level filter must be a hash keyed by layer".to_string())
        })?;
        let mut by_layer = HashMap::new();
        for (layer, expr) in obj {
            by_layer.insert(layer.clone(), Filter::parse(expr)?);
        }
        Ok(Self { by_layer })
    }

    pub fn parse_str(s: &str) -> CoreResult<Self> {
        let value: Value =
            serde_json::from_str(s).map_err(|e| CoreError::FilterParse(e.to_string()))?;
        Self::parse(&value)
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.by_layer.is_empty()
    }

    /// Whether any expression in the set reads `key` (e.g. `$zoom`).
    #[must_use]
    pub fn references(&self, key: &str) -> bool {
        self.by_layer.values().any(|f| f.references(key))
    }

    /// Evaluate the layer's filter and the `*` filter; both must pass.
    /// Returns whether to keep the feature, pushing scheduled attribute
    /// exclusions into `exclusions`.
    pub fn keep(
        &self,
        layer: &str,
        feature: &FilterFeature<'_>,
        exclusions: &mut Vec<String>,
    ) -> bool {
        for name in [layer, "*"] {
            if let Some(f) = self.by_layer.get(name) {
                if !f.eval(feature, exclusions) {
                    return false;
                }
            }
        }
        true
    }
}
