//! Custom Column Expressions
//!
//! Expression trees used by custom columns and custom aggregations, and the
//! type inference that gives a derived column its semantic type.

use crate::query::{Aggregation, FieldRef};
use crate::types::{CoercionClass, SemanticType};
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// A custom column or custom aggregation expression
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Expression {
    Field {
        field: FieldRef,
    },
    Literal {
        value: Literal,
    },
    Arithmetic {
        op: ArithmeticOp,
        left: Box<Expression>,
        right: Box<Expression>,
    },
    Function {
        name: String,
        #[serde(default)]
        args: Vec<Expression>,
    },
    Case {
        branches: Vec<CaseBranch>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        default: Option<Box<Expression>>,
    },
    /// An aggregation used inside a custom aggregation, e.g. the `Count` in `5 * Count`
    Aggregate {
        aggregation: Box<Aggregation>,
    },
}

/// Literal values
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "literal_type", content = "value", rename_all = "snake_case")]
pub enum Literal {
    Number(f64),
    String(String),
    Boolean(bool),
    Date(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArithmeticOp {
    Add,
    Subtract,
    Multiply,
    Divide,
}

/// `WHEN condition THEN result`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CaseBranch {
    pub condition: Expression,
    pub result: Expression,
}

impl Expression {
    pub fn field(field: FieldRef) -> Self {
        Expression::Field { field }
    }

    pub fn number(value: f64) -> Self {
        Expression::Literal {
            value: Literal::Number(value),
        }
    }

    pub fn string(value: impl Into<String>) -> Self {
        Expression::Literal {
            value: Literal::String(value.into()),
        }
    }

    pub fn function(name: impl Into<String>, args: impl IntoIterator<Item = Expression>) -> Self {
        Expression::Function {
            name: name.into(),
            args: args.into_iter().collect(),
        }
    }

    pub fn aggregate(aggregation: Aggregation) -> Self {
        Expression::Aggregate {
            aggregation: Box::new(aggregation),
        }
    }

    pub fn arithmetic(op: ArithmeticOp, left: Expression, right: Expression) -> Self {
        Expression::Arithmetic {
            op,
            left: Box::new(left),
            right: Box::new(right),
        }
    }

    pub fn add(self, other: Expression) -> Self {
        Self::arithmetic(ArithmeticOp::Add, self, other)
    }

    pub fn sub(self, other: Expression) -> Self {
        Self::arithmetic(ArithmeticOp::Subtract, self, other)
    }

    pub fn mul(self, other: Expression) -> Self {
        Self::arithmetic(ArithmeticOp::Multiply, self, other)
    }

    pub fn div(self, other: Expression) -> Self {
        Self::arithmetic(ArithmeticOp::Divide, self, other)
    }

    /// Every field referenced by this expression, including aggregation arguments
    pub fn fields(&self) -> Vec<&FieldRef> {
        let mut fields = Vec::new();
        self.collect_fields(&mut fields);
        fields
    }

    fn collect_fields<'a>(&'a self, out: &mut Vec<&'a FieldRef>) {
        match self {
            Expression::Field { field } => out.push(field),
            Expression::Literal { .. } => {}
            Expression::Arithmetic { left, right, .. } => {
                left.collect_fields(out);
                right.collect_fields(out);
            }
            Expression::Function { args, .. } => {
                for arg in args {
                    arg.collect_fields(out);
                }
            }
            Expression::Case { branches, default } => {
                for branch in branches {
                    branch.condition.collect_fields(out);
                    branch.result.collect_fields(out);
                }
                if let Some(default) = default {
                    default.collect_fields(out);
                }
            }
            Expression::Aggregate { aggregation } => match aggregation.as_ref() {
                Aggregation::Named { expression, .. } => expression.collect_fields(out),
                other => out.extend(other.field()),
            },
        }
    }
}

/// How a function's return type is determined
#[derive(Debug, Clone, Copy)]
enum ReturnType {
    Fixed(SemanticType),
    FirstArgument,
}

static FUNCTION_RETURN_TYPES: Lazy<HashMap<&'static str, ReturnType>> = Lazy::new(|| {
    let mut map = HashMap::new();

    for name in [
        "now",
        "date",
        "datetime",
        "datetimeadd",
        "datetimesubtract",
        "converttimezone",
    ] {
        map.insert(name, ReturnType::Fixed(SemanticType::Date));
    }

    for name in [
        "abs",
        "ceil",
        "floor",
        "round",
        "sqrt",
        "power",
        "exp",
        "log",
        "length",
        "integer",
        "float",
        "year",
        "quarter",
        "month",
        "week",
        "day",
        "weekday",
        "hour",
        "minute",
        "second",
        "datetimediff",
    ] {
        map.insert(name, ReturnType::Fixed(SemanticType::Number));
    }

    for name in [
        "upper",
        "lower",
        "trim",
        "ltrim",
        "rtrim",
        "substring",
        "replace",
        "concat",
        "text",
        "regexextract",
        "domain",
        "host",
        "subdomain",
        "path",
        "monthname",
        "dayname",
        "quartername",
    ] {
        map.insert(name, ReturnType::Fixed(SemanticType::Text));
    }

    for name in [
        "contains",
        "doesnotcontain",
        "startswith",
        "endswith",
        "isnull",
        "notnull",
        "isempty",
        "notempty",
        "between",
        "in",
        "notin",
    ] {
        map.insert(name, ReturnType::Fixed(SemanticType::Boolean));
    }

    map.insert("coalesce", ReturnType::FirstArgument);
    map.insert("if", ReturnType::FirstArgument);

    map
});

/// Infer the semantic type of an expression.
///
/// `resolve` returns the type of a referenced field, or `None` when the field
/// does not exist; the first unresolvable field is returned as the error.
pub fn infer_type<F>(expression: &Expression, resolve: &F) -> Result<SemanticType, FieldRef>
where
    F: Fn(&FieldRef) -> Option<SemanticType>,
{
    match expression {
        Expression::Field { field } => resolve(field).ok_or_else(|| field.clone()),
        Expression::Literal { value } => Ok(match value {
            Literal::Number(_) => SemanticType::Number,
            Literal::String(_) => SemanticType::Text,
            Literal::Boolean(_) => SemanticType::Boolean,
            Literal::Date(_) => SemanticType::Date,
        }),
        Expression::Arithmetic { op, left, right } => {
            let left = infer_type(left, resolve)?;
            let right = infer_type(right, resolve)?;
            Ok(arithmetic_type(*op, left, right))
        }
        Expression::Function { name, args } => {
            match FUNCTION_RETURN_TYPES.get(name.to_ascii_lowercase().as_str()) {
                Some(ReturnType::Fixed(t)) => {
                    // Arguments still have to resolve
                    for arg in args {
                        infer_type(arg, resolve)?;
                    }
                    Ok(*t)
                }
                Some(ReturnType::FirstArgument) => match args.first() {
                    Some(first) => infer_type(first, resolve),
                    None => Ok(SemanticType::Other),
                },
                None => {
                    tracing::debug!(function = %name, "unknown function, typing as other");
                    Ok(SemanticType::Other)
                }
            }
        }
        Expression::Case { branches, default } => {
            for branch in branches {
                infer_type(&branch.condition, resolve)?;
            }
            let mut result = None;
            for branch in branches {
                let t = infer_type(&branch.result, resolve)?;
                result.get_or_insert(t);
            }
            if let Some(default) = default {
                let t = infer_type(default, resolve)?;
                result.get_or_insert(t);
            }
            Ok(result.unwrap_or(SemanticType::Other))
        }
        Expression::Aggregate { aggregation } => aggregation_type(aggregation, resolve),
    }
}

/// Infer the semantic type of an aggregation's output
pub fn aggregation_type<F>(aggregation: &Aggregation, resolve: &F) -> Result<SemanticType, FieldRef>
where
    F: Fn(&FieldRef) -> Option<SemanticType>,
{
    match aggregation {
        Aggregation::Count => Ok(SemanticType::Number),
        Aggregation::Sum { field } | Aggregation::Average { field } => {
            resolve(field).ok_or_else(|| field.clone())?;
            Ok(SemanticType::Number)
        }
        Aggregation::Distinct { field } => {
            resolve(field).ok_or_else(|| field.clone())?;
            Ok(SemanticType::Number)
        }
        Aggregation::Min { field } | Aggregation::Max { field } => {
            resolve(field).ok_or_else(|| field.clone())
        }
        Aggregation::Named { expression, .. } => infer_type(expression, resolve),
    }
}

fn arithmetic_type(op: ArithmeticOp, left: SemanticType, right: SemanticType) -> SemanticType {
    let left_class = CoercionClass::of(left);
    let right_class = CoercionClass::of(right);
    match (op, left_class, right_class) {
        // date - date is a duration
        (ArithmeticOp::Subtract, Some(CoercionClass::Timelike), Some(CoercionClass::Timelike)) => {
            SemanticType::Number
        }
        // date +/- number shifts the date
        (
            ArithmeticOp::Add | ArithmeticOp::Subtract,
            Some(CoercionClass::Timelike),
            Some(CoercionClass::Numeric),
        )
        | (ArithmeticOp::Add, Some(CoercionClass::Numeric), Some(CoercionClass::Timelike)) => {
            SemanticType::Date
        }
        _ => SemanticType::Number,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn resolve(field: &FieldRef) -> Option<SemanticType> {
        match field.name.as_str() {
            "Total" | "Tax" => Some(SemanticType::Number),
            "Created At" => Some(SemanticType::Date),
            "Title" => Some(SemanticType::Text),
            _ => None,
        }
    }

    fn f(name: &str) -> Expression {
        Expression::field(FieldRef::stage(name))
    }

    #[test]
    fn test_arithmetic_is_number() {
        let net = f("Total").sub(f("Tax"));
        assert_eq!(infer_type(&net, &resolve), Ok(SemanticType::Number));
    }

    #[test]
    fn test_date_shift_and_difference() {
        let shifted = f("Created At").add(Expression::number(7.0));
        assert_eq!(infer_type(&shifted, &resolve), Ok(SemanticType::Date));

        let diff = f("Created At").sub(f("Created At"));
        assert_eq!(infer_type(&diff, &resolve), Ok(SemanticType::Number));
    }

    #[test]
    fn test_function_return_types() {
        let upper = Expression::function("UPPER", [f("Title")]);
        assert_eq!(infer_type(&upper, &resolve), Ok(SemanticType::Text));

        let year = Expression::function("year", [f("Created At")]);
        assert_eq!(infer_type(&year, &resolve), Ok(SemanticType::Number));

        let coalesce = Expression::function("coalesce", [f("Created At"), f("Created At")]);
        assert_eq!(infer_type(&coalesce, &resolve), Ok(SemanticType::Date));

        let unknown = Expression::function("mystery", []);
        assert_eq!(infer_type(&unknown, &resolve), Ok(SemanticType::Other));
    }

    #[test]
    fn test_unresolved_field_is_reported() {
        let expr = Expression::function("upper", [f("Missing")]);
        assert_eq!(infer_type(&expr, &resolve), Err(FieldRef::stage("Missing")));
    }

    #[test]
    fn test_custom_aggregation() {
        let five_count = Expression::number(5.0).mul(Expression::aggregate(Aggregation::Count));
        assert_eq!(infer_type(&five_count, &resolve), Ok(SemanticType::Number));

        let latest = Aggregation::Max {
            field: FieldRef::stage("Created At"),
        };
        assert_eq!(aggregation_type(&latest, &resolve), Ok(SemanticType::Date));
    }

    #[test]
    fn test_case_takes_first_branch_type() {
        let expr = Expression::Case {
            branches: vec![CaseBranch {
                condition: Expression::function("isnull", [f("Title")]),
                result: Expression::string("unknown"),
            }],
            default: Some(Box::new(f("Title"))),
        };
        assert_eq!(infer_type(&expr, &resolve), Ok(SemanticType::Text));
    }

    #[test]
    fn test_fields_walks_aggregations() {
        let expr = Expression::aggregate(Aggregation::Sum {
            field: FieldRef::joined("Product", "Price"),
        })
        .div(f("Total"));
        let fields = expr.fields();
        assert_eq!(fields.len(), 2);
        assert_eq!(fields[0].name, "Price");
    }

    #[test]
    fn test_expression_serde_shape() {
        let expr = f("Total").sub(f("Tax"));
        let json = serde_json::to_value(&expr).unwrap();
        assert_eq!(json["type"], "arithmetic");
        assert_eq!(json["op"], "subtract");
        let back: Expression = serde_json::from_value(json).unwrap();
        assert_eq!(back, expr);
    }
}
