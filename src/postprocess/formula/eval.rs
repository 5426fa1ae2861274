//! Formula evaluation over labeled series
//!
//! Series of different queries are joined by label subset: every maximal
//! label set seen across the inputs becomes one output series, and each
//! variable contributes the first of its series whose labels are contained
//! in that set. Points are computed at the union of the contributing
//! timestamps.

use crate::postprocess::formula::parser::{BinaryOp, Expr, MathFunction};
use crate::query::error::QueryError;
use crate::query::result::{AggregationBucket, Label, TimeSeries, TimeSeriesData, TimeSeriesValue};
use std::collections::{BTreeSet, HashMap, HashSet};

// ============================================================================
// Scalar Evaluation
// ============================================================================

/// Evaluate an expression with bound variables
pub fn eval_expr(expr: &Expr, vars: &HashMap<&str, f64>, now_secs: f64) -> Result<f64, QueryError> {
    match expr {
        Expr::Number(v) => Ok(*v),
        Expr::Variable(name) => vars
            .get(name.as_str())
            .copied()
            .ok_or_else(|| QueryError::execution(format!("Unbound variable '{}'", name))),
        Expr::Neg(inner) => Ok(-eval_expr(inner, vars, now_secs)?),
        Expr::Binary { op, lhs, rhs } => {
            let a = eval_expr(lhs, vars, now_secs)?;
            let b = eval_expr(rhs, vars, now_secs)?;
            Ok(match op {
                BinaryOp::Add => a + b,
                BinaryOp::Sub => a - b,
                BinaryOp::Mul => a * b,
                BinaryOp::Div => a / b,
                BinaryOp::Mod => a % b,
                BinaryOp::Pow => a.powf(b),
            })
        }
        Expr::Call { func, args } => {
            if args.len() != func.arity() {
                return Err(QueryError::validation(format!(
                    "{:?} takes {} argument(s), got {}",
                    func,
                    func.arity(),
                    args.len()
                )));
            }
            if *func == MathFunction::Now {
                return Ok(now_secs);
            }
            let x = eval_expr(&args[0], vars, now_secs)?;
            Ok(apply_math(*func, x))
        }
    }
}

fn apply_math(func: MathFunction, x: f64) -> f64 {
    match func {
        MathFunction::Exp => x.exp(),
        MathFunction::Log | MathFunction::Ln => x.ln(),
        MathFunction::Exp2 => x.exp2(),
        MathFunction::Log2 => x.log2(),
        MathFunction::Exp10 => 10f64.powi(x as i32),
        MathFunction::Log10 => x.log10(),
        MathFunction::Sqrt => x.sqrt(),
        MathFunction::Cbrt => x.cbrt(),
        MathFunction::Erf => erf(x),
        MathFunction::Erfc => erfc(x),
        MathFunction::Lgamma => ln_gamma(x),
        MathFunction::Tgamma => gamma(x),
        MathFunction::Sin => x.sin(),
        MathFunction::Cos => x.cos(),
        MathFunction::Tan => x.tan(),
        MathFunction::Asin => x.asin(),
        MathFunction::Acos => x.acos(),
        MathFunction::Atan => x.atan(),
        MathFunction::Degrees => x.to_degrees(),
        MathFunction::Radians => x.to_radians(),
        MathFunction::Now => f64::NAN,
    }
}

// ============================================================================
// Special Functions
// ============================================================================

/// Complementary error function, fractional error below 1.2e-7
pub fn erfc(x: f64) -> f64 {
    let z = x.abs();
    let t = 1.0 / (1.0 + 0.5 * z);
    let poly = -z * z - 1.265_512_23
        + t * (1.000_023_68
            + t * (0.374_091_96
                + t * (0.096_784_18
                    + t * (-0.186_288_06
                        + t * (0.278_868_07
                            + t * (-1.135_203_98
                                + t * (1.488_515_87
                                    + t * (-0.822_152_23 + t * 0.170_872_77))))))));
    let r = t * poly.exp();
    if x >= 0.0 {
        r
    } else {
        2.0 - r
    }
}

/// Error function
pub fn erf(x: f64) -> f64 {
    1.0 - erfc(x)
}

const LANCZOS_G: f64 = 7.0;
const LANCZOS: [f64; 9] = [
    0.999_999_999_999_809_9,
    676.520_368_121_885_1,
    -1_259.139_216_722_402_8,
    771.323_428_777_653_1,
    -176.615_029_162_140_6,
    12.507_343_278_686_905,
    -0.138_571_095_265_720_12,
    9.984_369_578_019_572e-6,
    1.505_632_735_149_311_6e-7,
];

/// Gamma function (Lanczos approximation with reflection)
pub fn gamma(x: f64) -> f64 {
    if x < 0.5 {
        let s = (std::f64::consts::PI * x).sin();
        return std::f64::consts::PI / (s * gamma(1.0 - x));
    }
    let x = x - 1.0;
    let mut a = LANCZOS[0];
    let t = x + LANCZOS_G + 0.5;
    for (i, c) in LANCZOS.iter().enumerate().skip(1) {
        a += c / (x + i as f64);
    }
    (2.0 * std::f64::consts::PI).sqrt() * t.powf(x + 0.5) * (-t).exp() * a
}

/// Natural log of the absolute gamma function
pub fn ln_gamma(x: f64) -> f64 {
    if x < 0.5 {
        let s = (std::f64::consts::PI * x).sin().abs();
        return std::f64::consts::PI.ln() - s.ln() - ln_gamma(1.0 - x);
    }
    let x = x - 1.0;
    let mut a = LANCZOS[0];
    let t = x + LANCZOS_G + 0.5;
    for (i, c) in LANCZOS.iter().enumerate().skip(1) {
        a += c / (x + i as f64);
    }
    0.5 * (2.0 * std::f64::consts::PI).ln() + (x + 0.5) * t.ln() - t + a.ln()
}

// ============================================================================
// Series Evaluation
// ============================================================================

struct Binding<'a> {
    name: &'a str,
    query: &'a str,
    series: Vec<&'a TimeSeries>,
}

fn split_variable(variable: &str) -> (&str, Option<&str>) {
    match variable.split_once('.') {
        Some((query, selector)) => (query, Some(selector)),
        None => (variable, None),
    }
}

fn select_bucket<'a>(
    data: &'a TimeSeriesData,
    selector: Option<&str>,
) -> Option<&'a AggregationBucket> {
    match selector {
        None => data
            .aggregations
            .iter()
            .find(|b| b.index == 0)
            .or_else(|| data.aggregations.first()),
        Some(sel) => match sel.parse::<usize>() {
            Ok(idx) => data.aggregations.iter().find(|b| b.index == idx),
            Err(_) => data.aggregations.iter().find(|b| b.alias == sel),
        },
    }
}

fn label_pairs(labels: &[Label]) -> Vec<(String, String)> {
    let mut pairs: Vec<(String, String)> = labels
        .iter()
        .map(|l| (l.key.clone(), l.value.to_string()))
        .collect();
    pairs.sort();
    pairs.dedup();
    pairs
}

fn is_subset(small: &[(String, String)], large: &[(String, String)]) -> bool {
    small.iter().all(|p| large.contains(p))
}

/// Evaluate `expr` for every joined label set of the inputs
///
/// A variable without a point at some timestamp contributes zero when its
/// query is in `can_default_zero`; otherwise that timestamp is skipped.
/// Points that fail to evaluate or are not finite are dropped, as are series
/// left without points.
pub fn evaluate_series(
    expr: &Expr,
    inputs: &HashMap<String, TimeSeriesData>,
    can_default_zero: &HashSet<String>,
    now_secs: f64,
) -> Result<Vec<TimeSeries>, QueryError> {
    let variables = expr.variables();
    let mut bindings = Vec::with_capacity(variables.len());
    for variable in &variables {
        let (query, selector) = split_variable(variable);
        let series = match inputs.get(query) {
            Some(data) => select_bucket(data, selector)
                .map(|b| b.series.iter().collect())
                .unwrap_or_default(),
            None if can_default_zero.contains(query) => Vec::new(),
            None => {
                return Err(QueryError::not_found(format!(
                    "Formula references unknown query '{}'",
                    query
                )))
            }
        };
        bindings.push(Binding {
            name: variable,
            query,
            series,
        });
    }

    // Maximal label sets, largest first
    let mut candidates: Vec<(Vec<(String, String)>, &TimeSeries)> = Vec::new();
    for binding in &bindings {
        for series in &binding.series {
            let pairs = label_pairs(&series.labels);
            if !candidates.iter().any(|(p, _)| *p == pairs) {
                candidates.push((pairs, *series));
            }
        }
    }
    candidates.sort_by(|a, b| b.0.len().cmp(&a.0.len()));
    let mut targets: Vec<(Vec<(String, String)>, &TimeSeries)> = Vec::new();
    for (pairs, series) in candidates {
        if !targets.iter().any(|(t, _)| is_subset(&pairs, t)) {
            targets.push((pairs, series));
        }
    }

    let mut output = Vec::with_capacity(targets.len());
    for (target, origin) in &targets {
        let matched: Vec<Option<HashMap<i64, f64>>> = bindings
            .iter()
            .map(|b| {
                b.series
                    .iter()
                    .find(|s| is_subset(&label_pairs(&s.labels), target))
                    .map(|s| s.values.iter().map(|v| (v.timestamp, v.value)).collect())
            })
            .collect();

        let timestamps: BTreeSet<i64> = matched
            .iter()
            .flatten()
            .flat_map(|points| points.keys().copied())
            .collect();

        let mut values = Vec::new();
        'points: for ts in timestamps {
            let mut vars: HashMap<&str, f64> = HashMap::with_capacity(bindings.len());
            for (binding, points) in bindings.iter().zip(&matched) {
                match points.as_ref().and_then(|p| p.get(&ts)) {
                    Some(v) => {
                        vars.insert(binding.name, *v);
                    }
                    None if can_default_zero.contains(binding.query) => {
                        vars.insert(binding.name, 0.0);
                    }
                    None => continue 'points,
                }
            }
            match eval_expr(expr, &vars, now_secs) {
                Ok(v) if v.is_finite() => values.push(TimeSeriesValue::new(ts, v)),
                _ => {}
            }
        }

        if !values.is_empty() {
            output.push(TimeSeries::new(origin.labels.clone(), values));
        }
    }

    Ok(output)
}
