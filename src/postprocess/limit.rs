//! Series ordering and limiting
//!
//! Series within each aggregation bucket are ordered by the query's order-by
//! terms and truncated to the limit. The pseudo-key `#value` orders by the
//! mean of a series' finite values; any other key orders by label value.
//! Without order-by terms series are ordered by descending mean. Sorting is
//! stable, so equal series keep their backend order.

use crate::query::request::{OrderBy, OrderDirection};
use crate::query::result::{QueryResult, ResultValue, TimeSeries, TimeSeriesData};
use std::cmp::Ordering;

/// Order-by key that refers to the series value
pub const VALUE_ORDER_KEY: &str = "#value";

/// Order and limit the series of a time-series result
pub fn apply_series_limit(result: &mut QueryResult, limit: usize, order: &[OrderBy]) {
    if let ResultValue::TimeSeries(data) = &mut result.value {
        limit_series(data, limit, order);
    }
}

/// Order and limit the series of every bucket; `limit == 0` only orders
pub fn limit_series(data: &mut TimeSeriesData, limit: usize, order: &[OrderBy]) {
    for bucket in &mut data.aggregations {
        let mut keyed: Vec<(f64, TimeSeries)> = bucket
            .series
            .drain(..)
            .map(|s| (finite_mean(&s), s))
            .collect();

        keyed.sort_by(|(mean_a, a), (mean_b, b)| {
            if order.is_empty() {
                return mean_b.total_cmp(mean_a);
            }
            for term in order {
                let ord = if term.key.name == VALUE_ORDER_KEY {
                    mean_a.total_cmp(mean_b)
                } else {
                    label_value(a, &term.key.name).cmp(&label_value(b, &term.key.name))
                };
                let ord = match term.direction {
                    OrderDirection::Asc => ord,
                    OrderDirection::Desc => ord.reverse(),
                };
                if ord != Ordering::Equal {
                    return ord;
                }
            }
            Ordering::Equal
        });

        if limit > 0 {
            keyed.truncate(limit);
        }
        bucket.series = keyed.into_iter().map(|(_, s)| s).collect();
    }
}

/// Rewrite order keys in `aliases` to [`VALUE_ORDER_KEY`]
pub fn normalize_order(order: &[OrderBy], aliases: &[String]) -> Vec<OrderBy> {
    order
        .iter()
        .map(|term| {
            if aliases.iter().any(|a| *a == term.key.name) {
                OrderBy::new(VALUE_ORDER_KEY, term.direction)
            } else {
                term.clone()
            }
        })
        .collect()
}

fn finite_mean(series: &TimeSeries) -> f64 {
    let (sum, count) = series
        .values
        .iter()
        .filter(|v| v.value.is_finite())
        .fold((0.0, 0usize), |(sum, count), v| (sum + v.value, count + 1));
    if count == 0 {
        0.0
    } else {
        sum / count as f64
    }
}

fn label_value(series: &TimeSeries, key: &str) -> String {
    series
        .labels
        .iter()
        .find(|l| l.key == key)
        .map(|l| l.value.to_string())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::result::{AggregationBucket, Label, TimeSeriesValue};

    fn service(name: &str, values: &[f64]) -> TimeSeries {
        TimeSeries::new(
            vec![Label::new("service", name)],
            values
                .iter()
                .enumerate()
                .map(|(i, v)| TimeSeriesValue::new((i as i64 + 1) * 1000, *v))
                .collect(),
        )
    }

    fn data() -> TimeSeriesData {
        let mut bucket = AggregationBucket::new(0);
        bucket.series = vec![
            service("service1", &[10.0, 20.0]),
            service("service2", &[30.0, 40.0]),
            service("service3", &[5.0, 10.0]),
        ];
        TimeSeriesData {
            query_name: "test".to_string(),
            aggregations: vec![bucket],
        }
    }

    fn names(data: &TimeSeriesData) -> Vec<String> {
        data.aggregations[0]
            .series
            .iter()
            .map(|s| s.labels[0].value.to_string())
            .collect()
    }

    #[test]
    fn test_default_order_is_mean_descending() {
        let mut data = data();
        limit_series(&mut data, 2, &[]);
        assert_eq!(names(&data), vec!["service2", "service1"]);
    }

    #[test]
    fn test_label_order() {
        let mut data = data();
        limit_series(
            &mut data,
            0,
            &[OrderBy::new("service", OrderDirection::Desc)],
        );
        assert_eq!(names(&data), vec!["service3", "service2", "service1"]);
    }

    #[test]
    fn test_value_order_ascending() {
        let mut data = data();
        limit_series(
            &mut data,
            1,
            &[OrderBy::new(VALUE_ORDER_KEY, OrderDirection::Asc)],
        );
        assert_eq!(names(&data), vec!["service3"]);
    }

    #[test]
    fn test_non_finite_values_ignored_in_mean() {
        let mut bucket = AggregationBucket::new(0);
        bucket.series = vec![
            service("a", &[1.0, f64::NAN]),
            service("b", &[f64::INFINITY, 0.5]),
        ];
        let mut data = TimeSeriesData {
            query_name: "A".to_string(),
            aggregations: vec![bucket],
        };
        limit_series(&mut data, 0, &[]);
        assert_eq!(names(&data), vec!["a", "b"]);
    }

    #[test]
    fn test_stable_for_ties() {
        let mut bucket = AggregationBucket::new(0);
        bucket.series = vec![service("x", &[1.0]), service("y", &[1.0])];
        let mut data = TimeSeriesData {
            query_name: "A".to_string(),
            aggregations: vec![bucket],
        };
        limit_series(&mut data, 0, &[]);
        assert_eq!(names(&data), vec!["x", "y"]);
    }

    #[test]
    fn test_normalize_order() {
        let order = vec![
            OrderBy::new("sum(rate(requests))", OrderDirection::Asc),
            OrderBy::new("service", OrderDirection::Desc),
        ];
        let normalized = normalize_order(&order, &["sum(rate(requests))".to_string()]);
        assert_eq!(normalized[0].key.name, VALUE_ORDER_KEY);
        assert_eq!(normalized[0].direction, OrderDirection::Asc);
        assert_eq!(normalized[1].key.name, "service");
    }
}
