#![no_main]

use es_expr::{EvalContext, evaluate_formula};
use es_frame::Series;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let Ok(formula) = std::str::from_utf8(data) else {
        return;
    };

    let context: EvalContext = [
        Series::from_pairs(
            "gdp",
            [
                ("2020-01-01", 1.0),
                ("2020-02-01", 0.0),
                ("2020-03-01", 3.0),
                ("2020-04-01", 2.5),
            ],
        ),
        Series::from_pairs("cpi", [("2020-01-01", 10.0), ("2020-02-01", 10.0)]),
        Series::empty("empty"),
    ]
    .into_iter()
    .collect();

    let first = evaluate_formula(formula, &context);
    let second = evaluate_formula(formula, &context);
    if let (Ok(a), Ok(b)) = (&first, &second) {
        let a = result_bits(a);
        let b = result_bits(b);
        assert_eq!(a, b);
    } else {
        assert_eq!(first.err(), second.err());
    }
});

// NaN never compares equal, so compare results bit for bit.
fn result_bits(value: &es_expr::Value) -> Vec<(String, Option<u64>)> {
    match value {
        es_expr::Value::Scalar(v) => vec![(String::new(), Some(v.to_bits()))],
        es_expr::Value::Series(series) => series
            .iter()
            .map(|(date, v)| (date.to_owned(), v.map(f64::to_bits)))
            .collect(),
    }
}
