#![no_main]

use es_expr::parse_formula;
use es_runtime::DEFAULT_MAX_FORMULA_LEN;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let Ok(formula) = std::str::from_utf8(data) else {
        return;
    };
    if let Ok(expr) = parse_formula(formula) {
        // The canonical rendering must parse back to the same tree. Wide
        // literals can render longer than the input, past the length limit.
        let canonical = expr.to_string();
        if canonical.len() > DEFAULT_MAX_FORMULA_LEN {
            return;
        }
        let reparsed = parse_formula(&canonical);
        assert_eq!(reparsed.as_ref().ok(), Some(&expr), "canonical form {canonical}");
    }
});
