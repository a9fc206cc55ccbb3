#![no_main]

use es_io::{read_series_csv_str, write_series_csv_string};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let Ok(input) = std::str::from_utf8(data) else {
        return;
    };
    if let Ok(series) = read_series_csv_str("fuzz", input) {
        assert!(series.index().is_strictly_ascending());
        let written = write_series_csv_string(&series).expect("accepted series must write");
        let reread = read_series_csv_str("fuzz", &written).expect("written csv must read back");
        assert_eq!(reread.len(), series.len());
    }
});
