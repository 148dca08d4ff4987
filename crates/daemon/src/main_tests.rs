use super::*;

#[test]
fn init_tracing_falls_back_to_info_on_a_bad_filter() {
    // Safe to call more than once in the same process: a second
    // `tracing_subscriber::fmt().init()` call is a no-op past the first.
    init_tracing("not a valid filter ===");
}
