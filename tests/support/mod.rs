/// Initialize tracing for tests with proper test output handling
#[allow(unused)]
pub fn tracing_init() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}
