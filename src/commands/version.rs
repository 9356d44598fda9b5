pub fn run() {
    println!("telco-systest {}", env!("CARGO_PKG_VERSION"));
}
